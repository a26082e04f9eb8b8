//! Failure taxonomy for the retrieval pipeline.
//!
//! Every stage-specific failure is classified into one [`RetrievalError`]
//! variant at the orchestrator boundary — callers observe a single error type
//! and branch on [`RetrievalError::kind`]. Disposal-related runtime errors
//! must never surface here: a message mentioning a disposed browser object is
//! a lifecycle defect, not an expected outcome.

use thiserror::Error;

/// Stage discriminator carried by every [`RetrievalError`].
///
/// Callers that want their own retry/backoff policy branch on this instead of
/// matching error variants (no retries happen inside the pipeline itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The headless browser process could not be launched or initialized.
    SessionLaunch,
    /// Login against the controller console failed (missing credentials,
    /// unreachable login page, rejected credentials, no post-login marker).
    Authentication,
    /// The event/device combination yields no retrievable clip (expired
    /// retention, wrong device, event page gone).
    ResourceNotFound,
    /// A bounded page-wait ran out of budget before the page reached the
    /// expected state.
    Timeout,
    /// Anything the pipeline could not classify.
    Internal,
}

/// Aggregate error for one `retrieve_video` call.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("browser session launch failed: {0}")]
    SessionLaunch(String),

    #[error("authentication against {host} failed: {reason}")]
    Authentication { host: String, reason: String },

    #[error("no retrievable clip for this event: {0}")]
    ResourceNotFound(String),

    #[error("{stage} stage timed out after {waited_ms}ms")]
    Timeout { stage: &'static str, waited_ms: u64 },

    #[error("video retrieval failed: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl RetrievalError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::SessionLaunch(_) => FailureKind::SessionLaunch,
            Self::Authentication { .. } => FailureKind::Authentication,
            Self::ResourceNotFound(_) => FailureKind::ResourceNotFound,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Internal(_) => FailureKind::Internal,
        }
    }

    /// `true` when a later attempt against the same controller could plausibly
    /// succeed without operator intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::SessionLaunch(_) | Self::Timeout { .. } | Self::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            RetrievalError::SessionLaunch("no browser".into()).kind(),
            FailureKind::SessionLaunch
        );
        assert_eq!(
            RetrievalError::Authentication {
                host: "10.0.0.1".into(),
                reason: "rejected".into()
            }
            .kind(),
            FailureKind::Authentication
        );
        assert_eq!(
            RetrievalError::Timeout {
                stage: "locate",
                waited_ms: 1500
            }
            .kind(),
            FailureKind::Timeout
        );
    }

    #[test]
    fn rejected_credentials_are_not_transient() {
        let rejected = RetrievalError::Authentication {
            host: "udm.local".into(),
            reason: "rejected".into(),
        };
        assert!(!rejected.is_transient());
        assert!(RetrievalError::Timeout {
            stage: "locate",
            waited_ms: 100
        }
        .is_transient());
    }

    #[test]
    fn messages_identify_the_stage() {
        let err = RetrievalError::Authentication {
            host: "udm.local".into(),
            reason: "login form not found".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("authentication"));
        assert!(msg.contains("udm.local"));

        let err = RetrievalError::Timeout {
            stage: "locate",
            waited_ms: 30_000,
        };
        assert!(err.to_string().contains("locate"));
    }
}
