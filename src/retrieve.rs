//! Retrieval orchestration.
//!
//! One call = one session. The stages run inside an inner future; release
//! runs after that future has fully resolved, so no awaited navigation or
//! evaluation can still be outstanding when teardown starts. Release runs on
//! every exit path — success, auth failure, locate failure — exactly once.

use crate::auth::AuthenticationFlow;
use crate::core::config::RetrieverConfig;
use crate::core::types::{RetrievalOutcome, RetrievalRequest, UnifiCredentials};
use crate::credentials::CredentialProvider;
use crate::error::RetrievalError;
use crate::locate::VideoLocator;
use crate::session::{BrowserSessionManager, SessionFactory, SessionSurface};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Clone, Copy, Debug)]
enum RetrievalStage {
    SessionAcquired,
    Authenticating,
    Locating,
    Released,
}

fn log_stage(stage: RetrievalStage) {
    debug!("retrieval_stage={:?}", stage);
}

/// Composes session acquisition, login, and clip location into one
/// idempotent operation with guaranteed session teardown.
pub struct VideoRetriever<F: SessionFactory = BrowserSessionManager> {
    factory: F,
    auth: AuthenticationFlow,
    locator: VideoLocator,
}

impl VideoRetriever<BrowserSessionManager> {
    /// Retriever backed by a real headless Chromium per call.
    pub fn new(config: RetrieverConfig) -> Self {
        let factory = BrowserSessionManager::new(config.clone());
        Self::with_factory(factory, &config)
    }
}

impl Default for VideoRetriever<BrowserSessionManager> {
    fn default() -> Self {
        Self::new(RetrieverConfig::default())
    }
}

impl<F: SessionFactory> VideoRetriever<F> {
    /// Retriever over a caller-supplied session factory. Tests use this to
    /// instrument acquisition and release.
    pub fn with_factory(factory: F, config: &RetrieverConfig) -> Self {
        Self {
            factory,
            auth: AuthenticationFlow::new(config),
            locator: VideoLocator::new(config),
        }
    }

    /// Retrieve the video clip for one camera event.
    ///
    /// Each call acquires a fresh session and releases it unconditionally —
    /// even on success, even when a stage fails — so repeated invocations
    /// never leak sessions or accumulate listeners.
    pub async fn retrieve_video(&self, request: &RetrievalRequest) -> RetrievalOutcome {
        info!(
            "retrieving clip: device='{}' event={} user='{}'",
            request.device_name,
            request.event_local_link,
            request.credentials.masked_username()
        );

        let mut session = self.factory.acquire().await?;
        log_stage(RetrievalStage::SessionAcquired);

        // The inner future resolves (success or failure) before release is
        // reachable — no awaited stage work can still be in flight during
        // teardown.
        let outcome = self.run_stages(&mut session, request).await;

        session.release().await;
        log_stage(RetrievalStage::Released);

        match &outcome {
            Ok(artifact) => info!(
                "clip retrieved for '{}' ({})",
                request.device_name,
                artifact.metadata().content_type
            ),
            Err(e) => warn!("retrieval failed ({:?}): {}", e.kind(), e),
        }
        outcome
    }

    /// Source credentials through an injected [`CredentialProvider`] keyed by
    /// controller hostname, then retrieve.
    pub async fn retrieve_with_provider<P: CredentialProvider>(
        &self,
        provider: &P,
        controller: &str,
        event_local_link: Url,
        device_name: &str,
    ) -> RetrievalOutcome {
        let credentials: UnifiCredentials =
            provider
                .credentials(controller)
                .await
                .map_err(|e| RetrievalError::Authentication {
                    host: controller.to_string(),
                    reason: format!("credential source failed: {e:#}"),
                })?;
        let request = RetrievalRequest::new(event_local_link, device_name, credentials);
        self.retrieve_video(&request).await
    }

    async fn run_stages(
        &self,
        session: &mut F::Session,
        request: &RetrievalRequest,
    ) -> RetrievalOutcome {
        log_stage(RetrievalStage::Authenticating);
        self.auth.login(session, &request.credentials).await?;

        log_stage(RetrievalStage::Locating);
        self.locator
            .locate(
                session,
                &request.event_local_link,
                &request.device_name,
            )
            .await
    }
}
