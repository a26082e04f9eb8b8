use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Credentials for one UniFi Protect controller.
///
/// Every field deserializes to an empty string when absent from the wire form
/// — never `None`, never null. The struct is a capability token: it is passed
/// into a retrieval call, used for a single login attempt, and never
/// persisted or logged in cleartext (see [`Self::masked_username`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiCredentials {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl UnifiCredentials {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    /// A login attempt is only worth making when both username and password
    /// are present and non-blank. Hostname is validated separately when the
    /// login URL is built.
    pub fn is_complete(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.trim().is_empty()
    }

    /// Username safe for log lines: first 3 characters shown, one `*` per
    /// remaining character. Usernames of 3 characters or fewer are too short
    /// to leak anything useful and render unmasked.
    pub fn masked_username(&self) -> String {
        mask_tail(&self.username)
    }

    /// Passwords are always fully masked, preserving only the length.
    pub fn masked_password(&self) -> String {
        "*".repeat(self.password.chars().count())
    }

    /// Base URL of the controller console. Accepts a bare hostname/IP
    /// (scheme defaults to `https`, the only thing a Protect console serves)
    /// or a full URL.
    pub fn console_url(&self) -> Result<Url, url::ParseError> {
        let host = self.hostname.trim();
        if host.contains("://") {
            Url::parse(host)
        } else {
            Url::parse(&format!("https://{host}/"))
        }
    }
}

fn mask_tail(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 3 {
        return value.to_string();
    }
    let visible: String = chars[..3].iter().collect();
    format!("{}{}", visible, "*".repeat(chars.len() - 3))
}

/// One webhook-triggered retrieval. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Controller-local link to the event page (`/protect/events/<id>` style).
    pub event_local_link: Url,
    /// Camera name as reported by the webhook payload.
    pub device_name: String,
    pub credentials: UnifiCredentials,
}

impl RetrievalRequest {
    pub fn new(
        event_local_link: Url,
        device_name: impl Into<String>,
        credentials: UnifiCredentials,
    ) -> Self {
        Self {
            event_local_link,
            device_name: device_name.into(),
            credentials,
        }
    }
}

/// Where and when a clip was retrieved.
#[derive(Debug, Clone, Serialize)]
pub struct ClipMetadata {
    pub device_name: String,
    pub event_link: Url,
    pub content_type: String,
    pub retrieved_at: DateTime<Utc>,
}

/// The retrieved video artifact. Never partially populated: either the clip
/// bytes came through the authenticated page, or a short-lived signed URL was
/// extracted for the caller to fetch itself.
#[derive(Debug, Clone)]
pub enum VideoArtifact {
    Bytes {
        data: Vec<u8>,
        metadata: ClipMetadata,
    },
    SignedUrl {
        url: Url,
        metadata: ClipMetadata,
    },
}

impl VideoArtifact {
    pub fn metadata(&self) -> &ClipMetadata {
        match self {
            Self::Bytes { metadata, .. } | Self::SignedUrl { metadata, .. } => metadata,
        }
    }
}

/// Result of one `retrieve_video` call: an artifact or a classified failure.
pub type RetrievalOutcome = Result<VideoArtifact, crate::error::RetrievalError>;
