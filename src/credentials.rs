//! Credential sourcing as an injected capability.
//!
//! The pipeline never reads credentials out of process-wide state — whoever
//! drives a retrieval hands it a [`CredentialProvider`] (backed by a secret
//! store, a config file, whatever). The provider may cache; this core does
//! not.

use crate::core::types::UnifiCredentials;
use async_trait::async_trait;

/// Supplies `{hostname, username, password}` for a given controller.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// `controller` is an opaque key meaningful to the provider (a secret
    /// name, a controller id). Implementations must not log password values.
    async fn credentials(&self, controller: &str) -> anyhow::Result<UnifiCredentials>;
}

/// Fixed credentials, for tests and single-controller deployments.
pub struct StaticCredentialProvider {
    credentials: UnifiCredentials,
}

impl StaticCredentialProvider {
    pub fn new(credentials: UnifiCredentials) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn credentials(&self, _controller: &str) -> anyhow::Result<UnifiCredentials> {
        Ok(self.credentials.clone())
    }
}
