pub mod auth;
pub mod browser;
pub mod core;
pub mod credentials;
pub mod error;
pub mod locate;
pub mod retrieve;
pub mod session;

// --- Primary exports ---
pub use self::core::config::RetrieverConfig;
pub use self::core::types::{
    ClipMetadata, RetrievalOutcome, RetrievalRequest, UnifiCredentials, VideoArtifact,
};
pub use credentials::{CredentialProvider, StaticCredentialProvider};
pub use error::{FailureKind, RetrievalError};
pub use retrieve::VideoRetriever;
pub use session::{BrowserSessionManager, ScopedSession, SessionFactory, SessionSurface};
