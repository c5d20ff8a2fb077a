//! Client for the remote authority that decides verification, billing and
//! shutdown-cancellation questions.
//!
//! [`Authority`] is the seam the control plane talks to; [`HttpAuthority`]
//! is the production implementation over JSON/HTTP.

mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use session::ParticipantId;

pub use http::HttpAuthority;

#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    /// Connection refused, timeout, or any other failure before a status
    /// line was received.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("authority returned status {0}")]
    Status(u16),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for AuthorityError {
    fn from(e: reqwest::Error) -> Self {
        AuthorityError::Transport(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub uuid: ParticipantId,
    pub player_name: String,
    pub server_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub uuid: ParticipantId,
    pub player_name: String,
    pub server_port: u16,
    /// Milliseconds since the session started.
    pub online_time: u64,
    pub disconnect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelShutdownRequest {
    pub server_port: u16,
    pub uuid: ParticipantId,
    pub player_name: String,
}

#[derive(Debug, Default, Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    verified: bool,
}

#[derive(Debug, Default, Deserialize)]
struct PlayResponse {
    #[serde(default)]
    kick: bool,
}

#[derive(Debug, Default, Deserialize)]
struct CancelShutdownResponse {
    #[serde(default)]
    allowed: bool,
}

#[async_trait]
pub trait Authority: Send + Sync {
    /// Whether the participant has a linked account.
    async fn verify(&self, req: VerifyRequest) -> Result<bool, AuthorityError>;

    /// Report online time. Returns whether the participant should be kicked;
    /// always `false` for the final (`disconnect = true`) report.
    async fn play(&self, req: PlayRequest) -> Result<bool, AuthorityError>;

    /// Whether the requester may cancel the pending shutdown.
    async fn cancel_shutdown(&self, req: CancelShutdownRequest) -> Result<bool, AuthorityError>;
}
