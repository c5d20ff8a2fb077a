use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{
    Authority, AuthorityError, CancelShutdownRequest, CancelShutdownResponse, PlayRequest,
    PlayResponse, VerifyRequest, VerifyResponse,
};

/// JSON-over-HTTP authority at `base_url` (`/verify`, `/play`,
/// `/cancelShutdown`).
#[derive(Clone)]
pub struct HttpAuthority {
    client: Client,
    base_url: String,
}

impl HttpAuthority {
    /// `timeout` bounds both connecting and the whole request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, AuthorityError> {
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<reqwest::Response, AuthorityError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            tracing::debug!(%url, status = %response.status(), "authority rejected request");
            return Err(AuthorityError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, AuthorityError> {
        let response = self.post(path, body).await?;
        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[async_trait]
impl Authority for HttpAuthority {
    async fn verify(&self, req: VerifyRequest) -> Result<bool, AuthorityError> {
        let resp: VerifyResponse = self.post_json("/verify", &req).await?;
        Ok(resp.verified)
    }

    async fn play(&self, req: PlayRequest) -> Result<bool, AuthorityError> {
        if req.disconnect {
            self.post("/play", &req).await?;
            return Ok(false);
        }
        let resp: PlayResponse = self.post_json("/play", &req).await?;
        Ok(resp.kick)
    }

    async fn cancel_shutdown(&self, req: CancelShutdownRequest) -> Result<bool, AuthorityError> {
        let resp: CancelShutdownResponse = self.post_json("/cancelShutdown", &req).await?;
        Ok(resp.allowed)
    }
}
