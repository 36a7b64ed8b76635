//! REST client for the relay's clipboard endpoints

use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use thiserror::Error;

use cr_core::config::ClientConfig;
use cr_protocol::RespInfo;

/// REST request errors
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Relay rejected the credentials")]
    Unauthorized,

    #[error("Relay answered {code}: {message}")]
    Status { code: u16, message: String },
}

/// Pull client for `/clipboard/get`
#[derive(Debug, Clone)]
pub struct RemoteClipboard {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
}

impl RemoteClipboard {
    pub fn new(
        base_url: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            user: user.into(),
            password: password.into(),
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, RemoteError> {
        Self::new(
            config.http_base_url(),
            &config.auth.user,
            &config.auth.password,
            config.write_timeout,
        )
    }

    /// Latest content stored for the user, `None` if there is none
    pub async fn fetch(&self) -> Result<Option<Bytes>, RemoteError> {
        let response = self
            .client
            .get(format!("{}/clipboard/get", self.base_url))
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::UNAUTHORIZED => return Err(RemoteError::Unauthorized),
            _ => {}
        }

        let status = response.status();
        let info: RespInfo = response.json().await?;
        if !status.is_success() {
            return Err(RemoteError::Status {
                code: info.code,
                message: info.message,
            });
        }

        Ok(info
            .data
            .map(|data| Bytes::from(data.content.into_bytes())))
    }
}
