//! Authenticator: mints a fresh bearer for an account
//!
//! The messenger handshake itself lives in an external helper service; this
//! side only asks it for a token and sanity-checks the answer.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::AccountConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no authorization helper configured")]
    NotConfigured,

    #[error("authorization timed out after {0:?}")]
    Timeout(Duration),

    #[error("authorization request failed: {0}")]
    Http(String),

    #[error("authorization rejected: {0}")]
    Rejected(String),
}

/// Mints bearer credentials. Only the credential cache calls this.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authorize(&self, account: &AccountConfig) -> Result<String, AuthError>;
}

#[derive(Serialize)]
struct AuthorizeRequest<'a> {
    account: &'a str,
    phone_number: Option<&'a str>,
}

#[derive(Deserialize)]
struct AuthorizeResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Authenticator backed by an HTTP helper:
/// `POST {helper_url}/authorize {account, phone_number}` -> `{token}`
pub struct HttpAuthenticator {
    client: reqwest::Client,
    helper_url: Option<String>,
    helper_token: Option<SecretString>,
}

impl HttpAuthenticator {
    pub fn new(
        helper_url: Option<String>,
        helper_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Http(e.to_string()))?;

        Ok(Self {
            client,
            helper_url: helper_url
                .map(|u| u.trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            helper_token,
        })
    }
}

#[async_trait]
impl Authenticator for HttpAuthenticator {
    async fn authorize(&self, account: &AccountConfig) -> Result<String, AuthError> {
        let base = self.helper_url.as_ref().ok_or(AuthError::NotConfigured)?;

        let mut request = self
            .client
            .post(format!("{}/authorize", base))
            .json(&AuthorizeRequest {
                account: &account.name,
                phone_number: account.phone_number.as_deref(),
            });
        if let Some(token) = &self.helper_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Http(e.to_string()))?;
        let status = response.status();
        let body: AuthorizeResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Http(format!("status {}: {}", status, e)))?;

        if !status.is_success() {
            return Err(AuthError::Rejected(
                body.error.unwrap_or_else(|| format!("status {}", status)),
            ));
        }

        match body.token {
            Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            _ => Err(AuthError::Rejected(
                body.error.unwrap_or_else(|| "empty token".to_string()),
            )),
        }
    }
}
