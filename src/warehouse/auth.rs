//! Token authority for the warehouse API
//!
//! The API takes a basic credential only on the token exchange endpoint;
//! everything else wants the bearer token obtained there. The authority
//! owns the single cached token for the process and replaces it in place
//! whenever the retriever observes an authorization failure.

use crate::error::{Result, SyncError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

/// Response of the token exchange endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Obtains and refreshes the bearer credential for the warehouse API
pub struct TokenAuthority {
    client: reqwest::Client,
    base_url: String,
    login: String,
    password: String,
    token: Option<String>,
}

impl TokenAuthority {
    pub fn new(client: reqwest::Client, base_url: &str, login: &str, password: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            login: login.to_string(),
            password: password.to_string(),
            token: None,
        }
    }

    /// `Authorization` header value for the basic-auth token exchange
    fn basic_auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.login, self.password);
        format!("Basic {}", BASE64.encode(credentials))
    }

    /// Currently-believed-valid bearer header value, obtaining a token via
    /// the basic-auth exchange on first use
    pub async fn auth_header(&mut self) -> Result<String> {
        if self.token.is_none() {
            self.fetch_token().await?;
        }
        // Token is guaranteed present after fetch_token succeeds
        Ok(format!("Bearer {}", self.token.as_deref().unwrap_or_default()))
    }

    /// Force re-acquisition, replacing the cached token in place
    pub async fn refresh(&mut self) -> Result<String> {
        log::info!("Refreshing warehouse API access token");
        self.fetch_token().await?;
        self.auth_header().await
    }

    async fn fetch_token(&mut self) -> Result<()> {
        let url = format!("{}/security/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.basic_auth_header())
            .header("Accept-Encoding", "gzip")
            .send()
            .await?;

        // The API answers 201 on first issue and 200 on re-issue
        if !response.status().is_success() {
            let status = response.status();
            log::error!("Token exchange rejected with status {}", status);
            return Err(SyncError::Auth(format!(
                "token exchange returned {}",
                status
            )));
        }

        let token: TokenResponse = response.json().await?;
        self.token = Some(token.access_token);
        log::info!("Access token obtained");
        Ok(())
    }

    /// Cheap authenticated probe: fetches the employee list with the basic
    /// credential. Fails with an auth error when the remote rejects the
    /// credential or the network is unreachable.
    pub async fn test_auth(&self) -> Result<bool> {
        log::info!("Testing warehouse API authentication");
        let url = format!("{}/entity/employee", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", self.basic_auth_header())
            .send()
            .await
            .map_err(|e| SyncError::Auth(format!("auth probe unreachable: {}", e)))?;

        if response.status().is_client_error() {
            log::error!("Authentication failed with status {}", response.status());
            return Err(SyncError::Auth(format!(
                "auth probe returned {}",
                response.status()
            )));
        }
        if !response.status().is_success() {
            return Err(SyncError::HttpStatus(response.status()));
        }
        log::info!("Authentication successful");
        Ok(true)
    }

    /// Whether a token is currently cached
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }
}
