//! Client for the authorization server.
//!
//! This module provides the `AuthClient` struct wrapping the login,
//! registration, token verification and token refresh endpoints.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::auth::UserProfile;
use crate::config::Config;

use super::ApiError;

// ============================================================================
// Endpoints
// ============================================================================

const LOGIN_PATH: &str = "/auth/token";
const REGISTER_PATH: &str = "/auth/register";
const VERIFY_PATH: &str = "/auth/verify-token";
const REFRESH_PATH: &str = "/auth/refresh";
pub(crate) const UPDATE_PROFILE_PATH: &str = "/auth/update_me";

/// Value of `status` in a verify response for a usable token
const STATUS_VALID: &str = "valid";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyResponse {
    pub status: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default, deserialize_with = "whole_seconds")]
    pub time_left_seconds: Option<i64>,
}

impl VerifyResponse {
    pub fn is_valid(&self) -> bool {
        self.status == STATUS_VALID
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Accept `time_left_seconds` as either an integer or a float.
fn whole_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let number: Option<serde_json::Number> = Option::deserialize(deserializer)?;
    Ok(number.and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64))))
}

/// Client for the authorization endpoints.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone, Debug)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, ApiError> {
        Self::new(config.base_url(), config.request_timeout())
    }

    /// Underlying HTTP client, shared with the request gateway.
    pub fn http(&self) -> &Client {
        &self.client
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Check if response is successful, returning an error with body if not.
    pub(crate) async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: serde::de::DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }

    /// Exchange username and password for tokens (form-encoded).
    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        debug!(username, "Sending login request");
        let response = self
            .client
            .post(self.url(LOGIN_PATH))
            .form(&[("username", username), ("password", password)])
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "login").await
    }

    /// Register a new account. The body is server-defined and returned as-is.
    pub async fn register(&self, request: &RegisterRequest) -> Result<Value, ApiError> {
        debug!(username = %request.username, "Sending registration request");
        let response = self
            .client
            .post(self.url(REGISTER_PATH))
            .json(request)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    pub async fn verify_token(&self, access_token: &str) -> Result<VerifyResponse, ApiError> {
        let response = self
            .client
            .get(self.url(VERIFY_PATH))
            .bearer_auth(access_token)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "verify").await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, "refresh").await
    }
}
