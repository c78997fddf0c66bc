use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ApiError, AuthClient};
use crate::utils::run_cancellable;

use super::credentials::CredentialStore;
use super::session::UserProfile;

/// Why a session could not be confirmed usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// No access token stored; nothing was sent.
    NoCredential,
    /// Server answered the verify call with a non-success status.
    Unauthorized { status: StatusCode },
    /// Server answered 2xx but did not report the token as valid.
    NotValid,
    /// No response (connection error, timeout, unreadable body).
    NetworkFailure,
    /// The token was invalid and refreshing it failed.
    RefreshFailed,
    Cancelled,
}

/// Result of asking the server about the current access token.
#[derive(Debug, Clone, PartialEq)]
pub enum Verification {
    Valid {
        user: Option<UserProfile>,
        remaining_seconds: Option<i64>,
    },
    Invalid(InvalidReason),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid { .. })
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            Verification::Valid { user, .. } => user.as_ref(),
            Verification::Invalid(_) => None,
        }
    }

    /// Absolute expiry, if the server reported a remaining lifetime that fits
    /// in a timestamp.
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Verification::Valid {
                remaining_seconds: Some(secs),
                ..
            } => TimeDelta::try_seconds((*secs).max(0)).and_then(|left| now.checked_add_signed(left)),
            _ => None,
        }
    }

    /// Remaining lifetime formatted for display, e.g. `"14m 5s"`.
    pub fn remaining_display(&self) -> Option<String> {
        match self {
            Verification::Valid {
                remaining_seconds: Some(secs),
                ..
            } => {
                let secs = (*secs).max(0);
                Some(if secs >= 60 {
                    format!("{}m {}s", secs / 60, secs % 60)
                } else {
                    format!("{}s", secs)
                })
            }
            _ => None,
        }
    }
}

/// Checks the stored access token against the server. Never writes to the
/// store.
pub struct TokenVerifier {
    api: AuthClient,
    store: Arc<dyn CredentialStore>,
    cancel: CancellationToken,
}

impl TokenVerifier {
    pub fn new(api: AuthClient, store: Arc<dyn CredentialStore>, cancel: CancellationToken) -> Self {
        Self { api, store, cancel }
    }

    pub async fn verify(&self) -> Verification {
        let token = self.store.load().access_token;
        self.verify_token(token.as_deref()).await
    }

    pub(crate) async fn verify_token(&self, token: Option<&str>) -> Verification {
        let Some(token) = token else {
            debug!("No access token stored, skipping verify");
            return Verification::Invalid(InvalidReason::NoCredential);
        };

        let result = match run_cancellable(&self.cancel, self.api.verify_token(token)).await {
            Some(result) => result,
            None => return Verification::Invalid(InvalidReason::Cancelled),
        };

        match result {
            Ok(resp) if resp.is_valid() => {
                debug!(remaining = ?resp.time_left_seconds, "Access token valid");
                Verification::Valid {
                    user: resp.user,
                    remaining_seconds: resp.time_left_seconds,
                }
            }
            Ok(resp) => {
                debug!(status = %resp.status, "Verify returned non-valid status");
                Verification::Invalid(InvalidReason::NotValid)
            }
            Err(ApiError::Network(e)) => {
                debug!(error = %e, "Verify request failed");
                Verification::Invalid(InvalidReason::NetworkFailure)
            }
            Err(ApiError::InvalidResponse(msg)) => {
                debug!(%msg, "Verify response unreadable");
                Verification::Invalid(InvalidReason::NetworkFailure)
            }
            Err(e) => {
                debug!(error = %e, "Access token rejected");
                Verification::Invalid(InvalidReason::Unauthorized {
                    status: e.status().unwrap_or(StatusCode::UNAUTHORIZED),
                })
            }
        }
    }
}
