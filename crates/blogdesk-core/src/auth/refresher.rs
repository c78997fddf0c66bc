use std::sync::Arc;

use reqwest::StatusCode;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthClient, RefreshResponse};
use crate::utils::run_cancellable;

use super::credentials::CredentialStore;
use super::session::SessionPatch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    /// No refresh token stored; nothing was sent.
    NoRefreshToken,
    /// Server refused the refresh token. The session has been cleared.
    Rejected { status: StatusCode, detail: String },
    /// No response from the server. The session is left as it was.
    NetworkFailure,
    /// 2xx without a usable `access_token`.
    InvalidResponse,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed { access_token: String },
    Failed(RefreshFailure),
}

impl RefreshOutcome {
    pub fn access_token(&self) -> Option<&str> {
        match self {
            RefreshOutcome::Refreshed { access_token } => Some(access_token),
            RefreshOutcome::Failed(_) => None,
        }
    }
}

/// Exchanges the stored refresh token for a new access token.
///
/// One refresh runs at a time. A caller that queued behind another refresh
/// gets the token that refresh produced instead of spending the refresh
/// token a second time.
pub struct TokenRefresher {
    api: AuthClient,
    store: Arc<dyn CredentialStore>,
    cancel: CancellationToken,
    in_flight: Mutex<()>,
}

impl TokenRefresher {
    pub fn new(api: AuthClient, store: Arc<dyn CredentialStore>, cancel: CancellationToken) -> Self {
        Self {
            api,
            store,
            cancel,
            in_flight: Mutex::new(()),
        }
    }

    /// Refresh the access token currently in the store.
    pub async fn refresh(&self) -> RefreshOutcome {
        let observed = self.store.load().access_token;
        self.refresh_superseding(observed.as_deref()).await
    }

    /// Refresh because `stale` was found unusable.
    ///
    /// If the store already holds a different access token by the time the
    /// guard is acquired, that token is returned without a network call.
    pub async fn refresh_superseding(&self, stale: Option<&str>) -> RefreshOutcome {
        let Some(_guard) = run_cancellable(&self.cancel, self.in_flight.lock()).await else {
            return RefreshOutcome::Failed(RefreshFailure::Cancelled);
        };

        let session = self.store.load();
        if let Some(current) = session.access_token.as_deref() {
            if Some(current) != stale {
                debug!("Access token already replaced by a concurrent refresh");
                return RefreshOutcome::Refreshed {
                    access_token: current.to_string(),
                };
            }
        }

        let Some(refresh_token) = session.refresh_token else {
            debug!("No refresh token stored, skipping refresh");
            return RefreshOutcome::Failed(RefreshFailure::NoRefreshToken);
        };

        let result = match run_cancellable(&self.cancel, self.api.refresh(&refresh_token)).await {
            Some(result) => result,
            None => return RefreshOutcome::Failed(RefreshFailure::Cancelled),
        };

        match result {
            Ok(RefreshResponse {
                access_token: Some(access_token),
            }) => {
                self.store.save(SessionPatch::access_token(access_token.clone()));
                info!("Access token refreshed");
                RefreshOutcome::Refreshed { access_token }
            }
            Ok(_) => {
                warn!("Refresh response did not contain an access token");
                RefreshOutcome::Failed(RefreshFailure::InvalidResponse)
            }
            Err(ApiError::Network(e)) => {
                warn!(error = %e, "Refresh request failed, keeping session");
                RefreshOutcome::Failed(RefreshFailure::NetworkFailure)
            }
            Err(ApiError::InvalidResponse(msg)) => {
                warn!(%msg, "Refresh response unreadable, keeping session");
                RefreshOutcome::Failed(RefreshFailure::InvalidResponse)
            }
            Err(e) => {
                self.store.clear();
                warn!(error = %e, "Refresh rejected, session cleared");
                RefreshOutcome::Failed(RefreshFailure::Rejected {
                    status: e.status().unwrap_or(StatusCode::UNAUTHORIZED),
                    detail: e.user_message(),
                })
            }
        }
    }
}
