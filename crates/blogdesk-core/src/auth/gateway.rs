use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{ApiError, AuthClient};
use crate::utils::run_cancellable;

use super::credentials::CredentialStore;
use super::refresher::{RefreshOutcome, TokenRefresher};

/// Sends requests with the stored bearer token, retrying once after a
/// refresh when the server answers 401.
///
/// Per call: at most two sends of the request and one refresh. Only 401 is
/// special; every other status is handed back untouched.
pub struct AuthorizedGateway {
    api: AuthClient,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<TokenRefresher>,
    cancel: CancellationToken,
}

impl AuthorizedGateway {
    pub fn new(
        api: AuthClient,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<TokenRefresher>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            store,
            refresher,
            cancel,
        }
    }

    /// Start a request against the API base URL.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.api.http().request(method, self.api.url(path))
    }

    /// Build `builder` and send it through `authorized_fetch`.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        self.authorized_fetch(builder.build()?).await
    }

    pub async fn authorized_fetch(&self, request: Request) -> Result<Response, ApiError> {
        let token = self.store.load().access_token;
        let replay = request.try_clone();

        let first = self.execute(with_bearer(request, token.as_deref())?).await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        let Some(replay) = replay else {
            warn!(url = %first.url(), "Got 401 but request body cannot be replayed");
            return Ok(first);
        };

        match self.refresher.refresh_superseding(token.as_deref()).await {
            RefreshOutcome::Refreshed { access_token } => {
                debug!(url = %replay.url(), "Retrying request with refreshed token");
                self.execute(with_bearer(replay, Some(&access_token))?).await
            }
            RefreshOutcome::Failed(failure) => {
                debug!(?failure, "Refresh failed, returning original 401");
                Ok(first)
            }
        }
    }

    async fn execute(&self, request: Request) -> Result<Response, ApiError> {
        run_cancellable(&self.cancel, self.api.http().execute(request))
            .await
            .ok_or(ApiError::Cancelled)?
            .map_err(ApiError::from)
    }
}

fn with_bearer(mut request: Request, token: Option<&str>) -> Result<Request, ApiError> {
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
        value.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}
