use std::sync::Arc;

use tracing::debug;

use super::credentials::CredentialStore;
use super::refresher::{RefreshOutcome, TokenRefresher};
use super::verifier::{InvalidReason, TokenVerifier, Verification};

/// Answers "is the session usable right now", refreshing at most once.
///
/// Each call makes at most two verify requests and one refresh request.
/// An invalid result is final: the caller must send the user back to login
/// rather than calling again.
pub struct SessionCoordinator {
    verifier: TokenVerifier,
    refresher: Arc<TokenRefresher>,
    store: Arc<dyn CredentialStore>,
}

impl SessionCoordinator {
    pub fn new(verifier: TokenVerifier, refresher: Arc<TokenRefresher>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            verifier,
            refresher,
            store,
        }
    }

    pub async fn ensure_valid_session(&self) -> Verification {
        let observed = self.store.load().access_token;
        let first = self.verifier.verify_token(observed.as_deref()).await;
        if first.is_valid() {
            return first;
        }
        if first == Verification::Invalid(InvalidReason::Cancelled) {
            return first;
        }

        debug!(reason = ?first, "Session not valid, attempting refresh");
        match self.refresher.refresh_superseding(observed.as_deref()).await {
            RefreshOutcome::Refreshed { .. } => self.verifier.verify().await,
            RefreshOutcome::Failed(failure) => {
                debug!(?failure, "Refresh failed, session unusable");
                Verification::Invalid(InvalidReason::RefreshFailed)
            }
        }
    }
}
