//! Composition root for the session components.
//!
//! `SessionManager` owns the store, the HTTP client, the shared refresher and
//! the cancellation token, and wires the verifier, coordinator and gateway on
//! top of them. Front-ends hold one of these for the life of the process.

use std::sync::Arc;

use anyhow::Result;
use reqwest::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::client::UPDATE_PROFILE_PATH;
use crate::api::{ApiError, AuthClient, RegisterRequest};
use crate::config::Config;
use crate::forms::{self, FormError, ProfileForm};
use crate::utils::run_cancellable;

use super::coordinator::SessionCoordinator;
use super::credentials::CredentialStore;
use super::gateway::AuthorizedGateway;
use super::refresher::TokenRefresher;
use super::session::{Session, SessionPatch, UserProfile};
use super::verifier::{TokenVerifier, Verification};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Form(#[from] FormError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session expired - please log in again")]
    SessionExpired,
}

impl SessionError {
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Api(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

/// Result of a successful profile update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileUpdated {
    pub message: String,
    pub user: Option<UserProfile>,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileUpdateResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    user: Option<UserProfile>,
    #[serde(default)]
    access_token: Option<String>,
}

pub struct SessionManager {
    api: AuthClient,
    store: Arc<dyn CredentialStore>,
    coordinator: SessionCoordinator,
    gateway: AuthorizedGateway,
    cancel: CancellationToken,
}

impl SessionManager {
    pub fn new(api: AuthClient, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_cancellation(api, store, CancellationToken::new())
    }

    pub fn with_cancellation(api: AuthClient, store: Arc<dyn CredentialStore>, cancel: CancellationToken) -> Self {
        let refresher = Arc::new(TokenRefresher::new(api.clone(), Arc::clone(&store), cancel.clone()));
        let verifier = TokenVerifier::new(api.clone(), Arc::clone(&store), cancel.clone());
        let coordinator = SessionCoordinator::new(verifier, Arc::clone(&refresher), Arc::clone(&store));
        let gateway = AuthorizedGateway::new(api.clone(), Arc::clone(&store), refresher, cancel.clone());
        Self {
            api,
            store,
            coordinator,
            gateway,
            cancel,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let api = AuthClient::from_config(config)?;
        let store = config.credential_store()?;
        debug!(base_url = config.base_url(), backend = ?config.credential_backend, "Session manager ready");
        Ok(Self::new(api, store))
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn gateway(&self) -> &AuthorizedGateway {
        &self.gateway
    }

    /// Token that aborts every in-flight auth call when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.load().user
    }

    pub fn has_credentials(&self) -> bool {
        self.store.load().access_token.is_some()
    }

    /// Log in and replace whatever session was stored before.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session, SessionError> {
        forms::validate_login(username, password)?;
        let username = username.trim();

        let resp = run_cancellable(&self.cancel, self.api.login(username, password))
            .await
            .ok_or(ApiError::Cancelled)??;

        self.store.replace(Session {
            access_token: Some(resp.access_token),
            refresh_token: resp.refresh_token,
            user: resp.user,
        });
        info!(username, "Logged in");
        Ok(self.store.load())
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Value, SessionError> {
        forms::validate_registration(username, email, password, confirm_password)?;
        let request = RegisterRequest {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let body = run_cancellable(&self.cancel, self.api.register(&request))
            .await
            .ok_or(ApiError::Cancelled)??;
        info!(username = %request.username, "Registered");
        Ok(body)
    }

    pub async fn register_and_login(
        &self,
        username: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Session, SessionError> {
        self.register(username, email, password, confirm_password).await?;
        self.login(username, password).await
    }

    pub fn logout(&self) {
        self.store.clear();
        info!("Logged out");
    }

    /// See [`SessionCoordinator::ensure_valid_session`].
    pub async fn ensure_valid_session(&self) -> Verification {
        self.coordinator.ensure_valid_session().await
    }

    /// See [`AuthorizedGateway::authorized_fetch`].
    pub async fn authorized_fetch(&self, request: Request) -> Result<Response, ApiError> {
        self.gateway.authorized_fetch(request).await
    }

    /// Send a profile update. A terminal 401 clears the session.
    pub async fn update_profile(&self, form: ProfileForm) -> Result<ProfileUpdated, SessionError> {
        let update = form.into_update()?;
        if !self.has_credentials() {
            return Err(SessionError::SessionExpired);
        }

        let builder = self.gateway.request(Method::PATCH, UPDATE_PROFILE_PATH).json(&update);
        let response = self.gateway.send(builder).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            self.store.clear();
            return Err(SessionError::SessionExpired);
        }
        let response = AuthClient::check_response(response).await?;

        let text = response.text().await.map_err(ApiError::from)?;
        let body: ProfileUpdateResponse = if text.trim().is_empty() {
            ProfileUpdateResponse::default()
        } else {
            serde_json::from_str(&text)
                .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse profile response: {}", e)))?
        };

        self.store.save(SessionPatch {
            access_token: body.access_token,
            refresh_token: None,
            user: body.user.clone(),
        });
        info!("Profile updated");

        Ok(ProfileUpdated {
            message: body.message.unwrap_or_else(|| "Updated successfully".to_string()),
            user: body.user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credentials::MemoryCredentialStore;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn manager(server: &MockServer, session: Session) -> SessionManager {
        let api = AuthClient::new(&server.uri(), Duration::from_secs(5)).expect("client");
        SessionManager::new(api, Arc::new(MemoryCredentialStore::with_session(session)))
    }

    fn logged_in(access: &str) -> Session {
        Session {
            access_token: Some(access.to_string()),
            refresh_token: Some("r1".to_string()),
            user: Some(UserProfile::new("alice")),
        }
    }

    #[tokio::test]
    async fn test_login_replaces_previous_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "user": {"username": "bob"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let session = m.login(" bob ", "pw").await.expect("login");
        assert_eq!(session.access_token.as_deref(), Some("a2"));
        // no refresh token in the response, so alice's must not linger
        assert_eq!(session.refresh_token, None);
        assert_eq!(m.current_user().map(|u| u.username), Some("bob".to_string()));
    }

    /// Memory store that records which mutating calls it receives.
    #[derive(Default)]
    struct RecordingStore {
        inner: MemoryCredentialStore,
        writes: std::sync::Mutex<Vec<&'static str>>,
    }

    impl RecordingStore {
        fn record(&self, op: &'static str) {
            self.writes.lock().expect("writes lock").push(op);
        }
    }

    impl CredentialStore for RecordingStore {
        fn load(&self) -> Session {
            self.inner.load()
        }

        fn save(&self, patch: SessionPatch) {
            self.record("save");
            self.inner.save(patch);
        }

        fn replace(&self, session: Session) {
            self.record("replace");
            self.inner.replace(session);
        }

        fn clear(&self) {
            self.record("clear");
            self.inner.clear();
        }
    }

    #[tokio::test]
    async fn test_login_swaps_session_in_one_write() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a2",
                "refresh_token": "r2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(RecordingStore {
            inner: MemoryCredentialStore::with_session(logged_in("a1")),
            ..Default::default()
        });
        let api = AuthClient::new(&server.uri(), Duration::from_secs(5)).expect("client");
        let m = SessionManager::new(api, Arc::clone(&store) as Arc<dyn CredentialStore>);

        m.login("bob", "pw").await.expect("login");
        assert_eq!(*store.writes.lock().expect("writes lock"), vec!["replace"]);
        assert_eq!(store.load().refresh_token.as_deref(), Some("r2"));
    }

    #[tokio::test]
    async fn test_login_validation_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let m = manager(&server, Session::default());
        let err = m.login("", "pw").await.expect_err("blank username");
        assert!(matches!(err, SessionError::Form(FormError::UsernameRequired)));
    }

    #[tokio::test]
    async fn test_failed_login_keeps_existing_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Invalid credentials"})))
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let err = m.login("alice", "wrong").await.expect_err("bad password");
        assert_eq!(err.user_message(), "Invalid credentials");
        assert_eq!(m.store().load().access_token.as_deref(), Some("a1"));
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"username": "carol"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "a1",
                "refresh_token": "r1",
                "user": {"username": "carol", "email": "carol@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let m = manager(&server, Session::default());
        let session = m
            .register_and_login("carol", "carol@example.com", "secret1", "secret1")
            .await
            .expect("register and login");
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
        assert!(m.has_credentials());
    }

    #[tokio::test]
    async fn test_register_surfaces_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/register"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({"detail": "Username already registered"})))
            .mount(&server)
            .await;

        let m = manager(&server, Session::default());
        let err = m
            .register("carol", "carol@example.com", "secret1", "secret1")
            .await
            .expect_err("duplicate");
        assert_eq!(err.user_message(), "Username already registered");
    }

    #[tokio::test]
    async fn test_ensure_valid_session_scenario() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/verify-token"))
            .and(header("authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .and(body_json(serde_json::json!({"refresh_token": "r1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "new"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/verify-token"))
            .and(header("authorization", "Bearer new"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "valid",
                "user": {"username": "alice"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let m = manager(
            &server,
            Session {
                access_token: Some("expired".into()),
                refresh_token: Some("r1".into()),
                user: None,
            },
        );
        let result = m.ensure_valid_session().await;
        assert_eq!(
            result,
            Verification::Valid {
                user: Some(UserProfile::new("alice")),
                remaining_seconds: None,
            }
        );
        let session = m.store().load();
        assert_eq!(session.access_token.as_deref(), Some("new"));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_update_profile_stores_returned_user() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/auth/update_me"))
            .and(header("authorization", "Bearer a1"))
            .and(body_json(serde_json::json!({"email": "new@example.com"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": "Profile updated",
                "user": {"username": "alice", "email": "new@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let updated = m
            .update_profile(ProfileForm {
                email: "new@example.com".into(),
                ..Default::default()
            })
            .await
            .expect("update");
        assert_eq!(updated.message, "Profile updated");

        let session = m.store().load();
        assert_eq!(session.user.and_then(|u| u.email).as_deref(), Some("new@example.com"));
        assert_eq!(session.access_token.as_deref(), Some("a1"));
        assert_eq!(session.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_update_profile_accepts_new_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/auth/update_me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user": {"username": "alice2"},
                "access_token": "a2"
            })))
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let updated = m
            .update_profile(ProfileForm {
                username: "alice2".into(),
                ..Default::default()
            })
            .await
            .expect("update");
        assert_eq!(updated.message, "Updated successfully");
        assert_eq!(m.store().load().access_token.as_deref(), Some("a2"));
    }

    #[tokio::test]
    async fn test_update_profile_terminal_unauthorized_clears_session() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/auth/update_me"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"access_token": "a2"})))
            .expect(1)
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let err = m
            .update_profile(ProfileForm {
                username: "x".into(),
                ..Default::default()
            })
            .await
            .expect_err("expired");
        assert!(matches!(err, SessionError::SessionExpired));
        assert!(m.store().load().is_empty());
    }

    #[tokio::test]
    async fn test_update_profile_error_detail() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/auth/update_me"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({"detail": "Current password is incorrect"})))
            .mount(&server)
            .await;

        let m = manager(&server, logged_in("a1"));
        let err = m
            .update_profile(ProfileForm {
                current_password: "bad".into(),
                new_password: "newpass".into(),
                confirm_new_password: "newpass".into(),
                ..Default::default()
            })
            .await
            .expect_err("wrong password");
        assert_eq!(err.user_message(), "Current password is incorrect");
        assert!(m.has_credentials());
    }

    #[tokio::test]
    async fn test_update_profile_without_session() {
        let server = MockServer::start().await;
        let m = manager(&server, Session::default());
        let err = m
            .update_profile(ProfileForm {
                username: "x".into(),
                ..Default::default()
            })
            .await
            .expect_err("not logged in");
        assert!(matches!(err, SessionError::SessionExpired));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_login() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let m = manager(&server, Session::default());
        m.shutdown();
        let err = m.login("alice", "pw").await.expect_err("cancelled");
        assert!(matches!(err, SessionError::Api(ApiError::Cancelled)));
    }

    #[test]
    fn test_logout_clears_everything() {
        let api = AuthClient::new("http://localhost:1", Duration::from_secs(1)).expect("client");
        let m = SessionManager::new(api, Arc::new(MemoryCredentialStore::with_session(logged_in("a1"))));
        m.logout();
        m.logout();
        assert!(m.store().load().is_empty());
        assert_eq!(m.current_user(), None);
    }
}
