//! Session and authentication management.
//!
//! This module provides:
//! - `CredentialStore`: persistence for the access token, refresh token and
//!   cached user profile (memory, JSON file, or OS keychain)
//! - `TokenVerifier` / `TokenRefresher`: the two calls to the authorization
//!   server
//! - `SessionCoordinator`: verify, refresh at most once, verify again
//! - `AuthorizedGateway`: bearer-authenticated requests with a single
//!   refresh-and-retry on 401
//! - `SessionManager`: wires all of the above around one store

pub mod coordinator;
pub mod credentials;
pub mod gateway;
pub mod manager;
pub mod refresher;
pub mod session;
pub mod verifier;

pub use coordinator::SessionCoordinator;
pub use credentials::{CredentialStore, FileCredentialStore, KeyringCredentialStore, MemoryCredentialStore};
pub use gateway::AuthorizedGateway;
pub use manager::{ProfileUpdated, SessionError, SessionManager};
pub use refresher::{RefreshFailure, RefreshOutcome, TokenRefresher};
pub use session::{Session, SessionPatch, UserProfile};
pub use verifier::{InvalidReason, TokenVerifier, Verification};
