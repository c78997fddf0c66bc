//! Core library for blogdesk.
//!
//! Client-side session management for the blog API: credential storage,
//! token verification and refresh, and an authorized request gateway that
//! retries once after refreshing on 401.

pub mod api;
pub mod auth;
pub mod config;
pub mod forms;
pub mod utils;

pub use api::{ApiError, AuthClient};
pub use auth::{
    CredentialStore, InvalidReason, RefreshOutcome, Session, SessionError, SessionManager, UserProfile,
    Verification,
};
pub use config::Config;
