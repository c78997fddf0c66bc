//! HTTP client module for the blog authorization server.
//!
//! This module provides the `AuthClient` for the login, registration,
//! verify and refresh endpoints, and the `ApiError` type shared by every
//! network-facing component.

pub mod client;
pub mod error;

pub use client::{AuthClient, LoginResponse, RefreshResponse, RegisterRequest, VerifyResponse};
pub use error::ApiError;
