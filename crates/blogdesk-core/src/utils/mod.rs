//! Small async helpers shared across the auth components.

pub mod cancel;

pub use cancel::run_cancellable;
