//! Axum REST facade for taskwire.
//!
//! Wires the `taskwire-core` lifecycle engine and the `taskwire-broker`
//! Redis broker behind the HTTP surface spec.md §6 describes. The binary
//! entry point (`main.rs`) only handles config/startup; everything
//! request-shaped lives here so it can be exercised with
//! `tower::ServiceExt::oneshot` in integration tests without binding a port.

pub mod error;
pub mod routes;
pub mod state;
pub mod validation;
pub mod wire;

pub use routes::router;
pub use state::AppState;
