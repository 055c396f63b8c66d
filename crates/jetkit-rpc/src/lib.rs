#![deny(unsafe_code)]

//! Router API side of jetkit.
//!
//! The wire protocol is not implemented here. Requests are plain serde
//! structs handed to a [`RouterApi`]; [`DryRunRouter`] is the implementation
//! shipped with the CLI and prints every request as JSON.

/// Session parameters: password and TLS material.
pub mod credentials;
/// Login, initialize and request sequencing with per-call timeouts.
pub mod client;
/// Operational CLI command requests.
pub mod op;
/// The router API seam and the dry-run implementation.
pub mod router;
/// BGP static route add and remove requests.
pub mod routes;

pub use client::RouterClient;
pub use credentials::{Password, Session, TlsMaterial};
pub use op::{OpCommandRequest, OutputFormat};
pub use router::{DryRunRouter, RouterApi};
pub use routes::{RouteVerb, build_add_request, build_remove_request};

/// Errors talking to the router.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("login failed: {0}")]
    Login(String),

    #[error("BGP route service initialization failed: {0}")]
    Initialize(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("credentials: {0}")]
    Credentials(String),
}
