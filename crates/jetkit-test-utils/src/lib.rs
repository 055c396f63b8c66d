#![deny(unsafe_code)]

//! Shared test utilities for the jetkit workspace.
//!
//! Provides config builders, a recording log forwarder, a throwaway bridge
//! working directory, and tracing helpers so that individual crate tests
//! stay concise and consistent.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! jetkit-test-utils = { workspace = true }
//! ```
//!
//! Only integration tests (`tests/`) should use it from `jetkit-core`: unit
//! tests inside the crate see their own copy of the core types.

pub mod bridge;
pub mod config;
pub mod forward;
pub mod tracing_setup;
