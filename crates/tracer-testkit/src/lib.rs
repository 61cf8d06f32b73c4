//! Tracer Testing Infrastructure
//!
//! Scripted effect handlers and fixtures shared by the workspace's tests.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! tracer-testkit = { path = "../tracer-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
