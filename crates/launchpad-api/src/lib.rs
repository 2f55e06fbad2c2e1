//! HTTP API server for Launchpad.
//!
//! Provides the REST endpoints for builds and deployments, the worker-facing
//! internal endpoints, and server-sent event streams for status and logs.

pub mod auth;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::{AppState, Backends};
