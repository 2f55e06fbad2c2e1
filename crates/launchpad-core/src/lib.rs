//! Core domain types and traits for the Launchpad build and deployment pipeline.
//!
//! This crate contains:
//! - Resource identifiers and the shared error type
//! - Apps, build jobs and the worker queue contract
//! - Artifacts and the blob storage abstraction
//! - SPA/API deployments, route snapshots and the extraction contract
//! - Status events and build log entries

pub mod app;
pub mod artifact;
pub mod build;
pub mod deployment;
pub mod error;
pub mod id;
pub mod logs;
pub mod queue;
pub mod route;
pub mod source;
pub mod status;

pub use error::{Error, Result};
pub use id::{AppId, ArtifactId, BuildId, DeploymentId, RouteId};
