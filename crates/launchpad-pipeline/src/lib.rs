//! The Launchpad build and deployment pipeline.
//!
//! - [`BuildDispatcher`] turns build requests into queued worker messages
//!   and applies the worker's status callbacks
//! - [`ArtifactService`] ingests uploaded bundles as content-addressed
//!   artifacts
//! - [`DeploymentManager`] creates SPA and API deployments and owns the
//!   active-deployment pointers
//! - [`StatusPublisher`] fans status events out to live subscribers
//! - [`LogStreamRelay`] merges stored and live build logs for streaming

pub mod artifacts;
pub mod deployments;
pub mod dispatcher;
pub mod logs;
pub mod status;
pub mod upload;

pub use artifacts::ArtifactService;
pub use deployments::{DeploymentManager, SpaSource};
pub use dispatcher::BuildDispatcher;
pub use logs::{LogBroker, LogFrame, LogStreamRelay, LogView};
pub use status::{RoutingCacheRefresher, StatusPublisher};
pub use upload::UploadSigner;
