//! Repository traits and implementations.

pub mod app;
pub mod artifact;
pub mod build;
pub mod deployment;
pub mod logs;
pub mod route;

pub use app::{AppRepo, PgAppRepo};
pub use artifact::{ArtifactRepo, PgArtifactRepo};
pub use build::{BuildRepo, PgBuildRepo};
pub use deployment::{DeploymentRepo, PgDeploymentRepo};
pub use logs::{LogRepo, PgLogRepo};
pub use route::{PgRouteRepo, RouteRepo};
