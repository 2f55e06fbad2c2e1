//! Resource identifiers.
//!
//! Every entity gets its own newtype so a build id can never be handed to
//! something expecting a deployment id. All of them wrap a UUIDv7, which keeps
//! ids time-ordered and sortable.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
        )]
        #[serde(transparent)]
        #[display("{_0}")]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new time-ordered id.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

define_id!(
    /// Identifier of an app (the tenant-owned unit that gets built and deployed).
    AppId
);
define_id!(
    /// Identifier of a single build attempt.
    BuildId
);
define_id!(
    /// Identifier of a stored, content-addressed artifact.
    ArtifactId
);
define_id!(
    /// Identifier of an SPA or API deployment.
    DeploymentId
);
define_id!(RouteId);
