//! System configuration parsing.
//!
//! ```kdl
//! server {
//!     listen "0.0.0.0:8080"
//! }
//! database {
//!     url "postgres://launchpad@localhost/launchpad"
//!     max-connections 10
//! }
//! storage {
//!     root "/var/lib/launchpad/blobs"
//!     served-root "/var/lib/launchpad/served"
//! }
//! worker {
//!     upload-base-url "https://launchpad.example.com"
//!     upload-secret "..."
//!     token "..."
//! }
//! queue {
//!     builds-topic "builds"
//!     routing-topic "routing-cache"
//! }
//! github {
//!     api-base "https://api.github.com"
//!     app-token "..."
//! }
//! plan "pro" {
//!     cpu 4000
//!     memory-mb 8192
//!     timeout-secs 3600
//! }
//! ```

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use launchpad_core::build::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Plan used when an app's plan has no entry of its own.
pub const DEFAULT_PLAN: &str = "free";

/// System-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub github: GithubConfig,
    /// Resource limits keyed by plan name.
    pub plans: HashMap<String, ResourceLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding artifact blobs.
    pub root: PathBuf,
    /// Directory SPA deployments are unpacked under.
    pub served_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Public base URL the worker uploads artifacts to.
    pub upload_base_url: String,
    /// Key signing per-build upload URLs.
    pub upload_secret: String,
    /// Bearer token the worker presents on internal callbacks.
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub builds_topic: String,
    pub routing_topic: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub api_base: String,
    /// Token authenticating as the GitHub App when minting installation tokens.
    pub app_token: Option<String>,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen: "0.0.0.0:8080".to_string(),
            },
            database: DatabaseConfig {
                url: "postgres://localhost/launchpad".to_string(),
                max_connections: 10,
            },
            storage: StorageConfig {
                root: PathBuf::from("data/blobs"),
                served_root: PathBuf::from("data/served"),
            },
            worker: WorkerConfig {
                upload_base_url: "http://localhost:8080".to_string(),
                upload_secret: String::new(),
                token: String::new(),
            },
            queue: QueueConfig {
                builds_topic: "builds".to_string(),
                routing_topic: "routing-cache".to_string(),
            },
            github: GithubConfig {
                api_base: "https://api.github.com".to_string(),
                app_token: None,
            },
            plans: HashMap::new(),
        }
    }
}

impl SystemConfig {
    /// Load configuration the way the server does at startup.
    ///
    /// Reads the file named by `LAUNCHPAD_CONFIG` (or `launchpad.kdl`), falls
    /// back to defaults when it does not exist, then applies environment
    /// overrides and validates the result.
    pub fn from_env_or_file(explicit: Option<&Path>) -> ConfigResult<Self> {
        let path = explicit.map(Path::to_path_buf).unwrap_or_else(|| {
            std::env::var("LAUNCHPAD_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("launchpad.kdl"))
        });

        let mut config = if path.exists() {
            tracing::info!(path = %path.display(), "Loading system configuration");
            let text = std::fs::read_to_string(&path)?;
            parse_system_config(&text)?
        } else if explicit.is_some() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file {} not found", path.display()),
            )));
        } else {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            SystemConfig::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(listen) = lookup("LAUNCHPAD_LISTEN") {
            self.server.listen = listen;
        }
        if let Some(secret) = lookup("LAUNCHPAD_UPLOAD_SECRET") {
            self.worker.upload_secret = secret;
        }
        if let Some(token) = lookup("LAUNCHPAD_WORKER_TOKEN") {
            self.worker.token = token;
        }
        if let Some(token) = lookup("GITHUB_APP_TOKEN") {
            self.github.app_token = Some(token);
        }
    }

    /// Check that everything the server cannot run without is present.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker.upload_secret.is_empty() {
            return Err(ConfigError::MissingField("worker.upload-secret".to_string()));
        }
        if self.worker.token.is_empty() {
            return Err(ConfigError::MissingField("worker.token".to_string()));
        }
        if self.queue.builds_topic == self.queue.routing_topic {
            return Err(ConfigError::InvalidValue {
                field: "queue.routing-topic".to_string(),
                message: "must differ from builds-topic".to_string(),
            });
        }
        Ok(())
    }

    /// Resource limits for a plan, falling back to the default plan and then
    /// to built-in limits.
    pub fn limits_for(&self, plan: &str) -> ResourceLimits {
        self.plans
            .get(plan)
            .or_else(|| self.plans.get(DEFAULT_PLAN))
            .cloned()
            .unwrap_or_default()
    }
}

/// Parse system configuration from KDL text.
///
/// Sections that are absent keep their defaults; unknown nodes are ignored.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => {
                if let Some(listen) = child_string(node, "listen") {
                    config.server.listen = listen;
                }
            }
            "database" => {
                if let Some(url) = child_string(node, "url") {
                    config.database.url = url;
                }
                if let Some(max) = child_u32(node, "max-connections", "database")? {
                    config.database.max_connections = max;
                }
            }
            "storage" => {
                if let Some(root) = child_string(node, "root") {
                    config.storage.root = PathBuf::from(root);
                }
                if let Some(served) = child_string(node, "served-root") {
                    config.storage.served_root = PathBuf::from(served);
                }
            }
            "worker" => {
                if let Some(url) = child_string(node, "upload-base-url") {
                    config.worker.upload_base_url = url.trim_end_matches('/').to_string();
                }
                if let Some(secret) = child_string(node, "upload-secret") {
                    config.worker.upload_secret = secret;
                }
                if let Some(token) = child_string(node, "token") {
                    config.worker.token = token;
                }
            }
            "queue" => {
                if let Some(topic) = child_string(node, "builds-topic") {
                    config.queue.builds_topic = topic;
                }
                if let Some(topic) = child_string(node, "routing-topic") {
                    config.queue.routing_topic = topic;
                }
            }
            "github" => {
                if let Some(base) = child_string(node, "api-base") {
                    config.github.api_base = base.trim_end_matches('/').to_string();
                }
                config.github.app_token = child_string(node, "app-token");
            }
            "plan" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("plan name".to_string()))?;
                if config.plans.contains_key(&name) {
                    return Err(ConfigError::Duplicate(format!("plan '{}'", name)));
                }
                let limits = parse_plan(node, &name)?;
                config.plans.insert(name, limits);
            }
            _ => {}
        }
    }

    Ok(config)
}

fn parse_plan(node: &KdlNode, name: &str) -> ConfigResult<ResourceLimits> {
    let field = format!("plan '{}'", name);
    let defaults = ResourceLimits::default();
    Ok(ResourceLimits {
        cpu_millis: child_u32(node, "cpu", &field)?.unwrap_or(defaults.cpu_millis),
        memory_mb: child_u32(node, "memory-mb", &field)?.unwrap_or(defaults.memory_mb),
        timeout_secs: child_u32(node, "timeout-secs", &field)?
            .map(u64::from)
            .unwrap_or(defaults.timeout_secs),
    })
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn child<'a>(node: &'a KdlNode, name: &str) -> Option<&'a KdlNode> {
    node.children()?
        .nodes()
        .iter()
        .find(|c| c.name().value() == name)
}

fn child_string(node: &KdlNode, name: &str) -> Option<String> {
    child(node, name).and_then(get_first_string_arg)
}

fn child_u32(node: &KdlNode, name: &str, section: &str) -> ConfigResult<Option<u32>> {
    let Some(value) = child(node, name).and_then(|c| {
        c.entries()
            .iter()
            .find(|e| e.name().is_none())
            .map(|e| e.value().clone())
    }) else {
        return Ok(None);
    };

    let invalid = |message: String| ConfigError::InvalidValue {
        field: format!("{}.{}", section, name),
        message,
    };
    let raw = value
        .as_integer()
        .ok_or_else(|| invalid(format!("expected an integer, got {:?}", value)))?;
    u32::try_from(raw)
        .map(Some)
        .map_err(|_| invalid(format!("{} is out of range", raw)))
}
