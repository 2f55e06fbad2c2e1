//! Build environment variables.
//!
//! App variables carry a target (`build`, `runtime` or `all`). The build
//! worker only ever sees the build partition. Values may reference build
//! context with `${build.id}`, `${app.name}`, `${app.id}` or `${git.branch}`;
//! unknown references are left as written.

use launchpad_core::app::{EnvTarget, EnvVar};
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

/// App variables split by the phase they are exposed to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPartition {
    pub build: HashMap<String, String>,
    pub runtime: HashMap<String, String>,
}

/// Split `vars` into build and runtime sets.
///
/// `all` variables land in both. A variable targeted at one phase overrides
/// an `all` variable with the same key in that phase.
pub fn partition_env(vars: &[EnvVar]) -> EnvPartition {
    let mut partition = EnvPartition::default();

    for var in vars.iter().filter(|v| v.target == EnvTarget::All) {
        partition.build.insert(var.key.clone(), var.value.clone());
        partition.runtime.insert(var.key.clone(), var.value.clone());
    }
    for var in vars {
        match var.target {
            EnvTarget::Build => {
                partition.build.insert(var.key.clone(), var.value.clone());
            }
            EnvTarget::Runtime => {
                partition.runtime.insert(var.key.clone(), var.value.clone());
            }
            EnvTarget::All => {}
        }
    }

    partition
}

/// Values available for interpolation into build variables.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub build_id: String,
    pub app_id: String,
    pub app_name: String,
    pub branch: String,
}

impl BuildContext {
    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["build", "id"] => Some(self.build_id.clone()),
            ["app", "id"] => Some(self.app_id.clone()),
            ["app", "name"] => Some(self.app_name.clone()),
            ["git", "branch"] => Some(self.branch.clone()),
            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in a HashMap.
    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_by_target() {
        let vars = vec![
            EnvVar::new("NODE_ENV", "production", EnvTarget::All),
            EnvVar::new("NPM_TOKEN", "npm_abc", EnvTarget::Build),
            EnvVar::new("DATABASE_URL", "postgres://db", EnvTarget::Runtime),
        ];

        let partition = partition_env(&vars);
        assert_eq!(partition.build.len(), 2);
        assert_eq!(partition.build["NPM_TOKEN"], "npm_abc");
        assert!(!partition.build.contains_key("DATABASE_URL"));
        assert_eq!(partition.runtime.len(), 2);
        assert!(!partition.runtime.contains_key("NPM_TOKEN"));
    }

    #[test]
    fn test_targeted_var_overrides_all() {
        let vars = vec![
            EnvVar::new("API_URL", "https://build.example.com", EnvTarget::Build),
            EnvVar::new("API_URL", "https://example.com", EnvTarget::All),
        ];

        let partition = partition_env(&vars);
        assert_eq!(partition.build["API_URL"], "https://build.example.com");
        assert_eq!(partition.runtime["API_URL"], "https://example.com");
    }

    #[test]
    fn test_interpolation() {
        let ctx = BuildContext {
            build_id: "b-1".to_string(),
            app_id: "a-1".to_string(),
            app_name: "storefront".to_string(),
            branch: "main".to_string(),
        };

        assert_eq!(
            ctx.interpolate("${app.name}@${git.branch} (${build.id})"),
            "storefront@main (b-1)"
        );
        assert_eq!(ctx.interpolate("${secrets.KEY}"), "${secrets.KEY}");
        assert_eq!(ctx.interpolate("no vars"), "no vars");
    }
}
