//! Routes and route snapshots.
//!
//! A route pairs a [`RouteMatch`] with a [`RouteTarget`]. API deployments
//! capture the enabled route set as a [`RouteSnapshot`] at publish time; the
//! snapshot is a copy and never observes later edits to the live routes.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{AppId, RouteId};

/// How a request path is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum RouteMatch {
    Prefix(String),
    Exact(String),
    Regex(String),
}

impl RouteMatch {
    /// Whether `path` is matched. An invalid regex matches nothing.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RouteMatch::Exact(exact) => path == exact,
            RouteMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
            RouteMatch::Regex(pattern) => Regex::new(pattern)
                .map(|re| re.is_match(path))
                .unwrap_or(false),
        }
    }

    /// Ordering key among matches of equal priority: exact beats prefix,
    /// longer prefixes beat shorter ones, regexes come last.
    fn specificity(&self) -> (u8, usize) {
        match self {
            RouteMatch::Exact(exact) => (2, exact.len()),
            RouteMatch::Prefix(prefix) => (1, prefix.len()),
            RouteMatch::Regex(_) => (0, 0),
        }
    }
}

/// Where a matched request goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouteTarget {
    /// Forward to an API upstream.
    Api { upstream: String },
    /// Serve the active SPA deployment (index fallback).
    Spa,
    /// Serve one file from the active SPA deployment.
    Static { path: String },
    /// Redirect the client.
    Redirect { location: String, status: u16 },
}

/// A configured route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub app_id: AppId,
    #[serde(rename = "match")]
    pub matcher: RouteMatch,
    pub target: RouteTarget,
    /// Higher priority wins when several routes match.
    pub priority: i32,
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Route {
    pub fn new(app_id: AppId, matcher: RouteMatch, target: RouteTarget) -> Self {
        Self {
            id: RouteId::new(),
            app_id,
            matcher,
            target,
            priority: 0,
            enabled: true,
            updated_at: Utc::now(),
        }
    }
}

/// Pick the route serving `path`.
///
/// Disabled routes are skipped. Among matches, the highest priority wins,
/// then the most specific matcher, then the earliest route in the slice.
pub fn resolve<'a>(routes: &'a [Route], path: &str) -> Option<&'a Route> {
    routes
        .iter()
        .enumerate()
        .filter(|(_, route)| route.enabled && route.matcher.matches(path))
        .max_by(|(ia, a), (ib, b)| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.matcher.specificity().cmp(&b.matcher.specificity()))
                .then_with(|| ib.cmp(ia))
        })
        .map(|(_, route)| route)
}

/// Immutable copy of an app's enabled routes, taken at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSnapshot {
    routes: Vec<Route>,
    pub taken_at: DateTime<Utc>,
}

impl RouteSnapshot {
    /// Copy the enabled routes out of `live`.
    pub fn capture(live: &[Route]) -> Self {
        Self {
            routes: live.iter().filter(|r| r.enabled).cloned().collect(),
            taken_at: Utc::now(),
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Number of routes serving a single static file.
    pub fn static_route_count(&self) -> usize {
        self.routes
            .iter()
            .filter(|r| matches!(r.target, RouteTarget::Static { .. }))
            .count()
    }

    pub fn resolve(&self, path: &str) -> Option<&Route> {
        resolve(&self.routes, path)
    }
}
