//! Build log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::BuildId;

/// Output stream a log line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

impl LogStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStream::Stdout => "stdout",
            LogStream::Stderr => "stderr",
            LogStream::System => "system",
        }
    }
}

impl std::str::FromStr for LogStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdout" => Ok(LogStream::Stdout),
            "stderr" => Ok(LogStream::Stderr),
            "system" => Ok(LogStream::System),
            _ => Err(format!("Unknown log stream: {}", s)),
        }
    }
}

/// Where an entry was observed.
///
/// `History` entries come from the settled log index and are authoritative;
/// `Live` entries come off the per-build topic and may arrive duplicated or
/// out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOrigin {
    History,
    Live,
}

/// A single build log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Worker-assigned id, unique within the build.
    pub id: String,
    pub build_id: BuildId,
    pub timestamp: Option<DateTime<Utc>>,
    pub stream: LogStream,
    pub content: String,
    pub origin: LogOrigin,
}
