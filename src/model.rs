// Data models for tasks, sync outcomes and ledger rows

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A checklist item found in a structured note.
///
/// `local_id` is derived from position only: `bridge:note_path:line_no`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub local_id: String,
    pub bridge_name: String,
    pub vault_name: String,
    pub note_path: String,
    pub line_no: i64,
    pub title: String,
    pub completed: bool,
}

impl Task {
    pub fn local_id_for(bridge_name: &str, note_path: &str, line_no: i64) -> String {
        format!("{}:{}:{}", bridge_name, note_path, line_no)
    }
}

/// Outcome of pushing one task to an external provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Created,
    Updated,
    Skipped,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Created => "created",
            SyncStatus::Updated => "updated",
            SyncStatus::Skipped => "skipped",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" => Ok(SyncStatus::Created),
            "updated" => Ok(SyncStatus::Updated),
            "skipped" => Ok(SyncStatus::Skipped),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(eyre::eyre!("Unknown sync status: {}", other)),
        }
    }
}

/// One provider result per input task, matched back by `local_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub local_id: String,
    pub provider: String,
    pub external_id: Option<String>,
    pub status: SyncStatus,
    pub error: Option<String>,
}

impl SyncResult {
    pub fn failed(task: &Task, provider: &str, error: impl Into<String>) -> Self {
        Self {
            local_id: task.local_id.clone(),
            provider: provider.to_string(),
            external_id: None,
            status: SyncStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Ledger row. Timestamps are RFC 3339 UTC strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub local_id: String,
    pub bridge_name: String,
    pub vault_name: String,
    pub note_path: String,
    pub line_no: i64,
    pub title: String,
    pub provider: Option<String>,
    pub external_id: Option<String>,
    pub status: SyncStatus,
    pub completed: bool,
    pub created_at: String,
    pub last_synced_at: Option<String>,
    pub last_error: Option<String>,
}

/// One `runs` row: metrics for a single bridge pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub bridge_name: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub stats: RunStats,
}

/// Counters collected while processing one bridge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    pub notes_found: i64,
    pub converted: i64,
    pub skipped: i64,
    pub no_text: i64,
    pub tool_missing: i64,
    pub tool_failed: i64,
    pub ledger_errors: i64,
    pub todos_extracted: i64,
    pub todos_created: i64,
    pub todos_failed: i64,
}

impl RunStats {
    /// Structural problems that make a run count as failed.
    pub fn is_errorish(&self) -> bool {
        self.tool_missing > 0 || self.tool_failed > 0 || self.ledger_errors > 0
    }
}

/// Current UTC time as RFC 3339 with second precision.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_id_format() {
        assert_eq!(Task::local_id_for("work", "Inbox/Meeting.md", 17), "work:Inbox/Meeting.md:17");
    }

    #[test]
    fn test_sync_status_serialization() {
        let json = serde_json::to_string(&SyncStatus::Created).unwrap();
        assert_eq!(json, "\"created\"");

        let status: SyncStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(status, SyncStatus::Failed);
    }

    #[test]
    fn test_sync_status_from_str() {
        assert_eq!("Skipped".parse::<SyncStatus>().unwrap(), SyncStatus::Skipped);
        assert!("bogus".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_now_rfc3339_shape() {
        let now = now_rfc3339();
        assert!(now.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&now).is_ok());
    }

    #[test]
    fn test_run_stats_errorish() {
        let mut stats = RunStats {
            no_text: 3,
            ..Default::default()
        };
        assert!(!stats.is_errorish());

        stats.tool_failed = 1;
        assert!(stats.is_errorish());
    }
}
