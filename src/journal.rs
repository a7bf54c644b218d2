// Append-only JSONL audit journal for ledger upserts

use eyre::{Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::model::{SyncRecord, now_ms};

/// One journal line: the full row snapshot after an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub journaled_at: i64,
    #[serde(flatten)]
    pub record: SyncRecord,
}

impl JournalEntry {
    pub fn new(record: SyncRecord) -> Self {
        Self {
            journaled_at: now_ms(),
            record,
        }
    }
}

/// Append entries to the journal under an exclusive lock.
pub fn append(path: &Path, entries: &[JournalEntry]) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .context("Failed to open journal for appending")?;

    file.lock_exclusive().context("Failed to acquire journal lock")?;

    for entry in entries {
        let json = serde_json::to_string(entry).context("Failed to serialize journal entry")?;
        writeln!(file, "{}", json)?;
    }
    file.sync_all()?;

    // Lock is released when file is dropped
    Ok(())
}

/// Read the journal and keep the latest snapshot per `local_id`.
///
/// Malformed lines are skipped with a warning. On equal timestamps the
/// later line wins.
pub fn read_latest(path: &Path) -> Result<HashMap<String, SyncRecord>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }

    let file = File::open(path).context("Failed to open journal")?;
    let reader = BufReader::new(file);
    let mut latest: HashMap<String, JournalEntry> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!(file = ?path, line = line_num + 1, error = ?e, "Failed to read journal line, skipping");
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        let entry: JournalEntry = match serde_json::from_str(&line) {
            Ok(e) => e,
            Err(e) => {
                warn!(file = ?path, line = line_num + 1, error = ?e, "Failed to parse journal entry, skipping");
                continue;
            }
        };

        let newer = latest
            .get(&entry.record.local_id)
            .is_none_or(|existing| entry.journaled_at >= existing.journaled_at);
        if newer {
            latest.insert(entry.record.local_id.clone(), entry);
        }
    }

    info!(file = ?path, count = latest.len(), "Loaded latest ledger rows from journal");

    Ok(latest.into_iter().map(|(id, entry)| (id, entry.record)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncStatus;
    use std::fs;
    use tempfile::TempDir;

    fn record(local_id: &str, status: SyncStatus) -> SyncRecord {
        SyncRecord {
            local_id: local_id.to_string(),
            bridge_name: "work".to_string(),
            vault_name: "Work".to_string(),
            note_path: "Inbox.md".to_string(),
            line_no: 3,
            title: "Call back".to_string(),
            provider: Some("todoist".to_string()),
            external_id: None,
            status,
            completed: false,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            last_synced_at: Some("2024-01-01T00:00:00Z".to_string()),
            last_error: None,
        }
    }

    #[test]
    fn test_append_writes_flat_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.jsonl");

        append(&path, &[JournalEntry::new(record("work:Inbox.md:3", SyncStatus::Created))]).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"local_id\":\"work:Inbox.md:3\""));
        assert!(content.contains("\"status\":\"created\""));
        assert!(content.contains("\"journaled_at\":"));
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_append_nothing_creates_no_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.jsonl");

        append(&path, &[]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_read_latest_prefers_newest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.jsonl");

        let first = JournalEntry {
            journaled_at: 1000,
            record: record("a", SyncStatus::Failed),
        };
        let second = JournalEntry {
            journaled_at: 2000,
            record: record("a", SyncStatus::Created),
        };
        append(&path, &[second, first]).unwrap();

        let latest = read_latest(&path).unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest["a"].status, SyncStatus::Created);
    }

    #[test]
    fn test_read_latest_tie_goes_to_later_line() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.jsonl");

        let entries = [
            JournalEntry {
                journaled_at: 1000,
                record: record("a", SyncStatus::Failed),
            },
            JournalEntry {
                journaled_at: 1000,
                record: record("a", SyncStatus::Skipped),
            },
        ];
        append(&path, &entries).unwrap();

        assert_eq!(read_latest(&path).unwrap()["a"].status, SyncStatus::Skipped);
    }

    #[test]
    fn test_read_latest_missing_file() {
        let temp = TempDir::new().unwrap();
        let latest = read_latest(&temp.path().join("missing.jsonl")).unwrap();
        assert!(latest.is_empty());
    }

    #[test]
    fn test_read_latest_skips_malformed_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ledger.jsonl");

        append(&path, &[JournalEntry::new(record("a", SyncStatus::Created))]).unwrap();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("{not json}\n\n");
        fs::write(&path, content).unwrap();
        append(&path, &[JournalEntry::new(record("b", SyncStatus::Skipped))]).unwrap();

        let latest = read_latest(&path).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.contains_key("a"));
        assert!(latest.contains_key("b"));
    }
}
