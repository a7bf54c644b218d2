// Synchronization ledger: SQLite rows keyed by task identity, JSONL audit trail

use eyre::{Context, Result, eyre};
use fs2::FileExt;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::journal::{self, JournalEntry};
use crate::model::{RunRecord, RunStats, SyncRecord, SyncResult, SyncStatus, Task, now_rfc3339};

// SQLite's default host parameter limit is well above this.
const ID_CHUNK: usize = 500;

const TASK_COLUMNS: &str = "local_id, bridge_name, vault_name, note_path, line_no, title, provider, \
                            external_id, status, completed, created_at, last_synced_at, last_error";

/// Filter for `Ledger::list`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub bridge_name: Option<String>,
    pub status: Option<SyncStatus>,
    pub open_only: bool,
}

/// Per-bridge row counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    pub total: i64,
    pub open: i64,
    pub completed: i64,
}

/// Persistent record of every task identity ever seen.
///
/// Holds an exclusive lock on `<db>.lock` for its whole lifetime, so only
/// one run can write at a time.
pub struct Ledger {
    path: PathBuf,
    journal_path: PathBuf,
    db: Connection,
    lock: File,
}

impl Ledger {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("Failed to create ledger directory")?;
        }

        let lock_path = lock_path_for(&path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .context("Failed to open ledger lock file")?;
        lock.try_lock_exclusive()
            .map_err(|_| eyre!("Ledger {} is in use by another run", path.display()))?;

        let db = Connection::open(&path).context("Failed to open SQLite database")?;
        let journal_path = path.with_extension("jsonl");

        let ledger = Self {
            path,
            journal_path,
            db,
            lock,
        };
        ledger.create_schema()?;

        debug!(path = %ledger.path.display(), "Opened ledger");
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Release the database and the single-writer lock.
    pub fn close(self) -> Result<()> {
        let Ledger { path, db, lock, .. } = self;
        db.close()
            .map_err(|(_, e)| eyre!("Failed to close ledger database: {}", e))?;
        FileExt::unlock(&lock).context("Failed to release ledger lock")?;
        debug!(path = %path.display(), "Closed ledger");
        Ok(())
    }

    fn create_schema(&self) -> Result<()> {
        debug!("Creating ledger schema");

        self.db
            .execute_batch(
                r#"
            CREATE TABLE IF NOT EXISTS tasks (
                local_id TEXT PRIMARY KEY,
                bridge_name TEXT NOT NULL,
                vault_name TEXT NOT NULL,
                note_path TEXT NOT NULL,
                line_no INTEGER NOT NULL,
                title TEXT NOT NULL,
                provider TEXT,
                external_id TEXT,
                status TEXT NOT NULL,
                completed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_synced_at TEXT,
                last_error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tasks_bridge ON tasks(bridge_name);
            CREATE INDEX IF NOT EXISTS idx_tasks_note ON tasks(bridge_name, note_path);

            CREATE TABLE IF NOT EXISTS runs (
                run_id TEXT PRIMARY KEY,
                bridge_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                notes_found INTEGER NOT NULL DEFAULT 0,
                converted INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                no_text INTEGER NOT NULL DEFAULT 0,
                tool_missing INTEGER NOT NULL DEFAULT 0,
                tool_failed INTEGER NOT NULL DEFAULT 0,
                ledger_errors INTEGER NOT NULL DEFAULT 0,
                todos_extracted INTEGER NOT NULL DEFAULT 0,
                todos_created INTEGER NOT NULL DEFAULT 0,
                todos_failed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_runs_bridge ON runs(bridge_name, started_at);
            "#,
            )
            .context("Failed to create ledger schema")?;

        Ok(())
    }

    // ========================================================================
    // Identity filtering and upsert
    // ========================================================================

    /// Return the subset of `candidate_ids` already present in the ledger.
    pub fn known_ids(&self, candidate_ids: &[String]) -> Result<HashSet<String>> {
        let mut known = HashSet::new();
        if candidate_ids.is_empty() {
            return Ok(known);
        }

        for chunk in candidate_ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!("SELECT local_id FROM tasks WHERE local_id IN ({})", placeholders);

            let mut stmt = self.db.prepare(&sql).context("Failed to prepare known-ids query")?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, String>(0))?;
            for row in rows {
                known.insert(row?);
            }
        }

        debug!(candidates = candidate_ids.len(), known = known.len(), "Checked known task ids");
        Ok(known)
    }

    /// Upsert one row per task that has a matching result.
    pub fn record_results(&mut self, tasks: &[Task], results: &[SyncResult]) -> Result<usize> {
        self.record_results_at(tasks, results, &now_rfc3339())
    }

    /// `record_results` with an explicit timestamp.
    ///
    /// New rows get `created_at = now`; existing rows keep theirs and only
    /// have provider, external id, status, completed, last sync time and last
    /// error replaced. The batch is one transaction.
    pub fn record_results_at(&mut self, tasks: &[Task], results: &[SyncResult], now: &str) -> Result<usize> {
        let by_id: HashMap<&str, &SyncResult> = results.iter().map(|r| (r.local_id.as_str(), r)).collect();

        let mut touched = Vec::new();
        let tx = self.db.transaction().context("Failed to begin ledger transaction")?;
        for task in tasks {
            let Some(result) = by_id.get(task.local_id.as_str()) else {
                continue;
            };

            tx.execute(
                "INSERT INTO tasks (local_id, bridge_name, vault_name, note_path, line_no, title, provider,
                                    external_id, status, completed, created_at, last_synced_at, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11, ?12)
                 ON CONFLICT(local_id) DO UPDATE SET
                    provider = excluded.provider,
                    external_id = excluded.external_id,
                    status = excluded.status,
                    completed = excluded.completed,
                    last_synced_at = excluded.last_synced_at,
                    last_error = excluded.last_error",
                params![
                    task.local_id,
                    task.bridge_name,
                    task.vault_name,
                    task.note_path,
                    task.line_no,
                    task.title,
                    result.provider,
                    result.external_id,
                    result.status,
                    task.completed,
                    now,
                    result.error,
                ],
            )
            .with_context(|| format!("Failed to upsert task {}", task.local_id))?;
            touched.push(task.local_id.clone());
        }
        tx.commit().context("Failed to commit ledger transaction")?;

        let mut entries = Vec::with_capacity(touched.len());
        for local_id in &touched {
            if let Some(record) = self.get(local_id)? {
                entries.push(JournalEntry::new(record));
            }
        }
        journal::append(&self.journal_path, &entries)?;

        debug!(count = touched.len(), "Recorded sync results");
        Ok(touched.len())
    }

    pub fn get(&self, local_id: &str) -> Result<Option<SyncRecord>> {
        let sql = format!("SELECT {} FROM tasks WHERE local_id = ?1", TASK_COLUMNS);
        let record = self
            .db
            .query_row(&sql, [local_id], row_to_record)
            .optional()
            .context("Failed to read ledger row")?;
        Ok(record)
    }

    /// Rows matching `filter`, ordered by bridge, note and line.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<SyncRecord>> {
        let mut sql = format!("SELECT {} FROM tasks WHERE 1 = 1", TASK_COLUMNS);
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(bridge) = &filter.bridge_name {
            values.push(Box::new(bridge.clone()));
            sql.push_str(&format!(" AND bridge_name = ?{}", values.len()));
        }
        if let Some(status) = &filter.status {
            values.push(Box::new(status.clone()));
            sql.push_str(&format!(" AND status = ?{}", values.len()));
        }
        if filter.open_only {
            sql.push_str(" AND completed = 0");
        }
        sql.push_str(" ORDER BY bridge_name, note_path, line_no");

        let mut stmt = self.db.prepare(&sql).context("Failed to prepare list query")?;
        let refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), row_to_record)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn task_counts(&self, bridge_name: &str) -> Result<TaskCounts> {
        let counts = self
            .db
            .query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN completed = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN completed = 1 THEN 1 ELSE 0 END), 0)
                 FROM tasks WHERE bridge_name = ?1",
                [bridge_name],
                |row| {
                    Ok(TaskCounts {
                        total: row.get(0)?,
                        open: row.get(1)?,
                        completed: row.get(2)?,
                    })
                },
            )
            .context("Failed to count ledger rows")?;
        Ok(counts)
    }

    // ========================================================================
    // Run metrics
    // ========================================================================

    pub fn start_run(&self, bridge_name: &str) -> Result<String> {
        let run_id = Uuid::now_v7().to_string();
        self.db
            .execute(
                "INSERT INTO runs (run_id, bridge_name, started_at) VALUES (?1, ?2, ?3)",
                params![run_id, bridge_name, now_rfc3339()],
            )
            .context("Failed to record run start")?;
        debug!(run_id = %run_id, bridge = bridge_name, "Started run");
        Ok(run_id)
    }

    pub fn finish_run(&self, run_id: &str, stats: &RunStats) -> Result<()> {
        let updated = self
            .db
            .execute(
                "UPDATE runs SET finished_at = ?2, notes_found = ?3, converted = ?4, skipped = ?5,
                        no_text = ?6, tool_missing = ?7, tool_failed = ?8, ledger_errors = ?9,
                        todos_extracted = ?10, todos_created = ?11, todos_failed = ?12
                 WHERE run_id = ?1",
                params![
                    run_id,
                    now_rfc3339(),
                    stats.notes_found,
                    stats.converted,
                    stats.skipped,
                    stats.no_text,
                    stats.tool_missing,
                    stats.tool_failed,
                    stats.ledger_errors,
                    stats.todos_extracted,
                    stats.todos_created,
                    stats.todos_failed,
                ],
            )
            .context("Failed to record run metrics")?;

        if updated == 0 {
            return Err(eyre!("Unknown run id: {}", run_id));
        }
        Ok(())
    }

    /// Most recent run for a bridge, if any.
    pub fn last_run(&self, bridge_name: &str) -> Result<Option<RunRecord>> {
        let record = self
            .db
            .query_row(
                "SELECT run_id, bridge_name, started_at, finished_at, notes_found, converted, skipped,
                        no_text, tool_missing, tool_failed, ledger_errors, todos_extracted,
                        todos_created, todos_failed
                 FROM runs WHERE bridge_name = ?1 ORDER BY run_id DESC LIMIT 1",
                [bridge_name],
                |row| {
                    Ok(RunRecord {
                        run_id: row.get(0)?,
                        bridge_name: row.get(1)?,
                        started_at: row.get(2)?,
                        finished_at: row.get(3)?,
                        stats: RunStats {
                            notes_found: row.get(4)?,
                            converted: row.get(5)?,
                            skipped: row.get(6)?,
                            no_text: row.get(7)?,
                            tool_missing: row.get(8)?,
                            tool_failed: row.get(9)?,
                            ledger_errors: row.get(10)?,
                            todos_extracted: row.get(11)?,
                            todos_created: row.get(12)?,
                            todos_failed: row.get(13)?,
                        },
                    })
                },
            )
            .optional()
            .context("Failed to read last run")?;
        Ok(record)
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Replace the `tasks` table with the latest snapshot per id from the journal.
    pub fn rebuild_from_journal(&mut self) -> Result<usize> {
        info!(journal = %self.journal_path.display(), "Rebuilding ledger from journal");

        let records = journal::read_latest(&self.journal_path)?;
        if records.is_empty() && !self.journal_path.exists() {
            warn!(journal = %self.journal_path.display(), "No journal found, ledger left unchanged");
            return Ok(0);
        }

        let tx = self.db.transaction().context("Failed to begin rebuild transaction")?;
        tx.execute("DELETE FROM tasks", [])?;
        for record in records.values() {
            tx.execute(
                &format!(
                    "INSERT INTO tasks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    TASK_COLUMNS
                ),
                params![
                    record.local_id,
                    record.bridge_name,
                    record.vault_name,
                    record.note_path,
                    record.line_no,
                    record.title,
                    record.provider,
                    record.external_id,
                    record.status,
                    record.completed,
                    record.created_at,
                    record.last_synced_at,
                    record.last_error,
                ],
            )?;
        }
        tx.commit().context("Failed to commit rebuild")?;

        info!(count = records.len(), "Ledger rebuilt");
        Ok(records.len())
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".lock");
    PathBuf::from(name)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SyncRecord> {
    Ok(SyncRecord {
        local_id: row.get(0)?,
        bridge_name: row.get(1)?,
        vault_name: row.get(2)?,
        note_path: row.get(3)?,
        line_no: row.get(4)?,
        title: row.get(5)?,
        provider: row.get(6)?,
        external_id: row.get(7)?,
        status: row.get(8)?,
        completed: row.get(9)?,
        created_at: row.get(10)?,
        last_synced_at: row.get(11)?,
        last_error: row.get(12)?,
    })
}

impl ToSql for SyncStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SyncStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: eyre::Report| FromSqlError::Other(e.to_string().into()))
    }
}
