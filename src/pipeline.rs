// Run orchestration: bridges, notes, task sync, status and notifications

use chrono::{DateTime, Local};
use eyre::Result;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

use crate::checklist::{self, NoteIdentity};
use crate::config::{Bridge, Config, NotifyMode};
use crate::healthcheck::HealthCheck;
use crate::ledger::Ledger;
use crate::model::{RunStats, SyncResult, SyncStatus, Task, now_rfc3339};
use crate::providers::{
    Adapters, NoteContext, NoteFile, NoteMetadata, NoteWriter, NotificationPayload, NotifyContext, SourceContext,
    StatusStats, TaskProvider, TodoContext,
};
use crate::recognizer::{RecognizeError, Recognizer, ToolRecognizer};
use crate::reflow;
use crate::replace::{self, Replacements};

const MAX_TITLE_CHARS: usize = 80;
const UNTITLED: &str = "Untitled";

static TITLE_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-\*\d\.\)]+\s+").expect("valid title marker regex"));
static TITLE_JUNK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w\-\s]").expect("valid title junk regex"));
static LINE_BREAKS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\r\n]+").expect("valid line break regex"));

// ============================================================================
// Outcomes
// ============================================================================

/// What happened to a single note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteOutcome {
    Converted,
    SkippedUpToDate,
    NoText,
    ToolMissing,
    ToolFailed,
    LedgerError,
}

impl NoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteOutcome::Converted => "converted",
            NoteOutcome::SkippedUpToDate => "skipped_up_to_date",
            NoteOutcome::NoText => "no_text",
            NoteOutcome::ToolMissing => "tool_missing",
            NoteOutcome::ToolFailed => "tool_failed",
            NoteOutcome::LedgerError => "ledger_error",
        }
    }

    fn count_into(self, stats: &mut RunStats) {
        match self {
            NoteOutcome::Converted => stats.converted += 1,
            NoteOutcome::SkippedUpToDate => stats.skipped += 1,
            NoteOutcome::NoText => stats.no_text += 1,
            NoteOutcome::ToolMissing => stats.tool_missing += 1,
            NoteOutcome::ToolFailed => stats.tool_failed += 1,
            NoteOutcome::LedgerError => stats.ledger_errors += 1,
        }
    }
}

/// Task counters for one note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskSync {
    pub extracted: usize,
    pub forwarded: usize,
    pub created: usize,
    pub failed: usize,
}

/// Result of one bridge pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeReport {
    pub bridge_name: String,
    pub status: StatusStats,
    /// Structural problems: missing paths, tool or ledger failures.
    pub errorish: bool,
}

// ============================================================================
// Run context
// ============================================================================

/// Everything a run needs, built once from configuration.
pub struct RunContext {
    pub config: Config,
    pub ledger: Ledger,
    pub adapters: Adapters,
    pub recognizer: Box<dyn Recognizer>,
}

impl RunContext {
    /// Open the ledger (taking its lock) and resolve every adapter.
    pub fn open(config: Config) -> Result<Self> {
        let ledger = Ledger::open(&config.ledger_path)?;
        let adapters = Adapters::from_config(&config);
        let recognizer = Box::new(ToolRecognizer::new(&config.tool.command, config.tool.retries));
        Ok(Self::new(config, ledger, adapters, recognizer))
    }

    pub fn new(config: Config, ledger: Ledger, adapters: Adapters, recognizer: Box<dyn Recognizer>) -> Self {
        Self {
            config,
            ledger,
            adapters,
            recognizer,
        }
    }

    pub fn close(self) -> Result<()> {
        self.ledger.close()
    }

    /// Process every configured bridge once. Returns whether any bridge was errorish.
    pub fn run_bridges(&mut self) -> Result<bool> {
        let bridges = self.config.bridges.clone();
        let mut errorish = false;

        for bridge in &bridges {
            let report = self.process_bridge(bridge)?;
            errorish |= report.errorish;
        }
        Ok(errorish)
    }

    pub fn process_bridge(&mut self, bridge: &Bridge) -> Result<BridgeReport> {
        let mut report = BridgeReport {
            bridge_name: bridge.name.clone(),
            status: StatusStats::default(),
            errorish: false,
        };

        if !bridge.enabled {
            info!(bridge = %bridge.name, "Bridge disabled, skipping");
            return Ok(report);
        }

        let vault_name = bridge.vault_name();
        let note_ctx = NoteContext {
            bridge_name: &bridge.name,
            vault_path: &bridge.vault_path,
            vault_name: &vault_name,
        };
        let source_ctx = SourceContext {
            bridge_name: &bridge.name,
            source_path: &bridge.source_path,
        };
        let vault_exists = bridge.vault_path.is_dir();

        if self.adapters.source.root_path(&source_ctx).is_none() {
            warn!(bridge = %bridge.name, path = %bridge.source_path.display(), "Source folder does not exist");
            report.status.source_missing = true;
            report.status.vault_missing = !vault_exists;
            report.errorish = true;
            if vault_exists {
                self.write_status(&report.status, &note_ctx);
            }
            self.notify(bridge, &vault_name, &report);
            return Ok(report);
        }

        if !vault_exists {
            warn!(bridge = %bridge.name, path = %bridge.vault_path.display(), "Vault does not exist");
            report.status.vault_missing = true;
            report.errorish = true;
            self.notify(bridge, &vault_name, &report);
            return Ok(report);
        }

        let notes = self.adapters.source.list_notes(&source_ctx);
        if notes.is_empty() {
            info!(bridge = %bridge.name, "No notes found");
            self.write_status(&report.status, &note_ctx);
            return Ok(report);
        }

        let run_id = match self.ledger.start_run(&bridge.name) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(bridge = %bridge.name, error = %e, "Failed to record run start");
                None
            }
        };

        let replacements = self.adapters.notes.load_replacements(&note_ctx);
        let stats = &mut report.status.run;
        stats.notes_found = notes.len() as i64;

        for note in &notes {
            let outcome = self.process_note(bridge, note, &note_ctx, &replacements, stats)?;
            debug!(bridge = %bridge.name, note = %note.relative_path.display(), outcome = outcome.as_str(), "Processed note");
            outcome.count_into(stats);
        }

        info!(
            bridge = %bridge.name,
            notes = stats.notes_found,
            converted = stats.converted,
            skipped = stats.skipped,
            no_text = stats.no_text,
            tool_missing = stats.tool_missing,
            tool_failed = stats.tool_failed,
            todos_created = stats.todos_created,
            "Bridge processed"
        );

        if let Some(run_id) = run_id {
            if let Err(e) = self.ledger.finish_run(&run_id, &report.status.run) {
                warn!(bridge = %bridge.name, error = %e, "Failed to record run metrics");
            }
        }

        report.errorish = report.status.run.is_errorish();
        self.write_status(&report.status, &note_ctx);
        if self.config.notify_mode.should_notify(report.errorish) {
            self.notify(bridge, &vault_name, &report);
        } else {
            debug!(bridge = %bridge.name, errorish = report.errorish, "Notification suppressed by notify mode");
        }

        Ok(report)
    }

    /// Convert one note. Only a failure to write the output note is returned as an error.
    pub fn process_note(
        &mut self,
        bridge: &Bridge,
        note: &NoteFile,
        note_ctx: &NoteContext<'_>,
        replacements: &Replacements,
        stats: &mut RunStats,
    ) -> Result<NoteOutcome> {
        let rel_md = note.relative_path.with_extension("md");
        let md_path = bridge.vault_path.join(&rel_md);

        if is_up_to_date(&md_path, note) {
            return Ok(NoteOutcome::SkippedUpToDate);
        }

        let text = match self.recognizer.extract_text(&note.path) {
            Ok(Some(text)) => text,
            Ok(None) => {
                warn!(bridge = %bridge.name, note = %note.relative_path.display(), "No text extracted");
                return Ok(NoteOutcome::NoText);
            }
            Err(RecognizeError::ToolMissing(msg)) => {
                error!(bridge = %bridge.name, note = %note.relative_path.display(), error = %msg, "Recognition tool missing");
                return Ok(NoteOutcome::ToolMissing);
            }
            Err(e) => {
                error!(bridge = %bridge.name, note = %note.relative_path.display(), error = %e, "Recognition failed");
                return Ok(NoteOutcome::ToolFailed);
            }
        };

        let mut body = reflow::reflow(&text, bridge.aggressive_cleanup);
        if !replacements.is_empty() {
            body = replace::apply_replacements(&body, replacements);
        }

        let note_path = posix_path(&rel_md);
        let identity = NoteIdentity {
            bridge_name: &bridge.name,
            vault_name: note_ctx.vault_name,
            note_path: &note_path,
        };
        let tasks = checklist::extract_tasks(&body, &identity);

        match sync_note_tasks(
            &mut self.ledger,
            self.adapters.todo.as_ref(),
            self.adapters.notes.as_ref(),
            note_ctx,
            &tasks,
        ) {
            Ok(sync) => {
                stats.todos_extracted += sync.extracted as i64;
                stats.todos_created += sync.created as i64;
                stats.todos_failed += sync.failed as i64;
            }
            Err(e) => {
                error!(bridge = %bridge.name, note = %note_path, error = %e, "Task ledger unavailable, skipping note");
                return Ok(NoteOutcome::LedgerError);
            }
        }

        let title = derive_title(&body, &note.stem());

        if bridge.export_images {
            let images = self.export_images(bridge, note);
            append_sketches(&mut body, &images, &bridge.vault_path);
        }

        let metadata = NoteMetadata {
            title,
            tags: merge_tags(&self.config.default_tags, &bridge.extra_tags),
            source_file: posix_path(&note.relative_path),
            created_date: Some(Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()),
            modified_date: Some(DateTime::<Local>::from(note.modified).format("%Y-%m-%dT%H:%M:%S").to_string()),
        };

        let written = self.adapters.notes.write_note(&body, &metadata, &rel_md, note_ctx)?;
        info!(bridge = %bridge.name, note = %note.relative_path.display(), path = %written.display(), "Converted note");
        Ok(NoteOutcome::Converted)
    }

    /// Page images under `<vault>/<images_subdir>/<bridge>/<stem>/`; failures yield none.
    fn export_images(&self, bridge: &Bridge, note: &NoteFile) -> Vec<PathBuf> {
        let out_dir = bridge
            .vault_path
            .join(&bridge.images_subdir)
            .join(&bridge.name)
            .join(note.stem());

        match self.recognizer.export_images(&note.path, &out_dir) {
            Ok(images) => images,
            Err(e) => {
                warn!(bridge = %bridge.name, note = %note.relative_path.display(), error = %e, "Image export failed");
                Vec::new()
            }
        }
    }

    fn write_status(&self, status: &StatusStats, note_ctx: &NoteContext<'_>) {
        match self.adapters.notes.write_status_note(status, note_ctx) {
            Ok(Some(path)) => debug!(bridge = note_ctx.bridge_name, path = %path.display(), "Wrote status note"),
            Ok(None) => {}
            Err(e) => warn!(bridge = note_ctx.bridge_name, error = %e, "Failed to write status note"),
        }
    }

    fn notify(&self, bridge: &Bridge, vault_name: &str, report: &BridgeReport) {
        if self.config.notify_mode == NotifyMode::None {
            debug!(bridge = %bridge.name, "Notifications disabled");
            return;
        }

        let payload = NotificationPayload {
            bridge_name: bridge.name.clone(),
            vault_name: vault_name.to_string(),
            timestamp: now_rfc3339(),
            run: report.status.run.clone(),
            source_missing: report.status.source_missing,
            vault_missing: report.status.vault_missing,
        };
        let ctx = NotifyContext {
            bridge_name: &bridge.name,
        };

        for notifier in &self.adapters.notifiers {
            if !notifier.send(&payload, &ctx) {
                warn!(bridge = %bridge.name, notifier = notifier.name(), "Notification not delivered");
            }
        }
    }
}

// ============================================================================
// Task sync
// ============================================================================

/// Forward unseen, open tasks to the provider and record the outcomes.
///
/// Unseen completed tasks are recorded as skipped without reaching the
/// provider; known tasks are left alone. Ledger errors are returned, provider
/// problems arrive as failed results.
pub fn sync_note_tasks(
    ledger: &mut Ledger,
    provider: &dyn TaskProvider,
    writer: &dyn NoteWriter,
    note_ctx: &NoteContext<'_>,
    tasks: &[Task],
) -> Result<TaskSync> {
    let mut sync = TaskSync {
        extracted: tasks.len(),
        ..Default::default()
    };
    if tasks.is_empty() {
        return Ok(sync);
    }

    let ids: Vec<String> = tasks.iter().map(|t| t.local_id.clone()).collect();
    let known = ledger.known_ids(&ids)?;
    let (open, done): (Vec<Task>, Vec<Task>) = tasks
        .iter()
        .filter(|t| !known.contains(&t.local_id))
        .cloned()
        .partition(|t| !t.completed);

    debug!(
        bridge = note_ctx.bridge_name,
        total = tasks.len(),
        known = known.len(),
        fresh_open = open.len(),
        fresh_done = done.len(),
        "Task candidates"
    );

    if open.is_empty() && done.is_empty() {
        return Ok(sync);
    }

    let mut results = Vec::with_capacity(open.len() + done.len());
    if !open.is_empty() {
        let note_url = |path: &str| writer.note_url(path, note_ctx);
        let todo_ctx = TodoContext {
            bridge_name: note_ctx.bridge_name,
            vault_name: note_ctx.vault_name,
            vault_path: note_ctx.vault_path,
            note_url: &note_url,
        };
        results = provider.sync_tasks(&open, &todo_ctx);

        sync.forwarded = open.len();
        sync.created = results.iter().filter(|r| r.status == SyncStatus::Created).count();
        sync.failed = results.iter().filter(|r| r.status == SyncStatus::Failed).count();
    }

    results.extend(done.iter().map(|t| SyncResult {
        local_id: t.local_id.clone(),
        provider: provider.name().to_string(),
        external_id: None,
        status: SyncStatus::Skipped,
        error: None,
    }));

    let recorded: Vec<Task> = open.into_iter().chain(done).collect();
    ledger.record_results(&recorded, &results)?;
    Ok(sync)
}

// ============================================================================
// Helpers
// ============================================================================

fn is_up_to_date(md_path: &Path, note: &NoteFile) -> bool {
    fs::metadata(md_path)
        .and_then(|m| m.modified())
        .map(|md_mtime| md_mtime >= note.modified)
        .unwrap_or(false)
}

/// First non-blank line without list or heading markers, else `fallback`.
pub fn derive_title(body: &str, fallback: &str) -> String {
    let first = body.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    let candidate = TITLE_MARKER.replace(first, "");
    let candidate = candidate.trim_matches(|c: char| c == '#' || c == ' ').trim();

    if candidate.is_empty() {
        sanitize_title(fallback)
    } else {
        sanitize_title(candidate)
    }
}

/// Keep word characters, `-` and whitespace; at most 80 characters.
pub fn sanitize_title(raw: &str) -> String {
    let single_line = LINE_BREAKS.replace_all(raw.trim(), " ");
    let cleaned = TITLE_JUNK.replace_all(&single_line, "");
    let title: String = cleaned.trim().chars().take(MAX_TITLE_CHARS).collect();

    if title.is_empty() { UNTITLED.to_string() } else { title }
}

/// Default tags followed by bridge tags, first occurrence wins.
pub fn merge_tags(default_tags: &[String], extra_tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    default_tags
        .iter()
        .chain(extra_tags)
        .filter(|t| seen.insert(t.to_string()))
        .cloned()
        .collect()
}

fn append_sketches(body: &mut String, images: &[PathBuf], vault_path: &Path) {
    if images.is_empty() {
        return;
    }

    body.push_str("\n\n## Sketches\n\n");
    for img in images {
        let stem = img.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let link = img.strip_prefix(vault_path).map(posix_path).unwrap_or_else(|_| posix_path(img));
        body.push_str(&format!("![{}]({})\n", stem, link));
    }
}

/// `/`-separated form of a relative path.
fn posix_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ============================================================================
// Entry point
// ============================================================================

/// One unattended run over every bridge, bracketed by health-check pings.
///
/// Returns whether the run was errorish. Fatal errors ping `/fail` before
/// being returned.
pub fn run(config: Config) -> Result<bool> {
    let health = HealthCheck::new(config.healthcheck_url.as_deref());
    health.start();

    let outcome = RunContext::open(config).and_then(|mut ctx| {
        let errorish = ctx.run_bridges();
        ctx.close()?;
        errorish
    });

    match outcome {
        Ok(false) => {
            health.success();
            info!("Run complete");
            Ok(false)
        }
        Ok(true) => {
            health.fail();
            warn!("Run complete with errors");
            Ok(true)
        }
        Err(e) => {
            health.fail();
            error!(error = %e, "Run aborted");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{NoopTaskProvider, ObsidianWriter};
    use std::cell::RefCell;
    use tempfile::TempDir;

    struct CountingProvider {
        seen: RefCell<Vec<String>>,
    }

    impl TaskProvider for CountingProvider {
        fn name(&self) -> &str {
            "counting"
        }

        fn sync_tasks(&self, tasks: &[Task], _ctx: &TodoContext<'_>) -> Vec<SyncResult> {
            self.seen.borrow_mut().extend(tasks.iter().map(|t| t.title.clone()));
            tasks
                .iter()
                .map(|t| SyncResult {
                    local_id: t.local_id.clone(),
                    provider: "counting".to_string(),
                    external_id: Some(format!("ext-{}", t.line_no)),
                    status: SyncStatus::Created,
                    error: None,
                })
                .collect()
        }
    }

    fn task(line_no: i64, title: &str, completed: bool) -> Task {
        Task {
            local_id: Task::local_id_for("work", "Inbox/Note.md", line_no),
            bridge_name: "work".to_string(),
            vault_name: "Vault".to_string(),
            note_path: "Inbox/Note.md".to_string(),
            line_no,
            title: title.to_string(),
            completed,
        }
    }

    #[test]
    fn test_sync_forwards_only_fresh_open_tasks() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::open(temp.path().join("ledger.db")).unwrap();
        let provider = CountingProvider {
            seen: RefCell::new(Vec::new()),
        };
        let ctx = NoteContext {
            bridge_name: "work",
            vault_path: temp.path(),
            vault_name: "Vault",
        };
        let tasks = vec![task(1, "Buy milk", false), task(2, "Done thing", true)];

        let first = sync_note_tasks(&mut ledger, &provider, &ObsidianWriter, &ctx, &tasks).unwrap();
        assert_eq!(first.extracted, 2);
        assert_eq!(first.forwarded, 1);
        assert_eq!(first.created, 1);

        let done = ledger.get(&tasks[1].local_id).unwrap().unwrap();
        assert!(done.completed);
        assert_eq!(done.status, SyncStatus::Skipped);

        let second = sync_note_tasks(&mut ledger, &provider, &ObsidianWriter, &ctx, &tasks).unwrap();
        assert_eq!(second.forwarded, 0);
        assert_eq!(*provider.seen.borrow(), vec!["Buy milk".to_string()]);
    }

    #[test]
    fn test_sync_records_skipped_results() {
        let temp = TempDir::new().unwrap();
        let mut ledger = Ledger::open(temp.path().join("ledger.db")).unwrap();
        let ctx = NoteContext {
            bridge_name: "work",
            vault_path: temp.path(),
            vault_name: "Vault",
        };
        let tasks = vec![task(3, "Call Bob", false)];

        let sync = sync_note_tasks(&mut ledger, &NoopTaskProvider, &ObsidianWriter, &ctx, &tasks).unwrap();
        assert_eq!(sync.created, 0);

        let record = ledger.get(&tasks[0].local_id).unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Skipped);
    }

    #[test]
    fn test_derive_title() {
        assert_eq!(derive_title("\n# Weekly plan\n- item\n", "stem"), "Weekly plan");
        assert_eq!(derive_title("- [ ] Buy milk\n", "stem"), "Buy milk");
        assert_eq!(derive_title("1. First: step!\n", "stem"), "First step");
        assert_eq!(derive_title("\n\n", "20240501_093000"), "20240501_093000");
        assert_eq!(derive_title("???\n", "stem"), UNTITLED);
    }

    #[test]
    fn test_sanitize_title_truncates() {
        let long = "a".repeat(120);
        assert_eq!(sanitize_title(&long).chars().count(), MAX_TITLE_CHARS);
        assert_eq!(sanitize_title("Line one\r\nline two"), "Line one line two");
        assert_eq!(sanitize_title(""), UNTITLED);
    }

    #[test]
    fn test_merge_tags_dedups_in_order() {
        let default = vec!["supernote".to_string(), "inbox".to_string()];
        let extra = vec!["work".to_string(), "inbox".to_string()];
        assert_eq!(merge_tags(&default, &extra), vec!["supernote", "inbox", "work"]);
    }

    #[test]
    fn test_append_sketches() {
        let vault = Path::new("/vault");
        let images = vec![
            PathBuf::from("/vault/Inkbridge/Assets/work/Note/Note-1.png"),
            PathBuf::from("/vault/Inkbridge/Assets/work/Note/Note-2.png"),
        ];
        let mut body = "# Note\n".to_string();
        append_sketches(&mut body, &images, vault);
        assert_eq!(
            body,
            "# Note\n\n\n## Sketches\n\n![Note-1](Inkbridge/Assets/work/Note/Note-1.png)\n![Note-2](Inkbridge/Assets/work/Note/Note-2.png)\n"
        );

        let mut untouched = "x\n".to_string();
        append_sketches(&mut untouched, &[], vault);
        assert_eq!(untouched, "x\n");
    }

    #[test]
    fn test_posix_path() {
        assert_eq!(posix_path(Path::new("Inbox/Sub/Note.md")), "Inbox/Sub/Note.md");
    }

    #[test]
    fn test_outcome_counts() {
        let mut stats = RunStats::default();
        NoteOutcome::Converted.count_into(&mut stats);
        NoteOutcome::LedgerError.count_into(&mut stats);
        NoteOutcome::ToolFailed.count_into(&mut stats);
        assert_eq!(stats.converted, 1);
        assert_eq!(stats.ledger_errors, 1);
        assert!(stats.is_errorish());
    }
}
