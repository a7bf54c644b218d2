// Note writers: how structured notes, status and replacements live in a vault

use chrono::Local;
use eyre::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::model::RunStats;
use crate::replace::{self, Replacements};

const OBSIDIAN_DIR: &str = "Inkbridge";
const MARKDOWN_DIR: &str = ".inkbridge";

/// The bridge and vault a writer works on.
#[derive(Debug, Clone, Copy)]
pub struct NoteContext<'a> {
    pub bridge_name: &'a str,
    pub vault_path: &'a Path,
    pub vault_name: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMetadata {
    pub title: String,
    pub tags: Vec<String>,
    /// Source note path relative to the bridge's source folder.
    pub source_file: String,
    pub created_date: Option<String>,
    pub modified_date: Option<String>,
}

/// What a status note reports about one bridge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusStats {
    pub run: RunStats,
    pub source_missing: bool,
    pub vault_missing: bool,
}

pub trait NoteWriter {
    fn name(&self) -> &str;

    /// Write `content` at `relative_path` inside the vault, returning the absolute path.
    fn write_note(&self, content: &str, metadata: &NoteMetadata, relative_path: &Path, ctx: &NoteContext<'_>)
    -> Result<PathBuf>;

    fn write_status_note(&self, stats: &StatusStats, ctx: &NoteContext<'_>) -> Result<Option<PathBuf>>;

    /// App URL for a vault-relative note path given without extension.
    fn note_url(&self, note_path: &str, ctx: &NoteContext<'_>) -> String;

    /// Per-bridge replacements; empty when none are configured.
    fn load_replacements(&self, ctx: &NoteContext<'_>) -> Replacements;
}

fn now_local() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

/// Write to a sibling temp file, then rename over the target.
fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, contents).with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("Failed to move note into place at {}", path.display()))?;
    Ok(())
}

fn status_errors(stats: &StatusStats) -> Vec<String> {
    let run = &stats.run;
    let mut errors = Vec::new();

    if stats.source_missing {
        errors.push("Source folder does not exist at last run.".to_string());
    }
    if stats.vault_missing {
        errors.push("Vault does not exist at last run.".to_string());
    }
    if run.tool_missing > 0 {
        errors.push(format!("Recognition tool missing for {} note(s).", run.tool_missing));
    }
    if run.tool_failed > 0 {
        errors.push(format!("Recognition tool failed for {} note(s).", run.tool_failed));
    }
    if run.ledger_errors > 0 {
        errors.push(format!("Task ledger unavailable for {} note(s).", run.ledger_errors));
    }
    if run.no_text > 0 && run.tool_missing == 0 && run.tool_failed == 0 {
        errors.push(format!("No text extracted for {} note(s).", run.no_text));
    }

    errors
}

// ============================================================================
// Obsidian
// ============================================================================

/// Obsidian vaults: YAML front matter, status and replacements notes under `Inkbridge/`.
#[derive(Debug, Default)]
pub struct ObsidianWriter;

impl ObsidianWriter {
    fn replacements_path(ctx: &NoteContext<'_>) -> PathBuf {
        ctx.vault_path
            .join(OBSIDIAN_DIR)
            .join(format!("Replacements - {}.md", ctx.bridge_name))
    }

    fn ensure_replacements_template(ctx: &NoteContext<'_>) {
        let path = Self::replacements_path(ctx);
        if path.exists() {
            return;
        }

        let template = [
            format!("# Inkbridge Replacements - {}", ctx.bridge_name),
            String::new(),
            "# Define whole-word replacements for this vault/bridge.".to_string(),
            "# Each non-empty line should look like:".to_string(),
            "#   wrong -> right".to_string(),
            "# A leading '-', '*' or number is allowed if you prefer list syntax.".to_string(),
            "# Lines starting with '#' are comments.".to_string(),
            "# Example:".to_string(),
            "# - Gaurdrail -> Guardrail".to_string(),
            "# teh -> the".to_string(),
            String::new(),
        ]
        .join("\n");

        match atomic_write(&path, &template) {
            Ok(()) => info!(bridge = ctx.bridge_name, path = %path.display(), "Created replacements template"),
            Err(e) => warn!(bridge = ctx.bridge_name, error = %e, "Failed to create replacements template"),
        }
    }

    fn front_matter(metadata: &NoteMetadata) -> String {
        let mut lines = vec!["---".to_string(), format!("title: \"{}\"", metadata.title)];
        let date = metadata.created_date.clone().unwrap_or_else(now_local);
        lines.push(format!("date: \"{}\"", date));
        lines.push(format!("source_note: \"{}\"", metadata.source_file));
        if !metadata.tags.is_empty() {
            lines.push(format!("tags: [{}]", metadata.tags.join(", ")));
        }
        lines.push("---".to_string());
        lines.push(String::new());
        lines.join("\n")
    }
}

impl NoteWriter for ObsidianWriter {
    fn name(&self) -> &str {
        "obsidian"
    }

    fn write_note(
        &self,
        content: &str,
        metadata: &NoteMetadata,
        relative_path: &Path,
        ctx: &NoteContext<'_>,
    ) -> Result<PathBuf> {
        let path = ctx.vault_path.join(relative_path);
        atomic_write(&path, &format!("{}{}", Self::front_matter(metadata), content))?;
        debug!(bridge = ctx.bridge_name, path = %path.display(), "Wrote note");
        Ok(path)
    }

    fn write_status_note(&self, stats: &StatusStats, ctx: &NoteContext<'_>) -> Result<Option<PathBuf>> {
        let path = ctx
            .vault_path
            .join(OBSIDIAN_DIR)
            .join(format!("Status - {}.md", ctx.bridge_name));

        Self::ensure_replacements_template(ctx);

        let run = &stats.run;
        let mut lines = vec![
            format!("# Inkbridge Status - {}", ctx.bridge_name),
            String::new(),
            format!("- Last run: {}", now_local()),
            format!("- Vault path: `{}`", ctx.vault_path.display()),
            String::new(),
            "## Summary".to_string(),
            format!("- Notes found: {}", run.notes_found),
            format!("- Converted this run: {}", run.converted),
            format!("- Skipped (up-to-date): {}", run.skipped),
            format!("- No text extracted: {}", run.no_text),
            format!("- Tasks created: {}", run.todos_created),
        ];

        let errors = status_errors(stats);
        if !errors.is_empty() {
            lines.push(String::new());
            lines.push("## Errors".to_string());
            lines.extend(errors.into_iter().map(|e| format!("- {}", e)));
        }

        atomic_write(&path, &(lines.join("\n") + "\n"))?;
        Ok(Some(path))
    }

    fn note_url(&self, note_path: &str, ctx: &NoteContext<'_>) -> String {
        format!(
            "obsidian://open?vault={}&file={}",
            urlencoding::encode(ctx.vault_name),
            urlencoding::encode(note_path)
        )
    }

    fn load_replacements(&self, ctx: &NoteContext<'_>) -> Replacements {
        let path = Self::replacements_path(ctx);
        if !path.exists() {
            return Replacements::new();
        }

        match fs::read_to_string(&path) {
            Ok(content) => replace::parse_note_format(&content),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load replacements");
                Replacements::new()
            }
        }
    }
}

// ============================================================================
// Plain markdown
// ============================================================================

/// Plain Markdown folders: no front matter, JSON sidecars under `.inkbridge/`.
#[derive(Debug, Default)]
pub struct MarkdownWriter;

impl MarkdownWriter {
    fn meta_dir(ctx: &NoteContext<'_>) -> PathBuf {
        ctx.vault_path.join(MARKDOWN_DIR)
    }

    fn replacements_path(ctx: &NoteContext<'_>) -> PathBuf {
        Self::meta_dir(ctx).join(format!("replacements-{}.json", ctx.bridge_name))
    }

    fn ensure_replacements_template(ctx: &NoteContext<'_>) {
        let template = json!({
            "_comment": "Define text replacements as key-value pairs; keys starting with '_' are ignored",
            "_example1": "teh -> the",
            "_example2": "Gaurdrail -> Guardrail",
        });

        let path = Self::replacements_path(ctx);
        let written = serde_json::to_string_pretty(&template)
            .context("Failed to render replacements template")
            .and_then(|body| atomic_write(&path, &body));
        match written {
            Ok(()) => info!(bridge = ctx.bridge_name, path = %path.display(), "Created replacements template"),
            Err(e) => warn!(bridge = ctx.bridge_name, error = %e, "Failed to create replacements template"),
        }
    }

    fn write_metadata(metadata: &NoteMetadata, relative_path: &Path, ctx: &NoteContext<'_>) -> Result<()> {
        let key = relative_path.to_string_lossy().replace(['/', '\\'], "-");
        let path = Self::meta_dir(ctx).join("metadata").join(format!("{}.json", key));

        let body = json!({
            "title": metadata.title,
            "tags": metadata.tags,
            "source_file": metadata.source_file,
            "created_date": metadata.created_date,
            "modified_date": metadata.modified_date,
        });
        atomic_write(&path, &serde_json::to_string_pretty(&body)?)
    }
}

impl NoteWriter for MarkdownWriter {
    fn name(&self) -> &str {
        "markdown"
    }

    fn write_note(
        &self,
        content: &str,
        metadata: &NoteMetadata,
        relative_path: &Path,
        ctx: &NoteContext<'_>,
    ) -> Result<PathBuf> {
        let path = ctx.vault_path.join(relative_path);
        atomic_write(&path, content)?;
        Self::write_metadata(metadata, relative_path, ctx)?;
        debug!(bridge = ctx.bridge_name, path = %path.display(), "Wrote note");
        Ok(path)
    }

    fn write_status_note(&self, stats: &StatusStats, ctx: &NoteContext<'_>) -> Result<Option<PathBuf>> {
        let path = Self::meta_dir(ctx).join(format!("status-{}.json", ctx.bridge_name));
        let run = &stats.run;

        let body = json!({
            "last_run": now_local(),
            "bridge_name": ctx.bridge_name,
            "vault_path": ctx.vault_path.display().to_string(),
            "stats": {
                "notes_found": run.notes_found,
                "converted": run.converted,
                "skipped": run.skipped,
                "no_text": run.no_text,
                "tool_missing": run.tool_missing,
                "tool_failed": run.tool_failed,
                "ledger_errors": run.ledger_errors,
                "todos_created": run.todos_created,
            },
            "errors": {
                "source_missing": stats.source_missing,
                "vault_missing": stats.vault_missing,
                "messages": status_errors(stats),
            },
        });

        atomic_write(&path, &serde_json::to_string_pretty(&body)?)?;
        Ok(Some(path))
    }

    fn note_url(&self, note_path: &str, ctx: &NoteContext<'_>) -> String {
        format!("file://{}", ctx.vault_path.join(format!("{}.md", note_path)).display())
    }

    fn load_replacements(&self, ctx: &NoteContext<'_>) -> Replacements {
        let path = Self::replacements_path(ctx);
        if !path.exists() {
            Self::ensure_replacements_template(ctx);
            return Replacements::new();
        }

        let parsed = fs::read_to_string(&path)
            .context("Failed to read replacements file")
            .and_then(|content| replace::parse_json_format(&content));
        match parsed {
            Ok(mut repl) => {
                repl.retain(|k, _| !k.starts_with('_'));
                repl
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to load replacements");
                Replacements::new()
            }
        }
    }
}

// ============================================================================
// Noop
// ============================================================================

/// Writes nothing; useful for dry runs.
#[derive(Debug, Default)]
pub struct NoopWriter;

impl NoteWriter for NoopWriter {
    fn name(&self) -> &str {
        "noop"
    }

    fn write_note(&self, _: &str, _: &NoteMetadata, relative_path: &Path, ctx: &NoteContext<'_>) -> Result<PathBuf> {
        Ok(ctx.vault_path.join(relative_path))
    }

    fn write_status_note(&self, _: &StatusStats, _: &NoteContext<'_>) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn note_url(&self, _: &str, _: &NoteContext<'_>) -> String {
        String::new()
    }

    fn load_replacements(&self, _: &NoteContext<'_>) -> Replacements {
        Replacements::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(vault: &Path) -> NoteContext<'_> {
        NoteContext {
            bridge_name: "work",
            vault_path: vault,
            vault_name: "My Vault",
        }
    }

    fn metadata() -> NoteMetadata {
        NoteMetadata {
            title: "Standup".to_string(),
            tags: vec!["inbox".to_string(), "work".to_string()],
            source_file: "Meetings/Standup.note".to_string(),
            created_date: Some("2024-05-01T09:30:00".to_string()),
            modified_date: None,
        }
    }

    #[test]
    fn test_obsidian_front_matter() {
        let temp = TempDir::new().unwrap();
        let writer = ObsidianWriter;

        let path = writer
            .write_note("# Standup\n- [ ] Send notes\n", &metadata(), Path::new("Meetings/Standup.md"), &ctx(temp.path()))
            .unwrap();

        assert_eq!(path, temp.path().join("Meetings/Standup.md"));
        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(
            content,
            "---\ntitle: \"Standup\"\ndate: \"2024-05-01T09:30:00\"\nsource_note: \"Meetings/Standup.note\"\ntags: [inbox, work]\n---\n# Standup\n- [ ] Send notes\n"
        );
        assert!(!temp.path().join("Meetings/Standup.md.tmp").exists());
    }

    #[test]
    fn test_obsidian_url_encodes_everything() {
        let temp = TempDir::new().unwrap();
        let url = ObsidianWriter.note_url("Meetings/Daily Standup", &ctx(temp.path()));
        assert_eq!(url, "obsidian://open?vault=My%20Vault&file=Meetings%2FDaily%20Standup");
    }

    #[test]
    fn test_obsidian_status_note_and_template() {
        let temp = TempDir::new().unwrap();
        let stats = StatusStats {
            run: RunStats {
                notes_found: 4,
                converted: 2,
                skipped: 1,
                tool_failed: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let path = ObsidianWriter
            .write_status_note(&stats, &ctx(temp.path()))
            .unwrap()
            .unwrap();
        assert_eq!(path, temp.path().join("Inkbridge/Status - work.md"));

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("# Inkbridge Status - work\n"));
        assert!(content.contains("## Summary\n- Notes found: 4\n- Converted this run: 2\n"));
        assert!(content.contains("## Errors\n- Recognition tool failed for 1 note(s).\n"));

        let template = temp.path().join("Inkbridge/Replacements - work.md");
        assert!(template.exists());
        assert!(ObsidianWriter.load_replacements(&ctx(temp.path())).is_empty());
    }

    #[test]
    fn test_obsidian_status_without_errors() {
        let temp = TempDir::new().unwrap();
        let path = ObsidianWriter
            .write_status_note(&StatusStats::default(), &ctx(temp.path()))
            .unwrap()
            .unwrap();
        assert!(!fs::read_to_string(path).unwrap().contains("## Errors"));
    }

    #[test]
    fn test_obsidian_loads_replacements() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("Inkbridge/Replacements - work.md");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "# Replacements\n- teh -> the\n").unwrap();

        let repl = ObsidianWriter.load_replacements(&ctx(temp.path()));
        assert_eq!(repl.get("teh").map(String::as_str), Some("the"));
    }

    #[test]
    fn test_markdown_writes_body_and_sidecar() {
        let temp = TempDir::new().unwrap();
        let writer = MarkdownWriter;

        let path = writer
            .write_note("body\n", &metadata(), Path::new("Meetings/Standup.md"), &ctx(temp.path()))
            .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "body\n");

        let sidecar = temp.path().join(".inkbridge/metadata/Meetings-Standup.md.json");
        let meta: serde_json::Value = serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();
        assert_eq!(meta["title"], "Standup");
        assert_eq!(meta["tags"][1], "work");
    }

    #[test]
    fn test_markdown_status_and_url() {
        let temp = TempDir::new().unwrap();
        let stats = StatusStats {
            source_missing: true,
            ..Default::default()
        };

        let path = MarkdownWriter
            .write_status_note(&stats, &ctx(temp.path()))
            .unwrap()
            .unwrap();
        let status: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(status["bridge_name"], "work");
        assert_eq!(status["errors"]["source_missing"], true);

        let url = MarkdownWriter.note_url("Meetings/Standup", &ctx(temp.path()));
        assert_eq!(url, format!("file://{}", temp.path().join("Meetings/Standup.md").display()));
    }

    #[test]
    fn test_markdown_replacements_template_then_load() {
        let temp = TempDir::new().unwrap();
        let c = ctx(temp.path());

        assert!(MarkdownWriter.load_replacements(&c).is_empty());
        let path = temp.path().join(".inkbridge/replacements-work.json");
        assert!(path.exists());
        assert!(MarkdownWriter.load_replacements(&c).is_empty());

        fs::write(&path, r#"{"_comment": "x", "teh": "the"}"#).unwrap();
        let repl = MarkdownWriter.load_replacements(&c);
        assert_eq!(repl.len(), 1);
        assert_eq!(repl["teh"], "the");
    }

    #[test]
    fn test_noop_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let path = NoopWriter
            .write_note("x", &metadata(), Path::new("a.md"), &ctx(temp.path()))
            .unwrap();
        assert!(!path.exists());
        assert!(NoopWriter.write_status_note(&StatusStats::default(), &ctx(temp.path())).unwrap().is_none());
    }
}
