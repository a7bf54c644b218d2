// Note sources: where raw `.note` captures are discovered

use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

const NOTE_EXTENSION: &str = "note";

#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub bridge_name: &'a str,
    /// The configured source folder for this bridge.
    pub source_path: &'a Path,
}

/// A discovered note file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFile {
    pub path: PathBuf,
    /// Path relative to the bridge's source root.
    pub relative_path: PathBuf,
    pub modified: SystemTime,
}

impl NoteFile {
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub trait NoteSource {
    fn name(&self) -> &str;

    /// Source root for the bridge, or `None` when it does not exist.
    fn root_path(&self, ctx: &SourceContext<'_>) -> Option<PathBuf>;

    /// Every `.note` file under the root, sorted by path. Missing roots yield nothing.
    fn list_notes(&self, ctx: &SourceContext<'_>) -> Vec<NoteFile>;
}

/// A folder on the local filesystem.
#[derive(Debug, Default)]
pub struct LocalSource;

impl NoteSource for LocalSource {
    fn name(&self) -> &str {
        "local"
    }

    fn root_path(&self, ctx: &SourceContext<'_>) -> Option<PathBuf> {
        ctx.source_path.is_dir().then(|| ctx.source_path.to_path_buf())
    }

    fn list_notes(&self, ctx: &SourceContext<'_>) -> Vec<NoteFile> {
        let Some(root) = self.root_path(ctx) else {
            warn!(bridge = ctx.bridge_name, path = %ctx.source_path.display(), "Source folder does not exist");
            return Vec::new();
        };

        let mut notes: Vec<NoteFile> = WalkDir::new(&root)
            .follow_links(true)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_type().is_file() && e.path().extension().and_then(|x| x.to_str()) == Some(NOTE_EXTENSION)
            })
            .filter_map(|entry| {
                let path = entry.path().to_path_buf();
                let relative_path = path.strip_prefix(&root).ok()?.to_path_buf();
                let modified = entry.metadata().ok()?.modified().ok()?;
                Some(NoteFile {
                    path,
                    relative_path,
                    modified,
                })
            })
            .collect();
        notes.sort_by(|a, b| a.path.cmp(&b.path));

        debug!(bridge = ctx.bridge_name, count = notes.len(), "Listed notes");
        notes
    }
}

/// A folder kept in sync by the Dropbox desktop client; reads it locally.
#[derive(Debug, Default)]
pub struct DropboxSource {
    local: LocalSource,
}

impl NoteSource for DropboxSource {
    fn name(&self) -> &str {
        "dropbox"
    }

    fn root_path(&self, ctx: &SourceContext<'_>) -> Option<PathBuf> {
        self.local.root_path(ctx)
    }

    fn list_notes(&self, ctx: &SourceContext<'_>) -> Vec<NoteFile> {
        self.local.list_notes(ctx)
    }
}

#[derive(Debug, Default)]
pub struct NoopSource;

impl NoteSource for NoopSource {
    fn name(&self) -> &str {
        "noop"
    }

    fn root_path(&self, _: &SourceContext<'_>) -> Option<PathBuf> {
        None
    }

    fn list_notes(&self, _: &SourceContext<'_>) -> Vec<NoteFile> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn ctx(path: &Path) -> SourceContext<'_> {
        SourceContext {
            bridge_name: "work",
            source_path: path,
        }
    }

    #[test]
    fn test_lists_notes_recursively_sorted() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("b/deeper")).unwrap();
        fs::write(temp.path().join("b/deeper/z.note"), "x").unwrap();
        fs::write(temp.path().join("a.note"), "x").unwrap();
        fs::write(temp.path().join("b/readme.txt"), "x").unwrap();
        fs::write(temp.path().join("b/m.note"), "x").unwrap();

        let notes = LocalSource.list_notes(&ctx(temp.path()));
        let rel: Vec<PathBuf> = notes.iter().map(|n| n.relative_path.clone()).collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a.note"),
                PathBuf::from("b/deeper/z.note"),
                PathBuf::from("b/m.note"),
            ]
        );
        assert_eq!(notes[0].stem(), "a");
    }

    #[test]
    fn test_missing_root() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");

        assert!(LocalSource.root_path(&ctx(&missing)).is_none());
        assert!(LocalSource.list_notes(&ctx(&missing)).is_empty());
    }

    #[test]
    fn test_dropbox_delegates_to_local() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.note"), "x").unwrap();

        let dropbox = DropboxSource::default();
        assert_eq!(dropbox.root_path(&ctx(temp.path())), Some(temp.path().to_path_buf()));
        assert_eq!(dropbox.list_notes(&ctx(temp.path())).len(), 1);
    }

    #[test]
    fn test_noop_finds_nothing() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.note"), "x").unwrap();
        assert!(NoopSource.list_notes(&ctx(temp.path())).is_empty());
    }
}
