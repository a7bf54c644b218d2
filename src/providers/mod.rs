// Capability adapters and the name -> constructor registry

pub mod notes;
pub mod notify;
pub mod source;
pub mod todo;

use tracing::{debug, warn};

use crate::config::Config;

pub use notes::{MarkdownWriter, NoopWriter, NoteContext, NoteMetadata, NoteWriter, ObsidianWriter, StatusStats};
pub use notify::{NoopNotifier, NotificationPayload, Notifier, NotifyContext, WebhookNotifier, format_message};
pub use source::{DropboxSource, LocalSource, NoopSource, NoteFile, NoteSource, SourceContext};
pub use todo::{NoopTaskProvider, TaskProvider, TodoContext, TodoistProvider};

type Ctor<T> = fn(&Config) -> Box<T>;

fn noop_tasks(_: &Config) -> Box<dyn TaskProvider> {
    Box::new(NoopTaskProvider)
}

fn todoist(config: &Config) -> Box<dyn TaskProvider> {
    Box::new(TodoistProvider::new(&config.todoist))
}

fn obsidian(_: &Config) -> Box<dyn NoteWriter> {
    Box::new(ObsidianWriter)
}

fn markdown(_: &Config) -> Box<dyn NoteWriter> {
    Box::new(MarkdownWriter)
}

fn noop_notes(_: &Config) -> Box<dyn NoteWriter> {
    Box::new(NoopWriter)
}

fn webhook(config: &Config) -> Box<dyn Notifier> {
    Box::new(WebhookNotifier::new(&config.webhook))
}

fn noop_notifier(_: &Config) -> Box<dyn Notifier> {
    Box::new(NoopNotifier)
}

fn local(_: &Config) -> Box<dyn NoteSource> {
    Box::new(LocalSource)
}

fn dropbox(_: &Config) -> Box<dyn NoteSource> {
    Box::new(DropboxSource::default())
}

fn noop_source(_: &Config) -> Box<dyn NoteSource> {
    Box::new(NoopSource)
}

const TASK_PROVIDERS: &[(&str, Ctor<dyn TaskProvider>)] = &[("noop", noop_tasks), ("todoist", todoist)];
const NOTE_WRITERS: &[(&str, Ctor<dyn NoteWriter>)] =
    &[("obsidian", obsidian), ("markdown", markdown), ("noop", noop_notes)];
const NOTIFIERS: &[(&str, Ctor<dyn Notifier>)] = &[("webhook", webhook), ("noop", noop_notifier)];
const NOTE_SOURCES: &[(&str, Ctor<dyn NoteSource>)] = &[("local", local), ("dropbox", dropbox), ("noop", noop_source)];

fn lookup<T: ?Sized>(
    table: &[(&str, Ctor<T>)],
    kind: &str,
    name: &str,
    fallback: (&str, Ctor<T>),
    config: &Config,
) -> Box<T> {
    let key = name.trim().to_ascii_lowercase();
    match table.iter().find(|(n, _)| *n == key) {
        Some((_, ctor)) => {
            debug!(kind, name = %key, "Resolved provider");
            ctor(config)
        }
        None => {
            warn!(kind, name = %name, fallback = fallback.0, "Unknown provider name, using fallback");
            (fallback.1)(config)
        }
    }
}

pub fn task_provider(name: &str, config: &Config) -> Box<dyn TaskProvider> {
    lookup(TASK_PROVIDERS, "todo", name, ("noop", noop_tasks), config)
}

pub fn note_writer(name: &str, config: &Config) -> Box<dyn NoteWriter> {
    lookup(NOTE_WRITERS, "notes", name, ("obsidian", obsidian), config)
}

pub fn notifier(name: &str, config: &Config) -> Box<dyn Notifier> {
    lookup(NOTIFIERS, "notifier", name, ("noop", noop_notifier), config)
}

pub fn note_source(name: &str, config: &Config) -> Box<dyn NoteSource> {
    lookup(NOTE_SOURCES, "source", name, ("dropbox", dropbox), config)
}

/// Every capability a run needs, resolved once at startup.
pub struct Adapters {
    pub todo: Box<dyn TaskProvider>,
    pub notes: Box<dyn NoteWriter>,
    pub source: Box<dyn NoteSource>,
    pub notifiers: Vec<Box<dyn Notifier>>,
}

impl Adapters {
    pub fn from_config(config: &Config) -> Self {
        let providers = &config.providers;
        Self {
            todo: task_provider(&providers.todo, config),
            notes: note_writer(&providers.notes, config),
            source: note_source(&providers.source, config),
            notifiers: providers
                .notifiers
                .iter()
                .filter(|n| !n.trim().is_empty())
                .map(|n| notifier(n, config))
                .collect(),
        }
    }
}
