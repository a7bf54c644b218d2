// Configuration: YAML file, environment overrides, bridge validation

use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::recognizer::{DEFAULT_RETRIES, DEFAULT_TOOL};

pub const ENV_CONFIG: &str = "INKBRIDGE_CONFIG";
pub const DEFAULT_IMAGES_SUBDIR: &str = "Inkbridge/Assets";
pub const DEFAULT_TODOIST_URL: &str = "https://api.todoist.com/rest/v2";

/// When to send bridge notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum NotifyMode {
    All,
    #[default]
    Errors,
    None,
}

impl NotifyMode {
    /// Lenient parse: surrounding quotes and case are ignored, anything
    /// unrecognized means `Errors`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().trim_matches(|c| c == '\'' || c == '"').to_ascii_lowercase().as_str() {
            "all" => NotifyMode::All,
            "none" => NotifyMode::None,
            "errors" => NotifyMode::Errors,
            other => {
                warn!(value = other, "Unknown notify mode, using 'errors'");
                NotifyMode::Errors
            }
        }
    }

    pub fn should_notify(&self, errorish: bool) -> bool {
        match self {
            NotifyMode::All => true,
            NotifyMode::Errors => errorish,
            NotifyMode::None => false,
        }
    }
}

impl From<String> for NotifyMode {
    fn from(raw: String) -> Self {
        NotifyMode::parse_lenient(&raw)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub command: String,
    pub retries: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_TOOL.to_string(),
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Adapter names, resolved through the provider registry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub todo: String,
    pub notes: String,
    pub source: String,
    pub notifiers: Vec<String>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            todo: "noop".to_string(),
            notes: "obsidian".to_string(),
            source: "local".to_string(),
            notifiers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TodoistConfig {
    pub api_token: Option<String>,
    pub base_url: String,
}

impl Default for TodoistConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            base_url: DEFAULT_TODOIST_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub topic: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            topic: None,
            timeout_secs: 5,
        }
    }
}

/// A bridge entry as written in the file; validated into `Bridge`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeEntry {
    pub name: Option<String>,
    pub enabled: bool,
    pub source_subdir: Option<String>,
    pub source_path: Option<String>,
    pub vault_path: Option<String>,
    pub extra_tags: Vec<String>,
    pub aggressive_cleanup: bool,
    pub export_images: bool,
    pub images_subdir: Option<String>,
}

impl Default for BridgeEntry {
    fn default() -> Self {
        Self {
            name: None,
            enabled: true,
            source_subdir: None,
            source_path: None,
            vault_path: None,
            extra_tags: Vec::new(),
            aggressive_cleanup: false,
            export_images: false,
            images_subdir: None,
        }
    }
}

/// The config file as parsed, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub source_root: Option<String>,
    pub default_tags: Vec<String>,
    pub ledger_path: Option<String>,
    pub log_path: Option<String>,
    pub verbose: bool,
    pub notify_mode: NotifyMode,
    pub healthcheck_url: Option<String>,
    pub tool: ToolConfig,
    pub providers: ProvidersConfig,
    pub todoist: TodoistConfig,
    pub webhook: WebhookConfig,
    pub bridges: Vec<BridgeEntry>,
}

/// One source folder -> vault pairing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bridge {
    pub name: String,
    pub enabled: bool,
    pub source_path: PathBuf,
    pub vault_path: PathBuf,
    pub extra_tags: Vec<String>,
    pub aggressive_cleanup: bool,
    pub export_images: bool,
    pub images_subdir: String,
}

impl Bridge {
    /// The vault folder name, used for labels and URLs.
    pub fn vault_name(&self) -> String {
        self.vault_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.vault_path.display().to_string())
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub default_tags: Vec<String>,
    pub ledger_path: PathBuf,
    pub log_path: PathBuf,
    pub verbose: bool,
    pub notify_mode: NotifyMode,
    pub healthcheck_url: Option<String>,
    pub tool: ToolConfig,
    pub providers: ProvidersConfig,
    pub todoist: TodoistConfig,
    pub webhook: WebhookConfig,
    pub bridges: Vec<Bridge>,
}

impl Config {
    /// Load from `explicit`, else `$INKBRIDGE_CONFIG`, else the default path.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match std::env::var(ENV_CONFIG) {
                Ok(p) if !p.trim().is_empty() => expand_tilde(p.trim()),
                _ => default_config_path()?,
            },
        };
        Self::load_from(&path, |key| std::env::var(key).ok())
    }

    /// Load from a file with a custom environment lookup.
    pub fn load_from<F>(path: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        debug!(path = %path.display(), "Loading config");
        if !path.exists() {
            return Err(eyre!("Config file not found: {}", path.display()));
        }

        let contents = fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_yaml(&contents, env).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml<F>(contents: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut file: ConfigFile = serde_yaml::from_str(contents).context("Failed to parse config YAML")?;
        file.apply_env(env);
        file.validate()
    }
}

impl ConfigFile {
    /// Override secrets and switches from `INKBRIDGE_*` variables.
    pub fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(token) = get("INKBRIDGE_TODOIST_API_TOKEN") {
            self.todoist.api_token = Some(token);
        }
        if let Some(url) = get("INKBRIDGE_WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }
        if let Some(url) = get("INKBRIDGE_HEALTHCHECK_URL") {
            self.healthcheck_url = Some(url);
        }
        if let Some(verbose) = get("INKBRIDGE_VERBOSE") {
            self.verbose = matches!(verbose.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(mode) = get("INKBRIDGE_NOTIFY_MODE") {
            self.notify_mode = NotifyMode::parse_lenient(&mode);
        }
        if let Some(name) = get("INKBRIDGE_TODO_PROVIDER") {
            self.providers.todo = name;
        }
        if let Some(name) = get("INKBRIDGE_NOTE_PROVIDER") {
            self.providers.notes = name;
        }
        if let Some(root) = get("INKBRIDGE_SOURCE_ROOT") {
            self.source_root = Some(root);
        }
    }

    /// Resolve paths and drop incomplete bridges.
    pub fn validate(self) -> Result<Config> {
        let source_root = self.source_root.as_deref().map(expand_tilde);
        let mut bridges = Vec::new();

        for (idx, entry) in self.bridges.into_iter().enumerate() {
            let Some(name) = entry.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) else {
                warn!(index = idx, "Skipping bridge without a name");
                continue;
            };

            let source_path = match (&entry.source_path, &entry.source_subdir, &source_root) {
                (Some(explicit), _, _) => expand_tilde(explicit),
                (None, Some(subdir), Some(root)) => root.join(subdir),
                _ => {
                    warn!(bridge = name, "Skipping bridge without a source location");
                    continue;
                }
            };

            let Some(vault) = entry.vault_path.as_deref().filter(|v| !v.trim().is_empty()) else {
                warn!(bridge = name, "Skipping bridge without a vault path");
                continue;
            };

            bridges.push(Bridge {
                name: name.to_string(),
                enabled: entry.enabled,
                source_path,
                vault_path: expand_tilde(vault),
                extra_tags: entry.extra_tags,
                aggressive_cleanup: entry.aggressive_cleanup,
                export_images: entry.export_images,
                images_subdir: entry
                    .images_subdir
                    .unwrap_or_else(|| DEFAULT_IMAGES_SUBDIR.to_string()),
            });
        }

        if bridges.is_empty() {
            return Err(eyre!("No valid bridges configured"));
        }

        let mut notifiers = self.providers.notifiers;
        if notifiers.is_empty() && self.webhook.url.is_some() {
            notifiers.push("webhook".to_string());
        }

        Ok(Config {
            default_tags: self.default_tags,
            ledger_path: self
                .ledger_path
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(|| home_file(".inkbridge.db")),
            log_path: self
                .log_path
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(|| home_file(".inkbridge.log")),
            verbose: self.verbose,
            notify_mode: self.notify_mode,
            healthcheck_url: self.healthcheck_url,
            tool: self.tool,
            providers: ProvidersConfig {
                notifiers,
                ..self.providers
            },
            todoist: self.todoist,
            webhook: self.webhook,
            bridges,
        })
    }
}

/// `<config dir>/inkbridge/config.yaml`
pub fn default_config_path() -> Result<PathBuf> {
    let dir = dirs::config_dir().ok_or_else(|| eyre!("Could not determine config directory"))?;
    Ok(dir.join("inkbridge").join("config.yaml"))
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }
    match (raw.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

fn home_file(name: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    const MINIMAL: &str = r#"
source_root: /data/notes
bridges:
  - name: work
    source_subdir: Work
    vault_path: /vaults/Work
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL, no_env).unwrap();

        assert_eq!(config.notify_mode, NotifyMode::Errors);
        assert_eq!(config.tool.command, "supernote-tool");
        assert_eq!(config.tool.retries, 2);
        assert_eq!(config.providers.todo, "noop");
        assert_eq!(config.providers.notes, "obsidian");
        assert_eq!(config.providers.source, "local");
        assert!(config.providers.notifiers.is_empty());
        assert_eq!(config.todoist.base_url, DEFAULT_TODOIST_URL);
        assert_eq!(config.webhook.timeout_secs, 5);
        assert!(config.ledger_path.ends_with(".inkbridge.db"));

        let bridge = &config.bridges[0];
        assert_eq!(bridge.name, "work");
        assert!(bridge.enabled);
        assert_eq!(bridge.source_path, PathBuf::from("/data/notes/Work"));
        assert_eq!(bridge.vault_name(), "Work");
        assert_eq!(bridge.images_subdir, DEFAULT_IMAGES_SUBDIR);
    }

    #[test]
    fn test_incomplete_bridges_skipped() {
        let yaml = r#"
bridges:
  - source_path: /a
    vault_path: /v
  - name: no-source
    vault_path: /v
  - name: subdir-without-root
    source_subdir: X
    vault_path: /v
  - name: no-vault
    source_path: /a
  - name: ok
    source_path: /a/b
    vault_path: /vaults/Personal
    enabled: false
    extra_tags: [personal]
"#;
        let config = Config::from_yaml(yaml, no_env).unwrap();
        assert_eq!(config.bridges.len(), 1);
        assert_eq!(config.bridges[0].name, "ok");
        assert!(!config.bridges[0].enabled);
        assert_eq!(config.bridges[0].extra_tags, vec!["personal"]);
    }

    #[test]
    fn test_no_valid_bridges_is_error() {
        assert!(Config::from_yaml("bridges: []\n", no_env).is_err());
        assert!(Config::from_yaml("verbose: true\n", no_env).is_err());
    }

    #[test]
    fn test_notify_mode_parsing() {
        assert_eq!(NotifyMode::parse_lenient("ALL"), NotifyMode::All);
        assert_eq!(NotifyMode::parse_lenient("'none'"), NotifyMode::None);
        assert_eq!(NotifyMode::parse_lenient("sometimes"), NotifyMode::Errors);

        let yaml = format!("notify_mode: loud\n{}", MINIMAL);
        assert_eq!(Config::from_yaml(&yaml, no_env).unwrap().notify_mode, NotifyMode::Errors);
    }

    #[test]
    fn test_should_notify() {
        assert!(NotifyMode::All.should_notify(false));
        assert!(NotifyMode::Errors.should_notify(true));
        assert!(!NotifyMode::Errors.should_notify(false));
        assert!(!NotifyMode::None.should_notify(true));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("INKBRIDGE_TODOIST_API_TOKEN", "secret"),
            ("INKBRIDGE_WEBHOOK_URL", "https://hooks.example.com/x"),
            ("INKBRIDGE_NOTIFY_MODE", "all"),
            ("INKBRIDGE_TODO_PROVIDER", "todoist"),
            ("INKBRIDGE_SOURCE_ROOT", "/mnt/sync"),
            ("INKBRIDGE_VERBOSE", "1"),
            ("INKBRIDGE_HEALTHCHECK_URL", "   "),
        ]
        .into_iter()
        .collect();

        let config = Config::from_yaml(MINIMAL, |k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(config.todoist.api_token.as_deref(), Some("secret"));
        assert_eq!(config.notify_mode, NotifyMode::All);
        assert_eq!(config.providers.todo, "todoist");
        assert!(config.verbose);
        assert!(config.healthcheck_url.is_none());
        assert_eq!(config.bridges[0].source_path, PathBuf::from("/mnt/sync/Work"));
        assert_eq!(config.providers.notifiers, vec!["webhook"]);
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, MINIMAL).unwrap();

        let config = Config::load_from(&path, no_env).unwrap();
        assert_eq!(config.bridges.len(), 1);

        assert!(Config::load_from(&temp.path().join("missing.yaml"), no_env).is_err());
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/notes"), home.join("notes"));
        }
    }
}
