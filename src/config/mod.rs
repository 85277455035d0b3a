#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::OnyxError;
use crate::reminder::PermissionStatus;
use crate::task::store::DEFAULT_STORAGE_KEY;

pub const CONFIG_ENV: &str = "ONYX_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub notifications: NotificationsConfig,
    pub ui: UiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.config/onyx/data".to_owned(),
            key: DEFAULT_STORAGE_KEY.to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Answer given when the app asks for notification permission.
    pub permission: PermissionStatus,
    pub poll_interval_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            permission: PermissionStatus::Granted,
            poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub icons: bool,
    pub clock_24h: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            icons: true,
            clock_24h: false,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), OnyxError> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(OnyxError::Config(
                "storage.data_dir must not be empty".to_owned(),
            ));
        }
        let key = self.storage.key.trim();
        if key.is_empty() || key.contains(['/', '\\']) || key.contains("..") {
            return Err(OnyxError::Config(format!(
                "storage.key '{}' must be a plain file name",
                self.storage.key
            )));
        }
        if self.notifications.poll_interval_secs == 0 {
            return Err(OnyxError::Config(
                "notifications.poll_interval_secs must be >= 1".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.storage.data_dir)
    }
}

/// `$ONYX_CONFIG`, else `~/.config/onyx/config.toml`; on Windows the platform
/// config dir is used unless the Unix-style file already exists.
pub fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(p) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(p));
    }
    let unix = home_dir()
        .unwrap_or_else(|| PathBuf::from("~"))
        .join(".config")
        .join("onyx")
        .join("config.toml");
    if !cfg!(windows) || unix.exists() {
        return Ok(unix);
    }
    let proj = ProjectDirs::from("com", "onyx", "onyx")
        .context("failed to determine platform config directory")?;
    Ok(proj.config_dir().join("config.toml"))
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

#[must_use]
pub fn expand_tilde(input: &str) -> String {
    match (input.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest).to_string_lossy().into_owned(),
        _ => input.to_owned(),
    }
}

/// Expands `~/` and `$VAR`/`${VAR}`, then anchors relative paths at the
/// current directory.
pub fn expand_path(input: &str) -> anyhow::Result<PathBuf> {
    let p = PathBuf::from(expand_env_vars(&expand_tilde(input)));
    if p.is_absolute() {
        return Ok(p);
    }
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(cwd.join(p))
}

fn expand_env_vars(input: &str) -> String {
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return input.to_owned();
    };
    re.replace_all(input, |caps: &regex::Captures<'_>| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_owned())
    })
    .into_owned()
}

pub fn load() -> anyhow::Result<Config> {
    load_at_path(&config_path()?)
}

pub fn load_at_path(path: &Path) -> anyhow::Result<Config> {
    let (_doc, cfg) = read_file(path)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn list_resolved_toml() -> anyhow::Result<String> {
    Ok(toml::to_string_pretty(&load()?)?)
}

pub fn get_value_string(key: &str) -> anyhow::Result<Option<String>> {
    get_value_string_at_path(&config_path()?, key)
}

pub fn set_value_string(key: &str, value: &str) -> anyhow::Result<()> {
    set_value_string_at_path(&config_path()?, key, value)
}

fn read_file(path: &Path) -> anyhow::Result<(toml_edit::DocumentMut, Config)> {
    if !path.exists() {
        return Ok((toml_edit::DocumentMut::new(), Config::default()));
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let doc = raw
        .parse::<toml_edit::DocumentMut>()
        .with_context(|| format!("failed to parse TOML in {}", path.display()))?;
    let cfg: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to deserialize TOML in {}", path.display()))?;
    Ok((doc, cfg))
}

pub fn get_value_string_at_path(path: &Path, key: &str) -> anyhow::Result<Option<String>> {
    let cfg = load_at_path(path)?;
    let mut value = serde_json::to_value(&cfg)?;
    for seg in key.split('.').filter(|s| !s.is_empty()) {
        let serde_json::Value::Object(mut map) = value else {
            return Ok(None);
        };
        let Some(next) = map.remove(seg) else {
            return Ok(None);
        };
        value = next;
    }
    Ok(Some(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        other => toml::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }))
}

/// Writes one dotted key, keeping the rest of the user's file intact.
pub fn set_value_string_at_path(path: &Path, key: &str, value: &str) -> anyhow::Result<()> {
    let (mut doc, cfg) = read_file(path)?;
    cfg.validate()?;

    let item = parse_value(key, value)?;
    let Some((table, leaf)) = key.split_once('.') else {
        return Err(OnyxError::InvalidConfigKey(key.to_owned()).into());
    };
    let root = doc.as_table_mut();
    if !root.contains_key(table) {
        let mut t = toml_edit::Table::new();
        t.set_implicit(true);
        root.insert(table, toml_edit::Item::Table(t));
    }
    let section = root[table]
        .as_table_mut()
        .ok_or_else(|| OnyxError::Config(format!("cannot set {key}: '{table}' is not a table")))?;
    section.insert(leaf, item);

    let new_raw = doc.to_string();
    let new_cfg: Config = toml::from_str(&new_raw)
        .with_context(|| format!("config update produced invalid TOML for {}", path.display()))?;
    new_cfg.validate()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, new_raw.as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum KeyType {
    Bool,
    Int,
    String,
    Enum(&'static [&'static str]),
}

fn key_type(key: &str) -> Option<KeyType> {
    Some(match key {
        "storage.data_dir" | "storage.key" => KeyType::String,
        "ui.icons" | "ui.clock_24h" => KeyType::Bool,
        "notifications.poll_interval_secs" => KeyType::Int,
        "notifications.permission" => KeyType::Enum(&["granted", "denied"]),
        _ => return None,
    })
}

fn parse_value(key: &str, value: &str) -> Result<toml_edit::Item, OnyxError> {
    let invalid = |msg: String| OnyxError::InvalidConfigValue {
        key: key.to_owned(),
        msg,
    };
    let ty = key_type(key).ok_or_else(|| OnyxError::InvalidConfigKey(key.to_owned()))?;
    let v = value.trim();
    Ok(match ty {
        KeyType::String => toml_edit::value(value),
        KeyType::Bool => match v {
            "true" => toml_edit::value(true),
            "false" => toml_edit::value(false),
            other => return Err(invalid(format!("expected true|false, got '{other}'"))),
        },
        KeyType::Int => toml_edit::value(
            v.parse::<i64>()
                .map_err(|e| invalid(format!("expected integer, got '{v}': {e}")))?,
        ),
        KeyType::Enum(allowed) => {
            if !allowed.contains(&v) {
                return Err(invalid(format!("must be one of: {}", allowed.join(", "))));
            }
            toml_edit::value(v)
        }
    })
}
