#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::Context as _;

use crate::error::OnyxError;

/// String-keyed durable storage holding one serialized value per key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;
    fn remove(&self, key: &str) -> anyhow::Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for &S {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        (**self).remove(key)
    }
}

/// Stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn ensure_dir(&self) -> anyhow::Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create data dir {}", self.dir.display()))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf, OnyxError> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let path = self.key_path(key)?;
        match std::fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(OnyxError::IoPath { path, source }.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let path = self.key_path(key)?;
        self.ensure_dir()?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.key_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(OnyxError::IoPath { path, source }.into()),
        }
    }
}

/// Process-local storage; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> T,
    ) -> anyhow::Result<T> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| OnyxError::Other("memory store lock poisoned".to_owned()))?;
        Ok(f(&mut entries))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        validate_key(key)?;
        self.with_entries(|e| e.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        validate_key(key)?;
        self.with_entries(|e| {
            e.insert(key.to_owned(), value.to_owned());
        })
    }

    fn remove(&self, key: &str) -> anyhow::Result<()> {
        validate_key(key)?;
        self.with_entries(|e| {
            e.remove(key);
        })
    }
}

fn validate_key(key: &str) -> Result<(), OnyxError> {
    let invalid = |msg: &str| OnyxError::InvalidStorageKey {
        key: key.to_owned(),
        msg: msg.to_owned(),
    };
    if key.trim().is_empty() {
        return Err(invalid("must not be empty"));
    }
    if key.contains('/') || key.contains('\\') {
        return Err(invalid("must not contain path separators"));
    }
    if key.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    Ok(())
}
