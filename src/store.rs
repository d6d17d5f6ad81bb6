//! Persistence of host records

use crate::models::Host;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const RECORD_FILE: &str = "config.json";

/// Named host records that survive across invocations
pub trait HostStore {
    fn exists(&self, name: &str) -> Result<bool>;

    /// Fails with [`Error::HostNotFound`] when there is no record
    fn load(&self, name: &str) -> Result<Host>;

    fn save(&self, host: &Host) -> Result<()>;

    fn remove(&self, name: &str) -> Result<()>;

    fn list(&self) -> Result<Vec<String>>;
}

/// One JSON record per machine under `<home>/machines/<name>/`
pub struct FileHostStore {
    root: PathBuf,
}

impl FileHostStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `<home>/machines`
    pub fn in_home(home: &Path) -> Self {
        Self::new(home.join("machines"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn machine_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.machine_dir(name).join(RECORD_FILE)
    }
}

impl HostStore for FileHostStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.record_path(name).is_file())
    }

    fn load(&self, name: &str) -> Result<Host> {
        let data = match std::fs::read(self.record_path(name)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::HostNotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    fn save(&self, host: &Host) -> Result<()> {
        let dir = self.machine_dir(&host.name);
        std::fs::create_dir_all(&dir)?;

        // Write then rename so a crash never leaves a torn record
        let tmp = dir.join(format!(".{}.{}", RECORD_FILE, uuid::Uuid::new_v4()));
        std::fs::write(&tmp, serde_json::to_vec_pretty(host)?)?;
        std::fs::rename(&tmp, self.record_path(&host.name))?;

        tracing::debug!(name = %host.name, state = %host.state, "Saved host record");
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let dir = self.machine_dir(name);
        if !dir.exists() {
            return Err(Error::HostNotFound(name.to_string()));
        }
        std::fs::remove_dir_all(dir)?;
        tracing::debug!(name, "Removed host record");
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.path().join(RECORD_FILE).is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests and embedding
#[derive(Default)]
pub struct MemoryHostStore {
    hosts: RwLock<HashMap<String, Host>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HostStore for MemoryHostStore {
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.hosts.read().contains_key(name))
    }

    fn load(&self, name: &str) -> Result<Host> {
        self.hosts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::HostNotFound(name.to_string()))
    }

    fn save(&self, host: &Host) -> Result<()> {
        self.hosts.write().insert(host.name.clone(), host.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.hosts
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::HostNotFound(name.to_string()))
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.hosts.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
