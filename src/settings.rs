use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

const DEBUG_PROBE_INTERVAL_SECS: u64 = 2;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub api_base_url: String,
    pub realtime_url: String,
    /// Polled to decide whether the backend is reachable.
    pub health_url: String,
    pub probe_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub session_token: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080/api".into(),
            realtime_url: "ws://localhost:8080/realtime".into(),
            health_url: "http://localhost:8080/health".into(),
            probe_interval_secs: 15,
            request_timeout_secs: 20,
            session_token: None,
        }
    }
}

impl Settings {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("FIELDCHECK_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("FIELDCHECK_REALTIME_URL") {
            self.realtime_url = url;
        }
        if let Some(url) = lookup("FIELDCHECK_HEALTH_URL") {
            self.health_url = url;
        }
        if let Some(token) = lookup("FIELDCHECK_TOKEN") {
            self.session_token = Some(token);
        }
        if is_truthy(lookup("FIELDCHECK_DEBUG")) {
            self.probe_interval_secs = DEBUG_PROBE_INTERVAL_SECS;
        }
    }
}

fn is_truthy(value: Option<String>) -> bool {
    value
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Directory holding the queue database and settings file.
/// `FIELDCHECK_DATA_DIR` wins over the platform data directory.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os("FIELDCHECK_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("fieldcheck"))
        .context("Failed to resolve a data directory for fieldcheck")
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<Settings>,
}

impl SettingsStore {
    /// Loads settings from `path`; a missing or unreadable file yields defaults.
    /// Environment overrides apply on top and are never written back.
    pub fn new(path: PathBuf) -> Result<Self> {
        Self::load(path, |key| {
            std::env::var(key).ok().filter(|value| !value.trim().is_empty())
        })
    }

    fn load<F>(path: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    log::warn!(
                        "Ignoring unreadable settings at {}: {err}",
                        path.display()
                    );
                    Settings::default()
                }
            }
        } else {
            Settings::default()
        };
        data.apply_overrides(lookup);

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Settings {
        self.read().clone()
    }

    pub fn update(&self, settings: Settings) -> Result<()> {
        let mut guard = self.write();
        *guard = settings;
        self.persist(&guard)
    }

    fn read(&self) -> RwLockReadGuard<'_, Settings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Settings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, data: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
