//! Per-run persistent records under `~/.gitresults/<resumeKey>/`. Each
//! record is a directory holding `settings` (the parameters a continuation
//! needs), `build-state` (phase, retry counter, progress observations), and
//! `staging` (a pointer to the active staging directory).

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Error, Result};

pub const STORE_DIR: &str = ".gitresults";
pub const SETTINGS_FILE: &str = "settings";
pub const BUILD_STATE_FILE: &str = "build-state";
pub const STAGING_FILE: &str = "staging";
pub const QUARANTINE_PREFIX: &str = "bad_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtraFile {
    pub source: PathBuf,
    pub name: String,
}

/// Everything a continuation process needs to pick a run back up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub repo_path: PathBuf,
    /// Repo-relative experiment path, e.g. `results/test/run`.
    pub experiment: String,
    pub instance: u32,
    pub results_root: String,
    pub config_dir: String,
    pub message: String,
    pub build: Option<String>,
    pub run: String,
    pub progress: Option<String>,
    pub follow: Option<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub ignore_ext: Vec<String>,
    #[serde(default)]
    pub extra_files: Vec<ExtraFile>,
    /// The snapshot commit the tag will point at.
    pub commit: String,
    /// Pre-auto-commit HEAD; present only when a snapshot commit must be
    /// unwound on rollback.
    #[serde(default)]
    pub rollback_head: Option<String>,
    pub in_place: bool,
    pub retry: bool,
    pub max_retries: u32,
    pub progress_delay: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Run,
    Publish,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressSample {
    pub metric: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildState {
    pub phase: Phase,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub last_progress: Option<ProgressSample>,
    #[serde(default)]
    pub last_attempt: Option<DateTime<Utc>>,
    /// In phase `publish`: whether the outcome being replayed was a failure.
    #[serde(default)]
    pub outcome_failed: bool,
}

impl BuildState {
    pub fn fresh() -> Self {
        BuildState {
            phase: Phase::Build,
            retries: 0,
            last_progress: None,
            last_attempt: None,
            outcome_failed: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StateRecord {
    pub key: String,
    pub settings: RunSettings,
    pub staging: PathBuf,
}

pub struct StateStore {
    root: PathBuf,
}

fn user_home_dir() -> Option<PathBuf> {
    if let Some(home) = env::var_os("HOME") {
        if !home.is_empty() {
            return Some(PathBuf::from(home));
        }
    }
    None
}

impl StateStore {
    /// The user-wide store at `~/.gitresults`.
    pub fn open_default() -> Result<Self> {
        let home = user_home_dir()
            .ok_or_else(|| Error::Invalid("cannot locate the state store: HOME is unset".into()))?;
        Ok(StateStore::at(home.join(STORE_DIR)))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        StateStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_dir(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    pub fn settings_path(&self, key: &str) -> PathBuf {
        self.record_dir(key).join(SETTINGS_FILE)
    }

    /// Opaque resume key, optionally prefixed (test fixtures pass `rtest`).
    pub fn generate_key(&self, prefix: Option<&str>) -> String {
        format!("{}{}", prefix.unwrap_or(""), Uuid::new_v4().simple())
    }

    pub fn create(
        &self,
        key: &str,
        settings: &RunSettings,
        state: &BuildState,
        staging: &Path,
    ) -> Result<()> {
        let dir = self.record_dir(key);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(SETTINGS_FILE), serde_json::to_string_pretty(settings)?)?;
        fs::write(dir.join(BUILD_STATE_FILE), serde_json::to_string_pretty(state)?)?;
        fs::write(dir.join(STAGING_FILE), staging.to_string_lossy().as_bytes())?;
        Ok(())
    }

    /// Settings + staging pointer. A readable record directory whose
    /// `settings` cannot be parsed is `Corrupt`.
    pub fn load(&self, key: &str) -> Result<StateRecord> {
        let dir = self.record_dir(key);
        let raw = fs::read_to_string(dir.join(SETTINGS_FILE))?;
        let settings: RunSettings = serde_json::from_str(&raw)
            .map_err(|err| Error::Corrupt(format!("{key}/{SETTINGS_FILE}: {err}")))?;
        let staging = PathBuf::from(fs::read_to_string(dir.join(STAGING_FILE))?.trim());
        Ok(StateRecord {
            key: key.to_string(),
            settings,
            staging,
        })
    }

    pub fn load_build_state(&self, key: &str) -> Result<BuildState> {
        let raw = fs::read_to_string(self.record_dir(key).join(BUILD_STATE_FILE))?;
        serde_json::from_str(&raw)
            .map_err(|err| Error::Corrupt(format!("{key}/{BUILD_STATE_FILE}: {err}")))
    }

    pub fn save_build_state(&self, key: &str, state: &BuildState) -> Result<()> {
        fs::write(
            self.record_dir(key).join(BUILD_STATE_FILE),
            serde_json::to_string_pretty(state)?,
        )?;
        Ok(())
    }

    /// Repoint the staging file after the staging directory moves (manual
    /// retry renames it into the experiment).
    pub fn set_staging(&self, key: &str, staging: &Path) -> Result<()> {
        fs::write(
            self.record_dir(key).join(STAGING_FILE),
            staging.to_string_lossy().as_bytes(),
        )?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let dir = self.record_dir(key);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if self.root.is_dir() {
            for entry in fs::read_dir(&self.root)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    keys.push(entry.file_name().to_string_lossy().into_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// Rename a record the Supervisor must never retry again.
    pub fn quarantine(&self, key: &str) -> Result<()> {
        let from = self.record_dir(key);
        let to = self.root.join(format!("{QUARANTINE_PREFIX}{key}"));
        if to.exists() {
            fs::remove_dir_all(&to)?;
        }
        fs::rename(from, to)?;
        Ok(())
    }

    /// Remove records whose keys carry the given prefix (test fixtures).
    pub fn purge_prefix(&self, prefix: &str) -> Result<()> {
        for key in self.list()? {
            if key.starts_with(prefix)
                || key
                    .strip_prefix(QUARANTINE_PREFIX)
                    .is_some_and(|rest| rest.starts_with(prefix))
            {
                fs::remove_dir_all(self.record_dir(&key))?;
            }
        }
        Ok(())
    }
}
