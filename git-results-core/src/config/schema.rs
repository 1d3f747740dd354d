use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::tagpath::TagPath;

pub const CONFIG_FILE: &str = "git-results.cfg";
pub const BUILD_SCRIPT: &str = "git-results-build";
pub const RUN_SCRIPT: &str = "git-results-run";
pub const PROGRESS_SCRIPT: &str = "git-results-progress";

pub const DEFAULT_PROGRESS_DELAY: f64 = 300.0;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// One `/`-keyed scope table from a `git-results.cfg`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SectionSchema {
    pub build: Option<String>,
    pub run: Option<String>,
    pub progress: Option<String>,
    pub follow: Option<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default, rename = "ignoreExt")]
    pub ignore_ext: Vec<String>,
    #[serde(default)]
    pub vars: HashMap<String, String>,
    #[serde(rename = "progressDelay")]
    pub progress_delay: Option<f64>,
    #[serde(rename = "maxRetries")]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Repo-relative directory holding this file; empty at the repo root.
    pub dir: String,
    pub vars: HashMap<String, String>,
    /// Scope tables as path components, shallowest key first.
    pub sections: Vec<(Vec<String>, SectionSchema)>,
}

/// Everything the lifecycle needs to know about one tag path, after config
/// discovery, merging, and variable expansion.
#[derive(Debug, Clone)]
pub struct ResolvedRun {
    pub build: Option<String>,
    pub run: String,
    pub progress: Option<String>,
    pub follow: Option<String>,
    pub ignore: Vec<String>,
    pub ignore_ext: Vec<String>,
    pub progress_delay: f64,
    pub max_retries: u32,
    /// Repo-relative directory of the governing config file ("" = root).
    /// Also the run cwd within the snapshot tree.
    pub config_dir: String,
    /// Repo-relative results root: config dir + the first tag segment
    /// below it.
    pub results_root: String,
}
