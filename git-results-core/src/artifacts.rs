//! Staging, artifact collection, and the publish step.
//!
//! A staging directory lives under `<resultsRoot>/.tmp/<key>/` and holds the
//! harness files (`stdout`, `stderr`, `git-results-message`, the retry key,
//! the post-build baseline) plus, outside in-place mode, a `tree/` copy of
//! the working tree that build and run execute in. Artifacts are the files
//! under the run cwd that are new relative to the post-build baseline.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};

use crate::errors::Result;
use crate::ignore_rules::IgnoreRules;
use crate::ports::Filesystem;
use crate::vcs;

pub const TMP_DIR: &str = ".tmp";
pub const TREE_DIR: &str = "tree";
pub const DATED_DIR: &str = "dated";
pub const LATEST_DIR: &str = "latest";
pub const STDOUT_FILE: &str = "stdout";
pub const STDERR_FILE: &str = "stderr";
pub const MESSAGE_FILE: &str = "git-results-message";
pub const RETRY_KEY_FILE: &str = "git-results-retry-key";
pub const BASELINE_FILE: &str = "git-results-baseline";
pub const UNSTAGED_DIR: &str = "git-results-tmp";

pub fn lexists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Fresh scratch directory under `<resultsRoot>/.tmp/`, named by the
/// resume key so an operator can match staging areas to state records.
pub fn new_staging(fs: &dyn Filesystem, results_root_abs: &Path, key: &str) -> Result<PathBuf> {
    let staging = results_root_abs.join(TMP_DIR).join(key);
    fs.create_dir_all(&staging)?;
    Ok(staging)
}

/// Copy the working tree into `<staging>/tree`, skipping `.git` and
/// everything git ignores (the results roots are in `.gitignore` by the
/// time this runs). Symlinks are recreated as symlinks so relative links
/// inside the tree keep resolving.
pub fn seed_tree(fs: &dyn Filesystem, repo_root: &Path, staging: &Path) -> Result<PathBuf> {
    let tree = staging.join(TREE_DIR);
    fs.create_dir_all(&tree)?;
    copy_level(fs, repo_root, &tree, repo_root, "")?;
    Ok(tree)
}

fn copy_level(
    fs: &dyn Filesystem,
    src: &Path,
    dst: &Path,
    repo_root: &Path,
    rel: &str,
) -> Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if rel.is_empty() && name == ".git" {
            continue;
        }
        let entry_rel = if rel.is_empty() {
            name.to_string()
        } else {
            format!("{rel}/{name}")
        };
        if vcs::is_ignored(repo_root, &entry_rel)? {
            continue;
        }

        let from = entry.path();
        let to = dst.join(name);
        let meta = std::fs::symlink_metadata(&from)?;
        if meta.file_type().is_symlink() {
            fs.symlink(&std::fs::read_link(&from)?, &to)?;
        } else if meta.is_dir() {
            fs.create_dir_all(&to)?;
            copy_level(fs, &from, &to, repo_root, &entry_rel)?;
        } else {
            fs.copy(&from, &to)?;
        }
    }
    Ok(())
}

/// Recursive listing of files and symlinks (not directories) under `dir`,
/// as paths relative to it. A missing directory lists as empty.
pub fn capture_listing(dir: &Path) -> io::Result<BTreeSet<PathBuf>> {
    let mut listing = BTreeSet::new();
    if dir.is_dir() {
        walk_listing(dir, PathBuf::new(), &mut listing)?;
    }
    Ok(listing)
}

fn walk_listing(dir: &Path, rel: PathBuf, listing: &mut BTreeSet<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // In-place runs use the repo root as run cwd; the object store is
        // never an artifact.
        if rel.as_os_str().is_empty() && entry.file_name() == ".git" {
            continue;
        }
        let entry_rel = rel.join(entry.file_name());
        let meta = fs::symlink_metadata(entry.path())?;
        if meta.is_dir() && !meta.file_type().is_symlink() {
            walk_listing(&entry.path(), entry_rel, listing)?;
        } else {
            listing.insert(entry_rel);
        }
    }
    Ok(())
}

/// Persist the post-build baseline into the staging area so a resumed
/// publish can still tell artifacts from source files.
pub fn write_baseline(staging: &Path, baseline: &BTreeSet<PathBuf>) -> Result<()> {
    let paths: Vec<String> = baseline
        .iter()
        .map(|path| path.to_string_lossy().into_owned())
        .collect();
    fs::write(staging.join(BASELINE_FILE), serde_json::to_string(&paths)?)?;
    Ok(())
}

pub fn read_baseline(staging: &Path) -> Option<BTreeSet<PathBuf>> {
    let contents = fs::read_to_string(staging.join(BASELINE_FILE)).ok()?;
    let paths: Vec<String> = serde_json::from_str(&contents).ok()?;
    Some(paths.into_iter().map(PathBuf::from).collect())
}

/// Files under the run cwd that appeared since the baseline.
pub fn new_files(run_cwd: &Path, baseline: &BTreeSet<PathBuf>) -> io::Result<Vec<PathBuf>> {
    let now = capture_listing(run_cwd)?;
    Ok(now.difference(baseline).cloned().collect())
}

/// Copy extra files into the run cwd under their staged names, before the
/// run command executes (it may read them; being new, they publish too).
pub fn import_extras(
    fs: &dyn Filesystem,
    run_cwd: &Path,
    extras: &[(PathBuf, String)],
) -> Result<()> {
    for (source, name) in extras {
        let dst = run_cwd.join(name);
        if let Some(parent) = dst.parent() {
            fs.create_dir_all(parent)?;
        }
        fs.copy(source, &dst)?;
    }
    Ok(())
}

pub struct PublishPlan<'a> {
    pub staging: &'a Path,
    pub run_cwd: &'a Path,
    pub new_files: &'a [PathBuf],
    /// `<experiment>/<N><suffix>`, absolute.
    pub target: &'a Path,
    pub rules: &'a IgnoreRules,
    /// Top-level names that never publish (harness scripts, the config
    /// file).
    pub reserved: &'a [String],
    /// Subtrees under the run cwd that are never artifacts (the results
    /// root itself, when running in place).
    pub skip_prefixes: &'a [PathBuf],
}

/// Move the harness files plus every non-ignored artifact into the target
/// directory. A file whose rename fails is copied into
/// `<target>/git-results-tmp/` instead and reported; the returned list is
/// nonempty exactly when that happened.
pub fn publish(fs: &dyn Filesystem, plan: &PublishPlan) -> Result<Vec<String>> {
    fs.create_dir_all(plan.target)?;

    for name in [STDOUT_FILE, STDERR_FILE, MESSAGE_FILE] {
        let src = plan.staging.join(name);
        if lexists(&src) {
            let dst = plan.target.join(name);
            if lexists(&dst) {
                fs.remove_file(&dst)?;
            }
            fs.rename(&src, &dst)?;
        }
    }

    let mut failures: Vec<(PathBuf, io::Error)> = Vec::new();
    for rel in plan.new_files {
        if plan.reserved.iter().any(|name| Path::new(name) == rel.as_path()) {
            continue;
        }
        if plan.skip_prefixes.iter().any(|prefix| rel.starts_with(prefix)) {
            continue;
        }
        if plan.rules.is_ignored(rel, false) {
            continue;
        }
        let src = plan.run_cwd.join(rel);
        if !lexists(&src) {
            continue;
        }
        let dst = plan.target.join(rel);
        if let Some(parent) = dst.parent() {
            fs.create_dir_all(parent)?;
        }
        if lexists(&dst) {
            // Publish replay after an interruption.
            continue;
        }
        if let Err(err) = fs.rename(&src, &dst) {
            failures.push((rel.clone(), err));
        }
    }

    if failures.is_empty() {
        return Ok(Vec::new());
    }

    let pen = plan.target.join(UNSTAGED_DIR);
    fs.create_dir_all(&pen)?;
    let mut stderr = OpenOptions::new()
        .create(true)
        .append(true)
        .open(plan.target.join(STDERR_FILE))?;
    let mut names = Vec::new();
    for (rel, err) in &failures {
        let base = rel
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.to_string_lossy().into_owned());
        let _ = fs.copy(&plan.run_cwd.join(rel), &pen.join(&base));
        writeln!(stderr, "{}: {}", rel.display(), err)?;
        names.push(rel.to_string_lossy().into_owned());
    }

    Ok(names)
}

/// Relative symlink target for a link placed in `from_dir` pointing at
/// `target` (both absolute).
pub(crate) fn relative_target(from_dir: &Path, target: &Path) -> PathBuf {
    let from: Vec<Component> = from_dir.components().collect();
    let to: Vec<Component> = target.components().collect();
    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component);
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

pub(crate) fn remove_link(fs: &dyn Filesystem, path: &Path) -> Result<()> {
    if lexists(path) {
        fs.remove_file(path)?;
    }
    Ok(())
}

pub(crate) fn make_link(fs: &dyn Filesystem, link: &Path, target_abs: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        fs.create_dir_all(parent)?;
        remove_link(fs, link)?;
        fs.symlink(&relative_target(parent, target_abs), link)?;
    }
    Ok(())
}

/// The dated-view link path for an experiment published on `date`:
/// `dated/YYYY/MM/DD-<firstSeg>[/rest…]`.
pub fn dated_link_path(
    results_root_abs: &Path,
    exp_rel: &str,
    date: &DateTime<Utc>,
) -> PathBuf {
    let (first, rest) = match exp_rel.split_once('/') {
        Some((first, rest)) => (first, Some(rest)),
        None => (exp_rel, None),
    };
    let mut link = results_root_abs
        .join(DATED_DIR)
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", date.month()))
        .join(format!("{:02}-{}", date.day(), first));
    if let Some(rest) = rest {
        link = link.join(rest);
    }
    link
}

pub fn latest_link_path(results_root_abs: &Path, exp_rel: &str, failed: bool) -> PathBuf {
    let name = if failed {
        format!("{exp_rel}-fail")
    } else {
        exp_rel.to_string()
    };
    results_root_abs.join(LATEST_DIR).join(name)
}

/// Create/replace the dated and latest views for a freshly published
/// instance. The dated link points at the experiment directory (every
/// instance shows through it); the latest link points at the instance. A
/// failed publish removes the plain latest entry and vice versa.
pub fn publish_views(
    fs: &dyn Filesystem,
    results_root_abs: &Path,
    exp_abs: &Path,
    exp_rel: &str,
    instance_dir_name: &str,
    failed: bool,
    date: &DateTime<Utc>,
) -> Result<()> {
    let dated = dated_link_path(results_root_abs, exp_rel, date);
    make_link(fs, &dated, exp_abs)?;

    remove_link(fs, &latest_link_path(results_root_abs, exp_rel, false))?;
    remove_link(fs, &latest_link_path(results_root_abs, exp_rel, true))?;
    let latest = latest_link_path(results_root_abs, exp_rel, failed);
    make_link(fs, &latest, &exp_abs.join(instance_dir_name))?;

    Ok(())
}

/// Re-derive the latest link for an experiment from whatever instances its
/// directory still holds (used after tree moves). No instances: both link
/// variants are dropped.
pub fn refresh_latest(
    fs: &dyn Filesystem,
    results_root_abs: &Path,
    exp_abs: &Path,
    exp_rel: &str,
) -> Result<()> {
    remove_link(fs, &latest_link_path(results_root_abs, exp_rel, false))?;
    remove_link(fs, &latest_link_path(results_root_abs, exp_rel, true))?;

    let mut newest: Option<(u32, bool, String)> = None;
    if exp_abs.is_dir() {
        for entry in fs::read_dir(exp_abs)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((number, state)) = crate::tagpath::parse_instance_dir(&name) {
                let failed = match state {
                    crate::tagpath::InstanceState::Ok => false,
                    crate::tagpath::InstanceState::Fail => true,
                    _ => continue,
                };
                if newest.as_ref().is_none_or(|(best, _, _)| number > *best) {
                    newest = Some((number, failed, name));
                }
            }
        }
    }

    if let Some((_, failed, dir_name)) = newest {
        let link = latest_link_path(results_root_abs, exp_rel, failed);
        make_link(fs, &link, &exp_abs.join(dir_name))?;
    }
    Ok(())
}

/// Every leaf symlink under the dated view.
pub fn dated_links(results_root_abs: &Path) -> Result<Vec<PathBuf>> {
    let mut links = Vec::new();
    let dated = results_root_abs.join(DATED_DIR);
    if dated.is_dir() {
        collect_links(&dated, &mut links)?;
    }
    Ok(links)
}

fn collect_links(dir: &Path, links: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            links.push(path);
        } else if meta.is_dir() {
            collect_links(&path, links)?;
        }
    }
    Ok(())
}

/// Drop now-empty directories left behind when a dated link moves away.
pub fn prune_empty_dirs(fs: &dyn Filesystem, from: &Path, stop: &Path) -> Result<()> {
    let mut current = from.to_path_buf();
    while current.starts_with(stop) && current != stop {
        match std::fs::read_dir(&current) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
                fs.remove_dir_all(&current)?;
            }
            Err(_) => break,
        }
        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }
    Ok(())
}
