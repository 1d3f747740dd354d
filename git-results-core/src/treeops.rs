//! After-the-fact results-tree surgery: `move` and `link` across experiment
//! or instance granularity, keeping tags, INDEX ledgers, and the
//! dated/latest views consistent with the relocated directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::artifacts::{self, DATED_DIR, MESSAGE_FILE};
use crate::config;
use crate::display;
use crate::errors::{Error, Result};
use crate::index::{self, EntryStatus};
use crate::ports::{Filesystem, Runtime};
use crate::tagpath::{InstanceState, TagPath, instance_dir_name, parse_instance_dir};
use crate::vcs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Move,
    Link,
}

struct Endpoint {
    /// Repo-relative experiment path.
    experiment: String,
    instance: Option<u32>,
    results_root: String,
}

fn endpoint(repo_root: &Path, raw: &str) -> Result<Endpoint> {
    let tag = TagPath::parse(raw)?;
    let instance = tag.instance();
    let experiment = tag.experiment();
    let (_, results_root) = config::locate(repo_root, &experiment)?;
    if experiment.to_string() == results_root {
        return Err(Error::Invalid(format!(
            "'{raw}' needs an experiment segment below the results root"
        )));
    }
    Ok(Endpoint {
        experiment: experiment.to_string(),
        instance,
        results_root,
    })
}

pub fn move_path(rt: &Runtime, repo_root: &Path, src: &str, dst: &str) -> Result<()> {
    transfer(rt, repo_root, src, dst, Mode::Move)
}

pub fn link_path(rt: &Runtime, repo_root: &Path, src: &str, dst: &str) -> Result<()> {
    transfer(rt, repo_root, src, dst, Mode::Link)
}

fn transfer(rt: &Runtime, repo_root: &Path, src_raw: &str, dst_raw: &str, mode: Mode) -> Result<()> {
    let src = endpoint(repo_root, src_raw)?;
    let dst = endpoint(repo_root, dst_raw)?;

    if src.instance.is_some() != dst.instance.is_some() {
        return Err(Error::Invalid(format!(
            "cannot mix experiment and instance granularity: '{src_raw}' vs '{dst_raw}'"
        )));
    }
    if src.results_root != dst.results_root {
        return Err(Error::Invalid(format!(
            "source and destination live under different results roots: '{}' vs '{}'",
            src.results_root, dst.results_root
        )));
    }
    if !repo_root.join(&src.results_root).is_dir() {
        return Err(Error::NotFound {
            root_missing: true,
            path: src.results_root,
        });
    }

    match (src.instance, dst.instance) {
        (Some(src_n), Some(dst_n)) => {
            transfer_instance(rt, repo_root, &src, src_n, &dst, dst_n, mode)
        }
        _ => transfer_experiment(rt, repo_root, &src, &dst, mode),
    }
}

/// Instance directories of an experiment, sorted by number.
fn scan_instances(exp_abs: &Path) -> Result<Vec<(u32, InstanceState, String)>> {
    let mut found = Vec::new();
    if exp_abs.is_dir() {
        for entry in fs::read_dir(exp_abs)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some((number, state)) = parse_instance_dir(&name) {
                found.push((number, state, name));
            }
        }
    }
    found.sort_by_key(|(number, _, _)| *number);
    Ok(found)
}

fn find_instance_dir(exp_abs: &Path, number: u32) -> Result<Option<(String, InstanceState)>> {
    Ok(scan_instances(exp_abs)?
        .into_iter()
        .find(|(n, _, _)| *n == number)
        .map(|(_, state, name)| (name, state)))
}

/// The `Commit:` line of a published `git-results-message`, the fallback
/// when a tag has gone missing.
fn recover_sha(instance_dir: &Path) -> Option<String> {
    let contents = fs::read_to_string(instance_dir.join(MESSAGE_FILE)).ok()?;
    contents.lines().find_map(|line| {
        line.strip_prefix("Commit: ")
            .map(|sha| sha.trim().to_string())
    })
}

/// Point a tag name at the same commit the source tag names (or whatever
/// the message file recorded). With `delete_src`, the old tag goes away.
fn retag(
    repo_root: &Path,
    src_tag: &str,
    dst_tag: &str,
    recovery_dir: &Path,
    delete_src: bool,
) -> Result<()> {
    let sha = match vcs::tag_sha(repo_root, src_tag)? {
        Some(sha) => Some(sha),
        None => recover_sha(recovery_dir),
    };

    let Some(sha) = sha else {
        display::warn(&format!(
            "no commit recoverable for '{src_tag}'; tag '{dst_tag}' not created"
        ));
        return Ok(());
    };

    if delete_src {
        vcs::delete_tag(repo_root, src_tag)?;
    }
    match vcs::tag(repo_root, dst_tag, &sha) {
        Ok(()) => Ok(()),
        // Replayed or pre-existing at the same commit: fine.
        Err(Error::TagExists(_)) if vcs::tag_sha(repo_root, dst_tag)?.as_deref() == Some(&*sha) => {
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Decompose a dated-view link path into its (year/month dir, day,
/// experiment-rel) pieces.
fn parse_dated_link(root_abs: &Path, link: &Path) -> Option<(PathBuf, String, String)> {
    let rel = link.strip_prefix(root_abs.join(DATED_DIR)).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() < 3 {
        return None;
    }
    let (day, first) = parts[2].split_once('-')?;
    let mut exp_rel = first.to_string();
    for part in &parts[3..] {
        exp_rel.push('/');
        exp_rel.push_str(part);
    }
    let month_dir = root_abs.join(DATED_DIR).join(&parts[0]).join(&parts[1]);
    Some((month_dir, day.to_string(), exp_rel))
}

/// Re-point every dated link that names `src_rel` at the destination
/// experiment, preserving the original dates. The source links are dropped
/// when nothing is left under the source experiment.
fn migrate_dated(
    fs_port: &dyn Filesystem,
    root_abs: &Path,
    src_rel: &str,
    dst_rel: &str,
    dst_exp_abs: &Path,
    remove_src: bool,
) -> Result<()> {
    for link in artifacts::dated_links(root_abs)? {
        let Some((month_dir, day, exp_rel)) = parse_dated_link(root_abs, &link) else {
            continue;
        };
        if exp_rel != src_rel {
            continue;
        }

        let (first, rest) = match dst_rel.split_once('/') {
            Some((first, rest)) => (first, Some(rest)),
            None => (dst_rel, None),
        };
        let mut new_link = month_dir.join(format!("{day}-{first}"));
        if let Some(rest) = rest {
            new_link = new_link.join(rest);
        }
        artifacts::make_link(fs_port, &new_link, dst_exp_abs)?;

        if remove_src {
            artifacts::remove_link(fs_port, &link)?;
            if let Some(parent) = link.parent() {
                artifacts::prune_empty_dirs(fs_port, parent, &root_abs.join(DATED_DIR))?;
            }
        }
    }
    Ok(())
}

/// Recursive copy for `link`: hardlink each file, fall back to a byte copy,
/// recreate symlinks as symlinks.
fn copy_instance_dir(fs_port: &dyn Filesystem, src: &Path, dst: &Path) -> Result<()> {
    fs_port.create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let meta = fs::symlink_metadata(&from)?;
        if meta.file_type().is_symlink() {
            fs_port.symlink(&fs::read_link(&from)?, &to)?;
        } else if meta.is_dir() {
            copy_instance_dir(fs_port, &from, &to)?;
        } else if fs_port.hard_link(&from, &to).is_err() {
            fs_port.copy(&from, &to)?;
        }
    }
    Ok(())
}

fn exp_rel<'a>(experiment: &'a str, results_root: &str) -> &'a str {
    experiment
        .strip_prefix(results_root)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(experiment)
}

fn transfer_experiment(
    rt: &Runtime,
    repo_root: &Path,
    src: &Endpoint,
    dst: &Endpoint,
    mode: Mode,
) -> Result<()> {
    let src_abs = repo_root.join(&src.experiment);
    if !src_abs.is_dir() {
        return Err(Error::NotFound {
            root_missing: false,
            path: src.experiment.clone(),
        });
    }
    let dst_abs = repo_root.join(&dst.experiment);
    if artifacts::lexists(&dst_abs) {
        return Err(Error::DestinationExists(dst.experiment.clone()));
    }

    let root_abs = repo_root.join(&src.results_root);
    let instances = scan_instances(&src_abs)?;
    let src_rel = exp_rel(&src.experiment, &src.results_root).to_string();
    let dst_rel = exp_rel(&dst.experiment, &dst.results_root).to_string();

    match mode {
        Mode::Move => {
            if let Some(parent) = dst_abs.parent() {
                rt.fs.create_dir_all(parent)?;
            }
            // The whole experiment relocates, INDEX included, freeing the
            // source path to restart at N=1.
            rt.fs.rename(&src_abs, &dst_abs)?;

            for (number, _, dir_name) in &instances {
                retag(
                    repo_root,
                    &format!("{}/{}", src.experiment, number),
                    &format!("{}/{}", dst.experiment, number),
                    &dst_abs.join(dir_name),
                    true,
                )?;
            }

            migrate_dated(rt.fs, &root_abs, &src_rel, &dst_rel, &dst_abs, true)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &src_abs, &src_rel)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &dst_abs, &dst_rel)?;
        }
        Mode::Link => {
            rt.fs.create_dir_all(&dst_abs)?;
            for (number, state, dir_name) in &instances {
                copy_instance_dir(rt.fs, &src_abs.join(dir_name), &dst_abs.join(dir_name))?;
                retag(
                    repo_root,
                    &format!("{}/{}", src.experiment, number),
                    &format!("{}/{}", dst.experiment, number),
                    &dst_abs.join(dir_name),
                    false,
                )?;
                let entry = index::read(&src_abs, *number).ok();
                let status = entry
                    .as_ref()
                    .map(|entry| entry.status)
                    .unwrap_or(if *state == InstanceState::Fail {
                        EntryStatus::Fail
                    } else {
                        EntryStatus::Ok
                    });
                let message = entry.map(|entry| entry.message).unwrap_or_default();
                index::append(&dst_abs, *number, status, &message)?;
            }

            let dated = artifacts::dated_link_path(&root_abs, &dst_rel, &rt.clock.now());
            artifacts::make_link(rt.fs, &dated, &dst_abs)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &dst_abs, &dst_rel)?;
        }
    }

    Ok(())
}

fn transfer_instance(
    rt: &Runtime,
    repo_root: &Path,
    src: &Endpoint,
    src_n: u32,
    dst: &Endpoint,
    dst_n: u32,
    mode: Mode,
) -> Result<()> {
    let src_exp_abs = repo_root.join(&src.experiment);
    let found = find_instance_dir(&src_exp_abs, src_n)?;
    let Some((src_dir_name, state)) = found else {
        return Err(Error::NotFound {
            root_missing: false,
            path: format!("{}/{}", src.experiment, src_n),
        });
    };
    if !matches!(state, InstanceState::Ok | InstanceState::Fail) {
        return Err(Error::Invalid(format!(
            "instance {}/{} is still {}; only settled instances move",
            src.experiment,
            src_n,
            src_dir_name
        )));
    }

    let dst_exp_abs = repo_root.join(&dst.experiment);
    if find_instance_dir(&dst_exp_abs, dst_n)?.is_some() {
        return Err(Error::DestinationExists(format!(
            "{}/{}",
            dst.experiment, dst_n
        )));
    }

    let root_abs = repo_root.join(&src.results_root);
    let dst_dir_name = instance_dir_name(dst_n, state);
    let entry = index::read(&src_exp_abs, src_n).ok();
    let status = entry
        .as_ref()
        .map(|entry| entry.status)
        .unwrap_or(if state == InstanceState::Fail {
            EntryStatus::Fail
        } else {
            EntryStatus::Ok
        });
    let message = entry.map(|entry| entry.message).unwrap_or_default();

    rt.fs.create_dir_all(&dst_exp_abs)?;
    let src_rel = exp_rel(&src.experiment, &src.results_root).to_string();
    let dst_rel = exp_rel(&dst.experiment, &dst.results_root).to_string();

    match mode {
        Mode::Move => {
            rt.fs
                .rename(&src_exp_abs.join(&src_dir_name), &dst_exp_abs.join(&dst_dir_name))?;

            // The source experiment and its INDEX survive; its line flips
            // to `move` and the destination gains a fresh line.
            index::rewrite(
                &src_exp_abs,
                src_n,
                EntryStatus::Move,
                &format!("(moved to {}/{}) {}", dst.experiment, dst_n, message),
            )?;
            index::append(&dst_exp_abs, dst_n, status, &message)?;

            retag(
                repo_root,
                &format!("{}/{}", src.experiment, src_n),
                &format!("{}/{}", dst.experiment, dst_n),
                &dst_exp_abs.join(&dst_dir_name),
                true,
            )?;

            let src_emptied = scan_instances(&src_exp_abs)?.is_empty();
            migrate_dated(rt.fs, &root_abs, &src_rel, &dst_rel, &dst_exp_abs, src_emptied)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &src_exp_abs, &src_rel)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &dst_exp_abs, &dst_rel)?;
        }
        Mode::Link => {
            copy_instance_dir(
                rt.fs,
                &src_exp_abs.join(&src_dir_name),
                &dst_exp_abs.join(&dst_dir_name),
            )?;
            index::append(&dst_exp_abs, dst_n, status, &message)?;
            retag(
                repo_root,
                &format!("{}/{}", src.experiment, src_n),
                &format!("{}/{}", dst.experiment, dst_n),
                &dst_exp_abs.join(&dst_dir_name),
                false,
            )?;

            let dated = artifacts::dated_link_path(&root_abs, &dst_rel, &rt.clock.now());
            artifacts::make_link(rt.fs, &dated, &dst_exp_abs)?;
            artifacts::refresh_latest(rt.fs, &root_abs, &dst_exp_abs, &dst_rel)?;
        }
    }

    Ok(())
}
