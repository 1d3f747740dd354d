use std::path::Path;

use git2::{Commit, ErrorCode, IndexAddOption, ResetType, Status, StatusOptions};

use super::{open_repo, signature};
use crate::errors::{Error, Result};

/// Working-tree paths that would end up in a snapshot commit, minus anything
/// the caller exempts (results roots, config files, harness scripts, user
/// ignore rules). Paths git already ignores never show up.
pub fn dirty_paths(repo_path: &Path, exempt: &dyn Fn(&str) -> bool) -> Result<Vec<String>> {
    let repo = open_repo(repo_path)?;

    let mut opts = StatusOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .exclude_submodules(true);

    let statuses = repo.statuses(Some(&mut opts))?;
    let mut dirty = Vec::new();
    for entry in statuses.iter() {
        if entry.status().contains(Status::IGNORED) {
            continue;
        }
        let Some(path) = entry.path() else { continue };
        if exempt(path) {
            continue;
        }
        dirty.push(path.to_string());
    }

    Ok(dirty)
}

/// Stage every change and untracked file (honoring `.gitignore`) and commit
/// onto HEAD, returning the new commit SHA. With `allow_empty` off, a tree
/// identical to the parent's is refused.
pub fn commit_all(repo_path: &Path, message: &str, allow_empty: bool) -> Result<String> {
    let repo = open_repo(repo_path)?;

    let mut index = repo.index()?;
    index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
    index.update_all(["*"], None)?;
    index.write()?;
    let tree_id = index.write_tree()?;
    let tree = repo.find_tree(tree_id)?;

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(err) if err.code() == ErrorCode::UnbornBranch || err.code() == ErrorCode::NotFound => {
            None
        }
        Err(err) => return Err(err.into()),
    };

    if let Some(parent) = &parent {
        if parent.tree_id() == tree_id && !allow_empty {
            return Err(Error::Invalid("nothing to commit".to_string()));
        }
    }

    let sig = signature(&repo)?;
    let parents: Vec<&Commit> = parent.iter().collect();
    let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

    Ok(oid.to_string())
}

/// The current HEAD commit SHA, or `None` on an unborn branch.
pub fn head(repo_path: &Path) -> Result<Option<String>> {
    let repo = open_repo(repo_path)?;
    match repo.head() {
        Ok(head) => Ok(Some(head.peel_to_commit()?.id().to_string())),
        Err(err) if err.code() == ErrorCode::UnbornBranch || err.code() == ErrorCode::NotFound => {
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Mixed reset: moves HEAD and the index back, leaves the working tree
/// alone. This is how an auto-created snapshot commit is unwound.
pub fn reset_to(repo_path: &Path, sha: &str) -> Result<()> {
    let repo = open_repo(repo_path)?;
    let object = repo.revparse_single(sha)?;
    repo.reset(&object, ResetType::Mixed, None)?;
    Ok(())
}

pub fn is_ignored(repo_path: &Path, rel: &str) -> Result<bool> {
    let repo = open_repo(repo_path)?;
    Ok(repo.is_path_ignored(rel)?)
}
