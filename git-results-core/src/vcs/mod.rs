//! Operations on the host git repository. Every function takes the
//! repository path explicitly; nothing here reads or mutates process cwd.

mod commits;
mod ignorefile;
mod tags;


pub use commits::{commit_all, dirty_paths, head, is_ignored, reset_to};
pub use ignorefile::add_ignore;
pub use tags::{delete_tag, tag, tag_sha};

use std::path::{Path, PathBuf};

use git2::{Repository, Signature};

use crate::errors::{Error, Result};

pub(crate) fn open_repo(repo_path: &Path) -> Result<Repository> {
    Ok(Repository::open(repo_path)?)
}

/// Working-tree root of the repository containing `from`.
pub fn discover_root(from: &Path) -> Result<PathBuf> {
    let repo = Repository::discover(from)?;
    repo.workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Invalid("bare repositories have no working tree to run in".into()))
}

/// Snapshot commits still need an author on repos with no user config.
pub(crate) fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig.to_owned()),
        Err(_) => Ok(Signature::now("git-results", "git-results@localhost")?),
    }
}
