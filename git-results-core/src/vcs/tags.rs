use std::path::Path;

use git2::ErrorCode;

use super::open_repo;
use crate::errors::{Error, Result};

/// Create a lightweight tag pointing at `sha`. An existing tag of the same
/// name is a typed failure regardless of where it points; callers must
/// delete first.
pub fn tag(repo_path: &Path, name: &str, sha: &str) -> Result<()> {
    let repo = open_repo(repo_path)?;
    let object = repo.revparse_single(sha)?;
    match repo.tag_lightweight(name, &object, false) {
        Ok(_) => Ok(()),
        Err(err) if err.code() == ErrorCode::Exists => Err(Error::TagExists(name.to_string())),
        Err(err) => Err(err.into()),
    }
}

/// Delete a tag; deleting a tag that is already gone is not an error.
pub fn delete_tag(repo_path: &Path, name: &str) -> Result<()> {
    let repo = open_repo(repo_path)?;
    match repo.tag_delete(name) {
        Ok(()) => Ok(()),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// The commit SHA a tag resolves to, or `None` when the tag does not exist.
pub fn tag_sha(repo_path: &Path, name: &str) -> Result<Option<String>> {
    let repo = open_repo(repo_path)?;
    match repo.find_reference(&format!("refs/tags/{name}")) {
        Ok(reference) => Ok(Some(reference.peel_to_commit()?.id().to_string())),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
