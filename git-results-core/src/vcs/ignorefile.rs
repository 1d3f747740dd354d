use std::fs;
use std::path::Path;

use crate::errors::Result;

/// Append a `/`-anchored entry for `rel` to the repo-root `.gitignore`.
/// Adding a path that is already listed is a no-op.
pub fn add_ignore(repo_path: &Path, rel: &str) -> Result<()> {
    let entry = format!("/{}", rel.trim_matches('/'));
    let gitignore = repo_path.join(".gitignore");

    let mut contents = if gitignore.exists() {
        fs::read_to_string(&gitignore)?
    } else {
        String::new()
    };

    if contents.lines().any(|line| line.trim() == entry) {
        return Ok(());
    }

    contents.push('\n');
    contents.push_str(&entry);
    fs::write(&gitignore, contents)?;

    Ok(())
}
