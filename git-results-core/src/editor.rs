//! Commit-message prompting. When no usable `-m` message is given, the
//! user's `$EDITOR` is run over a seeded temp file and the trimmed result
//! is validated.

use std::env;
use std::fs;
use std::io::Write;
use std::process::Command;

use crate::errors::{Error, Result};

pub const MIN_MESSAGE_LEN: usize = 5;

/// Reject messages shorter than five characters after trimming.
pub fn validate(message: &str) -> Result<String> {
    let message = message.trim();
    if message.chars().count() < MIN_MESSAGE_LEN {
        return Err(Error::Invalid(format!(
            "Commit message must be at least {MIN_MESSAGE_LEN} characters; got: '{message}'"
        )));
    }
    Ok(message.to_string())
}

/// Run the editor command over a temp file seeded with `seed` and return
/// the trimmed contents. The editor command is a shell prefix the file path
/// is appended to, so `EDITOR="code --wait"` works.
pub fn prompt_with(editor: &str, seed: &str) -> Result<String> {
    let mut file = tempfile::Builder::new()
        .prefix("git-results-msg-")
        .suffix(".txt")
        .tempfile()?;
    file.write_all(seed.as_bytes())?;
    file.flush()?;

    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} '{}'", editor, file.path().display()))
        .status()?;
    if !status.success() {
        return Err(Error::Invalid(format!(
            "editor '{editor}' exited with {status}"
        )));
    }

    Ok(fs::read_to_string(file.path())?.trim().to_string())
}

/// The `$EDITOR`-driven prompt used when `-m` is absent or too short.
pub fn prompt(override_editor: Option<&str>, seed: &str) -> Result<String> {
    let editor = match override_editor {
        Some(editor) => editor.to_string(),
        None => env::var("EDITOR")
            .ok()
            .filter(|editor| !editor.trim().is_empty())
            .unwrap_or_else(|| "vi".to_string()),
    };
    prompt_with(&editor, seed)
}
