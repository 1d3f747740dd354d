//! Tag-path grammar: a slash-separated path under the repository root whose
//! first segment (relative to the governing config directory) names the
//! results root. A numeric last segment addresses a single instance;
//! otherwise the path names an experiment.

use std::fmt;

use crate::errors::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Ok,
    Fail,
    Run,
    ManualRetry,
    Abort,
}

impl InstanceState {
    pub fn suffix(self) -> &'static str {
        match self {
            InstanceState::Ok => "",
            InstanceState::Fail => "-fail",
            InstanceState::Run => "-run",
            InstanceState::ManualRetry => "-manual-retry",
            InstanceState::Abort => "-abrt",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "" => Some(InstanceState::Ok),
            "-fail" => Some(InstanceState::Fail),
            "-run" => Some(InstanceState::Run),
            "-manual-retry" => Some(InstanceState::ManualRetry),
            "-abrt" => Some(InstanceState::Abort),
            _ => None,
        }
    }
}

/// Directory name for instance `number` in the given state, e.g. `3-fail`.
pub fn instance_dir_name(number: u32, state: InstanceState) -> String {
    format!("{}{}", number, state.suffix())
}

/// Parse an instance directory name back into its number and state.
pub fn parse_instance_dir(name: &str) -> Option<(u32, InstanceState)> {
    let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let number: u32 = name[..digits].parse().ok()?;
    InstanceState::from_suffix(&name[digits..]).map(|state| (number, state))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPath {
    segments: Vec<String>,
}

impl TagPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(Error::Invalid("empty tag path".to_string()));
        }
        if raw.starts_with('/') {
            return Err(Error::Invalid(format!(
                "tag path must be relative to the repository root: '{raw}'"
            )));
        }

        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::Invalid(format!("malformed tag path: '{raw}'")));
            }
            segments.push(segment.to_string());
        }

        Ok(TagPath { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The instance number when the final segment is numeric.
    pub fn instance(&self) -> Option<u32> {
        self.segments.last().and_then(|segment| segment.parse().ok())
    }

    pub fn is_instance(&self) -> bool {
        self.instance().is_some()
    }

    /// The experiment prefix: the whole path, or everything but a numeric
    /// final segment.
    pub fn experiment(&self) -> TagPath {
        if self.is_instance() && self.segments.len() > 1 {
            TagPath {
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            }
        } else {
            self.clone()
        }
    }

    pub fn join(&self, segment: &str) -> TagPath {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        TagPath { segments }
    }

    /// Path relative to `prefix`, if `prefix` is a component-wise ancestor.
    pub fn strip_prefix(&self, prefix: &str) -> Option<&[String]> {
        if prefix.is_empty() {
            return Some(&self.segments);
        }
        let parts: Vec<&str> = prefix.split('/').collect();
        if parts.len() > self.segments.len() {
            return None;
        }
        for (part, segment) in parts.iter().zip(&self.segments) {
            if part != segment {
                return None;
            }
        }
        Some(&self.segments[parts.len()..])
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
