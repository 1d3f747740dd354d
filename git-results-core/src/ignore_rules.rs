//! Ignore-rule evaluation for publish filtering, in gitignore terms: a bare
//! glob matches basenames at any depth, a `/`-prefixed glob is anchored at
//! the rule root, `!` negates a prior match, and the last matching rule
//! wins. `ignoreExt` entries are shorthand for trailing `*.<ext>` rules.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use crate::errors::{Error, Result};

pub struct IgnoreRules {
    matcher: Gitignore,
}

impl IgnoreRules {
    pub fn build(root: &Path, rules: &[String], ignore_ext: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        for rule in rules {
            builder
                .add_line(None, rule)
                .map_err(|err| Error::Invalid(format!("bad ignore rule '{rule}': {err}")))?;
        }
        for ext in ignore_ext {
            let rule = format!("*.{ext}");
            builder
                .add_line(None, &rule)
                .map_err(|err| Error::Invalid(format!("bad ignore extension '{ext}': {err}")))?;
        }
        let matcher = builder
            .build()
            .map_err(|err| Error::Invalid(format!("bad ignore rules: {err}")))?;
        Ok(IgnoreRules { matcher })
    }

    pub fn empty(root: &Path) -> Self {
        IgnoreRules {
            matcher: GitignoreBuilder::new(root).build().expect("empty rule set"),
        }
    }

    /// `rel` is relative to the rule root. A file under an ignored directory
    /// is ignored too.
    pub fn is_ignored(&self, rel: &Path, is_dir: bool) -> bool {
        self.matcher
            .matched_path_or_any_parents(rel, is_dir)
            .is_ignore()
    }
}
