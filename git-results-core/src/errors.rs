use std::fmt;
use std::io;

/// Outcome of any public operation. Only the CLI layer turns one of these
/// into a process exit code.
#[derive(Debug)]
pub enum Error {
    /// Working tree has uncommitted changes and auto-commit is off.
    Dirty(Vec<String>),
    /// The target tag name is already present in the repository.
    TagExists(String),
    /// The source of a move/link is missing.
    NotFound { root_missing: bool, path: String },
    /// The destination of a move/link would overwrite an existing entry.
    DestinationExists(String),
    /// Bad input: mixed granularity, short message, cyclic variable, ...
    Invalid(String),
    /// No INDEX entry for the requested instance number.
    NotIndexed(u32),
    /// The build command exited nonzero (or was killed).
    BuildFail(Option<i32>),
    /// The run command exited nonzero (or was killed).
    RunFail(Option<i32>),
    /// Retried the maximum number of times without observable progress.
    Stalled { attempts: u32 },
    /// A state record exists on disk but cannot be parsed.
    Corrupt(String),
    Git(git2::Error),
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Dirty(paths) => {
                write!(
                    f,
                    "working tree has uncommitted changes (pass --commit to snapshot them): {}",
                    paths.join(", ")
                )
            }
            Error::TagExists(name) => write!(f, "tag '{name}' already exists"),
            Error::NotFound { root_missing, path } => {
                if *root_missing {
                    write!(f, "Results folder '{path}' not found")
                } else {
                    write!(f, "No result found under '{path}'")
                }
            }
            Error::DestinationExists(path) => {
                write!(f, "destination '{path}' already exists")
            }
            Error::Invalid(message) => write!(f, "{message}"),
            Error::NotIndexed(number) => write!(f, "no INDEX entry for instance {number}"),
            Error::BuildFail(code) => match code {
                Some(code) => write!(f, "build command failed with exit code {code}"),
                None => write!(f, "build command was killed"),
            },
            Error::RunFail(code) => match code {
                Some(code) => write!(f, "run command failed with exit code {code}"),
                None => write!(f, "run command was killed"),
            },
            Error::Stalled { attempts } => {
                write!(f, "no progress after {attempts} attempts; left in manual retry")
            }
            Error::Corrupt(detail) => write!(f, "unreadable state record: {detail}"),
            Error::Git(err) => write!(f, "git: {err}"),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Git(err) => Some(err),
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<git2::Error> for Error {
    fn from(err: git2::Error) -> Self {
        Error::Git(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Io(io::Error::other(err))
    }
}
