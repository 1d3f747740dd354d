//! Seams between the run lifecycle and the operating system.
//!
//! The lifecycle, supervisor, and tree operations only touch the clock,
//! subprocesses, and mutating filesystem calls through these traits so tests
//! can substitute fakes (a pinned clock, a scripted launcher, a filesystem
//! that fails specific renames).

use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;

/// PATH handed to build/run/progress children. Nothing else from the
/// caller's environment crosses the boundary.
pub const CHILD_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

pub trait Clock: Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Shell command line, executed via `sh -c`.
    pub command: String,
    pub cwd: PathBuf,
    /// Opened in append mode so resumed attempts extend earlier output.
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Captured {
    pub stdout: String,
    pub exit: Option<i32>,
}

pub trait ChildHandle {
    /// Nonblocking; `Some(code)` once the child has exited.
    fn poll(&mut self) -> io::Result<Option<i32>>;
    /// Graceful stop (SIGTERM).
    fn terminate(&mut self) -> io::Result<()>;
    /// Hard stop.
    fn kill(&mut self) -> io::Result<()>;
    fn id(&self) -> u32;
}

pub trait ProcessLauncher: Sync {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildHandle>>;
    /// Run a short command to completion, capturing trimmed stdout. Used for
    /// progress and follow sampling.
    fn capture(&self, command: &str, cwd: &Path) -> io::Result<Captured>;
}

pub struct ShellLauncher;

struct ShellChild {
    child: std::process::Child,
}

impl ChildHandle for ShellChild {
    fn poll(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn terminate(&mut self) -> io::Result<()> {
        let status = Command::new("kill").arg(self.child.id().to_string()).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!("failed to signal pid {}", self.child.id())))
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()
    }

    fn id(&self) -> u32 {
        self.child.id()
    }
}

impl ProcessLauncher for ShellLauncher {
    fn launch(&self, spec: &LaunchSpec) -> io::Result<Box<dyn ChildHandle>> {
        let stdout = OpenOptions::new().create(true).append(true).open(&spec.stdout)?;
        let stderr = OpenOptions::new().create(true).append(true).open(&spec.stderr)?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.cwd)
            .env_clear()
            .env("PATH", CHILD_PATH)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()?;

        Ok(Box::new(ShellChild { child }))
    }

    fn capture(&self, command: &str, cwd: &Path) -> io::Result<Captured> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(cwd)
            .env_clear()
            .env("PATH", CHILD_PATH)
            .stdin(Stdio::null())
            .output()?;

        Ok(Captured {
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            exit: output.status.code(),
        })
    }
}

/// Mutating filesystem calls the publish path depends on. Read-only access
/// goes straight through `std::fs`.
pub trait Filesystem: Sync {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<()>;
    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;
}

pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::copy(from, to).map(|_| ())
    }

    fn hard_link(&self, original: &Path, link: &Path) -> io::Result<()> {
        std::fs::hard_link(original, link)
    }

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir_all(path)
    }
}

/// Everything the lifecycle needs from the host, bundled for injection.
pub struct Runtime<'a> {
    pub clock: &'a dyn Clock,
    pub launcher: &'a dyn ProcessLauncher,
    pub fs: &'a dyn Filesystem,
}

impl Runtime<'static> {
    pub fn system() -> Self {
        Runtime {
            clock: &SystemClock,
            launcher: &ShellLauncher,
            fs: &OsFilesystem,
        }
    }
}

lazy_static! {
    static ref INTERRUPT_FLAG: Arc<AtomicBool> = {
        let flag = Arc::new(AtomicBool::new(false));
        let _ = signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag));
        let _ = signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&flag));
        flag
    };
}

/// True once SIGTERM/SIGINT has been delivered to this process. The run loop
/// polls this between child polls and downgrades to a graceful kill.
pub fn interrupted() -> bool {
    INTERRUPT_FLAG.load(Ordering::Relaxed)
}
