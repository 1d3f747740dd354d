//! Cross-process resume driver. Walks the state store, cleans up records
//! whose repo or results tree has vanished, quarantines unreadable ones,
//! and spawns `--internal-retry-continue` continuations for the rest. Each
//! continuation owns a disjoint record, so children run in parallel.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::display;
use crate::errors::{Error, Result};
use crate::lifecycle;
use crate::ports::Runtime;
use crate::state::{QUARANTINE_PREFIX, RunSettings, StateStore};
use crate::tagpath::{InstanceState, instance_dir_name};

#[derive(Debug, Clone, Copy, Default)]
pub struct SupervisorOptions {
    /// Retry even records that have exhausted their attempts without
    /// progress (operator attention).
    pub manual: bool,
    /// Internal hook: instead of retrying a stalled record, abort it.
    /// The instance moves to `N-abrt` and the record is dropped.
    pub abort_stalled: bool,
}

/// How continuations get started. The production impl detaches a child
/// process; tests substitute an in-process impl so handles resolve
/// synchronously.
pub trait Continuations {
    fn spawn(&self, key: &str, settings: &RunSettings) -> Result<ContinuationHandle>;
}

pub enum ContinuationHandle {
    Process(std::process::Child),
    Finished(i32),
}

impl ContinuationHandle {
    /// Block until the continuation exits; 0 means it reached DONE.
    pub fn wait(&mut self) -> i32 {
        match self {
            ContinuationHandle::Process(child) => match child.wait() {
                Ok(status) => status.code().unwrap_or(-1),
                Err(_) => -1,
            },
            ContinuationHandle::Finished(code) => *code,
        }
    }
}

/// Spawns `<binary> <key> --internal-retry-continue` detached, stdio
/// silenced; the child re-reads everything it needs from the record.
pub struct ProcessContinuations {
    pub binary: PathBuf,
}

impl Continuations for ProcessContinuations {
    fn spawn(&self, key: &str, settings: &RunSettings) -> Result<ContinuationHandle> {
        let child = Command::new(&self.binary)
            .arg(key)
            .arg("--internal-retry-continue")
            .current_dir(&settings.repo_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(ContinuationHandle::Process(child))
    }
}

/// Runs continuations inline on the supervisor's own runtime. Used by the
/// test suite and by `--internal-retry-continue` itself.
pub struct InProcessContinuations<'a> {
    pub rt: &'a Runtime<'a>,
    pub store: &'a StateStore,
}

impl Continuations for InProcessContinuations<'_> {
    fn spawn(&self, key: &str, _settings: &RunSettings) -> Result<ContinuationHandle> {
        let code = match lifecycle::resume(self.rt, self.store, key) {
            Ok(_) => 0,
            Err(err) => {
                display::detail(&format!("continuation {key} ended: {err}"));
                1
            }
        };
        Ok(ContinuationHandle::Finished(code))
    }
}

fn stalled(settings: &RunSettings) -> bool {
    // A negative progressDelay disables the stall check outright.
    settings.progress_delay >= 0.0
}

/// One supervisor pass. Returns the handles of every continuation started.
pub fn run(
    rt: &Runtime,
    store: &StateStore,
    continuations: &dyn Continuations,
    opts: &SupervisorOptions,
) -> Result<Vec<ContinuationHandle>> {
    let mut started = Vec::new();

    for key in store.list()? {
        if key.starts_with(QUARANTINE_PREFIX) {
            continue;
        }

        // An empty or half-written record directory is garbage.
        if !store.settings_path(&key).exists() {
            store.delete(&key)?;
            continue;
        }

        let record = match store.load(&key) {
            Ok(record) => record,
            Err(Error::Corrupt(detail)) => {
                display::warn(&format!("quarantining {key}: {detail}"));
                store.quarantine(&key)?;
                continue;
            }
            Err(err) => return Err(err),
        };
        let settings = record.settings;

        // The repo or the tag path it pointed at may be gone entirely.
        let exp_dir = settings.repo_path.join(&settings.experiment);
        if !settings.repo_path.exists() || !exp_dir.exists() {
            display::info(&format!("dropping {key}: its repository or results tree is gone"));
            if record.staging.exists() {
                rt.fs.remove_dir_all(&record.staging)?;
            }
            store.delete(&key)?;
            continue;
        }

        // An unreadable build-state still gets a continuation: resume
        // closes such records out as failed.
        let state = store.load_build_state(&key).ok();

        if let Some(state) = &state {
            // Backoff: don't respawn before the configured delay elapses.
            if settings.progress_delay > 0.0 {
                if let Some(last) = state.last_attempt {
                    let elapsed = (rt.clock.now() - last).num_milliseconds() as f64 / 1000.0;
                    if elapsed < settings.progress_delay {
                        continue;
                    }
                }
            }

            if state.retries >= settings.max_retries && stalled(&settings) {
                if opts.abort_stalled {
                    abort_record(rt, store, &key, &settings)?;
                    continue;
                }
                if !opts.manual {
                    // Operator attention required.
                    continue;
                }
            }
        }

        started.push(continuations.spawn(&key, &settings)?);
    }

    Ok(started)
}

/// Move a stalled instance to `N-abrt`, ledger it as failed, and drop the
/// record.
fn abort_record(rt: &Runtime, store: &StateStore, key: &str, settings: &RunSettings) -> Result<()> {
    let record = store.load(key)?;
    let exp_dir = settings.repo_path.join(&settings.experiment);
    let abrt = exp_dir.join(instance_dir_name(settings.instance, InstanceState::Abort));

    let run_link = exp_dir.join(instance_dir_name(settings.instance, InstanceState::Run));
    if crate::artifacts::lexists(&run_link) {
        rt.fs.remove_file(&run_link)?;
    }
    if record.staging.exists() && !crate::artifacts::lexists(&abrt) {
        rt.fs.rename(&record.staging, &abrt)?;
    }

    crate::index::append(
        &exp_dir,
        settings.instance,
        crate::index::EntryStatus::Fail,
        &settings.message,
    )?;
    store.delete(key)?;
    display::warn(&format!("aborted {key}; instance parked at {}", abrt.display()));
    Ok(())
}
