//! The run state machine: PREPARE → COMMIT → BUILD → RUN → PUBLISH, with
//! failure edges to ROLLBACK and MANUAL. One invocation owns its state
//! record and staging directory until publication consumes both or the
//! record is declared dead.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::artifacts::{
    self, MESSAGE_FILE, PublishPlan, RETRY_KEY_FILE, STDERR_FILE, STDOUT_FILE, TMP_DIR, TREE_DIR,
};
use crate::config::{self, BUILD_SCRIPT, CONFIG_FILE, PROGRESS_SCRIPT, RUN_SCRIPT};
use crate::display;
use crate::editor;
use crate::errors::{Error, Result};
use crate::ignore_rules::IgnoreRules;
use crate::index::{self, EntryStatus};
use crate::ports::{ChildHandle, LaunchSpec, Runtime, interrupted};
use crate::state::{BuildState, ExtraFile, Phase, ProgressSample, RunSettings, StateStore};
use crate::tagpath::{InstanceState, TagPath, instance_dir_name};
use crate::vcs;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `-m`; absent or shorter than five trimmed characters opens the
    /// editor.
    pub message: Option<String>,
    /// Editor command override (tests); `$EDITOR` otherwise.
    pub editor: Option<String>,
    /// Opt-in: snapshot-commit a dirty working tree instead of failing.
    pub auto_commit: bool,
    pub in_place: bool,
    /// `-r`: keep the record alive across failed attempts for resume.
    pub retry: bool,
    /// Overrides the configured `progressDelay` (seconds). Negative
    /// disables the stall check.
    pub retry_delay: Option<f64>,
    pub extra_files: Vec<ExtraFile>,
    /// `-f`: sampled alongside progress, surfaced to the operator.
    pub follow: Option<String>,
    /// Resume keys get this prefix (test fixtures use `rtest`).
    pub key_prefix: Option<String>,
}

struct RunContext<'a> {
    rt: &'a Runtime<'a>,
    store: &'a StateStore,
    key: String,
    settings: RunSettings,
    staging: PathBuf,
}

impl RunContext<'_> {
    fn repo(&self) -> &Path {
        &self.settings.repo_path
    }

    fn exp_dir(&self) -> PathBuf {
        self.settings.repo_path.join(&self.settings.experiment)
    }

    fn results_root_abs(&self) -> PathBuf {
        self.settings.repo_path.join(&self.settings.results_root)
    }

    /// Experiment path relative to the results root ("test/run").
    fn exp_rel(&self) -> &str {
        self.settings
            .experiment
            .strip_prefix(&self.settings.results_root)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(&self.settings.experiment)
    }

    fn tag_name(&self) -> String {
        format!("{}/{}", self.settings.experiment, self.settings.instance)
    }

    fn run_cwd(&self) -> PathBuf {
        let base = if self.settings.in_place {
            self.settings.repo_path.clone()
        } else {
            self.staging.join(TREE_DIR)
        };
        if self.settings.config_dir.is_empty() {
            base
        } else {
            base.join(&self.settings.config_dir)
        }
    }

    fn run_symlink(&self) -> PathBuf {
        self.exp_dir()
            .join(instance_dir_name(self.settings.instance, InstanceState::Run))
    }
}

fn reserved_names() -> Vec<String> {
    [CONFIG_FILE, BUILD_SCRIPT, RUN_SCRIPT, PROGRESS_SCRIPT]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn resolve_message(exp_dir: &Path, instance: u32, opts: &RunOptions) -> Result<String> {
    if let Some(message) = &opts.message {
        let trimmed = message.trim();
        if trimmed.chars().count() >= editor::MIN_MESSAGE_LEN {
            return Ok(trimmed.to_string());
        }
        let edited = editor::prompt(opts.editor.as_deref(), trimmed)?;
        return editor::validate(&edited);
    }

    // A prior `gone` entry for the number being reused seeds the editor, so
    // a failed build's message survives into the retake.
    let seed = index::read(exp_dir, instance)
        .ok()
        .filter(|entry| entry.status == EntryStatus::Gone)
        .map(|entry| entry.message)
        .unwrap_or_default();
    let edited = editor::prompt(opts.editor.as_deref(), &seed)?;
    editor::validate(&edited)
}

fn commit_message(tag: &TagPath, instance: u32, message: &str) -> String {
    format!("{message}\n\n(git-results {tag}/{instance})")
}

/// Execute one fresh run at `tag_path`. Returns the published instance
/// directory on full success; every other terminal state is a typed error.
pub fn run_once(
    rt: &Runtime,
    store: &StateStore,
    repo_root: &Path,
    tag_path: &str,
    opts: &RunOptions,
) -> Result<PathBuf> {
    let tag = TagPath::parse(tag_path)?;
    if tag.is_instance() {
        return Err(Error::Invalid(format!(
            "runs target an experiment path, not an instance: '{tag}'"
        )));
    }

    let mut resolved = config::resolve(repo_root, &tag)?;
    if let Some(delay) = opts.retry_delay {
        resolved.progress_delay = delay;
    }
    if opts.follow.is_some() {
        resolved.follow = opts.follow.clone();
    }
    if tag.to_string() == resolved.results_root {
        return Err(Error::Invalid(format!(
            "tag path '{tag}' needs an experiment segment below the results root"
        )));
    }

    let exp_dir = repo_root.join(tag.to_string());
    let instance = index::next_number(&exp_dir)?;
    let message = resolve_message(&exp_dir, instance, opts)?;

    // PREPARE: the results root goes into .gitignore before any commit so
    // snapshots never include results.
    vcs::add_ignore(repo_root, &resolved.results_root)?;
    let key = store.generate_key(opts.key_prefix.as_deref());
    let results_root_abs = repo_root.join(&resolved.results_root);
    let staging = artifacts::new_staging(rt.fs, &results_root_abs, &key)?;

    // COMMIT
    let reserved = reserved_names();
    let user_rules = IgnoreRules::build(repo_root, &resolved.ignore, &resolved.ignore_ext)?;
    let root_prefix = format!("{}/", resolved.results_root);
    let dirty = vcs::dirty_paths(repo_root, &|path| {
        path == ".gitignore"
            || path == resolved.results_root
            || path.starts_with(&root_prefix)
            || Path::new(path)
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| reserved.iter().any(|r| r == name))
            || user_rules.is_ignored(Path::new(path), false)
    })?;

    let head = vcs::head(repo_root)?;
    let mut rollback_head = None;
    let commit = match head {
        // Unborn branch: the snapshot commit is the only possible tag
        // target, so one is always created.
        None => vcs::commit_all(repo_root, &commit_message(&tag, instance, &message), true)?,
        Some(head) if !dirty.is_empty() => {
            if !opts.auto_commit {
                rt.fs.remove_dir_all(&staging)?;
                return Err(Error::Dirty(dirty));
            }
            rollback_head = Some(head);
            vcs::commit_all(repo_root, &commit_message(&tag, instance, &message), false)?
        }
        Some(head) => head,
    };

    let tag_name = format!("{tag}/{instance}");
    if vcs::tag_sha(repo_root, &tag_name)?.is_some() {
        rt.fs.remove_dir_all(&staging)?;
        if let Some(prev) = &rollback_head {
            vcs::reset_to(repo_root, prev)?;
        }
        return Err(Error::TagExists(tag_name));
    }

    let settings = RunSettings {
        repo_path: repo_root.to_path_buf(),
        experiment: tag.to_string(),
        instance,
        results_root: resolved.results_root,
        config_dir: resolved.config_dir,
        message,
        build: resolved.build,
        run: resolved.run,
        progress: resolved.progress,
        follow: resolved.follow,
        ignore: resolved.ignore,
        ignore_ext: resolved.ignore_ext,
        extra_files: opts.extra_files.clone(),
        commit,
        rollback_head,
        in_place: opts.in_place,
        retry: opts.retry,
        max_retries: resolved.max_retries,
        progress_delay: resolved.progress_delay,
    };
    let mut state = BuildState::fresh();
    store.create(&key, &settings, &state, &staging)?;

    let ctx = RunContext {
        rt,
        store,
        key,
        settings,
        staging,
    };
    write_message_file(&ctx)?;

    if let Err(err) = execute_build(&ctx) {
        rollback(&ctx, true)?;
        return Err(err);
    }
    prepare_run(&ctx)?;
    execute_run(&ctx, &mut state)
}

/// Resume a record by key: re-enter BUILD, re-execute the run command, or
/// replay an interrupted publish, depending on the persisted phase.
pub fn resume(rt: &Runtime, store: &StateStore, key: &str) -> Result<PathBuf> {
    let record = store.load(key)?;
    let mut ctx = RunContext {
        rt,
        store,
        key: key.to_string(),
        settings: record.settings,
        staging: record.staging,
    };

    let mut state = match store.load_build_state(key) {
        Ok(state) => state,
        Err(Error::Corrupt(detail)) => {
            // An unreadable build-state can only be closed out: publish
            // whatever the staging holds as a failure and drop the record.
            display::warn(&format!("unreadable build state; closing out as failed: {detail}"));
            let mut state = BuildState::fresh();
            state.phase = Phase::Publish;
            state.outcome_failed = true;
            publish(&ctx, &mut state, true)?;
            return Err(Error::Corrupt(detail));
        }
        Err(err) => return Err(err),
    };

    // A manual-retry instance parks the staging directory inside the
    // experiment; bring it back under .tmp before re-running.
    if ctx
        .staging
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(InstanceState::ManualRetry.suffix()))
    {
        let fresh = ctx.results_root_abs().join(TMP_DIR).join(&ctx.key);
        if let Some(parent) = fresh.parent() {
            rt.fs.create_dir_all(parent)?;
        }
        rt.fs.rename(&ctx.staging, &fresh)?;
        store.set_staging(&ctx.key, &fresh)?;
        ctx.staging = fresh;
    }

    match state.phase {
        Phase::Build => {
            if let Err(err) = execute_build(&ctx) {
                rollback(&ctx, true)?;
                return Err(err);
            }
            prepare_run(&ctx)?;
            execute_run(&ctx, &mut state)
        }
        Phase::Run => {
            ensure_run_symlink(&ctx)?;
            execute_run(&ctx, &mut state)
        }
        Phase::Publish => {
            let failed = state.outcome_failed;
            let published = publish(&ctx, &mut state, failed)?;
            if failed {
                Err(Error::RunFail(None))
            } else {
                Ok(published)
            }
        }
    }
}

fn write_message_file(ctx: &RunContext) -> Result<()> {
    let contents = format!(
        "{}\n\nTag: {}\nCommit: {}\nDate: {}\n",
        ctx.settings.message,
        ctx.tag_name(),
        ctx.settings.commit,
        ctx.rt.clock.now().to_rfc3339(),
    );
    fs::write(ctx.staging.join(MESSAGE_FILE), contents)?;
    Ok(())
}

fn wait_for(child: &mut Box<dyn ChildHandle>) -> Result<Option<i32>> {
    loop {
        if interrupted() {
            graceful_kill(child.as_mut());
            return Ok(None);
        }
        if let Some(code) = child.poll()? {
            return Ok(Some(code));
        }
        thread::sleep(StdDuration::from_millis(100));
    }
}

fn execute_build(ctx: &RunContext) -> Result<()> {
    if !ctx.settings.in_place && !ctx.staging.join(TREE_DIR).exists() {
        artifacts::seed_tree(ctx.rt.fs, ctx.repo(), &ctx.staging)?;
    }
    ctx.rt.fs.create_dir_all(&ctx.run_cwd())?;

    if let Some(build) = &ctx.settings.build {
        display::detail(&format!("build: {build}"));
        let spec = LaunchSpec {
            command: build.clone(),
            cwd: ctx.run_cwd(),
            stdout: ctx.staging.join(STDOUT_FILE),
            stderr: ctx.staging.join(STDERR_FILE),
        };
        let mut child = ctx.rt.launcher.launch(&spec)?;
        match wait_for(&mut child)? {
            Some(0) => {}
            code => return Err(Error::BuildFail(code)),
        }
    }
    Ok(())
}

/// Post-build bookkeeping: snapshot the listing artifacts will be diffed
/// against, pull in extra files (they publish as artifacts), drop the retry
/// key, and materialize the `N-run` symlink.
fn prepare_run(ctx: &RunContext) -> Result<()> {
    let run_cwd = ctx.run_cwd();
    let baseline = artifacts::capture_listing(&run_cwd)?;
    artifacts::write_baseline(&ctx.staging, &baseline)?;

    let extras: Vec<(PathBuf, String)> = ctx
        .settings
        .extra_files
        .iter()
        .map(|extra| (extra.source.clone(), extra.name.clone()))
        .collect();
    artifacts::import_extras(ctx.rt.fs, &run_cwd, &extras)?;

    if ctx.settings.retry {
        fs::write(ctx.staging.join(RETRY_KEY_FILE), &ctx.key)?;
    }
    ensure_run_symlink(ctx)
}

fn ensure_run_symlink(ctx: &RunContext) -> Result<()> {
    let exp_dir = ctx.exp_dir();
    ctx.rt.fs.create_dir_all(&exp_dir)?;
    let link = ctx.run_symlink();
    if !artifacts::lexists(&link) {
        let target = artifacts::relative_target(&exp_dir, &ctx.staging);
        ctx.rt.fs.symlink(&target, &link)?;
    }
    Ok(())
}

fn sample_interval(progress_delay: f64) -> f64 {
    (progress_delay / 4.0).max(1.0)
}

fn sample_progress(ctx: &RunContext, state: &mut BuildState) -> Result<()> {
    if let Some(command) = &ctx.settings.progress {
        if let Ok(captured) = ctx.rt.launcher.capture(command, &ctx.run_cwd()) {
            state.last_progress = Some(ProgressSample {
                metric: captured.stdout,
                observed_at: ctx.rt.clock.now(),
            });
            ctx.store.save_build_state(&ctx.key, state)?;
        }
    }
    if let Some(command) = &ctx.settings.follow {
        if let Ok(captured) = ctx.rt.launcher.capture(command, &ctx.run_cwd()) {
            display::follow(&captured.stdout);
        }
    }
    Ok(())
}

/// Final observation for the attempt: did the metric move relative to where
/// it stood when the attempt began?
fn attempt_progressed(ctx: &RunContext, state: &mut BuildState, baseline: &Option<ProgressSample>) -> bool {
    if ctx.settings.progress_delay < 0.0 {
        // Stall detection disabled (skewed-mtime filesystems).
        return true;
    }
    let Some(command) = &ctx.settings.progress else {
        return false;
    };
    let Ok(captured) = ctx.rt.launcher.capture(command, &ctx.run_cwd()) else {
        return false;
    };
    let changed = baseline
        .as_ref()
        .is_some_and(|sample| sample.metric != captured.stdout);
    state.last_progress = Some(ProgressSample {
        metric: captured.stdout,
        observed_at: ctx.rt.clock.now(),
    });
    changed
}

fn execute_run(ctx: &RunContext, state: &mut BuildState) -> Result<PathBuf> {
    let attempt_baseline = state.last_progress.clone();
    state.phase = Phase::Run;
    state.last_attempt = Some(ctx.rt.clock.now());
    ctx.store.save_build_state(&ctx.key, state)?;

    display::detail(&format!("run: {}", ctx.settings.run));
    let spec = LaunchSpec {
        command: ctx.settings.run.clone(),
        cwd: ctx.run_cwd(),
        stdout: ctx.staging.join(STDOUT_FILE),
        stderr: ctx.staging.join(STDERR_FILE),
    };
    let mut child = ctx.rt.launcher.launch(&spec)?;

    let interval = sample_interval(ctx.settings.progress_delay);
    let mut next_sample = ctx.rt.clock.now();
    let code = loop {
        if interrupted() {
            // Leave the record in the run phase for the next Supervisor
            // pass; the increment stops a kill loop from retrying forever.
            graceful_kill(child.as_mut());
            state.retries += 1;
            ctx.store.save_build_state(&ctx.key, state)?;
            return Err(Error::RunFail(None));
        }
        if let Some(code) = child.poll()? {
            break code;
        }
        let now = ctx.rt.clock.now();
        if now >= next_sample {
            sample_progress(ctx, state)?;
            next_sample = now + Duration::milliseconds((interval * 1000.0) as i64);
        }
        thread::sleep(StdDuration::from_millis(100));
    };

    if code == 0 {
        return publish(ctx, state, false);
    }

    if !ctx.settings.retry {
        publish(ctx, state, true)?;
        return Err(Error::RunFail(Some(code)));
    }

    let progressed = attempt_progressed(ctx, state, &attempt_baseline);
    if progressed {
        state.retries = 0;
    }
    state.retries += 1;
    ctx.store.save_build_state(&ctx.key, state)?;

    if state.retries >= ctx.settings.max_retries && !progressed {
        manual_transition(ctx, state)?;
        return Err(Error::Stalled {
            attempts: state.retries,
        });
    }

    display::info(&format!(
        "run failed (attempt {}); resumable via key {}",
        state.retries, ctx.key
    ));
    Err(Error::RunFail(Some(code)))
}

fn graceful_kill(child: &mut dyn ChildHandle) {
    let _ = child.terminate();
    for _ in 0..50 {
        if let Ok(Some(_)) = child.poll() {
            return;
        }
        thread::sleep(StdDuration::from_millis(100));
    }
    let _ = child.kill();
    let _ = child.poll();
}

/// PUBLISH: tag → instance directory → dated/latest views → INDEX, then the
/// record and staging are consumed. Replay after an interruption tolerates
/// a tag already pointing at the snapshot commit, an existing instance
/// directory, and existing symlinks.
fn publish(ctx: &RunContext, state: &mut BuildState, failed: bool) -> Result<PathBuf> {
    state.phase = Phase::Publish;
    state.outcome_failed = failed;
    ctx.store.save_build_state(&ctx.key, state)?;

    let repo = ctx.repo();
    let tag_name = ctx.tag_name();
    match vcs::tag(repo, &tag_name, &ctx.settings.commit) {
        Ok(()) => {}
        Err(Error::TagExists(_)) => {
            let existing = vcs::tag_sha(repo, &tag_name)?;
            if existing.as_deref() != Some(ctx.settings.commit.as_str()) {
                rollback(ctx, true)?;
                return Err(Error::TagExists(tag_name));
            }
        }
        Err(err) => return Err(err),
    }

    let suffix = if failed {
        InstanceState::Fail
    } else {
        InstanceState::Ok
    };
    let dir_name = instance_dir_name(ctx.settings.instance, suffix);
    let exp_dir = ctx.exp_dir();
    let target = exp_dir.join(&dir_name);

    let link = ctx.run_symlink();
    if artifacts::lexists(&link) {
        ctx.rt.fs.remove_file(&link)?;
    }

    let run_cwd = ctx.run_cwd();
    let baseline = artifacts::read_baseline(&ctx.staging).unwrap_or_default();
    let new_files = artifacts::new_files(&run_cwd, &baseline)?;
    let rules = IgnoreRules::build(&run_cwd, &ctx.settings.ignore, &ctx.settings.ignore_ext)?;
    let reserved = reserved_names();
    let mut skip_prefixes = Vec::new();
    if ctx.settings.in_place {
        if let Some(rel) = ctx
            .settings
            .results_root
            .strip_prefix(&ctx.settings.config_dir)
        {
            skip_prefixes.push(PathBuf::from(rel.trim_start_matches('/')));
        }
    }
    let quarantined = artifacts::publish(
        ctx.rt.fs,
        &PublishPlan {
            staging: &ctx.staging,
            run_cwd: &run_cwd,
            new_files: &new_files,
            target: &target,
            rules: &rules,
            reserved: &reserved,
            skip_prefixes: &skip_prefixes,
        },
    )?;

    artifacts::publish_views(
        ctx.rt.fs,
        &ctx.results_root_abs(),
        &exp_dir,
        ctx.exp_rel(),
        &dir_name,
        failed,
        &ctx.rt.clock.now(),
    )?;

    let status = if failed || !quarantined.is_empty() {
        EntryStatus::Fail
    } else {
        EntryStatus::Ok
    };
    index::append(&exp_dir, ctx.settings.instance, status, &ctx.settings.message)?;

    ctx.store.delete(&ctx.key)?;
    if quarantined.is_empty() {
        if ctx.staging.exists() {
            ctx.rt.fs.remove_dir_all(&ctx.staging)?;
        }
        Ok(target)
    } else {
        // The staging area is left in place for inspection.
        Err(Error::Io(std::io::Error::other(format!(
            "failed to place {} result file(s); left under {}/{}",
            quarantined.len(),
            dir_name,
            artifacts::UNSTAGED_DIR,
        ))))
    }
}

/// ROLLBACK: undo the snapshot commit when one was auto-created, drop the
/// staging area and the `N-run` symlink, delete the record, and account for
/// the burned instance number with a `gone` line.
fn rollback(ctx: &RunContext, gone_line: bool) -> Result<()> {
    let link = ctx.run_symlink();
    if artifacts::lexists(&link) {
        ctx.rt.fs.remove_file(&link)?;
    }
    if ctx.staging.exists() {
        ctx.rt.fs.remove_dir_all(&ctx.staging)?;
    }
    if let Some(prev) = &ctx.settings.rollback_head {
        vcs::reset_to(ctx.repo(), prev)?;
    }
    if gone_line {
        index::append(
            &ctx.exp_dir(),
            ctx.settings.instance,
            EntryStatus::Gone,
            &ctx.settings.message,
        )?;
    }
    ctx.store.delete(&ctx.key)?;
    Ok(())
}

/// MANUAL: park the staging directory as `<experiment>/N-manual-retry` and
/// keep the record for an operator (or `supervisor --manual`) to pick up.
fn manual_transition(ctx: &RunContext, state: &mut BuildState) -> Result<()> {
    let link = ctx.run_symlink();
    if artifacts::lexists(&link) {
        ctx.rt.fs.remove_file(&link)?;
    }
    let manual = ctx.exp_dir().join(instance_dir_name(
        ctx.settings.instance,
        InstanceState::ManualRetry,
    ));
    ctx.rt.fs.rename(&ctx.staging, &manual)?;
    ctx.store.set_staging(&ctx.key, &manual)?;
    ctx.store.save_build_state(&ctx.key, state)?;
    display::warn(&format!(
        "no progress after {} attempts; parked at {} (resume key {})",
        state.retries,
        manual.display(),
        ctx.key
    ));
    Ok(())
}
