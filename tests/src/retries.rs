use crate::fixtures::*;

/// A run that fails twice, writing progress each time, then succeeds: the
/// retry scripts from the original harness, in shell.
fn retry_fixture() -> TestResult<ExperimentRepo> {
    let repo = ExperimentRepo::new()?;
    repo.write_executable("git-results-build", "#!/bin/sh\n")?;
    repo.write_executable(
        "git-results-run",
        "#!/bin/sh
lines=0
if [ -f work ]; then lines=$(wc -l < work); fi
if [ \"$lines\" -lt 2 ]; then
  echo HI >> work
  echo 'Booo!' >&2
  exit 1
fi
",
    )?;
    repo.write_executable("git-results-progress", "#!/bin/sh\ncat work 2>/dev/null | wc -l\n")?;
    Ok(repo)
}

/// Same shape, but the run never makes progress.
fn stuck_fixture() -> TestResult<ExperimentRepo> {
    let repo = ExperimentRepo::new()?;
    repo.write_executable("git-results-build", "#!/bin/sh\n")?;
    repo.write_executable("git-results-run", "#!/bin/sh\necho 'Booo!' >&2\nexit 1\n")?;
    repo.write_executable("git-results-progress", "#!/bin/sh\ncat work 2>/dev/null | wc -l\n")?;
    Ok(repo)
}

fn retry_opts(repo: &ExperimentRepo) -> RunOptions {
    let mut opts = repo.opts("aaaaa retry");
    opts.retry = true;
    opts.retry_delay = Some(0.0);
    opts
}

#[test]
fn failed_attempts_leave_a_resumable_record_and_key() -> TestResult {
    let repo = retry_fixture()?;
    match repo.run_with("results/test", &retry_opts(&repo)) {
        Err(Error::RunFail(Some(_))) => {}
        other => panic!("expected RunFail, got {other:?}"),
    }

    // The in-flight instance is visible through the -run symlink, and the
    // key inside it names the record.
    let key = repo.read("results/test/1-run/git-results-retry-key")?;
    assert!(key.starts_with(KEY_PREFIX));
    assert!(repo.store().record_dir(&key).exists());
    assert_eq!(repo.read("results/test/1-run/work")?, "HI\n");
    // Nothing published yet.
    assert!(!repo.lexists("results/test/1"));
    assert!(!repo.lexists("results/test/INDEX"));
    Ok(())
}

#[test]
fn manual_continues_resume_until_the_run_succeeds() -> TestResult {
    let repo = retry_fixture()?;
    let _ = repo.run_with("results/test", &retry_opts(&repo));
    let key = repo.read("results/test/1-run/git-results-retry-key")?;
    let store = repo.store();

    // Attempt two still fails but shows progress; the record survives.
    match repo.resume(&key) {
        Err(Error::RunFail(Some(_))) => {}
        other => panic!("expected RunFail, got {other:?}"),
    }
    assert!(store.record_dir(&key).exists());

    // Attempt three succeeds and consumes everything.
    repo.resume(&key)?;
    assert_eq!(repo.read("results/test/1/work")?, "HI\nHI\n");
    assert!(!store.record_dir(&key).exists());
    assert!(!repo.lexists("results/test/1-run"));
    assert!(repo.index("results/test")?.ends_with("1 (  ok) - aaaaa retry\n"));
    repo.assert_tag_matches_message("results/test/1", "")?;
    assert_eq!(repo.staging_count("results"), 0);
    Ok(())
}

#[test]
fn attempts_without_progress_park_in_manual_retry() -> TestResult {
    let repo = stuck_fixture()?;
    let _ = repo.run_with("results/test", &retry_opts(&repo));
    let key = repo.read("results/test/1-run/git-results-retry-key")?;
    let store = repo.store();

    match repo.resume(&key) {
        Err(Error::RunFail(Some(_))) => {}
        other => panic!("expected RunFail, got {other:?}"),
    }

    // Third attempt exhausts maxRetries with a flat metric.
    match repo.resume(&key) {
        Err(Error::Stalled { attempts: 3 }) => {}
        other => panic!("expected Stalled, got {other:?}"),
    }

    assert!(repo.lexists("results/test/1-manual-retry"));
    assert!(!repo.lexists("results/test/1-run"));
    assert!(!repo.lexists("results/test/1-fail"));
    // The record stays for the operator.
    assert!(store.record_dir(&key).exists());

    // An operator continue pulls it back out of limbo and tries again.
    match repo.resume(&key) {
        Err(Error::Stalled { .. }) => {}
        other => panic!("expected Stalled again, got {other:?}"),
    }
    assert!(repo.lexists("results/test/1-manual-retry"));
    Ok(())
}

#[test]
fn a_corrupt_build_state_closes_the_run_out_as_failed() -> TestResult {
    let repo = retry_fixture()?;
    let _ = repo.run_with("results/test", &retry_opts(&repo));
    let key = repo.read("results/test/1-run/git-results-retry-key")?;
    let store = repo.store();

    fs::write(store.record_dir(&key).join("build-state"), "Hehfaiwehf")?;

    match repo.resume(&key) {
        Err(Error::Corrupt(_)) => {}
        other => panic!("expected Corrupt, got {other:?}"),
    }

    assert!(repo.lexists("results/test/1-fail/stderr"));
    assert!(!store.record_dir(&key).exists());
    Ok(())
}
