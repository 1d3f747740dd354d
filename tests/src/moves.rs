use crate::fixtures::*;

fn rt() -> Runtime<'static> {
    Runtime::system()
}

#[test]
fn moving_an_experiment_relocates_everything_and_frees_the_path() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;

    treeops::move_path(&rt(), repo.path(), "results/test/run", "results/test/trash/run2")?;

    assert!(!repo.lexists("results/test/run"));
    assert_eq!(repo.tag_sha("results/test/run/1")?, None);
    assert!(repo.lexists("results/test/trash/run2/1"));
    assert!(repo.lexists("results/test/trash/run2/INDEX"));
    repo.assert_tag_matches_message("results/test/trash/run2/1", "")?;

    // The views follow the move.
    assert!(!repo.dated_dir("results", "test/run").exists());
    assert!(fs::symlink_metadata(repo.dated_dir("results", "test/trash/run2")).is_ok());
    assert!(!repo.lexists("results/latest/test/run"));
    assert!(repo.lexists("results/latest/test/trash/run2"));

    // The old path restarts from one.
    repo.run("results/test/run", "Woooo again")?;
    repo.assert_tag_matches_message("results/test/run/1", "")?;
    Ok(())
}

#[test]
fn moving_an_instance_leaves_a_move_line_behind() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;

    treeops::move_path(&rt(), repo.path(), "results/test/run/1", "results/test/run2/1")?;

    assert!(repo.lexists("results/test/run"));
    assert!(!repo.lexists("results/test/run/1"));
    assert_eq!(
        repo.index("results/test/run")?,
        "1 (move) - (moved to results/test/run2/1) Woo woo\n"
    );

    assert!(repo.lexists("results/test/run2/1"));
    assert_eq!(repo.index("results/test/run2")?, "1 (  ok) - Woo woo\n");
    repo.assert_tag_matches_message("results/test/run2/1", "")?;
    assert_eq!(repo.tag_sha("results/test/run/1")?, None);

    assert!(!repo.dated_dir("results", "test/run").exists());
    assert!(repo.dated_dir("results", "test/run2").join("1").exists());
    assert!(!repo.lexists("results/latest/test/run"));
    assert!(repo.lexists("results/latest/test/run2"));
    Ok(())
}

#[test]
fn missing_sources_distinguish_root_from_entry() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;

    match treeops::move_path(&rt(), repo.path(), "results/blah", "results/blah2") {
        Err(Error::NotFound { root_missing: true, path }) => assert_eq!(path, "results"),
        other => panic!("expected root-missing NotFound, got {other:?}"),
    }
    let message = Error::NotFound {
        root_missing: true,
        path: "results".to_string(),
    }
    .to_string();
    assert_eq!(message, "Results folder 'results' not found");

    repo.run("results/test", "yee haw")?;
    match treeops::move_path(&rt(), repo.path(), "results/blah", "results/blah2") {
        Err(Error::NotFound { root_missing: false, path }) => assert_eq!(path, "results/blah"),
        other => panic!("expected entry-missing NotFound, got {other:?}"),
    }
    let message = Error::NotFound {
        root_missing: false,
        path: "results/blah".to_string(),
    }
    .to_string();
    assert_eq!(message, "No result found under 'results/blah'");
    Ok(())
}

#[test]
fn mixed_granularity_is_refused_both_ways() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;

    match treeops::move_path(&rt(), repo.path(), "results/test/run/1", "results/test/run2") {
        Err(Error::Invalid(_)) => {}
        other => panic!("expected Invalid, got {other:?}"),
    }
    match treeops::move_path(&rt(), repo.path(), "results/test/run", "results/test/run2/1") {
        Err(Error::Invalid(_)) => {}
        other => panic!("expected Invalid, got {other:?}"),
    }
    Ok(())
}

#[test]
fn instance_moves_renumber_and_refuse_collisions() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config_at("round2", "[\"/\"]\nbuild = \"\"\nrun = \"echo ROUND2\"\n", true)?;
    repo.run("round2/results/test/run1", "Woo one")?;
    repo.run("round2/results/test/run2", "Woo two")?;
    repo.run("round2/results/test/run3", "Woo three")?;

    treeops::move_path(
        &rt(),
        repo.path(),
        "round2/results/test/run2/1",
        "round2/results/test/run1/2",
    )?;

    match treeops::move_path(
        &rt(),
        repo.path(),
        "round2/results/test/run3/1",
        "round2/results/test/run1/2",
    ) {
        Err(Error::DestinationExists(_)) => {}
        other => panic!("expected DestinationExists, got {other:?}"),
    }

    treeops::move_path(
        &rt(),
        repo.path(),
        "round2/results/test/run3/1",
        "round2/results/test/run1/3",
    )?;

    for instance in 1..=3 {
        repo.assert_tag_matches_message(&format!("round2/results/test/run1/{instance}"), "")?;
    }
    for rel in ["run1/1", "run1/2", "run1/3", "run2/INDEX", "run3/INDEX"] {
        assert!(repo.lexists(&format!("round2/results/test/{rel}")), "missing {rel}");
    }
    for rel in ["run2/1", "run3/1"] {
        assert!(!repo.lexists(&format!("round2/results/test/{rel}")), "unexpected {rel}");
    }

    assert_eq!(
        repo.index("round2/results/test/run1")?,
        "1 (  ok) - Woo one\n2 (  ok) - Woo two\n3 (  ok) - Woo three\n"
    );
    assert_eq!(
        repo.index("round2/results/test/run2")?,
        "1 (move) - (moved to round2/results/test/run1/2) Woo two\n"
    );
    assert_eq!(
        repo.index("round2/results/test/run3")?,
        "1 (move) - (moved to round2/results/test/run1/3) Woo three\n"
    );
    Ok(())
}

#[test]
fn moving_there_and_back_restores_the_original_layout() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;
    let sha_before = repo.tag_sha("results/test/run/1")?;
    let stdout_before = repo.read("results/test/run/1/stdout")?;

    treeops::move_path(&rt(), repo.path(), "results/test/run", "results/test/run9")?;
    treeops::move_path(&rt(), repo.path(), "results/test/run9", "results/test/run")?;

    assert_eq!(repo.tag_sha("results/test/run/1")?, sha_before);
    assert_eq!(repo.tag_sha("results/test/run9/1")?, None);
    assert_eq!(repo.read("results/test/run/1/stdout")?, stdout_before);
    assert!(!repo.lexists("results/test/run9"));
    // The ledger still reads the same final status for the instance.
    assert_eq!(
        index::read(&repo.path().join("results/test/run"), 1)?.message,
        "Woo woo"
    );
    assert!(repo.lexists("results/latest/test/run"));
    assert!(fs::symlink_metadata(repo.dated_dir("results", "test/run")).is_ok());
    Ok(())
}

#[test]
fn a_deleted_tag_is_recovered_from_the_message_file() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test", "yee haw")?;
    vcs::delete_tag(repo.path(), "results/test/1")?;

    treeops::move_path(&rt(), repo.path(), "results/test", "results/test2")?;

    assert!(repo.lexists("results/test2/1"));
    assert!(!repo.lexists("results/test"));
    repo.assert_tag_matches_message("results/test2/1", "")?;
    Ok(())
}

#[test]
fn failed_instances_move_with_their_suffix_and_views() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config("\n[\"/results\"]\nrun = \"hiwehfiahef\"\n", false)?;
    match repo.run("results/test/run", "woo fail") {
        Err(Error::RunFail(_)) => {}
        other => panic!("expected RunFail, got {other:?}"),
    }

    treeops::move_path(&rt(), repo.path(), "results/test/run", "results/test/run2")?;

    assert!(!repo.lexists("results/test/run"));
    assert!(!repo.dated_dir("results", "test/run").exists());
    let dated = repo.dated_dir("results", "test/run2");
    assert_eq!(fs::read_to_string(dated.join("1-fail/stdout"))?, "");
    repo.assert_tag_matches_message("results/test/run2/1", "-fail")?;
    assert!(repo.lexists("results/latest/test/run2-fail"));
    Ok(())
}
