use crate::fixtures::*;

#[test]
fn failed_build_leaves_only_a_gone_line() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config("\n[\"/results\"]\nbuild = \"Fhgwgds\"\n", false)?;

    match repo.run("results/test/run", "Imma fail") {
        Err(Error::BuildFail(Some(_))) => {}
        other => panic!("expected BuildFail, got {other:?}"),
    }

    assert_eq!(repo.tag_sha("results/test/run/1")?, None);
    assert!(!repo.lexists("results/test/run/1"));
    assert!(!repo.lexists("results/test/run/1-run"));
    assert!(repo.lexists("results/test/run/INDEX"));
    assert_eq!(repo.index("results/test/run")?, "1 (gone) - Imma fail\n");
    assert!(!repo.lexists("results/dated"));
    assert!(!repo.lexists("results/latest"));
    // The results root survives thanks to the INDEX.
    assert!(repo.lexists("results"));
    assert_eq!(repo.staging_count("results"), 0);
    assert!(repo.store().list()?.is_empty());
    Ok(())
}

#[test]
fn gone_numbers_are_retaken_with_the_seeded_message() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "hello one")?;

    repo.config("\n[\"/results\"]\nbuild = \"hehehihoweihfowhef\"\n", false)?;
    match repo.run("results/test/run", "hello two") {
        Err(Error::BuildFail(_)) => {}
        other => panic!("expected BuildFail, got {other:?}"),
    }
    assert_eq!(
        repo.index("results/test/run")?,
        "1 (  ok) - hello one\n2 (gone) - hello two\n"
    );

    // Repair the build through a deeper scope; with no -m the editor opens,
    // seeded with the gone entry's message, and the retake reuses its
    // number.
    repo.config(
        "\n[\"/results/test\"]\nbuild = \"cp hello_world hello_world_2\"\n",
        false,
    )?;
    let mut opts = repo.opts("unused");
    opts.message = None;
    opts.editor = Some("echo ', now h2' >>".to_string());
    repo.run_with("results/test/run", &opts)?;

    assert_eq!(
        repo.index("results/test/run")?,
        "1 (  ok) - hello one\n2 (gone) - hello two\n2 (  ok) - hello two, now h2\n"
    );
    assert!(repo.lexists("results/test/run/2"));
    repo.assert_tag_matches_message("results/test/run/2", "")?;
    Ok(())
}

#[test]
fn snapshot_commit_rolls_back_when_the_build_fails() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    let before = vcs::head(repo.path())?.expect("fixture has a commit");

    repo.write_executable("hello_world", "#!/bin/sh\necho changed\n")?;
    repo.config("\n[\"/results\"]\nbuild = \"Fhgwgds\"\n", false)?;
    let mut opts = repo.opts("roll me back");
    opts.auto_commit = true;
    match repo.run_with("results/test/run", &opts) {
        Err(Error::BuildFail(_)) => {}
        other => panic!("expected BuildFail, got {other:?}"),
    }

    // The self-deleting commit is gone; the edit is still in the tree.
    assert_eq!(vcs::head(repo.path())?, Some(before));
    assert_eq!(repo.read("hello_world")?, "#!/bin/sh\necho changed\n");
    Ok(())
}

#[test]
fn existing_tag_refuses_the_run_without_side_effects() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test", "take one")?;
    assert!(repo.lexists("results/test/1"));

    // Wipe the results tree; the tag survives and blocks number reuse.
    fs::remove_dir_all(repo.path().join("results"))?;
    match repo.run("results/test", "take two") {
        Err(Error::TagExists(name)) => assert_eq!(name, "results/test/1"),
        other => panic!("expected TagExists, got {other:?}"),
    }

    assert!(!repo.lexists("results/test/1"));
    assert!(!repo.lexists("results/test/INDEX"));
    assert_eq!(repo.staging_count("results"), 0);
    assert!(repo.store().list()?.is_empty());
    Ok(())
}

#[test]
fn unborn_repositories_get_their_snapshot_commit() -> TestResult {
    // The README flow: a fresh `git init` with only a config file.
    let repo = ExperimentRepo::new()?;
    repo.config("[\"/\"]\nrun = \"echo 'Hello, world'\"\n", true)?;

    repo.run("results/test/run", "Let's see if it prints")?;
    assert_eq!(repo.read("results/test/run/1/stdout")?, "Hello, world\n");
    repo.assert_tag_matches_message("results/test/run/1", "")?;
    Ok(())
}
