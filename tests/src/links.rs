use crate::fixtures::*;

fn rt() -> Runtime<'static> {
    Runtime::system()
}

#[test]
fn linking_an_experiment_shares_the_commit_and_the_views() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;

    // Paths outside any results root are refused helpfully.
    match treeops::link_path(&rt(), repo.path(), "test/run", "test/run2") {
        Err(Error::NotFound { root_missing: true, .. }) => {}
        other => panic!("expected NotFound, got {other:?}"),
    }

    treeops::link_path(&rt(), repo.path(), "results/test/run", "results/test/run2")?;

    repo.assert_tag_matches_message("results/test/run/1", "")?;
    repo.assert_tag_matches_message("results/test/run2/1", "")?;
    assert_eq!(
        repo.tag_sha("results/test/run/1")?,
        repo.tag_sha("results/test/run2/1")?
    );
    assert_eq!(repo.read("results/latest/test/run/stdout")?, "Hello, world\n");
    assert_eq!(repo.read("results/latest/test/run2/stdout")?, "Hello, world\n");
    assert_eq!(repo.index("results/test/run2")?, "1 (  ok) - Woo woo\n");
    Ok(())
}

#[test]
fn linking_carries_failure_status_over() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;

    repo.config("\n[\"/results\"]\nrun = \"wihefiaheifwf\"\n", false)?;
    match repo.run("results/test/run", "Woo fail") {
        Err(Error::RunFail(_)) => {}
        other => panic!("expected RunFail, got {other:?}"),
    }

    treeops::link_path(&rt(), repo.path(), "results/test/run", "results/test/run3")?;

    repo.assert_tag_matches_message("results/test/run/2", "-fail")?;
    repo.assert_tag_matches_message("results/test/run3/2", "-fail")?;
    assert_eq!(repo.read("results/latest/test/run3-fail/stdout")?, "");
    assert!(repo.index("results/test/run3")?.ends_with("2 (fail) - Woo fail\n"));
    // The source is untouched.
    assert!(repo.lexists("results/test/run/1"));
    assert!(repo.lexists("results/test/run/2-fail"));
    Ok(())
}

#[test]
fn linking_refuses_an_existing_destination() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo woo")?;
    repo.run("results/test/other", "Woo woo")?;

    match treeops::link_path(&rt(), repo.path(), "results/test/run", "results/test/other") {
        Err(Error::DestinationExists(path)) => assert_eq!(path, "results/test/other"),
        other => panic!("expected DestinationExists, got {other:?}"),
    }
    Ok(())
}

#[test]
fn linking_a_single_instance_copies_just_that_entry() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.run("results/test/run", "Woo one")?;
    repo.run("results/test/run", "Woo two")?;

    treeops::link_path(&rt(), repo.path(), "results/test/run/1", "results/test/pick/7")?;

    assert!(repo.lexists("results/test/pick/7"));
    assert!(!repo.lexists("results/test/pick/1"));
    assert_eq!(repo.index("results/test/pick")?, "7 (  ok) - Woo one\n");
    repo.assert_tag_matches_message("results/test/pick/7", "")?;
    assert_eq!(
        repo.tag_sha("results/test/run/1")?,
        repo.tag_sha("results/test/pick/7")?
    );
    // Source untouched, including its ledger.
    assert!(repo.lexists("results/test/run/1"));
    assert!(repo.index("results/test/run")?.starts_with("1 (  ok) - Woo one\n"));
    Ok(())
}
