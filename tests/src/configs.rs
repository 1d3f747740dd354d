use crate::fixtures::*;

#[test]
fn config_files_compose_across_directories() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config("\n[\"/r\"]\nbuild = \"\"\nrun = \"echo HMM | tee outMain\"\n", false)?;
    repo.config_at(
        "round2",
        "[\"/r/test\"]\nbuild = \"\"\nrun = \"echo ROUND2 | tee outTwo\"\n",
        true,
    )?;

    repo.run("r/test", "Check this out")?;
    repo.run("round2/r/test", "Check that out")?;
    repo.run("round2/r/test", "Check us out")?;

    // Each results root earned its own anchored .gitignore entry.
    assert_eq!(repo.read(".gitignore")?, "\n/r\n/round2/r");

    repo.assert_tag_matches_message("r/test/1", "")?;
    repo.assert_tag_matches_message("round2/r/test/1", "")?;
    repo.assert_tag_matches_message("round2/r/test/2", "")?;

    assert_eq!(repo.index("r/test")?, "1 (  ok) - Check this out\n");
    assert_eq!(
        repo.index("round2/r/test")?,
        "1 (  ok) - Check that out\n2 (  ok) - Check us out\n"
    );

    assert_eq!(repo.read("r/test/1/outMain")?, "HMM\n");
    assert_eq!(repo.read("round2/r/test/1/outTwo")?, "ROUND2\n");
    assert_eq!(repo.read("round2/r/test/2/outTwo")?, "ROUND2\n");
    Ok(())
}

#[test]
fn extra_files_resolve_against_the_sub_config_cwd() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config_at(
        "round2",
        "[\"/r/blah\"]\nbuild = \"\"\nrun = \"ls && cp f a && cp ../f b\"\n",
        true,
    )?;
    repo.write("test1", "1")?;
    repo.write("test2", "2")?;
    repo.commit_all("add inputs")?;

    let mut opts = repo.opts("imported pair");
    opts.extra_files = vec![
        ExtraFile {
            source: repo.path().join("test1"),
            name: "f".to_string(),
        },
        ExtraFile {
            source: repo.path().join("test2"),
            name: "../f".to_string(),
        },
    ];
    repo.run_with("round2/r/blah", &opts)?;

    assert!(repo.lexists("round2/r/blah/1"));
    // The import lands in the run cwd (the config's directory)...
    assert_eq!(repo.read("round2/r/blah/1/f")?, "1");
    // ...and the run could read both placements.
    assert_eq!(repo.read("round2/r/blah/1/a")?, "1");
    assert_eq!(repo.read("round2/r/blah/1/b")?, "2");
    // Pre-existing files above the config dir are not artifacts.
    assert!(!repo.lexists("round2/r/blah/1/test1"));
    assert!(!repo.lexists("round2/r/blah/1/test2"));
    Ok(())
}

#[test]
fn cyclic_variables_refuse_the_run() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config(
        "\n[vars]\na = \"{b}\"\nb = \"{a}\"\n\n[\"/r\"]\nbuild = \"\"\nrun = \"echo {a}\"\n",
        false,
    )?;

    match repo.run("r/test", "never starts") {
        Err(Error::Invalid(message)) => {
            assert!(message.contains("cyclical"), "got: {message}");
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
    assert!(!repo.lexists("r"));
    Ok(())
}
