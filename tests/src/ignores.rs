use crate::fixtures::*;

const TOUCH_SCRIPT: &str = "#!/bin/sh
set -e
touch a; touch b; touch c
mkdir -p d; touch d/a; touch d/b
mkdir -p e; touch e/a; touch e/b
mkdir -p f/e; touch f/e/a; touch f/e/b
";

#[test]
fn ignore_rules_filter_artifacts_with_negations_and_anchors() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.write_executable("mk-files", TOUCH_SCRIPT)?;
    repo.commit_all("add artifact script")?;
    repo.config(
        "\n[\"/r\"]\nbuild = \"\"\nrun = \"./mk-files\"\nignore = [\"a\", \"!e/a\", \"/e/b\"]\n",
        false,
    )?;

    repo.run("r/test", "filter files")?;

    let root = "r/test/1";
    // Bare glob: any depth, unless negated back in.
    assert!(!repo.lexists(&format!("{root}/a")));
    assert!(!repo.lexists(&format!("{root}/d/a")));
    assert!(repo.lexists(&format!("{root}/e/a")));
    // Anchored rule only bites at the run cwd root.
    assert!(!repo.lexists(&format!("{root}/e/b")));
    assert!(repo.lexists(&format!("{root}/f/e/b")));
    // Untouched names pass.
    assert!(repo.lexists(&format!("{root}/b")));
    assert!(repo.lexists(&format!("{root}/c")));
    assert!(repo.lexists(&format!("{root}/d/b")));
    assert!(repo.lexists(&format!("{root}/f/e/a")));
    Ok(())
}

#[test]
fn sub_config_rules_apply_relative_to_their_directory() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.write_executable("mk-files", TOUCH_SCRIPT)?;
    repo.commit_all("add artifact script")?;
    repo.config_at(
        "sub",
        "[\"/\"]\nbuild = \"\"\nrun = \"../mk-files\"\nignore = [\"a\", \"!e/a\", \"/e/b\"]\n",
        true,
    )?;

    repo.run("sub/r/test", "filter files below")?;

    let root = "sub/r/test/1";
    assert!(!repo.lexists(&format!("{root}/a")));
    assert!(repo.lexists(&format!("{root}/b")));
    assert!(repo.lexists(&format!("{root}/e/a")));
    assert!(!repo.lexists(&format!("{root}/e/b")));
    assert!(repo.lexists(&format!("{root}/f/e/b")));
    Ok(())
}

#[test]
fn ignore_ext_is_a_trailing_glob_shorthand() -> TestResult {
    let repo = ExperimentRepo::with_hello_world()?;
    repo.config(
        "\n[\"/results\"]\nbuild = \"\"\nignoreExt = [\"a\", \"c\"]\nrun = \"touch 1.a && touch 1.b && touch 1.c && touch 1.d\"\n",
        false,
    )?;

    repo.run("results/test", "extension filter")?;

    assert!(!repo.lexists("results/test/1/1.a"));
    assert!(repo.lexists("results/test/1/1.b"));
    assert!(!repo.lexists("results/test/1/1.c"));
    assert!(repo.lexists("results/test/1/1.d"));
    Ok(())
}
