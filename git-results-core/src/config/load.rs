fn parse_config(dir: String, contents: &str) -> Result<ConfigFile> {
    let table: toml::Table = contents
        .parse()
        .map_err(|err| Error::Invalid(format!("bad {CONFIG_FILE}: {err}")))?;

    let mut vars = HashMap::new();
    let mut sections = Vec::new();
    for (key, value) in table {
        if key == "vars" {
            let map: HashMap<String, String> = value
                .try_into()
                .map_err(|err| Error::Invalid(format!("bad [vars] table: {err}")))?;
            vars.extend(map);
        } else if key.starts_with('/') {
            let section: SectionSchema = value
                .try_into()
                .map_err(|err| Error::Invalid(format!("bad [\"{key}\"] table: {err}")))?;
            let components: Vec<String> = key
                .split('/')
                .filter(|part| !part.is_empty())
                .map(str::to_string)
                .collect();
            sections.push((components, section));
        } else {
            return Err(Error::Invalid(format!(
                "unknown table '{key}' in {CONFIG_FILE}; scope keys start with '/'"
            )));
        }
    }

    // Stable sort: shallower scopes apply first so deeper ones override.
    sections.sort_by_key(|(components, _)| components.len());

    Ok(ConfigFile { dir, vars, sections })
}

pub fn load_file(repo_root: &Path, dir: &str) -> Result<Option<ConfigFile>> {
    let path = if dir.is_empty() {
        repo_root.join(CONFIG_FILE)
    } else {
        repo_root.join(dir).join(CONFIG_FILE)
    };
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)?;
    parse_config(dir.to_string(), &contents).map(Some)
}

fn section_matches(components: &[String], rel: &[String]) -> bool {
    components.len() <= rel.len() && components.iter().zip(rel).all(|(a, b)| a == b)
}

fn nonempty(command: &String) -> bool {
    !command.trim().is_empty()
}

/// Discovery only: the governing config directory and the results root for
/// a tag path. Tree operations use this where no run command is needed.
pub fn locate(repo_root: &Path, tag: &TagPath) -> Result<(String, String)> {
    let segments = tag.segments();
    let mut config_dir = String::new();
    for split in 1..segments.len() {
        let dir = segments[..split].join("/");
        if repo_root.join(&dir).join(CONFIG_FILE).exists() {
            config_dir = dir;
        }
    }

    let below = tag
        .strip_prefix(&config_dir)
        .expect("governing config dir is an ancestor of the tag");
    let results_root = if config_dir.is_empty() {
        below[0].clone()
    } else {
        format!("{config_dir}/{}", below[0])
    };
    Ok((config_dir, results_root))
}

/// Resolve a tag path to its commands and rules: discover `git-results.cfg`
/// files along the tag path (repo root downward), apply matching scope
/// tables shallowest-first with deeper files overriding, fall back to the
/// `git-results-*` script files, then expand `{var}` placeholders.
pub fn resolve(repo_root: &Path, tag: &TagPath) -> Result<ResolvedRun> {
    let segments = tag.segments();

    let mut dirs = vec![String::new()];
    for split in 1..segments.len() {
        dirs.push(segments[..split].join("/"));
    }

    let mut files = Vec::new();
    let mut config_dir = String::new();
    for dir in dirs {
        if let Some(file) = load_file(repo_root, &dir)? {
            config_dir = file.dir.clone();
            files.push(file);
        }
    }

    let mut merged = MergedRun::default();
    let mut vars: HashMap<String, String> = HashMap::new();
    for file in &files {
        vars.extend(file.vars.clone());
        let rel = tag
            .strip_prefix(&file.dir)
            .expect("config files are discovered along the tag path");
        for (components, section) in &file.sections {
            if section_matches(components, rel) {
                merged.apply(section);
                vars.extend(section.vars.clone());
            }
        }
    }

    let below = tag
        .strip_prefix(&config_dir)
        .expect("governing config dir is an ancestor of the tag");
    let results_root = if config_dir.is_empty() {
        below[0].clone()
    } else {
        format!("{config_dir}/{}", below[0])
    };

    let script_dir = if config_dir.is_empty() {
        repo_root.to_path_buf()
    } else {
        repo_root.join(&config_dir)
    };
    if !merged.run.as_ref().is_some_and(nonempty) && script_dir.join(RUN_SCRIPT).exists() {
        merged.run = Some(format!("./{RUN_SCRIPT}"));
        if !merged.build.as_ref().is_some_and(nonempty) && script_dir.join(BUILD_SCRIPT).exists() {
            merged.build = Some(format!("./{BUILD_SCRIPT}"));
        }
        if !merged.progress.as_ref().is_some_and(nonempty)
            && script_dir.join(PROGRESS_SCRIPT).exists()
        {
            merged.progress = Some(format!("./{PROGRESS_SCRIPT}"));
        }
    }

    let run = merged
        .run
        .filter(nonempty)
        .ok_or_else(|| Error::Invalid(format!("no run command configured for '{tag}'")))?;

    vars.insert("tag".to_string(), tag.to_string());
    let vars = expand_vars(&vars)?;

    Ok(ResolvedRun {
        build: merged.build.filter(nonempty).map(|cmd| substitute(&cmd, &vars)),
        run: substitute(&run, &vars),
        progress: merged.progress.filter(nonempty).map(|cmd| substitute(&cmd, &vars)),
        follow: merged.follow.filter(nonempty).map(|cmd| substitute(&cmd, &vars)),
        ignore: merged.ignore,
        ignore_ext: merged.ignore_ext,
        progress_delay: merged.progress_delay.unwrap_or(DEFAULT_PROGRESS_DELAY),
        max_retries: merged.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        config_dir,
        results_root,
    })
}
