#[derive(Debug, Clone, Default)]
struct MergedRun {
    build: Option<String>,
    run: Option<String>,
    progress: Option<String>,
    follow: Option<String>,
    ignore: Vec<String>,
    ignore_ext: Vec<String>,
    progress_delay: Option<f64>,
    max_retries: Option<u32>,
}

impl MergedRun {
    /// Later scopes win for scalar fields; ignore lists accumulate in
    /// declaration order so negations keep their position.
    fn apply(&mut self, section: &SectionSchema) {
        if let Some(build) = &section.build {
            self.build = Some(build.clone());
        }
        if let Some(run) = &section.run {
            self.run = Some(run.clone());
        }
        if let Some(progress) = &section.progress {
            self.progress = Some(progress.clone());
        }
        if let Some(follow) = &section.follow {
            self.follow = Some(follow.clone());
        }
        self.ignore.extend(section.ignore.iter().cloned());
        self.ignore_ext.extend(section.ignore_ext.iter().cloned());
        if let Some(delay) = section.progress_delay {
            self.progress_delay = Some(delay);
        }
        if let Some(retries) = section.max_retries {
            self.max_retries = Some(retries);
        }
    }
}
