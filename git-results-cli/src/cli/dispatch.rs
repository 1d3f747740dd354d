use std::env;
use std::path::Path;

use clap::Parser;
use git_results_core::errors::{Error, Result};
use git_results_core::lifecycle::{self, RunOptions};
use git_results_core::ports::Runtime;
use git_results_core::state::{ExtraFile, StateStore};
use git_results_core::supervisor::{self, ProcessContinuations, SupervisorOptions};
use git_results_core::{display, treeops, vcs};

use super::args::{Cli, Commands};

/// Parse, dispatch, translate the outcome into an exit code. This is the
/// only place a typed error becomes a process status.
pub(crate) fn run() -> i32 {
    let cli = Cli::parse();

    let verbosity = if cli.global.quiet {
        0
    } else {
        1 + cli.global.verbose
    };
    display::set_verbosity(verbosity);

    match execute(cli) {
        Ok(()) => 0,
        Err(err) => {
            display::error(&err.to_string());
            1
        }
    }
}

/// Tag paths on the command line are cwd-relative; the core wants them
/// repo-relative.
fn repo_relative(repo_root: &Path, cwd: &Path, raw: &str) -> String {
    match cwd.strip_prefix(repo_root) {
        Ok(prefix) if !prefix.as_os_str().is_empty() => {
            format!("{}/{}", prefix.display(), raw)
        }
        _ => raw.to_string(),
    }
}

fn parse_extra_files(cwd: &Path, raw: &[String]) -> Result<Vec<ExtraFile>> {
    raw.iter()
        .map(|spec| {
            let (source, name) = spec.split_once(':').ok_or_else(|| {
                Error::Invalid(format!("extra file '{spec}' must look like SRC:NAME"))
            })?;
            Ok(ExtraFile {
                source: cwd.join(source),
                name: name.to_string(),
            })
        })
        .collect()
}

fn execute(cli: Cli) -> Result<()> {
    let rt = Runtime::system();
    let cwd = env::current_dir()?.canonicalize()?;

    match cli.command {
        Some(Commands::Move { src, dst }) => {
            let repo_root = vcs::discover_root(&cwd)?;
            treeops::move_path(
                &rt,
                &repo_root,
                &repo_relative(&repo_root, &cwd, &src),
                &repo_relative(&repo_root, &cwd, &dst),
            )
        }
        Some(Commands::Link { src, dst }) => {
            let repo_root = vcs::discover_root(&cwd)?;
            treeops::link_path(
                &rt,
                &repo_root,
                &repo_relative(&repo_root, &cwd, &src),
                &repo_relative(&repo_root, &cwd, &dst),
            )
        }
        Some(Commands::Supervisor {
            manual,
            abort_stalled,
        }) => {
            let store = StateStore::open_default()?;
            let continuations = ProcessContinuations {
                binary: env::current_exe()?,
            };
            let started = supervisor::run(
                &rt,
                &store,
                &continuations,
                &SupervisorOptions {
                    manual,
                    abort_stalled,
                },
            )?;
            display::info(&format!("started {} continuation(s)", started.len()));
            Ok(())
        }
        None => {
            let args = cli.run;
            let Some(target) = args.tag_path else {
                return Err(Error::Invalid(
                    "a tag path (or subcommand) is required".to_string(),
                ));
            };

            let store = StateStore::open_default()?;
            if args.internal_retry_continue {
                // `target` is a resume key; the record carries the repo
                // path, so cwd is irrelevant here.
                lifecycle::resume(&rt, &store, &target).map(drop)
            } else {
                let repo_root = vcs::discover_root(&cwd)?;
                let opts = RunOptions {
                    message: args.message,
                    editor: None,
                    auto_commit: args.commit,
                    in_place: args.in_place,
                    retry: args.retry,
                    retry_delay: args.retry_delay,
                    extra_files: parse_extra_files(&cwd, &args.extra_file)?,
                    follow: args.follow,
                    key_prefix: None,
                };
                let tag = repo_relative(&repo_root, &cwd, &target);
                let published = lifecycle::run_once(&rt, &store, &repo_root, &tag, &opts)?;
                display::info(&format!("published {}", published.display()));
                Ok(())
            }
        }
    }
}
