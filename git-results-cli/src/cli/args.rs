use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};

/// Reproducibility harness: tag, build, run, and archive experiments kept
/// in a git repository.
#[derive(Parser, Debug)]
#[command(
    name = "git-results",
    version,
    about,
    args_conflicts_with_subcommands = true,
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) global: GlobalOpts,

    #[command(subcommand)]
    pub(crate) command: Option<Commands>,

    #[command(flatten)]
    pub(crate) run: RunArgs,
}

#[derive(ClapArgs, Debug, Default)]
pub(crate) struct GlobalOpts {
    /// Increase stderr verbosity
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Only errors on stderr
    #[arg(short = 'q', long, global = true)]
    pub(crate) quiet: bool,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Relocate an experiment (or a single instance), keeping tags, INDEX,
    /// and the dated/latest views consistent
    Move { src: String, dst: String },

    /// Create a symbolic copy of an experiment (or instance) under a second
    /// name; the source stays in place
    Link { src: String, dst: String },

    /// Enumerate resumable state records and advance them
    Supervisor {
        /// Also retry records that exhausted their attempts without progress
        #[arg(long)]
        manual: bool,

        /// Abort stalled records instead of retrying them
        #[arg(long = "abort-stalled", hide = true)]
        abort_stalled: bool,
    },
}

#[derive(ClapArgs, Debug, Default)]
pub(crate) struct RunArgs {
    /// Tag path to run an experiment at (a resume key when
    /// --internal-retry-continue is given)
    pub(crate) tag_path: Option<String>,

    /// Run message; opens $EDITOR when absent or shorter than 5 characters
    #[arg(short = 'm', long = "message")]
    pub(crate) message: Option<String>,

    /// Snapshot-commit a dirty working tree instead of failing
    #[arg(short = 'c', long = "commit")]
    pub(crate) commit: bool,

    /// Build and run in the working tree; result files are moved out of it
    #[arg(short = 'i', long = "in-place")]
    pub(crate) in_place: bool,

    /// Keep the run resumable across failed attempts (supervisor picks it
    /// up)
    #[arg(short = 'r', long = "retry")]
    pub(crate) retry: bool,

    /// Progress window in seconds (negative disables stall detection)
    #[arg(long = "retry-delay", value_name = "SECONDS", allow_hyphen_values = true)]
    pub(crate) retry_delay: Option<f64>,

    /// Import SRC into the run cwd as NAME before the run
    #[arg(short = 'x', long = "extra-file", value_name = "SRC:NAME")]
    pub(crate) extra_file: Vec<String>,

    /// Command sampled alongside progress, output surfaced to the operator
    #[arg(short = 'f', long = "follow", value_name = "CMD")]
    pub(crate) follow: Option<String>,

    /// Resume the state record named by the positional argument
    #[arg(long = "internal-retry-continue", hide = true)]
    pub(crate) internal_retry_continue: bool,
}
