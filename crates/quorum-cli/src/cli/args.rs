use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "quorum",
    version,
    about = "Corroborated release triggers, multi-rater scoring and published benchmark results"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write the sample benchmark configuration
    Init(InitArgs),
    /// List configured dimensions, max points and weights
    Dimensions(ConfigArgs),
    /// Load and validate the configuration
    Validate(ConfigArgs),
    /// Run the full pipeline synchronously for one tool version
    Run(RunArgs),
    /// Feed signals through the accumulator; a fusion runs the pipeline
    Signal(SignalArgs),
    /// Print a persisted run
    Show(ShowArgs),
    /// List persisted runs, newest first
    List(ListArgs),
    /// Resume a persisted run
    Resume(ShowArgs),
}

#[derive(Args, Clone)]
pub struct InitArgs {
    #[arg(long, default_value = "benchmark.yaml")]
    pub config: PathBuf,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Clone)]
pub struct ConfigArgs {
    #[arg(long, default_value = "benchmark.yaml", env = "QUORUM_CONFIG")]
    pub config: PathBuf,
}

#[derive(Args, Clone)]
pub struct StoreArgs {
    /// `*.db`/`*.sqlite` opens SQLite, anything else is a JSON state directory
    #[arg(long, default_value = ".quorum/runs.db", env = "QUORUM_STORE")]
    pub store: PathBuf,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Deterministic in-process collaborators (dry run)
    Fake,
    /// External commands speaking JSON on stdin/stdout
    Command,
}

#[derive(Args, Clone)]
pub struct ProviderArgs {
    #[arg(long, value_enum, default_value_t = ProviderKind::Fake)]
    pub provider: ProviderKind,

    /// Executor command (provider=command)
    #[arg(long)]
    pub executor_cmd: Option<String>,

    /// Rater command; repeat for several raters (provider=command)
    #[arg(long = "rater-cmd")]
    pub rater_cmds: Vec<String>,
}

#[derive(Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[arg(long)]
    pub tool: String,

    #[arg(long)]
    pub version: String,

    /// Evidence reference (release page, site URL); repeatable
    #[arg(long)]
    pub evidence: Vec<String>,

    /// Print the run record as JSON instead of the text summary
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct SignalArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[arg(long)]
    pub tool: String,

    #[arg(long)]
    pub version: String,

    /// `kind=evidence`, kind one of feed|rss|github|status|manual; repeatable
    #[arg(long = "source", required = true)]
    pub sources: Vec<String>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ShowArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[command(flatten)]
    pub store: StoreArgs,
    #[command(flatten)]
    pub provider: ProviderArgs,

    #[arg(long)]
    pub run_id: String,

    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Clone)]
pub struct ListArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long)]
    pub json: bool,
}
