use std::ffi::OsStr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use recast_config::RecastConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct InitArgs {
    #[arg(long, help = "Branch to rewrite (defaults to the checked-out branch)")]
    pub branch: Option<String>,

    #[arg(long, help = "Environment variable holding the API key")]
    pub api_key_env: Option<String>,

    #[arg(long, help = "Overwrite an existing config file with defaults")]
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Args, Default)]
pub struct ClusterArgs {
    #[arg(long, help = "Similarity threshold in (0, 1]; pairs must score above it")]
    pub threshold: Option<f64>,

    #[arg(long, help = "Maximum commits per group")]
    pub max_group: Option<usize>,
}

impl ClusterArgs {
    pub fn apply(&self, config: &mut RecastConfig) {
        if let Some(threshold) = self.threshold {
            config.clustering.similarity_threshold = threshold;
        }
        if let Some(max_group) = self.max_group {
            config.clustering.max_group_size = max_group;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Args)]
pub struct RunArgs {
    #[arg(long, conflicts_with = "apply", help = "Show the plan without changing anything (default)")]
    pub dry_run: bool,

    #[arg(long, help = "Rewrite the branch")]
    pub apply: bool,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[arg(long, short = 'y', help = "Do not ask for confirmation")]
    pub yes: bool,
}

impl RunArgs {
    pub fn applies(&self) -> bool {
        self.apply && !self.dry_run
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ConfirmArgs {
    #[arg(long, short = 'y', help = "Do not ask for confirmation")]
    pub yes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct RollbackArgs {
    #[arg(help = "Backup ref to restore, as shown by list-backups")]
    pub backup: String,

    #[arg(long, short = 'y', help = "Do not ask for confirmation")]
    pub yes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ResetArgs {
    #[arg(long, help = "Also forget scanned commits")]
    pub all: bool,

    #[arg(long, short = 'y', help = "Do not ask for confirmation")]
    pub yes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ExportStateArgs {
    #[arg(help = "Destination JSON file")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum Commands {
    /// Create .recast/config.toml
    Init(InitArgs),
    /// Show how commits would be grouped and the messages they would get
    Analyze(ClusterArgs),
    /// Rewrite history (dry run unless --apply is given)
    Run(RunArgs),
    /// Continue an interrupted rewrite
    Resume(ConfirmArgs),
    /// Show recorded rewrite progress
    Status,
    /// List backup refs
    ListBackups,
    /// Reset the branch to a backup ref
    Rollback(RollbackArgs),
    /// Forget recorded progress
    Reset(ResetArgs),
    /// Write the recorded state as JSON
    ExportState(ExportStateArgs),
}

#[derive(Debug, Clone, Parser)]
#[command(author, version, about = "Squash runs of similar commits and rewrite their messages")]
pub struct Cli {
    #[arg(
        long,
        global = true,
        default_value = ".",
        help = "Repository workspace root"
    )]
    pub workspace: PathBuf,

    #[arg(
        long,
        global = true,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
