//! CLI surface (spec §6 CLI-surface contract), modeled on the teacher's `args.rs`.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Increase logging output (can be used multiple times)
    #[arg(short, long, global = true, action(ArgAction::Count))]
    pub verbose: u8,
    /// Repository directory; defaults to $REP_DIR
    #[arg(long, env = "REP_DIR")]
    pub rep_dir: PathBuf,
    #[command(subcommand)]
    pub subcommand: SubCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SubRepoArg {
    Release,
    Testing,
    All,
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    Init(Init),
    List(List),
    Find(Find),
    WhichSource(WhichSource),
    Info(Info),
    Payload(Payload),
    Sign(Sign),
    Add(Add),
    Remove(Remove),
    Release(Release),
    Unrelease(Unrelease),
    Reindex(Reindex),
    PurgeCache(PurgeCache),
    Stats(Stats),
}

/// Create the directory layout for a new repository
#[derive(Debug, Parser)]
pub struct Init {
    /// Sub-repositories to create
    #[arg(long, value_enum, default_value = "all")]
    pub sub_repo: SubRepoArg,
    /// Architectures to provision (e.g. src, noarch, x86_64)
    #[arg(long, required = true, num_args = 1..)]
    pub arch: Vec<String>,
}

/// List packages in a sub-repository
#[derive(Debug, Parser)]
pub struct List {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    /// Show every version instead of only the latest per name
    #[arg(long)]
    pub show_all: bool,
    /// Optional name/version/release substring filter
    pub filter: Option<String>,
}

/// Search for packages using the query term language
#[derive(Debug, Parser)]
pub struct Find {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    /// Query terms, e.g. n:bash a:x86_64
    #[arg(required = true, num_args = 1..)]
    pub terms: Vec<String>,
    #[arg(long)]
    pub show_epoch: bool,
}

/// Report the source RPM that produced a package
#[derive(Debug, Parser)]
pub struct WhichSource {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    pub name: String,
}

/// Show full package details: summary, dependencies, changelog
#[derive(Debug, Parser)]
pub struct Info {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    #[arg(long, default_value = "x86_64")]
    pub arch: String,
    pub name: String,
}

/// List the files owned by a package
#[derive(Debug, Parser)]
pub struct Payload {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    #[arg(long, default_value = "x86_64")]
    pub arch: String,
    pub name: String,
}

/// Produce a detached OpenPGP signature for a file
#[derive(Debug, Parser)]
pub struct Sign {
    pub path: PathBuf,
}

/// Add an RPM file to a sub-repository
#[derive(Debug, Parser)]
pub struct Add {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    pub rpm: PathBuf,
    /// Detached signature accompanying the RPM, if the repo requires one
    #[arg(long)]
    pub signature: Option<PathBuf>,
    /// Remove the source file after a successful add
    #[arg(long)]
    pub move_after_add: bool,
    /// Overwrite an existing file of the same name
    #[arg(long)]
    pub force: bool,
}

/// Remove a package file from a sub-repository
#[derive(Debug, Parser)]
pub struct Remove {
    #[arg(long, value_enum, default_value = "release")]
    pub sub_repo: SubRepoArg,
    #[arg(long, default_value = "x86_64")]
    pub arch: String,
    pub relative_path: PathBuf,
}

/// Promote a package from testing to release
#[derive(Debug, Parser)]
pub struct Release {
    #[arg(long, default_value = "x86_64")]
    pub arch: String,
    pub relative_path: PathBuf,
}

/// Demote a package from release back to testing
#[derive(Debug, Parser)]
pub struct Unrelease {
    #[arg(long, default_value = "x86_64")]
    pub arch: String,
    pub relative_path: PathBuf,
}

/// Regenerate repository metadata
#[derive(Debug, Parser)]
pub struct Reindex {
    #[arg(long, value_enum, default_value = "all")]
    pub sub_repo: SubRepoArg,
    /// Rebuild from scratch instead of incrementally
    #[arg(long)]
    pub full_reindex: bool,
    /// Do not index source packages
    #[arg(long)]
    pub no_source: bool,
}

/// Drop cached unpacked databases
#[derive(Debug, Parser)]
pub struct PurgeCache {
    #[arg(long, value_enum, default_value = "all")]
    pub sub_repo: SubRepoArg,
}

/// Show per-arch package counts, sizes, and last-updated time
#[derive(Debug, Parser)]
pub struct Stats {
    #[arg(long, value_enum, default_value = "all")]
    pub sub_repo: SubRepoArg,
    #[arg(long)]
    pub show_status: bool,
}
