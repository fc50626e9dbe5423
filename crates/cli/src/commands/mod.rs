//! CLI command definitions and execution
//!
//! Remote paths are written `profile/bucket[/key]`; a trailing `/` names a
//! folder. Transfers run through the background scheduler, everything else
//! goes straight through the folder operations.

use clap::{Parser, Subcommand};

use crate::exit_code::ExitCode;
use crate::output::OutputConfig;

mod get;
mod ls;
mod mkdir;
mod mv;
mod open;
mod profile;
mod put;
mod rm;
mod session;
mod transfer;

/// loft - object storage browser and transfer client
///
/// Browse S3-compatible buckets as folders and move files in the background.
#[derive(Parser, Debug)]
#[command(name = "loft")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format: human-readable or JSON
    #[arg(long, global = true, default_value = "false")]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true, default_value = "false")]
    pub no_color: bool,

    /// Disable progress bars
    #[arg(long, global = true, default_value = "false")]
    pub no_progress: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true, default_value = "false")]
    pub quiet: bool,

    /// Enable debug logging
    #[arg(long, global = true, default_value = "false")]
    pub debug: bool,

    /// Maximum transfers running at once (overrides the config file)
    #[arg(long, global = true, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub parallel: Option<u16>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage credential profiles
    #[command(subcommand)]
    Profile(profile::ProfileCommands),

    /// List buckets, or the folders and files under a prefix
    Ls(ls::LsArgs),

    /// Create a folder
    Mkdir(mkdir::MkdirArgs),

    /// Remove a file, or a folder with everything under it
    Rm(rm::RmArgs),

    /// Rename a file or folder within a bucket
    Mv(mv::MvArgs),

    /// Download files or folders
    Get(get::GetArgs),

    /// Upload files or directories
    Put(put::PutArgs),

    /// Download a file for viewing ahead of other transfers
    Open(open::OpenArgs),
}

/// Execute the CLI command and return an exit code
pub async fn execute(cli: Cli) -> ExitCode {
    let output_config = OutputConfig {
        json: cli.json,
        no_color: cli.no_color,
        no_progress: cli.no_progress,
        quiet: cli.quiet,
    };
    let parallel = cli.parallel.map(usize::from);

    match cli.command {
        Commands::Profile(cmd) => profile::execute(cmd, output_config).await,
        Commands::Ls(args) => ls::execute(args, output_config).await,
        Commands::Mkdir(args) => mkdir::execute(args, output_config).await,
        Commands::Rm(args) => rm::execute(args, output_config).await,
        Commands::Mv(args) => mv::execute(args, output_config).await,
        Commands::Get(args) => get::execute(args, parallel, output_config).await,
        Commands::Put(args) => put::execute(args, parallel, output_config).await,
        Commands::Open(args) => open::execute(args, parallel, output_config).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["loft", "get", "p/b/k", "--json", "--parallel", "4"])
            .expect("parses");
        assert!(cli.json);
        assert_eq!(cli.parallel, Some(4));
        assert!(matches!(cli.command, Commands::Get(_)));
    }

    #[test]
    fn test_parallel_must_be_positive() {
        assert!(Cli::try_parse_from(["loft", "--parallel", "0", "ls", "p"]).is_err());
    }
}
