//! get command - Download files or folders
//!
//! A key downloads to one file; a folder path downloads every key under it,
//! recreating the folder layout beneath the destination directory.

use std::path::{Component, Path, PathBuf};

use clap::Args;
use loft_core::path::{display_name, is_prefix};
use loft_core::{parse_remote, TransferMode};

use super::session::Session;
use super::transfer::{self, Job};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Download files or folders
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Remote source (profile/bucket/key, or profile/bucket/prefix/ for a folder)
    pub source: String,

    /// Local destination file or directory
    #[arg(default_value = ".")]
    pub destination: PathBuf,
}

/// Execute the get command
pub async fn execute(args: GetArgs, parallel: Option<usize>, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let source = match parse_remote(&args.source) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };

    let session = match Session::open(&source.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };

    let jobs = if source.is_dir() {
        let keys = match session
            .gateway()
            .list_all_keys(&source.bucket, &source.key)
            .await
        {
            Ok(keys) => keys,
            Err(e) => return formatter.fail(&e),
        };
        plan_folder(&source.bucket, &source.key, &keys, &args.destination)
    } else {
        let local = if args.destination.is_dir() {
            args.destination.join(display_name(&source.key))
        } else {
            args.destination.clone()
        };
        vec![Job::new(TransferMode::Download, &source.bucket, &source.key, local)]
    };

    if jobs.is_empty() {
        formatter.warning("No objects found to download.");
        return ExitCode::Success;
    }

    let report = transfer::run(&session, jobs, parallel, &formatter).await;
    transfer::summarize(&report, "Downloaded", &formatter)
}

/// Map every file key under `prefix` to a path under `destination`
///
/// Folder markers are skipped, as are keys whose remainder would climb out
/// of the destination.
fn plan_folder(bucket: &str, prefix: &str, keys: &[String], destination: &Path) -> Vec<Job> {
    let base = if prefix.is_empty() {
        destination.to_path_buf()
    } else {
        destination.join(display_name(prefix).trim_end_matches('/'))
    };

    keys.iter()
        .filter(|key| !is_prefix(key))
        .filter_map(|key| {
            let relative = key.strip_prefix(prefix).unwrap_or(key);
            let local = base.join(relative);
            let escapes = Path::new(relative)
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
            if escapes {
                tracing::warn!(key, "Skipping key that does not map to a local path");
                return None;
            }
            Some(Job::new(TransferMode::Download, bucket, key, local))
        })
        .collect()
}
