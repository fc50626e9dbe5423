//! mv command - Rename a file or folder
//!
//! Both paths must use the same profile and bucket. A folder is renamed by
//! copying every key first and deleting the originals only once all copies
//! have landed.

use clap::Args;
use loft_core::{parse_remote, Error, FileRenameOutcome, FolderOutcome, RemotePath};
use serde::Serialize;

use super::session::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Rename a file or folder
#[derive(Args, Debug)]
pub struct MvArgs {
    /// Source path (profile/bucket/key or profile/bucket/folder/)
    pub source: String,

    /// Target path in the same bucket
    pub target: String,
}

#[derive(Debug, Serialize)]
struct MvOutput<T: Serialize> {
    source: String,
    target: String,
    #[serde(flatten)]
    outcome: T,
}

/// Execute the mv command
pub async fn execute(args: MvArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (source, target) = match parse_pair(&args.source, &args.target) {
        Ok(pair) => pair,
        Err(e) => return formatter.fail(&e),
    };

    let session = match Session::open(&source.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };
    let folders = session.folders();

    if source.is_dir() {
        match folders
            .rename_folder(&source.bucket, &source.key, &target.key)
            .await
        {
            Ok(outcome) => report_folder(&source, &target, outcome, &formatter),
            Err(e) => formatter.fail(&e),
        }
    } else {
        match folders
            .rename_file(&source.bucket, &source.key, &target.key)
            .await
        {
            Ok(outcome) => report_file(&source, &target, outcome, &formatter),
            Err(e) => formatter.fail(&e),
        }
    }
}

/// Parse both paths and check they can be renamed into each other
fn parse_pair(source: &str, target: &str) -> loft_core::Result<(RemotePath, RemotePath)> {
    let source = parse_remote(source)?;
    let mut target = parse_remote(target)?;

    if source.profile != target.profile || source.bucket != target.bucket {
        return Err(Error::InvalidPath(
            "Source and target must be in the same profile and bucket".into(),
        ));
    }
    // A folder keeps being a folder even if the trailing slash was left off
    if source.is_dir() && !target.is_dir() {
        target.key.push('/');
    }
    if !source.is_dir() && target.is_dir() {
        target = target.join(loft_core::path::display_name(&source.key));
    }
    Ok((source, target))
}

fn report_folder(
    source: &RemotePath,
    target: &RemotePath,
    outcome: FolderOutcome,
    formatter: &Formatter,
) -> ExitCode {
    let code = match &outcome {
        FolderOutcome::Done { keys } => {
            formatter.success(&format!("Moved {keys} object(s) to '{target}'."));
            ExitCode::Success
        }
        FolderOutcome::CopyAborted {
            failed_key,
            orphaned,
            reason,
        } => {
            formatter.error(&format!(
                "Copy of '{failed_key}' failed: {reason}. '{source}' was left unchanged."
            ));
            if !orphaned.is_empty() {
                formatter.warning(&format!(
                    "{} partial copies remain under '{target}'.",
                    orphaned.len()
                ));
            }
            ExitCode::GeneralError
        }
        FolderOutcome::PartialDelete(failure) => {
            formatter.error(&format!(
                "All objects were copied to '{target}' but cleanup of '{source}' stopped: {failure}"
            ));
            ExitCode::PartialFailure
        }
    };

    if formatter.is_json() {
        formatter.json(&MvOutput {
            source: source.to_string(),
            target: target.to_string(),
            outcome,
        });
    }
    code
}

fn report_file(
    source: &RemotePath,
    target: &RemotePath,
    outcome: FileRenameOutcome,
    formatter: &Formatter,
) -> ExitCode {
    match &outcome {
        FileRenameOutcome::Renamed => {
            formatter.success(&format!("Moved '{source}' to '{target}'."));
        }
        FileRenameOutcome::DanglingSource { reason } => {
            formatter.warning(&format!(
                "Copied to '{target}' but '{source}' could not be removed: {reason}"
            ));
        }
    }

    if formatter.is_json() {
        formatter.json(&MvOutput {
            source: source.to_string(),
            target: target.to_string(),
            outcome,
        });
    }
    ExitCode::Success
}
