//! rm command - Remove files and folders
//!
//! Removing a folder deletes every key under the prefix in batches, then the
//! marker. If a batch fails the keys still in place are listed so the
//! command can be rerun on exactly those.

use clap::Args;
use loft_core::{parse_remote, FolderOutcome};
use serde::Serialize;

use super::session::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Remove files or folders
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Path(s) to remove (profile/bucket/key or profile/bucket/folder/)
    #[arg(required = true)]
    pub paths: Vec<String>,

    /// Remove folders together with everything under them
    #[arg(short, long)]
    pub recursive: bool,
}

#[derive(Debug, Default, Serialize)]
struct RmOutput {
    status: &'static str,
    deleted: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    remaining: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Execute the rm command
pub async fn execute(args: RmArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let mut output = RmOutput::default();
    let mut exit_code = ExitCode::Success;

    for path_str in &args.paths {
        let code = remove_path(path_str, args.recursive, &formatter, &mut output).await;
        if code != ExitCode::Success {
            // Usage and auth problems will repeat for every path
            if matches!(code, ExitCode::UsageError | ExitCode::AuthError) {
                return code;
            }
            exit_code = code;
        }
    }

    if formatter.is_json() {
        output.status = if exit_code == ExitCode::Success {
            "success"
        } else {
            "partial"
        };
        formatter.json(&output);
    } else if output.deleted > 0 {
        formatter.success(&format!("Removed {} object(s).", output.deleted));
    }

    exit_code
}

async fn remove_path(
    path_str: &str,
    recursive: bool,
    formatter: &Formatter,
    output: &mut RmOutput,
) -> ExitCode {
    let path = match parse_remote(path_str) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };
    if path.is_dir() && !recursive {
        formatter.error(&format!("'{path}' is a folder. Use -r to remove it."));
        return ExitCode::UsageError;
    }

    let session = match Session::open(&path.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };
    let folders = session.folders();

    if !path.is_dir() {
        return match folders.delete_file(&path.bucket, &path.key).await {
            Ok(()) => {
                output.deleted += 1;
                ExitCode::Success
            }
            Err(e) => {
                output.errors.push(format!("{path}: {e}"));
                formatter.fail(&e)
            }
        };
    }

    match folders.delete_folder(&path.bucket, &path.key).await {
        Ok(FolderOutcome::Done { keys }) => {
            output.deleted += keys;
            ExitCode::Success
        }
        Ok(FolderOutcome::PartialDelete(failure)) => {
            output.deleted += failure.deleted.len();
            formatter.error(&format!("{path}: {failure}"));
            if !formatter.is_json() {
                for key in &failure.remaining {
                    formatter.println(&format!("  not deleted: {key}"));
                }
            }
            output.remaining.extend(failure.remaining);
            ExitCode::PartialFailure
        }
        Ok(other) => {
            // Deletion never produces a copy outcome
            formatter.error(&format!("{path}: unexpected outcome {other:?}"));
            ExitCode::GeneralError
        }
        Err(e) => {
            output.errors.push(format!("{path}: {e}"));
            formatter.fail(&e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rm_output_omits_empty_lists() {
        let output = RmOutput {
            status: "success",
            deleted: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["deleted"], 3);
        assert!(json.get("remaining").is_none());
        assert!(json.get("errors").is_none());
    }
}
