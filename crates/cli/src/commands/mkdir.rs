//! mkdir command - Create a folder
//!
//! Writes the zero-byte marker object for the prefix. Creating a folder
//! that already exists succeeds.

use clap::Args;
use loft_core::parse_remote;
use serde::Serialize;

use super::session::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Create a folder
#[derive(Args, Debug)]
pub struct MkdirArgs {
    /// Folder path (profile/bucket/folder)
    pub path: String,
}

#[derive(Debug, Serialize)]
struct MkdirOutput {
    status: &'static str,
    bucket: String,
    marker: String,
}

/// Execute the mkdir command
pub async fn execute(args: MkdirArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match parse_remote(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };

    let session = match Session::open(&path.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };

    match session.folders().create_folder(&path.bucket, &path.key).await {
        Ok(marker) => {
            if formatter.is_json() {
                formatter.json(&MkdirOutput {
                    status: "success",
                    bucket: path.bucket,
                    marker,
                });
            } else {
                formatter.success(&format!("Folder '{}/{}' created.", path.bucket, marker));
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&e),
    }
}
