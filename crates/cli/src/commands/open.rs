//! open command - Fetch a file for viewing
//!
//! The download jumps ahead of queued uploads and downloads and lands in the
//! user cache directory. The local path is printed once it is on disk.

use std::path::{Path, PathBuf};

use clap::Args;
use loft_core::{parse_remote, Error, RemotePath, Result, TransferMode};

use super::session::Session;
use super::transfer::{self, Job};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Download a file for viewing
#[derive(Args, Debug)]
pub struct OpenArgs {
    /// Remote file (profile/bucket/key)
    pub path: String,
}

/// Execute the open command
pub async fn execute(args: OpenArgs, parallel: Option<usize>, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let path = match parse_remote(&args.path) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };
    if path.is_dir() {
        return formatter.fail(&Error::InvalidPath(format!("'{path}' is a folder, not a file")));
    }

    let local = match dirs::cache_dir()
        .ok_or_else(|| Error::Config("Could not determine cache directory".into()))
        .and_then(|cache| view_path(&cache, &path))
    {
        Ok(local) => local,
        Err(e) => return formatter.fail(&e),
    };

    let session = match Session::open(&path.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };

    let job = Job::new(TransferMode::OpenView, &path.bucket, &path.key, local);
    let report = transfer::run(&session, vec![job], parallel, &formatter).await;

    if formatter.is_json() {
        formatter.json(&report);
    } else {
        for done in &report.completed {
            // Printed even in quiet mode so scripts can pick the path up
            println!("{}", done.local_path.display());
        }
    }
    report.exit_code()
}

/// Where an opened object is cached: `<cache>/loft/open/<bucket>/<key>`
fn view_path(cache_dir: &Path, path: &RemotePath) -> Result<PathBuf> {
    let mut local = cache_dir.join("loft").join("open").join(&path.bucket);
    for part in path.key.split('/').filter(|p| !p.is_empty()) {
        if part == "." || part == ".." {
            return Err(Error::InvalidPath(format!(
                "Key '{}' does not map to a local path",
                path.key
            )));
        }
        local.push(part);
    }
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_path_layout() {
        let path = RemotePath::new("work", "media", "clips/intro.mp4");
        let local = view_path(Path::new("/home/u/.cache"), &path).unwrap();
        assert_eq!(
            local,
            PathBuf::from("/home/u/.cache/loft/open/media/clips/intro.mp4")
        );
    }

    #[test]
    fn test_view_path_rejects_parent_components() {
        let path = RemotePath::new("work", "media", "../../.bashrc");
        assert!(matches!(
            view_path(Path::new("/c"), &path),
            Err(Error::InvalidPath(_))
        ));
    }
}
