//! put command - Upload files or directories
//!
//! Directories are walked recursively and land under the destination folder
//! with their own name as the top component.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Args;
use loft_core::path::join_prefix;
use loft_core::{parse_remote, Error, RemotePath, Result, TransferMode};

use super::session::Session;
use super::transfer::{self, Job};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Upload files or directories
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Local files or directories, followed by the remote destination
    /// (profile/bucket/folder/ or profile/bucket/key)
    #[arg(required = true, num_args = 2.., value_name = "PATH")]
    pub paths: Vec<String>,
}

/// Execute the put command
pub async fn execute(args: PutArgs, parallel: Option<usize>, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let Some((destination, sources)) = args.paths.split_last() else {
        formatter.error("Nothing to upload");
        return ExitCode::UsageError;
    };
    let destination = match parse_remote(destination) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };
    let sources: Vec<PathBuf> = sources.iter().map(PathBuf::from).collect();

    let jobs = match plan(&sources, &destination) {
        Ok(jobs) => jobs,
        Err(e) => return formatter.fail(&e),
    };

    let session = match Session::open(&destination.profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };

    let report = transfer::run(&session, jobs, parallel, &formatter).await;
    transfer::summarize(&report, "Uploaded", &formatter)
}

/// Build the upload jobs for `sources`
///
/// A single file may be renamed by giving a destination key without a
/// trailing `/`; anything else needs a folder destination.
fn plan(sources: &[PathBuf], destination: &RemotePath) -> Result<Vec<Job>> {
    let single_file = sources.len() == 1 && !sources[0].is_dir();
    if single_file && !destination.is_dir() {
        return Ok(vec![Job::new(
            TransferMode::Upload,
            &destination.bucket,
            &destination.key,
            &sources[0],
        )]);
    }
    if !destination.is_dir() {
        return Err(Error::InvalidPath(format!(
            "Destination '{destination}' must be a folder (end with '/') for directories or multiple sources"
        )));
    }

    let mut jobs = Vec::new();
    for source in sources {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(format!("Cannot upload '{}'", source.display())))?;

        if source.is_dir() {
            let base = join_prefix(&destination.key, &name);
            for (path, relative) in walk_dir(source, source)? {
                let key = join_prefix(&base, &relative);
                jobs.push(Job::new(TransferMode::Upload, &destination.bucket, key, path));
            }
        } else {
            // Missing files are still queued; the worker reports them as failed
            let key = join_prefix(&destination.key, &name);
            jobs.push(Job::new(TransferMode::Upload, &destination.bucket, key, source));
        }
    }
    Ok(jobs)
}

/// Every file below `dir`, with its `/`-separated path relative to `base`
fn walk_dir(dir: &Path, base: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            let relative = path.strip_prefix(base).unwrap_or(&path);
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((path, relative));
        } else if path.is_dir() {
            files.extend(walk_dir(&path, base)?);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn remote(key: &str) -> RemotePath {
        RemotePath::new("work", "bucket", key)
    }

    #[test]
    fn test_plan_single_file_to_key() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("report.pdf");
        fs::write(&file, b"pdf").unwrap();

        let jobs = plan(&[file.clone()], &remote("docs/final.pdf")).unwrap();
        assert_eq!(jobs, vec![Job::new(TransferMode::Upload, "bucket", "docs/final.pdf", file)]);
    }

    #[test]
    fn test_plan_single_file_to_folder() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("report.pdf");
        fs::write(&file, b"pdf").unwrap();

        let jobs = plan(&[file], &remote("docs/")).unwrap();
        assert_eq!(jobs[0].key, "docs/report.pdf");
    }

    #[test]
    fn test_plan_directory_is_walked() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("site");
        fs::create_dir_all(root.join("css")).unwrap();
        fs::write(root.join("index.html"), b"<html>").unwrap();
        fs::write(root.join("css/main.css"), b"body{}").unwrap();

        let jobs = plan(&[root], &remote("")).unwrap();
        let keys: Vec<_> = jobs.iter().map(|j| j.key.as_str()).collect();
        assert_eq!(keys, vec!["site/css/main.css", "site/index.html"]);
    }

    #[test]
    fn test_plan_many_sources_need_folder() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        fs::write(&a, b"a").unwrap();
        fs::write(&b, b"b").unwrap();

        let result = plan(&[a, b], &remote("notes.txt"));
        assert!(matches!(result, Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_plan_missing_file_still_queued() {
        let jobs = plan(&[PathBuf::from("/nonexistent/ghost.txt")], &remote("in/")).unwrap();
        assert_eq!(jobs[0].key, "in/ghost.txt");
    }
}
