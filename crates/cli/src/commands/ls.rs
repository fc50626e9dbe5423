//! ls command - List buckets and folders
//!
//! Lists buckets when given a profile only, or the immediate folders and
//! files under a prefix when given a bucket path.

use clap::Args;
use comfy_table::{presets::UTF8_BORDERS_ONLY, Cell, CellAlignment, Table};
use loft_core::path::{display_name, normalize_prefix};
use loft_core::{BucketInfo, ObjectListing};
use serde::Serialize;

use super::session::Session;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn local_time(timestamp: jiff::Timestamp) -> String {
    timestamp
        .to_zoned(jiff::tz::TimeZone::system())
        .strftime(TIME_FORMAT)
        .to_string()
}

/// List buckets or folder contents
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Remote path (profile, or profile/bucket[/prefix])
    pub path: String,

    /// Bypass the listing cache
    #[arg(long)]
    pub refresh: bool,

    /// Show totals after the listing
    #[arg(long)]
    pub summarize: bool,
}

#[derive(Debug, Serialize)]
struct BucketsOutput {
    buckets: Vec<BucketInfo>,
}

#[derive(Debug, Serialize)]
struct ListingOutput {
    bucket: String,
    prefix: String,
    #[serde(flatten)]
    listing: ObjectListing,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<Summary>,
}

#[derive(Debug, Serialize)]
struct Summary {
    folders: usize,
    files: usize,
    total_size_bytes: u64,
    total_size_human: String,
}

impl Summary {
    fn of(listing: &ObjectListing) -> Self {
        let total: u64 = listing.files.iter().map(|f| f.size).sum();
        Self {
            folders: listing.folders.len(),
            files: listing.files.len(),
            total_size_bytes: total,
            total_size_human: humansize::format_size(total, humansize::BINARY),
        }
    }
}

/// Execute the ls command
pub async fn execute(args: LsArgs, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);

    let (profile, bucket, prefix) = match parse_ls_path(&args.path) {
        Ok(parsed) => parsed,
        Err(e) => {
            formatter.error(&e);
            return ExitCode::UsageError;
        }
    };

    let session = match Session::open(&profile).await {
        Ok(s) => s,
        Err(e) => return formatter.fail(&e),
    };

    let Some(bucket) = bucket else {
        return list_buckets(&session, &formatter).await;
    };

    let folders = session.folders();
    let result = if args.refresh {
        folders.refresh(&bucket, &prefix).await
    } else {
        folders.list(&bucket, &prefix).await
    };
    let listing = match result {
        Ok(listing) => listing,
        Err(e) => return formatter.fail(&e),
    };

    let summary = args.summarize.then(|| Summary::of(&listing));
    if formatter.is_json() {
        formatter.json(&ListingOutput {
            bucket,
            prefix,
            listing,
            summary,
        });
    } else {
        if !listing.is_empty() {
            formatter.println(&render_listing(&listing).to_string());
        }
        if let Some(summary) = summary {
            formatter.println(&format!(
                "Total: {} folder(s), {} file(s), {}",
                summary.folders, summary.files, summary.total_size_human
            ));
        }
    }
    ExitCode::Success
}

async fn list_buckets(session: &Session, formatter: &Formatter) -> ExitCode {
    match session.gateway().list_buckets().await {
        Ok(buckets) => {
            if formatter.is_json() {
                formatter.json(&BucketsOutput { buckets });
            } else {
                let mut table = Table::new();
                table.load_preset(UTF8_BORDERS_ONLY);
                table.set_header(vec!["Bucket", "Created"]);
                for bucket in &buckets {
                    let created = bucket
                        .created
                        .map(local_time)
                        .unwrap_or_default();
                    table.add_row(vec![format!("{}/", bucket.name), created]);
                }
                formatter.println(&table.to_string());
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&e),
    }
}

/// Folders first, then files, each with size and modification time
fn render_listing(listing: &ObjectListing) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Name", "Size", "Modified"]);

    for folder in &listing.folders {
        table.add_row(vec![
            Cell::new(display_name(folder)),
            Cell::new("-").set_alignment(CellAlignment::Right),
            Cell::new(""),
        ]);
    }
    for file in &listing.files {
        let modified = file
            .last_modified
            .map(local_time)
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(display_name(&file.key)),
            Cell::new(file.size_human()).set_alignment(CellAlignment::Right),
            Cell::new(modified),
        ]);
    }
    table
}

/// Parse ls path into (profile, bucket, prefix)
fn parse_ls_path(path: &str) -> Result<(String, Option<String>, String), String> {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err("Path cannot be empty".to_string());
    }

    let parts: Vec<&str> = trimmed.splitn(3, '/').collect();
    match parts.as_slice() {
        [profile] => Ok((profile.to_string(), None, String::new())),
        [profile, bucket] => Ok((profile.to_string(), Some(bucket.to_string()), String::new())),
        [profile, bucket, prefix] => Ok((
            profile.to_string(),
            Some(bucket.to_string()),
            normalize_prefix(prefix),
        )),
        _ => Err(format!("Invalid path format: {path}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loft_core::ObjectInfo;

    #[test]
    fn test_parse_ls_path_profile_only() {
        let (profile, bucket, prefix) = parse_ls_path("work").unwrap();
        assert_eq!(profile, "work");
        assert!(bucket.is_none());
        assert!(prefix.is_empty());
    }

    #[test]
    fn test_parse_ls_path_bucket() {
        let (_, bucket, prefix) = parse_ls_path("work/photos/").unwrap();
        assert_eq!(bucket.as_deref(), Some("photos"));
        assert!(prefix.is_empty());
    }

    #[test]
    fn test_parse_ls_path_prefix_is_normalized() {
        let (_, _, prefix) = parse_ls_path("work/photos/2024/trip").unwrap();
        assert_eq!(prefix, "2024/trip/");
    }

    #[test]
    fn test_parse_ls_path_empty() {
        assert!(parse_ls_path("").is_err());
        assert!(parse_ls_path("/").is_err());
    }

    #[test]
    fn test_render_listing_shows_names_only() {
        let listing = ObjectListing {
            folders: vec!["2024/trip/".into()],
            files: vec![ObjectInfo::new("2024/cover.jpg", 2048)],
        };
        let rendered = render_listing(&listing).to_string();
        assert!(rendered.contains("trip/"));
        assert!(rendered.contains("cover.jpg"));
        assert!(!rendered.contains("2024/cover.jpg"));
        assert!(rendered.contains("KiB"));
    }

    #[test]
    fn test_summary_totals() {
        let listing = ObjectListing {
            folders: vec!["a/".into()],
            files: vec![ObjectInfo::new("x", 10), ObjectInfo::new("y", 20)],
        };
        let summary = Summary::of(&listing);
        assert_eq!(summary.folders, 1);
        assert_eq!(summary.files, 2);
        assert_eq!(summary.total_size_bytes, 30);
    }
}
