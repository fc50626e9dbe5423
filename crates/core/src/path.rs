//! Path and prefix handling
//!
//! Object stores have a flat key space. Folders are emulated with keys that
//! end in `/` (prefixes). This module holds the prefix arithmetic used by the
//! folder layer and the parsing of `profile/bucket[/key]` command-line paths.

use crate::error::{Error, Result};

/// Separator used to emulate folders in the flat key space
pub const DELIMITER: char = '/';

/// Whether a key names a prefix (folder) rather than an object
pub fn is_prefix(key: &str) -> bool {
    key.ends_with(DELIMITER)
}

/// Ensure a prefix ends with `/`. The empty prefix (bucket root) stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || is_prefix(prefix) {
        prefix.to_string()
    } else {
        format!("{prefix}{DELIMITER}")
    }
}

/// Join a child name onto a prefix
pub fn join_prefix(prefix: &str, name: &str) -> String {
    format!("{}{name}", normalize_prefix(prefix))
}

/// Prefix one level above `prefix`; the bucket root's parent is itself
pub fn parent_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches(DELIMITER);
    match trimmed.rfind(DELIMITER) {
        Some(pos) => trimmed[..=pos].to_string(),
        None => String::new(),
    }
}

/// Prefix that directly contains `key`
pub fn key_parent(key: &str) -> String {
    if is_prefix(key) {
        parent_prefix(key)
    } else {
        match key.rfind(DELIMITER) {
            Some(pos) => key[..=pos].to_string(),
            None => String::new(),
        }
    }
}

/// Last path component of a key, keeping a trailing `/` for prefixes
pub fn display_name(key: &str) -> &str {
    let trimmed = key.trim_end_matches(DELIMITER);
    let start = trimmed.rfind(DELIMITER).map(|p| p + 1).unwrap_or(0);
    &key[start..]
}

/// A parsed remote path pointing to an object store location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    /// Credential profile name
    pub profile: String,
    /// Bucket name
    pub bucket: String,
    /// Object key or prefix (empty for bucket root)
    pub key: String,
}

impl RemotePath {
    /// Create a new RemotePath
    pub fn new(
        profile: impl Into<String>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            profile: profile.into(),
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Whether the path names a folder
    pub fn is_dir(&self) -> bool {
        self.key.is_empty() || is_prefix(&self.key)
    }

    /// Get the full path as a string (profile/bucket/key)
    pub fn to_full_path(&self) -> String {
        if self.key.is_empty() {
            format!("{}/{}", self.profile, self.bucket)
        } else {
            format!("{}/{}/{}", self.profile, self.bucket, self.key)
        }
    }

    /// Get the parent path (one level up)
    pub fn parent(&self) -> Option<Self> {
        if self.key.is_empty() {
            return None;
        }
        Some(Self {
            profile: self.profile.clone(),
            bucket: self.bucket.clone(),
            key: key_parent(&self.key),
        })
    }

    /// Join a child path component
    pub fn join(&self, child: &str) -> Self {
        Self {
            profile: self.profile.clone(),
            bucket: self.bucket.clone(),
            key: join_prefix(&self.key, child),
        }
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_full_path())
    }
}

/// Parsed path that can be either local or remote
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedPath {
    /// Local filesystem path
    Local(std::path::PathBuf),
    /// Remote object store path
    Remote(RemotePath),
}

impl ParsedPath {
    /// Check if this is a remote path
    pub fn is_remote(&self) -> bool {
        matches!(self, ParsedPath::Remote(_))
    }

    /// Check if this is a local path
    pub fn is_local(&self) -> bool {
        matches!(self, ParsedPath::Local(_))
    }

    /// Get the remote path if this is a remote path
    pub fn as_remote(&self) -> Option<&RemotePath> {
        match self {
            ParsedPath::Remote(p) => Some(p),
            ParsedPath::Local(_) => None,
        }
    }

    /// Get the local path if this is a local path
    pub fn as_local(&self) -> Option<&std::path::PathBuf> {
        match self {
            ParsedPath::Local(p) => Some(p),
            ParsedPath::Remote(_) => None,
        }
    }
}

/// Parse a path string into a ParsedPath
///
/// Remote paths have the format: profile/bucket[/key]
/// Local paths are anything that:
/// - Starts with / (absolute path)
/// - Starts with ./ or ../ (relative path)
/// - Has a first component that is not a valid profile name
pub fn parse_path(path: &str) -> Result<ParsedPath> {
    if path.is_empty() {
        return Err(Error::InvalidPath("Path cannot be empty".into()));
    }

    if path.starts_with('/') || path.starts_with("./") || path.starts_with("../") {
        return Ok(ParsedPath::Local(std::path::PathBuf::from(path)));
    }

    #[cfg(windows)]
    if path.len() >= 2 && path.chars().nth(1) == Some(':') {
        return Ok(ParsedPath::Local(std::path::PathBuf::from(path)));
    }

    let parts: Vec<&str> = path.splitn(3, '/').collect();

    match parts.as_slice() {
        [single] => {
            if single.contains('.') || single.contains('\\') {
                Ok(ParsedPath::Local(std::path::PathBuf::from(path)))
            } else {
                Err(Error::InvalidPath(format!(
                    "Path '{path}' is incomplete. Use format: profile/bucket[/key]"
                )))
            }
        }
        [profile, bucket] | [profile, bucket, _] => {
            if !is_valid_profile_name(profile) {
                return Ok(ParsedPath::Local(std::path::PathBuf::from(path)));
            }
            if bucket.is_empty() {
                return Err(Error::InvalidPath("Bucket name cannot be empty".into()));
            }
            let key = parts.get(2).copied().unwrap_or_default();
            Ok(ParsedPath::Remote(RemotePath::new(*profile, *bucket, key)))
        }
        _ => Err(Error::InvalidPath(format!("Unrecognized path: {path}"))),
    }
}

/// Parse a path that must be remote
pub fn parse_remote(path: &str) -> Result<RemotePath> {
    match parse_path(path)? {
        ParsedPath::Remote(remote) => Ok(remote),
        ParsedPath::Local(_) => Err(Error::InvalidPath(format!(
            "Expected a remote path (profile/bucket[/key]), got '{path}'"
        ))),
    }
}

/// Check if a string is a valid profile name
fn is_valid_profile_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix("a"), "a/");
        assert_eq!(normalize_prefix("a/"), "a/");
        assert_eq!(normalize_prefix("a/b"), "a/b/");
        assert_eq!(normalize_prefix(""), "");
    }

    #[test]
    fn test_join_prefix() {
        assert_eq!(join_prefix("", "x"), "x");
        assert_eq!(join_prefix("a", "x"), "a/x");
        assert_eq!(join_prefix("a/", "y/"), "a/y/");
    }

    #[test]
    fn test_parent_prefix() {
        assert_eq!(parent_prefix(""), "");
        assert_eq!(parent_prefix("a/"), "");
        assert_eq!(parent_prefix("a/b/"), "a/");
        assert_eq!(parent_prefix("a/b/c"), "a/b/");
    }

    #[test]
    fn test_key_parent() {
        assert_eq!(key_parent("file.txt"), "");
        assert_eq!(key_parent("a/b/file.txt"), "a/b/");
        assert_eq!(key_parent("a/b/"), "a/");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("a/b/file.txt"), "file.txt");
        assert_eq!(display_name("a/b/"), "b/");
        assert_eq!(display_name("top"), "top");
    }

    #[test]
    fn test_parse_remote_path() {
        let path = parse_path("work/bucket/file.txt").unwrap();
        assert!(path.is_remote());

        let remote = path.as_remote().unwrap();
        assert_eq!(remote.profile, "work");
        assert_eq!(remote.bucket, "bucket");
        assert_eq!(remote.key, "file.txt");
        assert!(!remote.is_dir());
    }

    #[test]
    fn test_parse_remote_path_dir() {
        let remote = parse_remote("work/bucket/dir/").unwrap();
        assert_eq!(remote.key, "dir/");
        assert!(remote.is_dir());
    }

    #[test]
    fn test_parse_remote_path_bucket_only() {
        let remote = parse_remote("work/bucket").unwrap();
        assert_eq!(remote.bucket, "bucket");
        assert_eq!(remote.key, "");
        assert!(remote.is_dir());
    }

    #[test]
    fn test_parse_local_paths() {
        assert!(parse_path("/home/user/file.txt").unwrap().is_local());
        assert!(parse_path("./file.txt").unwrap().is_local());
        assert!(parse_path("../file.txt").unwrap().is_local());
        assert!(parse_path("some.file.txt").unwrap().is_local());
        assert!(parse_remote("./file.txt").is_err());
    }

    #[test]
    fn test_parse_invalid_paths() {
        assert!(parse_path("").is_err());
        assert!(parse_path("work").is_err());
        assert!(parse_path("work/").is_err());
    }

    #[test]
    fn test_remote_path_parent_and_join() {
        let path = RemotePath::new("work", "bucket", "a/b/c.txt");
        let parent = path.parent().unwrap();
        assert_eq!(parent.key, "a/b/");
        assert_eq!(parent.parent().unwrap().key, "a/");

        let root = RemotePath::new("work", "bucket", "");
        assert!(root.parent().is_none());
        assert_eq!(root.join("dir/").key, "dir/");
        assert_eq!(root.join("dir/").join("f").key, "dir/f");
    }

    #[test]
    fn test_remote_path_display() {
        let path = RemotePath::new("work", "bucket", "key/file.txt");
        assert_eq!(path.to_string(), "work/bucket/key/file.txt");
    }
}
