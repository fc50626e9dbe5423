//! Profile management commands
//!
//! Profiles are named credentials for an S3-compatible store. Secrets are
//! written to the config file but never printed.

use clap::Subcommand;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use loft_core::profile::TimeoutConfig;
use loft_core::{Error, Profile, ProfileManager};

/// Profile subcommands for managing credentials
#[derive(Subcommand, Debug)]
pub enum ProfileCommands {
    /// Add or update a profile
    Set(SetArgs),

    /// List all configured profiles
    List(ListArgs),

    /// Remove a profile
    Remove(RemoveArgs),
}

/// Arguments for the `profile set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Profile name (letters, digits, '-' and '_')
    pub name: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Region
    #[arg(long, default_value = "us-east-1")]
    pub region: String,

    /// Custom endpoint URL for non-AWS stores (e.g., "http://localhost:9000")
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long, default_value = "false")]
    pub path_style: bool,

    /// Connection timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Read timeout in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,
}

/// Arguments for the `profile list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show region and addressing details
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `profile remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the profile to remove
    pub name: String,
}

/// JSON output for profile list
#[derive(Serialize)]
struct ProfileListOutput {
    profiles: Vec<ProfileInfo>,
}

/// Profile information for JSON output (without secrets)
#[derive(Serialize)]
struct ProfileInfo {
    name: String,
    region: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    path_style: bool,
}

impl From<&Profile> for ProfileInfo {
    fn from(profile: &Profile) -> Self {
        Self {
            name: profile.name.clone(),
            region: profile.region.clone(),
            endpoint: profile.endpoint.clone(),
            path_style: profile.path_style,
        }
    }
}

/// JSON output for profile set/remove operations
#[derive(Serialize)]
struct ProfileOperationOutput {
    success: bool,
    profile: String,
    message: String,
}

/// Execute a profile subcommand
pub async fn execute(cmd: ProfileCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let manager = match ProfileManager::new() {
        Ok(m) => m,
        Err(e) => return formatter.fail(&e),
    };

    match cmd {
        ProfileCommands::Set(args) => execute_set(args, &manager, &formatter),
        ProfileCommands::List(args) => execute_list(args, &manager, &formatter),
        ProfileCommands::Remove(args) => execute_remove(args, &manager, &formatter),
    }
}

fn execute_set(args: SetArgs, manager: &ProfileManager, formatter: &Formatter) -> ExitCode {
    let profile = match build_profile(args) {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };
    let name = profile.name.clone();

    match manager.set(profile) {
        Ok(()) => {
            let message = format!("Profile '{name}' configured successfully.");
            if formatter.is_json() {
                formatter.json(&ProfileOperationOutput {
                    success: true,
                    profile: name,
                    message,
                });
            } else {
                formatter.success(&message);
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&e),
    }
}

fn build_profile(args: SetArgs) -> loft_core::Result<Profile> {
    let valid_name = !args.name.is_empty()
        && args
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid_name {
        return Err(Error::Config(format!(
            "Invalid profile name '{}': use letters, digits, '-' and '_'",
            args.name
        )));
    }

    let mut profile = Profile::new(args.name, args.access_key, args.secret_key, args.region);
    profile.endpoint = args.endpoint;
    profile.path_style = args.path_style;
    if args.connect_timeout_ms.is_some() || args.read_timeout_ms.is_some() {
        let defaults = TimeoutConfig::default();
        profile.timeout = Some(TimeoutConfig {
            connect_ms: args.connect_timeout_ms.unwrap_or(defaults.connect_ms),
            read_ms: args.read_timeout_ms.unwrap_or(defaults.read_ms),
        });
    }
    profile.validate()?;
    Ok(profile)
}

fn execute_list(args: ListArgs, manager: &ProfileManager, formatter: &Formatter) -> ExitCode {
    let profiles = match manager.list() {
        Ok(p) => p,
        Err(e) => return formatter.fail(&e),
    };

    if formatter.is_json() {
        formatter.json(&ProfileListOutput {
            profiles: profiles.iter().map(ProfileInfo::from).collect(),
        });
    } else if profiles.is_empty() {
        formatter.println("No profiles configured.");
    } else {
        for profile in &profiles {
            let endpoint = profile.endpoint.as_deref().unwrap_or("(aws)");
            if args.long {
                formatter.println(&format!(
                    "{:<12} {} (region: {}, path-style: {})",
                    profile.name, endpoint, profile.region, profile.path_style
                ));
            } else {
                formatter.println(&format!("{:<12} {}", profile.name, endpoint));
            }
        }
    }
    ExitCode::Success
}

fn execute_remove(args: RemoveArgs, manager: &ProfileManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            let message = format!("Profile '{}' removed successfully.", args.name);
            if formatter.is_json() {
                formatter.json(&ProfileOperationOutput {
                    success: true,
                    profile: args.name,
                    message,
                });
            } else {
                formatter.success(&message);
            }
            ExitCode::Success
        }
        Err(e) => formatter.fail(&e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_args(name: &str) -> SetArgs {
        SetArgs {
            name: name.to_string(),
            access_key: "access".to_string(),
            secret_key: "secret".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
            path_style: false,
            connect_timeout_ms: None,
            read_timeout_ms: None,
        }
    }

    #[test]
    fn test_build_profile_defaults() {
        let profile = build_profile(set_args("work")).unwrap();
        assert_eq!(profile.name, "work");
        assert_eq!(profile.region, "us-east-1");
        assert!(profile.endpoint.is_none());
        assert!(profile.timeout.is_none());
    }

    #[test]
    fn test_build_profile_rejects_bad_name() {
        assert!(matches!(
            build_profile(set_args("my profile")),
            Err(Error::Config(_))
        ));
        assert!(matches!(build_profile(set_args("")), Err(Error::Config(_))));
    }

    #[test]
    fn test_build_profile_rejects_bad_endpoint() {
        let mut args = set_args("local");
        args.endpoint = Some("not a url".to_string());
        assert!(build_profile(args).is_err());
    }

    #[test]
    fn test_build_profile_partial_timeouts() {
        let mut args = set_args("slow");
        args.read_timeout_ms = Some(120_000);
        let timeout = build_profile(args).unwrap().timeout.unwrap();
        assert_eq!(timeout.read_ms, 120_000);
        assert_eq!(timeout.connect_ms, TimeoutConfig::default().connect_ms);
    }

    #[test]
    fn test_profile_info_hides_secrets() {
        let profile = Profile::new("work", "AKIA", "s3cr3t", "eu-west-1")
            .with_endpoint("http://localhost:9000");
        let json = serde_json::to_string(&ProfileInfo::from(&profile)).unwrap();
        assert!(json.contains("eu-west-1"));
        assert!(!json.contains("AKIA"));
        assert!(!json.contains("s3cr3t"));
    }
}
