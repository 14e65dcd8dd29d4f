//! Run configuration shared by check and publish mode.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How zone content is compared against the published version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// Ignore comments, trailing whitespace, blank lines and CRLF.
    #[default]
    Normalized,
    /// Raw byte comparison.
    Exact,
}

impl std::str::FromStr for Normalization {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normalized" => Ok(Normalization::Normalized),
            "exact" => Ok(Normalization::Exact),
            other => Err(format!("unknown normalization mode: {other}")),
        }
    }
}

/// Timeouts for external calls, in seconds. Zero disables the timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub revision_secs: u64,
    pub check_secs: u64,
    pub transfer_secs: u64,
    pub reload_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            revision_secs: 30,
            check_secs: 60,
            transfer_secs: 300,
            reload_secs: 120,
        }
    }
}

impl Timeouts {
    pub fn as_duration(secs: u64) -> Option<Duration> {
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

/// Rendering of a generated zone-list configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneListConfig {
    /// JSON template file, read from the revision tree's config directory.
    pub template: PathBuf,

    /// Name of the rendered file inside the config bundle.
    pub output: PathBuf,

    /// If non-empty, only zones matching one of these patterns are listed.
    #[serde(default)]
    pub allow: Vec<String>,

    /// Zones matching one of these patterns are never listed.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Argument vectors for the command-backed structural checker.
///
/// `{path}` expands to the staged file, `{zone}` to the zone name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandTemplates {
    pub check_config: Vec<String>,
    pub check_zone: Vec<String>,
}

fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|a| a.to_string()).collect()
}

impl Default for CommandTemplates {
    fn default() -> Self {
        Self {
            check_config: argv(&["knotc", "-c", "{path}", "conf-check"]),
            check_zone: argv(&["kzonecheck", "-o", "{zone}", "{path}"]),
        }
    }
}

/// Argument vectors for one name server's control plane.
///
/// `reload_zone` runs once per zone with `{zone}` expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlCommands {
    pub reload: Vec<String>,
    pub reload_zone: Vec<String>,
    pub status: Vec<String>,
}

impl Default for ControlCommands {
    fn default() -> Self {
        Self {
            reload: argv(&["knotc", "reload"]),
            reload_zone: argv(&["knotc", "zone-reload", "{zone}"]),
            status: argv(&["knotc", "status"]),
        }
    }
}

/// Where and how the build tree is mirrored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// rsync destination, e.g. `ns1.example.net:/var/lib/knot/publish/`.
    pub destination: String,

    pub rsync: String,

    /// Patterns passed as `--exclude`; excluded paths are neither copied nor deleted.
    pub excludes: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            destination: String::new(),
            rsync: "rsync".to_string(),
            excludes: Vec::new(),
        }
    }
}

/// One name server the build tree is published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Label used in logs and reports.
    pub name: String,
    pub transport: TransportConfig,
    pub control: ControlCommands,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            name: "primary".to_string(),
            transport: TransportConfig::default(),
            control: ControlCommands::default(),
        }
    }
}

impl TargetConfig {
    /// Target named after the host part of an rsync destination.
    pub fn for_destination(destination: &str, control: ControlCommands) -> Self {
        let name = destination
            .split_once(':')
            .map_or(destination, |(host, _)| host)
            .to_string();
        Self {
            name,
            transport: TransportConfig {
                destination: destination.to_string(),
                ..TransportConfig::default()
            },
            control,
        }
    }
}

/// Everything the engine needs to know about the source layout and policies.
///
/// Every field has a default, so a config file only names what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Zone directory inside the revision tree.
    pub zones_dir: PathBuf,

    /// Configuration directory inside the revision tree.
    pub config_dir: PathBuf,

    /// File suffix identifying zone files.
    pub zone_suffix: String,

    /// Main configuration file handed to the checker. When unset every file
    /// of the bundle is checked on its own.
    pub config_entry: Option<PathBuf>,

    /// Local staging directory mirrored to the target.
    pub build_dir: PathBuf,

    /// Persisted publish state.
    pub state_path: PathBuf,

    /// Lock file guarding against concurrent publish runs.
    pub lease_path: PathBuf,

    pub normalization: Normalization,

    /// Accept zones that disappeared from the tree.
    pub allow_deletions: bool,

    /// Accept `$ORIGIN` values that differ from the file name.
    pub allow_fancy_names: bool,

    /// Flag PTR targets that look like they miss a trailing dot.
    pub check_ptr_dots: bool,

    /// Treat every zone as changed.
    pub force_all_zones: bool,

    /// Skip the trailing-whitespace lint on changed zones.
    pub ignore_whitespace_errors: bool,

    pub zone_list: Option<ZoneListConfig>,

    pub timeouts: Timeouts,

    pub commands: CommandTemplates,

    /// Name servers to publish to, in order, under one lease.
    pub targets: Vec<TargetConfig>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            zones_dir: PathBuf::from("zones"),
            config_dir: PathBuf::from("config"),
            zone_suffix: ".zone".to_string(),
            config_entry: None,
            build_dir: PathBuf::from("build"),
            state_path: PathBuf::from("zones_deploy.json"),
            lease_path: PathBuf::from("zones_deploy.lock"),
            normalization: Normalization::default(),
            allow_deletions: false,
            allow_fancy_names: false,
            check_ptr_dots: true,
            force_all_zones: false,
            ignore_whitespace_errors: false,
            zone_list: None,
            timeouts: Timeouts::default(),
            commands: CommandTemplates::default(),
            targets: vec![TargetConfig::default()],
        }
    }
}
