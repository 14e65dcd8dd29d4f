//! Transient data model for a single pipeline run.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zonepub_state::PendingReload;

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// One zone file under consideration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneArtifact {
    /// Zone name (lowercase file stem).
    pub name: String,

    /// Path relative to the zones directory.
    pub path: PathBuf,

    /// File content. After serial allocation this carries the embedded serial.
    pub content: Vec<u8>,

    /// SOA serial: authored value when read, allocated value afterwards.
    pub serial: u32,
}

impl ZoneArtifact {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        let content_serial = crate::zonefile::soa_serial(&content).unwrap_or(0);
        Self {
            name: name.into(),
            path: path.into(),
            content,
            serial: content_serial,
        }
    }

    /// Short SHA-256 of the content, for logs.
    pub fn digest(&self) -> String {
        content_digest(&self.content)
    }
}

/// One file of the server configuration bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigArtifact {
    /// Path relative to the config directory.
    pub path: PathBuf,

    pub content: Vec<u8>,
}

impl ConfigArtifact {
    pub fn new(path: impl Into<PathBuf>, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            content,
        }
    }
}

/// A complete `{zones, config}` tree at one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTree {
    /// Revision the tree was read at. Empty for the "nothing published" tree.
    pub revision: String,

    /// Zone name -> artifact.
    pub zones: BTreeMap<String, ZoneArtifact>,

    /// Relative path -> config file.
    pub config: BTreeMap<PathBuf, ConfigArtifact>,
}

impl SourceTree {
    pub fn new(revision: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            ..Self::default()
        }
    }

    pub fn with_zone(mut self, zone: ZoneArtifact) -> Self {
        self.zones.insert(zone.name.clone(), zone);
        self
    }

    pub fn with_config(mut self, config: ConfigArtifact) -> Self {
        self.config.insert(config.path.clone(), config);
        self
    }

    pub fn zone_names(&self) -> BTreeSet<String> {
        self.zones.keys().cloned().collect()
    }
}

// ---------------------------------------------------------------------------
// ChangeSet
// ---------------------------------------------------------------------------

/// Which zones and whether the config bundle changed.
///
/// Produced twice per publish run with different meaning: by the
/// `SourceDiffer` (what needs a new serial) and by the `TransferDiffer`
/// (what needs a reload).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Zones added or modified.
    pub changed_zones: BTreeSet<String>,

    /// Zones that disappeared.
    pub deleted_zones: BTreeSet<String>,

    /// Whether any file of the config bundle changed, appeared or vanished.
    pub config_changed: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed_zones.is_empty() && self.deleted_zones.is_empty() && !self.config_changed
    }

    pub fn is_zone_changed(&self, zone: &str) -> bool {
        self.changed_zones.contains(zone)
    }

    /// Add everything `other` reports.
    pub fn merge(&mut self, other: &ChangeSet) {
        self.changed_zones.extend(other.changed_zones.iter().cloned());
        self.deleted_zones.extend(other.deleted_zones.iter().cloned());
        self.config_changed |= other.config_changed;
    }

    /// Record this change set as reload work owed for `revision`.
    pub fn to_pending(&self, revision: &str) -> PendingReload {
        PendingReload {
            revision: revision.to_string(),
            changed_zones: self.changed_zones.clone(),
            deleted_zones: self.deleted_zones.clone(),
            config_changed: self.config_changed,
        }
    }

    /// Reload work owed by an earlier run, restricted to zones that still
    /// exist in `zones`. A zone gone since then is covered by its deletion.
    pub fn from_pending(pending: &PendingReload, zones: &BTreeSet<String>) -> Self {
        Self {
            changed_zones: pending.changed_zones.intersection(zones).cloned().collect(),
            deleted_zones: pending.deleted_zones.clone(),
            config_changed: pending.config_changed,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Identity of the artifact a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ArtifactRef {
    Config { path: PathBuf },
    Zone { name: String },
}

impl ArtifactRef {
    pub fn config(path: impl Into<PathBuf>) -> Self {
        ArtifactRef::Config { path: path.into() }
    }

    pub fn zone(name: impl Into<String>) -> Self {
        ArtifactRef::Zone { name: name.into() }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactRef::Config { path } => write!(f, "config {}", path.display()),
            ArtifactRef::Zone { name } => write!(f, "zone {}", name),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub artifact: ArtifactRef,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.artifact, self.message)
    }
}

/// Aggregated validation outcome. `ok` is true iff there are no diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub ok: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::pass()
    }
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            ok: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn fail(artifact: ArtifactRef, message: impl Into<String>) -> Self {
        let mut result = Self::pass();
        result.push(artifact, message);
        result
    }

    pub fn push(&mut self, artifact: ArtifactRef, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            artifact,
            message: message.into(),
        });
        self.ok = false;
    }

    /// Append another result, preserving diagnostic order.
    pub fn merge(&mut self, other: ValidationResult) {
        self.ok &= other.ok;
        self.diagnostics.extend(other.diagnostics);
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ok {
            return write!(f, "validation passed");
        }
        writeln!(f, "validation failed with {} diagnostic(s)", self.diagnostics.len())?;
        for diag in &self.diagnostics {
            writeln!(f, "  {}", diag)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ReloadPlan
// ---------------------------------------------------------------------------

/// Reload action to apply on the target name server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "zones", rename_all = "snake_case")]
pub enum ReloadPlan {
    NoOp,
    Full,
    Selective(BTreeSet<String>),
}

impl fmt::Display for ReloadPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReloadPlan::NoOp => write!(f, "no-op"),
            ReloadPlan::Full => write!(f, "full reload"),
            ReloadPlan::Selective(zones) => {
                let names: Vec<&str> = zones.iter().map(String::as_str).collect();
                write!(f, "selective reload of {}", names.join(", "))
            }
        }
    }
}

/// SHA-256 of `data`, first 12 hex chars.
pub fn content_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let hex = hex::encode(hasher.finalize());
    hex[..12].to_string()
}
