use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::env;

/// Tracked components keyed by name, in file order.
pub type ComponentsConfig = IndexMap<String, ComponentConfig>;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub source_url: String,
    pub files: Vec<TrackedFile>,
    #[serde(default = "default_use_releases")]
    pub use_releases: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

fn default_use_releases() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackedFile {
    /// Path inside the upstream repository.
    pub source: String,
    /// Path relative to the component directory.
    pub destination: String,
}

impl TrackedFile {
    /// File name used to match release assets.
    pub fn source_basename(&self) -> &str {
        self.source.rsplit('/').next().unwrap_or(&self.source)
    }

    pub fn validate_destination(&self) -> Result<(), String> {
        let path = Path::new(&self.destination);
        if self.destination.trim().is_empty() {
            return Err("empty destination path".into());
        }
        let escapes = path
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!(
                "destination {} must stay inside the component directory",
                self.destination
            ));
        }
        let normalized = self.normalized_destination();
        if normalized == Path::new(env::VERSION_RECORD_FILE) {
            return Err(format!(
                "destination {} would overwrite the version record",
                self.destination
            ));
        }
        let staging_name = normalized.components().any(|c| {
            let name = c.as_os_str().to_string_lossy();
            name.starts_with('.') && (name.ends_with(".partial") || name.ends_with(".backup"))
        });
        if staging_name {
            return Err(format!(
                "destination {} collides with a staging file name",
                self.destination
            ));
        }
        Ok(())
    }

    /// Destination relative to the component directory, with `.` segments dropped.
    pub fn normalized_destination(&self) -> PathBuf {
        Path::new(self.destination.trim())
            .components()
            .filter(|c| *c != Component::CurDir)
            .collect()
    }
}

/// Persisted `version.json` of one component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_hashes: BTreeMap<String, String>,
}

/// Entry of the update summary artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub current: String,
    pub latest: String,
}

pub type UpdateSummary = BTreeMap<String, UpdateEntry>;
