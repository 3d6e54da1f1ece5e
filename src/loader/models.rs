use serde::{Deserialize, Serialize};

pub const LOADED_EVENT: &str = "lovelace-components-loaded";
pub const ERROR_EVENT: &str = "lovelace-components-error";

/// `components.json` published next to the loader.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct LoaderManifest {
    #[serde(default)]
    pub version: Option<String>,
    pub components: Vec<ManifestEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Asset {
    pub file: String,
    pub name: String,
    pub description: String,
    pub required: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Manifest,
    /// Degraded mode: existence probes against the built-in file lists.
    Probe,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AssetResult {
    pub file: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Caller-owned result of one discovery and load pass.
#[derive(Clone, Debug, Serialize)]
pub struct LoadSummary {
    pub base_path: String,
    pub source: DiscoverySource,
    pub components: Vec<Asset>,
    pub results: Vec<AssetResult>,
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    pub timestamp: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", content = "detail")]
pub enum LoaderEvent {
    #[serde(rename = "lovelace-components-loaded")]
    Loaded(LoadSummary),
    #[serde(rename = "lovelace-components-error")]
    Error { message: String, timestamp: String },
}

impl LoaderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LoaderEvent::Loaded(_) => LOADED_EVENT,
            LoaderEvent::Error { .. } => ERROR_EVENT,
        }
    }
}
