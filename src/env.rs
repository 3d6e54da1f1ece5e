use std::env;
use std::path::PathBuf;

pub const DEFAULT_CONFIG_FILE: &str = "components_config.json";
pub const VERSION_RECORD_FILE: &str = "version.json";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const USER_AGENT: &str = concat!("lovelace-updater/", env!("CARGO_PKG_VERSION"));

/// Directory holding one sub-directory per component.
pub fn default_root_dir() -> PathBuf {
    env::var_os("LOVELACE_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn github_api_base() -> String {
    env::var("LOVELACE_GITHUB_API")
        .ok()
        .map(|value| value.trim().trim_end_matches('/').to_owned())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_GITHUB_API.to_owned())
}

/// Token used to lift the anonymous GitHub API rate limit.
pub fn github_token() -> Option<String> {
    env::var("GITHUB_TOKEN")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}
