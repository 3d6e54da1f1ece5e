use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::fs;

use crate::engine::models::{ComponentConfig, ComponentsConfig, VersionRecord};
use crate::engine::state::{ComponentOutcome, RunMode, RunReport};
use crate::networking::{RepoRef, ReleaseInfo, UpstreamSource};
use crate::storage::{PendingFile, StorageManager};
use crate::updater::{self, UpdateDecision};
use crate::util::{sha256_hex, short_sha};

pub mod models;
pub mod state;

const FALLBACK_BRANCHES: [&str; 2] = ["master", "main"];

/// Latest upstream state of one component.
#[derive(Debug, Clone)]
enum Upstream {
    Release(ReleaseInfo),
    Commit { sha: String },
}

impl Upstream {
    fn version(&self) -> String {
        match self {
            Upstream::Release(release) => release.tag_name.clone(),
            Upstream::Commit { sha } => short_sha(sha),
        }
    }

    /// The installed value this upstream is compared against.
    fn installed<'a>(&self, record: Option<&'a VersionRecord>) -> Option<&'a str> {
        let record = record?;
        match self {
            Upstream::Release(_) => Some(record.version.as_str()),
            Upstream::Commit { .. } => record.commit_hash.as_deref(),
        }
    }

    fn download_url(&self, config: &ComponentConfig, file: &models::TrackedFile) -> String {
        let repo_url = config.source_url.trim_end_matches('/');
        let source = file.source.trim_start_matches('/');
        match self {
            Upstream::Release(release) => release
                .assets
                .iter()
                .find(|asset| asset.name == file.source_basename())
                .map(|asset| asset.browser_download_url.clone())
                .unwrap_or_else(|| format!("{repo_url}/raw/{}/{source}", release.tag_name)),
            Upstream::Commit { sha } => format!("{repo_url}/raw/{sha}/{source}"),
        }
    }
}

/// Check-or-apply update procedure over every configured component.
pub struct Reconciler {
    config: ComponentsConfig,
    source: Arc<dyn UpstreamSource>,
    storage: StorageManager,
}

impl Reconciler {
    pub fn new(
        config: ComponentsConfig,
        source: Arc<dyn UpstreamSource>,
        storage: StorageManager,
    ) -> Self {
        Self {
            config,
            source,
            storage,
        }
    }

    pub async fn load_config(path: &Path) -> Result<ComponentsConfig, String> {
        let bytes = fs::read(path)
            .await
            .map_err(|e| format!("unable to read configuration {}: {e}", path.display()))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| format!("invalid configuration {}: {e}", path.display()))
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.config.keys().map(String::as_str)
    }

    /// Process every component; one failure never stops the others.
    pub async fn run(&self, mode: RunMode) -> RunReport {
        let mut report = RunReport::new(mode);
        for (name, config) in &self.config {
            let outcome = self.reconcile(name, config, mode).await;
            report.push(name.clone(), outcome);
        }
        info!(
            "reconciler: {} succeeded, {} failed",
            report.succeeded(),
            report.failed()
        );
        report
    }

    /// Apply mode for a single configured component.
    pub async fn run_one(&self, name: &str) -> Result<RunReport, String> {
        let config = self
            .config
            .get(name)
            .ok_or_else(|| format!("component {name} not found in configuration"))?;
        let mut report = RunReport::new(RunMode::Apply);
        let outcome = self.reconcile(name, config, RunMode::Apply).await;
        report.push(name, outcome);
        Ok(report)
    }

    async fn reconcile(
        &self,
        name: &str,
        config: &ComponentConfig,
        mode: RunMode,
    ) -> ComponentOutcome {
        match self.try_reconcile(name, config, mode).await {
            Ok(outcome) => outcome,
            Err(reason) => {
                error!("reconciler: {name} failed: {reason}");
                ComponentOutcome::Failed { reason }
            }
        }
    }

    async fn try_reconcile(
        &self,
        name: &str,
        config: &ComponentConfig,
        mode: RunMode,
    ) -> Result<ComponentOutcome, String> {
        validate_component(config)?;
        let record = self.storage.read_record(name).await?;
        let upstream = self.resolve_upstream(name, config).await?;
        let latest = upstream.version();
        let installed = upstream.installed(record.as_ref());

        match updater::decide(installed, &latest) {
            UpdateDecision::UpToDate => {
                info!("reconciler: {name} is up to date ({latest})");
                return Ok(ComponentOutcome::UpToDate { version: latest });
            }
            UpdateDecision::Ahead => {
                let current = installed.unwrap_or_default().to_owned();
                warn!("reconciler: {name} upstream {latest} is older than installed {current}; keeping it");
                return Ok(ComponentOutcome::UpToDate { version: current });
            }
            UpdateDecision::UpdateAvailable => {}
        }

        let current = installed
            .filter(|value| !value.is_empty())
            .unwrap_or("N/A")
            .to_owned();
        if mode == RunMode::Check {
            info!("reconciler: {name} can be updated {current} -> {latest}");
            return Ok(ComponentOutcome::UpdateAvailable {
                current,
                latest,
                url: config.source_url.clone(),
            });
        }

        info!("reconciler: updating {name} from {current} to {latest}");
        let mut pending = Vec::with_capacity(config.files.len());
        for file in &config.files {
            let url = upstream.download_url(config, file);
            debug!("reconciler: fetching {url}");
            let bytes = self
                .source
                .download(&url)
                .await
                .map_err(|e| format!("download of {} failed: {e}", file.source))?;
            pending.push(PendingFile {
                destination: file.destination.clone(),
                bytes,
            });
        }

        let record = VersionRecord {
            version: latest.clone(),
            source_url: config.source_url.clone(),
            last_updated: Utc::now().to_rfc3339(),
            commit_hash: match &upstream {
                Upstream::Commit { .. } => Some(latest.clone()),
                Upstream::Release(_) => None,
            },
            files: pending.iter().map(|f| f.destination.clone()).collect(),
            file_hashes: pending
                .iter()
                .map(|f| (f.destination.clone(), sha256_hex(&f.bytes)))
                .collect(),
        };
        self.storage.commit_update(name, &pending, &record).await?;
        info!("reconciler: {name} updated to {latest}");
        Ok(ComponentOutcome::Updated {
            from: current,
            to: latest,
        })
    }

    async fn resolve_upstream(
        &self,
        name: &str,
        config: &ComponentConfig,
    ) -> Result<Upstream, String> {
        let repo = RepoRef::parse(&config.source_url)?;
        if config.use_releases {
            match self.source.latest_release(&repo).await {
                Ok(release) => return Ok(Upstream::Release(release)),
                Err(err) => {
                    warn!("reconciler: no usable release for {name} ({err}); using commits")
                }
            }
        }

        let branches: Vec<&str> = match config.branch.as_deref() {
            Some(branch) => vec![branch],
            None => FALLBACK_BRANCHES.to_vec(),
        };
        let mut last_error = String::from("no branch to query");
        for branch in branches {
            match self.source.latest_commit(&repo, branch).await {
                Ok(commit) => return Ok(Upstream::Commit { sha: commit.sha }),
                Err(err) => {
                    debug!("reconciler: {name} branch {branch} unavailable: {err}");
                    last_error = err;
                }
            }
        }
        Err(format!("unable to determine latest version: {last_error}"))
    }
}

fn validate_component(config: &ComponentConfig) -> Result<(), String> {
    if config.files.is_empty() {
        return Err("no files configured".into());
    }
    let mut seen = HashSet::new();
    for file in &config.files {
        file.validate_destination()?;
        if !seen.insert(file.normalized_destination()) {
            return Err(format!("destination {} listed twice", file.destination));
        }
    }
    Ok(())
}
