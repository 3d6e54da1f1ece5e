use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use reqwest::Url;
use tokio::sync::mpsc;

use crate::loader::models::{
    Asset, AssetResult, DiscoverySource, LoadSummary, LoaderEvent, LoaderManifest,
};
use crate::util::display_name;

pub mod models;

pub const LOADER_FILE: &str = "lovelace-components-loader.js";
pub const FALLBACK_BASE_PATH: &str = "/local/community/lovelace-components/";
pub const MANIFEST_FILE: &str = "components.json";

/// Bundled components, probed first when no manifest is published.
pub const KNOWN_COMPONENTS: [&str; 2] = ["card-mod.js", "fold-entity-row.js"];

/// Popular community cards that may sit next to the bundle.
pub const COMMON_COMPONENTS: [&str; 14] = [
    "card-mod.js",
    "fold-entity-row.js",
    "button-card.js",
    "mushroom.js",
    "mini-graph-card-bundle.js",
    "layout-card.js",
    "auto-entities.js",
    "slider-entity-row.js",
    "multiple-entity-row.js",
    "bar-card.js",
    "apexcharts-card.js",
    "swipe-card.js",
    "stack-in-card.js",
    "config-template-card.js",
];

/// The page the loader runs in: fetches, existence probes and module injection.
#[async_trait]
pub trait AssetHost: Send + Sync {
    /// Body of `url`, or `None` when it does not exist.
    async fn fetch_text(&self, url: &str) -> Result<Option<String>, String>;

    /// Existence check without transferring the body.
    async fn probe(&self, url: &str) -> Result<bool, String>;

    async fn load(&self, url: &str) -> Result<(), String>;
}

/// Directory of the first script whose file name is `loader_file`, else the fixed path.
pub fn resolve_base_path(script_srcs: &[String], loader_file: &str) -> String {
    script_srcs
        .iter()
        .find_map(|src| {
            let path = src.split(['?', '#']).next().unwrap_or(src);
            let (dir, file) = path.rsplit_once('/')?;
            (file == loader_file).then(|| format!("{dir}/"))
        })
        .unwrap_or_else(|| FALLBACK_BASE_PATH.to_owned())
}

pub struct AssetLoader {
    host: Arc<dyn AssetHost>,
    origin: String,
    base_path: String,
}

impl AssetLoader {
    pub fn new(host: Arc<dyn AssetHost>, origin: impl Into<String>, base_path: &str) -> Self {
        let base_path = if base_path.ends_with('/') {
            base_path.to_owned()
        } else {
            format!("{base_path}/")
        };
        Self {
            host,
            origin: origin.into(),
            base_path,
        }
    }

    /// Discover and load every asset, then publish the outcome on `events`.
    ///
    /// Individual asset failures are part of the summary. Only a fault in
    /// discovery itself produces an error event and an `Err`.
    pub async fn run(
        &self,
        events: &mpsc::UnboundedSender<LoaderEvent>,
    ) -> Result<LoadSummary, String> {
        match self.load_all().await {
            Ok(summary) => {
                info!(
                    "loader: {}/{} components loaded",
                    summary.successful, summary.total
                );
                events.send(LoaderEvent::Loaded(summary.clone())).ok();
                Ok(summary)
            }
            Err(message) => {
                error!("loader: {message}");
                events
                    .send(LoaderEvent::Error {
                        message: message.clone(),
                        timestamp: Utc::now().to_rfc3339(),
                    })
                    .ok();
                Err(message)
            }
        }
    }

    async fn load_all(&self) -> Result<LoadSummary, String> {
        let base = self.base_url()?;
        let (source, components) = self.discover(&base).await?;
        let results = self.load_assets(&base, &components).await;
        let successful = results.iter().filter(|r| r.loaded).count();
        Ok(LoadSummary {
            base_path: base.to_string(),
            source,
            total: results.len(),
            failed: results.len() - successful,
            successful,
            components,
            results,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    fn base_url(&self) -> Result<Url, String> {
        Url::parse(&self.origin)
            .and_then(|origin| origin.join(&self.base_path))
            .map_err(|e| format!("cannot resolve base path {}: {e}", self.base_path))
    }

    /// Manifest entries when one is published, otherwise probed fallbacks.
    pub async fn discover(&self, base: &Url) -> Result<(DiscoverySource, Vec<Asset>), String> {
        if let Some(assets) = self.manifest_assets(base).await? {
            info!("loader: manifest lists {} components", assets.len());
            return Ok((DiscoverySource::Manifest, assets));
        }
        warn!("loader: no usable {MANIFEST_FILE} under {base}; probing known files");
        let assets = self.probe_assets(base).await;
        Ok((DiscoverySource::Probe, assets))
    }

    async fn manifest_assets(&self, base: &Url) -> Result<Option<Vec<Asset>>, String> {
        let url = base
            .join(MANIFEST_FILE)
            .map_err(|e| format!("cannot resolve manifest url: {e}"))?;
        let text = match self.host.fetch_text(url.as_str()).await {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(None),
            Err(err) => {
                debug!("loader: manifest fetch failed: {err}");
                return Ok(None);
            }
        };
        let manifest: LoaderManifest = match serde_json::from_str(&text) {
            Ok(manifest) => manifest,
            Err(err) => {
                debug!("loader: manifest is not usable: {err}");
                return Ok(None);
            }
        };
        if let Some(version) = &manifest.version {
            debug!("loader: manifest version {version}");
        }

        let mut seen = HashSet::new();
        let assets = manifest
            .components
            .into_iter()
            .filter(|entry| {
                let fresh = seen.insert(entry.file.clone());
                if !fresh {
                    warn!("loader: manifest lists {} twice", entry.file);
                }
                fresh
            })
            .map(|entry| Asset {
                name: entry.name.unwrap_or_else(|| display_name(&entry.file)),
                description: entry.description.unwrap_or_default(),
                required: entry.required,
                file: entry.file,
            })
            .collect();
        Ok(Some(assets))
    }

    async fn probe_assets(&self, base: &Url) -> Vec<Asset> {
        let mut seen = HashSet::new();
        let candidates: Vec<&str> = KNOWN_COMPONENTS
            .iter()
            .chain(COMMON_COMPONENTS.iter())
            .copied()
            .filter(|file| seen.insert(*file))
            .collect();

        let probes = candidates.iter().map(|file| async move {
            let url = match base.join(file) {
                Ok(url) => url,
                Err(err) => {
                    warn!("loader: skipping {file}: {err}");
                    return false;
                }
            };
            match self.host.probe(url.as_str()).await {
                Ok(found) => found,
                Err(err) => {
                    debug!("loader: probe of {file} failed: {err}");
                    false
                }
            }
        });
        let found = join_all(probes).await;

        candidates
            .into_iter()
            .zip(found)
            .filter(|(_, found)| *found)
            .map(|(file, _)| Asset {
                file: file.to_owned(),
                name: display_name(file),
                description: "Discovered by probing".into(),
                required: false,
            })
            .collect()
    }

    /// Load all assets concurrently and settle every attempt.
    async fn load_assets(&self, base: &Url, assets: &[Asset]) -> Vec<AssetResult> {
        let loads = assets.iter().map(|asset| async move {
            let outcome = match base.join(&asset.file) {
                Ok(url) => self.host.load(url.as_str()).await,
                Err(err) => Err(format!("invalid asset path: {err}")),
            };
            match outcome {
                Ok(()) => {
                    debug!("loader: loaded {}", asset.file);
                    AssetResult {
                        file: asset.file.clone(),
                        loaded: true,
                        error: None,
                    }
                }
                Err(err) => {
                    if asset.required {
                        error!("loader: required component {} failed: {err}", asset.file);
                    } else {
                        warn!("loader: {} failed: {err}", asset.file);
                    }
                    AssetResult {
                        file: asset.file.clone(),
                        loaded: false,
                        error: Some(err),
                    }
                }
            }
        });
        join_all(loads).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const ORIGIN: &str = "http://homeassistant.local:8123";

    #[derive(Default)]
    struct FakeHost {
        manifest: Option<Result<Option<String>, String>>,
        present: HashSet<String>,
        broken: HashSet<String>,
        probed: Mutex<Vec<String>>,
    }

    fn file_of(url: &str) -> String {
        url.rsplit('/').next().unwrap_or(url).to_owned()
    }

    impl FakeHost {
        fn with_manifest(json: &str) -> Self {
            Self {
                manifest: Some(Ok(Some(json.to_owned()))),
                ..Self::default()
            }
        }

        fn present(mut self, files: &[&str]) -> Self {
            self.present.extend(files.iter().map(|f| f.to_string()));
            self
        }

        fn broken(mut self, files: &[&str]) -> Self {
            self.broken.extend(files.iter().map(|f| f.to_string()));
            self
        }
    }

    #[async_trait]
    impl AssetHost for FakeHost {
        async fn fetch_text(&self, _url: &str) -> Result<Option<String>, String> {
            self.manifest.clone().unwrap_or(Ok(None))
        }

        async fn probe(&self, url: &str) -> Result<bool, String> {
            let file = file_of(url);
            self.probed.lock().unwrap().push(file.clone());
            if file == "button-card.js" {
                return Err("connection reset".into());
            }
            Ok(self.present.contains(&file))
        }

        async fn load(&self, url: &str) -> Result<(), String> {
            let file = file_of(url);
            if self.broken.contains(&file) {
                Err(format!("failed to load {file}"))
            } else {
                Ok(())
            }
        }
    }

    fn loader(host: FakeHost) -> (AssetLoader, Arc<FakeHost>) {
        let host = Arc::new(host);
        let loader = AssetLoader::new(host.clone(), ORIGIN, FALLBACK_BASE_PATH);
        (loader, host)
    }

    fn files(assets: &[Asset]) -> Vec<&str> {
        assets.iter().map(|a| a.file.as_str()).collect()
    }

    #[test]
    fn resolves_base_path_from_scripts() {
        let scripts = vec![
            "/frontend_latest/app.js".to_owned(),
            "/hacsfiles/lovelace-components/lovelace-components-loader.js?hacstag=123".to_owned(),
        ];
        assert_eq!(
            resolve_base_path(&scripts, LOADER_FILE),
            "/hacsfiles/lovelace-components/"
        );
    }

    #[test]
    fn falls_back_to_fixed_base_path() {
        let scripts = vec!["/frontend_latest/app.js".to_owned()];
        assert_eq!(resolve_base_path(&scripts, LOADER_FILE), FALLBACK_BASE_PATH);
        assert_eq!(resolve_base_path(&[], LOADER_FILE), FALLBACK_BASE_PATH);
    }

    #[tokio::test]
    async fn manifest_is_authoritative() {
        let host = FakeHost::with_manifest(
            r#"{"components": [{"file": "a.js"}, {"file": "b.js", "name": "Bee", "required": true}]}"#,
        )
        .present(&["card-mod.js"]);
        let (loader, host) = loader(host);
        let base = loader.base_url().unwrap();

        let (source, assets) = loader.discover(&base).await.unwrap();

        assert_eq!(source, DiscoverySource::Manifest);
        assert_eq!(files(&assets), ["a.js", "b.js"]);
        assert_eq!(assets[0].name, "A");
        assert_eq!(assets[1].name, "Bee");
        assert!(assets[1].required);
        assert!(host.probed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn probes_known_files_without_manifest() {
        let host = FakeHost::default().present(&["card-mod.js", "fold-entity-row.js"]);
        let (loader, host) = loader(host);
        let base = loader.base_url().unwrap();

        let (source, assets) = loader.discover(&base).await.unwrap();

        assert_eq!(source, DiscoverySource::Probe);
        assert_eq!(files(&assets), ["card-mod.js", "fold-entity-row.js"]);
        assert_eq!(assets[1].name, "Fold Entity Row");
        let probed = host.probed.lock().unwrap();
        let unique: HashSet<&String> = probed.iter().collect();
        assert_eq!(unique.len(), probed.len(), "a candidate was probed twice");
    }

    #[tokio::test]
    async fn unusable_manifest_falls_back_silently() {
        for manifest in [
            Ok(Some("not json".to_owned())),
            Ok(Some(r#"{"version": "1"}"#.to_owned())),
            Err("timeout".to_owned()),
        ] {
            let host = FakeHost {
                manifest: Some(manifest),
                ..FakeHost::default()
            }
            .present(&["mushroom.js"]);
            let (loader, _) = loader(host);
            let (tx, mut rx) = mpsc::unbounded_channel();

            let summary = loader.run(&tx).await.unwrap();

            assert_eq!(summary.source, DiscoverySource::Probe);
            assert_eq!(files(&summary.components), ["mushroom.js"]);
            assert!(matches!(rx.try_recv(), Ok(LoaderEvent::Loaded(_))));
        }
    }

    #[tokio::test]
    async fn partial_load_failures_are_counted() {
        let host = FakeHost::with_manifest(
            r#"{"components": [{"file": "a.js"}, {"file": "b.js"}, {"file": "c.js"}, {"file": "d.js"}, {"file": "e.js"}]}"#,
        )
        .broken(&["b.js", "e.js"]);
        let (loader, _) = loader(host);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let summary = loader.run(&tx).await.unwrap();

        assert_eq!(summary.successful, 3);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total, 5);
        let failed: Vec<&str> = summary
            .results
            .iter()
            .filter(|r| !r.loaded)
            .map(|r| r.file.as_str())
            .collect();
        assert_eq!(failed, ["b.js", "e.js"]);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name(), models::LOADED_EVENT);
        let detail = serde_json::to_value(&event).unwrap();
        assert_eq!(detail["event"], models::LOADED_EVENT);
        assert_eq!(detail["detail"]["successful"], 3);
        assert_eq!(detail["detail"]["components"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn duplicate_manifest_entries_load_once() {
        let host =
            FakeHost::with_manifest(r#"{"components": [{"file": "a.js"}, {"file": "a.js"}]}"#);
        let (loader, _) = loader(host);
        let (tx, _rx) = mpsc::unbounded_channel();

        let summary = loader.run(&tx).await.unwrap();

        assert_eq!(summary.total, 1);
    }

    #[tokio::test]
    async fn broken_base_publishes_error_event() {
        let host = Arc::new(FakeHost::default());
        let loader = AssetLoader::new(host, "not a url", "/local/");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let result = loader.run(&tx).await;

        assert!(result.is_err());
        match rx.try_recv().unwrap() {
            LoaderEvent::Error { message, .. } => assert!(message.contains("/local/")),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
