use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;
use tokio::fs;

use crate::engine::models::VersionRecord;
use crate::env;

/// Downloaded file waiting to be committed into a component directory.
#[derive(Clone, Debug)]
pub struct PendingFile {
    pub destination: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct Swap {
    target: PathBuf,
    partial: PathBuf,
    backup: PathBuf,
    had_original: bool,
}

#[derive(Clone)]
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn component_dir(&self, component: &str) -> PathBuf {
        self.base_dir.join(component)
    }

    pub fn record_path(&self, component: &str) -> PathBuf {
        self.component_dir(component).join(env::VERSION_RECORD_FILE)
    }

    pub async fn read_record(&self, component: &str) -> Result<Option<VersionRecord>, String> {
        let path = self.record_path(component);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(format!("failed to read {}: {err}", path.display())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))
    }

    /// Replace the tracked files and the version record of `component` as one unit.
    ///
    /// Everything is staged next to its target first. If any step fails the
    /// previous files and record are restored and the staged copies removed.
    pub async fn commit_update(
        &self,
        component: &str,
        files: &[PendingFile],
        record: &VersionRecord,
    ) -> Result<(), String> {
        let dir = self.component_dir(component);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| format!("unable to create {}: {e}", dir.display()))?;

        let record_bytes = serde_json::to_vec_pretty(record)
            .map_err(|e| format!("failed to serialize version record: {e}"))?;
        let mut contents: Vec<(PathBuf, &[u8])> = files
            .iter()
            .map(|file| (dir.join(&file.destination), file.bytes.as_slice()))
            .collect();
        // The record goes last so it only lands once every file is in place.
        contents.push((self.record_path(component), record_bytes.as_slice()));

        // Two swaps on one path would share staging and backup files.
        let mut targets = HashSet::new();
        if let Some((target, _)) = contents.iter().find(|(target, _)| !targets.insert(target)) {
            return Err(format!("{} is written more than once", target.display()));
        }

        let mut swaps = Vec::with_capacity(contents.len());
        for (target, bytes) in contents {
            let swap = Swap {
                partial: sibling(&target, "partial"),
                backup: sibling(&target, "backup"),
                target,
                had_original: false,
            };
            if let Err(err) = stage(&swap, bytes).await {
                swaps.push(swap);
                discard_partials(&swaps).await;
                return Err(err);
            }
            swaps.push(swap);
        }

        for index in 0..swaps.len() {
            if let Err(err) = swap_in(&mut swaps[index]).await {
                warn!("storage: rolling back {component}: {err}");
                roll_back(&swaps[..index]).await;
                discard_partials(&swaps[index..]).await;
                return Err(err);
            }
        }

        for swap in swaps.iter().filter(|s| s.had_original) {
            if let Err(err) = fs::remove_file(&swap.backup).await {
                debug!("storage: could not remove {}: {err}", swap.backup.display());
            }
        }
        Ok(())
    }
}

/// Serialize `value` as pretty JSON into `path`, creating parent directories.
pub async fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<(), String> {
    let bytes =
        serde_json::to_vec_pretty(value).map_err(|e| format!("failed to serialize: {e}"))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    fs::write(path, &bytes)
        .await
        .map_err(|e| format!("failed to write {}: {e}", path.display()))
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{suffix}"))
}

async fn stage(swap: &Swap, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = swap.partial.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
    }
    fs::write(&swap.partial, bytes)
        .await
        .map_err(|e| format!("failed to stage {}: {e}", swap.target.display()))
}

async fn swap_in(swap: &mut Swap) -> Result<(), String> {
    swap.had_original = fs::try_exists(&swap.target)
        .await
        .map_err(|e| format!("failed to inspect {}: {e}", swap.target.display()))?;
    if swap.had_original {
        fs::rename(&swap.target, &swap.backup)
            .await
            .map_err(|e| format!("failed to back up {}: {e}", swap.target.display()))?;
    }
    if let Err(err) = fs::rename(&swap.partial, &swap.target).await {
        if swap.had_original
            && let Err(restore_err) = fs::rename(&swap.backup, &swap.target).await
        {
            warn!(
                "storage: failed to restore {} from {}: {restore_err}",
                swap.target.display(),
                swap.backup.display()
            );
        }
        return Err(format!("failed to replace {}: {err}", swap.target.display()));
    }
    Ok(())
}

async fn roll_back(done: &[Swap]) {
    for swap in done.iter().rev() {
        let restored = if swap.had_original {
            fs::rename(&swap.backup, &swap.target).await
        } else {
            fs::remove_file(&swap.target).await
        };
        if let Err(err) = restored {
            warn!("storage: failed to restore {}: {err}", swap.target.display());
        }
    }
}

async fn discard_partials(swaps: &[Swap]) {
    for swap in swaps {
        let _ = fs::remove_file(&swap.partial).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(version: &str) -> VersionRecord {
        VersionRecord {
            version: version.into(),
            source_url: "https://github.com/thomasloven/lovelace-card-mod".into(),
            last_updated: "2026-01-01T00:00:00+00:00".into(),
            ..VersionRecord::default()
        }
    }

    #[tokio::test]
    async fn missing_record_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        assert_eq!(storage.read_record("card-mod").await, Ok(None));
    }

    #[tokio::test]
    async fn corrupt_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        std::fs::create_dir_all(storage.component_dir("card-mod")).unwrap();
        std::fs::write(storage.record_path("card-mod"), b"{not json").unwrap();
        assert!(storage.read_record("card-mod").await.is_err());
    }

    #[tokio::test]
    async fn commit_replaces_files_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let component_dir = storage.component_dir("card-mod");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(component_dir.join("card-mod.js"), b"old").unwrap();

        let files = vec![
            PendingFile {
                destination: "card-mod.js".into(),
                bytes: b"new".to_vec(),
            },
            PendingFile {
                destination: "dist/extra.js".into(),
                bytes: b"extra".to_vec(),
            },
        ];
        storage
            .commit_update("card-mod", &files, &record("3.2.0"))
            .await
            .unwrap();

        assert_eq!(std::fs::read(component_dir.join("card-mod.js")).unwrap(), b"new");
        assert_eq!(
            std::fs::read(component_dir.join("dist/extra.js")).unwrap(),
            b"extra"
        );
        let stored = storage.read_record("card-mod").await.unwrap().unwrap();
        assert_eq!(stored.version, "3.2.0");

        let leftovers: Vec<_> = std::fs::read_dir(&component_dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".partial") || name.ends_with(".backup"))
            .collect();
        assert!(leftovers.is_empty(), "staging files left behind: {leftovers:?}");
    }

    #[tokio::test]
    async fn failed_commit_restores_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let component_dir = storage.component_dir("card-mod");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(component_dir.join("card-mod.js"), b"old").unwrap();
        std::fs::write(
            storage.record_path("card-mod"),
            serde_json::to_vec(&record("3.1.0")).unwrap(),
        )
        .unwrap();
        // A directory squatting on the record's backup path makes the last swap fail
        // after the script has already been moved into place.
        std::fs::create_dir_all(component_dir.join(".version.json.backup/inner")).unwrap();

        let files = vec![PendingFile {
            destination: "card-mod.js".into(),
            bytes: b"new".to_vec(),
        }];
        let result = storage
            .commit_update("card-mod", &files, &record("3.2.0"))
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(component_dir.join("card-mod.js")).unwrap(), b"old");
        let stored = storage.read_record("card-mod").await.unwrap().unwrap();
        assert_eq!(stored.version, "3.1.0");
        assert!(!component_dir.join(".card-mod.js.partial").exists());
        assert!(!component_dir.join(".version.json.partial").exists());
    }

    #[tokio::test]
    async fn staging_failure_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let component_dir = storage.component_dir("card-mod");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(component_dir.join("card-mod.js"), b"old").unwrap();
        // `dist` is a plain file, so nothing can be staged beneath it.
        std::fs::write(component_dir.join("dist"), b"").unwrap();

        let files = vec![
            PendingFile {
                destination: "card-mod.js".into(),
                bytes: b"new".to_vec(),
            },
            PendingFile {
                destination: "dist/extra.js".into(),
                bytes: b"extra".to_vec(),
            },
        ];
        let result = storage
            .commit_update("card-mod", &files, &record("3.2.0"))
            .await;

        assert!(result.is_err());
        assert_eq!(std::fs::read(component_dir.join("card-mod.js")).unwrap(), b"old");
        assert!(!component_dir.join(".card-mod.js.partial").exists());
        assert_eq!(storage.read_record("card-mod").await, Ok(None));
    }

    #[tokio::test]
    async fn rejects_targets_written_twice() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageManager::new(dir.path());
        let component_dir = storage.component_dir("card-mod");
        std::fs::create_dir_all(&component_dir).unwrap();
        std::fs::write(component_dir.join("card-mod.js"), b"old").unwrap();
        std::fs::write(
            storage.record_path("card-mod"),
            serde_json::to_vec(&record("3.1.0")).unwrap(),
        )
        .unwrap();

        for destinations in [["card-mod.js", "./card-mod.js"], ["card-mod.js", "version.json"]] {
            let files: Vec<PendingFile> = destinations
                .iter()
                .map(|destination| PendingFile {
                    destination: destination.to_string(),
                    bytes: b"new".to_vec(),
                })
                .collect();
            let result = storage
                .commit_update("card-mod", &files, &record("3.2.0"))
                .await;

            assert!(result.is_err(), "{destinations:?} accepted");
            assert_eq!(std::fs::read(component_dir.join("card-mod.js")).unwrap(), b"old");
            let stored = storage.read_record("card-mod").await.unwrap().unwrap();
            assert_eq!(stored.version, "3.1.0");
        }
    }

    #[tokio::test]
    async fn writes_json_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/summary.json");
        write_json_file(&path, &serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["a"], 1);
    }
}
