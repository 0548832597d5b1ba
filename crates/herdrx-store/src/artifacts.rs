//! Versioned per-client artifact storage.
//!
//! Layout under the models root:
//!
//! ```text
//! <root>/<client>/CURRENT              name of the live version
//! <root>/<client>/<version>/           model.json, label_encoder.json, ...
//! <root>/<client>/.staging-XXXX/       in-progress writes
//! ```
//!
//! Writers fill a staging directory, rename it to a fresh version directory,
//! then atomically replace `CURRENT`. Readers resolve `CURRENT` once and read
//! every file from that version, so a concurrent retrain never exposes a
//! mixed or partial set. Publishers of the same client serialize on
//! `<root>/<client>/.publish.lock` from rename through pruning.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use herdrx_core::PipelineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::StoreError;

pub const MODEL_FILE: &str = "model.json";
pub const DECODER_FILE: &str = "label_encoder.json";
pub const SCHEMA_FILE: &str = "feature_columns.json";
pub const DOSAGES_FILE: &str = "dosages.json";
pub const MANIFEST_FILE: &str = "manifest.json";

/// Files that must all be present for a version to be loadable.
pub const REQUIRED_FILES: [&str; 3] = [MODEL_FILE, DECODER_FILE, SCHEMA_FILE];

const CURRENT_FILE: &str = "CURRENT";
const STAGING_PREFIX: &str = ".staging-";
const LOCK_FILE: &str = ".publish.lock";
const LOCK_TIMEOUT: Duration = Duration::from_secs(30);
const LOCK_POLL: Duration = Duration::from_millis(50);

/// Written alongside every published version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub client: String,
    pub version: String,
    pub published_at: DateTime<Utc>,
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

/// Root of all clients' model directories.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start writing a new version for `client`.
    pub fn stage(&self, client: &str) -> Result<StagedArtifacts, StoreError> {
        let client_dir = self.client_dir(client)?;
        fs::create_dir_all(&client_dir).map_err(|e| StoreError::io(&client_dir, e))?;
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&client_dir)
            .map_err(|e| StoreError::io(&client_dir, e))?;
        debug!(client, staging = %dir.path().display(), "staging artifacts");
        Ok(StagedArtifacts {
            client: client.to_string(),
            client_dir,
            dir,
            written: BTreeSet::new(),
            summary: None,
        })
    }

    /// Open the live version for `client`.
    ///
    /// A client with no published version, or whose version lacks any
    /// required file, is reported as [`PipelineError::ClientNotFound`].
    pub fn open(&self, client: &str) -> Result<ArtifactReader, StoreError> {
        let client_dir = self.client_dir(client)?;
        let not_found = || StoreError::Pipeline(PipelineError::client_not_found(client));

        let (version, dir) = match self.current_version(client)? {
            Some(version) => {
                let dir = client_dir.join(&version);
                (version, dir)
            }
            // Flat layout from before versioning: files directly in the client dir.
            None if has_required(&client_dir) => ("unversioned".to_string(), client_dir),
            None => return Err(not_found()),
        };

        if !has_required(&dir) {
            warn!(client, version = %version, "published version is missing required artifacts");
            return Err(not_found());
        }

        Ok(ArtifactReader {
            client: client.to_string(),
            version,
            dir,
        })
    }

    /// Name of the live version, if any.
    pub fn current_version(&self, client: &str) -> Result<Option<String>, StoreError> {
        let pointer = self.client_dir(client)?.join(CURRENT_FILE);
        match fs::read_to_string(&pointer) {
            Ok(text) => {
                let version = text.trim();
                Ok((!version.is_empty()).then(|| version.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(pointer, e)),
        }
    }

    /// Clients with a loadable model, sorted by name.
    pub fn clients(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.root, e)),
        };
        let mut clients = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_client(&name).is_ok() && self.open(&name).is_ok() {
                clients.push(name);
            }
        }
        clients.sort();
        Ok(clients)
    }

    fn client_dir(&self, client: &str) -> Result<PathBuf, StoreError> {
        validate_client(client)?;
        Ok(self.root.join(client))
    }
}

/// A version being written. Dropping it without publishing discards it.
#[derive(Debug)]
pub struct StagedArtifacts {
    client: String,
    client_dir: PathBuf,
    dir: TempDir,
    written: BTreeSet<String>,
    summary: Option<serde_json::Value>,
}

impl StagedArtifacts {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Serialize `value` as pretty JSON into `name`.
    pub fn write_json<T: Serialize + ?Sized>(
        &mut self,
        name: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let path = self.dir.path().join(name);
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(&path, e))?;
        fs::write(&path, bytes).map_err(|e| StoreError::io(&path, e))?;
        self.written.insert(name.to_string());
        Ok(())
    }

    /// Attach free-form details recorded in the manifest.
    pub fn set_summary<T: Serialize>(&mut self, summary: &T) -> Result<(), StoreError> {
        let value = serde_json::to_value(summary)
            .map_err(|e| StoreError::json(self.dir.path().join(MANIFEST_FILE), e))?;
        self.summary = Some(value);
        Ok(())
    }

    /// Make the staged files the client's live version.
    ///
    /// Returns the new version name. Versions older than the one it replaces
    /// are pruned.
    pub fn publish(mut self) -> Result<String, StoreError> {
        let missing: Vec<&str> = REQUIRED_FILES
            .into_iter()
            .filter(|f| !self.written.contains(*f))
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::Other(format!(
                "refusing to publish {}: missing {}",
                self.client,
                missing.join(", ")
            )));
        }

        let _lock = PublishLock::acquire(&self.client_dir, LOCK_TIMEOUT)?;
        let published_at = Utc::now();
        let version = self.unused_version(published_at);

        let manifest = Manifest {
            client: self.client.clone(),
            version: version.clone(),
            published_at,
            files: self.written.iter().cloned().collect(),
            summary: self.summary.take(),
        };
        self.write_json(MANIFEST_FILE, &manifest)?;

        let version_dir = self.client_dir.join(&version);
        fs::rename(self.dir.path(), &version_dir).map_err(|e| StoreError::io(&version_dir, e))?;
        // The staging path no longer exists, so dropping the guard removes nothing.
        drop(self.dir);

        let previous = swap_pointer(&self.client_dir, &version)?;
        info!(client = %self.client, version = %version, ?previous, "published artifacts");

        prune(&self.client_dir, &version, previous.as_deref());
        Ok(version)
    }

    fn unused_version(&self, at: DateTime<Utc>) -> String {
        let base = at.format("%Y%m%dT%H%M%S%.6fZ").to_string();
        let mut version = base.clone();
        let mut n = 1;
        while self.client_dir.join(&version).exists() {
            version = format!("{base}-{n}");
            n += 1;
        }
        version
    }
}

/// One resolved version of a client's artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactReader {
    client: String,
    version: String,
    dir: PathBuf,
}

impl ArtifactReader {
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a file from this version. A file that vanished is `ClientNotFound`.
    pub fn read_json<T: DeserializeOwned>(&self, name: &str) -> Result<T, StoreError> {
        self.read_optional_json(name)?.ok_or_else(|| {
            StoreError::Pipeline(PipelineError::client_not_found(self.client.as_str()))
        })
    }

    pub fn read_optional_json<T: DeserializeOwned>(
        &self,
        name: &str,
    ) -> Result<Option<T>, StoreError> {
        let path = self.dir.join(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::json(path, e))
    }
}

/// Client names become directory names: no separators, no dot-prefix.
fn validate_client(client: &str) -> Result<(), StoreError> {
    let ok = !client.is_empty()
        && !client.starts_with('.')
        && client
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '));
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidClient(client.to_string()))
    }
}

fn has_required(dir: &Path) -> bool {
    REQUIRED_FILES.iter().all(|f| dir.join(f).is_file())
}

/// Atomically point `CURRENT` at `version`, returning the previous target.
fn swap_pointer(client_dir: &Path, version: &str) -> Result<Option<String>, StoreError> {
    let pointer = client_dir.join(CURRENT_FILE);
    let previous = fs::read_to_string(&pointer)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut tmp = NamedTempFile::new_in(client_dir).map_err(|e| StoreError::io(client_dir, e))?;
    tmp.write_all(version.as_bytes())
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(&pointer)
        .map_err(|e| StoreError::io(&pointer, e.error))?;
    Ok(previous)
}

/// Remove version directories other than `current`, `previous` and whatever
/// `CURRENT` names at the time of the call.
///
/// Failures are logged; a leftover directory is harmless.
fn prune(client_dir: &Path, current: &str, previous: Option<&str>) {
    let live = fs::read_to_string(client_dir.join(CURRENT_FILE))
        .ok()
        .map(|s| s.trim().to_string());
    let Ok(entries) = fs::read_dir(client_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_dir
            || name.starts_with('.')
            || name == current
            || Some(name) == previous
            || live.as_deref() == Some(name)
        {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => debug!(version = name, "pruned old artifacts"),
            Err(e) => warn!(version = name, error = %e, "failed to prune old artifacts"),
        }
    }
}

/// Exclusive per-client publish lock, released on drop.
#[derive(Debug)]
struct PublishLock {
    path: PathBuf,
}

impl PublishLock {
    fn acquire(client_dir: &Path, timeout: Duration) -> Result<Self, StoreError> {
        let path = client_dir.join(LOCK_FILE);
        let start = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    // Holder pid, for whoever has to clear a stale lock.
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if start.elapsed() >= timeout {
                        return Err(StoreError::Other(format!(
                            "timed out waiting for publish lock {}",
                            path.display()
                        )));
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(StoreError::io(path, e)),
            }
        }
    }
}

impl Drop for PublishLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release publish lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage_all(store: &ArtifactStore, client: &str, tag: &str) -> String {
        let mut staged = store.stage(client).unwrap();
        staged.write_json(MODEL_FILE, &json!({"tag": tag})).unwrap();
        staged.write_json(DECODER_FILE, &json!({"classes": ["a"]})).unwrap();
        staged.write_json(SCHEMA_FILE, &json!(["age"])).unwrap();
        staged.publish().unwrap()
    }

    #[test]
    fn publish_then_open() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let version = stage_all(&store, "farm_a", "v1");

        let reader = store.open("farm_a").unwrap();
        assert_eq!(reader.version(), version);
        let model: serde_json::Value = reader.read_json(MODEL_FILE).unwrap();
        assert_eq!(model["tag"], "v1");

        let manifest: Manifest = reader.read_json(MANIFEST_FILE).unwrap();
        assert_eq!(manifest.client, "farm_a");
        assert_eq!(manifest.version, version);
        assert_eq!(
            manifest.files,
            vec!["feature_columns.json", "label_encoder.json", "model.json"]
        );
    }

    #[test]
    fn unknown_client_is_client_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let err = store.open("nobody").unwrap_err();
        assert!(matches!(
            err.as_pipeline(),
            Some(PipelineError::ClientNotFound { .. })
        ));
    }

    #[test]
    fn partial_artifacts_are_client_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let version = stage_all(&store, "farm_a", "v1");
        fs::remove_file(tmp.path().join("farm_a").join(&version).join(SCHEMA_FILE)).unwrap();

        let err = store.open("farm_a").unwrap_err();
        assert!(matches!(
            err.as_pipeline(),
            Some(PipelineError::ClientNotFound { .. })
        ));
    }

    #[test]
    fn incomplete_stage_refuses_to_publish() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let mut staged = store.stage("farm_a").unwrap();
        staged.write_json(MODEL_FILE, &json!({})).unwrap();
        let err = staged.publish().unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));
        assert!(store.open("farm_a").is_err());
    }

    #[test]
    fn abandoned_stage_leaves_live_version_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let v1 = stage_all(&store, "farm_a", "v1");

        let mut staged = store.stage("farm_a").unwrap();
        staged.write_json(MODEL_FILE, &json!({"tag": "v2"})).unwrap();
        let staging = staged.path().to_path_buf();
        drop(staged);

        assert!(!staging.exists());
        let reader = store.open("farm_a").unwrap();
        assert_eq!(reader.version(), v1);
        let model: serde_json::Value = reader.read_json(MODEL_FILE).unwrap();
        assert_eq!(model["tag"], "v1");
    }

    #[test]
    fn republish_swaps_and_prunes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let v1 = stage_all(&store, "farm_a", "v1");
        let v2 = stage_all(&store, "farm_a", "v2");
        let v3 = stage_all(&store, "farm_a", "v3");
        assert_ne!(v1, v2);

        let reader = store.open("farm_a").unwrap();
        assert_eq!(reader.version(), v3);
        let model: serde_json::Value = reader.read_json(MODEL_FILE).unwrap();
        assert_eq!(model["tag"], "v3");

        let client_dir = tmp.path().join("farm_a");
        assert!(!client_dir.join(&v1).exists());
        assert!(client_dir.join(&v2).exists());
        assert!(client_dir.join(&v3).exists());
    }

    #[test]
    fn prune_never_removes_the_live_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let v1 = stage_all(&store, "farm_a", "v1");
        let v2 = stage_all(&store, "farm_a", "v2");
        let client_dir = tmp.path().join("farm_a");

        // A publisher that lost the race still believes v1 is current.
        prune(&client_dir, &v1, None);
        assert!(client_dir.join(&v2).exists());
        let reader = store.open("farm_a").unwrap();
        assert_eq!(reader.version(), v2);
        let model: serde_json::Value = reader.read_json(MODEL_FILE).unwrap();
        assert_eq!(model["tag"], "v2");
    }

    #[test]
    fn publish_lock_is_exclusive() {
        let tmp = tempfile::tempdir().unwrap();
        let held = PublishLock::acquire(tmp.path(), LOCK_TIMEOUT).unwrap();
        let err = PublishLock::acquire(tmp.path(), Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));

        drop(held);
        assert!(!tmp.path().join(LOCK_FILE).exists());
        let _again = PublishLock::acquire(tmp.path(), Duration::ZERO).unwrap();
    }

    #[test]
    fn concurrent_publishers_leave_a_loadable_version() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        stage_all(&store, "farm_a", "v0");

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || stage_all(&store, "farm_a", &format!("t{i}")))
            })
            .collect();
        let versions: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let reader = store.open("farm_a").unwrap();
        assert!(versions.iter().any(|v| v == reader.version()));
        assert!(reader.read_json::<serde_json::Value>(MODEL_FILE).is_ok());
        assert!(!tmp.path().join("farm_a").join(LOCK_FILE).exists());
    }

    #[test]
    fn flat_layout_still_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("legacy_farm");
        fs::create_dir_all(&dir).unwrap();
        for f in REQUIRED_FILES {
            fs::write(dir.join(f), "{}").unwrap();
        }
        let store = ArtifactStore::new(tmp.path());
        let reader = store.open("legacy_farm").unwrap();
        assert_eq!(reader.version(), "unversioned");
        let dosages: Option<serde_json::Value> = reader.read_optional_json(DOSAGES_FILE).unwrap();
        assert!(dosages.is_none());
    }

    #[test]
    fn clients_lists_only_loadable() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        stage_all(&store, "farm_b", "x");
        stage_all(&store, "farm_a", "x");
        fs::create_dir_all(tmp.path().join("empty_farm")).unwrap();
        assert_eq!(store.clients().unwrap(), vec!["farm_a", "farm_b"]);

        let missing = ArtifactStore::new(tmp.path().join("nope"));
        assert!(missing.clients().unwrap().is_empty());
    }

    #[test]
    fn rejects_path_like_client_names() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        for bad in ["", "..", "../etc", "a/b", ".hidden"] {
            assert!(
                matches!(store.open(bad), Err(StoreError::InvalidClient(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn corrupt_json_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(tmp.path());
        let version = stage_all(&store, "farm_a", "v1");
        fs::write(
            tmp.path().join("farm_a").join(&version).join(MODEL_FILE),
            "not json",
        )
        .unwrap();
        let reader = store.open("farm_a").unwrap();
        let err = reader.read_json::<serde_json::Value>(MODEL_FILE).unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}
