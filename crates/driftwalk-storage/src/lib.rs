//! JSON-file persistence for walk histories.
//!
//! [`WalkStore`] owns the on-disk file and does synchronous reads and
//! writes. [`StorePipeline`] wraps a store in a dedicated worker thread
//! and implements [`WalkPersistence`], so engine ticks never block on
//! the filesystem.

use driftwalk_core::{GeoPoint, WalkPersistence, WalkPoint};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use thiserror::Error;

/// Errors raised by the file store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("storage worker error: {0}")]
    Worker(String),
}

/// On-disk shape of a single walk point.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredPoint {
    id: u64,
    lat: f64,
    lon: f64,
}

impl From<&WalkPoint> for StoredPoint {
    fn from(point: &WalkPoint) -> Self {
        Self {
            id: point.ordinal,
            lat: point.position.latitude,
            lon: point.position.longitude,
        }
    }
}

impl From<StoredPoint> for WalkPoint {
    fn from(record: StoredPoint) -> Self {
        WalkPoint::new(record.id, GeoPoint::new(record.lat, record.lon))
    }
}

/// Result of reading the store: the points that parsed plus a count of
/// records that did not.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    pub points: Vec<WalkPoint>,
    pub skipped: usize,
}

/// Synchronous JSON-array store for a walk history.
#[derive(Debug, Clone)]
pub struct WalkStore {
    path: PathBuf,
}

impl WalkStore {
    /// Binds the store to `path`, creating parent directories as needed.
    /// The file itself is created on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the file contents with the given snapshot.
    pub fn save_points(&self, points: &[WalkPoint]) -> Result<(), StoreError> {
        let records: Vec<StoredPoint> = points.iter().map(StoredPoint::from).collect();
        let body = serde_json::to_vec_pretty(&records)?;
        fs::write(&self.path, body)?;
        Ok(())
    }

    /// Reads the saved snapshot. Returns `Ok(None)` when no file exists
    /// yet. Records that fail to parse are skipped and counted rather
    /// than failing the whole load, so one corrupt entry cannot take
    /// the rest of the walk down with it.
    pub fn load_points(&self) -> Result<Option<LoadOutcome>, StoreError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let values: Vec<Value> = serde_json::from_slice(&raw)?;
        let mut outcome = LoadOutcome {
            points: Vec::with_capacity(values.len()),
            skipped: 0,
        };
        for value in values {
            match serde_json::from_value::<StoredPoint>(value) {
                Ok(record) => outcome.points.push(WalkPoint::from(record)),
                Err(_) => outcome.skipped += 1,
            }
        }
        Ok(Some(outcome))
    }

    /// Deletes the saved file. Absence is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

enum StoreCommand {
    Save(Vec<WalkPoint>),
    Shutdown,
}

/// Background writer that implements [`WalkPersistence`] over a
/// [`WalkStore`].
///
/// Snapshots are queued to a named worker thread and written in arrival
/// order, so the file always ends up holding the newest snapshot.
/// Dropping the pipeline drains the queue before the worker exits.
pub struct StorePipeline {
    sender: mpsc::Sender<StoreCommand>,
    store: Arc<Mutex<WalkStore>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl StorePipeline {
    /// Opens the store at `path` and spawns the writer thread.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::with_store(WalkStore::open(path)?)
    }

    /// Spawns the writer thread over an already-open store.
    pub fn with_store(store: WalkStore) -> Result<Self, StoreError> {
        let store = Arc::new(Mutex::new(store));
        let (sender, receiver) = mpsc::channel::<StoreCommand>();
        let worker_store = Arc::clone(&store);
        let handle = thread::Builder::new()
            .name("driftwalk-storage".into())
            .spawn(move || {
                while let Ok(command) = receiver.recv() {
                    match command {
                        StoreCommand::Save(points) => {
                            let store = match worker_store.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => {
                                    eprintln!(
                                        "walk store mutex poisoned; continuing with recovered handle"
                                    );
                                    poisoned.into_inner()
                                }
                            };
                            if let Err(err) = store.save_points(&points) {
                                eprintln!(
                                    "failed to save walk history ({} points): {err}",
                                    points.len()
                                );
                            }
                        }
                        StoreCommand::Shutdown => break,
                    }
                }
            })
            .map_err(|err| {
                StoreError::Worker(format!("failed to spawn storage worker thread: {err}"))
            })?;
        Ok(Self {
            sender,
            store,
            handle: Some(handle),
        })
    }

    /// Shared handle to the underlying store, usable while the worker
    /// runs.
    #[must_use]
    pub fn store(&self) -> Arc<Mutex<WalkStore>> {
        Arc::clone(&self.store)
    }

    fn lock_store(&self) -> std::sync::MutexGuard<'_, WalkStore> {
        match self.store.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl WalkPersistence for StorePipeline {
    fn save(&mut self, points: &[WalkPoint]) {
        if self
            .sender
            .send(StoreCommand::Save(points.to_vec()))
            .is_err()
        {
            eprintln!(
                "storage worker channel closed; dropped a {}-point snapshot",
                points.len()
            );
        }
    }

    fn load(&mut self) -> Option<Vec<WalkPoint>> {
        let outcome = match self.lock_store().load_points() {
            Ok(Some(outcome)) => outcome,
            Ok(None) => return None,
            Err(err) => {
                eprintln!("failed to load walk history: {err}");
                return None;
            }
        };
        if outcome.skipped > 0 {
            eprintln!("skipped {} malformed walk history records", outcome.skipped);
        }
        Some(outcome.points)
    }
}

impl Drop for StorePipeline {
    fn drop(&mut self) {
        let _ = self.sender.send(StoreCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            eprintln!("storage worker thread panicked");
        }
    }
}
