//! JSON-file store for single-user, offline boards.
//!
//! [`LocalStore`] serves reads and listeners from an inner [`MemoryStore`]
//! and rewrites the whole file as part of every write: the file is saved
//! before the write commits in memory, so a failed save leaves both the
//! listeners and the file at the previous state. The file is replaced
//! atomically: contents go to a sibling temp file which is then renamed
//! over the target.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use taskboard_proto::collection::SortDirection;
use taskboard_proto::task::{FieldWrite, Task, TaskFields, TaskId, TaskPatch};

use super::memory::MemoryStore;
use super::{BackendType, Listener, RemoteStore, StoreError};

/// Current on-disk format version.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Deserialize)]
struct StoreFile {
    schema_version: u32,
    #[serde(default)]
    collections: BTreeMap<String, Vec<Task>>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    schema_version: u32,
    collections: &'a BTreeMap<String, Vec<Task>>,
}

/// [`RemoteStore`] persisted to a JSON file.
pub struct LocalStore {
    memory: MemoryStore,
    path: PathBuf,
}

impl LocalStore {
    /// Opens the store at `path`, starting empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file cannot be read, is not valid
    /// JSON, or carries an unsupported schema version.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let collections = load_file(&path)?;
        tracing::info!(
            path = %path.display(),
            collections = collections.len(),
            "opened local store"
        );
        let save_path = path.clone();
        // The hook runs under the memory store's lock, which also orders saves.
        let memory = MemoryStore::from_collections(collections).with_commit_hook(Box::new(
            move |collections: &BTreeMap<String, Vec<Task>>| {
                save_file(&save_path, collections).inspect_err(|e| {
                    tracing::error!(
                        path = %save_path.display(),
                        error = %e,
                        "failed to save local store"
                    );
                })
            },
        ));
        Ok(Self { memory, path })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn load_file(path: &Path) -> Result<BTreeMap<String, Vec<Task>>, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };
    let file: StoreFile = serde_json::from_str(&contents).map_err(std::io::Error::from)?;
    if file.schema_version != SCHEMA_VERSION {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!(
                "unsupported schema_version {} (expected {SCHEMA_VERSION})",
                file.schema_version
            ),
        )));
    }
    Ok(file.collections)
}

fn save_file(path: &Path, collections: &BTreeMap<String, Vec<Task>>) -> Result<(), StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = StoreFileRef {
        schema_version: SCHEMA_VERSION,
        collections,
    };
    let contents = serde_json::to_string_pretty(&file).map_err(std::io::Error::from)?;

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

impl RemoteStore for LocalStore {
    async fn subscribe(
        &self,
        collection: &str,
        direction: SortDirection,
    ) -> Result<Listener, StoreError> {
        self.memory.subscribe(collection, direction).await
    }

    async fn create(&self, collection: &str, fields: TaskFields) -> Result<TaskId, StoreError> {
        self.memory.create(collection, fields).await
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<(), StoreError> {
        self.memory.update_fields(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &TaskId) -> Result<(), StoreError> {
        self.memory.delete(collection, id).await
    }

    async fn batch_update(
        &self,
        collection: &str,
        writes: Vec<FieldWrite>,
    ) -> Result<(), StoreError> {
        self.memory.batch_update(collection, writes).await
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }
}
