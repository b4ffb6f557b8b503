//! File-based storage backend for persistent storage.

use crate::backend::{BatchOp, StorageBackend, WriteBatch};
use crate::error::{StorageError, StorageResult};
use ciborium::value::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Version tag written at the top of every image.
const FORMAT_VERSION: u64 = 1;

/// A single-file storage backend.
///
/// The whole key space is kept in memory and written out as one CBOR image
/// on every batch. The image is first written to a sibling temporary file,
/// synced, and then renamed over the live file, so a crash leaves either the
/// previous image or the new one on disk, never a mix.
///
/// # Example
///
/// ```no_run
/// use tidesync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("store.cbor")).unwrap();
/// backend.put("k", b"persistent data".to_vec()).unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl FileBackend {
    /// Opens the backend at `path`, loading the existing image if present.
    ///
    /// A missing file is treated as an empty store; it is created on the
    /// first write.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let entries = if path.exists() {
            let bytes = fs::read(path)?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                decode_image(&bytes)?
            }
        } else {
            BTreeMap::new()
        };

        tracing::debug!(path = %path.display(), keys = entries.len(), "opened file backend");

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
        })
    }

    /// Opens the backend, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be loaded.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> StorageResult<()> {
        let image = encode_image(entries)?;
        let temp = self.temp_path();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp)?;
            file.write_all(&image)?;
            file.sync_all()?;
        }

        if let Err(err) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(err.into());
        }

        // Make the rename itself durable where the platform allows it.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write_batch(&self, batch: WriteBatch) -> StorageResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut entries = self.entries.write();
        let mut next = entries.clone();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => {
                    next.insert(key, value);
                }
                BatchOp::Delete { key } => {
                    next.remove(&key);
                }
            }
        }

        // Only swap the in-memory view once the image is durable.
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn encode_image(entries: &BTreeMap<String, Vec<u8>>) -> StorageResult<Vec<u8>> {
    let pairs = entries
        .iter()
        .map(|(k, v)| (Value::Text(k.clone()), Value::Bytes(v.clone())))
        .collect();

    let image = Value::Map(vec![
        (
            Value::Text("format".into()),
            Value::Integer(FORMAT_VERSION.into()),
        ),
        (Value::Text("entries".into()), Value::Map(pairs)),
    ]);

    let mut buf = Vec::new();
    ciborium::into_writer(&image, &mut buf).map_err(|e| StorageError::Encoding(e.to_string()))?;
    Ok(buf)
}

fn decode_image(bytes: &[u8]) -> StorageResult<BTreeMap<String, Vec<u8>>> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| StorageError::Corrupted(e.to_string()))?;
    let map = value
        .as_map()
        .ok_or_else(|| StorageError::Corrupted("image is not a map".into()))?;

    let get_field = |name: &str| {
        map.iter()
            .find(|(k, _)| k.as_text() == Some(name))
            .map(|(_, v)| v)
    };

    let format = get_field("format")
        .and_then(|v| v.as_integer())
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| StorageError::Corrupted("missing format version".into()))?;
    if format != FORMAT_VERSION {
        return Err(StorageError::UnsupportedFormat {
            found: format,
            expected: FORMAT_VERSION,
        });
    }

    let raw_entries = get_field("entries")
        .and_then(|v| v.as_map())
        .ok_or_else(|| StorageError::Corrupted("missing entries".into()))?;

    let mut entries = BTreeMap::new();
    for (k, v) in raw_entries {
        let key = k
            .as_text()
            .ok_or_else(|| StorageError::Corrupted("entry key is not text".into()))?;
        let value = v
            .as_bytes()
            .ok_or_else(|| StorageError::Corrupted(format!("entry {key} is not bytes")))?;
        entries.insert(key.to_string(), value.clone());
    }
    Ok(entries)
}
