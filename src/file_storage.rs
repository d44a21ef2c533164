use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use fs2::FileExt;
use serde_json::Value;

use expin_core::{document_name, Area, LedgerEntry, NamedDocument};

use crate::storage::{DocumentStore, RecordStore, StorageError};

const DOWNLOADED_DIR: &str = "downloaded";
const DOCUMENT_LOCK_FILE: &str = ".invoices.lock";

/// Exclusive advisory lock on a sidecar file, released when dropped.
struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    fn acquire(path: PathBuf) -> Result<Self, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        tracing::trace!(lock = %path.display(), "Lock acquired");
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

fn lock_path_for(file_path: &Path) -> PathBuf {
    let mut lock_path = file_path.to_path_buf();
    match lock_path.extension() {
        Some(ext) => {
            let mut new_ext = ext.to_os_string();
            new_ext.push(".lock");
            lock_path.set_extension(new_ext);
        }
        None => {
            lock_path.set_extension("lock");
        }
    }
    lock_path
}

/// Writes to a sibling temp file and renames it over the target, so readers
/// never observe a half-written file. Callers hold the resource lock.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut tmp_path = path.as_os_str().to_os_string();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);
    fs::write(&tmp_path, contents)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn not_found_as(name: &str, e: io::Error) -> StorageError {
    if e.kind() == io::ErrorKind::NotFound {
        StorageError::NotFound(name.to_string())
    } else {
        StorageError::IOError(e)
    }
}

/// Ledger persisted as a single pretty-printed JSON array.
pub struct JsonFileRecordStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl JsonFileRecordStore {
    /// Opens the store, creating the parent directory and an empty ledger
    /// file when they do not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let store = Self {
            lock_path: lock_path_for(&path),
            path,
        };

        let _lock = FileLock::acquire(store.lock_path.clone())?;
        if !store.path.exists() {
            atomic_write(&store.path, b"[]")?;
            tracing::info!(path = %store.path.display(), "Created empty ledger file");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_entries(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        let json = match fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if json.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&json)?)
    }

    fn write_entries(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        let json = serde_json::to_vec_pretty(entries)?;
        atomic_write(&self.path, &json)
    }
}

impl RecordStore for JsonFileRecordStore {
    fn load(&self) -> Result<Vec<LedgerEntry>, StorageError> {
        self.read_entries()
    }

    fn save(&self, entries: &[LedgerEntry]) -> Result<(), StorageError> {
        let _lock = FileLock::acquire(self.lock_path.clone())?;
        self.write_entries(entries)?;
        tracing::debug!(count = entries.len(), path = %self.path.display(), "Ledger saved");
        Ok(())
    }

    fn append(&self, entry: &LedgerEntry) -> Result<usize, StorageError> {
        let _lock = FileLock::acquire(self.lock_path.clone())?;
        let mut entries = self.read_entries()?;
        entries.push(entry.clone());
        self.write_entries(&entries)?;
        Ok(entries.len())
    }
}

/// Documents stored as `<name>.json` files. The active area is the root
/// directory and the downloaded area is its `downloaded/` subdirectory.
pub struct FileDocumentStore {
    root: PathBuf,
    lock_path: PathBuf,
}

impl FileDocumentStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(root.join(DOWNLOADED_DIR))?;
        Ok(Self {
            lock_path: root.join(DOCUMENT_LOCK_FILE),
            root,
        })
    }

    fn area_dir(&self, area: Area) -> PathBuf {
        match area {
            Area::Active => self.root.clone(),
            Area::Downloaded => self.root.join(DOWNLOADED_DIR),
        }
    }

    fn document_path(&self, area: Area, name: &str) -> PathBuf {
        self.area_dir(area).join(format!("{}.json", name))
    }

    fn lock(&self) -> Result<FileLock, StorageError> {
        FileLock::acquire(self.lock_path.clone())
    }

    fn document_files(&self, area: Area) -> Result<Vec<(PathBuf, String, SystemTime)>, StorageError> {
        let mut files = Vec::new();
        for dir_entry in fs::read_dir(self.area_dir(area))? {
            let dir_entry = dir_entry?;
            let path = dir_entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let metadata = dir_entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = stem.to_string();
            let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((path, name, modified));
        }
        Ok(files)
    }
}

impl DocumentStore for FileDocumentStore {
    fn put(&self, raw_name: &str, content: &Value) -> Result<String, StorageError> {
        let doc = NamedDocument::new(raw_name, content)?;
        let json = serde_json::to_vec_pretty(&doc.content)?;
        let path = self.document_path(Area::Active, &doc.name);

        let _lock = self.lock()?;
        atomic_write(&path, &json)?;
        tracing::info!(document = %doc.name, path = %path.display(), "Document written");
        Ok(format!("{}.json", doc.name))
    }

    fn get(&self, name: &str) -> Result<NamedDocument, StorageError> {
        let name = document_name(name)?;
        let json = fs::read_to_string(self.document_path(Area::Active, &name))
            .map_err(|e| not_found_as(&name, e))?;
        match serde_json::from_str(&json)? {
            Value::Object(content) => Ok(NamedDocument { name, content }),
            _ => Err(StorageError::Other(format!("document {} does not hold a JSON object", name))),
        }
    }

    /// Most recently modified first; ties are broken by name.
    fn list(&self, area: Area) -> Result<Vec<String>, StorageError> {
        let mut files = self.document_files(area)?;
        files.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.1.cmp(&b.1)));
        Ok(files.into_iter().map(|(_, name, _)| name).collect())
    }

    fn delete(&self, name: &str) -> Result<(), StorageError> {
        let name = document_name(name)?;
        let _lock = self.lock()?;
        fs::remove_file(self.document_path(Area::Active, &name)).map_err(|e| not_found_as(&name, e))?;
        tracing::info!(document = %name, "Document deleted");
        Ok(())
    }

    fn relocate(&self, name: &str, from: Area, to: Area) -> Result<(), StorageError> {
        let name = document_name(name)?;
        if from == to {
            return Err(StorageError::Validation(format!("{} is already in {}", name, to)));
        }
        let _lock = self.lock()?;
        fs::rename(self.document_path(from, &name), self.document_path(to, &name))
            .map_err(|e| not_found_as(&name, e))?;
        tracing::debug!(document = %name, %from, %to, "Document moved");
        Ok(())
    }

    fn purge(&self, area: Area) -> Result<usize, StorageError> {
        let _lock = self.lock()?;
        let mut removed = 0;
        for (path, name, _) in self.document_files(area)? {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(document = %name, error = %e, "Failed to delete document"),
            }
        }
        tracing::info!(%area, removed, "Documents purged");
        Ok(removed)
    }
}
