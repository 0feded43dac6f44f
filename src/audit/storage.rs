//! Append-only journal store.
//!
//! One canonical JSON line per entry, fsynced before the write returns,
//! all writes funneled through a single mutex so lines never interleave.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use crate::models::AuditEntry;

/// Durable sink for finished audit entries.
pub trait JournalStore: Send + Sync {
    fn write(&self, entry: &AuditEntry) -> io::Result<()>;
    fn close(&self) -> io::Result<()>;
}

/// JSON Lines file store. Opens the journal in append mode so restarts
/// keep extending the existing chain.
pub struct FileStorage {
    file: Mutex<Option<File>>,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_dir_all_0755(dir)?;
            }
        }

        let mut opts = OpenOptions::new();
        opts.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o644);
        }
        let file = opts.open(path)?;

        Ok(Self {
            file: Mutex::new(Some(file)),
        })
    }
}

impl JournalStore for FileStorage {
    fn write(&self, entry: &AuditEntry) -> io::Result<()> {
        let mut line = serde_json::to_vec(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        line.push(b'\n');

        let mut guard = self.file.lock().expect("journal mutex poisoned");
        let file = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "journal closed"))?;
        file.write_all(&line)?;
        // Durability before acknowledging: a journal line either exists
        // on stable storage or the write reports failure.
        file.sync_all()
    }

    fn close(&self) -> io::Result<()> {
        let mut guard = self.file.lock().expect("journal mutex poisoned");
        if let Some(file) = guard.take() {
            file.sync_all()?;
        }
        Ok(())
    }
}

/// mkdir -p with directory mode forced to 0755, independent of the
/// process umask.
fn create_dir_all_0755(dir: &Path) -> io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

/// In-memory store for worker tests.
#[cfg(test)]
pub struct MemoryStorage {
    pub entries: Mutex<Vec<AuditEntry>>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            fail_writes: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl JournalStore for MemoryStorage {
    fn write(&self, entry: &AuditEntry) -> io::Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected failure"));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RequestDetails, ResponseDetails};
    use chrono::{TimeZone, Utc};

    fn entry(seq: u64) -> AuditEntry {
        AuditEntry {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
            endpoint: "mock".into(),
            sequence_id: seq,
            request: RequestDetails::default(),
            response: ResponseDetails::default(),
            trace: None,
            prev_hash: "p".into(),
            hash: "h".into(),
        }
    }

    #[test]
    fn writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = FileStorage::new(&path).unwrap();
        store.write(&entry(0)).unwrap();
        store.write(&entry(1)).unwrap();
        store.close().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: AuditEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.sequence_id, 0);
    }

    #[test]
    fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/logs/audit.jsonl");
        let store = FileStorage::new(&path).unwrap();
        store.write(&entry(0)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn append_mode_preserves_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let store = FileStorage::new(&path).unwrap();
            store.write(&entry(0)).unwrap();
            store.close().unwrap();
        }
        {
            let store = FileStorage::new(&path).unwrap();
            store.write(&entry(1)).unwrap();
            store.close().unwrap();
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn journal_directory_is_created_with_mode_0755() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep/logs/audit.jsonl");
        let _store = FileStorage::new(&path).unwrap();
        let mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn write_after_close_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStorage::new(dir.path().join("audit.jsonl")).unwrap();
        store.close().unwrap();
        assert!(store.write(&entry(0)).is_err());
    }
}
