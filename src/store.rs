use crate::state::Snapshot;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("не удалось сериализовать снимок статусов: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("ошибка ввода-вывода для {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("не удалось атомарно заменить {path}: {source}")]
    Persist {
        path: String,
        source: tempfile::PersistError,
    },
    #[error("задача записи снимка прервана: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unavailable {
    Missing,
    Malformed,
}

impl Unavailable {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "status file not found",
            Self::Malformed => "status file malformed",
        }
    }
}

/// What a reader gets back from the status file.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusRead {
    Available(Snapshot),
    Unavailable(Unavailable),
}

impl StatusRead {
    pub fn into_snapshot(self) -> Option<Snapshot> {
        match self {
            Self::Available(snapshot) => Some(snapshot),
            Self::Unavailable(_) => None,
        }
    }
}

impl Serialize for StatusRead {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct UnavailableBody {
            available: bool,
            error: &'static str,
        }

        match self {
            Self::Available(snapshot) => snapshot.serialize(serializer),
            Self::Unavailable(reason) => UnavailableBody {
                available: false,
                error: reason.as_str(),
            }
            .serialize(serializer),
        }
    }
}

/// Owner of the status file on disk.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
    max_age: Duration,
}

impl StatusStore {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self {
            path: path.into(),
            max_age,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `is_fresh` off the async workers.
    pub async fn fresh(&self) -> bool {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.is_fresh()).await {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "freshness check aborted");
                false
            }
        }
    }

    /// `read` off the async workers.
    pub async fn load(&self) -> StatusRead {
        let store = self.clone();
        match tokio::task::spawn_blocking(move || store.read()).await {
            Ok(read) => read,
            Err(err) => {
                warn!(error = %err, "status file read aborted");
                StatusRead::Unavailable(Unavailable::Malformed)
            }
        }
    }

    /// `write` off the async workers; hands the snapshot back on success.
    pub async fn save(&self, snapshot: Snapshot) -> Result<Snapshot, StoreError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.write(&snapshot).map(|_| snapshot)).await?
    }

    /// True when the file exists and was modified less than `max_age` ago.
    /// A modification time in the future counts as fresh.
    pub fn is_fresh(&self) -> bool {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => return false,
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age < self.max_age,
            Err(_) => true,
        }
    }

    pub fn read(&self) -> StatusRead {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return StatusRead::Unavailable(Unavailable::Missing);
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "status file unreadable");
                return StatusRead::Unavailable(Unavailable::Malformed);
            }
        };
        match serde_json::from_str(&text) {
            Ok(snapshot) => StatusRead::Available(snapshot),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "status file malformed");
                StatusRead::Unavailable(Unavailable::Malformed)
            }
        }
    }

    /// Replaces the status file atomically: readers see either the old
    /// snapshot or the new one, never a partial write.
    pub fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(snapshot)?;
        let parent = self.parent_dir();
        fs::create_dir_all(&parent).map_err(|source| self.io_error(&parent, source))?;

        let mut temp = NamedTempFile::new_in(&parent).map_err(|source| self.io_error(&parent, source))?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|source| self.io_error(temp.path(), source))?;
        temp.persist(&self.path)
            .map_err(|source| StoreError::Persist {
                path: self.path.display().to_string(),
                source,
            })?;

        #[cfg(unix)]
        {
            if let Err(err) = File::open(&parent).and_then(|dir| dir.sync_all()) {
                debug!(path = %parent.display(), error = %err, "directory fsync skipped");
            }
        }

        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn io_error(&self, path: &Path, source: io::Error) -> StoreError {
        StoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InternetSummary;
    use chrono::DateTime;

    fn snapshot() -> Snapshot {
        Snapshot {
            checked_at: DateTime::parse_from_rfc3339("2024-05-01T10:00:00+02:00").unwrap(),
            internet: InternetSummary {
                online: false,
                reachable_targets: 0,
                total_targets: 0,
                avg_rtt_ms: None,
            },
            services: vec![],
            internet_services: vec![],
        }
    }

    #[test]
    fn missing_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"), Duration::from_secs(30));

        assert!(!store.is_fresh());
        assert_eq!(store.read(), StatusRead::Unavailable(Unavailable::Missing));
    }

    #[test]
    fn malformed_file_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        fs::write(&path, "{\"checked_at\": ").unwrap();
        let store = StatusStore::new(&path, Duration::from_secs(30));

        assert_eq!(store.read(), StatusRead::Unavailable(Unavailable::Malformed));
        let body = serde_json::to_value(store.read()).unwrap();
        assert_eq!(body["available"], false);
        assert_eq!(body["error"], "status file malformed");
    }

    #[test]
    fn write_then_read_is_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("nested/status.json"), Duration::from_secs(30));

        store.write(&snapshot()).unwrap();
        assert!(store.is_fresh());
        assert_eq!(store.read(), StatusRead::Available(snapshot()));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name() != "status.json")
            .collect();
        assert!(leftovers.is_empty(), "temp files left behind: {leftovers:?}");
    }

    #[test]
    fn freshness_expires_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"), Duration::from_millis(300));

        store.write(&snapshot()).unwrap();
        assert!(store.is_fresh());
        std::thread::sleep(Duration::from_millis(400));
        assert!(!store.is_fresh());
    }

    #[tokio::test]
    async fn async_wrappers_match_blocking_calls() {
        let dir = tempfile::tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"), Duration::from_secs(30));

        assert!(!store.fresh().await);
        assert_eq!(store.load().await, StatusRead::Unavailable(Unavailable::Missing));

        let saved = store.save(snapshot()).await.unwrap();
        assert_eq!(saved, snapshot());
        assert!(store.fresh().await);
        assert_eq!(store.load().await, StatusRead::Available(snapshot()));
    }

    #[test]
    fn failed_write_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let store = StatusStore::new(&path, Duration::from_secs(30));
        store.write(&snapshot()).unwrap();

        // A directory in place of the parent makes the temp file creation fail.
        let blocked = StatusStore::new(path.join("status.json"), Duration::from_secs(30));
        assert!(blocked.write(&snapshot()).is_err());
        assert_eq!(store.read(), StatusRead::Available(snapshot()));
    }
}
