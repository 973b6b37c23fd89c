//! Event cursors and their persistence.
//!
//! The cursor is the id of the last event the consumer applied successfully.
//! It only moves forward and is only advanced after a successful apply.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::core::ServerIdentity;

use super::error::CursorError;
use super::protocol::EventId;

/// In-memory cursor of one identity's event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCursor {
    last_applied: Option<EventId>,
}

impl EventCursor {
    /// Start from a persisted cursor, or from nothing.
    pub fn new(last_applied: Option<EventId>) -> Self {
        Self { last_applied }
    }

    /// Last applied event id.
    pub fn last_applied(&self) -> Option<&EventId> {
        self.last_applied.as_ref()
    }

    /// Whether `id` is ahead of the cursor. Anything else is a duplicate or
    /// out of order.
    pub fn is_new(&self, id: &EventId) -> bool {
        self.last_applied.as_ref().map_or(true, |last| id > last)
    }

    /// Move the cursor to `id`. Ignored unless `id` is ahead.
    pub fn advance(&mut self, id: &EventId) -> bool {
        if !self.is_new(id) {
            return false;
        }
        self.last_applied = Some(id.clone());
        true
    }

    /// Forget the cursor.
    pub fn clear(&mut self) {
        self.last_applied = None;
    }
}

/// Persistence of per-identity cursors.
#[async_trait]
pub trait CursorStore: Send + Sync + 'static {
    /// Load the cursor for `identity`.
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<EventId>, CursorError>;

    /// Persist the cursor for `identity`.
    async fn save(&self, identity: &ServerIdentity, cursor: &EventId) -> Result<(), CursorError>;

    /// Remove the cursor for `identity`.
    async fn clear(&self, identity: &ServerIdentity) -> Result<(), CursorError>;
}

/// Process-local cursor store.
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursors: Mutex<HashMap<ServerIdentity, EventId>>,
}

impl MemoryCursorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<EventId>, CursorError> {
        Ok(self.cursors.lock().await.get(identity).cloned())
    }

    async fn save(&self, identity: &ServerIdentity, cursor: &EventId) -> Result<(), CursorError> {
        self.cursors
            .lock()
            .await
            .insert(identity.clone(), cursor.clone());
        Ok(())
    }

    async fn clear(&self, identity: &ServerIdentity) -> Result<(), CursorError> {
        self.cursors.lock().await.remove(identity);
        Ok(())
    }
}

/// Cursor store backed by a JSON file mapping identity to event id.
///
/// Writes go to a sibling temp file that is then renamed over the original, so
/// a crash never leaves a half-written file.
#[derive(Debug)]
pub struct FileCursorStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCursorStore {
    /// Use the file at `path`, created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<HashMap<ServerIdentity, EventId>, CursorError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_all(&self, cursors: &HashMap<ServerIdentity, EventId>) -> Result<(), CursorError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(cursors)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for FileCursorStore {
    async fn load(&self, identity: &ServerIdentity) -> Result<Option<EventId>, CursorError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(identity))
    }

    async fn save(&self, identity: &ServerIdentity, cursor: &EventId) -> Result<(), CursorError> {
        let _guard = self.lock.lock().await;
        let mut cursors = self.read_all().await?;
        cursors.insert(identity.clone(), cursor.clone());
        self.write_all(&cursors).await
    }

    async fn clear(&self, identity: &ServerIdentity) -> Result<(), CursorError> {
        let _guard = self.lock.lock().await;
        let mut cursors = self.read_all().await?;
        if cursors.remove(identity).is_some() {
            self.write_all(&cursors).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_is_monotonic() {
        let mut cursor = EventCursor::new(Some("42".into()));
        assert!(!cursor.is_new(&"41".into()));
        assert!(!cursor.is_new(&"42".into()));
        assert!(cursor.is_new(&"43".into()));

        assert!(!cursor.advance(&"40".into()));
        assert_eq!(cursor.last_applied(), Some(&EventId::from("42")));
        assert!(cursor.advance(&"100".into()));
        assert_eq!(cursor.last_applied(), Some(&EventId::from("100")));

        cursor.clear();
        assert!(cursor.is_new(&"1".into()));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryCursorStore::new();
        let alpha = ServerIdentity::new("alpha");
        assert_eq!(store.load(&alpha).await.unwrap(), None);

        store.save(&alpha, &"7".into()).await.unwrap();
        assert_eq!(store.load(&alpha).await.unwrap(), Some("7".into()));
        assert_eq!(store.load(&"beta".into()).await.unwrap(), None);

        store.clear(&alpha).await.unwrap();
        assert_eq!(store.load(&alpha).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("cursors.json");
        let alpha = ServerIdentity::new("alpha");
        let beta = ServerIdentity::new("beta");

        let store = FileCursorStore::new(&path);
        store.save(&alpha, &"42".into()).await.unwrap();
        store.save(&beta, &"evt-9".into()).await.unwrap();
        drop(store);

        let reopened = FileCursorStore::new(&path);
        assert_eq!(reopened.load(&alpha).await.unwrap(), Some("42".into()));
        assert_eq!(reopened.load(&beta).await.unwrap(), Some("evt-9".into()));
        assert!(!path.with_extension("tmp").exists());

        reopened.clear(&alpha).await.unwrap();
        assert_eq!(reopened.load(&alpha).await.unwrap(), None);
        assert_eq!(reopened.load(&beta).await.unwrap(), Some("evt-9".into()));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");
        std::fs::write(&path, b"not json").unwrap();

        let store = FileCursorStore::new(&path);
        assert!(matches!(
            store.load(&"alpha".into()).await,
            Err(CursorError::Corrupt(_))
        ));
    }
}
