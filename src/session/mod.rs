//! In-memory session store.
//!
//! One dataset per opaque session key, with create/replace/destroy lifecycle.
//! A replace swaps the `Arc` under the write lock (swap-then-publish), so a
//! concurrent reader holds either the old or the new session, never a
//! half-updated one. Sessions for different ids share no mutable state.

use crate::classify::{Classified, SessionMeta};
use crate::data::Dataset;
use crate::error::{MetricsError, Result};
use parking_lot::RwLock;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A classified dataset bound to a session id.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub dataset: Arc<Dataset>,
    pub meta: SessionMeta,
    /// Rows dropped at classification time for unparsable dates.
    pub dropped_rows: usize,
}

/// Keyed store of live sessions.
///
/// Always passed as an injected dependency, never reached through a global.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a classified dataset under a fresh opaque id.
    pub fn create(&self, classified: Classified) -> String {
        let id = new_session_id();
        let session = Arc::new(Session {
            id: id.clone(),
            dataset: Arc::new(classified.dataset),
            meta: classified.meta,
            dropped_rows: classified.dropped_rows,
        });
        self.sessions.write().insert(id.clone(), session);
        debug!(session_id = %id, "created session");
        id
    }

    /// Fetch a session by id.
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| MetricsError::SessionNotFound(id.to_string()))
    }

    /// Replace the dataset behind an existing id wholesale.
    pub fn replace(&self, id: &str, classified: Classified) -> Result<()> {
        let mut sessions = self.sessions.write();
        if !sessions.contains_key(id) {
            return Err(MetricsError::SessionNotFound(id.to_string()));
        }
        let session = Arc::new(Session {
            id: id.to_string(),
            dataset: Arc::new(classified.dataset),
            meta: classified.meta,
            dropped_rows: classified.dropped_rows,
        });
        sessions.insert(id.to_string(), session);
        debug!(session_id = %id, "replaced session dataset");
        Ok(())
    }

    /// Drop a session. Unknown ids are not an error; the end state is the same.
    pub fn destroy(&self, id: &str) {
        self.sessions.write().remove(id);
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// 32-hex-char opaque session id.
fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{classify, ClassifierConfig};
    use crate::data::RawTable;

    fn classified(metric_value: &str) -> Classified {
        let table = RawTable::new(
            vec!["date".into(), "cohort".into(), "trips".into()],
            vec![vec![
                "2025-01-01".into(),
                "A".into(),
                metric_value.to_string(),
            ]],
        )
        .unwrap();
        classify(&table, &ClassifierConfig::default()).unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let store = SessionStore::new();
        let id = store.create(classified("10"));
        assert_eq!(id.len(), 32);
        let session = store.get(&id).unwrap();
        assert_eq!(session.dataset.n_rows(), 1);
    }

    #[test]
    fn test_get_unknown_fails() {
        let store = SessionStore::new();
        assert!(matches!(
            store.get("deadbeef"),
            Err(MetricsError::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_replace_swaps_whole_session() {
        let store = SessionStore::new();
        let id = store.create(classified("10"));
        let before = store.get(&id).unwrap();

        store.replace(&id, classified("99")).unwrap();
        let after = store.get(&id).unwrap();

        // The old handle still sees the old data; the store publishes the new.
        assert_eq!(before.dataset.metric("trips").unwrap()[0], Some(10.0));
        assert_eq!(after.dataset.metric("trips").unwrap()[0], Some(99.0));
    }

    #[test]
    fn test_replace_unknown_fails() {
        let store = SessionStore::new();
        assert!(store.replace("missing", classified("1")).is_err());
    }

    #[test]
    fn test_destroy() {
        let store = SessionStore::new();
        let id = store.create(classified("10"));
        store.destroy(&id);
        assert!(store.get(&id).is_err());
        assert!(store.is_empty());
        // Destroying again is a no-op.
        store.destroy(&id);
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        let a = store.create(classified("1"));
        let b = store.create(classified("2"));
        assert_ne!(a, b);
        store.destroy(&a);
        assert!(store.get(&b).is_ok());
    }
}
