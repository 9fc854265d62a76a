//! The session-scoped facade tying the components together.
//!
//! An [`Engine`] owns the session store and the classifier configuration;
//! every aggregation or statistics call resolves its session here and runs to
//! completion synchronously. Requests against different sessions may run
//! concurrently without coordination.

use crate::classify::{classify, ClassifierConfig, SessionMeta};
use crate::data::RawTable;
use crate::entity::{compute_entity, EntityRequest, EntityResult};
use crate::error::Result;
use crate::session::SessionStore;
use crate::stats::{run_test, StatTestRequest, StatTestResult};
use crate::timeseries::{compute_time_series, TimeSeriesRequest, TimeSeriesResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Outcome of an upload or re-upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSummary {
    pub session_id: String,
    pub rows: usize,
    /// Rows dropped for unparsable dates; reported, never hidden.
    pub dropped_rows: usize,
    pub meta: SessionMeta,
}

/// The aggregation and statistics engine.
#[derive(Debug, Default)]
pub struct Engine {
    store: SessionStore,
    classifier: ClassifierConfig,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(classifier: ClassifierConfig) -> Self {
        Self {
            store: SessionStore::new(),
            classifier,
        }
    }

    /// Classify a raw table and open a new session for it.
    pub fn upload(&self, table: &RawTable) -> Result<UploadSummary> {
        let classified = classify(table, &self.classifier)?;
        let rows = classified.dataset.n_rows();
        let dropped_rows = classified.dropped_rows;
        let meta = classified.meta.clone();
        let session_id = self.store.create(classified);
        info!(session_id = %session_id, rows, dropped_rows, "session opened");
        Ok(UploadSummary {
            session_id,
            rows,
            dropped_rows,
            meta,
        })
    }

    /// Read a CSV file and open a new session for it.
    pub fn upload_csv(&self, path: &Path) -> Result<UploadSummary> {
        let table = RawTable::from_csv_path(path)?;
        self.upload(&table)
    }

    /// Replace an existing session's dataset wholesale (re-upload).
    pub fn replace(&self, session_id: &str, table: &RawTable) -> Result<UploadSummary> {
        let classified = classify(table, &self.classifier)?;
        let rows = classified.dataset.n_rows();
        let dropped_rows = classified.dropped_rows;
        let meta = classified.meta.clone();
        self.store.replace(session_id, classified)?;
        Ok(UploadSummary {
            session_id: session_id.to_string(),
            rows,
            dropped_rows,
            meta,
        })
    }

    /// Read-only session metadata for populating caller-side selections.
    pub fn metadata(&self, session_id: &str) -> Result<SessionMeta> {
        Ok(self.store.get(session_id)?.meta.clone())
    }

    /// Time-series aggregation against one session.
    pub fn time_series(
        &self,
        session_id: &str,
        request: &TimeSeriesRequest,
    ) -> Result<TimeSeriesResult> {
        let session = self.store.get(session_id)?;
        compute_time_series(Arc::clone(&session.dataset), request)
    }

    /// Entity-level aggregation against one session.
    pub fn entity(&self, session_id: &str, request: &EntityRequest) -> Result<EntityResult> {
        let session = self.store.get(session_id)?;
        compute_entity(Arc::clone(&session.dataset), request)
    }

    /// Run a statistical test. Pure: operates on the samples in the request,
    /// never on session data.
    pub fn stat_test(&self, request: &StatTestRequest) -> Result<StatTestResult> {
        run_test(request)
    }

    /// Drop a session. Unknown ids are a no-op.
    pub fn destroy(&self, session_id: &str) {
        self.store.destroy(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.store.len()
    }
}
