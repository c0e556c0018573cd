//! Call history reporting port
//!
//! When a session ends, on any path, the engine reports one record to the
//! persistence collaborator. Reporting is fire-and-forget from the state
//! machine's point of view; failures are logged, never surfaced to the call
//! flow.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::errors::CallResult;
use crate::types::CallHistoryRecord;

/// Receives one record per ended session.
#[async_trait]
pub trait CallHistorySink: Send + Sync {
    /// Persist the record. Errors are logged by the engine and otherwise
    /// ignored.
    async fn record(&self, record: CallHistoryRecord) -> CallResult<()>;
}

/// Discards all records.
#[derive(Debug, Default)]
pub struct NullHistorySink;

#[async_trait]
impl CallHistorySink for NullHistorySink {
    async fn record(&self, _record: CallHistoryRecord) -> CallResult<()> {
        Ok(())
    }
}

/// Keeps records in memory, newest last. Backs the in-app "recent calls"
/// view and the integration tests.
#[derive(Debug, Default)]
pub struct MemoryHistorySink {
    records: Mutex<Vec<CallHistoryRecord>>,
}

impl MemoryHistorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records reported so far, in arrival order.
    pub fn records(&self) -> Vec<CallHistoryRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl CallHistorySink for MemoryHistorySink {
    async fn record(&self, record: CallHistoryRecord) -> CallResult<()> {
        self.records.lock().push(record);
        Ok(())
    }
}
