//! Store trait and write batches.

use crate::flow::FlowRecord;
use crate::group::GroupRecord;
use async_trait::async_trait;
use ofoverlay_types::DeviceId;
use serde::Serialize;
use thiserror::Error;

/// Error type for device-state store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store refused a commit.
    #[error("commit to {device} rejected: {reason}")]
    CommitRejected { device: DeviceId, reason: String },
    /// A request did not complete in time.
    #[error("{operation} on {device} timed out after {timeout_ms} ms")]
    Timeout {
        device: DeviceId,
        operation: String,
        timeout_ms: u64,
    },
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A single staged change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    PutFlow(FlowRecord),
    DeleteFlow { table_id: u8, id: String },
    PutGroup(GroupRecord),
    DeleteGroup { group_id: u32 },
}

impl WriteOp {
    pub fn is_delete(&self) -> bool {
        matches!(self, WriteOp::DeleteFlow { .. } | WriteOp::DeleteGroup { .. })
    }
}

/// Ordered changes committed to one device as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of puts in the batch.
    pub fn puts(&self) -> usize {
        self.ops.iter().filter(|op| !op.is_delete()).count()
    }

    /// Number of deletes in the batch.
    pub fn deletes(&self) -> usize {
        self.ops.iter().filter(|op| op.is_delete()).count()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }
}

/// Device-state store.
///
/// Reads are scoped to one flow table or to a device's whole group table.
/// A commit applies every op of the batch or none of them.
#[async_trait]
pub trait DeviceStateStore: Send + Sync {
    /// Flows currently programmed in `table_id` on `device`.
    async fn read_flows(&self, device: &DeviceId, table_id: u8) -> StoreResult<Vec<FlowRecord>>;

    /// Groups currently programmed on `device`.
    async fn read_groups(&self, device: &DeviceId) -> StoreResult<Vec<GroupRecord>>;

    /// Applies `batch` to `device` atomically.
    async fn commit(&self, device: &DeviceId, batch: WriteBatch) -> StoreResult<()>;
}
