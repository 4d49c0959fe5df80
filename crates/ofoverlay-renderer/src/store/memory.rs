//! In-memory device-state store.

use super::types::{DeviceStateStore, StoreError, StoreResult, WriteBatch, WriteOp};
use crate::flow::FlowRecord;
use crate::group::GroupRecord;
use async_trait::async_trait;
use log::debug;
use ofoverlay_types::DeviceId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Programmed state of one device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceSnapshot {
    /// Flows by table id, then by flow id.
    pub flows: BTreeMap<u8, BTreeMap<String, FlowRecord>>,
    /// Groups by group id.
    pub groups: BTreeMap<u32, GroupRecord>,
}

impl DeviceSnapshot {
    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::PutFlow(flow) => {
                self.flows
                    .entry(flow.table_id)
                    .or_default()
                    .insert(flow.id.clone(), flow);
            }
            WriteOp::DeleteFlow { table_id, id } => {
                if let Some(table) = self.flows.get_mut(&table_id) {
                    table.remove(&id);
                    if table.is_empty() {
                        self.flows.remove(&table_id);
                    }
                }
            }
            WriteOp::PutGroup(group) => {
                self.groups.insert(group.group_id, group);
            }
            WriteOp::DeleteGroup { group_id } => {
                self.groups.remove(&group_id);
            }
        }
    }
}

/// Device-state store kept in process memory.
///
/// Counts every commit and every op so tests can assert that a pass
/// wrote nothing, and can be told to reject commits to exercise failure
/// handling.
#[derive(Debug, Default)]
pub struct InMemoryDeviceStore {
    devices: RwLock<BTreeMap<DeviceId, DeviceSnapshot>>,
    commits: AtomicU64,
    ops: AtomicU64,
    fail_commits: AtomicBool,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a flow on a device without counting it as a commit.
    pub async fn seed_flow(&self, device: &DeviceId, flow: FlowRecord) {
        let mut devices = self.devices.write().await;
        devices
            .entry(device.clone())
            .or_default()
            .apply(WriteOp::PutFlow(flow));
    }

    /// Places a group on a device without counting it as a commit.
    pub async fn seed_group(&self, device: &DeviceId, group: GroupRecord) {
        let mut devices = self.devices.write().await;
        devices
            .entry(device.clone())
            .or_default()
            .apply(WriteOp::PutGroup(group));
    }

    /// Flows of one table, in id order.
    pub async fn flows(&self, device: &DeviceId, table_id: u8) -> Vec<FlowRecord> {
        let devices = self.devices.read().await;
        devices
            .get(device)
            .and_then(|d| d.flows.get(&table_id))
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Groups of one device, in id order.
    pub async fn groups(&self, device: &DeviceId) -> Vec<GroupRecord> {
        let devices = self.devices.read().await;
        devices
            .get(device)
            .map(|d| d.groups.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Full copy of every device's state.
    pub async fn snapshot(&self) -> BTreeMap<DeviceId, DeviceSnapshot> {
        self.devices.read().await.clone()
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of ops applied by successful commits.
    pub fn op_count(&self) -> u64 {
        self.ops.load(Ordering::SeqCst)
    }

    /// Makes every subsequent commit fail until switched off.
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceStateStore for InMemoryDeviceStore {
    async fn read_flows(&self, device: &DeviceId, table_id: u8) -> StoreResult<Vec<FlowRecord>> {
        Ok(self.flows(device, table_id).await)
    }

    async fn read_groups(&self, device: &DeviceId) -> StoreResult<Vec<GroupRecord>> {
        Ok(self.groups(device).await)
    }

    async fn commit(&self, device: &DeviceId, batch: WriteBatch) -> StoreResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StoreError::CommitRejected {
                device: device.clone(),
                reason: "commits disabled".to_string(),
            });
        }

        let count = batch.len() as u64;
        let mut devices = self.devices.write().await;
        let state = devices.entry(device.clone()).or_default();
        for op in batch.into_ops() {
            state.apply(op);
        }
        if state.flows.is_empty() && state.groups.is_empty() {
            devices.remove(device);
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        self.ops.fetch_add(count, Ordering::SeqCst);
        debug!("Committed {} ops to {}", count, device);
        Ok(())
    }
}
