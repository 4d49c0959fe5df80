//! Base TableSynchronizer trait and the types passed through it.

use crate::TaskStatus;
use async_trait::async_trait;
use ofoverlay_types::{DeviceId, EgKey, EpKey};
use serde::Serialize;
use std::collections::BTreeSet;

/// Change signal accumulated by the scheduler for one device.
///
/// Tables currently recompute their full desired state on every pass, so
/// the signal only tells them *why* they were invoked. It is carried so a
/// table can narrow its work later without changing the trait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dirty {
    endpoints: BTreeSet<EpKey>,
    groups: BTreeSet<EgKey>,
}

impl Dirty {
    /// Creates an empty signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a changed endpoint.
    pub fn mark_endpoint(&mut self, key: EpKey) {
        self.endpoints.insert(key);
    }

    /// Records a changed group.
    pub fn mark_group(&mut self, key: EgKey) {
        self.groups.insert(key);
    }

    /// Folds another signal into this one.
    pub fn merge(&mut self, other: Dirty) {
        self.endpoints.extend(other.endpoints);
        self.groups.extend(other.groups);
    }

    /// Returns true if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty() && self.groups.is_empty()
    }

    /// Changed endpoints.
    pub fn endpoints(&self) -> &BTreeSet<EpKey> {
        &self.endpoints
    }

    /// Changed groups.
    pub fn groups(&self) -> &BTreeSet<EgKey> {
        &self.groups
    }
}

/// What a single synchronization pass did to one device table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Name of the synchronizer that produced the report
    pub table: String,
    /// Device the pass ran against
    pub device: DeviceId,
    /// Records written (new or replaced)
    pub puts: usize,
    /// Records deleted
    pub deletes: usize,
    /// Outcome of the pass
    pub status: TaskStatus,
}

impl SyncReport {
    /// Creates an empty successful report.
    pub fn new(table: impl Into<String>, device: &DeviceId) -> Self {
        Self {
            table: table.into(),
            device: device.clone(),
            puts: 0,
            deletes: 0,
            status: TaskStatus::Success,
        }
    }

    /// Sets the outcome.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Total number of device writes the pass staged.
    pub fn writes(&self) -> usize {
        self.puts + self.deletes
    }

    /// Returns true if the pass found nothing to change.
    pub fn is_noop(&self) -> bool {
        self.writes() == 0
    }
}

/// Base trait for every table programmed into a device.
///
/// A synchronizer owns exactly one slice of device state (one flow table,
/// or the device's group table) and reconciles it against desired state
/// in a single read, diff and commit. Failures are logged by the
/// implementation and reflected in the returned report; they are never
/// propagated to the scheduler, which relies on the next pass to retry.
///
/// # Ordering
///
/// Pipeline tables carry a stage number and are run in increasing stage
/// order per device. Tables outside the numbered pipeline return `None`
/// from [`stage`](TableSynchronizer::stage) and run after it.
#[async_trait]
pub trait TableSynchronizer: Send + Sync {
    /// Returns the name of this table (for logging and reports).
    fn name(&self) -> &str;

    /// Returns the pipeline stage, or `None` for tables outside the pipeline.
    fn stage(&self) -> Option<u8> {
        None
    }

    /// Reconciles this table on one device.
    async fn synchronize(&self, device: &DeviceId, dirty: &Dirty) -> SyncReport;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofoverlay_types::MacAddress;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTable {
        passes: AtomicUsize,
    }

    #[async_trait]
    impl TableSynchronizer for CountingTable {
        fn name(&self) -> &str {
            "CountingTable"
        }

        async fn synchronize(&self, device: &DeviceId, _dirty: &Dirty) -> SyncReport {
            let pass = self.passes.fetch_add(1, Ordering::SeqCst);
            let mut report = SyncReport::new(self.name(), device);
            if pass == 0 {
                report.puts = 2;
            }
            report
        }
    }

    #[tokio::test]
    async fn test_synchronizer_trait() {
        let table = CountingTable {
            passes: AtomicUsize::new(0),
        };
        let device = DeviceId::new("openflow:1");

        assert_eq!(table.stage(), None);

        let first = table.synchronize(&device, &Dirty::new()).await;
        assert_eq!(first.writes(), 2);
        assert_eq!(first.status, TaskStatus::Success);

        let second = table.synchronize(&device, &Dirty::new()).await;
        assert!(second.is_noop());
    }

    #[test]
    fn test_dirty_merge() {
        let mac: MacAddress = "00:00:00:00:00:01".parse().unwrap();
        let mut a = Dirty::new();
        assert!(a.is_empty());
        a.mark_endpoint(EpKey::new("bd1", mac));

        let mut b = Dirty::new();
        b.mark_endpoint(EpKey::new("bd1", mac));
        b.mark_group(EgKey::new("t1", "web"));

        a.merge(b);
        assert_eq!(a.endpoints().len(), 1);
        assert_eq!(a.groups().len(), 1);
    }

    #[test]
    fn test_report_with_status() {
        let report = SyncReport::new("GroupTable", &DeviceId::new("openflow:1"))
            .with_status(TaskStatus::Failed);
        assert!(report.status.is_failure());
        assert!(report.is_noop());
    }
}
