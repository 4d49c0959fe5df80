//! Shared flow-table reconciliation.
//!
//! Every pipeline stage implements [`FlowTable`], which only describes the
//! desired rules. [`FlowTableSynchronizer`] wraps a stage and runs the
//! read, mark-and-sweep and commit steps around it.

use super::types::FlowRecord;
use crate::context::RendererContext;
use crate::store::{WriteBatch, WriteOp};
use async_trait::async_trait;
use log::{debug, error};
use ofoverlay_sync_common::{Dirty, SyncReport, TableSynchronizer, TaskStatus, VisitMap};
use ofoverlay_types::DeviceId;

/// Stages the difference between one table's programmed and desired rules.
#[derive(Debug)]
pub struct FlowWriter {
    table_id: u8,
    existing: VisitMap<String, FlowRecord>,
    batch: WriteBatch,
}

impl FlowWriter {
    /// Starts a pass over the flows read back from `table_id`.
    pub fn new(table_id: u8, existing: Vec<FlowRecord>) -> Self {
        Self {
            table_id,
            existing: VisitMap::from_existing(existing.into_iter().map(|f| (f.id.clone(), f))),
            batch: WriteBatch::new(),
        }
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }

    /// Marks `id` as desired. Returns true if nothing needs to be written.
    pub fn visit(&mut self, id: &str) -> bool {
        self.existing.mark(&id.to_string())
    }

    /// Declares `flow` desired, staging a put unless its id is already
    /// present on the device or was staged earlier in this pass.
    pub fn write(&mut self, flow: FlowRecord) {
        if self.visit(&flow.id) {
            return;
        }
        self.existing.insert_visited(flow.id.clone(), flow.clone());
        self.batch.push(WriteOp::PutFlow(flow));
    }

    /// Like [`write`](Self::write), but only builds the flow when its id is new.
    pub fn write_with(&mut self, id: String, build: impl FnOnce(String) -> FlowRecord) {
        if self.visit(&id) {
            return;
        }
        self.write(build(id));
    }

    /// Number of puts staged so far.
    pub fn staged(&self) -> usize {
        self.batch.len()
    }

    /// Stages a delete for every flow nobody declared and returns the batch.
    pub fn finish(mut self) -> WriteBatch {
        for (id, _) in self.existing.sweep() {
            self.batch.push(WriteOp::DeleteFlow {
                table_id: self.table_id,
                id,
            });
        }
        self.batch
    }
}

/// One stage of the flow pipeline.
///
/// Implementations compute their full desired rule set for a device from
/// the registry and the policy collaborators and hand every rule to the
/// writer. Items that cannot be rendered are logged and skipped.
pub trait FlowTable: Send + Sync {
    /// Name used in logs, audit records and reports.
    fn name(&self) -> &str;

    /// Pipeline stage number.
    fn stage(&self) -> u8;

    /// Table id the stage's rules are written to.
    fn table_id(&self) -> u8;

    /// Declares every desired rule of this table on `device`.
    fn sync(&self, ctx: &RendererContext, device: &DeviceId, dirty: &Dirty, writer: &mut FlowWriter);
}

/// Runs a [`FlowTable`] as a [`TableSynchronizer`].
pub struct FlowTableSynchronizer<T> {
    ctx: RendererContext,
    table: T,
}

impl<T: FlowTable> FlowTableSynchronizer<T> {
    pub fn new(ctx: RendererContext, table: T) -> Self {
        Self { ctx, table }
    }
}

#[async_trait]
impl<T: FlowTable> TableSynchronizer for FlowTableSynchronizer<T> {
    fn name(&self) -> &str {
        self.table.name()
    }

    fn stage(&self) -> Option<u8> {
        Some(self.table.stage())
    }

    async fn synchronize(&self, device: &DeviceId, dirty: &Dirty) -> SyncReport {
        let mut report = SyncReport::new(self.name(), device);
        let table_id = self.table.table_id();

        let existing = match self.ctx.read_flows(device, table_id).await {
            Ok(flows) => flows,
            Err(e) => {
                error!("{}: failed to read table {} on {}: {}", self.name(), table_id, device, e);
                return report.with_status(TaskStatus::Failed);
            }
        };

        let mut writer = FlowWriter::new(table_id, existing);
        self.table.sync(&self.ctx, device, dirty, &mut writer);
        let batch = writer.finish();

        report.puts = batch.puts();
        report.deletes = batch.deletes();
        if batch.is_empty() {
            debug!("{}: table {} on {} is up to date", self.name(), table_id, device);
            return report;
        }

        let status = self
            .ctx
            .commit(self.name(), device, "flow_table", batch)
            .await;
        report.with_status(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{simple_policy, Fixture};
    use crate::flow::types::{drop_flow, FlowMatch};
    use crate::policy::StaticTunnels;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_writer_mark_and_sweep() {
        let existing = vec![drop_flow(0, 1, None), FlowRecord::new("stale", 0, 5, FlowMatch::new())];
        let mut writer = FlowWriter::new(0, existing);

        writer.write(drop_flow(0, 1, None));
        writer.write(FlowRecord::new("fresh", 0, 5, FlowMatch::new()));
        writer.write(FlowRecord::new("fresh", 0, 5, FlowMatch::new()));
        assert_eq!(writer.staged(), 1);

        let ops = writer.finish().into_ops();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], WriteOp::PutFlow(f) if f.id == "fresh"));
        assert_eq!(
            ops[1],
            WriteOp::DeleteFlow {
                table_id: 0,
                id: "stale".to_string()
            }
        );
    }

    #[test]
    fn test_write_with_skips_build_for_known_id() {
        let mut writer = FlowWriter::new(0, vec![drop_flow(0, 1, None)]);
        writer.write_with("drop|null".to_string(), |_| panic!("must not build"));
        assert!(writer.finish().is_empty());
    }

    struct Fixed;

    impl FlowTable for Fixed {
        fn name(&self) -> &str {
            "Fixed"
        }

        fn stage(&self) -> u8 {
            0
        }

        fn table_id(&self) -> u8 {
            4
        }

        fn sync(&self, _ctx: &RendererContext, _device: &DeviceId, _dirty: &Dirty, writer: &mut FlowWriter) {
            writer.write(drop_flow(writer.table_id(), 1, None));
        }
    }

    #[tokio::test]
    async fn test_synchronizer_is_idempotent() {
        let fx = Fixture::new(simple_policy(), StaticTunnels::new());
        let sync = FlowTableSynchronizer::new(fx.ctx.clone(), Fixed);
        let device = DeviceId::new("openflow:1");

        let first = sync.synchronize(&device, &Dirty::new()).await;
        assert_eq!((first.puts, first.deletes), (1, 0));
        assert_eq!(sync.stage(), Some(0));

        let second = sync.synchronize(&device, &Dirty::new()).await;
        assert!(second.is_noop());
        assert_eq!(fx.store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_reported_not_raised() {
        let fx = Fixture::new(simple_policy(), StaticTunnels::new());
        let sync = FlowTableSynchronizer::new(fx.ctx.clone(), Fixed);
        let device = DeviceId::new("openflow:1");

        fx.store.set_fail_commits(true);
        let report = sync.synchronize(&device, &Dirty::new()).await;
        assert_eq!(report.status, TaskStatus::Failed);
        assert!(fx.store.flows(&device, 4).await.is_empty());

        fx.store.set_fail_commits(false);
        let report = sync.synchronize(&device, &Dirty::new()).await;
        assert_eq!(report.status, TaskStatus::Success);
        assert_eq!(fx.store.flows(&device, 4).await.len(), 1);
    }
}
