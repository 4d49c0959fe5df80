//! Group table synchronizer.
//!
//! Maintains one flood group per flood domain present on a device. A
//! group replicates to one bucket per local endpoint port and one bucket
//! per remote device hosting a member of a local group in that domain.
//!
//! Device reads cannot be scoped to the groups this table owns, so the
//! whole group table is read and reconciled at two levels: buckets within
//! a group, then groups within the device. A group left with no buckets
//! is deleted.

use super::types::{BucketId, BucketRecord, GroupRecord};
use crate::context::RendererContext;
use crate::flow::Action;
use crate::store::{WriteBatch, WriteOp};
use async_trait::async_trait;
use log::{debug, error, warn};
use ofoverlay_sync_common::{
    Dirty, SyncReport, TableSynchronizer, TaskError, TaskResult, TaskStatus, VisitMap,
};
use ofoverlay_types::{DeviceId, PortId};
use std::collections::BTreeMap;
use std::net::IpAddr;

/// Reconciles device flood groups.
pub struct GroupTable {
    ctx: RendererContext,
}

impl GroupTable {
    pub const NAME: &'static str = "GroupTable";

    pub fn new(ctx: RendererContext) -> Self {
        Self { ctx }
    }

    fn remote_bucket(
        &self,
        remote: &DeviceId,
        tunnel_port: Option<&PortId>,
    ) -> TaskResult<BucketRecord> {
        let ordinal = self
            .ctx
            .ordinals
            .device_ordinal(remote)
            .ok_or_else(|| TaskError::unresolved(format!("ordinal of device {}", remote)))?;
        let bucket_id = BucketId::remote(ordinal).ok_or_else(|| {
            TaskError::invalid_entry(format!("ordinal {} of {} uses the reserved bit", ordinal, remote))
        })?;
        let address = self
            .ctx
            .tunnels
            .tunnel_address(remote)
            .ok_or_else(|| TaskError::unresolved(format!("tunnel address of {}", remote)))?;
        let IpAddr::V4(address) = address else {
            return Err(TaskError::invalid_entry(format!(
                "IPv6 tunnel destination {} for {} not supported",
                address, remote
            )));
        };
        let port = tunnel_port.ok_or_else(|| TaskError::unresolved("local tunnel port"))?;

        Ok(BucketRecord {
            bucket_id,
            actions: vec![
                Action::SetTunnelIpv4Destination(address),
                Action::Output(port.clone()),
            ],
        })
    }

    fn local_bucket(port: &PortId) -> TaskResult<BucketRecord> {
        let number = port
            .port_number()
            .map_err(|e| TaskError::invalid_entry(e.to_string()))?;
        let bucket_id = BucketId::local(number).ok_or_else(|| {
            TaskError::invalid_entry(format!("port number {} of {} uses the reserved bit", number, port))
        })?;
        Ok(BucketRecord {
            bucket_id,
            actions: vec![Action::Output(port.clone())],
        })
    }

    fn log_skip(&self, device: &DeviceId, what: &str, e: &TaskError) {
        match e {
            TaskError::InvalidEntry { .. } => {
                error!("{}: skipping {} on {}: {}", Self::NAME, what, device, e)
            }
            _ => warn!("{}: skipping {} on {}: {}", Self::NAME, what, device, e),
        }
    }

    /// Computes every flood group `device` should carry, keyed by group id.
    pub fn desired_groups(&self, device: &DeviceId) -> BTreeMap<u32, GroupRecord> {
        let registry = &self.ctx.registry;
        let tunnel_port = self.ctx.tunnels.tunnel_port(device);
        let mut desired: BTreeMap<u32, GroupRecord> = BTreeMap::new();

        for group in registry.groups_on_device(device) {
            let Some(fd) = self
                .ctx
                .policy
                .forwarding_context(&group)
                .and_then(|fwd| fwd.flood_domain)
            else {
                debug!("{}: {} has no flood domain", Self::NAME, group);
                continue;
            };
            let Some(group_id) = self.ctx.ordinals.context_ordinal(&group.tenant, &fd) else {
                warn!("{}: no ordinal for flood domain {} of {}", Self::NAME, fd, group);
                continue;
            };
            let record = desired
                .entry(group_id)
                .or_insert_with(|| GroupRecord::new(group_id));

            for remote in registry.devices_for_group(&group) {
                if &remote == device {
                    continue;
                }
                match self.remote_bucket(&remote, tunnel_port.as_ref()) {
                    Ok(bucket) => record.put_bucket(bucket),
                    Err(e) => self.log_skip(device, &format!("bucket for {}", remote), &e),
                }
            }

            for ep in registry.endpoints_on_device_in_group(device, &group) {
                let Some(port) = ep.internal_port() else {
                    continue;
                };
                match Self::local_bucket(port) {
                    Ok(bucket) => record.put_bucket(bucket),
                    Err(e) => self.log_skip(device, &format!("bucket for {}", ep.key), &e),
                }
            }
        }

        desired
    }
}

/// Marks the desired buckets against the existing ones. Returns true if
/// the group type differs or any bucket was added, replaced or left over.
fn group_changed(existing: &GroupRecord, desired: &GroupRecord) -> bool {
    if existing.group_type != desired.group_type {
        return true;
    }
    let mut buckets =
        VisitMap::from_existing(existing.buckets.iter().map(|b| (b.bucket_id, b.clone())));
    let mut changed = false;

    for bucket in &desired.buckets {
        if buckets.mark(&bucket.bucket_id) {
            if buckets.get(&bucket.bucket_id) != Some(bucket) {
                changed = true;
            }
        } else {
            buckets.insert_visited(bucket.bucket_id, bucket.clone());
            changed = true;
        }
    }

    !buckets.sweep().is_empty() || changed
}

#[async_trait]
impl TableSynchronizer for GroupTable {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn synchronize(&self, device: &DeviceId, _dirty: &Dirty) -> SyncReport {
        let mut report = SyncReport::new(Self::NAME, device);

        let existing = match self.ctx.read_groups(device).await {
            Ok(groups) => groups,
            Err(e) => {
                error!("{}: failed to read groups on {}: {}", Self::NAME, device, e);
                return report.with_status(TaskStatus::Failed);
            }
        };
        let mut existing = VisitMap::from_existing(existing.into_iter().map(|mut g| {
            g.normalize();
            (g.group_id, g)
        }));

        let mut batch = WriteBatch::new();
        for (group_id, desired) in self.desired_groups(device) {
            if desired.buckets.is_empty() {
                continue;
            }
            let changed = match existing.get(&group_id) {
                Some(current) => group_changed(current, &desired),
                None => true,
            };
            existing.mark(&group_id);
            if changed {
                batch.push(WriteOp::PutGroup(desired));
            }
        }
        for (group_id, _) in existing.sweep() {
            batch.push(WriteOp::DeleteGroup { group_id });
        }

        report.puts = batch.puts();
        report.deletes = batch.deletes();
        if batch.is_empty() {
            debug!("{}: groups on {} are up to date", Self::NAME, device);
            return report;
        }

        let status = self
            .ctx
            .commit(Self::NAME, device, "group_table", batch)
            .await;
        report.with_status(status)
    }
}
