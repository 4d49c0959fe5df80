//! Shared collaborators handed to every table.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::RendererConfig;
use crate::endpoint::EndpointRegistry;
use crate::flow::FlowRecord;
use crate::group::GroupRecord;
use crate::policy::{ForwardingOrdinals, OrdinalAllocator, PolicyResolver, TunnelDirectory};
use crate::store::{DeviceStateStore, StoreError, StoreResult, WriteBatch};
use log::{debug, error};
use ofoverlay_sync_common::{TaskError, TaskResult, TaskStatus};
use ofoverlay_types::{ContextId, DeviceId, EgKey};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Everything a table needs to compute and program desired state.
///
/// Cheap to clone; every collaborator is reference counted.
#[derive(Clone)]
pub struct RendererContext {
    pub config: Arc<RendererConfig>,
    pub registry: Arc<EndpointRegistry>,
    pub ordinals: Arc<dyn OrdinalAllocator>,
    pub policy: Arc<dyn PolicyResolver>,
    pub tunnels: Arc<dyn TunnelDirectory>,
    pub store: Arc<dyn DeviceStateStore>,
}

impl RendererContext {
    /// Bound on a single store request.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.config.store_timeout_ms)
    }

    /// Resolves the ordinals of an endpoint group.
    ///
    /// Fails if the group is unknown to the policy resolver or cannot be
    /// given an ordinal. Forwarding ids the group lacks resolve to 0.
    pub fn forwarding_ordinals(&self, group: &EgKey) -> TaskResult<ForwardingOrdinals> {
        let fwd = self
            .policy
            .forwarding_context(group)
            .ok_or_else(|| TaskError::unresolved(format!("endpoint group {}", group)))?;

        let tenant = &group.tenant;
        let eg = self
            .ordinals
            .context_ordinal(tenant, &ContextId::from(&group.group))
            .ok_or_else(|| TaskError::unresolved(format!("ordinal of group {}", group)))?;

        let ordinal = |ctx: Option<ContextId>| {
            ctx.and_then(|c| self.ordinals.context_ordinal(tenant, &c))
                .unwrap_or(0)
        };

        Ok(ForwardingOrdinals {
            eg,
            bd: ordinal(fwd.bridge_domain),
            fd: ordinal(fwd.flood_domain),
            l3: ordinal(fwd.l3_context.as_ref().map(ContextId::from)),
        })
    }
}

impl RendererContext {
    async fn bounded<T>(
        &self,
        device: &DeviceId,
        operation: &str,
        request: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        match tokio::time::timeout(self.store_timeout(), request).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout {
                device: device.clone(),
                operation: operation.to_string(),
                timeout_ms: self.config.store_timeout_ms,
            }),
        }
    }

    /// Reads one flow table, bounded by the store timeout.
    pub async fn read_flows(&self, device: &DeviceId, table_id: u8) -> StoreResult<Vec<FlowRecord>> {
        self.bounded(device, "read_flows", self.store.read_flows(device, table_id))
            .await
    }

    /// Reads a device's group table, bounded by the store timeout.
    pub async fn read_groups(&self, device: &DeviceId) -> StoreResult<Vec<GroupRecord>> {
        self.bounded(device, "read_groups", self.store.read_groups(device))
            .await
    }

    /// Commits a batch on behalf of `source` and audits the outcome.
    ///
    /// A rejected or timed-out commit is logged and reported as
    /// [`TaskStatus::Failed`]; it is not retried. The next pass recomputes
    /// the same desired state and tries again.
    pub async fn commit(
        &self,
        source: &str,
        device: &DeviceId,
        object_type: &str,
        batch: WriteBatch,
    ) -> TaskStatus {
        let puts = batch.puts();
        let deletes = batch.deletes();
        let details = serde_json::json!({ "puts": puts, "deletes": deletes });

        match self
            .bounded(device, "commit", self.store.commit(device, batch))
            .await
        {
            Ok(()) => {
                debug!(
                    "{}: committed {} puts, {} deletes to {}",
                    source, puts, deletes, device
                );
                let category = if puts == 0 {
                    AuditCategory::ResourceDelete
                } else {
                    AuditCategory::DeviceWrite
                };
                audit_log!(AuditRecord::new(category, source, "commit")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(device.as_str())
                    .with_object_type(object_type)
                    .with_details(details));
                TaskStatus::Success
            }
            Err(e) => {
                error!("{}: commit to {} failed: {}", source, device, e);
                audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, source, "commit")
                    .with_object_id(device.as_str())
                    .with_object_type(object_type)
                    .with_details(details)
                    .with_error(e.to_string()));
                TaskStatus::Failed
            }
        }
    }
}

impl std::fmt::Debug for RendererContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererContext")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
