//! RendererDaemon implementation.
//!
//! The daemon owns every table synchronizer and decides when each device
//! is reconciled:
//! - Pipeline tables run in increasing stage order per device
//! - Tables outside the pipeline (the group table) run after it
//! - Registry notifications mark devices dirty through a [`DirtyTracker`]
//! - `run` reconciles dirty devices on a fixed interval until `stop`

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::RendererConfig;
use crate::context::RendererContext;
use crate::endpoint::EndpointListener;
use crate::flow::{
    DestinationMapper, FlowTableSynchronizer, PolicyEnforcer, PortSecurity, SourceMapper,
};
use crate::group::GroupTable;
use log::{debug, info, warn};
use ofoverlay_sync_common::{Dirty, SyncReport, TableSynchronizer};
use ofoverlay_types::{DeviceId, EgKey, EpKey};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Configuration for the RendererDaemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererDaemonConfig {
    /// Interval between reconciliation passes in milliseconds
    pub sync_interval_ms: u64,
}

impl Default for RendererDaemonConfig {
    fn default() -> Self {
        Self {
            sync_interval_ms: 1000,
        }
    }
}

impl From<&RendererConfig> for RendererDaemonConfig {
    fn from(config: &RendererConfig) -> Self {
        Self {
            sync_interval_ms: config.sync_interval_ms,
        }
    }
}

/// Collects registry notifications until the daemon drains them.
#[derive(Debug, Default)]
pub struct DirtyTracker {
    endpoints: Mutex<BTreeSet<EpKey>>,
    devices: Mutex<BTreeMap<DeviceId, Dirty>>,
    groups: Mutex<BTreeMap<EgKey, BTreeSet<EpKey>>>,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a device dirty without naming a cause.
    pub fn mark_device(&self, device: DeviceId) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device)
            .or_default();
    }

    /// Takes the endpoints whose record changed so far.
    pub fn take_endpoints(&self) -> BTreeSet<EpKey> {
        std::mem::take(&mut *self.endpoints.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Takes the devices marked so far.
    pub fn take_devices(&self) -> BTreeMap<DeviceId, Dirty> {
        std::mem::take(&mut *self.devices.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Takes the groups whose membership changed so far.
    pub fn take_groups(&self) -> BTreeMap<EgKey, BTreeSet<EpKey>> {
        std::mem::take(&mut *self.groups.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
            && self
                .devices
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
            && self
                .groups
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
    }

    /// Drops everything recorded so far.
    pub fn clear(&self) {
        self.take_endpoints();
        self.take_devices();
        self.take_groups();
    }
}

impl EndpointListener for DirtyTracker {
    fn endpoint_updated(&self, key: &EpKey) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
    }

    fn device_endpoint_updated(&self, device: &DeviceId, key: &EpKey) {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(device.clone())
            .or_default()
            .mark_endpoint(key.clone());
    }

    fn group_endpoint_updated(&self, group: &EgKey, key: &EpKey) {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(group.clone())
            .or_default()
            .insert(key.clone());
    }
}

/// The renderer's reconciliation daemon.
pub struct RendererDaemon {
    /// Configuration
    config: RendererDaemonConfig,
    /// Shared collaborators
    ctx: RendererContext,
    /// Pipeline tables by stage
    pipeline: BTreeMap<u8, Box<dyn TableSynchronizer>>,
    /// Tables outside the pipeline, in registration order
    tables: Vec<Box<dyn TableSynchronizer>>,
    /// Registry change collector
    tracker: Arc<DirtyTracker>,
    /// Running flag
    running: AtomicBool,
}

impl RendererDaemon {
    /// Creates a daemon with no tables registered and subscribes it to
    /// registry notifications.
    pub fn new(ctx: RendererContext, config: RendererDaemonConfig) -> Self {
        let tracker = Arc::new(DirtyTracker::new());
        ctx.registry.register_listener(tracker.clone());
        Self {
            config,
            ctx,
            pipeline: BTreeMap::new(),
            tables: Vec::new(),
            tracker,
            running: AtomicBool::new(false),
        }
    }

    /// Creates a daemon with the four pipeline stages and the group table.
    pub fn with_default_tables(ctx: RendererContext, config: RendererDaemonConfig) -> Self {
        let tables = ctx.config.tables;
        let mut daemon = Self::new(ctx.clone(), config);
        daemon.register_table(Box::new(FlowTableSynchronizer::new(
            ctx.clone(),
            PortSecurity::new(&tables),
        )));
        daemon.register_table(Box::new(FlowTableSynchronizer::new(
            ctx.clone(),
            SourceMapper::new(&tables),
        )));
        daemon.register_table(Box::new(FlowTableSynchronizer::new(
            ctx.clone(),
            DestinationMapper::new(&tables),
        )));
        daemon.register_table(Box::new(PolicyEnforcer::new(&tables)));
        daemon.register_table(Box::new(GroupTable::new(ctx)));
        daemon
    }

    /// Registers a table synchronizer.
    ///
    /// A pipeline table replaces any table already registered for its stage.
    pub fn register_table(&mut self, table: Box<dyn TableSynchronizer>) {
        let name = table.name().to_string();
        let stage = table.stage();
        info!("Registering {} (stage {:?})", name, stage);

        let record = AuditRecord::new(
            AuditCategory::ConfigurationChange,
            "RendererDaemon",
            format!("register_table: {}", name),
        )
        .with_outcome(AuditOutcome::Success)
        .with_object_id(&name)
        .with_object_type("table_synchronizer")
        .with_details(serde_json::json!({
            "stage": stage,
        }));
        audit_log!(record);

        match stage {
            Some(stage) => {
                if let Some(old) = self.pipeline.insert(stage, table) {
                    warn!("{} replaced {} at stage {}", name, old.name(), stage);
                }
            }
            None => self.tables.push(table),
        }
    }

    /// Names of the registered tables in execution order.
    pub fn table_names(&self) -> Vec<String> {
        self.pipeline
            .values()
            .chain(self.tables.iter())
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Returns the tracker collecting registry notifications.
    pub fn tracker(&self) -> Arc<DirtyTracker> {
        Arc::clone(&self.tracker)
    }

    /// Returns the shared context.
    pub fn context(&self) -> &RendererContext {
        &self.ctx
    }

    /// Runs every table against one device, pipeline first.
    pub async fn reconcile_device(&self, device: &DeviceId, dirty: &Dirty) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(self.pipeline.len() + self.tables.len());
        for table in self.pipeline.values().chain(self.tables.iter()) {
            debug!("Synchronizing {} on {}", table.name(), device);
            reports.push(table.synchronize(device, dirty).await);
        }
        reports
    }

    /// Reconciles every device marked dirty since the last pass.
    ///
    /// An endpoint whose record changed without moving (a new port, new
    /// addresses) dirties the device it is attached to. A group membership change dirties every device hosting that group
    /// or one of its contract peers, since their destination rules and
    /// flood buckets reference the changed endpoint.
    pub async fn reconcile_dirty(&self) -> Vec<SyncReport> {
        let mut pending = self.tracker.take_devices();

        for key in self.tracker.take_endpoints() {
            if let Some(location) = self.ctx.registry.location_of(&key) {
                pending
                    .entry(location.device)
                    .or_default()
                    .mark_endpoint(key);
            }
        }

        for (group, endpoints) in self.tracker.take_groups() {
            let mut affected = self.ctx.policy.peers(&group);
            affected.insert(group.clone());
            for g in &affected {
                for device in self.ctx.registry.devices_for_group(g) {
                    let dirty = pending.entry(device).or_default();
                    dirty.mark_group(group.clone());
                    for ep in &endpoints {
                        dirty.mark_endpoint(ep.clone());
                    }
                }
            }
        }

        let mut reports = Vec::new();
        for (device, dirty) in pending {
            reports.extend(self.reconcile_device(&device, &dirty).await);
        }
        Self::log_pass("dirty", &reports);
        reports
    }

    /// Reconciles every ready device and every device hosting endpoints.
    pub async fn reconcile_all(&self) -> Vec<SyncReport> {
        self.tracker.clear();

        let mut devices = self.ctx.tunnels.ready_devices();
        devices.extend(self.ctx.registry.devices());

        let mut reports = Vec::new();
        for device in devices {
            reports.extend(self.reconcile_device(&device, &Dirty::new()).await);
        }
        Self::log_pass("full", &reports);
        reports
    }

    fn log_pass(kind: &str, reports: &[SyncReport]) {
        if reports.is_empty() {
            return;
        }
        let writes: usize = reports.iter().map(SyncReport::writes).sum();
        let failed = reports.iter().filter(|r| r.status.is_failure()).count();
        if failed > 0 {
            warn!(
                "Reconciliation pass ({}) ran {} tables: {} writes, {} failed",
                kind,
                reports.len(),
                writes,
                failed
            );
        } else {
            info!(
                "Reconciliation pass ({}) ran {} tables: {} writes",
                kind,
                reports.len(),
                writes
            );
        }
    }

    /// Returns true while the event loop runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs the reconciliation loop.
    ///
    /// Every device is reconciled once, then dirty devices are reconciled
    /// every `sync_interval_ms` until `stop()` is called.
    pub async fn run(&self) {
        info!("Starting RendererDaemon event loop");
        self.running.store(true, Ordering::SeqCst);

        let record = AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "RendererDaemon",
            "event_loop_started",
        )
        .with_outcome(AuditOutcome::Success)
        .with_details(serde_json::json!({
            "sync_interval_ms": self.config.sync_interval_ms,
            "tables": self.table_names(),
        }));
        audit_log!(record);

        self.reconcile_all().await;
        while self.is_running() {
            tokio::time::sleep(Duration::from_millis(self.config.sync_interval_ms)).await;
            if !self.is_running() {
                break;
            }
            self.reconcile_dirty().await;
        }

        info!("RendererDaemon event loop stopped");

        let stop_record = AuditRecord::new(
            AuditCategory::SystemLifecycle,
            "RendererDaemon",
            "event_loop_stopped",
        )
        .with_outcome(AuditOutcome::Success);
        audit_log!(stop_record);
    }

    /// Stops the event loop after the current pass.
    pub fn stop(&self) {
        info!("Stopping RendererDaemon");

        let record = AuditRecord::new(AuditCategory::AdminAction, "RendererDaemon", "stop_requested")
            .with_outcome(AuditOutcome::Success);
        audit_log!(record);

        self.running.store(false, Ordering::SeqCst);
    }

    /// Dumps state for debugging.
    pub fn dump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(format!("RendererDaemon running: {}", self.is_running()));
        for (stage, table) in &self.pipeline {
            lines.push(format!("  [stage {}] {}", stage, table.name()));
        }
        for table in &self.tables {
            lines.push(format!("  [-------] {}", table.name()));
        }
        lines
    }
}
