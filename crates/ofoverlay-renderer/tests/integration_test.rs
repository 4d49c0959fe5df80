//! Integration tests for the renderer pipeline
//!
//! These tests drive the full daemon (all four pipeline stages plus the
//! group table) against the in-memory device-state store and check what
//! ends up programmed on each device.

use async_trait::async_trait;
use ofoverlay_renderer::config::RendererConfig;
use ofoverlay_renderer::flow::{drop_flow, FlowMatch, FlowRecord};
use ofoverlay_renderer::group::{BucketId, GroupRecord};
use ofoverlay_renderer::policy::{
    ForwardingContext, OrdinalAllocator, OrdinalTable, StaticPolicy, StaticTunnels,
};
use ofoverlay_renderer::store::StoreResult;
use ofoverlay_renderer::{
    DeviceStateStore, EndpointListener, EndpointRecord, EndpointRegistry, InMemoryDeviceStore,
    RendererContext, RendererDaemon, RendererDaemonConfig, WriteBatch,
};
use ofoverlay_sync_common::{Dirty, TaskStatus};
use ofoverlay_types::{ContextId, DeviceId, EgKey, EpKey, MacAddress, TenantId};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const S1: &str = "openflow:1";
const S2: &str = "openflow:2";

/// Daemon wired to an in-memory store with fixed collaborators.
struct Harness {
    daemon: RendererDaemon,
    store: Arc<InMemoryDeviceStore>,
    ordinals: Arc<OrdinalTable>,
    registry: Arc<EndpointRegistry>,
}

impl Harness {
    fn new(policy: StaticPolicy, tunnels: StaticTunnels) -> Self {
        Self::with_store(policy, tunnels, RendererConfig::default(), None)
    }

    fn with_store(
        policy: StaticPolicy,
        tunnels: StaticTunnels,
        config: RendererConfig,
        store_override: Option<Arc<dyn DeviceStateStore>>,
    ) -> Self {
        let store = Arc::new(InMemoryDeviceStore::new());
        let ordinals = Arc::new(OrdinalTable::new());
        let registry = Arc::new(EndpointRegistry::new());
        let ctx = RendererContext {
            config: Arc::new(config),
            registry: registry.clone(),
            ordinals: ordinals.clone(),
            policy: Arc::new(policy),
            tunnels: Arc::new(tunnels),
            store: store_override.unwrap_or_else(|| store.clone() as Arc<dyn DeviceStateStore>),
        };
        let daemon = RendererDaemon::with_default_tables(ctx, RendererDaemonConfig::default());
        Self {
            daemon,
            store,
            ordinals,
            registry,
        }
    }

    fn add(&self, record: &EndpointRecord) {
        self.registry.upsert(None, Some(record));
    }

    fn ordinal(&self, context: &str) -> u32 {
        self.ordinals
            .context_ordinal(&TenantId::new("t1"), &ContextId::new(context))
            .unwrap()
    }

    async fn flow_ids(&self, device: &str, table_id: u8) -> BTreeSet<String> {
        self.store
            .flows(&DeviceId::new(device), table_id)
            .await
            .into_iter()
            .map(|f| f.id)
            .collect()
    }
}

fn policy() -> StaticPolicy {
    let fwd = ForwardingContext::new()
        .with_bridge_domain("bd1")
        .with_flood_domain("fd1")
        .with_l3_context("l3c1");
    StaticPolicy::new()
        .with_group(EgKey::new("t1", "web"), fwd.clone())
        .with_group(EgKey::new("t1", "db"), fwd)
        .with_contract(EgKey::new("t1", "db"), EgKey::new("t1", "web"))
}

fn tunnels() -> StaticTunnels {
    StaticTunnels::new()
        .with_device(S1, "192.168.0.1".parse().unwrap(), "openflow:1:100")
        .with_device(S2, "192.168.0.2".parse().unwrap(), "openflow:2:100")
}

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0xaa, 0, 0, 0, 0, last])
}

fn endpoint(last: u8, group: &str, device: &str, port: u32) -> EndpointRecord {
    EndpointRecord::new("bd1", mac(last))
        .with_tenant("t1")
        .with_group(group)
        .with_location(device, format!("{}:{}", device, port))
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Port security scenarios
// ============================================================================

#[tokio::test]
async fn test_port_security_single_endpoint() {
    let h = Harness::new(policy(), StaticTunnels::new());
    let s = DeviceId::new(S1);
    let a = EndpointRecord::new("bd1", "AA:AA:AA:AA:AA:AA".parse().unwrap())
        .with_tenant("t1")
        .with_group("web")
        .with_location(S1, "openflow:1:1");
    h.add(&a);

    h.store
        .seed_flow(
            &s,
            FlowRecord::new("stale|rule", 0, 100, FlowMatch::new()).goto(1),
        )
        .await;

    h.daemon.reconcile_device(&s, &Dirty::new()).await;

    assert_eq!(
        h.flow_ids(S1, 0).await,
        set(&[
            "drop|null",
            "drop|2054",
            "drop|2048",
            "drop|34525",
            "openflow:1:1|aa:aa:aa:aa:aa:aa",
        ])
    );
}

#[tokio::test]
async fn test_port_security_with_ipv4() {
    let h = Harness::new(policy(), StaticTunnels::new());
    let a = endpoint(1, "web", S1, 1).with_l3_address("l3c1", "10.0.0.5".parse().unwrap());
    h.add(&a);

    h.daemon
        .reconcile_device(&DeviceId::new(S1), &Dirty::new())
        .await;

    let ids = h.flow_ids(S1, 0).await;
    assert_eq!(ids.len(), 7);
    assert!(ids.contains("openflow:1:1|aa:00:00:00:00:01|10.0.0.5/32|2048"));
    assert!(ids.contains("openflow:1:1|aa:00:00:00:00:01|10.0.0.5/32|2054"));

    let flows = h.store.flows(&DeviceId::new(S1), 0).await;
    let priority = |id: &str| flows.iter().find(|f| f.id == id).map(|f| f.priority);
    assert_eq!(priority("openflow:1:1|aa:00:00:00:00:01|10.0.0.5/32|2048"), Some(120));
    assert_eq!(priority("openflow:1:1|aa:00:00:00:00:01|10.0.0.5/32|2054"), Some(121));
}

// ============================================================================
// Group table scenarios
// ============================================================================

#[tokio::test]
async fn test_flood_group_and_idempotence() {
    let h = Harness::new(policy(), tunnels());
    h.ordinals.assign_device(DeviceId::new(S2), 7);
    h.add(&endpoint(1, "web", S1, 3));
    h.add(&endpoint(2, "web", S1, 5));
    h.add(&endpoint(3, "web", S2, 4));

    let reports = h.daemon.reconcile_all().await;
    assert!(reports.iter().all(|r| !r.status.is_failure()));

    let groups = h.store.groups(&DeviceId::new(S1)).await;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_id, h.ordinal("fd1"));
    let ids: Vec<u32> = groups[0].buckets.iter().map(|b| b.bucket_id).collect();
    assert_eq!(ids, vec![3, 5, (1 << 31) | 7]);

    let commits = h.store.commit_count();
    let again = h.daemon.reconcile_all().await;
    assert!(again.iter().all(|r| r.is_noop()));
    assert_eq!(h.store.commit_count(), commits);
}

#[tokio::test]
async fn test_empty_flood_group_is_pruned() {
    let h = Harness::new(policy(), tunnels());
    let a = endpoint(1, "web", S1, 3);
    h.add(&a);
    h.daemon.reconcile_all().await;
    assert_eq!(h.store.groups(&DeviceId::new(S1)).await.len(), 1);

    h.registry.upsert(Some(&a), None);
    h.daemon.reconcile_device(&DeviceId::new(S1), &Dirty::new()).await;
    assert!(h.store.groups(&DeviceId::new(S1)).await.is_empty());
}

#[tokio::test]
async fn test_unowned_groups_are_swept() {
    let h = Harness::new(policy(), tunnels());
    h.add(&endpoint(1, "web", S1, 3));
    let s = DeviceId::new(S1);
    h.store.seed_group(&s, GroupRecord::new(9999)).await;

    h.daemon.reconcile_device(&s, &Dirty::new()).await;
    let ids: Vec<u32> = h.store.groups(&s).await.iter().map(|g| g.group_id).collect();
    assert_eq!(ids, vec![h.ordinal("fd1")]);
}

#[test]
fn test_bucket_id_disjointness() {
    let remote: BTreeSet<u32> = (1..=1024).filter_map(BucketId::remote).collect();
    for port in (0..=u16::MAX as u32).chain([0x7fff_ffff, 0x8000_0000, u32::MAX]) {
        match BucketId::local(port) {
            Some(id) => {
                assert!(!BucketId::is_remote(id));
                assert!(!remote.contains(&id));
            }
            None => assert!(port >= BucketId::REMOTE_BIT),
        }
    }
    assert!(remote.iter().all(|id| BucketId::is_remote(*id)));
}

// ============================================================================
// Endpoint moves and self-healing
// ============================================================================

#[derive(Default)]
struct Events(Mutex<Vec<String>>);

impl EndpointListener for Events {
    fn device_endpoint_updated(&self, device: &DeviceId, key: &EpKey) {
        self.0.lock().unwrap().push(format!("device {} {}", device, key.mac));
    }

    fn group_endpoint_updated(&self, group: &EgKey, key: &EpKey) {
        self.0.lock().unwrap().push(format!("group {} {}", group.group, key.mac));
    }
}

#[tokio::test]
async fn test_endpoint_move_rerenders_both_devices() {
    let h = Harness::new(policy(), tunnels());
    let events = Arc::new(Events::default());
    h.registry.register_listener(events.clone());

    let a = endpoint(1, "web", S1, 1);
    h.add(&a);
    h.add(&endpoint(2, "db", S1, 2));
    h.daemon.reconcile_all().await;

    let bd = h.ordinal("bd1");
    let local = format!("{}|l2|aa:00:00:00:00:01|openflow:1:1", bd);
    assert!(h.flow_ids(S1, 2).await.contains(&local));
    events.0.lock().unwrap().clear();

    let moved = endpoint(1, "web", S2, 1);
    h.registry.upsert(Some(&a), Some(&moved));
    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            "device openflow:1 aa:00:00:00:00:01",
            "device openflow:2 aa:00:00:00:00:01",
            "group web aa:00:00:00:00:01",
        ]
    );
    let key = EpKey::new("bd1", mac(1));
    let in_group: Vec<EpKey> = h
        .registry
        .endpoints_in_group(&EgKey::new("t1", "web"))
        .into_iter()
        .map(|e| e.key)
        .collect();
    assert_eq!(in_group, vec![key.clone()]);
    assert_eq!(
        h.registry.location_of(&key).map(|l| l.device),
        Some(DeviceId::new(S2))
    );

    h.daemon.reconcile_dirty().await;

    // S1 lost the port-security rule and now tunnels to S2
    assert!(!h.flow_ids(S1, 0).await.contains("openflow:1:1|aa:00:00:00:00:01"));
    assert!(h.flow_ids(S2, 0).await.contains("openflow:2:1|aa:00:00:00:00:01"));
    let remote = format!("{}|l2|aa:00:00:00:00:01|192.168.0.2", bd);
    let s1_dest = h.flow_ids(S1, 2).await;
    assert!(s1_dest.contains(&remote));
    assert!(!s1_dest.contains(&local));
}

#[tokio::test]
async fn test_rules_for_changed_fields_are_replaced() {
    let h = Harness::new(policy(), tunnels());
    let a = endpoint(1, "web", S1, 1);
    h.add(&a);
    h.daemon.reconcile_all().await;
    let before = h.flow_ids(S1, 1).await;

    let replugged = endpoint(1, "web", S1, 7);
    h.registry.upsert(Some(&a), Some(&replugged));
    let reports = h.daemon.reconcile_dirty().await;
    let after = h.flow_ids(S1, 1).await;

    assert_eq!(before.len(), after.len());
    assert!(before.iter().any(|id| id.starts_with("openflow:1:1|")));
    assert!(after.iter().any(|id| id.starts_with("openflow:1:7|")));
    assert!(!after.iter().any(|id| id.starts_with("openflow:1:1|")));

    let mapper = reports.iter().find(|r| r.table == "SourceMapper").unwrap();
    assert_eq!((mapper.puts, mapper.deletes), (1, 1));
}

// ============================================================================
// Registry consistency
// ============================================================================

#[test]
fn test_index_consistency() {
    let registry = EndpointRegistry::new();
    let mut records = Vec::new();
    for i in 0..24u8 {
        let group = ["web", "db", "app"][(i % 3) as usize];
        let device = [S1, S2, "openflow:3"][(i % 4 % 3) as usize];
        let record = endpoint(i, group, device, u32::from(i) + 1);
        registry.upsert(None, Some(&record));
        records.push(record);
    }
    // move a few and drop a few
    for i in (0..24).step_by(5) {
        let moved = endpoint(i as u8, "web", "openflow:4", 40 + i as u32);
        registry.upsert(Some(&records[i]), Some(&moved));
    }
    for i in (1..24).step_by(7) {
        registry.upsert(Some(&records[i]), None);
    }

    for group in registry.groups() {
        let in_group: BTreeSet<EpKey> = registry
            .endpoints_in_group(&group)
            .into_iter()
            .map(|e| e.key)
            .collect();
        let mut union = BTreeSet::new();
        for device in registry.devices() {
            let on_device: BTreeSet<EpKey> = registry
                .endpoints_on_device(&device)
                .into_iter()
                .map(|e| e.key)
                .collect();
            for ep in registry.endpoints_on_device_in_group(&device, &group) {
                assert!(on_device.contains(&ep.key));
                assert!(in_group.contains(&ep.key));
                union.insert(ep.key);
            }
        }
        assert_eq!(union, in_group);
    }
}

// ============================================================================
// Store failures
// ============================================================================

#[tokio::test]
async fn test_commit_failure_recovers_next_pass() {
    let h = Harness::new(policy(), tunnels());
    h.add(&endpoint(1, "web", S1, 1));
    h.store.set_fail_commits(true);

    let failed = h.daemon.reconcile_all().await;
    let port_security = failed.iter().find(|r| r.table == "PortSecurity").unwrap();
    assert_eq!(port_security.status, TaskStatus::Failed);
    assert!(h.store.snapshot().await.is_empty());

    h.store.set_fail_commits(false);
    let recovered = h.daemon.reconcile_all().await;
    assert!(recovered.iter().all(|r| !r.status.is_failure()));
    assert!(h.flow_ids(S1, 0).await.contains("openflow:1:1|aa:00:00:00:00:01"));
}

/// Store whose reads never complete within the configured timeout.
struct StalledStore;

#[async_trait]
impl DeviceStateStore for StalledStore {
    async fn read_flows(&self, _device: &DeviceId, _table_id: u8) -> StoreResult<Vec<FlowRecord>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(vec![drop_flow(0, 1, None)])
    }

    async fn read_groups(&self, _device: &DeviceId) -> StoreResult<Vec<GroupRecord>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    async fn commit(&self, _device: &DeviceId, _batch: WriteBatch) -> StoreResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_store_timeout_fails_the_pass() {
    let config = RendererConfig {
        store_timeout_ms: 20,
        ..Default::default()
    };
    let h = Harness::with_store(policy(), tunnels(), config, Some(Arc::new(StalledStore)));
    h.add(&endpoint(1, "web", S1, 1));

    let reports = tokio::time::timeout(
        Duration::from_secs(2),
        h.daemon.reconcile_device(&DeviceId::new(S1), &Dirty::new()),
    )
    .await
    .unwrap();

    let statuses: Vec<(String, TaskStatus)> = reports
        .into_iter()
        .map(|r| (r.table, r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("PortSecurity".to_string(), TaskStatus::Failed),
            ("SourceMapper".to_string(), TaskStatus::Failed),
            ("DestinationMapper".to_string(), TaskStatus::Failed),
            ("PolicyEnforcer".to_string(), TaskStatus::Ignore),
            ("GroupTable".to_string(), TaskStatus::Failed),
        ]
    );
}
