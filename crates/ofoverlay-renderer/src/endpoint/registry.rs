//! EndpointRegistry implementation.
//!
//! One primary store plus three derived indices, all guarded by a single
//! lock so readers never observe a half-applied update:
//!
//! ```text
//! endpoints        EpKey -> Endpoint
//! by_device        DeviceId -> {EpKey}
//! by_group         EgKey -> {EpKey}
//! by_device_group  DeviceId -> EgKey -> {EpKey}
//! unlocated        {EpKey}
//! ```
//!
//! Only located endpoints appear in the device and group indices, so the
//! union over devices of `by_device_group[d][g]` is exactly `by_group[g]`.
//! Empty index entries are removed as soon as they empty out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use ofoverlay_types::{DeviceId, EgKey, EpKey};

use super::types::{Endpoint, EndpointLocation, EndpointRecord};

/// Receives registry change notifications.
///
/// Callbacks run after the registry lock has been released, so a listener
/// may read the registry from inside a callback.
pub trait EndpointListener: Send + Sync {
    /// Called once for every accepted update of an endpoint.
    fn endpoint_updated(&self, _key: &EpKey) {}

    /// Called when an endpoint attached to, left, or changed groups on a device.
    fn device_endpoint_updated(&self, _device: &DeviceId, _key: &EpKey) {}

    /// Called when an endpoint's membership of a group on some device changed.
    fn group_endpoint_updated(&self, _group: &EgKey, _key: &EpKey) {}
}

/// Placement of an endpoint in the derived indices.
#[derive(Debug, Default, PartialEq, Eq)]
struct Placement {
    device: Option<DeviceId>,
    groups: BTreeSet<EgKey>,
}

impl Placement {
    fn of(endpoint: Option<&Endpoint>) -> Self {
        match endpoint.and_then(|ep| ep.device().map(|d| (ep, d))) {
            Some((ep, device)) => Placement {
                device: Some(device.clone()),
                groups: ep.eg_keys(),
            },
            None => Placement::default(),
        }
    }

    fn pairs(&self) -> BTreeSet<(DeviceId, EgKey)> {
        match &self.device {
            Some(device) => self
                .groups
                .iter()
                .map(|g| (device.clone(), g.clone()))
                .collect(),
            None => BTreeSet::new(),
        }
    }
}

/// Notifications collected under the lock, fired after it is released.
#[derive(Debug, Default)]
struct Notifications {
    endpoints: Vec<EpKey>,
    devices: Vec<(DeviceId, EpKey)>,
    groups: Vec<(EgKey, EpKey)>,
}

#[derive(Debug, Default)]
struct RegistryState {
    endpoints: BTreeMap<EpKey, Endpoint>,
    unlocated: BTreeSet<EpKey>,
    by_device: BTreeMap<DeviceId, BTreeSet<EpKey>>,
    by_group: BTreeMap<EgKey, BTreeSet<EpKey>>,
    by_device_group: BTreeMap<DeviceId, BTreeMap<EgKey, BTreeSet<EpKey>>>,
}

impl RegistryState {
    /// Replaces the stored value for `key`, keeping every index consistent.
    fn apply(&mut self, key: &EpKey, new: Option<Endpoint>, out: &mut Notifications) {
        let previous = self.endpoints.remove(key);
        let old_place = Placement::of(previous.as_ref());
        let new_place = Placement::of(new.as_ref());

        if previous.is_none() && new.is_none() {
            return;
        }
        out.endpoints.push(key.clone());

        match &new {
            Some(ep) if ep.location.is_none() => {
                self.unlocated.insert(key.clone());
            }
            _ => {
                self.unlocated.remove(key);
            }
        }
        if let Some(ep) = new {
            self.endpoints.insert(key.clone(), ep);
        }

        if old_place == new_place {
            return;
        }

        self.unindex(key, &old_place);
        self.index(key, &new_place);

        if old_place.device != new_place.device {
            for device in [&old_place.device, &new_place.device].into_iter().flatten() {
                out.devices.push((device.clone(), key.clone()));
            }
        } else if let Some(device) = &new_place.device {
            out.devices.push((device.clone(), key.clone()));
        }

        let old_pairs = old_place.pairs();
        let new_pairs = new_place.pairs();
        let changed: BTreeSet<EgKey> = old_pairs
            .symmetric_difference(&new_pairs)
            .map(|(_, group)| group.clone())
            .collect();
        out.groups
            .extend(changed.into_iter().map(|group| (group, key.clone())));
    }

    fn index(&mut self, key: &EpKey, place: &Placement) {
        let Some(device) = &place.device else {
            return;
        };
        self.by_device
            .entry(device.clone())
            .or_default()
            .insert(key.clone());
        let per_device = self.by_device_group.entry(device.clone()).or_default();
        for group in &place.groups {
            self.by_group
                .entry(group.clone())
                .or_default()
                .insert(key.clone());
            per_device
                .entry(group.clone())
                .or_default()
                .insert(key.clone());
        }
    }

    fn unindex(&mut self, key: &EpKey, place: &Placement) {
        let Some(device) = &place.device else {
            return;
        };
        if let Some(eps) = self.by_device.get_mut(device) {
            eps.remove(key);
            if eps.is_empty() {
                self.by_device.remove(device);
            }
        }
        for group in &place.groups {
            if let Some(eps) = self.by_group.get_mut(group) {
                eps.remove(key);
                if eps.is_empty() {
                    self.by_group.remove(group);
                }
            }
            if let Some(per_device) = self.by_device_group.get_mut(device) {
                if let Some(eps) = per_device.get_mut(group) {
                    eps.remove(key);
                    if eps.is_empty() {
                        per_device.remove(group);
                    }
                }
                if per_device.is_empty() {
                    self.by_device_group.remove(device);
                }
            }
        }
    }

    fn collect<'a>(&self, keys: impl IntoIterator<Item = &'a EpKey>) -> Vec<Endpoint> {
        keys.into_iter()
            .filter_map(|k| self.endpoints.get(k).cloned())
            .collect()
    }
}

/// Authoritative endpoint table with device and group indices.
///
/// Mutations are serialized behind a write lock; every read returns an
/// owned snapshot.
#[derive(Default)]
pub struct EndpointRegistry {
    state: RwLock<RegistryState>,
    listeners: RwLock<Vec<Arc<dyn EndpointListener>>>,
}

impl std::fmt::Debug for EndpointRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EndpointRegistry")
            .field("endpoints", &state.endpoints.len())
            .field("unlocated", &state.unlocated.len())
            .field("devices", &state.by_device.len())
            .finish()
    }
}

impl EndpointRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for change notifications.
    pub fn register_listener(&self, listener: Arc<dyn EndpointListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Applies one observed change of an endpoint.
    ///
    /// `old` is the previous value and `new` the current one; either may be
    /// absent for a create or a remove. A record that fails validation is
    /// logged and treated as absent, so a malformed update of a known
    /// endpoint removes it from every index.
    pub fn upsert(&self, old: Option<&EndpointRecord>, new: Option<&EndpointRecord>) {
        let old_ep = old.and_then(|r| Self::validate(r, "previous"));
        let new_ep = new.and_then(|r| Self::validate(r, "current"));

        let mut out = Notifications::default();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            match (old_ep, new_ep) {
                (Some(o), Some(n)) if o.key != n.key => {
                    state.apply(&o.key, None, &mut out);
                    let key = n.key.clone();
                    state.apply(&key, Some(n), &mut out);
                }
                (Some(o), None) => state.apply(&o.key, None, &mut out),
                (Some(_), Some(n)) => {
                    let key = n.key.clone();
                    state.apply(&key, Some(n), &mut out);
                }
                (None, Some(n)) => {
                    // A malformed previous value may still name a stored endpoint.
                    if let Some(stale) = old.and_then(Self::identity).filter(|k| k != &n.key) {
                        state.apply(&stale, None, &mut out);
                    }
                    let key = n.key.clone();
                    state.apply(&key, Some(n), &mut out);
                }
                (None, None) => {
                    // A malformed current value may still name a stored endpoint.
                    if let Some(key) = new.and_then(Self::identity) {
                        state.apply(&key, None, &mut out);
                    }
                }
            }
        }

        self.notify(out);
    }

    /// Removes an endpoint by key.
    pub fn remove(&self, key: &EpKey) {
        let mut out = Notifications::default();
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.apply(key, None, &mut out);
        }
        self.notify(out);
    }

    fn validate(record: &EndpointRecord, which: &str) -> Option<Endpoint> {
        match Endpoint::try_from(record) {
            Ok(ep) => Some(ep),
            Err(e) => {
                warn!(
                    "Ignoring {} endpoint value {:?}/{:?}: {}",
                    which, record.l2_context, record.mac_address, e
                );
                None
            }
        }
    }

    fn identity(record: &EndpointRecord) -> Option<EpKey> {
        match (&record.l2_context, record.mac_address) {
            (Some(l2), Some(mac)) => Some(EpKey::new(l2.clone(), mac)),
            _ => None,
        }
    }

    fn notify(&self, out: Notifications) {
        if out.endpoints.is_empty() {
            return;
        }
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for key in &out.endpoints {
            debug!("Endpoint updated: {}", key);
            for l in &listeners {
                l.endpoint_updated(key);
            }
        }
        for (device, key) in &out.devices {
            for l in &listeners {
                l.device_endpoint_updated(device, key);
            }
        }
        for (group, key) in &out.groups {
            for l in &listeners {
                l.group_endpoint_updated(group, key);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up one endpoint.
    pub fn endpoint(&self, key: &EpKey) -> Option<Endpoint> {
        self.read().endpoints.get(key).cloned()
    }

    /// Location of one endpoint, if it is known and located.
    pub fn location_of(&self, key: &EpKey) -> Option<EndpointLocation> {
        self.read()
            .endpoints
            .get(key)
            .and_then(|ep| ep.location.clone())
    }

    /// Number of endpoints stored, located or not.
    pub fn len(&self) -> usize {
        self.read().endpoints.len()
    }

    /// Returns true if no endpoint is stored.
    pub fn is_empty(&self) -> bool {
        self.read().endpoints.is_empty()
    }

    /// Devices currently hosting at least one endpoint.
    pub fn devices(&self) -> BTreeSet<DeviceId> {
        self.read().by_device.keys().cloned().collect()
    }

    /// Groups with at least one located endpoint anywhere.
    pub fn groups(&self) -> BTreeSet<EgKey> {
        self.read().by_group.keys().cloned().collect()
    }

    /// Devices having at least one endpoint in `group`.
    pub fn devices_for_group(&self, group: &EgKey) -> BTreeSet<DeviceId> {
        self.read()
            .by_device_group
            .iter()
            .filter(|(_, groups)| groups.contains_key(group))
            .map(|(device, _)| device.clone())
            .collect()
    }

    /// Groups present on `device`.
    pub fn groups_on_device(&self, device: &DeviceId) -> BTreeSet<EgKey> {
        self.read()
            .by_device_group
            .get(device)
            .map(|groups| groups.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Endpoints attached to `device`.
    pub fn endpoints_on_device(&self, device: &DeviceId) -> Vec<Endpoint> {
        let state = self.read();
        match state.by_device.get(device) {
            Some(keys) => state.collect(keys),
            None => Vec::new(),
        }
    }

    /// Endpoints attached to `device` that are members of `group`.
    pub fn endpoints_on_device_in_group(&self, device: &DeviceId, group: &EgKey) -> Vec<Endpoint> {
        let state = self.read();
        match state.by_device_group.get(device).and_then(|g| g.get(group)) {
            Some(keys) => state.collect(keys),
            None => Vec::new(),
        }
    }

    /// Located endpoints that are members of `group`.
    pub fn endpoints_in_group(&self, group: &EgKey) -> Vec<Endpoint> {
        let state = self.read();
        match state.by_group.get(group) {
            Some(keys) => state.collect(keys),
            None => Vec::new(),
        }
    }

    /// Endpoints known to the registry but not attached anywhere.
    pub fn unlocated_endpoints(&self) -> Vec<Endpoint> {
        let state = self.read();
        state.collect(&state.unlocated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ofoverlay_types::MacAddress;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl EndpointListener for Recorder {
        fn endpoint_updated(&self, key: &EpKey) {
            self.events.lock().unwrap().push(format!("ep({})", key.mac));
        }

        fn device_endpoint_updated(&self, device: &DeviceId, key: &EpKey) {
            self.events
                .lock()
                .unwrap()
                .push(format!("device({},{})", device, key.mac));
        }

        fn group_endpoint_updated(&self, group: &EgKey, key: &EpKey) {
            self.events
                .lock()
                .unwrap()
                .push(format!("group({},{})", group.group, key.mac));
        }
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0, 0, 0, 0, 0, last])
    }

    fn record(last: u8, device: &str, port: &str, group: &str) -> EndpointRecord {
        EndpointRecord::new("bd1", mac(last))
            .with_tenant("t1")
            .with_group(group)
            .with_location(device, port)
    }

    fn registry() -> (EndpointRegistry, Arc<Recorder>) {
        let registry = EndpointRegistry::new();
        let recorder = Arc::new(Recorder::default());
        registry.register_listener(recorder.clone());
        (registry, recorder)
    }

    #[test]
    fn test_create_indexes_everywhere() {
        let (reg, rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));

        let g = EgKey::new("t1", "web");
        let s1 = DeviceId::new("s1");
        assert_eq!(reg.devices_for_group(&g), BTreeSet::from([s1.clone()]));
        assert_eq!(reg.groups_on_device(&s1), BTreeSet::from([g.clone()]));
        assert_eq!(reg.endpoints_on_device(&s1).len(), 1);
        assert_eq!(reg.endpoints_on_device_in_group(&s1, &g).len(), 1);
        assert_eq!(reg.endpoints_in_group(&g).len(), 1);
        assert_eq!(
            rec.take(),
            vec!["ep(00:00:00:00:00:01)", "device(s1,00:00:00:00:00:01)", "group(web,00:00:00:00:00:01)"]
        );
    }

    #[test]
    fn test_move_fires_exact_events() {
        let (reg, rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));
        rec.take();

        let moved = record(1, "s2", "s2:4", "web");
        reg.upsert(Some(&a), Some(&moved));

        let g = EgKey::new("t1", "web");
        assert!(reg.endpoints_on_device(&DeviceId::new("s1")).is_empty());
        assert_eq!(reg.endpoints_on_device(&DeviceId::new("s2")).len(), 1);
        assert_eq!(reg.devices(), BTreeSet::from([DeviceId::new("s2")]));
        assert_eq!(reg.endpoints_in_group(&g).len(), 1);
        assert_eq!(
            rec.take(),
            vec![
                "ep(00:00:00:00:00:01)",
                "device(s1,00:00:00:00:00:01)",
                "device(s2,00:00:00:00:00:01)",
                "group(web,00:00:00:00:00:01)",
            ]
        );
    }

    #[test]
    fn test_port_change_fires_only_endpoint_event() {
        let (reg, rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));
        rec.take();

        let replugged = record(1, "s1", "s1:2", "web");
        reg.upsert(Some(&a), Some(&replugged));
        assert_eq!(rec.take(), vec!["ep(00:00:00:00:00:01)"]);

        let ep = reg.endpoint(&EpKey::new("bd1", mac(1))).unwrap();
        assert_eq!(ep.internal_port().map(|p| p.as_str()), Some("s1:2"));
    }

    #[test]
    fn test_group_change_on_same_device() {
        let (reg, rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));
        rec.take();

        let regrouped = record(1, "s1", "s1:1", "db");
        reg.upsert(Some(&a), Some(&regrouped));

        assert!(reg.endpoints_in_group(&EgKey::new("t1", "web")).is_empty());
        assert_eq!(reg.endpoints_in_group(&EgKey::new("t1", "db")).len(), 1);
        assert_eq!(
            rec.take(),
            vec![
                "ep(00:00:00:00:00:01)",
                "device(s1,00:00:00:00:00:01)",
                "group(db,00:00:00:00:00:01)",
                "group(web,00:00:00:00:00:01)",
            ]
        );
    }

    #[test]
    fn test_unlocated_tracked_separately() {
        let (reg, rec) = registry();
        let unlocated = EndpointRecord::new("bd1", mac(1))
            .with_tenant("t1")
            .with_group("web");
        reg.upsert(None, Some(&unlocated));

        assert_eq!(reg.unlocated_endpoints().len(), 1);
        assert!(reg.devices().is_empty());
        assert!(reg.groups().is_empty());
        assert_eq!(rec.take(), vec!["ep(00:00:00:00:00:01)"]);

        let located = record(1, "s1", "s1:1", "web");
        reg.upsert(Some(&unlocated), Some(&located));
        assert!(reg.unlocated_endpoints().is_empty());
        assert_eq!(reg.devices().len(), 1);
    }

    #[test]
    fn test_remove_prunes_empty_entries() {
        let (reg, _rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        let b = record(2, "s1", "s1:2", "db");
        reg.upsert(None, Some(&a));
        reg.upsert(None, Some(&b));

        reg.upsert(Some(&a), None);
        let s1 = DeviceId::new("s1");
        assert_eq!(reg.groups_on_device(&s1), BTreeSet::from([EgKey::new("t1", "db")]));
        assert!(reg.devices_for_group(&EgKey::new("t1", "web")).is_empty());

        reg.remove(&EpKey::new("bd1", mac(2)));
        assert!(reg.devices().is_empty());
        assert!(reg.groups().is_empty());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_malformed_new_value_removes_entry() {
        let (reg, _rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));

        let mut broken = a.clone();
        broken.tenant = None;
        reg.upsert(Some(&a), Some(&broken));

        assert!(reg.is_empty());
        assert!(reg.devices().is_empty());
    }

    #[test]
    fn test_malformed_old_value_with_new_key_removes_stale_entry() {
        let (reg, _rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));

        let mut broken = a.clone();
        broken.tenant = None;
        let renamed = record(9, "s2", "s2:1", "web");
        reg.upsert(Some(&broken), Some(&renamed));

        assert_eq!(reg.len(), 1);
        assert!(reg.endpoint(&EpKey::new("bd1", mac(1))).is_none());
        assert!(reg.endpoint(&EpKey::new("bd1", mac(9))).is_some());
        assert_eq!(reg.devices(), BTreeSet::from([DeviceId::new("s2")]));
        assert!(reg.endpoints_on_device(&DeviceId::new("s1")).is_empty());
    }

    #[test]
    fn test_malformed_create_is_ignored() {
        let (reg, rec) = registry();
        let broken = EndpointRecord::new("bd1", mac(1)).with_group("web");
        reg.upsert(None, Some(&broken));
        assert!(reg.is_empty());
        assert!(rec.take().is_empty());
    }

    #[test]
    fn test_key_change_is_remove_then_add() {
        let (reg, _rec) = registry();
        let a = record(1, "s1", "s1:1", "web");
        reg.upsert(None, Some(&a));

        let renamed = record(9, "s1", "s1:1", "web");
        reg.upsert(Some(&a), Some(&renamed));

        assert!(reg.endpoint(&EpKey::new("bd1", mac(1))).is_none());
        assert!(reg.endpoint(&EpKey::new("bd1", mac(9))).is_some());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_index_consistency() {
        let (reg, _rec) = registry();
        for (i, (device, group)) in [("s1", "web"), ("s1", "db"), ("s2", "web"), ("s3", "web")]
            .iter()
            .enumerate()
        {
            let r = record(i as u8 + 1, device, &format!("{}:{}", device, i + 1), group);
            reg.upsert(None, Some(&r));
        }

        for group in reg.groups() {
            let in_group: BTreeSet<EpKey> =
                reg.endpoints_in_group(&group).into_iter().map(|e| e.key).collect();
            let mut union = BTreeSet::new();
            for device in reg.devices() {
                let on_device: BTreeSet<EpKey> =
                    reg.endpoints_on_device(&device).into_iter().map(|e| e.key).collect();
                for ep in reg.endpoints_on_device_in_group(&device, &group) {
                    assert!(on_device.contains(&ep.key));
                    assert!(in_group.contains(&ep.key));
                    union.insert(ep.key);
                }
            }
            assert_eq!(union, in_group);
        }
    }
}
