//! Ordinal allocation for tenant-scoped contexts and devices.

use dashmap::DashMap;
use ofoverlay_types::{ContextId, DeviceId, TenantId};
use std::sync::atomic::{AtomicU32, Ordering};

/// Largest ordinal an allocator may hand out.
///
/// Ordinals are carried in 32-bit registers and remote bucket ids reserve
/// bit 31, so only the low 31 bits are usable.
pub const MAX_ORDINAL: u32 = 0x7fff_ffff;

/// Assigns small stable integers to forwarding contexts and devices.
///
/// An ordinal, once returned, stays the same for the lifetime of the
/// context. Zero is never returned.
pub trait OrdinalAllocator: Send + Sync {
    /// Ordinal of a tenant-scoped context (group, bridge domain, flood
    /// domain or L3 context).
    fn context_ordinal(&self, tenant: &TenantId, context: &ContextId) -> Option<u32>;

    /// Ordinal of a device, used to encode remote group buckets.
    fn device_ordinal(&self, device: &DeviceId) -> Option<u32>;
}

/// In-memory allocator handing out ordinals from 1 upward.
///
/// Contexts and devices share one counter so no two objects ever get the
/// same ordinal.
#[derive(Debug)]
pub struct OrdinalTable {
    contexts: DashMap<String, u32>,
    devices: DashMap<DeviceId, u32>,
    next: AtomicU32,
}

impl Default for OrdinalTable {
    fn default() -> Self {
        Self {
            contexts: DashMap::new(),
            devices: DashMap::new(),
            next: AtomicU32::new(1),
        }
    }
}

impl OrdinalTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn context_key(tenant: &TenantId, context: &ContextId) -> String {
        format!("{}|{}", tenant, context)
    }

    fn allocate(&self) -> Option<u32> {
        let ordinal = self.next.fetch_add(1, Ordering::SeqCst);
        if ordinal == 0 || ordinal > MAX_ORDINAL {
            log::error!("Ordinal space exhausted");
            return None;
        }
        Some(ordinal)
    }

    /// Pins a device to a known ordinal, e.g. one loaded from a snapshot.
    pub fn assign_device(&self, device: DeviceId, ordinal: u32) {
        self.devices.insert(device, ordinal);
        self.next.fetch_max(ordinal.saturating_add(1), Ordering::SeqCst);
    }

    /// Pins a context to a known ordinal.
    pub fn assign_context(&self, tenant: &TenantId, context: &ContextId, ordinal: u32) {
        self.contexts
            .insert(Self::context_key(tenant, context), ordinal);
        self.next.fetch_max(ordinal.saturating_add(1), Ordering::SeqCst);
    }

    /// Number of ordinals handed out or pinned.
    pub fn len(&self) -> usize {
        self.contexts.len() + self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrdinalAllocator for OrdinalTable {
    fn context_ordinal(&self, tenant: &TenantId, context: &ContextId) -> Option<u32> {
        let key = Self::context_key(tenant, context);
        if let Some(ordinal) = self.contexts.get(&key) {
            return Some(*ordinal);
        }
        // The entry guard serializes concurrent first lookups of one key.
        match self.contexts.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(e) => Some(*e.get()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let ordinal = self.allocate()?;
                e.insert(ordinal);
                Some(ordinal)
            }
        }
    }

    fn device_ordinal(&self, device: &DeviceId) -> Option<u32> {
        if let Some(ordinal) = self.devices.get(device) {
            return Some(*ordinal);
        }
        match self.devices.entry(device.clone()) {
            dashmap::mapref::entry::Entry::Occupied(e) => Some(*e.get()),
            dashmap::mapref::entry::Entry::Vacant(e) => {
                let ordinal = self.allocate()?;
                e.insert(ordinal);
                Some(ordinal)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_stable_and_nonzero() {
        let table = OrdinalTable::new();
        let t = TenantId::new("t1");
        let a = table.context_ordinal(&t, &ContextId::new("web")).unwrap();
        let b = table.context_ordinal(&t, &ContextId::new("db")).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.context_ordinal(&t, &ContextId::new("web")), Some(a));
    }

    #[test]
    fn test_tenant_scoped() {
        let table = OrdinalTable::new();
        let a = table
            .context_ordinal(&TenantId::new("t1"), &ContextId::new("web"))
            .unwrap();
        let b = table
            .context_ordinal(&TenantId::new("t2"), &ContextId::new("web"))
            .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_assigned_device_bumps_counter() {
        let table = OrdinalTable::new();
        table.assign_device(DeviceId::new("openflow:2"), 7);
        assert_eq!(table.device_ordinal(&DeviceId::new("openflow:2")), Some(7));
        assert_eq!(table.device_ordinal(&DeviceId::new("openflow:3")), Some(8));
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let table = OrdinalTable::new();
        table.assign_device(DeviceId::new("openflow:1"), MAX_ORDINAL);
        assert_eq!(table.device_ordinal(&DeviceId::new("openflow:2")), None);
    }

    #[test]
    fn test_concurrent_first_lookup() {
        let table = Arc::new(OrdinalTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    table.context_ordinal(&TenantId::new("t1"), &ContextId::new("fd1"))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(results.iter().all(|r| *r == results[0]));
        assert_eq!(table.len(), 1);
    }
}
