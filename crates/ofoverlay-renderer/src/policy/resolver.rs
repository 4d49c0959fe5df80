//! Policy group resolution.

use super::types::ForwardingContext;
use ofoverlay_types::{EgKey, EndpointGroupId, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Resolves endpoint groups to forwarding contexts and contract peers.
pub trait PolicyResolver: Send + Sync {
    /// Forwarding ids of a group, or `None` if the group is unknown.
    fn forwarding_context(&self, group: &EgKey) -> Option<ForwardingContext>;

    /// Groups providing a contract `group` consumes.
    fn providers_for(&self, group: &EgKey) -> BTreeSet<EgKey>;

    /// Groups consuming a contract `group` provides.
    fn consumers_for(&self, group: &EgKey) -> BTreeSet<EgKey>;

    /// Every group `group` can exchange traffic with through a contract.
    fn peers(&self, group: &EgKey) -> BTreeSet<EgKey> {
        let mut peers = self.providers_for(group);
        peers.extend(self.consumers_for(group));
        peers
    }
}

/// Groups of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantPolicy {
    pub groups: BTreeMap<EndpointGroupId, ForwardingContext>,
}

/// A contract between two groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub provider: EgKey,
    pub consumer: EgKey,
}

/// Policy loaded from a static document.
///
/// ```yaml
/// tenants:
///   t1:
///     groups:
///       web: { bridge_domain: bd1, flood_domain: fd1, l3_context: l3c1 }
///       db:  { bridge_domain: bd1, flood_domain: fd1 }
/// contracts:
///   - provider: { tenant: t1, group: db }
///     consumer: { tenant: t1, group: web }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticPolicy {
    pub tenants: BTreeMap<TenantId, TenantPolicy>,
    pub contracts: Vec<Contract>,
}

impl StaticPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a group definition.
    pub fn with_group(mut self, group: EgKey, context: ForwardingContext) -> Self {
        self.tenants
            .entry(group.tenant)
            .or_default()
            .groups
            .insert(group.group, context);
        self
    }

    /// Adds a contract `consumer` -> `provider`.
    pub fn with_contract(mut self, provider: EgKey, consumer: EgKey) -> Self {
        self.contracts.push(Contract { provider, consumer });
        self
    }
}

impl PolicyResolver for StaticPolicy {
    fn forwarding_context(&self, group: &EgKey) -> Option<ForwardingContext> {
        self.tenants
            .get(&group.tenant)
            .and_then(|t| t.groups.get(&group.group))
            .cloned()
    }

    fn providers_for(&self, group: &EgKey) -> BTreeSet<EgKey> {
        self.contracts
            .iter()
            .filter(|c| &c.consumer == group)
            .map(|c| c.provider.clone())
            .collect()
    }

    fn consumers_for(&self, group: &EgKey) -> BTreeSet<EgKey> {
        self.contracts
            .iter()
            .filter(|c| &c.provider == group)
            .map(|c| c.consumer.clone())
            .collect()
    }
}
