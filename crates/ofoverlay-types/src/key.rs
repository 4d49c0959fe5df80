//! Registry keys.

use crate::{EndpointGroupId, L2ContextId, MacAddress, TenantId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Policy group key: a group is only unique within its tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EgKey {
    pub tenant: TenantId,
    pub group: EndpointGroupId,
}

impl EgKey {
    pub fn new(tenant: impl Into<TenantId>, group: impl Into<EndpointGroupId>) -> Self {
        Self {
            tenant: tenant.into(),
            group: group.into(),
        }
    }
}

impl fmt::Display for EgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.tenant, self.group)
    }
}

/// Endpoint key: an endpoint is identified by its MAC within an L2 context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpKey {
    pub l2_context: L2ContextId,
    pub mac: MacAddress,
}

impl EpKey {
    pub fn new(l2_context: impl Into<L2ContextId>, mac: MacAddress) -> Self {
        Self {
            l2_context: l2_context.into(),
            mac,
        }
    }
}

impl fmt::Display for EpKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.l2_context, self.mac)
    }
}
