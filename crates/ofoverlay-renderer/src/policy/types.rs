//! Policy resolution types.

use ofoverlay_types::{ContextId, L3ContextId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// A subnet of a group's network domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: ContextId,
    /// Gateway address answered by the virtual router.
    #[serde(default)]
    pub virtual_router_ip: Option<IpAddr>,
}

/// Forwarding ids an endpoint group resolves to.
///
/// Every field is optional: a group may be bound to a bridge domain with
/// no routing context, for instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardingContext {
    pub bridge_domain: Option<ContextId>,
    pub flood_domain: Option<ContextId>,
    pub l3_context: Option<L3ContextId>,
    pub subnets: Vec<Subnet>,
}

impl ForwardingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bridge_domain(mut self, id: impl Into<ContextId>) -> Self {
        self.bridge_domain = Some(id.into());
        self
    }

    pub fn with_flood_domain(mut self, id: impl Into<ContextId>) -> Self {
        self.flood_domain = Some(id.into());
        self
    }

    pub fn with_l3_context(mut self, id: impl Into<L3ContextId>) -> Self {
        self.l3_context = Some(id.into());
        self
    }

    pub fn with_subnet(mut self, id: impl Into<ContextId>, virtual_router_ip: Option<IpAddr>) -> Self {
        self.subnets.push(Subnet {
            id: id.into(),
            virtual_router_ip,
        });
        self
    }
}

/// Ordinals resolved for one endpoint group.
///
/// A forwarding id that could not be resolved contributes 0, which is
/// never handed out by an allocator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ForwardingOrdinals {
    pub eg: u32,
    pub bd: u32,
    pub fd: u32,
    pub l3: u32,
}

impl fmt::Display for ForwardingOrdinals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}|{}", self.eg, self.bd, self.fd, self.l3)
    }
}
