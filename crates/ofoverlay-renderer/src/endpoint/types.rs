//! Endpoint types and data structures.

use ofoverlay_types::{
    DeviceId, EgKey, EndpointGroupId, EpKey, L2ContextId, L3ContextId, MacAddress, PortId,
    TenantId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

/// Error type for endpoint validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("endpoint has no tenant")]
    MissingTenant,
    #[error("endpoint has no endpoint group")]
    MissingGroup,
    #[error("endpoint has no L2 context")]
    MissingL2Context,
    #[error("endpoint has no MAC address")]
    MissingMacAddress,
}

/// Whether an endpoint sits behind an internal port or an external network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationType {
    #[default]
    Internal,
    External,
}

/// An L3 address an endpoint owns, scoped to an L3 context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct L3Address {
    pub l3_context: L3ContextId,
    pub ip_address: IpAddr,
}

/// Location as reported by the change-notification adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(default)]
    pub node_id: Option<DeviceId>,
    #[serde(default)]
    pub node_connector_id: Option<PortId>,
    #[serde(default)]
    pub location_type: LocationType,
}

/// Endpoint as delivered by the change-notification adapter.
///
/// Every field is optional on the wire; [`Endpoint::try_from`] decides
/// whether the record can be indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointRecord {
    #[serde(default)]
    pub l2_context: Option<L2ContextId>,
    #[serde(default)]
    pub mac_address: Option<MacAddress>,
    #[serde(default)]
    pub tenant: Option<TenantId>,
    #[serde(default)]
    pub endpoint_group: Option<EndpointGroupId>,
    #[serde(default)]
    pub endpoint_groups: Vec<EndpointGroupId>,
    #[serde(default)]
    pub l3_addresses: Vec<L3Address>,
    #[serde(default)]
    pub location: Option<LocationRecord>,
}

impl EndpointRecord {
    /// Creates a record with its identity set.
    pub fn new(l2_context: impl Into<L2ContextId>, mac: MacAddress) -> Self {
        Self {
            l2_context: Some(l2_context.into()),
            mac_address: Some(mac),
            ..Default::default()
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<TenantId>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<EndpointGroupId>) -> Self {
        self.endpoint_group = Some(group.into());
        self
    }

    pub fn with_extra_group(mut self, group: impl Into<EndpointGroupId>) -> Self {
        self.endpoint_groups.push(group.into());
        self
    }

    pub fn with_l3_address(mut self, l3_context: impl Into<L3ContextId>, ip: IpAddr) -> Self {
        self.l3_addresses.push(L3Address {
            l3_context: l3_context.into(),
            ip_address: ip,
        });
        self
    }

    pub fn with_location(mut self, device: impl Into<DeviceId>, port: impl Into<PortId>) -> Self {
        self.location = Some(LocationRecord {
            node_id: Some(device.into()),
            node_connector_id: Some(port.into()),
            location_type: LocationType::Internal,
        });
        self
    }

    pub fn with_external_location(mut self, device: impl Into<DeviceId>) -> Self {
        self.location = Some(LocationRecord {
            node_id: Some(device.into()),
            node_connector_id: None,
            location_type: LocationType::External,
        });
        self
    }
}

/// Where a located endpoint is attached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointLocation {
    pub device: DeviceId,
    pub port: Option<PortId>,
    pub location_type: LocationType,
}

impl EndpointLocation {
    /// Returns true if traffic can be delivered straight to a device port.
    pub fn is_internal(&self) -> bool {
        self.location_type == LocationType::Internal
    }
}

/// A validated endpoint, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub key: EpKey,
    pub tenant: TenantId,
    /// Primary group, used for source classification.
    pub group: EndpointGroupId,
    /// All groups the endpoint is a member of, including the primary one.
    pub groups: BTreeSet<EndpointGroupId>,
    pub l3_addresses: Vec<L3Address>,
    pub location: Option<EndpointLocation>,
}

impl Endpoint {
    pub fn mac(&self) -> MacAddress {
        self.key.mac
    }

    /// Key of the primary group.
    pub fn eg_key(&self) -> EgKey {
        EgKey {
            tenant: self.tenant.clone(),
            group: self.group.clone(),
        }
    }

    /// Keys of every group the endpoint is a member of.
    pub fn eg_keys(&self) -> BTreeSet<EgKey> {
        self.groups
            .iter()
            .map(|group| EgKey {
                tenant: self.tenant.clone(),
                group: group.clone(),
            })
            .collect()
    }

    /// Device the endpoint is attached to, if located.
    pub fn device(&self) -> Option<&DeviceId> {
        self.location.as_ref().map(|loc| &loc.device)
    }

    /// Port of an internal endpoint, if known.
    pub fn internal_port(&self) -> Option<&PortId> {
        self.location
            .as_ref()
            .filter(|loc| loc.is_internal())
            .and_then(|loc| loc.port.as_ref())
    }
}

impl TryFrom<&EndpointRecord> for Endpoint {
    type Error = EndpointError;

    fn try_from(record: &EndpointRecord) -> Result<Self, Self::Error> {
        let tenant = record.tenant.clone().ok_or(EndpointError::MissingTenant)?;
        let l2_context = record
            .l2_context
            .clone()
            .ok_or(EndpointError::MissingL2Context)?;
        let mac = record.mac_address.ok_or(EndpointError::MissingMacAddress)?;

        let mut groups: BTreeSet<EndpointGroupId> = record.endpoint_groups.iter().cloned().collect();
        let group = match &record.endpoint_group {
            Some(group) => group.clone(),
            None => groups
                .iter()
                .next()
                .cloned()
                .ok_or(EndpointError::MissingGroup)?,
        };
        groups.insert(group.clone());

        let location = record.location.as_ref().and_then(|loc| {
            loc.node_id.clone().map(|device| EndpointLocation {
                device,
                port: loc.node_connector_id.clone(),
                location_type: loc.location_type,
            })
        });

        Ok(Endpoint {
            key: EpKey::new(l2_context, mac),
            tenant,
            group,
            groups,
            l3_addresses: record.l3_addresses.clone(),
            location,
        })
    }
}
