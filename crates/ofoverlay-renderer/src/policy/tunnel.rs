//! Device tunnel directory.

use ofoverlay_types::{DeviceId, PortId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

/// Knows each device's overlay tunnel endpoint.
pub trait TunnelDirectory: Send + Sync {
    /// Address other devices tunnel to when reaching `device`.
    fn tunnel_address(&self, device: &DeviceId) -> Option<IpAddr>;

    /// Port on `device` that overlay traffic leaves and enters through.
    fn tunnel_port(&self, device: &DeviceId) -> Option<PortId>;

    /// Uplink ports on `device` facing external networks.
    fn external_ports(&self, device: &DeviceId) -> Vec<PortId>;

    /// Devices that are connected and can be programmed.
    fn ready_devices(&self) -> BTreeSet<DeviceId>;
}

/// Tunnel configuration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelInfo {
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub port: Option<PortId>,
    #[serde(default)]
    pub external_ports: Vec<PortId>,
}

/// Tunnel directory loaded from a static document, keyed by device id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaticTunnels {
    devices: BTreeMap<DeviceId, TunnelInfo>,
}

impl StaticTunnels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device with its tunnel address and port.
    pub fn with_device(
        mut self,
        device: impl Into<DeviceId>,
        address: IpAddr,
        port: impl Into<PortId>,
    ) -> Self {
        self.devices.insert(
            device.into(),
            TunnelInfo {
                address: Some(address),
                port: Some(port.into()),
                external_ports: Vec::new(),
            },
        );
        self
    }

    /// Adds an external port to a device already present.
    pub fn with_external_port(mut self, device: &DeviceId, port: impl Into<PortId>) -> Self {
        if let Some(info) = self.devices.get_mut(device) {
            info.external_ports.push(port.into());
        }
        self
    }
}

impl TunnelDirectory for StaticTunnels {
    fn tunnel_address(&self, device: &DeviceId) -> Option<IpAddr> {
        self.devices.get(device).and_then(|info| info.address)
    }

    fn tunnel_port(&self, device: &DeviceId) -> Option<PortId> {
        self.devices.get(device).and_then(|info| info.port.clone())
    }

    fn external_ports(&self, device: &DeviceId) -> Vec<PortId> {
        self.devices
            .get(device)
            .map(|info| info.external_ports.clone())
            .unwrap_or_default()
    }

    fn ready_devices(&self) -> BTreeSet<DeviceId> {
        self.devices.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup() {
        let s1 = DeviceId::new("openflow:1");
        let tunnels = StaticTunnels::new()
            .with_device("openflow:1", "192.168.0.1".parse().unwrap(), "openflow:1:100")
            .with_external_port(&s1, "openflow:1:200");

        assert_eq!(tunnels.tunnel_address(&s1), Some("192.168.0.1".parse().unwrap()));
        assert_eq!(tunnels.tunnel_port(&s1), Some(PortId::new("openflow:1:100")));
        assert_eq!(tunnels.external_ports(&s1), vec![PortId::new("openflow:1:200")]);
        assert!(tunnels.tunnel_port(&DeviceId::new("openflow:2")).is_none());
        assert_eq!(tunnels.ready_devices(), BTreeSet::from([s1]));
    }

    #[test]
    fn test_yaml_document() {
        let yaml = r#"
"openflow:1":
  address: 192.168.0.1
  port: "openflow:1:100"
"openflow:2":
  port: "openflow:2:100"
"#;
        let tunnels: StaticTunnels = serde_yaml::from_str(yaml).unwrap();
        assert!(tunnels.tunnel_address(&DeviceId::new("openflow:2")).is_none());
        assert_eq!(tunnels.ready_devices().len(), 2);
    }
}
