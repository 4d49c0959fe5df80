//! String identifiers for devices, ports and policy objects.
//!
//! All identifiers are opaque strings assigned by the controller's data
//! store. They are ordered so that anything iterating over them (rule
//! generation, bucket layout) is deterministic.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            pub fn new(value: impl Into<String>) -> Self {
                $name(value.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                $name(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                $name(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a forwarding element (e.g. `openflow:1`).
    DeviceId
);

string_id!(
    /// Identifier of a node connector (e.g. `openflow:1:3`).
    PortId
);

string_id!(
    /// Tenant identifier.
    TenantId
);

string_id!(
    /// Endpoint group identifier, unique within a tenant.
    EndpointGroupId
);

string_id!(
    /// Layer 2 context (bridge or flood domain) an endpoint MAC lives in.
    L2ContextId
);

string_id!(
    /// Layer 3 context an endpoint address lives in.
    L3ContextId
);

string_id!(
    /// Any tenant-scoped forwarding context that can be given an ordinal:
    /// endpoint groups, bridge domains, flood domains and L3 contexts.
    ContextId
);

impl PortId {
    /// Returns the OpenFlow port number, the numeric segment after the last `:`.
    ///
    /// ```
    /// use ofoverlay_types::PortId;
    ///
    /// assert_eq!(PortId::new("openflow:1:3").port_number(), Ok(3));
    /// assert_eq!(PortId::new("7").port_number(), Ok(7));
    /// assert!(PortId::new("openflow:1:LOCAL").port_number().is_err());
    /// ```
    pub fn port_number(&self) -> Result<u32, ParseError> {
        let tail = self.0.rsplit(':').next().unwrap_or(&self.0);
        tail.parse::<u32>()
            .map_err(|_| ParseError::InvalidPortNumber(self.0.clone()))
    }
}

impl From<&EndpointGroupId> for ContextId {
    fn from(id: &EndpointGroupId) -> Self {
        ContextId(id.0.clone())
    }
}

impl From<&L2ContextId> for ContextId {
    fn from(id: &L2ContextId) -> Self {
        ContextId(id.0.clone())
    }
}

impl From<&L3ContextId> for ContextId {
    fn from(id: &L3ContextId) -> Self {
        ContextId(id.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_port_number() {
        assert_eq!(PortId::new("openflow:1:3").port_number(), Ok(3));
        assert_eq!(PortId::new("openflow:12:4294967295").port_number(), Ok(u32::MAX));
        assert_eq!(
            PortId::new("openflow:1:").port_number(),
            Err(ParseError::InvalidPortNumber("openflow:1:".to_string()))
        );
    }

    #[test]
    fn test_display_is_raw_value() {
        assert_eq!(DeviceId::new("openflow:1").to_string(), "openflow:1");
        assert_eq!(TenantId::from("t1").as_str(), "t1");
    }

    #[test]
    fn test_serde_transparent() {
        let id: DeviceId = serde_json::from_str("\"openflow:9\"").unwrap();
        assert_eq!(id, DeviceId::new("openflow:9"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"openflow:9\"");
    }

    #[test]
    fn test_context_conversion() {
        let group = EndpointGroupId::new("web");
        assert_eq!(ContextId::from(&group), ContextId::new("web"));
    }

    #[test]
    fn test_ordering() {
        let mut ids = vec![DeviceId::new("openflow:2"), DeviceId::new("openflow:1")];
        ids.sort();
        assert_eq!(ids, vec![DeviceId::new("openflow:1"), DeviceId::new("openflow:2")]);
    }
}
