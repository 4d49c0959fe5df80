//! Common types for the OpenFlow overlay renderer.
//!
//! This crate provides the value types shared by the endpoint registry,
//! the table synchronizers and the policy collaborators:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses
//! - [`DeviceId`], [`PortId`]: forwarding element and node-connector identifiers
//! - [`TenantId`], [`EndpointGroupId`], [`L2ContextId`], [`L3ContextId`],
//!   [`ContextId`]: policy object identifiers
//! - [`EgKey`], [`EpKey`]: the keys the endpoint registry indexes by

mod id;
mod key;
mod mac;

pub use id::{
    ContextId, DeviceId, EndpointGroupId, L2ContextId, L3ContextId, PortId, TenantId,
};
pub use key::{EgKey, EpKey};
pub use mac::MacAddress;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid port number in node connector id: {0}")]
    InvalidPortNumber(String),
}
