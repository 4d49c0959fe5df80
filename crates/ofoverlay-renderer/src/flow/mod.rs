//! Flow pipeline.
//!
//! Four stages, each owning one device table:
//!
//! | Stage | Table | Job |
//! |-------|-------|-----|
//! | 0 | [`PortSecurity`] | default-deny plus per-endpoint allows |
//! | 1 | [`SourceMapper`] | tag traffic with source policy ordinals |
//! | 2 | [`DestinationMapper`] | pick the next hop, local port or tunnel |
//! | 3 | [`PolicyEnforcer`] | contract enforcement (not rendered) |

mod destination_mapper;
mod policy_enforcer;
mod port_security;
mod source_mapper;
mod table;
mod types;

pub use destination_mapper::DestinationMapper;
pub use policy_enforcer::PolicyEnforcer;
pub use port_security::PortSecurity;
pub use source_mapper::SourceMapper;
pub use table::{FlowTable, FlowTableSynchronizer, FlowWriter};
pub use types::{
    drop_flow, drop_flow_id, Action, FlowMatch, FlowRecord, Instruction, Layer3Match, Register,
    ARP_OP_REPLY, ARP_OP_REQUEST, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6, NO_CONDITIONS,
};
