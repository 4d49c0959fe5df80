//! Flow records as read from and written to a device table.
//!
//! The shape here is the wire contract: records read back from a device
//! are matched purely by [`FlowRecord::id`], so id formats must never
//! change for a rule whose content has not changed.

use ofoverlay_types::{MacAddress, PortId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Ethertype of ARP.
pub const ETHERTYPE_ARP: u16 = 0x0806;
/// Ethertype of IPv4.
pub const ETHERTYPE_IPV4: u16 = 0x0800;
/// Ethertype of IPv6.
pub const ETHERTYPE_IPV6: u16 = 0x86dd;

pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

/// Condition group value meaning "no conditions".
pub const NO_CONDITIONS: u32 = 0x00ff_ffff;

/// Pipeline metadata registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Register {
    /// reg0: source endpoint group ordinal
    SourceGroup,
    /// reg1: source condition group
    SourceConditions,
    /// reg2: destination endpoint group ordinal
    DestinationGroup,
    /// reg3: destination condition group
    DestinationConditions,
    /// reg4: bridge domain ordinal
    BridgeDomain,
    /// reg5: flood domain ordinal
    FloodDomain,
    /// reg6: L3 context ordinal
    L3Context,
    /// reg7: next-hop port number
    NextHopPort,
}

impl Register {
    /// Hardware register index.
    pub fn index(self) -> u8 {
        match self {
            Register::SourceGroup => 0,
            Register::SourceConditions => 1,
            Register::DestinationGroup => 2,
            Register::DestinationConditions => 3,
            Register::BridgeDomain => 4,
            Register::FloodDomain => 5,
            Register::L3Context => 6,
            Register::NextHopPort => 7,
        }
    }
}

/// Layer 3 part of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer3Match {
    Ipv4Source(Ipv4Addr),
    Ipv6Source(Ipv6Addr),
    /// ARP sender protocol address
    ArpSource(Ipv4Addr),
    /// ARP target protocol address
    ArpTarget(Ipv4Addr),
    Ipv4Destination(Ipv4Addr),
    Ipv6Destination(Ipv6Addr),
}

impl Layer3Match {
    /// Source-address match for `ip`, with the ethertype it implies.
    pub fn source(ip: IpAddr) -> (Self, u16) {
        match ip {
            IpAddr::V4(v4) => (Layer3Match::Ipv4Source(v4), ETHERTYPE_IPV4),
            IpAddr::V6(v6) => (Layer3Match::Ipv6Source(v6), ETHERTYPE_IPV6),
        }
    }

    /// Destination-address match for `ip`, with the ethertype it implies.
    pub fn destination(ip: IpAddr) -> (Self, u16) {
        match ip {
            IpAddr::V4(v4) => (Layer3Match::Ipv4Destination(v4), ETHERTYPE_IPV4),
            IpAddr::V6(v6) => (Layer3Match::Ipv6Destination(v6), ETHERTYPE_IPV6),
        }
    }
}

/// Match fields of a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_port: Option<PortId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_src: Option<MacAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_dst: Option<MacAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eth_dst_mask: Option<MacAddress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ethertype: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layer3: Option<Layer3Match>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arp_op: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tunnel_id: Option<u64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub registers: BTreeMap<Register, u32>,
}

impl FlowMatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_port(mut self, port: PortId) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn eth_src(mut self, mac: MacAddress) -> Self {
        self.eth_src = Some(mac);
        self
    }

    pub fn eth_dst(mut self, mac: MacAddress) -> Self {
        self.eth_dst = Some(mac);
        self
    }

    pub fn eth_dst_masked(mut self, mac: MacAddress, mask: MacAddress) -> Self {
        self.eth_dst = Some(mac);
        self.eth_dst_mask = Some(mask);
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = Some(ethertype);
        self
    }

    pub fn layer3(mut self, l3: Layer3Match) -> Self {
        self.layer3 = Some(l3);
        self
    }

    pub fn arp_op(mut self, op: u16) -> Self {
        self.arp_op = Some(op);
        self
    }

    pub fn tunnel_id(mut self, id: u64) -> Self {
        self.tunnel_id = Some(id);
        self
    }

    pub fn register(mut self, reg: Register, value: u32) -> Self {
        self.registers.insert(reg, value);
        self
    }
}

/// A single flow action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Output(PortId),
    LoadRegister { reg: Register, value: u32 },
    SetTunnelIpv4Destination(Ipv4Addr),
    MoveRegisterToTunnelId { reg: Register },
    SetEthSrc(MacAddress),
    SetEthDst(MacAddress),
    DecTtl,
    /// Copies the source MAC into the destination MAC.
    MoveEthSrcToEthDst,
    SetArpOp(u16),
    /// Copies the ARP sender hardware address into the target one.
    MoveArpShaToTha,
    SetArpSha(MacAddress),
    /// Copies the ARP sender protocol address into the target one.
    MoveArpSpaToTpa,
    SetArpSpa(Ipv4Addr),
    /// Sends the packet back out the port it arrived on.
    OutputInPort,
    Group(u32),
    Drop,
}

/// A flow instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    ApplyActions(Vec<Action>),
    GotoTable(u8),
}

/// One flow entry of one device table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    /// Deterministic identity derived from the fields that decide content.
    pub id: String,
    pub table_id: u8,
    pub priority: u16,
    #[serde(rename = "match")]
    pub flow_match: FlowMatch,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub idle_timeout: u16,
    #[serde(default)]
    pub hard_timeout: u16,
}

impl FlowRecord {
    /// Creates a permanent flow with no instructions.
    pub fn new(id: impl Into<String>, table_id: u8, priority: u16, flow_match: FlowMatch) -> Self {
        Self {
            id: id.into(),
            table_id,
            priority,
            flow_match,
            instructions: Vec::new(),
            idle_timeout: 0,
            hard_timeout: 0,
        }
    }

    /// Appends an apply-actions instruction.
    pub fn apply(mut self, actions: Vec<Action>) -> Self {
        self.instructions.push(Instruction::ApplyActions(actions));
        self
    }

    /// Appends a goto-table instruction.
    pub fn goto(mut self, table_id: u8) -> Self {
        self.instructions.push(Instruction::GotoTable(table_id));
        self
    }
}

/// Id of the drop rule for `ethertype`, or of the catch-all when `None`.
pub fn drop_flow_id(ethertype: Option<u16>) -> String {
    match ethertype {
        Some(et) => format!("drop|{}", et),
        None => "drop|null".to_string(),
    }
}

/// A drop rule, optionally limited to one ethertype.
pub fn drop_flow(table_id: u8, priority: u16, ethertype: Option<u16>) -> FlowRecord {
    let flow_match = match ethertype {
        Some(et) => FlowMatch::new().ethertype(et),
        None => FlowMatch::new(),
    };
    FlowRecord::new(drop_flow_id(ethertype), table_id, priority, flow_match)
        .apply(vec![Action::Drop])
}
