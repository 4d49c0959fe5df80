//! Destination mapper: resolves the next hop of traffic towards every
//! endpoint the device's local groups can reach.
//!
//! The groups covered on a device are the groups with a local member plus
//! every contract peer of those groups. For each member endpoint of a
//! covered group one L2 rule (and one L3 rule per address) selects either
//! the local port or the tunnel towards the endpoint's device. Each
//! covered flood domain also gets a broadcast rule that hands multicast
//! frames to the flood group, and each subnet with an IPv4 virtual router
//! gets a rule answering ARP requests for the gateway address.

use super::table::{FlowTable, FlowWriter};
use super::types::{
    drop_flow, Action, FlowMatch, FlowRecord, Layer3Match, Register, ARP_OP_REPLY, ARP_OP_REQUEST,
    ETHERTYPE_ARP, NO_CONDITIONS,
};
use crate::config::TableIds;
use crate::context::RendererContext;
use crate::endpoint::Endpoint;
use crate::policy::{ForwardingOrdinals, Subnet};
use log::{error, warn};
use ofoverlay_sync_common::{Dirty, TaskError, TaskResult};
use ofoverlay_types::{ContextId, DeviceId, EgKey, EpKey, MacAddress};
use std::collections::BTreeSet;
use std::net::IpAddr;

const PRIORITY_DROP: u16 = 1;
const PRIORITY_L2: u16 = 50;
const PRIORITY_L3: u16 = 132;
const PRIORITY_BROADCAST: u16 = 140;
const PRIORITY_ROUTER_ARP: u16 = 150;

/// Multicast bit of the first octet.
const MULTICAST_MAC: MacAddress = MacAddress::new([0x01, 0, 0, 0, 0, 0]);

/// Where traffic to one endpoint is sent.
#[derive(Debug)]
struct NextHop {
    /// Port id for local delivery, tunnel address for remote delivery.
    descriptor: String,
    /// Actions shared by the L2 and L3 rules.
    actions: Vec<Action>,
    local: bool,
}

/// Stage 2.
#[derive(Debug, Clone)]
pub struct DestinationMapper {
    table_id: u8,
    next_table: u8,
}

impl DestinationMapper {
    pub const NAME: &'static str = "DestinationMapper";

    pub fn new(tables: &TableIds) -> Self {
        Self {
            table_id: tables.destination_mapper,
            next_table: tables.policy_enforcer,
        }
    }

    /// Local groups plus every contract peer of a local group.
    fn covered_groups(ctx: &RendererContext, device: &DeviceId) -> BTreeSet<EgKey> {
        let mut covered = BTreeSet::new();
        for group in ctx.registry.groups_on_device(device) {
            covered.extend(ctx.policy.peers(&group));
            covered.insert(group);
        }
        covered
    }

    fn next_hop(
        &self,
        ctx: &RendererContext,
        device: &DeviceId,
        ep: &Endpoint,
        ords: &ForwardingOrdinals,
    ) -> TaskResult<NextHop> {
        let location = ep
            .location
            .as_ref()
            .ok_or_else(|| TaskError::unresolved(format!("location of {}", ep.key)))?;
        if !location.is_internal() {
            return Err(TaskError::unsupported("external endpoint location"));
        }

        if &location.device == device {
            let port = location
                .port
                .as_ref()
                .ok_or_else(|| TaskError::unresolved(format!("port of {}", ep.key)))?;
            let port_number = port
                .port_number()
                .map_err(|e| TaskError::invalid_entry(e.to_string()))?;
            return Ok(NextHop {
                descriptor: port.to_string(),
                actions: vec![
                    Action::LoadRegister {
                        reg: Register::DestinationGroup,
                        value: ords.eg,
                    },
                    Action::LoadRegister {
                        reg: Register::DestinationConditions,
                        value: NO_CONDITIONS,
                    },
                    Action::LoadRegister {
                        reg: Register::NextHopPort,
                        value: port_number,
                    },
                ],
                local: true,
            });
        }

        let address = ctx
            .tunnels
            .tunnel_address(&location.device)
            .ok_or_else(|| TaskError::unresolved(format!("tunnel address of {}", location.device)))?;
        let IpAddr::V4(address) = address else {
            return Err(TaskError::invalid_entry(format!(
                "IPv6 tunnel endpoint {} of {}",
                address, location.device
            )));
        };
        let tunnel_port = ctx
            .tunnels
            .tunnel_port(device)
            .ok_or_else(|| TaskError::unresolved(format!("tunnel port of {}", device)))?;
        let port_number = tunnel_port
            .port_number()
            .map_err(|e| TaskError::invalid_entry(e.to_string()))?;

        Ok(NextHop {
            descriptor: address.to_string(),
            actions: vec![
                Action::MoveRegisterToTunnelId {
                    reg: Register::SourceGroup,
                },
                Action::SetTunnelIpv4Destination(address),
                Action::LoadRegister {
                    reg: Register::DestinationGroup,
                    value: ords.eg,
                },
                Action::LoadRegister {
                    reg: Register::DestinationConditions,
                    value: NO_CONDITIONS,
                },
                Action::LoadRegister {
                    reg: Register::NextHopPort,
                    value: port_number,
                },
            ],
            local: false,
        })
    }

    fn endpoint_rules(
        &self,
        ctx: &RendererContext,
        ep: &Endpoint,
        ords: &ForwardingOrdinals,
        hop: &NextHop,
        writer: &mut FlowWriter,
    ) {
        let mac = ep.mac();
        writer.write_with(format!("{}|l2|{}|{}", ords.bd, mac, hop.descriptor), |id| {
            FlowRecord::new(
                id,
                self.table_id,
                PRIORITY_L2,
                FlowMatch::new()
                    .eth_dst(mac)
                    .register(Register::BridgeDomain, ords.bd),
            )
            .apply(hop.actions.clone())
            .goto(self.next_table)
        });

        let router_mac = ctx.config.router_mac;
        for addr in &ep.l3_addresses {
            let Some(l3) = ctx
                .ordinals
                .context_ordinal(&ep.tenant, &ContextId::from(&addr.l3_context))
            else {
                warn!("{}: no ordinal for L3 context {}", Self::NAME, addr.l3_context);
                continue;
            };
            let ip = addr.ip_address;
            let (layer3, ethertype) = Layer3Match::destination(ip);
            let prefix = if ip.is_ipv4() { 32 } else { 128 };

            let id = format!("{}|l3|{}/{}|{}", addr.l3_context, ip, prefix, hop.descriptor);
            writer.write_with(id, |id| {
                let mut actions = hop.actions.clone();
                actions.push(Action::SetEthSrc(router_mac));
                if hop.local {
                    actions.push(Action::SetEthDst(mac));
                }
                actions.push(Action::DecTtl);

                FlowRecord::new(
                    id,
                    self.table_id,
                    PRIORITY_L3,
                    FlowMatch::new()
                        .eth_dst(router_mac)
                        .ethertype(ethertype)
                        .layer3(layer3)
                        .register(Register::L3Context, l3),
                )
                .apply(actions)
                .goto(self.next_table)
            });
        }
    }

    fn broadcast_rule(&self, fd: u32, writer: &mut FlowWriter) {
        writer.write_with(format!("broadcast|{}", fd), |id| {
            FlowRecord::new(
                id,
                self.table_id,
                PRIORITY_BROADCAST,
                FlowMatch::new()
                    .eth_dst_masked(MULTICAST_MAC, MULTICAST_MAC)
                    .register(Register::FloodDomain, fd),
            )
            .apply(vec![
                Action::MoveRegisterToTunnelId {
                    reg: Register::SourceGroup,
                },
                Action::Group(fd),
            ])
        });
    }

    /// Answers ARP requests for the subnet's gateway with the router MAC.
    fn router_arp_rule(&self, ctx: &RendererContext, subnet: &Subnet, l3: u32, writer: &mut FlowWriter) {
        let Some(router_ip) = subnet.virtual_router_ip else {
            return;
        };
        let IpAddr::V4(router_ip) = router_ip else {
            warn!(
                "{}: IPv6 virtual router {} of subnet {} not supported",
                Self::NAME,
                router_ip,
                subnet.id
            );
            return;
        };

        let router_mac = ctx.config.router_mac;
        writer.write_with(format!("routerarp|{}|{}|{}", subnet.id, router_ip, l3), |id| {
            FlowRecord::new(
                id,
                self.table_id,
                PRIORITY_ROUTER_ARP,
                FlowMatch::new()
                    .ethertype(ETHERTYPE_ARP)
                    .layer3(Layer3Match::ArpTarget(router_ip))
                    .arp_op(ARP_OP_REQUEST)
                    .register(Register::L3Context, l3),
            )
            .apply(vec![
                Action::MoveEthSrcToEthDst,
                Action::SetEthSrc(router_mac),
                Action::SetArpOp(ARP_OP_REPLY),
                Action::MoveArpShaToTha,
                Action::SetArpSha(router_mac),
                Action::MoveArpSpaToTpa,
                Action::SetArpSpa(router_ip),
                Action::OutputInPort,
            ])
        });
    }
}

impl FlowTable for DestinationMapper {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> u8 {
        2
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn sync(&self, ctx: &RendererContext, device: &DeviceId, _dirty: &Dirty, writer: &mut FlowWriter) {
        writer.write(drop_flow(self.table_id, PRIORITY_DROP, None));

        let mut visited_fds: BTreeSet<u32> = BTreeSet::new();
        let mut visited_eps: BTreeSet<EpKey> = BTreeSet::new();

        for group in Self::covered_groups(ctx, device) {
            let ords = match ctx.forwarding_ordinals(&group) {
                Ok(ords) => ords,
                Err(e) => {
                    warn!("{}: skipping group {} on {}: {}", Self::NAME, group, device, e);
                    continue;
                }
            };
            if ords.fd != 0 && visited_fds.insert(ords.fd) {
                self.broadcast_rule(ords.fd, writer);
            }
            if let Some(fwd) = ctx.policy.forwarding_context(&group) {
                for subnet in &fwd.subnets {
                    self.router_arp_rule(ctx, subnet, ords.l3, writer);
                }
            }

            for ep in ctx.registry.endpoints_in_group(&group) {
                if !visited_eps.insert(ep.key.clone()) {
                    continue;
                }
                let rendered = ctx
                    .forwarding_ordinals(&ep.eg_key())
                    .and_then(|ords| self.next_hop(ctx, device, &ep, &ords).map(|hop| (ords, hop)));
                match rendered {
                    Ok((ords, hop)) => self.endpoint_rules(ctx, &ep, &ords, &hop, writer),
                    Err(e @ TaskError::InvalidEntry { .. }) => {
                        error!("{}: cannot reach {} from {}: {}", Self::NAME, ep.key, device, e)
                    }
                    Err(e) => warn!("{}: skipping {} on {}: {}", Self::NAME, ep.key, device, e),
                }
            }
        }
    }
}
