//! Port security: default-deny ingress with per-endpoint allows.
//!
//! | Rule | Id | Priority |
//! |------|----|----------|
//! | catch-all drop | `drop|null` | 1 |
//! | ARP / IPv4 / IPv6 drop | `drop|<ethertype>` | 110 / 111 / 112 |
//! | L2 allow | `<port>|<mac>` | 100 |
//! | L3 allow | `<port>|<mac>|<ip>/<len>|<ethertype>` | 120 |
//! | ARP allow | `<port>|<mac>|<ip>/32|2054` | 121 |
//! | allow from tunnel or uplink | `allow|<port>` | 200 |

use super::table::{FlowTable, FlowWriter};
use super::types::{
    drop_flow, FlowMatch, FlowRecord, Layer3Match, ETHERTYPE_ARP, ETHERTYPE_IPV4, ETHERTYPE_IPV6,
};
use crate::config::TableIds;
use crate::context::RendererContext;
use crate::endpoint::Endpoint;
use log::debug;
use ofoverlay_sync_common::Dirty;
use ofoverlay_types::{DeviceId, PortId};
use std::net::IpAddr;

const PRIORITY_DROP: u16 = 1;
const PRIORITY_DROP_ARP: u16 = 110;
const PRIORITY_DROP_IPV4: u16 = 111;
const PRIORITY_DROP_IPV6: u16 = 112;
const PRIORITY_L2_ALLOW: u16 = 100;
const PRIORITY_L3_ALLOW: u16 = 120;
const PRIORITY_ARP_ALLOW: u16 = 121;
const PRIORITY_PORT_ALLOW: u16 = 200;

/// Stage 0.
#[derive(Debug, Clone)]
pub struct PortSecurity {
    table_id: u8,
    next_table: u8,
}

impl PortSecurity {
    pub const NAME: &'static str = "PortSecurity";

    pub fn new(tables: &TableIds) -> Self {
        Self {
            table_id: tables.port_security,
            next_table: tables.source_mapper,
        }
    }

    fn allow_from_port(&self, port: &PortId) -> FlowRecord {
        FlowRecord::new(
            format!("allow|{}", port),
            self.table_id,
            PRIORITY_PORT_ALLOW,
            FlowMatch::new().in_port(port.clone()),
        )
        .goto(self.next_table)
    }

    fn endpoint_rules(&self, ep: &Endpoint, port: &PortId, writer: &mut FlowWriter) {
        let mac = ep.mac();

        writer.write_with(format!("{}|{}", port, mac), |id| {
            FlowRecord::new(
                id,
                self.table_id,
                PRIORITY_L2_ALLOW,
                FlowMatch::new().in_port(port.clone()).eth_src(mac),
            )
            .goto(self.next_table)
        });

        for addr in &ep.l3_addresses {
            let ip = addr.ip_address;
            let (layer3, ethertype) = Layer3Match::source(ip);
            let prefix = if ip.is_ipv4() { 32 } else { 128 };

            writer.write_with(format!("{}|{}|{}/{}|{}", port, mac, ip, prefix, ethertype), |id| {
                FlowRecord::new(
                    id,
                    self.table_id,
                    PRIORITY_L3_ALLOW,
                    FlowMatch::new()
                        .in_port(port.clone())
                        .eth_src(mac)
                        .ethertype(ethertype)
                        .layer3(layer3),
                )
                .goto(self.next_table)
            });

            if let IpAddr::V4(v4) = ip {
                writer.write_with(format!("{}|{}|{}/32|{}", port, mac, ip, ETHERTYPE_ARP), |id| {
                    FlowRecord::new(
                        id,
                        self.table_id,
                        PRIORITY_ARP_ALLOW,
                        FlowMatch::new()
                            .in_port(port.clone())
                            .eth_src(mac)
                            .ethertype(ETHERTYPE_ARP)
                            .layer3(Layer3Match::ArpSource(v4)),
                    )
                    .goto(self.next_table)
                });
            }
        }
    }
}

impl FlowTable for PortSecurity {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> u8 {
        0
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn sync(&self, ctx: &RendererContext, device: &DeviceId, _dirty: &Dirty, writer: &mut FlowWriter) {
        let trusted = ctx
            .tunnels
            .tunnel_port(device)
            .into_iter()
            .chain(ctx.tunnels.external_ports(device));
        for port in trusted {
            writer.write(self.allow_from_port(&port));
        }

        writer.write(drop_flow(self.table_id, PRIORITY_DROP, None));
        writer.write(drop_flow(self.table_id, PRIORITY_DROP_ARP, Some(ETHERTYPE_ARP)));
        writer.write(drop_flow(self.table_id, PRIORITY_DROP_IPV4, Some(ETHERTYPE_IPV4)));
        writer.write(drop_flow(self.table_id, PRIORITY_DROP_IPV6, Some(ETHERTYPE_IPV6)));

        for ep in ctx.registry.endpoints_on_device(device) {
            match ep.internal_port() {
                Some(port) => self.endpoint_rules(&ep, port, writer),
                None => debug!("{}: {} has no ingress port on {}", Self::NAME, ep.key, device),
            }
        }
    }
}
