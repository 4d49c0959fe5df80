//! Source mapper: classifies ingress traffic into policy contexts.
//!
//! Local endpoints are matched on in-port and source MAC; overlay traffic
//! is matched on the tunnel port and the tunnel id, which carries the
//! source group ordinal. Either way the resolved ordinals are loaded into
//! registers for the later stages. Rule ids embed every ordinal, so a
//! policy change that moves an endpoint to another context produces a
//! new id and the old rule is swept.

use super::table::{FlowTable, FlowWriter};
use super::types::{drop_flow, Action, FlowMatch, FlowRecord, Register, NO_CONDITIONS};
use crate::config::TableIds;
use crate::context::RendererContext;
use crate::policy::ForwardingOrdinals;
use log::{debug, warn};
use ofoverlay_sync_common::Dirty;
use ofoverlay_types::{DeviceId, PortId};

const PRIORITY_DROP: u16 = 1;
const PRIORITY_ENDPOINT: u16 = 100;
const PRIORITY_TUNNEL: u16 = 150;

/// Stage 1.
#[derive(Debug, Clone)]
pub struct SourceMapper {
    table_id: u8,
    next_table: u8,
}

impl SourceMapper {
    pub const NAME: &'static str = "SourceMapper";

    pub fn new(tables: &TableIds) -> Self {
        Self {
            table_id: tables.source_mapper,
            next_table: tables.destination_mapper,
        }
    }

    fn load_ordinals(ords: &ForwardingOrdinals) -> Vec<Action> {
        vec![
            Action::LoadRegister {
                reg: Register::SourceGroup,
                value: ords.eg,
            },
            Action::LoadRegister {
                reg: Register::SourceConditions,
                value: NO_CONDITIONS,
            },
            Action::LoadRegister {
                reg: Register::BridgeDomain,
                value: ords.bd,
            },
            Action::LoadRegister {
                reg: Register::FloodDomain,
                value: ords.fd,
            },
            Action::LoadRegister {
                reg: Register::L3Context,
                value: ords.l3,
            },
        ]
    }

    fn tunnel_rule(&self, tunnel_port: &PortId, ords: &ForwardingOrdinals, writer: &mut FlowWriter) {
        writer.write_with(format!("{}|tunnel|{}", tunnel_port, ords), |id| {
            FlowRecord::new(
                id,
                self.table_id,
                PRIORITY_TUNNEL,
                FlowMatch::new()
                    .in_port(tunnel_port.clone())
                    .tunnel_id(u64::from(ords.eg)),
            )
            .apply(Self::load_ordinals(ords))
            .goto(self.next_table)
        });
    }
}

impl FlowTable for SourceMapper {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> u8 {
        1
    }

    fn table_id(&self) -> u8 {
        self.table_id
    }

    fn sync(&self, ctx: &RendererContext, device: &DeviceId, _dirty: &Dirty, writer: &mut FlowWriter) {
        writer.write(drop_flow(self.table_id, PRIORITY_DROP, None));

        for ep in ctx.registry.endpoints_on_device(device) {
            let Some(port) = ep.internal_port() else {
                debug!("{}: {} has no ingress port on {}", Self::NAME, ep.key, device);
                continue;
            };
            let ords = match ctx.forwarding_ordinals(&ep.eg_key()) {
                Ok(ords) => ords,
                Err(e) => {
                    warn!("{}: skipping {} on {}: {}", Self::NAME, ep.key, device, e);
                    continue;
                }
            };

            let mac = ep.mac();
            writer.write_with(format!("{}|{}|{}", port, mac, ords), |id| {
                FlowRecord::new(
                    id,
                    self.table_id,
                    PRIORITY_ENDPOINT,
                    FlowMatch::new().in_port(port.clone()).eth_src(mac),
                )
                .apply(Self::load_ordinals(&ords))
                .goto(self.next_table)
            });
        }

        let Some(tunnel_port) = ctx.tunnels.tunnel_port(device) else {
            return;
        };
        for group in ctx.registry.groups_on_device(device) {
            match ctx.forwarding_ordinals(&group) {
                Ok(ords) => self.tunnel_rule(&tunnel_port, &ords, writer),
                Err(e) => warn!("{}: no tunnel mapping for {} on {}: {}", Self::NAME, group, device, e),
            }
        }
    }
}
