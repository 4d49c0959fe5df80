//! Policy collaborators: ordinal allocation, group resolution and the
//! tunnel directory.
//!
//! Each collaborator is a trait so the renderer can run against the
//! controller's real services or against the in-memory implementations
//! shipped here (used by the binary's snapshot mode and by the tests).

mod ordinal;
mod resolver;
mod tunnel;
mod types;

pub use ordinal::{OrdinalAllocator, OrdinalTable, MAX_ORDINAL};
pub use resolver::{Contract, PolicyResolver, StaticPolicy, TenantPolicy};
pub use tunnel::{StaticTunnels, TunnelDirectory, TunnelInfo};
pub use types::{ForwardingContext, ForwardingOrdinals, Subnet};
