//! OpenFlow overlay renderer
//!
//! Renders group-based policy into the forwarding tables of a fleet of
//! OpenFlow devices. Endpoint changes arrive as record notifications and
//! are indexed by the [`endpoint::EndpointRegistry`]; the
//! [`daemon::RendererDaemon`] then reconciles every affected device.
//!
//! # Architecture
//!
//! ```text
//! [endpoint records] ──> [EndpointRegistry] ──> [DirtyTracker]
//!                                                     │
//!                                                     ↓
//!                [PolicyResolver] ──────────> [RendererDaemon]
//!                [TunnelDirectory] ─────────>    │  per device, in stage order
//!                [OrdinalAllocator] ────────>    ↓
//!                                  PortSecurity ─> SourceMapper ─> DestinationMapper
//!                                  ─> PolicyEnforcer ─> GroupTable
//!                                                     │
//!                                                     ↓
//!                                             [DeviceStateStore]
//! ```
//!
//! # Key Components
//!
//! - [`endpoint`]: Endpoint records and the three-index registry
//! - [`flow`]: Pipeline stages and the shared flow-table reconciliation
//! - [`group`]: Per-device flood groups and bucket id encoding
//! - [`policy`]: Collaborator traits and static implementations
//! - [`store`]: Device-state store trait, write batches and an in-memory store
//! - [`daemon`]: Dirty tracking and the reconciliation loop

pub mod audit;
pub mod config;
pub mod context;
pub mod daemon;
pub mod endpoint;
pub mod flow;
pub mod group;
pub mod policy;
pub mod store;

pub use config::{ConfigError, RendererConfig, TableIds};
pub use context::RendererContext;
pub use daemon::{DirtyTracker, RendererDaemon, RendererDaemonConfig};
pub use endpoint::{Endpoint, EndpointListener, EndpointRecord, EndpointRegistry};
pub use store::{DeviceStateStore, InMemoryDeviceStore, StoreError, WriteBatch, WriteOp};
