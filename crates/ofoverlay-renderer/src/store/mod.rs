//! Device-state store: where programmed flows and groups are read from
//! and committed to.

mod memory;
mod types;

pub use memory::{DeviceSnapshot, InMemoryDeviceStore};
pub use types::{DeviceStateStore, StoreError, StoreResult, WriteBatch, WriteOp};
