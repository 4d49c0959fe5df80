//! Endpoint registry and endpoint data model.

mod registry;
mod types;

pub use registry::{EndpointListener, EndpointRegistry};
pub use types::{
    Endpoint, EndpointError, EndpointLocation, EndpointRecord, L3Address, LocationRecord,
    LocationType,
};
