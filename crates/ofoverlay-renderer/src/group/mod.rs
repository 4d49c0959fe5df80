//! Flood group table.

mod table;
mod types;

pub use table::GroupTable;
pub use types::{BucketId, BucketRecord, GroupRecord, GroupType};
