//! Common device-table reconciliation abstractions.
//!
//! This crate provides the traits and types shared by every table the
//! overlay renderer programs into a device:
//!
//! - [`TableSynchronizer`]: Base trait for per-device table reconciliation
//! - [`VisitMap`]: Mark-and-sweep map that never auto-creates entries
//! - [`Dirty`]: The change signal handed to a synchronization pass
//! - [`SyncReport`]: What one pass wrote to one device
//! - [`TaskStatus`]: Outcome classification for a pass or a single item
//!
//! # Reconciliation model
//!
//! Every table follows the same protocol:
//!
//! 1. Read the device's current records for the table into a [`VisitMap`]
//! 2. Compute each desired record and mark its key; unknown keys are staged as puts
//! 3. Stage a delete for every record left unmarked
//! 4. Commit the staged operations as one batch
//!
//! Because record keys are derived only from the fields that determine a
//! record's content, running a pass twice against unchanged state stages
//! nothing the second time.

mod synchronizer;
mod task;
mod visit_map;

pub use synchronizer::{Dirty, SyncReport, TableSynchronizer};
pub use task::{TaskError, TaskResult, TaskResultExt, TaskStatus};
pub use visit_map::VisitMap;
