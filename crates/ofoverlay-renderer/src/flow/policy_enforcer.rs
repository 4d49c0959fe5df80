//! Policy enforcer (stage 3).
//!
//! Compiling contracts into allow/deny rules is not implemented. The stage
//! exists so the pipeline has its full shape: it neither reads nor writes
//! the device table and reports [`TaskStatus::Ignore`].

use crate::config::TableIds;
use async_trait::async_trait;
use log::debug;
use ofoverlay_sync_common::{Dirty, SyncReport, TableSynchronizer, TaskStatus};
use ofoverlay_types::DeviceId;

/// Stage 3 placeholder.
#[derive(Debug, Clone)]
pub struct PolicyEnforcer {
    table_id: u8,
}

impl PolicyEnforcer {
    pub const NAME: &'static str = "PolicyEnforcer";

    pub fn new(tables: &TableIds) -> Self {
        Self {
            table_id: tables.policy_enforcer,
        }
    }

    pub fn table_id(&self) -> u8 {
        self.table_id
    }
}

#[async_trait]
impl TableSynchronizer for PolicyEnforcer {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn stage(&self) -> Option<u8> {
        Some(3)
    }

    async fn synchronize(&self, device: &DeviceId, _dirty: &Dirty) -> SyncReport {
        debug!("{}: table {} on {} not rendered", Self::NAME, self.table_id, device);
        SyncReport::new(Self::NAME, device).with_status(TaskStatus::Ignore)
    }
}
