//! Group records and bucket id encoding.

use crate::flow::Action;
use serde::{Deserialize, Serialize};

/// OpenFlow group type. Flood groups are always `All`, which replicates
/// to every bucket; the others only appear when read back from a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    #[default]
    All,
    Select,
    Indirect,
    FastFailover,
}

/// One bucket of a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub bucket_id: u32,
    pub actions: Vec<Action>,
}

/// One entry of a device group table.
///
/// Buckets are kept sorted by id so two records describing the same set
/// of buckets compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub group_id: u32,
    #[serde(default)]
    pub group_type: GroupType,
    #[serde(default)]
    pub buckets: Vec<BucketRecord>,
}

impl GroupRecord {
    pub fn new(group_id: u32) -> Self {
        Self {
            group_id,
            group_type: GroupType::All,
            buckets: Vec::new(),
        }
    }

    /// Inserts or replaces a bucket, keeping id order.
    pub fn put_bucket(&mut self, bucket: BucketRecord) {
        match self
            .buckets
            .binary_search_by_key(&bucket.bucket_id, |b| b.bucket_id)
        {
            Ok(pos) => self.buckets[pos] = bucket,
            Err(pos) => self.buckets.insert(pos, bucket),
        }
    }

    pub fn bucket(&self, bucket_id: u32) -> Option<&BucketRecord> {
        self.buckets
            .binary_search_by_key(&bucket_id, |b| b.bucket_id)
            .ok()
            .map(|pos| &self.buckets[pos])
    }

    /// Sorts buckets by id, e.g. after reading a record from a device.
    pub fn normalize(&mut self) {
        self.buckets.sort_by_key(|b| b.bucket_id);
    }
}

/// Bucket id encoding.
///
/// Local buckets use the raw port number; remote buckets use the remote
/// device's ordinal with [`BucketId::REMOTE_BIT`] set. A port number with
/// that bit set cannot be encoded, which keeps the two ranges disjoint.
pub struct BucketId;

impl BucketId {
    /// Reserved bit marking a remote bucket.
    pub const REMOTE_BIT: u32 = 1 << 31;

    /// Bucket id for local delivery to `port_number`.
    pub fn local(port_number: u32) -> Option<u32> {
        if port_number & Self::REMOTE_BIT != 0 {
            None
        } else {
            Some(port_number)
        }
    }

    /// Bucket id for tunnel delivery to the device with `ordinal`.
    pub fn remote(ordinal: u32) -> Option<u32> {
        if ordinal & Self::REMOTE_BIT != 0 {
            None
        } else {
            Some(Self::REMOTE_BIT | ordinal)
        }
    }

    /// Returns true if `bucket_id` encodes a remote device.
    pub fn is_remote(bucket_id: u32) -> bool {
        bucket_id & Self::REMOTE_BIT != 0
    }
}
