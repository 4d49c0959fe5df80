//! Mark-and-sweep map used by every table synchronizer.
//!
//! A `VisitMap` holds the records read back from a device, each tagged with
//! a visited flag. A synchronization pass marks the keys it wants to keep;
//! whatever is left unmarked afterwards is stale and gets deleted.
//!
//! Like the rest of the reconciliation code it never creates entries as a
//! side effect of a lookup:
//! - `get()` returns `Option<&V>`
//! - `mark()` returns `false` for a missing key instead of inserting one
//! - `insert_visited()` is the only way to add a record during a pass

use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    visited: bool,
}

/// Records keyed by identity, each with a transient visited mark.
///
/// Keys are ordered so sweeps emit deletes in a stable order.
///
/// # Example
///
/// ```
/// use ofoverlay_sync_common::VisitMap;
///
/// let mut map: VisitMap<String, u32> =
///     VisitMap::from_existing(vec![("a".to_string(), 1), ("b".to_string(), 2)]);
///
/// assert!(map.mark(&"a".to_string()));
/// assert!(!map.mark(&"c".to_string()));
/// assert!(map.get(&"c".to_string()).is_none());
///
/// let stale: Vec<String> = map.sweep().into_iter().map(|(k, _)| k).collect();
/// assert_eq!(stale, vec!["b".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct VisitMap<K, V> {
    inner: BTreeMap<K, Slot<V>>,
}

impl<K, V> VisitMap<K, V>
where
    K: Ord,
{
    /// Creates a new empty map.
    pub fn new() -> Self {
        Self {
            inner: BTreeMap::new(),
        }
    }

    /// Loads records read from a device, all unvisited.
    pub fn from_existing<I>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            inner: records
                .into_iter()
                .map(|(k, value)| {
                    (
                        k,
                        Slot {
                            value,
                            visited: false,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Returns the number of records in the map.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns true if the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns true if the map contains the given key.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Returns the record for the given key.
    ///
    /// **This never creates entries.**
    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key).map(|slot| &slot.value)
    }

    /// Returns a mutable reference to the record for the given key.
    ///
    /// **This never creates entries.**
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.inner.get_mut(key).map(|slot| &mut slot.value)
    }

    /// Marks an existing record as visited.
    ///
    /// Returns `true` if the record was present, `false` if the caller has
    /// to stage a write for it.
    pub fn mark(&mut self, key: &K) -> bool {
        match self.inner.get_mut(key) {
            Some(slot) => {
                slot.visited = true;
                true
            }
            None => false,
        }
    }

    /// Returns true if the key is present and has been marked in this pass.
    pub fn is_visited(&self, key: &K) -> bool {
        self.inner.get(key).map(|slot| slot.visited).unwrap_or(false)
    }

    /// Inserts a record that is already considered visited.
    ///
    /// Returns the old value if the key was already present.
    pub fn insert_visited(&mut self, key: K, value: V) -> Option<V> {
        self.inner
            .insert(
                key,
                Slot {
                    value,
                    visited: true,
                },
            )
            .map(|slot| slot.value)
    }

    /// Removes a record regardless of its mark.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|slot| slot.value)
    }

    /// Removes and returns every unvisited record, leaving the visited ones.
    pub fn sweep(&mut self) -> Vec<(K, V)>
    where
        K: Clone,
    {
        let stale: Vec<K> = self
            .inner
            .iter()
            .filter(|(_, slot)| !slot.visited)
            .map(|(k, _)| k.clone())
            .collect();

        stale
            .into_iter()
            .filter_map(|k| self.inner.remove(&k).map(|slot| (k, slot.value)))
            .collect()
    }

    /// Clears every visited mark.
    pub fn reset_marks(&mut self) {
        for slot in self.inner.values_mut() {
            slot.visited = false;
        }
    }

    /// Returns an iterator over key-value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.inner.iter().map(|(k, slot)| (k, &slot.value))
    }

    /// Returns an iterator over keys.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inner.keys()
    }
}

impl<K, V> Default for VisitMap<K, V>
where
    K: Ord,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn existing() -> VisitMap<String, i32> {
        VisitMap::from_existing(vec![
            ("drop|null".to_string(), 1),
            ("drop|2048".to_string(), 111),
            ("L2|stale".to_string(), 100),
        ])
    }

    #[test]
    fn test_mark_never_creates() {
        let mut map = existing();

        assert!(!map.mark(&"missing".to_string()));
        assert!(map.get(&"missing".to_string()).is_none());
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_sweep_returns_only_unvisited() {
        let mut map = existing();
        assert!(map.mark(&"drop|null".to_string()));
        assert!(map.mark(&"drop|2048".to_string()));
        map.insert_visited("L2|new".to_string(), 100);

        let stale = map.sweep();
        assert_eq!(stale, vec![("L2|stale".to_string(), 100)]);
        assert_eq!(map.len(), 3);
        assert!(map.is_visited(&"L2|new".to_string()));
    }

    #[test]
    fn test_sweep_in_key_order() {
        let mut map = existing();
        let keys: Vec<String> = map.sweep().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["L2|stale", "drop|2048", "drop|null"]);
        assert!(map.is_empty());
    }

    #[test]
    fn test_reset_marks() {
        let mut map = existing();
        map.mark(&"drop|null".to_string());
        map.reset_marks();
        assert!(!map.is_visited(&"drop|null".to_string()));
        assert_eq!(map.sweep().len(), 3);
    }

    #[test]
    fn test_get_mut_updates_value_in_place() {
        let mut map = existing();
        if let Some(priority) = map.get_mut(&"drop|2048".to_string()) {
            *priority = 112;
        }
        assert_eq!(map.get(&"drop|2048".to_string()), Some(&112));
    }
}
