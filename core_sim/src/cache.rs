use std::{cell::RefCell, collections::BTreeMap, fmt, str::FromStr};

use anyhow::anyhow;
use serde::Serialize;

use crate::{
    addr::bin_str,
    stat::{AddStats, Stats},
};

/// Which resident block gets replaced when a set is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplacementPolicy {
    #[default]
    Lru,
    Mru,
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementPolicy::Lru => write!(f, "lru"),
            ReplacementPolicy::Mru => write!(f, "mru"),
        }
    }
}

impl FromStr for ReplacementPolicy {
    type Err = anyhow::Error;

    /// ```
    /// use core_sim::cache::ReplacementPolicy;
    ///
    /// assert_eq!("mru".parse::<ReplacementPolicy>().unwrap(), ReplacementPolicy::Mru);
    /// assert!("fifo".parse::<ReplacementPolicy>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lru" => Ok(Self::Lru),
            "mru" => Ok(Self::Mru),
            other => Err(anyhow!(
                "unknown replacement policy `{other}` (expected `lru` or `mru`)"
            )),
        }
    }
}

/// Identity of an address as recency tracking sees it: the index and tag
/// pin down the block, the offset does not distinguish anything.
type AddrId = (Option<u64>, Option<u64>);

/// One resident cache block, owned by the set it sits in. Eviction moves it
/// into the next level, carrying its original index for reinsertion there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub tag: Option<u64>,
    pub index: Option<u64>,
    pub data: Vec<u64>,
}

/// Names the set an operation addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetSelector {
    /// The set picked by the address's index bits.
    Indexed(u64),
    /// The single set of a fully associative store.
    Whole,
}

impl From<Option<u64>> for SetSelector {
    fn from(index: Option<u64>) -> Self {
        match index {
            Some(i) => Self::Indexed(i),
            None => Self::Whole,
        }
    }
}

impl SetSelector {
    fn key(self) -> u64 {
        match self {
            SetSelector::Indexed(i) => i,
            SetSelector::Whole => 0,
        }
    }
    fn index(self) -> Option<u64> {
        match self {
            SetSelector::Indexed(i) => Some(i),
            SetSelector::Whole => None,
        }
    }
}

/// A fixed collection of block sets plus the recency state replacement
/// decisions run on. The recency list is shared across all sets and ordered
/// least-recently used first; within a set, blocks stay in insertion order.
#[derive(Debug)]
pub struct CacheStore {
    sets: BTreeMap<u64, Vec<BlockEntry>>,
    recency: Vec<AddrId>,
    num_index_bits: u32,
    is_l2: bool,
    access_stat: RefCell<stat::AccessStat>,
}

impl CacheStore {
    pub fn new(num_sets: usize, num_index_bits: u32, is_l2: bool) -> Self {
        Self {
            sets: (0..num_sets as u64).map(|i| (i, Vec::new())).collect(),
            recency: Vec::new(),
            num_index_bits,
            is_l2,
            access_stat: RefCell::default(),
        }
    }

    pub fn is_l2(&self) -> bool {
        self.is_l2
    }

    /// Moves the address identity to the most-recently-used end of the
    /// recency list. Called for every reference, hit or miss.
    pub fn mark_seen(&mut self, index: Option<u64>, tag: Option<u64>) {
        let id = (index, tag);
        if let Some(pos) = self.recency.iter().position(|known| *known == id) {
            self.recency.remove(pos);
        }
        self.recency.push(id);
    }

    /// Whether a block with this tag resides in the addressed set. A set the
    /// store was never configured with is a clean miss, not an error.
    pub fn is_hit(&self, sel: SetSelector, tag: Option<u64>) -> bool {
        let hit = self
            .sets
            .get(&sel.key())
            .map_or(false, |blocks| blocks.iter().any(|b| b.tag == tag));
        self.access_stat.borrow_mut().count(hit);
        hit
    }

    /// Position of the replacement victim within the addressed set, or
    /// `None` when the set is empty or absent.
    ///
    /// The recency list is scanned least-recent first (most-recent first for
    /// MRU), restricted to identities whose index addresses this set; the
    /// first one resident in the set names the victim. Blocks this store has
    /// never seen referenced (write-backs from the level above) fall back to
    /// aging out oldest-inserted first.
    pub fn select_victim(&self, sel: SetSelector, policy: ReplacementPolicy) -> Option<usize> {
        let blocks = self.sets.get(&sel.key()).filter(|b| !b.is_empty())?;
        let scan: Box<dyn Iterator<Item = &AddrId>> = match policy {
            ReplacementPolicy::Lru => Box::new(self.recency.iter()),
            ReplacementPolicy::Mru => Box::new(self.recency.iter().rev()),
        };
        for (recent_index, recent_tag) in scan {
            if *recent_index != sel.index() {
                continue;
            }
            if let Some(pos) = blocks.iter().position(|b| b.tag == *recent_tag) {
                return Some(pos);
            }
        }
        Some(0)
    }

    /// Places `new_entry` into the addressed set. A resident entry with the
    /// same tag is overwritten in place, keeping tags unique within the set.
    /// Otherwise, a full set first evicts its victim; when `next_level` is
    /// attached and this store is not the last level, the evicted entry
    /// moves down into it at its original index, same policy and capacity.
    pub fn insert(
        &mut self,
        policy: ReplacementPolicy,
        blocks_per_set: usize,
        sel: SetSelector,
        new_entry: BlockEntry,
        next_level: Option<&mut CacheStore>,
    ) {
        let key = sel.key();
        let resident = self
            .sets
            .get(&key)
            .and_then(|blocks| blocks.iter().position(|b| b.tag == new_entry.tag));
        if let Some(pos) = resident {
            self.sets.get_mut(&key).unwrap()[pos] = new_entry;
            return;
        }
        let full = self
            .sets
            .get(&key)
            .map_or(false, |blocks| blocks.len() >= blocks_per_set);
        if full {
            if let Some(victim) = self.select_victim(sel, policy) {
                let evicted = self.sets.get_mut(&key).unwrap().remove(victim);
                self.access_stat.borrow_mut().evictions += 1;
                if !self.is_l2 {
                    if let Some(next) = next_level {
                        log::debug!(
                            "set {}: write back of tag {:?} to the next level",
                            bin_str(key, self.num_index_bits),
                            evicted.tag
                        );
                        self.access_stat.borrow_mut().write_backs += 1;
                        next.insert(
                            policy,
                            blocks_per_set,
                            SetSelector::from(evicted.index),
                            evicted,
                            None,
                        );
                    }
                }
            }
        }
        self.sets.entry(key).or_default().push(new_entry);
    }

    /// Side-effect-free lookup, for inspection only.
    pub fn fetch_block(&self, sel: SetSelector, tag: Option<u64>) -> Option<&BlockEntry> {
        self.sets.get(&sel.key())?.iter().find(|b| b.tag == tag)
    }

    /// Snapshot of the store's contents for rendering and reports: binary
    /// set label to the data words of each resident block, insertion order.
    pub fn dump(&self) -> CacheDump {
        CacheDump {
            is_l2: self.is_l2,
            sets: self
                .sets
                .iter()
                .map(|(i, blocks)| {
                    let label = bin_str(*i, self.num_index_bits);
                    (label, blocks.iter().map(|b| b.data.clone()).collect())
                })
                .collect(),
        }
    }
}

/// Serializable view of a store's final contents.
#[derive(Debug, Clone, Serialize)]
pub struct CacheDump {
    pub is_l2: bool,
    pub sets: BTreeMap<String, Vec<Vec<u64>>>,
}

impl AddStats for CacheStore {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(stat::CacheLevelStat::new(
            self.is_l2,
            *self.access_stat.borrow(),
        )));
    }
}

mod stat {
    use std::fmt;

    use crate::stat::*;

    #[derive(Debug, Clone, Copy, Default)]
    pub(super) struct AccessStat {
        pub hits: usize,
        pub misses: usize,
        pub evictions: usize,
        pub write_backs: usize,
    }

    impl AccessStat {
        pub fn count(&mut self, hit: bool) {
            if hit {
                self.hits += 1
            } else {
                self.misses += 1
            }
        }
    }

    pub(super) struct CacheLevelStat {
        header: &'static str,
        counts: AccessStat,
    }

    impl CacheLevelStat {
        pub fn new(is_l2: bool, counts: AccessStat) -> Self {
            Self {
                header: if is_l2 { "L2 lookups" } else { "L1 lookups" },
                counts,
            }
        }
    }

    impl Stat for CacheLevelStat {
        fn view(&self) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ CacheLevelStat {
        fn header(&self) -> &'static str {
            self.header
        }
        fn width(&self) -> usize {
            26
        }
    }

    impl fmt::Display for &'_ CacheLevelStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            writeln!(f, "  hits: {:>14}", self.counts.hits)?;
            writeln!(f, "  misses: {:>12}", self.counts.misses)?;
            writeln!(f, "  evictions: {:>9}", self.counts.evictions)?;
            writeln!(f, "  write backs: {:>7}", self.counts.write_backs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: u64) -> BlockEntry {
        BlockEntry {
            tag: Some(tag),
            index: Some(0),
            data: vec![tag],
        }
    }

    fn set_len(store: &CacheStore, label: &str) -> usize {
        store.dump().sets[label].len()
    }

    const S0: SetSelector = SetSelector::Indexed(0);

    #[test]
    fn a_set_never_exceeds_its_capacity() {
        let mut store = CacheStore::new(2, 1, false);
        for tag in 0..5 {
            store.mark_seen(Some(0), Some(tag));
            store.insert(ReplacementPolicy::Lru, 2, S0, entry(tag), None);
            assert!(set_len(&store, "0") <= 2);
        }
    }

    #[test]
    fn reinserting_a_resident_tag_keeps_tags_unique() {
        let mut store = CacheStore::new(1, 0, true);
        store.insert(ReplacementPolicy::Lru, 2, S0, entry(3), None);
        let refreshed = BlockEntry {
            tag: Some(3),
            index: Some(0),
            data: vec![30, 31],
        };
        store.insert(ReplacementPolicy::Lru, 2, S0, refreshed.clone(), None);
        assert_eq!(set_len(&store, "0"), 1);
        assert_eq!(store.fetch_block(S0, Some(3)), Some(&refreshed));
    }

    #[test]
    fn lru_scan_picks_the_least_recently_seen_resident_block() {
        let mut store = CacheStore::new(1, 0, false);
        for tag in [1, 2, 3, 1] {
            store.mark_seen(Some(0), Some(tag));
        }
        store.insert(ReplacementPolicy::Lru, 3, S0, entry(1), None);
        store.insert(ReplacementPolicy::Lru, 3, S0, entry(2), None);
        store.insert(ReplacementPolicy::Lru, 3, S0, entry(3), None);
        // recency is 2, 3, 1: tag 2 goes first under LRU, tag 1 under MRU
        assert_eq!(store.select_victim(S0, ReplacementPolicy::Lru), Some(1));
        assert_eq!(store.select_victim(S0, ReplacementPolicy::Mru), Some(0));
    }

    #[test]
    fn recency_is_tracked_per_identity_not_per_set() {
        let mut store = CacheStore::new(2, 1, false);
        // same tag in both sets; only set 1's copy was seen recently
        store.mark_seen(Some(0), Some(7));
        store.mark_seen(Some(1), Some(7));
        store.mark_seen(Some(0), Some(8));
        store.insert(ReplacementPolicy::Lru, 2, S0, entry(7), None);
        store.insert(ReplacementPolicy::Lru, 2, S0, entry(8), None);
        // the (1, 7) entry does not shadow set 0's scan
        assert_eq!(store.select_victim(S0, ReplacementPolicy::Lru), Some(0));
    }

    #[test]
    fn eviction_writes_the_victim_back_into_the_next_level() {
        let mut l1 = CacheStore::new(2, 1, false);
        let mut l2 = CacheStore::new(2, 1, true);
        l1.mark_seen(Some(0), Some(1));
        l1.insert(ReplacementPolicy::Lru, 1, S0, entry(1), Some(&mut l2));
        assert!(l2.fetch_block(S0, Some(1)).is_none());
        l1.mark_seen(Some(0), Some(2));
        l1.insert(ReplacementPolicy::Lru, 1, S0, entry(2), Some(&mut l2));
        // the displaced block is retrievable from L2 right away
        assert_eq!(l2.fetch_block(S0, Some(1)), Some(&entry(1)));
        assert_eq!(l1.fetch_block(S0, Some(2)), Some(&entry(2)));
        assert!(l1.fetch_block(S0, Some(1)).is_none());
    }

    #[test]
    fn untracked_blocks_age_out_oldest_first() {
        // nothing was ever marked seen here, as happens to an L2 store
        let mut store = CacheStore::new(1, 0, true);
        for tag in [1, 2, 3] {
            store.insert(ReplacementPolicy::Lru, 2, S0, entry(tag), None);
        }
        let dump = store.dump();
        assert_eq!(dump.sets["0"], vec![vec![2], vec![3]]);
    }

    #[test]
    fn lookups_outside_the_configured_sets_miss_cleanly() {
        let store = CacheStore::new(2, 1, false);
        assert!(!store.is_hit(SetSelector::Indexed(9), Some(1)));
        assert!(store.fetch_block(SetSelector::Indexed(9), Some(1)).is_none());
        assert_eq!(
            store.select_victim(SetSelector::Indexed(9), ReplacementPolicy::Lru),
            None
        );
    }

    #[test]
    fn whole_selector_addresses_the_single_set() {
        let mut store = CacheStore::new(1, 0, false);
        let e = BlockEntry {
            tag: Some(5),
            index: None,
            data: vec![5],
        };
        store.mark_seen(None, Some(5));
        store.insert(ReplacementPolicy::Lru, 2, SetSelector::Whole, e.clone(), None);
        assert!(store.is_hit(SetSelector::Whole, Some(5)));
        assert_eq!(store.fetch_block(SetSelector::Whole, Some(5)), Some(&e));
    }
}
