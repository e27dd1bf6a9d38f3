use serde::Serialize;

use crate::{
    addr::{DecomposedAddr, WordAddr},
    cache::{CacheStore, ReplacementPolicy, SetSelector},
    config::{DerivedParams, SimConfig, SimulationError},
    reference::{CacheStatus, Reference},
    stat::{AddStats, Stats},
};

/// Cycle cost charged per reference, keyed by the deepest level that serves
/// it.
///
/// A miss pays the full memory penalty no matter how many cache levels sit
/// in front of it, and an L2 hit undercuts that penalty, so a two-level run
/// never costs more cycles than the same references against L1 alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CycleCostTable {
    /// Served by L1.
    pub l1_hit: u64,
    /// Missed L1, found in L2.
    pub l2_hit: u64,
    /// Missed every cache level.
    pub memory: u64,
}

impl Default for CycleCostTable {
    fn default() -> Self {
        Self {
            l1_hit: 1,
            l2_hit: 10,
            memory: 100,
        }
    }
}

/// Drives a reference sequence through `store`, classifying every reference
/// and returning the cycle total of the pass.
///
/// `next_level` attaches an L2 behind `store`: L1 evictions move down into
/// it, and every L1 miss it does not already cover fills it directly.
pub fn read_refs(
    store: &mut CacheStore,
    policy: ReplacementPolicy,
    blocks_per_set: usize,
    words_per_block: usize,
    refs: &mut [Reference],
    mut next_level: Option<&mut CacheStore>,
    costs: &CycleCostTable,
) -> u64 {
    let mut total_cycles = 0;
    for r in refs {
        store.mark_seen(r.addr.index, r.addr.tag);
        let sel = SetSelector::from(r.addr.index);
        if store.is_hit(sel, r.addr.tag) {
            r.cache_status = Some(CacheStatus::Hit);
            total_cycles += costs.l1_hit;
            continue;
        }
        r.cache_status = Some(CacheStatus::Miss);
        store.insert(
            policy,
            blocks_per_set,
            sel,
            r.cache_entry(words_per_block),
            next_level.as_deref_mut(),
        );
        match next_level.as_deref_mut() {
            Some(l2) => {
                if l2.is_hit(sel, r.addr.tag) {
                    total_cycles += costs.l2_hit;
                } else {
                    total_cycles += costs.memory;
                    l2.insert(
                        policy,
                        blocks_per_set,
                        sel,
                        r.cache_entry(words_per_block),
                        None,
                    );
                }
            }
            None => total_cycles += costs.memory,
        }
    }
    total_cycles
}

pub struct Simulator {
    config: SimConfig,
    costs: CycleCostTable,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            costs: CycleCostTable::default(),
        }
    }

    pub fn with_costs(config: SimConfig, costs: CycleCostTable) -> Self {
        Self { config, costs }
    }

    /// Runs the sequence twice: once against an L1 backed by an L2, once
    /// against a cold L1-only store with identical parameters. The passes
    /// share no cache state and each owns its reference list, so neither
    /// overwrites the other's classifications.
    pub fn run(&self, word_addrs: &[WordAddr]) -> Result<SimulationOutput, SimulationError> {
        let mut stat_builder = stat::RunStatBuilder::new();
        let params = DerivedParams::derive(&self.config, word_addrs)?;
        log::info!(
            "geometry: {} set(s) of {} block(s), tag/index/offset bits {}/{}/{}",
            params.num_sets,
            self.config.blocks_per_set,
            params.num_tag_bits,
            params.num_index_bits,
            params.num_offset_bits
        );
        let widths = params.field_widths();
        // decompose everything up front so a bad address aborts the run
        // before any reference is processed
        let mut refs = word_addrs
            .iter()
            .map(|&addr| Ok(Reference::new(DecomposedAddr::decompose(addr, widths)?)))
            .collect::<Result<Vec<_>, SimulationError>>()?;
        let mut refs_l1_only = refs.clone();

        let policy = self.config.replacement_policy;
        let mut l1 = CacheStore::new(params.num_sets, params.num_index_bits, false);
        let mut l2 = CacheStore::new(params.num_sets, params.num_index_bits, true);
        let cycles_with_l2 = read_refs(
            &mut l1,
            policy,
            self.config.blocks_per_set,
            self.config.words_per_block,
            &mut refs,
            Some(&mut l2),
            &self.costs,
        );

        let mut l1_only = CacheStore::new(params.num_sets, params.num_index_bits, false);
        let cycles_l1_only = read_refs(
            &mut l1_only,
            policy,
            self.config.blocks_per_set,
            self.config.words_per_block,
            &mut refs_l1_only,
            None,
            &self.costs,
        );

        stat_builder.cycles(cycles_with_l2, cycles_l1_only);
        stat_builder.stop_timer();
        log::info!("finished both passes over {} reference(s).", refs.len());

        Ok(SimulationOutput {
            params,
            refs,
            refs_l1_only,
            l1,
            l2,
            l1_only,
            cycles_with_l2,
            cycles_l1_only,
            run_stat: stat_builder.finish(),
        })
    }
}

#[derive(Debug)]
pub struct SimulationOutput {
    pub params: DerivedParams,
    /// References as classified by the L1+L2 pass.
    pub refs: Vec<Reference>,
    /// The same sequence, classified by the independent L1-only pass.
    pub refs_l1_only: Vec<Reference>,
    pub l1: CacheStore,
    pub l2: CacheStore,
    pub l1_only: CacheStore,
    pub cycles_with_l2: u64,
    pub cycles_l1_only: u64,
    run_stat: stat::RunStat,
}

impl SimulationOutput {
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

impl AddStats for SimulationOutput {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.run_stat.clone()));
        self.l1.add_stats(buf);
        self.l2.add_stats(buf);
    }
}

mod stat {
    use std::{fmt, time};

    use crate::stat::*;

    pub struct RunStatBuilder {
        begin: time::Instant,
        cycles_with_l2: Option<u64>,
        cycles_l1_only: Option<u64>,
        elapsed: Option<time::Duration>,
    }

    impl RunStatBuilder {
        pub fn new() -> Self {
            Self {
                begin: time::Instant::now(),
                cycles_with_l2: None,
                cycles_l1_only: None,
                elapsed: None,
            }
        }
        pub fn cycles(&mut self, with_l2: u64, l1_only: u64) {
            self.cycles_with_l2 = Some(with_l2);
            self.cycles_l1_only = Some(l1_only);
        }
        pub fn stop_timer(&mut self) {
            self.elapsed = Some(time::Instant::now() - self.begin)
        }
        pub fn finish(&self) -> RunStat {
            RunStat {
                cycles_with_l2: self.cycles_with_l2.unwrap(),
                cycles_l1_only: self.cycles_l1_only.unwrap(),
                elapsed: self.elapsed.unwrap(),
            }
        }
    }

    impl Default for RunStatBuilder {
        fn default() -> Self {
            Self::new()
        }
    }

    #[derive(Debug, Clone)]
    pub struct RunStat {
        cycles_with_l2: u64,
        cycles_l1_only: u64,
        elapsed: time::Duration,
    }

    impl Stat for RunStat {
        fn view(&self) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ RunStat {
        fn header(&self) -> &'static str {
            "simulation run"
        }
        fn width(&self) -> usize {
            30
        }
    }

    impl fmt::Display for &'_ RunStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let us = format!("{} us", self.elapsed.as_micros());
            writeln!(f, "  elapsed total: {us:>13}")?;
            let with_l2 = format!("#{}", self.cycles_with_l2);
            writeln!(f, "  cycles, L1+L2: {with_l2:>13}")?;
            let l1_only = format!("#{}", self.cycles_l1_only);
            writeln!(f, "  cycles, L1 only: {l1_only:>11}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::CacheStatus::{Hit, Miss};

    fn config(
        blocks_per_set: usize,
        words_per_block: usize,
        cache_size: usize,
        policy: ReplacementPolicy,
    ) -> SimConfig {
        SimConfig {
            blocks_per_set,
            words_per_block,
            cache_size,
            replacement_policy: policy,
            num_addr_bits: 4,
        }
    }

    fn addrs(v: &[u64]) -> Vec<WordAddr> {
        v.iter().copied().map(WordAddr::new).collect()
    }

    fn statuses(refs: &[Reference]) -> Vec<CacheStatus> {
        refs.iter().map(|r| r.cache_status.unwrap()).collect()
    }

    #[test]
    fn direct_mapped_round_robin_hits_on_the_second_lap() {
        let sim = Simulator::new(config(1, 1, 4, ReplacementPolicy::Lru));
        let out = sim.run(&addrs(&[0, 1, 2, 3, 0, 1, 2, 3])).unwrap();
        assert_eq!(
            statuses(&out.refs),
            vec![Miss, Miss, Miss, Miss, Hit, Hit, Hit, Hit]
        );
    }

    #[test]
    fn repeated_address_misses_then_hits() {
        let sim = Simulator::new(config(1, 1, 4, ReplacementPolicy::Lru));
        let out = sim.run(&addrs(&[9, 9])).unwrap();
        assert_eq!(statuses(&out.refs), vec![Miss, Hit]);
    }

    #[test]
    fn fully_associative_lru_evicts_the_least_recently_seen() {
        // 1 set of 2 blocks; the fourth reference overflows the set and
        // evicts 6, the least recently seen, so 5 stays resident
        let sim = Simulator::new(config(2, 1, 2, ReplacementPolicy::Lru));
        let out = sim.run(&addrs(&[5, 6, 5, 7, 5])).unwrap();
        assert_eq!(statuses(&out.refs), vec![Miss, Miss, Hit, Miss, Hit]);
        assert!(out
            .l1
            .fetch_block(SetSelector::Whole, Some(5))
            .is_some());
        assert!(out
            .l1
            .fetch_block(SetSelector::Whole, Some(6))
            .is_none());
    }

    #[test]
    fn mru_eviction_keeps_the_older_residents() {
        let sim = Simulator::new(config(2, 1, 2, ReplacementPolicy::Mru));
        let out = sim.run(&addrs(&[1, 2, 3, 2])).unwrap();
        assert_eq!(statuses(&out.refs), vec![Miss, Miss, Miss, Miss]);
        // the third reference evicted 2 (most recent at the time), and the
        // fourth found it again in L2
        let costs = CycleCostTable::default();
        assert_eq!(out.cycles_with_l2, 3 * costs.memory + costs.l2_hit);
        assert_eq!(out.cycles_l1_only, 4 * costs.memory);
        assert!(out
            .l2
            .fetch_block(SetSelector::Whole, Some(2))
            .is_some());
    }

    #[test]
    fn both_passes_classify_identically() {
        let sim = Simulator::new(config(2, 2, 8, ReplacementPolicy::Lru));
        let out = sim
            .run(&addrs(&[3, 180, 43, 2, 191, 88, 190, 14, 181, 44, 186, 253]))
            .unwrap();
        assert_eq!(statuses(&out.refs), statuses(&out.refs_l1_only));
    }

    #[test]
    fn an_l2_never_costs_extra_cycles() {
        let sequences: [&[u64]; 4] = [
            &[0, 1, 2, 3, 0, 1, 2, 3],
            &[5, 6, 5, 7, 5],
            &[1, 2, 3, 2, 1, 3, 2, 9, 1],
            &[3, 180, 43, 2, 191, 88, 190, 14, 181, 44, 186, 253],
        ];
        for policy in [ReplacementPolicy::Lru, ReplacementPolicy::Mru] {
            for seq in sequences {
                let sim = Simulator::new(config(2, 1, 4, policy));
                let out = sim.run(&addrs(seq)).unwrap();
                assert!(
                    out.cycles_with_l2 <= out.cycles_l1_only,
                    "policy {policy}, sequence {seq:?}"
                );
            }
        }
    }

    #[test]
    fn costs_scale_with_the_table() {
        let costs = CycleCostTable {
            l1_hit: 2,
            l2_hit: 20,
            memory: 200,
        };
        let sim = Simulator::with_costs(config(1, 1, 4, ReplacementPolicy::Lru), costs);
        let out = sim.run(&addrs(&[0, 0, 0])).unwrap();
        assert_eq!(out.cycles_with_l2, costs.memory + 2 * costs.l1_hit);
        assert_eq!(out.cycles_l1_only, costs.memory + 2 * costs.l1_hit);
    }

    #[test]
    fn a_bad_configuration_aborts_before_any_classification() {
        let sim = Simulator::new(config(0, 1, 4, ReplacementPolicy::Lru));
        let err = sim.run(&addrs(&[1, 2])).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfiguration(_)));
    }

    #[test]
    fn an_empty_reference_list_is_a_valid_run() {
        let sim = Simulator::new(config(1, 1, 4, ReplacementPolicy::Lru));
        let out = sim.run(&[]).unwrap();
        assert!(out.refs.is_empty());
        assert_eq!(out.cycles_with_l2, 0);
        assert_eq!(out.cycles_l1_only, 0);
    }
}
