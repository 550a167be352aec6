use std::{fmt, iter};

use crate::{
    replace::{self, Lookup},
    stats::Stats,
};

/// A 32-bit byte address split into its cache fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Addr {
    pub offset: u32,
    pub set: usize,
    pub tag: u32,
}

#[derive(Debug, Clone, Copy)]
struct BitSection {
    shift: u32,
    mask: u32,
}

impl BitSection {
    fn new(shift: u32, width: u32) -> Self {
        let mask = 1u32.checked_shl(width).map_or(u32::MAX, |bit| bit - 1);
        BitSection { shift, mask }
    }

    fn apply(&self, num: u32) -> u32 {
        num.checked_shr(self.shift).unwrap_or(0) & self.mask
    }
}

/// Splits addresses into `tag | index | offset` for a given geometry.
#[derive(Debug, Clone, Copy)]
pub struct AddressDecoder {
    offset_sec: BitSection,
    set_sec: BitSection,
    tag_sec: BitSection,
}

impl AddressDecoder {
    /// `block_size` and `n_sets` must be powers of two whose bit widths sum
    /// to at most 32; `Config::validate` checks this before construction.
    pub fn new(block_size: usize, n_sets: usize) -> Self {
        assert!(block_size.is_power_of_two());
        assert!(n_sets.is_power_of_two());

        let offset_bits = block_size.ilog2();
        let index_bits = n_sets.ilog2();
        assert!(offset_bits + index_bits <= u32::BITS);

        AddressDecoder {
            offset_sec: BitSection::new(0, offset_bits),
            set_sec: BitSection::new(offset_bits, index_bits),
            tag_sec: BitSection::new(offset_bits + index_bits, u32::BITS - offset_bits - index_bits),
        }
    }

    pub fn split(&self, addr: u32) -> Addr {
        Addr {
            offset: self.offset_sec.apply(addr),
            set: self.set_sec.apply(addr) as usize,
            tag: self.tag_sec.apply(addr),
        }
    }

    pub fn offset_bits(&self) -> u32 {
        self.set_sec.shift
    }

    pub fn index_bits(&self) -> u32 {
        self.tag_sec.shift - self.set_sec.shift
    }

    pub fn tag_bits(&self) -> u32 {
        u32::BITS - self.tag_sec.shift
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Read => f.write_str("read"),
            AccessKind::Write => f.write_str("write"),
        }
    }
}

/// One decoded memory access fed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub kind: AccessKind,
    pub addr: u32,
}

/// Per-access result handed back to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessOutcome {
    pub kind: AccessKind,
    pub addr: Addr,
    pub lookup: Lookup,
    pub evicted_was_dirty: bool,
    /// Running cycle total including this access.
    pub cycles: u64,
}

impl AccessOutcome {
    pub fn is_hit(&self) -> bool {
        self.lookup.is_hit()
    }

    pub fn line(&self) -> usize {
        self.lookup.way()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheLine {
    pub tag: u32,
    /// Recency rank in `0..ways`, 0 = most recently used. Meaningless while invalid.
    pub rank: usize,
    pub valid: bool,
    pub dirty: bool,
}

/// Cycle cost of each outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub hit_cycles: u64,
    pub fetch_penalty: u64,
    pub write_back_penalty: u64,
}

/// Set-associative, write-back, write-allocate cache with rank-based LRU.
#[derive(Debug)]
pub struct Cache {
    lines: Vec<CacheLine>,
    pub n_ways: usize,
    pub n_sets: usize,
    decoder: AddressDecoder,
    timing: Timing,
    dirty_on_write_miss: bool,
    stats: Stats,
}

impl Cache {
    pub fn new(
        block_size: usize,
        n_sets: usize,
        n_ways: usize,
        timing: Timing,
        dirty_on_write_miss: bool,
    ) -> Self {
        assert!(n_ways > 0);

        Cache {
            lines: iter::repeat(CacheLine::default())
                .take(n_sets * n_ways)
                .collect(),
            n_ways,
            n_sets,
            decoder: AddressDecoder::new(block_size, n_sets),
            timing,
            dirty_on_write_miss,
            stats: Stats::default(),
        }
    }

    /// Runs one access to completion: decode, lookup, state update,
    /// recency update and accounting.
    pub fn access(&mut self, access: Access) -> AccessOutcome {
        let addr = self.decoder.split(access.addr);
        let lookup = self.lookup(addr.set, addr.tag);
        let evicted_was_dirty = self.touch(addr.set, addr.tag, access.kind, lookup);
        self.update_recency(addr.set, lookup);
        self.account(access.kind, lookup, evicted_was_dirty);

        let outcome = AccessOutcome {
            kind: access.kind,
            addr,
            lookup,
            evicted_was_dirty,
            cycles: self.stats.cycles,
        };
        tracing::trace!(?outcome, "access");
        outcome
    }

    /// Finds the line for `tag` in `set`. An empty slot is claimed
    /// (marked valid) immediately; its tag is written by `touch`.
    pub fn lookup(&mut self, set: usize, tag: u32) -> Lookup {
        let lines = self.set_mut(set);
        let lookup = replace::find(lines, tag);
        if let Lookup::MissEmpty(way) = lookup {
            lines[way].valid = true;
        }
        lookup
    }

    /// Installs or updates the selected line and reports whether a dirty
    /// line was displaced.
    pub fn touch(&mut self, set: usize, tag: u32, kind: AccessKind, lookup: Lookup) -> bool {
        let dirty_on_write_miss = self.dirty_on_write_miss;
        let line = &mut self.set_mut(set)[lookup.way()];
        match lookup {
            Lookup::Hit(_) => {
                if kind == AccessKind::Write {
                    line.dirty = true;
                }
                false
            }
            Lookup::MissEmpty(_) | Lookup::MissEvict(_) => {
                let evicted_was_dirty = matches!(lookup, Lookup::MissEvict(_)) && line.dirty;
                line.tag = tag;
                line.dirty = dirty_on_write_miss && kind == AccessKind::Write;
                evicted_was_dirty
            }
        }
    }

    pub fn update_recency(&mut self, set: usize, lookup: Lookup) {
        replace::promote(self.set_mut(set), lookup);
    }

    /// Charges the access to the running statistics.
    pub fn account(&mut self, kind: AccessKind, lookup: Lookup, evicted_was_dirty: bool) {
        let hit = lookup.is_hit();
        self.stats.record(kind, hit);
        self.stats.cycles += self.timing.hit_cycles;
        if !hit {
            if evicted_was_dirty {
                self.stats.write_backs += 1;
                self.stats.cycles += self.timing.write_back_penalty;
            }
            self.stats.cycles += self.timing.fetch_penalty;
        }
    }

    /// The lines of `set`, in way order.
    pub fn set(&self, set: usize) -> &[CacheLine] {
        &self.lines[self.set_range(set)]
    }

    fn set_mut(&mut self, set: usize) -> &mut [CacheLine] {
        let range = self.set_range(set);
        &mut self.lines[range]
    }

    fn set_range(&self, set: usize) -> std::ops::Range<usize> {
        debug_assert!(set < self.n_sets);
        set * self.n_ways..(set + 1) * self.n_ways
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn decoder(&self) -> &AddressDecoder {
        &self.decoder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const REFERENCE_TIMING: Timing = Timing {
        hit_cycles: 1,
        fetch_penalty: 50,
        write_back_penalty: 50,
    };

    fn read(addr: u32) -> Access {
        Access {
            kind: AccessKind::Read,
            addr,
        }
    }

    fn write(addr: u32) -> Access {
        Access {
            kind: AccessKind::Write,
            addr,
        }
    }

    /// Address for `tag` in `set` under the reference 1024 x 32B geometry.
    fn at(tag: u32, set: u32) -> u32 {
        tag << 15 | set << 5
    }

    fn reference_cache() -> Cache {
        Config::default().to_cache().unwrap()
    }

    fn assert_ranks_unique(cache: &Cache) {
        for set in 0..cache.n_sets {
            let mut ranks: Vec<usize> = cache
                .set(set)
                .iter()
                .filter(|l| l.valid)
                .map(|l| l.rank)
                .collect();
            ranks.sort_unstable();
            let expected: Vec<usize> = (0..ranks.len()).collect();
            assert_eq!(ranks, expected, "set {set} ranks are not a prefix permutation");
        }
    }

    #[test]
    fn decoder_reference_widths() {
        let decoder = AddressDecoder::new(32, 1024);
        assert_eq!(decoder.offset_bits(), 5);
        assert_eq!(decoder.index_bits(), 10);
        assert_eq!(decoder.tag_bits(), 17);

        let addr = decoder.split(0xDEAD_BEEF);
        assert_eq!(addr.offset, 0xDEAD_BEEF & 0x1F);
        assert_eq!(addr.set as u32, (0xDEAD_BEEF & 0x7FE0) >> 5);
        assert_eq!(addr.tag, (0xDEAD_BEEF & 0xFFFF_8000) >> 15);
    }

    #[test]
    fn decoder_other_geometries() {
        let decoder = AddressDecoder::new(64, 256);
        assert_eq!(
            (decoder.offset_bits(), decoder.index_bits(), decoder.tag_bits()),
            (6, 8, 18)
        );
        let addr = decoder.split(u32::MAX);
        assert_eq!(addr, Addr { offset: 63, set: 255, tag: (1 << 18) - 1 });

        // single set: no index bits
        let decoder = AddressDecoder::new(32, 1);
        assert_eq!(decoder.split(0x40), Addr { offset: 0, set: 0, tag: 2 });

        // no tag bits left
        let decoder = AddressDecoder::new(1 << 16, 1 << 16);
        assert_eq!(decoder.tag_bits(), 0);
        assert_eq!(decoder.split(u32::MAX).tag, 0);
        assert_eq!(decoder.split(u32::MAX).set, 0xFFFF);
    }

    #[test]
    fn fresh_cache_is_empty() {
        let cache = reference_cache();
        assert_eq!(cache.n_sets, 1024);
        assert_eq!(cache.n_ways, 4);
        assert!(cache
            .set(1023)
            .iter()
            .all(|l| *l == CacheLine::default()));
        assert_eq!(cache.stats(), &Stats::default());
    }

    #[test]
    fn hit_after_miss_on_same_line() {
        let mut cache = reference_cache();
        let first = cache.access(read(0x1234_5678));
        let second = cache.access(read(0x1234_5678 ^ 0x1F));

        assert_eq!(first.lookup, Lookup::MissEmpty(0));
        assert_eq!(second.lookup, Lookup::Hit(0));
        assert_eq!(cache.set(second.addr.set)[0].rank, 0);
        assert_eq!(second.cycles, 1 + 50 + 1);
    }

    #[test]
    fn cold_fill_order() {
        let mut cache = reference_cache();
        for tag in 0..4 {
            let outcome = cache.access(read(at(tag, 7)));
            assert_eq!(outcome.lookup, Lookup::MissEmpty(tag as usize));
            assert!(!outcome.evicted_was_dirty);
        }
        let ranks: Vec<usize> = cache.set(7).iter().map(|l| l.rank).collect();
        assert_eq!(ranks, vec![3, 2, 1, 0]);
        assert!(cache.set(6).iter().all(|l| !l.valid));
        assert!(cache.set(8).iter().all(|l| !l.valid));
    }

    #[test]
    fn eviction_selects_lru() {
        let mut cache = reference_cache();
        for tag in 0..4 {
            cache.access(read(at(tag, 3)));
        }
        // touch 0 and 2, so 1 becomes least recently used
        cache.access(read(at(0, 3)));
        cache.access(read(at(2, 3)));
        let lru = cache.set(3).iter().position(|l| l.rank == 3).unwrap();
        assert_eq!(lru, 1);

        let outcome = cache.access(read(at(9, 3)));
        assert_eq!(outcome.lookup, Lookup::MissEvict(1));
        assert_eq!(cache.set(3)[1].tag, 9);
        assert_eq!(cache.set(3)[1].rank, 0);
        assert_ranks_unique(&cache);

        // the evicted tag is gone
        assert!(!cache.access(read(at(1, 3))).is_hit());
    }

    #[test]
    fn write_hit_dirties_and_eviction_writes_back() {
        let mut cache = reference_cache();
        for tag in 0..4 {
            cache.access(read(at(tag, 0)));
        }
        let hit = cache.access(write(at(0, 0)));
        assert!(hit.is_hit());
        assert!(!hit.evicted_was_dirty);
        assert!(cache.set(0)[0].dirty);
        assert_eq!(cache.stats().write_backs, 0);

        // tags 1, 2, 3 are older than 0: three clean evictions first
        for tag in 4..7 {
            let before = cache.stats().cycles;
            let outcome = cache.access(read(at(tag, 0)));
            assert!(!outcome.evicted_was_dirty);
            assert_eq!(outcome.cycles - before, 51);
        }
        let before = cache.stats().cycles;
        let outcome = cache.access(read(at(7, 0)));
        assert_eq!(outcome.lookup, Lookup::MissEvict(0));
        assert!(outcome.evicted_was_dirty);
        assert_eq!(outcome.cycles - before, 101);
        assert_eq!(cache.stats().write_backs, 1);
        assert!(!cache.set(0)[0].dirty);
    }

    #[test]
    fn write_miss_installs_clean_line() {
        let mut cache = reference_cache();
        let outcome = cache.access(write(at(5, 1)));
        assert_eq!(outcome.lookup, Lookup::MissEmpty(0));
        let line = cache.set(1)[0];
        assert!(line.valid);
        assert_eq!(line.tag, 5);
        assert!(!line.dirty);

        let mut evicting = reference_cache();
        for tag in 0..4 {
            evicting.access(read(at(tag, 1)));
        }
        let outcome = evicting.access(write(at(9, 1)));
        assert_eq!(outcome.lookup, Lookup::MissEvict(0));
        assert!(!evicting.set(1)[0].dirty);
    }

    #[test]
    fn end_to_end_two_way_single_set() {
        let trace = [write(0x00), write(0x20), write(0x40)];

        // Reference policy: write misses install clean lines.
        let mut cache = Cache::new(32, 1, 2, REFERENCE_TIMING, false);
        let outcomes: Vec<_> = trace.iter().map(|&a| cache.access(a)).collect();
        assert_eq!(outcomes[0].lookup, Lookup::MissEmpty(0));
        assert_eq!(outcomes[1].lookup, Lookup::MissEmpty(1));
        assert_eq!(outcomes[2].lookup, Lookup::MissEvict(0));
        assert!(!outcomes[2].evicted_was_dirty);
        assert_eq!(cache.stats().write_backs, 0);
        assert_eq!(cache.stats().cycles, 153);

        // Dirty-on-allocate policy: the evicted line must be written back.
        let mut cache = Cache::new(32, 1, 2, REFERENCE_TIMING, true);
        let outcomes: Vec<_> = trace.iter().map(|&a| cache.access(a)).collect();
        assert!(cache.set(0)[1].dirty);
        assert_eq!(outcomes[2].lookup, Lookup::MissEvict(0));
        assert!(outcomes[2].evicted_was_dirty);
        assert_eq!(cache.stats().write_backs, 1);
        assert_eq!(cache.stats().cycles, 1 + 50 + 1 + 50 + 1 + 50 + 50);
        assert_eq!(cache.set(0)[0].tag, 2);
        assert_eq!(cache.set(0)[0].rank, 0);
        assert_eq!(cache.set(0)[1].rank, 1);
    }

    /// Replays a seeded random stream over a small geometry, so sets fill
    /// and evict constantly, checking counters and ranks after every access.
    fn check_random_stream(ways: usize, seed: u64) {
        crate::test_utils::init();
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut cache = Cache::new(32, 8, ways, REFERENCE_TIMING, false);
        let mut dirty_lines = 0u64;

        for _ in 0..20_000 {
            let kind = if rng.bool() {
                AccessKind::Write
            } else {
                AccessKind::Read
            };
            let addr = rng.u32(0..32 * 8 * 12);
            let before = *cache.stats();
            let outcome = cache.access(Access { kind, addr });

            let stats = cache.stats();
            assert_eq!(stats.hits + stats.misses, stats.accesses);
            assert_eq!(stats.read_hits + stats.read_misses, stats.reads);
            assert_eq!(stats.write_hits + stats.write_misses, stats.writes);
            assert_eq!(stats.reads + stats.writes, stats.accesses);

            let cost = stats.cycles - before.cycles;
            match (outcome.is_hit(), outcome.evicted_was_dirty) {
                (true, _) => assert_eq!(cost, 1),
                (false, false) => assert_eq!(cost, 51),
                (false, true) => assert_eq!(cost, 101),
            }
            if outcome.evicted_was_dirty {
                dirty_lines += 1;
            }
            let line = cache.set(outcome.addr.set)[outcome.line()];
            assert!(line.valid);
            assert_eq!(line.tag, outcome.addr.tag);
            assert_eq!(line.rank, 0);
            assert_ranks_unique(&cache);
        }
        assert_eq!(cache.stats().write_backs, dirty_lines);
        assert!(dirty_lines > 0);
    }

    #[test]
    fn random_stream_keeps_invariants() {
        check_random_stream(4, 0x5eed);
    }

    #[test]
    fn random_stream_keeps_invariants_three_way() {
        check_random_stream(3, 0x3a3);
    }
}
