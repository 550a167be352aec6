//! Rank-based LRU bookkeeping for one set.
//!
//! Every valid line carries a rank in `0..ways`, 0 being the most recently
//! used. Ranks of the valid lines in a set are pairwise distinct, so the
//! victim of a full set is simply the line holding the highest rank.

use crate::cache::CacheLine;

/// Where an access landed within its set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Tag matched a valid line.
    Hit(usize),
    /// Tag missed and the lowest-indexed invalid line was taken.
    MissEmpty(usize),
    /// Tag missed in a full set; the least recently used line is replaced.
    MissEvict(usize),
}

impl Lookup {
    pub fn way(self) -> usize {
        match self {
            Lookup::Hit(way) | Lookup::MissEmpty(way) | Lookup::MissEvict(way) => way,
        }
    }

    pub fn is_hit(self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// Scans the set in way order. A hit or an empty slot ends the scan; a full
/// set without a match yields the line with the highest rank.
pub fn find(set: &[CacheLine], tag: u32) -> Lookup {
    let mut victim: Option<(usize, usize)> = None;
    for (way, line) in set.iter().enumerate() {
        if !line.valid {
            return Lookup::MissEmpty(way);
        }
        if line.tag == tag {
            return Lookup::Hit(way);
        }
        if victim.map_or(true, |(_, rank)| line.rank > rank) {
            victim = Some((way, line.rank));
        }
    }
    Lookup::MissEvict(victim.map_or(0, |(way, _)| way))
}

/// Moves the accessed line to rank 0 and ages the lines it overtook.
/// All rank arithmetic wraps modulo the set's associativity.
pub fn promote(set: &mut [CacheLine], lookup: Lookup) {
    let ways = set.len();
    let bump = |rank: usize| (rank + 1) % ways;

    match lookup {
        Lookup::Hit(way) => {
            let pivot = set[way].rank;
            for (other, line) in set.iter_mut().enumerate() {
                if other != way && line.valid && line.rank < pivot {
                    line.rank = bump(line.rank);
                }
            }
        }
        // Lower ways were filled earlier, so they all move back by one.
        Lookup::MissEmpty(way) => {
            for line in set[..way].iter_mut().filter(|line| line.valid) {
                line.rank = bump(line.rank);
            }
        }
        Lookup::MissEvict(_) => {
            for line in set.iter_mut() {
                line.rank = bump(line.rank);
            }
        }
    }
    set[lookup.way()].rank = 0;
}
