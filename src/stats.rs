use std::fmt;

use serde::Serialize;

use crate::{cache::AccessKind, config::Config};

/// Running counters for one simulation. Only ever incremented.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub reads: u64,
    pub writes: u64,
    pub read_hits: u64,
    pub write_hits: u64,
    pub read_misses: u64,
    pub write_misses: u64,
    pub write_backs: u64,
    pub cycles: u64,
}

impl Stats {
    pub fn record(&mut self, kind: AccessKind, hit: bool) {
        self.accesses += 1;
        match (kind, hit) {
            (AccessKind::Read, true) => {
                self.reads += 1;
                self.read_hits += 1;
            }
            (AccessKind::Read, false) => {
                self.reads += 1;
                self.read_misses += 1;
            }
            (AccessKind::Write, true) => {
                self.writes += 1;
                self.write_hits += 1;
            }
            (AccessKind::Write, false) => {
                self.writes += 1;
                self.write_misses += 1;
            }
        }
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }

    /// 0.0 before the first access.
    pub fn miss_ratio(&self) -> f64 {
        ratio(self.misses, self.accesses)
    }

    pub fn avg_cycles(&self) -> f64 {
        ratio(self.cycles, self.accesses)
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Total number of clockcycles = {}", self.cycles)?;
        writeln!(
            f,
            "accesses = {}; hits = {}; misses = {}; reads = {}; writes = {};",
            self.accesses, self.hits, self.misses, self.reads, self.writes
        )?;
        writeln!(
            f,
            "read hits = {}; write hits = {}; read misses = {}; write misses = {}; write backs = {}",
            self.read_hits, self.write_hits, self.read_misses, self.write_misses, self.write_backs
        )?;
        write!(
            f,
            "Miss ratio = {:.4}, Average cycles per instruction = {:.4}",
            self.miss_ratio(),
            self.avg_cycles()
        )
    }
}

/// Machine-readable end-of-run summary written with `--json`.
#[derive(Debug, Serialize)]
pub struct StatsReport<'a> {
    pub config: &'a Config,
    #[serde(flatten)]
    pub stats: Stats,
    pub miss_ratio: f64,
    pub avg_cycles: f64,
}

impl<'a> StatsReport<'a> {
    pub fn new(config: &'a Config, stats: Stats) -> Self {
        StatsReport {
            config,
            stats,
            miss_ratio: stats.miss_ratio(),
            avg_cycles: stats.avg_cycles(),
        }
    }
}
