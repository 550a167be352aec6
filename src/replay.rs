use std::{
    io::{self, Write},
    ops::ControlFlow,
};

use crate::{
    cache::{AccessOutcome, Cache},
    report::Report,
    stats::Stats,
    trace::{Record, Switch},
};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Output switches. Each can be set on the command line or by a trace switch.
#[derive(Debug, Default, Clone, Copy)]
pub struct Flags {
    pub version: bool,
    pub echo: bool,
    pub debug: bool,
}

/// Feeds trace records through the cache and reports what happened.
pub struct Replay<C, M> {
    pub cache: Cache,
    flags: Flags,
    report: Report<C, M>,
    limit: u64,
    heartbeat: u64,
    next_heartbeat: u64,
    version_shown: bool,
}

impl<C: Write, M: Write> Replay<C, M> {
    pub fn new(cache: Cache, flags: Flags, report: Report<C, M>) -> Self {
        Replay {
            cache,
            flags,
            report,
            limit: 0,
            heartbeat: 0,
            next_heartbeat: 0,
            version_shown: false,
        }
    }

    /// Stop after `limit` accesses; 0 runs the whole trace.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Log progress every `interval` accesses; 0 disables it.
    pub fn with_heartbeat(mut self, interval: u64) -> Self {
        self.heartbeat = interval;
        self.next_heartbeat = interval;
        self
    }

    pub fn operate(&mut self, records: &[Record]) -> io::Result<ControlFlow<()>> {
        for record in records {
            match record {
                Record::Switch(switch) => {
                    tracing::debug!(?switch, "switch");
                    match switch {
                        Switch::Version => self.flags.version = true,
                        Switch::Echo => self.flags.echo = true,
                        Switch::Debug => self.flags.debug = true,
                    }
                }
                Record::Access { access, echo } => {
                    // the access after a version switch is read but never simulated
                    if self.flags.version {
                        self.show_version()?;
                        return Ok(ControlFlow::Break(()));
                    }
                    if self.flags.echo {
                        self.report.line(format_args!("{echo}"))?;
                    }
                    let outcome = self.cache.access(*access);
                    if self.flags.debug {
                        self.dump(&outcome)?;
                    }

                    let accesses = self.cache.stats().accesses;
                    if self.heartbeat != 0 && accesses >= self.next_heartbeat {
                        tracing::info!(accesses, cycles = outcome.cycles, "heartbeat");
                        self.next_heartbeat += self.heartbeat;
                    }
                    if self.limit != 0 && accesses >= self.limit {
                        return Ok(ControlFlow::Break(()));
                    }
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    }

    fn show_version(&mut self) -> io::Result<()> {
        self.version_shown = true;
        self.report.console(format_args!("Version {VERSION}"))
    }

    fn dump(&mut self, outcome: &AccessOutcome) -> io::Result<()> {
        let set = outcome.addr.set;
        let result = if outcome.is_hit() { "hit" } else { "miss" };
        self.report.line(format_args!(
            "cache {} {} to line {}",
            outcome.kind,
            result,
            outcome.line()
        ))?;
        if outcome.evicted_was_dirty {
            self.report.line(format_args!(
                "Dirty bit is set. So writing back line {} of set: {} to main memory",
                outcome.line(),
                set
            ))?;
        }

        self.report.line(format_args!("\t\t\tSet: {set}"))?;
        for (way, line) in self.cache.set(set).iter().enumerate() {
            self.report.line(format_args!(
                "Line: {}\tTag: 0x{:05X}\tLRU: {}\tValid: {}\tDirty: {}",
                way,
                line.tag,
                line.rank,
                u8::from(line.valid),
                u8::from(line.dirty)
            ))?;
        }
        Ok(())
    }

    /// Prints the run summary and hands back the final counters and sinks.
    /// A version switch with no access after it still prints the version.
    pub fn finish(mut self) -> io::Result<(Stats, Report<C, M>)> {
        if self.flags.version && !self.version_shown {
            self.show_version()?;
        }
        let stats = *self.cache.stats();
        self.report.line(format_args!("{stats}"))?;
        self.report.flush()?;
        Ok((stats, self.report))
    }
}
