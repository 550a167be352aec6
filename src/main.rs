mod cache;
mod config;
mod error;
mod replace;
mod replay;
mod report;
mod stats;
#[cfg(test)]
mod test_utils;
mod trace;

use std::{
    fs,
    io::{self, BufWriter},
    path::PathBuf,
};

use eyre::{Result, WrapErr};
use tracing_subscriber::EnvFilter;

use crate::{
    config::Config,
    replay::{Flags, Replay, VERSION},
    report::Report,
    stats::StatsReport,
    trace::Trace,
};

const HELP: &str = "\
Replays a memory access trace against a set-associative write-back cache.

USAGE:
  cache_sim [OPTIONS] <TRACE>

TRACE is a text file (optionally .xz compressed) of `r|w <address>` pairs,
with optional -v (version), -t (echo) and -d (debug dump) switches inline.

OPTIONS:
  --config <json>       cache config as inline JSON
  -p <path>             cache config JSON file (default: 1024 sets, 4 ways, 32B lines)
  -o <path>             mirror output into this file [default: Output.txt]
  --no-mirror           do not write a mirror file
  --json <path>         write final statistics as JSON
  --echo                echo every access from the start
  --debug               dump every access from the start
  -i <n>                stop after n accesses (0 = whole trace)
  --heartbeat <n>       log progress every n accesses
  --buffer-size <n>     records per block read ahead [default: 16384]
  --queue-size <n>      blocks queued ahead [default: 32]
  -V, --version         print version and exit
  -h, --help            print this help

Diagnostics go to stderr, filtered by RUST_LOG (default: warn).
";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }
    if args.contains(["-V", "--version"]) {
        println!("Version {VERSION}");
        return Ok(());
    }

    let flags = Flags {
        version: false,
        echo: args.contains("--echo"),
        debug: args.contains("--debug"),
    };
    let no_mirror = args.contains("--no-mirror");
    let limit: u64 = args
        .opt_value_from_str("-i")
        .wrap_err("-i should be an integer")?
        .unwrap_or(0);
    let heartbeat_int: u64 = args
        .opt_value_from_str("--heartbeat")
        .wrap_err("--heartbeat should be an integer")?
        .unwrap_or(0);

    let config = if let Some(config_str) = args.opt_value_from_str::<_, String>("--config")? {
        Config::from_json(&config_str).wrap_err("invalid --config")?
    } else if let Some(config_path) = args.opt_value_from_str::<_, PathBuf>("-p")? {
        let config_str = fs::read_to_string(&config_path)
            .wrap_err_with(|| format!("cannot read config file {}", config_path.display()))?;
        Config::from_json(&config_str)
            .wrap_err_with(|| format!("invalid config file {}", config_path.display()))?
    } else {
        Config::default()
    };

    let stats_path: Option<PathBuf> = args.opt_value_from_str("--json")?;
    let mirror_path: PathBuf = args
        .opt_value_from_str("-o")?
        .unwrap_or_else(|| PathBuf::from("Output.txt"));
    let inst_per_block: usize = args
        .opt_value_from_str("--buffer-size")
        .wrap_err("--buffer-size must be an integer")?
        .unwrap_or(1024 * 16);
    let blocks_per_queue: usize = args
        .opt_value_from_str("--queue-size")
        .wrap_err("--queue-size must be an integer")?
        .unwrap_or(32);
    let trace_path: PathBuf = args
        .free_from_str()
        .wrap_err("Must provide a trace file")?;
    let unused = args.finish();
    if !unused.is_empty() {
        tracing::warn!(?unused, "ignoring unrecognized arguments");
    }

    let cache = config.to_cache().wrap_err("invalid cache geometry")?;
    let decoder = cache.decoder();
    tracing::info!(
        sets = config.sets,
        ways = config.ways,
        block_size = config.block_size,
        offset_bits = decoder.offset_bits(),
        index_bits = decoder.index_bits(),
        tag_bits = decoder.tag_bits(),
        trace = %trace_path.display(),
        "starting replay"
    );

    let mirror = if no_mirror {
        None
    } else {
        let file = fs::File::create(&mirror_path)
            .wrap_err_with(|| format!("cannot create {}", mirror_path.display()))?;
        Some(BufWriter::new(file))
    };
    let report = Report::new(io::stdout(), mirror);

    let trace = Trace::read(trace_path.clone(), inst_per_block, blocks_per_queue)
        .wrap_err_with(|| format!("cannot open trace {}", trace_path.display()))?;

    let mut replay = Replay::new(cache, flags, report)
        .with_limit(limit)
        .with_heartbeat(heartbeat_int);
    for block in trace.rec.iter() {
        let block =
            block.wrap_err_with(|| format!("malformed trace {}", trace_path.display()))?;
        if replay.operate(&block)?.is_break() {
            break;
        }
    }

    let (stats, _) = replay.finish()?;
    tracing::info!(
        accesses = stats.accesses,
        misses = stats.misses,
        cycles = stats.cycles,
        "replay finished"
    );

    if let Some(stats_path) = stats_path {
        let stats_file = fs::File::create(&stats_path)
            .wrap_err_with(|| format!("cannot create {}", stats_path.display()))?;
        serde_json::to_writer_pretty(stats_file, &StatsReport::new(&config, stats))
            .wrap_err("cannot write stats json")?;
    }
    Ok(())
}
