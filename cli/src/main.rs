mod table;

use std::{fs::File, io::Read, path::PathBuf};

use anyhow::{bail, Context, Result};
use bitmask_enum::bitmask;
use clap::{Parser, ValueEnum};
use core_sim::{
    cache::{CacheDump, ReplacementPolicy},
    config::{DerivedParams, SimConfig},
    reference::Reference,
    sim::{SimulationOutput, Simulator},
    trace::TraceData,
};
use serde::Serialize;
use terminal_size::terminal_size;

use crate::table::{addr_ref_table, cache_table};

/// The fallback character width of the displayed tables.
const DEFAULT_TABLE_WIDTH: usize = 80;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of blocks per set (1 = direct mapped)
    #[arg(long, default_value_t = 1)]
    blocks_per_set: usize,
    /// Number of words per block
    #[arg(long, default_value_t = 1)]
    words_per_block: usize,
    /// Total cache size in words
    #[arg(long)]
    cache_size: usize,
    /// Replacement policy
    #[arg(long, value_enum, default_value = "lru")]
    replacement_policy: PolicyArg,
    /// Minimum address width in bits (widened to fit the largest address)
    #[arg(long, default_value_t = 4)]
    num_addr_bits: u32,
    /// File path to a reference trace
    #[arg(short, long)]
    trace: Option<PathBuf>,
    /// Report sections to hide (repeatable)
    #[arg(long, value_enum)]
    hide: Vec<SectionArg>,
    /// Emit one JSON report instead of tables
    #[arg(long)]
    json: bool,
    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
    /// Word addresses to reference, in order (decimal or 0x hex)
    word_addrs: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    Lru,
    Mru,
}

impl From<PolicyArg> for ReplacementPolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::Lru => Self::Lru,
            PolicyArg::Mru => Self::Mru,
        }
    }
}

#[bitmask(u8)]
enum Section {
    Refs,
    Contents,
    Totals,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SectionArg {
    Refs,
    Contents,
    Totals,
}

impl From<SectionArg> for Section {
    fn from(v: SectionArg) -> Self {
        match v {
            SectionArg::Refs => Self::Refs,
            SectionArg::Contents => Self::Contents,
            SectionArg::Totals => Self::Totals,
        }
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();
    if args.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    let mut trace = TraceData::parse(&args.word_addrs.join(" "))?;
    if let Some(path) = &args.trace {
        let content = {
            let mut buf = String::new();
            let mut file = File::open(path)
                .with_context(|| format!("cannot open trace {}", path.display()))?;
            file.read_to_string(&mut buf)?;
            buf
        };
        trace.extend(TraceData::parse(&content)?);
    }
    if trace.addrs().is_empty() {
        bail!("no word addresses given (pass them as arguments or via --trace)");
    }
    log::info!("parsed {} reference(s).", trace.addrs().len());

    let config = SimConfig {
        blocks_per_set: args.blocks_per_set,
        words_per_block: args.words_per_block,
        cache_size: args.cache_size,
        replacement_policy: args.replacement_policy.into(),
        num_addr_bits: args.num_addr_bits,
    };
    let out = Simulator::new(config).run(trace.addrs())?;

    let mut hidden = Section::none();
    for h in &args.hide {
        hidden = hidden | Section::from(*h);
    }

    if args.json {
        print_json(&out)?;
    } else {
        print_report(&out, hidden);
        output_stat(&out);
    }
    Ok(())
}

fn table_width() -> usize {
    terminal_size()
        .map(|(w, _)| w.0 as usize)
        .unwrap_or(DEFAULT_TABLE_WIDTH)
        .max(DEFAULT_TABLE_WIDTH)
}

fn print_report(out: &SimulationOutput, hidden: Section) {
    let width = table_width();
    println!("Running simulation with L1 and L2 caches...");
    if !hidden.contains(Section::Refs) {
        println!("{}", addr_ref_table(&out.refs, width));
        println!();
    }
    if !hidden.contains(Section::Contents) {
        println!("{}", cache_table(&out.l1.dump(), width));
        println!();
        println!("{}", cache_table(&out.l2.dump(), width));
        println!();
    }
    if !hidden.contains(Section::Totals) {
        println!("Total Cycles with L2: {}", out.cycles_with_l2);
    }

    println!();
    println!("Running simulation with L1 cache only...");
    if !hidden.contains(Section::Refs) {
        println!("{}", addr_ref_table(&out.refs_l1_only, width));
        println!();
    }
    if !hidden.contains(Section::Contents) {
        println!("{}", cache_table(&out.l1_only.dump(), width));
        println!();
    }
    if !hidden.contains(Section::Totals) {
        println!("Total Cycles with L1 only: {}", out.cycles_l1_only);
        println!();
        println!("Comparison of total cycles:");
        println!("Total Cycles with L2: {}", out.cycles_with_l2);
        println!("Total Cycles with L1 only: {}", out.cycles_l1_only);
    }
}

fn output_stat(out: &SimulationOutput) {
    log::info!("statistics:\n{}", out.collect_stat().view());
}

#[derive(Serialize)]
struct Report<'a> {
    params: &'a DerivedParams,
    refs: &'a [Reference],
    refs_l1_only: &'a [Reference],
    l1: CacheDump,
    l2: CacheDump,
    l1_only: CacheDump,
    cycles_with_l2: u64,
    cycles_l1_only: u64,
}

fn print_json(out: &SimulationOutput) -> Result<()> {
    let report = Report {
        params: &out.params,
        refs: &out.refs,
        refs_l1_only: &out.refs_l1_only,
        l1: out.l1.dump(),
        l2: out.l2.dump(),
        l1_only: out.l1_only.dump(),
        cycles_with_l2: out.cycles_with_l2,
        cycles_l1_only: out.cycles_l1_only,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
