//! tpccf command-line interface.
//!
//! Runs the cluster finder on JSON event files, links hit rows and compares
//! the serial and parallel backends on synthetic data.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use log::{info, warn, LevelFilter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tpccf_algorithms::{
    Backend, ClusterFinder, ClusterFinderConfig, EventSummary, Executor, KernelRegistry,
    McLabelFlattener, NeighborConfig, NeighborFinder,
};
use tpccf_core::{Digit, HitRow, PadGeometry, RowGeometry, RowLinks, SpacePoint};

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cluster finder error: {0}")]
    Core(#[from] tpccf_core::Error),

    #[error("serial and parallel backends disagree on {0}")]
    BackendMismatch(&'static str),
}

/// Input of `tpccf process`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct EventFile {
    geometry: RowGeometry,
    events: Vec<Vec<Digit>>,
}

/// One event that made it through the cluster finder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ProcessedEvent {
    event: usize,
    summary: EventSummary,
}

/// Output of `tpccf process`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
struct ProcessReport {
    events: Vec<ProcessedEvent>,
    dropped: Vec<usize>,
}

/// TPC cluster finder and row neighbor linker.
#[derive(Parser)]
#[command(name = "tpccf")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find peaks and noisy pads in every event of a digit file
    Process {
        /// JSON file with the pad geometry and the digits of each event
        #[arg(long)]
        digits: PathBuf,

        /// JSON cluster finder configuration; missing fields keep defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run every stage on the calling thread
        #[arg(long)]
        serial: bool,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Link the hits of adjacent rows
    Link {
        /// JSON file with hit rows ordered by radius
        #[arg(long)]
        hits: PathBuf,

        /// JSON neighbor finder configuration; missing fields keep defaults
        #[arg(long)]
        config: Option<PathBuf>,

        /// Run on the calling thread
        #[arg(long)]
        serial: bool,

        /// Output file path (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Time both backends on synthetic data and check they agree
    Benchmark {
        /// Number of pad rows
        #[arg(long, default_value = "64")]
        rows: usize,

        /// Pads per row
        #[arg(long, default_value = "120")]
        pads: usize,

        /// Time bins per event
        #[arg(long, default_value = "2000")]
        time_bins: u32,

        /// Number of synthetic clusters
        #[arg(long, default_value = "5000")]
        clusters: usize,

        /// Number of iterations
        #[arg(short, long, default_value = "3")]
        iterations: usize,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// List the kernels every stage registers
    Kernels,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

fn read_config<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    path.map_or_else(|| Ok(T::default()), read_json)
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    match path {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, value)?;
            writer.flush()?;
        }
        None => {
            let mut stdout = io::stdout().lock();
            serde_json::to_writer_pretty(&mut stdout, value)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

/// Runs the cluster finder over every event of `file`.
///
/// Events the cluster finder rejects are dropped and listed in the report.
fn process_events(file: EventFile, config: ClusterFinderConfig) -> Result<ProcessReport> {
    let mut registry = KernelRegistry::new();
    let mut finder = ClusterFinder::new(file.geometry, config, &mut registry)?;
    let mut report = ProcessReport::default();
    for (event, digits) in file.events.iter().enumerate() {
        match finder.process_event(digits) {
            Ok(summary) => report.events.push(ProcessedEvent { event, summary }),
            Err(e) => {
                warn!("dropping event {}: {}", event, e);
                report.dropped.push(event);
            }
        }
    }
    Ok(report)
}

fn link_rows(rows: &[HitRow], config: NeighborConfig, backend: Backend) -> Result<Vec<RowLinks>> {
    let finder = NeighborFinder::new(config, Executor::new(backend), &mut KernelRegistry::new())?;
    Ok(finder.find_links(rows)?)
}

/// Deterministic linear congruential generator for synthetic data.
struct Lcg(u64);

impl Lcg {
    fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.0 >> 33) as u32
    }

    fn below(&mut self, n: usize) -> usize {
        self.next_u32() as usize % n.max(1)
    }

    fn uniform(&mut self, lo: f32, hi: f32) -> f32 {
        lo + (hi - lo) * (self.next_u32() >> 8) as f32 / (1u32 << 23) as f32
    }
}

/// Event of 3x3 blobs on a uniform geometry.
fn synthetic_event(geo: &RowGeometry, time_bins: u32, clusters: usize, seed: u64) -> Vec<Digit> {
    let mut rng = Lcg(seed);
    let mut digits = Vec::with_capacity(clusters * 9);
    for _ in 0..clusters {
        let row = rng.below(geo.num_rows());
        let pad = rng.below(geo.num_pads(row)) as i64;
        let time = i64::from(rng.next_u32() % time_bins.max(1));
        let q = rng.uniform(20.0, 400.0);
        for dp in -1..=1i64 {
            for dt in -1..=1i64 {
                let (p, t) = (pad + dp, time + dt);
                if !geo.contains(row, p) || t < 0 || t >= i64::from(time_bins) {
                    continue;
                }
                let falloff = 1.0 / (1 + dp.abs() + dt.abs()) as f32;
                digits.push(Digit::new(row as u16, p as u16, t as u32, q * falloff));
            }
        }
    }
    digits
}

/// Straight tracks crossing every row plus uniform noise hits.
fn synthetic_hits(rows: usize, tracks: usize, seed: u64) -> Vec<HitRow> {
    let mut rng = Lcg(seed);
    let params: Vec<(f32, f32, f32)> = (0..tracks)
        .map(|_| {
            (
                rng.uniform(-0.4, 0.4),
                rng.uniform(-1.0, 1.0),
                rng.uniform(0.0, 200.0),
            )
        })
        .collect();
    (0..rows)
        .map(|row| {
            let x = 85.0 + row as f32;
            let mut hits: Vec<_> = params
                .iter()
                .map(|&(ty, tz, z0)| SpacePoint::new(ty * x, z0 + tz * (x - 85.0)))
                .collect();
            for _ in 0..tracks / 4 {
                hits.push(SpacePoint::new(rng.uniform(-40.0, 40.0), rng.uniform(0.0, 250.0)));
            }
            HitRow::new(x, hits)
        })
        .collect()
}

/// Runs `f` `iterations` times, returning the last result and the times in
/// milliseconds.
fn time_runs<T>(iterations: usize, mut f: impl FnMut() -> Result<T>) -> Result<(T, Vec<f64>)> {
    let start = Instant::now();
    let mut last = f()?;
    let mut times = vec![start.elapsed().as_secs_f64() * 1000.0];
    for _ in 1..iterations {
        let start = Instant::now();
        last = f()?;
        times.push(start.elapsed().as_secs_f64() * 1000.0);
    }
    Ok((last, times))
}

fn print_times(name: &str, times: &[f64]) {
    let min_time = times.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_time = times.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let mean_time = times.iter().sum::<f64>() / times.len() as f64;
    println!(
        "{:<20} | {:<15.2} | {:<15.2} | {:<15.2}",
        name, mean_time, min_time, max_time
    );
}

fn benchmark(
    rows: usize,
    pads: usize,
    time_bins: u32,
    clusters: usize,
    iterations: usize,
    seed: u64,
) -> Result<()> {
    let geo = RowGeometry::uniform(rows, pads)?;
    let digits = synthetic_event(&geo, time_bins, clusters, seed);
    let hits = synthetic_hits(rows, clusters / rows.max(1), seed);
    println!(
        "Synthetic event: {} rows x {} pads, {} time bins, {} digits",
        rows,
        pads,
        time_bins,
        digits.len()
    );
    println!(
        "{:<20} | {:<15} | {:<15} | {:<15}",
        "Stage", "Mean (ms)", "Min (ms)", "Max (ms)"
    );
    println!("{:-<75}", "");

    let mut summaries = Vec::new();
    let mut links = Vec::new();
    for backend in [Backend::Serial, Backend::Parallel] {
        let config = ClusterFinderConfig::default().with_backend(backend);
        let mut finder = ClusterFinder::new(geo.clone(), config, &mut KernelRegistry::new())?;
        let (summary, times) = time_runs(iterations, || Ok(finder.process_event(&digits)?))?;
        print_times(&format!("peaks ({:?})", backend), &times);
        summaries.push(summary);

        let (row_links, times) =
            time_runs(iterations, || link_rows(&hits, NeighborConfig::default(), backend))?;
        print_times(&format!("links ({:?})", backend), &times);
        links.push(row_links);
    }

    if summaries[0] != summaries[1] {
        return Err(CliError::BackendMismatch("peaks"));
    }
    if links[0] != links[1] {
        return Err(CliError::BackendMismatch("row links"));
    }
    println!(
        "Backends agree: {} peaks, {} noisy pads, {} hits linked on both sides",
        summaries[0].peaks.len(),
        summaries[0].noisy_pads.len(),
        links[0].iter().map(RowLinks::linked).sum::<usize>()
    );
    Ok(())
}

fn kernels() -> Result<()> {
    let mut registry = KernelRegistry::new();
    let executor = Executor::default();
    ClusterFinder::new(
        RowGeometry::uniform(1, 1)?,
        ClusterFinderConfig::default(),
        &mut registry,
    )?;
    McLabelFlattener::new(executor, &mut registry);
    NeighborFinder::new(NeighborConfig::default(), executor, &mut registry)?;

    println!("{:<32} | {:<10}", "Kernel", "Group size");
    println!("{:-<45}", "");
    for kernel in registry.iter() {
        println!("{:<32} | {:<10}", kernel.name, kernel.group_size);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Process {
            digits,
            config,
            serial,
            output,
        } => {
            let mut config: ClusterFinderConfig = read_config(config.as_deref())?;
            if serial {
                config.backend = Backend::Serial;
            }
            let file: EventFile = read_json(&digits)?;
            info!(
                "{}: {} events, {} rows",
                digits.display(),
                file.events.len(),
                file.geometry.num_rows()
            );

            let start = Instant::now();
            let report = process_events(file, config)?;
            let peaks: usize = report.events.iter().map(|e| e.summary.peaks.len()).sum();
            info!(
                "{} events processed, {} dropped, {} peaks in {:.2?}",
                report.events.len(),
                report.dropped.len(),
                peaks,
                start.elapsed()
            );
            write_json(output.as_deref(), &report)?;
        }

        Commands::Link {
            hits,
            config,
            serial,
            output,
        } => {
            let config: NeighborConfig = read_config(config.as_deref())?;
            let backend = if serial {
                Backend::Serial
            } else {
                Backend::Parallel
            };
            let rows: Vec<HitRow> = read_json(&hits)?;
            let start = Instant::now();
            let links = link_rows(&rows, config, backend)?;
            info!("linked {} rows in {:.2?}", rows.len(), start.elapsed());
            write_json(output.as_deref(), &links)?;
        }

        Commands::Benchmark {
            rows,
            pads,
            time_bins,
            clusters,
            iterations,
            seed,
        } => benchmark(rows, pads, time_bins, clusters, iterations, seed)?,

        Commands::Kernels => kernels()?,
    }

    Ok(())
}
