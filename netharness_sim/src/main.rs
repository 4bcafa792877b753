//! NetHarness CLI
//!
//! Runs load tests and generations against the built-in topologies and
//! profiles, and analyses recorded transaction batches.

use clap::{Parser, Subcommand};
use netharness_core::records::RunStatus;
use netharness_core::scenario::Scenario;
use netharness_core::transaction::ObservedTransaction;
use netharness_core::{analyze_transaction_patterns, HistoryEntry};
use netharness_env::HarnessContext;
use netharness_sim::{epoch_millis, GenerationOptions, Harness, HarnessConfig, RunExport};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// NetHarness network test harness
#[derive(Parser, Debug)]
#[command(name = "netharness")]
#[command(about = "Simulated network load testing", long_about = None)]
struct Args {
    /// Master seed (overrides the config file)
    #[arg(short, long)]
    seed: Option<u64>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for persistent run history
    #[arg(long)]
    history: Option<PathBuf>,

    /// Wall-clock pause between ticks in milliseconds
    #[arg(long)]
    wall_tick_ms: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for scripting
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List registered topologies
    Topologies,

    /// List load profiles
    Profiles,

    /// Run a load test against a topology and wait for it to finish
    Test {
        #[arg(short, long)]
        topology: String,

        #[arg(short, long)]
        profile: String,

        /// Transaction pattern overriding the profile's default
        #[arg(long)]
        pattern: Option<String>,

        /// Seed for this run only
        #[arg(long)]
        run_seed: Option<u64>,

        /// Write the finished run to a JSON file
        #[arg(long)]
        export: Option<String>,
    },

    /// Run a load-only generation and wait for it to finish
    Generate {
        #[arg(short, long)]
        profile: String,

        /// Comma-separated regions (default: every known region)
        #[arg(long, value_delimiter = ',')]
        regions: Vec<String>,

        #[arg(long)]
        export: Option<String>,
    },

    /// Analyse a JSON array of recorded transactions
    Analyze { file: PathBuf },
}

fn fail(message: impl std::fmt::Display) -> ! {
    error!("{}", message);
    std::process::exit(1);
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => fail(format!("Failed to encode output: {}", e)),
    }
}

fn load_config(args: &Args) -> HarnessConfig {
    let mut config = match &args.config {
        Some(path) => HarnessConfig::from_file(path).unwrap_or_else(|e| fail(e)),
        None => HarnessConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    // 0 = random from time
    if config.seed == 0 {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
        config = config.with_seed(nanos);
    }
    if let Some(ms) = args.wall_tick_ms {
        config.wall_tick_ms = ms;
    }
    if args.history.is_some() {
        config.history_path = args.history.clone();
    }
    if let Err(e) = config.validate() {
        fail(e);
    }
    config
}

fn export_entry(path: &str, label: &str, seed: u64, entry: HistoryEntry) {
    let mut export = RunExport::new(label, seed, epoch_millis(std::time::SystemTime::now()));
    export.add_entry(entry);
    match export.write_to_file(path) {
        Ok(()) => info!("Exported {} to {}", label, path),
        Err(e) => error!("Failed to write export: {}", e),
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
    }

    let config = load_config(&args);
    let harness = Harness::live(config).unwrap_or_else(|e| fail(e));
    info!("NetHarness v{} (seed={})", env!("CARGO_PKG_VERSION"), harness.context.seed());

    let succeeded = match args.command {
        Command::Topologies => {
            let topologies = harness.registry.list_topologies();
            if args.json {
                print_json(&topologies);
            } else {
                for topology in &topologies {
                    println!(
                        "{:<20} {:>3} nodes {:>3} links  {:>8.0} tx/s  {}",
                        topology.id,
                        topology.nodes.len(),
                        topology.links.len(),
                        topology.total_capacity_tps(),
                        topology.name
                    );
                }
            }
            true
        }
        Command::Profiles => {
            let profiles = harness.catalog.list_profiles();
            if args.json {
                print_json(&profiles);
            } else {
                for profile in &profiles {
                    println!(
                        "{:<16} {:>6.0}s  peak {:>6.0} tx/s  pattern={}",
                        profile.id, profile.duration_secs, profile.overall.peak_tps, profile.pattern_id
                    );
                }
            }
            true
        }
        Command::Test {
            topology,
            profile,
            pattern,
            run_seed,
            export,
        } => {
            let mut scenario = Scenario::from_profile(&profile);
            if let Some(pattern) = &pattern {
                scenario = scenario.with_pattern(pattern);
            }
            if let Some(seed) = run_seed {
                scenario = scenario.with_seed(seed);
            }

            let run = harness
                .orchestrator
                .start_network_test(&topology, scenario)
                .unwrap_or_else(|e| fail(e));
            info!("Started test {} on {}", run.id, topology);

            let Some(finished) = harness.orchestrator.wait_for(run.id).await else {
                fail(format!("Test {} vanished", run.id));
            };

            if args.json {
                print_json(&finished);
            } else {
                let results = &finished.results;
                info!(
                    "{:?} after {:.0}s | emitted={} processed={} dropped={} queued={} avg latency {:.1}ms",
                    finished.status,
                    results.elapsed_secs,
                    results.emitted,
                    results.processed,
                    results.dropped,
                    results.queued,
                    results.avg_latency_ms
                );
                for node in &results.nodes {
                    info!(
                        "  {:<16} processed={:<6} dropped={:<6} peak util {:.2}",
                        node.node_id, node.processed, node.dropped, node.peak_utilization
                    );
                }
            }

            let ok = finished.status == RunStatus::Completed;
            if let Some(path) = export {
                export_entry(&path, &topology, harness.config.seed, HistoryEntry::Test(finished));
            }
            ok
        }
        Command::Generate { profile, regions, export } => {
            let options = GenerationOptions {
                regions,
                ..Default::default()
            };
            let generation = harness
                .generations
                .generate_load(&profile, options)
                .unwrap_or_else(|e| fail(e));
            info!("Started generation {} ({})", generation.id, profile);

            let Some(finished) = harness.generations.wait_for(generation.id).await else {
                fail(format!("Generation {} vanished", generation.id));
            };

            if args.json {
                print_json(&finished);
            } else {
                info!(
                    "{:?} | transactions={} errors={}",
                    finished.status, finished.total_transactions, finished.total_errors
                );
                for phase in &finished.phases {
                    info!("  {:<12} {:>7} tx  target {:.0} tx/s", phase.phase, phase.transactions, phase.target_tps);
                }
            }

            let ok = finished.status == RunStatus::Completed;
            if let Some(path) = export {
                export_entry(&path, &profile, harness.config.seed, HistoryEntry::Generation(finished));
            }
            ok
        }
        Command::Analyze { file } => {
            let text = std::fs::read_to_string(&file)
                .unwrap_or_else(|e| fail(format!("Failed to read {}: {}", file.display(), e)));
            let value: serde_json::Value = serde_json::from_str(&text).unwrap_or_else(|e| fail(e));
            let Some(records) = value.as_array() else {
                fail("Expected a JSON array of transactions");
            };
            let observed: Vec<ObservedTransaction> = records.iter().map(ObservedTransaction::from_value).collect();
            let analysis = analyze_transaction_patterns(&observed, &harness.catalog.list_user_behaviors());

            if args.json {
                print_json(&analysis);
            } else {
                info!("{} transactions ({} untyped)", analysis.count, analysis.untyped);
                for share in &analysis.behavior_mix {
                    info!("  {:<16} {:.1}%", share.behavior, share.share * 100.0);
                }
                if let Some(dominant) = &analysis.dominant_behavior {
                    info!("Dominant behavior: {}", dominant);
                }
            }
            true
        }
    };

    if !succeeded {
        std::process::exit(1);
    }
}
