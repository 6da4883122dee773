//! AnchorView Simulator CLI
//!
//! Run deterministic tracking pipeline scenarios.

use anchorview_core::SessionConfig;
use anchorview_sim::scenarios::ScenarioId;
use anchorview_sim::{ScenarioResult, ScenarioRunner};
use clap::Parser;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "anchorview-sim")]
#[command(about = "AnchorView deterministic simulation scenarios")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (name, AV-00N code, or all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Ticks between a load request and its completion
    #[arg(short, long, default_value = "5")]
    latency: u64,

    /// Frames per second fed to the session
    #[arg(long, default_value = "30")]
    tick_rate: u32,

    /// Host scale factor applied to placed models
    #[arg(long, default_value = "0.25")]
    scale: f64,

    /// Session configuration (JSON)
    #[arg(short, long)]
    config: Option<String>,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// List scenarios and exit
    #[arg(long)]
    list: bool,
}

fn init_logging(args: &Args) {
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder().with_env_filter(filter);

    let installed = match &args.log_file {
        Some(path) => {
            let file = match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Error: cannot open log file {}: {}", path, e);
                    std::process::exit(1);
                }
            };
            let subscriber = builder
                .with_ansi(false)
                .with_writer(std::io::stdout.and(Mutex::new(file)))
                .finish();
            tracing::subscriber::set_global_default(subscriber)
        }
        None => tracing::subscriber::set_global_default(builder.finish()),
    };
    installed.expect("Failed to set tracing subscriber");
}

fn main() {
    let args = Args::parse();

    if args.list {
        for (i, scenario) in ScenarioId::all().iter().enumerate() {
            println!("AV-{:03}  {:<22} {}", i + 1, scenario.name(), scenario.description());
        }
        return;
    }

    init_logging(&args);

    if !args.json {
        info!("AnchorView Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = match &args.config {
        Some(path) => SessionConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => SessionConfig::default(),
    };

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!("Run with --list to see available scenarios");
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);

        let runner = ScenarioRunner::new(seed)
            .with_tick_rate(args.tick_rate)
            .with_load_latency(args.latency)
            .with_scale_factor(args.scale)
            .with_config(config.clone());

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }

            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "failure_reason": r.failure_reason,
                    "metrics": r.metrics,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            for result in &all_results {
                if !result.passed {
                    error!(
                        "  - {} seed={}: {}",
                        result.scenario.name(),
                        result.seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
