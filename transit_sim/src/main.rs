//! Transit fleet simulator CLI
//!
//! Runs N synthetic vehicles against the fusion core and checks the
//! passenger counters each one published.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use transit_sim::{FleetResult, FleetRunner, RunExport, SimConfig};

#[derive(Parser, Debug)]
#[command(name = "transit-sim")]
#[command(about = "Headless transit vehicle fleet simulator")]
struct Args {
    /// JSON configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of vehicles
    #[arg(short, long, default_value = "1")]
    instances: usize,

    /// Run duration in seconds
    #[arg(short, long, default_value = "120")]
    duration: f64,

    /// Master seed (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON summary on stdout for CI parsing
    #[arg(long)]
    json: bool,

    /// Write the full run export to this file
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging; RUST_LOG overrides --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error: failed to install tracing subscriber: {}", e);
        std::process::exit(1);
    }

    let config = match &args.config {
        Some(path) => SimConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Error: {}: {}", path.display(), e);
            std::process::exit(1);
        }),
        None => SimConfig::default(),
    };

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    if !args.json {
        info!("Transit fleet simulator v{}", env!("CARGO_PKG_VERSION"));
        info!(
            instances = args.instances,
            duration_secs = args.duration,
            seed,
            route = %config.route.name,
            "starting"
        );
    }

    let result = FleetRunner::new(config, seed)
        .with_instances(args.instances)
        .with_duration(args.duration)
        .run()
        .await
        .unwrap_or_else(|e| {
            error!("fleet run failed: {}", e);
            std::process::exit(1);
        });

    if let Some(path) = &args.export {
        match RunExport::from_result(&result).write_to_file(path) {
            Ok(()) => info!("exported run to {}", path.display()),
            Err(e) => {
                error!("export to {} failed: {}", path.display(), e);
                std::process::exit(1);
            }
        }
    }

    if args.json {
        print_json_summary(&result);
    } else {
        log_summary(&result);
    }

    // Exit with proper code for CI
    if !result.passed() {
        std::process::exit(1);
    }
}

fn print_json_summary(result: &FleetResult) {
    let summary = serde_json::json!({
        "seed": result.seed,
        "duration_secs": result.duration_secs,
        "instances": result.vehicles.len(),
        "passed": result.passed(),
        "total_entries": result.total_entries(),
        "total_exits": result.total_exits(),
        "vehicles": result.vehicles.iter().map(|v| {
            serde_json::json!({
                "device_id": v.device_id,
                "onboard": v.final_stats.onboard,
                "total_entries": v.final_stats.total_entries,
                "total_exits": v.final_stats.total_exits,
                "passenger_events": v.passenger_events.len(),
                "state_changes": v.state_changes.len(),
                "dropped_events": v.dropped_events,
                "passed": v.passed,
                "failure_reason": v.failure_reason,
            })
        }).collect::<Vec<_>>(),
    });

    match serde_json::to_string_pretty(&summary) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("failed to render summary: {}", e),
    }
}

fn log_summary(result: &FleetResult) {
    for vehicle in &result.vehicles {
        info!(
            device = %vehicle.device_id,
            onboard = vehicle.final_stats.onboard,
            entries = vehicle.final_stats.total_entries,
            exits = vehicle.final_stats.total_exits,
            label = vehicle.final_label.map(|l| l.as_str()).unwrap_or("-"),
            dropped = vehicle.dropped_events,
            "vehicle summary"
        );
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if result.passed() {
        info!(
            "✅ All {} vehicles passed ({} entries, {} exits)",
            result.vehicles.len(),
            result.total_entries(),
            result.total_exits()
        );
    } else {
        let failed: Vec<_> = result.failed().collect();
        error!("❌ {}/{} vehicles failed!", failed.len(), result.vehicles.len());
        for vehicle in failed {
            error!(
                "  - {}: {}",
                vehicle.device_id,
                vehicle.failure_reason.as_deref().unwrap_or("unknown")
            );
        }
    }
}
