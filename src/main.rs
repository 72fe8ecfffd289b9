//! Module Harness CLI
//!
//! Runs the lifecycle test suite of an infrastructure module.

use std::path::PathBuf;
use std::sync::Arc;

use module_harness::coordinator::interrupt_signal;
use module_harness::{
    GcloudRegionCatalog, HarnessConfig, RegionCatalog, RegionSource, RunCoordinator, RunReport,
    StaticRegionCatalog, TerraformEngine, Validate,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 2 || args.iter().any(|a| a == "-h" || a == "--help") {
        eprintln!("Usage: {} [CONFIG]", args[0]);
        eprintln!("\nRuns the module lifecycle suite from the current directory.");
        eprintln!("\nCONFIG is a .yaml/.yml or .toml file; defaults to ./harness.yaml if present.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  GOOGLE_CLOUD_PROJECT (or GOOGLE_PROJECT, GCLOUD_PROJECT, ...)  Target project");
        eprintln!("  RUST_LOG                                                      Log filter");
        std::process::exit(2);
    }

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Failed to read current directory: {}", e);
            std::process::exit(1);
        }
    };

    let loaded = match args.get(1) {
        Some(path) => HarnessConfig::load(PathBuf::from(path)),
        None => HarnessConfig::discover(&cwd),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    match config.validate().into_result() {
        Ok(warnings) => {
            for warning in warnings {
                tracing::warn!("{}", warning);
            }
        }
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    }

    let root = config.resolve_root(&cwd);
    let engine = TerraformEngine::with_binary(&config.engine.binary)
        .with_timeout(config.engine.command_timeout());
    let catalog: Box<dyn RegionCatalog> = match config.regions.source {
        RegionSource::Gcloud => Box::new(GcloudRegionCatalog::with_binary(
            &config.regions.gcloud_binary,
        )),
        RegionSource::Static => Box::new(StaticRegionCatalog::new(
            config.regions.static_regions.iter().cloned(),
        )),
    };

    tracing::info!(root = ?root, engine = %config.engine.binary, "starting harness run");

    // Registered before anything is provisioned so no SIGINT falls through
    // to the default handler.
    let signal = match interrupt_signal() {
        Ok(signal) => signal,
        Err(e) => {
            eprintln!("Failed to install interrupt handler: {}", e);
            std::process::exit(1);
        }
    };

    let mut coordinator = RunCoordinator::new(config, root, Arc::new(engine), catalog);
    let interrupted = coordinator.spawn_interrupt_listener(signal);

    tokio::select! {
        report = coordinator.run() => {
            print_summary(&report);
            std::process::exit(report.exit_code());
        }
        teardown = interrupted => {
            match teardown {
                Ok(report) if report.is_clean() => eprintln!("Interrupted; teardown complete"),
                Ok(report) => {
                    eprintln!("Interrupted; teardown left resources behind:");
                    for failure in &report.failures {
                        eprintln!("  - {}", failure);
                    }
                }
                Err(e) => eprintln!("Interrupted; teardown task failed: {}", e),
            }
            std::process::exit(1);
        }
    }
}

fn print_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(60));
    match &report.environment {
        Some(env) => println!("Harness Run Complete: {}", env),
        None => println!("Harness Run Complete"),
    }
    println!("{}", "=".repeat(60));
    println!();

    for phase in &report.phases {
        println!("  {:<28} {:?} ({:.1?})", phase.name, phase.status, phase.duration);
    }
    println!();
    println!(
        "Passed: {}  Failed: {}  Skipped: {}",
        report.passed(),
        report.failed(),
        report.skipped()
    );

    if let Some(reason) = &report.aborted {
        println!("Aborted: {}", reason);
    }
    if !report.teardown.failures.is_empty() {
        println!("Teardown failures:");
        for failure in &report.teardown.failures {
            println!("  - {}", failure);
        }
    }
    match report.swept {
        Some(removed) => println!("Swept {} artifact(s)", removed),
        None => println!("Artifacts left in place"),
    }
}
