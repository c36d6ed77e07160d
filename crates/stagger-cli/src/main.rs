//! Stagger: staggered capacity cleanup over the local capacity catalog.

use std::path::PathBuf;
use std::sync::Arc;

use stagger_core::{Clock, DataPaths, Error, RunConfig, SystemClock};
use stagger_runtime::Scheduler;
use stagger_store::{SqliteCatalog, StoreRecord};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod report;

fn resolve_data_dir() -> PathBuf {
    std::env::var("STAGGER_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"))
}

/// Flags accepted by `run`.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunArgs {
    minutes: Option<u64>,
    keep: Option<u8>,
}

fn parse_run_args(args: &[String]) -> anyhow::Result<RunArgs> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter();
    while let Some(flag) = iter.next() {
        let value = iter
            .next()
            .ok_or_else(|| anyhow::anyhow!("{} needs a value", flag))?;
        match flag.as_str() {
            "--minutes" => parsed.minutes = Some(value.parse()?),
            "--keep" => parsed.keep = Some(value.parse()?),
            other => anyhow::bail!("Unknown flag: {}", other),
        }
    }
    Ok(parsed)
}

fn build_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_env()?;
    if let Some(minutes) = args.minutes {
        config = config.with_minutes(minutes);
    }
    if let Some(keep) = args.keep {
        config = config.with_keep_percentage(keep);
    }
    config.validate()?;
    Ok(config)
}

fn open_catalog(paths: &DataPaths) -> anyhow::Result<Arc<SqliteCatalog>> {
    let catalog = SqliteCatalog::open(&paths.catalog)
        .map_err(|e| anyhow::anyhow!("Failed to open catalog: {}", e))?;
    Ok(Arc::new(catalog))
}

fn scheduler(config: RunConfig, catalog: &Arc<SqliteCatalog>) -> Scheduler {
    Scheduler::new(
        config,
        Arc::new(SystemClock),
        catalog.clone(),
        catalog.clone(),
    )
}

fn print_usage() {
    println!("Stagger: staggered capacity cleanup");
    println!();
    println!("Usage: stagger <command>");
    println!();
    println!("Commands:");
    println!("  run [--minutes N] [--keep P]   Lower and restore every eligible store");
    println!("  plan [--minutes N] [--keep P]  Show the lowering timeline without changing anything");
    println!("  list                           List stores in the catalog");
    println!("  add <name> <capacity-mb>       Register an eligible store");
    println!("  help                           Show this help message");
    println!();
    println!("Environment: STAGGER_DATA_DIR, STAGGER_MINUTES, STAGGER_KEEP_PERCENT,");
    println!("STAGGER_PROCESSING_MINUTES, STAGGER_RETRY_BACKOFF_SECS, STAGGER_POLL_SECS");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(command) = args.get(1) else {
        print_usage();
        std::process::exit(1);
    };

    if matches!(command.as_str(), "--help" | "-h" | "help") {
        print_usage();
        return Ok(());
    }

    let data_dir = resolve_data_dir();
    info!("Data directory: {}", data_dir.display());
    let paths = DataPaths::new(&data_dir)?;

    match command.as_str() {
        "run" => {
            let config = build_config(&parse_run_args(&args[2..])?)?;
            let catalog = open_catalog(&paths)?;
            let report = scheduler(config, &catalog).run().await?;

            report::print_report(&report);
            report::write_report(&report, &paths.last_report())?;
            info!("Report written to {}", paths.last_report().display());

            match report.into_result() {
                Ok(_) => Ok(()),
                Err(Error::RunFailed { code, .. }) => {
                    eprintln!("Run failed (code {})", code);
                    std::process::exit(1);
                }
                Err(e) => Err(e.into()),
            }
        }
        "plan" => {
            let config = build_config(&parse_run_args(&args[2..])?)?;
            let catalog = open_catalog(&paths)?;
            let start = SystemClock.now();
            let steps = scheduler(config, &catalog).plan()?;
            report::print_plan(&steps, start);
            Ok(())
        }
        "list" => {
            let catalog = open_catalog(&paths)?;
            report::print_stores(&catalog.list_stores()?);
            Ok(())
        }
        "add" => {
            if args.len() < 4 {
                eprintln!("Usage: stagger add <name> <capacity-mb>");
                std::process::exit(1);
            }
            let capacity: u64 = args[3].parse()?;
            let catalog = open_catalog(&paths)?;
            catalog.upsert_store(&StoreRecord::eligible(args[2].as_str(), capacity))?;
            info!("Registered {} with {} MB", args[2], capacity);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}. Use 'stagger help' for usage.", other);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_run_args() {
        assert_eq!(parse_run_args(&[]).unwrap(), RunArgs::default());
        assert_eq!(
            parse_run_args(&args(&["--minutes", "30", "--keep", "25"])).unwrap(),
            RunArgs {
                minutes: Some(30),
                keep: Some(25),
            }
        );
    }

    #[test]
    fn test_parse_run_args_rejects_bad_input() {
        assert!(parse_run_args(&args(&["--minutes"])).is_err());
        assert!(parse_run_args(&args(&["--minutes", "soon"])).is_err());
        assert!(parse_run_args(&args(&["--keep", "300"])).is_err());
        assert!(parse_run_args(&args(&["--fast", "1"])).is_err());
    }
}
