//! In-place PII shuffler.
//!
//! This binary walks an ordered table catalog and anonymizes the columns
//! named in a plan file by permuting their values across rows, page by page.
//! Every committed page advances a checkpoint file, so an interrupted run is
//! resumed by starting it again.
//!
//! # Guarantees
//! - Column values are only moved between rows, never invented or lost
//! - Credentials are sanitized in every log line
//! - Values of anonymized columns are never logged

use anyhow::Context;
use clap::Parser;
use dbscramble::{Cli, Command, TargetArgs, render_checks, render_report};
use dbscramble_core::{
    AnonymizationPlan, CheckpointStore, FileCheckpointStore, RunController, RunReport, TableCatalog,
    adapters::{create_store, supported_stores},
    error::redact_database_url,
    init_logging,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet, cli.global.log_file.as_deref())?;

    match cli.selected_command() {
        Command::Run => run(&cli).await,
        Command::Status => show_status(&cli.target).await,
        Command::Reset => reset(&cli.target).await,
        Command::Check => check(&cli).await,
        Command::Test => test_connection(&cli.target).await,
        Command::List => {
            list_supported_databases();
            Ok(())
        }
    }
}

/// Runs the catalog from the checkpoint to the end.
async fn run(cli: &Cli) -> anyhow::Result<()> {
    let options = cli.tuning.run_options()?;
    let catalog = TableCatalog::load(&cli.target.catalog).await?;
    let plan = AnonymizationPlan::load(&cli.target.plan).await?;
    let database_url = cli.target.require_database_url()?;

    info!("Target: {}", redact_database_url(database_url));
    info!("Catalog: {} ({} tables)", cli.target.catalog.display(), catalog.len());
    info!("Checkpoint: {}", cli.target.checkpoint.display());

    let store = create_store(database_url, &cli.target.connection_config())
        .await
        .map_err(|e| {
            error!("Failed to open store: {}", e);
            e
        })?;
    let checkpoints = FileCheckpointStore::new(&cli.target.checkpoint);
    let controller =
        RunController::new(store.as_ref(), &checkpoints, &catalog, &plan).with_options(options);

    let mut rng = rand::rng();
    match controller.run(&mut rng).await {
        Ok(report) => {
            println!("{}", render_report(&report));
            write_report(&cli.target, &report).await?;
            println!("Anonymization completed successfully");
            Ok(())
        }
        Err(aborted) => {
            println!("{}", render_report(&aborted.report));
            write_report(&cli.target, &aborted.report).await?;
            println!(
                "Run stopped; start it again to resume from {}",
                cli.target.checkpoint.display()
            );
            Err(aborted.into())
        }
    }
}

/// Writes the JSON run report if requested.
async fn write_report(target: &TargetArgs, report: &RunReport) -> anyhow::Result<()> {
    let Some(path) = &target.report else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(report).context("Failed to serialize run report")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    info!("Report saved to {}", path.display());
    Ok(())
}

/// Prints the checkpoint without touching the database.
async fn show_status(target: &TargetArgs) -> anyhow::Result<()> {
    let checkpoints = FileCheckpointStore::new(&target.checkpoint);
    match checkpoints.load().await? {
        Some(checkpoint) => println!(
            "Next run resumes table '{}' at row {}",
            checkpoint.table, checkpoint.offset
        ),
        None => println!("No checkpoint; the next run starts with the first table"),
    }
    Ok(())
}

/// Deletes the checkpoint.
async fn reset(target: &TargetArgs) -> anyhow::Result<()> {
    let checkpoints = FileCheckpointStore::new(&target.checkpoint);
    if let Some(checkpoint) = checkpoints.load().await.ok().flatten() {
        info!("Discarding checkpoint {}", checkpoint);
    }
    checkpoints.clear().await?;
    println!("Checkpoint {} removed", target.checkpoint.display());
    Ok(())
}

/// Validates the plan against the catalog and the live schema.
async fn check(cli: &Cli) -> anyhow::Result<()> {
    let options = cli.tuning.run_options()?;
    let catalog = TableCatalog::load(&cli.target.catalog).await?;
    let plan = AnonymizationPlan::load(&cli.target.plan).await?;
    let database_url = cli.target.require_database_url()?;

    let store = create_store(database_url, &cli.target.connection_config()).await?;
    let checkpoints = FileCheckpointStore::new(&cli.target.checkpoint);
    let controller =
        RunController::new(store.as_ref(), &checkpoints, &catalog, &plan).with_options(options);

    let (text, ok) = render_checks(&controller.check().await?);
    print!("{}", text);
    if !ok {
        anyhow::bail!("Plan does not match the live schema");
    }
    println!("Plan matches the live schema");
    Ok(())
}

/// Tests database connection without touching data.
async fn test_connection(target: &TargetArgs) -> anyhow::Result<()> {
    info!("Testing database connection...");
    let database_url = target.require_database_url()?;

    let store = create_store(database_url, &target.connection_config())
        .await
        .map_err(|e| {
            error!("Failed to open store: {}", e);
            e
        })?;

    store.test_connection().await.map_err(|e| {
        error!("Connection test failed: {}", e);
        e
    })?;

    println!("Connection to {} database successful", store.store_type());
    Ok(())
}

/// Lists supported database types and their connection string formats
fn list_supported_databases() {
    println!("Supported Database Types:");
    println!();
    for (store_type, example) in supported_stores() {
        println!("{}:", store_type);
        println!("  Example:    {}", example);
        println!();
    }
    println!("Column kinds:");
    println!("  opaque, email, person-name, grouped, character-scramble, ipv4-octets");
}
