use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use nature_registry_sync::client::{ApiClient, MediaWikiDocuments, WikibaseClient};
use nature_registry_sync::config::SyncConfig;
use nature_registry_sync::db::{latest_run_summary, setup_database, Ledger};
use nature_registry_sync::sync::{self, RunReport};

const ACTOR: &str = "nature-registry-sync";

#[derive(Parser)]
#[command(name = "nature-registry-sync", version, about = "Reconcile the protected area registry with Wikidata")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile every configured feed file
    Run {
        #[arg(long, short)]
        config: PathBuf,

        /// Apply changes instead of logging them
        #[arg(long)]
        commit: bool,

        /// Write shape documents to their real names
        #[arg(long)]
        no_sandbox: bool,
    },
    /// Summarize the latest run recorded in a progress database
    Status {
        #[arg(long)]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run {
            config,
            commit,
            no_sandbox,
        } => run(&config, commit, no_sandbox),
        Command::Status { db } => status(&db),
    }
}

fn run(config_path: &Path, commit: bool, no_sandbox: bool) -> Result<()> {
    let mut config = SyncConfig::load(config_path)?;
    if commit {
        config.dry_run = false;
    }
    if no_sandbox {
        config.sandbox = false;
    }
    config.require_write_access()?;

    info!(
        "Starting run: dry_run={}, sandbox={}, {} source(s)",
        config.dry_run,
        config.sandbox,
        config.sources.len()
    );
    for (name, property) in config.vocabulary.properties() {
        tracing::debug!("{:<50} {}", name, property);
    }

    let user_agent = config.full_user_agent();
    let token = config.credentials.access_token.clone();
    let kb_api = ApiClient::new(&config.knowledge_base.api_url, &user_agent, token.clone())
        .context("Failed to set up knowledge base client")?;
    let kb = WikibaseClient::new(kb_api, &config.knowledge_base.sparql_url, config.vocabulary.clone());
    let doc_api = ApiClient::new(&config.document_store.api_url, &user_agent, token)
        .context("Failed to set up document store client")?;
    let documents = MediaWikiDocuments::new(doc_api);

    let ledger = Ledger::open(&config.run.progress_db, config.dry_run, config.sandbox, ACTOR)?;
    let report = sync::run(&config, &kb, &documents, &ledger)?;

    print_report(&report, config.dry_run);
    Ok(())
}

fn print_report(report: &RunReport, dry_run: bool) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if dry_run {
        println!("🧪 Dry run finished, nothing was written");
    } else {
        println!("✅ Run finished");
    }
    println!("✓ Records processed:  {}", report.records);
    println!("✓ Committed:          {}", report.committed);
    println!("✓ Would commit:       {}", report.dry_run_noops);
    println!("✓ Unchanged:          {}", report.unchanged);
    println!("✓ Entities created:   {}", report.created_entities);
    println!("✓ Documents written:  {}", report.documents_written);
    if report.skipped > 0 {
        println!("⚠️  Skipped:           {}", report.skipped);
    }
    if report.failed > 0 {
        println!("❌ Failed:            {}", report.failed);
    }
}

fn status(db_path: &Path) -> Result<()> {
    if !db_path.exists() {
        eprintln!("❌ Progress database not found: {}", db_path.display());
        eprintln!("   Run: nature-registry-sync run --config <path>");
        std::process::exit(1);
    }

    let conn = Connection::open(db_path).with_context(|| format!("Failed to open {}", db_path.display()))?;
    setup_database(&conn)?;

    let Some(summary) = latest_run_summary(&conn)? else {
        println!("📭 No runs recorded yet");
        return Ok(());
    };

    println!("📊 Latest run {}", summary.run_id);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Started:   {}", summary.started_at);
    println!("Ended:     {}", summary.ended_at.as_deref().unwrap_or("(did not finish)"));
    println!("Mode:      {}{}", if summary.dry_run { "dry run" } else { "commit" }, if summary.sandbox { ", sandbox" } else { "" });
    for (path, digest) in &summary.inputs {
        println!("Input:     {} ({})", path, &digest[..digest.len().min(12)]);
    }
    println!("\n✓ Records:           {}", summary.records);
    println!("✓ Entities created:  {}", summary.created_entities);
    println!("✓ Entities updated:  {}", summary.updated_entities);
    println!("✓ Documents written: {}", summary.documents_written);
    println!("⚠️  Skipped:          {}", summary.skipped);
    println!("❌ Failed:           {}", summary.failed);
    Ok(())
}
