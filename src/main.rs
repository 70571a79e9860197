use anyhow::{bail, Context, Result};
use std::env;
use std::sync::Arc;

use cricket_auction::{
    AuctionCoordinator, Config, Database, EventNotifier, IdentityStore, LocalObjectStore,
    ReconciliationEngine, SaleLedger,
};

const USAGE: &str = "Usage:
  auction-admin reconcile [--dry-run]     Rebuild player/team sale fields from the ledger
  auction-admin sales                     List every recorded sale
  auction-admin set-max-amount <amount>   Set the same max amount on every team";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,cricket_auction=info".into()),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let config = Config::from_env().context("Failed to load configuration")?;

    match args.get(1).map(String::as_str) {
        Some("reconcile") => run_reconcile(&config, args.iter().any(|a| a == "--dry-run")),
        Some("sales") => run_sales(&config),
        Some("set-max-amount") => match args.get(2) {
            Some(amount) => run_set_max_amount(&config, amount),
            None => bail!("Missing <amount>\n\n{}", USAGE),
        },
        _ => {
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn open_database(config: &Config) -> Result<Database> {
    if !config.database_path.exists() {
        eprintln!("❌ Database not found at {:?}", config.database_path);
        eprintln!("   Start auction-server once to create it,");
        eprintln!("   or set DATABASE_PATH.");
        std::process::exit(1);
    }
    Database::open(&config.database_path, config.storage_timeout)
}

fn run_reconcile(config: &Config, dry_run: bool) -> Result<()> {
    println!("⚖️  Reconciliation - ledger vs. player/team records");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if dry_run {
        println!("(dry run: nothing will be changed)");
    }

    let db = open_database(config)?;
    let report = ReconciliationEngine::new(db).reconcile(dry_run)?;

    println!("\n🔍 Checked {} sales, {} players, {} teams",
        report.sales_checked, report.players_checked, report.teams_checked);

    if report.is_consistent() {
        println!("✅ Everything matches the ledger");
        return Ok(());
    }

    for d in &report.discrepancies {
        println!("  • {:?}: {}", d.category, d.description);
    }
    println!("\n{}", report.summary());
    Ok(())
}

fn run_sales(config: &Config) -> Result<()> {
    let db = open_database(config)?;
    let sales = SaleLedger::new(db).list_sales()?;

    println!("🧾 {} sales recorded", sales.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    let mut total = 0.0;
    for sale in &sales {
        total += sale.amount();
        println!(
            "{}  {:<24} → {:<20} {:>10.2}",
            sale.sale_details.date.format("%Y-%m-%d %H:%M"),
            sale.player.name,
            sale.team.name,
            sale.amount()
        );
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Total: {:.2}", total);
    Ok(())
}

fn run_set_max_amount(config: &Config, raw: &str) -> Result<()> {
    let db = open_database(config)?;
    let objects = Arc::new(LocalObjectStore::new(
        &config.upload_dir,
        &config.public_base_url,
        config.storage_timeout,
    ));
    let notifier = EventNotifier::new(config.notifier_capacity);
    let identity = IdentityStore::new(db.clone(), objects, notifier.clone());
    let coordinator = AuctionCoordinator::new(identity, SaleLedger::new(db), notifier);

    let updated = coordinator.set_max_amount_for_all_teams(&serde_json::Value::String(raw.to_string()))?;
    println!("✓ Max amount {} set on {} teams", raw.trim(), updated);
    Ok(())
}
