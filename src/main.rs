// Vendor Capital Ledger - Operational CLI
//
// Small admin surface over the ledger service: initialize a vendor, inspect
// balance and history, run the reconciliation audit, and apply a deliberate
// ADJUSTMENT correction.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;

use capital_ledger::{
    Correlation, LedgerService, ReconciliationAudit, TransactionKind,
};

fn db_path() -> PathBuf {
    env::var("CAPITAL_LEDGER_DB")
        .unwrap_or_else(|_| "capital-ledger.db".to_string())
        .into()
}

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(args.get(2).map(String::as_str)),
        Some("balance") => run_balance(required(&args, 2, "vendor id")?),
        Some("history") => run_history(
            required(&args, 2, "vendor id")?,
            args.get(3).map(String::as_str),
        ),
        Some("audit") => run_audit(required(&args, 2, "vendor id")?),
        Some("adjust") => run_adjust(
            required(&args, 2, "vendor id")?,
            required(&args, 3, "amount")?,
            required(&args, 4, "description")?,
        ),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn required<'a>(args: &'a [String], idx: usize, what: &str) -> Result<&'a str> {
    match args.get(idx) {
        Some(value) => Ok(value.as_str()),
        None => bail!("missing argument: {what}"),
    }
}

fn print_usage() {
    println!("capital-ledger {}", capital_ledger::VERSION);
    println!();
    println!("Usage:");
    println!("  capital-ledger init [initial_capital]    create a vendor account");
    println!("  capital-ledger balance <vendor_id>       show current balance");
    println!("  capital-ledger history <vendor_id> [n]   newest entries first");
    println!("  capital-ledger audit <vendor_id>         reconciliation check");
    println!("  capital-ledger adjust <vendor_id> <amount> <description>");
    println!();
    println!("Database path comes from CAPITAL_LEDGER_DB (default: capital-ledger.db)");
}

fn open_service() -> Result<LedgerService> {
    LedgerService::open(&db_path()).context("failed to open ledger database")
}

fn run_init(initial: Option<&str>) -> Result<()> {
    let initial: Decimal = initial
        .unwrap_or("0")
        .parse()
        .context("initial capital must be a decimal number")?;

    let service = open_service()?;
    let vendor = service.create_vendor(initial)?;

    println!("✓ Vendor account created");
    println!("  id:              {}", vendor.id);
    println!("  initial capital: {}", vendor.initial_capital);
    println!("  balance:         {}", vendor.capital_balance);
    Ok(())
}

fn run_balance(vendor_id: &str) -> Result<()> {
    let service = open_service()?;
    let vendor = service.get_vendor(vendor_id)?;

    println!("Vendor {}", vendor.id);
    println!("  balance:         {}", vendor.capital_balance);
    println!("  initial capital: {}", vendor.initial_capital);
    Ok(())
}

fn run_history(vendor_id: &str, limit: Option<&str>) -> Result<()> {
    let limit: i64 = limit
        .unwrap_or("20")
        .parse()
        .context("limit must be an integer")?;

    let service = open_service()?;
    let entries = service.list_transactions(vendor_id, None, limit, None)?;

    if entries.is_empty() {
        println!("No ledger entries for vendor {vendor_id}");
        return Ok(());
    }

    println!(
        "{:<5} {:<22} {:>14} {:>14} {:>14}  description",
        "seq", "kind", "amount", "before", "after"
    );
    for entry in entries {
        println!(
            "{:<5} {:<22} {:>14} {:>14} {:>14}  {}",
            entry.seq,
            entry.kind.as_str(),
            entry.amount,
            entry.balance_before,
            entry.balance_after,
            entry.description,
        );
    }
    Ok(())
}

fn run_audit(vendor_id: &str) -> Result<()> {
    let service = open_service()?;
    let audit = ReconciliationAudit::new(service);
    let report = audit.check(vendor_id)?;

    if report.ok {
        println!("✓ {}", report.summary());
    } else {
        println!("✗ {}", report.summary());
        println!("  offline stock (remaining cost):      {}", report.offline_remaining_cost);
        println!("  offline stock (sold, unsettled):     {}", report.offline_sold_unsettled_cost);
        println!();
        println!("  To correct, record an explicit ADJUSTMENT:");
        println!(
            "  capital-ledger adjust {} {} \"drift correction\"",
            vendor_id, report.expected_balance
        );
    }
    Ok(())
}

fn run_adjust(vendor_id: &str, amount: &str, description: &str) -> Result<()> {
    let amount: Decimal = amount.parse().context("amount must be a decimal number")?;

    let service = open_service()?;
    let receipt = service.record_transaction(
        vendor_id,
        TransactionKind::Adjustment,
        amount,
        description,
        Correlation::none(),
        None,
    )?;

    println!("✓ Balance adjusted to {}", receipt.new_balance);
    println!("  entry id: {}", receipt.entry_id);
    Ok(())
}
