// Storage layer - SQLite schema, domain rows, and row mapping
//
// One VendorAccount row per vendor, an append-only ledger_entries table
// keyed by (vendor_id, seq), and child tables for partner shares, offline
// goods and supplier payments, all foreign-keyed to vendor_id.
//
// Monetary values are rust_decimal::Decimal serialized to TEXT so SQLite
// never rounds them. Timestamps are RFC 3339 TEXT.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::taxonomy::TransactionKind;

// ============================================================================
// DOMAIN ROWS
// ============================================================================

/// The single authoritative running balance per vendor.
/// Mutated only by the ledger service, read by everyone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorAccount {
    pub id: String,
    pub capital_balance: Decimal,
    pub initial_capital: Decimal,
    pub created_at: DateTime<Utc>,
}

/// One immutable, signed record of a balance change.
///
/// Invariant: for a vendor's entries ordered by seq,
/// `entry[i].balance_before == entry[i-1].balance_after` (0 for the first)
/// and the last `balance_after` equals the stored vendor balance.
/// Entries are never updated or deleted; corrections are new entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub vendor_id: String,
    pub seq: i64,
    pub kind: TransactionKind,
    /// Magnitude of the change; the sign is derived from `kind`.
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub partner_id: Option<String>,
    pub supplier_id: Option<String>,
    pub product_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Optional correlation ids linking an entry to the record that caused it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Correlation {
    pub partner_id: Option<String>,
    pub supplier_id: Option<String>,
    pub product_id: Option<String>,
}

impl Correlation {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn partner(id: &str) -> Self {
        Self {
            partner_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn supplier(id: &str) -> Self {
        Self {
            supplier_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    pub fn product(id: &str) -> Self {
        Self {
            product_id: Some(id.to_string()),
            ..Self::default()
        }
    }
}

/// A named stakeholder's portion of a vendor's capital.
///
/// The sum of current_amount across partners is informational; a vendor may
/// also hold capital with no named partner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerShare {
    pub id: String,
    pub vendor_id: String,
    pub partner_name: String,
    pub capital_percent: Decimal,
    pub initial_amount: Decimal,
    pub current_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Externally sourced inventory funded directly from vendor capital.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineGood {
    pub id: String,
    pub vendor_id: String,
    pub supplier_id: Option<String>,
    pub purchase_price: Decimal,
    pub selling_price: Decimal,
    pub quantity: i64,
    pub sold_quantity: i64,
    /// Derived at creation: (selling_price - purchase_price) * quantity
    pub profit: Decimal,
    pub created_at: DateTime<Utc>,
}

impl OfflineGood {
    pub fn total_cost(&self) -> Decimal {
        self.purchase_price * Decimal::from(self.quantity)
    }

    pub fn remaining_quantity(&self) -> i64 {
        self.quantity - self.sold_quantity
    }

    /// Cost of units still on the shelf.
    pub fn remaining_cost(&self) -> Decimal {
        self.purchase_price * Decimal::from(self.remaining_quantity())
    }

    /// Cost of units sold but not yet settled through the ledger (sales
    /// move no capital here; proceeds belong to the checkout collaborator).
    pub fn sold_unsettled_cost(&self) -> Decimal {
        self.purchase_price * Decimal::from(self.sold_quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSupplier {
    pub id: String,
    pub vendor_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentKind {
    /// Supplier paid the vendor (credits vendor capital)
    Receipt,
    /// Vendor paid the supplier (debits vendor capital)
    Payment,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Receipt => "RECEIPT",
            PaymentKind::Payment => "PAYMENT",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "RECEIPT" => Ok(PaymentKind::Receipt),
            "PAYMENT" => Ok(PaymentKind::Payment),
            other => Err(LedgerError::InvalidKind(other.to_string())),
        }
    }
}

/// Cash moved between vendor and supplier. Each payment produces exactly
/// one ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineSupplierPayment {
    pub id: String,
    pub supplier_id: String,
    pub vendor_id: String,
    pub kind: PaymentKind,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Stored result of an idempotent mutation, keyed by (vendor_id, key).
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub vendor_id: String,
    pub key: String,
    pub fingerprint: String,
    pub entry_id: String,
    pub new_balance: Decimal,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> LedgerResult<()> {
    // WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS vendor_accounts (
            id TEXT PRIMARY KEY,
            capital_balance TEXT NOT NULL,
            initial_capital TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    // Append-only: no UPDATE or DELETE ever runs against this table.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ledger_entries (
            id TEXT UNIQUE NOT NULL,
            vendor_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            kind TEXT NOT NULL,
            amount TEXT NOT NULL,
            balance_before TEXT NOT NULL,
            balance_after TEXT NOT NULL,
            description TEXT NOT NULL,
            partner_id TEXT,
            supplier_id TEXT,
            product_id TEXT,
            created_at TEXT NOT NULL,
            PRIMARY KEY (vendor_id, seq)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS partner_shares (
            id TEXT PRIMARY KEY,
            vendor_id TEXT NOT NULL,
            partner_name TEXT NOT NULL,
            capital_percent TEXT NOT NULL,
            initial_amount TEXT NOT NULL,
            current_amount TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS offline_goods (
            id TEXT PRIMARY KEY,
            vendor_id TEXT NOT NULL,
            supplier_id TEXT,
            purchase_price TEXT NOT NULL,
            selling_price TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            sold_quantity INTEGER NOT NULL DEFAULT 0,
            profit TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS offline_suppliers (
            id TEXT PRIMARY KEY,
            vendor_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS offline_supplier_payments (
            id TEXT PRIMARY KEY,
            supplier_id TEXT NOT NULL,
            vendor_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            amount TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS idempotency_keys (
            vendor_id TEXT NOT NULL,
            key TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            new_balance TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (vendor_id, key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_entries_vendor_seq
         ON ledger_entries(vendor_id, seq)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_partners_vendor ON partner_shares(vendor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_goods_vendor ON offline_goods(vendor_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_supplier_payments_supplier
         ON offline_supplier_payments(supplier_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// ROW MAPPING HELPERS
// ============================================================================

fn get_decimal(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: rust_decimal::Error| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn get_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn get_kind(row: &Row, idx: usize) -> rusqlite::Result<TransactionKind> {
    let raw: String = row.get(idx)?;
    TransactionKind::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })
}

fn map_vendor(row: &Row) -> rusqlite::Result<VendorAccount> {
    Ok(VendorAccount {
        id: row.get(0)?,
        capital_balance: get_decimal(row, 1)?,
        initial_capital: get_decimal(row, 2)?,
        created_at: get_timestamp(row, 3)?,
    })
}

fn map_entry(row: &Row) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        seq: row.get(2)?,
        kind: get_kind(row, 3)?,
        amount: get_decimal(row, 4)?,
        balance_before: get_decimal(row, 5)?,
        balance_after: get_decimal(row, 6)?,
        description: row.get(7)?,
        partner_id: row.get(8)?,
        supplier_id: row.get(9)?,
        product_id: row.get(10)?,
        created_at: get_timestamp(row, 11)?,
    })
}

const ENTRY_COLUMNS: &str = "id, vendor_id, seq, kind, amount, balance_before, balance_after,
                             description, partner_id, supplier_id, product_id, created_at";

fn map_partner(row: &Row) -> rusqlite::Result<PartnerShare> {
    Ok(PartnerShare {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        partner_name: row.get(2)?,
        capital_percent: get_decimal(row, 3)?,
        initial_amount: get_decimal(row, 4)?,
        current_amount: get_decimal(row, 5)?,
        created_at: get_timestamp(row, 6)?,
    })
}

fn map_good(row: &Row) -> rusqlite::Result<OfflineGood> {
    Ok(OfflineGood {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        supplier_id: row.get(2)?,
        purchase_price: get_decimal(row, 3)?,
        selling_price: get_decimal(row, 4)?,
        quantity: row.get(5)?,
        sold_quantity: row.get(6)?,
        profit: get_decimal(row, 7)?,
        created_at: get_timestamp(row, 8)?,
    })
}

fn map_supplier(row: &Row) -> rusqlite::Result<OfflineSupplier> {
    Ok(OfflineSupplier {
        id: row.get(0)?,
        vendor_id: row.get(1)?,
        name: row.get(2)?,
        created_at: get_timestamp(row, 3)?,
    })
}

fn map_payment(row: &Row) -> rusqlite::Result<OfflineSupplierPayment> {
    let kind_raw: String = row.get(3)?;
    let kind = PaymentKind::parse(&kind_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("{e}").into(),
        )
    })?;
    Ok(OfflineSupplierPayment {
        id: row.get(0)?,
        supplier_id: row.get(1)?,
        vendor_id: row.get(2)?,
        kind,
        amount: get_decimal(row, 4)?,
        created_at: get_timestamp(row, 5)?,
    })
}

// ============================================================================
// VENDOR ACCOUNTS
// ============================================================================

pub fn insert_vendor(conn: &Connection, vendor: &VendorAccount) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO vendor_accounts (id, capital_balance, initial_capital, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            vendor.id,
            vendor.capital_balance.to_string(),
            vendor.initial_capital.to_string(),
            vendor.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_vendor(conn: &Connection, vendor_id: &str) -> LedgerResult<VendorAccount> {
    conn.query_row(
        "SELECT id, capital_balance, initial_capital, created_at
         FROM vendor_accounts WHERE id = ?1",
        params![vendor_id],
        map_vendor,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            LedgerError::NotFound("vendor", vendor_id.to_string())
        }
        other => other.into(),
    })
}

pub fn update_vendor_balance(
    conn: &Connection,
    vendor_id: &str,
    new_balance: Decimal,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE vendor_accounts SET capital_balance = ?1 WHERE id = ?2",
        params![new_balance.to_string(), vendor_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::NotFound("vendor", vendor_id.to_string()));
    }
    Ok(())
}

// ============================================================================
// LEDGER ENTRIES
// ============================================================================

pub fn next_seq(conn: &Connection, vendor_id: &str) -> LedgerResult<i64> {
    let seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM ledger_entries WHERE vendor_id = ?1",
        params![vendor_id],
        |row| row.get(0),
    )?;
    Ok(seq)
}

pub fn insert_entry(conn: &Connection, entry: &LedgerEntry) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO ledger_entries (
            id, vendor_id, seq, kind, amount, balance_before, balance_after,
            description, partner_id, supplier_id, product_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            entry.id,
            entry.vendor_id,
            entry.seq,
            entry.kind.as_str(),
            entry.amount.to_string(),
            entry.balance_before.to_string(),
            entry.balance_after.to_string(),
            entry.description,
            entry.partner_id,
            entry.supplier_id,
            entry.product_id,
            entry.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// All entries for a vendor in creation (seq) order - replay input.
pub fn entries_in_order(conn: &Connection, vendor_id: &str) -> LedgerResult<Vec<LedgerEntry>> {
    let sql =
        format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE vendor_id = ?1 ORDER BY seq ASC");
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(params![vendor_id], map_entry)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

/// Reverse-chronological, restartable page. `before_seq` restarts the page
/// below a previously returned seq.
pub fn list_entries(
    conn: &Connection,
    vendor_id: &str,
    kind: Option<TransactionKind>,
    limit: i64,
    before_seq: Option<i64>,
) -> LedgerResult<Vec<LedgerEntry>> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries
         WHERE vendor_id = ?1
           AND (?2 IS NULL OR kind = ?2)
           AND (?3 IS NULL OR seq < ?3)
         ORDER BY seq DESC
         LIMIT ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(
            params![vendor_id, kind.map(|k| k.as_str()), before_seq, limit],
            map_entry,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

pub fn entry_count(conn: &Connection, vendor_id: &str) -> LedgerResult<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM ledger_entries WHERE vendor_id = ?1",
        params![vendor_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// PARTNER SHARES
// ============================================================================

pub fn insert_partner(conn: &Connection, share: &PartnerShare) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO partner_shares (
            id, vendor_id, partner_name, capital_percent,
            initial_amount, current_amount, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            share.id,
            share.vendor_id,
            share.partner_name,
            share.capital_percent.to_string(),
            share.initial_amount.to_string(),
            share.current_amount.to_string(),
            share.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_partner(conn: &Connection, partner_id: &str) -> LedgerResult<PartnerShare> {
    conn.query_row(
        "SELECT id, vendor_id, partner_name, capital_percent,
                initial_amount, current_amount, created_at
         FROM partner_shares WHERE id = ?1",
        params![partner_id],
        map_partner,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            LedgerError::NotFound("partner", partner_id.to_string())
        }
        other => other.into(),
    })
}

pub fn update_partner_amount(
    conn: &Connection,
    partner_id: &str,
    new_amount: Decimal,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE partner_shares SET current_amount = ?1 WHERE id = ?2",
        params![new_amount.to_string(), partner_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::NotFound("partner", partner_id.to_string()));
    }
    Ok(())
}

pub fn delete_partner(conn: &Connection, partner_id: &str) -> LedgerResult<()> {
    conn.execute(
        "DELETE FROM partner_shares WHERE id = ?1",
        params![partner_id],
    )?;
    Ok(())
}

pub fn list_partners(conn: &Connection, vendor_id: &str) -> LedgerResult<Vec<PartnerShare>> {
    let mut stmt = conn.prepare(
        "SELECT id, vendor_id, partner_name, capital_percent,
                initial_amount, current_amount, created_at
         FROM partner_shares WHERE vendor_id = ?1 ORDER BY created_at ASC",
    )?;
    let partners = stmt
        .query_map(params![vendor_id], map_partner)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(partners)
}

// ============================================================================
// OFFLINE GOODS
// ============================================================================

pub fn insert_good(conn: &Connection, good: &OfflineGood) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO offline_goods (
            id, vendor_id, supplier_id, purchase_price, selling_price,
            quantity, sold_quantity, profit, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            good.id,
            good.vendor_id,
            good.supplier_id,
            good.purchase_price.to_string(),
            good.selling_price.to_string(),
            good.quantity,
            good.sold_quantity,
            good.profit.to_string(),
            good.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_good(conn: &Connection, good_id: &str) -> LedgerResult<OfflineGood> {
    conn.query_row(
        "SELECT id, vendor_id, supplier_id, purchase_price, selling_price,
                quantity, sold_quantity, profit, created_at
         FROM offline_goods WHERE id = ?1",
        params![good_id],
        map_good,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => LedgerError::NotFound("good", good_id.to_string()),
        other => other.into(),
    })
}

pub fn update_sold_quantity(
    conn: &Connection,
    good_id: &str,
    sold_quantity: i64,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE offline_goods SET sold_quantity = ?1 WHERE id = ?2",
        params![sold_quantity, good_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::NotFound("good", good_id.to_string()));
    }
    Ok(())
}

pub fn delete_good(conn: &Connection, good_id: &str) -> LedgerResult<()> {
    conn.execute("DELETE FROM offline_goods WHERE id = ?1", params![good_id])?;
    Ok(())
}

pub fn list_goods(conn: &Connection, vendor_id: &str) -> LedgerResult<Vec<OfflineGood>> {
    let mut stmt = conn.prepare(
        "SELECT id, vendor_id, supplier_id, purchase_price, selling_price,
                quantity, sold_quantity, profit, created_at
         FROM offline_goods WHERE vendor_id = ?1 ORDER BY created_at ASC",
    )?;
    let goods = stmt
        .query_map(params![vendor_id], map_good)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(goods)
}

// ============================================================================
// OFFLINE SUPPLIERS & PAYMENTS
// ============================================================================

pub fn insert_supplier(conn: &Connection, supplier: &OfflineSupplier) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO offline_suppliers (id, vendor_id, name, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            supplier.id,
            supplier.vendor_id,
            supplier.name,
            supplier.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_supplier(conn: &Connection, supplier_id: &str) -> LedgerResult<OfflineSupplier> {
    conn.query_row(
        "SELECT id, vendor_id, name, created_at FROM offline_suppliers WHERE id = ?1",
        params![supplier_id],
        map_supplier,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            LedgerError::NotFound("supplier", supplier_id.to_string())
        }
        other => other.into(),
    })
}

pub fn insert_supplier_payment(
    conn: &Connection,
    payment: &OfflineSupplierPayment,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO offline_supplier_payments (
            id, supplier_id, vendor_id, kind, amount, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            payment.id,
            payment.supplier_id,
            payment.vendor_id,
            payment.kind.as_str(),
            payment.amount.to_string(),
            payment.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn list_supplier_payments(
    conn: &Connection,
    supplier_id: &str,
) -> LedgerResult<Vec<OfflineSupplierPayment>> {
    let mut stmt = conn.prepare(
        "SELECT id, supplier_id, vendor_id, kind, amount, created_at
         FROM offline_supplier_payments WHERE supplier_id = ?1 ORDER BY created_at ASC",
    )?;
    let payments = stmt
        .query_map(params![supplier_id], map_payment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(payments)
}

pub fn goods_for_supplier(conn: &Connection, supplier_id: &str) -> LedgerResult<Vec<OfflineGood>> {
    let mut stmt = conn.prepare(
        "SELECT id, vendor_id, supplier_id, purchase_price, selling_price,
                quantity, sold_quantity, profit, created_at
         FROM offline_goods WHERE supplier_id = ?1 ORDER BY created_at ASC",
    )?;
    let goods = stmt
        .query_map(params![supplier_id], map_good)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(goods)
}

// ============================================================================
// IDEMPOTENCY KEYS
// ============================================================================

pub fn get_idempotency(
    conn: &Connection,
    vendor_id: &str,
    key: &str,
) -> LedgerResult<Option<IdempotencyRecord>> {
    let result = conn.query_row(
        "SELECT vendor_id, key, fingerprint, entry_id, new_balance
         FROM idempotency_keys WHERE vendor_id = ?1 AND key = ?2",
        params![vendor_id, key],
        |row| {
            Ok(IdempotencyRecord {
                vendor_id: row.get(0)?,
                key: row.get(1)?,
                fingerprint: row.get(2)?,
                entry_id: row.get(3)?,
                new_balance: get_decimal(row, 4)?,
            })
        },
    );
    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn insert_idempotency(conn: &Connection, record: &IdempotencyRecord) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO idempotency_keys (
            vendor_id, key, fingerprint, entry_id, new_balance, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.vendor_id,
            record.key,
            record.fingerprint,
            record.entry_id,
            record.new_balance.to_string(),
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn test_vendor(balance: &str) -> VendorAccount {
        VendorAccount {
            id: uuid::Uuid::new_v4().to_string(),
            capital_balance: dec(balance),
            initial_capital: dec(balance),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_vendor_round_trip() {
        let conn = test_conn();
        let vendor = test_vendor("7500.50");
        insert_vendor(&conn, &vendor).unwrap();

        let loaded = get_vendor(&conn, &vendor.id).unwrap();
        assert_eq!(loaded.capital_balance, dec("7500.50"));
        assert_eq!(loaded.initial_capital, dec("7500.50"));

        update_vendor_balance(&conn, &vendor.id, dec("8000")).unwrap();
        let loaded = get_vendor(&conn, &vendor.id).unwrap();
        assert_eq!(loaded.capital_balance, dec("8000"));
    }

    #[test]
    fn test_missing_vendor_is_not_found() {
        let conn = test_conn();
        let err = get_vendor(&conn, "no-such-vendor").unwrap_err();
        assert!(matches!(err, LedgerError::NotFound("vendor", _)));
    }

    #[test]
    fn test_entry_seq_is_per_vendor() {
        let conn = test_conn();
        let a = test_vendor("100");
        let b = test_vendor("100");
        insert_vendor(&conn, &a).unwrap();
        insert_vendor(&conn, &b).unwrap();

        assert_eq!(next_seq(&conn, &a.id).unwrap(), 1);

        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            vendor_id: a.id.clone(),
            seq: 1,
            kind: TransactionKind::Deposit,
            amount: dec("10"),
            balance_before: dec("100"),
            balance_after: dec("110"),
            description: "test".to_string(),
            partner_id: None,
            supplier_id: None,
            product_id: None,
            created_at: Utc::now(),
        };
        insert_entry(&conn, &entry).unwrap();

        assert_eq!(next_seq(&conn, &a.id).unwrap(), 2);
        assert_eq!(next_seq(&conn, &b.id).unwrap(), 1);
    }

    #[test]
    fn test_list_entries_newest_first_with_restart() {
        let conn = test_conn();
        let vendor = test_vendor("0");
        insert_vendor(&conn, &vendor).unwrap();

        let mut balance = dec("0");
        for seq in 1..=5 {
            let after = balance + dec("10");
            insert_entry(
                &conn,
                &LedgerEntry {
                    id: uuid::Uuid::new_v4().to_string(),
                    vendor_id: vendor.id.clone(),
                    seq,
                    kind: TransactionKind::Deposit,
                    amount: dec("10"),
                    balance_before: balance,
                    balance_after: after,
                    description: format!("deposit {seq}"),
                    partner_id: None,
                    supplier_id: None,
                    product_id: None,
                    created_at: Utc::now(),
                },
            )
            .unwrap();
            balance = after;
        }

        let page1 = list_entries(&conn, &vendor.id, None, 2, None).unwrap();
        assert_eq!(page1.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![5, 4]);

        let page2 = list_entries(&conn, &vendor.id, None, 2, Some(4)).unwrap();
        assert_eq!(page2.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![3, 2]);

        let filtered =
            list_entries(&conn, &vendor.id, Some(TransactionKind::Withdrawal), 10, None).unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn test_decimal_precision_survives_storage() {
        let conn = test_conn();
        let vendor = test_vendor("0.1");
        insert_vendor(&conn, &vendor).unwrap();

        // 0.1 + 0.2 must come back as exactly 0.3
        update_vendor_balance(&conn, &vendor.id, dec("0.1") + dec("0.2")).unwrap();
        let loaded = get_vendor(&conn, &vendor.id).unwrap();
        assert_eq!(loaded.capital_balance, dec("0.3"));
    }

    #[test]
    fn test_idempotency_record_round_trip() {
        let conn = test_conn();
        let record = IdempotencyRecord {
            vendor_id: "v1".to_string(),
            key: "req-42".to_string(),
            fingerprint: "abc".to_string(),
            entry_id: "e1".to_string(),
            new_balance: dec("99.95"),
        };
        insert_idempotency(&conn, &record).unwrap();

        let loaded = get_idempotency(&conn, "v1", "req-42").unwrap().unwrap();
        assert_eq!(loaded.entry_id, "e1");
        assert_eq!(loaded.new_balance, dec("99.95"));

        assert!(get_idempotency(&conn, "v1", "other").unwrap().is_none());
    }

    #[test]
    fn test_offline_good_cost_helpers() {
        let good = OfflineGood {
            id: "g1".to_string(),
            vendor_id: "v1".to_string(),
            supplier_id: None,
            purchase_price: dec("50"),
            selling_price: dec("80"),
            quantity: 5,
            sold_quantity: 2,
            profit: dec("150"),
            created_at: Utc::now(),
        };
        assert_eq!(good.total_cost(), dec("250"));
        assert_eq!(good.remaining_quantity(), 3);
        assert_eq!(good.remaining_cost(), dec("150"));
        assert_eq!(good.sold_unsettled_cost(), dec("100"));
        // split covers the full original cost
        assert_eq!(good.remaining_cost() + good.sold_unsettled_cost(), good.total_cost());
    }
}
