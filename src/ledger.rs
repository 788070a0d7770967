// Capital ledger - the only code path allowed to mutate a vendor's balance
//
// Every mutation runs inside one IMMEDIATE SQLite transaction: the ledger
// entry insert and the balance update commit together or not at all. A
// competing writer gets SQLITE_BUSY before anything is written, which maps
// to ConcurrentModification (retryable).
//
// SQLite allows one writer per database, so the per-vendor exclusive lock
// is coarsened to the shared connection mutex: mutations for different
// vendors serialize here too.

use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::db::{self, Correlation, IdempotencyRecord, LedgerEntry, VendorAccount};
use crate::error::{LedgerError, LedgerResult};
use crate::taxonomy::{Sign, TransactionKind};

/// Result of a recorded transaction, also what an idempotent replay returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub entry_id: String,
    pub new_balance: Decimal,
    /// True when an idempotency key matched a previously applied call and
    /// nothing was written this time.
    pub replayed: bool,
}

/// Injected ledger dependency - owns the connection, no ambient global.
#[derive(Clone)]
pub struct LedgerService {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerService {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open (or create) the database at `path` and set up the schema.
    pub fn open(path: &Path) -> LedgerResult<Self> {
        let conn = Connection::open(path)?;
        db::setup_database(&conn)?;
        Ok(Self::new(conn))
    }

    /// In-memory service, used by tests and the CLI dry-run.
    pub fn in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory()?;
        db::setup_database(&conn)?;
        Ok(Self::new(conn))
    }

    /// Run a read-only closure against the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| LedgerError::Internal("connection mutex poisoned".to_string()))?;
        f(&conn)
    }

    /// Run a closure inside one IMMEDIATE transaction. Commit on Ok,
    /// automatic rollback on Err - callers never see partial state.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> LedgerResult<T>,
    ) -> LedgerResult<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| LedgerError::Internal("connection mutex poisoned".to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ========================================================================
    // VENDOR ACCOUNTS
    // ========================================================================

    /// Create a vendor. Non-zero initial capital is written as an opening
    /// DEPOSIT entry so the chain starts consistent (entry 1: 0 -> initial).
    pub fn create_vendor(&self, initial_capital: Decimal) -> LedgerResult<VendorAccount> {
        if initial_capital < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(initial_capital));
        }

        let vendor = VendorAccount {
            id: uuid::Uuid::new_v4().to_string(),
            capital_balance: Decimal::ZERO,
            initial_capital,
            created_at: Utc::now(),
        };

        self.with_tx(|tx| {
            db::insert_vendor(tx, &vendor)?;
            if initial_capital > Decimal::ZERO {
                Self::record_in_tx(
                    tx,
                    &vendor.id,
                    TransactionKind::Deposit,
                    initial_capital,
                    "opening capital",
                    Correlation::none(),
                )?;
            }
            Ok(())
        })?;

        tracing::info!(vendor_id = %vendor.id, %initial_capital, "vendor account created");
        self.get_vendor(&vendor.id)
    }

    pub fn get_vendor(&self, vendor_id: &str) -> LedgerResult<VendorAccount> {
        self.with_conn(|conn| db::get_vendor(conn, vendor_id))
    }

    /// Current balance; pure read.
    pub fn balance(&self, vendor_id: &str) -> LedgerResult<Decimal> {
        Ok(self.get_vendor(vendor_id)?.capital_balance)
    }

    // ========================================================================
    // RECORD TRANSACTION
    // ========================================================================

    /// Apply one signed balance change and append its ledger entry, as a
    /// single atomic unit.
    ///
    /// With an idempotency key, a repeated call carrying the same payload
    /// returns the stored receipt without re-applying; the same key with a
    /// different payload fails with IdempotencyConflict.
    pub fn record_transaction(
        &self,
        vendor_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: &str,
        correlation: Correlation,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<TransactionReceipt> {
        let fingerprint = request_fingerprint(vendor_id, kind, amount, description, &correlation);

        let receipt = self.with_tx(|tx| {
            if let Some(key) = idempotency_key {
                if let Some(stored) = db::get_idempotency(tx, vendor_id, key)? {
                    if stored.fingerprint != fingerprint {
                        return Err(LedgerError::IdempotencyConflict);
                    }
                    return Ok(TransactionReceipt {
                        entry_id: stored.entry_id,
                        new_balance: stored.new_balance,
                        replayed: true,
                    });
                }
            }

            let receipt =
                Self::record_in_tx(tx, vendor_id, kind, amount, description, correlation)?;

            if let Some(key) = idempotency_key {
                db::insert_idempotency(
                    tx,
                    &IdempotencyRecord {
                        vendor_id: vendor_id.to_string(),
                        key: key.to_string(),
                        fingerprint,
                        entry_id: receipt.entry_id.clone(),
                        new_balance: receipt.new_balance,
                    },
                )?;
            }
            Ok(receipt)
        })?;

        if receipt.replayed {
            tracing::info!(%vendor_id, kind = %kind, %amount, "idempotent replay, no write");
        } else {
            tracing::info!(
                %vendor_id,
                kind = %kind,
                %amount,
                new_balance = %receipt.new_balance,
                "transaction recorded"
            );
        }
        Ok(receipt)
    }

    /// Core mutation, composable inside a caller-owned transaction so
    /// partner / offline row writes commit with the ledger entry.
    pub(crate) fn record_in_tx(
        tx: &Connection,
        vendor_id: &str,
        kind: TransactionKind,
        amount: Decimal,
        description: &str,
        correlation: Correlation,
    ) -> LedgerResult<TransactionReceipt> {
        // ADJUSTMENT sets the balance absolutely and is the one kind allowed
        // to carry zero or a negative target. Everything else must move money.
        if kind.sign() != Sign::Absolute && amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let vendor = db::get_vendor(tx, vendor_id)?;
        let before = vendor.capital_balance;

        let after = match kind.sign() {
            Sign::Credit => before + amount,
            Sign::Debit => before - amount,
            Sign::Absolute => amount,
        };

        if after < Decimal::ZERO && !kind.allows_negative() {
            return Err(LedgerError::InsufficientBalance {
                balance: before,
                requested: amount,
            });
        }

        let entry = LedgerEntry {
            id: uuid::Uuid::new_v4().to_string(),
            vendor_id: vendor_id.to_string(),
            seq: db::next_seq(tx, vendor_id)?,
            kind,
            amount: amount.abs(),
            balance_before: before,
            balance_after: after,
            description: description.to_string(),
            partner_id: correlation.partner_id,
            supplier_id: correlation.supplier_id,
            product_id: correlation.product_id,
            created_at: Utc::now(),
        };

        db::insert_entry(tx, &entry)?;
        db::update_vendor_balance(tx, vendor_id, after)?;

        Ok(TransactionReceipt {
            entry_id: entry.id,
            new_balance: after,
            replayed: false,
        })
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Reverse-chronological, restartable page of entries. Pure read.
    pub fn list_transactions(
        &self,
        vendor_id: &str,
        kind: Option<TransactionKind>,
        limit: i64,
        before_seq: Option<i64>,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        let limit = limit.clamp(1, 500);
        self.with_conn(|conn| {
            // Surface NotFound for unknown vendors rather than an empty page
            db::get_vendor(conn, vendor_id)?;
            db::list_entries(conn, vendor_id, kind, limit, before_seq)
        })
    }

    pub fn entry_count(&self, vendor_id: &str) -> LedgerResult<i64> {
        self.with_conn(|conn| db::entry_count(conn, vendor_id))
    }

    /// Recompute the balance by folding entries in creation order, checking
    /// the before/after chain link by link, and assert the fold matches the
    /// stored balance. Returns the folded balance.
    pub fn replay(&self, vendor_id: &str) -> LedgerResult<Decimal> {
        self.with_conn(|conn| {
            let vendor = db::get_vendor(conn, vendor_id)?;
            let entries = db::entries_in_order(conn, vendor_id)?;
            let folded = replay_entries(vendor_id, &entries)?;

            if folded != vendor.capital_balance {
                return Err(LedgerError::ChainBroken {
                    vendor_id: vendor_id.to_string(),
                    detail: format!(
                        "replayed {} but stored balance is {}",
                        folded, vendor.capital_balance
                    ),
                });
            }
            Ok(folded)
        })
    }
}

/// Fold entries in seq order, verifying every chain link. Exposed for the
/// reconciliation audit.
pub fn replay_entries(vendor_id: &str, entries: &[LedgerEntry]) -> LedgerResult<Decimal> {
    let mut running = Decimal::ZERO;

    for entry in entries {
        if entry.balance_before != running {
            return Err(LedgerError::ChainBroken {
                vendor_id: vendor_id.to_string(),
                detail: format!(
                    "entry seq {} expects balance_before {} but chain is at {}",
                    entry.seq, entry.balance_before, running
                ),
            });
        }

        let expected_after = match entry.kind.sign() {
            Sign::Credit => running + entry.amount,
            Sign::Debit => running - entry.amount,
            // ADJUSTMENT stores the target in balance_after; amount holds its
            // magnitude, so the sign must come from the entry itself.
            Sign::Absolute => entry.balance_after,
        };

        if entry.balance_after != expected_after {
            return Err(LedgerError::ChainBroken {
                vendor_id: vendor_id.to_string(),
                detail: format!(
                    "entry seq {} records balance_after {} but {} {} on {} gives {}",
                    entry.seq,
                    entry.balance_after,
                    entry.kind,
                    entry.amount,
                    running,
                    expected_after
                ),
            });
        }

        running = entry.balance_after;
    }

    Ok(running)
}

fn request_fingerprint(
    vendor_id: &str,
    kind: TransactionKind,
    amount: Decimal,
    description: &str,
    correlation: &Correlation,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(vendor_id);
    hasher.update(kind.as_str());
    hasher.update(amount.to_string());
    hasher.update(description);
    for id in [
        &correlation.partner_id,
        &correlation.supplier_id,
        &correlation.product_id,
    ]
    .into_iter()
    .flatten()
    {
        hasher.update(id);
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
