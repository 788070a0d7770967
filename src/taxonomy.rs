// Transaction taxonomy - maps every transaction kind to its signed effect
// on the vendor balance and its validity rules.
//
// This is the only place that knows whether a kind credits, debits, or
// absolutely sets the balance. Pure functions, no side effects.

use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};

// ============================================================================
// TRANSACTION KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    // Credits (balance increases)
    Deposit,
    Refund,
    SaleProfit,
    ConsignmentProfit,
    ReceiptFromSupplier,

    // Debits (balance decreases, never below zero)
    Withdrawal,
    Purchase,
    Expense,
    PaymentToSupplier,

    // Absolute (balance is set to the given amount)
    Adjustment,
}

/// Signed effect of a kind on the running balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    /// Balance increases by amount
    Credit,
    /// Balance decreases by amount
    Debit,
    /// Balance is replaced by amount (explicit correction)
    Absolute,
}

impl TransactionKind {
    pub fn sign(&self) -> Sign {
        match self {
            TransactionKind::Deposit
            | TransactionKind::Refund
            | TransactionKind::SaleProfit
            | TransactionKind::ConsignmentProfit
            | TransactionKind::ReceiptFromSupplier => Sign::Credit,

            TransactionKind::Withdrawal
            | TransactionKind::Purchase
            | TransactionKind::Expense
            | TransactionKind::PaymentToSupplier => Sign::Debit,

            TransactionKind::Adjustment => Sign::Absolute,
        }
    }

    /// Whether a resulting negative balance is permitted.
    ///
    /// Only an explicit ADJUSTMENT may leave the balance negative; debits
    /// fail closed with InsufficientBalance instead.
    pub fn allows_negative(&self) -> bool {
        matches!(self, TransactionKind::Adjustment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "DEPOSIT",
            TransactionKind::Refund => "REFUND",
            TransactionKind::SaleProfit => "SALE_PROFIT",
            TransactionKind::ConsignmentProfit => "CONSIGNMENT_PROFIT",
            TransactionKind::ReceiptFromSupplier => "RECEIPT_FROM_SUPPLIER",
            TransactionKind::Withdrawal => "WITHDRAWAL",
            TransactionKind::Purchase => "PURCHASE",
            TransactionKind::Expense => "EXPENSE",
            TransactionKind::PaymentToSupplier => "PAYMENT_TO_SUPPLIER",
            TransactionKind::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "DEPOSIT" => Ok(TransactionKind::Deposit),
            "REFUND" => Ok(TransactionKind::Refund),
            "SALE_PROFIT" => Ok(TransactionKind::SaleProfit),
            "CONSIGNMENT_PROFIT" => Ok(TransactionKind::ConsignmentProfit),
            "RECEIPT_FROM_SUPPLIER" => Ok(TransactionKind::ReceiptFromSupplier),
            "WITHDRAWAL" => Ok(TransactionKind::Withdrawal),
            "PURCHASE" => Ok(TransactionKind::Purchase),
            "EXPENSE" => Ok(TransactionKind::Expense),
            "PAYMENT_TO_SUPPLIER" => Ok(TransactionKind::PaymentToSupplier),
            "ADJUSTMENT" => Ok(TransactionKind::Adjustment),
            other => Err(LedgerError::InvalidKind(other.to_string())),
        }
    }

    /// All kinds, in credit / debit / absolute order.
    pub fn all() -> &'static [TransactionKind] {
        &[
            TransactionKind::Deposit,
            TransactionKind::Refund,
            TransactionKind::SaleProfit,
            TransactionKind::ConsignmentProfit,
            TransactionKind::ReceiptFromSupplier,
            TransactionKind::Withdrawal,
            TransactionKind::Purchase,
            TransactionKind::Expense,
            TransactionKind::PaymentToSupplier,
            TransactionKind::Adjustment,
        ]
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TESTS
// ============================================================================
