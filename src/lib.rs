// Vendor Capital Ledger - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod access;
pub mod audit;
pub mod db;
pub mod error;
pub mod ledger;
pub mod offline;
pub mod partners;
pub mod taxonomy;

// Re-export commonly used types
pub use access::{require, Capability, Role};
pub use audit::{AuditReport, ReconciliationAudit};
pub use db::{
    setup_database, Correlation, LedgerEntry, OfflineGood, OfflineSupplier,
    OfflineSupplierPayment, PartnerShare, PaymentKind, VendorAccount,
};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{LedgerService, TransactionReceipt};
pub use offline::{OfflineSubledger, SupplierPosition};
pub use partners::PartnerCapitalManager;
pub use taxonomy::{Sign, TransactionKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
