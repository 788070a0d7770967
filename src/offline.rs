// Offline consignment subledger - externally sourced inventory funded from
// vendor capital, plus supplier receivables/payables.
//
// The one rule the drifting source system lacked: once any unit of a good
// has sold, its cost is never reversed. Deletion is only possible at
// sold_quantity == 0, and it credits back exactly what the purchase debited.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{self, Correlation, OfflineGood, OfflineSupplier, OfflineSupplierPayment, PaymentKind};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{LedgerService, TransactionReceipt};
use crate::taxonomy::TransactionKind;

/// Supplier receivable/payable, computed on read from goods and payments -
/// never stored redundantly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierPosition {
    pub supplier_id: String,
    pub goods_cost: Decimal,
    pub paid_to_supplier: Decimal,
    pub received_from_supplier: Decimal,
    /// goods_cost + received - paid: what the vendor still owes the supplier
    /// (negative means the supplier owes the vendor).
    pub outstanding: Decimal,
}

#[derive(Clone)]
pub struct OfflineSubledger {
    ledger: LedgerService,
}

impl OfflineSubledger {
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    // ========================================================================
    // GOODS
    // ========================================================================

    /// Buy externally sourced stock with vendor capital. The PURCHASE debit
    /// and the good row commit together; on InsufficientBalance nothing is
    /// created and the error reads as "capital too low".
    pub fn purchase_goods(
        &self,
        vendor_id: &str,
        supplier_id: Option<&str>,
        purchase_price: Decimal,
        selling_price: Decimal,
        quantity: i64,
    ) -> LedgerResult<OfflineGood> {
        if purchase_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(purchase_price));
        }
        if selling_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(selling_price));
        }
        if quantity <= 0 {
            return Err(LedgerError::InvalidAmount(Decimal::from(quantity)));
        }

        let good = OfflineGood {
            id: uuid::Uuid::new_v4().to_string(),
            vendor_id: vendor_id.to_string(),
            supplier_id: supplier_id.map(str::to_string),
            purchase_price,
            selling_price,
            quantity,
            sold_quantity: 0,
            profit: (selling_price - purchase_price) * Decimal::from(quantity),
            created_at: Utc::now(),
        };
        let total_cost = good.total_cost();

        self.ledger.with_tx(|tx| {
            if let Some(sid) = supplier_id {
                db::get_supplier(tx, sid)?;
            }

            // Debit first so "capital too low" surfaces before any row exists
            LedgerService::record_in_tx(
                tx,
                vendor_id,
                TransactionKind::Purchase,
                total_cost,
                &format!("offline goods purchase ({} x {})", quantity, purchase_price),
                Correlation {
                    product_id: Some(good.id.clone()),
                    supplier_id: supplier_id.map(str::to_string),
                    partner_id: None,
                },
            )?;
            db::insert_good(tx, &good)
        })?;

        tracing::info!(good_id = %good.id, %vendor_id, %total_cost, "offline goods purchased");
        Ok(good)
    }

    /// Record units sold. Moves no capital: sale proceeds are accounted by
    /// the order/checkout collaborator, and double counting them here was
    /// exactly how the source system drifted.
    pub fn record_sale(&self, good_id: &str, quantity_sold: i64) -> LedgerResult<OfflineGood> {
        if quantity_sold <= 0 {
            return Err(LedgerError::InvalidAmount(Decimal::from(quantity_sold)));
        }

        let updated = self.ledger.with_tx(|tx| {
            let good = db::get_good(tx, good_id)?;
            let new_sold = good.sold_quantity + quantity_sold;
            if new_sold > good.quantity {
                return Err(LedgerError::InvalidAmount(Decimal::from(quantity_sold)));
            }
            db::update_sold_quantity(tx, good_id, new_sold)?;
            Ok(OfflineGood {
                sold_quantity: new_sold,
                ..good
            })
        })?;

        tracing::info!(%good_id, quantity_sold, "offline sale recorded");
        Ok(updated)
    }

    /// Safe deletion: only a fully unsold good may be removed, and removing
    /// it credits back its full cost in the same atomic unit.
    pub fn delete_goods(&self, good_id: &str) -> LedgerResult<TransactionReceipt> {
        let receipt = self.ledger.with_tx(|tx| {
            let good = db::get_good(tx, good_id)?;
            if good.sold_quantity > 0 {
                return Err(LedgerError::HasOutstandingSales {
                    sold: good.sold_quantity,
                });
            }

            let refund = good.total_cost();
            let receipt = LedgerService::record_in_tx(
                tx,
                &good.vendor_id,
                TransactionKind::Deposit,
                refund,
                &format!("offline goods deleted, cost reversed ({} x {})", good.quantity, good.purchase_price),
                Correlation {
                    product_id: Some(good.id.clone()),
                    supplier_id: good.supplier_id.clone(),
                    partner_id: None,
                },
            )?;
            db::delete_good(tx, good_id)?;
            Ok(receipt)
        })?;

        tracing::info!(%good_id, refund = %receipt.new_balance, "offline goods deleted");
        Ok(receipt)
    }

    pub fn get_good(&self, good_id: &str) -> LedgerResult<OfflineGood> {
        self.ledger.with_conn(|conn| db::get_good(conn, good_id))
    }

    pub fn list_goods(&self, vendor_id: &str) -> LedgerResult<Vec<OfflineGood>> {
        self.ledger.with_conn(|conn| db::list_goods(conn, vendor_id))
    }

    // ========================================================================
    // SUPPLIERS & PAYMENTS
    // ========================================================================

    pub fn get_supplier(&self, supplier_id: &str) -> LedgerResult<OfflineSupplier> {
        self.ledger
            .with_conn(|conn| db::get_supplier(conn, supplier_id))
    }

    pub fn create_supplier(&self, vendor_id: &str, name: &str) -> LedgerResult<OfflineSupplier> {
        let supplier = OfflineSupplier {
            id: uuid::Uuid::new_v4().to_string(),
            vendor_id: vendor_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.ledger.with_tx(|tx| {
            db::get_vendor(tx, vendor_id)?;
            db::insert_supplier(tx, &supplier)
        })?;
        Ok(supplier)
    }

    /// Cash between vendor and supplier. RECEIPT credits vendor capital,
    /// PAYMENT debits it (failing closed on insufficient balance); the
    /// payment row and its ledger entry are one atomic unit.
    pub fn record_supplier_payment(
        &self,
        supplier_id: &str,
        kind: PaymentKind,
        amount: Decimal,
    ) -> LedgerResult<OfflineSupplierPayment> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let payment = self.ledger.with_tx(|tx| {
            let supplier = db::get_supplier(tx, supplier_id)?;

            let (tx_kind, description) = match kind {
                PaymentKind::Receipt => (
                    TransactionKind::ReceiptFromSupplier,
                    format!("receipt from supplier: {}", supplier.name),
                ),
                PaymentKind::Payment => (
                    TransactionKind::PaymentToSupplier,
                    format!("payment to supplier: {}", supplier.name),
                ),
            };

            LedgerService::record_in_tx(
                tx,
                &supplier.vendor_id,
                tx_kind,
                amount,
                &description,
                Correlation::supplier(supplier_id),
            )?;

            let payment = OfflineSupplierPayment {
                id: uuid::Uuid::new_v4().to_string(),
                supplier_id: supplier_id.to_string(),
                vendor_id: supplier.vendor_id.clone(),
                kind,
                amount,
                created_at: Utc::now(),
            };
            db::insert_supplier_payment(tx, &payment)?;
            Ok(payment)
        })?;

        tracing::info!(%supplier_id, kind = payment.kind.as_str(), %amount, "supplier payment recorded");
        Ok(payment)
    }

    /// Running receivable/payable for a supplier, recomputed from its goods
    /// and payment records.
    pub fn supplier_position(&self, supplier_id: &str) -> LedgerResult<SupplierPosition> {
        self.ledger.with_conn(|conn| {
            db::get_supplier(conn, supplier_id)?;
            let goods = db::goods_for_supplier(conn, supplier_id)?;
            let payments = db::list_supplier_payments(conn, supplier_id)?;

            let goods_cost: Decimal = goods.iter().map(|g| g.total_cost()).sum();
            let paid: Decimal = payments
                .iter()
                .filter(|p| p.kind == PaymentKind::Payment)
                .map(|p| p.amount)
                .sum();
            let received: Decimal = payments
                .iter()
                .filter(|p| p.kind == PaymentKind::Receipt)
                .map(|p| p.amount)
                .sum();

            Ok(SupplierPosition {
                supplier_id: supplier_id.to_string(),
                goods_cost,
                paid_to_supplier: paid,
                received_from_supplier: received,
                outstanding: goods_cost + received - paid,
            })
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
