// Partner capital manager - per-partner contributions against the vendor total
//
// Partner shares never touch the balance themselves: every capital movement
// is a ledger transaction, and the share row commits in the same atomic unit
// as its entry.

use chrono::Utc;
use rust_decimal::Decimal;

use crate::db::{self, Correlation, PartnerShare};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::LedgerService;
use crate::taxonomy::TransactionKind;

#[derive(Clone)]
pub struct PartnerCapitalManager {
    ledger: LedgerService,
}

impl PartnerCapitalManager {
    pub fn new(ledger: LedgerService) -> Self {
        Self { ledger }
    }

    /// Create a PartnerShare and deposit its capital, atomically.
    pub fn add_partner(
        &self,
        vendor_id: &str,
        name: &str,
        amount: Decimal,
        percent: Decimal,
    ) -> LedgerResult<PartnerShare> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }
        if percent < Decimal::ZERO || percent > Decimal::from(100) {
            return Err(LedgerError::InvalidAmount(percent));
        }

        let share = PartnerShare {
            id: uuid::Uuid::new_v4().to_string(),
            vendor_id: vendor_id.to_string(),
            partner_name: name.to_string(),
            capital_percent: percent,
            initial_amount: amount,
            current_amount: amount,
            created_at: Utc::now(),
        };

        self.ledger.with_tx(|tx| {
            db::insert_partner(tx, &share)?;
            LedgerService::record_in_tx(
                tx,
                vendor_id,
                TransactionKind::Deposit,
                amount,
                &format!("partner deposit: {name}"),
                Correlation::partner(&share.id),
            )?;
            Ok(())
        })?;

        tracing::info!(partner_id = %share.id, %vendor_id, %amount, "partner added");
        Ok(share)
    }

    /// Move the partner's stake to `new_amount` via a diff-sized DEPOSIT or
    /// WITHDRAWAL. InsufficientBalance propagates and the share stays put.
    pub fn adjust_partner_capital(
        &self,
        partner_id: &str,
        new_amount: Decimal,
    ) -> LedgerResult<PartnerShare> {
        if new_amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(new_amount));
        }

        let updated = self.ledger.with_tx(|tx| {
            let share = db::get_partner(tx, partner_id)?;
            let diff = new_amount - share.current_amount;

            if !diff.is_zero() {
                let (kind, magnitude) = if diff > Decimal::ZERO {
                    (TransactionKind::Deposit, diff)
                } else {
                    (TransactionKind::Withdrawal, -diff)
                };
                LedgerService::record_in_tx(
                    tx,
                    &share.vendor_id,
                    kind,
                    magnitude,
                    &format!("partner capital adjusted: {}", share.partner_name),
                    Correlation::partner(partner_id),
                )?;
                db::update_partner_amount(tx, partner_id, new_amount)?;
            }

            Ok(PartnerShare {
                current_amount: new_amount,
                ..share
            })
        })?;

        tracing::info!(%partner_id, %new_amount, "partner capital adjusted");
        Ok(updated)
    }

    /// Record a WITHDRAWAL of the partner's current stake (capital leaves
    /// with the partner), then delete the share - one atomic unit.
    pub fn remove_partner(&self, partner_id: &str) -> LedgerResult<()> {
        self.ledger.with_tx(|tx| {
            let share = db::get_partner(tx, partner_id)?;

            if share.current_amount > Decimal::ZERO {
                LedgerService::record_in_tx(
                    tx,
                    &share.vendor_id,
                    TransactionKind::Withdrawal,
                    share.current_amount,
                    &format!("partner removed: {}", share.partner_name),
                    Correlation::partner(partner_id),
                )?;
            }
            db::delete_partner(tx, partner_id)
        })?;

        tracing::info!(%partner_id, "partner removed");
        Ok(())
    }

    pub fn get_partner(&self, partner_id: &str) -> LedgerResult<PartnerShare> {
        self.ledger.with_conn(|conn| db::get_partner(conn, partner_id))
    }

    pub fn list_partners(&self, vendor_id: &str) -> LedgerResult<Vec<PartnerShare>> {
        self.ledger.with_conn(|conn| db::list_partners(conn, vendor_id))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::TransactionKind;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn setup(initial: &str) -> (LedgerService, PartnerCapitalManager, String) {
        let ledger = LedgerService::in_memory().unwrap();
        let vendor = ledger.create_vendor(dec(initial)).unwrap();
        let partners = PartnerCapitalManager::new(ledger.clone());
        (ledger, partners, vendor.id)
    }

    #[test]
    fn test_add_partner_deposits_capital() {
        let (ledger, partners, vendor_id) = setup("7500");

        let share = partners
            .add_partner(&vendor_id, "A", dec("50000"), dec("30"))
            .unwrap();

        assert_eq!(share.current_amount, dec("50000"));
        assert_eq!(share.initial_amount, dec("50000"));
        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("57500"));

        let deposits = ledger
            .list_transactions(&vendor_id, Some(TransactionKind::Deposit), 10, None)
            .unwrap();
        let partner_entry = deposits
            .iter()
            .find(|e| e.partner_id.as_deref() == Some(share.id.as_str()))
            .expect("partner deposit entry");
        assert_eq!(partner_entry.amount, dec("50000"));
        assert_eq!(partner_entry.description, "partner deposit: A");

        assert_eq!(ledger.replay(&vendor_id).unwrap(), dec("57500"));
    }

    #[test]
    fn test_add_partner_rejects_bad_percent() {
        let (_ledger, partners, vendor_id) = setup("0");
        let err = partners
            .add_partner(&vendor_id, "A", dec("100"), dec("101"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_adjust_up_and_down() {
        let (ledger, partners, vendor_id) = setup("1000");
        let share = partners
            .add_partner(&vendor_id, "B", dec("500"), dec("10"))
            .unwrap();

        let up = partners.adjust_partner_capital(&share.id, dec("800")).unwrap();
        assert_eq!(up.current_amount, dec("800"));
        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("1800"));

        let down = partners.adjust_partner_capital(&share.id, dec("300")).unwrap();
        assert_eq!(down.current_amount, dec("300"));
        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("1300"));

        assert_eq!(ledger.replay(&vendor_id).unwrap(), dec("1300"));
    }

    #[test]
    fn test_adjust_noop_writes_nothing() {
        let (ledger, partners, vendor_id) = setup("1000");
        let share = partners
            .add_partner(&vendor_id, "B", dec("500"), dec("10"))
            .unwrap();
        let count_before = ledger.entry_count(&vendor_id).unwrap();

        partners.adjust_partner_capital(&share.id, dec("500")).unwrap();

        assert_eq!(ledger.entry_count(&vendor_id).unwrap(), count_before);
    }

    #[test]
    fn test_adjust_down_fails_closed_when_vendor_would_go_negative() {
        let (ledger, partners, vendor_id) = setup("0");
        let share = partners
            .add_partner(&vendor_id, "C", dec("500"), dec("50"))
            .unwrap();

        // Vendor spends most of the capital
        ledger
            .record_transaction(
                &vendor_id,
                TransactionKind::Expense,
                dec("400"),
                "stock",
                Correlation::none(),
                None,
            )
            .unwrap();

        // Withdrawing the partner down to 0 needs 500 but only 100 remains
        let err = partners
            .adjust_partner_capital(&share.id, dec("0"))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        // Share untouched, balance untouched, chain intact
        let reloaded = partners.get_partner(&share.id).unwrap();
        assert_eq!(reloaded.current_amount, dec("500"));
        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("100"));
        assert_eq!(ledger.replay(&vendor_id).unwrap(), dec("100"));
    }

    #[test]
    fn test_remove_partner_withdraws_stake_and_deletes_share() {
        let (ledger, partners, vendor_id) = setup("1000");
        let share = partners
            .add_partner(&vendor_id, "D", dec("600"), dec("25"))
            .unwrap();

        partners.remove_partner(&share.id).unwrap();

        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("1000"));
        let err = partners.get_partner(&share.id).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound("partner", _)));
        assert_eq!(ledger.replay(&vendor_id).unwrap(), dec("1000"));
    }

    #[test]
    fn test_remove_partner_fails_closed_on_insufficient_balance() {
        let (ledger, partners, vendor_id) = setup("0");
        let share = partners
            .add_partner(&vendor_id, "E", dec("500"), dec("50"))
            .unwrap();
        ledger
            .record_transaction(
                &vendor_id,
                TransactionKind::Expense,
                dec("300"),
                "spent",
                Correlation::none(),
                None,
            )
            .unwrap();

        let err = partners.remove_partner(&share.id).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));

        // Share survives because the withdrawal rolled back
        assert!(partners.get_partner(&share.id).is_ok());
        assert_eq!(ledger.balance(&vendor_id).unwrap(), dec("200"));
    }

    #[test]
    fn test_list_partners() {
        let (_ledger, partners, vendor_id) = setup("0");
        partners.add_partner(&vendor_id, "A", dec("10"), dec("5")).unwrap();
        partners.add_partner(&vendor_id, "B", dec("20"), dec("10")).unwrap();

        let listed = partners.list_partners(&vendor_id).unwrap();
        assert_eq!(listed.len(), 2);
    }
}
