// Capability boundary - authorization modeled as a capability set checked
// once at the service edge, instead of role branching re-implemented in
// every handler.

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Vendor,
    Admin,
    PartnerStaff,
}

impl Role {
    pub fn parse(s: &str) -> LedgerResult<Self> {
        match s {
            "VENDOR" => Ok(Role::Vendor),
            "ADMIN" => Ok(Role::Admin),
            "PARTNER_STAFF" => Ok(Role::PartnerStaff),
            other => Err(LedgerError::InvalidKind(other.to_string())),
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::Admin => &[
                Capability::RecordTransactions,
                Capability::ManagePartners,
                Capability::ManageOfflineStock,
                Capability::RunAudit,
                Capability::ViewLedger,
            ],
            Role::Vendor => &[
                Capability::RecordTransactions,
                Capability::ManagePartners,
                Capability::ManageOfflineStock,
                Capability::RunAudit,
                Capability::ViewLedger,
            ],
            Role::PartnerStaff => &[Capability::ManagePartners, Capability::ViewLedger],
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    RecordTransactions,
    ManagePartners,
    ManageOfflineStock,
    RunAudit,
    ViewLedger,
}

impl Capability {
    pub fn name(&self) -> &'static str {
        match self {
            Capability::RecordTransactions => "record_transactions",
            Capability::ManagePartners => "manage_partners",
            Capability::ManageOfflineStock => "manage_offline_stock",
            Capability::RunAudit => "run_audit",
            Capability::ViewLedger => "view_ledger",
        }
    }
}

/// The single boundary check: fail with Forbidden unless the role carries
/// the capability.
pub fn require(role: Role, capability: Capability) -> LedgerResult<()> {
    if role.can(capability) {
        Ok(())
    } else {
        Err(LedgerError::Forbidden(capability.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_and_vendor_hold_everything() {
        for role in [Role::Admin, Role::Vendor] {
            for cap in [
                Capability::RecordTransactions,
                Capability::ManagePartners,
                Capability::ManageOfflineStock,
                Capability::RunAudit,
                Capability::ViewLedger,
            ] {
                assert!(require(role, cap).is_ok());
            }
        }
    }

    #[test]
    fn test_partner_staff_cannot_move_money() {
        assert!(require(Role::PartnerStaff, Capability::ManagePartners).is_ok());
        assert!(require(Role::PartnerStaff, Capability::ViewLedger).is_ok());

        let err = require(Role::PartnerStaff, Capability::RecordTransactions).unwrap_err();
        assert!(matches!(err, LedgerError::Forbidden("record_transactions")));
        assert!(require(Role::PartnerStaff, Capability::ManageOfflineStock).is_err());
    }

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("ADMIN").unwrap(), Role::Admin);
        assert!(Role::parse("INTERN").is_err());
    }
}
