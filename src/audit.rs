//! Append-only audit log of credit movements.
//!
//! Every debit and payout the ledger performs is recorded here for
//! observability and conservation checks. Writing an entry is never
//! allowed to fail a ledger operation; callers log and move on.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::LedgerError;

/// Why a balance moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    TaskEscrow,
    EscrowRefund,
    CompletionReward,
    ManualApproval,
}

impl AuditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditReason::TaskEscrow => "task_escrow",
            AuditReason::EscrowRefund => "escrow_refund",
            AuditReason::CompletionReward => "completion_reward",
            AuditReason::ManualApproval => "manual_approval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "task_escrow" => Some(AuditReason::TaskEscrow),
            "escrow_refund" => Some(AuditReason::EscrowRefund),
            "completion_reward" => Some(AuditReason::CompletionReward),
            "manual_approval" => Some(AuditReason::ManualApproval),
            _ => None,
        }
    }
}

/// One recorded credit movement.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Signed credit delta as applied to the balance.
    pub delta: i64,
    pub reason: AuditReason,
    pub task_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(account_id: Uuid, delta: i64, reason: AuditReason, task_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            delta,
            reason,
            task_id,
            created_at: Utc::now(),
        }
    }
}

/// Aggregates used by the conservation checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AuditTotals {
    /// Sum of all negative deltas, as a positive number.
    pub total_debited: i64,
    /// Sum of all positive deltas.
    pub total_credited: i64,
}

/// Append-only sink for credit movements.
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> Result<(), LedgerError>;

    fn entries_for_account(&self, account_id: Uuid) -> Result<Vec<AuditEntry>, LedgerError>;

    fn totals(&self) -> Result<AuditTotals, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trip() {
        for r in [
            AuditReason::TaskEscrow,
            AuditReason::EscrowRefund,
            AuditReason::CompletionReward,
            AuditReason::ManualApproval,
        ] {
            assert_eq!(AuditReason::parse(r.as_str()), Some(r));
        }
        assert_eq!(AuditReason::parse("bonus"), None);
    }
}
