//! Core entities of the exchange ledger.
//!
//! Three records make up the whole data model:
//! - `Account`: a user's credit balance, keyed by id with phone and
//!   pseudo as secondary lookup keys.
//! - `ExchangeTask`: a published request for engagement actions, funded
//!   by its creator.
//! - `Completion`: one account's attempt at one unit of a task, at most
//!   one per `(task_id, user_id)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The engagement action a task asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskType {
    Like,
    Follow,
    Comment,
    Share,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Like => "LIKE",
            TaskType::Follow => "FOLLOW",
            TaskType::Comment => "COMMENT",
            TaskType::Share => "SHARE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LIKE" => Some(TaskType::Like),
            "FOLLOW" => Some(TaskType::Follow),
            "COMMENT" => Some(TaskType::Comment),
            "SHARE" => Some(TaskType::Share),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account holding a credit balance.
///
/// Invariant: `credits >= 0` at all observable times. The balance is
/// mutated only through `AccountStore::adjust_credits`, which rejects
/// any delta that would take it negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    /// Unique secondary key; accounts provisioned lazily from a task
    /// interaction use the caller-supplied key as their phone.
    pub phone: String,
    pub pseudo: Option<String>,
    pub credits: i64,
    /// Admin accounts skip the escrow debit at task creation.
    #[serde(default)]
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// A fresh non-admin account using `key` as both phone and pseudo.
    pub fn provisional(key: &str, credits: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            phone: key.to_string(),
            pseudo: Some(key.to_string()),
            credits,
            admin: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A published exchange task.
///
/// Invariant: `remaining_actions >= 0`; once it reaches 0 the task is
/// exhausted and accepts no further completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeTask {
    pub id: Uuid,
    pub task_type: TaskType,
    pub url: String,
    /// Declared reward per action. Carried in the record and on the
    /// wire, but the payout currently comes from the configured
    /// completion reward instead (see `LedgerPolicy`).
    pub reward_per_action: i64,
    pub remaining_actions: i64,
    pub creator_id: Uuid,
    /// The identity key the creator was submitted under (phone or
    /// pseudo), echoed back on the wire.
    pub creator_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One account's completion attempt for one task.
///
/// Invariant: at most one Completion per `(task_id, user_id)` pair,
/// enforced by the completion store's atomic create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub id: Uuid,
    pub task_id: Uuid,
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    pub verified: bool,
    pub verification_result: String,
    pub verification_date: Option<DateTime<Utc>>,
}

impl Completion {
    pub fn new(task_id: Uuid, user_id: &str, verified: bool, result: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id: user_id.to_string(),
            completed_at: now,
            verified,
            verification_result: result.to_string(),
            verification_date: verified.then_some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trip() {
        for t in [
            TaskType::Like,
            TaskType::Follow,
            TaskType::Comment,
            TaskType::Share,
        ] {
            assert_eq!(TaskType::parse(t.as_str()), Some(t));
        }
        assert_eq!(TaskType::parse("RETWEET"), None);
    }

    #[test]
    fn task_type_wire_format_is_uppercase() {
        let json = serde_json::to_string(&TaskType::Follow).unwrap();
        assert_eq!(json, "\"FOLLOW\"");
        let back: TaskType = serde_json::from_str("\"SHARE\"").unwrap();
        assert_eq!(back, TaskType::Share);
    }

    #[test]
    fn provisional_account_uses_key_for_both_identities() {
        let account = Account::provisional("+237600000001", 100);
        assert_eq!(account.phone, "+237600000001");
        assert_eq!(account.pseudo.as_deref(), Some("+237600000001"));
        assert_eq!(account.credits, 100);
        assert!(!account.admin);
    }

    #[test]
    fn verified_completion_gets_a_verification_date() {
        let task_id = Uuid::new_v4();
        let ok = Completion::new(task_id, "alice", true, "accepted");
        assert!(ok.verification_date.is_some());
        let pending = Completion::new(task_id, "bob", false, "not detected");
        assert!(pending.verification_date.is_none());
    }
}
