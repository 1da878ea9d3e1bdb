//! Store contracts for the exchange ledger.
//!
//! The ledger never mutates state directly; it composes these narrow
//! contracts, and all concurrency correctness lives behind them:
//! - `AccountStore::adjust_credits` is a single conditional update that
//!   fails closed instead of going negative;
//! - `TaskStore::decrement_remaining` is a single conditional update
//!   that fails closed at zero;
//! - `CompletionStore::create` is an atomic check-and-insert backed by a
//!   uniqueness constraint on `(task_id, user_id)`.

mod sqlite;

pub use sqlite::SqliteStore;

use uuid::Uuid;

use crate::audit::AuditLog;
use crate::error::LedgerError;
use crate::model::{Account, Completion, ExchangeTask};

/// Account balances and identity lookup.
pub trait AccountStore: Send + Sync {
    fn get(&self, id: Uuid) -> Result<Option<Account>, LedgerError>;

    /// Lookup by either secondary key.
    fn get_by_phone_or_pseudo(&self, key: &str) -> Result<Option<Account>, LedgerError>;

    /// Resolve an identity key trying id, then phone, then pseudo.
    fn resolve(&self, key: &str) -> Result<Option<Account>, LedgerError>;

    fn create(&self, account: &Account) -> Result<(), LedgerError>;

    /// Atomically apply `delta` to the balance, failing with
    /// `InsufficientFunds` if the result would be negative. Safe under
    /// concurrent calls for the same account: no lost updates.
    fn adjust_credits(&self, id: Uuid, delta: i64) -> Result<Account, LedgerError>;
}

/// Exchange task records.
pub trait TaskStore: Send + Sync {
    fn create(&self, task: &ExchangeTask) -> Result<(), LedgerError>;

    fn get(&self, id: Uuid) -> Result<Option<ExchangeTask>, LedgerError>;

    fn list(&self) -> Result<Vec<ExchangeTask>, LedgerError>;

    /// Atomically consume one action slot, failing with `TaskExhausted`
    /// when none remain. Two racing calls against a counter of 1 cannot
    /// both succeed.
    fn decrement_remaining(&self, id: Uuid) -> Result<ExchangeTask, LedgerError>;

    /// Compensating inverse of `decrement_remaining`, used by manual
    /// rejection.
    fn increment_remaining(&self, id: Uuid) -> Result<ExchangeTask, LedgerError>;

    /// Returns whether a row was actually removed.
    fn delete(&self, id: Uuid) -> Result<bool, LedgerError>;
}

/// Completion attempts, at most one per `(task_id, user_id)`.
pub trait CompletionStore: Send + Sync {
    /// Fast-path check only; `create` is the authoritative guard.
    fn exists(&self, task_id: Uuid, user_id: &str) -> Result<bool, LedgerError>;

    /// Atomic check-and-insert: fails with `AlreadyCompleted` when a row
    /// for the `(task_id, user_id)` pair already exists.
    fn create(&self, completion: &Completion) -> Result<(), LedgerError>;

    fn get(&self, id: Uuid) -> Result<Option<Completion>, LedgerError>;

    fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Completion>, LedgerError>;

    /// Flip an unverified completion to verified, failing with
    /// `AlreadyVerified` if it was verified before.
    fn mark_verified(&self, id: Uuid, result: &str) -> Result<Completion, LedgerError>;

    fn delete(&self, id: Uuid) -> Result<bool, LedgerError>;
}

/// Everything the ledger needs from persistence, as one seam.
pub trait ExchangeStore: AccountStore + TaskStore + CompletionStore + AuditLog {}

impl<T: AccountStore + TaskStore + CompletionStore + AuditLog> ExchangeStore for T {}
