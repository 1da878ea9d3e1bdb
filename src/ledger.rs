//! The exchange ledger — the one component that mutates more than one
//! store per logical operation, and therefore the owner of the
//! consistency contract.
//!
//! It holds no locks of its own: every race that matters is closed by an
//! atomic store primitive (conditional balance update, conditional
//! counter decrement, unique completion index), and the ledger composes
//! those primitives in a fixed order with compensating actions for the
//! partial-failure windows in between.

use std::sync::Arc;

use serde::Serialize;
use url::Url;
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditReason};
use crate::config::LedgerPolicy;
use crate::error::LedgerError;
use crate::model::{Account, Completion, ExchangeTask, TaskType};
use crate::store::{AccountStore, CompletionStore, ExchangeStore, TaskStore};
use crate::verify::VerificationEngine;

/// Result of a completion attempt.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub verified: bool,
    pub credits_earned: i64,
    pub remaining_actions: i64,
    pub message: String,
}

/// Result of a manual review decision.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewOutcome {
    pub approved: bool,
    pub credits_earned: Option<i64>,
    pub message: String,
}

/// Orchestrates task creation, completion and manual review over the
/// store contracts.
pub struct ExchangeLedger {
    store: Arc<dyn ExchangeStore>,
    verifier: Arc<dyn VerificationEngine>,
    policy: LedgerPolicy,
}

impl ExchangeLedger {
    pub fn new(
        store: Arc<dyn ExchangeStore>,
        verifier: Arc<dyn VerificationEngine>,
        policy: LedgerPolicy,
    ) -> Self {
        Self {
            store,
            verifier,
            policy,
        }
    }

    pub fn policy(&self) -> &LedgerPolicy {
        &self.policy
    }

    /// Publish a new exchange task, escrowing the creation cost from the
    /// creator's balance first. Admin accounts skip the escrow.
    pub async fn create_task(
        &self,
        creator_key: &str,
        task_type: TaskType,
        url: &str,
        reward_per_action: i64,
        remaining_actions: i64,
    ) -> Result<ExchangeTask, LedgerError> {
        // Validation happens before any mutation.
        self.validate_target(url)?;
        if remaining_actions < 1 {
            return Err(LedgerError::InvalidInput(
                "at least 1 action required".to_string(),
            ));
        }
        if reward_per_action < 1 {
            return Err(LedgerError::InvalidInput(
                "reward per action must be at least 1".to_string(),
            ));
        }

        let creator = self.resolve_or_provision(creator_key)?;

        let escrowed = if creator.admin {
            tracing::info!(creator = creator_key, "admin creation, escrow waived");
            false
        } else {
            self.store
                .adjust_credits(creator.id, -self.policy.creation_cost)?;
            self.audit(AuditEntry::new(
                creator.id,
                -self.policy.creation_cost,
                AuditReason::TaskEscrow,
                None,
            ));
            true
        };

        let now = chrono::Utc::now();
        let task = ExchangeTask {
            id: Uuid::new_v4(),
            task_type,
            url: url.to_string(),
            reward_per_action,
            remaining_actions,
            creator_id: creator.id,
            creator_key: creator_key.to_string(),
            created_at: now,
            updated_at: now,
        };

        if let Err(insert_err) = TaskStore::create(self.store.as_ref(), &task) {
            if escrowed {
                // Compensating refund; only if this also fails is the
                // state reported as partial.
                match self
                    .store
                    .adjust_credits(creator.id, self.policy.creation_cost)
                {
                    Ok(_) => {
                        self.audit(AuditEntry::new(
                            creator.id,
                            self.policy.creation_cost,
                            AuditReason::EscrowRefund,
                            None,
                        ));
                        tracing::warn!(
                            creator = creator_key,
                            "task insert failed, escrow refunded: {}",
                            insert_err
                        );
                    }
                    Err(refund_err) => {
                        tracing::error!(
                            creator = creator_key,
                            "task insert failed and refund failed: {} / {}",
                            insert_err,
                            refund_err
                        );
                        return Err(LedgerError::PartialFailure(format!(
                            "creator debited but task not created; refund failed: {refund_err}"
                        )));
                    }
                }
            }
            return Err(insert_err);
        }

        tracing::info!(
            task_id = %task.id,
            task_type = %task.task_type,
            creator = creator_key,
            remaining = remaining_actions,
            "exchange task created"
        );
        Ok(task)
    }

    /// Record one user's completion of one action slot and pay the
    /// reward when verification passes.
    pub async fn complete_task(
        &self,
        task_id: Uuid,
        user_key: &str,
    ) -> Result<CompletionOutcome, LedgerError> {
        // Fast path only; the completion insert is the authoritative
        // duplicate guard.
        if self.store.exists(task_id, user_key)? {
            return Err(LedgerError::AlreadyCompleted);
        }

        let task = TaskStore::get(self.store.as_ref(), task_id)?
            .ok_or(LedgerError::TaskNotFound)?;
        if task.remaining_actions == 0 {
            return Err(LedgerError::TaskExhausted);
        }

        let verdict = self.verifier.verify(&task, user_key).await;

        let completion = Completion::new(task_id, user_key, verdict.verified, &verdict.result);
        CompletionStore::create(self.store.as_ref(), &completion)?;

        // A slot is consumed whether or not verification passed. If a
        // racing completion exhausted the task between the insert above
        // and here, the completion record stays and no credit is paid.
        let task = self.store.decrement_remaining(task_id)?;

        let credits_earned = if verdict.verified {
            let account = self
                .store
                .resolve(user_key)?
                .ok_or(LedgerError::AccountNotFound)?;
            self.store
                .adjust_credits(account.id, self.policy.completion_reward)?;
            self.audit(AuditEntry::new(
                account.id,
                self.policy.completion_reward,
                AuditReason::CompletionReward,
                Some(task_id),
            ));
            tracing::info!(
                task_id = %task_id,
                user = user_key,
                reward = self.policy.completion_reward,
                "completion verified and rewarded"
            );
            self.policy.completion_reward
        } else {
            tracing::info!(
                task_id = %task_id,
                user = user_key,
                result = %verdict.result,
                "completion recorded unverified"
            );
            0
        };

        Ok(CompletionOutcome {
            verified: verdict.verified,
            credits_earned,
            remaining_actions: task.remaining_actions,
            message: verdict.result,
        })
    }

    /// Administrative override for completions left unverified by the
    /// verification engine.
    pub async fn manual_review(
        &self,
        task_id: Uuid,
        completion_id: Uuid,
        approved: bool,
    ) -> Result<ReviewOutcome, LedgerError> {
        let completion = CompletionStore::get(self.store.as_ref(), completion_id)?
            .filter(|c| c.task_id == task_id)
            .ok_or(LedgerError::CompletionNotFound)?;

        if completion.verified {
            return Err(LedgerError::AlreadyVerified);
        }

        if approved {
            self.store.mark_verified(completion_id, "manual approval")?;

            let account = self
                .store
                .resolve(&completion.user_id)?
                .ok_or(LedgerError::AccountNotFound)?;
            self.store
                .adjust_credits(account.id, self.policy.completion_reward)?;
            self.audit(AuditEntry::new(
                account.id,
                self.policy.completion_reward,
                AuditReason::ManualApproval,
                Some(task_id),
            ));

            tracing::info!(
                completion_id = %completion_id,
                user = %completion.user_id,
                "completion approved manually"
            );
            Ok(ReviewOutcome {
                approved: true,
                credits_earned: Some(self.policy.completion_reward),
                message: "completion approved manually, credits paid".to_string(),
            })
        } else {
            // Reversal: drop the record and give the slot back, since a
            // rejected attempt must not count against the task budget.
            CompletionStore::delete(self.store.as_ref(), completion_id)?;
            self.store.increment_remaining(task_id)?;

            tracing::info!(
                completion_id = %completion_id,
                user = %completion.user_id,
                "completion rejected manually, slot restored"
            );
            Ok(ReviewOutcome {
                approved: false,
                credits_earned: None,
                message: "completion rejected manually".to_string(),
            })
        }
    }

    /// All tasks with their completions, for the listing endpoint.
    pub fn list_tasks(&self) -> Result<Vec<(ExchangeTask, Vec<Completion>)>, LedgerError> {
        let tasks = TaskStore::list(self.store.as_ref())?;
        tasks
            .into_iter()
            .map(|task| {
                let completions = self.store.list_for_task(task.id)?;
                Ok((task, completions))
            })
            .collect()
    }

    pub fn delete_task(&self, id: Uuid) -> Result<bool, LedgerError> {
        TaskStore::delete(self.store.as_ref(), id)
    }

    /// Balance lookup by pseudo; unknown users report zero credits.
    pub fn user_credits(&self, pseudo: &str) -> Result<(i64, Option<String>), LedgerError> {
        match self.store.get_by_phone_or_pseudo(pseudo)? {
            Some(account) => Ok((account.credits, account.pseudo)),
            None => Ok((0, None)),
        }
    }

    fn validate_target(&self, raw: &str) -> Result<(), LedgerError> {
        let host_ok = Url::parse(raw)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .map(|host| {
                host == self.policy.target_domain
                    || host.ends_with(&format!(".{}", self.policy.target_domain))
            })
            .unwrap_or(false);
        if host_ok {
            Ok(())
        } else {
            Err(LedgerError::InvalidTarget(self.policy.target_domain.clone()))
        }
    }

    fn resolve_or_provision(&self, key: &str) -> Result<Account, LedgerError> {
        if let Some(account) = self.store.resolve(key)? {
            return Ok(account);
        }
        let account = Account::provisional(key, self.policy.initial_credits);
        AccountStore::create(self.store.as_ref(), &account)?;
        tracing::info!(
            key,
            credits = self.policy.initial_credits,
            "provisioned account on first task interaction"
        );
        Ok(account)
    }

    fn audit(&self, entry: AuditEntry) {
        // Observability only; a failed audit write never fails the
        // operation it describes.
        if let Err(e) = self.store.append(&entry) {
            tracing::warn!(
                account_id = %entry.account_id,
                delta = entry.delta,
                "audit write failed: {}",
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskType;
    use crate::store::{AccountStore, SqliteStore, TaskStore};
    use crate::verify::{AutoApprove, Verdict};
    use async_trait::async_trait;

    const URL: &str = "https://www.tiktok.com/@creator/video/7281";

    /// Deterministic rejecting engine for the manual-review paths.
    struct RejectAll;

    #[async_trait]
    impl VerificationEngine for RejectAll {
        async fn verify(&self, _task: &ExchangeTask, _user: &str) -> Verdict {
            Verdict::rejected("action not detected")
        }
    }

    fn ledger() -> (ExchangeLedger, Arc<SqliteStore>) {
        ledger_with(Arc::new(AutoApprove))
    }

    fn ledger_with(verifier: Arc<dyn VerificationEngine>) -> (ExchangeLedger, Arc<SqliteStore>) {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ledger = ExchangeLedger::new(store.clone(), verifier, LedgerPolicy::default());
        (ledger, store)
    }

    fn seed_user(store: &SqliteStore, key: &str, credits: i64) -> Account {
        let account = Account::provisional(key, credits);
        AccountStore::create(store, &account).unwrap();
        account
    }

    #[tokio::test]
    async fn create_task_escrows_one_credit() {
        let (ledger, store) = ledger();
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 10)
            .await
            .unwrap();
        assert_eq!(task.remaining_actions, 10);

        // Lazily provisioned with 100, then escrowed 1.
        let account = store.get_by_phone_or_pseudo("creator").unwrap().unwrap();
        assert_eq!(account.credits, 99);
    }

    #[tokio::test]
    async fn create_task_with_zero_credits_fails_without_a_task_row() {
        let (ledger, store) = ledger();
        seed_user(&store, "broke", 0);

        let err = ledger
            .create_task("broke", TaskType::Follow, URL, 1, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds));
        assert!(TaskStore::list(store.as_ref()).unwrap().is_empty());

        let account = store.get_by_phone_or_pseudo("broke").unwrap().unwrap();
        assert_eq!(account.credits, 0);
    }

    #[tokio::test]
    async fn create_task_rejects_foreign_urls_before_any_mutation() {
        let (ledger, store) = ledger();
        seed_user(&store, "creator", 50);

        for bad in [
            "https://www.youtube.com/watch?v=x",
            "https://eviltiktok.com/@x",
            "not a url",
        ] {
            let err = ledger
                .create_task("creator", TaskType::Like, bad, 1, 5)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidTarget(_)), "url: {bad}");
        }

        let account = store.get_by_phone_or_pseudo("creator").unwrap().unwrap();
        assert_eq!(account.credits, 50);
        assert!(TaskStore::list(store.as_ref()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_accounts_create_without_escrow() {
        let (ledger, store) = ledger();
        let mut admin = Account::provisional("ops", 10);
        admin.admin = true;
        AccountStore::create(store.as_ref(), &admin).unwrap();

        ledger
            .create_task("ops", TaskType::Share, URL, 1, 100)
            .await
            .unwrap();

        let account = AccountStore::get(store.as_ref(), admin.id).unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }

    #[tokio::test]
    async fn duplicate_completion_succeeds_once_and_decrements_once() {
        let (ledger, _store) = ledger();
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 5)
            .await
            .unwrap();

        let first = ledger.complete_task(task.id, "creator").await.unwrap();
        assert!(first.verified);
        assert_eq!(first.credits_earned, 5);
        assert_eq!(first.remaining_actions, 4);

        let err = ledger.complete_task(task.id, "creator").await.unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyCompleted));

        // Counter decremented exactly once.
        let listed = ledger.list_tasks().unwrap();
        assert_eq!(listed[0].0.remaining_actions, 4);
        assert_eq!(listed[0].1.len(), 1);
    }

    #[tokio::test]
    async fn completing_a_missing_task_is_not_found() {
        let (ledger, store) = ledger();
        seed_user(&store, "bob", 10);
        let err = ledger.complete_task(Uuid::new_v4(), "bob").await.unwrap_err();
        assert!(matches!(err, LedgerError::TaskNotFound));
    }

    #[tokio::test]
    async fn second_user_on_an_exhausted_task_fails() {
        let (ledger, store) = ledger();
        seed_user(&store, "bob", 10);
        seed_user(&store, "carol", 10);
        let task = ledger
            .create_task("creator", TaskType::Comment, URL, 1, 1)
            .await
            .unwrap();

        let outcome = ledger.complete_task(task.id, "bob").await.unwrap();
        assert_eq!(outcome.remaining_actions, 0);

        let err = ledger.complete_task(task.id, "carol").await.unwrap_err();
        assert!(matches!(err, LedgerError::TaskExhausted));
    }

    #[tokio::test]
    async fn unverified_completion_consumes_the_slot_but_pays_nothing() {
        let (ledger, store) = ledger_with(Arc::new(RejectAll));
        seed_user(&store, "bob", 10);
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 2)
            .await
            .unwrap();

        let outcome = ledger.complete_task(task.id, "bob").await.unwrap();
        assert!(!outcome.verified);
        assert_eq!(outcome.credits_earned, 0);
        assert_eq!(outcome.remaining_actions, 1);

        let account = store.get_by_phone_or_pseudo("bob").unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }

    #[tokio::test]
    async fn manual_approval_pays_once() {
        let (ledger, store) = ledger_with(Arc::new(RejectAll));
        seed_user(&store, "bob", 10);
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 2)
            .await
            .unwrap();
        ledger.complete_task(task.id, "bob").await.unwrap();
        let completion_id = ledger.list_tasks().unwrap()[0].1[0].id;

        let outcome = ledger.manual_review(task.id, completion_id, true).await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.credits_earned, Some(5));

        let account = store.get_by_phone_or_pseudo("bob").unwrap().unwrap();
        assert_eq!(account.credits, 15);

        let err = ledger
            .manual_review(task.id, completion_id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyVerified));
    }

    #[tokio::test]
    async fn manual_rejection_deletes_the_completion_and_restores_the_slot() {
        let (ledger, store) = ledger_with(Arc::new(RejectAll));
        seed_user(&store, "bob", 10);
        let task = ledger
            .create_task("creator", TaskType::Follow, URL, 1, 3)
            .await
            .unwrap();
        ledger.complete_task(task.id, "bob").await.unwrap();
        let completion_id = ledger.list_tasks().unwrap()[0].1[0].id;

        let outcome = ledger
            .manual_review(task.id, completion_id, false)
            .await
            .unwrap();
        assert!(!outcome.approved);

        let (task_after, completions) = ledger.list_tasks().unwrap().remove(0);
        assert_eq!(task_after.remaining_actions, 3);
        assert!(completions.is_empty());

        // Balance untouched by the rejection.
        let account = store.get_by_phone_or_pseudo("bob").unwrap().unwrap();
        assert_eq!(account.credits, 10);
    }

    #[tokio::test]
    async fn manual_review_requires_a_matching_task() {
        let (ledger, store) = ledger_with(Arc::new(RejectAll));
        seed_user(&store, "bob", 10);
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 2)
            .await
            .unwrap();
        let other = ledger
            .create_task("creator", TaskType::Share, URL, 1, 2)
            .await
            .unwrap();
        ledger.complete_task(task.id, "bob").await.unwrap();
        let listed = ledger.list_tasks().unwrap();
        let completion_id = listed
            .iter()
            .find(|(t, _)| t.id == task.id)
            .and_then(|(_, c)| c.first())
            .map(|c| c.id)
            .unwrap();

        let err = ledger
            .manual_review(other.id, completion_id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CompletionNotFound));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_duplicate_attempts_succeed_exactly_once() {
        let (ledger, store) = ledger();
        seed_user(&store, "bob", 10);
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 50)
            .await
            .unwrap();

        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = ledger.clone();
            let task_id = task.id;
            handles.push(tokio::spawn(async move {
                ledger.complete_task(task_id, "bob").await
            }));
        }

        let mut successes = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::AlreadyCompleted) => duplicates += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 15);

        let (task_after, completions) = ledger.list_tasks().unwrap().remove(0);
        assert_eq!(task_after.remaining_actions, 49);
        assert_eq!(completions.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_completions_never_overdraw_the_task() {
        let (ledger, store) = ledger();
        let remaining = 3;
        let attempts = 8;
        for i in 0..attempts {
            seed_user(&store, &format!("user{i}"), 10);
        }
        let task = ledger
            .create_task("creator", TaskType::Share, URL, 1, remaining)
            .await
            .unwrap();

        let ledger = Arc::new(ledger);
        let mut handles = Vec::new();
        for i in 0..attempts {
            let ledger = ledger.clone();
            let task_id = task.id;
            handles.push(tokio::spawn(async move {
                ledger.complete_task(task_id, &format!("user{i}")).await
            }));
        }

        let mut successes = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(LedgerError::TaskExhausted) => exhausted += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(successes, remaining);
        assert_eq!(exhausted, attempts - remaining);

        let (task_after, _) = ledger.list_tasks().unwrap().remove(0);
        assert_eq!(task_after.remaining_actions, 0);
    }

    #[tokio::test]
    async fn audit_totals_conserve_credits() {
        let (ledger, store) = ledger();
        seed_user(&store, "bob", 10);
        seed_user(&store, "carol", 10);

        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 5)
            .await
            .unwrap();
        ledger.complete_task(task.id, "bob").await.unwrap();
        ledger.complete_task(task.id, "carol").await.unwrap();

        let totals = crate::audit::AuditLog::totals(store.as_ref()).unwrap();
        // One creation at cost 1; two verified completions at reward 5.
        assert_eq!(totals.total_debited, 1);
        assert_eq!(totals.total_credited, 10);
    }

    #[tokio::test]
    async fn user_credits_reports_zero_for_unknown_pseudo() {
        let (ledger, store) = ledger();
        assert_eq!(ledger.user_credits("ghost").unwrap(), (0, None));

        seed_user(&store, "bob", 7);
        let (credits, pseudo) = ledger.user_credits("bob").unwrap();
        assert_eq!(credits, 7);
        assert_eq!(pseudo.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn delete_task_reports_whether_a_row_was_removed() {
        let (ledger, _store) = ledger();
        let task = ledger
            .create_task("creator", TaskType::Like, URL, 1, 2)
            .await
            .unwrap();
        assert!(ledger.delete_task(task.id).unwrap());
        assert!(!ledger.delete_task(task.id).unwrap());
    }
}
