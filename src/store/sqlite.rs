//! SQLite-backed store.
//!
//! All three race guards are delegated to SQLite primitives rather than
//! application-level locking, so correctness holds even with several
//! server processes sharing the database file:
//! - balance and counter mutations are single conditional `UPDATE`s;
//! - completion dedup is a `UNIQUE (task_id, user_id)` index.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditReason, AuditTotals};
use crate::error::LedgerError;
use crate::model::{Account, Completion, ExchangeTask, TaskType};

use super::{AccountStore, CompletionStore, TaskStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id          TEXT PRIMARY KEY,
    phone       TEXT NOT NULL UNIQUE,
    pseudo      TEXT,
    credits     INTEGER NOT NULL CHECK (credits >= 0),
    admin       INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tasks (
    id                 TEXT PRIMARY KEY,
    task_type          TEXT NOT NULL,
    url                TEXT NOT NULL,
    reward_per_action  INTEGER NOT NULL,
    remaining_actions  INTEGER NOT NULL CHECK (remaining_actions >= 0),
    creator_id         TEXT NOT NULL,
    creator_key        TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS completions (
    id                   TEXT PRIMARY KEY,
    task_id              TEXT NOT NULL,
    user_id              TEXT NOT NULL,
    completed_at         TEXT NOT NULL,
    verified             INTEGER NOT NULL,
    verification_result  TEXT NOT NULL,
    verification_date    TEXT,
    UNIQUE (task_id, user_id)
);

CREATE TABLE IF NOT EXISTS audit (
    id          TEXT PRIMARY KEY,
    account_id  TEXT NOT NULL,
    delta       INTEGER NOT NULL,
    reason      TEXT NOT NULL,
    task_id     TEXT,
    created_at  TEXT NOT NULL
);
";

/// Single-connection SQLite store implementing every store contract.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::StoreUnavailable(e.to_string()))?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Fully in-memory database, used when no path is configured and in
    /// tests.
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_uuid(s: String) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_ts(s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: parse_uuid(row.get(0)?)?,
        phone: row.get(1)?,
        pseudo: row.get(2)?,
        credits: row.get(3)?,
        admin: row.get(4)?,
        created_at: parse_ts(row.get(5)?)?,
        updated_at: parse_ts(row.get(6)?)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ExchangeTask> {
    let type_str: String = row.get(1)?;
    let task_type = TaskType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            format!("unknown task type '{type_str}'").into(),
        )
    })?;
    Ok(ExchangeTask {
        id: parse_uuid(row.get(0)?)?,
        task_type,
        url: row.get(2)?,
        reward_per_action: row.get(3)?,
        remaining_actions: row.get(4)?,
        creator_id: parse_uuid(row.get(5)?)?,
        creator_key: row.get(6)?,
        created_at: parse_ts(row.get(7)?)?,
        updated_at: parse_ts(row.get(8)?)?,
    })
}

fn completion_from_row(row: &Row<'_>) -> rusqlite::Result<Completion> {
    let verification_date: Option<String> = row.get(6)?;
    Ok(Completion {
        id: parse_uuid(row.get(0)?)?,
        task_id: parse_uuid(row.get(1)?)?,
        user_id: row.get(2)?,
        completed_at: parse_ts(row.get(3)?)?,
        verified: row.get(4)?,
        verification_result: row.get(5)?,
        verification_date: verification_date.map(parse_ts).transpose()?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEntry> {
    let reason_str: String = row.get(3)?;
    let reason = AuditReason::parse(&reason_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            rusqlite::types::Type::Text,
            format!("unknown audit reason '{reason_str}'").into(),
        )
    })?;
    let task_id: Option<String> = row.get(4)?;
    Ok(AuditEntry {
        id: parse_uuid(row.get(0)?)?,
        account_id: parse_uuid(row.get(1)?)?,
        delta: row.get(2)?,
        reason,
        task_id: task_id.map(parse_uuid).transpose()?,
        created_at: parse_ts(row.get(5)?)?,
    })
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

const ACCOUNT_COLS: &str = "id, phone, pseudo, credits, admin, created_at, updated_at";
const TASK_COLS: &str =
    "id, task_type, url, reward_per_action, remaining_actions, creator_id, creator_key, created_at, updated_at";
const COMPLETION_COLS: &str =
    "id, task_id, user_id, completed_at, verified, verification_result, verification_date";

impl AccountStore for SqliteStore {
    fn get(&self, id: Uuid) -> Result<Option<Account>, LedgerError> {
        let conn = self.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = ?1"),
                params![id.to_string()],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn get_by_phone_or_pseudo(&self, key: &str) -> Result<Option<Account>, LedgerError> {
        let conn = self.lock();
        let account = conn
            .query_row(
                &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE phone = ?1 OR pseudo = ?1"),
                params![key],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    fn resolve(&self, key: &str) -> Result<Option<Account>, LedgerError> {
        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(account) = AccountStore::get(self, id)? {
                return Ok(Some(account));
            }
        }
        self.get_by_phone_or_pseudo(key)
    }

    fn create(&self, account: &Account) -> Result<(), LedgerError> {
        let conn = self.lock();
        conn.execute(
            &format!("INSERT INTO accounts ({ACCOUNT_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
            params![
                account.id.to_string(),
                account.phone,
                account.pseudo,
                account.credits,
                account.admin,
                account.created_at.to_rfc3339(),
                account.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn adjust_credits(&self, id: Uuid, delta: i64) -> Result<Account, LedgerError> {
        let conn = self.lock();
        // Conditional update: the balance check and the write are one
        // statement, so concurrent debits cannot both pass on a balance
        // that covers only one of them.
        let changed = conn.execute(
            "UPDATE accounts
             SET credits = credits + ?1, updated_at = ?2
             WHERE id = ?3 AND credits + ?1 >= 0",
            params![delta, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if changed == 0 {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM accounts WHERE id = ?1",
                    params![id.to_string()],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            return Err(if exists {
                LedgerError::InsufficientFunds
            } else {
                LedgerError::AccountNotFound
            });
        }
        conn.query_row(
            &format!("SELECT {ACCOUNT_COLS} FROM accounts WHERE id = ?1"),
            params![id.to_string()],
            account_from_row,
        )
        .map_err(Into::into)
    }
}

impl TaskStore for SqliteStore {
    fn create(&self, task: &ExchangeTask) -> Result<(), LedgerError> {
        let conn = self.lock();
        conn.execute(
            &format!(
                "INSERT INTO tasks ({TASK_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
            ),
            params![
                task.id.to_string(),
                task.task_type.as_str(),
                task.url,
                task.reward_per_action,
                task.remaining_actions,
                task.creator_id.to_string(),
                task.creator_key,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<ExchangeTask>, LedgerError> {
        let conn = self.lock();
        let task = conn
            .query_row(
                &format!("SELECT {TASK_COLS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
                task_from_row,
            )
            .optional()?;
        Ok(task)
    }

    fn list(&self) -> Result<Vec<ExchangeTask>, LedgerError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare(&format!("SELECT {TASK_COLS} FROM tasks ORDER BY created_at DESC"))?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    fn decrement_remaining(&self, id: Uuid) -> Result<ExchangeTask, LedgerError> {
        let conn = self.lock();
        // Fails closed at zero: two racing completions against a counter
        // of 1 cannot both decrement.
        let changed = conn.execute(
            "UPDATE tasks
             SET remaining_actions = remaining_actions - 1, updated_at = ?1
             WHERE id = ?2 AND remaining_actions > 0",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if changed == 0 {
            drop(conn);
            return match TaskStore::get(self, id) {
                Ok(Some(_)) => Err(LedgerError::TaskExhausted),
                Ok(None) => Err(LedgerError::TaskNotFound),
                Err(e) => Err(e),
            };
        }
        drop(conn);
        TaskStore::get(self, id)?.ok_or(LedgerError::TaskNotFound)
    }

    fn increment_remaining(&self, id: Uuid) -> Result<ExchangeTask, LedgerError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE tasks
             SET remaining_actions = remaining_actions + 1, updated_at = ?1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(LedgerError::TaskNotFound);
        }
        drop(conn);
        TaskStore::get(self, id)?.ok_or(LedgerError::TaskNotFound)
    }

    fn delete(&self, id: Uuid) -> Result<bool, LedgerError> {
        let conn = self.lock();
        let changed = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }
}

impl CompletionStore for SqliteStore {
    fn exists(&self, task_id: Uuid, user_id: &str) -> Result<bool, LedgerError> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT 1 FROM completions WHERE task_id = ?1 AND user_id = ?2",
                params![task_id.to_string(), user_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn create(&self, completion: &Completion) -> Result<(), LedgerError> {
        let conn = self.lock();
        let result = conn.execute(
            &format!(
                "INSERT INTO completions ({COMPLETION_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            ),
            params![
                completion.id.to_string(),
                completion.task_id.to_string(),
                completion.user_id,
                completion.completed_at.to_rfc3339(),
                completion.verified,
                completion.verification_result,
                completion.verification_date.map(|d| d.to_rfc3339()),
            ],
        );
        match result {
            Ok(_) => Ok(()),
            // The unique (task_id, user_id) index is the authoritative
            // duplicate guard.
            Err(e) if is_constraint_violation(&e) => Err(LedgerError::AlreadyCompleted),
            Err(e) => Err(e.into()),
        }
    }

    fn get(&self, id: Uuid) -> Result<Option<Completion>, LedgerError> {
        let conn = self.lock();
        let completion = conn
            .query_row(
                &format!("SELECT {COMPLETION_COLS} FROM completions WHERE id = ?1"),
                params![id.to_string()],
                completion_from_row,
            )
            .optional()?;
        Ok(completion)
    }

    fn list_for_task(&self, task_id: Uuid) -> Result<Vec<Completion>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {COMPLETION_COLS} FROM completions WHERE task_id = ?1 ORDER BY completed_at"
        ))?;
        let completions = stmt
            .query_map(params![task_id.to_string()], completion_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(completions)
    }

    fn mark_verified(&self, id: Uuid, result: &str) -> Result<Completion, LedgerError> {
        let conn = self.lock();
        let changed = conn.execute(
            "UPDATE completions
             SET verified = 1, verification_result = ?1, verification_date = ?2
             WHERE id = ?3 AND verified = 0",
            params![result, Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if changed == 0 {
            drop(conn);
            return match CompletionStore::get(self, id) {
                Ok(Some(_)) => Err(LedgerError::AlreadyVerified),
                Ok(None) => Err(LedgerError::CompletionNotFound),
                Err(e) => Err(e),
            };
        }
        drop(conn);
        CompletionStore::get(self, id)?.ok_or(LedgerError::CompletionNotFound)
    }

    fn delete(&self, id: Uuid) -> Result<bool, LedgerError> {
        let conn = self.lock();
        let changed =
            conn.execute("DELETE FROM completions WHERE id = ?1", params![id.to_string()])?;
        Ok(changed > 0)
    }
}

impl AuditLog for SqliteStore {
    fn append(&self, entry: &AuditEntry) -> Result<(), LedgerError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO audit (id, account_id, delta, reason, task_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id.to_string(),
                entry.account_id.to_string(),
                entry.delta,
                entry.reason.as_str(),
                entry.task_id.map(|t| t.to_string()),
                entry.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn entries_for_account(&self, account_id: Uuid) -> Result<Vec<AuditEntry>, LedgerError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, delta, reason, task_id, created_at
             FROM audit WHERE account_id = ?1 ORDER BY created_at",
        )?;
        let entries = stmt
            .query_map(params![account_id.to_string()], audit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn totals(&self) -> Result<AuditTotals, LedgerError> {
        let conn = self.lock();
        let totals = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN delta < 0 THEN -delta ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN delta > 0 THEN delta ELSE 0 END), 0)
             FROM audit",
            [],
            |row| {
                Ok(AuditTotals {
                    total_debited: row.get(0)?,
                    total_credited: row.get(1)?,
                })
            },
        )?;
        Ok(totals)
    }
}
