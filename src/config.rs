//! Runtime configuration.
//!
//! Everything is read from environment variables with sensible defaults,
//! so the binary runs with no configuration at all in development.

use std::path::PathBuf;

/// Credit policy injected into the ledger.
///
/// The creation cost and completion reward are deliberately decoupled
/// from the per-task `reward_per_action` field; see DESIGN.md.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    /// Credits debited from the creator at task creation.
    pub creation_cost: i64,
    /// Credits paid to a user per verified completion.
    pub completion_reward: i64,
    /// Starting balance for lazily provisioned accounts.
    pub initial_credits: i64,
    /// Domain a task url must reference.
    pub target_domain: String,
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            creation_cost: 1,
            completion_reward: 5,
            initial_credits: 100,
            target_domain: "tiktok.com".to_string(),
        }
    }
}

/// How completion attempts are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Accept every attempt (current production behavior).
    AutoApprove,
    /// Per-type randomized acceptance, for staging.
    Simulated,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// SQLite database file; `None` keeps everything in memory.
    pub database_path: Option<PathBuf>,
    pub policy: LedgerPolicy,
    pub verify_mode: VerifyMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3100,
            database_path: Some(PathBuf::from("data/exchange.db")),
            policy: LedgerPolicy::default(),
            verify_mode: VerifyMode::AutoApprove,
        }
    }
}

impl Config {
    /// Build a config from environment variables, falling back to the
    /// defaults above for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let policy_defaults = LedgerPolicy::default();

        let policy = LedgerPolicy {
            creation_cost: env_i64("LEDGER_CREATION_COST", policy_defaults.creation_cost),
            completion_reward: env_i64(
                "LEDGER_COMPLETION_REWARD",
                policy_defaults.completion_reward,
            ),
            initial_credits: env_i64("LEDGER_INITIAL_CREDITS", policy_defaults.initial_credits),
            target_domain: std::env::var("LEDGER_TARGET_DOMAIN")
                .unwrap_or(policy_defaults.target_domain),
        };

        let verify_mode = match std::env::var("VERIFY_MODE").as_deref() {
            Ok("simulated") => VerifyMode::Simulated,
            Ok("auto") | Err(_) => VerifyMode::AutoApprove,
            Ok(other) => {
                tracing::warn!("Unknown VERIFY_MODE '{}', using auto-approve", other);
                VerifyMode::AutoApprove
            }
        };

        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            database_path: match std::env::var("DATABASE_PATH") {
                Ok(p) if p == ":memory:" => None,
                Ok(p) => Some(PathBuf::from(p)),
                Err(_) => defaults.database_path,
            },
            policy,
            verify_mode,
        }
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    match std::env::var(name) {
        Ok(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!("Invalid {} '{}', using default {}", name, v, default);
                default
            }
        },
        Err(_) => default,
    }
}
