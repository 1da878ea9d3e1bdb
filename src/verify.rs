//! Pluggable verification of completion attempts.
//!
//! The ledger calls the engine synchronously between the task lookup and
//! the completion insert; the verdict decides whether the completing
//! user gets paid. Production runs auto-approve; the simulated engine
//! mirrors the per-type acceptance rates used before a real platform
//! integration exists.

use async_trait::async_trait;

use crate::config::VerifyMode;
use crate::model::{ExchangeTask, TaskType};

/// Outcome of verifying one completion attempt.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub verified: bool,
    pub result: String,
}

impl Verdict {
    pub fn accepted(result: impl Into<String>) -> Self {
        Self {
            verified: true,
            result: result.into(),
        }
    }

    pub fn rejected(result: impl Into<String>) -> Self {
        Self {
            verified: false,
            result: result.into(),
        }
    }
}

/// Policy point for accepting or rejecting a completion attempt.
#[async_trait]
pub trait VerificationEngine: Send + Sync {
    async fn verify(&self, task: &ExchangeTask, user_id: &str) -> Verdict;
}

/// Accepts every attempt. Current production behavior.
pub struct AutoApprove;

#[async_trait]
impl VerificationEngine for AutoApprove {
    async fn verify(&self, task: &ExchangeTask, user_id: &str) -> Verdict {
        tracing::debug!(task_id = %task.id, user_id, "auto-approving completion");
        Verdict::accepted(format!("{} accepted", task.task_type))
    }
}

/// Randomized per-type acceptance, for staging environments.
pub struct SimulatedVerifier;

impl SimulatedVerifier {
    fn pass_rate(task_type: TaskType) -> f64 {
        match task_type {
            TaskType::Like => 0.80,
            TaskType::Follow => 0.85,
            TaskType::Comment => 0.70,
            TaskType::Share => 0.75,
        }
    }

    fn rejection_message(task_type: TaskType) -> &'static str {
        match task_type {
            TaskType::Like => "like not detected on the video",
            TaskType::Follow => "follow not detected on the account",
            TaskType::Comment => "comment not detected on the video",
            TaskType::Share => "share not detected",
        }
    }
}

#[async_trait]
impl VerificationEngine for SimulatedVerifier {
    async fn verify(&self, task: &ExchangeTask, user_id: &str) -> Verdict {
        let passed = rand::random::<f64>() < Self::pass_rate(task.task_type);
        if passed {
            tracing::debug!(task_id = %task.id, user_id, "simulated verification passed");
            Verdict::accepted(format!("{} verified", task.task_type))
        } else {
            tracing::debug!(task_id = %task.id, user_id, "simulated verification failed");
            Verdict::rejected(Self::rejection_message(task.task_type))
        }
    }
}

/// Build the engine selected by configuration.
pub fn engine_for(mode: VerifyMode) -> std::sync::Arc<dyn VerificationEngine> {
    match mode {
        VerifyMode::AutoApprove => std::sync::Arc::new(AutoApprove),
        VerifyMode::Simulated => std::sync::Arc::new(SimulatedVerifier),
    }
}
