//! Wire types for the exchange API.
//!
//! Field names follow the original client contract (`actionsRestantes`,
//! `createur`, camelCase elsewhere), so existing UIs keep working.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Completion, ExchangeTask, TaskType};

fn default_reward() -> i64 {
    1
}

/// POST /tasks body.
#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub url: String,
    /// Declared reward per action; stored on the task record.
    #[serde(default = "default_reward")]
    pub credits: i64,
    #[serde(rename = "actionsRestantes")]
    pub actions_restantes: i64,
    pub createur: String,
}

/// Task as returned on the wire.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub url: String,
    pub credits: i64,
    pub actions_restantes: i64,
    pub createur: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ExchangeTask> for TaskResponse {
    fn from(task: ExchangeTask) -> Self {
        Self {
            id: task.id,
            task_type: task.task_type,
            url: task.url,
            credits: task.reward_per_action,
            actions_restantes: task.remaining_actions,
            createur: task.creator_key,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub id: Uuid,
    pub user_id: String,
    pub completed_at: DateTime<Utc>,
    pub verified: bool,
}

impl From<Completion> for CompletionSummary {
    fn from(c: Completion) -> Self {
        Self {
            id: c.id,
            user_id: c.user_id,
            completed_at: c.completed_at,
            verified: c.verified,
        }
    }
}

/// GET /tasks element.
#[derive(Debug, Serialize)]
pub struct TaskWithCompletions {
    #[serde(flatten)]
    pub task: TaskResponse,
    pub completions: Vec<CompletionSummary>,
}

/// POST /tasks/:id/complete body.
#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub success: bool,
    pub verified: bool,
    pub credits_earned: i64,
    pub remaining_actions: i64,
    pub message: String,
}

/// PATCH /tasks/:id/complete body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub completion_id: Uuid,
    pub approved: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_earned: Option<i64>,
}

/// DELETE /tasks?id= query.
#[derive(Debug, Deserialize)]
pub struct DeleteTaskQuery {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// GET /user-credits?pseudo= query.
#[derive(Debug, Deserialize)]
pub struct UserCreditsQuery {
    pub pseudo: String,
}

#[derive(Debug, Serialize)]
pub struct UserCreditsResponse {
    pub credits: i64,
    pub pseudo: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_accepts_the_original_wire_shape() {
        let req: CreateTaskRequest = serde_json::from_str(
            r#"{"type":"LIKE","url":"https://www.tiktok.com/@a/video/1","credits":2,"actionsRestantes":10,"createur":"+237600000001"}"#,
        )
        .unwrap();
        assert_eq!(req.task_type, TaskType::Like);
        assert_eq!(req.credits, 2);
        assert_eq!(req.actions_restantes, 10);
        assert_eq!(req.createur, "+237600000001");
    }

    #[test]
    fn create_request_defaults_credits_to_one() {
        let req: CreateTaskRequest = serde_json::from_str(
            r#"{"type":"SHARE","url":"https://www.tiktok.com/@a/video/1","actionsRestantes":1,"createur":"x"}"#,
        )
        .unwrap();
        assert_eq!(req.credits, 1);
    }

    #[test]
    fn task_response_uses_the_french_field_names() {
        let now = Utc::now();
        let task = ExchangeTask {
            id: Uuid::new_v4(),
            task_type: TaskType::Follow,
            url: "https://www.tiktok.com/@a".to_string(),
            reward_per_action: 1,
            remaining_actions: 4,
            creator_id: Uuid::new_v4(),
            creator_key: "alice".to_string(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(TaskResponse::from(task)).unwrap();
        assert_eq!(json["type"], "FOLLOW");
        assert_eq!(json["actionsRestantes"], 4);
        assert_eq!(json["createur"], "alice");
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn review_response_omits_credits_when_rejected() {
        let json = serde_json::to_value(ReviewResponse {
            success: true,
            message: "rejected".to_string(),
            credits_earned: None,
        })
        .unwrap();
        assert!(json.get("creditsEarned").is_none());
    }
}
