//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::LedgerError;
use crate::ledger::ExchangeLedger;
use crate::store::SqliteStore;
use crate::verify;

use super::types::*;

/// Shared application state.
pub struct AppState {
    pub ledger: ExchangeLedger,
}

/// Build the router for a ledger, shared by `serve` and tests.
pub fn router(ledger: ExchangeLedger) -> Router {
    let state = Arc::new(AppState { ledger });
    Router::new()
        .route("/health", get(health))
        .route(
            "/tasks",
            get(list_tasks).post(create_task).delete(delete_task),
        )
        .route(
            "/tasks/:id/complete",
            axum::routing::post(complete_task).patch(manual_review),
        )
        .route("/user-credits", get(user_credits))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store: Arc<SqliteStore> = match &config.database_path {
        Some(path) => {
            tracing::info!("Opening database at {}", path.display());
            Arc::new(SqliteStore::open(path)?)
        }
        None => {
            tracing::warn!("No database path configured, using in-memory storage");
            Arc::new(SqliteStore::open_in_memory()?)
        }
    };
    let verifier = verify::engine_for(config.verify_mode);
    let ledger = ExchangeLedger::new(store, verifier, config.policy.clone());

    let app = router(ledger);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install signal handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /tasks - publish a new exchange task.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), LedgerError> {
    let task = state
        .ledger
        .create_task(
            &req.createur,
            req.task_type,
            &req.url,
            req.credits,
            req.actions_restantes,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(task.into())))
}

/// GET /tasks - list all tasks with their completions.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TaskWithCompletions>>, LedgerError> {
    let tasks = state
        .ledger
        .list_tasks()?
        .into_iter()
        .map(|(task, completions)| TaskWithCompletions {
            task: task.into(),
            completions: completions.into_iter().map(Into::into).collect(),
        })
        .collect();
    Ok(Json(tasks))
}

/// POST /tasks/:id/complete - attempt one action slot of a task.
async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CompleteRequest>,
) -> Result<Json<CompleteResponse>, LedgerError> {
    let outcome = state.ledger.complete_task(id, &req.user_id).await?;
    Ok(Json(CompleteResponse {
        success: true,
        verified: outcome.verified,
        credits_earned: outcome.credits_earned,
        remaining_actions: outcome.remaining_actions,
        message: outcome.message,
    }))
}

/// PATCH /tasks/:id/complete - manually approve or reject a completion.
async fn manual_review(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ReviewRequest>,
) -> Result<Json<ReviewResponse>, LedgerError> {
    let outcome = state
        .ledger
        .manual_review(id, req.completion_id, req.approved)
        .await?;
    Ok(Json(ReviewResponse {
        success: true,
        message: outcome.message,
        credits_earned: outcome.credits_earned,
    }))
}

/// DELETE /tasks?id= - administrative delete.
async fn delete_task(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DeleteTaskQuery>,
) -> Result<Json<DeleteResponse>, LedgerError> {
    if !state.ledger.delete_task(query.id)? {
        return Err(LedgerError::TaskNotFound);
    }
    Ok(Json(DeleteResponse { success: true }))
}

/// GET /user-credits?pseudo= - balance lookup for the UI header.
async fn user_credits(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserCreditsQuery>,
) -> Result<Json<UserCreditsResponse>, LedgerError> {
    let (credits, pseudo) = state.ledger.user_credits(&query.pseudo)?;
    Ok(Json(UserCreditsResponse { credits, pseudo }))
}
