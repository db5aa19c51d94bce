use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use qcast_core::{QcastError, TenantId};
use serde_json::{json, Value};
use tracing::warn;

use crate::orchestrator::{self, restaurant_info, tenant_json, QueueOperation};
use crate::params::{ExecuteBody, LoginBody};
use crate::{QcastAxumError, QcastAxumState};

type Reply = Result<Json<Value>, QcastAxumError>;

pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn success(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data, "timestamp": timestamp() }))
}

fn map_json_rejection(rejection: JsonRejection) -> QcastAxumError {
    QcastError::bad_request("Failed to parse the request body as JSON")
        .with_data(json!({ "reason": rejection.body_text() }))
        .into()
}

pub fn queue_router() -> Router<QcastAxumState> {
    Router::new()
        .route("/health", get(queue_health))
        .route("/login", post(login))
        .route("/execute-jwt", post(execute_queue))
        .route("/execute-trnid", post(execute_transaction))
        .route("/execute-kds", post(execute_kds))
        .route("/{rest_id}", get(restaurant))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Queue Management API is running",
        "timestamp": timestamp(),
    }))
}

pub async fn not_found() -> QcastAxumError {
    QcastError::not_found("Route not found").into()
}

async fn queue_health(State(state): State<QcastAxumState>) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    match state.directory.ping().await {
        Ok(()) => Ok(Json(json!({
            "success": true,
            "message": "Database connections are healthy",
            "timestamp": timestamp(),
        }))),
        Err(e) => {
            warn!(error = %e, "directory health probe failed");
            let err = QcastError::from(e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "Database connection failed",
                    "message": err.message,
                    "timestamp": timestamp(),
                })),
            ))
        }
    }
}

async fn login(State(state): State<QcastAxumState>, body: Result<Json<LoginBody>, JsonRejection>) -> Reply {
    let Json(body) = body.map_err(map_json_rejection)?;
    let tenant = body.tenant()?;

    let outcome = orchestrator::login(&state, &tenant).await?;
    Ok(success(json!({
        "token": outcome.token.token,
        "restaurantInfo": restaurant_info(&outcome.descriptor),
        "expiresIn": state.tokens.ttl_label(),
    })))
}

async fn restaurant(State(state): State<QcastAxumState>, Path(rest_id): Path<String>) -> Reply {
    let tenant = TenantId::new(rest_id);
    if tenant.is_empty() {
        return Err(QcastError::bad_request("Restaurant ID is required").into());
    }

    let descriptor = state
        .directory
        .resolve(&tenant)
        .await
        .map_err(QcastError::from)?;

    Ok(success(json!({
        "restaurantConfig": {
            "RestID": tenant_json(&descriptor.tenant_id),
            "RestName": descriptor.display_name,
            "RestServerName": format!("{},{}", descriptor.host, descriptor.port),
            "RestDBName": descriptor.database,
        }
    })))
}

async fn run(state: &QcastAxumState, headers: &HeaderMap, body: &ExecuteBody, op: QueueOperation) -> Reply {
    let token = body.token(headers)?;
    let data = orchestrator::execute(state, token, op).await?;
    Ok(success(data))
}

async fn execute_queue(
    State(state): State<QcastAxumState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Reply {
    let Json(body) = body.map_err(map_json_rejection)?;
    run(&state, &headers, &body, body.queue_listing()).await
}

async fn execute_transaction(
    State(state): State<QcastAxumState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Reply {
    let Json(body) = body.map_err(map_json_rejection)?;
    body.token(&headers)?;
    let op = body.transaction_lookup()?;
    run(&state, &headers, &body, op).await
}

async fn execute_kds(
    State(state): State<QcastAxumState>,
    headers: HeaderMap,
    body: Result<Json<ExecuteBody>, JsonRejection>,
) -> Reply {
    let Json(body) = body.map_err(map_json_rejection)?;
    body.token(&headers)?;
    let op = body.kitchen_display()?;
    run(&state, &headers, &body, op).await
}
