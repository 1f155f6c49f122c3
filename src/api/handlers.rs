//! HTTP request handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::CurrentUser;
use super::error::{json_error, ApiError};
use super::state::AppState;
use crate::store::WorkflowStore;
use crate::workflow::types::{ContractId, ContractSummary, HistoryEntry, UserId};
use crate::workflow::Decision;

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub contract_id: ContractId,
    pub request_type: String,
    pub action: String,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct NegotiationRequest {
    pub contract_id: ContractId,
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NegotiationResponse {
    pub success: bool,
    pub message: String,
    pub contract_id: ContractId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub success: bool,
    pub contract: ContractInfo,
    pub data: Vec<HistoryItem>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ContractInfo {
    pub id: ContractId,
    pub number: Option<String>,
    pub title: String,
}

impl From<ContractSummary> for ContractInfo {
    fn from(summary: ContractSummary) -> Self {
        Self {
            id: summary.id,
            number: summary.number,
            title: summary.title,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: i64,
    pub action: String,
    pub comment: Option<String>,
    pub workflow_step: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub user: Option<HistoryUser>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryUser {
    pub id: UserId,
    pub name: String,
    pub email: Option<String>,
    pub role: Option<String>,
    pub department: Option<String>,
}

impl From<HistoryEntry> for HistoryItem {
    fn from(entry: HistoryEntry) -> Self {
        let HistoryEntry { record, actor } = entry;
        Self {
            id: record.id,
            action: record.action_type.as_str().to_string(),
            comment: record.details.comment,
            workflow_step: record.details.step,
            timestamp: record.created_at,
            user: actor.map(|user| HistoryUser {
                id: user.id,
                name: user.name,
                email: user.email,
                role: user.role,
                department: user.department,
            }),
        }
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))
}

/// POST /api/workflows/decision
pub(crate) async fn handle_decision<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: CurrentUser,
    payload: Result<Json<DecisionRequest>, JsonRejection>,
) -> Result<Json<DecisionResponse>, ApiError> {
    let request = body(payload)?;
    let decision = Decision::parse(
        request.contract_id,
        &request.action,
        &request.request_type,
        request.comments,
    )?;
    let outcome = state.engine.decide(&caller.actor(), decision).await?;
    Ok(Json(DecisionResponse {
        success: true,
        message: outcome.message,
    }))
}

/// POST /api/negotiation/initiate
pub(crate) async fn handle_initiate_negotiation<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: CurrentUser,
    payload: Result<Json<NegotiationRequest>, JsonRejection>,
) -> Result<Json<NegotiationResponse>, ApiError> {
    let request = body(payload)?;
    let outcome = state
        .engine
        .initiate_negotiation(&caller.actor(), request.contract_id, request.comments)
        .await?;
    Ok(Json(NegotiationResponse {
        success: true,
        message: outcome.message,
        contract_id: outcome.contract_id,
    }))
}

/// GET /api/contracts/{contract_id}/workflow-history
pub(crate) async fn handle_history<S: WorkflowStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: CurrentUser,
    Path(contract_id): Path<ContractId>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let history = state.engine.history(&caller.actor(), contract_id).await?;
    let data: Vec<HistoryItem> = history.entries.into_iter().map(HistoryItem::from).collect();
    Ok(Json(HistoryResponse {
        success: true,
        contract: history.contract.into(),
        total: data.len(),
        data,
    }))
}

/// GET /health
pub(crate) async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok" })),
    )
        .into_response()
}

pub(crate) async fn handle_not_found() -> Response {
    json_error(StatusCode::NOT_FOUND, "Not found")
}
