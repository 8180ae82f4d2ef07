use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::pickup::{PickupRecord, PickupStatus, Priority, WasteType};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/pickups", get(list_pickups))
        .route("/admin/pickups/:id/approve", post(approve_pickup))
        .route("/admin/pickups/:id/reject", post(reject_pickup))
}

#[derive(Deserialize)]
pub struct ApproveRequest {
    pub admin_id: Uuid,
}

async fn approve_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ApproveRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    lifecycle::approve(&state, id, payload.admin_id).await.map(Json)
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub admin_id: Uuid,
    pub reason: String,
}

async fn reject_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    lifecycle::reject(&state, id, payload.admin_id, &payload.reason).map(Json)
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<PickupStatus>,
    #[serde(default)]
    pub waste_type: Option<WasteType>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub after: Option<Uuid>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct PickupPage {
    pub items: Vec<PickupRecord>,
    pub next_cursor: Option<Uuid>,
}

/// Filtered listing with stable cursor pagination. Pages are keyed on
/// the immutable `(created_at, id)` pair, so concurrent status changes
/// cannot duplicate or skip records between pages.
async fn list_pickups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<PickupPage>, AppError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);

    let cursor = match query.after {
        Some(id) => {
            let entry = state
                .pickups
                .get(&id)
                .ok_or_else(|| AppError::InvalidArgument(format!("unknown cursor {id}")))?;
            Some((entry.value().created_at, id))
        }
        None => None,
    };

    let needle = query.q.as_deref().map(str::to_lowercase);

    let mut items: Vec<PickupRecord> = state
        .pickups
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|p| query.status.is_none_or(|s| p.status == s))
        .filter(|p| query.waste_type.is_none_or(|w| p.waste_type == w))
        .filter(|p| query.priority.is_none_or(|pr| p.priority == pr))
        .filter(|p| query.from.is_none_or(|from| p.created_at >= from))
        .filter(|p| query.to.is_none_or(|to| p.created_at <= to))
        .filter(|p| {
            needle.as_deref().is_none_or(|n| {
                p.requester_name.to_lowercase().contains(n) || p.address.to_lowercase().contains(n)
            })
        })
        .filter(|p| cursor.is_none_or(|(at, id)| (p.created_at, p.id) > (at, id)))
        .collect();

    items.sort_by_key(|p| (p.created_at, p.id));

    let next_cursor = if items.len() > limit {
        items.truncate(limit);
        items.last().map(|p| p.id)
    } else {
        None
    };

    Ok(Json(PickupPage { items, next_cursor }))
}
