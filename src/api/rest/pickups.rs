use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::agent::GeoPoint;
use crate::models::pickup::{
    PickupRecord, PickupStatus, Priority, Schedule, TimelineEntry, WasteDetails, WasteType,
};
use crate::models::reward::Reward;
use crate::state::AppState;

const DEFAULT_WEIGHT_KG: f64 = 1.0;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/pickups", post(create_pickup).get(list_pickups))
        .route("/pickups/:id", get(get_pickup))
        .route("/pickups/:id/cancel", post(cancel_pickup))
        .route("/pickups/:id/rating", post(rate_pickup))
        .route("/rewards", get(list_rewards))
        .route("/rewards/:code/redeem", post(redeem_reward))
}

#[derive(Deserialize)]
pub struct CreatePickupRequest {
    pub requester_id: Uuid,
    pub requester_name: String,
    pub address: String,
    pub waste_type: WasteType,
    #[serde(default)]
    pub waste_details: WasteDetails,
    pub images: Vec<String>,
    pub priority: Priority,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    pub location: GeoPoint,
    #[serde(default)]
    pub dropoff: Option<GeoPoint>,
    #[serde(default)]
    pub estimated_weight_kg: Option<f64>,
}

async fn create_pickup(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePickupRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    validate_intake(&payload)?;

    let now = Utc::now();
    let record = PickupRecord {
        id: Uuid::new_v4(),
        requester_id: payload.requester_id,
        requester_name: payload.requester_name,
        address: payload.address,
        agent_id: None,
        waste_type: payload.waste_type,
        waste_details: payload.waste_details,
        images: payload.images,
        priority: payload.priority,
        schedule: payload.schedule,
        status: PickupStatus::PendingReview,
        approval: None,
        estimated_weight_kg: payload.estimated_weight_kg.unwrap_or(DEFAULT_WEIGHT_KG),
        points: 0,
        earnings: 0.0,
        distance_km: 0.0,
        location: payload.location,
        dropoff: payload.dropoff,
        route: None,
        timeline: vec![TimelineEntry {
            status: PickupStatus::PendingReview,
            at: now,
            location: Some(payload.location),
            note: None,
        }],
        rating: None,
        created_at: now,
    };

    state.pickups.insert(record.id, record.clone());
    info!(pickup_id = %record.id, requester_id = %record.requester_id, "pickup created");

    Ok(Json(record))
}

fn validate_intake(payload: &CreatePickupRequest) -> Result<(), AppError> {
    if payload.requester_name.trim().is_empty() {
        return Err(AppError::InvalidArgument(
            "requester name cannot be empty".to_string(),
        ));
    }
    if payload.images.is_empty() {
        return Err(AppError::InvalidArgument(
            "at least one image is required".to_string(),
        ));
    }

    match payload.priority {
        Priority::Scheduled if payload.schedule.is_none() => {
            return Err(AppError::InvalidArgument(
                "scheduled pickups need a date and time slot".to_string(),
            ));
        }
        Priority::Immediate if payload.schedule.is_some() => {
            return Err(AppError::InvalidArgument(
                "immediate pickups do not take a schedule".to_string(),
            ));
        }
        _ => {}
    }
    if let Some(schedule) = &payload.schedule {
        if schedule.time_slot.trim().is_empty() {
            return Err(AppError::InvalidArgument(
                "time slot cannot be empty".to_string(),
            ));
        }
    }

    if let Some(weight) = payload.estimated_weight_kg {
        if weight <= 0.0 {
            return Err(AppError::InvalidArgument(
                "estimated weight must be positive".to_string(),
            ));
        }
    }

    let details = &payload.waste_details;
    let has_food = details.food_boxes.is_some_and(|n| n > 0);
    let has_bottles = details.bottles.is_some_and(|n| n > 0);
    let has_other = details
        .other_description
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());

    let consistent = match payload.waste_type {
        WasteType::Food => has_food,
        WasteType::Bottles => has_bottles,
        WasteType::Other => has_other,
        WasteType::Mixed => has_food || has_bottles || has_other,
    };
    if !consistent {
        return Err(AppError::InvalidArgument(
            "waste details do not match the waste type".to_string(),
        ));
    }

    Ok(())
}

#[derive(Deserialize)]
pub struct ListPickupsQuery {
    #[serde(default)]
    pub requester_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub status: Option<PickupStatus>,
}

async fn list_pickups(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListPickupsQuery>,
) -> Json<Vec<PickupRecord>> {
    let mut pickups: Vec<PickupRecord> = state
        .pickups
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|p| query.requester_id.is_none_or(|id| p.requester_id == id))
        .filter(|p| query.agent_id.is_none_or(|id| p.agent_id == Some(id)))
        .filter(|p| query.status.is_none_or(|s| p.status == s))
        .collect();

    pickups.sort_by_key(|p| (p.created_at, p.id));
    Json(pickups)
}

async fn get_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PickupRecord>, AppError> {
    lifecycle::get_pickup(&state, id).map(Json)
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub requester_id: Option<Uuid>,
    #[serde(default)]
    pub agent_id: Option<Uuid>,
    #[serde(default)]
    pub note: Option<String>,
}

async fn cancel_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    let actor = match (payload.requester_id, payload.agent_id) {
        (Some(requester_id), None) => lifecycle::Actor::Requester(requester_id),
        (None, Some(agent_id)) => lifecycle::Actor::Agent(agent_id),
        _ => {
            return Err(AppError::InvalidArgument(
                "exactly one of requester_id or agent_id is required".to_string(),
            ));
        }
    };

    lifecycle::cancel(&state, id, actor, payload.note)
        .await
        .map(Json)
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub requester_id: Uuid,
    pub score: u8,
    #[serde(default)]
    pub review: Option<String>,
}

async fn rate_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RateRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    lifecycle::rate(&state, id, payload.requester_id, payload.score, payload.review).map(Json)
}

#[derive(Deserialize)]
pub struct ListRewardsQuery {
    pub requester_id: Uuid,
}

async fn list_rewards(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRewardsQuery>,
) -> Json<Vec<Reward>> {
    let mut rewards: Vec<Reward> = state
        .rewards
        .iter()
        .map(|entry| entry.value().clone())
        .filter(|r| r.requester_id == query.requester_id)
        .collect();

    rewards.sort_by_key(|r| (r.issued_at, r.id));
    Json(rewards)
}

async fn redeem_reward(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<Json<Reward>, AppError> {
    lifecycle::redeem_reward(&state, &code).map(Json)
}
