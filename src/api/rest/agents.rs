use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::{broker, lifecycle};
use crate::error::AppError;
use crate::geo::haversine_km;
use crate::models::agent::{Agent, GeoPoint};
use crate::models::pickup::{PickupRecord, PickupStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", post(create_agent).get(list_agents))
        .route("/agents/:id/availability", patch(update_availability))
        .route("/agents/:id/location", patch(update_location))
        .route("/agents/:id/available-pickups", get(available_pickups))
        .route("/pickups/:id/accept", post(accept_pickup))
        .route("/pickups/:id/decline", post(decline_pickup))
        .route("/pickups/:id/advance", post(advance_pickup))
}

#[derive(Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

async fn create_agent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAgentRequest>,
) -> Result<Json<Agent>, AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::InvalidArgument("name cannot be empty".to_string()));
    }

    let agent = Agent {
        id: Uuid::new_v4(),
        name: payload.name,
        location: payload.location,
        online: true,
        last_offered_at: None,
        updated_at: Utc::now(),
    };
    state.agents.insert(agent.id, agent.clone());

    // a fresh online agent may unblock pickups nobody could take
    broker::requeue_unclaimed(&state).await?;

    Ok(Json(agent))
}

async fn list_agents(State(state): State<Arc<AppState>>) -> Json<Vec<Agent>> {
    let agents = state
        .agents
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    Json(agents)
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub online: bool,
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<Agent>, AppError> {
    // finish the agent write before touching offers (lock discipline)
    let agent = {
        let mut entry = state
            .agents
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))?;
        let agent = entry.value_mut();
        agent.online = payload.online;
        agent.updated_at = Utc::now();
        agent.clone()
    };

    if agent.online {
        broker::requeue_unclaimed(&state).await?;
    } else {
        broker::release_agent_offers(&state, agent.id);
    }

    Ok(Json(agent))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub location: GeoPoint,
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Agent>, AppError> {
    let mut entry = state
        .agents
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))?;
    let agent = entry.value_mut();

    agent.location = Some(payload.location);
    agent.updated_at = Utc::now();

    Ok(Json(agent.clone()))
}

async fn available_pickups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<PickupRecord>>, AppError> {
    let agent = state
        .agents
        .get(&id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("agent {id} not found")))?;

    if !agent.online {
        return Ok(Json(Vec::new()));
    }

    let mut available: Vec<PickupRecord> = state
        .pickups
        .iter()
        .filter(|entry| entry.value().status == PickupStatus::AwaitingAgent)
        .map(|entry| entry.value().clone())
        .collect();

    match agent.location {
        Some(location) => available.sort_by(|a, b| {
            haversine_km(&location, &a.location).total_cmp(&haversine_km(&location, &b.location))
        }),
        None => available.sort_by_key(|p| (p.created_at, p.id)),
    }

    Ok(Json(available))
}

#[derive(Deserialize)]
pub struct AgentActionRequest {
    pub agent_id: Uuid,
}

async fn accept_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AgentActionRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    broker::accept(&state, id, payload.agent_id).map(Json)
}

async fn decline_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AgentActionRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    broker::decline(&state, id, payload.agent_id)?;
    lifecycle::get_pickup(&state, id).map(Json)
}

#[derive(Deserialize)]
pub struct AdvanceRequest {
    pub agent_id: Uuid,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub location: Option<GeoPoint>,
}

async fn advance_pickup(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<PickupRecord>, AppError> {
    lifecycle::advance(&state, id, payload.agent_id, payload.note, payload.location).map(Json)
}
