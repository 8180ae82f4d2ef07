use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::candidates::ranked_candidates;
use crate::engine::lifecycle;
use crate::error::AppError;
use crate::models::offer::Offer;
use crate::models::pickup::{PickupRecord, PickupStatus};
use crate::notify::EventKind;
use crate::state::AppState;

// Lock discipline: an offers entry guard may be held while reading or
// stamping the agents map, never the other way around.

pub async fn enqueue_pickup(state: &AppState, pickup_id: Uuid) -> Result<(), AppError> {
    state
        .broker_tx
        .send(pickup_id)
        .await
        .map_err(|err| AppError::Unavailable(format!("broker queue send failed: {err}")))
}

pub async fn run_broker(state: Arc<AppState>, mut broker_rx: mpsc::Receiver<Uuid>) {
    info!("assignment broker started");

    while let Some(pickup_id) = broker_rx.recv().await {
        if let Err(err) = open_offer_cycle(&state, pickup_id) {
            warn!(pickup_id = %pickup_id, error = %err, "failed to open offer cycle");
        }
    }

    warn!("assignment broker stopped: queue channel closed");
}

/// Scheduled expiry check. Offers are never awaited on: a request
/// handler returns immediately and this task advances overdue cycles.
pub async fn run_offer_sweep(state: Arc<AppState>, period: Duration) {
    info!(period_ms = period.as_millis() as u64, "offer sweep started");
    let mut ticker = interval(period);

    loop {
        ticker.tick().await;
        sweep(&state);
    }
}

/// Start an offer cycle for a pickup in the pool: rank the online
/// agents and propose to the top candidate. A pickup with no online
/// candidates simply stays `AwaitingAgent` until the next sweep or
/// agent-online nudge.
pub fn open_offer_cycle(state: &AppState, pickup_id: Uuid) -> Result<(), AppError> {
    let pickup = match state.pickups.get(&pickup_id) {
        Some(entry) => entry.value().clone(),
        None => return Err(AppError::NotFound(format!("pickup {pickup_id} not found"))),
    };

    if pickup.status != PickupStatus::AwaitingAgent {
        debug!(pickup_id = %pickup_id, status = pickup.status.as_label(), "skipping stale queue entry");
        return Ok(());
    }
    if state.offers.contains_key(&pickup_id) {
        return Ok(());
    }

    let mut ranked: VecDeque<Uuid> = ranked_candidates(state, &pickup).into();
    let Some(first) = ranked.pop_front() else {
        debug!(pickup_id = %pickup_id, "no online agents; pickup stays in the pool");
        return Ok(());
    };

    let now = Utc::now();
    let offer = Offer {
        pickup_id,
        agent_id: first,
        offered_at: now,
        deadline: now + offer_window(state),
        pending: ranked,
    };
    state.offers.insert(pickup_id, offer.clone());
    propose(state, &offer, &pickup);

    Ok(())
}

/// Accept with at-most-one-winner semantics: the conditional write in
/// the lifecycle engine decides the race; the broker adds no locking of
/// its own, only offer bookkeeping.
pub fn accept(state: &AppState, pickup_id: Uuid, agent_id: Uuid) -> Result<PickupRecord, AppError> {
    match lifecycle::assign(state, pickup_id, agent_id) {
        Ok(record) => {
            if let Some((_, offer)) = state.offers.remove(&pickup_id) {
                close_proposal(state, &offer, "accepted");
            }
            Ok(record)
        }
        Err(AppError::Conflict(_)) => {
            state.metrics.accept_conflicts_total.inc();
            Err(AppError::Conflict(format!(
                "pickup {pickup_id} is no longer available"
            )))
        }
        Err(err) => Err(err),
    }
}

/// Explicit decline: the current holder's decline advances the cycle
/// immediately; a queued candidate's decline just drops them from it.
pub fn decline(state: &AppState, pickup_id: Uuid, agent_id: Uuid) -> Result<(), AppError> {
    let declined_current = {
        let mut entry = state
            .offers
            .get_mut(&pickup_id)
            .ok_or_else(|| AppError::NotFound(format!("no active offer for pickup {pickup_id}")))?;
        let offer = entry.value_mut();

        if offer.agent_id == agent_id {
            Some(offer.clone())
        } else {
            offer.pending.retain(|id| *id != agent_id);
            None
        }
    };

    if let Some(offer) = declined_current {
        close_proposal(state, &offer, "declined");
        advance_offer(state, pickup_id, agent_id);
    }

    Ok(())
}

/// Implicit reject: every offer held by an agent that just went
/// offline advances to the next candidate right away.
pub fn release_agent_offers(state: &AppState, agent_id: Uuid) {
    let held: Vec<Offer> = state
        .offers
        .iter()
        .filter(|entry| entry.value().agent_id == agent_id)
        .map(|entry| entry.value().clone())
        .collect();

    for offer in held {
        close_proposal(state, &offer, "declined");
        advance_offer(state, offer.pickup_id, agent_id);
    }
}

/// Nudge for the agent-online transition: re-queue every pickup that
/// sits in the pool without a live offer cycle.
pub async fn requeue_unclaimed(state: &AppState) -> Result<(), AppError> {
    for pickup_id in unclaimed_pickups(state) {
        enqueue_pickup(state, pickup_id).await?;
    }
    Ok(())
}

pub fn sweep(state: &AppState) {
    let now = Utc::now();

    let mut overdue: Vec<(Offer, &'static str)> = Vec::new();
    for entry in state.offers.iter() {
        let offer = entry.value();
        let holder_online = state
            .agents
            .get(&offer.agent_id)
            .map(|agent| agent.online)
            .unwrap_or(false);

        if offer.deadline <= now {
            overdue.push((offer.clone(), "expired"));
        } else if !holder_online {
            overdue.push((offer.clone(), "declined"));
        }
    }

    for (offer, outcome) in overdue {
        close_proposal(state, &offer, outcome);
        advance_offer(state, offer.pickup_id, offer.agent_id);
    }

    for pickup_id in unclaimed_pickups(state) {
        if let Err(err) = open_offer_cycle(state, pickup_id) {
            warn!(pickup_id = %pickup_id, error = %err, "sweep re-offer failed");
        }
    }
}

/// Move a cycle to its next online candidate, or close it out and
/// leave the pickup in the pool. No-op if the cycle already moved on
/// (the holder changed) or was closed by a concurrent accept.
fn advance_offer(state: &AppState, pickup_id: Uuid, expected_holder: Uuid) {
    let next = {
        let Some(mut entry) = state.offers.get_mut(&pickup_id) else {
            return;
        };
        let offer = entry.value_mut();
        if offer.agent_id != expected_holder {
            return;
        }

        let mut chosen = None;
        while let Some(candidate) = offer.pending.pop_front() {
            let online = state
                .agents
                .get(&candidate)
                .map(|agent| agent.online)
                .unwrap_or(false);
            if online {
                chosen = Some(candidate);
                break;
            }
        }

        match chosen {
            Some(agent_id) => {
                let now = Utc::now();
                offer.agent_id = agent_id;
                offer.offered_at = now;
                offer.deadline = now + offer_window(state);
                Some(offer.clone())
            }
            None => None,
        }
    };

    match next {
        Some(offer) => {
            if let Some(pickup) = state
                .pickups
                .get(&pickup_id)
                .map(|entry| entry.value().clone())
            {
                propose(state, &offer, &pickup);
            }
        }
        None => {
            state.offers.remove(&pickup_id);
            debug!(pickup_id = %pickup_id, "offer cycle exhausted; awaiting next sweep");
        }
    }
}

fn propose(state: &AppState, offer: &Offer, pickup: &PickupRecord) {
    if let Some(mut agent) = state.agents.get_mut(&offer.agent_id) {
        agent.last_offered_at = Some(offer.offered_at);
        agent.updated_at = Utc::now();
    }

    state.notifier.notify(
        offer.agent_id,
        EventKind::OfferReceived,
        json!({
            "pickup_id": pickup.id,
            "waste_type": pickup.waste_type,
            "priority": pickup.priority,
            "address": pickup.address,
            "location": pickup.location,
            "estimated_weight_kg": pickup.estimated_weight_kg,
            "deadline": offer.deadline,
        }),
    );

    debug!(pickup_id = %pickup.id, agent_id = %offer.agent_id, "offer proposed");
}

fn close_proposal(state: &AppState, offer: &Offer, outcome: &str) {
    state
        .metrics
        .offers_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .offer_decision_seconds
        .with_label_values(&[outcome])
        .observe(elapsed_secs(offer.offered_at));
}

fn unclaimed_pickups(state: &AppState) -> Vec<Uuid> {
    state
        .pickups
        .iter()
        .filter(|entry| {
            entry.value().status == PickupStatus::AwaitingAgent
                && !state.offers.contains_key(&entry.value().id)
        })
        .map(|entry| entry.value().id)
        .collect()
}

fn offer_window(state: &AppState) -> chrono::Duration {
    chrono::Duration::from_std(state.offer_window).unwrap_or_else(|_| chrono::Duration::seconds(20))
}

fn elapsed_secs(since: DateTime<Utc>) -> f64 {
    (Utc::now() - since).num_milliseconds().max(0) as f64 / 1000.0
}
