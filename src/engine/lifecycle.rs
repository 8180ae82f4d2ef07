use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::engine::{broker, pricing};
use crate::error::AppError;
use crate::geo::routing::resolve_route;
use crate::models::agent::GeoPoint;
use crate::models::pickup::{ApprovalRecord, PickupRecord, PickupStatus, Rating, TimelineEntry};
use crate::models::reward::Reward;
use crate::notify::EventKind;
use crate::state::AppState;

const REACHED_NOTE: &str = "reached pickup location";
const COLLECTED_NOTE: &str = "collected, en route to drop-off";
const REWARD_VALIDITY_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy)]
pub enum Actor {
    Admin(Uuid),
    Agent(Uuid),
    Requester(Uuid),
    System,
}

/// The lifecycle graph. This is the only place an edge is declared;
/// handlers never re-validate statuses on their own.
fn legal(from: PickupStatus, to: PickupStatus) -> bool {
    use PickupStatus::*;
    matches!(
        (from, to),
        (PendingReview, AdminApproved)
            | (PendingReview, AdminRejected)
            | (AdminApproved, AwaitingAgent)
            | (AwaitingAgent, Assigned)
            | (Assigned, InTransit)
            // "collected, en route" is a second note on the same status
            | (InTransit, InTransit)
            | (InTransit, Completed)
            | (AwaitingAgent, Cancelled)
            | (Assigned, Cancelled)
            | (InTransit, Cancelled)
            // an assigned agent backing out returns the pickup to the pool
            | (Assigned, AwaitingAgent)
    )
}

fn authorize(pickup: &PickupRecord, to: PickupStatus, actor: Actor) -> Result<(), AppError> {
    use PickupStatus::*;
    let allowed = match to {
        AdminApproved | AdminRejected => matches!(actor, Actor::Admin(_)),
        AwaitingAgent => match pickup.status {
            AdminApproved => matches!(actor, Actor::System),
            _ => matches!(actor, Actor::Agent(id) if pickup.agent_id == Some(id)),
        },
        Assigned => matches!(actor, Actor::Agent(_)),
        InTransit | Completed => {
            matches!(actor, Actor::Agent(id) if pickup.agent_id == Some(id))
        }
        Cancelled => match actor {
            Actor::Requester(id) => pickup.requester_id == id,
            Actor::Agent(id) => pickup.agent_id == Some(id),
            _ => false,
        },
        PendingReview => false,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "actor is not permitted to move pickup {} to {}",
            pickup.id,
            to.as_label()
        )))
    }
}

struct Step {
    to: PickupStatus,
    note: Option<String>,
    location: Option<GeoPoint>,
}

/// Atomic conditional transition. The target is decided, validated,
/// applied, and journaled while the entry guard is held, so concurrent
/// callers serialize per pickup and the loser of any race observes the
/// new status and gets `Conflict`.
fn transition<D, M>(
    state: &AppState,
    pickup_id: Uuid,
    actor: Actor,
    decide: D,
    mutate: M,
) -> Result<PickupRecord, AppError>
where
    D: FnOnce(&PickupRecord) -> Result<Step, AppError>,
    M: FnOnce(&mut PickupRecord, PickupStatus),
{
    let mut entry = state
        .pickups
        .get_mut(&pickup_id)
        .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;
    let pickup = entry.value_mut();

    let step = decide(pickup)?;
    if !legal(pickup.status, step.to) {
        return Err(AppError::Conflict(format!(
            "pickup {pickup_id} is {}, cannot move to {}",
            pickup.status.as_label(),
            step.to.as_label()
        )));
    }
    authorize(pickup, step.to, actor)?;

    mutate(pickup, step.to);
    pickup.status = step.to;
    pickup.timeline.push(TimelineEntry {
        status: step.to,
        at: Utc::now(),
        location: step.location,
        note: step.note,
    });

    state
        .metrics
        .transitions_total
        .with_label_values(&[step.to.as_label()])
        .inc();

    Ok(pickup.clone())
}

pub fn get_pickup(state: &AppState, pickup_id: Uuid) -> Result<PickupRecord, AppError> {
    state
        .pickups
        .get(&pickup_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))
}

/// Admin approval. The approved pickup immediately joins the broker
/// pool via the automatic system edge.
pub async fn approve(
    state: &AppState,
    pickup_id: Uuid,
    admin_id: Uuid,
) -> Result<PickupRecord, AppError> {
    transition(
        state,
        pickup_id,
        Actor::Admin(admin_id),
        |_| {
            Ok(Step {
                to: PickupStatus::AdminApproved,
                note: None,
                location: None,
            })
        },
        |pickup, _| {
            pickup.approval = Some(ApprovalRecord::Approved {
                admin_id,
                at: Utc::now(),
            });
        },
    )?;

    let record = transition(
        state,
        pickup_id,
        Actor::System,
        |_| {
            Ok(Step {
                to: PickupStatus::AwaitingAgent,
                note: None,
                location: None,
            })
        },
        |_, _| {},
    )?;

    state.metrics.pickups_awaiting_agent.inc();
    broker::enqueue_pickup(state, pickup_id).await?;
    state.notifier.notify(
        record.requester_id,
        EventKind::PickupApproved,
        json!({ "pickup_id": pickup_id }),
    );
    info!(pickup_id = %pickup_id, admin_id = %admin_id, "pickup approved");

    Ok(record)
}

pub fn reject(
    state: &AppState,
    pickup_id: Uuid,
    admin_id: Uuid,
    reason: &str,
) -> Result<PickupRecord, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidArgument(
            "rejection requires a reason".to_string(),
        ));
    }

    let record = transition(
        state,
        pickup_id,
        Actor::Admin(admin_id),
        |_| {
            Ok(Step {
                to: PickupStatus::AdminRejected,
                note: Some(reason.to_string()),
                location: None,
            })
        },
        |pickup, _| {
            pickup.approval = Some(ApprovalRecord::Rejected {
                admin_id,
                at: Utc::now(),
                reason: reason.to_string(),
            });
        },
    )?;

    state.notifier.notify(
        record.requester_id,
        EventKind::PickupRejected,
        json!({ "pickup_id": pickup_id, "reason": reason }),
    );
    info!(pickup_id = %pickup_id, admin_id = %admin_id, reason, "pickup rejected");

    Ok(record)
}

/// The accept race settles here: set status and assignee in one
/// conditional write keyed on the pickup still being `AwaitingAgent`.
pub fn assign(state: &AppState, pickup_id: Uuid, agent_id: Uuid) -> Result<PickupRecord, AppError> {
    if !state.agents.contains_key(&agent_id) {
        return Err(AppError::NotFound(format!("agent {agent_id} not found")));
    }

    // Resolve the route before taking the entry guard; losing the race
    // afterwards only wastes the lookup.
    let (origin, dropoff) = {
        let entry = state
            .pickups
            .get(&pickup_id)
            .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;
        (entry.value().location, entry.value().dropoff)
    };
    let route = dropoff.map(|dest| resolve_route(state.route_provider.as_ref(), &origin, &dest));

    let record = transition(
        state,
        pickup_id,
        Actor::Agent(agent_id),
        |_| {
            Ok(Step {
                to: PickupStatus::Assigned,
                note: None,
                location: None,
            })
        },
        move |pickup, _| {
            pickup.agent_id = Some(agent_id);
            if let Some(route) = route {
                pickup.distance_km = route.distance_km;
                pickup.route = Some(route);
            }
        },
    )?;

    state.metrics.pickups_awaiting_agent.dec();
    state.notifier.notify(
        record.requester_id,
        EventKind::PickupAssigned,
        json!({ "pickup_id": pickup_id, "agent_id": agent_id }),
    );
    info!(pickup_id = %pickup_id, agent_id = %agent_id, "pickup assigned");

    Ok(record)
}

/// Agent progress: Assigned -> InTransit ("reached pickup location"),
/// a second InTransit note once collected, then Completed. Completion
/// computes points and earnings under the same entry guard as the
/// status write and issues the reward.
pub fn advance(
    state: &AppState,
    pickup_id: Uuid,
    agent_id: Uuid,
    note: Option<String>,
    location: Option<GeoPoint>,
) -> Result<PickupRecord, AppError> {
    let record = transition(
        state,
        pickup_id,
        Actor::Agent(agent_id),
        |pickup| match pickup.status {
            PickupStatus::Assigned => Ok(Step {
                to: PickupStatus::InTransit,
                note: Some(note.unwrap_or_else(|| REACHED_NOTE.to_string())),
                location,
            }),
            PickupStatus::InTransit => {
                let transit_steps = pickup
                    .timeline
                    .iter()
                    .filter(|entry| entry.status == PickupStatus::InTransit)
                    .count();
                if transit_steps < 2 {
                    Ok(Step {
                        to: PickupStatus::InTransit,
                        note: Some(note.unwrap_or_else(|| COLLECTED_NOTE.to_string())),
                        location,
                    })
                } else {
                    Ok(Step {
                        to: PickupStatus::Completed,
                        note,
                        location,
                    })
                }
            }
            other => Err(AppError::Conflict(format!(
                "pickup {pickup_id} is {}, nothing to advance",
                other.as_label()
            ))),
        },
        |pickup, to| {
            if to == PickupStatus::Completed {
                pickup.points = pricing::points_for(pickup.waste_type, &pickup.waste_details);
                pickup.earnings =
                    pricing::earnings_for(pickup.distance_km, pickup.estimated_weight_kg);
            }
        },
    )?;

    match record.status {
        PickupStatus::InTransit => {
            let note = record.timeline.last().and_then(|entry| entry.note.clone());
            state.notifier.notify(
                record.requester_id,
                EventKind::PickupInTransit,
                json!({ "pickup_id": pickup_id, "note": note }),
            );
        }
        PickupStatus::Completed => {
            let reward = issue_reward(state, &record);
            state.notifier.notify(
                record.requester_id,
                EventKind::PickupCompleted,
                json!({
                    "pickup_id": pickup_id,
                    "points": record.points,
                    "earnings": record.earnings,
                }),
            );
            state.notifier.notify(
                record.requester_id,
                EventKind::RewardIssued,
                json!({
                    "code": reward.code,
                    "points": reward.points,
                    "expires_at": reward.expires_at,
                }),
            );
            info!(
                pickup_id = %record.id,
                requester_id = %record.requester_id,
                points = record.points,
                earnings = record.earnings,
                "pickup completed"
            );
        }
        _ => {}
    }

    Ok(record)
}

/// Requester cancellation is terminal. An assigned agent cancelling
/// before collection releases the pickup back to the pool instead; an
/// agent cancelling mid-transit is terminal like the requester's.
pub async fn cancel(
    state: &AppState,
    pickup_id: Uuid,
    actor: Actor,
    note: Option<String>,
) -> Result<PickupRecord, AppError> {
    let record = transition(
        state,
        pickup_id,
        actor,
        |pickup| {
            if pickup.status == PickupStatus::Assigned && matches!(actor, Actor::Agent(_)) {
                Ok(Step {
                    to: PickupStatus::AwaitingAgent,
                    note: note.or_else(|| Some("agent released pickup".to_string())),
                    location: None,
                })
            } else {
                Ok(Step {
                    to: PickupStatus::Cancelled,
                    note,
                    location: None,
                })
            }
        },
        |pickup, to| {
            if to == PickupStatus::AwaitingAgent {
                pickup.agent_id = None;
            }
        },
    )?;

    match record.status {
        PickupStatus::AwaitingAgent => {
            state.metrics.pickups_awaiting_agent.inc();
            broker::enqueue_pickup(state, pickup_id).await?;
            state.notifier.notify(
                record.requester_id,
                EventKind::AgentReleased,
                json!({ "pickup_id": pickup_id }),
            );
            info!(pickup_id = %pickup_id, "agent released pickup; re-offering");
        }
        PickupStatus::Cancelled => {
            let prior = record.timeline.iter().rev().nth(1).map(|entry| entry.status);
            if prior == Some(PickupStatus::AwaitingAgent) {
                state.metrics.pickups_awaiting_agent.dec();
            }
            state.offers.remove(&pickup_id);

            match actor {
                Actor::Requester(_) => {
                    if let Some(agent_id) = record.agent_id {
                        state.notifier.notify(
                            agent_id,
                            EventKind::PickupCancelled,
                            json!({ "pickup_id": pickup_id }),
                        );
                    }
                }
                _ => state.notifier.notify(
                    record.requester_id,
                    EventKind::PickupCancelled,
                    json!({ "pickup_id": pickup_id }),
                ),
            }
            info!(pickup_id = %pickup_id, "pickup cancelled");
        }
        _ => {}
    }

    Ok(record)
}

/// One rating per pickup, requester only, completed pickups only.
pub fn rate(
    state: &AppState,
    pickup_id: Uuid,
    requester_id: Uuid,
    score: u8,
    review: Option<String>,
) -> Result<PickupRecord, AppError> {
    if !(1..=5).contains(&score) {
        return Err(AppError::InvalidArgument(
            "score must be between 1 and 5".to_string(),
        ));
    }

    let mut entry = state
        .pickups
        .get_mut(&pickup_id)
        .ok_or_else(|| AppError::NotFound(format!("pickup {pickup_id} not found")))?;
    let pickup = entry.value_mut();

    if pickup.requester_id != requester_id {
        return Err(AppError::Forbidden(
            "only the requester may rate a pickup".to_string(),
        ));
    }
    if pickup.status != PickupStatus::Completed {
        return Err(AppError::Conflict(format!(
            "pickup {pickup_id} is {}, only completed pickups can be rated",
            pickup.status.as_label()
        )));
    }
    if pickup.rating.is_some() {
        return Err(AppError::Conflict(format!(
            "pickup {pickup_id} is already rated"
        )));
    }

    pickup.rating = Some(Rating {
        score,
        review,
        at: Utc::now(),
    });

    Ok(pickup.clone())
}

/// Single-use redemption: the `redeemed_at` write is conditional on it
/// still being unset.
pub fn redeem_reward(state: &AppState, code: &str) -> Result<Reward, AppError> {
    let mut entry = state
        .rewards
        .get_mut(code)
        .ok_or_else(|| AppError::NotFound(format!("reward code {code} not found")))?;
    let reward = entry.value_mut();

    if reward.redeemed_at.is_some() {
        return Err(AppError::Conflict("reward already redeemed".to_string()));
    }
    if reward.expires_at < Utc::now() {
        return Err(AppError::Conflict("reward expired".to_string()));
    }

    reward.redeemed_at = Some(Utc::now());
    Ok(reward.clone())
}

fn issue_reward(state: &AppState, pickup: &PickupRecord) -> Reward {
    let now = Utc::now();
    let reward = Reward {
        id: Uuid::new_v4(),
        pickup_id: pickup.id,
        requester_id: pickup.requester_id,
        points: pickup.points,
        code: Uuid::new_v4().simple().to_string(),
        issued_at: now,
        expires_at: now + chrono::Duration::days(REWARD_VALIDITY_DAYS),
        redeemed_at: None,
    };
    state.rewards.insert(reward.code.clone(), reward.clone());
    reward
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    use super::{advance, approve, assign, rate, reject, Actor};
    use crate::error::AppError;
    use crate::models::agent::{Agent, GeoPoint};
    use crate::models::pickup::{
        PickupRecord, PickupStatus, Priority, TimelineEntry, WasteDetails, WasteType,
    };
    use crate::state::AppState;

    fn setup() -> (AppState, mpsc::Receiver<Uuid>) {
        AppState::new(64, 64, Duration::from_secs(20))
    }

    fn seed_pickup(state: &AppState) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let record = PickupRecord {
            id,
            requester_id: Uuid::new_v4(),
            requester_name: "test requester".to_string(),
            address: "12 canal street".to_string(),
            agent_id: None,
            waste_type: WasteType::Mixed,
            waste_details: WasteDetails {
                food_boxes: Some(2),
                bottles: Some(3),
                other_description: None,
            },
            images: vec!["img-1".to_string()],
            priority: Priority::Immediate,
            schedule: None,
            status: PickupStatus::PendingReview,
            approval: None,
            estimated_weight_kg: 3.0,
            points: 0,
            earnings: 0.0,
            distance_km: 0.0,
            location: GeoPoint { lat: 52.52, lng: 13.405 },
            dropoff: None,
            route: None,
            timeline: vec![TimelineEntry {
                status: PickupStatus::PendingReview,
                at: now,
                location: None,
                note: None,
            }],
            rating: None,
            created_at: now,
        };
        state.pickups.insert(id, record);
        id
    }

    fn seed_agent(state: &AppState) -> Uuid {
        let id = Uuid::new_v4();
        state.agents.insert(
            id,
            Agent {
                id,
                name: "test agent".to_string(),
                location: None,
                online: true,
                last_offered_at: None,
                updated_at: Utc::now(),
            },
        );
        id
    }

    #[tokio::test]
    async fn illegal_transition_leaves_record_untouched() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);
        let agent_id = seed_agent(&state);

        let err = assign(&state, pickup_id, agent_id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let record = state.pickups.get(&pickup_id).unwrap().value().clone();
        assert_eq!(record.status, PickupStatus::PendingReview);
        assert!(record.agent_id.is_none());
        assert_eq!(record.timeline.len(), 1);
    }

    #[tokio::test]
    async fn wrong_actor_is_forbidden_and_appends_nothing() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);
        let winner = seed_agent(&state);
        let intruder = seed_agent(&state);

        approve(&state, pickup_id, Uuid::new_v4()).await.unwrap();
        assign(&state, pickup_id, winner).unwrap();

        let err = advance(&state, pickup_id, intruder, None, None).unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let record = state.pickups.get(&pickup_id).unwrap().value().clone();
        assert_eq!(record.status, PickupStatus::Assigned);
        assert_eq!(record.agent_id, Some(winner));
        // pending_review, admin_approved, awaiting_agent, assigned
        assert_eq!(record.timeline.len(), 4);
    }

    #[tokio::test]
    async fn rejection_requires_a_reason() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);

        let err = reject(&state, pickup_id, Uuid::new_v4(), "   ").unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));

        let record = state.pickups.get(&pickup_id).unwrap().value().clone();
        assert_eq!(record.status, PickupStatus::PendingReview);
        assert!(record.approval.is_none());
    }

    #[tokio::test]
    async fn timeline_statuses_follow_the_graph() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);
        let agent_id = seed_agent(&state);

        approve(&state, pickup_id, Uuid::new_v4()).await.unwrap();
        assign(&state, pickup_id, agent_id).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        let record = advance(&state, pickup_id, agent_id, None, None).unwrap();

        let statuses: Vec<PickupStatus> =
            record.timeline.iter().map(|entry| entry.status).collect();
        assert_eq!(
            statuses,
            vec![
                PickupStatus::PendingReview,
                PickupStatus::AdminApproved,
                PickupStatus::AwaitingAgent,
                PickupStatus::Assigned,
                PickupStatus::InTransit,
                PickupStatus::InTransit,
                PickupStatus::Completed,
            ]
        );
        assert_eq!(record.status, record.timeline.last().unwrap().status);
    }

    #[tokio::test]
    async fn completion_is_write_once() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);
        let agent_id = seed_agent(&state);

        approve(&state, pickup_id, Uuid::new_v4()).await.unwrap();
        assign(&state, pickup_id, agent_id).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        let completed = advance(&state, pickup_id, agent_id, None, None).unwrap();
        assert_eq!(completed.points, 85);
        assert_eq!(completed.earnings, 65.0);

        let err = advance(&state, pickup_id, agent_id, None, None).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let record = state.pickups.get(&pickup_id).unwrap().value().clone();
        assert_eq!(record.points, 85);
        assert_eq!(record.earnings, 65.0);
    }

    #[tokio::test]
    async fn second_rating_is_rejected_and_original_kept() {
        let (state, _rx) = setup();
        let pickup_id = seed_pickup(&state);
        let agent_id = seed_agent(&state);
        let requester_id = state.pickups.get(&pickup_id).unwrap().requester_id;

        approve(&state, pickup_id, Uuid::new_v4()).await.unwrap();
        assign(&state, pickup_id, agent_id).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();
        advance(&state, pickup_id, agent_id, None, None).unwrap();

        rate(&state, pickup_id, requester_id, 5, Some("great".to_string())).unwrap();
        let err = rate(&state, pickup_id, requester_id, 1, None).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let record = state.pickups.get(&pickup_id).unwrap().value().clone();
        assert_eq!(record.rating.as_ref().unwrap().score, 5);
    }

    #[tokio::test]
    async fn agent_cancel_before_collection_requeues() {
        let (state, mut rx) = setup();
        let pickup_id = seed_pickup(&state);
        let agent_id = seed_agent(&state);

        approve(&state, pickup_id, Uuid::new_v4()).await.unwrap();
        assign(&state, pickup_id, agent_id).unwrap();

        let record = super::cancel(&state, pickup_id, Actor::Agent(agent_id), None)
            .await
            .unwrap();
        assert_eq!(record.status, PickupStatus::AwaitingAgent);
        assert!(record.agent_id.is_none());

        // approval enqueued once, release enqueued once
        assert_eq!(rx.recv().await, Some(pickup_id));
        assert_eq!(rx.recv().await, Some(pickup_id));
    }
}
