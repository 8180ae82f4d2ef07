use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::agent::Agent;
use crate::models::pickup::PickupRecord;
use crate::state::AppState;

/// Online agents ranked for an offer cycle: by straight-line proximity
/// to the pickup where the agent's location is known, located agents
/// ahead of unlocated ones, and unlocated agents by least recently
/// offered (never-offered first).
///
/// Priority compatibility reduces to the same filter for both kinds:
/// immediate pickups need at least one agent online right now, and
/// scheduled pickups may be offered ahead of their slot.
pub fn ranked_candidates(state: &AppState, pickup: &PickupRecord) -> Vec<Uuid> {
    let mut online: Vec<Agent> = state
        .agents
        .iter()
        .filter(|entry| entry.value().online)
        .map(|entry| entry.value().clone())
        .collect();

    online.sort_by(|a, b| compare(a, b, pickup));
    online.into_iter().map(|agent| agent.id).collect()
}

fn compare(a: &Agent, b: &Agent, pickup: &PickupRecord) -> Ordering {
    match (a.location, b.location) {
        (Some(la), Some(lb)) => haversine_km(&la, &pickup.location)
            .total_cmp(&haversine_km(&lb, &pickup.location)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => offered_key(a).cmp(&offered_key(b)),
    }
}

fn offered_key(agent: &Agent) -> DateTime<Utc> {
    agent.last_offered_at.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::ranked_candidates;
    use crate::models::agent::{Agent, GeoPoint};
    use crate::models::pickup::{
        PickupRecord, PickupStatus, Priority, WasteDetails, WasteType,
    };
    use crate::state::AppState;

    fn agent(id_seed: u128, location: Option<GeoPoint>, online: bool) -> Agent {
        Agent {
            id: Uuid::from_u128(id_seed),
            name: format!("agent-{id_seed}"),
            location,
            online,
            last_offered_at: None,
            updated_at: Utc::now(),
        }
    }

    fn pickup(lat: f64, lng: f64) -> PickupRecord {
        PickupRecord {
            id: Uuid::new_v4(),
            requester_id: Uuid::new_v4(),
            requester_name: "test requester".to_string(),
            address: "somewhere".to_string(),
            agent_id: None,
            waste_type: WasteType::Other,
            waste_details: WasteDetails {
                other_description: Some("scrap".to_string()),
                ..WasteDetails::default()
            },
            images: vec!["img-1".to_string()],
            priority: Priority::Immediate,
            schedule: None,
            status: PickupStatus::AwaitingAgent,
            approval: None,
            estimated_weight_kg: 1.0,
            points: 0,
            earnings: 0.0,
            distance_km: 0.0,
            location: GeoPoint { lat, lng },
            dropoff: None,
            route: None,
            timeline: Vec::new(),
            rating: None,
            created_at: Utc::now(),
        }
    }

    fn state_with(agents: Vec<Agent>) -> AppState {
        let (state, _rx) = AppState::new(8, 8, Duration::from_secs(20));
        for a in agents {
            state.agents.insert(a.id, a);
        }
        state
    }

    #[test]
    fn closer_agent_ranks_first() {
        let near = agent(1, Some(GeoPoint { lat: 53.5512, lng: 9.9938 }), true);
        let far = agent(2, Some(GeoPoint { lat: 53.7, lng: 10.2 }), true);
        let state = state_with(vec![far.clone(), near.clone()]);

        let ranked = ranked_candidates(&state, &pickup(53.5511, 9.9937));
        assert_eq!(ranked, vec![near.id, far.id]);
    }

    #[test]
    fn offline_agents_are_excluded() {
        let online = agent(1, Some(GeoPoint { lat: 53.55, lng: 9.99 }), true);
        let offline = agent(2, Some(GeoPoint { lat: 53.55, lng: 9.99 }), false);
        let state = state_with(vec![online.clone(), offline]);

        let ranked = ranked_candidates(&state, &pickup(53.5511, 9.9937));
        assert_eq!(ranked, vec![online.id]);
    }

    #[test]
    fn unlocated_agents_fall_back_to_least_recently_offered() {
        let mut stale = agent(1, None, true);
        stale.last_offered_at = Some(Utc::now() - chrono::Duration::minutes(30));
        let mut fresh = agent(2, None, true);
        fresh.last_offered_at = Some(Utc::now());
        let never = agent(3, None, true);
        let state = state_with(vec![fresh.clone(), stale.clone(), never.clone()]);

        let ranked = ranked_candidates(&state, &pickup(53.5511, 9.9937));
        assert_eq!(ranked, vec![never.id, stale.id, fresh.id]);
    }
}
