use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One live offer cycle for a pickup: the agent currently holding the
/// offer plus the ranked candidates still in line behind them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub pickup_id: Uuid,
    pub agent_id: Uuid,
    pub offered_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub pending: VecDeque<Uuid>,
}
