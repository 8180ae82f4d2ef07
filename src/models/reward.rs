use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issued once per completed pickup. Redemption is single-use: the
/// `redeemed_at` write is conditional on it still being `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reward {
    pub id: Uuid,
    pub pickup_id: Uuid,
    pub requester_id: Uuid,
    pub points: u32,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub redeemed_at: Option<DateTime<Utc>>,
}
