use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Availability record for one collection agent. `online` is what the
/// broker reads at offer time; it says nothing about whether a socket
/// is currently connected, which only the notification transport knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub name: String,
    pub location: Option<GeoPoint>,
    pub online: bool,
    pub last_offered_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
