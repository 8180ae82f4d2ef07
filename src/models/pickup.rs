use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::agent::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PickupStatus {
    PendingReview,
    AdminApproved,
    AdminRejected,
    AwaitingAgent,
    Assigned,
    InTransit,
    Completed,
    Cancelled,
}

impl PickupStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PickupStatus::AdminRejected | PickupStatus::Completed | PickupStatus::Cancelled
        )
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            PickupStatus::PendingReview => "pending_review",
            PickupStatus::AdminApproved => "admin_approved",
            PickupStatus::AdminRejected => "admin_rejected",
            PickupStatus::AwaitingAgent => "awaiting_agent",
            PickupStatus::Assigned => "assigned",
            PickupStatus::InTransit => "in_transit",
            PickupStatus::Completed => "completed",
            PickupStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WasteType {
    Food,
    Bottles,
    Other,
    Mixed,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WasteDetails {
    #[serde(default)]
    pub food_boxes: Option<u32>,
    #[serde(default)]
    pub bottles: Option<u32>,
    #[serde(default)]
    pub other_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Priority {
    Immediate,
    Scheduled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub date: NaiveDate,
    pub time_slot: String,
}

/// Admin verdict on a pickup. Set at most once, before the record may
/// leave `PendingReview`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApprovalRecord {
    Approved {
        admin_id: Uuid,
        at: DateTime<Utc>,
    },
    Rejected {
        admin_id: Uuid,
        at: DateTime<Utc>,
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub status: PickupStatus,
    pub at: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    pub waypoints: Vec<GeoPoint>,
    pub distance_km: f64,
    pub duration_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub score: u8,
    pub review: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickupRecord {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: String,
    pub address: String,
    pub agent_id: Option<Uuid>,
    pub waste_type: WasteType,
    pub waste_details: WasteDetails,
    pub images: Vec<String>,
    pub priority: Priority,
    pub schedule: Option<Schedule>,
    pub status: PickupStatus,
    pub approval: Option<ApprovalRecord>,
    pub estimated_weight_kg: f64,
    pub points: u32,
    pub earnings: f64,
    pub distance_km: f64,
    pub location: GeoPoint,
    pub dropoff: Option<GeoPoint>,
    pub route: Option<RouteSummary>,
    pub timeline: Vec<TimelineEntry>,
    pub rating: Option<Rating>,
    pub created_at: DateTime<Utc>,
}
