use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::geo::routing::{RouteProvider, StraightLine};
use crate::models::agent::Agent;
use crate::models::offer::Offer;
use crate::models::pickup::PickupRecord;
use crate::models::reward::Reward;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;

/// Shared state. The DashMap entry guard is the per-document atomic
/// unit: every lifecycle transition is a read-check-mutate performed
/// entirely under one `get_mut` guard, which is what makes concurrent
/// accepts settle to exactly one winner.
pub struct AppState {
    pub pickups: DashMap<Uuid, PickupRecord>,
    pub agents: DashMap<Uuid, Agent>,
    /// Live offer cycles, keyed by pickup id.
    pub offers: DashMap<Uuid, Offer>,
    /// Issued rewards, keyed by redemption code.
    pub rewards: DashMap<String, Reward>,
    pub broker_tx: mpsc::Sender<Uuid>,
    pub notifier: Notifier,
    pub route_provider: Box<dyn RouteProvider>,
    pub offer_window: Duration,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        broker_queue_size: usize,
        event_buffer_size: usize,
        offer_window: Duration,
    ) -> (Self, mpsc::Receiver<Uuid>) {
        let (broker_tx, broker_rx) = mpsc::channel(broker_queue_size);

        (
            Self {
                pickups: DashMap::new(),
                agents: DashMap::new(),
                offers: DashMap::new(),
                rewards: DashMap::new(),
                broker_tx,
                notifier: Notifier::new(event_buffer_size),
                route_provider: Box::new(StraightLine),
                offer_window,
                metrics: Metrics::new(),
            },
            broker_rx,
        )
    }
}
