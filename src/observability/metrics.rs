use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub transitions_total: IntCounterVec,
    pub offers_total: IntCounterVec,
    pub accept_conflicts_total: IntCounter,
    pub pickups_awaiting_agent: IntGauge,
    pub offer_decision_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Successful pickup transitions by status"),
            &["status"],
        )
        .expect("valid transitions_total metric");

        let offers_total = IntCounterVec::new(
            Opts::new("offers_total", "Closed offer proposals by outcome"),
            &["outcome"],
        )
        .expect("valid offers_total metric");

        let accept_conflicts_total = IntCounter::new(
            "accept_conflicts_total",
            "Accept attempts that lost the assignment race",
        )
        .expect("valid accept_conflicts_total metric");

        let pickups_awaiting_agent = IntGauge::new(
            "pickups_awaiting_agent",
            "Current number of pickups waiting for an agent",
        )
        .expect("valid pickups_awaiting_agent metric");

        let offer_decision_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "offer_decision_seconds",
                "Time from offer to accept/decline/expiry in seconds",
            ),
            &["outcome"],
        )
        .expect("valid offer_decision_seconds metric");

        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(offers_total.clone()))
            .expect("register offers_total");
        registry
            .register(Box::new(accept_conflicts_total.clone()))
            .expect("register accept_conflicts_total");
        registry
            .register(Box::new(pickups_awaiting_agent.clone()))
            .expect("register pickups_awaiting_agent");
        registry
            .register(Box::new(offer_decision_seconds.clone()))
            .expect("register offer_decision_seconds");

        Self {
            registry,
            transitions_total,
            offers_total,
            accept_conflicts_total,
            pickups_awaiting_agent,
            offer_decision_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
