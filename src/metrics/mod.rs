use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions with whatever recorder is installed
pub fn describe_metrics() {
    describe_counter!(
        "gateway_registry_events_total",
        "Registry child events received by the tree watcher"
    );
    describe_counter!(
        "gateway_registry_events_dropped_total",
        "Registry events or service URLs skipped because they could not be applied"
    );
    describe_gauge!("gateway_mapping_rules", "Number of entries in the mapping table");
    describe_counter!(
        "gateway_route_lookups_total",
        "Route resolutions by outcome"
    );
}

pub struct Metrics;

impl Metrics {
    #[inline]
    pub fn record_registry_event(event: &str) {
        counter!("gateway_registry_events_total", "event" => event.to_string()).increment(1);
    }

    #[inline]
    pub fn record_event_dropped(reason: &str) {
        counter!("gateway_registry_events_dropped_total", "reason" => reason.to_string())
            .increment(1);
    }

    #[inline]
    pub fn set_mapping_rules(count: usize) {
        gauge!("gateway_mapping_rules").set(count as f64);
    }

    #[inline]
    pub fn record_route_lookup(outcome: &str) {
        counter!("gateway_route_lookups_total", "outcome" => outcome.to_string()).increment(1);
    }
}
