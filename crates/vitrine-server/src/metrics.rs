// Metric descriptions for the counters recorded across the control plane.
// Recording is a no-op until a recorder is installed.

use metrics::{counter, describe_counter, describe_gauge};

/// Initialize all metric descriptions
/// Should be called once at application startup
pub fn init_metrics() {
    describe_counter!(
        "vitrine_provisioning_total",
        "Total number of provisioning runs by outcome"
    );
    describe_counter!(
        "vitrine_lease_expired_total",
        "Total number of exhibits stopped after their lease expired"
    );
    describe_counter!(
        "vitrine_proxy_requests_total",
        "Total number of proxied requests by outcome"
    );
    describe_counter!(
        "vitrine_exhibit_requests_total",
        "Total number of exhibit requests by dispatch outcome"
    );
    describe_gauge!(
        "vitrine_store_leases",
        "Number of live leases in the in-memory coordination store"
    );

    tracing::info!("metrics initialized");
}

/// Record how an exhibit request was dispatched
pub fn record_dispatch(outcome: &'static str) {
    counter!("vitrine_exhibit_requests_total", "dispatch" => outcome).increment(1);
}
