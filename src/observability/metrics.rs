//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilience_retries_total` (counter): retry attempts across all calls
//! - `resilience_calls_total` (counter): guarded calls by circuit, outcome
//! - `resilience_circuit_rejections_total` (counter): calls refused by an open circuit
//! - `resilience_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `resilience_target_up` (gauge): 1=last probe succeeded, 0=failed
//! - `resilience_probe_duration_seconds` (histogram): monitor probe latency
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitPhase;

/// Install the Prometheus exporter with an HTTP scrape endpoint on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_retry() {
    counter!("resilience_retries_total").increment(1);
}

pub fn record_call(circuit: &str, outcome: &'static str) {
    counter!(
        "resilience_calls_total",
        "circuit" => circuit.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_circuit_rejection(circuit: &str) {
    counter!("resilience_circuit_rejections_total", "circuit" => circuit.to_string()).increment(1);
}

pub fn record_circuit_state(circuit: &str, phase: CircuitPhase) {
    gauge!("resilience_circuit_state", "circuit" => circuit.to_string()).set(phase_value(phase));
}

pub fn record_target_up(target: &str, up: bool) {
    gauge!("resilience_target_up", "target" => target.to_string()).set(if up { 1.0 } else { 0.0 });
}

pub fn record_probe_duration(target: &str, elapsed: Duration) {
    histogram!("resilience_probe_duration_seconds", "target" => target.to_string())
        .record(elapsed.as_secs_f64());
}

fn phase_value(phase: CircuitPhase) -> f64 {
    match phase {
        CircuitPhase::Closed => 0.0,
        CircuitPhase::HalfOpen => 1.0,
        CircuitPhase::Open => 2.0,
    }
}
