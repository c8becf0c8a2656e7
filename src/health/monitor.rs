//! Periodic endpoint monitor.
//!
//! # Responsibilities
//! - Probe every configured target on a fixed interval
//! - Route each probe through `resilient_call` with one circuit per target
//! - Apply configuration reloads between rounds

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant, MissedTickBehavior};
use url::Url;

use crate::config::{ResilienceConfig, TargetConfig};
use crate::http::{HttpError, HttpProbe, ProbeResponse};
use crate::observability::metrics;
use crate::resilience::{
    CallError, CallOptions, CircuitPhase, CircuitRegistry, ResilienceError, RetryOptions,
};

/// Outcome of probing one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    pub target: String,
    pub url: String,
    pub up: bool,
    pub status: Option<u16>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub circuit: CircuitPhase,
    pub consecutive_failures: u32,
}

/// Everything a probe round needs, swapped atomically on reload.
struct MonitorState {
    config: ResilienceConfig,
    registry: CircuitRegistry,
    probe: HttpProbe,
}

impl MonitorState {
    fn build(config: ResilienceConfig) -> Result<Self, HttpError> {
        let registry = CircuitRegistry::with_config(&config.circuit_breaker);
        let probe = HttpProbe::new(Duration::from_secs(config.monitor.timeout_secs))?;
        Ok(Self {
            config,
            registry,
            probe,
        })
    }

    /// Next state for `config`, keeping circuit history and the client when their settings match.
    fn reconfigure(&self, config: ResilienceConfig) -> Result<Self, HttpError> {
        let registry = if config.circuit_breaker == self.config.circuit_breaker {
            self.registry.clone()
        } else {
            tracing::info!("Circuit breaker settings changed, resetting circuits");
            CircuitRegistry::with_config(&config.circuit_breaker)
        };

        let probe = if config.monitor.timeout_secs == self.config.monitor.timeout_secs {
            self.probe.clone()
        } else {
            HttpProbe::new(Duration::from_secs(config.monitor.timeout_secs))?
        };

        Ok(Self {
            config,
            registry,
            probe,
        })
    }
}

pub struct HealthMonitor {
    state: ArcSwap<MonitorState>,
}

impl HealthMonitor {
    pub fn new(config: ResilienceConfig) -> Result<Self, HttpError> {
        Ok(Self {
            state: ArcSwap::from_pointee(MonitorState::build(config)?),
        })
    }

    /// Registry holding the per-target circuits of the current configuration.
    pub fn registry(&self) -> CircuitRegistry {
        self.state.load().registry.clone()
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.state.load().config.monitor.interval_secs)
    }

    /// Swap in a reloaded configuration.
    pub fn apply(&self, config: ResilienceConfig) -> Result<(), HttpError> {
        let next = self.state.load().reconfigure(config)?;
        tracing::info!(targets = next.config.monitor.targets.len(), "Monitor configuration applied");
        self.state.store(Arc::new(next));
        Ok(())
    }

    /// Probe every target once, concurrently.
    pub async fn check_all(&self) -> Vec<TargetReport> {
        let state = self.state.load_full();
        join_all(
            state
                .config
                .monitor
                .targets
                .iter()
                .map(|target| check_target(&state, target)),
        )
        .await
    }

    pub async fn run(
        self,
        mut updates: mpsc::UnboundedReceiver<ResilienceConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut interval = self.interval();
        let mut ticker = new_ticker(Instant::now(), interval);

        tracing::info!(interval = ?interval, "Health monitor starting");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reports = self.check_all().await;
                    let up = reports.iter().filter(|r| r.up).count();
                    tracing::debug!(up, total = reports.len(), "Probe round finished");
                }
                Some(config) = updates.recv() => {
                    if let Err(e) = self.apply(config) {
                        tracing::error!(error = %e, "Failed to apply configuration, keeping current");
                        continue;
                    }
                    let next = self.interval();
                    if next != interval {
                        interval = next;
                        // Keep the round that just ran; the next one is a full period away.
                        ticker = new_ticker(Instant::now() + interval, interval);
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

fn new_ticker(start: Instant, period: Duration) -> time::Interval {
    let mut ticker = time::interval_at(start, period);
    // A round with retries can outlast the period.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn check_target(state: &MonitorState, target: &TargetConfig) -> TargetReport {
    let url = match Url::parse(&target.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(target_name = %target.name, error = %e, "Skipping target with invalid url");
            return report_for(state, target, Err((None, format!("invalid url: {e}"))));
        }
    };

    let options = CallOptions::with_retry(RetryOptions::from_config(&state.config.retries));
    let outcome = state
        .registry
        .resilient_call(&target.name, || state.probe.get(&url), options)
        .await
        .map_err(|e| {
            let status = match &e {
                ResilienceError::Operation(http) => CallError::status(http),
                ResilienceError::CircuitOpen { .. } => None,
            };
            (status, e.to_string())
        });

    report_for(state, target, outcome)
}

fn report_for(
    state: &MonitorState,
    target: &TargetConfig,
    outcome: Result<ProbeResponse, (Option<u16>, String)>,
) -> TargetReport {
    let circuit = state.registry.get_circuit_state(&target.name);
    metrics::record_target_up(&target.name, outcome.is_ok());

    let mut report = TargetReport {
        target: target.name.clone(),
        url: target.url.clone(),
        up: outcome.is_ok(),
        status: None,
        latency_ms: None,
        error: None,
        circuit: circuit.phase,
        consecutive_failures: circuit.consecutive_failures,
    };

    match outcome {
        Ok(response) => {
            metrics::record_probe_duration(&target.name, response.latency);
            tracing::debug!(
                target_name = %target.name,
                status = response.status,
                latency = ?response.latency,
                "Probe succeeded"
            );
            report.status = Some(response.status);
            report.latency_ms = Some(u64::try_from(response.latency.as_millis()).unwrap_or(u64::MAX));
        }
        Err((status, error)) => {
            tracing::warn!(
                target_name = %target.name,
                circuit = %circuit.phase,
                failures = circuit.consecutive_failures,
                error = %error,
                "Probe failed"
            );
            report.status = status;
            report.error = Some(error);
        }
    }
    report
}
