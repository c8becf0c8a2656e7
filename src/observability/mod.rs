//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! resilience / health subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Library code only emits events; the binary installs subscriber and recorder
//! - Circuit name is the label on every per-circuit metric

pub mod logging;
pub mod metrics;
