//! Health monitoring subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic timer
//!     → monitor.rs probes each target through resilient_call
//!     → circuit per target absorbs sustained outages
//!     → TargetReport + metrics per round
//!
//! Config reload
//!     → monitor.rs swaps settings between rounds
//! ```
//!
//! # Design Decisions
//! - A target is "up" when its resilient call succeeded this round
//! - Open circuits are reported as down without touching the target

pub mod monitor;

pub use monitor::{HealthMonitor, TargetReport};
