//! HTTP collaborators for the resilience layer.
//!
//! # Data Flow
//! ```text
//! resilient_call(target)
//!     → client.rs (GET with timeout)
//!     → Ok(ProbeResponse) | Err(HttpError classified via CallError)
//! ```

pub mod client;

pub use client::{HttpError, HttpProbe, ProbeResponse};
