//! Metrics collection and export for autopilot.
//!
//! Scheduler code records through the `metrics` crate facade. With the
//! `prometheus` feature enabled, [`init_metrics`] installs a Prometheus
//! recorder whose [`MetricsHandle::render`] yields the text exposition format.
//!
//! ```rust,ignore
//! use autopilot_metrics::{counter, scheduler};
//!
//! counter!(scheduler::DUE_CHECKS_TOTAL).increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
