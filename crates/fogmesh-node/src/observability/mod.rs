//! Observability Module
//!
//! - `metrics`: Prometheus metrics for reconciliation and discovery
//! - `events`: Structured membership events with consistent fields
//! - `tracing`: Log subscriber and optional OpenTelemetry export

pub mod events;
pub mod metrics;
pub mod tracing;

pub use self::metrics::{init_metrics, MetricsState};
pub use self::tracing::{init_tracing, shutdown_tracing, TracingConfig};
