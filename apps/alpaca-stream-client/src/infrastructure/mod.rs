//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Alpaca market data session (wire codec, credentials, state machine).
pub mod alpaca;

/// Configuration and environment parsing.
pub mod config;

/// Login front end, health check, and metrics HTTP endpoints.
pub mod http;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Bounded per-kind record queues.
pub mod queues;

/// Event sink adapters.
pub mod sinks;

/// OpenTelemetry tracing integration.
pub mod telemetry;
