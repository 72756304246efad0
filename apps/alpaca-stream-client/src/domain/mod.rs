//! Domain Layer - Core stream types with no transport dependencies.
//!
//! This layer contains the decoded record model and the session lifecycle
//! state machine. Nothing here touches the network.

/// Decoded market data records (trades, quotes, bars, control events).
pub mod streaming;

/// Session lifecycle states and transition guards.
pub mod session;
