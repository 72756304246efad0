#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Alpaca Stream Client - Real-time Market Data Session
//!
//! Opens an authenticated WebSocket session to Alpaca's stock data stream,
//! decodes the batched JSON frames into typed records, and routes them to an
//! event sink. A small HTTP front end starts the session on login.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Record model and session lifecycle
//!   - `streaming`: Trades, quotes, bars, subscription acks, session errors
//!   - `session`: Lifecycle states and transport faults
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Event sink and session control interfaces
//!   - `services`: Event router, session launcher
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `alpaca`: Frame codec, credentials, session state machine
//!   - `queues`: Bounded per-kind record queues
//!   - `sinks`: Event log sink
//!   - `http`: Login front end, health, metrics
//!   - `config`: Environment configuration
//!
//! # Data Flow
//!
//! ```text
//!                      +-> subscriptions -+
//!                      +-> trades --------+
//! Alpaca WS -> Session +-> quotes --------+-> EventRouter -> EventSink
//!  (decode)            +-> bars ----------+
//!                      +-> errors --------+
//!                      +-> faults --------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core stream types with no transport dependencies.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::session::{SessionState, TransportFault};
pub use domain::streaming::{
    Bar, Quote, Record, RecordKind, SessionError, SubscriptionAck, Trade,
};

// Application
pub use application::ports::{EventSink, NoOpEventSink, SessionControl, SinkError};
pub use application::services::{EventRouter, LaunchError, RouterExit, SessionLauncher};

// Alpaca session
pub use infrastructure::alpaca::{
    ClientError, Credentials, CredentialsError, DecodedBatch, FrameDecoder, Session,
    SessionConfig,
};

// Infrastructure config
pub use infrastructure::config::{
    ClientConfig, ConfigError, DataFeed, DisconnectSettings, QueueSettings, ServerSettings,
};

// Queues and sinks
pub use infrastructure::queues::SessionOutputs;
pub use infrastructure::sinks::TracingEventSink;

// HTTP front end
pub use infrastructure::http::{HttpServer, HttpServerError, router};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
