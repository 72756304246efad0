//! Port Interfaces
//!
//! Contracts between the event router and the systems around it, following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `EventSink`: Destination for routed records (event log, analytics)
//! - `SessionControl`: Shutdown handle on the live stream session

use async_trait::async_trait;

use crate::domain::streaming::Record;

/// Sink error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SinkError {
    /// Sink rejected or failed to store the record.
    #[error("sink write failed: {message}")]
    WriteFailed {
        /// Details
        message: String,
    },
}

/// Destination for records drained from the session queues.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handle one record.
    async fn handle(&self, record: &Record) -> Result<(), SinkError>;
}

/// Shutdown handle on a stream session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Close the session, waiting for the remote acknowledgment or timeout.
    async fn disconnect(&self);
}

/// Sink that discards every record.
#[derive(Debug, Clone, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn handle(&self, _record: &Record) -> Result<(), SinkError> {
        Ok(())
    }
}
