//! Event Log Sink
//!
//! Writes every routed record as a structured `tracing` event under the
//! `events` target, so the event log can be filtered or exported separately
//! from diagnostics (e.g. `RUST_LOG=events=info`).

use async_trait::async_trait;

use crate::application::ports::{EventSink, SinkError};
use crate::domain::streaming::Record;

/// Target for routed record events.
pub const EVENTS_TARGET: &str = "events";

/// Sink that logs each record.
#[derive(Debug, Clone, Default)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn handle(&self, record: &Record) -> Result<(), SinkError> {
        let event_type = record.kind().as_str();

        match record {
            Record::Trade(trade) => tracing::info!(
                target: EVENTS_TARGET,
                event_type,
                symbol = %trade.symbol,
                trade_id = trade.trade_id,
                exchange = %trade.exchange,
                price = %trade.price,
                size = trade.size,
                timestamp = %trade.timestamp,
                conditions = ?trade.conditions,
                tape = %trade.tape,
                "event occurred"
            ),
            Record::Quote(quote) => tracing::info!(
                target: EVENTS_TARGET,
                event_type,
                symbol = %quote.symbol,
                ask_exchange = %quote.ask_exchange,
                ask_price = %quote.ask_price,
                ask_size = quote.ask_size,
                bid_exchange = %quote.bid_exchange,
                bid_price = %quote.bid_price,
                bid_size = quote.bid_size,
                timestamp = %quote.timestamp,
                conditions = ?quote.conditions,
                tape = %quote.tape,
                "event occurred"
            ),
            Record::Bar(bar) => tracing::info!(
                target: EVENTS_TARGET,
                event_type,
                symbol = %bar.symbol,
                open = %bar.open,
                high = %bar.high,
                low = %bar.low,
                close = %bar.close,
                volume = bar.volume,
                trade_count = ?bar.trade_count,
                vwap = ?bar.vwap,
                timestamp = %bar.timestamp,
                "event occurred"
            ),
            Record::SubscriptionAck(ack) => tracing::info!(
                target: EVENTS_TARGET,
                event_type,
                trades = ?ack.trades,
                quotes = ?ack.quotes,
                bars = ?ack.bars,
                "event occurred"
            ),
            Record::SessionError(err) => tracing::warn!(
                target: EVENTS_TARGET,
                event_type,
                code = err.code,
                msg = %err.msg,
                auth_failure = err.is_auth_error(),
                limit_exceeded = err.is_limit_error(),
                "event occurred"
            ),
        }

        Ok(())
    }
}
