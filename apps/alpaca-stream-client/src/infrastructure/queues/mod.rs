//! Session Output Queues
//!
//! Bounded per-kind queues between the session's decode tasks and the event
//! router.
//!
//! # Architecture
//!
//! ```text
//! decode task ──┬──► subscriptions ──┐
//!               ├──► trades ─────────┤
//! decode task ──┼──► quotes ─────────┼──► EventRouter
//!               ├──► bars ───────────┤
//!               └──► errors ─────────┤
//! receive loop ────► faults ─────────┘
//! ```
//!
//! A full queue blocks only the decode task delivering into it; the receive
//! loop never delivers records itself.

use tokio::sync::mpsc;

use crate::domain::session::TransportFault;
use crate::domain::streaming::{Bar, Quote, Record, SessionError, SubscriptionAck, Trade};
use crate::infrastructure::config::QueueSettings;

/// The consuming side of a queue was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{0} queue closed")]
pub struct QueueClosed(pub &'static str);

/// Producer handles for every output queue.
#[derive(Debug, Clone)]
pub struct RecordSenders {
    subscriptions: mpsc::Sender<SubscriptionAck>,
    trades: mpsc::Sender<Trade>,
    quotes: mpsc::Sender<Quote>,
    bars: mpsc::Sender<Bar>,
    errors: mpsc::Sender<SessionError>,
    faults: mpsc::Sender<TransportFault>,
}

impl RecordSenders {
    /// Deliver a record to the queue for its kind.
    ///
    /// Waits while that queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the queue's receiver was dropped.
    pub async fn deliver(&self, record: Record) -> Result<(), QueueClosed> {
        let kind = record.kind();
        let delivered = match record {
            Record::Trade(trade) => self.trades.send(trade).await.is_ok(),
            Record::Quote(quote) => self.quotes.send(quote).await.is_ok(),
            Record::Bar(bar) => self.bars.send(bar).await.is_ok(),
            Record::SubscriptionAck(ack) => self.subscriptions.send(ack).await.is_ok(),
            Record::SessionError(err) => self.errors.send(err).await.is_ok(),
        };

        if delivered {
            Ok(())
        } else {
            Err(QueueClosed(kind.as_str()))
        }
    }

    /// Place a transport fault on the fault queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueClosed`] if the fault receiver was dropped.
    pub async fn report_fault(&self, fault: TransportFault) -> Result<(), QueueClosed> {
        self.faults
            .send(fault)
            .await
            .map_err(|_| QueueClosed("fault"))
    }
}

/// Consumer handles for every output queue.
#[derive(Debug)]
pub struct SessionOutputs {
    /// Subscription acknowledgments.
    pub subscriptions: mpsc::Receiver<SubscriptionAck>,
    /// Trades.
    pub trades: mpsc::Receiver<Trade>,
    /// Quotes.
    pub quotes: mpsc::Receiver<Quote>,
    /// Bars.
    pub bars: mpsc::Receiver<Bar>,
    /// Server-reported session errors.
    pub errors: mpsc::Receiver<SessionError>,
    /// Transport faults; at most one per session.
    pub faults: mpsc::Receiver<TransportFault>,
}

/// Create the output queues with the given capacities.
///
/// # Panics
///
/// Panics if any capacity is zero. [`QueueSettings`] loaded through
/// `ClientConfig::from_env` is validated against this.
#[must_use]
pub fn channels(settings: QueueSettings) -> (RecordSenders, SessionOutputs) {
    let (subscriptions_tx, subscriptions_rx) = mpsc::channel(settings.subscriptions_capacity);
    let (trades_tx, trades_rx) = mpsc::channel(settings.trades_capacity);
    let (quotes_tx, quotes_rx) = mpsc::channel(settings.quotes_capacity);
    let (bars_tx, bars_rx) = mpsc::channel(settings.bars_capacity);
    let (errors_tx, errors_rx) = mpsc::channel(settings.errors_capacity);
    let (faults_tx, faults_rx) = mpsc::channel(settings.faults_capacity);

    (
        RecordSenders {
            subscriptions: subscriptions_tx,
            trades: trades_tx,
            quotes: quotes_tx,
            bars: bars_tx,
            errors: errors_tx,
            faults: faults_tx,
        },
        SessionOutputs {
            subscriptions: subscriptions_rx,
            trades: trades_rx,
            quotes: quotes_rx,
            bars: bars_rx,
            errors: errors_rx,
            faults: faults_rx,
        },
    )
}
