//! Event Router
//!
//! Drains a session's output queues and hands each record to an
//! [`EventSink`]. Stops on the first transport fault, on cancellation, or
//! once every queue has closed; in each case the session is disconnected
//! before returning.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventSink, SessionControl};
use crate::domain::session::TransportFault;
use crate::domain::streaming::Record;
use crate::infrastructure::metrics;
use crate::infrastructure::queues::SessionOutputs;

/// Why the router stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterExit {
    /// The session reported a transport fault.
    Faulted(TransportFault),
    /// External cancellation was requested.
    Cancelled,
    /// Every output queue closed.
    SourcesClosed,
}

#[derive(Debug, Clone, Copy)]
#[allow(clippy::struct_excessive_bools)]
struct OpenQueues {
    subscriptions: bool,
    trades: bool,
    quotes: bool,
    bars: bool,
    errors: bool,
    faults: bool,
}

impl OpenQueues {
    const fn all() -> Self {
        Self {
            subscriptions: true,
            trades: true,
            quotes: true,
            bars: true,
            errors: true,
            faults: true,
        }
    }

    const fn any(self) -> bool {
        self.subscriptions || self.trades || self.quotes || self.bars || self.errors || self.faults
    }
}

/// Consumer-side loop over one session's output queues.
pub struct EventRouter {
    outputs: SessionOutputs,
    session: Arc<dyn SessionControl>,
    sink: Arc<dyn EventSink>,
    cancel: CancellationToken,
}

impl EventRouter {
    /// Create a router.
    #[must_use]
    pub fn new(
        outputs: SessionOutputs,
        session: Arc<dyn SessionControl>,
        sink: Arc<dyn EventSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            outputs,
            session,
            sink,
            cancel,
        }
    }

    /// Route records until a fault, cancellation, or all queues close.
    ///
    /// Ready queues are polled in random order so a busy queue cannot starve
    /// the others. Cancellation is checked before every receive. On a fault,
    /// records already queued are dispatched before the router stops.
    pub async fn run(mut self) -> RouterExit {
        let mut open = OpenQueues::all();

        let exit = loop {
            if self.cancel.is_cancelled() {
                break RouterExit::Cancelled;
            }
            if !open.any() {
                break RouterExit::SourcesClosed;
            }

            let record = tokio::select! {
                () = self.cancel.cancelled() => break RouterExit::Cancelled,

                ack = self.outputs.subscriptions.recv(), if open.subscriptions => match ack {
                    Some(ack) => Record::SubscriptionAck(ack),
                    None => { open.subscriptions = false; continue; }
                },
                err = self.outputs.errors.recv(), if open.errors => match err {
                    Some(err) => Record::SessionError(err),
                    None => { open.errors = false; continue; }
                },
                trade = self.outputs.trades.recv(), if open.trades => match trade {
                    Some(trade) => Record::Trade(trade),
                    None => { open.trades = false; continue; }
                },
                quote = self.outputs.quotes.recv(), if open.quotes => match quote {
                    Some(quote) => Record::Quote(quote),
                    None => { open.quotes = false; continue; }
                },
                bar = self.outputs.bars.recv(), if open.bars => match bar {
                    Some(bar) => Record::Bar(bar),
                    None => { open.bars = false; continue; }
                },
                fault = self.outputs.faults.recv(), if open.faults => match fault {
                    Some(fault) => {
                        self.drain_queued().await;
                        break RouterExit::Faulted(fault);
                    }
                    None => { open.faults = false; continue; }
                },
            };

            self.dispatch(&record).await;
        };

        match &exit {
            RouterExit::Faulted(fault) => {
                tracing::error!(fault = %fault, "Stream faulted; disconnecting");
            }
            RouterExit::Cancelled => tracing::info!("Router cancelled; disconnecting"),
            RouterExit::SourcesClosed => tracing::info!("All queues closed; disconnecting"),
        }

        self.session.disconnect().await;
        exit
    }

    /// Dispatch every record already sitting in a queue.
    ///
    /// The session queues its fault only after all decode tasks have
    /// delivered, so this empties everything received before the fault.
    async fn drain_queued(&mut self) {
        let mut drained = 0_usize;

        while let Ok(ack) = self.outputs.subscriptions.try_recv() {
            self.dispatch(&Record::SubscriptionAck(ack)).await;
            drained += 1;
        }
        while let Ok(err) = self.outputs.errors.try_recv() {
            self.dispatch(&Record::SessionError(err)).await;
            drained += 1;
        }
        while let Ok(trade) = self.outputs.trades.try_recv() {
            self.dispatch(&Record::Trade(trade)).await;
            drained += 1;
        }
        while let Ok(quote) = self.outputs.quotes.try_recv() {
            self.dispatch(&Record::Quote(quote)).await;
            drained += 1;
        }
        while let Ok(bar) = self.outputs.bars.try_recv() {
            self.dispatch(&Record::Bar(bar)).await;
            drained += 1;
        }

        if drained > 0 {
            tracing::debug!(drained, "Dispatched records queued ahead of fault");
        }
    }

    async fn dispatch(&self, record: &Record) {
        if let Err(e) = self.sink.handle(record).await {
            metrics::record_sink_failure(record.kind());
            tracing::warn!(
                event_type = record.kind().as_str(),
                error = %e,
                "Sink failed to handle record"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use rust_decimal::Decimal;

    use super::*;
    use crate::application::ports::{MockEventSink, MockSessionControl, SinkError};
    use crate::domain::streaming::{
        Bar, Quote, RecordKind, SessionError, SubscriptionAck, Trade,
    };
    use crate::infrastructure::config::QueueSettings;
    use crate::infrastructure::queues::channels;

    fn trade() -> Trade {
        Trade {
            symbol: "AAPL".to_string(),
            trade_id: 1,
            exchange: "D".to_string(),
            price: Decimal::new(100, 0),
            size: 1,
            timestamp: "2021-01-01T00:00:00Z".to_string(),
            conditions: vec![],
            tape: "C".to_string(),
        }
    }

    fn quote() -> Quote {
        Quote {
            symbol: "AMD".to_string(),
            ask_exchange: "X".to_string(),
            ask_price: Decimal::new(8767, 2),
            ask_size: 1,
            bid_exchange: "U".to_string(),
            bid_price: Decimal::new(8766, 2),
            bid_size: 1,
            timestamp: "2021-02-22T15:51:45Z".to_string(),
            conditions: vec![],
            tape: "C".to_string(),
        }
    }

    fn disconnect_once() -> Arc<MockSessionControl> {
        let mut session = MockSessionControl::new();
        session.expect_disconnect().times(1).return_const(());
        Arc::new(session)
    }

    fn recording_sink(seen: Arc<Mutex<Vec<RecordKind>>>) -> Arc<MockEventSink> {
        let mut sink = MockEventSink::new();
        sink.expect_handle().returning(move |record| {
            seen.lock().unwrap().push(record.kind());
            Ok(())
        });
        Arc::new(sink)
    }

    #[tokio::test]
    async fn fault_disconnects_and_stops() {
        let (senders, outputs) = channels(QueueSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        senders
            .deliver(Record::SubscriptionAck(SubscriptionAck::default()))
            .await
            .unwrap();
        senders
            .report_fault(TransportFault::EndOfStream)
            .await
            .unwrap();

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            recording_sink(Arc::clone(&seen)),
            CancellationToken::new(),
        );

        assert_eq!(
            router.run().await,
            RouterExit::Faulted(TransportFault::EndOfStream)
        );
        assert_eq!(*seen.lock().unwrap(), vec![RecordKind::SubscriptionAck]);
    }

    #[tokio::test]
    async fn cancellation_disconnects() {
        let (_senders, outputs) = channels(QueueSettings::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            Arc::new(MockEventSink::new()),
            cancel,
        );

        assert_eq!(router.run().await, RouterExit::Cancelled);
    }

    #[tokio::test]
    async fn sink_errors_do_not_stop_the_loop() {
        let (senders, outputs) = channels(QueueSettings::default());

        let mut sink = MockEventSink::new();
        sink.expect_handle().times(2).returning(|_| {
            Err(SinkError::WriteFailed {
                message: "unavailable".to_string(),
            })
        });

        for code in [405, 406] {
            senders
                .deliver(Record::SessionError(SessionError {
                    code,
                    msg: "limit".to_string(),
                }))
                .await
                .unwrap();
        }
        senders
            .report_fault(TransportFault::Read("reset".to_string()))
            .await
            .unwrap();

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            Arc::new(sink),
            CancellationToken::new(),
        );

        assert!(matches!(router.run().await, RouterExit::Faulted(_)));
    }

    #[tokio::test]
    async fn closed_queues_end_the_loop() {
        let (senders, outputs) = channels(QueueSettings::default());
        drop(senders);

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            Arc::new(MockEventSink::new()),
            CancellationToken::new(),
        );

        assert_eq!(router.run().await, RouterExit::SourcesClosed);
    }

    #[tokio::test]
    async fn every_record_kind_reaches_the_sink() {
        let (senders, outputs) = channels(QueueSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let bar = Bar {
            symbol: "SPY".to_string(),
            open: Decimal::new(1, 0),
            high: Decimal::new(2, 0),
            low: Decimal::new(1, 0),
            close: Decimal::new(2, 0),
            volume: 10,
            trade_count: None,
            vwap: None,
            timestamp: "2021-02-22T19:15:00Z".to_string(),
        };

        senders.deliver(Record::Trade(trade())).await.unwrap();
        senders.deliver(Record::Quote(quote())).await.unwrap();
        senders.deliver(Record::Bar(bar)).await.unwrap();
        drop(senders);

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            recording_sink(Arc::clone(&seen)),
            CancellationToken::new(),
        );

        assert_eq!(router.run().await, RouterExit::SourcesClosed);
        let mut kinds = seen.lock().unwrap().clone();
        kinds.sort_by_key(|k| k.as_str());
        assert_eq!(
            kinds,
            vec![RecordKind::Bar, RecordKind::Quote, RecordKind::Trade]
        );
    }

    #[tokio::test]
    async fn busy_trade_queue_does_not_starve_quotes() {
        let (senders, outputs) = channels(QueueSettings::default());
        let cancel = CancellationToken::new();
        let trades_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..1024 {
            senders.deliver(Record::Trade(trade())).await.unwrap();
        }
        senders.deliver(Record::Quote(quote())).await.unwrap();

        // Keep the trade queue non-empty until the router is gone.
        let producer = tokio::spawn(async move {
            while senders.deliver(Record::Trade(trade())).await.is_ok() {}
        });

        let mut sink = MockEventSink::new();
        let counter = Arc::clone(&trades_seen);
        let stop = cancel.clone();
        sink.expect_handle().returning(move |record| {
            match record {
                Record::Quote(_) => stop.cancel(),
                _ => {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }
            Ok(())
        });

        let router = EventRouter::new(outputs, disconnect_once(), Arc::new(sink), cancel);

        let exit = tokio::time::timeout(Duration::from_secs(5), router.run())
            .await
            .expect("quote should be routed while trades keep arriving");

        assert_eq!(exit, RouterExit::Cancelled);
        assert!(trades_seen.load(Ordering::SeqCst) < 1024);
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn queued_records_are_dispatched_before_fault_exit() {
        let (senders, outputs) = channels(QueueSettings::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for _ in 0..100 {
            senders.deliver(Record::Trade(trade())).await.unwrap();
        }
        for _ in 0..5 {
            senders.deliver(Record::Quote(quote())).await.unwrap();
        }
        senders
            .report_fault(TransportFault::EndOfStream)
            .await
            .unwrap();

        let router = EventRouter::new(
            outputs,
            disconnect_once(),
            recording_sink(Arc::clone(&seen)),
            CancellationToken::new(),
        );

        assert_eq!(
            router.run().await,
            RouterExit::Faulted(TransportFault::EndOfStream)
        );

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 105);
        assert_eq!(seen.iter().filter(|k| **k == RecordKind::Trade).count(), 100);
        assert_eq!(seen.iter().filter(|k| **k == RecordKind::Quote).count(), 5);
    }
}
