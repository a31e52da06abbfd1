//! Event fan-in: subscription loops publish `EventUpdate`s onto one bounded
//! channel, a single sink task drains it.
//!
//! Architecture:
//! - `drive`: runs one decoded log stream through a handler until the
//!   cancellation token fires or the stream fails
//! - `spawn_watchers`: one supervised task per service watch call; the
//!   arbiter watch runs each of its two subscriptions on its own task
//! - `spawn_sink`: logs every update; the only consumer of the channel
//!
//! The channel is bounded. A full channel makes the subscription loops wait,
//! which in turn leaves logs buffered in the node subscription.

use crate::cache::CacheError;
use crate::onchain::EventStream;
use crate::services::{ArbiterService, EscrowService};

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub type EventSender = mpsc::Sender<EventUpdate>;
pub type EventReceiver = mpsc::Receiver<EventUpdate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ArbiterAdded,
    ArbiterRemoved,
    DealCreated,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::ArbiterAdded => write!(f, "arbiter_added"),
            EventKind::ArbiterRemoved => write!(f, "arbiter_removed"),
            EventKind::DealCreated => write!(f, "deal_created"),
        }
    }
}

/// One applied chain event, as reported to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventUpdate {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub address: String,
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl EventUpdate {
    pub fn new(kind: EventKind, address: String, payload: serde_json::Value) -> Self {
        Self {
            kind,
            address,
            payload,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded fan-in channel. A zero capacity is raised to one.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity.max(1))
}

/// Feed every item of `stream` to `handler` in arrival order, publishing
/// whatever update it returns.
///
/// Returns `Ok` when `cancel` fires and `Err(Subscription)` when the stream
/// yields an error or ends.
pub async fn drive<T, F, Fut>(
    name: &'static str,
    mut stream: EventStream<T>,
    cancel: &CancellationToken,
    sink: &EventSender,
    mut handler: F,
) -> Result<(), CacheError>
where
    T: Display,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Option<EventUpdate>>,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                info!(subscription = name, "subscription cancelled");
                return Ok(());
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(event)) => {
                debug!(subscription = name, event = %event, "event received");
                if let Some(update) = handler(event).await {
                    if sink.send(update).await.is_err() {
                        warn!(subscription = name, "event sink closed, update dropped");
                    }
                }
            }
            Some(Err(e)) => {
                return Err(CacheError::Subscription(format!("{name}: {e}")));
            }
            None => {
                return Err(CacheError::Subscription(format!("{name}: stream closed")));
            }
        }
    }
}

/// Drain the channel until every sender is gone. Resolves to the number of
/// updates seen.
pub fn spawn_sink(mut rx: EventReceiver) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut count: u64 = 0;
        while let Some(update) = rx.recv().await {
            count += 1;
            info!(
                kind = %update.kind,
                address = %update.address,
                timestamp = %update.timestamp,
                "event update"
            );
        }
        info!(updates = count, "event sink closed");
        count
    })
}

/// Run both service watchers as background tasks. Each task logs how its
/// watch call ended; neither is restarted.
pub fn spawn_watchers(
    arbiters: Arc<ArbiterService>,
    escrow: Arc<EscrowService>,
    cancel: CancellationToken,
    sink: EventSender,
) -> Vec<JoinHandle<()>> {
    let arbiter_task = {
        let cancel = cancel.clone();
        let sink = sink.clone();
        tokio::spawn(async move {
            let result = arbiters.watch_arbiter_events(cancel, sink).await;
            report("arbiter", result);
        })
    };

    let escrow_task = tokio::spawn(async move {
        let result = escrow.watch_escrow_events(cancel, sink).await;
        report("escrow", result);
    });

    vec![arbiter_task, escrow_task]
}

fn report(watcher: &'static str, result: Result<(), CacheError>) {
    match result {
        Ok(()) => info!(watcher = watcher, "event watcher stopped"),
        Err(e) => error!(watcher = watcher, error = %e, "event watcher failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::onchain::GatewayError;
    use futures_util::stream;
    use serde_json::json;

    #[derive(Debug)]
    struct Tick(u32);

    impl Display for Tick {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "tick {}", self.0)
        }
    }

    fn update(n: u32) -> EventUpdate {
        EventUpdate::new(EventKind::DealCreated, format!("0x{n}"), json!({ "n": n }))
    }

    #[test]
    fn test_update_wire_shape() {
        let json = serde_json::to_value(update(1)).unwrap();
        assert_eq!(json["type"], "deal_created");
        assert_eq!(json["address"], "0x1");
        assert_eq!(json["data"]["n"], 1);
    }

    #[tokio::test]
    async fn test_drive_preserves_order_and_reports_stream_end() {
        let items: Vec<Result<Tick, GatewayError>> = (1..=3).map(|n| Ok(Tick(n))).collect();
        let (tx, mut rx) = event_channel(8);
        let cancel = CancellationToken::new();

        let result = drive(
            "Tick",
            stream::iter(items).boxed(),
            &cancel,
            &tx,
            |tick: Tick| async move { Some(update(tick.0)) },
        )
        .await;
        assert!(matches!(result, Err(CacheError::Subscription(_))));

        for n in 1..=3 {
            assert_eq!(rx.recv().await.unwrap().address, format!("0x{n}"));
        }
    }

    #[tokio::test]
    async fn test_drive_stops_on_error() {
        let items: Vec<Result<Tick, GatewayError>> = vec![
            Ok(Tick(1)),
            Err(GatewayError::Decode {
                event: "Tick",
                reason: "bad data".to_string(),
            }),
            Ok(Tick(2)),
        ];
        let (tx, mut rx) = event_channel(8);
        let cancel = CancellationToken::new();

        let err = drive(
            "Tick",
            stream::iter(items).boxed(),
            &cancel,
            &tx,
            |tick: Tick| async move { Some(update(tick.0)) },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("bad data"));

        drop(tx);
        assert_eq!(rx.recv().await.unwrap().address, "0x1");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_drive_returns_ok_on_cancel() {
        let (tx, _rx) = event_channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = drive(
            "Tick",
            stream::pending::<Result<Tick, GatewayError>>().boxed(),
            &cancel,
            &tx,
            |tick: Tick| async move { Some(update(tick.0)) },
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_sink_counts_updates() {
        let (tx, rx) = event_channel(0);
        let sink = spawn_sink(rx);
        for n in 0..5 {
            tx.send(update(n)).await.unwrap();
        }
        drop(tx);
        assert_eq!(sink.await.unwrap(), 5);
    }
}
