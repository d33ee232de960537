use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// A single wire-format SSE event: `event: <name>\ndata: <payload>\n\n`.
/// Grounded on the flagfile SSE example's hand-built `event`/`data` framing,
/// adapted from axum's `Sse`/`Event` type to raw bytes since the router here
/// is built on hyper directly.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub name: &'static str,
    pub data: String,
}

impl SseEvent {
    pub fn new(name: &'static str, data: impl Into<String>) -> Self {
        Self {
            name,
            data: data.into(),
        }
    }

    fn encode(&self) -> Bytes {
        let mut out = String::with_capacity(self.data.len() + 32);
        out.push_str("event: ");
        out.push_str(self.name);
        out.push('\n');
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Bytes::from(out)
    }
}

fn heartbeat_frame() -> Bytes {
    Bytes::from_static(b": heartbeat\n\n")
}

/// Per-environment SSE fan-out channel. One `Publisher` backs every
/// downstream `/flags` stream for a single environment; the
/// `tokio::sync::broadcast` channel gives us the exact semantics needed —
/// a subscriber whose receive buffer overflows gets a `Lagged` error and is
/// disconnected, while every other subscriber is unaffected.
pub struct Publisher {
    tx: broadcast::Sender<SseEvent>,
    heartbeat_interval: Duration,
}

impl Publisher {
    pub fn new(capacity: usize, heartbeat_interval: Duration) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            heartbeat_interval,
        }
    }

    pub fn publish(&self, event: SseEvent) {
        // No receivers is the common case between environment startup and
        // the first subscriber; `send` returning an error here is not
        // exceptional and carries no information worth logging.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SseEvent> {
        self.tx.subscribe()
    }

    /// Builds the streaming response body for one subscriber: a synthetic
    /// `put` event carrying `initial` (the environment's current snapshot,
    /// per the replay-on-connect requirement), then every subsequent
    /// broadcast event, interleaved with a heartbeat comment on a timer.
    ///
    /// `rx` must come from a `subscribe()` call made *before* `initial` was
    /// read from the store, so an event published in between is merely
    /// replayed twice rather than lost — converging favors a tolerable
    /// duplicate over a missed update.
    pub fn stream_body(
        self: &std::sync::Arc<Self>,
        mut rx: broadcast::Receiver<SseEvent>,
        initial: SseEvent,
    ) -> BoxBody<Bytes, std::convert::Infallible> {
        let heartbeats_enabled = !self.heartbeat_interval.is_zero();
        let heartbeat_interval = self.heartbeat_interval;

        let stream = async_stream::stream! {
            yield Ok::<_, std::convert::Infallible>(Frame::data(initial.encode()));

            loop {
                // `heartbeatIntervalSecs = 0` disables heartbeats entirely; a
                // zero-length `sleep` would otherwise fire on every loop turn.
                let tick = async {
                    if heartbeats_enabled {
                        tokio::time::sleep(heartbeat_interval).await
                    } else {
                        std::future::pending::<()>().await
                    }
                };

                tokio::select! {
                    result = rx.recv() => {
                        match result {
                            Ok(event) => yield Ok(Frame::data(event.encode())),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(skipped, "sse subscriber lagged, disconnecting");
                                break;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = tick => {
                        yield Ok(Frame::data(heartbeat_frame()));
                    }
                }
            }

            debug!("sse subscriber disconnected");
        };

        StreamBody::new(stream).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_single_line_event() {
        let event = SseEvent::new("put", "{\"a\":1}");
        assert_eq!(event.encode().as_ref(), b"event: put\ndata: {\"a\":1}\n\n");
    }

    #[test]
    fn encodes_multi_line_payload_with_repeated_data_prefix() {
        let event = SseEvent::new("put", "line1\nline2");
        assert_eq!(
            event.encode().as_ref(),
            b"event: put\ndata: line1\ndata: line2\n\n"
        );
    }

    #[tokio::test]
    async fn lagged_subscriber_is_dropped_without_affecting_others() {
        let publisher = std::sync::Arc::new(Publisher::new(2, Duration::from_secs(30)));
        let mut slow = publisher.subscribe();
        let mut fast = publisher.subscribe();

        for i in 0..5 {
            publisher.publish(SseEvent::new("patch", i.to_string()));
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        // The still-attentive subscriber keeps receiving after the slow one lags.
        assert!(fast.recv().await.is_ok());
    }

    #[tokio::test]
    async fn stream_body_delivers_replay_before_live_events() {
        let publisher = std::sync::Arc::new(Publisher::new(16, Duration::from_secs(30)));
        let rx = publisher.subscribe();
        let initial = SseEvent::new("put", "{\"data\":{}}");
        let mut body = publisher.stream_body(rx, initial);
        publisher.publish(SseEvent::new("patch", "{\"path\":\"/flags/a\"}"));

        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(first.starts_with(b"event: put"));
        let second = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(second.starts_with(b"event: patch"));
    }
}
