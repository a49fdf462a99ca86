use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::events::AgenticEvent;

/// Ordered, buffered event log for one run.
///
/// Events pushed before the consumer starts pulling are buffered and replayed
/// in order; this is a log handed to a single consumer, not a broadcast.
/// Dropping (or `close`ing) the channel lets the stream drain whatever is
/// buffered and then terminate.
pub struct EventChannel {
    tx: mpsc::UnboundedSender<AgenticEvent>,
}

/// Pull side of an [`EventChannel`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<AgenticEvent>,
}

impl EventChannel {
    pub fn new() -> (EventChannel, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventChannel { tx }, EventStream { rx })
    }

    /// Append an event. Silently dropped if the consumer is gone.
    pub fn push(&self, event: AgenticEvent) {
        let _ = self.tx.send(event);
    }

    /// Signal that no further events will arrive.
    pub fn close(self) {
        drop(self.tx);
    }
}

impl EventStream {
    /// Next event, or `None` once the channel is closed and drained.
    pub async fn recv(&mut self) -> Option<AgenticEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = AgenticEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SessionId;
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    fn turn_event(turn: u32) -> AgenticEvent {
        AgenticEvent::TurnComplete {
            session_id: SessionId::from_raw("chan-test"),
            turn,
            pending_count: 0,
            timestamp: Utc::now(),
        }
    }

    fn turn_of(event: &AgenticEvent) -> u32 {
        match event {
            AgenticEvent::TurnComplete { turn, .. } => *turn,
            other => panic!("expected turn_complete, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn delivers_buffered_events_in_order() {
        let (channel, mut stream) = EventChannel::new();
        channel.push(turn_event(0));
        channel.push(turn_event(1));
        channel.close();

        assert_eq!(turn_of(&stream.recv().await.unwrap()), 0);
        assert_eq!(turn_of(&stream.recv().await.unwrap()), 1);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn consumer_attaching_late_still_sees_everything() {
        let (channel, stream) = EventChannel::new();
        for turn in 0..5 {
            channel.push(turn_event(turn));
        }
        channel.close();

        let turns: Vec<u32> = stream.map(|e| turn_of(&e)).collect().await;
        assert_eq!(turns, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn wakes_waiting_consumer_on_push() {
        let (channel, mut stream) = EventChannel::new();

        let pusher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            channel.push(turn_event(7));
            channel.close();
        });

        let event = stream.recv().await.expect("expected an event, got closed");
        assert_eq!(turn_of(&event), 7);
        assert!(stream.recv().await.is_none());
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn close_without_events_terminates_immediately() {
        let (channel, mut stream) = EventChannel::new();
        channel.close();
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn push_after_consumer_dropped_is_a_no_op() {
        let (channel, stream) = EventChannel::new();
        drop(stream);
        channel.push(turn_event(0));
    }
}
