//! Backpressured event streaming.
//!
//! Every execution emits through an [`EventSender`]: the event is appended
//! to the shared log (which assigns its sequence number) and then sent down
//! a single-slot channel. The producer cannot emit its next event until the
//! consumer has taken the previous one off the slot — that single-slot
//! capacity is the backpressure guarantee, never an unbounded queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::error::EngineError;
use crate::event::{Event, EventLog};

/// Stream half handed to consumers.
pub type EventStream = ReceiverStream<Event>;

/// Emitting half handed to executing agents.
#[derive(Clone)]
pub struct EventSender {
    log: Arc<EventLog>,
    tx: mpsc::Sender<Event>,
}

impl EventSender {
    /// Append to the log and push downstream. Blocks until the consumer has
    /// taken the previous event. Returns the stamped event.
    pub async fn emit(&self, event: Event) -> Result<Event, EngineError> {
        let stamped = self.log.append(event);
        self.tx
            .send(stamped.clone())
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(stamped)
    }

    /// Push an already-stamped event downstream without re-appending it.
    /// Used when merging child streams: the child's sender already logged
    /// the event.
    pub async fn forward(&self, event: Event) -> Result<(), EngineError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| EngineError::ChannelClosed)
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }
}

/// Build a single-slot event channel over `log`.
pub fn event_channel(log: Arc<EventLog>) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(1);
    (EventSender { log, tx }, ReceiverStream::new(rx))
}
