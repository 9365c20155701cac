use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::Error;
use crate::event::Event;

/// The sending half of an event stream.
///
/// Wraps `crossbeam_channel` exactly the way `notify-rs` does in its own
/// `Sender`/`Receiver` type aliases: an unbounded channel when no capacity is
/// given, a bounded one when the caller asked for backpressure via
/// `Watcher::with_buffer`.
pub(crate) enum EventSink {
    Unbounded(Sender<Event>),
    Bounded(Sender<Event>),
}

impl EventSink {
    pub(crate) fn unbounded() -> (Self, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (EventSink::Unbounded(tx), rx)
    }

    pub(crate) fn bounded(capacity: usize) -> (Self, Receiver<Event>) {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        (EventSink::Bounded(tx), rx)
    }

    /// Sends an event. On a bounded sink whose buffer is full, the event is
    /// dropped and `Err(Error::EventOverflow)` is returned so the reader loop
    /// can forward the condition on the error sink — this never blocks the
    /// reader thread and never drops silently.
    pub(crate) fn send(&self, event: Event) -> Result<(), Error> {
        let tx = match self {
            EventSink::Unbounded(tx) => tx,
            EventSink::Bounded(tx) => tx,
        };
        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::EventOverflow),
            Err(TrySendError::Disconnected(_)) => Err(Error::Closed),
        }
    }
}

pub(crate) struct ErrorSink {
    tx: Sender<Error>,
}

impl ErrorSink {
    pub(crate) fn new() -> (Self, Receiver<Error>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (ErrorSink { tx }, rx)
    }

    pub(crate) fn send(&self, err: Error) {
        // The receiving end may already be gone if the caller dropped it;
        // that's the caller's choice to stop listening, not an error here.
        let _ = self.tx.send(err);
    }
}
