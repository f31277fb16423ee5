//! Event channel implementation using crossbeam-channel.
//!
//! Progress events flow from the engine to whatever front end is listening.

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use super::Event;

/// Cloneable, thread-safe event sender
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Create a new EventSender from a raw crossbeam sender.
    pub fn new(sender: Sender<Event>) -> Self {
        Self { inner: sender }
    }

    /// Send an event; discarded when nobody is listening
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Receives events from the core library.
///
/// Used by UI layers to subscribe to progress updates.
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event is received
    pub fn recv(&self) -> Option<Event> {
        self.inner.recv().ok()
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.try_recv().ok()
    }

    /// Returns an iterator over received events
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// Constructor for sender/receiver pairs
pub struct EventChannel;

impl EventChannel {
    /// Create a new unbounded event channel.
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }

    /// Create a bounded event channel with the specified capacity.
    pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
        let (sender, receiver) = bounded(capacity);
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        EventChannel
    }
}

/// A sender whose receiver is already gone
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{FingerprintEvent, FingerprintProgress, FingerprintTarget, PipelineEvent};
    use std::thread;

    #[test]
    fn events_can_be_sent_across_threads() {
        let (sender, receiver) = EventChannel::new();

        let handle = thread::spawn(move || {
            sender.send(Event::Fingerprint(FingerprintEvent::Progress(
                FingerprintProgress {
                    target: FingerprintTarget::Archives,
                    completed: 5,
                    total: 25,
                    current: "takeout-001.zip:Photos/img1.jpg".to_string(),
                    cache_hits: 0,
                },
            )));
        });

        handle.join().unwrap();

        match receiver.recv().unwrap() {
            Event::Fingerprint(FingerprintEvent::Progress(p)) => assert_eq!(p.completed, 5),
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn null_sender_does_not_panic() {
        let sender = null_sender();
        sender.send(Event::Pipeline(PipelineEvent::Started));
    }

    #[test]
    fn bounded_channel_respects_capacity() {
        let (sender, receiver) = EventChannel::bounded(2);

        sender.send(Event::Pipeline(PipelineEvent::Started));
        sender.send(Event::Pipeline(PipelineEvent::Cancelled));

        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_some());
        assert!(receiver.try_recv().is_none());
    }
}
