//! The event dispatch queue.
//!
//! Every native callback hands its output to an [`EventSender`]; consumers
//! drain the matching [`EventReceiver`] on their own thread. Pushing never
//! blocks: a full bounded queue drops the event and counts the drop, so a
//! slow consumer can never stall an OS callback thread.
//!
//! # Example
//!
//! ```
//! use touchwatch::queue;
//! use touchwatch::{DeviceId, DeviceInfo, Event};
//!
//! let (tx, rx) = queue::bounded(16);
//! tx.push(Event::DeviceArrived(DeviceInfo { id: DeviceId::new(1) }));
//!
//! assert!(matches!(rx.poll(), Some(Event::DeviceArrived(_))));
//! assert!(rx.poll().is_none());
//! ```

use crate::event::Event;
use log::trace;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::time::Duration;

#[derive(Clone)]
enum SenderKind {
    Bounded(SyncSender<Event>),
    Unbounded(Sender<Event>),
    #[cfg(feature = "tokio")]
    Tokio(tokio::sync::mpsc::Sender<Event>),
}

/// Producer side of the dispatch queue. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    kind: SenderKind,
    dropped: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender")
            .field("dropped", &self.dropped())
            .finish_non_exhaustive()
    }
}

impl EventSender {
    /// Enqueue an event without blocking.
    ///
    /// Returns `false` if the event was dropped, either because the queue is
    /// full or because the consumer has gone away.
    pub fn push(&self, event: Event) -> bool {
        match &self.kind {
            SenderKind::Bounded(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(TrySendError::Full(event)) => self.overflow(&event),
                Err(TrySendError::Disconnected(_)) => false,
            },
            SenderKind::Unbounded(tx) => tx.send(event).is_ok(),
            #[cfg(feature = "tokio")]
            SenderKind::Tokio(tx) => match tx.try_send(event) {
                Ok(()) => true,
                Err(tokio::sync::mpsc::error::TrySendError::Full(event)) => self.overflow(&event),
                Err(tokio::sync::mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn overflow(&self, event: &Event) -> bool {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        trace!("dispatch queue full, dropping {:?}", event.event_type());
        false
    }
}

/// Consumer side of the dispatch queue.
pub struct EventReceiver {
    rx: Receiver<Event>,
    dropped: Arc<AtomicU64>,
}

impl EventReceiver {
    /// Take the next event if one is ready.
    pub fn poll(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Block until the next event arrives.
    ///
    /// Returns `None` once every sender has been dropped and the queue is empty.
    pub fn next(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout` waiting for the next event.
    ///
    /// Returns `Ok(None)` on timeout and `Err(())` once the queue is closed.
    #[allow(clippy::result_unit_err)]
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<Event>, ()> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(()),
        }
    }

    /// Iterate over the events that are ready now.
    pub fn try_iter(&self) -> mpsc::TryIter<'_, Event> {
        self.rx.try_iter()
    }

    /// Iterate, blocking, until the queue is closed.
    pub fn iter(&self) -> mpsc::Iter<'_, Event> {
        self.rx.iter()
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Create a queue holding at most `capacity` undelivered events.
pub fn bounded(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity);
    pair(SenderKind::Bounded(tx), rx)
}

/// Create a queue without a capacity limit.
///
/// Nothing is ever dropped, so memory grows if the consumer falls behind.
pub fn unbounded() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel();
    pair(SenderKind::Unbounded(tx), rx)
}

/// Bounded when a capacity is given, unbounded otherwise.
pub fn channel(capacity: Option<usize>) -> (EventSender, EventReceiver) {
    match capacity {
        Some(capacity) => bounded(capacity),
        None => unbounded(),
    }
}

fn pair(kind: SenderKind, rx: Receiver<Event>) -> (EventSender, EventReceiver) {
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            kind,
            dropped: dropped.clone(),
        },
        EventReceiver { rx, dropped },
    )
}

/// Create a queue drained through a tokio receiver.
#[cfg(feature = "tokio")]
pub fn async_channel(capacity: usize) -> (EventSender, tokio::sync::mpsc::Receiver<Event>) {
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    let sender = EventSender {
        kind: SenderKind::Tokio(tx),
        dropped: Arc::new(AtomicU64::new(0)),
    };
    (sender, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceId, DeviceInfo};
    use std::thread;

    fn arrived(id: u64) -> Event {
        Event::DeviceArrived(DeviceInfo {
            id: DeviceId::new(id),
        })
    }

    #[test]
    fn test_fifo_order() {
        let (tx, rx) = unbounded();
        for id in 0..5 {
            assert!(tx.push(arrived(id)));
        }
        let ids: Vec<_> = rx.try_iter().filter_map(|e| e.device()).collect();
        assert_eq!(ids, (0..5).map(DeviceId::new).collect::<Vec<_>>());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, rx) = bounded(2);
        assert!(tx.push(arrived(1)));
        assert!(tx.push(arrived(2)));
        assert!(!tx.push(arrived(3)));
        assert!(!tx.push(arrived(4)));

        assert_eq!(tx.dropped(), 2);
        assert_eq!(rx.dropped(), 2);
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn test_push_after_consumer_gone() {
        let (tx, rx) = bounded(4);
        drop(rx);
        assert!(!tx.push(arrived(1)));
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn test_next_ends_when_senders_gone() {
        let (tx, rx) = unbounded();
        let producer = tx.clone();
        let worker = thread::spawn(move || {
            for id in 0..3 {
                producer.push(arrived(id));
            }
        });
        worker.join().unwrap();
        drop(tx);

        let mut seen = 0;
        while rx.next().is_some() {
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(rx.next_timeout(Duration::from_millis(1)), Err(()));
    }

    #[test]
    fn test_next_timeout_on_empty_queue() {
        let (_tx, rx) = bounded(1);
        assert_eq!(rx.next_timeout(Duration::from_millis(5)), Ok(None));
        assert!(rx.poll().is_none());
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn test_async_channel() {
        let (tx, mut rx) = async_channel(1);
        assert!(tx.push(arrived(1)));
        assert!(!tx.push(arrived(2)));
        assert_eq!(tx.dropped(), 1);
        assert_eq!(rx.recv().await.and_then(|e| e.device()), Some(DeviceId::new(1)));
    }
}
