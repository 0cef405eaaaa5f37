//! In-process transport backed by kanal channels.

use bytes::Bytes;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::{topic_matches, MessageHandler, Subscription, Transport};

struct SubEntry {
    id: u64,
    pattern: String,
    handler: MessageHandler,
}

struct BusInner {
    tx: kanal::Sender<(String, Bytes)>,
    subs: Mutex<Vec<SubEntry>>,
    next_id: AtomicU64,
}

/// An in-process message bus.
///
/// Publishes are handed to an unbounded channel and drained by a single
/// dispatch thread, which invokes matching subscription handlers in
/// subscription order. One queue means delivery is globally FIFO, which
/// is stronger than the per-publisher-per-topic FIFO the [`Transport`]
/// contract asks for.
///
/// Share the bus between buffers via `Arc`:
///
/// ```rust
/// use osmosis::transport::LocalBus;
/// use std::sync::Arc;
///
/// let bus = Arc::new(LocalBus::new());
/// // pass Arc clones to OutputBuffer::new / InputBuffer::new
/// ```
pub struct LocalBus {
    inner: Arc<BusInner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl LocalBus {
    /// Create a bus and start its dispatch thread.
    pub fn new() -> Self {
        let (tx, rx) = kanal::unbounded::<(String, Bytes)>();
        let inner = Arc::new(BusInner {
            tx,
            subs: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        });

        let dispatch_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("osmosis-bus".into())
            .spawn(move || {
                while let Ok((topic, payload)) = rx.recv() {
                    // Snapshot matching handlers so subscribers may
                    // (un)subscribe from within a callback.
                    let handlers: Vec<MessageHandler> = {
                        let subs = dispatch_inner.subs.lock().unwrap();
                        subs.iter()
                            .filter(|s| topic_matches(&s.pattern, &topic))
                            .map(|s| Arc::clone(&s.handler))
                            .collect()
                    };
                    for handler in handlers {
                        let result =
                            catch_unwind(AssertUnwindSafe(|| handler(&topic, &payload)));
                        if result.is_err() {
                            tracing::error!(topic = %topic, "subscription handler panicked");
                        }
                    }
                }
            })
            .expect("failed to spawn bus dispatch thread");

        Self {
            inner,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Number of messages queued but not yet dispatched.
    pub fn backlog(&self) -> usize {
        self.inner.tx.len()
    }

    /// Shut the bus down: stop accepting publishes, drain the queue, and
    /// join the dispatch thread.
    pub fn close(&self) {
        self.inner.tx.close();
        if let Some(thread) = self.thread.lock().unwrap().take() {
            thread.join().ok();
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        self.close();
    }
}

impl Transport for LocalBus {
    fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.inner
            .tx
            .send((topic.to_owned(), payload))
            .map_err(|_| Error::Transport("bus closed".into()))
    }

    fn subscribe(&self, pattern: &str, handler: MessageHandler) -> Result<Subscription> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subs.lock().unwrap().push(SubEntry {
            id,
            pattern: pattern.to_owned(),
            handler,
        });

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        Ok(Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.subs.lock().unwrap().retain(|s| s.id != id);
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn wait_for(bus: &LocalBus) {
        // The dispatch thread drains the queue; poll until it is empty,
        // then leave a grace period for the in-flight handler to finish.
        for _ in 0..500 {
            if bus.backlog() == 0 {
                std::thread::sleep(Duration::from_millis(25));
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("bus backlog did not drain");
    }

    #[test]
    fn test_publish_reaches_matching_subscriber() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&count);
        let _sub = bus
            .subscribe(
                "a/b",
                Arc::new(move |topic, payload| {
                    assert_eq!(topic, "a/b");
                    assert_eq!(payload, b"hi");
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.publish("a/b", Bytes::from_static(b"hi")).unwrap();
        bus.publish("a/other", Bytes::from_static(b"no")).unwrap();
        wait_for(&bus);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_subscription() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&count);
        let _sub = bus
            .subscribe(
                "node/*",
                Arc::new(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.publish("node/x", Bytes::from_static(b"1")).unwrap();
        bus.publish("node/y", Bytes::from_static(b"2")).unwrap();
        bus.publish("other/z", Bytes::from_static(b"3")).unwrap();
        wait_for(&bus);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_delivery_preserves_publish_order() {
        let bus = LocalBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = bus
            .subscribe(
                "seq",
                Arc::new(move |_, payload| {
                    sink.lock().unwrap().push(payload[0]);
                }),
            )
            .unwrap();

        for i in 0..100u8 {
            bus.publish("seq", Bytes::copy_from_slice(&[i])).unwrap();
        }
        wait_for(&bus);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_dropped_subscription_stops_delivery() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&count);
        let sub = bus
            .subscribe(
                "t",
                Arc::new(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.publish("t", Bytes::from_static(b"1")).unwrap();
        wait_for(&bus);
        drop(sub);
        bus.publish("t", Bytes::from_static(b"2")).unwrap();
        wait_for(&bus);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_handler_does_not_kill_dispatch() {
        let bus = LocalBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _bad = bus
            .subscribe("t", Arc::new(|_, _| panic!("boom")))
            .unwrap();
        let seen = Arc::clone(&count);
        let _good = bus
            .subscribe(
                "t",
                Arc::new(move |_, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        bus.publish("t", Bytes::from_static(b"1")).unwrap();
        bus.publish("t", Bytes::from_static(b"2")).unwrap();
        wait_for(&bus);

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_after_close_fails() {
        let bus = LocalBus::new();
        bus.close();
        assert!(bus.publish("t", Bytes::from_static(b"x")).is_err());
    }
}
