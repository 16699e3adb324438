//! Cross-process invalidation backplane.
//!
//! The backplane carries four event kinds between coordinator instances:
//! change (tagged with the originating action), remove, clear, and
//! clear-region. A coordinator publishes after each successful local write
//! and reconciles its handles when events from *other* instances arrive; its
//! own publishes are filtered out at the subscription (no loopback), and
//! received events are never relayed.
//!
//! ## ChannelBackplane
//!
//! The in-process reference implementation. A [`BackplaneHub`] plays the role
//! of the transport: every attached subscriber gets its own unbounded channel
//! and a listener thread that drains it. Production deployments would
//! implement [`Backplane`] over a real transport (e.g. a Redis channel); the
//! hub exists so multi-coordinator behavior is exercisable inside one
//! process.
//!
//! ```text
//!   coordinator A ──publish──► ┌────────────────┐ ──► listener thread B
//!                              │  BackplaneHub  │
//!   coordinator B ──publish──► └────────────────┘ ──► listener thread A
//!                    (A's own messages are dropped by A's listener)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::debug;

/// The write that produced a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// A create-if-absent succeeded.
    Add,
    /// An upsert completed.
    Put,
    /// An atomic update committed.
    Update,
}

/// A backplane message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackplaneEvent {
    /// A key changed in the publishing process.
    Change {
        key: String,
        region: Option<String>,
        action: ChangeAction,
    },
    /// A key was removed in the publishing process.
    Remove {
        key: String,
        region: Option<String>,
    },
    /// The publishing process cleared its cache.
    Clear,
    /// The publishing process cleared one region.
    ClearRegion { region: String },
}

/// Callback receiving inbound events from other instances.
pub type BackplaneListener = Box<dyn Fn(BackplaneEvent) + Send + Sync>;

/// Pub/sub transport carrying invalidations between coordinator instances.
pub trait Backplane: Send + Sync {
    /// Publishes a change event for `key`.
    fn notify_change(&self, key: &str, region: Option<&str>, action: ChangeAction);

    /// Publishes a remove event for `key`.
    fn notify_remove(&self, key: &str, region: Option<&str>);

    /// Publishes a full-clear event.
    fn notify_clear(&self);

    /// Publishes a region-clear event.
    fn notify_clear_region(&self, region: &str);

    /// Installs the listener for inbound events. The listener must never be
    /// invoked for this instance's own publishes. A later subscription
    /// replaces the earlier one.
    fn subscribe(&self, listener: BackplaneListener);

    /// Detaches the subscription and releases transport resources.
    fn close(&self) {}
}

static NEXT_ORIGIN: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct Envelope {
    origin: u64,
    event: BackplaneEvent,
}

/// In-process transport shared by a set of [`ChannelBackplane`] instances.
///
/// Stands in for the wire: each subscriber owns a channel, publishes fan out
/// to all of them, and disconnected subscribers are pruned on the next
/// publish.
#[derive(Default)]
pub struct BackplaneHub {
    subscribers: Mutex<Vec<Sender<Envelope>>>,
}

impl BackplaneHub {
    /// Creates an empty hub.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn attach(&self) -> Receiver<Envelope> {
        let (sender, receiver) = unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    fn publish(&self, envelope: Envelope) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
    }
}

/// [`Backplane`] implementation over a shared [`BackplaneHub`].
///
/// Each instance carries a unique origin id; the listener thread drops
/// envelopes stamped with its own origin, which implements the no-loopback
/// rule without any coordination on the publish path.
pub struct ChannelBackplane {
    hub: Arc<BackplaneHub>,
    origin: u64,
    listener: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl ChannelBackplane {
    /// Creates an instance attached to `hub`.
    pub fn new(hub: Arc<BackplaneHub>) -> Self {
        Self {
            hub,
            origin: NEXT_ORIGIN.fetch_add(1, Ordering::Relaxed),
            listener: Mutex::new(None),
        }
    }

    fn publish(&self, event: BackplaneEvent) {
        debug!(origin = self.origin, ?event, "backplane publish");
        self.hub.publish(Envelope {
            origin: self.origin,
            event,
        });
    }
}

impl Backplane for ChannelBackplane {
    fn notify_change(&self, key: &str, region: Option<&str>, action: ChangeAction) {
        self.publish(BackplaneEvent::Change {
            key: key.to_owned(),
            region: region.map(str::to_owned),
            action,
        });
    }

    fn notify_remove(&self, key: &str, region: Option<&str>) {
        self.publish(BackplaneEvent::Remove {
            key: key.to_owned(),
            region: region.map(str::to_owned),
        });
    }

    fn notify_clear(&self) {
        self.publish(BackplaneEvent::Clear);
    }

    fn notify_clear_region(&self, region: &str) {
        self.publish(BackplaneEvent::ClearRegion {
            region: region.to_owned(),
        });
    }

    fn subscribe(&self, listener: BackplaneListener) {
        self.close();

        let events = self.hub.attach();
        let (stop_sender, stop_receiver) = unbounded::<()>();
        let origin = self.origin;
        let thread = thread::spawn(move || loop {
            select! {
                recv(events) -> message => match message {
                    Ok(envelope) => {
                        if envelope.origin != origin {
                            listener(envelope.event);
                        }
                    },
                    Err(_) => break,
                },
                recv(stop_receiver) -> _ => break,
            }
        });
        *self.listener.lock() = Some((stop_sender, thread));
    }

    fn close(&self) {
        if let Some((stop, thread)) = self.listener.lock().take() {
            let _ = stop.send(());
            // close() can be reached from the listener thread itself when the
            // last cache reference dies inside a callback; joining would then
            // deadlock. The stop message alone ends the loop in that case.
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for ChannelBackplane {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn collecting_subscriber(backplane: &ChannelBackplane) -> Receiver<BackplaneEvent> {
        let (sender, receiver) = unbounded();
        backplane.subscribe(Box::new(move |event| {
            let _ = sender.send(event);
        }));
        receiver
    }

    #[test]
    fn events_reach_other_instances() {
        let hub = BackplaneHub::new();
        let publisher = ChannelBackplane::new(hub.clone());
        let subscriber = ChannelBackplane::new(hub);
        let received = collecting_subscriber(&subscriber);

        publisher.notify_change("k", Some("r"), ChangeAction::Put);
        let event = received.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(
            event,
            BackplaneEvent::Change {
                key: "k".to_owned(),
                region: Some("r".to_owned()),
                action: ChangeAction::Put,
            },
        );
    }

    #[test]
    fn own_publishes_are_filtered() {
        let hub = BackplaneHub::new();
        let backplane = ChannelBackplane::new(hub);
        let received = collecting_subscriber(&backplane);

        backplane.notify_clear();
        assert!(received.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn all_event_kinds_round_trip() {
        let hub = BackplaneHub::new();
        let publisher = ChannelBackplane::new(hub.clone());
        let subscriber = ChannelBackplane::new(hub);
        let received = collecting_subscriber(&subscriber);

        publisher.notify_change("a", None, ChangeAction::Add);
        publisher.notify_remove("b", Some("r"));
        publisher.notify_clear();
        publisher.notify_clear_region("r");

        let timeout = Duration::from_secs(1);
        assert_eq!(
            received.recv_timeout(timeout).unwrap(),
            BackplaneEvent::Change {
                key: "a".to_owned(),
                region: None,
                action: ChangeAction::Add,
            },
        );
        assert_eq!(
            received.recv_timeout(timeout).unwrap(),
            BackplaneEvent::Remove {
                key: "b".to_owned(),
                region: Some("r".to_owned()),
            },
        );
        assert_eq!(received.recv_timeout(timeout).unwrap(), BackplaneEvent::Clear);
        assert_eq!(
            received.recv_timeout(timeout).unwrap(),
            BackplaneEvent::ClearRegion {
                region: "r".to_owned(),
            },
        );
    }

    #[test]
    fn close_stops_delivery() {
        let hub = BackplaneHub::new();
        let publisher = ChannelBackplane::new(hub.clone());
        let subscriber = ChannelBackplane::new(hub);
        let received = collecting_subscriber(&subscriber);

        subscriber.close();
        publisher.notify_clear();
        assert!(received.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn resubscription_replaces_listener() {
        let hub = BackplaneHub::new();
        let publisher = ChannelBackplane::new(hub.clone());
        let subscriber = ChannelBackplane::new(hub);

        let first = collecting_subscriber(&subscriber);
        let second = collecting_subscriber(&subscriber);

        publisher.notify_clear();
        assert!(second.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(first.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
