//! # Hub — Per-Task Publish/Subscribe Fan-Out
//!
//! Delivers every [`TaskEvent`] published for a task id to every subscriber
//! currently attached to that id, in publish order. With nobody attached the
//! event goes into that id's mailbox instead, and the next subscriber to
//! attach is replayed the whole backlog before anything newer.
//!
//! ## Architecture
//! ```text
//! publish(id, ev)
//!     │
//!     ├─ topic[id] has subscribers ──► try_send → [queue 1] ──► transport 1
//!     │                              └ try_send → [queue 2] ──► transport 2
//!     │
//!     └─ topic[id] has none ─────────► mailbox[id].push(ev)
//! ```
//!
//! ## Rules
//! - **Per-id locking**: the outer map lock is held only to find or create a
//!   topic; all delivery happens under that topic's own lock, so a busy id
//!   never serializes unrelated ids.
//! - **Non-blocking publish**: each subscriber has a bounded queue fed with
//!   `try_send`. A full queue (subscriber too slow) or a closed one (transport
//!   gone) evicts that subscriber only; the rest still receive the event.
//! - **Per-subscriber FIFO**: replay happens under the topic lock at attach
//!   time, so the backlog always precedes newer events.
//! - **Bounded mailbox**: on overflow the oldest buffered PROGRESS event is
//!   dropped and counted. STARTED and terminal events are never evicted, so a
//!   late subscriber always sees the run open and close.
//! - **All-or-nothing replay**: the backlog is cleared only once a subscriber
//!   has taken all of it. A subscriber without room for the backlog is
//!   refused and the backlog stays for the next one.
//! - **One run per mailbox**: [`Hub::reset`] discards an id's backlog when the
//!   id is reused for a new run.
//! - **Retention**: a mailbox nobody ever reads lives until the id is reset or
//!   the process exits, so REST-only clients leave up to `mailbox_capacity`
//!   events per task behind.
//! - **Non-owning**: the hub keeps only the sending half. The transport owns
//!   the receiver, and dropping it is enough to detach lazily.
//!
//! Lock order is outer map → topic, never the reverse.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::events::TaskEvent;
use crate::lock_or_recover;

pub type SubscriberId = u64;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// The hub's handle on one observer: an id plus the sending half of its queue.
#[derive(Clone, Debug)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<TaskEvent>>,
}

impl Subscriber {
    /// New subscriber with a bounded queue of `capacity` (minimum 1).
    pub fn channel(capacity: usize) -> (Subscriber, mpsc::Receiver<Arc<TaskEvent>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
        (Subscriber { id, tx }, rx)
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Receiving side handed back by [`Hub::subscribe`].
pub struct Subscription {
    pub id: SubscriberId,
    pub rx: mpsc::Receiver<Arc<TaskEvent>>,
}

/// Events produced for a task while it had no subscribers.
#[derive(Debug)]
pub(crate) struct Mailbox {
    events: VecDeque<Arc<TaskEvent>>,
    capacity: usize,
    dropped: u64,
}

impl Mailbox {
    pub fn new(capacity: usize) -> Self {
        Mailbox {
            events: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
        }
    }

    /// Append, evicting the oldest PROGRESS entry when full (the oldest entry
    /// of any kind if none is PROGRESS). Returns true if one was evicted.
    pub fn push(&mut self, event: Arc<TaskEvent>) -> bool {
        let overflow = self.events.len() >= self.capacity;
        if overflow {
            let victim = self
                .events
                .iter()
                .position(|e| matches!(**e, TaskEvent::Progress { .. }))
                .unwrap_or(0);
            self.events.remove(victim);
            self.dropped += 1;
        }
        self.events.push_back(event);
        overflow
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Default)]
struct Topic {
    subscribers: Vec<Subscriber>,
    mailbox: Option<Mailbox>,
    /// Set once the topic has been unlinked from the map; holders must re-fetch.
    retired: bool,
}

impl Topic {
    fn is_idle(&self) -> bool {
        self.subscribers.is_empty() && self.mailbox.is_none()
    }
}

/// Outcome of one [`Hub::publish`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Sent to this many subscribers.
    Delivered(usize),
    /// Nobody took it; it is in the mailbox.
    Buffered,
}

struct HubInner {
    topics: Mutex<HashMap<String, Arc<Mutex<Topic>>>>,
    mailbox_capacity: usize,
    subscriber_capacity: usize,
}

/// Cheap to clone; every clone shares the same topics.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Hub {
    pub fn new(mailbox_capacity: usize, subscriber_capacity: usize) -> Self {
        Hub {
            inner: Arc::new(HubInner {
                topics: Mutex::new(HashMap::new()),
                mailbox_capacity: mailbox_capacity.max(1),
                subscriber_capacity: subscriber_capacity.max(1),
            }),
        }
    }

    fn topic(&self, task_id: &str) -> Arc<Mutex<Topic>> {
        let mut topics = lock_or_recover(&self.inner.topics);
        Arc::clone(topics.entry(task_id.to_string()).or_default())
    }

    /// Run `f` on the live topic for `task_id`, retrying if it was retired
    /// between lookup and lock.
    fn with_topic<R>(&self, task_id: &str, mut f: impl FnMut(&mut Topic) -> R) -> R {
        loop {
            let topic = self.topic(task_id);
            let mut guard = lock_or_recover(&topic);
            if guard.retired {
                continue;
            }
            return f(&mut guard);
        }
    }

    /// Unlink the topic for `task_id` if it has neither subscribers nor a backlog.
    fn prune(&self, task_id: &str) {
        let mut topics = lock_or_recover(&self.inner.topics);
        let idle = match topics.get(task_id) {
            Some(topic) => {
                let mut guard = lock_or_recover(topic);
                if guard.is_idle() {
                    guard.retired = true;
                    true
                } else {
                    false
                }
            }
            None => false,
        };
        if idle {
            topics.remove(task_id);
        }
    }

    /// Create a subscriber with the configured queue depth and attach it.
    pub fn subscribe(&self, task_id: &str) -> Subscription {
        let (subscriber, rx) = Subscriber::channel(self.inner.subscriber_capacity);
        let id = subscriber.id();
        self.attach(task_id, subscriber);
        Subscription { id, rx }
    }

    /// Register `subscriber` for `task_id`, then replay and discard any backlog.
    ///
    /// Returns the number of replayed events. A subscriber that cannot take
    /// the whole backlog is not attached, and the backlog is kept intact.
    pub fn attach(&self, task_id: &str, subscriber: Subscriber) -> usize {
        let replayed = self.with_topic(task_id, |topic| {
            let mut replayed = 0;
            if let Some(mailbox) = topic.mailbox.as_ref() {
                if subscriber.tx.capacity() < mailbox.len() {
                    warn!(
                        task_id,
                        subscriber = subscriber.id,
                        backlog = mailbox.len(),
                        room = subscriber.tx.capacity(),
                        "subscriber has no room for backlog, refusing it"
                    );
                    return None;
                }
                for event in mailbox.events.iter() {
                    if let Err(e) = subscriber.tx.try_send(Arc::clone(event)) {
                        warn!(
                            task_id,
                            subscriber = subscriber.id,
                            error = %e,
                            "subscriber could not take backlog, refusing it"
                        );
                        return None;
                    }
                    replayed += 1;
                }
                if mailbox.dropped() > 0 {
                    warn!(
                        task_id,
                        dropped = mailbox.dropped(),
                        "mailbox overflowed before first subscriber attached"
                    );
                }
            }
            topic.mailbox = None;
            topic.subscribers.push(subscriber.clone());
            Some(replayed)
        });
        match replayed {
            Some(n) => {
                debug!(task_id, subscriber = subscriber.id, replayed = n, "subscriber attached");
                n
            }
            None => {
                self.prune(task_id);
                0
            }
        }
    }

    /// Discard the backlog of `task_id` ahead of a new run under the same id.
    /// Attached subscribers stay. Returns how many buffered events were dropped.
    pub fn reset(&self, task_id: &str) -> usize {
        let Some(topic) = lock_or_recover(&self.inner.topics).get(task_id).cloned() else {
            return 0;
        };
        // A retired topic was idle, so it had no backlog to discard.
        let discarded = lock_or_recover(&topic)
            .mailbox
            .take()
            .map_or(0, |m| m.len());
        if discarded > 0 {
            debug!(task_id, discarded, "stale backlog discarded");
        }
        self.prune(task_id);
        discarded
    }

    /// Remove one subscriber from `task_id`. Returns whether it was attached.
    pub fn detach(&self, task_id: &str, id: SubscriberId) -> bool {
        let removed = self.with_topic(task_id, |topic| {
            let before = topic.subscribers.len();
            topic.subscribers.retain(|s| s.id != id);
            topic.subscribers.len() != before
        });
        self.prune(task_id);
        if removed {
            debug!(task_id, subscriber = id, "subscriber detached");
        }
        removed
    }

    /// Remove a subscriber from every topic it belongs to. Returns how many.
    pub fn disconnect(&self, id: SubscriberId) -> usize {
        let topics: Vec<(String, Arc<Mutex<Topic>>)> = lock_or_recover(&self.inner.topics)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect();
        let mut removed_from = Vec::new();
        for (task_id, topic) in topics {
            let mut guard = lock_or_recover(&topic);
            if guard.retired {
                continue;
            }
            let before = guard.subscribers.len();
            guard.subscribers.retain(|s| s.id != id);
            if guard.subscribers.len() != before {
                removed_from.push(task_id);
            }
        }
        for task_id in &removed_from {
            self.prune(task_id);
        }
        removed_from.len()
    }

    /// Fan `event` out to every subscriber of `task_id`, or buffer it.
    ///
    /// Never blocks and never fails: subscribers that cannot take the event
    /// are evicted and logged. If every subscriber was evicted the event is
    /// buffered as though none had been attached.
    pub fn publish(&self, task_id: &str, event: TaskEvent) -> Delivery {
        let event = Arc::new(event);
        let capacity = self.inner.mailbox_capacity;
        self.with_topic(task_id, |topic| {
            let mut delivered = 0;
            topic.subscribers.retain(|s| match s.tx.try_send(Arc::clone(&event)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(task_id, subscriber = s.id, "subscriber queue full, evicting");
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(task_id, subscriber = s.id, "subscriber gone, evicting");
                    false
                }
            });
            if delivered > 0 {
                return Delivery::Delivered(delivered);
            }
            let mailbox = topic.mailbox.get_or_insert_with(|| Mailbox::new(capacity));
            if mailbox.push(Arc::clone(&event)) && mailbox.dropped() == 1 {
                warn!(task_id, capacity, "mailbox full, dropping oldest events");
            }
            Delivery::Buffered
        })
    }

    pub fn subscriber_count(&self, task_id: &str) -> usize {
        self.peek(task_id, |t| t.subscribers.len()).unwrap_or(0)
    }

    pub fn mailbox_len(&self, task_id: &str) -> usize {
        self.peek(task_id, |t| t.mailbox.as_ref().map_or(0, Mailbox::len))
            .unwrap_or(0)
    }

    pub fn has_mailbox(&self, task_id: &str) -> bool {
        self.peek(task_id, |t| t.mailbox.is_some()).unwrap_or(false)
    }

    pub fn topic_count(&self) -> usize {
        lock_or_recover(&self.inner.topics).len()
    }

    fn peek<R>(&self, task_id: &str, f: impl FnOnce(&Topic) -> R) -> Option<R> {
        let topic = lock_or_recover(&self.inner.topics).get(task_id).cloned()?;
        let guard = lock_or_recover(&topic);
        Some(f(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(task_id: &str, pct: u8) -> TaskEvent {
        TaskEvent::Progress {
            task_id: task_id.into(),
            progress: pct,
            current_combination: format!("c{}", pct),
            combinations_per_second: 0,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<TaskEvent>>) -> Vec<TaskEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push((*ev).clone());
        }
        out
    }

    // ── Mailbox ─────────────────────────────────────────────────────

    #[test]
    fn publish_without_subscribers_buffers() {
        let hub = Hub::new(16, 16);
        assert!(!hub.has_mailbox("t"));
        assert_eq!(hub.publish("t", progress("t", 1)), Delivery::Buffered);
        assert_eq!(hub.publish("t", progress("t", 2)), Delivery::Buffered);
        assert!(hub.has_mailbox("t"));
        assert_eq!(hub.mailbox_len("t"), 2);
    }

    #[test]
    fn attach_replays_backlog_in_order_then_drains() {
        let hub = Hub::new(16, 16);
        for pct in 1..=3 {
            hub.publish("t", progress("t", pct));
        }
        let mut sub = hub.subscribe("t");
        hub.publish("t", progress("t", 4));
        let got = drain(&mut sub.rx);
        assert_eq!(
            got,
            vec![progress("t", 1), progress("t", 2), progress("t", 3), progress("t", 4)]
        );
        assert!(!hub.has_mailbox("t"));
    }

    #[test]
    fn mailbox_overflow_drops_oldest() {
        let hub = Hub::new(2, 16);
        for pct in 1..=4 {
            hub.publish("t", progress("t", pct));
        }
        assert_eq!(hub.mailbox_len("t"), 2);
        let mut sub = hub.subscribe("t");
        assert_eq!(drain(&mut sub.rx), vec![progress("t", 3), progress("t", 4)]);
    }

    fn started(task_id: &str) -> TaskEvent {
        TaskEvent::Started {
            task_id: task_id.into(),
            hash_type: "md5".into(),
            charset_length: 2,
            max_length: 3,
        }
    }

    fn completed(task_id: &str, result: &str) -> TaskEvent {
        TaskEvent::Completed {
            task_id: task_id.into(),
            result: result.into(),
            elapsed_time: "00:00:01".into(),
        }
    }

    #[test]
    fn mailbox_overflow_keeps_started_and_terminal() {
        let hub = Hub::new(3, 16);
        hub.publish("t", started("t"));
        for pct in 1..=5 {
            hub.publish("t", progress("t", pct));
        }
        hub.publish("t", completed("t", "ab"));
        let mut sub = hub.subscribe("t");
        assert_eq!(
            drain(&mut sub.rx),
            vec![started("t"), progress("t", 5), completed("t", "ab")]
        );
    }

    #[test]
    fn subscriber_without_room_leaves_backlog_intact() {
        let hub = Hub::new(16, 16);
        for pct in 1..=3 {
            hub.publish("t", progress("t", pct));
        }
        let (small, mut small_rx) = Subscriber::channel(1);
        assert_eq!(hub.attach("t", small), 0);
        assert!(small_rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count("t"), 0);
        assert_eq!(hub.mailbox_len("t"), 3);

        let mut late = hub.subscribe("t");
        assert_eq!(
            drain(&mut late.rx),
            vec![progress("t", 1), progress("t", 2), progress("t", 3)]
        );
    }

    #[test]
    fn closed_subscriber_leaves_backlog_intact() {
        let hub = Hub::new(16, 16);
        hub.publish("t", progress("t", 1));
        let (gone, gone_rx) = Subscriber::channel(16);
        drop(gone_rx);
        assert_eq!(hub.attach("t", gone), 0);
        assert_eq!(hub.mailbox_len("t"), 1);
        let mut late = hub.subscribe("t");
        assert_eq!(drain(&mut late.rx), vec![progress("t", 1)]);
    }

    #[test]
    fn reset_discards_previous_run_backlog() {
        let hub = Hub::new(16, 16);
        hub.publish("t", started("t"));
        hub.publish("t", completed("t", "a"));
        assert_eq!(hub.reset("t"), 2);
        assert_eq!(hub.topic_count(), 0);
        assert_eq!(hub.reset("t"), 0);

        hub.publish("t", started("t"));
        hub.publish("t", completed("t", "bb"));
        let mut sub = hub.subscribe("t");
        assert_eq!(drain(&mut sub.rx), vec![started("t"), completed("t", "bb")]);
    }

    #[test]
    fn reset_keeps_attached_subscribers() {
        let hub = Hub::new(16, 16);
        let mut sub = hub.subscribe("t");
        assert_eq!(hub.reset("t"), 0);
        assert_eq!(hub.publish("t", started("t")), Delivery::Delivered(1));
        assert_eq!(drain(&mut sub.rx), vec![started("t")]);
    }

    #[test]
    fn mailbox_push_reports_eviction() {
        let mut m = Mailbox::new(1);
        assert!(!m.push(Arc::new(progress("t", 1))));
        assert!(m.push(Arc::new(progress("t", 2))));
        assert_eq!(m.len(), 1);
        assert_eq!(m.dropped(), 1);
    }

    // ── Fan-Out ─────────────────────────────────────────────────────

    #[test]
    fn two_subscribers_see_identical_order() {
        let hub = Hub::new(16, 16);
        let mut a = hub.subscribe("t");
        let mut b = hub.subscribe("t");
        for pct in 1..=5 {
            assert_eq!(hub.publish("t", progress("t", pct)), Delivery::Delivered(2));
        }
        let got_a = drain(&mut a.rx);
        assert_eq!(got_a.len(), 5);
        assert_eq!(got_a, drain(&mut b.rx));
    }

    #[test]
    fn detaching_one_leaves_the_other() {
        let hub = Hub::new(16, 16);
        let a = hub.subscribe("t");
        let mut b = hub.subscribe("t");
        assert!(hub.detach("t", a.id));
        assert!(!hub.detach("t", a.id));
        assert_eq!(hub.publish("t", progress("t", 1)), Delivery::Delivered(1));
        assert_eq!(drain(&mut b.rx), vec![progress("t", 1)]);
    }

    #[test]
    fn events_buffer_again_after_last_detach() {
        let hub = Hub::new(16, 16);
        let mut a = hub.subscribe("t");
        hub.publish("t", progress("t", 1));
        hub.detach("t", a.id);
        assert!(!hub.has_mailbox("t"));
        hub.publish("t", progress("t", 2));
        assert_eq!(hub.mailbox_len("t"), 1);
        assert_eq!(drain(&mut a.rx), vec![progress("t", 1)]);
    }

    #[test]
    fn task_ids_are_isolated() {
        let hub = Hub::new(16, 16);
        let mut a = hub.subscribe("a");
        hub.publish("b", progress("b", 1));
        assert!(drain(&mut a.rx).is_empty());
        assert_eq!(hub.mailbox_len("b"), 1);
        assert_eq!(hub.mailbox_len("a"), 0);
    }

    // ── Failure Isolation ───────────────────────────────────────────

    #[test]
    fn closed_subscriber_is_evicted_others_still_served() {
        let hub = Hub::new(16, 16);
        let dead = hub.subscribe("t");
        let mut live = hub.subscribe("t");
        drop(dead.rx);
        assert_eq!(hub.publish("t", progress("t", 1)), Delivery::Delivered(1));
        assert_eq!(hub.subscriber_count("t"), 1);
        assert_eq!(drain(&mut live.rx), vec![progress("t", 1)]);
    }

    #[test]
    fn full_subscriber_is_evicted_without_blocking() {
        let hub = Hub::new(1, 1);
        let (slow, _slow_rx) = Subscriber::channel(1);
        hub.attach("t", slow);
        let mut fast = hub.subscribe("t");
        assert_eq!(hub.publish("t", progress("t", 1)), Delivery::Delivered(2));
        assert_eq!(drain(&mut fast.rx), vec![progress("t", 1)]);
        // slow never reads; its single slot is still taken
        assert_eq!(hub.publish("t", progress("t", 2)), Delivery::Delivered(1));
        assert_eq!(hub.subscriber_count("t"), 1);
        assert_eq!(drain(&mut fast.rx), vec![progress("t", 2)]);
    }

    #[test]
    fn event_is_buffered_when_every_subscriber_fails() {
        let hub = Hub::new(16, 16);
        let dead = hub.subscribe("t");
        drop(dead.rx);
        assert_eq!(hub.publish("t", progress("t", 1)), Delivery::Buffered);
        let mut late = hub.subscribe("t");
        assert_eq!(drain(&mut late.rx), vec![progress("t", 1)]);
    }

    #[test]
    fn disconnect_removes_from_every_topic() {
        let hub = Hub::new(16, 16);
        let (sub, _rx) = Subscriber::channel(16);
        let id = sub.id();
        hub.attach("a", sub.clone());
        hub.attach("b", sub);
        let _other = hub.subscribe("b");
        assert_eq!(hub.disconnect(id), 2);
        assert_eq!(hub.subscriber_count("a"), 0);
        assert_eq!(hub.subscriber_count("b"), 1);
        assert_eq!(hub.topic_count(), 1);
    }

    #[test]
    fn idle_topics_are_pruned() {
        let hub = Hub::new(16, 16);
        let s = hub.subscribe("t");
        assert_eq!(hub.topic_count(), 1);
        hub.detach("t", s.id);
        assert_eq!(hub.topic_count(), 0);
    }

    #[test]
    fn concurrent_publishers_on_distinct_ids() {
        let hub = Hub::new(10_000, 10_000);
        let subs: Vec<_> = (0..4).map(|i| hub.subscribe(&format!("t{}", i))).collect();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let hub = hub.clone();
                std::thread::spawn(move || {
                    let id = format!("t{}", i);
                    for pct in 0..100 {
                        hub.publish(&id, progress(&id, pct));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for (i, mut s) in subs.into_iter().enumerate() {
            let got = drain(&mut s.rx);
            assert_eq!(got.len(), 100);
            let id = format!("t{}", i);
            assert!(got.iter().all(|e| e.task_id() == id));
            assert!(got.windows(2).all(|w| match (&w[0], &w[1]) {
                (
                    TaskEvent::Progress { progress: a, .. },
                    TaskEvent::Progress { progress: b, .. },
                ) => a < b,
                _ => false,
            }));
        }
    }
}
