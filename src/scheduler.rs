use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tracing::trace;

use crate::config::Category;
use crate::registry::BucketRegistry;

/// Caller-assigned urgency. Lower ordinal is served first; within one level
/// requests are served strictly in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Normal,
    Low,
}

impl Priority {
    pub(crate) const LEVELS: usize = 4;

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::Critical => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
        }
    }
}

/// Outcome of handing a request to the scheduler.
pub(crate) enum Submission {
    /// Capacity was available and the queue was idle; buckets are debited.
    Admitted,
    /// The request is parked; await the ticket for admission.
    Parked(Ticket),
}

/// Handle for one parked request. Receiving on `rx` means the buckets have
/// been debited and the call may proceed.
pub(crate) struct Ticket {
    pub seq: u64,
    pub priority: Priority,
    pub rx: oneshot::Receiver<()>,
}

struct Waiter {
    seq: u64,
    categories: Vec<Category>,
    cost: u32,
    tx: oneshot::Sender<()>,
}

struct Inner {
    /// One FIFO per priority level; FIFO order within a level is structural.
    queues: [VecDeque<Waiter>; Priority::LEVELS],
    next_seq: u64,
}

impl Inner {
    fn is_idle(&self) -> bool {
        self.queues.iter().all(VecDeque::is_empty)
    }
}

/// Priority queue of pending requests plus the wakeup handle for the
/// dispatch loop. The queue exclusively owns parked requests; callers keep
/// only a [`Ticket`] to await or cancel.
pub(crate) struct Scheduler {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queues: std::array::from_fn(|_| VecDeque::new()),
                next_seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Admits immediately when nothing is queued and every bucket has
    /// capacity; otherwise parks the request. A non-empty queue always forces
    /// parking, so fresh arrivals can never overtake queued work of equal or
    /// higher priority.
    pub(crate) fn submit(
        &self,
        registry: &BucketRegistry,
        categories: &[Category],
        cost: u32,
        priority: Priority,
        now: Instant,
    ) -> Submission {
        let mut inner = self.lock();
        if inner.is_idle() && registry.try_admit(categories, cost, now) {
            return Submission::Admitted;
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let (tx, rx) = oneshot::channel();
        inner.queues[priority.index()].push_back(Waiter {
            seq,
            categories: categories.to_vec(),
            cost,
            tx,
        });
        drop(inner);

        trace!(seq, ?priority, "request parked");
        self.notify.notify_one();
        Submission::Parked(Ticket { seq, priority, rx })
    }

    /// Removes a still-queued request. Returns false when the request is no
    /// longer queued (already admitted or already removed); removal happens
    /// exactly once.
    pub(crate) fn cancel(&self, seq: u64, priority: Priority) -> bool {
        let mut inner = self.lock();
        let queue = &mut inner.queues[priority.index()];
        if let Some(pos) = queue.iter().position(|w| w.seq == seq) {
            queue.remove(pos);
            trace!(seq, ?priority, "request removed from queue");
            true
        } else {
            false
        }
    }

    /// One dispatch tick: scans the queues in strict priority order, head to
    /// tail, admitting every candidate the registry accepts. A woken waiter
    /// whose caller has vanished gets its debit refunded.
    pub(crate) fn dispatch(&self, registry: &BucketRegistry, now: Instant) {
        let mut inner = self.lock();
        for queue in inner.queues.iter_mut() {
            let mut index = 0;
            while index < queue.len() {
                let waiter = &queue[index];
                if registry.try_admit(&waiter.categories, waiter.cost, now) {
                    if let Some(waiter) = queue.remove(index) {
                        trace!(seq = waiter.seq, "request admitted");
                        if waiter.tx.send(()).is_err() {
                            registry.refund(&waiter.categories, waiter.cost);
                        }
                    }
                } else {
                    index += 1;
                }
            }
        }
    }

    /// Resolves when a request has been enqueued since the last dispatch.
    pub(crate) async fn woken(&self) {
        self.notify.notified().await;
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        let inner = self.lock();
        inner.queues.iter().map(VecDeque::len).sum()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoryLimit, GateConfig};
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn registry(capacity: u32) -> (BucketRegistry, Instant) {
        let now = Instant::now();
        let mut limits = BTreeMap::new();
        limits.insert(
            Category::global(),
            CategoryLimit::new(capacity, Duration::from_secs(1)),
        );
        let config = GateConfig::new(limits);
        (BucketRegistry::new(&config, now), now)
    }

    fn park(
        scheduler: &Scheduler,
        registry: &BucketRegistry,
        priority: Priority,
        now: Instant,
    ) -> Ticket {
        match scheduler.submit(registry, &[Category::global()], 1, priority, now) {
            Submission::Parked(ticket) => ticket,
            Submission::Admitted => panic!("expected the request to park"),
        }
    }

    #[test]
    fn test_idle_queue_with_capacity_admits_immediately() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(matches!(
            scheduler.submit(&registry, &[Category::global()], 1, Priority::Normal, now),
            Submission::Admitted
        ));
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[test]
    fn test_exhausted_bucket_parks_the_request() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 1, now));
        let ticket = park(&scheduler, &registry, Priority::Normal, now);
        assert_eq!(ticket.priority, Priority::Normal);
        assert_eq!(scheduler.queued_len(), 1);
    }

    #[test]
    fn test_nonempty_queue_forces_new_arrivals_to_park() {
        let (registry, now) = registry(2);
        let scheduler = Scheduler::new();

        // Drain capacity, park one request, then refill: a fresh arrival must
        // still park behind the queued one.
        assert!(registry.try_admit(&[Category::global()], 2, now));
        let _queued = park(&scheduler, &registry, Priority::Normal, now);

        let refilled = now + Duration::from_secs(1);
        assert!(matches!(
            scheduler.submit(&registry, &[Category::global()], 1, Priority::Normal, refilled),
            Submission::Parked(_)
        ));
        assert_eq!(scheduler.queued_len(), 2);
    }

    #[test]
    fn test_critical_is_dispatched_before_normal_for_a_single_slot() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 1, now));
        let mut normal = park(&scheduler, &registry, Priority::Normal, now);
        let mut critical = park(&scheduler, &registry, Priority::Critical, now);

        // One refill window opens exactly one slot.
        scheduler.dispatch(&registry, now + Duration::from_secs(1));

        assert!(critical.rx.try_recv().is_ok());
        assert!(normal.rx.try_recv().is_err());
        assert_eq!(scheduler.queued_len(), 1);
    }

    #[test]
    fn test_fifo_within_a_priority_level() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 1, now));
        let mut first = park(&scheduler, &registry, Priority::Normal, now);
        let mut second = park(&scheduler, &registry, Priority::Normal, now);

        scheduler.dispatch(&registry, now + Duration::from_secs(1));
        assert!(first.rx.try_recv().is_ok());
        assert!(second.rx.try_recv().is_err());

        scheduler.dispatch(&registry, now + Duration::from_secs(2));
        assert!(second.rx.try_recv().is_ok());
    }

    #[test]
    fn test_dispatch_drains_every_admissible_candidate() {
        let (registry, now) = registry(3);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 3, now));
        let mut tickets = vec![
            park(&scheduler, &registry, Priority::Normal, now),
            park(&scheduler, &registry, Priority::Normal, now),
            park(&scheduler, &registry, Priority::Low, now),
        ];

        scheduler.dispatch(&registry, now + Duration::from_secs(1));
        for ticket in tickets.iter_mut() {
            assert!(ticket.rx.try_recv().is_ok());
        }
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[test]
    fn test_cancel_removes_exactly_once() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 1, now));
        let ticket = park(&scheduler, &registry, Priority::High, now);

        assert!(scheduler.cancel(ticket.seq, ticket.priority));
        assert!(!scheduler.cancel(ticket.seq, ticket.priority));
        assert_eq!(scheduler.queued_len(), 0);
    }

    #[test]
    fn test_dropped_caller_gets_refunded_on_dispatch() {
        let (registry, now) = registry(1);
        let scheduler = Scheduler::new();

        assert!(registry.try_admit(&[Category::global()], 1, now));
        let ticket = park(&scheduler, &registry, Priority::Normal, now);
        drop(ticket.rx);

        let refilled = now + Duration::from_secs(1);
        scheduler.dispatch(&registry, refilled);

        // The waiter was admitted but nobody was listening; its token must
        // come back so live traffic is not starved.
        assert!(registry.try_admit(&[Category::global()], 1, refilled));
    }

    #[test]
    fn test_skip_ahead_when_head_categories_are_exhausted() {
        let now = Instant::now();
        let mut limits = BTreeMap::new();
        limits.insert(Category::global(), CategoryLimit::new(10, Duration::from_secs(1)));
        limits.insert(Category::catalog(), CategoryLimit::new(1, Duration::from_secs(60)));
        let registry = BucketRegistry::new(&GateConfig::new(limits), now);
        let scheduler = Scheduler::new();

        // Exhaust CATALOG so the head waiter cannot be admitted.
        assert!(registry.try_admit(&[Category::catalog()], 1, now));

        let head = match scheduler.submit(
            &registry,
            &[Category::global(), Category::catalog()],
            1,
            Priority::Normal,
            now,
        ) {
            Submission::Parked(t) => t,
            Submission::Admitted => panic!("CATALOG should be empty"),
        };
        let mut tail = park(&scheduler, &registry, Priority::Normal, now);

        scheduler.dispatch(&registry, now + Duration::from_secs(1));

        // GLOBAL-only waiter proceeds; the CATALOG-bound head keeps waiting.
        assert!(tail.rx.try_recv().is_ok());
        assert!(scheduler.cancel(head.seq, head.priority));
    }
}
