use parking_lot::Mutex;
use pkg_constants::controller::{BACKOFF_BASE_MILLIS, BACKOFF_MAX_SECS};
use pkg_state::backoff::Backoff;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Deduplicating work queue with per-item mutual exclusion.
///
/// An item is either queued, being processed, or both (it was added again
/// while a worker held it). `get` never hands out an item that is being
/// processed; such an item is queued again when its worker calls `done`.
/// At most one delayed add is pending per item, at the earliest deadline
/// asked for.
pub struct WorkQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

struct Shared<T> {
    state: Mutex<State<T>>,
    notify: Notify,
    backoff: Backoff,
}

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    waiting: HashMap<T, Instant>,
    shutting_down: bool,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new() -> Self {
        Self::with_backoff(Backoff::new(
            Duration::from_millis(BACKOFF_BASE_MILLIS),
            Duration::from_secs(BACKOFF_MAX_SECS),
        ))
    }

    pub fn with_backoff(backoff: Backoff) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.shared.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        drop(state);
        self.shared.notify.notify_one();
    }

    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&item).is_some_and(|pending| *pending <= deadline) {
                return;
            }
            state.waiting.insert(item.clone(), deadline);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let due = {
                let mut state = queue.shared.state.lock();
                // Superseded by an earlier deadline that already fired or is pending.
                if state.waiting.get(&item) == Some(&deadline) {
                    state.waiting.remove(&item);
                    true
                } else {
                    false
                }
            };
            if due {
                queue.add(item);
            }
        });
    }

    /// Items with a delayed add still pending.
    pub fn num_waiting(&self) -> usize {
        self.shared.state.lock().waiting.len()
    }

    /// Requeue after the item's next backoff step.
    pub fn add_rate_limited(&self, item: T) {
        self.add_rate_limited_after(item, Duration::ZERO);
    }

    /// Like `add_rate_limited`, but waiting at least `min_delay`.
    pub fn add_rate_limited_after(&self, item: T, min_delay: Duration) {
        let attempt = {
            let mut state = self.shared.state.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            *failures += 1;
            *failures - 1
        };
        let delay = self.shared.backoff.delay(attempt).max(min_delay);
        self.add_after(item, delay);
    }

    /// Clear the item's failure history.
    pub fn forget(&self, item: &T) {
        self.shared.state.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.shared
            .state
            .lock()
            .failures
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    /// Wait for the next item. Returns `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.shared.state.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
            }
            notified.await;
        }
    }

    /// Release an item handed out by `get`.
    pub fn done(&self, item: &T) {
        let mut state = self.shared.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.shared.notify.notify_one();
        }
    }

    /// Stop handing out items and wake every waiting worker.
    pub fn shut_down(&self) {
        self.shared.state.lock().shutting_down = true;
        self.shared.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    /// Items waiting to be handed out.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deduplicates_queued_items() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        assert_eq!(q.get().await, Some("a"));
        assert_eq!(q.get().await, Some("b"));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn item_added_while_processing_waits_for_done() {
        let q = WorkQueue::new();
        q.add("a");
        let item = q.get().await.unwrap();
        q.add("a");
        q.add("a");
        // Held by a worker, so not handed out again yet.
        assert!(q.is_empty());
        q.done(&item);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await, Some("a"));
    }

    #[tokio::test]
    async fn rate_limited_requeues_are_counted() {
        let q = WorkQueue::with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(4)));
        q.add_rate_limited("a");
        q.add_rate_limited("a");
        assert_eq!(q.num_requeues(&"a"), 2);
        let got = tokio::time::timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some("a"));
        q.forget(&"a");
        assert_eq!(q.num_requeues(&"a"), 0);
    }

    #[tokio::test]
    async fn delayed_adds_keep_only_the_earliest() {
        let q = WorkQueue::new();
        q.add_after("a", Duration::from_millis(30));
        q.add_after("a", Duration::from_millis(120));
        q.add_after("a", Duration::from_millis(60));
        assert_eq!(q.num_waiting(), 1);

        let got = tokio::time::timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some("a"));
        q.done(&"a");
        assert_eq!(q.num_waiting(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn earlier_delayed_add_replaces_a_later_one() {
        let q = WorkQueue::new();
        q.add_after("a", Duration::from_secs(30));
        q.add_after("a", Duration::from_millis(10));
        let got = tokio::time::timeout(Duration::from_secs(1), q.get()).await.unwrap();
        assert_eq!(got, Some("a"));
    }

    #[tokio::test]
    async fn shut_down_releases_waiters() {
        let q: WorkQueue<&str> = WorkQueue::new();
        let waiter = {
            let q = q.clone();
            tokio::spawn(async move { q.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.shut_down();
        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(got, None);
        q.add("late");
        assert!(q.is_empty());
    }
}
