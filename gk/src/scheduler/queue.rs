//! Queue types for the scheduler

use std::cmp::Ordering;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::error::WorkError;
use super::handle::ResultSender;
use crate::domain::Priority;

/// One attempt of a unit of work
pub type WorkFuture<T> = BoxFuture<'static, Result<T, WorkError>>;

/// Re-invocable unit of work; each call starts a fresh attempt
pub type WorkFn<T> = Arc<dyn Fn() -> WorkFuture<T> + Send + Sync>;

/// Box a closure returning a future into a [`WorkFn`]
pub fn work_fn<T, F, Fut>(work: F) -> WorkFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, WorkError>> + Send + 'static,
{
    Arc::new(move || work().boxed())
}

/// Options accepted by `Scheduler::submit`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    pub priority: Priority,
    pub owner_id: Option<String>,
    pub dedupe_key: Option<String>,
}

impl SubmitOptions {
    pub fn new(priority: Priority) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn dedupe_key(mut self, key: impl Into<String>) -> Self {
        self.dedupe_key = Some(key.into());
        self
    }
}

/// A request waiting in, or re-entering, the priority queue
pub struct QueuedRequest<T> {
    pub id: Uuid,
    pub priority: Priority,
    pub work: WorkFn<T>,
    pub result: ResultSender<T>,
    /// Set once at admission and kept across retries
    pub enqueued_at: Instant,
    /// Admission order, breaks ties between equal timestamps
    pub seq: u64,
    pub retries: u32,
    pub owner_id: Option<String>,
    pub dedupe_key: Option<String>,
}

impl<T> Eq for QueuedRequest<T> {}

impl<T> PartialEq for QueuedRequest<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Ord for QueuedRequest<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier admission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for QueuedRequest<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Queue entry for status display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub priority: Priority,
    pub owner_id: Option<String>,
    pub retries: u32,
    #[serde(with = "duration_ms")]
    pub waiting: Duration,
}

/// Result of an operator `clear_queue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearResult {
    pub cleared: usize,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::handle::RequestHandle;
    use proptest::prelude::*;
    use std::collections::BinaryHeap;

    fn request(priority: Priority, enqueued_at: Instant, seq: u64) -> QueuedRequest<()> {
        let id = Uuid::now_v7();
        let (result, _handle) = RequestHandle::<()>::channel(id);
        QueuedRequest {
            id,
            priority,
            work: work_fn(|| async { Ok(()) }),
            result,
            enqueued_at,
            seq,
            retries: 0,
            owner_id: None,
            dedupe_key: None,
        }
    }

    #[test]
    fn test_higher_priority_is_greater() {
        let now = Instant::now();
        let high = request(Priority::High, now + Duration::from_secs(2), 2);
        let normal = request(Priority::Normal, now + Duration::from_secs(1), 1);
        let low = request(Priority::Low, now, 0);

        assert!(high > normal);
        assert!(normal > low);
    }

    #[test]
    fn test_same_priority_fifo() {
        let now = Instant::now();
        let first = request(Priority::Normal, now, 0);
        let second = request(Priority::Normal, now + Duration::from_millis(1), 1);

        // Earlier submission should come first (so it's "greater" in the heap)
        assert!(first > second);
    }

    #[test]
    fn test_equal_timestamps_fall_back_to_admission_order() {
        let now = Instant::now();
        let first = request(Priority::Normal, now, 7);
        let second = request(Priority::Normal, now, 8);
        assert!(first > second);
    }

    #[test]
    fn test_submit_options_builder() {
        let options = SubmitOptions::new(Priority::High).owner("user-1").dedupe_key("k");
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.owner_id.as_deref(), Some("user-1"));
        assert_eq!(options.dedupe_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_queue_entry_serializes_waiting_as_ms() {
        let entry = QueueEntry {
            id: Uuid::nil(),
            priority: Priority::Low,
            owner_id: None,
            retries: 1,
            waiting: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["waiting"], 1500);
        assert_eq!(json["priority"], "low");
    }

    fn priority_strategy() -> impl Strategy<Value = Priority> {
        prop_oneof![Just(Priority::Low), Just(Priority::Normal), Just(Priority::High)]
    }

    proptest! {
        #[test]
        fn prop_heap_pops_by_priority_then_age(
            items in prop::collection::vec((priority_strategy(), 0u64..50), 1..64)
        ) {
            let base = Instant::now();
            let mut heap = BinaryHeap::new();
            for (seq, (priority, offset_ms)) in items.iter().enumerate() {
                heap.push(request(*priority, base + Duration::from_millis(*offset_ms), seq as u64));
            }

            let mut popped = Vec::new();
            while let Some(item) = heap.pop() {
                popped.push((item.priority, item.enqueued_at, item.seq));
            }

            for pair in popped.windows(2) {
                let (p_a, t_a, s_a) = pair[0];
                let (p_b, t_b, s_b) = pair[1];
                prop_assert!(p_a >= p_b);
                if p_a == p_b {
                    prop_assert!((t_a, s_a) < (t_b, s_b));
                }
            }
        }
    }
}
