//! Short-window deduplication of identical submissions

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

use super::handle::RequestHandle;

/// Build a dedupe key as `owner:action:<xxh3 of content>`
///
/// Deterministic and cheap; collisions are unlikely enough for a cache that
/// lives a few seconds, but the hash is not cryptographic.
pub fn make_dedupe_key(owner_id: &str, action: &str, content: &str) -> String {
    format!("{}:{}:{:016x}", owner_id, action, xxh3_64(content.as_bytes()))
}

struct DedupEntry<T: Clone> {
    inserted_at: Instant,
    handle: RequestHandle<T>,
}

/// Maps dedupe keys to the handle of the request that first used them
///
/// Entries are served while younger than `window` and purged once older
/// than twice the window.
pub struct Deduplicator<T: Clone> {
    window: Duration,
    entries: HashMap<String, DedupEntry<T>>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        debug!(window_ms = window.as_millis() as u64, "Deduplicator::new: called");
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Handle of a fresh request registered under `key`
    pub fn lookup(&mut self, key: &str, now: Instant) -> Option<RequestHandle<T>> {
        self.purge(now);
        let entry = self.entries.get(key)?;
        if now.saturating_duration_since(entry.inserted_at) < self.window {
            debug!(%key, "Deduplicator::lookup: hit");
            Some(entry.handle.clone())
        } else {
            debug!(%key, "Deduplicator::lookup: stale entry");
            None
        }
    }

    pub fn register(&mut self, key: String, handle: RequestHandle<T>, now: Instant) {
        self.purge(now);
        self.entries.insert(key, DedupEntry { inserted_at: now, handle });
    }

    /// Drop the entry for `key` if it still points at request `id`
    pub fn forget(&mut self, key: &str, id: uuid::Uuid) {
        if self.entries.get(key).is_some_and(|e| e.handle.id() == id) {
            self.entries.remove(key);
        }
    }

    fn purge(&mut self, now: Instant) {
        let ttl = self.window * 2;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const WINDOW: Duration = Duration::from_secs(2);

    fn handle() -> RequestHandle<u32> {
        RequestHandle::<u32>::channel(Uuid::now_v7()).1
    }

    #[test]
    fn test_make_dedupe_key_is_deterministic() {
        let a = make_dedupe_key("user-1", "summarize", "hello world");
        let b = make_dedupe_key("user-1", "summarize", "hello world");
        assert_eq!(a, b);
        assert!(a.starts_with("user-1:summarize:"));
        assert_eq!(a.rsplit(':').next().unwrap().len(), 16);
    }

    #[test]
    fn test_make_dedupe_key_distinguishes_inputs() {
        let base = make_dedupe_key("user-1", "summarize", "hello world");
        assert_ne!(base, make_dedupe_key("user-2", "summarize", "hello world"));
        assert_ne!(base, make_dedupe_key("user-1", "translate", "hello world"));
        assert_ne!(base, make_dedupe_key("user-1", "summarize", "hello world!"));
    }

    #[test]
    fn test_lookup_within_window() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);
        let original = handle();
        dedup.register("k".to_string(), original.clone(), now);

        let hit = dedup.lookup("k", now + Duration::from_millis(1999)).unwrap();
        assert_eq!(hit.id(), original.id());
        assert!(dedup.lookup("other", now).is_none());
    }

    #[test]
    fn test_lookup_after_window_misses() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);
        dedup.register("k".to_string(), handle(), now);

        assert!(dedup.lookup("k", now + WINDOW).is_none());
        // Still retained until twice the window
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_entries_purged_after_twice_window() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);
        dedup.register("a".to_string(), handle(), now);
        dedup.register("b".to_string(), handle(), now + Duration::from_secs(3));

        assert!(dedup.lookup("zzz", now + Duration::from_secs(4)).is_none());
        assert_eq!(dedup.len(), 1);
        assert!(dedup.lookup("b", now + Duration::from_secs(4)).is_some());
    }

    #[test]
    fn test_register_replaces_stale_entry() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);
        dedup.register("k".to_string(), handle(), now);

        let later = now + Duration::from_millis(2500);
        assert!(dedup.lookup("k", later).is_none());
        let fresh = handle();
        dedup.register("k".to_string(), fresh.clone(), later);
        assert_eq!(dedup.lookup("k", later).unwrap().id(), fresh.id());
    }

    #[test]
    fn test_forget_only_matching_request() {
        let now = Instant::now();
        let mut dedup = Deduplicator::new(WINDOW);
        let original = handle();
        dedup.register("k".to_string(), original.clone(), now);

        dedup.forget("k", Uuid::now_v7());
        assert_eq!(dedup.len(), 1);

        dedup.forget("k", original.id());
        assert!(dedup.is_empty());
    }
}
