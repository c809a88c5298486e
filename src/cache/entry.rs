//! Cache Entry Types
//!
//! One cached value in the local store together with the bookkeeping the
//! eviction and expiry policies read.

use std::collections::BTreeSet;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

/// Set of tags attached to an entry
pub type TagSet = BTreeSet<String>;

/// Build a tag set from anything string-like
pub fn tags<I, S>(items: I) -> TagSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    items.into_iter().map(Into::into).collect()
}

/// Cache entry held by the local store
#[derive(Clone)]
pub struct CacheEntry {
    key: String,
    /// Serialized payload (zero-copy clones on hit)
    value: Bytes,
    created_at: Instant,
    last_accessed_at: Instant,
    /// `None` = no TTL
    expires_at: Option<Instant>,
    hit_count: u64,
    /// Fixed at insertion
    size_bytes: u64,
    tags: TagSet,
}

impl CacheEntry {
    /// Create a new entry stamped with the current time
    pub fn new(key: impl Into<String>, value: Bytes, ttl: Option<Duration>, tags: TagSet) -> Self {
        Self::new_at(key, value, ttl, tags, Instant::now())
    }

    /// Create a new entry stamped with `now`
    pub fn new_at(
        key: impl Into<String>,
        value: Bytes,
        ttl: Option<Duration>,
        tags: TagSet,
        now: Instant,
    ) -> Self {
        let size_bytes = value.len() as u64;
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
            hit_count: 0,
            size_bytes,
            tags,
        }
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the payload (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    #[inline]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    #[inline]
    pub fn last_accessed_at(&self) -> Instant {
        self.last_accessed_at
    }

    #[inline]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    #[inline]
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Whether the entry carries any of `tags`
    pub fn has_any_tag(&self, tags: &TagSet) -> bool {
        // Iterate the smaller set
        if self.tags.len() <= tags.len() {
            self.tags.iter().any(|t| tags.contains(t))
        } else {
            tags.iter().any(|t| self.tags.contains(t))
        }
    }

    /// An entry is expired once `now` reaches `expires_at`
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if now >= deadline)
    }

    /// Time since last access
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed_at)
    }

    /// Record a successful read and return the new hit count.
    ///
    /// `last_accessed_at` never moves backwards.
    pub fn record_hit(&mut self, now: Instant) -> u64 {
        if now > self.last_accessed_at {
            self.last_accessed_at = now;
        }
        self.hit_count += 1;
        self.hit_count
    }

    /// LRU ordering key: oldest access first, then oldest creation
    #[inline]
    pub fn lru_rank(&self) -> (Instant, Instant) {
        (self.last_accessed_at, self.created_at)
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.key)
            .field("size_bytes", &self.size_bytes)
            .field("hit_count", &self.hit_count)
            .field("tags", &self.tags)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ttl: Option<Duration>) -> CacheEntry {
        CacheEntry::new(
            "user:1",
            Bytes::from_static(b"{\"id\":1}"),
            ttl,
            tags(["users"]),
        )
    }

    #[test]
    fn test_entry_creation() {
        let e = entry(None);
        assert_eq!(e.key(), "user:1");
        assert_eq!(e.size_bytes(), 8);
        assert_eq!(e.hit_count(), 0);
        assert!(e.expires_at().is_none());
        assert_eq!(e.created_at(), e.last_accessed_at());
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let e = entry(None);
        assert!(!e.is_expired_at(Instant::now() + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_entry_expiry_boundary() {
        let now = Instant::now();
        let e = CacheEntry::new_at("k", Bytes::from_static(b"v"), Some(Duration::from_secs(1)), TagSet::new(), now);

        assert!(!e.is_expired_at(now + Duration::from_millis(999)));
        assert!(e.is_expired_at(now + Duration::from_secs(1)));
        assert!(e.is_expired_at(now + Duration::from_secs(2)));
    }

    #[test]
    fn test_record_hit_is_monotonic() {
        let now = Instant::now();
        let mut e = CacheEntry::new_at("k", Bytes::from_static(b"v"), None, TagSet::new(), now);

        let later = now + Duration::from_secs(5);
        assert_eq!(e.record_hit(later), 1);
        assert_eq!(e.last_accessed_at(), later);

        // An out-of-order clock reading never rewinds recency
        assert_eq!(e.record_hit(now), 2);
        assert_eq!(e.last_accessed_at(), later);
    }

    #[test]
    fn test_tag_intersection() {
        let e = CacheEntry::new("k", Bytes::new(), None, tags(["a", "b"]));
        assert!(e.has_any_tag(&tags(["b", "z"])));
        assert!(!e.has_any_tag(&tags(["x", "y", "z"])));
        assert!(!e.has_any_tag(&TagSet::new()));
    }

    #[test]
    fn test_lru_rank_orders_by_access_then_creation() {
        let now = Instant::now();
        let older = CacheEntry::new_at("a", Bytes::new(), None, TagSet::new(), now);
        let newer = CacheEntry::new_at("b", Bytes::new(), None, TagSet::new(), now + Duration::from_millis(1));
        assert!(older.lru_rank() < newer.lru_rank());
    }

    #[test]
    fn test_entry_debug() {
        let debug = format!("{:?}", entry(None));
        assert!(debug.contains("CacheEntry"));
        assert!(debug.contains("size_bytes"));
    }
}
