use lru_cache::LruCache;

use crate::statement::StatementDescription;

/// How the connection uses its statement cache.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CacheMode {
    /// Cache server-named prepared statements. A miss prepares the query
    /// under a generated name; execution then skips the `Parse` round-trip
    /// entirely.
    Prepare,

    /// Cache `Describe` results only, using the unnamed statement. No
    /// server-side names are created; the cached description spares the
    /// caller a describe round-trip when choosing parameter and result
    /// formats.
    Describe,
}

/// An LRU cache of prepared-statement descriptions, keyed by SQL text.
///
/// Eviction and invalidation never touch the server directly: evicted and
/// invalidated descriptions are parked on an *invalidated* list that the
/// connection drains at a safe point (the server refuses `DEALLOCATE`
/// inside a failed transaction, so freeing a server-side name must wait
/// for the session to return to idle).
pub struct StatementCache {
    inner: LruCache<String, StatementDescription>,
    invalidated: Vec<StatementDescription>,
    cap: usize,
}

impl StatementCache {
    /// Create a new cache with the given capacity; zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: LruCache::new(capacity.max(1)),
            invalidated: Vec::new(),
            cap: capacity,
        }
    }

    /// Look up the description for `sql`, promoting it to most recently
    /// used.
    pub fn get(&mut self, sql: &str) -> Option<&StatementDescription> {
        self.inner.get_mut(sql).map(|sd| &*sd)
    }

    /// Insert a description, evicting the least recently used entry onto
    /// the invalidated list if the cache is full.
    ///
    /// Panics if the description has no SQL text. A description whose SQL
    /// is on the not-yet-handled invalidated list is not inserted; the
    /// caller must drain invalidations first, or the server-side name
    /// of the invalidated predecessor could leak.
    pub fn put(&mut self, sd: StatementDescription) {
        assert!(!sd.sql.is_empty(), "cannot cache a statement with no SQL");

        if self.cap == 0 {
            self.invalidated.push(sd);
            return;
        }

        if self.invalidated.iter().any(|inv| inv.sql == sd.sql) {
            self.invalidated.push(sd);
            return;
        }

        if self.inner.contains_key(&sd.sql) {
            // replacing an entry invalidates its predecessor
            if let Some(old) = self.inner.remove(&sd.sql) {
                self.push_invalidated(old);
            }
        } else if self.inner.len() == self.inner.capacity() {
            if let Some((_, lru)) = self.inner.remove_lru() {
                self.push_invalidated(lru);
            }
        }

        self.inner.insert(sd.sql.clone(), sd);
    }

    /// Remove the entry for `sql`, if any, moving it to the invalidated
    /// list.
    pub fn invalidate(&mut self, sql: &str) {
        if let Some(sd) = self.inner.remove(sql) {
            self.push_invalidated(sd);
        }
    }

    /// Move every entry to the invalidated list.
    pub fn invalidate_all(&mut self) {
        let mut drained = Vec::with_capacity(self.inner.len());

        while let Some((_, sd)) = self.inner.remove_lru() {
            drained.push(sd);
        }

        for sd in drained {
            self.push_invalidated(sd);
        }
    }

    /// The invalidated descriptions awaiting handling.
    ///
    /// Two-phase harvest: read this list, deallocate (or abandon) the
    /// server-side names it references, then call [`remove_invalidated`].
    ///
    /// [`remove_invalidated`]: Self::remove_invalidated
    pub fn get_invalidated(&self) -> &[StatementDescription] {
        &self.invalidated
    }

    /// Drop the invalidated list after the caller has handled it.
    pub fn remove_invalidated(&mut self) {
        self.invalidated.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    fn push_invalidated(&mut self, sd: StatementDescription) {
        // only server-named statements need deallocation bookkeeping, but
        // unnamed descriptions ride along so `Describe`-mode callers see a
        // consistent view
        self.invalidated.push(sd);
    }
}

#[cfg(test)]
mod tests {
    use super::StatementCache;
    use crate::statement::StatementDescription;

    fn sd(name: &str, sql: &str) -> StatementDescription {
        StatementDescription {
            name: name.into(),
            sql: sql.into(),
            param_oids: vec![],
            fields: vec![],
        }
    }

    #[test]
    fn it_tracks_the_k_most_recently_used() {
        let mut cache = StatementCache::new(2);

        cache.put(sd("s1", "select 1"));
        cache.put(sd("s2", "select 2"));

        // touch `select 1` so `select 2` is the LRU
        assert!(cache.get("select 1").is_some());

        cache.put(sd("s3", "select 3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("select 1").is_some());
        assert!(cache.get("select 3").is_some());
        assert!(cache.get("select 2").is_none());

        // the evicted description is parked for deallocation
        let invalidated: Vec<_> = cache
            .get_invalidated()
            .iter()
            .map(|sd| sd.name.clone())
            .collect();
        assert_eq!(invalidated, ["s2"]);
    }

    #[test]
    fn invalidate_all_then_remove_leaves_nothing_reachable() {
        let mut cache = StatementCache::new(4);

        cache.put(sd("s1", "select 1"));
        cache.put(sd("s2", "select 2"));

        cache.invalidate_all();

        assert_eq!(cache.len(), 0);
        assert_eq!(cache.get_invalidated().len(), 2);
        assert!(cache.get("select 1").is_none());
        assert!(cache.get("select 2").is_none());

        cache.remove_invalidated();
        assert!(cache.get_invalidated().is_empty());
    }

    #[test]
    fn it_refuses_reinsertion_while_invalidation_is_pending() {
        let mut cache = StatementCache::new(2);

        cache.put(sd("s1", "select 1"));
        cache.invalidate("select 1");

        // the caller has not drained the invalidated list yet
        cache.put(sd("s2", "select 1"));
        assert!(cache.get("select 1").is_none());

        cache.remove_invalidated();

        cache.put(sd("s3", "select 1"));
        assert_eq!(cache.get("select 1").unwrap().name, "s3");
    }

    #[test]
    #[should_panic(expected = "cannot cache a statement with no SQL")]
    fn it_panics_on_empty_sql() {
        let mut cache = StatementCache::new(2);
        cache.put(sd("s1", ""));
    }
}
