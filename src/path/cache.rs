//! Compiled-path cache.

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use super::compile::CompiledPath;

/// Eviction policy of a path engine's compiled-path cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Drop every entry once the cache holds more than `limit` paths.
    ClearAll {
        /// Entry count above which the cache is emptied.
        limit: usize,
    },
    /// Evict the least recently used path.
    Lru {
        /// Maximum number of cached paths.
        capacity: NonZeroUsize,
    },
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::ClearAll { limit: 100 }
    }
}

/// Cache key: the path text plus the sorted namespace map it was compiled
/// against.
pub(crate) type CacheKey = (String, Vec<(String, String)>);

pub(crate) enum PathCache {
    ClearAll {
        limit: usize,
        entries: HashMap<CacheKey, Arc<CompiledPath>>,
    },
    Lru(LruCache<CacheKey, Arc<CompiledPath>>),
}

impl PathCache {
    pub(crate) fn new(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::ClearAll { limit } => Self::ClearAll {
                limit,
                entries: HashMap::new(),
            },
            CachePolicy::Lru { capacity } => Self::Lru(LruCache::new(capacity)),
        }
    }

    pub(crate) fn get(&mut self, key: &CacheKey) -> Option<Arc<CompiledPath>> {
        match self {
            Self::ClearAll { entries, .. } => entries.get(key).cloned(),
            Self::Lru(cache) => cache.get(key).cloned(),
        }
    }

    pub(crate) fn insert(&mut self, key: CacheKey, path: Arc<CompiledPath>) {
        match self {
            Self::ClearAll { limit, entries } => {
                if entries.len() > *limit {
                    tracing::debug!(entries = entries.len(), "clearing compiled path cache");
                    entries.clear();
                }
                entries.insert(key, path);
            }
            Self::Lru(cache) => {
                cache.put(key, path);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::ClearAll { entries, .. } => entries.len(),
            Self::Lru(cache) => cache.len(),
        }
    }

    pub(crate) fn clear(&mut self) {
        match self {
            Self::ClearAll { entries, .. } => entries.clear(),
            Self::Lru(cache) => cache.clear(),
        }
    }
}

impl fmt::Debug for PathCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self {
            Self::ClearAll { .. } => "clear-all",
            Self::Lru(_) => "lru",
        };
        f.debug_struct("PathCache")
            .field("policy", &policy)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(path: &str) -> CacheKey {
        (path.to_string(), Vec::new())
    }

    fn compiled(path: &str) -> Arc<CompiledPath> {
        Arc::new(CompiledPath::compile(path, None).unwrap())
    }

    #[test]
    fn test_clear_all_empties_past_limit() {
        let mut cache = PathCache::new(CachePolicy::ClearAll { limit: 2 });
        for path in ["a", "b", "c"] {
            cache.insert(key(path), compiled(path));
        }
        assert_eq!(cache.len(), 3);
        cache.insert(key("d"), compiled("d"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&key("a")).is_none());
        assert!(cache.get(&key("d")).is_some());
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let capacity = NonZeroUsize::new(2).unwrap();
        let mut cache = PathCache::new(CachePolicy::Lru { capacity });
        cache.insert(key("a"), compiled("a"));
        cache.insert(key("b"), compiled("b"));
        assert!(cache.get(&key("a")).is_some());
        cache.insert(key("c"), compiled("c"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
    }
}
