use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use lru::LruCache;
use threadline_core::{Address, AuthorProfile};

use crate::error::RemoteError;
use crate::remote::ProfileResolver;

/// LRU-bounded cache in front of another resolver.
///
/// Misses (`Ok(None)`) are cached too; errors are not.
pub struct CachedProfileResolver {
    inner: Arc<dyn ProfileResolver>,
    cache: Mutex<LruCache<Address, Option<AuthorProfile>>>,
}

impl CachedProfileResolver {
    pub fn new(inner: Arc<dyn ProfileResolver>, capacity: NonZeroUsize) -> Self {
        Self {
            inner,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn cached_len(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn lookup(&self, address: &Address) -> Option<Option<AuthorProfile>> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
    }
}

#[async_trait]
impl ProfileResolver for CachedProfileResolver {
    async fn resolve(&self, address: Address) -> Result<Option<AuthorProfile>, RemoteError> {
        if let Some(hit) = self.lookup(&address) {
            return Ok(hit);
        }
        let resolved = self.inner.resolve(address).await?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(address, resolved.clone());
        Ok(resolved)
    }
}
