//! LRU buffer pool with page pinning.
//!
//! Reads go through the pool; a [`PinnedPage`] guard keeps its page
//! resident until dropped. Eviction only considers unpinned pages, so
//! a pool whose budget is fully pinned simply grows until pins drop.

use std::num::NonZeroUsize;
use std::sync::Arc;

use hashbrown::HashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use tessera_error::Result;

use crate::manager::BlockManager;
use crate::{BlockId, Page};

struct PoolInner {
    cache: LruCache<BlockId, Arc<Page>>,
    pins: HashMap<BlockId, usize>,
    budget: usize,
}

/// Shared page cache in front of one [`BlockManager`].
pub struct BufferPool {
    manager: Arc<BlockManager>,
    inner: Mutex<PoolInner>,
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool").finish_non_exhaustive()
    }
}

impl BufferPool {
    /// A pool holding at most `budget` unpinned pages.
    #[must_use]
    pub fn new(manager: Arc<BlockManager>, budget: usize) -> Arc<Self> {
        let cap = NonZeroUsize::new(budget.max(1)).unwrap_or(NonZeroUsize::MIN);
        Arc::new(Self {
            manager,
            inner: Mutex::new(PoolInner {
                // Unbounded at the cache layer; the budget is enforced
                // manually so pinned pages are never dropped.
                cache: LruCache::unbounded(),
                pins: HashMap::new(),
                budget: cap.get(),
            }),
        })
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<BlockManager> {
        &self.manager
    }

    /// Read `id` through the pool and pin it.
    pub fn pin(self: &Arc<Self>, id: BlockId) -> Result<PinnedPage> {
        let mut inner = self.inner.lock();
        let page = if let Some(p) = inner.cache.get(&id) {
            Arc::clone(p)
        } else {
            drop(inner);
            let page = Arc::new(self.manager.read_block(id)?);
            inner = self.inner.lock();
            inner.cache.put(id, Arc::clone(&page));
            page
        };
        *inner.pins.entry(id).or_insert(0) += 1;
        Self::evict_over_budget(&mut inner);
        trace!(%id, "pinned");
        Ok(PinnedPage {
            pool: Arc::clone(self),
            id,
            page,
        })
    }

    /// Write a page through the pool to the manager.
    pub fn write(&self, id: BlockId, page: Page) -> Result<()> {
        self.manager.write_block(id, &page)?;
        let mut inner = self.inner.lock();
        inner.cache.put(id, Arc::new(page));
        Self::evict_over_budget(&mut inner);
        Ok(())
    }

    /// Drop a block from the cache (after a free).
    pub fn invalidate(&self, id: BlockId) {
        let mut inner = self.inner.lock();
        inner.cache.pop(&id);
    }

    /// Number of cached pages, pinned or not.
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.inner.lock().cache.len()
    }

    fn unpin(&self, id: BlockId) {
        let mut inner = self.inner.lock();
        if let Some(count) = inner.pins.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                inner.pins.remove(&id);
            }
        }
        Self::evict_over_budget(&mut inner);
    }

    fn evict_over_budget(inner: &mut PoolInner) {
        while inner.cache.len() > inner.budget {
            // Walk from the LRU end for the first unpinned victim.
            let victim = inner
                .cache
                .iter()
                .rev()
                .map(|(id, _)| *id)
                .find(|id| !inner.pins.contains_key(id));
            match victim {
                Some(id) => {
                    inner.cache.pop(&id);
                    trace!(%id, "evicted");
                }
                None => break,
            }
        }
    }
}

/// A pinned page; the pin releases on drop.
pub struct PinnedPage {
    pool: Arc<BufferPool>,
    id: BlockId,
    page: Arc<Page>,
}

impl PinnedPage {
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    #[must_use]
    pub fn page(&self) -> &Page {
        &self.page
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.pool.unpin(self.id);
    }
}

impl std::fmt::Debug for PinnedPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinnedPage").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_pages(budget: usize, n: u64) -> (Arc<BufferPool>, Vec<BlockId>) {
        let mgr = Arc::new(BlockManager::in_memory());
        let mut ids = Vec::new();
        for i in 0..n {
            let id = mgr.allocate_block().unwrap();
            let mut page = Page::zeroed();
            page.as_mut_slice()[0] = i as u8;
            mgr.write_block(id, &page).unwrap();
            ids.push(id);
        }
        (BufferPool::new(mgr, budget), ids)
    }

    #[test]
    fn pin_reads_through() {
        let (pool, ids) = pool_with_pages(4, 2);
        let pinned = pool.pin(ids[1]).unwrap();
        assert_eq!(pinned.page().as_slice()[0], 1);
    }

    #[test]
    fn eviction_respects_budget() {
        let (pool, ids) = pool_with_pages(2, 5);
        for id in &ids {
            let _p = pool.pin(*id).unwrap();
        }
        assert!(pool.cached_pages() <= 2);
    }

    #[test]
    fn pinned_pages_survive_pressure() {
        let (pool, ids) = pool_with_pages(2, 5);
        let keep = pool.pin(ids[0]).unwrap();
        for id in &ids[1..] {
            let _p = pool.pin(*id).unwrap();
        }
        // The pinned page is still cached even though the pool is over
        // budget with it.
        let again = pool.pin(ids[0]).unwrap();
        assert_eq!(again.page().as_slice()[0], keep.page().as_slice()[0]);
    }

    #[test]
    fn unpin_on_drop_allows_eviction() {
        let (pool, ids) = pool_with_pages(1, 3);
        {
            let _a = pool.pin(ids[0]).unwrap();
            let _b = pool.pin(ids[1]).unwrap();
            assert!(pool.cached_pages() >= 2);
        }
        let _c = pool.pin(ids[2]).unwrap();
        assert!(pool.cached_pages() <= 2);
    }
}
