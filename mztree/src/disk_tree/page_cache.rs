//! LRU cache for decoded index pages.
//!
//! Two kinds of pages are cached: decoded nodes from the index file and
//! decoded coordinate runs of leaves. Pages are loaded lazily on first
//! access and evicted least-recently-used once `capacity` pages are held.
//!
//! Payload columns (intensity, label) are never cached; they are read from
//! the mapped payload file at result time so label writes are always
//! visible to the next query.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

use super::page_store::CoordinatePage;
use super::tree_types::{Node, NodeId};
use crate::errors::MzTreeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKey {
    Node(NodeId),
    /// Coordinates of the leaf with this node id
    Coordinates(NodeId),
}

#[derive(Debug, Clone)]
pub enum CachedPage {
    Node(Arc<Node>),
    Coordinates(Arc<CoordinatePage>),
}

/// Shared page cache. Safe to use from any number of query threads.
pub struct PageCache {
    pages: Mutex<LruCache<PageKey, CachedPage>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    disk_reads: AtomicU64,
}

impl PageCache {
    /// Creates a cache holding at most `capacity` pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pages: Mutex::new(LruCache::new(capacity)),
            capacity: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            disk_reads: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }

    pub fn contains(&self, key: PageKey) -> bool {
        self.pages.lock().contains(&key)
    }

    /// Returns the node, loading it with `load` on a miss.
    pub fn node<F>(&self, id: NodeId, load: F) -> MzTreeResult<Arc<Node>>
    where
        F: FnOnce() -> MzTreeResult<Node>,
    {
        let page = self.get_or_load(PageKey::Node(id), || {
            load().map(|node| CachedPage::Node(Arc::new(node)))
        })?;
        match page {
            CachedPage::Node(node) => Ok(node),
            // keys and variants are always paired
            CachedPage::Coordinates(_) => unreachable!("node key holds coordinates"),
        }
    }

    /// Returns the coordinate run of leaf `id`, loading it on a miss.
    pub fn coordinates<F>(&self, id: NodeId, load: F) -> MzTreeResult<Arc<CoordinatePage>>
    where
        F: FnOnce() -> MzTreeResult<CoordinatePage>,
    {
        let page = self.get_or_load(PageKey::Coordinates(id), || {
            load().map(|page| CachedPage::Coordinates(Arc::new(page)))
        })?;
        match page {
            CachedPage::Coordinates(page) => Ok(page),
            CachedPage::Node(_) => unreachable!("coordinate key holds a node"),
        }
    }

    /// The loader runs without the cache lock held, so concurrent misses on
    /// the same page may both read it; the second insert simply refreshes
    /// the entry.
    fn get_or_load<F>(&self, key: PageKey, load: F) -> MzTreeResult<CachedPage>
    where
        F: FnOnce() -> MzTreeResult<CachedPage>,
    {
        if let Some(page) = self.pages.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(page.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let page = load()?;
        self.disk_reads.fetch_add(1, Ordering::Relaxed);

        if let Some((evicted, _)) = self.pages.lock().push(key, page.clone()) {
            if evicted != key {
                trace!("Evicted page {:?}", evicted);
            }
        }
        Ok(page)
    }

    /// Drops every cached page. Pages handed out earlier stay valid for
    /// their holders.
    pub fn invalidate_all(&self) {
        let mut pages = self.pages.lock();
        let dropped = pages.len();
        pages.clear();
        trace!("Invalidated {} cached pages", dropped);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Number of loads that actually went to disk.
    pub fn disk_reads(&self) -> u64 {
        self.disk_reads.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.disk_reads.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
