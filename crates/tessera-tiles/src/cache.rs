//! Least-recently-used cache of tiles with loaded content, and the memory
//! budget that drives eviction.
//!
//! The cache is a doubly linked list with a sentinel. At the start of a frame
//! the sentinel moves to the tail; every tile touched during the frame moves
//! behind it. Tiles still in front of the sentinel at the end of the frame
//! were not used and are evicted from the head first.

use rustc_hash::FxHashMap;

use crate::tile::TileId;

const NIL: usize = usize::MAX;

/// Handle of a tile's position in the [`TileCache`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheNode(usize);

#[derive(Clone, Copy, Debug)]
struct Node {
    /// `None` for the sentinel and for free nodes.
    tile: Option<TileId>,
    prev: usize,
    next: usize,
}

/// Recency list of loaded tiles.
#[derive(Debug)]
pub struct TileCache {
    nodes: Vec<Node>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    sentinel: usize,
    len: usize,
    trim: bool,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    pub fn new() -> Self {
        let sentinel = Node {
            tile: None,
            prev: NIL,
            next: NIL,
        };
        Self {
            nodes: vec![sentinel],
            free: Vec::new(),
            head: 0,
            tail: 0,
            sentinel: 0,
            len: 0,
            trim: false,
        }
    }

    /// Number of cached tiles.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Start a new frame: everything cached so far counts as untouched.
    pub fn reset(&mut self) {
        self.move_to_tail(self.sentinel);
    }

    /// Mark a tile as used this frame.
    pub fn touch(&mut self, node: CacheNode) {
        if self.is_live(node) {
            self.move_to_tail(node.0);
        }
    }

    /// Track a newly loaded tile. It counts as touched this frame.
    pub fn add(&mut self, tile: TileId) -> CacheNode {
        let node = Node {
            tile: Some(tile),
            prev: NIL,
            next: NIL,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.push_back(index);
        self.len += 1;
        CacheNode(index)
    }

    pub fn remove(&mut self, node: CacheNode) {
        if !self.is_live(node) {
            return;
        }
        self.unlink(node.0);
        self.nodes[node.0].tile = None;
        self.free.push(node.0);
        self.len -= 1;
    }

    /// The least recently used tile not touched this frame.
    pub fn eviction_candidate(&self) -> Option<(CacheNode, TileId)> {
        if self.head == self.sentinel {
            return None;
        }
        let tile = self.nodes.get(self.head).and_then(|n| n.tile)?;
        Some((CacheNode(self.head), tile))
    }

    /// Evict every untouched tile on the next unload pass.
    pub fn trim(&mut self) {
        self.trim = true;
    }

    /// Read and clear the trim request.
    pub fn take_trim(&mut self) -> bool {
        std::mem::take(&mut self.trim)
    }

    /// Cached tiles from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = TileId> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            while cursor != NIL {
                let node = self.nodes[cursor];
                cursor = node.next;
                if node.tile.is_some() {
                    return node.tile;
                }
            }
            None
        })
    }

    fn is_live(&self, node: CacheNode) -> bool {
        node.0 != self.sentinel && self.nodes.get(node.0).is_some_and(|n| n.tile.is_some())
    }

    fn move_to_tail(&mut self, index: usize) {
        if self.tail == index {
            return;
        }
        self.unlink(index);
        self.push_back(index);
    }

    fn push_back(&mut self, index: usize) {
        self.nodes[index].prev = self.tail;
        self.nodes[index].next = NIL;
        if self.tail == NIL {
            self.head = index;
        } else {
            self.nodes[self.tail].next = index;
        }
        self.tail = index;
    }

    fn unlink(&mut self, index: usize) {
        let Node { prev, next, .. } = self.nodes[index];
        if prev == NIL {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }
        self.nodes[index].prev = NIL;
        self.nodes[index].next = NIL;
    }
}

/// Tracks content memory against the cache budget.
#[derive(Clone, Debug)]
pub struct CacheBudget {
    pub cache_bytes: u64,
    pub maximum_cache_overflow_bytes: u64,
    usage: FxHashMap<TileId, u64>,
    total_bytes: u64,
}

impl CacheBudget {
    pub fn new(cache_bytes: u64, maximum_cache_overflow_bytes: u64) -> Self {
        Self {
            cache_bytes,
            maximum_cache_overflow_bytes,
            usage: FxHashMap::default(),
            total_bytes: 0,
        }
    }

    /// Record the content size of a loaded tile, replacing any earlier value.
    pub fn on_loaded(&mut self, tile: TileId, bytes: u64) {
        if let Some(old) = self.usage.insert(tile, bytes) {
            self.total_bytes -= old;
        }
        self.total_bytes += bytes;
    }

    pub fn on_unloaded(&mut self, tile: TileId) {
        if let Some(old) = self.usage.remove(&tile) {
            self.total_bytes -= old;
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_bytes > self.cache_bytes
    }

    /// Bytes above the budget, or 0.
    pub fn overage(&self) -> u64 {
        self.total_bytes.saturating_sub(self.cache_bytes)
    }

    /// Whether usage exceeds the budget plus the allowed overflow.
    pub fn is_over_overflow(&self) -> bool {
        self.total_bytes > self.cache_bytes + self.maximum_cache_overflow_bytes
    }
}

/// Decides whether the unload pass should keep evicting.
pub trait EvictionPredicate: Send {
    fn should_evict(&self, budget: &CacheBudget) -> bool;
}

impl<F> EvictionPredicate for F
where
    F: Fn(&CacheBudget) -> bool + Send,
{
    fn should_evict(&self, budget: &CacheBudget) -> bool {
        self(budget)
    }
}

/// Evict while content memory exceeds `cache_bytes`.
pub fn over_cache_bytes(budget: &CacheBudget) -> bool {
    budget.is_over_budget()
}
