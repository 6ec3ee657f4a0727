//! Tileset events.
//!
//! Events are collected into a [`TilesetEventBuffer`] that is double-buffered
//! per frame, so a consumer polling once per frame sees everything emitted
//! since its last poll.

use crate::tile::TileId;

#[derive(Clone, Debug, PartialEq)]
pub enum TilesetEvent {
    /// The number of pending requests or processing tiles changed.
    LoadProgress { pending: usize, processing: usize },
    /// A tile's content became ready.
    TileLoad(TileId),
    /// A tile's content was unloaded.
    TileUnload(TileId),
    /// A content request or its processing failed.
    TileFailed { url: String, message: String },
    /// No requests are pending and nothing is processing.
    AllTilesLoaded,
    /// The first time [`AllTilesLoaded`](Self::AllTilesLoaded) fired.
    InitialTilesLoaded,
}

/// Double-buffered event storage.
///
/// Events written in the current frame are readable in the current and next
/// frame. After two [`swap`](TilesetEventBuffer::swap) calls they are dropped.
pub struct TilesetEventBuffer {
    /// Events from the previous frame (readable).
    prev: Vec<TilesetEvent>,
    /// Events from the current frame (being written).
    current: Vec<TilesetEvent>,
}

impl TilesetEventBuffer {
    pub fn new() -> Self {
        Self {
            prev: Vec::new(),
            current: Vec::new(),
        }
    }

    pub fn send(&mut self, event: TilesetEvent) {
        self.current.push(event);
    }

    /// All readable events (previous + current frame).
    pub fn read(&self) -> impl Iterator<Item = &TilesetEvent> {
        self.prev.iter().chain(self.current.iter())
    }

    pub fn len(&self) -> usize {
        self.prev.len() + self.current.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advances the frame: previous events are dropped, current becomes previous.
    pub fn swap(&mut self) {
        self.prev.clear();
        std::mem::swap(&mut self.prev, &mut self.current);
    }

    /// Take every readable event, oldest first.
    pub fn drain(&mut self) -> Vec<TilesetEvent> {
        let mut events = std::mem::take(&mut self.prev);
        events.append(&mut self.current);
        events
    }

    pub fn clear(&mut self) {
        self.prev.clear();
        self.current.clear();
    }
}

impl Default for TilesetEventBuffer {
    fn default() -> Self {
        Self::new()
    }
}
