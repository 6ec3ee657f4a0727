//! Tileset loading counters.

/// Counters maintained by the [`Tileset`](crate::tileset::Tileset).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TilesetStatistics {
    /// Content requests issued and not yet completed.
    pub number_of_pending_requests: usize,
    /// Tiles whose content is processing.
    pub number_of_tiles_processing: usize,
    /// Requests this frame that were not scheduled or were cancelled and can be retried.
    pub number_of_attempted_requests: usize,
    /// Tiles whose content is currently ready.
    pub number_of_tiles_with_content_ready: usize,
    /// Content loads since the tileset was created.
    pub number_of_loaded_tiles_total: u64,
    /// Tiles whose content failed.
    pub number_of_failed_tiles: usize,
    /// Memory used by loaded content.
    pub content_bytes: u64,
}

impl TilesetStatistics {
    /// Reset the per-frame counters.
    pub fn clear_frame(&mut self) {
        self.number_of_attempted_requests = 0;
    }

    /// Nothing is pending, processing, or waiting for a retry.
    pub fn tiles_loaded(&self) -> bool {
        self.number_of_pending_requests == 0
            && self.number_of_tiles_processing == 0
            && self.number_of_attempted_requests == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Attempted requests keep the tileset from counting as loaded until cleared.
    #[test]
    fn test_tiles_loaded() {
        let mut stats = TilesetStatistics::default();
        assert!(stats.tiles_loaded());
        stats.number_of_attempted_requests = 2;
        stats.number_of_loaded_tiles_total = 5;
        assert!(!stats.tiles_loaded());
        stats.clear_frame();
        assert!(stats.tiles_loaded());
        assert_eq!(stats.number_of_loaded_tiles_total, 5);
    }
}
