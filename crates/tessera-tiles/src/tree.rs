//! Arena of tiles addressed by generational [`TileId`]s.

use glam::DMat4;

use crate::ellipsoid::{Ellipsoid, VerticalExaggeration};
use crate::error::TileError;
use crate::header::TileHeader;
use crate::tile::{Inherited, Refine, Tile, TileId};

struct Entry {
    generation: u32,
    tile: Option<Tile>,
}

/// Owns every tile. Parents and children refer to each other by id, and
/// destroyed slots are reused with a new generation.
#[derive(Default)]
pub struct TileArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    len: usize,
}

/// Where a subtree hangs and how its tiles are built.
#[derive(Clone, Copy, Debug)]
pub struct SubtreeContext<'a> {
    pub parent: Option<TileId>,
    pub base_url: &'a str,
    pub exaggeration: &'a VerticalExaggeration,
    pub ellipsoid: &'a Ellipsoid,
}

impl TileArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.entries
            .get(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.tile.as_ref())
    }

    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)
            .and_then(|e| e.tile.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &Tile)> {
        self.entries.iter().enumerate().filter_map(|(index, e)| {
            e.tile.as_ref().map(|tile| {
                let id = TileId {
                    index: index as u32,
                    generation: e.generation,
                };
                (id, tile)
            })
        })
    }

    fn insert(&mut self, tile: Tile) -> TileId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.tile = Some(tile);
            return TileId {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            tile: Some(tile),
        });
        TileId {
            index,
            generation: 0,
        }
    }

    fn remove(&mut self, id: TileId) -> Option<Tile> {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|e| e.generation == id.generation)?;
        let tile = entry.tile.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(tile)
    }

    /// Build the tiles of `header` and everything below it, breadth first.
    ///
    /// With a parent the subtree root is appended to its children and inherits
    /// its refinement, geometric error and accumulated transform. Without one
    /// `root_transform` is used. On error nothing is left in the arena.
    pub fn build_subtree(
        &mut self,
        header: &TileHeader,
        root_transform: &DMat4,
        context: SubtreeContext<'_>,
    ) -> Result<TileId, TileError> {
        let inherited = match context.parent.and_then(|p| self.get(p)) {
            Some(parent) => Inherited {
                parent: context.parent,
                depth: parent.depth + 1,
                refine: parent.refine,
                geometric_error: parent.geometric_error,
                transform: parent.computed_transform,
            },
            None => Inherited {
                parent: None,
                depth: 0,
                refine: Refine::Replace,
                geometric_error: 0.0,
                transform: *root_transform,
            },
        };

        let mut built = Vec::new();
        let result = self.build_breadth_first(header, inherited, &context, &mut built);
        match result {
            Ok(root) => {
                if let Some(parent) = context.parent.and_then(|p| self.get_mut(p)) {
                    parent.children.push(root);
                }
                Ok(root)
            }
            Err(error) => {
                for id in built {
                    self.remove(id);
                }
                Err(error)
            }
        }
    }

    fn build_breadth_first(
        &mut self,
        header: &TileHeader,
        inherited: Inherited,
        context: &SubtreeContext<'_>,
        built: &mut Vec<TileId>,
    ) -> Result<TileId, TileError> {
        let root = self.insert(Tile::from_header(
            header,
            inherited,
            context.base_url,
            context.exaggeration,
            context.ellipsoid,
        )?);
        built.push(root);

        let mut queue = std::collections::VecDeque::from([(root, header)]);
        while let Some((id, tile_header)) = queue.pop_front() {
            let Some(tile) = self.get(id) else {
                continue;
            };
            let inherited = Inherited {
                parent: Some(id),
                depth: tile.depth + 1,
                refine: tile.refine,
                geometric_error: tile.geometric_error,
                transform: tile.computed_transform,
            };
            let mut children = Vec::with_capacity(tile_header.children.len());
            for child_header in &tile_header.children {
                let child = self.insert(Tile::from_header(
                    child_header,
                    inherited,
                    context.base_url,
                    context.exaggeration,
                    context.ellipsoid,
                )?);
                built.push(child);
                children.push(child);
                queue.push_back((child, child_header));
            }
            if let Some(tile) = self.get_mut(id) {
                tile.children = children;
            }
        }
        Ok(root)
    }

    /// Remove `id` and all its descendants, returning them deepest first.
    ///
    /// The tile is detached from its parent's children.
    pub fn remove_subtree(&mut self, id: TileId) -> Vec<(TileId, Tile)> {
        if let Some(parent) = self.get(id).and_then(|t| t.parent) {
            if let Some(parent) = self.get_mut(parent) {
                parent.children.retain(|&child| child != id);
            }
        }

        let mut order = vec![id];
        let mut index = 0;
        while index < order.len() {
            if let Some(tile) = self.get(order[index]) {
                order.extend_from_slice(&tile.children);
            }
            index += 1;
        }

        order
            .into_iter()
            .rev()
            .filter_map(|id| self.remove(id).map(|tile| (id, tile)))
            .collect()
    }

    /// Ids of `id` and all its descendants, parents before children.
    pub fn descendants(&self, id: TileId) -> Vec<TileId> {
        let mut order = vec![id];
        let mut index = 0;
        while index < order.len() {
            if let Some(tile) = self.get(order[index]) {
                order.extend_from_slice(&tile.children);
            }
            index += 1;
        }
        order
    }
}
