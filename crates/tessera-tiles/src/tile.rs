//! The tile node: bounding volumes, geometric error, refinement and the
//! per-frame scalars the traversal and the priority encoder read.

use std::fmt;

use glam::DMat4;

use crate::bounding_volume::{BoundingVolume, BoundingVolumeSource};
use crate::cache::CacheNode;
use crate::content::{ContentSlot, ContentState, TileContent};
use crate::culling::MASK_INDETERMINATE;
use crate::ellipsoid::{Ellipsoid, VerticalExaggeration};
use crate::error::TileError;
use crate::expiration::Expiration;
use crate::header::TileHeader;
use crate::priority::ProgressiveResolution;
use crate::request::PriorityCell;
use crate::resource::resolve_url;

/// Stable handle to a tile in the [`TileArena`](crate::tree::TileArena).
///
/// The generation distinguishes a live tile from a destroyed one whose slot
/// was reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tile {}v{}", self.index, self.generation)
    }
}

/// How children refine their parent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Refine {
    /// Children replace the parent.
    #[default]
    Replace,
    /// Children are rendered in addition to the parent.
    Add,
}

impl Refine {
    /// Parse a header value. Lowercase spellings are accepted with a warning.
    pub fn parse(value: &str) -> Result<Self, TileError> {
        match value {
            "REPLACE" => Ok(Self::Replace),
            "ADD" => Ok(Self::Add),
            other if other.eq_ignore_ascii_case("replace") => {
                tracing::warn!("refine value {other:?} is deprecated, use \"REPLACE\"");
                Ok(Self::Replace)
            }
            other if other.eq_ignore_ascii_case("add") => {
                tracing::warn!("refine value {other:?} is deprecated, use \"ADD\"");
                Ok(Self::Add)
            }
            other => Err(TileError::InvalidRefine(other.to_string())),
        }
    }
}

/// Values a child inherits from its parent at construction.
#[derive(Clone, Copy, Debug)]
pub struct Inherited {
    pub parent: Option<TileId>,
    pub depth: u32,
    pub refine: Refine,
    pub geometric_error: f64,
    /// Accumulated transform of the parent, or the tileset root transform.
    pub transform: DMat4,
}

/// One node of the tile hierarchy.
#[derive(Debug)]
pub struct Tile {
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    pub depth: u32,

    bounding_volume_source: BoundingVolumeSource,
    content_bounding_volume_source: Option<BoundingVolumeSource>,
    viewer_request_volume_source: Option<BoundingVolumeSource>,
    pub bounding_volume: BoundingVolume,
    pub content_bounding_volume: Option<BoundingVolume>,
    pub viewer_request_volume: Option<BoundingVolume>,

    pub geometric_error: f64,
    pub refine: Refine,
    pub transform: DMat4,
    pub computed_transform: DMat4,
    /// Exaggeration the bounding volumes were last derived with.
    exaggeration: VerticalExaggeration,

    pub content: TileContent,
    pub expiration: Expiration,
    /// The content is an external tileset attached as this tile's child.
    pub has_tileset_content: bool,
    /// The content is an implicit-tiling subtree.
    pub has_implicit_content: bool,

    pub distance_to_camera: f64,
    pub screen_space_error: f64,
    /// Screen-space error at the reduced progressive resolution.
    pub progressive_screen_space_error: f64,
    pub reverse_screen_space_error: f64,
    pub foveated_factor: f64,
    pub visibility_plane_mask: u32,
    pub visible: bool,
    pub in_request_volume: bool,
    pub priority: f64,
    pub priority_deferred: bool,
    pub progressive_resolution: ProgressiveResolution,
    pub updated_visibility_frame: u64,
    pub touched_frame: u64,
    pub requested_frame: u64,

    pub(crate) priority_cell: PriorityCell,
    pub(crate) cache_node: Option<CacheNode>,
}

impl Tile {
    /// Build a tile from its header. Children are attached by the arena.
    pub fn from_header(
        header: &TileHeader,
        inherited: Inherited,
        base_url: &str,
        exaggeration: &VerticalExaggeration,
        ellipsoid: &Ellipsoid,
    ) -> Result<Self, TileError> {
        let bounding_volume_source = header.bounding_volume()?;
        let viewer_request_volume_source = header
            .viewer_request_volume
            .as_ref()
            .map(|v| v.to_source())
            .transpose()?;
        let refine = header.refine()?.unwrap_or(inherited.refine);
        let geometric_error = match header.geometric_error {
            Some(error) => error,
            None => {
                tracing::warn!(
                    "tile at depth {} has no geometricError, using the parent's",
                    inherited.depth
                );
                inherited.geometric_error
            }
        };
        let transform = header
            .transform()?
            .map_or(DMat4::IDENTITY, |m| DMat4::from_cols_array(&m));

        let (content, content_bounding_volume_source) = match (&header.contents, &header.content) {
            (Some(contents), _) if !contents.is_empty() => {
                let slots = contents
                    .iter()
                    .map(|c| -> Result<ContentSlot, TileError> {
                        let volume = c.bounding_volume.as_ref().map(|v| v.to_source()).transpose()?;
                        Ok(ContentSlot::new(resolve_url(base_url, c.uri()?), volume))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                match <[ContentSlot; 1]>::try_from(slots) {
                    Ok([slot]) => {
                        let volume = slot.bounding_volume;
                        (TileContent::Single(slot), volume)
                    }
                    Err(slots) => (TileContent::Multiple(slots), None),
                }
            }
            (_, Some(content)) => {
                let volume = content
                    .bounding_volume
                    .as_ref()
                    .map(|v| v.to_source())
                    .transpose()?;
                let slot = ContentSlot::new(resolve_url(base_url, content.uri()?), volume);
                (TileContent::Single(slot), volume)
            }
            _ => (TileContent::Empty, None),
        };

        let computed_transform = inherited.transform * transform;
        let mut tile = Self {
            parent: inherited.parent,
            children: Vec::new(),
            depth: inherited.depth,
            bounding_volume_source,
            content_bounding_volume_source,
            viewer_request_volume_source,
            bounding_volume: bounding_volume_source.build(&computed_transform, exaggeration, ellipsoid),
            content_bounding_volume: None,
            viewer_request_volume: None,
            geometric_error,
            refine,
            transform,
            computed_transform,
            exaggeration: *exaggeration,
            content,
            expiration: Expiration::from_header(header.expire.as_ref())?,
            has_tileset_content: false,
            has_implicit_content: false,
            distance_to_camera: 0.0,
            screen_space_error: 0.0,
            progressive_screen_space_error: 0.0,
            reverse_screen_space_error: 0.0,
            foveated_factor: 0.0,
            visibility_plane_mask: MASK_INDETERMINATE,
            visible: false,
            in_request_volume: true,
            priority: 0.0,
            priority_deferred: false,
            progressive_resolution: ProgressiveResolution::None,
            updated_visibility_frame: 0,
            touched_frame: 0,
            requested_frame: 0,
            priority_cell: PriorityCell::default(),
            cache_node: None,
        };
        tile.derive_volumes(ellipsoid);
        Ok(tile)
    }

    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    pub fn children(&self) -> &[TileId] {
        &self.children
    }

    pub fn has_empty_content(&self) -> bool {
        self.content.is_empty()
    }

    pub fn content_state(&self) -> ContentState {
        self.content.state()
    }

    pub fn is_content_ready(&self) -> bool {
        self.content_state() == ContentState::Ready
    }

    /// Whether the tile can be rendered: ready, expired, or still holding
    /// stale content while its refresh is in flight.
    pub fn is_renderable(&self) -> bool {
        matches!(self.content_state(), ContentState::Ready | ContentState::Expired)
            || self.content.slots().iter().any(|slot| slot.stale.is_some())
    }

    /// Recompute the accumulated transform and re-derive the bounding volumes
    /// if it or the exaggeration changed. Returns whether anything changed.
    pub fn update_transform(
        &mut self,
        parent_transform: &DMat4,
        exaggeration: &VerticalExaggeration,
        ellipsoid: &Ellipsoid,
    ) -> bool {
        let computed = *parent_transform * self.transform;
        if computed == self.computed_transform && *exaggeration == self.exaggeration {
            return false;
        }
        self.computed_transform = computed;
        self.exaggeration = *exaggeration;
        self.bounding_volume =
            self.bounding_volume_source
                .build(&self.computed_transform, exaggeration, ellipsoid);
        self.derive_volumes(ellipsoid);
        true
    }

    fn derive_volumes(&mut self, ellipsoid: &Ellipsoid) {
        let transform = self.computed_transform;
        let exaggeration = self.exaggeration;
        self.content_bounding_volume = self
            .content_bounding_volume_source
            .map(|source| source.build(&transform, &exaggeration, ellipsoid));
        self.viewer_request_volume = self
            .viewer_request_volume_source
            .map(|source| source.build(&transform, &exaggeration, ellipsoid));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    fn header(json: &str) -> TileHeader {
        serde_json::from_str(json).unwrap()
    }

    fn root_inherited() -> Inherited {
        Inherited {
            parent: None,
            depth: 0,
            refine: Refine::Replace,
            geometric_error: 0.0,
            transform: DMat4::IDENTITY,
        }
    }

    fn build(json: &str) -> Result<Tile, TileError> {
        Tile::from_header(
            &header(json),
            root_inherited(),
            "https://example.com/data/tileset.json",
            &VerticalExaggeration::NONE,
            &Ellipsoid::wgs84(),
        )
    }

    /// Exact and lowercase refine values parse; others are rejected.
    #[test]
    fn test_refine_parse() {
        assert_eq!(Refine::parse("REPLACE").unwrap(), Refine::Replace);
        assert_eq!(Refine::parse("ADD").unwrap(), Refine::Add);
        assert_eq!(Refine::parse("add").unwrap(), Refine::Add);
        assert!(matches!(Refine::parse("MERGE"), Err(TileError::InvalidRefine(_))));
    }

    /// A tile without content is permanently ready.
    #[test]
    fn test_empty_content() {
        let tile = build(r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1}"#).unwrap();
        assert!(tile.has_empty_content());
        assert_eq!(tile.content_state(), ContentState::Ready);
    }

    /// Content URIs resolve against the tileset URL.
    #[test]
    fn test_content_uri_resolves() {
        let tile = build(
            r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,"content":{"uri":"tiles/0.b3dm"}}"#,
        )
        .unwrap();
        assert_eq!(tile.content.slots()[0].url, "https://example.com/data/tiles/0.b3dm");
        assert_eq!(tile.content_state(), ContentState::Unloaded);
    }

    /// A one-entry `contents` array is a single payload; two or more are composite.
    #[test]
    fn test_contents_arity() {
        let single = build(
            r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,
                "contents":[{"uri":"a.b3dm"}]}"#,
        )
        .unwrap();
        assert!(matches!(single.content, TileContent::Single(_)));
        assert_eq!(single.content.slots()[0].url, "https://example.com/data/a.b3dm");

        let composite = build(
            r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,
                "contents":[{"uri":"a.b3dm"},{"uri":"b.pnts"}]}"#,
        )
        .unwrap();
        assert!(matches!(&composite.content, TileContent::Multiple(slots) if slots.len() == 2));
    }

    /// Malformed headers are construction errors.
    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            build(r#"{"geometricError":1}"#),
            Err(TileError::MissingBoundingVolume)
        ));
        assert!(matches!(
            build(r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,"refine":"up"}"#),
            Err(TileError::InvalidRefine(_))
        ));
        assert!(matches!(
            build(r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,"content":{"uri":""}}"#),
            Err(TileError::EmptyContentUri)
        ));
        assert!(matches!(
            build(r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,"transform":[1,0,0]}"#),
            Err(TileError::InvalidTransform(3))
        ));
    }

    /// The accumulated transform follows the parent and moves the volume.
    #[test]
    fn test_update_transform() {
        let mut tile = build(
            r#"{"boundingVolume":{"sphere":[0,0,0,1]},"geometricError":1,
                "transform":[1,0,0,0, 0,1,0,0, 0,0,1,0, 5,0,0,1]}"#,
        )
        .unwrap();
        assert_eq!(tile.bounding_volume.center(), DVec3::new(5.0, 0.0, 0.0));

        let parent = DMat4::from_translation(DVec3::new(0.0, 10.0, 0.0));
        let ellipsoid = Ellipsoid::wgs84();
        assert!(tile.update_transform(&parent, &VerticalExaggeration::NONE, &ellipsoid));
        assert_eq!(tile.computed_transform, parent * tile.transform);
        assert_eq!(tile.bounding_volume.center(), DVec3::new(5.0, 10.0, 0.0));
        assert!(!tile.update_transform(&parent, &VerticalExaggeration::NONE, &ellipsoid));
    }
}
