//! Tile payloads: the content state machine, payload classification and the
//! factory table that turns fetched bytes into [`Content`].

use std::fmt;

use rustc_hash::FxHashMap;

use crate::bounding_volume::BoundingVolumeSource;
use crate::error::ContentError;
use crate::frame::FrameState;
use crate::request::RequestId;

/// Lifecycle of one payload.
///
/// ```text
/// Unloaded -> Loading -> Processing -> Ready -> Expired -> Loading
///             Loading | Processing -> Failed
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ContentState {
    #[default]
    Unloaded,
    Loading,
    Processing,
    Ready,
    /// Still renderable while a replacement is fetched.
    Expired,
    /// Terminal until [`reset_content`](crate::tileset::Tileset::reset_content).
    Failed,
}

impl fmt::Display for ContentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unloaded => "UNLOADED",
            Self::Loading => "LOADING",
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Expired => "EXPIRED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Known payload kinds, classified from the fetched bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    Batched3dModel,
    Instanced3dModel,
    PointCloud,
    Composite,
    Geometry,
    Vector,
    /// Binary glTF.
    Glb,
    /// JSON glTF.
    Gltf,
    GeoJson,
    /// A tileset JSON with a `root` tile.
    ExternalTileset,
    /// An implicit-tiling subtree, binary or JSON.
    ImplicitSubtree,
}

/// What the tileset does with a payload of a given kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PayloadRoute {
    /// Attach the parsed tileset below the requesting tile.
    ExternalTileset,
    /// Flag the tile for implicit expansion by the traversal.
    ImplicitSubtree,
    /// Hand the bytes to the registered content factory.
    Model,
}

const MAGICS: [(&[u8; 4], PayloadKind); 8] = [
    (b"b3dm", PayloadKind::Batched3dModel),
    (b"i3dm", PayloadKind::Instanced3dModel),
    (b"pnts", PayloadKind::PointCloud),
    (b"cmpt", PayloadKind::Composite),
    (b"geom", PayloadKind::Geometry),
    (b"vctr", PayloadKind::Vector),
    (b"glTF", PayloadKind::Glb),
    (b"subt", PayloadKind::ImplicitSubtree),
];

impl PayloadKind {
    /// Classify a payload by its magic bytes, falling back to the JSON shape.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if let Some(magic) = bytes.get(..4) {
            if let Some((_, kind)) = MAGICS.iter().find(|(m, _)| m.as_slice() == magic) {
                return Some(*kind);
            }
        }

        let text = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        if text.iter().find(|b| !b.is_ascii_whitespace()) != Some(&b'{') {
            return None;
        }
        let json: serde_json::Value = serde_json::from_slice(text).ok()?;
        let object = json.as_object()?;
        if object.contains_key("root") {
            Some(Self::ExternalTileset)
        } else if object.contains_key("tileAvailability") {
            Some(Self::ImplicitSubtree)
        } else if matches!(
            object.get("type").and_then(|t| t.as_str()),
            Some("FeatureCollection" | "Feature")
        ) {
            Some(Self::GeoJson)
        } else if object.contains_key("asset") {
            Some(Self::Gltf)
        } else {
            None
        }
    }

    pub fn route(self) -> PayloadRoute {
        match self {
            Self::ExternalTileset => PayloadRoute::ExternalTileset,
            Self::ImplicitSubtree => PayloadRoute::ImplicitSubtree,
            Self::Batched3dModel
            | Self::Instanced3dModel
            | Self::PointCloud
            | Self::Composite
            | Self::Geometry
            | Self::Vector
            | Self::Glb
            | Self::Gltf
            | Self::GeoJson => PayloadRoute::Model,
        }
    }

    /// Every kind routed to a content factory.
    pub const MODELS: [Self; 9] = [
        Self::Batched3dModel,
        Self::Instanced3dModel,
        Self::PointCloud,
        Self::Composite,
        Self::Geometry,
        Self::Vector,
        Self::Glb,
        Self::Gltf,
        Self::GeoJson,
    ];
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Batched3dModel => "b3dm",
            Self::Instanced3dModel => "i3dm",
            Self::PointCloud => "pnts",
            Self::Composite => "cmpt",
            Self::Geometry => "geom",
            Self::Vector => "vctr",
            Self::Glb => "glb",
            Self::Gltf => "gltf",
            Self::GeoJson => "geojson",
            Self::ExternalTileset => "external tileset",
            Self::ImplicitSubtree => "subtree",
        };
        f.write_str(name)
    }
}

/// A decoded payload owned by a tile.
pub trait Content: Send {
    /// Whether the payload finished processing and can be rendered.
    fn is_ready(&self) -> bool;

    /// Advance processing by one frame.
    fn update(&mut self, frame: &FrameState);

    /// Memory attributed to this payload for cache accounting.
    fn byte_length(&self) -> usize;

    /// Release resources. Called once before the content is dropped.
    fn destroy(&mut self) {}
}

/// What a factory knows about the payload it is building.
#[derive(Clone, Copy, Debug)]
pub struct ContentContext<'a> {
    pub url: &'a str,
    pub kind: PayloadKind,
}

pub type ContentBuilder =
    Box<dyn Fn(&ContentContext<'_>, Vec<u8>) -> Result<Box<dyn Content>, ContentError> + Send + Sync>;

/// Explicit table from payload kind to content factory.
#[derive(Default)]
pub struct ContentFactoryTable {
    builders: FxHashMap<PayloadKind, ContentBuilder>,
}

impl ContentFactoryTable {
    /// An empty table; every model payload fails with `UnsupportedKind`.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that keeps every model payload as opaque bytes.
    pub fn raw_payloads() -> Self {
        let mut table = Self::new();
        for kind in PayloadKind::MODELS {
            table.register(kind, Box::new(build_raw_payload));
        }
        table
    }

    pub fn register(&mut self, kind: PayloadKind, builder: ContentBuilder) {
        self.builders.insert(kind, builder);
    }

    pub fn build(&self, context: &ContentContext<'_>, bytes: Vec<u8>) -> Result<Box<dyn Content>, ContentError> {
        let builder = self
            .builders
            .get(&context.kind)
            .ok_or(ContentError::UnsupportedKind(context.kind))?;
        builder(context, bytes)
    }
}

fn build_raw_payload(
    _context: &ContentContext<'_>,
    bytes: Vec<u8>,
) -> Result<Box<dyn Content>, ContentError> {
    Ok(Box::new(RawPayloadContent::new(bytes)))
}

/// Keeps the payload bytes as-is. Ready after one processing frame.
#[derive(Debug)]
pub struct RawPayloadContent {
    bytes: Vec<u8>,
    ready: bool,
}

impl RawPayloadContent {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, ready: false }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Content for RawPayloadContent {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn update(&mut self, _frame: &FrameState) {
        self.ready = true;
    }

    fn byte_length(&self) -> usize {
        self.bytes.len()
    }

    fn destroy(&mut self) {
        self.bytes = Vec::new();
    }
}

/// Placeholder for payloads whose data lives elsewhere (an attached external
/// tileset or an implicit subtree handed to the traversal).
#[derive(Debug, Default)]
pub struct StructuralContent {
    ready: bool,
}

impl Content for StructuralContent {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn update(&mut self, _frame: &FrameState) {
        self.ready = true;
    }

    fn byte_length(&self) -> usize {
        0
    }
}

/// An outstanding fetch for one content slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InFlight {
    pub request: RequestId,
    /// State to restore if the request is cancelled.
    pub previous_state: ContentState,
}

/// One payload of a tile.
pub struct ContentSlot {
    /// Resolved resource URL.
    pub url: String,
    pub bounding_volume: Option<BoundingVolumeSource>,
    pub state: ContentState,
    pub content: Option<Box<dyn Content>>,
    /// Expired payload still rendered until its replacement is ready.
    pub stale: Option<Box<dyn Content>>,
    pub in_flight: Option<InFlight>,
    /// Bumped for every fetch; completions carrying an older value are dropped.
    pub generation: u64,
}

impl ContentSlot {
    pub fn new(url: String, bounding_volume: Option<BoundingVolumeSource>) -> Self {
        Self {
            url,
            bounding_volume,
            state: ContentState::Unloaded,
            content: None,
            stale: None,
            in_flight: None,
            generation: 0,
        }
    }

    pub fn byte_length(&self) -> usize {
        self.content.as_ref().map_or(0, |c| c.byte_length())
            + self.stale.as_ref().map_or(0, |c| c.byte_length())
    }

    /// Destroy the stale payload, if any.
    pub fn destroy_stale(&mut self) {
        if let Some(mut stale) = self.stale.take() {
            stale.destroy();
        }
    }

    /// Destroy every payload and return to `Unloaded`.
    pub fn unload(&mut self) {
        if let Some(mut content) = self.content.take() {
            content.destroy();
        }
        self.destroy_stale();
        self.in_flight = None;
        self.state = ContentState::Unloaded;
    }
}

impl fmt::Debug for ContentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSlot")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("has_content", &self.content.is_some())
            .field("has_stale", &self.stale.is_some())
            .field("in_flight", &self.in_flight)
            .field("generation", &self.generation)
            .finish()
    }
}

/// The payloads of a tile.
#[derive(Debug)]
pub enum TileContent {
    /// No payload; permanently ready.
    Empty,
    Single(ContentSlot),
    /// Each inner payload is fetched and fails independently.
    Multiple(Vec<ContentSlot>),
}

impl TileContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn slots(&self) -> &[ContentSlot] {
        match self {
            Self::Empty => &[],
            Self::Single(slot) => std::slice::from_ref(slot),
            Self::Multiple(slots) => slots,
        }
    }

    pub fn slots_mut(&mut self) -> &mut [ContentSlot] {
        match self {
            Self::Empty => &mut [],
            Self::Single(slot) => std::slice::from_mut(slot),
            Self::Multiple(slots) => slots,
        }
    }

    /// Combined state of all payloads.
    ///
    /// Multiple contents are ready once every inner payload is ready or
    /// failed, and failed only when all of them failed.
    pub fn state(&self) -> ContentState {
        let slots = match self {
            Self::Empty => return ContentState::Ready,
            Self::Single(slot) => return slot.state,
            Self::Multiple(slots) => slots,
        };
        let any = |state: ContentState| slots.iter().any(|s| s.state == state);
        if any(ContentState::Loading) {
            ContentState::Loading
        } else if any(ContentState::Processing) {
            ContentState::Processing
        } else if any(ContentState::Unloaded) {
            ContentState::Unloaded
        } else if any(ContentState::Expired) {
            ContentState::Expired
        } else if !slots.is_empty() && slots.iter().all(|s| s.state == ContentState::Failed) {
            ContentState::Failed
        } else {
            ContentState::Ready
        }
    }

    pub fn byte_length(&self) -> usize {
        self.slots().iter().map(ContentSlot::byte_length).sum()
    }
}
