//! Adaptive level-of-detail tile streaming.
//!
//! Streams a hierarchical tileset into a bounded memory budget: per-frame
//! visibility and screen-space error, request prioritization, throttled
//! background fetching with cancellation, content lifecycle, time-based
//! expiration, and least-recently-used eviction.

pub mod bounding_volume;
pub mod cache;
pub mod clipping;
pub mod content;
pub mod culling;
pub mod ellipsoid;
pub mod error;
pub mod events;
pub mod expiration;
pub mod fetcher;
pub mod frame;
pub mod header;
pub mod priority;
pub mod request;
pub mod resource;
pub mod scheduler;
pub mod statistics;
pub mod tile;
pub mod tileset;
pub mod time;
pub mod tree;
pub mod visibility;

pub use bounding_volume::{BoundingSphere, BoundingVolume, Intersect, OrientedBox, Plane};
pub use cache::{CacheBudget, EvictionPredicate};
pub use clipping::{ClippingPlaneCollection, ClippingPolygon, ClippingPolygonCollection};
pub use content::{Content, ContentFactoryTable, ContentState, PayloadKind, RawPayloadContent};
pub use ellipsoid::{Ellipsoid, VerticalExaggeration};
pub use error::{ContentError, FetchError, TileError};
pub use events::TilesetEvent;
pub use fetcher::{ByteFetcher, FileFetcher, HttpFetcher, MemoryFetcher};
pub use frame::{Camera, FrameState, Projection, TilesetPass, Viewport};
pub use priority::FoveationCurve;
pub use scheduler::{RequestScheduler, SchedulerConfig};
pub use statistics::TilesetStatistics;
pub use tile::{Refine, Tile, TileId};
pub use tileset::{RequestOutcome, Tileset, TilesetOptions};
pub use time::Timestamp;

#[cfg(test)]
mod tileset_tests;
