//! Error types for tileset construction, byte transfer and content building.

use crate::content::PayloadKind;

/// Fatal errors raised while building the tile hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    /// A tile header has no `boundingVolume`.
    #[error("tile header is missing a boundingVolume")]
    MissingBoundingVolume,

    /// `refine` is neither `REPLACE` nor `ADD`.
    #[error("invalid refine value {0:?}; expected \"REPLACE\" or \"ADD\"")]
    InvalidRefine(String),

    /// A `content` entry has an empty `uri`.
    #[error("tile content has an empty uri")]
    EmptyContentUri,

    /// `transform` does not hold 16 numbers.
    #[error("tile transform must have 16 elements, found {0}")]
    InvalidTransform(usize),

    /// A bounding volume array has the wrong length.
    #[error("{kind} bounding volume must have {expected} elements, found {found}")]
    InvalidBoundingVolume {
        /// `box`, `region` or `sphere`.
        kind: &'static str,
        /// Required array length.
        expected: usize,
        /// Actual array length.
        found: usize,
    },

    /// A bounding volume of a recognized but unsupported kind.
    #[error("unsupported bounding volume: {0}")]
    UnsupportedBoundingVolume(String),

    /// `expire.date` is not an ISO-8601 date.
    #[error("invalid expire date {0:?}")]
    InvalidExpireDate(String),

    /// The tileset JSON could not be fetched.
    #[error("failed to fetch tileset: {0}")]
    Fetch(#[from] FetchError),

    /// The tileset JSON could not be parsed.
    #[error("failed to parse tileset JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A fetch worker thread could not be started.
    #[error("failed to spawn fetch worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Errors raised by a [`ByteFetcher`](crate::fetcher::ByteFetcher).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Reading a local file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Resolved filesystem path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server answered with a non-success status.
    #[error("request for {url} failed with status {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The connection failed before a response arrived.
    #[error("request for {url} failed: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Transport error description.
        message: String,
    },

    /// No payload exists for the resource.
    #[error("resource not found: {0}")]
    NotFound(String),
}

/// Errors raised while turning fetched bytes into tile content.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    /// The payload matched no known magic or JSON shape.
    #[error("unrecognized tile content payload")]
    UnrecognizedPayload,

    /// No factory is registered for the payload kind.
    #[error("no content factory registered for {0}")]
    UnsupportedKind(PayloadKind),

    /// An external tileset payload could not be attached.
    #[error("invalid external tileset: {0}")]
    ExternalTileset(#[from] TileError),

    /// A content factory rejected the payload.
    #[error("content factory failed: {0}")]
    Factory(String),
}
