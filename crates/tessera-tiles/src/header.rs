//! Serde model of the tileset and tile header JSON.

use serde::Deserialize;
use serde_json::Value;

use crate::bounding_volume::BoundingVolumeSource;
use crate::error::TileError;
use crate::tile::Refine;

const S2_EXTENSION: &str = "3DTILES_bounding_volume_S2";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TilesetHeader {
    pub asset: AssetHeader,
    #[serde(default)]
    pub geometric_error: f64,
    pub root: TileHeader,
}

impl TilesetHeader {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TileError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetHeader {
    #[serde(default)]
    pub version: String,
    pub tileset_version: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileHeader {
    pub bounding_volume: Option<BoundingVolumeHeader>,
    pub viewer_request_volume: Option<BoundingVolumeHeader>,
    pub geometric_error: Option<f64>,
    pub refine: Option<String>,
    pub transform: Option<Vec<f64>>,
    pub content: Option<ContentHeader>,
    pub contents: Option<Vec<ContentHeader>>,
    pub expire: Option<ExpireHeader>,
    #[serde(default)]
    pub children: Vec<TileHeader>,
}

impl TileHeader {
    /// The validated bounding volume.
    pub fn bounding_volume(&self) -> Result<BoundingVolumeSource, TileError> {
        self.bounding_volume
            .as_ref()
            .ok_or(TileError::MissingBoundingVolume)?
            .to_source()
    }

    /// Parse `refine`, accepting lowercase spellings with a deprecation warning.
    pub fn refine(&self) -> Result<Option<Refine>, TileError> {
        self.refine.as_deref().map(Refine::parse).transpose()
    }

    /// The 16-element column-major transform, if present.
    pub fn transform(&self) -> Result<Option<[f64; 16]>, TileError> {
        self.transform
            .as_deref()
            .map(|values| {
                <[f64; 16]>::try_from(values)
                    .map_err(|_| TileError::InvalidTransform(values.len()))
            })
            .transpose()
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentHeader {
    #[serde(default)]
    pub uri: Option<String>,
    /// Pre-1.0 spelling of `uri`.
    #[serde(default)]
    pub url: Option<String>,
    pub bounding_volume: Option<BoundingVolumeHeader>,
}

impl ContentHeader {
    pub fn uri(&self) -> Result<&str, TileError> {
        match self.uri.as_deref().or(self.url.as_deref()) {
            Some(uri) if !uri.trim().is_empty() => Ok(uri),
            _ => Err(TileError::EmptyContentUri),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpireHeader {
    pub duration: Option<f64>,
    pub date: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct BoundingVolumeHeader {
    #[serde(rename = "box")]
    pub oriented_box: Option<Vec<f64>>,
    pub region: Option<Vec<f64>>,
    pub sphere: Option<Vec<f64>>,
    #[serde(default)]
    pub extensions: serde_json::Map<String, Value>,
}

impl BoundingVolumeHeader {
    /// Validate the volume; the first of box, region and sphere wins.
    pub fn to_source(&self) -> Result<BoundingVolumeSource, TileError> {
        if self.extensions.contains_key(S2_EXTENSION) {
            return Err(TileError::UnsupportedBoundingVolume(S2_EXTENSION.to_string()));
        }
        if let Some(values) = &self.oriented_box {
            return BoundingVolumeSource::from_box(values);
        }
        if let Some(values) = &self.region {
            return BoundingVolumeSource::from_region(values);
        }
        if let Some(values) = &self.sphere {
            return BoundingVolumeSource::from_sphere(values);
        }
        match self.extensions.keys().next() {
            Some(name) => Err(TileError::UnsupportedBoundingVolume(name.clone())),
            None => Err(TileError::MissingBoundingVolume),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal tileset parses with its root volume and children.
    #[test]
    fn test_parse_tileset() {
        let json = br#"{
            "asset": { "version": "1.0" },
            "geometricError": 500,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 100] },
                "geometricError": 100,
                "refine": "REPLACE",
                "content": { "uri": "root.b3dm" },
                "children": [
                    { "boundingVolume": { "box": [0,0,0, 1,0,0, 0,1,0, 0,0,1] }, "geometricError": 10 }
                ]
            }
        }"#;
        let header = TilesetHeader::from_slice(json).unwrap();
        assert_eq!(header.asset.version, "1.0");
        assert_eq!(header.geometric_error, 500.0);
        assert_eq!(header.root.children.len(), 1);
        assert!(matches!(
            header.root.bounding_volume(),
            Ok(BoundingVolumeSource::Sphere(_))
        ));
        assert_eq!(header.root.content.as_ref().unwrap().uri().unwrap(), "root.b3dm");
        assert_eq!(header.root.refine().unwrap(), Some(Refine::Replace));
    }

    /// A tile without a bounding volume is rejected.
    #[test]
    fn test_missing_bounding_volume() {
        let tile: TileHeader = serde_json::from_str(r#"{ "geometricError": 1 }"#).unwrap();
        assert!(matches!(
            tile.bounding_volume(),
            Err(TileError::MissingBoundingVolume)
        ));
    }

    /// S2 cells are recognized and rejected.
    #[test]
    fn test_s2_volume_unsupported() {
        let tile: TileHeader = serde_json::from_str(
            r#"{ "boundingVolume": { "extensions": { "3DTILES_bounding_volume_S2": { "token": "1" } } } }"#,
        )
        .unwrap();
        assert!(matches!(
            tile.bounding_volume(),
            Err(TileError::UnsupportedBoundingVolume(name)) if name == S2_EXTENSION
        ));
    }

    /// Empty content URIs are fatal.
    #[test]
    fn test_empty_content_uri() {
        let content: ContentHeader = serde_json::from_str(r#"{ "uri": "" }"#).unwrap();
        assert!(matches!(content.uri(), Err(TileError::EmptyContentUri)));
        let legacy: ContentHeader = serde_json::from_str(r#"{ "url": "a.pnts" }"#).unwrap();
        assert_eq!(legacy.uri().unwrap(), "a.pnts");
    }

    /// Transforms must hold 16 numbers.
    #[test]
    fn test_transform_length() {
        let tile: TileHeader =
            serde_json::from_str(r#"{ "transform": [1, 0, 0] }"#).unwrap();
        assert!(matches!(tile.transform(), Err(TileError::InvalidTransform(3))));
    }
}
