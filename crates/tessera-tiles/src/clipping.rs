//! Clipping planes and clipping polygons that can cull whole tiles.

use glam::{DMat4, DVec3};

use crate::bounding_volume::{BoundingVolume, Intersect, Plane, PlaneIntersect};
use crate::ellipsoid::Ellipsoid;

/// Planes that clip away geometry on their negative side.
#[derive(Clone, Debug)]
pub struct ClippingPlaneCollection {
    planes: Vec<Plane>,
    /// Clip geometry outside *any* plane instead of outside *all* planes.
    pub union_clipping_regions: bool,
    pub enabled: bool,
    pub model_matrix: DMat4,
}

impl ClippingPlaneCollection {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self {
            planes,
            union_clipping_regions: false,
            enabled: true,
            model_matrix: DMat4::IDENTITY,
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn add(&mut self, plane: Plane) {
        self.planes.push(plane);
    }

    /// Classify a tile volume: `Outside` means fully clipped, `Inside` means untouched.
    ///
    /// `transform` maps the planes into the tile's frame before the model matrix.
    pub fn compute_intersection_with_bounding_volume(
        &self,
        volume: &BoundingVolume,
        transform: &DMat4,
    ) -> Intersect {
        let mut intersection = if self.union_clipping_regions {
            Intersect::Outside
        } else {
            Intersect::Inside
        };

        let to_world = *transform * self.model_matrix;
        for plane in &self.planes {
            let world_plane = plane.transform(&to_world);
            let value = volume.intersect_plane(&world_plane);
            if value == Intersect::Intersecting {
                intersection = value;
            } else if (self.union_clipping_regions && value == Intersect::Inside)
                || (!self.union_clipping_regions && value == Intersect::Outside)
            {
                return value;
            }
        }
        intersection
    }
}

/// A closed polygon of world positions, extruded along the surface normal.
#[derive(Clone, Debug)]
pub struct ClippingPolygon {
    pub positions: Vec<DVec3>,
    /// Extrusion below and above the polygon, in meters.
    pub minimum_height: f64,
    pub maximum_height: f64,
}

impl ClippingPolygon {
    pub fn new(positions: Vec<DVec3>) -> Self {
        Self {
            positions,
            minimum_height: -10_000.0,
            maximum_height: 10_000.0,
        }
    }

    /// World-space axis-aligned extent of the extruded polygon.
    fn extent(&self, ellipsoid: &Ellipsoid) -> Option<(DVec3, DVec3)> {
        let mut min = DVec3::splat(f64::MAX);
        let mut max = DVec3::splat(f64::MIN);
        for &p in &self.positions {
            let normal = ellipsoid.geodetic_surface_normal(p);
            for q in [p + normal * self.minimum_height, p + normal * self.maximum_height] {
                min = min.min(q);
                max = max.max(q);
            }
        }
        (!self.positions.is_empty()).then_some((min, max))
    }
}

/// Polygons that clip away the geometry inside them (or outside, when inverted).
#[derive(Clone, Debug, Default)]
pub struct ClippingPolygonCollection {
    polygons: Vec<ClippingPolygon>,
    pub inverse: bool,
    pub enabled: bool,
}

impl ClippingPolygonCollection {
    pub fn new(polygons: Vec<ClippingPolygon>) -> Self {
        Self {
            polygons,
            inverse: false,
            enabled: true,
        }
    }

    pub fn polygons(&self) -> &[ClippingPolygon] {
        &self.polygons
    }

    /// Classify a tile volume against the clipped region: `Inside` means the
    /// tile is entirely clipped.
    ///
    /// Each polygon is approximated by its extruded world-space extent.
    pub fn compute_intersection_with_bounding_volume(
        &self,
        volume: &BoundingVolume,
        ellipsoid: &Ellipsoid,
    ) -> Intersect {
        let sphere = volume.bounding_sphere();
        let mut result = Intersect::Outside;
        for polygon in &self.polygons {
            let Some((min, max)) = polygon.extent(ellipsoid) else {
                continue;
            };
            if sphere.is_within_aabb(min, max) {
                result = Intersect::Inside;
                break;
            }
            if sphere.touches_aabb(min, max) {
                result = Intersect::Intersecting;
            }
        }

        if !self.inverse {
            return result;
        }
        match result {
            Intersect::Inside => Intersect::Outside,
            Intersect::Outside => Intersect::Inside,
            Intersect::Intersecting => Intersect::Intersecting,
        }
    }
}
