//! Tile bounding volumes: oriented boxes, geodetic regions and spheres.
//!
//! A [`BoundingVolumeSource`] holds the raw numbers from the tile header and
//! is re-derived into a world-space [`BoundingVolume`] whenever the tile's
//! accumulated transform or the vertical exaggeration changes.

use glam::{DMat3, DMat4, DVec3, DVec4};

use crate::ellipsoid::{Cartographic, Ellipsoid, VerticalExaggeration};
use crate::error::TileError;

/// Result of testing a volume against a plane or a set of planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intersect {
    /// Entirely on the positive side.
    Inside,
    /// Entirely on the negative side.
    Outside,
    /// Straddles the boundary.
    Intersecting,
}

/// A plane in Hessian normal form: points with `normal · p + distance >= 0`
/// are on the inside.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub normal: DVec3,
    pub distance: f64,
}

impl Plane {
    pub fn new(normal: DVec3, distance: f64) -> Self {
        Self { normal, distance }
    }

    /// Plane through `point` facing along `normal` (normalized here).
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        let normal = normal.normalize();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Plane from `(a, b, c, d)` coefficients, normalized so `(a, b, c)` is unit length.
    pub fn from_coefficients(v: DVec4) -> Self {
        let length = v.truncate().length();
        if length > 0.0 {
            Self::new(v.truncate() / length, v.w / length)
        } else {
            Self::new(v.truncate(), v.w)
        }
    }

    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }

    /// The plane moved by an affine transform.
    pub fn transform(&self, transform: &DMat4) -> Self {
        let point = self.normal * -self.distance;
        let point = transform.transform_point3(point);
        let normal = transform
            .inverse()
            .transpose()
            .transform_vector3(self.normal);
        Self::from_point_normal(point, normal)
    }
}

/// Anything that can be classified against a single plane.
pub trait PlaneIntersect {
    fn intersect_plane(&self, plane: &Plane) -> Intersect;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Distance from `point` to the sphere surface, 0 when inside.
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        (point.distance(self.center) - self.radius).max(0.0)
    }

    /// The sphere moved by an affine transform; the radius grows with the largest axis scale.
    pub fn transform(&self, transform: &DMat4) -> Self {
        let scale = transform
            .x_axis
            .truncate()
            .length()
            .max(transform.y_axis.truncate().length())
            .max(transform.z_axis.truncate().length());
        Self::new(transform.transform_point3(self.center), self.radius * scale)
    }

    /// Whether the sphere lies entirely within the axis-aligned box `[min, max]`.
    pub fn is_within_aabb(&self, min: DVec3, max: DVec3) -> bool {
        let r = DVec3::splat(self.radius);
        (self.center - r).cmpge(min).all() && (self.center + r).cmple(max).all()
    }

    /// Whether the sphere touches the axis-aligned box `[min, max]`.
    pub fn touches_aabb(&self, min: DVec3, max: DVec3) -> bool {
        let closest = self.center.clamp(min, max);
        closest.distance_squared(self.center) <= self.radius * self.radius
    }
}

impl PlaneIntersect for BoundingSphere {
    fn intersect_plane(&self, plane: &Plane) -> Intersect {
        let d = plane.signed_distance(self.center);
        if d < -self.radius {
            Intersect::Outside
        } else if d < self.radius {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }
}

/// A box given by its center and the three half-axis vectors (matrix columns).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

impl OrientedBox {
    pub fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Build from the 12-number `box` array: center, then the x, y and z half axes.
    pub fn from_array(values: &[f64; 12]) -> Self {
        Self::new(
            DVec3::new(values[0], values[1], values[2]),
            DMat3::from_cols(
                DVec3::new(values[3], values[4], values[5]),
                DVec3::new(values[6], values[7], values[8]),
                DVec3::new(values[9], values[10], values[11]),
            ),
        )
    }

    pub fn transform(&self, transform: &DMat4) -> Self {
        let rotation_scale = DMat3::from_mat4(*transform);
        Self::new(
            transform.transform_point3(self.center),
            rotation_scale * self.half_axes,
        )
    }

    /// Distance from `point` to the nearest point of the box, 0 when inside.
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        let offset = point - self.center;
        let axes = [
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        ];
        let lengths = axes.map(DVec3::length);
        let mut units = [DVec3::ZERO; 3];
        let mut degenerate = Vec::new();
        for i in 0..3 {
            if lengths[i] > f64::EPSILON {
                units[i] = axes[i] / lengths[i];
            } else {
                degenerate.push(i);
            }
        }
        // A flat box still measures distance off its plane.
        if let &[flat] = degenerate.as_slice() {
            let a = units[(flat + 1) % 3];
            let b = units[(flat + 2) % 3];
            units[flat] = a.cross(b).normalize_or_zero();
        }

        let mut distance_squared = 0.0;
        for i in 0..3 {
            let d = offset.dot(units[i]);
            let excess = if d < -lengths[i] {
                d + lengths[i]
            } else if d > lengths[i] {
                d - lengths[i]
            } else {
                0.0
            };
            distance_squared += excess * excess;
        }
        distance_squared.sqrt()
    }

    /// Sphere through the box corners.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        let (u, v, w) = (
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        );
        let radius = [u + v + w, u + v - w, u - v + w, v + w - u]
            .iter()
            .map(|corner| corner.length())
            .fold(0.0, f64::max);
        BoundingSphere::new(self.center, radius)
    }
}

impl PlaneIntersect for OrientedBox {
    fn intersect_plane(&self, plane: &Plane) -> Intersect {
        let n = plane.normal;
        let radius = n.dot(self.half_axes.x_axis).abs()
            + n.dot(self.half_axes.y_axis).abs()
            + n.dot(self.half_axes.z_axis).abs();
        let d = plane.signed_distance(self.center);
        if d <= -radius {
            Intersect::Outside
        } else if d >= radius {
            Intersect::Inside
        } else {
            Intersect::Intersecting
        }
    }
}

/// A geodetic region bounded by longitude, latitude and height.
///
/// Queries run against an oriented box aligned with the local east-north-up
/// frame at the region center, fit to a grid of samples across the region.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileRegion {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub minimum_height: f64,
    pub maximum_height: f64,
    oriented_box: OrientedBox,
}

const REGION_SAMPLES: usize = 5;

impl TileRegion {
    pub fn new(values: &[f64; 6], exaggeration: &VerticalExaggeration, ellipsoid: &Ellipsoid) -> Self {
        let [west, south, east, north, minimum_height, maximum_height] = *values;
        let minimum_height = exaggeration.apply_height(minimum_height);
        let maximum_height = exaggeration.apply_height(maximum_height);
        let east_unwrapped = if east < west {
            east + std::f64::consts::TAU
        } else {
            east
        };

        let center_longitude = (west + east_unwrapped) * 0.5;
        let center_latitude = (south + north) * 0.5;
        let origin = ellipsoid.cartographic_to_cartesian(Cartographic::new(
            center_longitude,
            center_latitude,
            0.0,
        ));
        let up = ellipsoid.geodetic_surface_normal(origin);
        let east_axis = DVec3::new(-center_longitude.sin(), center_longitude.cos(), 0.0);
        let north_axis = up.cross(east_axis).normalize();

        let mut min = DVec3::splat(f64::MAX);
        let mut max = DVec3::splat(f64::MIN);
        let steps = (REGION_SAMPLES - 1) as f64;
        for i in 0..REGION_SAMPLES {
            let longitude = west + (east_unwrapped - west) * i as f64 / steps;
            for j in 0..REGION_SAMPLES {
                let latitude = south + (north - south) * j as f64 / steps;
                for height in [minimum_height, maximum_height] {
                    let p = ellipsoid
                        .cartographic_to_cartesian(Cartographic::new(longitude, latitude, height))
                        - origin;
                    let local = DVec3::new(p.dot(east_axis), p.dot(north_axis), p.dot(up));
                    min = min.min(local);
                    max = max.max(local);
                }
            }
        }

        let local_center = (min + max) * 0.5;
        let half = (max - min) * 0.5;
        let center = origin
            + east_axis * local_center.x
            + north_axis * local_center.y
            + up * local_center.z;
        let oriented_box = OrientedBox::new(
            center,
            DMat3::from_cols(east_axis * half.x, north_axis * half.y, up * half.z),
        );

        Self {
            west,
            south,
            east,
            north,
            minimum_height,
            maximum_height,
            oriented_box,
        }
    }

    pub fn oriented_box(&self) -> &OrientedBox {
        &self.oriented_box
    }
}

/// A world-space bounding volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundingVolume {
    Box(OrientedBox),
    Region(TileRegion),
    Sphere(BoundingSphere),
}

impl BoundingVolume {
    /// Distance from `point` to the nearest point of the volume, 0 when inside.
    pub fn distance_to_point(&self, point: DVec3) -> f64 {
        match self {
            Self::Box(b) => b.distance_to_point(point),
            Self::Region(r) => r.oriented_box.distance_to_point(point),
            Self::Sphere(s) => s.distance_to_point(point),
        }
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        match self {
            Self::Box(b) => b.bounding_sphere(),
            Self::Region(r) => r.oriented_box.bounding_sphere(),
            Self::Sphere(s) => *s,
        }
    }

    pub fn center(&self) -> DVec3 {
        match self {
            Self::Box(b) => b.center,
            Self::Region(r) => r.oriented_box.center,
            Self::Sphere(s) => s.center,
        }
    }
}

impl PlaneIntersect for BoundingVolume {
    fn intersect_plane(&self, plane: &Plane) -> Intersect {
        match self {
            Self::Box(b) => b.intersect_plane(plane),
            Self::Region(r) => r.oriented_box.intersect_plane(plane),
            Self::Sphere(s) => s.intersect_plane(plane),
        }
    }
}

/// The raw bounding volume numbers from a tile header, validated at parse time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum BoundingVolumeSource {
    Box([f64; 12]),
    Region([f64; 6]),
    Sphere([f64; 4]),
}

impl BoundingVolumeSource {
    pub fn from_box(values: &[f64]) -> Result<Self, TileError> {
        Ok(Self::Box(fixed_array("box", values)?))
    }

    pub fn from_region(values: &[f64]) -> Result<Self, TileError> {
        Ok(Self::Region(fixed_array("region", values)?))
    }

    pub fn from_sphere(values: &[f64]) -> Result<Self, TileError> {
        Ok(Self::Sphere(fixed_array("sphere", values)?))
    }

    /// Derive the world-space volume.
    ///
    /// Regions are geodetic and ignore `transform`; boxes and spheres are
    /// transformed and then lifted along the surface normal when exaggerated.
    pub fn build(
        &self,
        transform: &DMat4,
        exaggeration: &VerticalExaggeration,
        ellipsoid: &Ellipsoid,
    ) -> BoundingVolume {
        match self {
            Self::Box(values) => {
                let mut b = OrientedBox::from_array(values).transform(transform);
                b.center = exaggeration.apply_position(b.center, ellipsoid);
                BoundingVolume::Box(b)
            }
            Self::Region(values) => {
                BoundingVolume::Region(TileRegion::new(values, exaggeration, ellipsoid))
            }
            Self::Sphere(values) => {
                let sphere = BoundingSphere::new(DVec3::new(values[0], values[1], values[2]), values[3]);
                let mut s = sphere.transform(transform);
                s.center = exaggeration.apply_position(s.center, ellipsoid);
                BoundingVolume::Sphere(s)
            }
        }
    }
}

fn fixed_array<const N: usize>(kind: &'static str, values: &[f64]) -> Result<[f64; N], TileError> {
    values
        .try_into()
        .map_err(|_| TileError::InvalidBoundingVolume {
            kind,
            expected: N,
            found: values.len(),
        })
}
