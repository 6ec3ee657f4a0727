//! View-frustum culling with per-plane masks.
//!
//! Each tile stores a bit mask of the frustum planes its bounding volume
//! straddles. Children only test the planes their parent straddled: a parent
//! fully inside a plane implies the child is too.

use glam::DMat4;

use crate::bounding_volume::{Intersect, Plane, PlaneIntersect};

/// The volume is outside at least one plane.
pub const MASK_OUTSIDE: u32 = 0xffff_ffff;
/// The volume is inside every plane.
pub const MASK_INSIDE: u32 = 0x0000_0000;
/// Nothing is known yet; every plane must be tested.
pub const MASK_INDETERMINATE: u32 = 0x7fff_ffff;

/// Plane indices into the frustum planes array.
const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A convex volume bounded by inward-facing planes.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CullingVolume {
    planes: Vec<Plane>,
}

impl CullingVolume {
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Extract the six frustum planes from a view-projection matrix with a
    /// `[0, 1]` depth range (Griggs-Hartmann).
    pub fn from_view_projection(view_projection: &DMat4) -> Self {
        let rows = [
            view_projection.row(0),
            view_projection.row(1),
            view_projection.row(2),
            view_projection.row(3),
        ];
        let mut coefficients = [rows[3]; 6];
        coefficients[LEFT] = rows[3] + rows[0];
        coefficients[RIGHT] = rows[3] - rows[0];
        coefficients[BOTTOM] = rows[3] + rows[1];
        coefficients[TOP] = rows[3] - rows[1];
        coefficients[NEAR] = rows[2];
        coefficients[FAR] = rows[3] - rows[2];

        Self {
            planes: coefficients.map(Plane::from_coefficients).to_vec(),
        }
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Classify a volume against every plane.
    pub fn compute_visibility(&self, volume: &impl PlaneIntersect) -> Intersect {
        let mut intersecting = false;
        for plane in &self.planes {
            match volume.intersect_plane(plane) {
                Intersect::Outside => return Intersect::Outside,
                Intersect::Intersecting => intersecting = true,
                Intersect::Inside => {}
            }
        }
        if intersecting {
            Intersect::Intersecting
        } else {
            Intersect::Inside
        }
    }

    /// Classify a volume, testing only the planes set in `parent_mask`.
    ///
    /// Returns [`MASK_OUTSIDE`], [`MASK_INSIDE`], or a mask of the planes the
    /// volume straddles. Planes past index 30 are always tested.
    pub fn compute_visibility_with_plane_mask(
        &self,
        volume: &impl PlaneIntersect,
        parent_mask: u32,
    ) -> u32 {
        if parent_mask == MASK_OUTSIDE || parent_mask == MASK_INSIDE {
            return parent_mask;
        }

        let mut mask = MASK_INSIDE;
        for (k, plane) in self.planes.iter().enumerate() {
            let flag = if k < 31 { 1u32 << k } else { 0 };
            if k < 31 && parent_mask & flag == 0 {
                continue;
            }
            match volume.intersect_plane(plane) {
                Intersect::Outside => return MASK_OUTSIDE,
                Intersect::Intersecting => mask |= flag,
                Intersect::Inside => {}
            }
        }
        mask
    }
}
