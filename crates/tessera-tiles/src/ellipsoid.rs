//! Reference ellipsoid and vertical exaggeration.
//!
//! Regions are expressed in geodetic coordinates, and exaggeration moves
//! volumes along the geodetic surface normal, so both need the ellipsoid.

use glam::DVec3;

const CENTER_TOLERANCE_SQUARED: f64 = 0.1;
const SURFACE_EPSILON: f64 = 1e-12;
const MAX_SURFACE_ITERATIONS: usize = 64;

/// A geodetic position: longitude and latitude in radians, height in meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cartographic {
    pub longitude: f64,
    pub latitude: f64,
    pub height: f64,
}

impl Cartographic {
    pub fn new(longitude: f64, latitude: f64, height: f64) -> Self {
        Self {
            longitude,
            latitude,
            height,
        }
    }
}

/// A triaxial ellipsoid centered at the origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipsoid {
    radii: DVec3,
    radii_squared: DVec3,
    one_over_radii: DVec3,
    one_over_radii_squared: DVec3,
}

impl Ellipsoid {
    /// Create an ellipsoid from its three radii in meters.
    pub fn new(radii: DVec3) -> Self {
        Self {
            radii,
            radii_squared: radii * radii,
            one_over_radii: DVec3::ONE / radii,
            one_over_radii_squared: DVec3::ONE / (radii * radii),
        }
    }

    /// The WGS84 ellipsoid.
    pub fn wgs84() -> Self {
        Self::new(DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179))
    }

    pub fn radii(&self) -> DVec3 {
        self.radii
    }

    /// Unit normal to the ellipsoid surface at (or above) `position`.
    pub fn geodetic_surface_normal(&self, position: DVec3) -> DVec3 {
        (position * self.one_over_radii_squared).normalize_or_zero()
    }

    /// Unit normal to the ellipsoid surface at a geodetic position.
    pub fn geodetic_surface_normal_cartographic(&self, cartographic: Cartographic) -> DVec3 {
        let cos_latitude = cartographic.latitude.cos();
        DVec3::new(
            cos_latitude * cartographic.longitude.cos(),
            cos_latitude * cartographic.longitude.sin(),
            cartographic.latitude.sin(),
        )
        .normalize()
    }

    /// Convert a geodetic position to earth-centered, earth-fixed coordinates.
    pub fn cartographic_to_cartesian(&self, cartographic: Cartographic) -> DVec3 {
        let normal = self.geodetic_surface_normal_cartographic(cartographic);
        let k = self.radii_squared * normal;
        let gamma = normal.dot(k).sqrt();
        k / gamma + normal * cartographic.height
    }

    /// Convert an earth-fixed position to geodetic coordinates.
    ///
    /// Returns `None` near the ellipsoid center, where the result is undefined.
    pub fn cartesian_to_cartographic(&self, position: DVec3) -> Option<Cartographic> {
        let surface = self.scale_to_geodetic_surface(position)?;
        let normal = self.geodetic_surface_normal(surface);
        let offset = position - surface;
        let longitude = normal.y.atan2(normal.x);
        let latitude = normal.z.clamp(-1.0, 1.0).asin();
        let height = offset.dot(position).signum() * offset.length();
        Some(Cartographic::new(longitude, latitude, height))
    }

    /// Project `position` onto the surface along the geodetic normal.
    pub fn scale_to_geodetic_surface(&self, position: DVec3) -> Option<DVec3> {
        let scaled = position * self.one_over_radii;
        let squared = scaled * scaled;
        let squared_norm = squared.x + squared.y + squared.z;
        let ratio = (1.0 / squared_norm).sqrt();
        let intersection = position * ratio;

        if squared_norm < CENTER_TOLERANCE_SQUARED {
            return ratio.is_finite().then_some(intersection);
        }

        let oors = self.one_over_radii_squared;
        let gradient = intersection * oors * 2.0;
        let mut lambda = (1.0 - ratio) * position.length() / (0.5 * gradient.length());
        let mut correction = 0.0;
        let mut multiplier = DVec3::ONE;

        for _ in 0..MAX_SURFACE_ITERATIONS {
            lambda -= correction;
            multiplier = DVec3::ONE / (DVec3::ONE + oors * lambda);
            let m2 = multiplier * multiplier;
            let m3 = m2 * multiplier;
            let func = squared.dot(m2) - 1.0;
            if func.abs() <= SURFACE_EPSILON {
                break;
            }
            let denominator = (squared * m3 * oors).element_sum();
            correction = func / (-2.0 * denominator);
        }

        Some(position * multiplier)
    }
}

impl Default for Ellipsoid {
    fn default() -> Self {
        Self::wgs84()
    }
}

/// Scales heights above a reference height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VerticalExaggeration {
    pub exaggeration: f64,
    pub relative_height: f64,
}

impl VerticalExaggeration {
    pub const NONE: Self = Self {
        exaggeration: 1.0,
        relative_height: 0.0,
    };

    pub fn new(exaggeration: f64, relative_height: f64) -> Self {
        Self {
            exaggeration,
            relative_height,
        }
    }

    pub fn is_identity(&self) -> bool {
        self.exaggeration == 1.0
    }

    /// Exaggerated height for a raw height in meters.
    pub fn apply_height(&self, height: f64) -> f64 {
        (height - self.relative_height) * self.exaggeration + self.relative_height
    }

    /// Move `position` along the geodetic normal to its exaggerated height.
    pub fn apply_position(&self, position: DVec3, ellipsoid: &Ellipsoid) -> DVec3 {
        if self.is_identity() {
            return position;
        }
        let Some(cartographic) = ellipsoid.cartesian_to_cartographic(position) else {
            return position;
        };
        let normal = ellipsoid.geodetic_surface_normal(position);
        let difference = self.apply_height(cartographic.height) - cartographic.height;
        position + normal * difference
    }
}

impl Default for VerticalExaggeration {
    fn default() -> Self {
        Self::NONE
    }
}
