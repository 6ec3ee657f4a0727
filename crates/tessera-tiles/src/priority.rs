//! Request priority encoding.
//!
//! Several heuristics are folded into one `f64` where lower is more urgent.
//! Each heuristic owns a band of decimal digits, most significant first:
//!
//! ```text
//! preload flight (1) | foveated defer (1) | foveated factor (4) | progressive (1) | sorting (4) . depth
//! ```
//!
//! Normalized values are pulled just below 1 so a full-scale value never
//! carries into the neighboring band.

use glam::DVec3;
use tessera_config::FoveatedCurve;

use crate::bounding_volume::BoundingSphere;
use crate::frame::{Camera, TilesetPass};

pub const EPSILON7: f64 = 1e-7;

const SORTING_DIGITS: u32 = 4;
const SORTING_SHIFT: u32 = 0;
const PROGRESSIVE_SHIFT: u32 = 4;
const FOVEATED_DIGITS: u32 = 4;
const FOVEATED_SHIFT: u32 = 5;
const FOVEATED_DEFER_SCALE: f64 = 1e9;
const PRELOAD_FLIGHT_SCALE: f64 = 1e10;

/// Minimum and maximum of one heuristic over the tiles visited this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const EMPTY: Self = Self {
        min: f64::MAX,
        max: -f64::MAX,
    };

    pub fn include(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }
}

impl Default for ValueRange {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Per-frame ranges used to normalize every heuristic.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PriorityBounds {
    pub depth: ValueRange,
    pub distance: ValueRange,
    pub foveated_factor: ValueRange,
    pub reverse_screen_space_error: ValueRange,
}

impl PriorityBounds {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn include(&mut self, inputs: &PriorityInputs) {
        self.depth.include(inputs.depth);
        self.distance.include(inputs.distance);
        self.foveated_factor.include(inputs.foveated_factor);
        self.reverse_screen_space_error
            .include(inputs.reverse_screen_space_error);
    }
}

/// Progressive-resolution class of a tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgressiveResolution {
    #[default]
    None,
    /// Would refine even at the reduced resolution.
    Coarse,
    /// Meets the screen-space error at the reduced resolution while its parent does not.
    ScreenSpaceErrorLeaf,
}

impl ProgressiveResolution {
    fn digit(self) -> f64 {
        match self {
            Self::ScreenSpaceErrorLeaf => 0.0,
            Self::Coarse => 1.0,
            Self::None => 2.0,
        }
    }
}

/// The per-tile values a priority is computed from.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PriorityInputs {
    pub depth: f64,
    pub distance: f64,
    pub foveated_factor: f64,
    pub reverse_screen_space_error: f64,
    /// Sort by distance instead of reverse screen-space error.
    pub use_distance: bool,
    pub progressive: ProgressiveResolution,
    pub deferred: bool,
    pub preload_flight: bool,
}

/// Reverse screen-space error orders REPLACE tiles when levels are skipped;
/// everything else orders by camera distance.
pub fn sorts_by_distance(refine_replace: bool, skip_level_of_detail: bool) -> bool {
    !(refine_replace && skip_level_of_detail)
}

/// `max(clamp((value - min) / (max - min), 0, 1) - EPSILON7, 0)`, or 0 for an empty range.
pub fn normalize_and_clamp(value: f64, range: &ValueRange) -> f64 {
    let span = range.max - range.min;
    let normalized = if span > 0.0 {
        ((value - range.min) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (normalized - EPSILON7).max(0.0)
}

/// Keep the leading `digits` decimal digits of a normalized value and shift
/// them `shift` places left.
pub fn isolate_digits(normalized: f64, digits: u32, shift: u32) -> f64 {
    let scaled = (normalized * 10f64.powi(digits as i32)).trunc();
    scaled * 10f64.powi(shift as i32)
}

/// Fold the inputs into a single priority; lower is more urgent.
///
/// Larger reverse screen-space error sorts first, and shallower tiles sort
/// first unless `prefer_leaves` is set.
pub fn encode_priority(inputs: &PriorityInputs, bounds: &PriorityBounds, prefer_leaves: bool) -> f64 {
    let normalized_depth = normalize_and_clamp(inputs.depth, &bounds.depth);
    let depth_digits = if prefer_leaves {
        (1.0 - normalized_depth - EPSILON7).max(0.0)
    } else {
        normalized_depth
    };

    let sorting = if inputs.use_distance {
        normalize_and_clamp(inputs.distance, &bounds.distance)
    } else {
        let reverse = normalize_and_clamp(
            inputs.reverse_screen_space_error,
            &bounds.reverse_screen_space_error,
        );
        (1.0 - reverse - EPSILON7).max(0.0)
    };
    let sorting_digits = isolate_digits(sorting, SORTING_DIGITS, SORTING_SHIFT);

    let progressive_digits = inputs.progressive.digit() * 10f64.powi(PROGRESSIVE_SHIFT as i32);

    let foveated = normalize_and_clamp(inputs.foveated_factor, &bounds.foveated_factor);
    let foveated_digits = isolate_digits(foveated, FOVEATED_DIGITS, FOVEATED_SHIFT);

    let defer_digits = if inputs.deferred {
        FOVEATED_DEFER_SCALE
    } else {
        0.0
    };
    // Speculative preloading sorts behind all real work.
    let preload_flight_digits = if inputs.preload_flight {
        PRELOAD_FLIGHT_SCALE
    } else {
        0.0
    };

    depth_digits
        + sorting_digits
        + progressive_digits
        + foveated_digits
        + defer_digits
        + preload_flight_digits
}

/// Angular distance of a tile from the view center: 0 when the view ray
/// passes through the bounding sphere, growing towards 1 as the sphere leaves
/// the line of sight.
pub fn foveated_factor(camera: &Camera, sphere: &BoundingSphere) -> f64 {
    let along_view = (sphere.center - camera.position).dot(camera.direction);
    let closest_on_line = camera.position + camera.direction * along_view;
    let to_line = closest_on_line - sphere.center;
    if to_line.length() <= sphere.radius {
        return 0.0;
    }
    let closest_on_sphere = sphere.center + to_line.normalize() * sphere.radius;
    let to_closest = (closest_on_sphere - camera.position).normalize_or(DVec3::ZERO);
    1.0 - camera.direction.dot(to_closest).abs()
}

/// Interpolates the screen-space error relaxation across the periphery.
pub trait FoveationCurve: Send + Sync {
    /// Value between `start` (at the cone edge) and `end` (at the screen edge) for `t` in `[0, 1]`.
    fn interpolate(&self, start: f64, end: f64, t: f64) -> f64;
}

impl<F> FoveationCurve for F
where
    F: Fn(f64, f64, f64) -> f64 + Send + Sync,
{
    fn interpolate(&self, start: f64, end: f64, t: f64) -> f64 {
        self(start, end, t)
    }
}

pub fn linear(start: f64, end: f64, t: f64) -> f64 {
    start + (end - start) * t
}

pub fn smooth_step(start: f64, end: f64, t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    linear(start, end, t * t * (3.0 - 2.0 * t))
}

/// The curve selected in the config.
pub fn curve_for(kind: FoveatedCurve) -> Box<dyn FoveationCurve> {
    match kind {
        FoveatedCurve::Linear => Box::new(linear),
        FoveatedCurve::SmoothStep => Box::new(smooth_step),
    }
}

/// Tileset-wide foveation settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FoveationSettings {
    pub enabled: bool,
    pub cone_size: f64,
    pub minimum_relaxation: f64,
    pub skip_level_of_detail: bool,
}

/// The tile values deferral depends on.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeferralInputs {
    pub refine_replace: bool,
    pub progressive: bool,
    pub foveated_factor: f64,
    pub screen_space_error: f64,
    pub parent_screen_space_error: Option<f64>,
}

/// Whether a tile in the periphery should wait behind tiles near the view center.
#[allow(clippy::too_many_arguments)]
pub fn is_priority_deferred(
    tile: &DeferralInputs,
    settings: &FoveationSettings,
    curve: &dyn FoveationCurve,
    memory_adjusted_sse: f64,
    fov_y: f64,
    pass: TilesetPass,
) -> bool {
    let skip = settings.skip_level_of_detail;
    if (tile.refine_replace && !skip)
        || !settings.enabled
        || settings.cone_size == 1.0
        || (tile.progressive && tile.refine_replace && skip)
        || matches!(pass, TilesetPass::Preload | TilesetPass::PreloadFlight)
    {
        return false;
    }

    let maximum_factor = 1.0 - (fov_y * 0.5).cos();
    let cone_factor = settings.cone_size * maximum_factor;
    if tile.foveated_factor <= cone_factor {
        return false;
    }

    let range = maximum_factor - cone_factor;
    let t = if range > 0.0 {
        ((tile.foveated_factor - cone_factor) / range).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let relaxation = curve.interpolate(settings.minimum_relaxation, memory_adjusted_sse, t);
    let sse = match tile.parent_screen_space_error {
        Some(parent) if tile.screen_space_error == 0.0 => parent * 0.5,
        _ => tile.screen_space_error,
    };
    memory_adjusted_sse - relaxation <= sse
}
