//! Screen-space error and the other per-tile scalars derived from the camera.

use crate::frame::FrameState;
use crate::priority::ProgressiveResolution;

/// Lower the error of distant tiles, as if they were hidden by fog.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DynamicScreenSpaceError {
    pub density: f64,
    pub factor: f64,
}

/// `1 - exp(-(distance * density)^2)`
pub fn fog(distance: f64, density: f64) -> f64 {
    let scalar = distance * density;
    1.0 - (-(scalar * scalar)).exp()
}

/// Projected geometric error in pixels for a tile `distance` meters away.
///
/// `viewport_height` is passed separately so the progressive-resolution
/// error can use a reduced height.
pub fn screen_space_error(
    geometric_error: f64,
    distance: f64,
    viewport_height: f64,
    frame: &FrameState,
    dynamic: Option<&DynamicScreenSpaceError>,
) -> f64 {
    if geometric_error == 0.0 {
        return 0.0;
    }
    let mut error = match frame.orthographic_pixel_size() {
        Some(pixel_size) => geometric_error / pixel_size,
        None => {
            let distance = distance.max(1e-7);
            let mut error =
                geometric_error * viewport_height / (distance * frame.camera.sse_denominator());
            if let Some(dynamic) = dynamic {
                error -= fog(distance, dynamic.density) * dynamic.factor;
            }
            error
        }
    };
    error /= frame.pixel_ratio;
    error
}

/// Error relative to the root, larger for tiles that matter more.
///
/// The parent's error stands in for the tile's own when levels are not
/// skipped, when the tile has no error, or when the parent is the entry
/// point of external or implicit content.
pub fn reverse_screen_space_error(
    root_screen_space_error: f64,
    screen_space_error: f64,
    parent: Option<(f64, bool)>,
    skip_level_of_detail: bool,
) -> f64 {
    let use_parent = match parent {
        Some((_, parent_has_structural_content)) => {
            !skip_level_of_detail || screen_space_error == 0.0 || parent_has_structural_content
        }
        None => false,
    };
    let error = match parent {
        Some((parent_error, _)) if use_parent => parent_error,
        _ => screen_space_error,
    };
    root_screen_space_error - error
}

/// Classify a tile for progressive resolution.
///
/// `height_fraction` must be in `(0, 0.5]`, otherwise the feature is off.
pub fn progressive_resolution(
    height_fraction: f64,
    progressive_screen_space_error: f64,
    parent_progressive_screen_space_error: Option<f64>,
    maximum_screen_space_error: f64,
    memory_adjusted_screen_space_error: f64,
) -> ProgressiveResolution {
    if height_fraction <= 0.0 || height_fraction > 0.5 {
        return ProgressiveResolution::None;
    }
    let leaf = progressive_screen_space_error <= memory_adjusted_screen_space_error
        && parent_progressive_screen_space_error
            .is_some_and(|parent| parent > memory_adjusted_screen_space_error);
    if leaf {
        ProgressiveResolution::ScreenSpaceErrorLeaf
    } else if progressive_screen_space_error > maximum_screen_space_error {
        ProgressiveResolution::Coarse
    } else {
        ProgressiveResolution::None
    }
}

/// Raise the error threshold while memory is over budget, relax it back
/// once usage drops under `cache_bytes`.
pub fn update_memory_adjusted_screen_space_error(
    current: f64,
    maximum_screen_space_error: f64,
    total_bytes: u64,
    cache_bytes: u64,
    maximum_cache_overflow_bytes: u64,
) -> f64 {
    if total_bytes > cache_bytes.saturating_add(maximum_cache_overflow_bytes) {
        current * 1.02
    } else if total_bytes < cache_bytes && current > maximum_screen_space_error {
        (current * 0.98).max(maximum_screen_space_error)
    } else {
        current
    }
}

/// Whether the camera moves too fast, relative to the tile size, for the
/// tile to be worth requesting.
pub fn is_culled_while_moving(camera_movement: f64, bounding_radius: f64, multiplier: f64) -> bool {
    let diameter = (bounding_radius * 2.0).max(1.0);
    multiplier * camera_movement / diameter >= 1.0
}
