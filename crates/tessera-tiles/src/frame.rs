//! Per-frame camera and viewport state shared by every tile query.

use glam::{DMat4, DVec3};

use crate::culling::CullingVolume;
use crate::time::Timestamp;

/// Camera projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// `fov_y` in radians, `aspect` = width / height.
    Perspective { fov_y: f64, aspect: f64 },
    /// `width` of the view volume in meters, `aspect` = width / height.
    Orthographic { width: f64, aspect: f64 },
}

/// A camera in world (earth-fixed) coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub position: DVec3,
    /// Unit view direction.
    pub direction: DVec3,
    pub up: DVec3,
    pub projection: Projection,
    pub near: f64,
    pub far: f64,
}

impl Camera {
    /// A perspective camera at `position` looking towards `target`.
    pub fn perspective(position: DVec3, target: DVec3, up: DVec3, fov_y: f64, aspect: f64) -> Self {
        Self {
            position,
            direction: (target - position).normalize(),
            up,
            projection: Projection::Perspective { fov_y, aspect },
            near: 1.0,
            far: 5.0e8,
        }
    }

    pub fn with_clip_planes(mut self, near: f64, far: f64) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn view_matrix(&self) -> DMat4 {
        DMat4::look_to_rh(self.position, self.direction, self.up)
    }

    pub fn projection_matrix(&self) -> DMat4 {
        match self.projection {
            Projection::Perspective { fov_y, aspect } => {
                DMat4::perspective_rh(fov_y, aspect, self.near, self.far)
            }
            Projection::Orthographic { width, aspect } => {
                let half_width = width * 0.5;
                let half_height = half_width / aspect;
                DMat4::orthographic_rh(
                    -half_width,
                    half_width,
                    -half_height,
                    half_height,
                    self.near,
                    self.far,
                )
            }
        }
    }

    pub fn culling_volume(&self) -> CullingVolume {
        CullingVolume::from_view_projection(&(self.projection_matrix() * self.view_matrix()))
    }

    /// Vertical field of view in radians, 0 for orthographic cameras.
    pub fn fov_y(&self) -> f64 {
        match self.projection {
            Projection::Perspective { fov_y, .. } => fov_y,
            Projection::Orthographic { .. } => 0.0,
        }
    }

    /// `2 tan(fov_y / 2)`: the perspective screen-space error denominator.
    pub fn sse_denominator(&self) -> f64 {
        2.0 * (self.fov_y() * 0.5).tan()
    }
}

/// Drawing buffer size in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Why the tileset is being traversed this frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TilesetPass {
    #[default]
    Render,
    /// Loading tiles for a view that is not yet shown.
    Preload,
    /// Loading tiles at the destination of a camera flight.
    PreloadFlight,
}

/// Everything a tile needs to know about the current frame.
#[derive(Clone, Debug)]
pub struct FrameState {
    pub frame_number: u64,
    pub time: Timestamp,
    pub camera: Camera,
    pub culling_volume: CullingVolume,
    pub viewport: Viewport,
    pub pixel_ratio: f64,
    pub pass: TilesetPass,
    /// Distance the camera moved since the previous frame, in meters.
    pub camera_movement: f64,
}

impl FrameState {
    pub fn new(frame_number: u64, time: Timestamp, camera: Camera, viewport: Viewport) -> Self {
        Self {
            frame_number,
            time,
            culling_volume: camera.culling_volume(),
            camera,
            viewport,
            pixel_ratio: 1.0,
            pass: TilesetPass::Render,
            camera_movement: 0.0,
        }
    }

    pub fn with_pass(mut self, pass: TilesetPass) -> Self {
        self.pass = pass;
        self
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    pub fn with_camera_movement(mut self, meters: f64) -> Self {
        self.camera_movement = meters;
        self
    }

    pub fn is_camera_moving(&self) -> bool {
        self.camera_movement > 0.0
    }

    /// Size of one pixel in meters for an orthographic camera.
    pub fn orthographic_pixel_size(&self) -> Option<f64> {
        match self.camera.projection {
            Projection::Orthographic { width, aspect } => {
                let height = width / aspect;
                Some(width.max(height) / self.viewport.width.max(self.viewport.height))
            }
            Projection::Perspective { .. } => None,
        }
    }
}
