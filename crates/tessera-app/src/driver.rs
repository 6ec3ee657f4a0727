//! Headless frame driver: an orbiting camera and a screen-space-error
//! traversal feeding the tileset once per frame.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use glam::DVec3;
use tessera_config::ViewConfig;
use tessera_tiles::{
    BoundingSphere, ByteFetcher, Camera, FileFetcher, FrameState, HttpFetcher, RequestOutcome,
    Tileset, TilesetEvent, Timestamp, Viewport,
};

/// Target frame interval: 60 Hz.
pub const FRAME_INTERVAL: f64 = 1.0 / 60.0;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the tileset comes from.
pub struct Source {
    pub fetcher: Arc<dyn ByteFetcher>,
    /// URL of the tileset JSON as seen by `fetcher`.
    pub url: String,
}

/// HTTP(S) sources are fetched over the network; anything else is a local
/// path whose parent directory becomes the fetcher's base.
pub fn open_source(source: &str) -> Source {
    if source.starts_with("http://") || source.starts_with("https://") {
        return Source {
            fetcher: Arc::new(HttpFetcher::new(HTTP_TIMEOUT)),
            url: source.to_string(),
        };
    }
    let path = Path::new(source);
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => Source {
            fetcher: Arc::new(FileFetcher::new(parent)),
            url: name.to_string_lossy().into_owned(),
        },
        _ => Source {
            fetcher: Arc::new(FileFetcher::default()),
            url: source.to_string(),
        },
    }
}

/// Circles a bounding sphere at a fixed elevation.
#[derive(Clone, Copy, Debug)]
pub struct Orbit {
    pub center: DVec3,
    pub radius: f64,
    /// Local up at the center.
    pub up: DVec3,
    /// Frames per full revolution.
    pub period: f64,
}

impl Orbit {
    const ELEVATION: f64 = std::f64::consts::FRAC_PI_6;

    pub fn around(sphere: &BoundingSphere) -> Self {
        // Earth-centered tilesets use the geocentric up; local ones use +Z.
        let up = if sphere.center.length() > 1.0 {
            sphere.center.normalize()
        } else {
            DVec3::Z
        };
        Self {
            center: sphere.center,
            radius: (sphere.radius * 2.5).max(10.0),
            up,
            period: 600.0,
        }
    }

    pub fn position(&self, frame_number: u64) -> DVec3 {
        let east = self.up.any_orthonormal_vector();
        let north = self.up.cross(east);
        let angle = std::f64::consts::TAU * frame_number as f64 / self.period;
        let horizontal = (east * angle.cos() + north * angle.sin()) * Self::ELEVATION.cos();
        self.center + (horizontal + self.up * Self::ELEVATION.sin()) * self.radius
    }

    pub fn camera(&self, frame_number: u64, view: &ViewConfig) -> Camera {
        let aspect = f64::from(view.viewport_width) / f64::from(view.viewport_height.max(1));
        Camera::perspective(
            self.position(frame_number),
            self.center,
            self.up,
            view.fov_y_degrees.to_radians(),
            aspect,
        )
        .with_clip_planes(view.near, view.far)
    }
}

/// What one frame did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub visited: usize,
    /// Renderable tiles chosen for display.
    pub selected: usize,
    pub requested: usize,
    pub loaded: usize,
    pub unloaded: usize,
    pub failed: usize,
}

/// Owns a tileset and advances it one frame at a time.
pub struct Driver {
    tileset: Tileset,
    orbit: Orbit,
    view: ViewConfig,
    frame_number: u64,
    previous_position: Option<DVec3>,
}

impl Driver {
    pub fn new(tileset: Tileset, view: &ViewConfig) -> Self {
        let root = tileset.root();
        let sphere = tileset
            .tile(root)
            .map(|tile| tile.bounding_volume.bounding_sphere())
            .unwrap_or(BoundingSphere {
                center: DVec3::ZERO,
                radius: 1.0,
            });
        Self {
            orbit: Orbit::around(&sphere),
            tileset,
            view: view.clone(),
            frame_number: 0,
            previous_position: None,
        }
    }

    pub fn tileset(&self) -> &Tileset {
        &self.tileset
    }

    pub fn orbit(&self) -> &Orbit {
        &self.orbit
    }

    /// The frame state for the next frame at `time`.
    pub fn frame_state(&self, time: Timestamp) -> FrameState {
        let frame_number = self.frame_number + 1;
        let camera = self.orbit.camera(frame_number, &self.view);
        let movement = self
            .previous_position
            .map_or(0.0, |previous| previous.distance(camera.position));
        let viewport = Viewport::new(
            f64::from(self.view.viewport_width),
            f64::from(self.view.viewport_height),
        );
        FrameState::new(frame_number, time, camera, viewport)
            .with_pixel_ratio(self.view.pixel_ratio)
            .with_camera_movement(movement)
    }

    /// Run one frame at `time`.
    pub fn step(&mut self, time: Timestamp) -> FrameReport {
        let frame = self.frame_state(time);
        self.frame_number = frame.frame_number;
        self.previous_position = Some(frame.camera.position);

        self.tileset.begin_frame(&frame);
        let mut report = traverse(&mut self.tileset, &frame);
        self.tileset.update(&frame);
        self.tileset.end_frame(&frame);

        for event in self.tileset.drain_events() {
            match event {
                TilesetEvent::TileLoad(_) => report.loaded += 1,
                TilesetEvent::TileUnload(_) => report.unloaded += 1,
                TilesetEvent::TileFailed { .. } => report.failed += 1,
                TilesetEvent::InitialTilesLoaded => {
                    tracing::info!("Initial tiles loaded at frame {}", frame.frame_number);
                }
                TilesetEvent::LoadProgress { .. } | TilesetEvent::AllTilesLoaded => {}
            }
        }
        report
    }
}

/// Depth-first screen-space-error traversal. Parents are updated before
/// their children; tiles that need refinement descend, the rest are selected.
fn traverse(tileset: &mut Tileset, frame: &FrameState) -> FrameReport {
    let mut report = FrameReport::default();
    let mut stack = vec![tileset.root()];
    while let Some(id) = stack.pop() {
        report.visited += 1;
        if !tileset.update_visibility(id, frame) {
            continue;
        }
        tileset.touch(id);
        tileset.update_expiration(id, frame);

        let Some(tile) = tileset.tile(id) else {
            continue;
        };
        let children = tile.children().to_vec();
        let renderable = tile.is_renderable() && !tile.has_empty_content();
        let wants_content = !tile.has_empty_content() && !tile.is_content_ready();

        if wants_content && tileset.request_content(id, frame) == RequestOutcome::Started {
            report.requested += 1;
        }
        if tileset.needs_refinement(id) && !children.is_empty() {
            stack.extend(children);
        } else if renderable {
            report.selected += 1;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tessera_tiles::{MemoryFetcher, TilesetOptions};

    const TILESET: &str = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 1000,
        "root": {
            "boundingVolume": {"sphere": [0, 0, 0, 100]},
            "geometricError": 500,
            "refine": "REPLACE",
            "content": {"uri": "root.b3dm"},
            "children": [{
                "boundingVolume": {"sphere": [0, 0, 0, 50]},
                "geometricError": 0,
                "content": {"uri": "child.b3dm"}
            }]
        }
    }"#;

    fn driver() -> Driver {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("tileset.json", TILESET.as_bytes().to_vec());
        fetcher.insert("root.b3dm", b"b3dm-root".to_vec());
        fetcher.insert("child.b3dm", b"b3dm-child".to_vec());
        let mut options = TilesetOptions::default();
        options.scheduler.worker_threads = 2;
        options.cull_requests_while_moving = false;
        let tileset = Tileset::load("tileset.json", fetcher, options).unwrap();
        Driver::new(tileset, &ViewConfig::default())
    }

    /// URLs use HTTP, paths split into base directory and file name.
    #[test]
    fn test_open_source() {
        assert_eq!(open_source("https://example.com/a/tileset.json").url, "https://example.com/a/tileset.json");

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tileset.json"), b"{}").unwrap();
        let path = dir.path().join("tileset.json");
        let source = open_source(&path.to_string_lossy());
        assert_eq!(source.url, "tileset.json");
        assert_eq!(source.fetcher.fetch(&source.url).unwrap(), b"{}");
    }

    /// The camera keeps a constant distance from the orbit center.
    #[test]
    fn test_orbit_distance() {
        let orbit = Orbit::around(&BoundingSphere {
            center: DVec3::new(6_378_137.0, 0.0, 0.0),
            radius: 100.0,
        });
        assert_eq!(orbit.up, DVec3::X);
        for frame in [0, 75, 150, 599] {
            let distance = orbit.position(frame).distance(orbit.center);
            assert!((distance - 250.0).abs() < 1e-6, "frame {frame}: {distance}");
        }
        let camera = orbit.camera(10, &ViewConfig::default());
        let to_center = (orbit.center - camera.position).normalize();
        assert!(camera.direction.dot(to_center) > 0.999_999);
    }

    /// Camera movement is measured from the previous frame.
    #[test]
    fn test_frame_state_tracks_movement() {
        let mut driver = driver();
        let first = driver.frame_state(Timestamp::UNIX_EPOCH);
        assert_eq!(first.frame_number, 1);
        assert!(!first.is_camera_moving());
        driver.step(Timestamp::UNIX_EPOCH);
        let second = driver.frame_state(Timestamp::UNIX_EPOCH);
        assert_eq!(second.frame_number, 2);
        assert!(second.is_camera_moving());
    }

    /// Frames stream the root and then refine into the child.
    #[test]
    fn test_streams_until_leaf_selected() {
        let mut driver = driver();
        let root = driver.tileset().root();
        let child = driver.tileset().tile(root).unwrap().children()[0];

        let start = Instant::now();
        let mut loaded = 0;
        let mut requested = 0;
        loop {
            let report = driver.step(Timestamp::UNIX_EPOCH);
            loaded += report.loaded;
            requested += report.requested;
            let tileset = driver.tileset();
            if tileset.tile(root).unwrap().is_content_ready()
                && tileset.tile(child).unwrap().is_content_ready()
            {
                break;
            }
            assert!(start.elapsed().as_secs() < 5, "Timed out streaming tiles");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(loaded, 2);
        assert_eq!(requested, 2);
        assert!(driver.tileset().needs_refinement(root));

        let report = driver.step(Timestamp::UNIX_EPOCH);
        assert_eq!(report.selected, 1);
        assert_eq!(report.requested, 0);
        assert_eq!(driver.tileset().statistics().number_of_tiles_with_content_ready, 2);
    }
}
