//! End-to-end tileset scenarios driving real fetch workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use glam::DVec3;

use crate::content::ContentState;
use crate::ellipsoid::VerticalExaggeration;
use crate::error::FetchError;
use crate::events::TilesetEvent;
use crate::fetcher::{ByteFetcher, MemoryFetcher};
use crate::frame::{Camera, FrameState, Viewport};
use crate::tile::TileId;
use crate::tileset::{RequestOutcome, Tileset, TilesetOptions};
use crate::time::Timestamp;

/// Serves from memory once opened; blocks every fetch until then.
struct GateFetcher {
    open: AtomicBool,
    inner: MemoryFetcher,
}

impl GateFetcher {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(false),
            inner: MemoryFetcher::new(),
        }
    }
}

impl ByteFetcher for GateFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let start = Instant::now();
        while !self.open.load(Ordering::Relaxed) && start.elapsed() < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.inner.fetch(url)
    }
}

fn options() -> TilesetOptions {
    let mut options = TilesetOptions::default();
    options.scheduler.worker_threads = 2;
    options.cull_requests_while_moving = false;
    options
}

fn frame_at(frame_number: u64, seconds: f64) -> FrameState {
    let camera = Camera::perspective(
        DVec3::ZERO,
        DVec3::NEG_Z,
        DVec3::Y,
        std::f64::consts::FRAC_PI_3,
        1.0,
    );
    FrameState::new(
        frame_number,
        Timestamp::from_unix_seconds(seconds),
        camera,
        Viewport::new(800.0, 800.0),
    )
}

fn load(json: &str, fetcher: Arc<MemoryFetcher>, options: TilesetOptions) -> Tileset {
    fetcher.insert("tileset.json", json.as_bytes().to_vec());
    Tileset::load("tileset.json", fetcher, options).unwrap()
}

/// Run one frame: visit and touch `ids`, dispatch and route requests, then
/// process and evict. Returns the states of `watch` observed after routing.
fn step(tileset: &mut Tileset, frame: &FrameState, ids: &[TileId], watch: TileId) -> ContentState {
    tileset.begin_frame(frame);
    for &id in ids {
        tileset.update_visibility(id, frame);
        tileset.touch(id);
    }
    tileset.update(frame);
    let routed = tileset.tile(watch).map_or(ContentState::Unloaded, |t| t.content_state());
    tileset.end_frame(frame);
    routed
}

/// Step frames until `tile` reaches `state`, recording the states seen after routing.
fn run_until(
    tileset: &mut Tileset,
    first_frame: u64,
    seconds: f64,
    ids: &[TileId],
    tile: TileId,
    state: ContentState,
) -> Vec<ContentState> {
    let start = Instant::now();
    let mut seen = Vec::new();
    let mut frame_number = first_frame;
    loop {
        let frame = frame_at(frame_number, seconds);
        let routed = step(tileset, &frame, ids, tile);
        if seen.last() != Some(&routed) {
            seen.push(routed);
        }
        if tileset.tile(tile).is_some_and(|t| t.content_state() == state) {
            return seen;
        }
        assert!(start.elapsed().as_secs() < 5, "Timed out waiting for {state}");
        std::thread::sleep(Duration::from_millis(1));
        frame_number += 1;
    }
}

fn count_loads(events: &[TilesetEvent], tile: TileId) -> usize {
    events
        .iter()
        .filter(|e| **e == TilesetEvent::TileLoad(tile))
        .count()
}

const SINGLE: &str = r#"{
    "asset": {"version": "1.1"},
    "geometricError": 100,
    "root": {
        "boundingVolume": {"sphere": [0, 0, -100, 10]},
        "geometricError": 10,
        "content": {"uri": "root.b3dm"}
    }
}"#;

/// Content goes UNLOADED -> LOADING -> PROCESSING -> READY and loads exactly once.
#[test]
fn test_content_state_machine() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("root.b3dm", b"b3dm0123".to_vec());
    let mut tileset = load(SINGLE, fetcher, options());
    let root = tileset.root();
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Unloaded);

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    assert!(tileset.update_visibility(root, &frame));
    tileset.touch(root);
    assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Started);
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Loading);
    tileset.update(&frame);
    tileset.end_frame(&frame);

    let seen = run_until(&mut tileset, 2, 0.0, &[root], root, ContentState::Ready);
    assert!(seen.contains(&ContentState::Processing), "saw {seen:?}");
    assert_eq!(seen.last(), Some(&ContentState::Processing));

    let events = tileset.drain_events();
    assert_eq!(count_loads(&events, root), 1);
    assert!(events.contains(&TilesetEvent::AllTilesLoaded));
    assert!(events.contains(&TilesetEvent::InitialTilesLoaded));

    let stats = tileset.statistics();
    assert_eq!(stats.number_of_loaded_tiles_total, 1);
    assert_eq!(stats.number_of_tiles_with_content_ready, 1);
    assert_eq!(stats.number_of_pending_requests, 0);
    assert_eq!(tileset.total_memory_usage_bytes(), 8);

    step(&mut tileset, &frame_at(100, 0.0), &[root], root);
    assert_eq!(count_loads(&tileset.drain_events(), root), 0);
    assert_eq!(tileset.request_content(root, &frame_at(101, 0.0)), RequestOutcome::Skipped);
}

/// Cancelling while loading returns to UNLOADED and a re-request does not duplicate the fetch.
#[test]
fn test_cancel_then_rerequest() {
    let gate = Arc::new(GateFetcher::new());
    gate.inner.insert(
        "tileset.json",
        SINGLE.as_bytes().to_vec(),
    );
    gate.inner.insert("root.b3dm", b"b3dm".to_vec());
    gate.open.store(true, Ordering::Relaxed);
    let mut tileset = Tileset::load("tileset.json", gate.clone(), options()).unwrap();
    gate.open.store(false, Ordering::Relaxed);
    let root = tileset.root();

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.touch(root);
    assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Started);
    tileset.update(&frame);
    assert_eq!(tileset.scheduler().active_count(), 1);

    tileset.cancel_requests(root);
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Unloaded);
    assert_eq!(tileset.scheduler().active_count(), 0);
    assert_eq!(tileset.statistics().number_of_pending_requests, 0);

    assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Started);
    assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Skipped);
    tileset.update(&frame);
    assert_eq!(tileset.scheduler().active_count() + tileset.scheduler().issued_count(), 1);
    tileset.end_frame(&frame);

    gate.open.store(true, Ordering::Relaxed);
    run_until(&mut tileset, 2, 0.0, &[root], root, ContentState::Ready);
    assert_eq!(count_loads(&tileset.drain_events(), root), 1);
    assert_eq!(tileset.statistics().number_of_loaded_tiles_total, 1);
}

/// Loading tiles that were not touched this frame have their requests cancelled.
#[test]
fn test_out_of_view_requests_cancelled() {
    let gate = Arc::new(GateFetcher::new());
    gate.inner.insert("tileset.json", SINGLE.as_bytes().to_vec());
    gate.open.store(true, Ordering::Relaxed);
    let mut tileset = Tileset::load("tileset.json", gate.clone(), options()).unwrap();
    gate.open.store(false, Ordering::Relaxed);
    let root = tileset.root();

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.touch(root);
    tileset.request_content(root, &frame);
    tileset.update(&frame);
    tileset.end_frame(&frame);
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Loading);

    let frame = frame_at(2, 0.0);
    tileset.begin_frame(&frame);
    tileset.update(&frame);
    tileset.end_frame(&frame);
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Unloaded);
    gate.open.store(true, Ordering::Relaxed);
}

/// A fetch error fails the content permanently until it is reset.
#[test]
fn test_io_error_fails_content() {
    let fetcher = Arc::new(MemoryFetcher::new());
    let mut tileset = load(SINGLE, fetcher.clone(), options());
    let root = tileset.root();

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.touch(root);
    tileset.request_content(root, &frame);
    tileset.end_frame(&frame);
    run_until(&mut tileset, 2, 0.0, &[root], root, ContentState::Failed);

    let events = tileset.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        TilesetEvent::TileFailed { url, .. } if url == "root.b3dm"
    )));
    assert_eq!(tileset.statistics().number_of_failed_tiles, 1);

    fetcher.insert("root.b3dm", b"b3dm".to_vec());
    for frame_number in 10..15 {
        let frame = frame_at(frame_number, 0.0);
        assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Skipped);
        step(&mut tileset, &frame, &[root], root);
        assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Failed);
    }

    tileset.reset_content(root);
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Unloaded);
    assert_eq!(tileset.statistics().number_of_failed_tiles, 0);
    assert_eq!(tileset.request_content(root, &frame_at(20, 0.0)), RequestOutcome::Started);
}

/// Unrecognized payloads fail like transfer errors.
#[test]
fn test_unrecognized_payload_fails() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("root.b3dm", b"????".to_vec());
    let mut tileset = load(SINGLE, fetcher, options());
    let root = tileset.root();
    tileset.request_content(root, &frame_at(1, 0.0));
    run_until(&mut tileset, 1, 0.0, &[root], root, ContentState::Failed);
}

/// Tiles without content are ready and never create a request.
#[test]
fn test_empty_content_never_requested() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {"boundingVolume": {"sphere": [0, 0, -100, 10]}, "geometricError": 10}
    }"#;
    let mut tileset = load(json, Arc::new(MemoryFetcher::new()), options());
    let root = tileset.root();
    let tile = tileset.tile(root).unwrap();
    assert!(tile.has_empty_content());
    assert!(tile.is_content_ready());

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    assert_eq!(tileset.request_content(root, &frame), RequestOutcome::Skipped);
    tileset.update(&frame);
    assert_eq!(tileset.scheduler().statistics().attempted, 0);
    assert_eq!(tileset.statistics().number_of_pending_requests, 0);
}

/// Root error 100 at ~5 px and child error 10 at ~50 px: only the child refines.
#[test]
fn test_screen_space_error_refinement() {
    let denominator = 2.0 * (std::f64::consts::FRAC_PI_6).tan();
    let root_distance = 100.0 * 800.0 / (5.0 * denominator);
    let child_distance = 10.0 * 800.0 / (50.0 * denominator);
    let json = format!(
        r#"{{
        "asset": {{"version": "1.1"}},
        "geometricError": 500,
        "root": {{
            "boundingVolume": {{"sphere": [0, 0, {root_z}, 1]}},
            "geometricError": 100,
            "refine": "REPLACE",
            "children": [{{"boundingVolume": {{"sphere": [0, 0, {child_z}, 1]}}, "geometricError": 10}}]
        }}
    }}"#,
        root_z = -(root_distance + 1.0),
        child_z = -(child_distance + 1.0),
    );
    let mut tileset = load(&json, Arc::new(MemoryFetcher::new()), options());
    let root = tileset.root();
    let child = tileset.tile(root).unwrap().children()[0];

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.update_visibility(child, &frame);

    let root_sse = tileset.tile(root).unwrap().screen_space_error;
    let child_sse = tileset.tile(child).unwrap().screen_space_error;
    assert!((root_sse - 5.0).abs() < 1e-6, "root sse {root_sse}");
    assert!((child_sse - 50.0).abs() < 1e-6, "child sse {child_sse}");
    assert!(!tileset.needs_refinement(root));
    assert!(tileset.needs_refinement(child));
}

/// A duration sets a rolling expiration date that a refresh recomputes.
#[test]
fn test_expiration_refresh() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -100, 10]},
            "geometricError": 10,
            "content": {"uri": "root.b3dm"},
            "expire": {"duration": 30}
        }
    }"#;
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("root.b3dm", b"b3dm-old".to_vec());
    let mut tileset = load(json, fetcher.clone(), options());
    let root = tileset.root();

    tileset.request_content(root, &frame_at(1, 1000.0));
    run_until(&mut tileset, 1, 1000.0, &[root], root, ContentState::Ready);
    let date = tileset.tile(root).unwrap().expiration.date.unwrap();
    assert_eq!(date, Timestamp::from_unix_seconds(1030.0));
    assert_eq!(count_loads(&tileset.drain_events(), root), 1);

    tileset.update_expiration(root, &frame_at(50, 1020.0));
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Ready);

    fetcher.insert("root.b3dm", b"b3dm-new!".to_vec());
    tileset.update_expiration(root, &frame_at(51, 1031.0));
    let tile = tileset.tile(root).unwrap();
    assert_eq!(tile.content_state(), ContentState::Expired);
    assert!(tile.is_renderable());

    assert_eq!(tileset.request_content(root, &frame_at(52, 1040.0)), RequestOutcome::Started);
    let seen = run_until(&mut tileset, 52, 1040.0, &[root], root, ContentState::Ready);
    assert!(!seen.contains(&ContentState::Unloaded), "saw {seen:?}");

    let tile = tileset.tile(root).unwrap();
    assert_eq!(tile.expiration.date, Some(Timestamp::from_unix_seconds(1070.0)));
    assert!(tile.content.slots()[0].stale.is_none());
    assert_eq!(count_loads(&tileset.drain_events(), root), 1);
    assert_eq!(tileset.statistics().number_of_tiles_with_content_ready, 1);
    assert_eq!(tileset.statistics().number_of_loaded_tiles_total, 2);
    assert_eq!(tileset.total_memory_usage_bytes(), 9);
}

/// Stale content keeps the tile renderable while its refresh is in flight,
/// and unloading it then releases the ready tile.
#[test]
fn test_unload_during_refresh() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -100, 10]},
            "geometricError": 10,
            "content": {"uri": "root.b3dm"},
            "expire": {"duration": 30}
        }
    }"#;
    let gate = Arc::new(GateFetcher::new());
    gate.inner.insert("tileset.json", json.as_bytes().to_vec());
    gate.inner.insert("root.b3dm", b"b3dm-old".to_vec());
    gate.open.store(true, Ordering::Relaxed);
    let mut tileset = Tileset::load("tileset.json", gate.clone(), options()).unwrap();
    let root = tileset.root();

    tileset.request_content(root, &frame_at(1, 1000.0));
    run_until(&mut tileset, 1, 1000.0, &[root], root, ContentState::Ready);
    tileset.drain_events();
    tileset.update_expiration(root, &frame_at(50, 1031.0));
    assert_eq!(tileset.tile(root).unwrap().content_state(), ContentState::Expired);

    gate.open.store(false, Ordering::Relaxed);
    assert_eq!(tileset.request_content(root, &frame_at(51, 1040.0)), RequestOutcome::Started);
    let tile = tileset.tile(root).unwrap();
    assert_eq!(tile.content_state(), ContentState::Loading);
    assert!(tile.content.slots()[0].stale.is_some());
    assert!(tile.is_renderable());
    assert_eq!(tileset.statistics().number_of_tiles_with_content_ready, 1);

    tileset.unload_content(root);
    let tile = tileset.tile(root).unwrap();
    assert_eq!(tile.content_state(), ContentState::Unloaded);
    assert!(!tile.is_renderable());
    assert_eq!(tileset.statistics().number_of_tiles_with_content_ready, 0);
    assert!(tileset.drain_events().contains(&TilesetEvent::TileUnload(root)));
    gate.open.store(true, Ordering::Relaxed);
}

/// The accumulated transform follows the parent, including after an exaggeration change.
#[test]
fn test_transform_invariant_with_exaggeration() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [0, 0, 0, 10]},
            "geometricError": 10,
            "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 6378237,0,0,1],
            "children": [{
                "boundingVolume": {"sphere": [0, 0, 0, 5]},
                "geometricError": 1,
                "transform": [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]
            }]
        }
    }"#;
    let mut tileset = load(json, Arc::new(MemoryFetcher::new()), options());
    let root = tileset.root();
    let child = tileset.tile(root).unwrap().children()[0];

    let assert_invariant = |tileset: &Tileset| {
        let root_tile = tileset.tile(root).unwrap();
        let child_tile = tileset.tile(child).unwrap();
        assert_eq!(
            child_tile.computed_transform,
            root_tile.computed_transform * child_tile.transform
        );
        assert_eq!(
            root_tile.computed_transform,
            tileset.options().root_transform * root_tile.transform
        );
    };

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.update_visibility(child, &frame);
    assert_invariant(&tileset);
    let before = tileset.tile(child).unwrap().bounding_volume.center();
    assert!((before.x - 6_378_237.0).abs() < 1e-6);

    tileset.set_vertical_exaggeration(VerticalExaggeration::new(2.0, 0.0));
    let frame = frame_at(2, 0.0);
    tileset.begin_frame(&frame);
    tileset.update_visibility(root, &frame);
    tileset.update_visibility(child, &frame);
    assert_invariant(&tileset);
    let after = tileset.tile(child).unwrap().bounding_volume.center();
    assert!((after.x - 6_378_337.0).abs() < 1e-3, "center {after}");
}

/// Requests priorities for a near and a far child of a root with `refine`,
/// returning `(near, far)`.
fn child_priorities(refine: &str, skip_level_of_detail: bool) -> (f64, f64) {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 500,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -500, 450]},
            "geometricError": 100,
            "refine": "REFINE",
            "children": [
                {"boundingVolume": {"sphere": [0, 0, -100, 1]}, "geometricError": 10,
                 "content": {"uri": "near.b3dm"}},
                {"boundingVolume": {"sphere": [0, 0, -900, 1]}, "geometricError": 10,
                 "content": {"uri": "far.b3dm"}}
            ]
        }
    }"#
    .replace("REFINE", refine);
    let mut options = options();
    options.skip_level_of_detail = skip_level_of_detail;
    options.foveation.enabled = false;
    options.progressive_resolution_height_fraction = 0.0;
    let mut tileset = load(&json, Arc::new(MemoryFetcher::new()), options);
    let root = tileset.root();
    let [near, far] = tileset.tile(root).unwrap().children()[..] else {
        panic!("expected two children");
    };

    let frame = frame_at(1, 0.0);
    tileset.begin_frame(&frame);
    for id in [root, near, far] {
        tileset.update_visibility(id, &frame);
    }
    let near_reverse = tileset.tile(near).unwrap().reverse_screen_space_error;
    let far_reverse = tileset.tile(far).unwrap().reverse_screen_space_error;
    assert!(far_reverse > near_reverse);

    tileset.request_content(near, &frame);
    tileset.request_content(far, &frame);
    (
        tileset.tile(near).unwrap().priority,
        tileset.tile(far).unwrap().priority,
    )
}

/// REPLACE tiles skipping levels favor the larger reverse screen-space error.
#[test]
fn test_priority_prefers_larger_reverse_error() {
    let (near, far) = child_priorities("REPLACE", true);
    assert!(far < near, "far {far} near {near}");
}

/// Every other refine/skip combination favors the closer tile.
#[test]
fn test_priority_prefers_closer_tile() {
    for (refine, skip) in [("ADD", true), ("ADD", false), ("REPLACE", false)] {
        let (near, far) = child_priorities(refine, skip);
        assert!(near < far, "{refine} skip {skip}: near {near} far {far}");
    }
}

/// External tileset content is attached below the tile and destroyed with it.
#[test]
fn test_external_tileset() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -100, 10]},
            "geometricError": 10,
            "content": {"uri": "nested/external.json"}
        }
    }"#;
    let external = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 10,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -100, 5]},
            "geometricError": 1,
            "content": {"uri": "leaf.b3dm"}
        }
    }"#;
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("nested/external.json", external.as_bytes().to_vec());
    let mut tileset = load(json, fetcher, options());
    let root = tileset.root();

    tileset.request_content(root, &frame_at(1, 0.0));
    run_until(&mut tileset, 1, 0.0, &[root], root, ContentState::Ready);

    let tile = tileset.tile(root).unwrap();
    assert!(tile.has_tileset_content);
    assert_eq!(tile.children().len(), 1);
    let attached = tileset.tile(tile.children()[0]).unwrap();
    assert_eq!(attached.content.slots()[0].url, "nested/leaf.b3dm");
    assert_eq!(attached.depth, 1);
    assert_eq!(tileset.tile_count(), 2);
    assert_eq!(tileset.total_memory_usage_bytes(), 0);

    tileset.unload_content(root);
    assert_eq!(tileset.tile_count(), 1);
    let tile = tileset.tile(root).unwrap();
    assert!(!tile.has_tileset_content);
    assert!(tile.children().is_empty());
    assert_eq!(tile.content_state(), ContentState::Unloaded);
}

const MULTIPLE: &str = r#"{
    "asset": {"version": "1.1"},
    "geometricError": 100,
    "root": {
        "boundingVolume": {"sphere": [0, 0, -100, 10]},
        "geometricError": 10,
        "contents": [{"uri": "a.b3dm"}, {"uri": "b.pnts"}]
    }
}"#;

/// An inner failure is isolated; the tile becomes ready once every inner content settled.
#[test]
fn test_multiple_contents_tolerate_failure() {
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("a.b3dm", b"b3dm".to_vec());
    let mut tileset = load(MULTIPLE, fetcher, options());
    let root = tileset.root();

    assert_eq!(tileset.request_content(root, &frame_at(1, 0.0)), RequestOutcome::Started);
    assert_eq!(tileset.statistics().number_of_pending_requests, 2);
    run_until(&mut tileset, 1, 0.0, &[root], root, ContentState::Ready);

    let tile = tileset.tile(root).unwrap();
    let states: Vec<ContentState> = tile.content.slots().iter().map(|s| s.state).collect();
    assert_eq!(states, vec![ContentState::Ready, ContentState::Failed]);
    assert_eq!(count_loads(&tileset.drain_events(), root), 1);
    assert_eq!(tileset.statistics().number_of_failed_tiles, 1);
}

/// Inner contents are admitted together or not at all.
#[test]
fn test_multiple_contents_all_or_nothing() {
    let mut options = options();
    options.scheduler.max_requests_per_server = 1;
    let mut tileset = load(MULTIPLE, Arc::new(MemoryFetcher::new()), options);
    let root = tileset.root();

    assert_eq!(tileset.request_content(root, &frame_at(1, 0.0)), RequestOutcome::NotScheduled);
    let tile = tileset.tile(root).unwrap();
    assert!(tile.content.slots().iter().all(|s| s.state == ContentState::Unloaded));
    assert_eq!(tileset.statistics().number_of_attempted_requests, 1);
    assert_eq!(tileset.scheduler().issued_count(), 0);
}

/// Over budget, untouched tiles are evicted while touched ones stay.
#[test]
fn test_eviction_of_untouched_tiles() {
    let json = r#"{
        "asset": {"version": "1.1"},
        "geometricError": 100,
        "root": {
            "boundingVolume": {"sphere": [0, 0, -100, 100]},
            "geometricError": 10,
            "refine": "ADD",
            "children": [
                {"boundingVolume": {"sphere": [0, 0, -100, 1]}, "geometricError": 1, "content": {"uri": "a.b3dm"}},
                {"boundingVolume": {"sphere": [0, 0, -100, 1]}, "geometricError": 1, "content": {"uri": "b.b3dm"}}
            ]
        }
    }"#;
    let fetcher = Arc::new(MemoryFetcher::new());
    fetcher.insert("a.b3dm", b"b3dm-aaa".to_vec());
    fetcher.insert("b.b3dm", b"b3dm-bbb".to_vec());
    let mut options = options();
    options.cache_bytes = 10;
    let mut tileset = load(json, fetcher, options);
    let root = tileset.root();
    let [a, b] = tileset.tile(root).unwrap().children()[..] else {
        panic!("expected two children");
    };

    tileset.request_content(a, &frame_at(1, 0.0));
    tileset.request_content(b, &frame_at(1, 0.0));
    run_until(&mut tileset, 1, 0.0, &[a, b], a, ContentState::Ready);
    run_until(&mut tileset, 1000, 0.0, &[a, b], b, ContentState::Ready);
    assert_eq!(tileset.total_memory_usage_bytes(), 16);

    step(&mut tileset, &frame_at(2000, 0.0), &[b], b);
    assert_eq!(tileset.tile(a).unwrap().content_state(), ContentState::Unloaded);
    assert_eq!(tileset.tile(b).unwrap().content_state(), ContentState::Ready);
    assert_eq!(tileset.total_memory_usage_bytes(), 8);
    assert!(tileset.drain_events().contains(&TilesetEvent::TileUnload(a)));

    tileset.trim_loaded_tiles();
    step(&mut tileset, &frame_at(2001, 0.0), &[], b);
    assert_eq!(tileset.tile(b).unwrap().content_state(), ContentState::Unloaded);
    assert_eq!(tileset.total_memory_usage_bytes(), 0);
}
