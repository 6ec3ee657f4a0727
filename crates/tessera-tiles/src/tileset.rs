//! Tileset orchestration: owns the tile arena, the request scheduler, the
//! cache and the content factories, and drives every tile through its
//! content state machine.
//!
//! A frame is driven by the traversal layer:
//!
//! 1. [`Tileset::begin_frame`]
//! 2. [`Tileset::update_visibility`] and [`Tileset::touch`] for visited tiles,
//!    then [`Tileset::request_content`] for tiles that need content
//! 3. [`Tileset::update`] to dispatch requests and route completions
//! 4. [`Tileset::end_frame`] to cancel stale requests, process, and evict

use std::sync::Arc;

use glam::DMat4;
use rustc_hash::{FxHashMap, FxHashSet};
use tessera_config::{Config, FoveatedCurve};

use crate::bounding_volume::Intersect;
use crate::cache::{CacheBudget, EvictionPredicate, TileCache, over_cache_bytes};
use crate::clipping::{ClippingPlaneCollection, ClippingPolygonCollection};
use crate::content::{
    Content, ContentContext, ContentFactoryTable, ContentSlot, ContentState, InFlight, PayloadKind,
    PayloadRoute, StructuralContent, TileContent,
};
use crate::culling::{MASK_INDETERMINATE, MASK_OUTSIDE};
use crate::ellipsoid::{Ellipsoid, VerticalExaggeration};
use crate::error::{ContentError, TileError};
use crate::events::{TilesetEvent, TilesetEventBuffer};
use crate::fetcher::ByteFetcher;
use crate::frame::{FrameState, TilesetPass};
use crate::header::TilesetHeader;
use crate::priority::{
    DeferralInputs, FoveationCurve, FoveationSettings, PriorityBounds, PriorityInputs,
    ProgressiveResolution, curve_for, encode_priority, foveated_factor, is_priority_deferred,
    sorts_by_distance,
};
use crate::request::{Request, RequestId};
use crate::resource::{append_query, server_key};
use crate::scheduler::{FetchCompletion, FetchOutcome, RequestScheduler, SchedulerConfig};
use crate::statistics::TilesetStatistics;
use crate::tile::{Refine, Tile, TileId};
use crate::tree::{SubtreeContext, TileArena};
use crate::visibility::{
    DynamicScreenSpaceError, is_culled_while_moving, progressive_resolution,
    reverse_screen_space_error, screen_space_error, update_memory_adjusted_screen_space_error,
};

/// Tileset behavior.
#[derive(Clone, Debug, PartialEq)]
pub struct TilesetOptions {
    pub maximum_screen_space_error: f64,
    pub cache_bytes: u64,
    pub maximum_cache_overflow_bytes: u64,
    pub skip_level_of_detail: bool,
    pub prefer_leaves: bool,
    pub foveation: FoveationSettings,
    pub foveated_curve: FoveatedCurve,
    pub dynamic_screen_space_error: Option<DynamicScreenSpaceError>,
    /// Fraction of the viewport height used for progressive resolution; 0 disables it.
    pub progressive_resolution_height_fraction: f64,
    pub vertical_exaggeration: VerticalExaggeration,
    pub cull_requests_while_moving: bool,
    pub cull_requests_while_moving_multiplier: f64,
    pub ellipsoid: Ellipsoid,
    /// Transform applied above the root tile.
    pub root_transform: DMat4,
    pub scheduler: SchedulerConfig,
}

impl Default for TilesetOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for TilesetOptions {
    fn from(config: &Config) -> Self {
        let streaming = &config.streaming;
        Self {
            maximum_screen_space_error: streaming.maximum_screen_space_error,
            cache_bytes: streaming.cache_bytes,
            maximum_cache_overflow_bytes: streaming.maximum_cache_overflow_bytes,
            skip_level_of_detail: streaming.skip_level_of_detail,
            prefer_leaves: streaming.prefer_leaves,
            foveation: FoveationSettings {
                enabled: streaming.foveated_screen_space_error,
                cone_size: streaming.foveated_cone_size,
                minimum_relaxation: streaming.foveated_minimum_screen_space_error_relaxation,
                skip_level_of_detail: streaming.skip_level_of_detail,
            },
            foveated_curve: streaming.foveated_curve,
            dynamic_screen_space_error: streaming.dynamic_screen_space_error.then_some(
                DynamicScreenSpaceError {
                    density: streaming.dynamic_screen_space_error_density,
                    factor: streaming.dynamic_screen_space_error_factor,
                },
            ),
            progressive_resolution_height_fraction: streaming.progressive_resolution_height_fraction,
            vertical_exaggeration: VerticalExaggeration::new(
                streaming.vertical_exaggeration,
                streaming.vertical_exaggeration_relative_height,
            ),
            cull_requests_while_moving: streaming.cull_requests_while_moving,
            cull_requests_while_moving_multiplier: 60.0,
            ellipsoid: Ellipsoid::wgs84(),
            root_transform: DMat4::IDENTITY,
            scheduler: SchedulerConfig::from(&config.requests),
        }
    }
}

/// Result of [`Tileset::request_content`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    /// At least one content request was admitted.
    Started,
    /// The scheduler had no room; try again on a later frame.
    NotScheduled,
    /// Nothing to request: empty, loading, ready, failed, or culled while moving.
    Skipped,
}

#[derive(Clone, Copy, Debug)]
struct PendingFetch {
    tile: TileId,
    slot: usize,
    generation: u64,
}

/// A streamed tileset.
pub struct Tileset {
    options: TilesetOptions,
    url: String,
    arena: TileArena,
    root: TileId,
    scheduler: RequestScheduler,
    factories: ContentFactoryTable,
    curve: Box<dyn FoveationCurve>,
    cache: TileCache,
    budget: CacheBudget,
    eviction: Box<dyn EvictionPredicate>,
    clipping_planes: Option<ClippingPlaneCollection>,
    clipping_polygons: Option<ClippingPolygonCollection>,
    pending: FxHashMap<RequestId, PendingFetch>,
    loading: FxHashSet<TileId>,
    processing: FxHashSet<TileId>,
    priority_bounds: PriorityBounds,
    memory_adjusted_screen_space_error: f64,
    statistics: TilesetStatistics,
    events: TilesetEventBuffer,
    frame_number: u64,
    last_progress: (usize, usize),
    initial_tiles_loaded: bool,
}

impl Tileset {
    /// Fetch and parse the tileset JSON at `url`, then build the hierarchy.
    pub fn load(url: &str, fetcher: Arc<dyn ByteFetcher>, options: TilesetOptions) -> Result<Self, TileError> {
        let bytes = fetcher.fetch(url)?;
        let header = TilesetHeader::from_slice(&bytes)?;
        Self::from_header(&header, url, fetcher, options)
    }

    /// Build the hierarchy from an already parsed header. Relative content
    /// URIs resolve against `url`.
    pub fn from_header(
        header: &TilesetHeader,
        url: &str,
        fetcher: Arc<dyn ByteFetcher>,
        options: TilesetOptions,
    ) -> Result<Self, TileError> {
        let mut arena = TileArena::new();
        let context = SubtreeContext {
            parent: None,
            base_url: url,
            exaggeration: &options.vertical_exaggeration,
            ellipsoid: &options.ellipsoid,
        };
        let root = arena.build_subtree(&header.root, &options.root_transform, context)?;
        let scheduler = RequestScheduler::new(options.scheduler.clone(), fetcher)?;
        tracing::info!(
            "Loaded tileset {url}: {} tiles, asset version {:?}",
            arena.len(),
            header.asset.version
        );

        Ok(Self {
            curve: curve_for(options.foveated_curve),
            budget: CacheBudget::new(options.cache_bytes, options.maximum_cache_overflow_bytes),
            memory_adjusted_screen_space_error: options.maximum_screen_space_error,
            url: url.to_string(),
            arena,
            root,
            scheduler,
            factories: ContentFactoryTable::raw_payloads(),
            cache: TileCache::new(),
            eviction: Box::new(over_cache_bytes),
            clipping_planes: None,
            clipping_polygons: None,
            pending: FxHashMap::default(),
            loading: FxHashSet::default(),
            processing: FxHashSet::default(),
            priority_bounds: PriorityBounds::default(),
            statistics: TilesetStatistics::default(),
            events: TilesetEventBuffer::new(),
            frame_number: 0,
            last_progress: (0, 0),
            initial_tiles_loaded: false,
            options,
        })
    }

    pub fn with_content_factories(mut self, factories: ContentFactoryTable) -> Self {
        self.factories = factories;
        self
    }

    pub fn with_eviction_predicate(mut self, predicate: impl EvictionPredicate + 'static) -> Self {
        self.eviction = Box::new(predicate);
        self
    }

    pub fn set_foveation_curve(&mut self, curve: Box<dyn FoveationCurve>) {
        self.curve = curve;
    }

    pub fn set_clipping_planes(&mut self, planes: Option<ClippingPlaneCollection>) {
        self.clipping_planes = planes;
    }

    pub fn set_clipping_polygons(&mut self, polygons: Option<ClippingPolygonCollection>) {
        self.clipping_polygons = polygons;
    }

    /// Takes effect on each tile's next [`update_visibility`](Self::update_visibility).
    pub fn set_vertical_exaggeration(&mut self, exaggeration: VerticalExaggeration) {
        self.options.vertical_exaggeration = exaggeration;
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    pub fn root(&self) -> TileId {
        self.root
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.arena.get(id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = (TileId, &Tile)> {
        self.arena.iter()
    }

    pub fn tile_count(&self) -> usize {
        self.arena.len()
    }

    pub fn statistics(&self) -> &TilesetStatistics {
        &self.statistics
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn priority_bounds(&self) -> &PriorityBounds {
        &self.priority_bounds
    }

    /// The refinement threshold after memory pressure adjustments.
    pub fn memory_adjusted_screen_space_error(&self) -> f64 {
        self.memory_adjusted_screen_space_error
    }

    pub fn total_memory_usage_bytes(&self) -> u64 {
        self.budget.total_bytes()
    }

    /// Whether the tile's error exceeds the refinement threshold.
    pub fn needs_refinement(&self, id: TileId) -> bool {
        self.arena
            .get(id)
            .is_some_and(|tile| tile.screen_space_error > self.memory_adjusted_screen_space_error)
    }

    /// Take every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<TilesetEvent> {
        self.events.drain()
    }

    pub fn begin_frame(&mut self, frame: &FrameState) {
        self.frame_number = frame.frame_number;
        self.priority_bounds.reset();
        self.cache.reset();
        self.events.swap();
        self.statistics.clear_frame();
    }

    /// Mark a tile as used this frame.
    pub fn touch(&mut self, id: TileId) {
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        tile.touched_frame = self.frame_number;
        if let Some(node) = tile.cache_node {
            self.cache.touch(node);
        }
    }

    /// Recompute the tile's transform, distance, screen-space error, plane
    /// mask and priority inputs. Returns whether the tile is visible.
    ///
    /// Parents must be updated before their children within a frame.
    pub fn update_visibility(&mut self, id: TileId, frame: &FrameState) -> bool {
        let Some(tile) = self.arena.get(id) else {
            return false;
        };
        let parent = tile.parent.and_then(|p| self.arena.get(p));
        let updated_this_frame = |t: &Tile| t.updated_visibility_frame == frame.frame_number;
        let parent_transform = parent.map_or(self.options.root_transform, |p| p.computed_transform);
        let parent_mask = parent
            .filter(|p| updated_this_frame(p))
            .map_or(MASK_INDETERMINATE, |p| p.visibility_plane_mask);
        let parent_error = parent.map(|p| {
            (
                p.screen_space_error,
                p.has_tileset_content || p.has_implicit_content,
            )
        });
        let parent_progressive_error = parent
            .filter(|p| updated_this_frame(p))
            .map(|p| p.progressive_screen_space_error);
        let root_error = self
            .arena
            .get(self.root)
            .filter(|root| id != self.root && updated_this_frame(root))
            .map(|root| root.screen_space_error);

        let options = &self.options;
        let Some(tile) = self.arena.get_mut(id) else {
            return false;
        };
        tile.update_transform(&parent_transform, &options.vertical_exaggeration, &options.ellipsoid);

        let camera = &frame.camera;
        let height = frame.viewport.height;
        let dynamic = options.dynamic_screen_space_error.as_ref();
        tile.distance_to_camera = tile.bounding_volume.distance_to_point(camera.position);
        tile.screen_space_error =
            screen_space_error(tile.geometric_error, tile.distance_to_camera, height, frame, dynamic);
        let fraction = options.progressive_resolution_height_fraction;
        tile.progressive_screen_space_error = if fraction > 0.0 && fraction <= 0.5 {
            screen_space_error(
                tile.geometric_error,
                tile.distance_to_camera,
                height * fraction,
                frame,
                dynamic,
            )
        } else {
            tile.screen_space_error
        };

        let mut mask = frame
            .culling_volume
            .compute_visibility_with_plane_mask(&tile.bounding_volume, parent_mask);
        if mask != MASK_OUTSIDE {
            if let Some(planes) = self.clipping_planes.as_ref().filter(|p| p.enabled) {
                let intersection = planes
                    .compute_intersection_with_bounding_volume(&tile.bounding_volume, &options.root_transform);
                if intersection == Intersect::Outside {
                    mask = MASK_OUTSIDE;
                }
            }
        }
        if mask != MASK_OUTSIDE {
            if let Some(polygons) = self.clipping_polygons.as_ref().filter(|p| p.enabled) {
                let intersection = polygons
                    .compute_intersection_with_bounding_volume(&tile.bounding_volume, &options.ellipsoid);
                if intersection == Intersect::Inside {
                    mask = MASK_OUTSIDE;
                }
            }
        }
        tile.visibility_plane_mask = mask;
        tile.in_request_volume = tile
            .viewer_request_volume
            .as_ref()
            .is_none_or(|volume| volume.distance_to_point(camera.position) == 0.0);
        tile.visible = mask != MASK_OUTSIDE && tile.in_request_volume;

        let sphere = tile.bounding_volume.bounding_sphere();
        tile.foveated_factor = foveated_factor(camera, &sphere);

        let root_error = root_error.unwrap_or(tile.screen_space_error);
        tile.reverse_screen_space_error = reverse_screen_space_error(
            root_error,
            tile.screen_space_error,
            parent_error,
            options.skip_level_of_detail,
        );
        tile.progressive_resolution = progressive_resolution(
            fraction,
            tile.progressive_screen_space_error,
            parent_progressive_error,
            options.maximum_screen_space_error,
            self.memory_adjusted_screen_space_error,
        );
        tile.priority_deferred = is_priority_deferred(
            &DeferralInputs {
                refine_replace: tile.refine == Refine::Replace,
                progressive: tile.progressive_resolution != ProgressiveResolution::None,
                foveated_factor: tile.foveated_factor,
                screen_space_error: tile.screen_space_error,
                parent_screen_space_error: parent_error.map(|(error, _)| error),
            },
            &options.foveation,
            self.curve.as_ref(),
            self.memory_adjusted_screen_space_error,
            camera.fov_y(),
            frame.pass,
        );
        tile.updated_visibility_frame = frame.frame_number;

        if tile.visible {
            self.priority_bounds
                .include(&priority_inputs(tile, options, frame.pass));
        }
        tile.visible
    }

    /// Start fetching the tile's content.
    ///
    /// Multiple contents are admitted all together or not at all. Expired
    /// content is refetched with an `expired=<date>` query so caches are
    /// bypassed.
    pub fn request_content(&mut self, id: TileId, frame: &FrameState) -> RequestOutcome {
        let Some(tile) = self.arena.get(id) else {
            return RequestOutcome::Skipped;
        };
        if tile.content.is_empty() {
            return RequestOutcome::Skipped;
        }
        if self.options.cull_requests_while_moving
            && frame.is_camera_moving()
            && is_culled_while_moving(
                frame.camera_movement,
                tile.bounding_volume.bounding_sphere().radius,
                self.options.cull_requests_while_moving_multiplier,
            )
        {
            return RequestOutcome::Skipped;
        }

        let mut candidates = Vec::new();
        for (index, slot) in tile.content.slots().iter().enumerate() {
            if slot.in_flight.is_some() {
                continue;
            }
            let url = match slot.state {
                ContentState::Unloaded => slot.url.clone(),
                ContentState::Expired => {
                    let stamp = tile.expiration.date.unwrap_or(frame.time);
                    append_query(&slot.url, "expired", &stamp.to_string())
                }
                _ => continue,
            };
            let key = server_key(&url);
            candidates.push((index, url, key));
        }
        if candidates.is_empty() {
            return RequestOutcome::Skipped;
        }

        if matches!(tile.content, TileContent::Multiple(_)) {
            let keys: Vec<&str> = candidates.iter().map(|(_, _, key)| key.as_str()).collect();
            if !self.scheduler.has_open_slots(&keys) {
                self.statistics.number_of_attempted_requests += 1;
                return RequestOutcome::NotScheduled;
            }
        }

        let priority = encode_priority(
            &priority_inputs(tile, &self.options, frame.pass),
            &self.priority_bounds,
            self.options.prefer_leaves,
        );
        let cell = tile.priority_cell.clone();
        cell.set(priority);

        let mut issued = Vec::with_capacity(candidates.len());
        for (index, url, key) in candidates {
            match self.scheduler.request(Request::new(url, key, cell.clone())) {
                Some(request) => issued.push((index, request)),
                None => {
                    for (_, request) in issued {
                        self.scheduler.cancel(request);
                    }
                    self.statistics.number_of_attempted_requests += 1;
                    return RequestOutcome::NotScheduled;
                }
            }
        }

        let Some(tile) = self.arena.get_mut(id) else {
            return RequestOutcome::Skipped;
        };
        tile.priority = priority;
        tile.requested_frame = frame.frame_number;
        let slots = tile.content.slots_mut();
        for (index, request) in issued {
            let slot = &mut slots[index];
            slot.generation += 1;
            slot.in_flight = Some(InFlight {
                request,
                previous_state: slot.state,
            });
            slot.state = ContentState::Loading;
            self.pending.insert(
                request,
                PendingFetch {
                    tile: id,
                    slot: index,
                    generation: slot.generation,
                },
            );
            tracing::debug!("{id}: requesting {} ({request})", slot.url);
        }
        self.loading.insert(id);
        self.refresh_statistics();
        RequestOutcome::Started
    }

    /// Cancel outstanding requests. Ready inner contents are kept.
    pub fn cancel_requests(&mut self, id: TileId) {
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        for slot in tile.content.slots_mut() {
            if cancel_slot_request(slot, &mut self.scheduler, &mut self.pending) {
                tracing::debug!("{id}: cancelled request for {}", slot.url);
            }
        }
        self.refresh_membership(id);
        self.refresh_statistics();
    }

    /// Move ready content whose expiration date passed to `Expired`.
    ///
    /// The stale payload stays renderable until a refetch replaces it.
    pub fn update_expiration(&mut self, id: TileId, frame: &FrameState) {
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        if tile.has_tileset_content || tile.has_implicit_content {
            return;
        }
        let TileContent::Single(slot) = &mut tile.content else {
            return;
        };
        if slot.state == ContentState::Ready && tile.expiration.is_expired(frame.time) {
            slot.stale = slot.content.take();
            slot.state = ContentState::Expired;
            tracing::debug!("{id}: content expired");
        }
    }

    /// Dispatch queued requests and route finished fetches to their tiles.
    pub fn update(&mut self, frame: &FrameState) {
        self.refresh_loading_priorities(frame);
        for completion in self.scheduler.update() {
            self.handle_completion(completion, frame);
        }
        self.refresh_statistics();
    }

    /// Tick processing content and promote finished payloads to `Ready`.
    pub fn process_tiles(&mut self, frame: &FrameState) {
        let mut ids: Vec<TileId> = self.processing.iter().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.process(id, frame);
        }
        self.refresh_statistics();
    }

    pub fn process(&mut self, id: TileId, frame: &FrameState) {
        let Some(tile) = self.arena.get_mut(id) else {
            self.processing.remove(&id);
            return;
        };
        let before = tile.content_state();
        let mut refreshed = false;
        for slot in tile.content.slots_mut() {
            if slot.state != ContentState::Processing {
                continue;
            }
            let Some(content) = slot.content.as_mut() else {
                continue;
            };
            content.update(frame);
            if content.is_ready() {
                slot.state = ContentState::Ready;
                refreshed |= slot.stale.is_some();
                slot.destroy_stale();
            }
        }
        self.after_transition(id, before, refreshed, frame);
    }

    /// Cancel requests of loading tiles not touched this frame.
    pub fn cancel_out_of_view_requests(&mut self, frame: &FrameState) {
        let stale: Vec<TileId> = self
            .loading
            .iter()
            .copied()
            .filter(|&id| {
                self.arena
                    .get(id)
                    .is_some_and(|tile| tile.touched_frame != frame.frame_number)
            })
            .collect();
        for id in stale {
            self.cancel_requests(id);
        }
    }

    /// Evict untouched tiles, least recently used first, while the eviction
    /// predicate holds or a trim was requested.
    pub fn unload_tiles(&mut self) {
        let trim = self.cache.take_trim();
        let mut unloaded = 0usize;
        while let Some((node, candidate)) = self.cache.eviction_candidate() {
            if !trim && !self.eviction.should_evict(&self.budget) {
                break;
            }
            self.unload_content(candidate);
            self.cache.remove(node);
            unloaded += 1;
        }
        if unloaded > 0 {
            tracing::info!(
                "Evicted {unloaded} tiles, {} bytes of content in memory",
                self.budget.total_bytes()
            );
        }
        self.refresh_statistics();
    }

    /// Evict every untouched tile on the next [`unload_tiles`](Self::unload_tiles).
    pub fn trim_loaded_tiles(&mut self) {
        self.cache.trim();
    }

    pub fn end_frame(&mut self, frame: &FrameState) {
        self.cancel_out_of_view_requests(frame);
        self.process_tiles(frame);
        self.unload_tiles();
        self.memory_adjusted_screen_space_error = update_memory_adjusted_screen_space_error(
            self.memory_adjusted_screen_space_error,
            self.options.maximum_screen_space_error,
            self.budget.total_bytes(),
            self.options.cache_bytes,
            self.options.maximum_cache_overflow_bytes,
        );
        self.refresh_statistics();
        self.raise_load_progress();
    }

    /// Destroy the tile's content and return it to `Unloaded`.
    ///
    /// Failed contents stay failed. An attached external tileset is destroyed.
    pub fn unload_content(&mut self, id: TileId) {
        let Some(tile) = self.arena.get(id) else {
            return;
        };
        let attached: Vec<TileId> = if tile.has_tileset_content {
            tile.children.clone()
        } else {
            Vec::new()
        };
        for child in attached {
            self.destroy_subtree(child);
        }

        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        let was_renderable = tile.is_renderable() && !tile.content.is_empty();
        for slot in tile.content.slots_mut() {
            cancel_slot_request(slot, &mut self.scheduler, &mut self.pending);
            if slot.state != ContentState::Failed {
                slot.unload();
            }
        }
        tile.has_tileset_content = false;
        tile.has_implicit_content = false;
        if let Some(node) = tile.cache_node.take() {
            self.cache.remove(node);
        }
        self.budget.on_unloaded(id);
        self.loading.remove(&id);
        self.processing.remove(&id);
        if was_renderable {
            self.statistics.number_of_tiles_with_content_ready =
                self.statistics.number_of_tiles_with_content_ready.saturating_sub(1);
            self.events.send(TilesetEvent::TileUnload(id));
            tracing::debug!("{id}: content unloaded");
        }
        self.refresh_statistics();
    }

    /// Return failed contents to `Unloaded` so they can be requested again.
    pub fn reset_content(&mut self, id: TileId) {
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        for slot in tile.content.slots_mut() {
            if slot.state == ContentState::Failed {
                slot.unload();
                slot.generation += 1;
                self.statistics.number_of_failed_tiles =
                    self.statistics.number_of_failed_tiles.saturating_sub(1);
            }
        }
    }

    fn destroy_subtree(&mut self, id: TileId) {
        for (removed_id, mut tile) in self.arena.remove_subtree(id) {
            let was_renderable = tile.is_renderable() && !tile.content.is_empty();
            for slot in tile.content.slots_mut() {
                cancel_slot_request(slot, &mut self.scheduler, &mut self.pending);
                if slot.state == ContentState::Failed {
                    self.statistics.number_of_failed_tiles =
                        self.statistics.number_of_failed_tiles.saturating_sub(1);
                }
                slot.unload();
            }
            if let Some(node) = tile.cache_node.take() {
                self.cache.remove(node);
            }
            self.budget.on_unloaded(removed_id);
            self.loading.remove(&removed_id);
            self.processing.remove(&removed_id);
            if was_renderable {
                self.statistics.number_of_tiles_with_content_ready =
                    self.statistics.number_of_tiles_with_content_ready.saturating_sub(1);
                self.events.send(TilesetEvent::TileUnload(removed_id));
            }
        }
    }

    fn refresh_loading_priorities(&mut self, frame: &FrameState) {
        for &id in &self.loading {
            let Some(tile) = self.arena.get_mut(id) else {
                continue;
            };
            let priority = encode_priority(
                &priority_inputs(tile, &self.options, frame.pass),
                &self.priority_bounds,
                self.options.prefer_leaves,
            );
            tile.priority = priority;
            tile.priority_cell.set(priority);
        }
    }

    fn handle_completion(&mut self, completion: FetchCompletion, frame: &FrameState) {
        let Some(pending) = self.pending.remove(&completion.id) else {
            return;
        };
        let Some(tile) = self.arena.get_mut(pending.tile) else {
            tracing::debug!("Dropping completion for destroyed tile: {}", completion.url);
            return;
        };
        let before = tile.content_state();
        let Some(slot) = tile.content.slots_mut().get_mut(pending.slot) else {
            return;
        };
        if slot.generation != pending.generation || slot.state != ContentState::Loading {
            tracing::debug!("Dropping stale completion for {}", completion.url);
            return;
        }
        let previous_state = slot
            .in_flight
            .take()
            .map_or(ContentState::Unloaded, |f| f.previous_state);

        match completion.outcome {
            FetchOutcome::Received(bytes) => {
                let slot_url = slot.url.clone();
                match self.build_content(pending.tile, &slot_url, bytes) {
                    Ok(content) => {
                        if let Some(slot) = self.slot_mut(pending.tile, pending.slot) {
                            slot.content = Some(content);
                            slot.state = ContentState::Processing;
                        }
                        self.processing.insert(pending.tile);
                        tracing::debug!("{}: received {slot_url}", pending.tile);
                    }
                    Err(error) => self.fail_slot(pending.tile, pending.slot, error.to_string()),
                }
            }
            FetchOutcome::Cancelled => {
                slot.state = previous_state;
                self.statistics.number_of_attempted_requests += 1;
                tracing::debug!("{}: request cancelled by the scheduler", pending.tile);
            }
            FetchOutcome::Failed(error) => {
                self.fail_slot(pending.tile, pending.slot, error.to_string());
            }
        }
        self.after_transition(pending.tile, before, false, frame);
    }

    fn build_content(&mut self, id: TileId, url: &str, bytes: Vec<u8>) -> Result<Box<dyn Content>, ContentError> {
        let kind = PayloadKind::sniff(&bytes).ok_or(ContentError::UnrecognizedPayload)?;
        match kind.route() {
            PayloadRoute::ExternalTileset => {
                let header = TilesetHeader::from_slice(&bytes)?;
                let context = SubtreeContext {
                    parent: Some(id),
                    base_url: url,
                    exaggeration: &self.options.vertical_exaggeration,
                    ellipsoid: &self.options.ellipsoid,
                };
                let child = self
                    .arena
                    .build_subtree(&header.root, &self.options.root_transform, context)?;
                if let Some(tile) = self.arena.get_mut(id) {
                    tile.has_tileset_content = true;
                }
                tracing::info!("{id}: attached external tileset {url} as {child}");
                Ok(Box::new(StructuralContent::default()))
            }
            PayloadRoute::ImplicitSubtree => {
                if let Some(tile) = self.arena.get_mut(id) {
                    tile.has_implicit_content = true;
                }
                Ok(Box::new(StructuralContent::default()))
            }
            PayloadRoute::Model => self.factories.build(&ContentContext { url, kind }, bytes),
        }
    }

    fn slot_mut(&mut self, id: TileId, index: usize) -> Option<&mut ContentSlot> {
        self.arena
            .get_mut(id)
            .and_then(|tile| tile.content.slots_mut().get_mut(index))
    }

    fn fail_slot(&mut self, id: TileId, index: usize, message: String) {
        let Some(slot) = self.slot_mut(id, index) else {
            return;
        };
        slot.unload();
        slot.state = ContentState::Failed;
        let url = slot.url.clone();
        tracing::warn!("{id}: failed to load {url}: {message}");
        self.statistics.number_of_failed_tiles += 1;
        self.events.send(TilesetEvent::TileFailed { url, message });
    }

    /// Bookkeeping after slot states changed: membership sets, and the
    /// one-time side effects of the tile becoming ready.
    fn after_transition(&mut self, id: TileId, before: ContentState, refreshed: bool, frame: &FrameState) {
        self.refresh_membership(id);
        let Some(tile) = self.arena.get_mut(id) else {
            return;
        };
        if before == ContentState::Ready || tile.content_state() != ContentState::Ready {
            return;
        }

        if refreshed {
            tile.expiration.clear_date();
        }
        tile.expiration.refresh(frame.time);
        if !tile.has_tileset_content && !tile.has_implicit_content {
            if tile.cache_node.is_none() {
                tile.cache_node = Some(self.cache.add(id));
            }
            self.budget.on_loaded(id, tile.content.byte_length() as u64);
        }
        if !refreshed {
            self.statistics.number_of_tiles_with_content_ready += 1;
        }
        self.statistics.number_of_loaded_tiles_total += 1;
        self.events.send(TilesetEvent::TileLoad(id));
        tracing::debug!("{id}: content ready");
    }

    fn refresh_membership(&mut self, id: TileId) {
        let Some(tile) = self.arena.get(id) else {
            self.loading.remove(&id);
            self.processing.remove(&id);
            return;
        };
        let slots = tile.content.slots();
        if slots.iter().any(|s| s.state == ContentState::Loading) {
            self.loading.insert(id);
        } else {
            self.loading.remove(&id);
        }
        if slots.iter().any(|s| s.state == ContentState::Processing) {
            self.processing.insert(id);
        } else {
            self.processing.remove(&id);
        }
    }

    fn refresh_statistics(&mut self) {
        self.statistics.number_of_pending_requests = self.pending.len();
        self.statistics.number_of_tiles_processing = self.processing.len();
        self.statistics.content_bytes = self.budget.total_bytes();
    }

    fn raise_load_progress(&mut self) {
        let progress = (
            self.statistics.number_of_pending_requests,
            self.statistics.number_of_tiles_processing,
        );
        let changed = progress != self.last_progress;
        self.last_progress = progress;
        if changed {
            self.events.send(TilesetEvent::LoadProgress {
                pending: progress.0,
                processing: progress.1,
            });
        }
        if changed && self.statistics.tiles_loaded() {
            self.events.send(TilesetEvent::AllTilesLoaded);
            if !self.initial_tiles_loaded {
                self.initial_tiles_loaded = true;
                self.events.send(TilesetEvent::InitialTilesLoaded);
            }
        }
    }
}

fn priority_inputs(tile: &Tile, options: &TilesetOptions, pass: TilesetPass) -> PriorityInputs {
    PriorityInputs {
        depth: tile.depth as f64,
        distance: tile.distance_to_camera,
        foveated_factor: tile.foveated_factor,
        reverse_screen_space_error: tile.reverse_screen_space_error,
        use_distance: sorts_by_distance(tile.refine == Refine::Replace, options.skip_level_of_detail),
        progressive: tile.progressive_resolution,
        deferred: tile.priority_deferred,
        preload_flight: pass == TilesetPass::PreloadFlight,
    }
}

/// Cancel the slot's outstanding request and restore its previous state.
fn cancel_slot_request(
    slot: &mut ContentSlot,
    scheduler: &mut RequestScheduler,
    pending: &mut FxHashMap<RequestId, PendingFetch>,
) -> bool {
    let Some(in_flight) = slot.in_flight.take() else {
        return false;
    };
    scheduler.cancel(in_flight.request);
    pending.remove(&in_flight.request);
    slot.state = in_flight.previous_state;
    slot.generation += 1;
    true
}
