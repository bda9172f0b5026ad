//! The coordinator: owns the trip, the map session and every engine, and routes results
//! between them on a single task.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio::sync::mpsc;

use crate::{
    animation::{
        ease::Ease,
        engine::{AnimationEngine, AnimationEvent, LegPlan, PlayState},
        timing::{LegTiming, ResumePolicy},
    },
    capture::{CapturePipeline, CaptureTick, Recording},
    clock::Clock,
    config::Config,
    encode::sink::{FrameSink, VideoCodec},
    foundation::{
        core::{Canvas, Coordinate, Fps},
        error::{TripError, TripResult},
    },
    geocode::{GeocodeError, GeocodingGateway, Place},
    map::{MapSession, Viewport},
    model::{LegRequest, LocationId, RouteKey, TransportMode, Trip},
    notice::Notifier,
    render::{backend::RenderBackend, svg::SvgBackend},
    route::{RouteBatch, RouteResolver},
    tiles::{TileFetch, TileLayer, TileSource, fetch_tiles},
};

/// Padding kept around the trip when the viewport is fitted to new routes.
const FIT_PADDING: f64 = 40.0;

/// Builds the off-screen surface a capture renders onto.
pub type SurfaceFactory = Box<dyn Fn(Canvas) -> Box<dyn RenderBackend> + Send + Sync>;

/// Published on the player's event channel.
#[derive(Clone, Debug, PartialEq)]
pub enum PlayerEvent {
    Animation(AnimationEvent),
    LocationResolved { id: LocationId, place: Place },
    LocationFailed { id: LocationId, error: GeocodeError },
    RoutesApplied { generation: u64, legs: usize },
    RoutesDiscarded { generation: u64 },
    CaptureStarted { codec: VideoCodec },
    CaptureSaved { path: PathBuf, bytes: usize },
    CaptureFailed { message: String },
}

/// Requests accepted by [`TripPlayer::run`].
pub enum PlayerCommand {
    Geocode(LocationId),
    GeocodeAt(LocationId, Coordinate),
    SetName(LocationId, String),
    SetTransport(LocationId, TransportMode),
    AddWaypoint,
    RemoveWaypoint(LocationId),
    MoveWaypoint(LocationId, isize),
    Play,
    Pause,
    Stop,
    StartCapture(Box<dyn FrameSink>),
    StopCapture,
    SelectTileLayer(TileLayer),
    SetLabels(bool),
    UserPan(Coordinate),
    Shutdown,
}

/// Results of work spawned by the run loop.
enum Completion {
    Geocoded(LocationId, u64, Result<Place, GeocodeError>),
    Routed(RouteBatch),
    Tiles(TileLayer, Vec<TileFetch>),
}

/// External services the player talks to.
#[derive(Clone)]
pub struct PlayerServices {
    pub geocoder: GeocodingGateway,
    pub resolver: RouteResolver,
    pub tiles: Option<Arc<dyn TileSource>>,
}

#[derive(Clone, Debug)]
pub struct PlayerOptions {
    pub timing: LegTiming,
    pub ease: Ease,
    pub resume: ResumePolicy,
    pub viewport: Viewport,
    pub tile_layer: TileLayer,
    pub labels: bool,
    pub frame_rate: Fps,
    pub capture_rate: u32,
    pub output_dir: PathBuf,
}

impl PlayerOptions {
    pub fn from_config(cfg: &Config) -> TripResult<Self> {
        cfg.validate()?;
        Ok(Self {
            timing: cfg.timing()?,
            ease: cfg.ease,
            resume: cfg.resume_policy,
            viewport: Viewport::new(Coordinate::new(20.0, 0.0), 2, cfg.canvas()?),
            tile_layer: cfg.tile_layer()?,
            labels: cfg.labels,
            frame_rate: cfg.fps()?,
            capture_rate: cfg.capture_rate,
            output_dir: cfg.output_dir.clone(),
        })
    }
}

pub struct TripPlayer {
    trip: Trip,
    map: MapSession,
    services: PlayerServices,
    engine: AnimationEngine,
    capture: CapturePipeline,
    timing: LegTiming,
    frame_interval: Duration,
    output_dir: PathBuf,
    clock: Arc<dyn Clock>,
    notifier: Notifier,
    events: Option<mpsc::UnboundedSender<PlayerEvent>>,
    surfaces: SurfaceFactory,
    routes: Option<RouteBatch>,
    requested_key: Option<RouteKey>,
    /// Lookup token per location with a geocode in flight.
    in_flight: HashMap<LocationId, u64>,
    next_lookup: u64,
    tiles_dirty: bool,
    last_recording: Option<PathBuf>,
}

impl TripPlayer {
    pub fn new(
        trip: Trip,
        services: PlayerServices,
        options: PlayerOptions,
        clock: Arc<dyn Clock>,
        notifier: Notifier,
    ) -> TripResult<Self> {
        let mut map = MapSession::new(options.viewport, options.tile_layer);
        map.set_labels(options.labels);
        Ok(Self {
            trip,
            map,
            services,
            engine: AnimationEngine::new(options.ease, options.resume),
            capture: CapturePipeline::new(options.capture_rate)?,
            timing: options.timing,
            frame_interval: options.frame_rate.frame_duration(),
            output_dir: options.output_dir,
            clock,
            notifier,
            events: None,
            surfaces: Box::new(|canvas| {
                Box::new(SvgBackend::new(canvas)) as Box<dyn RenderBackend>
            }),
            routes: None,
            requested_key: None,
            in_flight: HashMap::new(),
            next_lookup: 0,
            tiles_dirty: true,
            last_recording: None,
        })
    }

    /// Publish [`PlayerEvent`]s on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<PlayerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Replace how capture surfaces are created.
    pub fn with_surface_factory(mut self, surfaces: SurfaceFactory) -> Self {
        self.surfaces = surfaces;
        self
    }

    pub fn trip(&self) -> &Trip {
        &self.trip
    }

    pub fn map(&self) -> &MapSession {
        &self.map
    }

    pub fn engine(&self) -> &AnimationEngine {
        &self.engine
    }

    pub fn state(&self) -> PlayState {
        self.engine.state()
    }

    /// The route batch currently drawn and animated.
    pub fn routes(&self) -> Option<&RouteBatch> {
        self.routes.as_ref()
    }

    pub fn is_recording(&self) -> bool {
        self.capture.is_recording()
    }

    pub fn last_recording(&self) -> Option<&Path> {
        self.last_recording.as_deref()
    }

    pub fn timing(&self) -> LegTiming {
        self.timing
    }

    fn publish(&self, event: PlayerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    // --- geocoding ------------------------------------------------------------------------

    /// Mark `id` as being looked up and hand out the token its result must carry. `None`
    /// when a lookup for it is already running.
    fn begin_lookup(&mut self, id: LocationId) -> Option<u64> {
        if self.in_flight.contains_key(&id) {
            self.notifier
                .info(format!("a lookup for '{id}' is already in progress"));
            return None;
        }
        self.next_lookup += 1;
        self.in_flight.insert(id, self.next_lookup);
        Some(self.next_lookup)
    }

    fn name_of(&self, id: LocationId) -> TripResult<String> {
        self.trip
            .get(id)
            .map(|p| p.name.clone())
            .ok_or_else(|| TripError::input(format!("no location with id '{id}'")))
    }

    /// Resolve a location's name and recompute routes.
    #[tracing::instrument(skip(self))]
    pub async fn geocode(&mut self, id: LocationId) -> TripResult<()> {
        let name = self.name_of(id)?;
        let Some(token) = self.begin_lookup(id) else {
            return Ok(());
        };
        let result = self.services.geocoder.resolve(&name).await;
        self.apply_geocode(id, token, result);
        self.refresh_routes().await;
        Ok(())
    }

    /// Resolve a clicked map position for a location and recompute routes.
    #[tracing::instrument(skip(self))]
    pub async fn geocode_at(&mut self, id: LocationId, at: Coordinate) -> TripResult<()> {
        self.name_of(id)?;
        let Some(token) = self.begin_lookup(id) else {
            return Ok(());
        };
        let result = self
            .services
            .geocoder
            .resolve_from_coordinate(at.lat, at.lng)
            .await;
        self.apply_geocode(id, token, result);
        self.refresh_routes().await;
        Ok(())
    }

    fn apply_geocode(
        &mut self,
        id: LocationId,
        token: u64,
        result: Result<Place, GeocodeError>,
    ) {
        if self.in_flight.get(&id) != Some(&token) {
            tracing::debug!(%id, token, "dropping geocode result for a renamed point");
            return;
        }
        self.in_flight.remove(&id);
        let applied = match &result {
            Ok(place) => self
                .trip
                .apply_place(id, place.coordinate, place.display_name.clone()),
            Err(e) => self.trip.set_error(id, e.to_string()),
        };
        if let Err(e) = applied {
            // The point was removed while the lookup ran.
            tracing::debug!(%id, error = %e, "dropping geocode result");
            return;
        }
        match result {
            Ok(place) => self.publish(PlayerEvent::LocationResolved { id, place }),
            Err(error) => {
                self.notifier.warning(format!("'{id}': {error}"));
                self.publish(PlayerEvent::LocationFailed { id, error });
            }
        }
        self.on_trip_changed();
    }

    // --- routes ---------------------------------------------------------------------------

    /// Claim a recomputation if the trip's route key changed since the last one. The
    /// generation is taken here, before any resolution runs.
    fn take_recompute(&mut self) -> Option<(RouteResolver, u64, Vec<LegRequest>)> {
        let key = self.trip.route_key();
        if self.requested_key.as_ref() == Some(&key) {
            return None;
        }
        self.requested_key = Some(key);
        let resolver = self.services.resolver.clone();
        let generation = resolver.next_generation();
        Some((resolver, generation, self.trip.leg_requests()))
    }

    /// Recompute routes if needed and apply the result. Returns whether a batch was applied.
    pub async fn refresh_routes(&mut self) -> bool {
        let Some((resolver, generation, requests)) = self.take_recompute() else {
            return false;
        };
        let batch = resolver.recompute_with(generation, requests).await;
        let applied = self.apply_routes(batch);
        if applied {
            self.sync_tiles().await;
        }
        applied
    }

    /// Draw and load a finished batch, unless a newer recomputation has started since.
    pub fn apply_routes(&mut self, batch: RouteBatch) -> bool {
        if !self.services.resolver.is_current(&batch) {
            tracing::debug!(
                generation = batch.generation,
                current = self.services.resolver.generation(),
                "discarding stale routes"
            );
            self.publish(PlayerEvent::RoutesDiscarded {
                generation: batch.generation,
            });
            return false;
        }

        self.map
            .redraw_static(batch.generation, &batch.legs, self.trip.points());
        self.map.fit_to_content(FIT_PADDING);
        self.tiles_dirty = true;

        let plans = batch
            .legs
            .iter()
            .map(|leg| LegPlan::timed(leg, self.timing))
            .collect();
        let events = self.engine.load_legs(plans);
        self.handle_animation_events(&events);
        self.finish_capture_if_stopped();

        tracing::info!(generation = batch.generation, legs = batch.legs.len(), "routes applied");
        self.publish(PlayerEvent::RoutesApplied {
            generation: batch.generation,
            legs: batch.legs.len(),
        });
        self.routes = Some(batch);
        true
    }

    /// Fetch basemap tiles for the current viewport.
    pub async fn load_tiles(&mut self) -> usize {
        self.tiles_dirty = false;
        let Some(source) = self.services.tiles.clone() else {
            return 0;
        };
        self.map.prefetch_tiles(source.as_ref(), &self.notifier).await
    }

    /// Fetch tiles if the layer or the visible area changed since the last fetch.
    pub async fn sync_tiles(&mut self) -> usize {
        if !self.tiles_dirty {
            return 0;
        }
        self.load_tiles().await
    }

    // --- trip edits -----------------------------------------------------------------------

    // A changed route key invalidates the running animation and everything loaded for the
    // old layout.
    fn on_trip_changed(&mut self) {
        if self.requested_key.as_ref() == Some(&self.trip.route_key()) {
            return;
        }
        if !self.engine.state().is_stopped() {
            let events = self.engine.stop();
            self.handle_animation_events(&events);
            self.finish_capture_if_stopped();
        }
        self.engine.load_legs(Vec::new());
        self.map.clear_static();
        self.routes = None;
        self.requested_key = None;
    }

    fn edit<T>(&mut self, f: impl FnOnce(&mut Trip) -> TripResult<T>) -> TripResult<T> {
        match f(&mut self.trip) {
            Ok(v) => {
                self.on_trip_changed();
                Ok(v)
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                Err(e)
            }
        }
    }

    pub fn add_waypoint(&mut self) -> LocationId {
        let id = self.trip.add_waypoint();
        self.on_trip_changed();
        id
    }

    pub fn remove_waypoint(&mut self, id: LocationId) -> TripResult<()> {
        self.edit(|t| t.remove_waypoint(id).map(|_| ()))?;
        self.in_flight.remove(&id);
        Ok(())
    }

    pub fn move_waypoint(&mut self, id: LocationId, delta: isize) -> TripResult<()> {
        self.edit(|t| t.move_waypoint(id, delta))
    }

    /// Rename a point. A lookup still running for the old name is disowned.
    pub fn set_name(&mut self, id: LocationId, name: impl Into<String>) -> TripResult<()> {
        let name = name.into();
        self.edit(|t| t.set_name(id, name))?;
        self.in_flight.remove(&id);
        Ok(())
    }

    pub fn set_transport(&mut self, id: LocationId, mode: TransportMode) -> TripResult<()> {
        self.edit(|t| t.set_transport(id, mode))
    }

    // --- map ------------------------------------------------------------------------------

    /// Swap the basemap and fetch its tiles for the current view.
    pub async fn select_tile_layer(&mut self, layer: TileLayer) -> usize {
        self.map.select_tile_layer(layer);
        self.tiles_dirty = true;
        self.sync_tiles().await
    }

    pub fn set_labels(&mut self, on: bool) {
        self.map.set_labels(on);
    }

    /// Pan by hand; following pauses until the next leg.
    pub async fn user_pan(&mut self, center: Coordinate) -> usize {
        self.map.user_pan(center);
        self.tiles_dirty = true;
        self.sync_tiles().await
    }

    // --- animation ------------------------------------------------------------------------

    /// Start or resume. Refused with a notice while fewer than two locations resolve or
    /// the routes for the current layout have not arrived.
    pub fn play(&mut self) -> TripResult<()> {
        let routes_ready = self.routes.is_some()
            && self.requested_key.as_ref() == Some(&self.trip.route_key());
        let result = if self.trip.valid_count() < 2 {
            Err(TripError::input(
                "add at least two resolved locations before playing",
            ))
        } else if !routes_ready {
            Err(TripError::precondition(
                "routes are still being resolved; try again in a moment",
            ))
        } else {
            self.engine.play(self.clock.now())
        };
        match result {
            Ok(events) => {
                self.handle_animation_events(&events);
                Ok(())
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                Err(e)
            }
        }
    }

    pub fn pause(&mut self) {
        let events = self.engine.pause(self.clock.now());
        self.handle_animation_events(&events);
    }

    /// Stop the animation and any recording. Idempotent.
    pub fn stop(&mut self) {
        let events = self.engine.stop();
        self.handle_animation_events(&events);
        self.finish_capture_if_stopped();
    }

    /// Advance one frame: move the marker, then sample it if recording.
    pub fn tick(&mut self) -> Vec<AnimationEvent> {
        let now = self.clock.now();
        let events = self.engine.tick(now);
        self.handle_animation_events(&events);

        match self.capture.tick(now, self.engine.state(), &self.map) {
            CaptureTick::Finished(result) => self.handle_recording(result),
            CaptureTick::Idle | CaptureTick::Skipped | CaptureTick::Sampled { .. } => {}
        }
        events
    }

    /// Place the marker where an uninterrupted playback would have it after `at`, without
    /// starting the animation.
    pub fn seek_preview(&mut self, at: Duration) -> Option<(usize, Coordinate)> {
        let (leg, position) = self.engine.preview(at)?;
        self.map.set_marker(position);
        Some((leg, position))
    }

    fn handle_animation_events(&mut self, events: &[AnimationEvent]) {
        for event in events {
            match event {
                AnimationEvent::Started { .. } | AnimationEvent::SegmentComplete { .. } => {
                    self.map.begin_leg();
                }
                AnimationEvent::MarkerMoved { position, .. } => {
                    self.map.set_marker(*position);
                    if self.map.follow(*position) {
                        self.tiles_dirty = true;
                    }
                }
                AnimationEvent::Stopped { .. } => self.map.clear_marker(),
                AnimationEvent::Paused { .. }
                | AnimationEvent::Resumed { .. }
                | AnimationEvent::TripComplete => {}
            }
            self.publish(PlayerEvent::Animation(event.clone()));
        }
    }

    // --- capture --------------------------------------------------------------------------

    pub fn start_capture(&mut self, sink: Box<dyn FrameSink>) -> TripResult<VideoCodec> {
        let surface = (self.surfaces)(self.map.viewport().canvas);
        match self.capture.start(self.engine.state(), surface, sink) {
            Ok(codec) => {
                self.publish(PlayerEvent::CaptureStarted { codec });
                Ok(codec)
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                Err(e)
            }
        }
    }

    /// Stop recording and save the file. `Ok(None)` when not recording.
    pub fn stop_capture(&mut self) -> TripResult<Option<PathBuf>> {
        match self.capture.stop() {
            Ok(None) => Ok(None),
            Ok(Some(recording)) => self.save_recording(&recording).map(Some),
            Err(e) => {
                self.report_capture_failure(&e);
                Err(e)
            }
        }
    }

    fn finish_capture_if_stopped(&mut self) {
        if self.capture.is_recording() && self.engine.state().is_stopped() {
            let result = self.capture.stop().and_then(|r| {
                r.ok_or_else(|| TripError::precondition("recording ended unexpectedly"))
            });
            self.handle_recording(result);
        }
    }

    fn handle_recording(&mut self, result: TripResult<Recording>) {
        match result {
            Ok(recording) => {
                let _ = self.save_recording(&recording);
            }
            Err(e) => self.report_capture_failure(&e),
        }
    }

    fn save_recording(&mut self, recording: &Recording) -> TripResult<PathBuf> {
        match recording.save(&self.output_dir, &chrono::Local::now()) {
            Ok(path) => {
                self.notifier
                    .info(format!("recording saved to {}", path.display()));
                self.publish(PlayerEvent::CaptureSaved {
                    path: path.clone(),
                    bytes: recording.byte_len(),
                });
                self.last_recording = Some(path.clone());
                Ok(path)
            }
            Err(e) => {
                self.report_capture_failure(&e);
                Err(e)
            }
        }
    }

    fn report_capture_failure(&self, e: &TripError) {
        self.notifier.error(format!("recording failed: {e}"));
        self.publish(PlayerEvent::CaptureFailed {
            message: e.to_string(),
        });
    }

    // --- run loop -------------------------------------------------------------------------

    fn spawn_recompute(&mut self, done: &mpsc::UnboundedSender<Completion>) {
        if let Some((resolver, generation, requests)) = self.take_recompute() {
            let done = done.clone();
            tokio::spawn(async move {
                let batch = resolver.recompute_with(generation, requests).await;
                let _ = done.send(Completion::Routed(batch));
            });
        }
    }

    fn spawn_tile_fill(&mut self, done: &mpsc::UnboundedSender<Completion>) {
        if !std::mem::take(&mut self.tiles_dirty) {
            return;
        }
        let Some(source) = self.services.tiles.clone() else {
            return;
        };
        let Some((layer, keys)) = self.map.claim_visible_tiles() else {
            return;
        };
        let done = done.clone();
        tokio::spawn(async move {
            let results = fetch_tiles(source.as_ref(), &layer, keys).await;
            let _ = done.send(Completion::Tiles(layer, results));
        });
    }

    fn spawn_geocode(
        &mut self,
        id: LocationId,
        at: Option<Coordinate>,
        done: &mpsc::UnboundedSender<Completion>,
    ) {
        let name = match self.name_of(id) {
            Ok(name) => name,
            Err(e) => {
                self.notifier.error(e.to_string());
                return;
            }
        };
        let Some(token) = self.begin_lookup(id) else {
            return;
        };
        let gateway = self.services.geocoder.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let result = match at {
                Some(at) => gateway.resolve_from_coordinate(at.lat, at.lng).await,
                None => gateway.resolve(&name).await,
            };
            let _ = done.send(Completion::Geocoded(id, token, result));
        });
    }

    /// Handle one command. Returns `false` on shutdown.
    fn handle_command(
        &mut self,
        command: PlayerCommand,
        done: &mpsc::UnboundedSender<Completion>,
    ) -> bool {
        // Failures below are already on the notice channel.
        match command {
            PlayerCommand::Geocode(id) => self.spawn_geocode(id, None, done),
            PlayerCommand::GeocodeAt(id, at) => self.spawn_geocode(id, Some(at), done),
            PlayerCommand::SetName(id, name) => {
                let _ = self.set_name(id, name);
            }
            PlayerCommand::SetTransport(id, mode) => {
                let _ = self.set_transport(id, mode);
            }
            PlayerCommand::AddWaypoint => {
                self.add_waypoint();
            }
            PlayerCommand::RemoveWaypoint(id) => {
                let _ = self.remove_waypoint(id);
            }
            PlayerCommand::MoveWaypoint(id, delta) => {
                let _ = self.move_waypoint(id, delta);
            }
            PlayerCommand::Play => {
                let _ = self.play();
            }
            PlayerCommand::Pause => self.pause(),
            PlayerCommand::Stop => self.stop(),
            PlayerCommand::StartCapture(sink) => {
                let _ = self.start_capture(sink);
            }
            PlayerCommand::StopCapture => {
                let _ = self.stop_capture();
            }
            PlayerCommand::SelectTileLayer(layer) => {
                self.map.select_tile_layer(layer);
                self.tiles_dirty = true;
            }
            PlayerCommand::SetLabels(on) => self.set_labels(on),
            PlayerCommand::UserPan(center) => {
                self.map.user_pan(center);
                self.tiles_dirty = true;
            }
            PlayerCommand::Shutdown => return false,
        }
        true
    }

    /// Drive the player from `commands` until the channel closes or `Shutdown` arrives.
    ///
    /// Lookups, route recomputations and tile fetches run as spawned tasks whose results
    /// come back through an internal channel; frame ticks are only polled while playing or
    /// recording.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<PlayerCommand>) -> Self {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();
        let mut frames = tokio::time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        self.spawn_recompute(&done_tx);
        self.spawn_tile_fill(&done_tx);
        loop {
            let animating = self.engine.state().is_playing() || self.capture.is_recording();
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if !self.handle_command(command, &done_tx) {
                        break;
                    }
                    let now_animating =
                        self.engine.state().is_playing() || self.capture.is_recording();
                    if now_animating && !animating {
                        frames.reset();
                    }
                }
                Some(done) = done_rx.recv() => match done {
                    Completion::Geocoded(id, token, result) => {
                        self.apply_geocode(id, token, result);
                    }
                    Completion::Routed(batch) => {
                        self.apply_routes(batch);
                    }
                    Completion::Tiles(layer, results) => {
                        self.map.store_tiles(&layer, results, &self.notifier);
                    }
                },
                _ = frames.tick(), if animating => {
                    self.tick();
                }
            }
            self.spawn_recompute(&done_tx);
            self.spawn_tile_fill(&done_tx);
        }

        self.stop();
        tracing::debug!("player loop finished");
        self
    }
}

#[cfg(test)]
#[path = "../tests/unit/player/player.rs"]
mod tests;
