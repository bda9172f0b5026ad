use async_trait::async_trait;

use super::*;
use crate::{
    animation::engine::StopReason,
    clock::ManualClock,
    encode::sink::InMemorySink,
    foundation::geo::Polyline,
    geocode::Geocoder,
    notice::Notice,
    route::{RouteError, RouteSource, RoutingService},
    tiles::TileKey,
};

fn c(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng)
}

struct FakeGeocoder;

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn search(&self, query: &str) -> Result<Place, GeocodeError> {
        let coordinate = match query {
            "Tokyo" => c(35.6762, 139.6503),
            "Osaka" => c(34.6937, 135.5023),
            "Kyoto" => c(35.0116, 135.7681),
            other => return Err(GeocodeError::NotFound(other.to_string())),
        };
        Ok(Place {
            coordinate,
            display_name: format!("{query}, Japan"),
        })
    }

    async fn reverse(&self, at: Coordinate) -> Result<Place, GeocodeError> {
        Ok(Place {
            coordinate: at,
            display_name: "Somewhere".to_string(),
        })
    }
}

struct FakeRouter;

#[async_trait]
impl RoutingService for FakeRouter {
    async fn route(
        &self,
        from: Coordinate,
        to: Coordinate,
        _mode: TransportMode,
    ) -> Result<Polyline, RouteError> {
        let mid = Coordinate::lerp(from, to, 0.5);
        Ok(Polyline::new(vec![from, c(mid.lat + 0.2, mid.lng), to]))
    }
}

/// Serves the same small PNG for every tile.
struct SolidTiles;

#[async_trait]
impl TileSource for SolidTiles {
    async fn fetch(&self, _layer: &TileLayer, _key: TileKey) -> TripResult<Vec<u8>> {
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([120, 180, 200, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)
            .map_err(|e| TripError::service(e.to_string()))?;
        Ok(out.into_inner())
    }
}

/// Answers "Tokyo" half a second late; everything else immediately.
struct SlowTokyo;

#[async_trait]
impl Geocoder for SlowTokyo {
    async fn search(&self, query: &str) -> Result<Place, GeocodeError> {
        if query == "Tokyo" {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        FakeGeocoder.search(query).await
    }

    async fn reverse(&self, at: Coordinate) -> Result<Place, GeocodeError> {
        FakeGeocoder.reverse(at).await
    }
}

struct Harness {
    player: TripPlayer,
    clock: Arc<ManualClock>,
    resolver: RouteResolver,
    notices: mpsc::UnboundedReceiver<Notice>,
    events: mpsc::UnboundedReceiver<PlayerEvent>,
}

fn options(output_dir: PathBuf) -> PlayerOptions {
    PlayerOptions {
        timing: LegTiming::FixedSeconds(5),
        ease: Ease::Linear,
        resume: ResumePolicy::ContinueFromElapsed,
        viewport: Viewport::new(c(0.0, 0.0), 2, Canvas::new(64, 48).expect("canvas")),
        tile_layer: TileLayer::none(),
        labels: false,
        frame_rate: Fps::new(30, 1).expect("fps"),
        capture_rate: 10,
        output_dir,
    }
}

fn harness(tag: &str) -> Harness {
    harness_with(tag, None)
}

fn harness_with(tag: &str, tiles: Option<Arc<dyn TileSource>>) -> Harness {
    let (notifier, notices) = Notifier::channel();
    let (tx, events) = mpsc::unbounded_channel();
    let resolver = RouteResolver::new(Arc::new(FakeRouter), notifier.clone());
    let services = PlayerServices {
        geocoder: GeocodingGateway::new(Arc::new(FakeGeocoder)),
        resolver: resolver.clone(),
        tiles,
    };
    let clock = Arc::new(ManualClock::new());
    let dir = std::env::temp_dir().join(format!("tripreel-player-{tag}-{}", std::process::id()));
    let player = TripPlayer::new(Trip::new(), services, options(dir), clock.clone(), notifier)
        .expect("player")
        .with_events(tx)
        .with_surface_factory(Box::new(|canvas| {
            Box::new(SvgBackend::without_fonts(canvas)) as Box<dyn RenderBackend>
        }));
    Harness {
        player,
        clock,
        resolver,
        notices,
        events,
    }
}

fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(v) = rx.try_recv() {
        out.push(v);
    }
    out
}

async fn tokyo_to_osaka(h: &mut Harness) {
    h.player.set_name(LocationId::Start, "Tokyo").expect("name");
    h.player.set_name(LocationId::End, "Osaka").expect("name");
    h.player.geocode(LocationId::Start).await.expect("geocode");
    h.player.geocode(LocationId::End).await.expect("geocode");
}

#[tokio::test]
async fn geocoding_both_ends_draws_and_loads_one_leg() {
    let mut h = harness("route");
    tokyo_to_osaka(&mut h).await;

    let start = h.player.trip().get(LocationId::Start).expect("start");
    assert_eq!(start.name, "Tokyo, Japan");
    assert!(start.is_valid());

    let routes = h.player.routes().expect("routes applied");
    assert_eq!(routes.legs.len(), 1);
    assert_eq!(routes.legs[0].source, RouteSource::Routed);
    assert_eq!(h.player.engine().legs().len(), 1);
    assert_eq!(h.player.map().static_layer().routes.len(), 1);
    assert_eq!(h.player.map().static_layer().stops.len(), 2);

    let events = drain(&mut h.events);
    assert!(events.contains(&PlayerEvent::RoutesApplied {
        generation: routes.generation,
        legs: 1
    }));
}

#[tokio::test]
async fn failed_lookup_marks_the_point_and_warns() {
    let mut h = harness("notfound");
    h.player.set_name(LocationId::Start, "Atlantis").expect("name");
    h.player.geocode(LocationId::Start).await.expect("geocode");

    let start = h.player.trip().get(LocationId::Start).expect("start");
    assert!(!start.is_valid());
    assert!(start.error.as_deref().is_some_and(|e| e.contains("Atlantis")));

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        PlayerEvent::LocationFailed {
            id: LocationId::Start,
            error: GeocodeError::NotFound(_)
        }
    )));
    assert!(drain(&mut h.notices).iter().any(|n| n.message.contains("Atlantis")));
}

#[tokio::test]
async fn second_lookup_for_the_same_point_is_refused_while_one_runs() {
    let mut h = harness("inflight");
    h.player.set_name(LocationId::Start, "Tokyo").expect("name");
    assert!(h.player.begin_lookup(LocationId::Start).is_some());

    h.player.geocode(LocationId::Start).await.expect("refused quietly");
    assert!(!h.player.trip().get(LocationId::Start).expect("start").is_valid());
    assert!(
        drain(&mut h.notices)
            .iter()
            .any(|n| n.message.contains("already in progress"))
    );
}

#[tokio::test]
async fn stale_batches_are_discarded() {
    let mut h = harness("stale");
    let old = h.resolver.recompute(Vec::new()).await;
    let new = h.resolver.recompute(Vec::new()).await;

    assert!(!h.player.apply_routes(old.clone()));
    assert!(h.player.routes().is_none());
    assert!(h.player.apply_routes(new.clone()));
    assert_eq!(h.player.routes(), Some(&new));

    let events = drain(&mut h.events);
    assert!(events.contains(&PlayerEvent::RoutesDiscarded {
        generation: old.generation
    }));
}

#[tokio::test]
async fn play_without_routes_reports_an_error() {
    let mut h = harness("noroutes");
    assert!(matches!(h.player.play(), Err(TripError::Input(_))));
    assert!(h.player.state().is_stopped());
    assert!(
        drain(&mut h.notices)
            .iter()
            .any(|n| n.message.contains("at least two"))
    );
}

#[tokio::test]
async fn marker_moves_with_ticks_and_clears_on_completion() {
    let mut h = harness("marker");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    assert!(h.player.state().is_playing());

    h.clock.advance(Duration::from_millis(2500));
    h.player.tick();
    let marker = h.player.map().marker().expect("marker shown");
    assert!(marker.lng < 139.6503 && marker.lng > 135.5023);

    h.clock.advance(Duration::from_millis(2500));
    let events = h.player.tick();
    assert!(events.contains(&AnimationEvent::TripComplete));
    assert!(h.player.state().is_stopped());
    assert!(h.player.map().marker().is_none());
}

#[tokio::test]
async fn route_changing_edit_stops_the_animation() {
    let mut h = harness("edit");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    drain(&mut h.events);

    h.player
        .set_transport(LocationId::Start, TransportMode::Plane)
        .expect("transport");
    assert!(h.player.state().is_stopped());
    assert!(drain(&mut h.events).contains(&PlayerEvent::Animation(AnimationEvent::Stopped {
        reason: StopReason::Requested
    })));

    // The car legs are gone; nothing plays until the flight route arrives.
    assert!(h.player.routes().is_none());
    assert!(h.player.engine().legs().is_empty());
    assert!(matches!(h.player.play(), Err(TripError::Precondition(_))));
    assert!(h.player.state().is_stopped());

    // The new routes arrive; playing again works.
    assert!(h.player.refresh_routes().await);
    assert_eq!(
        h.player.routes().expect("routes").legs[0].source,
        RouteSource::Direct
    );
    h.player.play().expect("play again");
}

#[tokio::test]
async fn label_toggle_does_not_stop_the_animation() {
    let mut h = harness("labels");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    h.player.set_labels(true);
    h.player.select_tile_layer(TileLayer::none()).await;
    assert!(h.player.state().is_playing());
    assert!(!h.player.refresh_routes().await);
}

#[tokio::test]
async fn clearing_a_name_unloads_the_legs_and_refuses_play() {
    let mut h = harness("cleared");
    tokyo_to_osaka(&mut h).await;
    drain(&mut h.notices);

    h.player.set_name(LocationId::End, "").expect("name");
    assert_eq!(h.player.trip().valid_count(), 1);
    assert!(h.player.engine().legs().is_empty());
    assert!(h.player.map().static_layer().routes.is_empty());

    assert!(matches!(h.player.play(), Err(TripError::Input(_))));
    assert!(h.player.state().is_stopped());
    assert!(h.player.map().marker().is_none());
    assert!(
        drain(&mut h.notices)
            .iter()
            .any(|n| n.message.contains("at least two"))
    );
}

#[tokio::test]
async fn selecting_a_layer_fetches_tiles_for_the_current_view() {
    let mut h = harness_with("tiles", Some(Arc::new(SolidTiles)));
    assert!(h.player.map().tiles().is_empty());

    let loaded = h
        .player
        .select_tile_layer(TileLayer::preset("osm").expect("preset"))
        .await;
    let visible = h.player.map().visible_tiles();
    assert!(!visible.is_empty());
    assert_eq!(loaded, visible.len());
    assert!(
        visible
            .iter()
            .all(|(key, _)| h.player.map().tiles().get("osm", *key).is_some())
    );

    // Panning away fills the newly visible tiles as well.
    h.player.user_pan(c(35.0, 135.0)).await;
    assert!(
        h.player
            .map()
            .visible_tiles()
            .iter()
            .all(|(key, _)| h.player.map().tiles().get("osm", *key).is_some())
    );
}

#[tokio::test]
async fn capture_requires_a_playing_animation() {
    let mut h = harness("precondition");
    tokyo_to_osaka(&mut h).await;
    let err = h
        .player
        .start_capture(Box::new(InMemorySink::default()))
        .expect_err("not playing");
    assert!(matches!(err, TripError::Precondition(_)));
    assert!(!h.player.is_recording());
    assert!(
        drain(&mut h.notices)
            .iter()
            .any(|n| n.message.contains("start the animation"))
    );
}

#[tokio::test]
async fn capture_ends_with_the_trip_and_saves_a_file() {
    let mut h = harness("capture");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    assert_eq!(
        h.player
            .start_capture(Box::new(InMemorySink::new(VideoCodec::Vp9)))
            .expect("capture"),
        VideoCodec::Vp9
    );

    for _ in 0..60 {
        h.clock.advance(Duration::from_millis(100));
        h.player.tick();
        if h.player.state().is_stopped() {
            break;
        }
    }
    assert!(h.player.state().is_stopped());
    assert!(!h.player.is_recording());

    let path = h.player.last_recording().expect("saved").to_path_buf();
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("webm"));
    let len = std::fs::metadata(&path).expect("file").len();
    // 64x48 RGBA per sampled frame.
    assert!(len >= 40 * 64 * 48 * 4);
    let _ = std::fs::remove_file(&path);

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::CaptureSaved { .. })));
}

#[tokio::test]
async fn stopping_the_animation_finishes_the_capture() {
    let mut h = harness("capture-stop");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    h.player
        .start_capture(Box::new(InMemorySink::default()))
        .expect("capture");
    h.clock.advance(Duration::from_millis(100));
    h.player.tick();

    h.player.stop();
    assert!(!h.player.is_recording());
    let path = h.player.last_recording().expect("saved").to_path_buf();
    let _ = std::fs::remove_file(path);

    // Stop is idempotent and a second capture stop is a no-op.
    h.player.stop();
    assert_eq!(h.player.stop_capture().expect("no-op"), None);
}

#[tokio::test]
async fn capture_stopped_before_any_frame_reports_no_data() {
    let mut h = harness("capture-empty");
    tokyo_to_osaka(&mut h).await;
    h.player.play().expect("play");
    h.player
        .start_capture(Box::new(InMemorySink::default()))
        .expect("capture");

    let err = h.player.stop_capture().expect_err("empty");
    assert!(matches!(err, TripError::Resource(_)));
    assert!(h.player.state().is_playing());
    assert!(
        drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, PlayerEvent::CaptureFailed { .. }))
    );
}

/// Follows tokio's (pausable) clock so the run loop's interval drives the engine.
struct TokioClock(tokio::time::Instant);

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.0.elapsed()
    }
}

#[tokio::test(start_paused = true)]
async fn run_loop_resolves_routes_and_plays_to_completion() {
    let (notifier, _notices) = Notifier::channel();
    let (tx, mut events) = mpsc::unbounded_channel();
    let services = PlayerServices {
        geocoder: GeocodingGateway::new(Arc::new(FakeGeocoder)),
        resolver: RouteResolver::new(Arc::new(FakeRouter), notifier.clone()),
        tiles: None,
    };
    let dir = std::env::temp_dir().join(format!("tripreel-player-run-{}", std::process::id()));
    let player = TripPlayer::new(
        Trip::new(),
        services,
        options(dir),
        Arc::new(TokioClock(tokio::time::Instant::now())),
        notifier,
    )
    .expect("player")
    .with_events(tx);

    let (commands, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(player.run(rx));

    for command in [
        PlayerCommand::SetName(LocationId::Start, "Tokyo".to_string()),
        PlayerCommand::SetName(LocationId::End, "Osaka".to_string()),
        PlayerCommand::Geocode(LocationId::Start),
        PlayerCommand::Geocode(LocationId::End),
    ] {
        assert!(commands.send(command).is_ok());
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(commands.send(PlayerCommand::Play).is_ok());
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(commands.send(PlayerCommand::Shutdown).is_ok());

    let player = handle.await.expect("run loop");
    assert_eq!(player.routes().expect("routes").legs.len(), 1);
    assert!(player.state().is_stopped());

    let events = drain(&mut events);
    assert!(events.contains(&PlayerEvent::Animation(AnimationEvent::TripComplete)));
    let moves = events
        .iter()
        .filter(|e| matches!(e, PlayerEvent::Animation(AnimationEvent::MarkerMoved { .. })))
        .count();
    assert!(moves > 30, "expected frame-rate marker updates, got {moves}");
}

fn loop_player(
    tag: &str,
    trip: Trip,
    geocoder: Arc<dyn Geocoder>,
    tiles: Option<Arc<dyn TileSource>>,
) -> (TripPlayer, mpsc::UnboundedReceiver<PlayerEvent>) {
    let notifier = Notifier::detached();
    let (tx, events) = mpsc::unbounded_channel();
    let services = PlayerServices {
        geocoder: GeocodingGateway::new(geocoder),
        resolver: RouteResolver::new(Arc::new(FakeRouter), notifier.clone()),
        tiles,
    };
    let dir = std::env::temp_dir().join(format!("tripreel-player-{tag}-{}", std::process::id()));
    let player = TripPlayer::new(
        trip,
        services,
        options(dir),
        Arc::new(ManualClock::new()),
        notifier,
    )
    .expect("player")
    .with_events(tx);
    (player, events)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn run_loop_keeps_the_routes_of_the_latest_edit() {
    let mut trip = Trip::new();
    trip.apply_place(LocationId::Start, c(35.6762, 139.6503), "Tokyo")
        .expect("start");
    trip.apply_place(LocationId::End, c(34.6937, 135.5023), "Osaka")
        .expect("end");
    let (player, _events) = loop_player("latest", trip, Arc::new(FakeGeocoder), None);

    let (commands, rx) = mpsc::unbounded_channel();
    for mode in [TransportMode::Bike, TransportMode::Walk] {
        assert!(
            commands
                .send(PlayerCommand::SetTransport(LocationId::Start, mode))
                .is_ok()
        );
    }
    let handle = tokio::spawn(player.run(rx));
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(commands.send(PlayerCommand::Shutdown).is_ok());

    let player = handle.await.expect("run loop");
    let start = player.trip().get(LocationId::Start).expect("start");
    assert_eq!(start.transport, TransportMode::Walk);
    let routes = player.routes().expect("routes");
    assert_eq!(routes.legs.len(), 1);
    assert_eq!(routes.legs[0].mode, TransportMode::Walk);
}

#[tokio::test(start_paused = true)]
async fn late_lookup_for_a_renamed_point_is_dropped() {
    let (player, mut events) = loop_player("renamed", Trip::new(), Arc::new(SlowTokyo), None);
    let (commands, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(player.run(rx));

    for command in [
        PlayerCommand::SetName(LocationId::Start, "Tokyo".to_string()),
        PlayerCommand::Geocode(LocationId::Start),
        PlayerCommand::SetName(LocationId::Start, "Kyoto".to_string()),
        PlayerCommand::Geocode(LocationId::Start),
    ] {
        assert!(commands.send(command).is_ok());
    }
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(commands.send(PlayerCommand::Shutdown).is_ok());

    let player = handle.await.expect("run loop");
    let start = player.trip().get(LocationId::Start).expect("start");
    assert_eq!(start.name, "Kyoto, Japan");
    assert_eq!(start.lat, Some(35.0116));

    let resolved: Vec<PlayerEvent> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, PlayerEvent::LocationResolved { .. }))
        .collect();
    assert_eq!(resolved.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn run_loop_fills_tiles_for_a_newly_selected_layer() {
    let (player, _events) = loop_player(
        "loop-tiles",
        Trip::new(),
        Arc::new(FakeGeocoder),
        Some(Arc::new(SolidTiles)),
    );
    let (commands, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(player.run(rx));

    let topo = TileLayer::preset("topo").expect("preset");
    assert!(commands.send(PlayerCommand::SelectTileLayer(topo)).is_ok());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(commands.send(PlayerCommand::Shutdown).is_ok());

    let player = handle.await.expect("run loop");
    let visible = player.map().visible_tiles();
    assert!(!visible.is_empty());
    assert!(
        visible
            .iter()
            .all(|(key, _)| player.map().tiles().get("topo", *key).is_some())
    );
}
