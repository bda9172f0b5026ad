use std::{
    cell::RefCell,
    sync::atomic::{AtomicUsize, Ordering as AtomicOrdering},
};

use serde_json::json;

use super::*;

fn c(lat: f64, lng: f64) -> Coordinate {
    Coordinate::new(lat, lng)
}

fn request(index: usize, from: Coordinate, to: Coordinate, mode: TransportMode) -> LegRequest {
    LegRequest {
        index,
        from_id: if index == 0 {
            LocationId::Start
        } else {
            LocationId::Waypoint(index as u64)
        },
        to_id: LocationId::Waypoint(index as u64 + 1),
        from,
        to,
        mode,
    }
}

/// Returns a fixed 3-point detour, fails for bikes, returns a 1-point path for walking.
#[derive(Default)]
struct ScriptedRouter {
    calls: AtomicUsize,
}

#[async_trait]
impl RoutingService for ScriptedRouter {
    async fn route(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TransportMode,
    ) -> Result<Polyline, RouteError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        match mode {
            TransportMode::Bike => Err(RouteError::Service("HTTP 503".to_string())),
            TransportMode::Walk => Ok(Polyline::new(vec![from])),
            _ => Ok(Polyline::new(vec![from, c(from.lat + 0.5, from.lng), to])),
        }
    }
}

/// Sleeps before answering; legs ending at longitude 1.0 are slow.
struct DelayedRouter;

#[async_trait]
impl RoutingService for DelayedRouter {
    async fn route(
        &self,
        from: Coordinate,
        to: Coordinate,
        _mode: TransportMode,
    ) -> Result<Polyline, RouteError> {
        let delay = if to.lng == 1.0 { 500 } else { 10 };
        tokio::time::sleep(Duration::from_millis(delay)).await;
        Ok(Polyline::new(vec![from, c(9.0, to.lng), to]))
    }
}

#[tokio::test]
async fn plane_legs_are_direct_and_never_call_the_service() {
    let router = Arc::new(ScriptedRouter::default());
    let resolver = RouteResolver::new(router.clone(), Notifier::detached());

    let path = resolver
        .resolve_leg(c(0.0, 0.0), c(10.0, 10.0), TransportMode::Plane)
        .await;
    assert_eq!(path.polyline.points(), &[c(0.0, 0.0), c(10.0, 10.0)]);
    assert_eq!(path.source, RouteSource::Direct);
    assert_eq!(router.calls.load(AtomicOrdering::SeqCst), 0);
}

#[tokio::test]
async fn routed_polylines_are_stored_verbatim() {
    let resolver = RouteResolver::new(Arc::new(ScriptedRouter::default()), Notifier::detached());
    let path = resolver
        .resolve_leg(c(1.0, 1.0), c(2.0, 2.0), TransportMode::Car)
        .await;
    assert_eq!(
        path.polyline.points(),
        &[c(1.0, 1.0), c(1.5, 1.0), c(2.0, 2.0)]
    );
    assert_eq!(path.source, RouteSource::Routed);
}

#[tokio::test]
async fn failures_fall_back_to_a_straight_line_and_notify() {
    let (notifier, mut notices) = Notifier::channel();
    let resolver = RouteResolver::new(Arc::new(ScriptedRouter::default()), notifier);

    let failed = resolver
        .resolve_leg(c(1.0, 1.0), c(2.0, 2.0), TransportMode::Bike)
        .await;
    assert_eq!(failed.polyline.points(), &[c(1.0, 1.0), c(2.0, 2.0)]);
    assert!(matches!(
        failed.source,
        RouteSource::Fallback(RouteError::Service(_))
    ));
    let notice = notices.try_recv().unwrap();
    assert!(notice.message.contains("straight line"));

    let degenerate = resolver
        .resolve_leg(c(1.0, 1.0), c(2.0, 2.0), TransportMode::Walk)
        .await;
    assert_eq!(degenerate.polyline.len(), 2);
    assert_eq!(
        degenerate.source,
        RouteSource::Fallback(RouteError::NoRoute)
    );
}

#[tokio::test]
async fn recompute_settles_every_leg_and_bumps_generation() {
    let router = Arc::new(ScriptedRouter::default());
    let resolver = RouteResolver::new(router.clone(), Notifier::detached());
    assert_eq!(resolver.generation(), 0);

    let batch = resolver
        .recompute(vec![
            request(0, c(0.0, 0.0), c(1.0, 1.0), TransportMode::Car),
            request(1, c(1.0, 1.0), c(2.0, 2.0), TransportMode::Bike),
            request(2, c(2.0, 2.0), c(3.0, 3.0), TransportMode::Plane),
        ])
        .await;

    assert_eq!(batch.generation, 1);
    assert!(resolver.is_current(&batch));
    assert_eq!(batch.legs.len(), 3);
    assert_eq!(batch.legs[0].source, RouteSource::Routed);
    assert!(matches!(batch.legs[1].source, RouteSource::Fallback(_)));
    assert_eq!(batch.legs[2].source, RouteSource::Direct);
    assert!(batch.legs.iter().all(|l| l.polyline.is_drawable()));
    assert_eq!(router.calls.load(AtomicOrdering::SeqCst), 2);

    let next = resolver.recompute(Vec::new()).await;
    assert_eq!(next.generation, 2);
    assert!(!resolver.is_current(&batch));
}

#[tokio::test]
async fn generations_follow_claim_order_not_completion_order() {
    let resolver = RouteResolver::new(Arc::new(ScriptedRouter::default()), Notifier::detached());
    let first = resolver.next_generation();
    let second = resolver.next_generation();
    assert!(second > first);

    // Resolve the later claim first, as a scheduler running the newest task first would.
    let newer = resolver.recompute_with(second, Vec::new()).await;
    let older = resolver.recompute_with(first, Vec::new()).await;
    assert!(resolver.is_current(&newer));
    assert!(!resolver.is_current(&older));
}

#[tokio::test(start_paused = true)]
async fn slow_stale_batch_never_overwrites_a_newer_one() {
    let resolver = RouteResolver::new(Arc::new(DelayedRouter), Notifier::detached());
    let arrivals = RefCell::new(Vec::<RouteBatch>::new());

    let older = vec![request(0, c(0.0, 0.0), c(0.0, 1.0), TransportMode::Car)];
    let newer = vec![request(0, c(0.0, 0.0), c(0.0, 2.0), TransportMode::Car)];

    tokio::join!(
        async {
            let batch = resolver.recompute(older).await;
            arrivals.borrow_mut().push(batch);
        },
        async {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let batch = resolver.recompute(newer).await;
            arrivals.borrow_mut().push(batch);
        }
    );

    let arrivals = arrivals.into_inner();
    assert_eq!(arrivals.len(), 2);
    assert_eq!(arrivals[0].generation, 2, "newer batch arrives first");
    assert_eq!(arrivals[1].generation, 1, "stale batch arrives last");
    assert_eq!(
        arrivals[1].legs[0].source,
        RouteSource::Fallback(RouteError::Superseded)
    );

    let mut stored: Option<RouteBatch> = None;
    for batch in arrivals {
        if resolver.is_current(&batch) {
            stored = Some(batch);
        }
    }
    let stored = stored.unwrap();
    assert_eq!(stored.generation, 2);
    assert_eq!(stored.legs[0].polyline.last(), Some(c(0.0, 2.0)));
    assert_eq!(stored.legs[0].polyline.len(), 3);
}

#[test]
fn osrm_response_decodes_polyline_geometry() {
    let body = json!({
        "code": "Ok",
        "routes": [{"geometry": "_p~iF~ps|U_ulLnnqC_mqNvxq`@", "distance": 1.0}]
    });
    let line = parse_osrm_response(&body).unwrap();
    assert_eq!(line.len(), 3);
    let first = line.first().unwrap();
    assert!((first.lat - 38.5).abs() < 1e-9);
    assert!((first.lng + 120.2).abs() < 1e-9);
    let last = line.last().unwrap();
    assert!((last.lat - 43.252).abs() < 1e-9);
    assert!((last.lng + 126.453).abs() < 1e-9);
}

#[test]
fn osrm_without_route_is_no_route() {
    assert_eq!(
        parse_osrm_response(&json!({"code": "NoRoute", "routes": []})),
        Err(RouteError::NoRoute)
    );
    assert_eq!(
        parse_osrm_response(&json!({"code": "Ok", "routes": []})),
        Err(RouteError::NoRoute)
    );
    assert!(matches!(
        parse_osrm_response(&json!({"code": "InvalidQuery", "message": "bad coords"})),
        Err(RouteError::Service(_))
    ));
}

#[test]
fn profiles_match_ground_modes() {
    assert_eq!(OsrmRouter::profile(TransportMode::Car), "driving");
    assert_eq!(OsrmRouter::profile(TransportMode::Bike), "cycling");
    assert_eq!(OsrmRouter::profile(TransportMode::Walk), "foot");
}

/// Answers one request with `status` and a JSON body, then exits.
fn serve_once(status: &'static str, body: &'static str) -> String {
    use std::io::{Read, Write};

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let _ = stream.read(&mut buf);
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let _ = stream.write_all(response.as_bytes());
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn osrm_error_status_is_a_service_failure_even_with_a_route_body() {
    let url = serve_once(
        "503 Service Unavailable",
        r#"{"routes":[{"geometry":"_p~iF~ps|U_ulLnnqC_mqNvxq`@"}]}"#,
    );
    let router = OsrmRouter::new(&url, "tripreel-tests", Duration::from_secs(5)).unwrap();
    let result = router
        .route(c(38.5, -120.2), c(43.252, -126.453), TransportMode::Car)
        .await;
    match result {
        Err(RouteError::Service(msg)) => assert!(msg.contains("503"), "{msg}"),
        other => panic!("expected a service error, got {other:?}"),
    }
}
