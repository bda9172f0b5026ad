//! Route resolver: one polyline per leg, road-routed or great-circle, with straight-line
//! fallback and generation-based staleness.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value;

use crate::{
    foundation::{
        core::Coordinate,
        error::{TripError, TripResult},
        geo::Polyline,
    },
    model::{LegRequest, LocationId, TransportMode},
    notice::Notifier,
};

/// Why a routed path is unavailable. Never surfaces as a failure of the leg itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route found")]
    NoRoute,

    #[error("routing service failed: {0}")]
    Service(String),

    #[error("superseded by a newer route request")]
    Superseded,
}

/// Where a leg's polyline came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteSource {
    /// Great-circle segment for flights; no service involved.
    Direct,
    /// Verbatim routing service response.
    Routed,
    /// Straight line drawn because routing failed.
    Fallback(RouteError),
}

/// Polyline plus provenance for a single origin/destination pair.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedPath {
    pub polyline: Polyline,
    pub source: RouteSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedLeg {
    pub index: usize,
    pub from_id: LocationId,
    pub to_id: LocationId,
    pub mode: TransportMode,
    pub polyline: Polyline,
    pub source: RouteSource,
}

/// All legs of one recomputation, tagged with the generation that produced them.
#[derive(Clone, Debug, PartialEq)]
pub struct RouteBatch {
    pub generation: u64,
    pub legs: Vec<ResolvedLeg>,
}

#[async_trait]
pub trait RoutingService: Send + Sync {
    /// Road route from `from` to `to`. `mode` is never [`TransportMode::Plane`].
    async fn route(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TransportMode,
    ) -> Result<Polyline, RouteError>;
}

/// Client for an OSRM-compatible `route/v1` endpoint.
pub struct OsrmRouter {
    client: reqwest::Client,
    base_url: String,
}

impl OsrmRouter {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> TripResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TripError::service(format!("http client init failed: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// OSRM profile name for a ground mode.
    pub fn profile(mode: TransportMode) -> &'static str {
        match mode {
            TransportMode::Bike => "cycling",
            TransportMode::Walk => "foot",
            TransportMode::Car | TransportMode::Plane => "driving",
        }
    }
}

#[async_trait]
impl RoutingService for OsrmRouter {
    async fn route(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TransportMode,
    ) -> Result<Polyline, RouteError> {
        let url = format!(
            "{}/route/v1/{}/{},{};{},{}",
            self.base_url,
            Self::profile(mode),
            from.lng,
            from.lat,
            to.lng,
            to.lat
        );
        let response = self
            .client
            .get(&url)
            .query(&[("overview", "full"), ("geometries", "polyline")])
            .send()
            .await
            .map_err(|e| RouteError::Service(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RouteError::Service(format!("HTTP {status}")));
        }
        let body = response
            .json::<Value>()
            .await
            .map_err(|e| RouteError::Service(format!("invalid response body: {e}")))?;
        parse_osrm_response(&body)
    }
}

/// Parse an OSRM route response with `geometries=polyline` (precision 5).
pub fn parse_osrm_response(body: &Value) -> Result<Polyline, RouteError> {
    let code = body.get("code").and_then(Value::as_str).unwrap_or("Ok");
    match code {
        "Ok" => {}
        "NoRoute" | "NoSegment" => return Err(RouteError::NoRoute),
        other => {
            let msg = body
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Err(RouteError::Service(format!("{other}: {msg}")));
        }
    }

    let geometry = body
        .get("routes")
        .and_then(Value::as_array)
        .and_then(|routes| routes.first())
        .and_then(|route| route.get("geometry"))
        .and_then(Value::as_str)
        .ok_or(RouteError::NoRoute)?;

    let line = polyline::decode_polyline(geometry, 5)
        .map_err(|e| RouteError::Service(format!("invalid route geometry: {e}")))?;
    let points: Vec<Coordinate> = line.coords().copied().map(Coordinate::from).collect();
    if points.len() < 2 {
        return Err(RouteError::NoRoute);
    }
    Ok(Polyline::new(points))
}

/// Resolves legs and owns the monotonic generation counter.
///
/// Clones share the counter, so a clone moved into a background task still observes newer
/// recomputations started elsewhere.
#[derive(Clone)]
pub struct RouteResolver {
    service: Arc<dyn RoutingService>,
    generation: Arc<AtomicU64>,
    notifier: Notifier,
}

impl RouteResolver {
    pub fn new(service: Arc<dyn RoutingService>, notifier: Notifier) -> Self {
        Self {
            service,
            generation: Arc::new(AtomicU64::new(0)),
            notifier,
        }
    }

    /// Generation of the most recent [`RouteResolver::recompute`].
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, batch: &RouteBatch) -> bool {
        batch.generation == self.generation()
    }

    /// Resolve a single leg outside any batch. Never fails; see [`RouteSource`].
    pub async fn resolve_leg(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TransportMode,
    ) -> ResolvedPath {
        self.resolve_path(from, to, mode, None).await
    }

    async fn resolve_path(
        &self,
        from: Coordinate,
        to: Coordinate,
        mode: TransportMode,
        generation: Option<u64>,
    ) -> ResolvedPath {
        if mode.is_flight() {
            return ResolvedPath {
                polyline: Polyline::straight(from, to),
                source: RouteSource::Direct,
            };
        }

        let result = self.service.route(from, to, mode).await;
        let superseded = generation.is_some_and(|g| g != self.generation());

        let result = match result {
            Ok(_) if superseded => Err(RouteError::Superseded),
            Ok(polyline) if polyline.is_drawable() => Ok(polyline),
            Ok(_) => Err(RouteError::NoRoute),
            Err(e) => Err(e),
        };

        match result {
            Ok(polyline) => ResolvedPath {
                polyline,
                source: RouteSource::Routed,
            },
            Err(e) => {
                if !superseded {
                    tracing::warn!(error = %e, %mode, "routing failed; using straight line");
                    self.notifier.warning(format!(
                        "{mode} route from {from} to {to} unavailable ({e}); drawing a straight line"
                    ));
                }
                ResolvedPath {
                    polyline: Polyline::straight(from, to),
                    source: RouteSource::Fallback(e),
                }
            }
        }
    }

    /// Claim a new generation. Every batch claimed earlier becomes stale.
    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Start a new generation and resolve every leg in parallel.
    ///
    /// All legs are awaited together (settle-all), so one leg's fallback never blocks or
    /// fails the others. The returned batch may already be stale by the time it completes;
    /// check [`RouteResolver::is_current`] before applying it.
    pub async fn recompute(&self, requests: Vec<LegRequest>) -> RouteBatch {
        let generation = self.next_generation();
        self.recompute_with(generation, requests).await
    }

    /// Resolve a batch for a generation claimed with [`RouteResolver::next_generation`].
    ///
    /// Claim on the requesting side when the resolution runs in a spawned task.
    #[tracing::instrument(skip(self, requests), fields(legs = requests.len()))]
    pub async fn recompute_with(&self, generation: u64, requests: Vec<LegRequest>) -> RouteBatch {
        tracing::debug!(generation, "recomputing routes");

        let futures = requests.iter().map(|req| async move {
            let path = self
                .resolve_path(req.from, req.to, req.mode, Some(generation))
                .await;
            ResolvedLeg {
                index: req.index,
                from_id: req.from_id,
                to_id: req.to_id,
                mode: req.mode,
                polyline: path.polyline,
                source: path.source,
            }
        });

        let mut legs = join_all(futures).await;
        legs.sort_by_key(|l| l.index);
        RouteBatch { generation, legs }
    }
}

#[cfg(test)]
#[path = "../tests/unit/route/resolver.rs"]
mod tests;
