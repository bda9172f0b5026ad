//! The map session: viewport, static route/stop layers, the animated marker and the basemap.

use crate::{
    foundation::{
        core::{Canvas, Coordinate, Point},
        geo::{Polyline, bounds_of},
        math::MERCATOR_MAX_LAT,
    },
    model::{LocationId, LocationPoint, TransportMode},
    notice::Notifier,
    route::{ResolvedLeg, RouteSource},
    tiles::{TileCache, TileFetch, TileKey, TileLayer, TileSource, fetch_tiles},
};

pub const TILE_SIZE: f64 = 256.0;
pub const MAX_ZOOM: u8 = 19;
/// Zoom used when fitting a single point.
pub const POINT_ZOOM: u8 = 12;

/// Side length of the Web-Mercator world in pixels at `zoom`.
pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * f64::from(1u32 << zoom.min(MAX_ZOOM))
}

/// Web-Mercator world pixel position of `c` at `zoom`.
pub fn world_px(c: Coordinate, zoom: u8) -> Point {
    let size = world_size(zoom);
    let lat = c.lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = (c.lng + 180.0) / 360.0 * size;
    let y = (0.5 - ((1.0 + lat.sin()) / (1.0 - lat.sin())).ln() / (4.0 * std::f64::consts::PI)) * size;
    Point::new(x, y)
}

/// Inverse of [`world_px`].
pub fn world_to_coordinate(p: Point, zoom: u8) -> Coordinate {
    let size = world_size(zoom);
    let lng = p.x / size * 360.0 - 180.0;
    let n = std::f64::consts::PI - 2.0 * std::f64::consts::PI * p.y / size;
    let lat = n.sinh().atan().to_degrees();
    Coordinate::new(lat, lng)
}

/// The visible part of the map.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub center: Coordinate,
    pub zoom: u8,
    pub canvas: Canvas,
}

impl Viewport {
    pub fn new(center: Coordinate, zoom: u8, canvas: Canvas) -> Self {
        Self {
            center,
            zoom: zoom.min(MAX_ZOOM),
            canvas,
        }
    }

    /// Canvas pixel position of `c`.
    pub fn project(&self, c: Coordinate) -> Point {
        let p = world_px(c, self.zoom);
        let o = self.origin();
        Point::new(p.x - o.x, p.y - o.y)
    }

    /// Coordinate under canvas pixel `p`.
    pub fn unproject(&self, p: Point) -> Coordinate {
        let o = self.origin();
        world_to_coordinate(Point::new(p.x + o.x, p.y + o.y), self.zoom)
    }

    /// World pixel position of the canvas's top-left corner.
    pub fn origin(&self) -> Point {
        let c = world_px(self.center, self.zoom);
        Point::new(
            c.x - f64::from(self.canvas.width) / 2.0,
            c.y - f64::from(self.canvas.height) / 2.0,
        )
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        let p = self.project(c);
        (0.0..=f64::from(self.canvas.width)).contains(&p.x)
            && (0.0..=f64::from(self.canvas.height)).contains(&p.y)
    }

    /// Center on `coords` at the largest zoom that keeps them `padding` pixels inside the edges.
    pub fn fit(&mut self, coords: impl IntoIterator<Item = Coordinate>, padding: f64) {
        let Some((sw, ne)) = bounds_of(coords) else {
            return;
        };
        if sw == ne {
            self.center = sw;
            self.zoom = POINT_ZOOM;
            return;
        }

        let w = f64::from(self.canvas.width);
        let h = f64::from(self.canvas.height);
        self.zoom = (0..=MAX_ZOOM)
            .rev()
            .find(|&z| {
                let a = world_px(sw, z);
                let b = world_px(ne, z);
                (b.x - a.x).abs() + 2.0 * padding <= w && (b.y - a.y).abs() + 2.0 * padding <= h
            })
            .unwrap_or(0);

        let a = world_px(sw, 0);
        let b = world_px(ne, 0);
        self.center = world_to_coordinate(a.midpoint(b), 0);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RouteLine {
    pub index: usize,
    pub mode: TransportMode,
    pub polyline: Polyline,
    pub source: RouteSource,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StopMarker {
    pub id: LocationId,
    pub label: String,
    pub coordinate: Coordinate,
}

/// Routes and stops, drawn together for one route generation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticLayer {
    pub generation: u64,
    pub routes: Vec<RouteLine>,
    pub stops: Vec<StopMarker>,
}

/// One map instance. Owned by the coordinator; nothing here is global.
pub struct MapSession {
    viewport: Viewport,
    layer: StaticLayer,
    marker: Option<Coordinate>,
    user_panned: bool,
    tile_layer: TileLayer,
    tiles: TileCache,
    labels: bool,
}

impl MapSession {
    pub fn new(viewport: Viewport, tile_layer: TileLayer) -> Self {
        Self {
            viewport,
            layer: StaticLayer::default(),
            marker: None,
            user_panned: false,
            tile_layer,
            tiles: TileCache::default(),
            labels: false,
        }
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    pub fn static_layer(&self) -> &StaticLayer {
        &self.layer
    }

    /// Replace all routes and stops in one pass.
    ///
    /// Returns `false` (and draws nothing) for a generation older than the one on screen.
    pub fn redraw_static(
        &mut self,
        generation: u64,
        legs: &[ResolvedLeg],
        points: &[LocationPoint],
    ) -> bool {
        if generation < self.layer.generation {
            tracing::debug!(
                generation,
                current = self.layer.generation,
                "ignoring redraw for older generation"
            );
            return false;
        }
        let routes = legs
            .iter()
            .map(|leg| RouteLine {
                index: leg.index,
                mode: leg.mode,
                polyline: leg.polyline.clone(),
                source: leg.source.clone(),
            })
            .collect();
        let stops = points
            .iter()
            .filter_map(|p| {
                let coordinate = p.coordinate()?;
                let label = if p.name.trim().is_empty() {
                    p.id.to_string()
                } else {
                    p.name.trim().to_string()
                };
                Some(StopMarker {
                    id: p.id,
                    label,
                    coordinate,
                })
            })
            .collect();
        self.layer = StaticLayer {
            generation,
            routes,
            stops,
        };
        true
    }

    /// Drop routes and stops until the next redraw. The generation on screen is kept.
    pub fn clear_static(&mut self) {
        self.layer.routes.clear();
        self.layer.stops.clear();
    }

    /// Fit the viewport to everything currently drawn.
    pub fn fit_to_content(&mut self, padding: f64) {
        let coords: Vec<Coordinate> = self
            .layer
            .routes
            .iter()
            .flat_map(|r| r.polyline.points().iter().copied())
            .chain(self.layer.stops.iter().map(|s| s.coordinate))
            .collect();
        self.viewport.fit(coords, padding);
    }

    pub fn marker(&self) -> Option<Coordinate> {
        self.marker
    }

    pub fn set_marker(&mut self, at: Coordinate) {
        self.marker = Some(at);
    }

    pub fn clear_marker(&mut self) {
        self.marker = None;
    }

    /// Recenter on `at` if it left the viewport, unless the user panned during this leg.
    /// Returns whether the view moved.
    pub fn follow(&mut self, at: Coordinate) -> bool {
        if self.user_panned || self.viewport.contains(at) {
            return false;
        }
        self.viewport.center = at;
        true
    }

    pub fn user_pan(&mut self, center: Coordinate) {
        self.viewport.center = center;
        self.user_panned = true;
    }

    /// Re-enable following for a new leg.
    pub fn begin_leg(&mut self) {
        self.user_panned = false;
    }

    pub fn is_following(&self) -> bool {
        !self.user_panned
    }

    pub fn tile_layer(&self) -> &TileLayer {
        &self.tile_layer
    }

    /// Swap the basemap. Routes, stops and the marker are untouched.
    pub fn select_tile_layer(&mut self, layer: TileLayer) {
        tracing::debug!(layer = %layer.name, "tile layer selected");
        self.tile_layer = layer;
    }

    pub fn labels(&self) -> bool {
        self.labels
    }

    pub fn set_labels(&mut self, on: bool) {
        self.labels = on;
    }

    pub fn tiles(&self) -> &TileCache {
        &self.tiles
    }

    /// Tiles of the current layer covering the viewport, with their canvas positions.
    pub fn visible_tiles(&self) -> Vec<(TileKey, Point)> {
        if self.tile_layer.url_template.is_none() {
            return Vec::new();
        }
        TileKey::covering(&self.viewport)
    }

    /// Claim the visible tiles of the current layer that were never requested.
    pub fn claim_visible_tiles(&mut self) -> Option<(TileLayer, Vec<TileKey>)> {
        let keys: Vec<TileKey> = self.visible_tiles().into_iter().map(|(k, _)| k).collect();
        if keys.is_empty() {
            return None;
        }
        let missing = self.tiles.claim(&self.tile_layer.name, &keys);
        (!missing.is_empty()).then(|| (self.tile_layer.clone(), missing))
    }

    /// Store tiles fetched for a claim made by [`MapSession::claim_visible_tiles`].
    pub fn store_tiles(
        &mut self,
        layer: &TileLayer,
        results: Vec<TileFetch>,
        notifier: &Notifier,
    ) -> usize {
        self.tiles.store(&layer.name, results, notifier)
    }

    /// Fetch visible tiles that have not been attempted yet. Returns how many were loaded.
    pub async fn prefetch_tiles(
        &mut self,
        source: &dyn TileSource,
        notifier: &Notifier,
    ) -> usize {
        let Some((layer, keys)) = self.claim_visible_tiles() else {
            return 0;
        };
        let results = fetch_tiles(source, &layer, keys).await;
        self.store_tiles(&layer, results, notifier)
    }
}

#[cfg(test)]
#[path = "../tests/unit/map/map.rs"]
mod tests;
