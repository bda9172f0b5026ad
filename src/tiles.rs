//! Raster basemap tiles: layer presets, Web-Mercator tile math, fetching and caching.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use base64::Engine as _;
use futures_util::future::join_all;

use crate::{
    foundation::{
        core::Point,
        error::{TripError, TripResult},
    },
    map::{TILE_SIZE, Viewport},
    notice::Notifier,
};

/// A basemap style.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileLayer {
    pub name: String,
    /// `{z}`, `{x}` and `{y}` are substituted. `None` draws only the background.
    pub url_template: Option<String>,
    pub attribution: String,
    /// CSS color painted under the tiles.
    pub background: String,
    pub max_zoom: u8,
}

impl TileLayer {
    pub const PRESET_NAMES: [&'static str; 6] =
        ["osm", "carto-light", "carto-dark", "topo", "satellite", "none"];

    pub fn preset(name: &str) -> Option<Self> {
        let (url, attribution, background, max_zoom) = match name {
            "osm" => (
                Some("https://tile.openstreetmap.org/{z}/{x}/{y}.png"),
                "© OpenStreetMap contributors",
                "#aad3df",
                19,
            ),
            "carto-light" => (
                Some("https://a.basemaps.cartocdn.com/light_all/{z}/{x}/{y}.png"),
                "© OpenStreetMap contributors © CARTO",
                "#f2f2f0",
                19,
            ),
            "carto-dark" => (
                Some("https://a.basemaps.cartocdn.com/dark_all/{z}/{x}/{y}.png"),
                "© OpenStreetMap contributors © CARTO",
                "#262626",
                19,
            ),
            "topo" => (
                Some("https://a.tile.opentopomap.org/{z}/{x}/{y}.png"),
                "© OpenStreetMap contributors, SRTM | © OpenTopoMap (CC-BY-SA)",
                "#f4f1e8",
                17,
            ),
            "satellite" => (
                Some(
                    "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}",
                ),
                "Tiles © Esri",
                "#1b2631",
                19,
            ),
            "none" => (None, "", "#e8ecef", 19),
            _ => return None,
        };
        Some(Self {
            name: name.to_string(),
            url_template: url.map(str::to_string),
            attribution: attribution.to_string(),
            background: background.to_string(),
            max_zoom,
        })
    }

    /// Layer that draws only its background color.
    pub fn none() -> Self {
        Self {
            name: "none".to_string(),
            url_template: None,
            attribution: String::new(),
            background: "#e8ecef".to_string(),
            max_zoom: 19,
        }
    }

    pub fn tile_url(&self, key: TileKey) -> Option<String> {
        let template = self.url_template.as_ref()?;
        Some(
            template
                .replace("{z}", &key.z.to_string())
                .replace("{x}", &key.x.to_string())
                .replace("{y}", &key.y.to_string()),
        )
    }
}

impl std::str::FromStr for TileLayer {
    type Err = TripError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::preset(s.trim()).ok_or_else(|| {
            TripError::input(format!(
                "unknown tile layer '{s}' (expected one of: {})",
                Self::PRESET_NAMES.join(", ")
            ))
        })
    }
}

/// Slippy-map tile address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl TileKey {
    /// Tiles intersecting `viewport`, each with the canvas position of its top-left corner.
    ///
    /// Columns wrap around the antimeridian; rows outside the world are skipped.
    pub fn covering(viewport: &Viewport) -> Vec<(TileKey, Point)> {
        let z = viewport.zoom;
        let n = 1i64 << z;
        let origin = viewport.origin();
        let w = f64::from(viewport.canvas.width);
        let h = f64::from(viewport.canvas.height);

        let x0 = (origin.x / TILE_SIZE).floor() as i64;
        let x1 = ((origin.x + w) / TILE_SIZE).ceil() as i64;
        let y0 = ((origin.y / TILE_SIZE).floor() as i64).max(0);
        let y1 = (((origin.y + h) / TILE_SIZE).ceil() as i64).min(n);

        let mut out = Vec::new();
        for ty in y0..y1 {
            for tx in x0..x1 {
                let key = TileKey {
                    z,
                    x: tx.rem_euclid(n) as u32,
                    y: ty as u32,
                };
                let at = Point::new(
                    tx as f64 * TILE_SIZE - origin.x,
                    ty as f64 * TILE_SIZE - origin.y,
                );
                out.push((key, at));
            }
        }
        out
    }
}

#[async_trait]
pub trait TileSource: Send + Sync {
    /// Raw image bytes of one tile.
    async fn fetch(&self, layer: &TileLayer, key: TileKey) -> TripResult<Vec<u8>>;
}

pub struct HttpTileSource {
    client: reqwest::Client,
}

impl HttpTileSource {
    pub fn new(user_agent: &str, timeout: Duration) -> TripResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| TripError::service(format!("http client init failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, layer: &TileLayer, key: TileKey) -> TripResult<Vec<u8>> {
        let url = layer
            .tile_url(key)
            .ok_or_else(|| TripError::input(format!("layer '{}' has no tiles", layer.name)))?;
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TripError::service(format!("tile request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(TripError::service(format!(
                "tile {url} returned HTTP {}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TripError::service(format!("tile body read failed: {e}")))?;
        Ok(bytes.to_vec())
    }
}

#[derive(Clone, Debug)]
enum TileEntry {
    Pending,
    Ready(String),
    Failed,
}

/// Outcome of fetching one tile, fed back into [`TileCache::store`].
pub type TileFetch = (TileKey, TripResult<Vec<u8>>);

/// Fetched tiles as embeddable data URIs, per layer. Failed tiles are remembered and not
/// fetched again.
#[derive(Debug, Default)]
pub struct TileCache {
    entries: HashMap<(String, TileKey), TileEntry>,
    reported: HashSet<String>,
}

impl TileCache {
    /// Data URI for a loaded tile.
    pub fn get(&self, layer: &str, key: TileKey) -> Option<&str> {
        match self.entries.get(&(layer.to_string(), key)) {
            Some(TileEntry::Ready(uri)) => Some(uri),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| matches!(e, TileEntry::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store raw tile bytes. Bytes that are not a recognizable image are rejected.
    pub fn insert(&mut self, layer: &str, key: TileKey, bytes: &[u8]) -> TripResult<()> {
        let uri = data_uri(bytes)?;
        self.entries
            .insert((layer.to_string(), key), TileEntry::Ready(uri));
        Ok(())
    }

    fn attempted(&self, layer: &str, key: TileKey) -> bool {
        self.entries.contains_key(&(layer.to_string(), key))
    }

    /// Mark every key not attempted before as pending and return them.
    pub fn claim(&mut self, layer: &str, keys: &[TileKey]) -> Vec<TileKey> {
        let missing: Vec<TileKey> = keys
            .iter()
            .copied()
            .filter(|k| !self.attempted(layer, *k))
            .collect();
        for key in &missing {
            self.entries
                .insert((layer.to_string(), *key), TileEntry::Pending);
        }
        missing
    }

    /// Store fetched tiles. Failures are remembered; the first failing batch of a layer
    /// raises one warning. Returns the number loaded.
    pub fn store(&mut self, layer: &str, results: Vec<TileFetch>, notifier: &Notifier) -> usize {
        let mut loaded = 0;
        let mut failures = 0;
        for (key, result) in results {
            match result.and_then(|bytes| self.insert(layer, key, &bytes)) {
                Ok(()) => loaded += 1,
                Err(e) => {
                    tracing::warn!(error = %e, ?key, "tile unavailable");
                    self.entries
                        .insert((layer.to_string(), key), TileEntry::Failed);
                    failures += 1;
                }
            }
        }
        if failures > 0 && self.reported.insert(layer.to_string()) {
            notifier.warning(format!(
                "{failures} map tile(s) for layer '{layer}' could not be loaded"
            ));
        }
        loaded
    }

    /// Fetch every key not attempted before, concurrently. Returns the number loaded.
    #[tracing::instrument(skip_all, fields(layer = %layer.name, requested = keys.len()))]
    pub async fn fill(
        &mut self,
        source: &dyn TileSource,
        layer: &TileLayer,
        keys: &[TileKey],
        notifier: &Notifier,
    ) -> usize {
        let missing = self.claim(&layer.name, keys);
        let results = fetch_tiles(source, layer, missing).await;
        self.store(&layer.name, results, notifier)
    }
}

/// Fetch `keys` concurrently, keeping each result next to its key.
pub async fn fetch_tiles(
    source: &dyn TileSource,
    layer: &TileLayer,
    keys: Vec<TileKey>,
) -> Vec<TileFetch> {
    let results = join_all(keys.iter().map(|k| source.fetch(layer, *k))).await;
    keys.into_iter().zip(results).collect()
}

/// `data:` URI for an encoded image, with the MIME type sniffed from its header.
pub fn data_uri(bytes: &[u8]) -> TripResult<String> {
    let format = image::guess_format(bytes)
        .map_err(|e| TripError::validation(format!("unrecognized tile image: {e}")))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{encoded}", format.to_mime_type()))
}

#[cfg(test)]
#[path = "../tests/unit/tiles/tiles.rs"]
mod tests;
