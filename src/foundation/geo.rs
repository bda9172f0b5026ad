use crate::foundation::core::Coordinate;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates (haversine).
pub fn haversine_km(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Ordered coordinate samples approximating a leg's path.
///
/// Resolved legs always carry at least two samples; shorter polylines only exist transiently
/// (e.g. a degenerate routing response) and are treated as already-finished legs.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct Polyline(Vec<Coordinate>);

impl Polyline {
    /// Wrap samples as-is.
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self(points)
    }

    /// The 2-point great-circle segment `[from, to]`.
    pub fn straight(from: Coordinate, to: Coordinate) -> Self {
        Self(vec![from, to])
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether the polyline can be animated (two or more samples).
    pub fn is_drawable(&self) -> bool {
        self.0.len() >= 2
    }

    pub fn first(&self) -> Option<Coordinate> {
        self.0.first().copied()
    }

    pub fn last(&self) -> Option<Coordinate> {
        self.0.last().copied()
    }

    /// Sum of haversine distances between consecutive samples.
    pub fn length_km(&self) -> f64 {
        self.0.windows(2).map(|w| haversine_km(w[0], w[1])).sum()
    }

    /// Position at `progress` in `[0, 1]`.
    ///
    /// Interpolates linearly between the two samples bracketing `progress * (len - 1)`, so the
    /// marker moves by sample index rather than by distance. `progress >= 1` returns the last
    /// sample exactly.
    pub fn point_at(&self, progress: f64) -> Option<Coordinate> {
        let n = self.0.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(self.0[0]);
        }

        let p = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 1.0)
        };
        if p >= 1.0 {
            return Some(self.0[n - 1]);
        }

        let pos = p * (n - 1) as f64;
        let idx = (pos.floor() as usize).min(n - 2);
        let t = pos - idx as f64;
        Some(Coordinate::lerp(self.0[idx], self.0[idx + 1], t))
    }

    /// Bounding box as `(south_west, north_east)`.
    pub fn bounds(&self) -> Option<(Coordinate, Coordinate)> {
        bounds_of(self.0.iter().copied())
    }
}

impl From<Vec<Coordinate>> for Polyline {
    fn from(points: Vec<Coordinate>) -> Self {
        Self(points)
    }
}

/// Bounding box of a coordinate set as `(south_west, north_east)`.
pub fn bounds_of(coords: impl IntoIterator<Item = Coordinate>) -> Option<(Coordinate, Coordinate)> {
    let mut it = coords.into_iter();
    let first = it.next()?;
    let (mut sw, mut ne) = (first, first);
    for c in it {
        sw.lat = sw.lat.min(c.lat);
        sw.lng = sw.lng.min(c.lng);
        ne.lat = ne.lat.max(c.lat);
        ne.lng = ne.lng.max(c.lng);
    }
    Some((sw, ne))
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/geo.rs"]
mod tests;
