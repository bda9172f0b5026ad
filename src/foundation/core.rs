use crate::foundation::error::{TripError, TripResult};

pub use kurbo::{Point, Rect, Vec2};

/// A WGS84 position in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Coordinate {
    /// Latitude, positive north.
    pub lat: f64,
    /// Longitude, positive east.
    pub lng: f64,
}

impl Coordinate {
    /// Create a coordinate without validation.
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Create a coordinate, rejecting non-finite or out-of-range values.
    pub fn checked(lat: f64, lng: f64) -> TripResult<Self> {
        let c = Self { lat, lng };
        c.validate()?;
        Ok(c)
    }

    /// Validate range and finiteness.
    pub fn validate(self) -> TripResult<()> {
        if !self.lat.is_finite() || !self.lng.is_finite() {
            return Err(TripError::validation("coordinate must be finite"));
        }
        if !(-90.0..=90.0).contains(&self.lat) {
            return Err(TripError::validation(format!(
                "latitude {} is outside [-90, 90]",
                self.lat
            )));
        }
        if !(-180.0..=180.0).contains(&self.lng) {
            return Err(TripError::validation(format!(
                "longitude {} is outside [-180, 180]",
                self.lng
            )));
        }
        Ok(())
    }

    /// Component-wise linear interpolation; `t` is not clamped.
    pub fn lerp(a: Self, b: Self, t: f64) -> Self {
        Self {
            lat: a.lat + (b.lat - a.lat) * t,
            lng: a.lng + (b.lng - a.lng) * t,
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.5},{:.5}", self.lat, self.lng)
    }
}

impl std::str::FromStr for Coordinate {
    type Err = TripError;

    /// Parse `"lat,lng"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = s
            .split_once(',')
            .ok_or_else(|| TripError::input(format!("expected 'lat,lng', got '{s}'")))?;
        let lat: f64 = lat
            .trim()
            .parse()
            .map_err(|_| TripError::input(format!("invalid latitude '{lat}'")))?;
        let lng: f64 = lng
            .trim()
            .parse()
            .map_err(|_| TripError::input(format!("invalid longitude '{lng}'")))?;
        Self::checked(lat, lng)
    }
}

impl From<geo_types::Coord<f64>> for Coordinate {
    /// `geo_types` stores longitude in `x` and latitude in `y`.
    fn from(c: geo_types::Coord<f64>) -> Self {
        Self { lat: c.y, lng: c.x }
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> TripResult<Self> {
        if den == 0 {
            return Err(TripError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(TripError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame.
    pub fn frame_duration(self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(f64::from(self.den) / f64::from(self.num))
    }
}

/// Surface dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Canvas {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Canvas {
    /// Create a canvas, rejecting zero dimensions.
    pub fn new(width: u32, height: u32) -> TripResult<Self> {
        if width == 0 || height == 0 {
            return Err(TripError::validation("canvas width/height must be non-zero"));
        }
        Ok(Self { width, height })
    }

    /// Pixel rectangle `[0, width] x [0, height]`.
    pub fn rect(self) -> Rect {
        Rect::new(0.0, 0.0, f64::from(self.width), f64::from(self.height))
    }

    /// Number of bytes in a tightly packed RGBA8 buffer of this size.
    pub fn rgba_len(self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
