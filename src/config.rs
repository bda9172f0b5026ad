//! Runtime configuration: defaults, an optional JSON file, then `TRIPREEL_*` variables.

use std::{path::Path, path::PathBuf, time::Duration};

use crate::{
    animation::{
        ease::Ease,
        timing::{LegTiming, ResumePolicy},
    },
    capture::DEFAULT_CAPTURE_RATE,
    foundation::{
        core::{Canvas, Fps},
        error::{TripError, TripResult},
    },
    tiles::TileLayer,
};

pub const ENV_PREFIX: &str = "TRIPREEL_";

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Nominatim-compatible base URL.
    pub geocoder_url: String,
    /// OSRM-compatible base URL.
    pub router_url: String,
    /// Sent with every request; public Nominatim/OSRM instances require one.
    pub user_agent: String,
    pub http_timeout_secs: u64,
    /// Animation frame rate of the interactive loop.
    pub frame_rate: u32,
    /// Samples per second while recording.
    pub capture_rate: u32,
    /// Distance-based timing when set; otherwise every leg lasts `leg_duration_secs`.
    pub seconds_per_km: Option<f64>,
    pub leg_duration_secs: u32,
    pub resume_policy: ResumePolicy,
    pub ease: Ease,
    pub tile_layer: String,
    pub width: u32,
    pub height: u32,
    pub output_dir: PathBuf,
    /// Where the saved project lives.
    pub store_dir: PathBuf,
    pub labels: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geocoder_url: "https://nominatim.openstreetmap.org".to_string(),
            router_url: "https://router.project-osrm.org".to_string(),
            user_agent: concat!("tripreel/", env!("CARGO_PKG_VERSION")).to_string(),
            http_timeout_secs: 15,
            frame_rate: 30,
            capture_rate: DEFAULT_CAPTURE_RATE,
            seconds_per_km: None,
            leg_duration_secs: 5,
            resume_policy: ResumePolicy::default(),
            ease: Ease::default(),
            tile_layer: "osm".to_string(),
            width: 1280,
            height: 720,
            output_dir: PathBuf::from("."),
            store_dir: PathBuf::from(".tripreel"),
            labels: true,
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> TripResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| TripError::validation(format!("{ENV_PREFIX}{key}='{raw}': {e}")))
}

fn parse_flag(key: &str, raw: &str) -> TripResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TripError::validation(format!(
            "{ENV_PREFIX}{key}='{raw}': expected a boolean"
        ))),
    }
}

impl Config {
    pub fn from_path(path: &Path) -> TripResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            TripError::input(format!("failed to read config '{}': {e}", path.display()))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            TripError::validation(format!("invalid config '{}': {e}", path.display()))
        })
    }

    /// Override fields from `TRIPREEL_*` variables (a `.env` file is honoured).
    pub fn apply_env(&mut self) -> TripResult<()> {
        self.apply_vars(|key| dotenv::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Override fields from a lookup of unprefixed variable names.
    pub fn apply_vars(&mut self, lookup: impl Fn(&str) -> Option<String>) -> TripResult<()> {
        if let Some(v) = lookup("GEOCODER_URL") {
            self.geocoder_url = v;
        }
        if let Some(v) = lookup("ROUTER_URL") {
            self.router_url = v;
        }
        if let Some(v) = lookup("USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("HTTP_TIMEOUT_SECS") {
            self.http_timeout_secs = parse_var("HTTP_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("FRAME_RATE") {
            self.frame_rate = parse_var("FRAME_RATE", &v)?;
        }
        if let Some(v) = lookup("CAPTURE_RATE") {
            self.capture_rate = parse_var("CAPTURE_RATE", &v)?;
        }
        if let Some(v) = lookup("SECONDS_PER_KM") {
            self.seconds_per_km = if v.trim().is_empty() {
                None
            } else {
                Some(parse_var("SECONDS_PER_KM", &v)?)
            };
        }
        if let Some(v) = lookup("LEG_DURATION_SECS") {
            self.leg_duration_secs = parse_var("LEG_DURATION_SECS", &v)?;
        }
        if let Some(v) = lookup("RESUME_POLICY") {
            self.resume_policy = match v.trim() {
                "continue" | "continue-from-elapsed" => ResumePolicy::ContinueFromElapsed,
                "restart" | "restart-leg" => ResumePolicy::RestartLeg,
                other => {
                    return Err(TripError::validation(format!(
                        "{ENV_PREFIX}RESUME_POLICY='{other}': expected continue or restart"
                    )));
                }
            };
        }
        if let Some(v) = lookup("TILE_LAYER") {
            self.tile_layer = v.trim().to_string();
        }
        if let Some(v) = lookup("WIDTH") {
            self.width = parse_var("WIDTH", &v)?;
        }
        if let Some(v) = lookup("HEIGHT") {
            self.height = parse_var("HEIGHT", &v)?;
        }
        if let Some(v) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STORE_DIR") {
            self.store_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LABELS") {
            self.labels = parse_flag("LABELS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> TripResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TripError::validation("viewport width/height must be non-zero"));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            return Err(TripError::validation(
                "viewport width/height must be even (required for video capture)",
            ));
        }
        if self.frame_rate == 0 || self.capture_rate == 0 {
            return Err(TripError::validation("frame and capture rates must be positive"));
        }
        if self.http_timeout_secs == 0 {
            return Err(TripError::validation("http timeout must be positive"));
        }
        self.timing()?;
        LegTiming::fixed(self.leg_duration_secs)?;
        self.tile_layer()?;
        Ok(())
    }

    pub fn timing(&self) -> TripResult<LegTiming> {
        match self.seconds_per_km {
            Some(rate) => LegTiming::seconds_per_km(rate),
            None => LegTiming::fixed(self.leg_duration_secs),
        }
    }

    pub fn canvas(&self) -> TripResult<Canvas> {
        Canvas::new(self.width, self.height)
    }

    pub fn fps(&self) -> TripResult<Fps> {
        Fps::new(self.frame_rate, 1)
    }

    pub fn tile_layer(&self) -> TripResult<TileLayer> {
        self.tile_layer.parse()
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

#[cfg(test)]
#[path = "../tests/unit/config/config.rs"]
mod tests;
