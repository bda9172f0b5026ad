use std::time::Duration;

use crate::foundation::{
    error::{TripError, TripResult},
    geo::Polyline,
};

/// Floor for distance-derived durations of non-empty legs.
pub const MIN_LEG_DURATION: Duration = Duration::from_millis(100);

/// Default per-leg duration for [`LegTiming::FixedSeconds`].
pub const DEFAULT_LEG_SECONDS: u32 = 5;

pub const MIN_LEG_SECONDS: u32 = 1;
pub const MAX_LEG_SECONDS: u32 = 600;

/// How long the marker spends on a leg.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LegTiming {
    /// Proportional to the leg's great-circle length.
    SecondsPerKm(f64),
    /// Every leg lasts the same number of seconds.
    FixedSeconds(u32),
}

impl Default for LegTiming {
    fn default() -> Self {
        Self::FixedSeconds(DEFAULT_LEG_SECONDS)
    }
}

impl LegTiming {
    pub fn seconds_per_km(rate: f64) -> TripResult<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(TripError::validation(format!(
                "seconds per km must be a positive number, got {rate}"
            )));
        }
        Ok(Self::SecondsPerKm(rate))
    }

    pub fn fixed(secs: u32) -> TripResult<Self> {
        if !(MIN_LEG_SECONDS..=MAX_LEG_SECONDS).contains(&secs) {
            return Err(TripError::validation(format!(
                "leg duration must be within {MIN_LEG_SECONDS}..={MAX_LEG_SECONDS} seconds, got {secs}"
            )));
        }
        Ok(Self::FixedSeconds(secs))
    }

    /// Duration for one leg.
    ///
    /// Distance-based timing gives zero-length legs a zero duration; the engine treats those as
    /// finished on their first tick.
    pub fn duration_for(self, polyline: &Polyline) -> Duration {
        match self {
            Self::FixedSeconds(secs) => Duration::from_secs(u64::from(secs)),
            Self::SecondsPerKm(rate) => {
                let km = polyline.length_km();
                if km.is_nan() || km <= 0.0 {
                    return Duration::ZERO;
                }
                let secs = km * rate;
                if !secs.is_finite() {
                    return MIN_LEG_DURATION;
                }
                Duration::from_secs_f64(secs).max(MIN_LEG_DURATION)
            }
        }
    }
}

/// What `play` does after a pause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResumePolicy {
    /// Pick up the leg where it was paused.
    #[default]
    ContinueFromElapsed,
    /// Start the paused leg over.
    RestartLeg,
}

#[cfg(test)]
#[path = "../../tests/unit/animation/timing.rs"]
mod tests;
