use std::time::Duration;

use crate::{
    animation::{
        ease::Ease,
        timing::{LegTiming, ResumePolicy},
    },
    foundation::{
        core::Coordinate,
        error::{TripError, TripResult},
        geo::Polyline,
    },
    model::TransportMode,
    route::ResolvedLeg,
};

/// Animation session state. `leg` is the index of the active leg.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub enum PlayState {
    #[default]
    Stopped,
    Playing {
        leg: usize,
    },
    Paused {
        leg: usize,
    },
}

impl PlayState {
    pub fn is_playing(self) -> bool {
        matches!(self, Self::Playing { .. })
    }

    pub fn is_paused(self) -> bool {
        matches!(self, Self::Paused { .. })
    }

    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// One leg as the engine animates it.
#[derive(Clone, Debug, PartialEq)]
pub struct LegPlan {
    pub polyline: Polyline,
    pub duration: Duration,
    pub mode: TransportMode,
}

impl LegPlan {
    pub fn new(polyline: Polyline, duration: Duration, mode: TransportMode) -> Self {
        Self {
            polyline,
            duration,
            mode,
        }
    }

    /// Plan a resolved leg with the given timing model.
    pub fn timed(leg: &ResolvedLeg, timing: LegTiming) -> Self {
        Self {
            duration: timing.duration_for(&leg.polyline),
            polyline: leg.polyline.clone(),
            mode: leg.mode,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum StopReason {
    /// The last leg finished.
    Completed,
    /// `stop` was called.
    Requested,
    /// New legs were loaded while a session was active.
    LegsChanged,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub enum AnimationEvent {
    Started { leg: usize },
    Paused { leg: usize },
    Resumed { leg: usize },
    MarkerMoved {
        leg: usize,
        position: Coordinate,
        progress: f64,
    },
    SegmentComplete { leg: usize },
    TripComplete,
    Stopped { reason: StopReason },
}

/// Clock-agnostic play/pause/stop state machine.
///
/// Every time-dependent call takes `now`, a monotonic offset from an arbitrary origin. The
/// engine never reads a clock itself.
#[derive(Debug, Default)]
pub struct AnimationEngine {
    legs: Vec<LegPlan>,
    state: PlayState,
    leg_index: usize,
    // Time accumulated in the active leg before `leg_clock_start`.
    elapsed_before: Duration,
    leg_clock_start: Duration,
    marker: Option<Coordinate>,
    ease: Ease,
    resume: ResumePolicy,
}

impl AnimationEngine {
    pub fn new(ease: Ease, resume: ResumePolicy) -> Self {
        Self {
            ease,
            resume,
            ..Self::default()
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn leg_index(&self) -> usize {
        self.leg_index
    }

    pub fn legs(&self) -> &[LegPlan] {
        &self.legs
    }

    /// Current marker position; `None` while stopped.
    pub fn marker(&self) -> Option<Coordinate> {
        self.marker
    }

    pub fn ease(&self) -> Ease {
        self.ease
    }

    pub fn set_ease(&mut self, ease: Ease) {
        self.ease = ease;
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        self.resume
    }

    pub fn set_resume_policy(&mut self, resume: ResumePolicy) {
        self.resume = resume;
    }

    /// Sum of all leg durations.
    pub fn total_duration(&self) -> Duration {
        self.legs.iter().map(|l| l.duration).sum()
    }

    /// Replace the legs. Any active session ends with [`StopReason::LegsChanged`].
    pub fn load_legs(&mut self, legs: Vec<LegPlan>) -> Vec<AnimationEvent> {
        let events = if self.state.is_stopped() {
            Vec::new()
        } else {
            self.stop_with(StopReason::LegsChanged)
        };
        tracing::debug!(legs = legs.len(), "animation legs loaded");
        self.legs = legs;
        self.leg_index = 0;
        events
    }

    #[tracing::instrument(level = "debug", skip(self), fields(state = ?self.state))]
    pub fn play(&mut self, now: Duration) -> TripResult<Vec<AnimationEvent>> {
        match self.state {
            PlayState::Playing { .. } => Ok(Vec::new()),
            _ if self.legs.is_empty() => Err(TripError::input(
                "add at least two resolved locations before playing",
            )),
            PlayState::Stopped => {
                if self.leg_index >= self.legs.len() {
                    self.leg_index = 0;
                }
                let leg = self.leg_index;
                self.start_leg_timer(now);
                self.state = PlayState::Playing { leg };
                let mut events = vec![AnimationEvent::Started { leg }];
                events.extend(self.enter_leg(now));
                Ok(events)
            }
            PlayState::Paused { leg } => {
                match self.resume {
                    ResumePolicy::ContinueFromElapsed => self.leg_clock_start = now,
                    ResumePolicy::RestartLeg => self.start_leg_timer(now),
                }
                self.state = PlayState::Playing { leg };
                Ok(vec![AnimationEvent::Resumed { leg }])
            }
        }
    }

    pub fn pause(&mut self, now: Duration) -> Vec<AnimationEvent> {
        let PlayState::Playing { leg } = self.state else {
            return Vec::new();
        };
        self.elapsed_before = self.elapsed(now);
        self.state = PlayState::Paused { leg };
        tracing::debug!(leg, elapsed = ?self.elapsed_before, "animation paused");
        vec![AnimationEvent::Paused { leg }]
    }

    /// End the session. No-op when already stopped.
    pub fn stop(&mut self) -> Vec<AnimationEvent> {
        if self.state.is_stopped() {
            return Vec::new();
        }
        self.stop_with(StopReason::Requested)
    }

    /// Advance the marker to `now`. Completes at most one leg per call.
    #[tracing::instrument(level = "trace", skip(self))]
    pub fn tick(&mut self, now: Duration) -> Vec<AnimationEvent> {
        let PlayState::Playing { leg } = self.state else {
            return Vec::new();
        };
        let Some(plan) = self.legs.get(leg) else {
            return self.stop_with(StopReason::Completed);
        };
        if !plan.polyline.is_drawable() {
            return self.finish_leg(now);
        }

        let progress = if plan.duration.is_zero() {
            1.0
        } else {
            (self.elapsed(now).as_secs_f64() / plan.duration.as_secs_f64()).min(1.0)
        };
        let position = if progress >= 1.0 {
            plan.polyline.last()
        } else {
            plan.polyline.point_at(self.ease.apply(progress))
        };

        let mut events = Vec::new();
        if let Some(position) = position {
            self.marker = Some(position);
            events.push(AnimationEvent::MarkerMoved {
                leg,
                position,
                progress,
            });
        }
        if progress >= 1.0 {
            events.extend(self.finish_leg(now));
        }
        events
    }

    /// Where the marker would be `at` after an uninterrupted play from the first leg.
    pub fn preview(&self, at: Duration) -> Option<(usize, Coordinate)> {
        let mut remaining = at;
        for (i, plan) in self.legs.iter().enumerate() {
            if remaining < plan.duration {
                let progress = remaining.as_secs_f64() / plan.duration.as_secs_f64();
                return plan
                    .polyline
                    .point_at(self.ease.apply(progress))
                    .map(|p| (i, p));
            }
            remaining -= plan.duration;
        }
        let last = self.legs.len().checked_sub(1)?;
        self.legs[last].polyline.last().map(|p| (last, p))
    }

    fn elapsed(&self, now: Duration) -> Duration {
        self.elapsed_before + now.saturating_sub(self.leg_clock_start)
    }

    fn start_leg_timer(&mut self, now: Duration) {
        self.elapsed_before = Duration::ZERO;
        self.leg_clock_start = now;
    }

    // Legs without two samples have nothing to animate and finish on entry.
    fn enter_leg(&mut self, now: Duration) -> Vec<AnimationEvent> {
        let PlayState::Playing { leg } = self.state else {
            return Vec::new();
        };
        match self.legs.get(leg) {
            Some(plan) if !plan.polyline.is_drawable() => self.finish_leg(now),
            Some(plan) => {
                if let Some(start) = plan.polyline.first() {
                    self.marker = Some(start);
                }
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    fn finish_leg(&mut self, now: Duration) -> Vec<AnimationEvent> {
        let leg = self.leg_index;
        let mut events = vec![AnimationEvent::SegmentComplete { leg }];
        self.leg_index += 1;
        if self.leg_index >= self.legs.len() {
            tracing::debug!(legs = self.legs.len(), "trip complete");
            events.push(AnimationEvent::TripComplete);
            events.extend(self.stop_with(StopReason::Completed));
        } else {
            self.state = PlayState::Playing {
                leg: self.leg_index,
            };
            self.start_leg_timer(now);
        }
        events
    }

    fn stop_with(&mut self, reason: StopReason) -> Vec<AnimationEvent> {
        self.state = PlayState::Stopped;
        self.leg_index = 0;
        self.marker = None;
        self.elapsed_before = Duration::ZERO;
        self.leg_clock_start = Duration::ZERO;
        tracing::debug!(?reason, "animation stopped");
        vec![AnimationEvent::Stopped { reason }]
    }
}

#[cfg(test)]
#[path = "../../tests/unit/animation/engine.rs"]
mod tests;
