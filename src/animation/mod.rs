//! Marker animation along resolved legs.

/// Easing curves applied to per-leg progress.
pub mod ease;
/// Play/pause/stop state machine and per-frame interpolation.
pub mod engine;
/// Leg duration models and resume behavior.
pub mod timing;
