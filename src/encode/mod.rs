//! Video encoding sinks.
//!
//! Sinks consume captured frames in sampling order and hand back encoded chunks as they become
//! available, so a recording can be assembled incrementally.

/// `ffmpeg`-based streaming sink (webm or fragmented mp4 via system `ffmpeg`).
pub mod ffmpeg;
/// Frame sink trait, codec selection and the in-memory sink.
pub mod sink;
