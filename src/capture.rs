//! Samples the rendered map into a streaming encoder while an animation plays.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, TimeZone};

use crate::{
    animation::engine::PlayState,
    encode::{
        ffmpeg::ensure_parent_dir,
        sink::{EncodedChunk, FrameSink, SinkConfig, VideoCodec},
    },
    foundation::{
        core::Fps,
        error::{TripError, TripResult},
    },
    map::MapSession,
    render::backend::RenderBackend,
};

/// Samples per second when nothing else is configured.
pub const DEFAULT_CAPTURE_RATE: u32 = 10;

/// A finished capture.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recording {
    pub chunks: Vec<EncodedChunk>,
    pub codec: VideoCodec,
    pub frames: usize,
}

impl Recording {
    /// All chunks concatenated in order.
    pub fn assemble(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_len());
        for chunk in &self.chunks {
            out.extend_from_slice(chunk.as_bytes());
        }
        out
    }

    pub fn byte_len(&self) -> usize {
        self.chunks.iter().map(EncodedChunk::len).sum()
    }

    /// `trip-animation-YYYYMMDD-HHMMSS.<ext>`
    pub fn file_name<Tz>(&self, timestamp: &DateTime<Tz>) -> String
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        format!(
            "trip-animation-{}.{}",
            timestamp.format("%Y%m%d-%H%M%S"),
            self.codec.container()
        )
    }

    /// Write the assembled file into `dir` and return its path.
    pub fn save<Tz>(&self, dir: &Path, timestamp: &DateTime<Tz>) -> TripResult<PathBuf>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let path = dir.join(self.file_name(timestamp));
        ensure_parent_dir(&path)?;
        std::fs::write(&path, self.assemble()).map_err(|e| {
            TripError::resource(format!("failed to write '{}': {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), bytes = self.byte_len(), "recording saved");
        Ok(path)
    }
}

/// Outcome of one [`CapturePipeline::tick`].
#[derive(Debug)]
pub enum CaptureTick {
    /// Not recording.
    Idle,
    /// Too soon since the previous sample.
    Skipped,
    /// One frame was rendered and pushed.
    Sampled { frames: usize },
    /// Capture ended on this tick.
    Finished(TripResult<Recording>),
}

struct CaptureSession {
    surface: Box<dyn RenderBackend>,
    sink: Box<dyn FrameSink>,
    chunks: Vec<EncodedChunk>,
    frames: usize,
    last_sample: Option<Duration>,
}

/// Recording lifecycle, strictly nested inside a playing animation.
pub struct CapturePipeline {
    rate: u32,
    session: Option<CaptureSession>,
}

impl CapturePipeline {
    pub fn new(rate: u32) -> TripResult<Self> {
        if rate == 0 {
            return Err(TripError::validation("capture rate must be non-zero"));
        }
        Ok(Self {
            rate,
            session: None,
        })
    }

    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Minimum time between samples.
    pub fn interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.rate))
    }

    pub fn is_recording(&self) -> bool {
        self.session.is_some()
    }

    /// Frames sampled so far in the active capture.
    pub fn frames(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.frames)
    }

    /// Begin recording onto `surface` through `sink`.
    #[tracing::instrument(skip(self, surface, sink), fields(rate = self.rate))]
    pub fn start(
        &mut self,
        play_state: PlayState,
        surface: Box<dyn RenderBackend>,
        mut sink: Box<dyn FrameSink>,
    ) -> TripResult<VideoCodec> {
        if !play_state.is_playing() {
            return Err(TripError::precondition(
                "start the animation before recording",
            ));
        }
        if self.session.is_some() {
            return Err(TripError::precondition("a recording is already in progress"));
        }

        let canvas = surface.canvas();
        let cfg = SinkConfig {
            width: canvas.width,
            height: canvas.height,
            fps: Fps::new(self.rate, 1)?,
        };
        if let Err(e) = sink.begin(cfg) {
            sink.abort();
            return Err(e);
        }
        let codec = sink.codec();
        tracing::info!(%codec, width = canvas.width, height = canvas.height, "capture started");
        self.session = Some(CaptureSession {
            surface,
            sink,
            chunks: Vec::new(),
            frames: 0,
            last_sample: None,
        });
        Ok(codec)
    }

    /// Sample the map if a sample is due. Ends the capture once the animation has stopped.
    pub fn tick(&mut self, now: Duration, play_state: PlayState, map: &MapSession) -> CaptureTick {
        if self.session.is_none() {
            return CaptureTick::Idle;
        }
        if play_state.is_stopped() {
            return CaptureTick::Finished(self.finish());
        }

        let interval = self.interval();
        let Some(session) = self.session.as_mut() else {
            return CaptureTick::Idle;
        };
        if let Some(last) = session.last_sample
            && now.saturating_sub(last) < interval
        {
            return CaptureTick::Skipped;
        }

        let sampled = session
            .surface
            .render(map)
            .and_then(|frame| session.sink.push_frame(&frame));
        match sampled {
            Ok(()) => {
                session.last_sample = Some(now);
                session.frames += 1;
                let fresh = session.sink.take_chunks();
                session.chunks.extend(fresh);
                CaptureTick::Sampled {
                    frames: session.frames,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "capture sample failed; stopping capture");
                if let Some(mut session) = self.session.take() {
                    session.sink.abort();
                }
                CaptureTick::Finished(Err(e))
            }
        }
    }

    /// End the capture. `Ok(None)` when not recording.
    pub fn stop(&mut self) -> TripResult<Option<Recording>> {
        if self.session.is_none() {
            return Ok(None);
        }
        self.finish().map(Some)
    }

    fn finish(&mut self) -> TripResult<Recording> {
        let Some(mut session) = self.session.take() else {
            return Err(TripError::precondition("not recording"));
        };
        let codec = session.sink.codec();
        let flushed = session.sink.end();
        // Release the encoder and surface whatever the flush did.
        session.sink.abort();
        drop(session.surface);

        let mut chunks = session.chunks;
        chunks.extend(flushed?);
        if chunks.iter().all(EncodedChunk::is_empty) {
            return Err(TripError::resource("no video data was recorded"));
        }
        tracing::info!(frames = session.frames, chunks = chunks.len(), "capture finished");
        Ok(Recording {
            chunks,
            codec,
            frames: session.frames,
        })
    }
}

#[cfg(test)]
#[path = "../tests/unit/capture/capture.rs"]
mod tests;
