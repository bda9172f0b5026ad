use crate::foundation::core::Fps;
use crate::foundation::error::{TripError, TripResult};
use crate::render::backend::FrameRGBA;

/// Codecs a capture can be encoded with, in preference order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    Vp9,
    Vp8,
    H264,
}

impl VideoCodec {
    pub const PREFERENCE: [VideoCodec; 3] = [VideoCodec::Vp9, VideoCodec::Vp8, VideoCodec::H264];

    /// Walk [`VideoCodec::PREFERENCE`] and return the first supported codec, or `Vp8` when
    /// nothing is reported as supported.
    pub fn probe(is_supported: impl Fn(VideoCodec) -> bool) -> VideoCodec {
        Self::PREFERENCE
            .into_iter()
            .find(|c| is_supported(*c))
            .unwrap_or(VideoCodec::Vp8)
    }

    /// `ffmpeg` encoder name.
    pub fn encoder(self) -> &'static str {
        match self {
            Self::Vp9 => "libvpx-vp9",
            Self::Vp8 => "libvpx",
            Self::H264 => "libx264",
        }
    }

    /// Container format (also the file extension).
    pub fn container(self) -> &'static str {
        match self {
            Self::Vp9 | Self::Vp8 => "webm",
            Self::H264 => "mp4",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Vp9 => "video/webm;codecs=vp9",
            Self::Vp8 => "video/webm;codecs=vp8",
            Self::H264 => "video/mp4",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// Configuration provided to a [`FrameSink`] when a capture starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    /// Sampling rate of the capture.
    pub fps: Fps,
}

/// A block of encoded container bytes. Concatenating all chunks in order yields the file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedChunk(pub Vec<u8>);

impl EncodedChunk {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Streaming encoder contract.
///
/// `push_frame` is called in sampling order between `begin` and `end`. Chunks may become
/// available at any point; callers drain them with `take_chunks` and collect the rest from
/// `end`.
pub trait FrameSink: Send {
    /// Codec this sink encodes with.
    fn codec(&self) -> VideoCodec;
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> TripResult<()>;
    fn push_frame(&mut self, frame: &FrameRGBA) -> TripResult<()>;
    /// Chunks produced since the last call.
    fn take_chunks(&mut self) -> Vec<EncodedChunk>;
    /// Flush the encoder and return the remaining chunks.
    fn end(&mut self) -> TripResult<Vec<EncodedChunk>>;
    /// Release encoder resources without flushing. Safe to call at any time, repeatedly.
    fn abort(&mut self) {}
}

/// In-memory sink for tests and debugging: every frame becomes one raw RGBA chunk.
#[derive(Debug)]
pub struct InMemorySink {
    codec: VideoCodec,
    cfg: Option<SinkConfig>,
    pending: Vec<EncodedChunk>,
    frames: usize,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(VideoCodec::Vp8)
    }
}

impl InMemorySink {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            cfg: None,
            pending: Vec::new(),
            frames: 0,
        }
    }

    /// Configuration captured in `begin`, if still running.
    pub fn config(&self) -> Option<&SinkConfig> {
        self.cfg.as_ref()
    }

    /// Frames pushed since the last `begin`.
    pub fn frames(&self) -> usize {
        self.frames
    }
}

impl FrameSink for InMemorySink {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn begin(&mut self, cfg: SinkConfig) -> TripResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TripError::validation("sink width/height must be non-zero"));
        }
        self.cfg = Some(cfg);
        self.pending.clear();
        self.frames = 0;
        Ok(())
    }

    fn push_frame(&mut self, frame: &FrameRGBA) -> TripResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| TripError::precondition("sink not started"))?;
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(TripError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        self.pending.push(EncodedChunk(frame.data.clone()));
        self.frames += 1;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<EncodedChunk> {
        std::mem::take(&mut self.pending)
    }

    fn end(&mut self) -> TripResult<Vec<EncodedChunk>> {
        if self.cfg.take().is_none() {
            return Err(TripError::precondition("sink not started"));
        }
        Ok(std::mem::take(&mut self.pending))
    }

    fn abort(&mut self) {
        self.cfg = None;
        self.pending.clear();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;
