use crate::encode::sink::{EncodedChunk, FrameSink, SinkConfig, VideoCodec};
use crate::foundation::core::Fps;
use crate::foundation::error::{TripError, TripResult};
use crate::foundation::math::mul_div255_u16;
use crate::render::backend::FrameRGBA;
use std::io::Read;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;

const READ_BLOCK: usize = 64 * 1024;

/// Options for [`FfmpegSink`].
#[derive(Clone, Debug)]
pub struct FfmpegSinkOpts {
    /// Codec to encode with; `None` probes the installed `ffmpeg`.
    pub codec: Option<VideoCodec>,
    /// Background color used to flatten alpha (RGBA8, straight alpha).
    pub bg_rgba: [u8; 4],
    /// Target video bitrate, e.g. `"2M"`.
    pub bitrate: String,
}

impl Default for FfmpegSinkOpts {
    fn default() -> Self {
        Self {
            codec: None,
            bg_rgba: [0, 0, 0, 255],
            bitrate: "2M".to_string(),
        }
    }
}

/// Sink that spawns the system `ffmpeg`, writes raw frames to stdin and streams the encoded
/// container back from stdout.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,
    codec: VideoCodec,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    chunks: Option<mpsc::Receiver<Vec<u8>>>,
    stdout_reader: Option<std::thread::JoinHandle<std::io::Result<()>>>,
    stderr_drain: Option<std::thread::JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
}

impl FfmpegSink {
    /// Create a sink. Without an explicit codec the local encoder list is probed once.
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        let codec = opts.codec.unwrap_or_else(|| {
            let encoders = probe_encoders();
            VideoCodec::probe(|c| encoders.iter().any(|e| e == c.encoder()))
        });
        tracing::debug!(%codec, "ffmpeg sink codec selected");
        Self {
            opts,
            codec,
            child: None,
            stdin: None,
            chunks: None,
            stdout_reader: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
        }
    }

    fn output_args(&self, cmd: &mut Command) {
        cmd.args(["-an", "-c:v", self.codec.encoder(), "-pix_fmt", "yuv420p"]);
        cmd.args(["-b:v", &self.opts.bitrate]);
        match self.codec {
            VideoCodec::Vp9 | VideoCodec::Vp8 => {
                cmd.args(["-deadline", "realtime", "-f", "webm"]);
            }
            VideoCodec::H264 => {
                // Streamable mp4: no seek back to write the moov atom.
                cmd.args([
                    "-preset",
                    "veryfast",
                    "-movflags",
                    "frag_keyframe+empty_moov+default_base_moof",
                    "-f",
                    "mp4",
                ]);
            }
        }
        cmd.arg("pipe:1");
    }
}

impl FrameSink for FfmpegSink {
    fn codec(&self) -> VideoCodec {
        self.codec
    }

    fn begin(&mut self, cfg: SinkConfig) -> TripResult<()> {
        if self.child.is_some() {
            return Err(TripError::precondition("ffmpeg sink already started"));
        }
        if cfg.fps.num == 0 || cfg.fps.den == 0 {
            return Err(TripError::validation("fps must be non-zero"));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(TripError::validation(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(TripError::validation(
                "ffmpeg sink width/height must be even (required for yuv420p output)",
            ));
        }
        if !is_ffmpeg_on_path() {
            return Err(TripError::resource(
                "ffmpeg is required for video capture, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Input is flattened to opaque RGBA in push_frame.
        cmd.args([
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
        ]);
        push_input_fps(&mut cmd, cfg.fps);
        cmd.args(["-i", "pipe:0"]);
        self.output_args(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            TripError::resource(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TripError::resource("failed to open ffmpeg stdin"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| TripError::resource("failed to open ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TripError::resource("failed to open ffmpeg stderr"))?;

        let (tx, rx) = mpsc::channel();
        let stdout_reader = std::thread::spawn(move || {
            let mut buf = vec![0u8; READ_BLOCK];
            loop {
                let n = stdout.read(&mut buf)?;
                if n == 0 {
                    return Ok(());
                }
                if tx.send(buf[..n].to_vec()).is_err() {
                    return Ok(());
                }
            }
        });
        let stderr_drain = std::thread::spawn(move || {
            let mut stderr_bytes = Vec::new();
            stderr.read_to_end(&mut stderr_bytes)?;
            Ok(stderr_bytes)
        });

        tracing::info!(
            codec = %self.codec,
            width = cfg.width,
            height = cfg.height,
            "ffmpeg capture started"
        );
        self.scratch = vec![0u8; (cfg.width as usize) * (cfg.height as usize) * 4];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.chunks = Some(rx);
        self.stdout_reader = Some(stdout_reader);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        Ok(())
    }

    fn push_frame(&mut self, frame: &FrameRGBA) -> TripResult<()> {
        let cfg = self
            .cfg
            .as_ref()
            .ok_or_else(|| TripError::precondition("ffmpeg sink not started"))?;
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(TripError::validation(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        if frame.data.len() != self.scratch.len() {
            return Err(TripError::validation(
                "frame.data size mismatch with width*height*4",
            ));
        }

        if frame.premultiplied {
            flatten_premul_over_bg_to_opaque_rgba8(
                &mut self.scratch,
                &frame.data,
                self.opts.bg_rgba,
            )?;
        } else {
            self.scratch.copy_from_slice(&frame.data);
        }

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(TripError::precondition("ffmpeg sink is already finalized"));
        };

        use std::io::Write as _;
        stdin.write_all(&self.scratch).map_err(|e| {
            TripError::resource(format!("failed to write frame to ffmpeg stdin: {e}"))
        })?;
        Ok(())
    }

    fn take_chunks(&mut self) -> Vec<EncodedChunk> {
        match self.chunks.as_ref() {
            Some(rx) => rx.try_iter().map(EncodedChunk).collect(),
            None => Vec::new(),
        }
    }

    fn end(&mut self) -> TripResult<Vec<EncodedChunk>> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| TripError::precondition("ffmpeg sink not started"))?;

        let status = child.wait().map_err(|e| {
            TripError::resource(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;

        if let Some(handle) = self.stdout_reader.take() {
            handle
                .join()
                .map_err(|_| TripError::resource("ffmpeg stdout reader thread panicked"))?
                .map_err(|e| TripError::resource(format!("ffmpeg stdout read failed: {e}")))?;
        }
        let remaining = self.take_chunks();
        self.chunks = None;

        let stderr_bytes = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| TripError::resource("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| TripError::resource(format!("ffmpeg stderr read failed: {e}")))?,
            None => Vec::new(),
        };
        self.cfg = None;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr_bytes);
            return Err(TripError::resource(format!(
                "ffmpeg exited with status {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(remaining)
    }

    fn abort(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                tracing::debug!(error = %e, "ffmpeg already exited");
            }
            let _ = child.wait();
        }
        // Both threads end once the pipes close.
        self.chunks = None;
        if let Some(handle) = self.stdout_reader.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stderr_drain.take() {
            let _ = handle.join();
        }
        self.cfg = None;
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn push_input_fps(cmd: &mut Command, fps: Fps) {
    // `-r` before `-i` sets the rawvideo input rate.
    cmd.args(["-r", &format!("{}/{}", fps.num, fps.den)]);
}

fn flatten_premul_over_bg_to_opaque_rgba8(
    dst: &mut [u8],
    src_premul: &[u8],
    bg_rgba: [u8; 4],
) -> TripResult<()> {
    if dst.len() != src_premul.len() || !dst.len().is_multiple_of(4) {
        return Err(TripError::validation(
            "flatten_premul_over_bg_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }

    let bg_r = bg_rgba[0] as u16;
    let bg_g = bg_rgba[1] as u16;
    let bg_b = bg_rgba[2] as u16;

    for (d, s) in dst.chunks_exact_mut(4).zip(src_premul.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }

        let inv = 255u16 - a;
        d[0] = (s[0] as u16 + mul_div255_u16(bg_r, inv)).min(255) as u8;
        d[1] = (s[1] as u16 + mul_div255_u16(bg_g, inv)).min(255) as u8;
        d[2] = (s[2] as u16 + mul_div255_u16(bg_b, inv)).min(255) as u8;
        d[3] = 255;
    }

    Ok(())
}

/// Video encoder names reported by `ffmpeg -encoders`. Empty when ffmpeg is unavailable.
pub fn probe_encoders() -> Vec<String> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output();
    match output {
        Ok(out) if out.status.success() => {
            parse_encoder_list(&String::from_utf8_lossy(&out.stdout))
        }
        Ok(out) => {
            tracing::debug!(status = %out.status, "ffmpeg -encoders failed");
            Vec::new()
        }
        Err(e) => {
            tracing::debug!(error = %e, "ffmpeg not runnable");
            Vec::new()
        }
    }
}

/// Parse the table printed by `ffmpeg -encoders`, keeping video encoders only.
pub fn parse_encoder_list(text: &str) -> Vec<String> {
    text.lines()
        .skip_while(|l| !l.trim_start().starts_with("---"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let flags = parts.next()?;
            let name = parts.next()?;
            flags.starts_with('V').then(|| name.to_string())
        })
        .collect()
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> TripResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
