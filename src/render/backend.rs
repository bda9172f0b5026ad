use std::path::Path;

use crate::{
    encode::ffmpeg::ensure_parent_dir,
    foundation::{
        core::Canvas,
        error::{TripError, TripResult},
    },
    map::MapSession,
};

/// A rendered frame as RGBA8 pixels.
///
/// Backends produce **premultiplied alpha**; the `premultiplied` flag makes this explicit at
/// API boundaries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameRGBA {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// RGBA8 bytes, tightly packed, row-major.
    pub data: Vec<u8>,
    /// Whether `data` is premultiplied alpha.
    pub premultiplied: bool,
}

impl FrameRGBA {
    /// RGBA of one pixel as stored.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        self.data.get(i..i + 4).map(|p| [p[0], p[1], p[2], p[3]])
    }

    /// Copy of the pixels with straight (non-premultiplied) alpha.
    pub fn to_straight_alpha(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        if !self.premultiplied {
            return out;
        }
        for px in out.chunks_exact_mut(4) {
            let a = u16::from(px[3]);
            if a == 0 || a == 255 {
                continue;
            }
            for c in &mut px[..3] {
                *c = ((u16::from(*c) * 255 + a / 2) / a).min(255) as u8;
            }
        }
        out
    }

    /// Write the frame as a PNG, creating parent directories.
    pub fn save_png(&self, path: &Path) -> TripResult<()> {
        ensure_parent_dir(path)?;
        image::save_buffer(
            path,
            &self.to_straight_alpha(),
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| TripError::resource(format!("failed to write '{}': {e}", path.display())))
    }
}

/// A surface the map session can be drawn onto.
pub trait RenderBackend: Send {
    /// Output size in pixels.
    fn canvas(&self) -> Canvas;

    /// Draw the current state of `map`. The map's viewport is scaled to [`RenderBackend::canvas`].
    fn render(&mut self, map: &MapSession) -> TripResult<FrameRGBA>;
}
