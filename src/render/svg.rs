use std::sync::Arc;

use crate::{
    foundation::{
        core::Canvas,
        error::{TripError, TripResult},
    },
    map::MapSession,
    render::{
        backend::{FrameRGBA, RenderBackend},
        scene::build_scene,
    },
};

/// CPU backend: map scene as SVG, rasterized with `resvg`.
pub struct SvgBackend {
    canvas: Canvas,
    fontdb: Arc<usvg::fontdb::Database>,
}

impl SvgBackend {
    /// Backend with the system fonts loaded (needed for labels and attribution).
    pub fn new(canvas: Canvas) -> Self {
        let mut db = usvg::fontdb::Database::new();
        db.load_system_fonts();
        tracing::debug!(faces = db.len(), "svg backend fonts loaded");
        Self::with_fontdb(canvas, Arc::new(db))
    }

    pub fn with_fontdb(canvas: Canvas, fontdb: Arc<usvg::fontdb::Database>) -> Self {
        Self { canvas, fontdb }
    }

    /// Backend without any fonts; text is skipped.
    pub fn without_fonts(canvas: Canvas) -> Self {
        Self::with_fontdb(canvas, Arc::new(usvg::fontdb::Database::new()))
    }

    /// Parse and rasterize an SVG document to this backend's canvas.
    pub fn rasterize(&self, svg: &str) -> TripResult<FrameRGBA> {
        let opts = usvg::Options {
            fontdb: self.fontdb.clone(),
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(svg, &opts)
            .map_err(|e| TripError::validation(format!("invalid map scene: {e}")))?;

        let (width, height) = (self.canvas.width, self.canvas.height);
        let mut pixmap = resvg::tiny_skia::Pixmap::new(width, height)
            .ok_or_else(|| TripError::resource("failed to allocate frame pixmap"))?;
        let sx = (width as f32) / tree.size().width();
        let sy = (height as f32) / tree.size().height();
        let xform = resvg::tiny_skia::Transform::from_scale(sx, sy);
        resvg::render(&tree, xform, &mut pixmap.as_mut());

        Ok(FrameRGBA {
            width,
            height,
            data: pixmap.take(),
            premultiplied: true,
        })
    }
}

impl RenderBackend for SvgBackend {
    fn canvas(&self) -> Canvas {
        self.canvas
    }

    #[tracing::instrument(level = "trace", skip_all)]
    fn render(&mut self, map: &MapSession) -> TripResult<FrameRGBA> {
        self.rasterize(&build_scene(map))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/svg.rs"]
mod tests;
