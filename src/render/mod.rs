//! Rasterizing the map session into frames.

/// Frame type and the backend trait.
pub mod backend;
/// SVG scene description of a map session.
pub mod scene;
/// `usvg`/`resvg` CPU backend.
pub mod svg;
