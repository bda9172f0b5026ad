use std::fmt::Write as _;

use crate::{
    foundation::core::Point,
    map::{MapSession, TILE_SIZE},
    model::{LocationId, TransportMode},
    route::RouteSource,
};

pub const MARKER_COLOR: &str = "#ff6d00";

/// Stroke color of a leg.
pub fn route_color(mode: TransportMode) -> &'static str {
    match mode {
        TransportMode::Car => "#1e88e5",
        TransportMode::Bike => "#43a047",
        TransportMode::Walk => "#8e24aa",
        TransportMode::Plane => "#e53935",
    }
}

fn stop_color(id: LocationId) -> &'static str {
    match id {
        LocationId::Start => "#2e7d32",
        LocationId::End => "#c62828",
        LocationId::Waypoint(_) => "#1565c0",
    }
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn points_attr(points: impl Iterator<Item = Point>) -> String {
    let mut out = String::new();
    for p in points {
        if !out.is_empty() {
            out.push(' ');
        }
        let _ = write!(out, "{:.1},{:.1}", p.x, p.y);
    }
    out
}

/// SVG document for the map's current state, in viewport pixel space.
///
/// Draw order: background, cached tiles, routes, stops, labels, marker, attribution.
pub fn build_scene(map: &MapSession) -> String {
    let vp = map.viewport();
    let (w, h) = (vp.canvas.width, vp.canvas.height);
    let layer = map.tile_layer();
    let mut svg = String::new();

    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" xmlns:xlink="http://www.w3.org/1999/xlink" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#
    );
    let _ = write!(
        svg,
        r#"<rect x="0" y="0" width="{w}" height="{h}" fill="{}"/>"#,
        escape_xml(&layer.background)
    );

    for (key, at) in map.visible_tiles() {
        if let Some(uri) = map.tiles().get(&layer.name, key) {
            let _ = write!(
                svg,
                r#"<image x="{:.1}" y="{:.1}" width="{TILE_SIZE}" height="{TILE_SIZE}" xlink:href="{uri}"/>"#,
                at.x, at.y
            );
        }
    }

    let static_layer = map.static_layer();
    for route in &static_layer.routes {
        if !route.polyline.is_drawable() {
            continue;
        }
        let pts = points_attr(route.polyline.points().iter().map(|c| vp.project(*c)));
        let dash = if route.mode.is_flight() {
            r#" stroke-dasharray="10 8""#
        } else {
            ""
        };
        let opacity = match route.source {
            RouteSource::Fallback(_) => "0.55",
            _ => "0.9",
        };
        let _ = write!(
            svg,
            r#"<polyline points="{pts}" fill="none" stroke="{}" stroke-width="4" stroke-linecap="round" stroke-linejoin="round" stroke-opacity="{opacity}"{dash}/>"#,
            route_color(route.mode)
        );
    }

    for stop in &static_layer.stops {
        let p = vp.project(stop.coordinate);
        let _ = write!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="6" fill="{}" stroke="#ffffff" stroke-width="2"/>"##,
            p.x,
            p.y,
            stop_color(stop.id)
        );
    }

    if map.labels() {
        for stop in &static_layer.stops {
            let p = vp.project(stop.coordinate);
            let _ = write!(
                svg,
                r##"<text x="{:.1}" y="{:.1}" font-family="sans-serif" font-size="13" font-weight="bold" fill="#212121" stroke="#ffffff" stroke-width="3" paint-order="stroke">{}</text>"##,
                p.x + 9.0,
                p.y - 9.0,
                escape_xml(&stop.label)
            );
        }
    }

    if let Some(marker) = map.marker() {
        let p = vp.project(marker);
        let _ = write!(
            svg,
            r##"<circle cx="{:.1}" cy="{:.1}" r="9" fill="{MARKER_COLOR}" stroke="#ffffff" stroke-width="3"/>"##,
            p.x, p.y
        );
    }

    if !layer.attribution.is_empty() {
        let _ = write!(
            svg,
            r##"<text x="{}" y="{}" text-anchor="end" font-family="sans-serif" font-size="10" fill="#333333">{}</text>"##,
            w.saturating_sub(4),
            h.saturating_sub(4),
            escape_xml(&layer.attribution)
        );
    }

    svg.push_str("</svg>");
    svg
}

#[cfg(test)]
#[path = "../../tests/unit/render/scene.rs"]
mod tests;
