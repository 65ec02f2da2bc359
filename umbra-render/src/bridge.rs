//! Region → pixel bridge: validates hidden regions and converts their
//! normalized vertices into absolute pixel coordinates.
//!
//! A region is drawn whole or not at all. A `vertices` value that is not a
//! list, fewer than three vertices, or any vertex that is not a pair of
//! finite numbers skips the region. A colour that is not a hex string
//! paints black.

use umbra_core::HiddenRegion;

use crate::color::parse_fill_color;

/// A validated polygon in pixel space, ready for rasterization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelPolygon {
    pub points: Vec<(i64, i64)>,
    pub fill: [u8; 3],
}

/// `clamp(round(v * dimension), 0, dimension - 1)`.
pub fn to_pixel(v: f64, dimension: u32) -> i64 {
    let max = dimension.saturating_sub(1) as f64;
    (v * dimension as f64).round().clamp(0.0, max) as i64
}

/// Convert one region, or `None` if it must be skipped.
pub fn region_to_pixels(region: &HiddenRegion, width: u32, height: u32) -> Option<PixelPolygon> {
    let vertices = region.vertices.as_list()?;
    if vertices.len() < 3 {
        return None;
    }
    let points = vertices
        .iter()
        .map(|v| v.coords().map(|(x, y)| (to_pixel(x, width), to_pixel(y, height))))
        .collect::<Option<Vec<_>>>()?;

    Some(PixelPolygon {
        points,
        fill: parse_fill_color(region.color_str()),
    })
}

/// Convert all drawable regions, preserving list order (painter's order).
pub fn pixel_polygons(regions: &[HiddenRegion], width: u32, height: u32) -> Vec<PixelPolygon> {
    let mut polygons = Vec::with_capacity(regions.len());
    for (i, region) in regions.iter().enumerate() {
        match region_to_pixels(region, width, height) {
            Some(p) => polygons.push(p),
            None => log::debug!(
                "Skipping hidden region {i} ({} vertices): invalid geometry",
                region.vertices.len()
            ),
        }
    }
    polygons
}
