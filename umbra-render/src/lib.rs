//! # umbra-render
//!
//! Fog-of-war compositor: paints hidden regions over a copy of the
//! private map so the result is safe to hand to viewers.
//!
//! ## Architecture
//!
//! ```text
//!  HiddenRegion list (umbra-core, normalized coords)
//!       │
//!       ▼
//!  bridge::pixel_polygons()      ◀─── validate + scale to pixels
//!       │
//!       ▼
//!  raster::fill_polygon()        ◀─── scanline fill + outline
//!       │
//!       ▼
//!  Compositor::composite_bytes() ◀─── JPEG in memory
//!  Compositor::composite_to_dir()◀─── PNG on disk
//! ```
//!
//! ## Crate modules
//!
//! - [`color`]: hex triplet parsing with black fallback
//! - [`bridge`]: region → pixel polygon conversion
//! - [`raster`]: CPU polygon rasterization
//! - [`compositor`]: decode, paint, encode

pub mod bridge;
pub mod color;
pub mod compositor;
pub mod raster;

// Re-exports for convenience
pub use bridge::{pixel_polygons, PixelPolygon};
pub use color::parse_fill_color;
pub use compositor::{clear_generated, Composite, CompositeError, Compositor};
pub use raster::fill_polygon;
