//! Compositing: decode the private map, overpaint hidden regions, encode.
//!
//! Two outputs share the same painting pass:
//! - [`Compositor::composite_bytes`] returns a JPEG buffer for inline
//!   delivery (the path used by the session pipeline),
//! - [`Compositor::composite_to_dir`] writes a PNG with a generated name
//!   for callers that need a retrievable file instead.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImage, ImageFormat, ImageReader, Rgb, Rgba};
use thiserror::Error;
use umbra_core::HiddenRegion;

use crate::bridge::pixel_polygons;
use crate::raster::fill_polygon;

/// Prefix of every file written by the disk-backed variant.
pub const GENERATED_PREFIX: &str = "game_";

/// Default JPEG quality for the inline payload.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum CompositeError {
    #[error("Source map unavailable: {path}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },
    #[error("Failed to decode source map {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("Failed to encode composite: {0}")]
    Encode(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Anything that can turn a source image plus hidden regions into
/// redacted image bytes.
///
/// The session store only depends on this trait, so tests can swap in a
/// compositor that fails or counts invocations.
pub trait Composite: Send + Sync {
    fn composite(&self, source: &Path, regions: &[HiddenRegion]) -> Result<Vec<u8>, CompositeError>;
}

/// `image`-crate compositor.
#[derive(Clone, Copy, Debug)]
pub struct Compositor {
    jpeg_quality: u8,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        Self {
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Override the JPEG quality (clamped to 1..=100).
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality.clamp(1, 100);
        self
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Redact `source` and return it as an in-memory JPEG.
    pub fn composite_bytes(
        &self,
        source: &Path,
        regions: &[HiddenRegion],
    ) -> Result<Vec<u8>, CompositeError> {
        let mut canvas = open_source(source)?.into_rgb8();
        let (width, height) = canvas.dimensions();
        paint_regions(&mut canvas, regions, width, height, |[r, g, b]| Rgb([r, g, b]));

        let mut out = Vec::new();
        let encoder = JpegEncoder::new_with_quality(&mut out, self.jpeg_quality);
        canvas.write_with_encoder(encoder)?;

        log::debug!(
            "composite ok source={} regions={} bytes={}",
            source.display(),
            regions.len(),
            out.len()
        );
        Ok(out)
    }

    /// Redact `source` into a lossless PNG under `out_dir`.
    ///
    /// Returns the generated file name (not the full path).
    pub fn composite_to_dir(
        &self,
        source: &Path,
        regions: &[HiddenRegion],
        out_dir: &Path,
    ) -> Result<String, CompositeError> {
        let mut canvas = open_source(source)?.into_rgba8();
        let (width, height) = canvas.dimensions();
        paint_regions(&mut canvas, regions, width, height, |[r, g, b]| {
            Rgba([r, g, b, 255])
        });

        fs::create_dir_all(out_dir)?;
        let name = generated_name();
        canvas.save_with_format(out_dir.join(&name), ImageFormat::Png)?;

        log::info!("composite written file={name} regions={}", regions.len());
        Ok(name)
    }
}

impl Composite for Compositor {
    fn composite(&self, source: &Path, regions: &[HiddenRegion]) -> Result<Vec<u8>, CompositeError> {
        self.composite_bytes(source, regions)
    }
}

fn open_source(path: &Path) -> Result<DynamicImage, CompositeError> {
    let unavailable = |e: io::Error| CompositeError::SourceUnavailable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let reader = ImageReader::open(path)
        .map_err(unavailable)?
        .with_guessed_format()
        .map_err(unavailable)?;
    reader.decode().map_err(|source| CompositeError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

/// Paint every valid region in list order.
fn paint_regions<I, F>(canvas: &mut I, regions: &[HiddenRegion], width: u32, height: u32, pixel: F)
where
    I: GenericImage,
    F: Fn([u8; 3]) -> I::Pixel,
{
    for polygon in pixel_polygons(regions, width, height) {
        fill_polygon(canvas, &polygon.points, pixel(polygon.fill));
    }
}

/// `game_<unix-secs>_<8 hex>.png`
fn generated_name() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{GENERATED_PREFIX}{secs}_{}.png", &suffix[..8])
}

/// Remove stale disk-backed composites from `dir`.
///
/// A missing directory is not an error. Returns how many files were removed.
pub fn clear_generated(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        let is_png = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("png"));
        if path.is_file() && is_png {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Could not remove {}: {e}", path.display()),
            }
        }
    }
    if removed > 0 {
        log::info!("Cleared {removed} generated composites from {}", dir.display());
    }
    Ok(removed)
}
