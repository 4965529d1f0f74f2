use crate::error::{Result, ScanError};
use crate::geometry::{BoundingBox, LonLat, Polygon};
use log::debug;
use ndarray::{Array3, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Default marker color of the hazard layer (pure red).
pub const DEFAULT_MARKER_COLOR: [u8; 3] = [255, 0, 0];

/// Default maximum Euclidean RGB distance for a pixel to count as marker.
pub const DEFAULT_TOLERANCE: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkerSpec {
    pub color: [u8; 3],
    pub tolerance: f64,
}

impl Default for MarkerSpec {
    fn default() -> Self {
        Self {
            color: DEFAULT_MARKER_COLOR,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl MarkerSpec {
    pub fn new(color: [u8; 3], tolerance: f64) -> Result<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ScanError::InvalidTolerance(tolerance));
        }
        Ok(Self { color, tolerance })
    }

    pub fn distance(&self, rgb: [u8; 3]) -> f64 {
        let sq: f64 = rgb
            .iter()
            .zip(self.color.iter())
            .map(|(&a, &b)| {
                let d = a as f64 - b as f64;
                d * d
            })
            .sum();
        sq.sqrt()
    }

    pub fn matches(&self, rgb: [u8; 3]) -> bool {
        self.distance(rgb) <= self.tolerance
    }
}

/// Parse `#RRGGBB` (the leading `#` is optional).
pub fn parse_hex_color(text: &str) -> Result<[u8; 3]> {
    let hex = text.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ScanError::InvalidMarkerColor(text.to_string()));
    }
    let channel = |i: usize| {
        u8::from_str_radix(&hex[i..i + 2], 16)
            .map_err(|_| ScanError::InvalidMarkerColor(text.to_string()))
    };
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

/// Decoded raster, shape (height, width, channels).
#[derive(Debug, Clone)]
pub struct RasterTile {
    pixels: Array3<u8>,
}

impl RasterTile {
    pub fn from_raw(width: usize, height: usize, channels: usize, bytes: Vec<u8>) -> Result<Self> {
        if !(3..=4).contains(&channels) {
            return Err(ScanError::Decode(format!(
                "unsupported channel count {}",
                channels
            )));
        }
        let pixels = Array3::from_shape_vec((height, width, channels), bytes)
            .map_err(|e| {
                ScanError::Decode(format!(
                    "pixel buffer does not match {}x{}x{}: {}",
                    width, height, channels, e
                ))
            })?;
        Ok(Self { pixels })
    }

    /// Decode PNG bytes into an RGBA tile.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
            .map_err(|e| ScanError::Decode(e.to_string()))?
            .into_rgba8();
        let (width, height) = (rgba.width() as usize, rgba.height() as usize);
        if width == 0 || height == 0 {
            return Err(ScanError::Decode(format!("empty raster {}x{}", width, height)));
        }
        Self::from_raw(width, height, 4, rgba.into_raw())
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn channel_count(&self) -> usize {
        self.pixels.dim().2
    }
}

/// Outcome of classifying one building.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_marked: bool,
    pub marked_pixel_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Classification {
    pub fn from_count(marked_pixel_count: u64) -> Self {
        Self {
            is_marked: marked_pixel_count > 0,
            marked_pixel_count,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

/// Geographic position of a pixel centre.
///
/// Row 0 is the northern edge of the image.
pub fn pixel_to_lon_lat(
    row: usize,
    col: usize,
    width: usize,
    height: usize,
    bbox: &BoundingBox,
) -> LonLat {
    let x = (col as f64 + 0.5) / width as f64;
    let y = 1.0 - (row as f64 + 0.5) / height as f64;
    LonLat::new(
        bbox.min_lon + x * bbox.width(),
        bbox.min_lat + y * bbox.height(),
    )
}

/// Pixel `(row, col)` covering a position, or `None` outside the frame.
pub fn lon_lat_to_pixel(
    point: LonLat,
    width: usize,
    height: usize,
    bbox: &BoundingBox,
) -> Option<(usize, usize)> {
    if width == 0 || height == 0 {
        return None;
    }
    let x = (point.lon - bbox.min_lon) / bbox.width();
    let y = (bbox.max_lat - point.lat) / bbox.height();
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return None;
    }
    let col = ((x * width as f64) as usize).min(width - 1);
    let row = ((y * height as f64) as usize).min(height - 1);
    Some((row, col))
}

fn is_marker_pixel(pixel: ArrayView1<u8>, marker: &MarkerSpec) -> bool {
    if pixel.len() == 4 && pixel[3] == 0 {
        return false;
    }
    marker.matches([pixel[0], pixel[1], pixel[2]])
}

/// Count marker pixels of `tile` that fall inside `polygon`.
pub fn count_marked_pixels(
    tile: &RasterTile,
    bbox: &BoundingBox,
    polygon: &Polygon,
    marker: &MarkerSpec,
) -> u64 {
    let (height, width) = (tile.height(), tile.width());

    // Rows are independent, so scan them in parallel
    (0..height)
        .into_par_iter()
        .map(|row| {
            let mut count = 0u64;
            for col in 0..width {
                let pixel = tile.pixels.slice(ndarray::s![row, col, ..]);
                if !is_marker_pixel(pixel, marker) {
                    continue;
                }
                let position = pixel_to_lon_lat(row, col, width, height, bbox);
                if polygon.contains(position) {
                    count += 1;
                }
            }
            count
        })
        .sum()
}

/// Decode an imagery response and classify the building it frames.
pub fn classify(
    tile_bytes: &[u8],
    bbox: &BoundingBox,
    polygon: &Polygon,
    marker: &MarkerSpec,
) -> Result<Classification> {
    let tile = RasterTile::decode(tile_bytes)?;
    let count = count_marked_pixels(&tile, bbox, polygon, marker);
    debug!(
        "Classified {}x{} tile: {} marker pixels inside footprint",
        tile.width(),
        tile.height(),
        count
    );
    Ok(Classification::from_count(count))
}
