//! Binary morphology used to clean up the preview mask before display.
//!
//! Opening (erosion then dilation with the same radius) removes specks
//! smaller than the structuring element while leaving the main blob at its
//! original size. The border pass only changes colors, never the shape.

use super::MaskPlane;
use image::{imageops, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// Foreground fill of the enhanced preview
const FILL: [u8; 3] = [211, 211, 211];

/// Parameters for [`enhance_edges`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeEnhancement {
    /// Specks up to roughly this many pixels across are removed
    pub pixel_threshold: u32,
    /// Width of the darkened outline, in pixels
    pub border_width: u32,
    /// Brightness reduction of outline pixels (0.4 = 40% darker)
    pub border_darken: f32,
    /// Gaussian blur applied last, if any
    pub blur_sigma: Option<f32>,
}

impl Default for EdgeEnhancement {
    fn default() -> Self {
        Self {
            pixel_threshold: 4,
            border_width: 2,
            border_darken: 0.4,
            blur_sigma: None,
        }
    }
}

/// Thresholded mask: `true` where the mask value is positive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    pub width: u32,
    pub height: u32,
    pub bits: Vec<bool>,
}

impl BinaryMask {
    pub fn from_plane(plane: &MaskPlane) -> Self {
        Self {
            width: plane.width,
            height: plane.height,
            bits: plane.values.iter().map(|&v| v > 0.0).collect(),
        }
    }

    /// Out-of-bounds reads as background
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.bits[(y * self.width as i64 + x) as usize]
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    fn map<F: Fn(i64, i64) -> bool>(&self, f: F) -> Self {
        let mut bits = Vec::with_capacity(self.bits.len());
        for y in 0..self.height as i64 {
            for x in 0..self.width as i64 {
                bits.push(f(x, y));
            }
        }
        Self {
            width: self.width,
            height: self.height,
            bits,
        }
    }
}

/// Erosion radius for a speck-size threshold. Floors, so thresholds 0 and 1
/// give radius 0 (the pixel itself) and leave the mask untouched.
pub fn erosion_radius(pixel_threshold: u32) -> u32 {
    pixel_threshold / 2
}

/// Offsets inside a disc of `radius`
fn disk(radius: u32) -> Vec<(i64, i64)> {
    let r = radius as i64;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                offsets.push((dx, dy));
            }
        }
    }
    offsets
}

/// Keep a pixel only if its whole circular neighborhood is foreground
pub fn erode(mask: &BinaryMask, radius: u32) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    let offsets = disk(radius);
    mask.map(|x, y| offsets.iter().all(|&(dx, dy)| mask.get(x + dx, y + dy)))
}

/// Set a pixel if anything in its circular neighborhood is foreground
pub fn dilate(mask: &BinaryMask, radius: u32) -> BinaryMask {
    if radius == 0 {
        return mask.clone();
    }
    let offsets = disk(radius);
    mask.map(|x, y| offsets.iter().any(|&(dx, dy)| mask.get(x + dx, y + dy)))
}

/// Erosion followed by dilation with the same radius
pub fn open(mask: &BinaryMask, radius: u32) -> BinaryMask {
    dilate(&erode(mask, radius), radius)
}

/// Foreground pixels within `width` (chessboard distance) of an in-bounds
/// background pixel
pub fn border_ring(mask: &BinaryMask, width: u32) -> Vec<bool> {
    let w = width as i64;
    let (mw, mh) = (mask.width as i64, mask.height as i64);
    let mut ring = vec![false; mask.bits.len()];
    if w == 0 {
        return ring;
    }

    for y in 0..mh {
        for x in 0..mw {
            if !mask.get(x, y) {
                continue;
            }
            'search: for ny in (y - w).max(0)..=(y + w).min(mh - 1) {
                for nx in (x - w).max(0)..=(x + w).min(mw - 1) {
                    if !mask.get(nx, ny) {
                        ring[(y * mw + x) as usize] = true;
                        break 'search;
                    }
                }
            }
        }
    }
    ring
}

/// Render a cleaned-up preview: open, outline, optionally blur
pub fn enhance_edges(plane: &MaskPlane, options: &EdgeEnhancement) -> RgbaImage {
    let _span = tracing::debug_span!("enhance_edges").entered();

    let radius = erosion_radius(options.pixel_threshold);
    let opened = open(&BinaryMask::from_plane(plane), radius);
    let ring = border_ring(&opened, options.border_width);

    let keep = (1.0 - options.border_darken).clamp(0.0, 1.0);
    let outline = FILL.map(|c| (c as f32 * keep).round() as u8);

    let image = RgbaImage::from_fn(plane.width, plane.height, |x, y| {
        let idx = (y * plane.width + x) as usize;
        if !opened.bits[idx] {
            Rgba([0, 0, 0, 0])
        } else if ring[idx] {
            Rgba([outline[0], outline[1], outline[2], 255])
        } else {
            Rgba([FILL[0], FILL[1], FILL[2], 255])
        }
    });

    match options.blur_sigma {
        Some(sigma) if sigma > 0.0 => imageops::blur(&image, sigma),
        _ => image,
    }
}
