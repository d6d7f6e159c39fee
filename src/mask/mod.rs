//! Mask Post-Processor: pure functions from raw decoder output to
//! render-ready images, a binary mask and a centroid.

mod encode;
pub mod morphology;

pub use encode::{decode_data_url, to_png_data_url};
pub use morphology::{enhance_edges, BinaryMask, EdgeEnhancement};

use crate::geometry::Point;
use crate::segmentation::{Letterbox, MaskTensor, PriorMask};
use image::{Rgba, RgbaImage};

/// Fill of the plain preview overlay
const PREVIEW_FILL: Rgba<u8> = Rgba([211, 211, 211, 255]);

/// One mask plane, row-major, values are logits (positive = inside)
#[derive(Debug, Clone, PartialEq)]
pub struct MaskPlane {
    pub values: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl MaskPlane {
    pub fn new(values: Vec<f32>, width: u32, height: u32) -> Self {
        debug_assert_eq!(values.len(), (width * height) as usize);
        Self {
            values,
            width,
            height,
        }
    }

    fn at(&self, x: u32, y: u32) -> f32 {
        self.values[(y * self.width + x) as usize]
    }
}

/// Index of the highest score; ties go to the first occurrence, NaN never wins
pub fn best_mask_index(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Plane `index` of a flat tensor whose planes are `stride` values long
pub fn slice_tensor(data: &[f32], index: usize, stride: usize) -> Option<&[f32]> {
    let start = index.checked_mul(stride)?;
    data.get(start..start.checked_add(stride)?)
}

/// Best-scoring candidate of a decode, as `(index, plane)`
pub fn best_plane(tensor: &MaskTensor) -> Option<(usize, MaskPlane)> {
    let index = best_mask_index(&tensor.scores)?;
    let values = slice_tensor(&tensor.data, index, tensor.stride())?;
    let plane = MaskPlane::new(values.to_vec(), tensor.width() as u32, tensor.height() as u32);
    Some((index, plane))
}

/// Bilinear resize of a plane without quantizing (logit signs survive)
pub fn resize_plane(plane: &MaskPlane, width: u32, height: u32) -> MaskPlane {
    if (plane.width, plane.height) == (width, height) {
        return plane.clone();
    }
    if plane.width == 0 || plane.height == 0 {
        return MaskPlane::new(vec![0.0; (width * height) as usize], width, height);
    }

    let sx = plane.width as f32 / width as f32;
    let sy = plane.height as f32 / height as f32;
    let max_x = (plane.width - 1) as f32;
    let max_y = (plane.height - 1) as f32;

    let mut values = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, max_y);
        let y0 = fy.floor() as u32;
        let y1 = (y0 + 1).min(plane.height - 1);
        let ty = fy - y0 as f32;
        for x in 0..width {
            let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, max_x);
            let x0 = fx.floor() as u32;
            let x1 = (x0 + 1).min(plane.width - 1);
            let tx = fx - x0 as f32;

            let top = plane.at(x0, y0) + (plane.at(x1, y0) - plane.at(x0, y0)) * tx;
            let bottom = plane.at(x0, y1) + (plane.at(x1, y1) - plane.at(x0, y1)) * tx;
            values.push(top + (bottom - top) * ty);
        }
    }
    MaskPlane::new(values, width, height)
}

/// Soft overlay: light gray inside, fully transparent outside
pub fn render_preview(plane: &MaskPlane) -> RgbaImage {
    RgbaImage::from_fn(plane.width, plane.height, |x, y| {
        if plane.at(x, y) > 0.0 {
            PREVIEW_FILL
        } else {
            Rgba([0, 0, 0, 0])
        }
    })
}

/// Opaque white inside, opaque black outside
pub fn render_binary(plane: &MaskPlane) -> RgbaImage {
    RgbaImage::from_fn(plane.width, plane.height, |x, y| {
        if plane.at(x, y) > 0.0 {
            Rgba([255, 255, 255, 255])
        } else {
            Rgba([0, 0, 0, 255])
        }
    })
}

/// Value-weighted mean position of the positive pixels; origin if none
pub fn centroid(plane: &MaskPlane) -> Point {
    let mut total = 0.0f64;
    let mut sum_x = 0.0f64;
    let mut sum_y = 0.0f64;

    for y in 0..plane.height {
        for x in 0..plane.width {
            let v = plane.at(x, y);
            if v > 0.0 {
                let w = v as f64;
                total += w;
                sum_x += x as f64 * w;
                sum_y += y as f64 * w;
            }
        }
    }

    if total == 0.0 {
        return Point::ZERO;
    }
    Point::new((sum_x / total) as f32, (sum_y / total) as f32)
}

/// How the preview image of a decode is produced
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RenderMode {
    /// Threshold only
    Plain,
    /// Morphological cleanup with a darkened outline
    Enhanced(EdgeEnhancement),
    /// No preview image at all (binary mask and centroid only)
    Hidden,
}

/// Everything derived from one decode
#[derive(Debug, Clone)]
pub struct DecodedMask {
    pub index: usize,
    pub score: f32,
    /// Best candidate at output resolution
    pub plane: MaskPlane,
    pub preview: Option<RgbaImage>,
    pub binary: RgbaImage,
    pub centroid: Point,
    /// Best candidate at decoder resolution, for the next refinement
    pub prior: PriorMask,
}

/// Best candidate → crop/resize → render → binary → centroid
///
/// With a letterbox the mask is mapped back onto the source image; without
/// one it stays at decoder resolution.
pub fn postprocess(
    tensor: &MaskTensor,
    letterbox: Option<&Letterbox>,
    mode: RenderMode,
) -> Option<DecodedMask> {
    let _span = tracing::debug_span!("postprocess").entered();

    let (index, raw) = best_plane(tensor)?;
    let prior = PriorMask {
        data: raw.values.clone(),
        shape: [1, 1, raw.height as usize, raw.width as usize],
    };

    let plane = match letterbox {
        Some(letterbox) => letterbox.crop_mask(&raw),
        None => raw,
    };

    let preview = match mode {
        RenderMode::Plain => Some(render_preview(&plane)),
        RenderMode::Enhanced(options) => Some(enhance_edges(&plane, &options)),
        RenderMode::Hidden => None,
    };

    tracing::debug!(
        "Selected mask {} (score {:.3}) of {}",
        index,
        tensor.scores[index],
        tensor.candidate_count()
    );

    Some(DecodedMask {
        index,
        score: tensor.scores[index],
        binary: render_binary(&plane),
        centroid: centroid(&plane),
        preview,
        plane,
        prior,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_3x2x2(scores: Vec<f32>) -> MaskTensor {
        let data = vec![
            1.0, -1.0, -1.0, -1.0, // candidate 0
            -1.0, 2.0, -1.0, 2.0, // candidate 1
            3.0, 3.0, 3.0, -3.0, // candidate 2
        ];
        MaskTensor::new(data, [1, 3, 2, 2], scores).unwrap()
    }

    #[test]
    fn test_best_mask_index_is_stable_argmax() {
        assert_eq!(best_mask_index(&[0.1, 0.9, 0.5]), Some(1));
        assert_eq!(best_mask_index(&[0.7, 0.2, 0.7]), Some(0));
        assert_eq!(best_mask_index(&[f32::NAN, 0.3, 0.2]), Some(1));
        assert_eq!(best_mask_index(&[-0.5, -0.2]), Some(1));
        assert_eq!(best_mask_index(&[]), None);
    }

    #[test]
    fn test_best_plane_matches_slice() {
        let tensor = tensor_3x2x2(vec![0.2, 0.3, 0.9]);
        let (index, plane) = best_plane(&tensor).unwrap();
        assert_eq!(index, 2);
        assert_eq!(plane.values, slice_tensor(&tensor.data, 2, 4).unwrap());
        assert_eq!(plane.values, vec![3.0, 3.0, 3.0, -3.0]);
    }

    #[test]
    fn test_slice_out_of_range() {
        let data = [0.0; 8];
        assert_eq!(slice_tensor(&data, 1, 4).map(<[f32]>::len), Some(4));
        assert!(slice_tensor(&data, 2, 4).is_none());
        assert!(slice_tensor(&data, usize::MAX, 4).is_none());
    }

    #[test]
    fn test_render_preview_and_binary() {
        let plane = MaskPlane::new(vec![0.5, 0.0, -2.0, 4.0], 2, 2);

        let preview = render_preview(&plane);
        assert_eq!(preview.get_pixel(0, 0), &PREVIEW_FILL);
        assert_eq!(preview.get_pixel(1, 0)[3], 0, "zero is outside");
        assert_eq!(preview.get_pixel(0, 1)[3], 0);

        let binary = render_binary(&plane);
        assert_eq!(binary.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(binary.get_pixel(1, 0).0, [0, 0, 0, 255]);
        assert_eq!(binary.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_centroid_of_empty_mask_is_origin() {
        let plane = MaskPlane::new(vec![0.0; 16], 4, 4);
        assert_eq!(centroid(&plane), Point::ZERO);
        let negative = MaskPlane::new(vec![-5.0; 16], 4, 4);
        assert_eq!(centroid(&negative), Point::ZERO);
    }

    #[test]
    fn test_centroid_of_single_pixel_is_exact() {
        let mut values = vec![0.0; 7 * 5];
        values[3 * 7 + 5] = 0.8;
        let plane = MaskPlane::new(values, 7, 5);
        assert_eq!(centroid(&plane), Point::new(5.0, 3.0));
    }

    #[test]
    fn test_centroid_is_weighted() {
        // weight 1 at x=0, weight 3 at x=4 → x = 12/4 = 3
        let mut values = vec![0.0; 5];
        values[0] = 1.0;
        values[4] = 3.0;
        let plane = MaskPlane::new(values, 5, 1);
        assert_eq!(centroid(&plane), Point::new(3.0, 0.0));
    }

    #[test]
    fn test_resize_plane_keeps_sign() {
        let plane = MaskPlane::new(vec![-4.0, 4.0, -4.0, 4.0], 2, 2);
        let up = resize_plane(&plane, 4, 4);
        assert_eq!((up.width, up.height), (4, 4));
        assert!(up.values[0] < 0.0 && up.values[3] > 0.0);
        assert!(up.values.iter().all(|v| (-4.0..=4.0).contains(v)));

        assert_eq!(resize_plane(&plane, 2, 2), plane);
    }

    #[test]
    fn test_postprocess_without_letterbox() {
        let tensor = tensor_3x2x2(vec![0.1, 0.8, 0.3]);
        let decoded = postprocess(&tensor, None, RenderMode::Plain).unwrap();

        assert_eq!(decoded.index, 1);
        assert_eq!(decoded.prior.shape, [1, 1, 2, 2]);
        assert_eq!(decoded.prior.data, vec![-1.0, 2.0, -1.0, 2.0]);
        assert_eq!(decoded.centroid, Point::new(1.0, 0.5));
        assert!(decoded.preview.is_some());

        let hidden = postprocess(&tensor, None, RenderMode::Hidden).unwrap();
        assert!(hidden.preview.is_none());
    }

    #[test]
    fn test_postprocess_with_no_candidates() {
        let tensor = MaskTensor::new(vec![], [1, 0, 2, 2], vec![]).unwrap();
        assert!(postprocess(&tensor, None, RenderMode::Plain).is_none());
    }
}
