use super::types::ImageTensor;
use crate::geometry::Point;
use crate::mask::{resize_plane, MaskPlane};
use anyhow::Result;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// ImageNet statistics the encoder was trained with
const PIXEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const PIXEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Placement of a source image inside the square encoder input
///
/// The longer side fills the square exactly; the shorter side is scaled by
/// the same factor and centered, leaving equal padding on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub source_width: u32,
    pub source_height: u32,
    pub size: u32,
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl Letterbox {
    pub fn compute(source_width: u32, source_height: u32, size: u32) -> Self {
        let longest = source_width.max(source_height).max(1);
        let scale = size as f32 / longest as f32;
        let scaled_width = ((source_width as f32 * scale).round() as u32).clamp(1, size);
        let scaled_height = ((source_height as f32 * scale).round() as u32).clamp(1, size);

        Self {
            source_width,
            source_height,
            size,
            scale,
            scaled_width,
            scaled_height,
            pad_x: (size - scaled_width) / 2,
            pad_y: (size - scaled_height) / 2,
        }
    }

    /// Source pixel coordinates to encoder input coordinates
    pub fn to_model(&self, point: Point) -> Point {
        Point::new(
            point.x * self.scale + self.pad_x as f32,
            point.y * self.scale + self.pad_y as f32,
        )
    }

    /// Encoder input coordinates back to source pixel coordinates
    pub fn to_source(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.pad_x as f32) / self.scale,
            (point.y - self.pad_y as f32) / self.scale,
        )
    }

    /// Map a mask covering the whole square input back onto the source image
    ///
    /// The plane may be at any square resolution (the decoder emits low-res
    /// masks); it is scaled to the input size, the padding is cut away and
    /// the remaining content is scaled to the source dimensions.
    pub fn crop_mask(&self, plane: &MaskPlane) -> MaskPlane {
        let _span = tracing::debug_span!("crop_mask").entered();

        let square = resize_plane(plane, self.size, self.size);
        let mut content = Vec::with_capacity((self.scaled_width * self.scaled_height) as usize);
        for y in self.pad_y..self.pad_y + self.scaled_height {
            let row = (y * self.size) as usize;
            let start = row + self.pad_x as usize;
            content.extend_from_slice(&square.values[start..start + self.scaled_width as usize]);
        }

        let content = MaskPlane::new(content, self.scaled_width, self.scaled_height);
        resize_plane(&content, self.source_width, self.source_height)
    }
}

/// Preprocessor for converting RGB images to encoder input tensors
pub struct Preprocessor {
    size: u32,
}

impl Preprocessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Preprocess an RGB image into a normalized, letterboxed NCHW tensor
    ///
    /// Steps:
    /// 1. Scale so the longer side equals the input size
    /// 2. Normalize with the ImageNet mean/std
    /// 3. Write into the centered region of a zero-filled square, NCHW
    ///
    /// Returns the tensor with shape [1, 3, size, size] and the letterbox
    /// needed to map clicks and masks between the two spaces.
    pub fn preprocess(&self, image: &RgbImage) -> Result<(ImageTensor, Letterbox)> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (width, height) = image.dimensions();
        let letterbox = Letterbox::compute(width, height, self.size);

        let resized = if (width, height) != (letterbox.scaled_width, letterbox.scaled_height) {
            imageops::resize(
                image,
                letterbox.scaled_width,
                letterbox.scaled_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let size = self.size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let tx = (x + letterbox.pad_x) as usize;
            let ty = (y + letterbox.pad_y) as usize;
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, ty, tx]] = (value - PIXEL_MEAN[c]) / PIXEL_STD[c];
            }
        }

        let (data, _) = tensor.into_raw_vec_and_offset();
        let tensor = ImageTensor::new(data, [1, 3, size, size])?;
        Ok((tensor, letterbox))
    }
}
