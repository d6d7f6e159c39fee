use super::{OverlaySurface, Region, RenderSurface, Viewport};
use crate::geometry::Point;
use anyhow::{bail, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use std::path::{Path, PathBuf};

/// In-memory main surface backed by a single RGBA canvas
pub struct ImageSurface {
    canvas: RgbaImage,
    viewport: Viewport,
}

impl ImageSurface {
    pub fn new(canvas: RgbaImage) -> Self {
        Self {
            canvas,
            viewport: Viewport::default(),
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn into_canvas(self) -> RgbaImage {
        self.canvas
    }
}

impl RenderSurface for ImageSurface {
    fn capture_region(&self, region: Region) -> Result<RgbaImage> {
        let (width, height) = self.canvas.dimensions();
        if region.x >= width || region.y >= height {
            bail!(
                "Region at ({}, {}) lies outside the {}x{} surface",
                region.x,
                region.y,
                width,
                height
            );
        }
        let w = region.width.min(width - region.x);
        let h = region.height.min(height - region.y);
        Ok(imageops::crop_imm(&self.canvas, region.x, region.y, w, h).to_image())
    }

    fn add_layer(&mut self, image: &RgbaImage, position: Point, size: (u32, u32), opacity: f32) -> Result<()> {
        if size.0 == 0 || size.1 == 0 {
            bail!("Layer size must be non-zero, got {}x{}", size.0, size.1);
        }

        // Resize layer if needed
        let mut layer = if image.dimensions() != size {
            imageops::resize(image, size.0, size.1, FilterType::Lanczos3)
        } else {
            image.clone()
        };

        let opacity = opacity.clamp(0.0, 1.0);
        if opacity < 1.0 {
            for pixel in layer.pixels_mut() {
                pixel[3] = (pixel[3] as f32 * opacity).round() as u8;
            }
        }

        imageops::overlay(
            &mut self.canvas,
            &layer,
            position.x.round() as i64,
            position.y.round() as i64,
        );
        Ok(())
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }
}

/// In-memory overlay that can write every presented frame as a PNG
pub struct ImageOverlay {
    frame: RgbaImage,
    dump_dir: Option<PathBuf>,
    frames_presented: u64,
    disposed: bool,
}

impl ImageOverlay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbaImage::new(width, height),
            dump_dir: None,
            frames_presented: 0,
            disposed: false,
        }
    }

    /// Write each presented frame to `dir/frame_NNNNN.png`
    pub fn dump_to<P: AsRef<Path>>(mut self, dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create frame directory {}", dir.display()))?;
        tracing::info!("Dumping overlay frames to {}", dir.display());
        self.dump_dir = Some(dir.to_path_buf());
        Ok(self)
    }

    pub fn frame(&self) -> &RgbaImage {
        &self.frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl OverlaySurface for ImageOverlay {
    fn clear(&mut self) {
        for pixel in self.frame.pixels_mut() {
            pixel.0 = [0, 0, 0, 0];
        }
    }

    fn draw_centered(&mut self, image: &RgbaImage, center: Point, scale: f32) -> Result<()> {
        if self.disposed {
            return Ok(());
        }

        let (w, h) = image.dimensions();
        let scaled_w = (w as f32 * scale).round().max(0.0) as u32;
        let scaled_h = (h as f32 * scale).round().max(0.0) as u32;
        if scaled_w == 0 || scaled_h == 0 {
            return Ok(());
        }

        let scaled;
        let layer = if (scaled_w, scaled_h) != (w, h) {
            scaled = imageops::resize(image, scaled_w, scaled_h, FilterType::Triangle);
            &scaled
        } else {
            image
        };

        let x = (center.x - scaled_w as f32 / 2.0).round() as i64;
        let y = (center.y - scaled_h as f32 / 2.0).round() as i64;
        imageops::overlay(&mut self.frame, layer, x, y);
        Ok(())
    }

    fn present(&mut self) -> Result<()> {
        if self.disposed {
            return Ok(());
        }
        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("frame_{:05}.png", self.frames_presented));
            self.frame
                .save(&path)
                .with_context(|| format!("Failed to write frame to {}", path.display()))?;
        }
        self.frames_presented += 1;
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn dispose(&mut self) {
        if !self.disposed {
            tracing::debug!("Overlay disposed after {} frames", self.frames_presented);
            self.disposed = true;
            self.clear();
        }
    }
}
