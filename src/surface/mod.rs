mod image_surface;

pub use image_surface::{ImageOverlay, ImageSurface};

use crate::geometry::Point;
use anyhow::Result;
use image::RgbaImage;

/// Pan/zoom transform from content space to screen space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub pan_x: f32,
    pub pan_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    pub fn to_screen(&self, point: Point) -> Point {
        Point::new(point.x * self.zoom + self.pan_x, point.y * self.zoom + self.pan_y)
    }

    pub fn to_content(&self, point: Point) -> Point {
        Point::new(
            (point.x - self.pan_x) / self.zoom,
            (point.y - self.pan_y) / self.zoom,
        )
    }
}

/// Axis-aligned pixel rectangle in content space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// The main rendering surface the masks are authored on
pub trait RenderSurface {
    /// Rendered pixels of a region (clipped to the surface)
    fn capture_region(&self, region: Region) -> Result<RgbaImage>;

    /// Composite an image layer at a content-space position and size
    fn add_layer(&mut self, image: &RgbaImage, position: Point, size: (u32, u32), opacity: f32) -> Result<()>;

    /// Current pan/zoom
    fn viewport(&self) -> Viewport;
}

/// A transparent surface layered above the main one, owned by one preview
pub trait OverlaySurface {
    fn clear(&mut self);

    /// Draw `image` scaled by `scale` and centered on a screen-space point
    fn draw_centered(&mut self, image: &RgbaImage, center: Point, scale: f32) -> Result<()>;

    /// Finish the current frame
    fn present(&mut self) -> Result<()> {
        Ok(())
    }

    fn resolution(&self) -> (u32, u32);

    /// Release the surface; further draws are ignored
    fn dispose(&mut self);
}
