//! Animation preview: walks each object's trajectory on its own overlay.

use crate::authoring::SegmentedMask;
use crate::geometry::Point;
use crate::keyframes::KeyframeKind;
use crate::mask::decode_data_url;
use crate::surface::{OverlaySurface, Viewport};
use anyhow::Result;
use image::RgbaImage;
use std::collections::HashMap;
use std::time::Duration;

/// Fraction of the cycle reached after `elapsed`, in `[0, 1)`
pub fn cycle_progress(elapsed: Duration, cycle: Duration) -> f32 {
    if cycle.is_zero() {
        return 0.0;
    }
    let cycle_ns = cycle.as_nanos();
    (elapsed.as_nanos() % cycle_ns) as f32 / cycle_ns as f32
}

/// Interpolated sample of an evenly spaced sequence at `progress`
fn sample<T: Copy>(values: &[T], progress: f32, lerp: impl Fn(T, T, f32) -> T) -> Option<T> {
    let last = values.len().checked_sub(1)?;
    if last == 0 {
        return Some(values[0]);
    }
    let f = progress.clamp(0.0, 1.0) * last as f32;
    let i = (f.floor() as usize).min(last);
    let next = (i + 1).min(last);
    Some(lerp(values[i], values[next], f - i as f32))
}

/// One repeating preview of one mask
pub struct PreviewLoop<O: OverlaySurface> {
    points: Vec<Point>,
    scales: Option<Vec<f32>>,
    image: Option<RgbaImage>,
    overlay: O,
    cycle: Duration,
}

impl<O: OverlaySurface> PreviewLoop<O> {
    /// A mask image that fails to decode leaves the loop drawing nothing
    pub fn new(points: Vec<Point>, mask_url: &str, overlay: O, cycle: Duration) -> Self {
        let image = match decode_data_url(mask_url) {
            Ok(image) => Some(image),
            Err(e) => {
                tracing::warn!("Preview mask image unusable, drawing nothing: {:#}", e);
                None
            }
        };
        Self {
            points,
            scales: None,
            image,
            overlay,
            cycle,
        }
    }

    /// Preview a committed mask; `None` if it has no trajectory yet
    pub fn for_mask(mask: &SegmentedMask, overlay: O, cycle: Duration) -> Option<Self> {
        let trajectory = mask.trajectory.as_ref()?;
        let mut preview = Self::new(trajectory.points.clone(), &mask.mask_canvas_url, overlay, cycle);
        if let Some(track) = &mask.scale_keyframes {
            preview.scales = Some(track.expand(trajectory.frame_count(), KeyframeKind::Scale));
        }
        Some(preview)
    }

    pub fn with_scales(mut self, scales: Vec<f32>) -> Self {
        self.scales = Some(scales);
        self
    }

    pub fn overlay(&self) -> &O {
        &self.overlay
    }

    /// Content-space position at a fraction of the trajectory
    pub fn position_at(&self, progress: f32) -> Option<Point> {
        sample(&self.points, progress, Point::lerp)
    }

    fn scale_at(&self, progress: f32) -> f32 {
        self.scales
            .as_deref()
            .and_then(|scales| sample(scales, progress, |a, b, t| a + (b - a) * t))
            .unwrap_or(1.0)
    }

    /// Draw the frame for `elapsed` time since the loop started
    pub fn tick(&mut self, elapsed: Duration, viewport: &Viewport) -> Result<()> {
        let progress = cycle_progress(elapsed, self.cycle);
        self.overlay.clear();

        if let (Some(image), Some(position)) = (&self.image, self.position_at(progress)) {
            let center = viewport.to_screen(position);
            let scale = viewport.zoom * self.scale_at(progress);
            self.overlay.draw_centered(image, center, scale)?;
        }

        self.overlay.present()
    }

    /// Release the overlay and hand it back
    pub fn stop(mut self) -> O {
        self.overlay.dispose();
        self.overlay
    }
}

/// Independent previews keyed by mask id
pub struct PreviewSet<O: OverlaySurface> {
    loops: HashMap<String, (Duration, PreviewLoop<O>)>,
}

impl<O: OverlaySurface> Default for PreviewSet<O> {
    fn default() -> Self {
        Self {
            loops: HashMap::new(),
        }
    }
}

impl<O: OverlaySurface> PreviewSet<O> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.loops.contains_key(id)
    }

    /// Start (or restart) the preview for `id`, with its cycle beginning at `now`
    pub fn start(&mut self, id: impl Into<String>, preview: PreviewLoop<O>, now: Duration) {
        let id = id.into();
        tracing::debug!("Starting preview for {}", id);
        if let Some((_, previous)) = self.loops.insert(id, (now, preview)) {
            previous.stop();
        }
    }

    /// Stop one preview and dispose its overlay; other loops keep running
    pub fn stop(&mut self, id: &str) -> Option<O> {
        let (_, preview) = self.loops.remove(id)?;
        tracing::debug!("Stopped preview for {}", id);
        Some(preview.stop())
    }

    pub fn stop_all(&mut self) {
        for (_, (_, preview)) in self.loops.drain() {
            preview.stop();
        }
    }

    /// Advance every loop to `now`; a failing loop is logged and skipped
    pub fn tick(&mut self, now: Duration, viewport: &Viewport) {
        for (id, (started, preview)) in self.loops.iter_mut() {
            if let Err(e) = preview.tick(now.saturating_sub(*started), viewport) {
                tracing::warn!("Preview {} failed to draw: {:#}", id, e);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&PreviewLoop<O>> {
        self.loops.get(id).map(|(_, preview)| preview)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::to_png_data_url;
    use image::Rgba;

    /// Records draws instead of rendering them
    #[derive(Default)]
    struct RecordingOverlay {
        draws: Vec<(Point, f32)>,
        presents: usize,
        disposed: bool,
    }

    impl OverlaySurface for RecordingOverlay {
        fn clear(&mut self) {}

        fn draw_centered(&mut self, _image: &RgbaImage, center: Point, scale: f32) -> Result<()> {
            self.draws.push((center, scale));
            Ok(())
        }

        fn present(&mut self) -> Result<()> {
            self.presents += 1;
            Ok(())
        }

        fn resolution(&self) -> (u32, u32) {
            (100, 100)
        }

        fn dispose(&mut self) {
            self.disposed = true;
        }
    }

    fn mask_url() -> String {
        to_png_data_url(&RgbaImage::from_pixel(2, 2, Rgba([211, 211, 211, 255]))).unwrap()
    }

    fn line() -> Vec<Point> {
        (0..5).map(|i| Point::new(i as f32 * 10.0, 0.0)).collect()
    }

    #[test]
    fn test_cycle_progress_wraps() {
        let cycle = Duration::from_millis(2000);
        assert_eq!(cycle_progress(Duration::ZERO, cycle), 0.0);
        assert_eq!(cycle_progress(Duration::from_millis(500), cycle), 0.25);
        assert_eq!(cycle_progress(Duration::from_millis(2500), cycle), 0.25);
        assert_eq!(cycle_progress(Duration::from_millis(10), Duration::ZERO), 0.0);
    }

    #[test]
    fn test_position_brackets_samples() {
        let preview = PreviewLoop::new(line(), &mask_url(), RecordingOverlay::default(), Duration::from_secs(1));
        assert_eq!(preview.position_at(0.0), Some(Point::new(0.0, 0.0)));
        assert_eq!(preview.position_at(0.5), Some(Point::new(20.0, 0.0)));
        assert_eq!(preview.position_at(0.625), Some(Point::new(25.0, 0.0)));
        assert_eq!(preview.position_at(1.0), Some(Point::new(40.0, 0.0)));
    }

    #[test]
    fn test_tick_maps_through_viewport() {
        let mut preview = PreviewLoop::new(line(), &mask_url(), RecordingOverlay::default(), Duration::from_secs(2))
            .with_scales(vec![1.0, 1.0, 3.0, 1.0, 1.0]);
        let viewport = Viewport {
            pan_x: 5.0,
            pan_y: 1.0,
            zoom: 2.0,
        };

        preview.tick(Duration::from_secs(1), &viewport).unwrap();
        let (center, scale) = preview.overlay().draws[0];
        assert_eq!(center, Point::new(45.0, 1.0));
        assert_eq!(scale, 6.0);
    }

    #[test]
    fn test_broken_image_keeps_loop_running() {
        let mut preview = PreviewLoop::new(line(), "data:image/png;base64,AAAA", RecordingOverlay::default(), Duration::from_secs(1));
        preview.tick(Duration::from_millis(100), &Viewport::default()).unwrap();
        preview.tick(Duration::from_millis(200), &Viewport::default()).unwrap();
        assert!(preview.overlay().draws.is_empty());
        assert_eq!(preview.overlay().presents, 2);
    }

    #[test]
    fn test_stopping_one_preview_leaves_others() {
        let mut set = PreviewSet::new();
        let cycle = Duration::from_secs(1);
        set.start("a", PreviewLoop::new(line(), &mask_url(), RecordingOverlay::default(), cycle), Duration::ZERO);
        set.start("b", PreviewLoop::new(line(), &mask_url(), RecordingOverlay::default(), cycle), Duration::from_millis(500));

        set.tick(Duration::from_millis(500), &Viewport::default());
        assert_eq!(set.get("a").unwrap().overlay().draws[0].0, Point::new(20.0, 0.0));
        assert_eq!(set.get("b").unwrap().overlay().draws[0].0, Point::new(0.0, 0.0));

        let stopped = set.stop("a").unwrap();
        assert!(stopped.disposed);
        assert!(set.stop("a").is_none());
        assert!(set.is_running("b"));

        set.tick(Duration::from_millis(600), &Viewport::default());
        assert_eq!(set.get("b").unwrap().overlay().presents, 2);
    }
}
