//! Per-object records: the in-progress draft, the committed collection and
//! the artifacts handed to the video generator.

use crate::error::AuthoringError;
use crate::geometry::Point;
use crate::keyframes::{Keyframe, KeyframeKind, KeyframeTrack};
use crate::mask::{self, decode_data_url, to_png_data_url, DecodedMask, RenderMode};
use crate::segmentation::{Letterbox, PointLabel, PointPrompt, Preprocessor, PriorMask};
use crate::surface::{Region, RenderSurface};
use crate::trajectory::{resample, Trajectory};
use crate::worker::WorkerHandle;
use anyhow::{Context, Result};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// One committed object, serialized with the field names hosts expect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentedMask {
    pub id: String,
    #[serde(rename = "maskCanvasURL")]
    pub mask_canvas_url: String,
    #[serde(rename = "binaryMaskURL")]
    pub binary_mask_url: String,
    pub name: String,
    pub centroid: Point,
    pub is_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trajectory: Option<Trajectory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation_keyframes: Option<KeyframeTrack>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_keyframes: Option<KeyframeTrack>,
    pub z_index: u32,
}

/// Per-frame control signals of one object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectArtifacts {
    pub positions: Vec<Point>,
    pub rotations: Vec<f32>,
    pub scales: Vec<f32>,
    pub mask_url: String,
}

impl SegmentedMask {
    fn keyframes_mut(&mut self, kind: KeyframeKind) -> &mut Option<KeyframeTrack> {
        match kind {
            KeyframeKind::Rotation => &mut self.rotation_keyframes,
            KeyframeKind::Scale => &mut self.scale_keyframes,
        }
    }

    pub fn keyframes(&self, kind: KeyframeKind) -> Option<&KeyframeTrack> {
        match kind {
            KeyframeKind::Rotation => self.rotation_keyframes.as_ref(),
            KeyframeKind::Scale => self.scale_keyframes.as_ref(),
        }
    }

    /// Expand into `frames` positions, rotations and scales
    ///
    /// An object without a trajectory stays at its centroid.
    pub fn artifacts(&self, frames: usize) -> ObjectArtifacts {
        let positions = match &self.trajectory {
            Some(t) if t.points.len() == frames => t.points.clone(),
            Some(t) if !t.points.is_empty() => resample(&t.points, frames),
            _ => vec![self.centroid; frames],
        };
        let expand = |kind: KeyframeKind| match self.keyframes(kind) {
            Some(track) => track.expand(frames, kind),
            None => vec![kind.default_value(); frames],
        };

        ObjectArtifacts {
            positions,
            rotations: expand(KeyframeKind::Rotation),
            scales: expand(KeyframeKind::Scale),
            mask_url: self.binary_mask_url.clone(),
        }
    }
}

/// The mask being refined click by click, before commit
#[derive(Debug, Default)]
pub struct MaskDraft {
    points: Vec<PointPrompt>,
    prior: Option<PriorMask>,
    decoded: Option<DecodedMask>,
    letterbox: Option<Letterbox>,
    image_hash: Option<String>,
}

impl MaskDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `region` of the surface and encode it; resets the draft
    pub async fn encode_from_surface<S: RenderSurface>(
        &mut self,
        worker: &WorkerHandle,
        surface: &S,
        region: Region,
        preprocessor: &Preprocessor,
    ) -> Result<()> {
        let pixels = surface
            .capture_region(region)
            .context("Failed to capture surface region")?;
        let rgb = DynamicImage::ImageRgba8(pixels).to_rgb8();
        let (tensor, letterbox) = preprocessor.preprocess(&rgb)?;

        let hash = worker
            .encode_image(tensor)
            .await
            .context("Failed to encode image")?;

        self.clear();
        self.letterbox = Some(letterbox);
        self.image_hash = Some(hash);
        Ok(())
    }

    /// Add a click already in encoder input space
    pub fn add_point(&mut self, point: PointPrompt) {
        self.points.push(point);
    }

    /// Add a click in source image space
    pub fn add_click(&mut self, at: Point, label: PointLabel) {
        let at = match &self.letterbox {
            Some(letterbox) => letterbox.to_model(at),
            None => at,
        };
        self.points.push(PointPrompt {
            x: at.x,
            y: at.y,
            label,
        });
    }

    pub fn points(&self) -> &[PointPrompt] {
        &self.points
    }

    pub fn prior(&self) -> Option<&PriorMask> {
        self.prior.as_ref()
    }

    pub fn decoded(&self) -> Option<&DecodedMask> {
        self.decoded.as_ref()
    }

    pub fn letterbox(&self) -> Option<&Letterbox> {
        self.letterbox.as_ref()
    }

    /// Decode every click so far, feeding back the previous best mask
    pub async fn refine(&mut self, worker: &WorkerHandle, mode: RenderMode) -> Result<Option<&DecodedMask>> {
        let tensor = worker
            .decode_mask(self.points.clone(), self.prior.clone(), self.image_hash.clone())
            .await
            .context("Failed to decode mask")?;

        match mask::postprocess(&tensor, self.letterbox.as_ref(), mode) {
            Some(decoded) => {
                self.accept(decoded);
                Ok(self.decoded.as_ref())
            }
            None => {
                tracing::warn!("Decoder returned no candidate masks");
                Ok(None)
            }
        }
    }

    /// Take a decode result as the current best mask
    pub fn accept(&mut self, decoded: DecodedMask) {
        self.prior = Some(decoded.prior.clone());
        self.decoded = Some(decoded);
    }

    /// Drop clicks and masks; the encoded image stays usable
    pub fn clear(&mut self) {
        self.points.clear();
        self.prior = None;
        self.decoded = None;
    }
}

/// All committed objects of one workbench
#[derive(Debug, Default)]
pub struct MaskCollection {
    masks: Vec<SegmentedMask>,
    next_z: u32,
}

impl MaskCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(masks: Vec<SegmentedMask>) -> Self {
        let next_z = masks.iter().map(|m| m.z_index + 1).max().unwrap_or(0);
        Self { masks, next_z }
    }

    pub fn records(&self) -> &[SegmentedMask] {
        &self.masks
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SegmentedMask> {
        self.masks.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut SegmentedMask, AuthoringError> {
        self.masks
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AuthoringError::UnknownMask(id.to_string()))
    }

    /// Turn the draft's current mask into a record and clear the draft
    pub fn commit(&mut self, draft: &mut MaskDraft, name: Option<String>) -> Result<&SegmentedMask, AuthoringError> {
        let decoded = draft.decoded.as_ref().ok_or(AuthoringError::EmptyDraft)?;

        let preview = match &decoded.preview {
            Some(preview) => to_png_data_url(preview)?,
            None => to_png_data_url(&mask::render_preview(&decoded.plane))?,
        };
        let binary = to_png_data_url(&decoded.binary)?;
        let centroid = decoded.centroid;

        let z_index = self.next_z;
        self.next_z += 1;
        let record = SegmentedMask {
            id: uuid::Uuid::new_v4().to_string(),
            mask_canvas_url: preview,
            binary_mask_url: binary,
            name: name.unwrap_or_else(|| format!("Object {}", self.masks.len() + 1)),
            centroid,
            is_applied: false,
            trajectory: None,
            rotation_keyframes: None,
            scale_keyframes: None,
            z_index,
        };
        draft.clear();

        tracing::info!(
            "Committed mask {} '{}' (centroid {:.1}, {:.1})",
            record.id,
            record.name,
            record.centroid.x,
            record.centroid.y
        );
        self.masks.push(record);
        Ok(&self.masks[self.masks.len() - 1])
    }

    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> Result<(), AuthoringError> {
        self.get_mut(id)?.name = name.into();
        Ok(())
    }

    pub fn set_applied(&mut self, id: &str, applied: bool) -> Result<(), AuthoringError> {
        self.get_mut(id)?.is_applied = applied;
        Ok(())
    }

    /// Composite the mask image onto the surface and mark it applied
    pub fn apply_to<S: RenderSurface>(&mut self, id: &str, surface: &mut S, opacity: f32) -> Result<(), AuthoringError> {
        let record = self.get_mut(id)?;
        let image = decode_data_url(&record.mask_canvas_url).map_err(AuthoringError::Surface)?;
        let size = image.dimensions();
        surface
            .add_layer(&image, Point::ZERO, size, opacity)
            .map_err(AuthoringError::Surface)?;
        record.is_applied = true;
        Ok(())
    }

    pub fn delete(&mut self, id: &str) -> Result<SegmentedMask, AuthoringError> {
        let index = self
            .masks
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| AuthoringError::UnknownMask(id.to_string()))?;
        Ok(self.masks.remove(index))
    }

    pub fn set_trajectory(&mut self, id: &str, trajectory: Option<Trajectory>) -> Result<(), AuthoringError> {
        self.get_mut(id)?.trajectory = trajectory;
        Ok(())
    }

    pub fn add_keyframe(&mut self, id: &str, kind: KeyframeKind, key: Keyframe) -> Result<(), AuthoringError> {
        self.get_mut(id)?
            .keyframes_mut(kind)
            .get_or_insert_with(KeyframeTrack::new)
            .insert(key);
        Ok(())
    }

    pub fn clear_keyframes(&mut self, id: &str, kind: KeyframeKind) -> Result<(), AuthoringError> {
        *self.get_mut(id)?.keyframes_mut(kind) = None;
        Ok(())
    }

    /// Per-object artifacts in paint order; empty when nothing was authored
    pub fn export(&self, frames: usize) -> Vec<ObjectArtifacts> {
        let mut ordered: Vec<&SegmentedMask> = self.masks.iter().collect();
        ordered.sort_by_key(|m| m.z_index);
        ordered.iter().map(|m| m.artifacts(frames)).collect()
    }
}
