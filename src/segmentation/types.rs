use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};

/// Whether a click marks the object or the area around it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PointLabel {
    Background,
    Foreground,
}

impl From<PointLabel> for u8 {
    fn from(label: PointLabel) -> u8 {
        match label {
            PointLabel::Background => 0,
            PointLabel::Foreground => 1,
        }
    }
}

impl TryFrom<u8> for PointLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PointLabel::Background),
            1 => Ok(PointLabel::Foreground),
            other => Err(format!("point label must be 0 or 1, got {other}")),
        }
    }
}

impl PointLabel {
    pub fn as_f32(self) -> f32 {
        u8::from(self) as f32
    }
}

/// A click hint for the decoder, in encoder input space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPrompt {
    pub x: f32,
    pub y: f32,
    pub label: PointLabel,
}

impl PointPrompt {
    pub fn foreground(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            label: PointLabel::Foreground,
        }
    }

    pub fn background(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            label: PointLabel::Background,
        }
    }
}

impl std::str::FromStr for PointPrompt {
    type Err = String;

    /// Parses `"x,y"` (foreground) or `"x,y,label"`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let coord = |v: &str| v.parse::<f32>().map_err(|e| format!("bad coordinate '{v}': {e}"));
        match parts.as_slice() {
            [x, y] => Ok(PointPrompt::foreground(coord(x)?, coord(y)?)),
            [x, y, label] => {
                let label = label
                    .parse::<u8>()
                    .map_err(|e| format!("bad label '{label}': {e}"))
                    .and_then(PointLabel::try_from)?;
                Ok(PointPrompt {
                    x: coord(x)?,
                    y: coord(y)?,
                    label,
                })
            }
            _ => Err(format!("expected x,y[,label] but got '{s}'")),
        }
    }
}

/// Normalized NCHW image ready for the encoder, shape `[1, 3, H, W]`
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

impl ImageTensor {
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        ensure!(
            shape[0] == 1 && shape[1] == 3,
            "image tensor must be [1, 3, H, W], got {:?}",
            shape
        );
        ensure!(
            data.len() == shape.iter().product::<usize>(),
            "image tensor has {} values but shape {:?}",
            data.len(),
            shape
        );
        Ok(Self { data, shape })
    }
}

/// Previous decode output fed back for refinement, shape `[1, 1, H, W]`
#[derive(Debug, Clone, PartialEq)]
pub struct PriorMask {
    pub data: Vec<f32>,
    pub shape: [usize; 4],
}

impl PriorMask {
    pub fn new(data: Vec<f32>, shape: [usize; 4]) -> Result<Self> {
        ensure!(
            shape[0] == 1 && shape[1] == 1,
            "prior mask must be [1, 1, H, W], got {:?}",
            shape
        );
        ensure!(
            data.len() == shape.iter().product::<usize>(),
            "prior mask has {} values but shape {:?}",
            data.len(),
            shape
        );
        Ok(Self { data, shape })
    }
}

/// Raw decoder output: candidate masks `[batch, candidates, H, W]` plus one
/// IOU prediction per candidate
#[derive(Debug, Clone, PartialEq)]
pub struct MaskTensor {
    pub data: Vec<f32>,
    pub dims: [usize; 4],
    pub scores: Vec<f32>,
}

impl MaskTensor {
    pub fn new(data: Vec<f32>, dims: [usize; 4], scores: Vec<f32>) -> Result<Self> {
        ensure!(
            data.len() == dims.iter().product::<usize>(),
            "mask tensor has {} values but dims {:?}",
            data.len(),
            dims
        );
        ensure!(
            scores.len() == dims[1],
            "{} IOU scores for {} candidate masks",
            scores.len(),
            dims[1]
        );
        Ok(Self { data, dims, scores })
    }

    pub fn candidate_count(&self) -> usize {
        self.dims[1]
    }

    pub fn height(&self) -> usize {
        self.dims[2]
    }

    pub fn width(&self) -> usize {
        self.dims[3]
    }

    /// Values per candidate plane
    pub fn stride(&self) -> usize {
        self.width() * self.height()
    }
}

/// Trait for promptable segmentation models
///
/// The encoder runs once per image, the decoder once per prompt refinement.
/// Implementations keep the encoder embeddings between the two.
pub trait SegmentationModel {
    /// Run the encoder and keep its embeddings for subsequent decodes
    fn encode(&mut self, image: &ImageTensor) -> Result<()>;

    /// Run the decoder against the cached embeddings
    ///
    /// # Arguments
    /// * `points` - Every click of the in-progress mask, in order
    /// * `prior` - Previous best mask, if refining
    fn decode(&mut self, points: &[PointPrompt], prior: Option<&PriorMask>) -> Result<MaskTensor>;

    /// Drop cached embeddings
    fn reset_state(&mut self) {
        // Default implementation: nothing cached
    }

    /// Side length of the square encoder input
    fn input_size(&self) -> u32;
}
