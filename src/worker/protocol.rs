//! Messages exchanged with the segmentation worker.
//!
//! The JSON form is `{"type": "...", "data": {...}}` so hosts that speak
//! the message protocol directly can be driven with the same types.

use crate::segmentation::{MaskTensor, PointPrompt};
use serde::{Deserialize, Serialize};

/// Host → worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerRequest {
    /// Load assets and sessions if needed, report readiness
    Ping,

    /// Run the encoder on a normalized `[1, 3, H, W]` image
    EncodeImage {
        #[serde(rename = "float32Array")]
        float32_array: Vec<f32>,
        shape: Vec<usize>,
    },

    /// Run the decoder with every click of the current draft
    DecodeMask {
        points: Vec<PointPrompt>,
        #[serde(rename = "maskArray", default, skip_serializing_if = "Option::is_none")]
        mask_array: Option<Vec<f32>>,
        #[serde(rename = "maskShape", default, skip_serializing_if = "Option::is_none")]
        mask_shape: Option<Vec<usize>>,
        /// Hash from `encodeImageDone`; a mismatch is rejected as stale
        #[serde(rename = "imageHash", default, skip_serializing_if = "Option::is_none")]
        image_hash: Option<String>,
    },
}

impl WorkerRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Ping => "ping",
            WorkerRequest::EncodeImage { .. } => "encodeImage",
            WorkerRequest::DecodeMask { .. } => "decodeMask",
        }
    }
}

/// Candidate masks as a flat tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskData {
    pub data: Vec<f32>,
    pub dims: Vec<usize>,
}

/// Worker → host, exactly one per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum WorkerResponse {
    Pong {
        success: bool,
        /// Backend the encoder runs on
        #[serde(skip_serializing_if = "Option::is_none")]
        device: Option<String>,
    },

    EncodeImageDone {
        #[serde(rename = "imageHash")]
        image_hash: String,
    },

    DecodeMaskResult {
        masks: MaskData,
        iou_predictions: Vec<f32>,
    },

    Error { message: String },
}

impl WorkerResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerResponse::Pong { .. } => "pong",
            WorkerResponse::EncodeImageDone { .. } => "encodeImageDone",
            WorkerResponse::DecodeMaskResult { .. } => "decodeMaskResult",
            WorkerResponse::Error { .. } => "error",
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        WorkerResponse::Error {
            message: message.into(),
        }
    }

    pub fn from_mask_tensor(tensor: MaskTensor) -> Self {
        WorkerResponse::DecodeMaskResult {
            masks: MaskData {
                data: tensor.data,
                dims: tensor.dims.to_vec(),
            },
            iou_predictions: tensor.scores,
        }
    }
}

impl TryFrom<(MaskData, Vec<f32>)> for MaskTensor {
    type Error = anyhow::Error;

    fn try_from((masks, scores): (MaskData, Vec<f32>)) -> anyhow::Result<Self> {
        let dims: [usize; 4] = masks
            .dims
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("mask dims must have 4 entries, got {:?}", masks.dims))?;
        MaskTensor::new(masks.data, dims, scores)
    }
}

/// Unsolicited progress notices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    DownloadInProgress,
    LoadingInProgress,
}
