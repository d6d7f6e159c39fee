use super::types::{ImageTensor, MaskTensor, PointPrompt, PriorMask, SegmentationModel};
use anyhow::{anyhow, bail, Context, Result};
use ort::session::Session;
use ort::value::{DynValue, Tensor};

/// Side length of the encoder input
pub const SAM_INPUT_SIZE: u32 = 1024;

/// Side length of the decoder's mask input/output channel
pub const SAM_MASK_SIZE: usize = 256;

/// One encoder output kept for the decoder
#[derive(Debug, Clone)]
struct Embedding {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Embedding {
    fn extract(value: Option<&DynValue>, name: &str) -> Result<Self> {
        let value = value.ok_or_else(|| anyhow!("Encoder produced no '{name}' output"))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .with_context(|| format!("Failed to extract encoder output '{name}'"))?;
        Ok(Self {
            shape: shape.iter().map(|&d| d as usize).collect(),
            data: data.to_vec(),
        })
    }

    fn to_tensor(&self) -> Result<Tensor<f32>> {
        Tensor::from_array((self.shape.clone(), self.data.clone().into_boxed_slice()))
            .map_err(|e| anyhow!("ORT tensor: {e}"))
    }
}

/// Encoder outputs reused by every decode of the same image
#[derive(Debug, Clone)]
struct ImageEmbeddings {
    high_res_feats_0: Embedding,
    high_res_feats_1: Embedding,
    image_embed: Embedding,
}

/// Two-stage promptable segmentation model (SAM2 ONNX export)
///
/// The encoder turns a 1024x1024 image into a global embedding plus two
/// high-resolution feature maps. The decoder combines them with point
/// prompts (and optionally the previous mask) into three candidate masks
/// with IOU predictions.
pub struct Sam2 {
    encoder: Session,
    decoder: Session,
    embeddings: Option<ImageEmbeddings>,
}

impl Sam2 {
    pub fn new(encoder: Session, decoder: Session) -> Self {
        Self {
            encoder,
            decoder,
            embeddings: None,
        }
    }

    pub fn is_encoded(&self) -> bool {
        self.embeddings.is_some()
    }

    fn prompt_tensors(points: &[PointPrompt]) -> Result<(Tensor<f32>, Tensor<f32>)> {
        let coords: Vec<f32> = points.iter().flat_map(|p| [p.x, p.y]).collect();
        let labels: Vec<f32> = points.iter().map(|p| p.label.as_f32()).collect();

        let coords = Tensor::from_array((vec![1usize, points.len(), 2], coords.into_boxed_slice()))
            .map_err(|e| anyhow!("ORT point coords: {e}"))?;
        let labels = Tensor::from_array((vec![1usize, points.len()], labels.into_boxed_slice()))
            .map_err(|e| anyhow!("ORT point labels: {e}"))?;
        Ok((coords, labels))
    }

    /// Prior mask channel, or zeros with the "no prior mask" flag
    fn mask_tensors(prior: Option<&PriorMask>) -> Result<(Tensor<f32>, Tensor<f32>)> {
        let (shape, data, has_mask) = match prior {
            Some(prior) => (prior.shape.to_vec(), prior.data.clone(), 1.0),
            None => (
                vec![1, 1, SAM_MASK_SIZE, SAM_MASK_SIZE],
                vec![0.0; SAM_MASK_SIZE * SAM_MASK_SIZE],
                0.0,
            ),
        };

        let mask = Tensor::from_array((shape, data.into_boxed_slice()))
            .map_err(|e| anyhow!("ORT mask input: {e}"))?;
        let flag = Tensor::from_array((vec![1usize], vec![has_mask].into_boxed_slice()))
            .map_err(|e| anyhow!("ORT mask flag: {e}"))?;
        Ok((mask, flag))
    }
}

impl SegmentationModel for Sam2 {
    fn encode(&mut self, image: &ImageTensor) -> Result<()> {
        let _span = tracing::debug_span!("sam_encode").entered();

        self.embeddings = None;

        let input = Tensor::from_array((image.shape.to_vec(), image.data.clone().into_boxed_slice()))
            .map_err(|e| anyhow!("ORT image tensor: {e}"))?;

        let outputs = self
            .encoder
            .run(ort::inputs!["image" => input])
            .context("Failed to run encoder")?;

        let embeddings = ImageEmbeddings {
            high_res_feats_0: Embedding::extract(outputs.get("high_res_feats_0"), "high_res_feats_0")?,
            high_res_feats_1: Embedding::extract(outputs.get("high_res_feats_1"), "high_res_feats_1")?,
            image_embed: Embedding::extract(outputs.get("image_embed"), "image_embed")?,
        };

        tracing::debug!("Image embedding shape: {:?}", embeddings.image_embed.shape);
        self.embeddings = Some(embeddings);
        Ok(())
    }

    fn decode(&mut self, points: &[PointPrompt], prior: Option<&PriorMask>) -> Result<MaskTensor> {
        let _span = tracing::debug_span!("sam_decode", points = points.len()).entered();

        let Some(embeddings) = self.embeddings.as_ref() else {
            bail!("Decode requested before an image was encoded");
        };
        if points.is_empty() {
            bail!("Decode requires at least one point prompt");
        }

        let (point_coords, point_labels) = Self::prompt_tensors(points)?;
        let (mask_input, has_mask_input) = Self::mask_tensors(prior)?;

        let outputs = self
            .decoder
            .run(ort::inputs![
                "image_embed" => embeddings.image_embed.to_tensor()?,
                "high_res_feats_0" => embeddings.high_res_feats_0.to_tensor()?,
                "high_res_feats_1" => embeddings.high_res_feats_1.to_tensor()?,
                "point_coords" => point_coords,
                "point_labels" => point_labels,
                "mask_input" => mask_input,
                "has_mask_input" => has_mask_input,
            ])
            .context("Failed to run decoder")?;

        let masks = outputs
            .get("masks")
            .ok_or_else(|| anyhow!("Decoder produced no 'masks' output"))?;
        let (shape, data) = masks
            .try_extract_tensor::<f32>()
            .context("Failed to extract masks")?;
        let dims: [usize; 4] = match shape.iter().map(|&d| d as usize).collect::<Vec<_>>()[..] {
            [b, c, h, w] => [b, c, h, w],
            _ => bail!("Unexpected mask output shape: {:?}", shape),
        };

        let scores = outputs
            .get("iou_predictions")
            .ok_or_else(|| anyhow!("Decoder produced no 'iou_predictions' output"))?;
        let (_, scores) = scores
            .try_extract_tensor::<f32>()
            .context("Failed to extract IOU predictions")?;

        MaskTensor::new(data.to_vec(), dims, scores.to_vec())
    }

    fn reset_state(&mut self) {
        tracing::info!("Dropping cached image embeddings");
        self.embeddings = None;
    }

    fn input_size(&self) -> u32 {
        SAM_INPUT_SIZE
    }
}
