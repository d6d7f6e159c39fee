use super::protocol::{WorkerEvent, WorkerRequest, WorkerResponse};
use crate::assets::{ModelStore, RetryConfig};
use crate::inference::{Backend, OrtSessionFactory, SessionManager};
use crate::segmentation::{self, ImageTensor, PointPrompt, PriorMask, Sam2, SegmentationModel};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Channel the worker uses for unsolicited progress notices
pub type EventSender = UnboundedSender<WorkerEvent>;

/// Lifecycle of the worker's model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    Downloading,
    Ready,
    Encoding,
    Encoded,
    Decoding,
}

/// Acquires model assets and builds the segmentation model
///
/// Loading is retried on the next ping after a failure, so implementations
/// should not cache errors.
pub trait SegmenterLoader {
    type Model: SegmentationModel;

    fn load(&mut self, events: &EventSender) -> impl Future<Output = Option<(Self::Model, Backend)>>;
}

/// Content hash of an encoded image, used to detect stale decodes
pub fn image_hash(image: &ImageTensor) -> String {
    let mut hasher = Sha256::new();
    for dim in image.shape {
        hasher.update((dim as u64).to_le_bytes());
    }
    for value in &image.data {
        hasher.update(value.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Owns the model and answers one request at a time
pub struct SegmentationWorker<L: SegmenterLoader> {
    loader: L,
    model: Option<L::Model>,
    backend: Option<Backend>,
    state: WorkerState,
    image_hash: Option<String>,
    events: EventSender,
}

impl<L: SegmenterLoader> SegmentationWorker<L> {
    pub fn new(loader: L, events: EventSender) -> Self {
        Self {
            loader,
            model: None,
            backend: None,
            state: WorkerState::Uninitialized,
            image_hash: None,
            events,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend
    }

    pub async fn handle(&mut self, request: WorkerRequest) -> WorkerResponse {
        tracing::debug!("Worker request: {}", request.kind());
        match request {
            WorkerRequest::Ping => self.ping().await,
            WorkerRequest::EncodeImage {
                float32_array,
                shape,
            } => self.encode(float32_array, shape),
            WorkerRequest::DecodeMask {
                points,
                mask_array,
                mask_shape,
                image_hash,
            } => self.decode(points, mask_array, mask_shape, image_hash),
        }
    }

    async fn ping(&mut self) -> WorkerResponse {
        if self.model.is_none() {
            self.state = WorkerState::Downloading;
            match self.loader.load(&self.events).await {
                Some((model, backend)) => {
                    tracing::info!("Segmentation model ready on {}", backend);
                    self.model = Some(model);
                    self.backend = Some(backend);
                    self.state = WorkerState::Ready;
                }
                None => {
                    tracing::warn!("Segmentation model unavailable");
                    self.state = WorkerState::Uninitialized;
                }
            }
        }

        WorkerResponse::Pong {
            success: self.model.is_some(),
            device: self.backend.map(|b| b.name().to_string()),
        }
    }

    fn encode(&mut self, data: Vec<f32>, shape: Vec<usize>) -> WorkerResponse {
        let Some(model) = self.model.as_mut() else {
            return WorkerResponse::error("Model not loaded; send ping first");
        };

        let image = match <[usize; 4]>::try_from(shape.as_slice())
            .map_err(|_| anyhow::anyhow!("image shape must have 4 entries, got {:?}", shape))
            .and_then(|shape| ImageTensor::new(data, shape))
        {
            Ok(image) => image,
            Err(e) => return WorkerResponse::error(e.to_string()),
        };

        self.state = WorkerState::Encoding;
        self.image_hash = None;
        match model.encode(&image) {
            Ok(()) => {
                let hash = image_hash(&image);
                tracing::info!("Image encoded ({}x{})", image.shape[3], image.shape[2]);
                self.image_hash = Some(hash.clone());
                self.state = WorkerState::Encoded;
                WorkerResponse::EncodeImageDone { image_hash: hash }
            }
            Err(e) => {
                tracing::error!("Encoder failed: {:#}", e);
                self.state = WorkerState::Ready;
                WorkerResponse::error(format!("Encoder failed: {e:#}"))
            }
        }
    }

    fn decode(
        &mut self,
        points: Vec<PointPrompt>,
        mask_array: Option<Vec<f32>>,
        mask_shape: Option<Vec<usize>>,
        requested_hash: Option<String>,
    ) -> WorkerResponse {
        let Some(model) = self.model.as_mut() else {
            return WorkerResponse::error("Model not loaded; send ping first");
        };
        if self.state != WorkerState::Encoded {
            return WorkerResponse::error("Decode requested before an image was encoded");
        }
        if let (Some(requested), Some(current)) = (&requested_hash, &self.image_hash) {
            if requested != current {
                tracing::warn!("Rejecting decode against a stale embedding");
                return WorkerResponse::error("Stale embedding: image changed since encode");
            }
        }
        if points.is_empty() {
            return WorkerResponse::error("Decode requires at least one point");
        }

        let prior = match (mask_array, mask_shape) {
            (Some(data), Some(shape)) => {
                let prior = <[usize; 4]>::try_from(shape.as_slice())
                    .map_err(|_| anyhow::anyhow!("mask shape must have 4 entries, got {:?}", shape))
                    .and_then(|shape| PriorMask::new(data, shape));
                match prior {
                    Ok(prior) => Some(prior),
                    Err(e) => return WorkerResponse::error(e.to_string()),
                }
            }
            (None, None) => None,
            _ => return WorkerResponse::error("maskArray and maskShape must be sent together"),
        };

        self.state = WorkerState::Decoding;
        let result = model.decode(&points, prior.as_ref());
        self.state = WorkerState::Encoded;

        match result {
            Ok(tensor) => {
                tracing::debug!(
                    "Decoded {} candidates from {} points",
                    tensor.candidate_count(),
                    points.len()
                );
                WorkerResponse::from_mask_tensor(tensor)
            }
            Err(e) => {
                tracing::error!("Decoder failed: {:#}", e);
                WorkerResponse::error(format!("Decoder failed: {e:#}"))
            }
        }
    }

    /// Drop the model and every cached embedding
    pub fn dispose(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.reset_state();
        }
        self.backend = None;
        self.image_hash = None;
        self.state = WorkerState::Uninitialized;
    }
}

/// Where the model binaries come from and how sessions are built
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub encoder_url: String,
    pub decoder_url: String,
    pub cache_dir: Option<PathBuf>,
    pub retry: RetryConfig,
    pub download_timeout: Duration,
    pub backends: Vec<Backend>,
    pub intra_threads: usize,
}

/// Loads SAM2 from downloaded (or cached) ONNX files
pub struct OrtSamLoader {
    config: LoaderConfig,
    store: Option<ModelStore>,
    sessions: SessionManager<OrtSessionFactory>,
}

impl OrtSamLoader {
    pub fn new(config: LoaderConfig) -> Self {
        let sessions = SessionManager::new(
            OrtSessionFactory::new(config.intra_threads),
            config.backends.clone(),
        );
        Self {
            config,
            store: None,
            sessions,
        }
    }
}

impl SegmenterLoader for OrtSamLoader {
    type Model = Sam2;

    async fn load(&mut self, events: &EventSender) -> Option<(Sam2, Backend)> {
        if self.store.is_none() {
            let store = ModelStore::new(
                self.config.cache_dir.as_deref(),
                self.config.retry.clone(),
                self.config.download_timeout,
            )
            .await;
            self.store = Some(store);
        }
        let store = self.store.as_ref()?;

        let _ = events.send(WorkerEvent::DownloadInProgress);
        let fetched = tokio::try_join!(
            store.fetch_model(&self.config.encoder_url),
            store.fetch_model(&self.config.decoder_url),
        );
        let (encoder, decoder) = match fetched {
            Ok(assets) => assets,
            Err(e) => {
                tracing::error!("Failed to fetch model assets: {}", e);
                return None;
            }
        };

        let _ = events.send(WorkerEvent::LoadingInProgress);
        tracing::info!(
            "Creating sessions for {} ({} bytes) and {} ({} bytes)",
            encoder.name,
            encoder.bytes.len(),
            decoder.name,
            decoder.bytes.len()
        );
        segmentation::create_default_model(&self.sessions, &encoder, &decoder)
    }
}
