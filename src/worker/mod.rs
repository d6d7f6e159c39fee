//! Segmentation worker: a dedicated thread owning the model, driven by typed
//! request/response messages.

pub mod protocol;
mod service;

pub use protocol::{MaskData, WorkerEvent, WorkerRequest, WorkerResponse};
pub use service::{
    image_hash, EventSender, LoaderConfig, OrtSamLoader, SegmentationWorker, SegmenterLoader,
    WorkerState,
};

use crate::error::WorkerError;
use crate::segmentation::{ImageTensor, MaskTensor, PointPrompt, PriorMask};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};

/// Requests waiting for the worker
const REQUEST_QUEUE: usize = 16;

struct Envelope {
    request: WorkerRequest,
    reply: oneshot::Sender<WorkerResponse>,
}

/// Result of a successful ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Readiness {
    pub ready: bool,
    pub device: Option<String>,
}

/// Host-side handle; every request gets exactly one response
pub struct WorkerHandle {
    requests: Option<mpsc::Sender<Envelope>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start the worker thread; progress events arrive on the returned receiver
    pub fn spawn<L>(loader: L) -> Result<(Self, mpsc::UnboundedReceiver<WorkerEvent>), WorkerError>
    where
        L: SegmenterLoader + Send + 'static,
    {
        let (request_tx, mut request_rx) = mpsc::channel::<Envelope>(REQUEST_QUEUE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let thread = std::thread::Builder::new()
            .name("segmentation-worker".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to start worker runtime: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    let mut worker = SegmentationWorker::new(loader, event_tx);
                    while let Some(Envelope { request, reply }) = request_rx.recv().await {
                        let response = worker.handle(request).await;
                        if reply.send(response).is_err() {
                            tracing::debug!("Requester went away before the response");
                        }
                    }
                    worker.dispose();
                    tracing::info!("Segmentation worker stopped");
                });
            })?;

        Ok((
            Self {
                requests: Some(request_tx),
                thread: Some(thread),
            },
            event_rx,
        ))
    }

    /// Send one request and wait for its response
    pub async fn request(&self, request: WorkerRequest) -> Result<WorkerResponse, WorkerError> {
        let requests = self.requests.as_ref().ok_or(WorkerError::Closed)?;
        let (reply, response) = oneshot::channel();
        requests
            .send(Envelope { request, reply })
            .await
            .map_err(|_| WorkerError::Closed)?;
        response.await.map_err(|_| WorkerError::Closed)
    }

    pub async fn ping(&self) -> Result<Readiness, WorkerError> {
        match self.request(WorkerRequest::Ping).await? {
            WorkerResponse::Pong { success, device } => Ok(Readiness {
                ready: success,
                device,
            }),
            other => Err(unexpected("pong", other)),
        }
    }

    /// Encode an image; returns the hash identifying its embedding
    pub async fn encode_image(&self, image: ImageTensor) -> Result<String, WorkerError> {
        let request = WorkerRequest::EncodeImage {
            float32_array: image.data,
            shape: image.shape.to_vec(),
        };
        match self.request(request).await? {
            WorkerResponse::EncodeImageDone { image_hash } => Ok(image_hash),
            other => Err(unexpected("encodeImageDone", other)),
        }
    }

    pub async fn decode_mask(
        &self,
        points: Vec<PointPrompt>,
        prior: Option<PriorMask>,
        image_hash: Option<String>,
    ) -> Result<MaskTensor, WorkerError> {
        let (mask_array, mask_shape) = match prior {
            Some(prior) => (Some(prior.data), Some(prior.shape.to_vec())),
            None => (None, None),
        };
        let request = WorkerRequest::DecodeMask {
            points,
            mask_array,
            mask_shape,
            image_hash,
        };
        match self.request(request).await? {
            WorkerResponse::DecodeMaskResult {
                masks,
                iou_predictions,
            } => MaskTensor::try_from((masks, iou_predictions))
                .map_err(|e| WorkerError::Rejected(e.to_string())),
            other => Err(unexpected("decodeMaskResult", other)),
        }
    }

    /// Stop the worker and wait for it to release the model
    pub fn dispose(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.requests = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Segmentation worker panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Closing the channel ends the worker loop; don't block on the join here
        self.requests = None;
    }
}

fn unexpected(expected: &'static str, response: WorkerResponse) -> WorkerError {
    match response {
        WorkerResponse::Error { message } => WorkerError::Rejected(message),
        other => WorkerError::UnexpectedResponse {
            expected,
            got: other.kind(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::Backend;
    use crate::segmentation::SegmentationModel;
    use anyhow::Result;

    struct EchoModel;

    impl SegmentationModel for EchoModel {
        fn encode(&mut self, _image: &ImageTensor) -> Result<()> {
            Ok(())
        }

        fn decode(&mut self, points: &[PointPrompt], _prior: Option<&PriorMask>) -> Result<MaskTensor> {
            let n = points.len();
            MaskTensor::new(vec![1.0; n], [1, n, 1, 1], vec![0.5; n])
        }

        fn input_size(&self) -> u32 {
            1
        }
    }

    struct EchoLoader;

    impl SegmenterLoader for EchoLoader {
        type Model = EchoModel;

        async fn load(&mut self, events: &EventSender) -> Option<(EchoModel, Backend)> {
            let _ = events.send(WorkerEvent::DownloadInProgress);
            let _ = events.send(WorkerEvent::LoadingInProgress);
            Some((EchoModel, Backend::Cuda))
        }
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let (handle, mut events) = WorkerHandle::spawn(EchoLoader).unwrap();

        let readiness = handle.ping().await.unwrap();
        assert!(readiness.ready);
        assert_eq!(readiness.device.as_deref(), Some("cuda"));
        assert_eq!(events.recv().await, Some(WorkerEvent::DownloadInProgress));
        assert_eq!(events.recv().await, Some(WorkerEvent::LoadingInProgress));

        let image = ImageTensor::new(vec![0.0; 3], [1, 3, 1, 1]).unwrap();
        let hash = handle.encode_image(image).await.unwrap();

        let points = vec![PointPrompt::foreground(0.0, 0.0), PointPrompt::foreground(0.5, 0.5)];
        let masks = handle.decode_mask(points, None, Some(hash)).await.unwrap();
        assert_eq!(masks.candidate_count(), 2);

        handle.dispose();
    }

    #[tokio::test]
    async fn test_rejections_surface_as_errors() {
        let (handle, _events) = WorkerHandle::spawn(EchoLoader).unwrap();
        handle.ping().await.unwrap();

        let err = handle
            .decode_mask(vec![PointPrompt::foreground(0.0, 0.0)], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Rejected(_)));

        handle.dispose();
    }
}
