//! Click-to-mask flow through the real worker thread with a fake model.

use anyhow::Result;
use image::{Rgba, RgbaImage};
use maskmotion::assets::RetryConfig;
use maskmotion::authoring::{MaskCollection, MaskDraft};
use maskmotion::geometry::Point;
use maskmotion::inference::Backend;
use maskmotion::mask::RenderMode;
use maskmotion::segmentation::{
    ImageTensor, MaskTensor, PointPrompt, Preprocessor, PriorMask, SegmentationModel,
};
use maskmotion::surface::{ImageSurface, Region};
use maskmotion::worker::{
    EventSender, LoaderConfig, OrtSamLoader, SegmenterLoader, WorkerEvent, WorkerHandle,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const SIZE: usize = 64;

/// (point count, prior supplied) for every decode
type DecodeLog = Arc<Mutex<Vec<(usize, bool)>>>;

/// Emits three square candidates; the one spanning the clicks scores best
struct SquareModel {
    log: DecodeLog,
}

fn square(x0: usize, y0: usize, x1: usize, y1: usize) -> Vec<f32> {
    let mut plane = vec![-1.0; SIZE * SIZE];
    for y in y0..=y1 {
        for x in x0..=x1 {
            plane[y * SIZE + x] = 1.0;
        }
    }
    plane
}

impl SegmentationModel for SquareModel {
    fn encode(&mut self, image: &ImageTensor) -> Result<()> {
        assert_eq!(image.shape, [1, 3, SIZE, SIZE]);
        Ok(())
    }

    fn decode(&mut self, points: &[PointPrompt], prior: Option<&PriorMask>) -> Result<MaskTensor> {
        self.log.lock().unwrap().push((points.len(), prior.is_some()));

        let min = |f: fn(&PointPrompt) -> f32| points.iter().map(f).fold(f32::MAX, f32::min) as usize;
        let max = |f: fn(&PointPrompt) -> f32| points.iter().map(f).fold(0.0, f32::max) as usize;

        let mut data = square(0, 0, 7, 7);
        data.extend(square(min(|p| p.x), min(|p| p.y), max(|p| p.x), max(|p| p.y)));
        data.extend(vec![1.0; SIZE * SIZE]);
        MaskTensor::new(data, [1, 3, SIZE, SIZE], vec![0.2, 0.9, 0.5])
    }

    fn input_size(&self) -> u32 {
        SIZE as u32
    }
}

struct SquareLoader {
    log: DecodeLog,
}

impl SegmenterLoader for SquareLoader {
    type Model = SquareModel;

    async fn load(&mut self, events: &EventSender) -> Option<(SquareModel, Backend)> {
        let _ = events.send(WorkerEvent::LoadingInProgress);
        Some((
            SquareModel {
                log: self.log.clone(),
            },
            Backend::Cpu,
        ))
    }
}

async fn encoded_draft(worker: &WorkerHandle) -> MaskDraft {
    let surface = ImageSurface::new(RgbaImage::from_pixel(64, 64, Rgba([90, 120, 200, 255])));
    let mut draft = MaskDraft::new();
    draft
        .encode_from_surface(worker, &surface, Region::new(0, 0, 64, 64), &Preprocessor::new(64))
        .await
        .unwrap();
    draft
}

#[tokio::test]
async fn two_clicks_commit_a_mask_without_trajectory() {
    let log = DecodeLog::default();
    let (worker, mut events) = WorkerHandle::spawn(SquareLoader { log: log.clone() }).unwrap();

    let readiness = worker.ping().await.unwrap();
    assert!(readiness.ready);
    assert_eq!(readiness.device.as_deref(), Some("cpu"));
    assert_eq!(events.recv().await, Some(WorkerEvent::LoadingInProgress));

    let mut draft = encoded_draft(&worker).await;
    draft.add_point(PointPrompt::foreground(10.0, 10.0));
    draft.add_point(PointPrompt::foreground(50.0, 50.0));

    let decoded = draft.refine(&worker, RenderMode::Plain).await.unwrap().unwrap();
    assert_eq!(decoded.index, 1);
    assert_eq!(decoded.score, 0.9);
    assert_eq!(decoded.centroid, Point::new(30.0, 30.0));
    assert_eq!(decoded.binary.get_pixel(30, 30).0, [255, 255, 255, 255]);
    assert_eq!(decoded.binary.get_pixel(2, 2).0, [0, 0, 0, 255]);
    assert_eq!(*log.lock().unwrap(), vec![(2, false)]);

    let mut collection = MaskCollection::new();
    let record = collection.commit(&mut draft, None).unwrap();
    assert!(record.mask_canvas_url.len() > "data:image/png;base64,".len());
    assert!(record.binary_mask_url.len() > "data:image/png;base64,".len());
    assert!(record.trajectory.is_none());
    assert_eq!(record.centroid, Point::new(30.0, 30.0));
    assert!(draft.points().is_empty());

    worker.dispose();
}

#[tokio::test]
async fn refinement_feeds_back_the_previous_mask() {
    let log = DecodeLog::default();
    let (worker, _events) = WorkerHandle::spawn(SquareLoader { log: log.clone() }).unwrap();
    worker.ping().await.unwrap();

    let mut draft = encoded_draft(&worker).await;
    draft.add_point(PointPrompt::foreground(20.0, 20.0));
    draft.refine(&worker, RenderMode::Hidden).await.unwrap();
    draft.add_point(PointPrompt::background(40.0, 40.0));
    let decoded = draft.refine(&worker, RenderMode::Hidden).await.unwrap().unwrap();
    assert!(decoded.preview.is_none());

    assert_eq!(*log.lock().unwrap(), vec![(1, false), (2, true)]);
    assert_eq!(draft.prior().unwrap().shape, [1, 1, SIZE, SIZE]);

    worker.dispose();
}

#[tokio::test]
async fn stale_image_hash_is_rejected() {
    let (worker, _events) = WorkerHandle::spawn(SquareLoader {
        log: DecodeLog::default(),
    })
    .unwrap();
    worker.ping().await.unwrap();

    let first = ImageTensor::new(vec![0.0; 3], [1, 3, 1, 1]).unwrap();
    let stale = worker.encode_image(first).await.unwrap();
    let second = ImageTensor::new(vec![1.0; 3], [1, 3, 1, 1]).unwrap();
    let fresh = worker.encode_image(second).await.unwrap();
    assert_ne!(stale, fresh);

    let points = vec![PointPrompt::foreground(0.0, 0.0)];
    assert!(worker.decode_mask(points.clone(), None, Some(stale)).await.is_err());
    assert!(worker.decode_mask(points, None, Some(fresh)).await.is_ok());

    worker.dispose();
}

#[tokio::test]
async fn unreachable_models_report_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = LoaderConfig {
        encoder_url: format!("{}/sam2.encoder.onnx", server.uri()),
        decoder_url: format!("{}/sam2.decoder.onnx", server.uri()),
        cache_dir: None,
        retry: RetryConfig {
            max_retries: 0,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
        download_timeout: Duration::from_secs(5),
        backends: vec![Backend::Cpu],
        intra_threads: 1,
    };
    let (worker, mut events) = WorkerHandle::spawn(OrtSamLoader::new(config)).unwrap();

    let readiness = worker.ping().await.unwrap();
    assert!(!readiness.ready);
    assert!(readiness.device.is_none());
    assert_eq!(events.recv().await, Some(WorkerEvent::DownloadInProgress));

    // Still unavailable, and still answering
    let image = ImageTensor::new(vec![0.0; 3], [1, 3, 1, 1]).unwrap();
    assert!(worker.encode_image(image).await.is_err());

    worker.dispose();
}
