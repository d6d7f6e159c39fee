use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use maskmotion::authoring::{MaskCollection, MaskDraft, SegmentedMask};
use maskmotion::config::Config;
use maskmotion::geometry::Point;
use maskmotion::inference::Backend;
use maskmotion::keyframes::{Keyframe, KeyframeKind};
use maskmotion::mask::{self, RenderMode};
use maskmotion::preview::PreviewLoop;
use maskmotion::segmentation::{PointPrompt, Preprocessor, SAM_INPUT_SIZE};
use maskmotion::surface::{ImageOverlay, ImageSurface, Region, Viewport};
use maskmotion::trajectory::TrajectoryRecorder;
use maskmotion::worker::{OrtSamLoader, WorkerHandle};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Segment an object from clicks and write its mask record
    Segment(SegmentArgs),
    /// Attach a dragged trajectory and keyframes to a mask record
    Animate(AnimateArgs),
    /// Render one preview cycle of an animated record as PNG frames
    Preview(PreviewArgs),
}

#[derive(ClapArgs, Debug)]
struct SegmentArgs {
    /// Source image
    #[arg(long)]
    image: PathBuf,

    /// Click as x,y[,label] in image pixels (label 1 = object, 0 = background)
    #[arg(long = "point", required = true)]
    points: Vec<PointPrompt>,

    /// Output directory for mask.png, binary.png and record.json
    #[arg(short, long)]
    out: PathBuf,

    /// Object name
    #[arg(long)]
    name: Option<String>,

    /// Clean up and outline the preview mask
    #[arg(long)]
    enhance: bool,

    /// Encoder model location (overrides config)
    #[arg(long)]
    encoder: Option<String>,

    /// Decoder model location (overrides config)
    #[arg(long)]
    decoder: Option<String>,

    /// Model cache directory (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Execution backends to try, in order (overrides config)
    #[arg(long = "backend", value_enum)]
    backends: Vec<Backend>,
}

#[derive(ClapArgs, Debug)]
struct AnimateArgs {
    /// Mask record written by `segment`; updated in place
    #[arg(long)]
    record: PathBuf,

    /// Drag path as space-separated x,y points
    #[arg(long)]
    drag: String,

    /// Rotation keyframe as progress:degrees
    #[arg(long = "rotation")]
    rotations: Vec<Keyframe>,

    /// Scale keyframe as progress:factor
    #[arg(long = "scale")]
    scales: Vec<Keyframe>,

    /// Target frame count (overrides config)
    #[arg(long)]
    frames: Option<usize>,

    /// Per-frame artifacts output (JSON)
    #[arg(short, long)]
    out: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct PreviewArgs {
    /// Animated mask record
    #[arg(long)]
    record: PathBuf,

    /// Output directory for frame PNGs
    #[arg(short, long)]
    out: PathBuf,

    /// Target frames per second
    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Overlay width (defaults to the mask width)
    #[arg(long)]
    width: Option<u32>,

    /// Overlay height (defaults to the mask height)
    #[arg(long)]
    height: Option<u32>,

    #[arg(long, default_value_t = 0.0)]
    pan_x: f32,

    #[arg(long, default_value_t = 0.0)]
    pan_y: f32,

    #[arg(long, default_value_t = 1.0)]
    zoom: f32,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = Config::load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Segment(segment_args) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start async runtime")?;
            runtime.block_on(run_segment(config, segment_args))
        }
        Command::Animate(animate_args) => run_animate(&config, animate_args),
        Command::Preview(preview_args) => run_preview(&config, preview_args),
    }
}

async fn run_segment(mut config: Config, args: SegmentArgs) -> Result<()> {
    if let Some(encoder) = args.encoder {
        config.encoder_url = encoder;
    }
    if let Some(decoder) = args.decoder {
        config.decoder_url = decoder;
    }
    if args.cache_dir.is_some() {
        config.cache_dir = args.cache_dir;
    }
    if !args.backends.is_empty() {
        config.backends = args.backends;
    }

    let image = image::open(&args.image)
        .with_context(|| format!("Failed to open image {}", args.image.display()))?;
    let (width, height) = (image.width(), image.height());
    tracing::info!("Source image: {}x{}", width, height);
    let surface = ImageSurface::new(image.to_rgba8());

    let (worker, mut events) = WorkerHandle::spawn(OrtSamLoader::new(config.loader_config()))?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!("Worker: {:?}", event);
        }
    });

    let readiness = worker.ping().await?;
    if !readiness.ready {
        worker.dispose();
        bail!("Segmentation model unavailable");
    }
    tracing::info!(
        "Segmentation ready on {}",
        readiness.device.as_deref().unwrap_or("unknown device")
    );

    let mode = if args.enhance {
        RenderMode::Enhanced(config.edge)
    } else {
        RenderMode::Plain
    };

    let mut draft = MaskDraft::new();
    let preprocessor = Preprocessor::new(SAM_INPUT_SIZE);
    let encode_start = Instant::now();
    draft
        .encode_from_surface(&worker, &surface, Region::new(0, 0, width, height), &preprocessor)
        .await?;
    tracing::info!("Encoded in {:.1}ms", encode_start.elapsed().as_secs_f64() * 1000.0);

    for point in &args.points {
        draft.add_click(Point::new(point.x, point.y), point.label);
        let clicks = draft.points().len();
        let decode_start = Instant::now();
        if let Some(decoded) = draft.refine(&worker, mode).await? {
            tracing::info!(
                "Click {} ({:.0}, {:.0}): mask {} score {:.3}, decode={:.1}ms",
                clicks,
                point.x,
                point.y,
                decoded.index,
                decoded.score,
                decode_start.elapsed().as_secs_f64() * 1000.0
            );
        }
    }
    worker.dispose();

    let decoded = draft.decoded().context("No mask was decoded")?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create output directory {}", args.out.display()))?;
    let preview = decoded
        .preview
        .clone()
        .unwrap_or_else(|| mask::render_preview(&decoded.plane));
    preview.save(args.out.join("mask.png")).context("Failed to write mask.png")?;
    decoded
        .binary
        .save(args.out.join("binary.png"))
        .context("Failed to write binary.png")?;

    let mut collection = MaskCollection::new();
    let record = collection.commit(&mut draft, args.name)?;
    write_record(&args.out.join("record.json"), record)?;
    Ok(())
}

fn run_animate(config: &Config, args: AnimateArgs) -> Result<()> {
    let frames = args.frames.unwrap_or(config.frame_count);
    let drag = args
        .drag
        .split_whitespace()
        .map(|p| p.parse::<Point>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()
        .context("Invalid drag path")?;
    let Some((&first, rest)) = drag.split_first() else {
        bail!("Drag path needs at least one point");
    };

    let mut recorder = TrajectoryRecorder::new();
    recorder.pointer_down(first);
    if let Some((&last, middle)) = rest.split_last() {
        for &point in middle {
            recorder.pointer_move(point);
        }
        recorder.pointer_up(last);
    }
    let trajectory = recorder.commit(frames, config.smoothing_factor);

    let mut collection = MaskCollection::from_records(vec![read_record(&args.record)?]);
    let id = collection.records()[0].id.clone();
    collection.set_trajectory(&id, trajectory)?;
    for key in args.rotations {
        collection.add_keyframe(&id, KeyframeKind::Rotation, key)?;
    }
    for key in args.scales {
        collection.add_keyframe(&id, KeyframeKind::Scale, key)?;
    }

    let record = collection.get(&id).context("Record vanished")?;
    write_record(&args.record, record)?;

    let artifacts = collection.export(frames);
    let json = serde_json::to_string_pretty(&artifacts)?;
    std::fs::write(&args.out, json)
        .with_context(|| format!("Failed to write artifacts to {}", args.out.display()))?;
    tracing::info!("Wrote {} frames of artifacts to {}", frames, args.out.display());
    Ok(())
}

fn run_preview(config: &Config, args: PreviewArgs) -> Result<()> {
    let record = read_record(&args.record)?;
    let mask_image = mask::decode_data_url(&record.mask_canvas_url).context("Record has no usable mask image")?;
    let width = args.width.unwrap_or(mask_image.width());
    let height = args.height.unwrap_or(mask_image.height());

    let overlay = ImageOverlay::new(width, height).dump_to(&args.out)?;
    let cycle = config.preview_cycle();
    let Some(mut preview) = PreviewLoop::for_mask(&record, overlay, cycle) else {
        bail!("Record '{}' has no trajectory; run animate first", record.name);
    };
    let viewport = Viewport {
        pan_x: args.pan_x,
        pan_y: args.pan_y,
        zoom: args.zoom,
    };

    let frame_duration = Duration::from_secs_f32(1.0 / args.fps.max(1) as f32);
    let total_frames = (cycle.as_secs_f32() * args.fps as f32).ceil() as u64;
    let mut total_draw_time = Duration::ZERO;
    tracing::info!("Rendering {} preview frames at {}x{}", total_frames, width, height);

    for frame in 0..total_frames {
        let loop_start = Instant::now();

        preview.tick(frame_duration * frame as u32, &viewport)?;
        total_draw_time += loop_start.elapsed();

        // Log stats every 30 frames
        if (frame + 1) % 30 == 0 {
            tracing::info!(
                "Frame {}: draw={:.1}ms",
                frame + 1,
                total_draw_time.as_secs_f64() * 1000.0 / (frame + 1) as f64
            );
        }

        // Frame rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            std::thread::sleep(frame_duration - elapsed);
        }
    }

    let overlay = preview.stop();
    tracing::info!("Wrote {} frames to {}", overlay.frames_presented(), args.out.display());
    Ok(())
}

fn read_record(path: &Path) -> Result<SegmentedMask> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read record {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid record {}", path.display()))
}

fn write_record(path: &Path, record: &SegmentedMask) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write record {}", path.display()))?;
    tracing::info!("Wrote record '{}' to {}", record.name, path.display());
    Ok(())
}
