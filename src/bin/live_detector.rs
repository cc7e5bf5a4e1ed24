//! live-detector - annotate a camera stream with object detections
//!
//! This binary:
//! 1. Loads layered configuration (defaults, --config/DETECTOR_CONFIG file, env, flags)
//! 2. Loads the label table and the detection graph
//! 3. Runs the capture-infer-render pipeline on a worker thread
//! 4. Drains annotated frames on the main thread until Ctrl-C or --seconds

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use live_detector::{
    config::DetectorConfig, engine, ChannelSink, DetectionRenderer, Frame, FrameDelivery,
    LabelTable, PipelineController, SourceKind,
};

const FPS_LOG_INTERVAL: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser, Debug)]
#[command(author, version, about = "Live object detection on a camera stream")]
struct Args {
    /// Configuration file (TOML, or JSON with a .json extension).
    #[arg(long, env = "DETECTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Detection graph, or stub://empty for a no-op engine.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Label file, one class name per line.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Camera index.
    #[arg(long)]
    device: Option<u32>,

    /// Use the synthetic frame source instead of a camera.
    #[arg(long)]
    synthetic: bool,

    /// Minimum confidence (exclusive) for a detection to be drawn.
    #[arg(long)]
    threshold: Option<f32>,

    /// Write the most recent annotated frame to this JPEG on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Stop after this many seconds.
    #[arg(long)]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = DetectorConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args);
    cfg.validate()?;

    let labels = LabelTable::load(&cfg.model.labels_path)
        .with_context(|| format!("loading labels from {}", cfg.model.labels_path.display()))?;
    log::info!(
        "loaded {} labels from {}",
        labels.len(),
        cfg.model.labels_path.display()
    );

    let engine = engine::load(
        &cfg.model.path,
        &cfg.model.nodes,
        cfg.capture.width,
        cfg.capture.height,
    )
    .with_context(|| format!("loading model {}", cfg.model.path.display()))?;

    let mut renderer = DetectionRenderer::new(cfg.render_style());
    if let Some(font_path) = &cfg.display.font_path {
        renderer = renderer.with_font_file(font_path)?;
        log::info!("label font loaded from {}", font_path.display());
    }
    let style = renderer.style();
    log::info!(
        "display {}x{}, stroke {}px",
        style.display_width,
        style.display_height,
        style.stroke_width
    );

    let (sink, rx) = ChannelSink::latest();
    let mut controller = PipelineController::new(
        cfg.pipeline_settings(),
        engine,
        Arc::new(labels),
        Arc::new(renderer),
        Arc::new(sink),
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    controller.start().context("starting pipeline")?;
    log::info!("live-detector running ({})", controller.state());

    let deadline = args.seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let mut latest: Option<Frame> = None;
    let mut latest_fps = String::new();
    let mut last_fps_log = Instant::now();
    let mut source_ended = false;

    loop {
        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown signal received, stopping pipeline...");
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            log::info!("run time elapsed, stopping pipeline...");
            break;
        }

        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(FrameDelivery::Frame { image, fps }) => {
                latest = Some(image);
                latest_fps = fps;
            }
            Ok(FrameDelivery::Cleared) => {
                source_ended = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_fps_log.elapsed() >= FPS_LOG_INTERVAL && !latest_fps.is_empty() {
            log::info!("fps: {} ({:?})", latest_fps, controller.stats());
            last_fps_log = Instant::now();
        }
    }

    controller.stop()?;
    if !source_ended {
        // The sink's slot now holds the clear, which replaced any undisplayed frame.
        for delivery in rx.try_iter() {
            if let FrameDelivery::Frame { image, .. } = delivery {
                latest = Some(image);
            }
        }
    }

    if let Some(path) = &args.snapshot {
        match latest {
            Some(frame) => {
                let image = frame.into_rgb_image()?;
                image
                    .save(path)
                    .with_context(|| format!("writing snapshot {}", path.display()))?;
                log::info!("snapshot written to {}", path.display());
            }
            None => log::warn!("no frame delivered; snapshot not written"),
        }
    }

    log::info!("live-detector stopped ({:?})", controller.stats());
    Ok(())
}

fn apply_args(cfg: &mut DetectorConfig, args: &Args) {
    if let Some(model) = &args.model {
        cfg.model.path = model.clone();
    }
    if let Some(labels) = &args.labels {
        cfg.model.labels_path = labels.clone();
    }
    if let Some(device) = args.device {
        cfg.capture.device_index = device;
    }
    if args.synthetic {
        cfg.capture.source = SourceKind::Synthetic;
    }
    if let Some(threshold) = args.threshold {
        cfg.threshold = threshold;
    }
}
