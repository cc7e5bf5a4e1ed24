//! Capture-infer-render loop and its start/stop lifecycle.
//!
//! One dedicated worker thread runs the loop. Iterations are single flight:
//! iteration n+1 does not begin until iteration n has been handed to the
//! display sink. `stop()` is cooperative; it is observed at the top of the
//! loop and never interrupts a capture or inference call in progress.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::codec::{InputEncoding, TensorCodec};
use crate::engine::{ExecutionContext, InferenceEngine};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::ingest::{self, CaptureSettings, FrameSource};
use crate::labels::LabelTable;
use crate::render::{self, DetectionRenderer, DEFAULT_THRESHOLD};

mod fps;
mod sink;

pub use fps::{format_fps, fps_from_elapsed};
pub use sink::{ChannelSink, DisplaySink, FrameDelivery};

/// Opens the frame source when the pipeline starts.
pub type SourceOpener =
    Box<dyn Fn(&CaptureSettings) -> Result<Box<dyn FrameSource>> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Running,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Running => f.write_str("running"),
        }
    }
}

/// Loop parameters fixed for the lifetime of a controller.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub capture: CaptureSettings,
    pub threshold: f32,
    pub encoding: InputEncoding,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            threshold: DEFAULT_THRESHOLD,
            encoding: InputEncoding::default(),
        }
    }
}

/// Counters accumulated across runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_delivered: u64,
    pub capture_failures: u64,
    pub iteration_failures: u64,
}

#[derive(Default)]
struct StatsCounters {
    frames_delivered: AtomicU64,
    capture_failures: AtomicU64,
    iteration_failures: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            capture_failures: self.capture_failures.load(Ordering::Relaxed),
            iteration_failures: self.iteration_failures.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct PipelineController {
    settings: PipelineSettings,
    engine: Arc<dyn InferenceEngine>,
    labels: Arc<LabelTable>,
    renderer: Arc<DetectionRenderer>,
    sink: Arc<dyn DisplaySink>,
    opener: SourceOpener,
    stats: Arc<StatsCounters>,
    worker: Option<Worker>,
}

impl PipelineController {
    pub fn new(
        settings: PipelineSettings,
        engine: Arc<dyn InferenceEngine>,
        labels: Arc<LabelTable>,
        renderer: Arc<DetectionRenderer>,
        sink: Arc<dyn DisplaySink>,
    ) -> Self {
        Self {
            settings,
            engine,
            labels,
            renderer,
            sink,
            opener: Box::new(ingest::open),
            stats: Arc::new(StatsCounters::default()),
            worker: None,
        }
    }

    /// Replace how the frame source is opened on `start()`.
    pub fn with_source_opener<F>(mut self, opener: F) -> Self
    where
        F: Fn(&CaptureSettings) -> Result<Box<dyn FrameSource>> + Send + Sync + 'static,
    {
        self.opener = Box::new(opener);
        self
    }

    pub fn state(&self) -> PipelineState {
        if self.worker.is_some() {
            PipelineState::Running
        } else {
            PipelineState::Idle
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats.snapshot()
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Open the source, create an execution context and start the worker.
    ///
    /// Fails with `AlreadyRunning` when running. Source and context failures
    /// are returned as-is and leave the controller idle.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        let mut source = (self.opener)(&self.settings.capture)?;
        let context = match self.engine.new_context() {
            Ok(context) => context,
            Err(err) => {
                source.close();
                return Err(err);
            }
        };

        let stop = Arc::new(AtomicBool::new(false));
        let iteration = Iteration {
            codec: TensorCodec::new(self.settings.encoding),
            context,
            renderer: Arc::clone(&self.renderer),
            labels: Arc::clone(&self.labels),
            threshold: self.settings.threshold,
        };
        let encoding = iteration.codec.encoding();
        let worker_loop = WorkerLoop {
            stop: Arc::clone(&stop),
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
            retry_delay: self.settings.capture.frame_interval(),
        };

        let handle = std::thread::Builder::new()
            .name("detection-worker".to_string())
            .spawn(move || worker_loop.run(source, iteration))
            .map_err(|e| PipelineError::Device(format!("failed to spawn worker: {}", e)))?;

        log::info!(
            "pipeline started (engine={}, input={:?}, threshold={}, {}x{} @ {} fps)",
            self.engine.name(),
            encoding,
            self.settings.threshold,
            self.settings.capture.width,
            self.settings.capture.height,
            self.settings.capture.fps
        );
        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    /// Ask the worker to finish its current iteration and wait for it.
    ///
    /// The worker releases the frame source and sends `FrameDelivery::Cleared`
    /// before this returns.
    pub fn stop(&mut self) -> Result<()> {
        let worker = self.worker.take().ok_or(PipelineError::NotRunning)?;
        worker.stop.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            log::error!("pipeline worker panicked");
            self.sink.deliver(FrameDelivery::Cleared);
        }
        log::info!("pipeline stopped ({:?})", self.stats());
        Ok(())
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.stop();
        }
    }
}

/// Per-frame work: everything between capture and delivery.
struct Iteration {
    codec: TensorCodec,
    context: Box<dyn ExecutionContext>,
    renderer: Arc<DetectionRenderer>,
    labels: Arc<LabelTable>,
    threshold: f32,
}

impl Iteration {
    fn process(&mut self, frame: Frame) -> Result<Frame> {
        let input = self.codec.encode(&frame)?;
        let outputs = self.context.infer(&input)?;
        let set = TensorCodec::decode(&outputs)?;
        let detections = render::filter(&set, self.threshold, frame.width(), frame.height());
        log::debug!(
            "{} raw detections, {} above {}",
            set.count(),
            detections.len(),
            self.threshold
        );
        self.renderer.render(frame, &detections, &self.labels)
    }
}

struct WorkerLoop {
    stop: Arc<AtomicBool>,
    sink: Arc<dyn DisplaySink>,
    stats: Arc<StatsCounters>,
    retry_delay: Duration,
}

impl WorkerLoop {
    fn run(self, mut source: Box<dyn FrameSource>, mut iteration: Iteration) {
        log::debug!("detection worker running");

        while !self.stop.load(Ordering::Acquire) {
            let started = Instant::now();

            let frame = match source.next_frame() {
                Ok(frame) => frame,
                Err(PipelineError::EndOfStream) => {
                    log::info!("frame source ended; worker exiting");
                    break;
                }
                Err(err) => {
                    let failures = self.stats.capture_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    log::warn!("skipping iteration: {} ({} capture failures)", err, failures);
                    std::thread::sleep(self.retry_delay);
                    continue;
                }
            };

            match iteration.process(frame) {
                Ok(image) => {
                    let fps = format_fps(started.elapsed());
                    self.sink.deliver(FrameDelivery::Frame { image, fps });
                    self.stats.frames_delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    self.stats.iteration_failures.fetch_add(1, Ordering::Relaxed);
                    if err.is_iteration_local() {
                        log::warn!("dropping frame: {}", err);
                    } else {
                        log::error!("dropping frame on unexpected error: {}", err);
                    }
                }
            }
        }

        let source_stats = source.stats();
        source.close();
        self.sink.deliver(FrameDelivery::Cleared);
        log::debug!(
            "detection worker done ({} frames from {})",
            source_stats.frames_captured,
            source_stats.device
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StubEngine;
    use crate::ingest::SourceKind;
    use crate::render::RenderStyle;

    fn controller() -> (PipelineController, crossbeam_channel::Receiver<FrameDelivery>) {
        let settings = PipelineSettings {
            capture: CaptureSettings {
                source: SourceKind::Synthetic,
                device_index: 0,
                width: 32,
                height: 24,
                fps: 200,
            },
            ..PipelineSettings::default()
        };
        let renderer = DetectionRenderer::new(RenderStyle {
            display_width: 16,
            display_height: 12,
            ..RenderStyle::default()
        });
        let (sink, rx) = ChannelSink::latest();
        let controller = PipelineController::new(
            settings,
            Arc::new(StubEngine::empty()),
            Arc::new(LabelTable::from_lines(["person"]).unwrap()),
            Arc::new(renderer),
            Arc::new(sink),
        );
        (controller, rx)
    }

    #[test]
    fn stop_when_idle_is_rejected_without_state_change() {
        let (mut controller, _rx) = controller();
        assert!(matches!(controller.stop(), Err(PipelineError::NotRunning)));
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn double_start_is_rejected() {
        let (mut controller, _rx) = controller();
        controller.start().unwrap();
        assert!(matches!(
            controller.start(),
            Err(PipelineError::AlreadyRunning)
        ));
        assert_eq!(controller.state(), PipelineState::Running);
        controller.stop().unwrap();
        assert_eq!(controller.state(), PipelineState::Idle);
    }

    #[test]
    fn running_pipeline_delivers_resized_frames_then_clears() {
        let (mut controller, rx) = controller();
        controller.start().unwrap();

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        match first {
            FrameDelivery::Frame { image, fps } => {
                assert_eq!((image.width(), image.height()), (16, 12));
                assert!(fps.parse::<f64>().unwrap() > 0.0);
            }
            FrameDelivery::Cleared => panic!("cleared before any frame"),
        }

        controller.stop().unwrap();
        let last = rx.try_iter().last().unwrap();
        assert!(last.is_cleared());
        assert!(controller.stats().frames_delivered >= 1);
    }

    #[test]
    fn failed_open_leaves_controller_idle() {
        let (controller, _rx) = controller();
        let mut controller = controller.with_source_opener(|_| {
            Err(PipelineError::Device("no camera".into()))
        });
        assert!(matches!(controller.start(), Err(PipelineError::Device(_))));
        assert_eq!(controller.state(), PipelineState::Idle);
    }
}
