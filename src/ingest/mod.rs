//! Frame sources.
//!
//! This module provides the camera side of the pipeline:
//! - Synthetic source (tests, demos without hardware)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Every source yields a lazy, infinite, non-restartable sequence of `Frame`s.
//! `next_frame` blocks until the device hands over a frame. Sources do not
//! queue frames: if capture outpaces the consumer, the driver overwrites
//! frames nobody retrieved.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::Frame;

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// Which backend `open` should use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Camera,
    Synthetic,
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "camera" => Ok(SourceKind::Camera),
            "synthetic" => Ok(SourceKind::Synthetic),
            other => Err(format!(
                "unknown source '{}'; expected camera or synthetic",
                other
            )),
        }
    }
}

/// Requested capture mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    pub source: SourceKind,
    /// Camera index (`/dev/video{index}` on Linux).
    pub device_index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: SourceKind::Camera,
            device_index: 1,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

impl CaptureSettings {
    /// One frame period at the configured rate.
    pub fn frame_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(1000 / u64::from(self.fps.max(1)))
    }
}

/// Counters reported by a source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub device: String,
}

/// A camera or video device.
pub trait FrameSource: Send {
    /// Block until the next frame is available.
    ///
    /// Transient grab failures are `PipelineError::Capture`; a finished or
    /// closed stream is `PipelineError::EndOfStream`.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Release the device. Calling it again is a no-op.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Open the source described by `settings`.
pub fn open(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    match settings.source {
        SourceKind::Synthetic => Ok(Box::new(SyntheticSource::open(settings)?)),
        SourceKind::Camera => open_camera(settings),
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(V4l2Source::open(settings)?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_camera(settings: &CaptureSettings) -> Result<Box<dyn FrameSource>> {
    Err(crate::error::PipelineError::Device(format!(
        "camera {} requires the ingest-v4l2 feature",
        settings.device_index
    )))
}
