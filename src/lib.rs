//! Live object detection on a camera stream.
//!
//! Frames are pulled from a camera, encoded for an SSD-style detection graph,
//! evaluated, filtered by confidence and drawn over with labeled boxes. The
//! annotated frame and a per-iteration throughput figure are handed to a
//! display sink.
//!
//! # Module Structure
//!
//! - `labels`: class id to name lookup
//! - `ingest`: frame sources (synthetic, V4L2)
//! - `codec`: frame to input tensor, raw outputs to `DetectionSet`
//! - `engine`: loaded detection graphs and per-worker execution contexts
//! - `render`: threshold filtering and overlay drawing
//! - `pipeline`: the worker loop and its start/stop lifecycle
//! - `config`: layered configuration for the `live-detector` binary

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod labels;
pub mod pipeline;
pub mod render;

pub use codec::{DetectionSet, InputEncoding, InputTensor, RawOutputs, TensorCodec};
pub use engine::{ExecutionContext, InferenceEngine, NodeNames};
pub use error::{PipelineError, Result};
pub use frame::Frame;
pub use ingest::{CaptureSettings, FrameSource, SourceKind};
pub use labels::LabelTable;
pub use pipeline::{
    ChannelSink, DisplaySink, FrameDelivery, PipelineController, PipelineSettings, PipelineState,
    PipelineStats,
};
pub use render::{Detection, DetectionRenderer, PixelRect, RenderStyle};
