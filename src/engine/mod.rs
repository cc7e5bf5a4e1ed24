//! Inference engines.
//!
//! An `InferenceEngine` owns a loaded, immutable detection graph and lives for
//! the whole process. Each `start()` of the pipeline asks it for a fresh
//! `ExecutionContext`, which the worker thread owns exclusively; contexts are
//! never shared between concurrent callers.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{InputTensor, RawOutputs};
use crate::error::{PipelineError, Result};

pub mod stub;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use stub::StubEngine;
#[cfg(feature = "backend-tract")]
pub use tract::TractEngine;

/// Model paths with this prefix select the stub engine.
pub const STUB_MODEL_PREFIX: &str = "stub://";

/// Graph node names bound on each call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeNames {
    pub input: String,
    pub num_detections: String,
    pub detection_scores: String,
    pub detection_boxes: String,
    pub detection_classes: String,
}

impl Default for NodeNames {
    fn default() -> Self {
        Self {
            input: "image_tensor".to_string(),
            num_detections: "num_detections".to_string(),
            detection_scores: "detection_scores".to_string(),
            detection_boxes: "detection_boxes".to_string(),
            detection_classes: "detection_classes".to_string(),
        }
    }
}

impl NodeNames {
    /// Output names in the fixed decode order.
    pub fn outputs(&self) -> [&str; 4] {
        [
            self.num_detections.as_str(),
            self.detection_scores.as_str(),
            self.detection_boxes.as_str(),
            self.detection_classes.as_str(),
        ]
    }
}

/// A loaded detection graph.
pub trait InferenceEngine: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Create an execution context bound to this graph.
    fn new_context(&self) -> Result<Box<dyn ExecutionContext>>;
}

/// Per-worker evaluation state for one graph.
pub trait ExecutionContext: Send {
    /// Bind `input` to the input node and evaluate the four output nodes.
    ///
    /// Synchronous; this is the dominant cost of a pipeline iteration.
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutputs>;
}

/// Load the engine for `model_path`.
///
/// `stub://...` paths select the stub engine. Anything else is an ONNX graph
/// for the tract backend, pinned to `width` x `height` input frames.
pub fn load<P: AsRef<Path>>(
    model_path: P,
    nodes: &NodeNames,
    width: u32,
    height: u32,
) -> Result<Arc<dyn InferenceEngine>> {
    let model_path = model_path.as_ref();
    if model_path.to_string_lossy().starts_with(STUB_MODEL_PREFIX) {
        log::info!("using stub inference engine ({})", model_path.display());
        return Ok(Arc::new(StubEngine::empty()));
    }
    load_graph(model_path, nodes, width, height)
}

#[cfg(feature = "backend-tract")]
fn load_graph(
    model_path: &Path,
    nodes: &NodeNames,
    width: u32,
    height: u32,
) -> Result<Arc<dyn InferenceEngine>> {
    Ok(Arc::new(TractEngine::load(model_path, nodes, width, height)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_graph(
    model_path: &Path,
    _nodes: &NodeNames,
    _width: u32,
    _height: u32,
) -> Result<Arc<dyn InferenceEngine>> {
    if !model_path.exists() {
        return Err(PipelineError::ModelLoad(format!(
            "model {} not found",
            model_path.display()
        )));
    }
    Err(PipelineError::ModelLoad(format!(
        "loading {} requires the backend-tract feature",
        model_path.display()
    )))
}
