#![cfg(feature = "backend-tract")]

use std::path::Path;
use std::sync::Arc;

use tract_onnx::prelude::*;

use crate::codec::{InputTensor, OutputTensor, RawOutputs};
use crate::engine::{ExecutionContext, InferenceEngine, NodeNames};
use crate::error::{PipelineError, Result};

type DetectionPlan = TypedRunnableModel<TypedModel>;

/// Tract-based engine for ONNX exports of a detection graph.
///
/// The graph's input is pinned to `uint8 [1, height, width, 3]` at load time,
/// so every frame fed to a context must have the configured size.
pub struct TractEngine {
    plan: Arc<DetectionPlan>,
    width: u32,
    height: u32,
}

impl TractEngine {
    /// Load an ONNX model from disk, bind the named nodes, and optimize it.
    pub fn load<P: AsRef<Path>>(
        model_path: P,
        nodes: &NodeNames,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(PipelineError::ModelLoad(format!(
                "model {} not found",
                model_path.display()
            )));
        }

        let plan = Self::build_plan(model_path, nodes, width, height).map_err(|e| {
            PipelineError::ModelLoad(format!("{}: {:#}", model_path.display(), e))
        })?;

        log::info!(
            "TractEngine: loaded {} (input {} as 1x{}x{}x3)",
            model_path.display(),
            nodes.input,
            height,
            width
        );

        Ok(Self {
            plan: Arc::new(plan),
            width,
            height,
        })
    }

    fn build_plan(
        model_path: &Path,
        nodes: &NodeNames,
        width: u32,
        height: u32,
    ) -> TractResult<DetectionPlan> {
        tract_onnx::onnx()
            .model_for_path(model_path)?
            .with_input_names([nodes.input.as_str()])?
            .with_output_names(nodes.outputs())?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    u8::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )?
            .into_optimized()?
            .into_runnable()
    }
}

impl InferenceEngine for TractEngine {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn new_context(&self) -> Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(TractContext {
            plan: Arc::clone(&self.plan),
            width: self.width,
            height: self.height,
        }))
    }
}

struct TractContext {
    plan: Arc<DetectionPlan>,
    width: u32,
    height: u32,
}

impl TractContext {
    fn build_input(&self, input: &InputTensor) -> Result<Tensor> {
        if input.width() != self.width || input.height() != self.height {
            return Err(PipelineError::Shape(format!(
                "frame size {}x{} does not match model input {}x{}",
                input.width(),
                input.height(),
                self.width,
                self.height
            )));
        }
        let batch = input.batched()?;
        Tensor::from_shape::<u8>(&batch.shape, &batch.data)
            .map_err(|e| PipelineError::Shape(format!("input tensor: {:#}", e)))
    }
}

impl ExecutionContext for TractContext {
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutputs> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .plan
            .run(tvec!(tensor.into()))
            .map_err(|e| PipelineError::Inference(format!("{:#}", e)))?;

        let converted = outputs
            .iter()
            .map(|value| to_output_tensor(value))
            .collect::<Result<Vec<_>>>()?;
        RawOutputs::from_ordered(converted)
    }
}

fn to_output_tensor(value: &Tensor) -> Result<OutputTensor> {
    let values = value
        .cast_to::<f32>()
        .map_err(|e| PipelineError::Inference(format!("output is not numeric: {:#}", e)))?;
    let view = values
        .to_array_view::<f32>()
        .map_err(|e| PipelineError::Inference(format!("output view: {:#}", e)))?;
    OutputTensor::new(view.shape().to_vec(), view.iter().copied().collect())
}
