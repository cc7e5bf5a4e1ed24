use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::{InputTensor, RawOutputs};
use crate::engine::{ExecutionContext, InferenceEngine};
use crate::error::Result;

/// Stub engine for tests and hardware-free runs.
///
/// Every call returns the same scripted outputs, regardless of the input.
pub struct StubEngine {
    outputs: RawOutputs,
    calls: Arc<AtomicU64>,
}

impl StubEngine {
    pub fn new(outputs: RawOutputs) -> Self {
        Self {
            outputs,
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Engine that never detects anything.
    pub fn empty() -> Self {
        Self::new(RawOutputs::empty())
    }

    /// Total inference calls across all contexts.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn new_context(&self) -> Result<Box<dyn ExecutionContext>> {
        Ok(Box::new(StubContext {
            outputs: self.outputs.clone(),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct StubContext {
    outputs: RawOutputs,
    calls: Arc<AtomicU64>,
}

impl ExecutionContext for StubContext {
    fn infer(&mut self, input: &InputTensor) -> Result<RawOutputs> {
        // Touch the payload so encoding problems surface the same way they
        // would with a real graph.
        input.batched()?;
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TensorCodec;
    use crate::frame::Frame;

    #[test]
    fn empty_engine_decodes_to_no_detections() -> Result<()> {
        let engine = StubEngine::empty();
        let mut context = engine.new_context()?;
        let frame = Frame::new(vec![0u8; 16 * 16 * 3], 16, 16, 3)?;
        let input = TensorCodec::default().encode(&frame)?;

        let set = TensorCodec::decode(&context.infer(&input)?)?;
        assert!(set.is_empty());
        assert_eq!(engine.calls(), 1);
        Ok(())
    }
}
