//! Tensor codec: frames in, detections out.
//!
//! `encode` turns a frame into the detector's input encoding. The reference
//! graph takes a JPEG payload that it decodes itself into a `uint8 [1, H, W, 3]`
//! batch; `InputTensor::batched` performs that same decode on our side so any
//! backend can bind the batch directly.
//!
//! `decode` turns the four raw output tensors into a `DetectionSet`, checking
//! that every output describes exactly one image.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::frame::Frame;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// How frames are packed for the detector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum InputEncoding {
    /// Lossy JPEG payload, as the reference graph expects.
    Jpeg { quality: u8 },
    /// Uncompressed RGB for raw-tensor models.
    Raw,
}

impl Default for InputEncoding {
    fn default() -> Self {
        InputEncoding::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug)]
enum Payload {
    Jpeg(Vec<u8>),
    Raw(Vec<u8>),
}

/// Encoded form of one frame. Consumed by a single inference call.
#[derive(Clone, Debug)]
pub struct InputTensor {
    payload: Payload,
    width: u32,
    height: u32,
}

/// `uint8` image batch of shape `[1, height, width, 3]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchedImage {
    pub shape: [usize; 4],
    pub data: Vec<u8>,
}

impl InputTensor {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The JPEG bytes, when JPEG encoding is in use.
    pub fn jpeg_bytes(&self) -> Option<&[u8]> {
        match &self.payload {
            Payload::Jpeg(bytes) => Some(bytes),
            Payload::Raw(_) => None,
        }
    }

    /// Expand the payload into the batched three-channel image the graph
    /// consumes.
    pub fn batched(&self) -> Result<BatchedImage> {
        let data = match &self.payload {
            Payload::Raw(rgb) => rgb.clone(),
            Payload::Jpeg(bytes) => {
                let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
                    .map_err(|e| PipelineError::Encode(format!("JPEG decode failed: {}", e)))?
                    .into_rgb8();
                if decoded.dimensions() != (self.width, self.height) {
                    return Err(PipelineError::Shape(format!(
                        "decoded input is {}x{}, expected {}x{}",
                        decoded.width(),
                        decoded.height(),
                        self.width,
                        self.height
                    )));
                }
                decoded.into_raw()
            }
        };
        Ok(BatchedImage {
            shape: [1, self.height as usize, self.width as usize, 3],
            data,
        })
    }
}

/// One output tensor as `f32` values plus its shape.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl OutputTensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(PipelineError::Shape(format!(
                "tensor of shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

/// The detector's four outputs in their fixed order.
#[derive(Clone, Debug, PartialEq)]
pub struct RawOutputs {
    pub num_detections: OutputTensor,
    pub detection_scores: OutputTensor,
    pub detection_boxes: OutputTensor,
    pub detection_classes: OutputTensor,
}

impl RawOutputs {
    /// Outputs of a graph that found nothing.
    pub fn empty() -> Self {
        let empty = |shape: Vec<usize>| OutputTensor {
            shape,
            data: Vec::new(),
        };
        Self {
            num_detections: OutputTensor {
                shape: vec![1],
                data: vec![0.0],
            },
            detection_scores: empty(vec![1, 0]),
            detection_boxes: empty(vec![1, 0, 4]),
            detection_classes: empty(vec![1, 0]),
        }
    }

    /// Build from outputs listed as
    /// `[num_detections, detection_scores, detection_boxes, detection_classes]`.
    pub fn from_ordered(outputs: Vec<OutputTensor>) -> Result<Self> {
        let found = outputs.len();
        let mut it = outputs.into_iter();
        match (it.next(), it.next(), it.next(), it.next(), it.next()) {
            (Some(num), Some(scores), Some(boxes), Some(classes), None) => Ok(Self {
                num_detections: num,
                detection_scores: scores,
                detection_boxes: boxes,
                detection_classes: classes,
            }),
            _ => Err(PipelineError::Shape(format!(
                "detector produced {} outputs, expected 4",
                found
            ))),
        }
    }
}

/// Decoded result of one inference call, truncated to its valid prefix.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DetectionSet {
    /// Normalized `[ymin, xmin, ymax, xmax]` per detection.
    pub boxes: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub classes: Vec<usize>,
}

impl DetectionSet {
    pub fn count(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TensorCodec {
    encoding: InputEncoding,
}

impl TensorCodec {
    pub fn new(encoding: InputEncoding) -> Self {
        Self { encoding }
    }

    pub fn encoding(&self) -> InputEncoding {
        self.encoding
    }

    /// Encode a frame. Gray and RGBA frames are converted to RGB first.
    pub fn encode(&self, frame: &Frame) -> Result<InputTensor> {
        let (width, height) = (frame.width(), frame.height());
        let rgb = if frame.channels() == 3 {
            frame.pixels().to_vec()
        } else {
            frame.to_rgb_image()?.into_raw()
        };

        let payload = match self.encoding {
            InputEncoding::Raw => Payload::Raw(rgb),
            InputEncoding::Jpeg { quality } => {
                let mut buffer = Cursor::new(Vec::new());
                JpegEncoder::new_with_quality(&mut buffer, quality)
                    .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                    .map_err(|e| PipelineError::Encode(format!("JPEG encode failed: {}", e)))?;
                Payload::Jpeg(buffer.into_inner())
            }
        };

        Ok(InputTensor {
            payload,
            width,
            height,
        })
    }

    /// Extract batch element 0 of each output and keep the first
    /// `floor(num_detections[0])` entries.
    pub fn decode(outputs: &RawOutputs) -> Result<DetectionSet> {
        let num = &outputs.num_detections;
        if num.shape().first() != Some(&1) || num.data().is_empty() {
            return Err(PipelineError::Shape(format!(
                "num_detections has shape {:?}, expected a single-image batch",
                num.shape()
            )));
        }

        let capacity = per_image_capacity("detection_scores", &outputs.detection_scores, &[])?;
        let box_capacity = per_image_capacity("detection_boxes", &outputs.detection_boxes, &[4])?;
        let class_capacity =
            per_image_capacity("detection_classes", &outputs.detection_classes, &[])?;
        if box_capacity != capacity || class_capacity != capacity {
            return Err(PipelineError::Shape(format!(
                "output capacities disagree: scores {}, boxes {}, classes {}",
                capacity, box_capacity, class_capacity
            )));
        }

        let raw_count = num.data()[0];
        if !raw_count.is_finite() || raw_count < 0.0 {
            return Err(PipelineError::Shape(format!(
                "num_detections is {}",
                raw_count
            )));
        }
        let count = raw_count.floor() as usize;
        if count > capacity {
            return Err(PipelineError::Shape(format!(
                "num_detections {} exceeds output capacity {}",
                count, capacity
            )));
        }

        let scores = outputs.detection_scores.data()[..count].to_vec();
        let boxes = outputs.detection_boxes.data()[..count * 4]
            .chunks_exact(4)
            .map(|b| [b[0], b[1], b[2], b[3]])
            .collect();
        let classes = outputs.detection_classes.data()[..count]
            .iter()
            .map(|&c| c as usize)
            .collect();

        Ok(DetectionSet {
            boxes,
            scores,
            classes,
        })
    }
}

/// Validate `[1, n, trailing...]` and return `n`.
fn per_image_capacity(name: &str, tensor: &OutputTensor, trailing: &[usize]) -> Result<usize> {
    let shape = tensor.shape();
    let valid = shape.len() == 2 + trailing.len()
        && shape[0] == 1
        && shape[2..] == *trailing;
    if !valid {
        return Err(PipelineError::Shape(format!(
            "{} has shape {:?}, expected [1, n{}]",
            name,
            shape,
            trailing
                .iter()
                .map(|d| format!(", {}", d))
                .collect::<String>()
        )));
    }
    Ok(shape[1])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(shape: &[usize], data: &[f32]) -> OutputTensor {
        OutputTensor::new(shape.to_vec(), data.to_vec()).unwrap()
    }

    fn outputs(num: f32, scores: &[f32], boxes: &[f32], classes: &[f32]) -> RawOutputs {
        let n = scores.len();
        RawOutputs {
            num_detections: tensor(&[1], &[num]),
            detection_scores: tensor(&[1, n], scores),
            detection_boxes: tensor(&[1, n, 4], boxes),
            detection_classes: tensor(&[1, n], classes),
        }
    }

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let mut pixels = Vec::new();
        for y in 0..height {
            for x in 0..width {
                pixels.extend_from_slice(&[(x * 4) as u8, (y * 4) as u8, 128]);
            }
        }
        Frame::new(pixels, width, height, 3).unwrap()
    }

    #[test]
    fn decode_truncates_to_count() {
        let raw = outputs(
            2.7,
            &[0.9, 0.6, 0.1],
            &[
                0.1, 0.2, 0.5, 0.8, //
                0.0, 0.0, 1.0, 1.0, //
                0.3, 0.3, 0.4, 0.4,
            ],
            &[1.0, 3.0, 7.0],
        );
        let set = TensorCodec::decode(&raw).unwrap();
        assert_eq!(set.count(), 2);
        assert_eq!(set.scores, vec![0.9, 0.6]);
        assert_eq!(set.boxes[0], [0.1, 0.2, 0.5, 0.8]);
        assert_eq!(set.classes, vec![1, 3]);
    }

    #[test]
    fn decode_rejects_multi_image_batches() {
        let mut raw = outputs(1.0, &[0.9], &[0.0, 0.0, 1.0, 1.0], &[1.0]);
        raw.detection_scores = tensor(&[2, 1], &[0.9, 0.8]);
        assert!(matches!(
            TensorCodec::decode(&raw),
            Err(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn decode_rejects_count_beyond_capacity() {
        let raw = outputs(3.0, &[0.9], &[0.0, 0.0, 1.0, 1.0], &[1.0]);
        assert!(matches!(
            TensorCodec::decode(&raw),
            Err(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn decode_rejects_mismatched_box_rank() {
        let mut raw = outputs(1.0, &[0.9], &[0.0, 0.0, 1.0, 1.0], &[1.0]);
        raw.detection_boxes = tensor(&[1, 4], &[0.0, 0.0, 1.0, 1.0]);
        assert!(matches!(
            TensorCodec::decode(&raw),
            Err(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn decode_rejects_nan_count() {
        let raw = outputs(f32::NAN, &[0.9], &[0.0, 0.0, 1.0, 1.0], &[1.0]);
        assert!(matches!(
            TensorCodec::decode(&raw),
            Err(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn from_ordered_requires_four_outputs() {
        let three = vec![tensor(&[1], &[0.0]); 3];
        assert!(RawOutputs::from_ordered(three).is_err());
    }

    #[test]
    fn jpeg_round_trip_stays_close_to_source() {
        let frame = gradient_frame(32, 24);
        let codec = TensorCodec::default();
        let input = codec.encode(&frame).unwrap();
        assert!(input.jpeg_bytes().is_some());

        let batch = input.batched().unwrap();
        assert_eq!(batch.shape, [1, 24, 32, 3]);
        assert_eq!(batch.data.len(), frame.pixels().len());

        let mean_abs_error = batch
            .data
            .iter()
            .zip(frame.pixels())
            .map(|(a, b)| (*a as i32 - *b as i32).unsigned_abs() as f64)
            .sum::<f64>()
            / batch.data.len() as f64;
        assert!(mean_abs_error < 6.0, "mean error {}", mean_abs_error);
    }

    #[test]
    fn raw_encoding_is_exact() {
        let frame = gradient_frame(8, 8);
        let input = TensorCodec::new(InputEncoding::Raw).encode(&frame).unwrap();
        assert!(input.jpeg_bytes().is_none());
        assert_eq!(input.batched().unwrap().data, frame.pixels());
    }

    #[test]
    fn encoding_is_deterministic() {
        let codec = TensorCodec::default();
        let a = codec.encode(&gradient_frame(16, 16)).unwrap();
        let b = codec.encode(&gradient_frame(16, 16)).unwrap();
        assert_eq!(a.jpeg_bytes(), b.jpeg_bytes());
    }

    #[test]
    fn rgba_frames_are_encoded_as_three_channels() {
        let frame = Frame::new(vec![200u8; 4 * 4 * 4], 4, 4, 4).unwrap();
        let input = TensorCodec::new(InputEncoding::Raw).encode(&frame).unwrap();
        let batch = input.batched().unwrap();
        assert_eq!(batch.shape, [1, 4, 4, 3]);
        assert_eq!(batch.data.len(), 4 * 4 * 3);
    }
}
