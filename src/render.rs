//! Detection filtering and overlay rendering.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ab_glyph::{FontArc, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::codec::DetectionSet;
use crate::error::{PipelineError, Result};
use crate::frame::Frame;
use crate::labels::LabelTable;

pub const DEFAULT_THRESHOLD: f32 = 0.8;

/// Box width that maps to a glyph scale of 1.
const FONT_REFERENCE_WIDTH: f32 = 200.0;
const BASE_GLYPH_PX: f32 = 24.0;
const MIN_GLYPH_PX: f32 = 12.0;

/// Built-in label font (DejaVu Sans Mono), used unless a font file is given.
static DEFAULT_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// Axis-aligned rectangle in pixel coordinates, edges inclusive of `left`/`top`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl PixelRect {
    /// Map a normalized `[ymin, xmin, ymax, xmax]` box onto a frame,
    /// truncating toward zero.
    pub fn from_normalized(bbox: [f32; 4], frame_width: u32, frame_height: u32) -> Self {
        let (w, h) = (frame_width as f32, frame_height as f32);
        Self {
            left: (bbox[1] * w) as i32,
            top: (bbox[0] * h) as i32,
            right: (bbox[3] * w) as i32,
            bottom: (bbox[2] * h) as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One filtered, pixel-space result.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub score: f32,
    pub rect: PixelRect,
}

/// Keep entries with `score > threshold`, in detector order.
pub fn filter(
    set: &DetectionSet,
    threshold: f32,
    frame_width: u32,
    frame_height: u32,
) -> Vec<Detection> {
    set.scores
        .iter()
        .zip(&set.boxes)
        .zip(&set.classes)
        .filter(|((score, _), _)| **score > threshold)
        .map(|((&score, &bbox), &class_id)| Detection {
            class_id,
            score,
            rect: PixelRect::from_normalized(bbox, frame_width, frame_height),
        })
        .collect()
}

/// `"<name>: <score>"` with the score to two decimals.
pub fn label_text(name: &str, score: f32) -> String {
    format!("{}: {:.2}", name, score)
}

/// Glyph height for a label attached to a box of `box_width` pixels.
pub fn glyph_px(box_width: i32) -> f32 {
    (box_width.max(0) as f32 / FONT_REFERENCE_WIDTH * BASE_GLYPH_PX).max(MIN_GLYPH_PX)
}

/// Colors, stroke and output size for overlays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderStyle {
    pub text_color: [u8; 3],
    pub box_color: [u8; 3],
    pub stroke_width: u32,
    pub display_width: u32,
    pub display_height: u32,
}

impl Default for RenderStyle {
    fn default() -> Self {
        Self {
            text_color: [0, 255, 0],
            box_color: [255, 0, 0],
            stroke_width: 2,
            display_width: 1280,
            display_height: 720,
        }
    }
}

pub struct DetectionRenderer {
    style: RenderStyle,
    font: Option<FontArc>,
    warned_missing_font: AtomicBool,
}

impl DetectionRenderer {
    /// Renderer using the built-in label font.
    pub fn new(style: RenderStyle) -> Self {
        let font = FontArc::try_from_slice(DEFAULT_FONT)
            .map_err(|e| log::error!("built-in label font is unusable: {}", e))
            .ok();
        Self {
            style,
            font,
            warned_missing_font: AtomicBool::new(false),
        }
    }

    /// Replace the built-in font with a TrueType/OpenType file.
    pub fn with_font_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::Config(format!("failed to read font {}: {}", path.display(), e))
        })?;
        let font = FontArc::try_from_vec(bytes).map_err(|e| {
            PipelineError::Config(format!("invalid font {}: {}", path.display(), e))
        })?;
        self.font = Some(font);
        Ok(self)
    }

    pub fn style(&self) -> &RenderStyle {
        &self.style
    }

    /// Draw `detections` onto `frame` and resize it for display.
    ///
    /// Each label is drawn before its box, and detections are drawn in
    /// order, so later strokes overdraw earlier text where they meet.
    pub fn render(
        &self,
        frame: Frame,
        detections: &[Detection],
        labels: &LabelTable,
    ) -> Result<Frame> {
        let captured_at = frame.captured_at();
        let mut canvas = frame.into_rgb_image()?;

        for detection in detections {
            let text = match labels.name_for(detection.class_id) {
                Ok(name) => label_text(name, detection.score),
                Err(err) => {
                    log::warn!("{}; drawing numeric label", err);
                    label_text(&format!("class {}", detection.class_id), detection.score)
                }
            };
            self.draw_label(&mut canvas, detection.rect, &text);
            self.draw_box(&mut canvas, detection.rect);
        }

        let (dw, dh) = (self.style.display_width, self.style.display_height);
        let output = if canvas.dimensions() == (dw, dh) {
            canvas
        } else {
            imageops::resize(&canvas, dw, dh, FilterType::Triangle)
        };
        Ok(Frame::from_rgb_image(output, captured_at))
    }

    fn draw_box(&self, canvas: &mut RgbImage, rect: PixelRect) {
        let color = Rgb(self.style.box_color);
        for inset in 0..self.style.stroke_width as i32 {
            let width = rect.width() - 2 * inset;
            let height = rect.height() - 2 * inset;
            if width <= 0 || height <= 0 {
                break;
            }
            let outline = Rect::at(rect.left + inset, rect.top + inset)
                .of_size(width as u32, height as u32);
            draw_hollow_rect_mut(canvas, outline, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, rect: PixelRect, text: &str) {
        let Some(font) = self.font.as_ref() else {
            if !self.warned_missing_font.swap(true, Ordering::Relaxed) {
                log::warn!("no usable label font; drawing boxes without text");
            }
            return;
        };
        let px = glyph_px(rect.width());
        // Text sits on the box's top edge, like a baseline anchored at the corner.
        let y = rect.top - px as i32;
        draw_text_mut(
            canvas,
            Rgb(self.style.text_color),
            rect.left,
            y,
            PxScale::from(px),
            font,
            text,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(scores: &[f32], boxes: &[[f32; 4]], classes: &[usize]) -> DetectionSet {
        DetectionSet {
            boxes: boxes.to_vec(),
            scores: scores.to_vec(),
            classes: classes.to_vec(),
        }
    }

    fn labels() -> LabelTable {
        LabelTable::from_lines(["person", "car", "dog"]).unwrap()
    }

    #[test]
    fn filter_keeps_only_scores_above_threshold() {
        let detections = filter(
            &set(
                &[0.95, 0.5],
                &[[0.1, 0.2, 0.5, 0.8], [0.0, 0.0, 1.0, 1.0]],
                &[1, 2],
            ),
            0.8,
            1280,
            720,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
        assert_eq!(detections[0].score, 0.95);
    }

    #[test]
    fn score_equal_to_threshold_is_excluded() {
        let detections = filter(
            &set(&[0.8, 0.80001], &[[0.0; 4], [0.0; 4]], &[0, 1]),
            0.8,
            100,
            100,
        );
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn filter_preserves_detector_order() {
        let detections = filter(
            &set(
                &[0.85, 0.99, 0.9],
                &[[0.0; 4], [0.0; 4], [0.0; 4]],
                &[2, 0, 1],
            ),
            0.8,
            10,
            10,
        );
        let ids: Vec<usize> = detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }

    #[test]
    fn normalized_box_maps_with_truncation() {
        let rect = PixelRect::from_normalized([0.1, 0.2, 0.5, 0.8], 1280, 720);
        assert_eq!(
            rect,
            PixelRect {
                left: 256,
                top: 72,
                right: 1024,
                bottom: 360
            }
        );
    }

    #[test]
    fn mapped_boxes_stay_inside_the_frame() {
        let (w, h) = (1279u32, 719u32);
        let steps = [0.0f32, 0.001, 0.1, 0.33, 0.5, 0.999, 1.0];
        for &ymin in &steps {
            for &ymax in steps.iter().filter(|&&v| v >= ymin) {
                for &xmin in &steps {
                    for &xmax in steps.iter().filter(|&&v| v >= xmin) {
                        let r = PixelRect::from_normalized([ymin, xmin, ymax, xmax], w, h);
                        assert!(0 <= r.left && r.left <= r.right && r.right <= w as i32);
                        assert!(0 <= r.top && r.top <= r.bottom && r.bottom <= h as i32);
                    }
                }
            }
        }
    }

    #[test]
    fn label_text_uses_two_decimals() {
        assert_eq!(label_text("car", 0.956), "car: 0.96");
        assert_eq!(label_text("dog", 0.8), "dog: 0.80");
    }

    #[test]
    fn glyph_size_scales_with_box_width() {
        assert_eq!(glyph_px(400), 48.0);
        assert_eq!(glyph_px(50), MIN_GLYPH_PX);
        assert_eq!(glyph_px(-10), MIN_GLYPH_PX);
    }

    #[test]
    fn render_draws_rectangle_and_resizes() {
        let frame = Frame::new(vec![0u8; 100 * 50 * 3], 100, 50, 3).unwrap();
        let renderer = DetectionRenderer::new(RenderStyle {
            display_width: 100,
            display_height: 50,
            ..RenderStyle::default()
        });
        let detections = vec![Detection {
            class_id: 1,
            score: 0.9,
            rect: PixelRect {
                left: 10,
                top: 10,
                right: 40,
                bottom: 30,
            },
        }];

        let out = renderer.render(frame, &detections, &labels()).unwrap();
        let image = out.to_rgb_image().unwrap();
        assert_eq!(image.get_pixel(10, 10).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(11, 20).0, [255, 0, 0]);
        assert_eq!(image.get_pixel(12, 20).0, [0, 0, 0]);
        assert_eq!(image.get_pixel(25, 20).0, [0, 0, 0]);

        let small = DetectionRenderer::new(RenderStyle {
            display_width: 40,
            display_height: 20,
            ..RenderStyle::default()
        });
        let frame = Frame::new(vec![0u8; 100 * 50 * 3], 100, 50, 3).unwrap();
        let resized = small.render(frame, &[], &labels()).unwrap();
        assert_eq!((resized.width(), resized.height()), (40, 20));
    }

    fn is_text_green(pixel: &Rgb<u8>) -> bool {
        let [r, g, b] = pixel.0;
        g > 128 && r < 96 && b < 96
    }

    #[test]
    fn default_style_draws_label_above_box() {
        let renderer = DetectionRenderer::new(RenderStyle::default());
        assert_eq!(renderer.style().display_width, 1280);
        let frame = Frame::new(vec![0u8; 1280 * 720 * 3], 1280, 720, 3).unwrap();
        let rect = PixelRect::from_normalized([0.5, 0.25, 0.9, 0.75], 1280, 720);
        let detections = vec![Detection {
            class_id: 0,
            score: 0.95,
            rect,
        }];

        let image = renderer
            .render(frame, &detections, &labels())
            .unwrap()
            .to_rgb_image()
            .unwrap();

        let text_top = rect.top - glyph_px(rect.width()) as i32;
        let mut above = 0;
        for (x, y, pixel) in image.enumerate_pixels() {
            if is_text_green(pixel) {
                assert!(x as i32 >= rect.left, "text left of its anchor at ({}, {})", x, y);
                if (y as i32) < rect.top {
                    above += 1;
                    assert!(y as i32 >= text_top - 2, "text too high at ({}, {})", x, y);
                }
            }
        }
        assert!(above > 50, "expected label pixels above the box, got {}", above);

        // The box is drawn after its label, so its top edge stays intact.
        for x in rect.left..rect.right {
            assert_eq!(image.get_pixel(x as u32, rect.top as u32).0, [255, 0, 0]);
        }
    }

    #[test]
    fn no_text_is_drawn_without_detections() {
        let renderer = DetectionRenderer::new(RenderStyle {
            display_width: 64,
            display_height: 64,
            ..RenderStyle::default()
        });
        let frame = Frame::new(vec![0u8; 64 * 64 * 3], 64, 64, 3).unwrap();
        let image = renderer
            .render(frame, &[], &labels())
            .unwrap()
            .to_rgb_image()
            .unwrap();
        assert!(!image.pixels().any(is_text_green));
    }

    #[test]
    fn unknown_class_does_not_fail_render() {
        let frame = Frame::new(vec![0u8; 20 * 20 * 3], 20, 20, 3).unwrap();
        let renderer = DetectionRenderer::new(RenderStyle {
            display_width: 20,
            display_height: 20,
            ..RenderStyle::default()
        });
        let detections = vec![Detection {
            class_id: 42,
            score: 0.99,
            rect: PixelRect {
                left: 0,
                top: 0,
                right: 0,
                bottom: 0,
            },
        }];
        assert!(renderer.render(frame, &detections, &labels()).is_ok());
    }

    #[test]
    fn missing_font_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = DetectionRenderer::new(RenderStyle::default())
            .with_font_file(dir.path().join("absent.ttf"));
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}
