use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::codec::{InputEncoding, DEFAULT_JPEG_QUALITY};
use crate::engine::NodeNames;
use crate::ingest::{CaptureSettings, SourceKind};
use crate::pipeline::PipelineSettings;
use crate::render::{RenderStyle, DEFAULT_THRESHOLD};

const DEFAULT_MODEL_PATH: &str = "models/ssd_mobilenet_v1_coco.onnx";
const DEFAULT_LABELS_PATH: &str = "models/coco91.names";
const DEFAULT_DEVICE_INDEX: u32 = 1;
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;
const DEFAULT_STROKE_WIDTH: u32 = 2;
const DEFAULT_TEXT_COLOR: [u8; 3] = [0, 255, 0];
const DEFAULT_BOX_COLOR: [u8; 3] = [255, 0, 0];

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    capture: Option<CaptureConfigFile>,
    model: Option<ModelConfigFile>,
    detection: Option<DetectionConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<SourceKind>,
    device_index: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    nodes: Option<NodeNames>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    threshold: Option<f32>,
    encoding: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    stroke_width: Option<u32>,
    text_color: Option<[u8; 3]>,
    box_color: Option<[u8; 3]>,
    font_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub capture: CaptureSettings,
    pub model: ModelSettings,
    pub threshold: f32,
    pub encoding: InputEncoding,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub path: PathBuf,
    pub labels_path: PathBuf,
    pub nodes: NodeNames,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    pub stroke_width: u32,
    pub text_color: [u8; 3],
    pub box_color: [u8; 3],
    pub font_path: Option<PathBuf>,
}

impl DetectorConfig {
    /// Load with the config file named by `DETECTOR_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("DETECTOR_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load with an explicit config file. Env overrides still apply.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: DetectorConfigFile) -> Result<Self> {
        let capture_file = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            source: capture_file.source.unwrap_or_default(),
            device_index: capture_file.device_index.unwrap_or(DEFAULT_DEVICE_INDEX),
            width: capture_file.width.unwrap_or(DEFAULT_WIDTH),
            height: capture_file.height.unwrap_or(DEFAULT_HEIGHT),
            fps: capture_file.fps.unwrap_or(DEFAULT_FPS),
        };

        let model_file = file.model.unwrap_or_default();
        let model = ModelSettings {
            path: model_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels_path: model_file
                .labels_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LABELS_PATH)),
            nodes: model_file.nodes.unwrap_or_default(),
        };

        let detection = file.detection.unwrap_or_default();
        let threshold = detection.threshold.unwrap_or(DEFAULT_THRESHOLD);
        let quality = detection.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        let encoding = match detection.encoding.as_deref().map(str::trim) {
            None | Some("jpeg") => InputEncoding::Jpeg { quality },
            Some("raw") => InputEncoding::Raw,
            Some(other) => {
                return Err(anyhow!(
                    "detection.encoding must be 'jpeg' or 'raw', got '{}'",
                    other
                ))
            }
        };

        // Display defaults to the capture size unless given explicitly.
        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            width: display_file.width.unwrap_or(capture.width),
            height: display_file.height.unwrap_or(capture.height),
            stroke_width: display_file.stroke_width.unwrap_or(DEFAULT_STROKE_WIDTH),
            text_color: display_file.text_color.unwrap_or(DEFAULT_TEXT_COLOR),
            box_color: display_file.box_color.unwrap_or(DEFAULT_BOX_COLOR),
            font_path: display_file.font_path,
        };

        Ok(Self {
            capture,
            model,
            threshold,
            encoding,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(index) = std::env::var("DETECTOR_DEVICE_INDEX") {
            self.capture.device_index = index
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECTOR_DEVICE_INDEX must be a non-negative integer"))?;
        }
        if let Ok(path) = std::env::var("DETECTOR_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = PathBuf::from(path);
            }
        }
        if let Ok(path) = std::env::var("DETECTOR_LABELS_PATH") {
            if !path.trim().is_empty() {
                self.model.labels_path = PathBuf::from(path);
            }
        }
        if let Ok(threshold) = std::env::var("DETECTOR_THRESHOLD") {
            self.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("DETECTOR_THRESHOLD must be a number"))?;
        }
        if let Ok(source) = std::env::var("DETECTOR_SOURCE") {
            if !source.trim().is_empty() {
                self.capture.source = source.parse().map_err(|e: String| anyhow!(e))?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(anyhow!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if self.display.width == 0 || self.display.height == 0 {
            return Err(anyhow!("display width and height must be greater than zero"));
        }
        if self.display.stroke_width == 0 {
            return Err(anyhow!("display stroke_width must be at least 1"));
        }
        if let InputEncoding::Jpeg { quality } = self.encoding {
            if !(1..=100).contains(&quality) {
                return Err(anyhow!("jpeg_quality must be within 1..=100, got {}", quality));
            }
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            capture: self.capture.clone(),
            threshold: self.threshold,
            encoding: self.encoding,
        }
    }

    pub fn render_style(&self) -> RenderStyle {
        RenderStyle {
            text_color: self.display.text_color,
            box_color: self.display.box_color,
            stroke_width: self.display.stroke_width,
            display_width: self.display.width,
            display_height: self.display.height,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            model: ModelSettings {
                path: PathBuf::from(DEFAULT_MODEL_PATH),
                labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
                nodes: NodeNames::default(),
            },
            threshold: DEFAULT_THRESHOLD,
            encoding: InputEncoding::default(),
            display: DisplaySettings {
                width: DEFAULT_WIDTH,
                height: DEFAULT_HEIGHT,
                stroke_width: DEFAULT_STROKE_WIDTH,
                text_color: DEFAULT_TEXT_COLOR,
                box_color: DEFAULT_BOX_COLOR,
                font_path: None,
            },
        }
    }
}

fn read_config_file(path: &Path) -> Result<DetectorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
