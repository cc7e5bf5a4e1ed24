//! V4L2 camera source.
//!
//! Opens `/dev/video{device_index}`, negotiates the requested size and rate,
//! and streams frames through memory-mapped buffers. Non-RGB device formats
//! are normalized to RGB24 before the frame leaves this module.

use std::time::Instant;

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CaptureSettings, FrameSource, SourceStats};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;

const STREAM_BUFFERS: u32 = 4;

pub struct V4l2Source {
    device_path: String,
    state: Option<V4l2State>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

#[self_referencing]
struct V4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    /// Open the device and start streaming.
    ///
    /// Fails with `PipelineError::Device` if the node cannot be opened, the
    /// device does not accept the requested size, or it only offers a pixel
    /// format we cannot normalize.
    pub fn open(settings: &CaptureSettings) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let device_path = format!("/dev/video{}", settings.device_index);
        let device = v4l::Device::with_path(&device_path)
            .map_err(|e| PipelineError::Device(format!("open {}: {}", device_path, e)))?;

        let mut requested = device
            .format()
            .map_err(|e| PipelineError::Device(format!("read format of {}: {}", device_path, e)))?;
        requested.width = settings.width;
        requested.height = settings.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let active = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", device_path, err);
                device.format().map_err(|e| {
                    PipelineError::Device(format!("read format of {}: {}", device_path, e))
                })?
            }
        };

        if active.width != settings.width || active.height != settings.height {
            return Err(PipelineError::Device(format!(
                "{} does not support {}x{} (offered {}x{})",
                device_path, settings.width, settings.height, active.width, active.height
            )));
        }
        let format = PixelFormat::from_fourcc(&active.fourcc.repr).ok_or_else(|| {
            PipelineError::Device(format!(
                "{} offers unsupported pixel format {}",
                device_path, active.fourcc
            ))
        })?;

        if settings.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(settings.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", device_path, err);
            }
        }

        let state = V4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            },
        }
        .try_build()
        .map_err(|e| PipelineError::Device(format!("start stream on {}: {}", device_path, e)))?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?} @ {} fps)",
            device_path,
            active.width,
            active.height,
            format,
            settings.fps
        );

        Ok(Self {
            device_path,
            state: Some(state),
            format,
            width: active.width,
            height: active.height,
            frame_count: 0,
        })
    }
}

impl FrameSource for V4l2Source {
    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().ok_or(PipelineError::EndOfStream)?;
        let (width, height, format) = (self.width, self.height, self.format);
        let mut captured_at = Instant::now();
        let rgb = state
            .with_stream_mut(|stream| {
                let (buf, meta) = stream.next()?;
                captured_at = Instant::now();
                let used = match meta.bytesused as usize {
                    0 => buf.len(),
                    n => n.min(buf.len()),
                };
                Ok::<_, std::io::Error>(normalize_to_rgb(&buf[..used], width, height, format))
            })
            .map_err(|e| PipelineError::Capture(format!("grab from {}: {}", self.device_path, e)))??;

        self.frame_count += 1;
        Frame::with_capture_time(rgb, width, height, 3, captured_at)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: closed {} after {} frames",
                self.device_path,
                self.frame_count
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: self.device_path.clone(),
        }
    }
}

impl Drop for V4l2Source {
    fn drop(&mut self) {
        self.close();
    }
}
