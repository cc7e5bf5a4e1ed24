//! Synthetic frame source.
//!
//! Produces a deterministic moving gradient at the configured size and rate.
//! Used by tests and by the binary's `--synthetic` mode when no camera is
//! attached.

use std::time::{Duration, Instant};

use super::{CaptureSettings, FrameSource, SourceStats};
use crate::error::{PipelineError, Result};
use crate::frame::Frame;

pub struct SyntheticSource {
    width: u32,
    height: u32,
    interval: Duration,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    closed: bool,
}

impl SyntheticSource {
    pub fn open(settings: &CaptureSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(PipelineError::Device(format!(
                "unsupported synthetic mode {}x{}",
                settings.width, settings.height
            )));
        }
        log::info!(
            "SyntheticSource: opened {}x{} @ {} fps",
            settings.width,
            settings.height,
            settings.fps
        );
        Ok(Self {
            width: settings.width,
            height: settings.height,
            interval: settings.frame_interval(),
            frame_count: 0,
            last_frame_at: None,
            closed: false,
        })
    }

    /// Wait out the remainder of the frame period, like a camera would.
    fn pace(&mut self) {
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.width as usize;
        let height = self.height as usize;
        let shift = self.frame_count as usize;
        let mut pixels = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                pixels.push(((x + shift) * 255 / width.max(1)) as u8);
                pixels.push((y * 255 / height.max(1)) as u8);
                pixels.push(((x + y + shift) % 256) as u8);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame> {
        if self.closed {
            return Err(PipelineError::EndOfStream);
        }
        self.pace();
        self.frame_count += 1;
        Frame::new(self.generate_pixels(), self.width, self.height, 3)
    }

    fn close(&mut self) {
        if !self.closed {
            log::info!(
                "SyntheticSource: closed after {} frames",
                self.frame_count
            );
        }
        self.closed = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            device: "synthetic".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::SourceKind;

    fn settings() -> CaptureSettings {
        CaptureSettings {
            source: SourceKind::Synthetic,
            device_index: 0,
            width: 8,
            height: 4,
            fps: 1000,
        }
    }

    #[test]
    fn frames_change_over_time() -> Result<()> {
        let mut source = SyntheticSource::open(&settings())?;
        let first = source.next_frame()?;
        let second = source.next_frame()?;
        assert_eq!(first.pixels().len(), 8 * 4 * 3);
        assert_ne!(first.pixels(), second.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn closed_source_reports_end_of_stream() -> Result<()> {
        let mut source = SyntheticSource::open(&settings())?;
        source.close();
        source.close();
        assert!(matches!(
            source.next_frame(),
            Err(PipelineError::EndOfStream)
        ));
        Ok(())
    }

    #[test]
    fn zero_sized_mode_is_rejected() {
        let mut bad = settings();
        bad.width = 0;
        assert!(matches!(
            SyntheticSource::open(&bad),
            Err(PipelineError::Device(_))
        ));
    }
}
