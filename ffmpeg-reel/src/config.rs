use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use ffmpeg_next::{Rational, format::Pixel};

use crate::error::{PipelineError, Result};
use crate::frame::{InputImageRef, strip_file_scheme};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Caller input exactly as the host application hands it over: numbers are
/// untrusted floating point values, locators are paths or `file://` URIs.
#[derive(Debug, Clone, Default)]
pub struct PipelineRequest {
    pub images: Vec<String>,
    pub output_path: String,
    pub fps: f64,
    pub bitrate: f64,
    pub width: f64,
    pub height: f64,
}

impl PipelineRequest {
    /// Checks every field before anything is allocated.
    pub fn validate(&self) -> Result<(PipelineConfig, Vec<InputImageRef>)> {
        if self.images.is_empty() {
            return Err(PipelineError::validation("no images provided"));
        }
        let config = PipelineConfig::new(
            self.fps,
            self.bitrate,
            self.width,
            self.height,
            &self.output_path,
        )?;
        config.timestamp_us(self.images.len() - 1)?;
        Ok((config, InputImageRef::from_locators(&self.images)))
    }
}

/// Validated, immutable parameters of one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    fps: f64,
    bitrate: u64,
    width: u32,
    height: u32,
    output_path: PathBuf,
}

impl PipelineConfig {
    pub fn new(
        fps: f64,
        bitrate: f64,
        width: f64,
        height: f64,
        output_path: impl AsRef<str>,
    ) -> Result<Self> {
        let fps = positive("fps", fps)?;
        let bitrate = positive("bitrate", bitrate)?;
        let width = positive("width", width)?;
        let height = positive("height", height)?;

        let bitrate = whole("bitrate", bitrate, u32::MAX as f64)? as u64;
        let width = whole("width", width, u16::MAX as f64)? as u32;
        let height = whole("height", height, u16::MAX as f64)? as u32;

        let frame_duration = MICROS_PER_SECOND as f64 / fps;
        if frame_duration < 1.0 {
            return Err(PipelineError::validation(format!(
                "fps {} leaves no room for a whole microsecond per frame",
                fps
            )));
        }
        if frame_duration >= i64::MAX as f64 || Rational::from(fps).numerator() == 0 {
            return Err(PipelineError::validation(format!(
                "fps {} is too small to time frames",
                fps
            )));
        }

        let output_path = strip_file_scheme(output_path.as_ref());
        if output_path.is_empty() {
            return Err(PipelineError::validation("output path is empty"));
        }

        Ok(Self {
            fps,
            bitrate,
            width,
            height,
            output_path: PathBuf::from(output_path),
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Truncated, never zero for a validated config.
    pub fn frame_duration_us(&self) -> i64 {
        (MICROS_PER_SECOND as f64 / self.fps) as i64
    }

    /// Presentation time of the image at `index`. Fails when it does not
    /// fit in an `i64` of microseconds.
    pub fn timestamp_us(&self, index: usize) -> Result<i64> {
        i64::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.frame_duration_us()))
            .ok_or_else(|| {
                PipelineError::validation(format!(
                    "timestamp of image #{} overflows at {} fps",
                    index, self.fps
                ))
            })
    }

    pub fn frame_rate(&self) -> Rational {
        Rational::from(self.fps)
    }

    /// Frames between forced keyframes for an interval given in seconds.
    pub fn keyframe_interval_frames(&self, seconds: u32) -> u32 {
        ((self.fps * seconds as f64).round() as u32).max(1)
    }
}

fn positive(name: &str, value: f64) -> Result<f64> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PipelineError::validation(format!(
            "{} must be a positive number, got {}",
            name, value
        )));
    }
    Ok(value)
}

fn whole(name: &str, value: f64, max: f64) -> Result<f64> {
    let truncated = value.trunc();
    if truncated < 1.0 || truncated > max {
        return Err(PipelineError::validation(format!(
            "{} must be between 1 and {}, got {}",
            name, max, value
        )));
    }
    Ok(truncated)
}

/// Encoder and container choices. Not part of the caller request.
#[derive(Debug, Clone)]
pub struct Settings {
    pub codec: String,
    pub pixel_format: Pixel,
    pub keyframe_interval_secs: u32,
    pub prefer_hardware: bool,
    pub container: String,
    pub preset: Option<String>,
    pub tune: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            codec: "libx264".to_string(),
            pixel_format: Pixel::YUV420P,
            keyframe_interval_secs: 1,
            prefer_hardware: false,
            container: "mp4".to_string(),
            preset: Some("ultrafast".to_string()),
            tune: Some("zerolatency".to_string()),
        }
    }
}

/// Timing knobs of the drain loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuning {
    /// Single `drain_output` poll.
    pub drain_timeout: Duration,
    /// How long `TryAgain` is tolerated without any output.
    pub stall_timeout: Duration,
    /// Frames the encoder worker may hold before `submit_frame` blocks.
    pub input_queue_depth: usize,
    /// Submitted frames still awaiting output before the frame loop stops
    /// submitting and waits on the encoder.
    pub max_in_flight: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_millis(10),
            stall_timeout: Duration::from_secs(10),
            input_queue_depth: 2,
            max_in_flight: 32,
        }
    }
}

pub fn tuning() -> &'static Tuning {
    static TUNING: LazyLock<Tuning> = LazyLock::new(Tuning::default);
    &TUNING
}
