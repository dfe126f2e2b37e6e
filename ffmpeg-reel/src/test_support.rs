//! Fakes shared by the unit tests. Every fake appends to one [`Shared`]
//! record so tests can assert the interleaving of calls across components.

use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_next::format::Pixel;

use crate::{
    config::PipelineConfig,
    encoder::{DrainResult, EncoderBackend},
    error::{PipelineError, Result},
    frame::{InputImageRef, ScaledFrame},
    output::ContainerWriter,
    packet::AccessUnit,
    source::FrameSource,
    stream::TrackDescriptor,
};

/// Writes a binary PPM filled with one color.
pub fn write_ppm(path: &Path, width: u32, height: u32, rgb: [u8; 3]) {
    let mut file = std::fs::File::create(path).unwrap();
    write!(file, "P6\n{} {}\n255\n", width, height).unwrap();
    let pixels: Vec<u8> = (0..width * height).flat_map(|_| rgb).collect();
    file.write_all(&pixels).unwrap();
}

#[derive(Debug, Default)]
pub struct Record {
    pub calls: Vec<String>,
    pub written: Vec<AccessUnit>,
    pub track: Option<TrackDescriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct Shared(Arc<Mutex<Record>>);

impl Shared {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().calls.push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().calls.clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.0.lock().unwrap().calls.iter().position(|c| c == call)
    }

    pub fn written(&self) -> Vec<AccessUnit> {
        self.0.lock().unwrap().written.clone()
    }

    pub fn track(&self) -> Option<TrackDescriptor> {
        self.0.lock().unwrap().track.clone()
    }
}

pub struct FakeSource {
    shared: Shared,
    pub fail_at: Option<usize>,
}

impl FakeSource {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared,
            fail_at: None,
        }
    }
}

impl FrameSource for FakeSource {
    fn load(&mut self, image: &InputImageRef) -> Result<ScaledFrame> {
        self.shared.push(format!("load {}", image.index()));
        if self.fail_at == Some(image.index()) {
            return Err(PipelineError::ImageLoad {
                index: image.index(),
                locator: image.locator().to_string(),
                source: anyhow::anyhow!("corrupt image"),
            });
        }
        Ok(ScaledFrame::blank(Pixel::YUV420P, 16, 16))
    }
}

/// Encoder that answers every frame with one access unit stamped with the
/// submitted timestamp, `delay_frames` frames late. Knobs inject protocol
/// faults.
pub struct ScriptedEncoder {
    shared: Shared,
    queue: VecDeque<DrainResult>,
    held: VecDeque<AccessUnit>,
    frame_duration_us: i64,
    last_pts_us: i64,
    pub extradata: Option<Bytes>,
    pub negotiate_twice: bool,
    pub silent: bool,
    pub empty_payload: bool,
    pub fail_configure: bool,
    pub delay_frames: usize,
    pub encoder_name: Option<String>,
}

impl ScriptedEncoder {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared,
            queue: VecDeque::new(),
            held: VecDeque::new(),
            frame_duration_us: 0,
            last_pts_us: 0,
            extradata: Some(Bytes::from_static(&[0x01, 0x64, 0x00, 0x1f])),
            negotiate_twice: false,
            silent: false,
            empty_payload: false,
            fail_configure: false,
            delay_frames: 0,
            encoder_name: None,
        }
    }

    /// Queues an arbitrary result behind whatever is already pending.
    pub fn push_output(&mut self, result: DrainResult) {
        self.queue.push_back(result);
    }

    fn track(&self) -> TrackDescriptor {
        let track = TrackDescriptor::new(ffmpeg_next::codec::Id::H264, 16, 16)
            .with_extradata(self.extradata.clone().unwrap_or_default());
        match &self.encoder_name {
            Some(name) => track.with_encoder_name(name.as_str()),
            None => track,
        }
    }

    fn release_held(&mut self, keep: usize) {
        while self.held.len() > keep {
            if let Some(unit) = self.held.pop_front() {
                self.queue.push_back(DrainResult::AccessUnit(unit));
            }
        }
    }
}

impl EncoderBackend for ScriptedEncoder {
    fn configure(&mut self, config: &PipelineConfig) -> anyhow::Result<()> {
        self.shared.push("configure");
        if self.fail_configure {
            anyhow::bail!("unsupported configuration");
        }
        self.frame_duration_us = config.frame_duration_us();
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        self.shared.push("start");
        if self.silent {
            return Ok(());
        }
        self.queue.push_back(DrainResult::FormatNegotiated(self.track()));
        if self.negotiate_twice {
            self.queue.push_back(DrainResult::FormatNegotiated(self.track()));
        }
        if let Some(extradata) = self.extradata.clone() {
            self.queue
                .push_back(DrainResult::AccessUnit(AccessUnit::codec_config(extradata)));
        }
        Ok(())
    }

    fn submit_frame(&mut self, _frame: ScaledFrame, timestamp_us: i64) -> anyhow::Result<()> {
        self.shared.push(format!("submit {}", timestamp_us));
        if self.silent {
            return Ok(());
        }
        let payload = if self.empty_payload {
            Bytes::new()
        } else {
            Bytes::from_static(&[0x00, 0x00, 0x01, 0x65])
        };
        self.last_pts_us = timestamp_us;
        self.held.push_back(AccessUnit::data(
            payload,
            timestamp_us,
            self.frame_duration_us,
            timestamp_us == 0,
        ));
        self.release_held(self.delay_frames);
        Ok(())
    }

    fn poll_output(&mut self, timeout: Duration) -> anyhow::Result<DrainResult> {
        match self.queue.pop_front() {
            Some(result) => Ok(result),
            None => {
                std::thread::sleep(timeout);
                Ok(DrainResult::TryAgain)
            }
        }
    }

    fn signal_end_of_input(&mut self) -> anyhow::Result<()> {
        self.shared.push("end_of_input");
        if !self.silent {
            self.release_held(0);
            self.queue.push_back(DrainResult::AccessUnit(AccessUnit::end_of_stream(
                self.last_pts_us,
            )));
        }
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.shared.push("encoder_stop");
        Ok(())
    }

    fn release(&mut self) {
        self.shared.push("encoder_release");
    }
}

pub struct RecordingWriter {
    shared: Shared,
    pub fail_write: bool,
}

impl RecordingWriter {
    pub fn new(shared: Shared) -> Self {
        Self {
            shared,
            fail_write: false,
        }
    }
}

impl ContainerWriter for RecordingWriter {
    fn begin(&mut self, track: &TrackDescriptor) -> anyhow::Result<()> {
        self.shared.push("begin");
        self.shared.0.lock().unwrap().track = Some(track.clone());
        Ok(())
    }

    fn write(&mut self, unit: &AccessUnit) -> anyhow::Result<()> {
        self.shared.push(format!("write {}", unit.pts_us));
        if self.fail_write {
            anyhow::bail!("disk full");
        }
        self.shared.0.lock().unwrap().written.push(unit.clone());
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.shared.push("finish");
        Ok(())
    }

    fn release(&mut self) {
        self.shared.push("release");
    }
}
