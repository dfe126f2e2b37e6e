use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{PipelineConfig, Tuning, tuning},
    encoder::{DrainResult, EncoderBackend, EncoderSession},
    error::{PipelineError, Result},
    frame::InputImageRef,
    output::{ContainerWriter, MuxerSession},
    packet::AccessUnit,
    source::FrameSource,
};

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodeReport {
    pub output_path: PathBuf,
    pub codec: String,
    pub frames_submitted: usize,
    pub samples_written: u64,
    pub codec_config_units: u64,
    pub last_pts_us: Option<i64>,
    pub duration_us: i64,
}

/// One image-sequence encode: frames in, MP4 samples out.
///
/// The pipeline owns both sessions. Whatever happens inside [`Pipeline::run`]
/// the muxer is finalized and the encoder stopped and released before it
/// returns.
pub struct Pipeline<S, E, W>
where
    S: FrameSource,
    E: EncoderBackend,
    W: ContainerWriter,
{
    source: S,
    encoder: EncoderSession<E>,
    muxer: MuxerSession<W>,
    tuning: Tuning,
    cancel: CancellationToken,
    frames_submitted: usize,
    codec_config_units: u64,
    codec: Option<String>,
}

impl<S, E, W> Pipeline<S, E, W>
where
    S: FrameSource,
    E: EncoderBackend,
    W: ContainerWriter,
{
    pub fn new(source: S, encoder: E, writer: W) -> Self {
        Self {
            source,
            encoder: EncoderSession::new(encoder),
            muxer: MuxerSession::new(writer),
            tuning: tuning().clone(),
            cancel: CancellationToken::new(),
            frames_submitted: 0,
            codec_config_units: 0,
            codec: None,
        }
    }

    pub fn with_tuning(mut self, tuning: Tuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(mut self, config: &PipelineConfig, images: &[InputImageRef]) -> Result<EncodeReport> {
        if images.is_empty() {
            return Err(PipelineError::validation("no images provided"));
        }
        config.timestamp_us(images.len() - 1)?;

        let started = Instant::now();
        let encoded = self.encode(config, images);
        let cleaned = self.cleanup();

        match (encoded, cleaned) {
            (Ok(()), Ok(())) => {
                let report = self.report(config);
                log::info!(
                    "encoded {} frames into {} in {:?}",
                    report.frames_submitted,
                    report.output_path.display(),
                    started.elapsed()
                );
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => {
                log::warn!("cleanup after failed encode also failed: {}", cleanup);
                Err(e)
            }
        }
    }

    fn encode(&mut self, config: &PipelineConfig, images: &[InputImageRef]) -> Result<()> {
        self.encoder.configure(config)?;
        self.encoder.start()?;

        for image in images {
            if self.cancel.is_cancelled() {
                log::info!("encode cancelled before {}", image);
                return Err(PipelineError::Cancelled(image.index()));
            }
            let frame = self.source.load(image)?;
            let timestamp_us = config.timestamp_us(image.index())?;
            log::debug!("submit {} at {}us", image, timestamp_us);
            self.encoder.submit_frame(frame, timestamp_us)?;
            self.frames_submitted += 1;
            self.drain(false)?;
        }

        self.encoder.signal_end_of_input()?;
        self.drain(true)
    }

    /// Drains what the encoder has ready. Mid-stream, `TryAgain` ends the
    /// drain while at most `max_in_flight` frames await output, so encoders
    /// with lookahead can hold frames back. Past that bound, and when `to_end`
    /// is set, `TryAgain` is tolerated for the stall timeout only.
    fn drain(&mut self, to_end: bool) -> Result<()> {
        let mut last_progress = Instant::now();
        loop {
            match self.encoder.drain_output(self.tuning.drain_timeout)? {
                DrainResult::FormatNegotiated(track) => {
                    self.codec = Some(track.encoder_name());
                    self.muxer.start(&track)?;
                    last_progress = Instant::now();
                }
                DrainResult::AccessUnit(unit) => {
                    last_progress = Instant::now();
                    let wrote = self.retire(&unit)?;
                    if unit.is_end_of_stream {
                        return Ok(());
                    }
                    if wrote && !to_end && self.in_flight() == 0 {
                        return Ok(());
                    }
                }
                DrainResult::EndOfStream => return Ok(()),
                DrainResult::TryAgain => {
                    if !to_end && self.in_flight() <= self.tuning.max_in_flight {
                        return Ok(());
                    }
                    if last_progress.elapsed() >= self.tuning.stall_timeout {
                        return Err(PipelineError::protocol(format!(
                            "encoder produced no output for {:?}",
                            self.tuning.stall_timeout
                        )));
                    }
                }
            }
        }
    }

    /// Frames submitted but not yet written as samples.
    fn in_flight(&self) -> usize {
        self.frames_submitted
            .saturating_sub(self.muxer.samples_written() as usize)
    }

    /// Returns whether the unit was written as a sample.
    fn retire(&mut self, unit: &AccessUnit) -> Result<bool> {
        if unit.is_codec_config {
            // Already carried by the track descriptor.
            self.codec_config_units += 1;
            log::debug!("codec config unit, {} bytes", unit.size());
            return Ok(false);
        }
        if !unit.is_sample() {
            return Ok(false);
        }
        log::debug!("{}", unit);
        self.muxer.write_sample(unit)?;
        Ok(true)
    }

    fn cleanup(&mut self) -> Result<()> {
        let finalized = self.muxer.finalize();
        let stopped = self.encoder.stop();
        self.encoder.release();
        finalized.and(stopped)
    }

    fn report(&self, config: &PipelineConfig) -> EncodeReport {
        EncodeReport {
            output_path: config.output_path().to_path_buf(),
            codec: self.codec.clone().unwrap_or_default(),
            frames_submitted: self.frames_submitted,
            samples_written: self.muxer.samples_written(),
            codec_config_units: self.codec_config_units,
            last_pts_us: self.muxer.last_pts_us(),
            duration_us: self.frames_submitted as i64 * config.frame_duration_us(),
        }
    }
}

#[cfg(test)]
#[path = "pipeline_test.rs"]
mod pipeline_test;
