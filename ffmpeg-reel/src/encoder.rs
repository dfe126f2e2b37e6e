use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use ffmpeg_next::{Dictionary, Rational, picture};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{PipelineConfig, Settings, tuning},
    error::{PipelineError, Result},
    frame::ScaledFrame,
    hw::{encoder_candidates, is_hw_encoder},
    packet::AccessUnit,
    stream::TrackDescriptor,
};

/// What one poll of the encoder output yields.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainResult {
    AccessUnit(AccessUnit),
    FormatNegotiated(TrackDescriptor),
    TryAgain,
    EndOfStream,
}

/// The codec behind an [`EncoderSession`]. Implementations run asynchronously
/// to the caller; output is only observable through `poll_output`.
pub trait EncoderBackend {
    fn configure(&mut self, config: &PipelineConfig) -> anyhow::Result<()>;
    fn start(&mut self) -> anyhow::Result<()>;
    fn submit_frame(&mut self, frame: ScaledFrame, timestamp_us: i64) -> anyhow::Result<()>;
    fn poll_output(&mut self, timeout: Duration) -> anyhow::Result<DrainResult>;
    fn signal_end_of_input(&mut self) -> anyhow::Result<()>;
    fn stop(&mut self) -> anyhow::Result<()>;
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Unconfigured,
    Configured,
    Started,
    Draining,
    Stopped,
}

/// Drives an [`EncoderBackend`] through its lifecycle and enforces the
/// output protocol: one format negotiation before any access unit, one
/// end-of-stream unit after end of input. Stops and releases the backend on
/// drop if the owner did not.
pub struct EncoderSession<B: EncoderBackend> {
    backend: B,
    state: EncoderState,
    track: Option<TrackDescriptor>,
    end_of_stream: bool,
    released: bool,
    frames_submitted: u64,
}

impl<B: EncoderBackend> EncoderSession<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: EncoderState::Unconfigured,
            track: None,
            end_of_stream: false,
            released: false,
            frames_submitted: 0,
        }
    }

    pub fn state(&self) -> EncoderState {
        self.state
    }

    pub fn track(&self) -> Option<&TrackDescriptor> {
        self.track.as_ref()
    }

    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    fn expect_state(&self, allowed: &[EncoderState], op: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PipelineError::protocol(format!(
                "{} called in state {:?}",
                op, self.state
            )))
        }
    }

    /// Numeric ranges are guaranteed by [`PipelineConfig`] construction.
    pub fn configure(&mut self, config: &PipelineConfig) -> Result<()> {
        self.expect_state(&[EncoderState::Unconfigured], "configure")?;
        self.backend
            .configure(config)
            .map_err(PipelineError::Encoder)?;
        self.state = EncoderState::Configured;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.expect_state(&[EncoderState::Configured], "start")?;
        self.backend.start().map_err(PipelineError::Encoder)?;
        self.state = EncoderState::Started;
        Ok(())
    }

    /// May block while the encoder input queue is full.
    pub fn submit_frame(&mut self, frame: ScaledFrame, timestamp_us: i64) -> Result<()> {
        self.expect_state(&[EncoderState::Started], "submit_frame")?;
        self.backend
            .submit_frame(frame, timestamp_us)
            .map_err(PipelineError::Encoder)?;
        self.frames_submitted += 1;
        Ok(())
    }

    pub fn drain_output(&mut self, timeout: Duration) -> Result<DrainResult> {
        if self.end_of_stream {
            return Ok(DrainResult::EndOfStream);
        }
        self.expect_state(
            &[EncoderState::Started, EncoderState::Draining],
            "drain_output",
        )?;

        match self
            .backend
            .poll_output(timeout)
            .map_err(PipelineError::Encoder)?
        {
            DrainResult::FormatNegotiated(track) => {
                if self.track.is_some() {
                    return Err(PipelineError::protocol(
                        "output format negotiated more than once",
                    ));
                }
                log::info!(
                    "encoder output format: {:?} {}x{} time_base {}",
                    track.codec_id(),
                    track.width(),
                    track.height(),
                    track.time_base()
                );
                self.track = Some(track.clone());
                Ok(DrainResult::FormatNegotiated(track))
            }
            DrainResult::AccessUnit(unit) => {
                if self.track.is_none() {
                    return Err(PipelineError::protocol(
                        "access unit emitted before output format negotiation",
                    ));
                }
                if unit.payload.is_empty() && !unit.is_end_of_stream {
                    return Err(PipelineError::protocol(format!(
                        "missing output buffer for unit at {}us",
                        unit.pts_us
                    )));
                }
                if unit.is_end_of_stream {
                    self.mark_end_of_stream()?;
                }
                Ok(DrainResult::AccessUnit(unit))
            }
            DrainResult::EndOfStream => {
                self.mark_end_of_stream()?;
                Ok(DrainResult::EndOfStream)
            }
            DrainResult::TryAgain => Ok(DrainResult::TryAgain),
        }
    }

    fn mark_end_of_stream(&mut self) -> Result<()> {
        if self.state != EncoderState::Draining {
            return Err(PipelineError::protocol(
                "end of stream reported before end of input",
            ));
        }
        self.end_of_stream = true;
        Ok(())
    }

    pub fn signal_end_of_input(&mut self) -> Result<()> {
        self.expect_state(&[EncoderState::Started], "signal_end_of_input")?;
        self.backend
            .signal_end_of_input()
            .map_err(PipelineError::Encoder)?;
        self.state = EncoderState::Draining;
        Ok(())
    }

    /// Idempotent. Only the first call reaches the backend.
    pub fn stop(&mut self) -> Result<()> {
        let was = self.state;
        self.state = EncoderState::Stopped;
        match was {
            EncoderState::Started | EncoderState::Draining => {
                self.backend.stop().map_err(PipelineError::Encoder)
            }
            _ => Ok(()),
        }
    }

    /// Idempotent. Frees the backend even if `stop` failed.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.state = EncoderState::Stopped;
        self.released = true;
        self.backend.release();
    }
}

impl<B: EncoderBackend> Drop for EncoderSession<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("encoder stop on drop failed: {}", e);
        }
        self.release();
    }
}

enum EncoderCommand {
    Frame(ScaledFrame, i64),
    EndOfInput,
}

/// An opened FFmpeg video encoder plus the bookkeeping needed to map its
/// frame-indexed timestamps back to microseconds.
struct OpenedEncoder {
    inner: ffmpeg_next::codec::encoder::Video,
    codec_name: String,
    track: TrackDescriptor,
    frame_duration_us: i64,
    keyframe_interval: i64,
    frame_index: i64,
    last_pts_us: i64,
}

unsafe impl Send for OpenedEncoder {}

impl OpenedEncoder {
    fn open(config: &PipelineConfig, settings: &Settings) -> anyhow::Result<Self> {
        let frame_rate = config.frame_rate();
        let candidates = encoder_candidates(&settings.codec, settings.prefer_hardware);
        if candidates.is_empty() {
            anyhow::bail!("no video encoder available for {}", settings.codec);
        }

        let mut last_error = None;
        for codec in candidates {
            let name = codec.name().to_string();
            match Self::open_codec(codec, config, settings, frame_rate) {
                Ok(inner) => {
                    log::info!("encoder opened successfully: {}", name);
                    let track = TrackDescriptor::from_encoder(&inner, &name, frame_rate);
                    return Ok(Self {
                        inner,
                        codec_name: name,
                        track,
                        frame_duration_us: config.frame_duration_us(),
                        keyframe_interval: config
                            .keyframe_interval_frames(settings.keyframe_interval_secs)
                            as i64,
                        frame_index: 0,
                        last_pts_us: 0,
                    });
                }
                Err(e) => {
                    log::warn!("encoder {} failed to open: {}, trying next", name, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("no encoder could be opened")))
    }

    fn open_codec(
        codec: ffmpeg_next::Codec,
        config: &PipelineConfig,
        settings: &Settings,
        frame_rate: Rational,
    ) -> anyhow::Result<ffmpeg_next::codec::encoder::Video> {
        let mut encoder = ffmpeg_next::codec::Context::new_with_codec(codec)
            .encoder()
            .video()?;
        encoder.set_width(config.width());
        encoder.set_height(config.height());
        encoder.set_format(settings.pixel_format);
        encoder.set_frame_rate(Some(frame_rate));
        // One tick per frame; timestamps are frame indices inside the codec.
        encoder.set_time_base(frame_rate.invert());
        encoder.set_bit_rate(config.bitrate() as usize);
        encoder.set_max_b_frames(0);
        encoder.set_gop(config.keyframe_interval_frames(settings.keyframe_interval_secs));
        encoder.set_flags(ffmpeg_next::codec::flag::Flags::GLOBAL_HEADER);

        let mut opts = Dictionary::new();
        if codec.name() == "libx264" {
            if let Some(preset) = &settings.preset {
                opts.set("preset", preset);
            }
            if let Some(tune) = &settings.tune {
                opts.set("tune", tune);
            }
        } else if is_hw_encoder(codec.name()) {
            opts.set("delay", "0");
            opts.set("zerolatency", "1");
        }
        Ok(encoder.open_with(opts)?)
    }

    fn send_frame(&mut self, mut frame: ScaledFrame, timestamp_us: i64) -> anyhow::Result<()> {
        let index = timestamp_us / self.frame_duration_us;
        let f = frame.get_mut();
        if self.frame_index % self.keyframe_interval == 0 {
            f.set_kind(picture::Type::I);
        } else {
            f.set_kind(picture::Type::None);
        }
        f.set_pts(Some(index));
        self.inner.send_frame(f)?;
        self.frame_index += 1;
        Ok(())
    }

    fn send_eof(&mut self) -> anyhow::Result<()> {
        self.inner.send_eof()?;
        Ok(())
    }

    fn receive_unit(&mut self) -> anyhow::Result<Option<AccessUnit>> {
        let mut packet = ffmpeg_next::codec::packet::Packet::empty();
        match self.inner.receive_packet(&mut packet) {
            Ok(()) => {
                let pts = packet.pts().unwrap_or(self.frame_index - 1);
                let dts = packet.dts().unwrap_or(pts);
                let payload = packet
                    .data()
                    .map(Bytes::copy_from_slice)
                    .unwrap_or_default();
                let mut unit = AccessUnit::data(
                    payload,
                    pts * self.frame_duration_us,
                    self.frame_duration_us,
                    packet.is_key(),
                );
                unit.dts_us = dts * self.frame_duration_us;
                self.last_pts_us = unit.pts_us;
                Ok(Some(unit))
            }
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {
                Ok(None)
            }
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

struct EncoderWorker {
    input: Option<SyncSender<EncoderCommand>>,
    output: Receiver<anyhow::Result<DrainResult>>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// FFmpeg-backed encoder. The codec runs on a worker thread owned by this
/// value; input is a bounded queue, output an unbounded one drained by
/// [`EncoderBackend::poll_output`].
pub struct FfmpegEncoder {
    settings: Settings,
    queue_depth: usize,
    opened: Option<OpenedEncoder>,
    worker: Option<EncoderWorker>,
}

impl FfmpegEncoder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            queue_depth: tuning().input_queue_depth,
            opened: None,
            worker: None,
        }
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    fn worker(&mut self) -> anyhow::Result<&mut EncoderWorker> {
        self.worker
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("encoder not started"))
    }

    /// Prefer the worker's own failure over a bare "disconnected".
    fn worker_failure(&mut self) -> anyhow::Error {
        if let Some(worker) = self.worker.as_mut() {
            while let Ok(msg) = worker.output.try_recv() {
                if let Err(e) = msg {
                    return e;
                }
            }
        }
        anyhow::anyhow!("encoder worker exited")
    }

    fn encoder_loop(
        mut encoder: OpenedEncoder,
        cancel: CancellationToken,
        rx: Receiver<EncoderCommand>,
        out: Sender<anyhow::Result<DrainResult>>,
    ) {
        let _ = out.send(Ok(DrainResult::FormatNegotiated(encoder.track.clone())));
        let extradata = encoder.track.extradata().clone();
        if !extradata.is_empty() {
            let _ = out.send(Ok(DrainResult::AccessUnit(AccessUnit::codec_config(
                extradata,
            ))));
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let command = match rx.recv_timeout(Duration::from_millis(1)) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let eof = matches!(command, EncoderCommand::EndOfInput);
            let sent = match command {
                EncoderCommand::Frame(frame, timestamp_us) => encoder.send_frame(frame, timestamp_us),
                EncoderCommand::EndOfInput => encoder.send_eof(),
            };
            if let Err(e) = sent {
                log::error!("{} send error: {}", encoder.codec_name, e);
                let _ = out.send(Err(e));
                return;
            }

            loop {
                match encoder.receive_unit() {
                    Ok(Some(unit)) => {
                        let _ = out.send(Ok(DrainResult::AccessUnit(unit)));
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::error!("{} receive error: {}", encoder.codec_name, e);
                        let _ = out.send(Err(e));
                        return;
                    }
                }
            }

            if eof {
                let _ = out.send(Ok(DrainResult::AccessUnit(AccessUnit::end_of_stream(
                    encoder.last_pts_us,
                ))));
                break;
            }
        }

        log::debug!(
            "end of {} encode loop, {} frames encoded",
            encoder.codec_name,
            encoder.frame_index
        );
    }
}

impl EncoderBackend for FfmpegEncoder {
    fn configure(&mut self, config: &PipelineConfig) -> anyhow::Result<()> {
        self.opened = Some(OpenedEncoder::open(config, &self.settings)?);
        Ok(())
    }

    fn start(&mut self) -> anyhow::Result<()> {
        let encoder = self
            .opened
            .take()
            .ok_or_else(|| anyhow::anyhow!("encoder not configured"))?;
        let (input_tx, input_rx) = std::sync::mpsc::sync_channel(self.queue_depth);
        let (output_tx, output_rx) = std::sync::mpsc::channel();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let handle = std::thread::Builder::new()
            .name(format!("encoder-{}", encoder.codec_name))
            .spawn(move || Self::encoder_loop(encoder, loop_cancel, input_rx, output_tx))?;

        self.worker = Some(EncoderWorker {
            input: Some(input_tx),
            output: output_rx,
            cancel,
            handle: Some(handle),
        });
        Ok(())
    }

    fn submit_frame(&mut self, frame: ScaledFrame, timestamp_us: i64) -> anyhow::Result<()> {
        let input = self
            .worker()?
            .input
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("encoder input closed"))?
            .clone();
        let command = EncoderCommand::Frame(frame, timestamp_us);
        let command = match input.try_send(command) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(command)) => {
                log::debug!("encoder input queue full, waiting (back-pressure)");
                command
            }
            Err(TrySendError::Disconnected(_)) => return Err(self.worker_failure()),
        };
        match input.send(command) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.worker_failure()),
        }
    }

    fn poll_output(&mut self, timeout: Duration) -> anyhow::Result<DrainResult> {
        let worker = self.worker()?;
        match worker.output.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Ok(DrainResult::TryAgain),
            Err(RecvTimeoutError::Disconnected) => {
                Err(anyhow::anyhow!("encoder worker exited without end of stream"))
            }
        }
    }

    fn signal_end_of_input(&mut self) -> anyhow::Result<()> {
        let sent = self
            .worker()?
            .input
            .as_ref()
            .map(|input| input.send(EncoderCommand::EndOfInput).is_ok())
            .unwrap_or(false);
        if sent {
            Ok(())
        } else {
            Err(self.worker_failure())
        }
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let Some(worker) = self.worker.as_mut() else {
            return Ok(());
        };
        worker.cancel.cancel();
        worker.input.take();
        if let Some(handle) = worker.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("encoder worker panicked"))?;
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("encoder release: {}", e);
        }
        self.worker = None;
        self.opened = None;
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
#[path = "encoder_test.rs"]
mod encoder_test;
