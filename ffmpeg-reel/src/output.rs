use std::path::{Path, PathBuf};

use ffmpeg_next::Rational;

use crate::{
    error::{PipelineError, Result},
    packet::AccessUnit,
    stream::TrackDescriptor,
};

/// Time base of every [`AccessUnit`] handed to a writer.
pub const MICROSECOND_TIME_BASE: Rational = Rational(1, 1_000_000);

/// Container backend of a [`MuxerSession`]. The session guarantees call
/// order; writers only translate.
pub trait ContainerWriter {
    fn begin(&mut self, track: &TrackDescriptor) -> anyhow::Result<()>;
    fn write(&mut self, unit: &AccessUnit) -> anyhow::Result<()>;
    fn finish(&mut self) -> anyhow::Result<()>;
    fn release(&mut self);
}

/// Single video track MP4 (or other `format`) writer. The file is created
/// by `begin`, so nothing touches the filesystem before the encoder has
/// negotiated its output format.
pub struct Mp4Writer {
    path: PathBuf,
    format: String,
    inner: Option<ffmpeg_next::format::context::Output>,
    stream_time_base: Rational,
    have_written_header: bool,
    have_written_trailer: bool,
}

impl Mp4Writer {
    pub fn new(path: impl AsRef<Path>, format: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format: format.into(),
            inner: None,
            stream_time_base: MICROSECOND_TIME_BASE,
            have_written_header: false,
            have_written_trailer: false,
        }
    }
}

impl ContainerWriter for Mp4Writer {
    fn begin(&mut self, track: &TrackDescriptor) -> anyhow::Result<()> {
        if self.inner.is_some() {
            anyhow::bail!("{} already open", self.path.display());
        }
        let mut output = ffmpeg_next::format::output_as(&self.path, &self.format)?;
        {
            let mut stream = output.add_stream(ffmpeg_next::encoder::find(track.codec_id()))?;
            stream.set_parameters(track.parameters());
            stream.set_time_base(track.time_base());
            stream.set_rate(track.frame_rate());
        }
        output.write_header()?;
        self.have_written_header = true;
        // The muxer may replace the requested time base in write_header.
        self.stream_time_base = output
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| anyhow::anyhow!("output stream missing after header"))?;
        log::debug!(
            "{} opened as {}, stream time base {}",
            self.path.display(),
            self.format,
            self.stream_time_base
        );
        self.inner = Some(output);
        Ok(())
    }

    fn write(&mut self, unit: &AccessUnit) -> anyhow::Result<()> {
        let output = self
            .inner
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("output not started"))?;

        let mut packet = ffmpeg_next::Packet::copy(&unit.payload);
        packet.set_stream(0);
        packet.set_pts(Some(unit.pts_us));
        packet.set_dts(Some(unit.dts_us));
        packet.set_duration(unit.duration_us);
        packet.set_position(-1);
        if unit.is_keyframe {
            packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        packet.rescale_ts(MICROSECOND_TIME_BASE, self.stream_time_base);
        packet.write_interleaved(output)?;
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        if let Some(output) = self.inner.as_mut() {
            if self.have_written_header && !self.have_written_trailer {
                self.have_written_trailer = true;
                output.write_trailer()?;
            }
        }
        Ok(())
    }

    fn release(&mut self) {
        // Dropping the context closes the file handle.
        self.inner = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxerState {
    Idle,
    Started,
    Finalized,
}

/// Writes one video track. `start` exactly once, samples only in between,
/// `finalize` any number of times.
pub struct MuxerSession<W: ContainerWriter> {
    writer: W,
    state: MuxerState,
    released: bool,
    samples_written: u64,
    last_pts_us: Option<i64>,
}

impl<W: ContainerWriter> MuxerSession<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            state: MuxerState::Idle,
            released: false,
            samples_written: 0,
            last_pts_us: None,
        }
    }

    pub fn state(&self) -> MuxerState {
        self.state
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn last_pts_us(&self) -> Option<i64> {
        self.last_pts_us
    }

    pub fn start(&mut self, track: &TrackDescriptor) -> Result<()> {
        match self.state {
            MuxerState::Idle => {}
            MuxerState::Started => return Err(PipelineError::mux("track registered twice")),
            MuxerState::Finalized => {
                return Err(PipelineError::mux("start after finalize"));
            }
        }
        self.writer.begin(track).map_err(PipelineError::Io)?;
        self.state = MuxerState::Started;
        Ok(())
    }

    pub fn write_sample(&mut self, unit: &AccessUnit) -> Result<()> {
        if self.state != MuxerState::Started {
            return Err(PipelineError::mux(format!(
                "sample written while {:?}",
                self.state
            )));
        }
        if unit.is_codec_config {
            return Err(PipelineError::mux("codec config data is not a sample"));
        }
        if unit.payload.is_empty() {
            return Err(PipelineError::mux(format!(
                "empty sample at {}us",
                unit.pts_us
            )));
        }
        if let Some(last) = self.last_pts_us {
            if unit.pts_us <= last {
                return Err(PipelineError::mux(format!(
                    "non-increasing sample time {}us after {}us",
                    unit.pts_us, last
                )));
            }
        }

        self.writer.write(unit).map_err(PipelineError::Io)?;
        self.samples_written += 1;
        self.last_pts_us = Some(unit.pts_us);
        Ok(())
    }

    /// Writes the trailer if the track was started, then releases the
    /// writer. Later calls are no-ops.
    pub fn finalize(&mut self) -> Result<()> {
        let was = self.state;
        self.state = MuxerState::Finalized;
        let finished = match was {
            MuxerState::Started => self.writer.finish().map_err(PipelineError::Io),
            _ => Ok(()),
        };
        if !self.released {
            self.released = true;
            self.writer.release();
        }
        if was == MuxerState::Started {
            log::debug!(
                "muxer finalized: {} samples, last pts {:?}us",
                self.samples_written,
                self.last_pts_us
            );
        }
        finished
    }
}

impl<W: ContainerWriter> Drop for MuxerSession<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::warn!("muxer finalize on drop failed: {}", e);
        }
    }
}
