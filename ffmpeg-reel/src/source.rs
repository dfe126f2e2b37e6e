//! Image loading for the frame loop.
//!
//! Each image is opened through FFmpeg's image demuxers, decoded to a single
//! frame and stretched to the pipeline resolution. The decoded frame lives
//! only for the duration of [`FrameSource::load`].

use std::path::Path;

use ffmpeg_next::format::Pixel;

use crate::{
    error::{PipelineError, Result},
    frame::{InputImageRef, ScaledFrame},
    scaler::Scaler,
};

/// Produces one encoder-ready frame per image reference.
pub trait FrameSource {
    fn load(&mut self, image: &InputImageRef) -> Result<ScaledFrame>;
}

pub struct ImageFrameSource {
    width: u32,
    height: u32,
    format: Pixel,
    scaler: Option<Scaler>,
}

impl ImageFrameSource {
    pub fn new(width: u32, height: u32, format: Pixel) -> Self {
        Self {
            width,
            height,
            format,
            scaler: None,
        }
    }

    fn scale(&mut self, decoded: &ffmpeg_next::frame::Video) -> anyhow::Result<ScaledFrame> {
        let reusable = self.scaler.as_ref().is_some_and(|s| s.accepts(decoded));
        if !reusable {
            self.scaler = Some(Scaler::new(
                decoded.format(),
                decoded.width(),
                decoded.height(),
                self.format,
                self.width,
                self.height,
            )?);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("scaler not initialized"))?;
        Ok(ScaledFrame::from(scaler.run(decoded)?))
    }
}

impl FrameSource for ImageFrameSource {
    fn load(&mut self, image: &InputImageRef) -> Result<ScaledFrame> {
        let failed = |source: anyhow::Error| PipelineError::ImageLoad {
            index: image.index(),
            locator: image.locator().to_string(),
            source,
        };

        let decoded = decode_image(&image.path()).map_err(failed)?;
        let scaled = self.scale(&decoded).map_err(failed)?;
        log::debug!(
            "loaded image {}: {}x{} {:?} -> {}",
            image,
            decoded.width(),
            decoded.height(),
            decoded.format(),
            scaled
        );
        Ok(scaled)
    }
}

/// Decodes the first video frame of an image file.
pub fn decode_image(path: &Path) -> anyhow::Result<ffmpeg_next::frame::Video> {
    if !path.is_file() {
        anyhow::bail!("no such image file: {}", path.display());
    }
    let mut input = ffmpeg_next::format::input(path)?;
    let (stream_index, parameters) = {
        let stream = input
            .streams()
            .best(ffmpeg_next::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("no picture in {}", path.display()))?;
        (stream.index(), stream.parameters())
    };

    let context = ffmpeg_next::codec::Context::from_parameters(parameters)?;
    let mut decoder = context.decoder().video()?;
    let mut frame = ffmpeg_next::frame::Video::empty();

    for (stream, packet) in input.packets() {
        if stream.index() != stream_index {
            continue;
        }
        decoder.send_packet(&packet)?;
        match decoder.receive_frame(&mut frame) {
            Ok(()) => return Ok(frame),
            Err(ffmpeg_next::Error::Other { errno }) if errno == ffmpeg_next::util::error::EAGAIN => {}
            Err(err) => return Err(err.into()),
        }
    }

    decoder.send_eof()?;
    decoder
        .receive_frame(&mut frame)
        .map_err(|e| anyhow::anyhow!("undecodable image {}: {}", path.display(), e))?;
    Ok(frame)
}
