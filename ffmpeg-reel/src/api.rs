use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::{
    config::{PipelineRequest, Settings},
    encoder::FfmpegEncoder,
    error::{PipelineError, Result},
    output::Mp4Writer,
    pipeline::{EncodeReport, Pipeline},
    source::ImageFrameSource,
};

/// Encodes `request.images` into an MP4 at `request.output_path` with the
/// FFmpeg-backed components. Blocks until the file is finalized.
pub fn encode_images(
    request: &PipelineRequest,
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<EncodeReport> {
    let (config, images) = request.validate()?;
    log::info!(
        "encoding {} images -> {} ({}x{} @ {} fps, {} bps)",
        images.len(),
        config.output_path().display(),
        config.width(),
        config.height(),
        config.fps(),
        config.bitrate()
    );

    let source = ImageFrameSource::new(config.width(), config.height(), settings.pixel_format);
    let encoder = FfmpegEncoder::new(settings.clone());
    let writer = Mp4Writer::new(config.output_path(), settings.container.clone());

    Pipeline::new(source, encoder, writer)
        .with_cancel(cancel)
        .run(&config, &images)
}

/// Same as [`encode_images`], returning only the output path.
pub fn create_video_from_images(
    request: &PipelineRequest,
    settings: &Settings,
    cancel: CancellationToken,
) -> Result<PathBuf> {
    encode_images(request, settings, cancel).map(|report| report.output_path)
}

/// Runs [`encode_images`] on tokio's blocking pool. Each call owns its own
/// encoder and muxer, so any number may run at once.
pub async fn spawn_create_video(
    request: PipelineRequest,
    settings: Settings,
    cancel: CancellationToken,
) -> Result<EncodeReport> {
    tokio::task::spawn_blocking(move || encode_images(&request, &settings, cancel))
        .await
        .map_err(|e| PipelineError::Task(e.to_string()))?
}

#[cfg(test)]
#[path = "api_test.rs"]
mod api_test;
