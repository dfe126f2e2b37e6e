/// Registers FFmpeg components. Call once at startup; repeated calls are
/// harmless.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod api;
pub mod config;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod hw;
pub mod metadata;
pub mod output;
pub mod packet;
pub mod pipeline;
pub mod scaler;
pub mod source;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{create_video_from_images, encode_images, spawn_create_video};
pub use config::{PipelineConfig, PipelineRequest, Settings, Tuning};
pub use error::{ErrorKind, PipelineError};
pub use metadata::probe;
pub use pipeline::{EncodeReport, Pipeline};
