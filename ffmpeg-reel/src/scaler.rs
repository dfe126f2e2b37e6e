use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling::{Context, flag::Flags};

/// Software scaler that stretches any source frame to one fixed output
/// geometry and pixel format. Aspect ratio is not preserved.
pub struct Scaler {
    context: Context,
    source: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new(
        source_format: Pixel,
        source_width: u32,
        source_height: u32,
        format: Pixel,
        width: u32,
        height: u32,
    ) -> anyhow::Result<Self> {
        let context = Context::get(
            source_format,
            source_width,
            source_height,
            format,
            width,
            height,
            Flags::BILINEAR,
        )?;
        Ok(Self {
            context,
            source: (source_format, source_width, source_height),
        })
    }

    /// Whether this scaler was built for frames shaped like `frame`.
    pub fn accepts(&self, frame: &ffmpeg_next::frame::Video) -> bool {
        self.source == (frame.format(), frame.width(), frame.height())
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
    ) -> anyhow::Result<ffmpeg_next::frame::Video> {
        let mut dst = ffmpeg_next::frame::Video::empty();
        self.context.run(frame, &mut dst)?;
        Ok(dst)
    }
}

unsafe impl Send for Scaler {}
