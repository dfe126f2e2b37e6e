use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use ffmpeg_next::format::Pixel;

const FILE_SCHEME: &str = "file://";

/// Drops a leading `file://` so URIs handed over by mobile hosts open as paths.
pub fn strip_file_scheme(locator: &str) -> &str {
    locator.strip_prefix(FILE_SCHEME).unwrap_or(locator)
}

/// One entry of the ordered image list. The index is the presentation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImageRef {
    locator: String,
    index: usize,
}

impl InputImageRef {
    pub fn new(index: usize, locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            index,
        }
    }

    pub fn from_locators<S: AsRef<str>>(locators: &[S]) -> Vec<Self> {
        locators
            .iter()
            .enumerate()
            .map(|(index, locator)| Self::new(index, locator.as_ref()))
            .collect()
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(strip_file_scheme(&self.locator))
    }
}

impl Display for InputImageRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "#{} {}", self.index, self.locator)
    }
}

/// Pixel buffer already at the target resolution and encoder pixel format.
/// Moved into the encoder on submit, never copied.
pub struct ScaledFrame {
    frame: ffmpeg_next::frame::Video,
}

unsafe impl Send for ScaledFrame {}

impl From<ffmpeg_next::frame::Video> for ScaledFrame {
    fn from(frame: ffmpeg_next::frame::Video) -> Self {
        Self { frame }
    }
}

impl ScaledFrame {
    /// Black frame, used where only the geometry matters.
    pub fn blank(format: Pixel, width: u32, height: u32) -> Self {
        let mut frame = ffmpeg_next::frame::Video::new(format, width, height);
        for plane in 0..frame.planes() {
            let fill = if plane == 0 || format != Pixel::YUV420P {
                0x10
            } else {
                0x80
            };
            for b in frame.data_mut(plane) {
                *b = fill;
            }
        }
        Self { frame }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }

    pub fn format(&self) -> Pixel {
        self.frame.format()
    }

    pub fn get_mut(&mut self) -> &mut ffmpeg_next::frame::Video {
        &mut self.frame
    }

    pub fn as_video(&self) -> &ffmpeg_next::frame::Video {
        &self.frame
    }
}

impl Display for ScaledFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "ScaledFrame {}x{} {:?}",
            self.width(),
            self.height(),
            self.format()
        )
    }
}
