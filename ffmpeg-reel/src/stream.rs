use bytes::Bytes;
use ffmpeg_next::{Rational, codec::Parameters, format::Pixel};

/// Output format the encoder settled on. Registered once with the muxer
/// before the first sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackDescriptor {
    codec_id: ffmpeg_next::codec::Id,
    width: u32,
    height: u32,
    pixel_format: Pixel,
    time_base: Rational,
    frame_rate: Rational,
    bit_rate: u64,
    extradata: Bytes,
    /// Name of the opened encoder, e.g. "libx264" or "h264_nvenc".
    encoder_name: String,
}

impl TrackDescriptor {
    pub fn new(codec_id: ffmpeg_next::codec::Id, width: u32, height: u32) -> Self {
        Self {
            codec_id,
            width,
            height,
            pixel_format: Pixel::YUV420P,
            time_base: Rational::new(1, 1_000_000),
            frame_rate: Rational::new(0, 1),
            bit_rate: 0,
            extradata: Bytes::new(),
            encoder_name: String::new(),
        }
    }

    pub fn with_timing(mut self, time_base: Rational, frame_rate: Rational) -> Self {
        self.time_base = time_base;
        self.frame_rate = frame_rate;
        self
    }

    pub fn with_bit_rate(mut self, bit_rate: u64) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    pub fn with_extradata(mut self, extradata: Bytes) -> Self {
        self.extradata = extradata;
        self
    }

    pub fn with_encoder_name(mut self, encoder_name: impl Into<String>) -> Self {
        self.encoder_name = encoder_name.into();
        self
    }

    /// Snapshot of an opened encoder: geometry, timing and global header.
    pub fn from_encoder(
        encoder: &ffmpeg_next::codec::encoder::Video,
        encoder_name: &str,
        frame_rate: Rational,
    ) -> Self {
        let video = &encoder.0;
        let (time_base, bit_rate, extradata) = unsafe {
            let ctx = video.as_ptr();
            let extradata = if (*ctx).extradata.is_null() || (*ctx).extradata_size <= 0 {
                Bytes::new()
            } else {
                Bytes::copy_from_slice(std::slice::from_raw_parts(
                    (*ctx).extradata,
                    (*ctx).extradata_size as usize,
                ))
            };
            (
                Rational::from((*ctx).time_base),
                (*ctx).bit_rate.max(0) as u64,
                extradata,
            )
        };

        Self {
            codec_id: video.id(),
            width: video.width(),
            height: video.height(),
            pixel_format: video.format(),
            time_base,
            frame_rate,
            bit_rate,
            extradata,
            encoder_name: encoder_name.to_string(),
        }
    }

    pub fn codec_id(&self) -> ffmpeg_next::codec::Id {
        self.codec_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> Pixel {
        self.pixel_format
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn frame_rate(&self) -> Rational {
        self.frame_rate
    }

    pub fn bit_rate(&self) -> u64 {
        self.bit_rate
    }

    pub fn extradata(&self) -> &Bytes {
        &self.extradata
    }

    /// Encoder name if known, otherwise the codec id.
    pub fn encoder_name(&self) -> String {
        if self.encoder_name.is_empty() {
            format!("{:?}", self.codec_id).to_lowercase()
        } else {
            self.encoder_name.clone()
        }
    }

    /// Codec parameters for the container stream (ffmpeg-next has no setters
    /// for the video fields, so they are written through the raw struct).
    pub fn parameters(&self) -> Parameters {
        let mut params = Parameters::new();
        unsafe {
            let ptr = params.as_mut_ptr();
            (*ptr).codec_type = ffmpeg_next::media::Type::Video.into();
            (*ptr).codec_id = self.codec_id.into();
            (*ptr).width = self.width as i32;
            (*ptr).height = self.height as i32;
            (*ptr).format = ffmpeg_next::ffi::AVPixelFormat::from(self.pixel_format) as i32;
            (*ptr).bit_rate = self.bit_rate as i64;
            (*ptr).codec_tag = 0;

            if !self.extradata.is_empty() {
                let size = self.extradata.len();
                let padding = ffmpeg_next::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize;
                let buf = ffmpeg_next::ffi::av_mallocz(size + padding) as *mut u8;
                if !buf.is_null() {
                    std::ptr::copy_nonoverlapping(self.extradata.as_ptr(), buf, size);
                    (*ptr).extradata = buf;
                    (*ptr).extradata_size = size as i32;
                }
            }
        }
        params
    }
}
