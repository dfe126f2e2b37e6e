use std::fmt::{Display, Formatter};

use bytes::Bytes;

/// One encoded chunk leaving the encoder. Timestamps are microseconds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessUnit {
    pub payload: Bytes,
    pub pts_us: i64,
    pub dts_us: i64,
    pub duration_us: i64,
    pub is_codec_config: bool,
    pub is_end_of_stream: bool,
    pub is_keyframe: bool,
}

impl AccessUnit {
    pub fn data(payload: impl Into<Bytes>, pts_us: i64, duration_us: i64, is_keyframe: bool) -> Self {
        Self {
            payload: payload.into(),
            pts_us,
            dts_us: pts_us,
            duration_us,
            is_codec_config: false,
            is_end_of_stream: false,
            is_keyframe,
        }
    }

    /// Codec initialization data (SPS/PPS, VOL header...). Never muxed as a sample.
    pub fn codec_config(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
            pts_us: 0,
            dts_us: 0,
            duration_us: 0,
            is_codec_config: true,
            is_end_of_stream: false,
            is_keyframe: false,
        }
    }

    /// Empty terminator emitted once after end of input has been flushed.
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self {
            payload: Bytes::new(),
            pts_us,
            dts_us: pts_us,
            duration_us: 0,
            is_codec_config: false,
            is_end_of_stream: true,
            is_keyframe: false,
        }
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// True when the unit carries frame payload that belongs in the container.
    pub fn is_sample(&self) -> bool {
        !self.is_codec_config && !self.payload.is_empty()
    }
}

impl Display for AccessUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "AccessUnit size: {}, pts: {}us, dts: {}us, key: {}, config: {}, eos: {}",
            self.size(),
            self.pts_us,
            self.dts_us,
            self.is_keyframe,
            self.is_codec_config,
            self.is_end_of_stream
        )
    }
}
