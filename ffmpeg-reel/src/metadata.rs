//! ffprobe-style inspection of a finished video file.

use std::fmt;
use std::path::Path;

use serde::Serialize;

/// Container-level info.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    /// e.g. "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
    /// None if the container does not know its duration.
    pub duration_sec: Option<f64>,
    pub bit_rate: i64,
    pub nb_streams: u32,
}

/// The first video stream.
#[derive(Debug, Clone, Serialize)]
pub struct VideoStreamInfo {
    pub index: usize,
    pub codec_name: String,
    pub width: u32,
    pub height: u32,
    /// e.g. "1/15360"
    pub time_base: String,
    /// e.g. "30/1"
    pub avg_frame_rate: String,
    /// Frame count from the container index; None if not recorded.
    pub frames: Option<i64>,
    pub has_global_header: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VideoInfo {
    pub format: FormatInfo,
    pub video: Option<VideoStreamInfo>,
}

impl fmt::Display for VideoInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[FORMAT]")?;
        writeln!(f, "format_name={}", self.format.format_name)?;
        match self.format.duration_sec {
            Some(d) => writeln!(f, "duration_sec={:.3}", d)?,
            None => writeln!(f, "duration_sec=N/A")?,
        }
        writeln!(f, "bit_rate={}", self.format.bit_rate)?;
        writeln!(f, "nb_streams={}", self.format.nb_streams)?;
        writeln!(f, "[/FORMAT]")?;
        if let Some(v) = &self.video {
            writeln!(f, "[STREAM]")?;
            writeln!(f, "index={}", v.index)?;
            writeln!(f, "codec_name={}", v.codec_name)?;
            writeln!(f, "width={}", v.width)?;
            writeln!(f, "height={}", v.height)?;
            writeln!(f, "time_base={}", v.time_base)?;
            writeln!(f, "avg_frame_rate={}", v.avg_frame_rate)?;
            if let Some(n) = v.frames {
                writeln!(f, "nb_frames={}", n)?;
            }
            writeln!(f, "[/STREAM]")?;
        }
        Ok(())
    }
}

/// Opens a media file and describes its container and first video stream.
pub fn probe(path: impl AsRef<Path>) -> anyhow::Result<VideoInfo> {
    let input = ffmpeg_next::format::input(&path.as_ref())?;

    // duration is in 1/AV_TIME_BASE seconds
    let duration_sec = {
        let d = input.duration();
        if d == ffmpeg_next::ffi::AV_NOPTS_VALUE || d <= 0 {
            None
        } else {
            Some(d as f64 / f64::from(ffmpeg_next::ffi::AV_TIME_BASE))
        }
    };

    let format = FormatInfo {
        format_name: input.format().name().to_string(),
        duration_sec,
        bit_rate: input.bit_rate(),
        nb_streams: input.nb_streams(),
    };

    let video = input
        .streams()
        .best(ffmpeg_next::media::Type::Video)
        .map(|stream| {
            let params = stream.parameters();
            let (width, height, has_global_header) = unsafe {
                let ptr = params.as_ptr();
                (
                    (*ptr).width.max(0) as u32,
                    (*ptr).height.max(0) as u32,
                    (*ptr).extradata_size > 0,
                )
            };
            let time_base = stream.time_base();
            let rate = stream.avg_frame_rate();
            VideoStreamInfo {
                index: stream.index(),
                codec_name: format!("{:?}", params.id()).to_lowercase(),
                width,
                height,
                time_base: format!("{}/{}", time_base.numerator(), time_base.denominator()),
                avg_frame_rate: format!("{}/{}", rate.numerator(), rate.denominator()),
                frames: Some(stream.frames()).filter(|n| *n > 0),
                has_global_header,
            }
        });

    Ok(VideoInfo { format, video })
}
