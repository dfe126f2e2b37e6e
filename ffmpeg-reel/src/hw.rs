//! Encoder discovery.
//!
//! Builds the ordered list of codecs the encoder session tries to open:
//! hardware encoders (CUDA/VAAPI/QSV/V4L2M2M) when requested, the configured
//! software codec, any registered H.264 encoder, and finally FFmpeg's native
//! MPEG-4 Part 2 encoder which every build carries.

/// Hardware encoder names for a software codec name, most preferred first.
pub fn hw_encoder_names(codec_name: &str) -> &'static [&'static str] {
    match codec_name {
        "libx264" | "h264" => &["h264_nvenc", "h264_vaapi", "h264_qsv", "h264_v4l2m2m"],
        "libx265" | "hevc" | "h265" => &["hevc_nvenc", "hevc_vaapi", "hevc_qsv", "hevc_v4l2m2m"],
        "libaom-av1" | "libsvtav1" | "av1" => &["av1_nvenc", "av1_vaapi", "av1_qsv"],
        _ => &[],
    }
}

/// Every encoder worth trying, in order, without duplicates.
pub fn encoder_candidates(codec_name: &str, prefer_hardware: bool) -> Vec<ffmpeg_next::Codec> {
    let mut candidates: Vec<ffmpeg_next::Codec> = Vec::new();
    let mut push = |codec: Option<ffmpeg_next::Codec>| {
        if let Some(codec) = codec {
            if codec.is_encoder() && !candidates.iter().any(|c| c.name() == codec.name()) {
                candidates.push(codec);
            }
        }
    };

    if prefer_hardware {
        for name in hw_encoder_names(codec_name) {
            push(ffmpeg_next::encoder::find_by_name(name));
        }
    }
    push(ffmpeg_next::encoder::find_by_name(codec_name));
    push(ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::H264));
    push(ffmpeg_next::encoder::find(ffmpeg_next::codec::Id::MPEG4));
    candidates
}

/// Whether the named encoder runs on a device (GPU, VPU) rather than the CPU.
pub fn is_hw_encoder(codec_name: &str) -> bool {
    codec_name.contains("nvenc")
        || codec_name.contains("vaapi")
        || codec_name.contains("qsv")
        || codec_name.contains("v4l2m2m")
}
