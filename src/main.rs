use clap::Parser;
use ffmpeg_reel::{EncodeReport, PipelineError, PipelineRequest, Settings, metadata::VideoInfo};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Encodes an ordered list of still images into an MP4 video.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Image paths or file:// URIs, in display order
    #[clap(required = true)]
    images: Vec<String>,

    /// Output file (always MP4, whatever the extension)
    #[clap(short, long)]
    output: String,

    #[clap(long, default_value = "30")]
    fps: f64,

    /// Target bitrate in bits per second
    #[clap(long, default_value = "2000000")]
    bitrate: f64,

    /// Output width; defaults to the first image's width
    #[clap(long)]
    width: Option<f64>,

    /// Output height; defaults to the first image's height
    #[clap(long)]
    height: Option<f64>,

    /// Preferred encoder, falls back to any H.264 encoder then MPEG-4
    #[clap(long, default_value = "libx264")]
    codec: String,

    /// Try hardware encoders first
    #[clap(long)]
    hardware: bool,

    /// Seconds between forced keyframes
    #[clap(long, default_value = "1")]
    keyframe_interval: u32,

    /// Print the encode report and probed output metadata as JSON
    #[clap(long)]
    json: bool,

    #[clap(short, long)]
    verbose: bool,
}

#[derive(Serialize)]
struct Summary<'a> {
    report: &'a EncodeReport,
    metadata: Option<VideoInfo>,
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .filter_module("img2video", level)
        .filter_module("ffmpeg_reel", level)
        .init();
}

/// Fills in missing dimensions from the first image. A first image that
/// cannot be read fails the same way the pipeline would.
fn resolve_size(args: &Args) -> ffmpeg_reel::error::Result<(f64, f64)> {
    if let (Some(w), Some(h)) = (args.width, args.height) {
        return Ok((w, h));
    }
    let locator = &args.images[0];
    let first = ffmpeg_reel::frame::strip_file_scheme(locator);
    let image_load = |source: anyhow::Error| PipelineError::ImageLoad {
        index: 0,
        locator: locator.clone(),
        source,
    };
    let info = ffmpeg_reel::probe(first).map_err(image_load)?;
    let video = info
        .video
        .ok_or_else(|| image_load(anyhow::anyhow!("{} has no picture", first)))?;
    Ok((
        args.width.unwrap_or(video.width as f64),
        args.height.unwrap_or(video.height as f64),
    ))
}

async fn run(args: Args, cancel: CancellationToken) -> anyhow::Result<()> {
    let (width, height) =
        resolve_size(&args).inspect_err(|e| log::error!("{}: {}", e.kind(), e))?;
    let request = PipelineRequest {
        images: args.images.clone(),
        output_path: args.output.clone(),
        fps: args.fps,
        bitrate: args.bitrate,
        width,
        height,
    };
    let settings = Settings {
        codec: args.codec.clone(),
        prefer_hardware: args.hardware,
        keyframe_interval_secs: args.keyframe_interval,
        ..Settings::default()
    };

    let report = ffmpeg_reel::spawn_create_video(request, settings, cancel)
        .await
        .inspect_err(|e| log::error!("{}: {}", e.kind(), e))?;

    let metadata = match ffmpeg_reel::probe(&report.output_path) {
        Ok(info) => Some(info),
        Err(e) => {
            log::warn!("could not probe {}: {}", report.output_path.display(), e);
            None
        }
    };

    if args.json {
        let summary = Summary {
            report: &report,
            metadata,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "{}: {} frames, {} samples, {:.3}s",
            report.output_path.display(),
            report.frames_submitted,
            report.samples_written,
            report.duration_us as f64 / 1_000_000.0
        );
        if let Some(info) = metadata {
            print!("{}", info);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    if let Err(e) = ffmpeg_reel::init() {
        eprintln!("Error initializing ffmpeg: {}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupted, stopping after the current frame");
            cancel_clone.cancel();
        }
    });

    if let Err(e) = run(args, cancel).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
