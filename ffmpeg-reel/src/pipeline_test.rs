use std::time::Duration;

use super::*;
use crate::error::ErrorKind;
use crate::test_support::{FakeSource, RecordingWriter, ScriptedEncoder, Shared};

fn fast() -> Tuning {
    Tuning {
        drain_timeout: Duration::from_millis(1),
        stall_timeout: Duration::from_millis(50),
        input_queue_depth: 1,
        max_in_flight: 2,
    }
}

fn config(fps: f64) -> PipelineConfig {
    PipelineConfig::new(fps, 1_000_000.0, 16.0, 16.0, "/tmp/never-written.mp4").unwrap()
}

fn images(n: usize) -> Vec<InputImageRef> {
    (0..n)
        .map(|i| InputImageRef::new(i, format!("img{}.png", i)))
        .collect()
}

struct Fixture {
    shared: Shared,
    source: FakeSource,
    encoder: ScriptedEncoder,
    writer: RecordingWriter,
}

impl Fixture {
    fn new() -> Self {
        let shared = Shared::default();
        Self {
            source: FakeSource::new(shared.clone()),
            encoder: ScriptedEncoder::new(shared.clone()),
            writer: RecordingWriter::new(shared.clone()),
            shared,
        }
    }

    fn run(self, config: &PipelineConfig, images: &[InputImageRef]) -> (Shared, Result<EncodeReport>) {
        let result = Pipeline::new(self.source, self.encoder, self.writer)
            .with_tuning(fast())
            .run(config, images);
        (self.shared, result)
    }
}

fn assert_cleaned_up(shared: &Shared) {
    assert_eq!(shared.count("release"), 1, "{:?}", shared.calls());
    assert_eq!(shared.count("encoder_release"), 1, "{:?}", shared.calls());
}

#[test]
fn test_three_frames_at_30fps() {
    let config = config(30.0);
    let (shared, result) = Fixture::new().run(&config, &images(3));
    let report = result.unwrap();

    assert_eq!(report.frames_submitted, 3);
    assert_eq!(report.samples_written, 3);
    assert_eq!(report.codec_config_units, 1);
    assert_eq!(report.last_pts_us, Some(66_666));
    assert_eq!(report.duration_us, 99_999);
    assert_eq!(report.codec, "h264");
    assert_eq!(report.output_path, PathBuf::from("/tmp/never-written.mp4"));

    let pts: Vec<i64> = shared.written().iter().map(|u| u.pts_us).collect();
    assert_eq!(pts, vec![0, 33_333, 66_666]);
    assert_eq!(shared.count("finish"), 1);
    assert_cleaned_up(&shared);
}

#[test]
fn test_last_pts_follows_truncated_frame_duration() {
    for (fps, n) in [(24.0, 10), (29.97, 7), (1.0, 2), (60.0, 1)] {
        let config = config(fps);
        let (_, result) = Fixture::new().run(&config, &images(n));
        let report = result.unwrap();
        let expected = (n as i64 - 1) * (1_000_000.0 / fps) as i64;
        assert_eq!(report.last_pts_us, Some(expected), "fps {}", fps);
    }
}

#[test]
fn test_frames_are_loaded_one_at_a_time() {
    let (shared, result) = Fixture::new().run(&config(30.0), &images(2));
    result.unwrap();

    let pos = |c: &str| shared.position(c).unwrap();
    assert!(pos("configure") < pos("start"));
    assert!(pos("start") < pos("load 0"));
    assert!(pos("write 0") < pos("load 1"));
    assert!(pos("begin") < pos("write 0"));
    assert!(pos("end_of_input") < pos("finish"));
}

#[test]
fn test_empty_image_list_allocates_nothing() {
    let (shared, result) = Fixture::new().run(&config(30.0), &[]);
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert_eq!(shared.count("configure"), 0);
    assert_eq!(shared.count("begin"), 0);
}

#[test]
fn test_codec_config_is_never_written() {
    let (shared, result) = Fixture::new().run(&config(30.0), &images(4));
    result.unwrap();
    assert!(shared.written().iter().all(|u| !u.is_codec_config));
    assert!(shared.track().is_some_and(|t| !t.extradata().is_empty()));
}

#[test]
fn test_duplicate_negotiation_fails_and_cleans_up() {
    let mut fixture = Fixture::new();
    fixture.encoder.negotiate_twice = true;
    let (shared, result) = fixture.run(&config(30.0), &images(3));

    assert_eq!(result.unwrap_err().kind(), ErrorKind::EncoderProtocol);
    assert_eq!(shared.count("begin"), 1);
    assert_cleaned_up(&shared);
}

#[test]
fn test_image_load_failure_stops_the_loop() {
    let mut fixture = Fixture::new();
    fixture.source.fail_at = Some(2);
    let (shared, result) = fixture.run(&config(30.0), &images(5));

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ImageLoad);
    assert!(err.to_string().contains("img2.png"));
    assert_eq!(shared.count("load 3"), 0);
    assert_eq!(shared.count("submit 66666"), 0);
    assert_eq!(shared.written().len(), 2);
    assert_eq!(shared.count("finish"), 1);
    assert_cleaned_up(&shared);
}

#[test]
fn test_missing_output_buffer_fails_run() {
    let mut fixture = Fixture::new();
    fixture.encoder.empty_payload = true;
    let (shared, result) = fixture.run(&config(30.0), &images(2));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::EncoderProtocol);
    assert!(shared.written().is_empty());
    assert_cleaned_up(&shared);
}

#[test]
fn test_cancel_between_frames() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let fixture = Fixture::new();
    let shared = fixture.shared.clone();
    let err = Pipeline::new(fixture.source, fixture.encoder, fixture.writer)
        .with_tuning(fast())
        .with_cancel(cancel)
        .run(&config(30.0), &images(3))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(shared.count("load 0"), 0);
    assert_cleaned_up(&shared);
}

#[test]
fn test_silent_encoder_stalls_out() {
    let mut fixture = Fixture::new();
    fixture.encoder.silent = true;
    let (shared, result) = fixture.run(&config(30.0), &images(5));

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncoderProtocol);
    assert!(err.to_string().contains("no output"));
    // Two frames may wait for output; the third has to see some.
    assert_eq!(shared.count("load 2"), 1);
    assert_eq!(shared.count("load 3"), 0);
    assert_cleaned_up(&shared);
}

#[test]
fn test_silent_encoder_stalls_at_end_of_stream() {
    let mut fixture = Fixture::new();
    fixture.encoder.silent = true;
    let (shared, result) = fixture.run(&config(30.0), &images(1));

    assert_eq!(result.unwrap_err().kind(), ErrorKind::EncoderProtocol);
    assert_eq!(shared.count("end_of_input"), 1);
    assert_cleaned_up(&shared);
}

#[test]
fn test_delayed_output_catches_up() {
    for n in [1, 2, 5] {
        let mut fixture = Fixture::new();
        fixture.encoder.delay_frames = 2;
        let (shared, result) = fixture.run(&config(30.0), &images(n));
        let report = result.unwrap();

        assert_eq!(report.samples_written, n as u64);
        assert_eq!(report.last_pts_us, Some((n as i64 - 1) * 33_333));
        let pts: Vec<i64> = shared.written().iter().map(|u| u.pts_us).collect();
        let expected: Vec<i64> = (0..n as i64).map(|i| i * 33_333).collect();
        assert_eq!(pts, expected);
        assert_cleaned_up(&shared);
    }
}

#[test]
fn test_delay_beyond_in_flight_window_stalls() {
    let mut fixture = Fixture::new();
    fixture.encoder.delay_frames = 3;
    let (shared, result) = fixture.run(&config(30.0), &images(6));

    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EncoderProtocol);
    assert_eq!(shared.count("load 3"), 0);
    assert!(shared.written().is_empty());
    assert_cleaned_up(&shared);
}

#[test]
fn test_report_names_the_opened_encoder() {
    let mut fixture = Fixture::new();
    fixture.encoder.encoder_name = Some("h264_nvenc".to_string());
    let (_, result) = fixture.run(&config(30.0), &images(2));
    assert_eq!(result.unwrap().codec, "h264_nvenc");
}

#[test]
fn test_timestamp_overflow_is_never_submitted() {
    let config = PipelineConfig::new(0.001, 1_000_000.0, 16.0, 16.0, "o.mp4").unwrap();
    let images = [InputImageRef::new(10_000_000_000, "far.png")];
    let (shared, result) = Fixture::new().run(&config, &images);

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
    assert!(!shared.calls().iter().any(|c| c.starts_with("submit")));
    assert_cleaned_up(&shared);
}

#[test]
fn test_write_failure_is_io_error() {
    let mut fixture = Fixture::new();
    fixture.writer.fail_write = true;
    let (shared, result) = fixture.run(&config(30.0), &images(3));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Io);
    assert_eq!(shared.count("load 1"), 0);
    assert_cleaned_up(&shared);
}

#[test]
fn test_encoder_configure_failure_never_opens_output() {
    let mut fixture = Fixture::new();
    fixture.encoder.fail_configure = true;
    let (shared, result) = fixture.run(&config(30.0), &images(3));
    assert_eq!(result.unwrap_err().kind(), ErrorKind::Encoder);
    assert_eq!(shared.count("begin"), 0);
    assert_eq!(shared.count("encoder_stop"), 0);
    assert_cleaned_up(&shared);
}
