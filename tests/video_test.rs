use std::sync::Arc;
use std::thread;

use zonecount_rs::video::{MjpegEncoderFactory, MjpegSource, NoEncoders, StreamInfo};
use zonecount_rs::video::{EncoderFactory, FrameSink, FrameSource};
use zonecount_rs::zone::shared_line;
use zonecount_rs::{
    Annotator, CancellationToken, CodecChain, CountingService, Detection, ErrorKind, Frame,
    FrameCountingPipeline, LineSpec, LineZone, PipelineConfig, Point, Tracker, TrackerSettings,
    VideoBatchRunner, ZoneCounts, ZoneRegistry, ZoneTarget,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, thiserror::Error)]
#[error("tracker crashed")]
struct Crash;

/// Walks one object straight down the frame, 10px per frame.
///
/// The session is the number of frames seen, so a session shared between
/// videos would continue the walk instead of restarting it.
struct WalkingTracker {
    crash_at: Option<u32>,
}

impl Tracker for WalkingTracker {
    type Session = u32;
    type Error = Crash;

    fn open_session(&self, settings: &TrackerSettings) -> u32 {
        assert!(settings.persist);
        0
    }

    fn track(&mut self, _frame: &Frame, step: &mut u32) -> Result<Vec<Detection>, Crash> {
        if self.crash_at == Some(*step) {
            return Err(Crash);
        }
        let bottom = 5.0 + 10.0 * *step as f32;
        *step += 1;
        Ok(vec![Detection::new(20.0, bottom - 4.0, 24.0, bottom, 0, 0.7).with_track_id(9)])
    }

    fn class_name(&self, _class_id: u32) -> Option<&str> {
        Some("car")
    }
}

fn mjpeg_video(frames: usize) -> Vec<u8> {
    let info = StreamInfo {
        width: 48,
        height: 48,
        fps: 10.0,
    };
    let mut sink = MjpegEncoderFactory::default().open("mjpg", &info).unwrap();
    for i in 0..frames {
        let shade = (i * 40) as u8;
        sink.write(&Frame::from_pixel(48, 48, image::Rgb([shade, shade, shade])))
            .unwrap();
    }
    sink.finish().unwrap()
}

fn service() -> CountingService {
    CountingService::new(
        Arc::new(ZoneRegistry::new()),
        FrameCountingPipeline::new(Annotator::default()),
        VideoBatchRunner::new(Arc::new(NoEncoders), CodecChain::default(), 10.0),
    )
}

fn line_across_middle() -> LineSpec {
    LineSpec {
        start: [0.0, 24.0],
        end: [48.0, 24.0],
        ..LineSpec::default()
    }
}

#[test]
fn test_exhausted_codec_list_falls_back_to_mjpeg() {
    init_logging();
    let outcome = service()
        .process_video_bytes(
            &mut WalkingTracker { crash_at: None },
            &mjpeg_video(4),
            &ZoneTarget::NewLine(line_across_middle()),
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();

    assert_eq!(outcome.codec, "mjpg");
    assert_eq!(outcome.frames, 4);
    assert!(!outcome.output.is_empty());
    assert_eq!(
        outcome.final_counts,
        Some(ZoneCounts::Line {
            in_count: 1,
            out_count: 0
        })
    );

    // The output is itself a readable stream with every frame, in order.
    let mut decoded = MjpegSource::new(outcome.output, 10.0).unwrap();
    assert_eq!(decoded.info().width, 48);
    let mut frames = 0;
    while decoded.next_frame().unwrap().is_some() {
        frames += 1;
    }
    assert_eq!(frames, 4);
}

#[test]
fn test_each_video_gets_its_own_tracker_session() {
    init_logging();
    let svc = service();
    let shared = shared_line(LineZone::new(Point::new(0.0, 24.0), Point::new(48.0, 24.0)).unwrap());
    let target = ZoneTarget::Line(shared.clone());
    let mut tracker = WalkingTracker { crash_at: None };

    for _ in 0..2 {
        svc.process_video_bytes(
            &mut tracker,
            &mjpeg_video(4),
            &target,
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    }

    // Fresh sessions restart the walk above the line, so both videos cross
    // once and the long-lived line accumulates both crossings.
    let zone = shared.lock().unwrap();
    assert_eq!((zone.in_count(), zone.out_count()), (2, 0));
    // Side memory of finished videos is released.
    assert_eq!(zone.tracked_len(), 0);
}

#[test]
fn test_concurrent_videos_on_one_line_keep_sessions_apart() {
    init_logging();
    let svc = service();
    let shared = shared_line(LineZone::new(Point::new(0.0, 24.0), Point::new(48.0, 24.0)).unwrap());
    let target = ZoneTarget::Line(shared.clone());
    let video = mjpeg_video(4);
    let (svc, video, target) = (&svc, &video, &target);

    // Every video reports track id 9 for its own object.
    thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(move |_| {
                scope.spawn(move || {
                    svc.process_video_bytes(
                        &mut WalkingTracker { crash_at: None },
                        video,
                        target,
                        &PipelineConfig::default(),
                        &CancellationToken::new(),
                    )
                    .unwrap()
                })
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap().frames, 4);
        }
    });

    let zone = shared.lock().unwrap();
    assert_eq!((zone.in_count(), zone.out_count()), (4, 0));
    assert_eq!(zone.tracked_len(), 0);
}

#[test]
fn test_per_request_line_starts_from_zero() {
    let svc = service();
    let target = ZoneTarget::NewLine(line_across_middle());
    let mut tracker = WalkingTracker { crash_at: None };
    for _ in 0..2 {
        let outcome = svc
            .process_video_bytes(
                &mut tracker,
                &mjpeg_video(4),
                &target,
                &PipelineConfig::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(
            outcome.final_counts,
            Some(ZoneCounts::Line {
                in_count: 1,
                out_count: 0
            })
        );
    }
}

#[test]
fn test_tracker_crash_names_the_frame() {
    let err = service()
        .process_video_bytes(
            &mut WalkingTracker { crash_at: Some(2) },
            &mjpeg_video(4),
            &ZoneTarget::None,
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
    assert!(err.to_string().contains("frame 2"), "{}", err);
}

#[test]
fn test_unknown_polygon_fails_before_decoding() {
    let err = service()
        .process_video_bytes(
            &mut WalkingTracker { crash_at: None },
            b"not even a video",
            &ZoneTarget::Polygon("0123".into()),
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_polygon_zone_counts_video_occupancy() {
    let svc = service();
    let created = svc.create_default_zone(48, 48).unwrap();
    let id = created.zone_id.as_str().into();
    let outcome = svc
        .process_video_bytes(
            &mut WalkingTracker { crash_at: None },
            &mjpeg_video(3),
            &ZoneTarget::Polygon(id),
            &PipelineConfig::default(),
            &CancellationToken::new(),
        )
        .unwrap();
    // Last anchor is (22, 25), inside the 4.8..43.2 square.
    assert_eq!(
        outcome.final_counts,
        Some(ZoneCounts::Polygon {
            current_count: 1,
            entered_count: 1
        })
    );
}
