//! VideoBatchRunner: drives a whole video through the frame pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::integration::{Enhancer, FrameCountingPipeline, PipelineConfig, Tracker};
use crate::zone::{ZoneCounts, ZoneHandle, ZoneSession};

use super::codec::{CodecChain, EncoderFactory, FrameSource, StreamInfo};
use super::mjpeg::MjpegEncoderFactory;

/// Cooperative cancellation flag, checked before every frame.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a completed video run.
#[derive(Debug, Clone, Serialize)]
pub struct VideoOutcome {
    /// Encoded annotated video.
    #[serde(skip)]
    pub output: Vec<u8>,
    /// Codec tag the output was encoded with.
    pub codec: String,
    pub frames: u64,
    /// Output stream geometry and rate.
    pub info: StreamInfo,
    /// Zone counters after the last frame.
    pub final_counts: Option<ZoneCounts>,
}

/// Runs every frame of a video, in order, through a [`FrameCountingPipeline`].
///
/// The output encoder is negotiated before the first frame is read, so a
/// missing codec never wastes tracker work or touches zone state.
#[derive(Clone)]
pub struct VideoBatchRunner {
    encoders: Arc<dyn EncoderFactory>,
    fallback: Arc<dyn EncoderFactory>,
    chain: CodecChain,
    default_fps: f64,
}

impl std::fmt::Debug for VideoBatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoBatchRunner")
            .field("chain", &self.chain)
            .field("default_fps", &self.default_fps)
            .finish_non_exhaustive()
    }
}

impl VideoBatchRunner {
    /// `encoders` serves the preferred codecs; the built-in Motion-JPEG
    /// encoder is the fallback.
    pub fn new(encoders: Arc<dyn EncoderFactory>, chain: CodecChain, default_fps: f64) -> Self {
        Self {
            encoders,
            fallback: Arc::new(MjpegEncoderFactory::default()),
            chain,
            default_fps,
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn EncoderFactory>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn chain(&self) -> &CodecChain {
        &self.chain
    }

    /// Process the whole stream and return the encoded result.
    ///
    /// Any failure aborts the run and discards the partial output; zone
    /// updates from frames already processed are kept, as they would be for
    /// the same frames submitted one by one.
    ///
    /// `session` is treated as belonging to this run: line sides recorded
    /// for its track ids are forgotten once the run ends.
    #[allow(clippy::too_many_arguments)]
    pub fn run<S, T, E>(
        &self,
        mut source: S,
        pipeline: &FrameCountingPipeline<E>,
        tracker: &mut T,
        session: &mut T::Session,
        zone: Option<&ZoneHandle>,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<VideoOutcome>
    where
        S: FrameSource,
        T: Tracker,
        E: Enhancer,
    {
        let started = Instant::now();
        let info = self.output_info(source.info())?;
        let mut sink = self
            .chain
            .negotiate(self.encoders.as_ref(), self.fallback.as_ref(), &info)?;
        let codec = sink.codec().to_string();
        let scoped = zone.map(ZoneHandle::session);
        let zone = scoped.as_ref().map(ZoneSession::handle);

        let mut frames: u64 = 0;
        while let Some(frame) = source.next_frame()? {
            if cancel.is_cancelled() {
                log::info!("video run cancelled after {} frames", frames);
                return Err(Error::Cancelled {
                    frames_done: frames,
                });
            }
            if frame.dimensions() != (info.width, info.height) {
                return Err(Error::invalid(format!(
                    "frame {} is {}x{}, stream header says {}x{}",
                    frames,
                    frame.width(),
                    frame.height(),
                    info.width,
                    info.height
                )));
            }
            let (annotated, _metrics) =
                pipeline.process_frame(tracker, session, &frame, zone, config, Some(frames))?;
            sink.write(&annotated)?;
            frames += 1;
        }

        if frames == 0 {
            return Err(Error::invalid("video contains no frames"));
        }

        let final_counts = zone.map(ZoneHandle::counts).transpose()?;
        let output = sink.finish()?;
        log::info!(
            "processed {} frames ({}x{} @ {:.2} fps) as '{}' in {:.2?}, {} bytes",
            frames,
            info.width,
            info.height,
            info.fps,
            codec,
            started.elapsed(),
            output.len()
        );

        Ok(VideoOutcome {
            output,
            codec,
            frames,
            info,
            final_counts,
        })
    }

    fn output_info(&self, mut info: StreamInfo) -> Result<StreamInfo> {
        if info.width == 0 || info.height == 0 {
            return Err(Error::invalid(format!(
                "video stream is {}x{}",
                info.width, info.height
            )));
        }
        if !info.fps.is_finite() || info.fps <= 0.0 {
            log::warn!(
                "stream reports {} fps, using {} instead",
                info.fps,
                self.default_fps
            );
            info.fps = self.default_fps;
        }
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Frame;
    use crate::error::ErrorKind;
    use crate::integration::{Annotator, TrackerSettings};
    use crate::video::codec::testing::ScriptedFactory;
    use crate::zone::{Detection, LineZone, Point, shared_line};
    use image::Rgb;
    use std::collections::VecDeque;

    struct VecSource {
        info: StreamInfo,
        frames: VecDeque<Frame>,
    }

    impl VecSource {
        fn new(count: u8, fps: f64) -> Self {
            Self {
                info: StreamInfo {
                    width: 32,
                    height: 32,
                    fps,
                },
                frames: (0..count).map(|i| Frame::from_pixel(32, 32, Rgb([i, i, i]))).collect(),
            }
        }
    }

    impl FrameSource for VecSource {
        fn info(&self) -> StreamInfo {
            self.info
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            Ok(self.frames.pop_front())
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("gpu lost")]
    struct GpuLost;

    /// Moves one object downward across y=16, recording the frame shades it saw.
    struct DescendingTracker {
        seen: Vec<u8>,
        fail_on: Option<usize>,
    }

    impl Tracker for DescendingTracker {
        type Session = ();
        type Error = GpuLost;

        fn open_session(&self, _settings: &TrackerSettings) {}

        fn track(&mut self, frame: &Frame, _session: &mut ()) -> std::result::Result<Vec<Detection>, GpuLost> {
            let call = self.seen.len();
            if self.fail_on == Some(call) {
                return Err(GpuLost);
            }
            self.seen.push(frame.get_pixel(31, 31)[0]);
            let bottom = 10.0 + 4.0 * call as f32;
            Ok(vec![Detection::new(10.0, bottom - 5.0, 14.0, bottom, 0, 0.8).with_track_id(1)])
        }

        fn class_name(&self, _class_id: u32) -> Option<&str> {
            None
        }
    }

    fn runner(working: Vec<&'static str>) -> VideoBatchRunner {
        VideoBatchRunner::new(
            Arc::new(ScriptedFactory::new(working, vec![])),
            CodecChain::default(),
            25.0,
        )
    }

    fn line() -> ZoneHandle {
        ZoneHandle::line(shared_line(
            LineZone::new(Point::new(0.0, 16.0), Point::new(32.0, 16.0)).unwrap(),
        ))
    }

    fn plain() -> PipelineConfig {
        PipelineConfig {
            annotate: false,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_frames_processed_in_order_and_counted() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: None,
        };
        let zone = line();
        let outcome = runner(vec!["avc1"])
            .run(
                VecSource::new(4, 30.0),
                &FrameCountingPipeline::new(Annotator::default()),
                &mut tracker,
                &mut (),
                Some(&zone),
                &plain(),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(tracker.seen, vec![0, 1, 2, 3]);
        assert_eq!(outcome.frames, 4);
        assert_eq!(outcome.codec, "avc1");
        assert_eq!(outcome.info.fps, 30.0);
        // RecordingSink concatenates raw frames; shades must appear in order.
        let frame_len = 32 * 32 * 3;
        assert_eq!(outcome.output.len(), 4 * frame_len);
        for i in 0..4 {
            assert_eq!(outcome.output[i * frame_len], i as u8);
        }
        assert_eq!(
            outcome.final_counts,
            Some(ZoneCounts::Line {
                in_count: 1,
                out_count: 0
            })
        );
        // The run's side memory is released with it.
        let ZoneHandle::Line { zone, .. } = &zone else {
            panic!("expected a line zone");
        };
        assert_eq!(zone.lock().unwrap().tracked_len(), 0);
    }

    #[test]
    fn test_builtin_fallback_produces_output() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: None,
        };
        let outcome = runner(vec![])
            .run(
                VecSource::new(3, 0.0),
                &FrameCountingPipeline::new(Annotator::default()),
                &mut tracker,
                &mut (),
                None,
                &PipelineConfig::default(),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(outcome.codec, "mjpg");
        assert_eq!(outcome.info.fps, 25.0);
        assert!(!outcome.output.is_empty());
        assert_eq!(outcome.final_counts, None);
    }

    #[test]
    fn test_no_codec_fails_before_any_frame() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: None,
        };
        let zone = line();
        let err = runner(vec![])
            .with_fallback(Arc::new(ScriptedFactory::new(vec![], vec!["mjpg"])))
            .run(
                VecSource::new(3, 25.0),
                &FrameCountingPipeline::new(Annotator::default()),
                &mut tracker,
                &mut (),
                Some(&zone),
                &plain(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CodecUnavailable);
        assert!(tracker.seen.is_empty());
        assert_eq!(
            zone.counts().unwrap(),
            ZoneCounts::Line {
                in_count: 0,
                out_count: 0
            }
        );
    }

    #[test]
    fn test_mid_video_failure_aborts() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: Some(2),
        };
        let err = runner(vec!["avc1"])
            .run(
                VecSource::new(5, 25.0),
                &FrameCountingPipeline::new(Annotator::default()),
                &mut tracker,
                &mut (),
                Some(&line()),
                &plain(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamFailure);
        assert!(err.to_string().contains("frame 2"));
        assert_eq!(tracker.seen.len(), 2);
    }

    #[test]
    fn test_cancelled_before_first_frame() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: None,
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = runner(vec!["avc1"])
            .run(
                VecSource::new(2, 25.0),
                &FrameCountingPipeline::new(Annotator::default()),
                &mut tracker,
                &mut (),
                None,
                &plain(),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled { frames_done: 0 }));
        assert!(tracker.seen.is_empty());
    }

    #[test]
    fn test_empty_video_and_size_mismatch() {
        let mut tracker = DescendingTracker {
            seen: Vec::new(),
            fail_on: None,
        };
        let pipeline = FrameCountingPipeline::new(Annotator::default());
        let err = runner(vec!["avc1"])
            .run(
                VecSource::new(0, 25.0),
                &pipeline,
                &mut tracker,
                &mut (),
                None,
                &plain(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let mut source = VecSource::new(1, 25.0);
        source.frames.push_back(Frame::new(16, 16));
        let err = runner(vec!["avc1"])
            .run(
                source,
                &pipeline,
                &mut tracker,
                &mut (),
                None,
                &plain(),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(err.to_string().contains("frame 1"));
    }
}
