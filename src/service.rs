//! CountingService: the operations an HTTP layer calls.
//!
//! The service owns the polygon registry and the processing configuration.
//! It is cheap to share behind an `Arc` and holds no per-request state;
//! trackers and their sessions are supplied by the caller.

use std::io::Cursor;
use std::sync::Arc;

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;
use serde::Serialize;

use crate::Frame;
use crate::config::ZoneCountConfig;
use crate::error::{Error, Result};
use crate::integration::{
    Enhancer, FrameCountingPipeline, FrameMetrics, PipelineConfig, StandardEnhancer, Tracker,
    TrackerSettings,
};
use crate::video::{CancellationToken, FrameSource, MjpegSource, VideoBatchRunner, VideoOutcome};
use crate::zone::{
    LineSpec, LineZone, Point, SharedLineZone, ZoneCounts, ZoneHandle, ZoneId, ZoneRegistry,
    ZoneStyle, shared_line,
};

/// Which zone a request counts against.
#[derive(Debug, Clone, Default)]
pub enum ZoneTarget {
    /// Detect and annotate only.
    #[default]
    None,
    /// A caller-owned line that accumulates across the requests sharing it.
    Line(SharedLineZone),
    /// A line created for this request alone; its counts start at zero.
    NewLine(LineSpec),
    /// A registered polygon, shared with every request naming the same id.
    Polygon(ZoneId),
}

/// Result of processing one image.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub frame: Frame,
    pub metrics: FrameMetrics,
}

/// JSON-friendly description of a newly created default zone.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedZone {
    pub zone_id: String,
    pub vertices: Vec<[f32; 2]>,
}

pub struct CountingService<E: Enhancer = StandardEnhancer> {
    registry: Arc<ZoneRegistry>,
    pipeline: FrameCountingPipeline<E>,
    runner: VideoBatchRunner,
    tracker_settings: TrackerSettings,
    defaults: PipelineConfig,
    default_line: LineSpec,
    default_fps: f64,
}

impl CountingService<StandardEnhancer> {
    /// Build a service from resolved configuration with a fresh registry.
    pub fn from_config(config: &ZoneCountConfig) -> Result<Self> {
        let pipeline = FrameCountingPipeline::new(config.annotator()?);
        let runner = config.runner(crate::video::default_encoders());
        Ok(Self::new(Arc::new(ZoneRegistry::new()), pipeline, runner)
            .with_defaults(config.pipeline_config(), config.line)
            .with_tracker_settings(config.pipeline.tracker.clone())
            .with_default_fps(config.video.default_fps))
    }
}

impl<E: Enhancer> CountingService<E> {
    pub fn new(
        registry: Arc<ZoneRegistry>,
        pipeline: FrameCountingPipeline<E>,
        runner: VideoBatchRunner,
    ) -> Self {
        Self {
            registry,
            pipeline,
            runner,
            tracker_settings: TrackerSettings::default(),
            defaults: PipelineConfig::default(),
            default_line: LineSpec::default(),
            default_fps: 25.0,
        }
    }

    pub fn with_defaults(mut self, defaults: PipelineConfig, line: LineSpec) -> Self {
        self.defaults = defaults;
        self.default_line = line;
        self
    }

    pub fn with_tracker_settings(mut self, settings: TrackerSettings) -> Self {
        self.tracker_settings = settings;
        self
    }

    pub fn with_default_fps(mut self, fps: f64) -> Self {
        self.default_fps = fps;
        self
    }

    pub fn registry(&self) -> &Arc<ZoneRegistry> {
        &self.registry
    }

    /// Step toggles used when a request does not supply its own.
    pub fn default_config(&self) -> &PipelineConfig {
        &self.defaults
    }

    /// Per-request line built from the configured default line.
    pub fn default_line_target(&self) -> ZoneTarget {
        ZoneTarget::NewLine(self.default_line)
    }

    pub fn tracker_settings(&self) -> &TrackerSettings {
        &self.tracker_settings
    }

    pub fn create_zone(&self, vertices: Vec<[f32; 2]>) -> Result<ZoneId> {
        let vertices = vertices.into_iter().map(|[x, y]| Point::new(x, y)).collect();
        self.registry.create(vertices, ZoneStyle::default())
    }

    /// Register the central 80% of a `width` x `height` frame.
    pub fn create_default_zone(&self, width: u32, height: u32) -> Result<CreatedZone> {
        let (id, vertices) = self.registry.create_default(width, height)?;
        Ok(CreatedZone {
            zone_id: id.to_string(),
            vertices: vertices.iter().map(|p| [p.x, p.y]).collect(),
        })
    }

    pub fn delete_zone(&self, id: &ZoneId) -> Result<()> {
        self.registry.delete(id)
    }

    pub fn zone_counts(&self, id: &ZoneId) -> Result<ZoneCounts> {
        self.registry.counts(id)
    }

    /// Decode, process and annotate one uploaded image.
    ///
    /// Nothing is counted unless the bytes decode and the zone resolves.
    pub fn process_image<T: Tracker>(
        &self,
        tracker: &mut T,
        session: &mut T::Session,
        bytes: &[u8],
        target: &ZoneTarget,
        config: &PipelineConfig,
    ) -> Result<ImageOutcome> {
        let frame = decode_image(bytes)?;
        let zone = self.resolve(target, config)?;
        let (frame, metrics) =
            self.pipeline
                .process_frame(tracker, session, &frame, zone.as_ref(), config, None)?;
        Ok(ImageOutcome { frame, metrics })
    }

    /// Process every frame of `source` in a tracker session of its own.
    pub fn process_video<T: Tracker, S: FrameSource>(
        &self,
        tracker: &mut T,
        source: S,
        target: &ZoneTarget,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<VideoOutcome> {
        let zone = self.resolve(target, config)?;
        let mut session = tracker.open_session(&self.tracker_settings);
        self.runner.run(
            source,
            &self.pipeline,
            tracker,
            &mut session,
            zone.as_ref(),
            config,
            cancel,
        )
    }

    /// Decode an uploaded video with the best decoder in this build and process it.
    pub fn process_video_bytes<T: Tracker>(
        &self,
        tracker: &mut T,
        bytes: &[u8],
        target: &ZoneTarget,
        config: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<VideoOutcome> {
        // Resolve first so an unknown zone fails before the upload is decoded.
        self.resolve(target, config)?;
        if MjpegSource::sniff(bytes) {
            let source = MjpegSource::new(bytes.to_vec(), self.default_fps)?;
            return self.process_video(tracker, source, target, config, cancel);
        }
        #[cfg(feature = "ffmpeg")]
        {
            let source = crate::video::FfmpegSource::from_bytes(bytes)?;
            self.process_video(tracker, source, target, config, cancel)
        }
        #[cfg(not(feature = "ffmpeg"))]
        {
            Err(Error::invalid(
                "unsupported video container (only motion-jpeg without the ffmpeg feature)",
            ))
        }
    }

    fn resolve(&self, target: &ZoneTarget, config: &PipelineConfig) -> Result<Option<ZoneHandle>> {
        if !config.track && !matches!(target, ZoneTarget::None) {
            return Err(Error::invalid("counting in a zone requires tracking"));
        }
        match target {
            ZoneTarget::None => Ok(None),
            ZoneTarget::Line(zone) => Ok(Some(ZoneHandle::line(zone.clone()))),
            ZoneTarget::NewLine(spec) => {
                Ok(Some(ZoneHandle::line(shared_line(LineZone::from_spec(spec)?))))
            }
            ZoneTarget::Polygon(id) => Ok(Some(ZoneHandle::Polygon(self.registry.get(id)?))),
        }
    }
}

fn decode_image(bytes: &[u8]) -> Result<Frame> {
    if bytes.is_empty() {
        return Err(Error::invalid("empty image upload"));
    }
    let image = image::load_from_memory(bytes)
        .map_err(|e| Error::invalid(format!("cannot decode image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Encode a frame as JPEG for a response body.
pub fn encode_jpeg(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(frame)?;
    Ok(out)
}

/// Encode a frame as PNG for a response body.
pub fn encode_png(frame: &Frame) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    frame.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
