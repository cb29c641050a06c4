//! Zone-based object counting over tracked detections.
//!
//! Directed [`LineZone`]s count crossings in each direction, [`PolygonZone`]s
//! report occupancy, and the [`ZoneRegistry`] shares polygons between
//! requests by id. [`FrameCountingPipeline`] runs one frame through
//! enhancement, an external [`Tracker`], counting and annotation;
//! [`VideoBatchRunner`] drives it over a whole video with output codec
//! fallback. [`CountingService`] bundles these for an HTTP layer.

pub mod config;
pub mod error;
pub mod integration;
pub mod service;
pub mod video;
pub mod zone;

/// An 8-bit RGB frame.
pub type Frame = image::RgbImage;

pub use config::ZoneCountConfig;
pub use error::{Error, ErrorKind, Result};
pub use integration::{
    Annotator, DetectionBuilder, Enhancement, Enhancer, FrameCountingPipeline, FrameMetrics,
    PipelineConfig, StandardEnhancer, Tracker, TrackerSettings,
};
pub use service::{CountingService, ImageOutcome, ZoneTarget, encode_jpeg};
pub use video::{CancellationToken, CodecChain, VideoBatchRunner, VideoOutcome};
pub use zone::{
    Anchor, BoundingBox, Detection, LineSpec, LineZone, Point, PolygonZone, SessionKey, TrackId,
    ZoneCounts, ZoneHandle, ZoneId, ZoneRegistry, ZoneSession,
};
