//! Integration module connecting detection/tracking backends with the counting zones.
//!
//! This module provides the traits external collaborators implement (trackers,
//! enhancement filters) and the per-frame pipeline that drives them.

mod annotate;
mod builder;
mod enhance;
mod pipeline;
mod tracker;

pub use annotate::{Annotator, detection_label};
pub use builder::DetectionBuilder;
pub use enhance::{EnhanceParams, Enhancement, Enhancer, StandardEnhancer};
pub use pipeline::{FrameCountingPipeline, FrameMetrics, PipelineConfig};
pub use tracker::{Tracker, TrackerSettings, class_label};
