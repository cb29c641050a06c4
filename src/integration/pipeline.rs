//! FrameCountingPipeline: enhancement, tracking, counting and annotation of one frame.

use serde::Serialize;

use crate::Frame;
use crate::error::{Error, Result};
use crate::zone::{Detection, ZoneCounts, ZoneHandle, lock};

use super::annotate::{Annotator, detection_label};
use super::enhance::{Enhancement, Enhancer, StandardEnhancer};
use super::tracker::{Tracker, class_label};

/// Which pipeline steps run for a request.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Transform applied before tracking; `None` skips enhancement.
    pub enhancement: Option<Enhancement>,
    /// Run the tracker. Counting requires tracking.
    pub track: bool,
    /// Draw boxes, labels and the zone overlay on the output frame.
    pub annotate: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enhancement: None,
            track: true,
            annotate: true,
        }
    }
}

/// What one processed frame produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameMetrics {
    /// `None` for single images.
    pub frame_index: Option<u64>,
    pub detections: usize,
    pub labels: Vec<String>,
    /// Zone counters right after this frame's trigger.
    pub counts: Option<ZoneCounts>,
}

#[derive(Debug, thiserror::Error)]
#[error("tracker returned malformed detection #{index}: {reason}")]
struct MalformedDetection {
    index: usize,
    reason: String,
}

/// Runs the per-frame steps in order: enhance, track, count, annotate.
///
/// The pipeline holds no per-stream state; tracking state lives in the
/// caller's tracker session and counting state in the zone.
#[derive(Debug, Clone, Default)]
pub struct FrameCountingPipeline<E: Enhancer = StandardEnhancer> {
    enhancer: E,
    annotator: Annotator,
}

impl FrameCountingPipeline<StandardEnhancer> {
    pub fn new(annotator: Annotator) -> Self {
        Self::with_enhancer(StandardEnhancer, annotator)
    }
}

impl<E: Enhancer> FrameCountingPipeline<E> {
    pub fn with_enhancer(enhancer: E, annotator: Annotator) -> Self {
        Self {
            enhancer,
            annotator,
        }
    }

    pub fn annotator(&self) -> &Annotator {
        &self.annotator
    }

    /// Process a single frame and return the annotated copy with its metrics.
    ///
    /// `frame` is never modified. A tracker failure is returned before the
    /// zone is touched, so the zone's counts stay exactly as they were.
    pub fn process_frame<T: Tracker>(
        &self,
        tracker: &mut T,
        session: &mut T::Session,
        frame: &Frame,
        zone: Option<&ZoneHandle>,
        config: &PipelineConfig,
        frame_index: Option<u64>,
    ) -> Result<(Frame, FrameMetrics)> {
        let mut output = match &config.enhancement {
            Some(enhancement) => self.enhancer.enhance(frame, enhancement),
            None => frame.clone(),
        };

        let detections = if config.track {
            let detections = tracker
                .track(&output, session)
                .map_err(|e| Error::upstream(frame_index, e))?;
            check_detections(&detections, frame_index)?;
            detections
        } else {
            Vec::new()
        };

        let labels: Vec<String> = detections
            .iter()
            .map(|det| detection_label(det, &class_label(tracker, det.class_id)))
            .collect();

        if config.annotate {
            self.annotator
                .draw_detections(&mut output, &detections, &labels);
        }

        let counts = match zone {
            Some(zone) => Some(self.count(zone, &detections, config, &mut output)?),
            None => None,
        };

        if let Some(index) = frame_index {
            log::debug!(
                "frame {}: {} detections, counts {:?}",
                index,
                detections.len(),
                counts
            );
        }

        Ok((
            output,
            FrameMetrics {
                frame_index,
                detections: detections.len(),
                labels,
                counts,
            },
        ))
    }

    /// Trigger and draw under one lock so the overlay shows this frame's counts.
    fn count(
        &self,
        zone: &ZoneHandle,
        detections: &[Detection],
        config: &PipelineConfig,
        output: &mut Frame,
    ) -> Result<ZoneCounts> {
        match zone {
            ZoneHandle::Line { zone, session } => {
                let mut zone = lock(zone, "line zone")?;
                if config.track {
                    zone.trigger_in(*session, detections);
                }
                if config.annotate {
                    self.annotator.draw_line_zone(output, &zone);
                }
                Ok(zone.counts())
            }
            ZoneHandle::Polygon(entry) => {
                let mut entry = lock(entry, "polygon zone")?;
                if config.track {
                    entry.zone.trigger(detections);
                }
                if config.annotate {
                    self.annotator.draw_polygon_zone(output, &entry);
                }
                Ok(entry.zone.counts())
            }
        }
    }
}

fn check_detections(detections: &[Detection], frame_index: Option<u64>) -> Result<()> {
    for (index, det) in detections.iter().enumerate() {
        if let Err(err) = det.validate() {
            let reason = match err {
                Error::InvalidInput(reason) => reason,
                other => other.to_string(),
            };
            return Err(Error::upstream(
                frame_index,
                MalformedDetection { index, reason },
            ));
        }
    }
    Ok(())
}
