//! Per-frame detections fed into zones.

use std::fmt;
use std::num::NonZeroU64;

use crate::error::{Error, Result};
use crate::zone::geometry::{Anchor, BoundingBox, Point};

/// Identity the tracker assigns to one physical object within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(NonZeroU64);

impl TrackId {
    /// Returns `None` for zero; track ids are always positive.
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One object observed in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: u32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    /// Present once the tracker has associated this box with earlier frames.
    pub track_id: Option<TrackId>,
}

impl Detection {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox: BoundingBox::from_tlbr(x_min, y_min, x_max, y_max),
            class_id,
            confidence,
            track_id: None,
        }
    }

    pub fn from_box(bbox: BoundingBox, class_id: u32, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            confidence,
            track_id: None,
        }
    }

    /// Attach a track id. Zero means "untracked".
    pub fn with_track_id(mut self, track_id: u64) -> Self {
        self.track_id = TrackId::new(track_id);
        self
    }

    pub fn anchor(&self, anchor: Anchor) -> Point {
        self.bbox.anchor(anchor)
    }

    /// Check the box ordering and the confidence range.
    pub fn validate(&self) -> Result<()> {
        if !self.bbox.is_valid() {
            return Err(Error::invalid(format!(
                "detection box {:?} is not ordered or not finite",
                self.bbox
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::invalid(format!(
                "detection confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}
