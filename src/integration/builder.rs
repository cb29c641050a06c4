//! Builder for creating Detection objects from various box formats.

use crate::zone::{BoundingBox, Detection, TrackId};

/// Builder for creating `Detection` objects from various input formats.
#[derive(Debug, Clone, Default)]
pub struct DetectionBuilder {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    class_id: u32,
    confidence: f32,
    track_id: Option<TrackId>,
}

impl DetectionBuilder {
    /// Create a new detection builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.x1 = l;
        self.y1 = t;
        self.x2 = l + w;
        self.y2 = t + h;
        self
    }

    pub fn class_id(mut self, class_id: u32) -> Self {
        self.class_id = class_id;
        self
    }

    /// Set the confidence score.
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Set the tracker-assigned id; zero leaves the detection untracked.
    pub fn track_id(mut self, track_id: u64) -> Self {
        self.track_id = TrackId::new(track_id);
        self
    }

    /// Build the final `Detection`.
    pub fn build(self) -> Detection {
        Detection {
            bbox: BoundingBox::from_tlbr(self.x1, self.y1, self.x2, self.y2),
            class_id: self.class_id,
            confidence: self.confidence,
            track_id: self.track_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_builder() {
        let det = DetectionBuilder::new()
            .tlbr(10.0, 20.0, 50.0, 80.0)
            .class_id(2)
            .confidence(0.95)
            .track_id(11)
            .build();

        assert_eq!(det.confidence, 0.95);
        assert_eq!(det.class_id, 2);
        assert_eq!(det.track_id.map(TrackId::get), Some(11));
        assert!(det.validate().is_ok());
    }

    #[test]
    fn test_xywh_and_tlwh_agree() {
        let a = DetectionBuilder::new().xywh(30.0, 50.0, 40.0, 60.0).build();
        let b = DetectionBuilder::new().tlwh(10.0, 20.0, 40.0, 60.0).build();
        assert_eq!(a.bbox, b.bbox);
        assert!(a.track_id.is_none());
    }
}
