//! Polygon occupancy counter.

use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::zone::ZoneCounts;
use crate::zone::detection::{Detection, TrackId};
use crate::zone::geometry::{Anchor, Point, inset_rectangle, polygon_area, polygon_contains};

/// Counts detections whose anchor lies inside a polygon.
///
/// [`current_count`](Self::current_count) is instantaneous occupancy and is
/// recomputed from scratch on every trigger. Untracked detections count
/// towards occupancy but never enter the id set, so
/// `current_count == inside_ids().len() + anonymous_inside()` after each trigger.
///
/// [`entered_count`](Self::entered_count) is cumulative: it grows by one each
/// time a tracked id is inside after not having been inside on the previous
/// trigger.
#[derive(Debug, Clone)]
pub struct PolygonZone {
    vertices: Vec<Point>,
    anchor: Anchor,
    current_count: u64,
    inside: HashSet<TrackId>,
    anonymous_inside: u64,
    entered_count: u64,
}

impl PolygonZone {
    pub fn new(vertices: Vec<Point>) -> Result<Self> {
        Self::with_anchor(vertices, Anchor::default())
    }

    pub fn with_anchor(vertices: Vec<Point>, anchor: Anchor) -> Result<Self> {
        validate_polygon(&vertices)?;
        Ok(Self {
            vertices,
            anchor,
            current_count: 0,
            inside: HashSet::new(),
            anonymous_inside: 0,
            entered_count: 0,
        })
    }

    /// Zone covering the central 80% of a `width` x `height` frame.
    pub fn from_frame_default(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::invalid(format!(
                "frame size {}x{} has no area",
                width, height
            )));
        }
        Self::new(inset_rectangle(width, height))
    }

    /// Replace occupancy with the detections of one frame.
    pub fn trigger(&mut self, detections: &[Detection]) {
        let mut inside = HashSet::new();
        let mut anonymous_inside = 0;
        let mut current_count = 0;

        for det in detections {
            if !polygon_contains(&self.vertices, &det.anchor(self.anchor)) {
                continue;
            }
            current_count += 1;
            match det.track_id {
                Some(id) => {
                    // Duplicate ids within a frame occupy one slot.
                    if !inside.insert(id) {
                        current_count -= 1;
                    }
                }
                None => anonymous_inside += 1,
            }
        }

        let entered = inside.difference(&self.inside).count() as u64;
        self.entered_count += entered;
        self.inside = inside;
        self.anonymous_inside = anonymous_inside;
        self.current_count = current_count;
    }

    /// Objects inside as of the last trigger. Detections repeating a track id
    /// within one frame share a single slot; anonymous ones count each.
    pub fn current_count(&self) -> u64 {
        self.current_count
    }

    pub fn entered_count(&self) -> u64 {
        self.entered_count
    }

    pub fn anonymous_inside(&self) -> u64 {
        self.anonymous_inside
    }

    pub fn inside_ids(&self) -> &HashSet<TrackId> {
        &self.inside
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn counts(&self) -> ZoneCounts {
        ZoneCounts::Polygon {
            current_count: self.current_count,
            entered_count: self.entered_count,
        }
    }
}

/// At least three finite vertices enclosing a non-zero area.
pub fn validate_polygon(vertices: &[Point]) -> Result<()> {
    if vertices.len() < 3 {
        return Err(Error::invalid(format!(
            "polygon needs at least 3 vertices, got {}",
            vertices.len()
        )));
    }
    if let Some(bad) = vertices.iter().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(Error::invalid(format!(
            "polygon vertex ({}, {}) is not a finite coordinate",
            bad.x, bad.y
        )));
    }
    if polygon_area(vertices) <= 0.0 {
        return Err(Error::invalid("polygon vertices are collinear"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> PolygonZone {
        PolygonZone::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap()
    }

    fn at(x: f32, y: f32) -> Detection {
        Detection::new(x - 1.0, y - 2.0, x + 1.0, y, 0, 0.8)
    }

    #[test]
    fn test_inside_and_outside() {
        let mut zone = unit_square();
        zone.trigger(&[at(5.0, 5.0)]);
        assert_eq!(zone.current_count(), 1);
        zone.trigger(&[at(15.0, 15.0)]);
        assert_eq!(zone.current_count(), 0);
    }

    #[test]
    fn test_count_is_not_accumulated() {
        let mut zone = unit_square();
        let frame = [
            at(2.0, 2.0).with_track_id(1),
            at(8.0, 8.0).with_track_id(2),
            at(20.0, 2.0).with_track_id(3),
        ];
        for _ in 0..3 {
            zone.trigger(&frame);
            assert_eq!(zone.current_count(), 2);
        }
        assert_eq!(zone.entered_count(), 2);
    }

    #[test]
    fn test_boundary_counts_as_inside() {
        let mut zone = unit_square();
        zone.trigger(&[at(10.0, 10.0), at(0.0, 5.0), at(5.0, 10.0)]);
        assert_eq!(zone.current_count(), 3);
    }

    #[test]
    fn test_count_matches_inside_set() {
        let mut zone = unit_square();
        zone.trigger(&[
            at(1.0, 1.0).with_track_id(4),
            at(1.0, 1.0).with_track_id(4),
            at(3.0, 3.0),
            at(11.0, 3.0).with_track_id(5),
        ]);
        assert_eq!(zone.inside_ids().len(), 1);
        assert_eq!(zone.anonymous_inside(), 1);
        assert_eq!(
            zone.current_count(),
            zone.inside_ids().len() as u64 + zone.anonymous_inside()
        );
    }

    #[test]
    fn test_entered_counts_reentry() {
        let mut zone = unit_square();
        zone.trigger(&[at(5.0, 5.0).with_track_id(1)]);
        zone.trigger(&[at(50.0, 5.0).with_track_id(1)]);
        zone.trigger(&[at(5.0, 5.0).with_track_id(1)]);
        assert_eq!(zone.entered_count(), 2);
        assert_eq!(
            zone.counts(),
            ZoneCounts::Polygon {
                current_count: 1,
                entered_count: 2
            }
        );
    }

    #[test]
    fn test_invalid_polygons() {
        assert!(PolygonZone::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).is_err());
        assert!(
            PolygonZone::new(vec![
                Point::new(0.0, 0.0),
                Point::new(1.0, 1.0),
                Point::new(2.0, 2.0)
            ])
            .is_err()
        );
        assert!(
            PolygonZone::new(vec![
                Point::new(0.0, 0.0),
                Point::new(f32::NAN, 1.0),
                Point::new(2.0, 0.0)
            ])
            .is_err()
        );
        assert!(PolygonZone::from_frame_default(0, 480).is_err());
    }
}
