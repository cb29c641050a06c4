//! Directed line counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::zone::ZoneCounts;
use crate::zone::detection::{Detection, TrackId};
use crate::zone::geometry::{Anchor, Point, Side, side_of};

/// Scope of a line's per-track side memory.
///
/// Track ids are only meaningful inside the tracker session that issued
/// them, so each session remembers sides under its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey(u64);

impl SessionKey {
    /// For callers that keep one tracker session across requests, e.g. a
    /// client submitting the frames of a stream one image at a time.
    pub const SHARED: SessionKey = SessionKey(0);

    /// A key never handed out before in this process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Endpoints and anchor of a line zone, as given by a caller or config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub start: [f32; 2],
    pub end: [f32; 2],
    #[serde(default)]
    pub anchor: Anchor,
}

impl Default for LineSpec {
    /// Horizontal line across the middle of a 1280x720 frame.
    fn default() -> Self {
        Self {
            start: [0.0, 360.0],
            end: [1280.0, 360.0],
            anchor: Anchor::BottomCenter,
        }
    }
}

/// Counts tracked objects crossing the directed segment `start -> end`.
///
/// A crossing from side A to side B (see [`Side`]) is an "in", the reverse an
/// "out". Which endpoint is the start is fixed at construction, so swapping
/// the endpoints swaps the meaning of in and out.
#[derive(Debug, Clone)]
pub struct LineZone {
    start: Point,
    end: Point,
    anchor: Anchor,
    in_count: u64,
    out_count: u64,
    last_side: HashMap<(SessionKey, TrackId), Side>,
}

impl LineZone {
    pub fn new(start: Point, end: Point) -> Result<Self> {
        Self::with_anchor(start, end, Anchor::default())
    }

    pub fn with_anchor(start: Point, end: Point, anchor: Anchor) -> Result<Self> {
        let finite = [start.x, start.y, end.x, end.y].iter().all(|v| v.is_finite());
        if !finite {
            return Err(Error::invalid("line endpoints must be finite"));
        }
        if start == end {
            return Err(Error::invalid("line start and end must differ"));
        }
        Ok(Self {
            start,
            end,
            anchor,
            in_count: 0,
            out_count: 0,
            last_side: HashMap::new(),
        })
    }

    pub fn from_spec(spec: &LineSpec) -> Result<Self> {
        Self::with_anchor(
            Point::new(spec.start[0], spec.start[1]),
            Point::new(spec.end[0], spec.end[1]),
            spec.anchor,
        )
    }

    /// Update counts with one frame's detections, in the shared session.
    pub fn trigger(&mut self, detections: &[Detection]) {
        self.trigger_in(SessionKey::SHARED, detections);
    }

    /// Update counts with one frame's detections from tracker session `session`.
    ///
    /// Only detections carrying a track id take part. A track's first sighting
    /// in a session records its side without counting; an anchor exactly on the
    /// line leaves the recorded side untouched.
    pub fn trigger_in(&mut self, session: SessionKey, detections: &[Detection]) {
        for det in detections {
            let Some(track_id) = det.track_id else {
                continue;
            };
            let Some(side) = side_of(&self.start, &self.end, &det.anchor(self.anchor)) else {
                continue;
            };
            match self.last_side.insert((session, track_id), side) {
                Some(Side::A) if side == Side::B => self.in_count += 1,
                Some(Side::B) if side == Side::A => self.out_count += 1,
                _ => {}
            }
        }
    }

    pub fn in_count(&self) -> u64 {
        self.in_count
    }

    pub fn out_count(&self) -> u64 {
        self.out_count
    }

    pub fn counts(&self) -> ZoneCounts {
        ZoneCounts::Line {
            in_count: self.in_count,
            out_count: self.out_count,
        }
    }

    pub fn start(&self) -> Point {
        self.start
    }

    pub fn end(&self) -> Point {
        self.end
    }

    /// Number of (session, track id) pairs with a recorded side.
    pub fn tracked_len(&self) -> usize {
        self.last_side.len()
    }

    /// Forget the sides recorded by a finished session. Counts are kept.
    pub fn end_session(&mut self, session: SessionKey) {
        self.last_side.retain(|(key, _), _| *key != session);
    }

    /// Drop counts and side memory, keeping the geometry.
    pub fn reset(&mut self) {
        self.in_count = 0;
        self.out_count = 0;
        self.last_side.clear();
    }
}
