//! Counting zones: directed lines, polygons and the shared polygon registry.

mod detection;
mod geometry;
mod line_zone;
mod polygon_zone;
mod registry;

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::error::{Error, Result};

pub use detection::{Detection, TrackId};
pub use geometry::{
    Anchor, BoundingBox, Point, Side, inset_rectangle, polygon_area, polygon_contains, side_of,
};
pub use line_zone::{LineSpec, LineZone, SessionKey};
pub use polygon_zone::{PolygonZone, validate_polygon};
pub use registry::{RegisteredZone, ZoneId, ZoneRegistry, ZoneStyle};

/// Snapshot of a zone's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "zone", rename_all = "snake_case")]
pub enum ZoneCounts {
    Line { in_count: u64, out_count: u64 },
    Polygon { current_count: u64, entered_count: u64 },
}

/// Line zone shared between the requests that accumulate into it.
pub type SharedLineZone = Arc<Mutex<LineZone>>;

/// Registry entry shared by every request naming its id.
pub type SharedPolygonZone = Arc<Mutex<RegisteredZone>>;

/// Wrap a line zone for sharing.
pub fn shared_line(zone: LineZone) -> SharedLineZone {
    Arc::new(Mutex::new(zone))
}

/// The zone a frame is counted against.
///
/// Holding the zone behind a mutex makes each trigger a critical section, so
/// concurrent requests on the same zone never interleave partial updates.
///
/// A line remembers track sides per [`SessionKey`]; `session` names the
/// tracker session whose ids this handle feeds in.
#[derive(Debug, Clone)]
pub enum ZoneHandle {
    Line {
        zone: SharedLineZone,
        session: SessionKey,
    },
    Polygon(SharedPolygonZone),
}

impl ZoneHandle {
    /// Handle on a line in the shared session.
    pub fn line(zone: SharedLineZone) -> Self {
        Self::Line {
            zone,
            session: SessionKey::SHARED,
        }
    }

    /// Scope this handle to a fresh tracker session.
    ///
    /// Line sides recorded through the returned guard are forgotten when it
    /// drops. Polygons keep no per-track memory and are passed through.
    pub fn session(&self) -> ZoneSession {
        let handle = match self {
            Self::Line { zone, .. } => Self::Line {
                zone: Arc::clone(zone),
                session: SessionKey::next(),
            },
            Self::Polygon(entry) => Self::Polygon(Arc::clone(entry)),
        };
        ZoneSession { handle }
    }

    /// Trigger the zone and return the counts observed inside the same lock.
    pub fn trigger(&self, detections: &[Detection]) -> Result<ZoneCounts> {
        match self {
            Self::Line { zone, session } => {
                let mut zone = lock(zone, "line zone")?;
                zone.trigger_in(*session, detections);
                Ok(zone.counts())
            }
            Self::Polygon(entry) => {
                let mut entry = lock(entry, "polygon zone")?;
                entry.zone.trigger(detections);
                Ok(entry.zone.counts())
            }
        }
    }

    pub fn counts(&self) -> Result<ZoneCounts> {
        match self {
            Self::Line { zone, .. } => Ok(lock(zone, "line zone")?.counts()),
            Self::Polygon(entry) => Ok(lock(entry, "polygon zone")?.zone.counts()),
        }
    }
}

/// A zone handle bound to one tracker session, see [`ZoneHandle::session`].
#[derive(Debug)]
pub struct ZoneSession {
    handle: ZoneHandle,
}

impl ZoneSession {
    pub fn handle(&self) -> &ZoneHandle {
        &self.handle
    }
}

impl Drop for ZoneSession {
    fn drop(&mut self) {
        if let ZoneHandle::Line { zone, session } = &self.handle {
            match zone.lock() {
                Ok(mut zone) => zone.end_session(*session),
                Err(_) => log::warn!("line zone poisoned, side memory of {:?} kept", session),
            }
        }
    }
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> Result<MutexGuard<'a, T>> {
    mutex.lock().map_err(|_| Error::Poisoned(what))
}
