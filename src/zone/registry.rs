//! Process-wide store of polygon zones, addressed by random hex ids.
//!
//! Entries live until deleted. Each entry has its own lock, so triggers on
//! different zones never contend beyond the brief map lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rand::RngCore;

use crate::error::{Error, Result};
use crate::zone::geometry::{Point, inset_rectangle};
use crate::zone::polygon_zone::PolygonZone;
use crate::zone::{SharedPolygonZone, ZoneCounts, lock};
use crate::zone::detection::Detection;

/// Opaque polygon zone identifier (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ZoneId(String);

impl ZoneId {
    fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ZoneId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ZoneId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// How a registered zone is drawn on annotated frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneStyle {
    pub color: [u8; 3],
    pub thickness: u32,
}

impl Default for ZoneStyle {
    fn default() -> Self {
        Self {
            color: [255, 64, 64],
            thickness: 2,
        }
    }
}

/// A polygon zone together with its renderer settings.
#[derive(Debug, Clone)]
pub struct RegisteredZone {
    pub zone: PolygonZone,
    pub style: ZoneStyle,
}

/// Keyed store of polygon zones shared by every request that names them.
///
/// The map itself is only locked for the duration of an insert, lookup or
/// removal; counting happens under the per-zone mutex, so work on one zone
/// never blocks callers using other ids. Entries live until deleted or until
/// the registry is dropped; nothing is persisted.
#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: RwLock<HashMap<ZoneId, SharedPolygonZone>>,
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `vertices` and register a new zone under a fresh id.
    pub fn create(&self, vertices: Vec<Point>, style: ZoneStyle) -> Result<ZoneId> {
        let zone = PolygonZone::new(vertices)?;
        let entry = Arc::new(Mutex::new(RegisteredZone { zone, style }));

        let mut zones = self.write()?;
        let mut id = ZoneId::random();
        while zones.contains_key(&id) {
            id = ZoneId::random();
        }
        zones.insert(id.clone(), entry);
        log::info!("registered polygon zone {} ({} zones)", id, zones.len());
        Ok(id)
    }

    /// Register the central-80% rectangle of a frame and return it.
    pub fn create_default(&self, frame_width: u32, frame_height: u32) -> Result<(ZoneId, Vec<Point>)> {
        if frame_width == 0 || frame_height == 0 {
            return Err(Error::invalid(format!(
                "frame size {}x{} has no area",
                frame_width, frame_height
            )));
        }
        let vertices = inset_rectangle(frame_width, frame_height);
        let id = self.create(vertices.clone(), ZoneStyle::default())?;
        Ok((id, vertices))
    }

    pub fn get(&self, id: &ZoneId) -> Result<SharedPolygonZone> {
        self.read()?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove a zone. Requests already holding it finish against the old entry.
    pub fn delete(&self, id: &ZoneId) -> Result<()> {
        match self.write()?.remove(id) {
            Some(_) => {
                log::info!("deleted polygon zone {}", id);
                Ok(())
            }
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    /// Trigger a registered zone with one frame's detections.
    pub fn trigger(&self, id: &ZoneId, detections: &[Detection]) -> Result<ZoneCounts> {
        let entry = self.get(id)?;
        let mut entry = lock(&entry, "polygon zone")?;
        entry.zone.trigger(detections);
        Ok(entry.zone.counts())
    }

    pub fn counts(&self, id: &ZoneId) -> Result<ZoneCounts> {
        let entry = self.get(id)?;
        let entry = lock(&entry, "polygon zone")?;
        Ok(entry.zone.counts())
    }

    pub fn ids(&self) -> Result<Vec<ZoneId>> {
        let mut ids: Vec<ZoneId> = self.read()?.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<ZoneId, SharedPolygonZone>>> {
        self.zones.read().map_err(|_| Error::Poisoned("zone registry"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ZoneId, SharedPolygonZone>>> {
        self.zones.write().map_err(|_| Error::Poisoned("zone registry"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::thread;

    fn square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ]
    }

    #[test]
    fn test_create_get_delete() {
        let registry = ZoneRegistry::new();
        let id = registry.create(square(), ZoneStyle::default()).unwrap();
        assert_eq!(id.as_str().len(), 32);
        assert!(registry.get(&id).is_ok());
        assert_eq!(registry.len().unwrap(), 1);

        registry.delete(&id).unwrap();
        assert_eq!(registry.get(&id).unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(registry.delete(&id).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_poisoned_registry_is_an_error_not_empty() {
        let registry = Arc::new(ZoneRegistry::new());
        registry.create(square(), ZoneStyle::default()).unwrap();
        let holder = Arc::clone(&registry);
        let _ = thread::spawn(move || {
            let _zones = holder.zones.write().unwrap();
            panic!("writer died holding the registry");
        })
        .join();

        assert_eq!(registry.len().unwrap_err().kind(), ErrorKind::Poisoned);
        assert_eq!(registry.is_empty().unwrap_err().kind(), ErrorKind::Poisoned);
    }

    #[test]
    fn test_recreate_yields_new_id() {
        let registry = ZoneRegistry::new();
        let first = registry.create(square(), ZoneStyle::default()).unwrap();
        registry.delete(&first).unwrap();
        let second = registry.create(square(), ZoneStyle::default()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_polygon_not_registered() {
        let registry = ZoneRegistry::new();
        let err = registry
            .create(vec![Point::new(0.0, 0.0), Point::new(1.0, 0.0)], ZoneStyle::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(registry.is_empty().unwrap());
    }

    #[test]
    fn test_create_default_insets_ten_percent() {
        let registry = ZoneRegistry::new();
        let (id, vertices) = registry.create_default(640, 480).unwrap();
        assert_eq!(vertices[0], Point::new(64.0, 48.0));
        assert_eq!(vertices[2], Point::new(576.0, 432.0));
        let entry = registry.get(&id).unwrap();
        assert_eq!(entry.lock().unwrap().zone.vertices(), vertices.as_slice());
    }

    #[test]
    fn test_unknown_id() {
        let registry = ZoneRegistry::new();
        let err = registry.trigger(&ZoneId::from("missing"), &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_concurrent_use_of_distinct_and_shared_ids() {
        let registry = Arc::new(ZoneRegistry::new());
        let shared = registry.create(square(), ZoneStyle::default()).unwrap();

        let handles: Vec<_> = (0..8u64)
            .map(|i| {
                let registry = registry.clone();
                let shared = shared.clone();
                thread::spawn(move || {
                    let own = registry.create(square(), ZoneStyle::default()).unwrap();
                    let det = Detection::new(4.0, 2.0, 6.0, 5.0, 0, 0.9).with_track_id(i + 1);
                    registry.trigger(&shared, &[det.clone()]).unwrap();
                    registry.trigger(&own, &[det]).unwrap();
                    registry.delete(&own).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.ids().unwrap(), vec![shared.clone()]);
        // Every trigger replaced occupancy with a single detection.
        assert_eq!(
            registry.counts(&shared).unwrap(),
            ZoneCounts::Polygon {
                current_count: 1,
                entered_count: 8
            }
        );
    }
}
