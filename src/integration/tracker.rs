//! Trait for the external detector/tracker collaborator.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::Frame;
use crate::zone::Detection;

/// Options handed to a tracker when a session is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerSettings {
    /// Tracker configuration identifier, e.g. `"bytetrack.yaml"`.
    pub config: String,
    /// Keep association state between frames of the session.
    pub persist: bool,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            config: "bytetrack.yaml".to_string(),
            persist: true,
        }
    }
}

/// Detection + tracking backend.
///
/// Implement this trait to connect any detection model and its tracker to the
/// counting pipeline. Association state lives in `Session`, which the caller
/// owns: one session per video or logical stream, passed back unchanged on
/// every frame. Frames of one session are always supplied in order.
///
/// # Example
///
/// ```ignore
/// use zonecount_rs::{Detection, Frame, Tracker, TrackerSettings};
///
/// struct MyTracker {
///     // Your model here
/// }
///
/// impl Tracker for MyTracker {
///     type Session = MyAssociationState;
///     type Error = std::io::Error;
///
///     fn open_session(&self, settings: &TrackerSettings) -> Self::Session {
///         MyAssociationState::new(settings.persist)
///     }
///
///     fn track(&mut self, frame: &Frame, session: &mut Self::Session) -> Result<Vec<Detection>, Self::Error> {
///         Ok(vec![])
///     }
///
///     fn class_name(&self, class_id: u32) -> Option<&str> {
///         None
///     }
/// }
/// ```
pub trait Tracker {
    /// Per-stream association state.
    type Session;

    /// Error type for detection failures.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start a new stream.
    fn open_session(&self, settings: &TrackerSettings) -> Self::Session;

    /// Detect objects in one frame, assigning track ids where the session has
    /// matched earlier frames.
    fn track(
        &mut self,
        frame: &Frame,
        session: &mut Self::Session,
    ) -> Result<Vec<Detection>, Self::Error>;

    /// Human-readable label of a class id.
    fn class_name(&self, class_id: u32) -> Option<&str>;
}

/// Label for a class id, falling back to the numeric id.
pub fn class_label<T: Tracker + ?Sized>(tracker: &T, class_id: u32) -> Cow<'_, str> {
    match tracker.class_name(class_id) {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(class_id.to_string()),
    }
}
