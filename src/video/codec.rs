//! Frame source/sink traits and output codec negotiation.

use serde::{Deserialize, Serialize};

use crate::Frame;
use crate::error::{Error, Result};

/// Geometry and rate of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Decoded input video.
pub trait FrameSource {
    /// Header values, available before the first frame is read.
    fn info(&self) -> StreamInfo;

    /// Next frame in presentation order; `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Opened output encoder.
///
/// Dropping a sink without calling [`finish`](Self::finish) discards
/// everything written so far.
pub trait FrameSink {
    /// Codec tag this sink encodes with.
    fn codec(&self) -> &str;

    /// Readiness check performed after opening, independent of whatever the
    /// underlying library reported while opening.
    fn is_open(&self) -> bool;

    fn write(&mut self, frame: &Frame) -> Result<()>;

    /// Flush and return the encoded stream.
    fn finish(self: Box<Self>) -> Result<Vec<u8>>;
}

/// Opens encoders by codec tag.
pub trait EncoderFactory: Send + Sync {
    fn open(&self, codec: &str, info: &StreamInfo) -> Result<Box<dyn FrameSink>>;
}

/// Prioritised codec tags plus the always-available fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecChain {
    /// Tried in order, most broadly browser-compatible first.
    pub preferred: Vec<String>,
    /// Opened with the fallback factory once `preferred` is exhausted.
    pub fallback: String,
}

impl Default for CodecChain {
    fn default() -> Self {
        Self {
            preferred: vec!["avc1".into(), "vp09".into(), "mp4v".into()],
            fallback: "mjpg".into(),
        }
    }
}

impl CodecChain {
    /// Open the first codec that both opens and then reports itself open.
    ///
    /// Fails with [`Error::CodecUnavailable`] when every preferred codec and
    /// the fallback are exhausted.
    pub fn negotiate(
        &self,
        encoders: &dyn EncoderFactory,
        fallback: &dyn EncoderFactory,
        info: &StreamInfo,
    ) -> Result<Box<dyn FrameSink>> {
        let mut attempts: Vec<(&str, &dyn EncoderFactory)> = self
            .preferred
            .iter()
            .map(|codec| (codec.as_str(), encoders))
            .collect();
        attempts.push((self.fallback.as_str(), fallback));

        let mut tried = Vec::new();
        for (codec, factory) in attempts {
            tried.push(codec.to_string());
            match factory.open(codec, info) {
                Ok(sink) if sink.is_open() => {
                    log::info!(
                        "output encoder '{}' opened for {}x{} @ {:.2} fps",
                        codec,
                        info.width,
                        info.height,
                        info.fps
                    );
                    return Ok(sink);
                }
                Ok(_) => log::warn!("encoder '{}' reported success but is not open", codec),
                Err(err) => log::warn!("encoder '{}' unavailable: {}", codec, err),
            }
        }
        Err(Error::CodecUnavailable { tried })
    }
}
