//! Error types shared by the counting engine and the video runner.

use thiserror::Error;

/// Boxed error produced by an external collaborator (detector, tracker, codec library).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by zone counting and frame/video processing.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed image/video bytes, polygon or detection.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown zone identifier.
    #[error("zone '{0}' not found")]
    NotFound(String),

    /// No encoder in the codec chain could be opened.
    #[error("no output encoder available (tried: {})", tried.join(", "))]
    CodecUnavailable { tried: Vec<String> },

    /// The detector/tracker failed. `frame_index` is `None` for single images.
    #[error("{}", upstream_message(*frame_index, source))]
    Upstream {
        frame_index: Option<u64>,
        #[source]
        source: BoxError,
    },

    /// Writing to an already opened encoder failed.
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Processing stopped through a cancellation token.
    #[error("cancelled after {frames_done} frames")]
    Cancelled { frames_done: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A zone lock was poisoned by a panicking holder.
    #[error("zone state lock poisoned: {0}")]
    Poisoned(&'static str),
}

fn upstream_message(frame_index: Option<u64>, source: &BoxError) -> String {
    match frame_index {
        Some(index) => format!("tracker failed on frame {}: {}", index, source),
        None => format!("tracker failed: {}", source),
    }
}

/// Coarse classification of [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    CodecUnavailable,
    UpstreamFailure,
    Encoding,
    Cancelled,
    Config,
    Io,
    Poisoned,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::CodecUnavailable { .. } => ErrorKind::CodecUnavailable,
            Self::Upstream { .. } => ErrorKind::UpstreamFailure,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Poisoned(_) => ErrorKind::Poisoned,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn upstream<E>(frame_index: Option<u64>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream {
            frame_index,
            source: Box::new(source),
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => Self::Io(io),
            image::ImageError::Encoding(e) => Self::Encoding(e.to_string()),
            other => Self::InvalidInput(other.to_string()),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
