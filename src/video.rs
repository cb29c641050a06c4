//! Whole-video processing: frame sources, encoder negotiation and the batch runner.

mod codec;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod mjpeg;
mod runner;

pub use codec::{CodecChain, EncoderFactory, FrameSink, FrameSource, StreamInfo};
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegEncoder, FfmpegEncoderFactory, FfmpegSource};
pub use mjpeg::{MJPEG_CODEC, MjpegEncoder, MjpegEncoderFactory, MjpegSource};
pub use runner::{CancellationToken, VideoBatchRunner, VideoOutcome};

/// Factory that opens nothing, for builds without a native codec library.
///
/// With it, [`VideoBatchRunner`] always falls through to Motion-JPEG.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEncoders;

impl EncoderFactory for NoEncoders {
    fn open(&self, codec: &str, _info: &StreamInfo) -> crate::Result<Box<dyn FrameSink>> {
        Err(crate::Error::Encoding(format!(
            "codec '{}' needs the ffmpeg feature",
            codec
        )))
    }
}

/// Encoders for the preferred codec tags available in this build.
pub fn default_encoders() -> std::sync::Arc<dyn EncoderFactory> {
    #[cfg(feature = "ffmpeg")]
    {
        std::sync::Arc::new(FfmpegEncoderFactory)
    }
    #[cfg(not(feature = "ffmpeg"))]
    {
        std::sync::Arc::new(NoEncoders)
    }
}
