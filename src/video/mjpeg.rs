//! Motion-JPEG elementary streams: concatenated baseline JPEG frames.
//!
//! This is the built-in fallback format. It needs nothing beyond the `image`
//! crate, so it can always be opened.

use image::ImageFormat;
use image::codecs::jpeg::JpegEncoder;

use crate::Frame;
use crate::error::{Error, Result};

use super::codec::{EncoderFactory, FrameSink, FrameSource, StreamInfo};

pub const MJPEG_CODEC: &str = "mjpg";

/// Opens [`MjpegEncoder`]s for the `mjpg` tag.
#[derive(Debug, Clone, Copy)]
pub struct MjpegEncoderFactory {
    quality: u8,
}

impl MjpegEncoderFactory {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }
}

impl Default for MjpegEncoderFactory {
    fn default() -> Self {
        Self::new(90)
    }
}

impl EncoderFactory for MjpegEncoderFactory {
    fn open(&self, codec: &str, info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        if !codec.eq_ignore_ascii_case(MJPEG_CODEC) {
            return Err(Error::Encoding(format!(
                "motion-jpeg factory cannot encode '{}'",
                codec
            )));
        }
        Ok(Box::new(MjpegEncoder::new(*info, self.quality)?))
    }
}

/// In-memory Motion-JPEG writer.
#[derive(Debug)]
pub struct MjpegEncoder {
    info: StreamInfo,
    quality: u8,
    buffer: Vec<u8>,
    frames: u64,
}

impl MjpegEncoder {
    pub fn new(info: StreamInfo, quality: u8) -> Result<Self> {
        if info.width == 0 || info.height == 0 {
            return Err(Error::invalid(format!(
                "cannot encode {}x{} frames",
                info.width, info.height
            )));
        }
        Ok(Self {
            info,
            quality,
            buffer: Vec::new(),
            frames: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl FrameSink for MjpegEncoder {
    fn codec(&self) -> &str {
        MJPEG_CODEC
    }

    fn is_open(&self) -> bool {
        self.info.width > 0 && self.info.height > 0
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if frame.dimensions() != (self.info.width, self.info.height) {
            return Err(Error::Encoding(format!(
                "frame is {}x{}, stream is {}x{}",
                frame.width(),
                frame.height(),
                self.info.width,
                self.info.height
            )));
        }
        JpegEncoder::new_with_quality(&mut self.buffer, self.quality).encode_image(frame)?;
        self.frames += 1;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>> {
        log::debug!("motion-jpeg stream finished: {} frames", self.frames);
        Ok(self.buffer)
    }
}

/// Reads a Motion-JPEG stream held in memory.
///
/// Frame boundaries are found by walking JPEG marker segments, so marker-like
/// bytes inside metadata or entropy-coded data do not split a frame.
#[derive(Debug)]
pub struct MjpegSource {
    data: Vec<u8>,
    offset: usize,
    info: StreamInfo,
    first: Option<Frame>,
}

impl MjpegSource {
    /// `fps` is not stored in the stream and must be supplied.
    pub fn new(data: Vec<u8>, fps: f64) -> Result<Self> {
        let mut source = Self {
            data,
            offset: 0,
            info: StreamInfo {
                width: 0,
                height: 0,
                fps,
            },
            first: None,
        };
        let first = source
            .decode_next()?
            .ok_or_else(|| Error::invalid("motion-jpeg stream contains no frames"))?;
        source.info.width = first.width();
        source.info.height = first.height();
        source.first = Some(first);
        Ok(source)
    }

    /// Whether `bytes` start like a JPEG frame.
    pub fn sniff(bytes: &[u8]) -> bool {
        bytes.starts_with(&[0xFF, 0xD8, 0xFF])
    }

    fn decode_next(&mut self) -> Result<Option<Frame>> {
        let Some((start, end)) = next_jpeg(&self.data, self.offset)? else {
            return Ok(None);
        };
        self.offset = end;
        let image = image::load_from_memory_with_format(&self.data[start..end], ImageFormat::Jpeg)?;
        Ok(Some(image.to_rgb8()))
    }
}

impl FrameSource for MjpegSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.first.take() {
            return Ok(Some(frame));
        }
        self.decode_next()
    }
}

/// Byte range of the next complete JPEG at or after `from`.
fn next_jpeg(data: &[u8], from: usize) -> Result<Option<(usize, usize)>> {
    let Some(start) = find_soi(data, from) else {
        let trailing = &data[from.min(data.len())..];
        if trailing.iter().all(|b| b.is_ascii_whitespace() || *b == 0) {
            return Ok(None);
        }
        return Err(Error::invalid("trailing bytes after last motion-jpeg frame"));
    };

    let truncated = || Error::invalid(format!("truncated jpeg frame at byte {}", start));
    let mut pos = start + 2;
    loop {
        // Fill bytes (0xFF runs) may precede a marker.
        while data.get(pos) == Some(&0xFF) && data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        if data.get(pos) != Some(&0xFF) {
            return Err(truncated());
        }
        let marker = *data.get(pos + 1).ok_or_else(truncated)?;
        pos += 2;
        match marker {
            0xD9 => return Ok(Some((start, pos))),
            0x01 | 0xD0..=0xD7 => {}
            _ => {
                let hi = *data.get(pos).ok_or_else(truncated)? as usize;
                let lo = *data.get(pos + 1).ok_or_else(truncated)? as usize;
                pos += (hi << 8) | lo;
                if marker == 0xDA {
                    pos = skip_entropy_coded(data, pos).ok_or_else(truncated)?;
                }
            }
        }
    }
}

fn find_soi(data: &[u8], from: usize) -> Option<usize> {
    data.get(from..)?
        .windows(2)
        .position(|w| w == [0xFF, 0xD8])
        .map(|i| from + i)
}

/// Position of the first real marker after scan data starting at `pos`.
fn skip_entropy_coded(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let byte = *data.get(pos)?;
        if byte == 0xFF {
            let next = *data.get(pos + 1)?;
            if next != 0x00 && !(0xD0..=0xD7).contains(&next) && next != 0xFF {
                return Some(pos);
            }
            pos += if next == 0xFF { 1 } else { 2 };
        } else {
            pos += 1;
        }
    }
}
