//! FFmpeg-backed video decoding and encoding.
//!
//! Both directions go through a temporary file: uploads arrive as bytes but
//! the demuxers want a seekable path, and the muxers write their index at the
//! end. The temporary file is removed when the source or sink is dropped.

use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::software::scaling;
use tempfile::NamedTempFile;

use crate::Frame;
use crate::error::{Error, Result};

use super::codec::{EncoderFactory, FrameSink, FrameSource, StreamInfo};

fn init() -> Result<()> {
    ffmpeg::init().map_err(|e| Error::Encoding(format!("initialize ffmpeg: {}", e)))
}

fn decode_err(what: &'static str) -> impl FnOnce(ffmpeg::Error) -> Error {
    move |e| Error::invalid(format!("{}: {}", what, e))
}

fn encode_err(what: &'static str) -> impl FnOnce(ffmpeg::Error) -> Error {
    move |e| Error::Encoding(format!("{}: {}", what, e))
}

/// Decodes an uploaded container to RGB frames.
pub struct FfmpegSource {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: scaling::Context,
    info: StreamInfo,
    eof_sent: bool,
    _file: NamedTempFile,
}

impl FfmpegSource {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        init()?;
        let mut file = NamedTempFile::new()?;
        std::io::Write::write_all(&mut file, bytes)?;
        Self::open(file)
    }

    /// The file is kept for as long as the decoder reads from it.
    fn open(file: NamedTempFile) -> Result<Self> {
        let input = ffmpeg::format::input(&file.path()).map_err(decode_err("open video"))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| Error::invalid("upload has no video track"))?;
        let stream_index = stream.index();
        let fps = f64::from(stream.avg_frame_rate());
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(decode_err("load decoder parameters"))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(decode_err("open video decoder"))?;
        let scaler = scaling::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            scaling::Flags::BILINEAR,
        )
        .map_err(decode_err("create scaler"))?;
        let info = StreamInfo {
            width: decoder.width(),
            height: decoder.height(),
            fps,
        };
        log::debug!(
            "ffmpeg source: {}x{} @ {:.2} fps, stream #{}",
            info.width,
            info.height,
            info.fps,
            stream_index
        );
        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            info,
            eof_sent: false,
            _file: file,
        })
    }

    fn to_frame(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(decode_err("scale frame to RGB"))?;
        let (width, height) = (rgb.width(), rgb.height());
        let row_bytes = width as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data(0);
        let mut pixels = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            pixels.extend_from_slice(
                data.get(start..start + row_bytes)
                    .ok_or_else(|| Error::invalid("decoded frame row is out of bounds"))?,
            );
        }
        Frame::from_raw(width, height, pixels)
            .ok_or_else(|| Error::invalid("decoded frame has inconsistent size"))
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> StreamInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.to_frame(&decoded).map(Some);
            }
            if self.eof_sent {
                return Ok(None);
            }
            let index = self.stream_index;
            let packet = self
                .input
                .packets()
                .find(|(stream, _)| stream.index() == index)
                .map(|(_, packet)| packet);
            match packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(decode_err("send packet to decoder"))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(decode_err("flush decoder"))?;
                    self.eof_sent = true;
                }
            }
        }
    }
}

/// Opens libavcodec encoders for the browser-oriented codec tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegEncoderFactory;

impl FfmpegEncoderFactory {
    /// libavcodec encoder and container extension for a codec tag.
    fn lookup(tag: &str) -> Option<(&'static str, &'static str)> {
        match tag.to_ascii_lowercase().as_str() {
            "avc1" | "h264" => Some(("libx264", "mp4")),
            "vp09" | "vp9" => Some(("libvpx-vp9", "webm")),
            "mp4v" => Some(("mpeg4", "mp4")),
            _ => None,
        }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn open(&self, codec: &str, info: &StreamInfo) -> Result<Box<dyn FrameSink>> {
        init()?;
        let (name, extension) = Self::lookup(codec)
            .ok_or_else(|| Error::Encoding(format!("no ffmpeg mapping for codec '{}'", codec)))?;
        Ok(Box::new(FfmpegEncoder::open(codec, name, extension, info)?))
    }
}

/// Encodes RGB frames into a temporary container file.
pub struct FfmpegEncoder {
    tag: String,
    output: ffmpeg::format::context::Output,
    encoder: ffmpeg::encoder::video::Encoder,
    scaler: scaling::Context,
    stream_time_base: ffmpeg::Rational,
    encoder_time_base: ffmpeg::Rational,
    info: StreamInfo,
    next_pts: i64,
    header_written: bool,
    file: NamedTempFile,
}

impl FfmpegEncoder {
    fn open(tag: &str, name: &str, extension: &str, info: &StreamInfo) -> Result<Self> {
        let codec = ffmpeg::encoder::find_by_name(name)
            .ok_or_else(|| Error::Encoding(format!("encoder '{}' not compiled in", name)))?;
        let file = tempfile::Builder::new()
            .suffix(&format!(".{}", extension))
            .tempfile()?;
        let mut output = ffmpeg::format::output(&file.path()).map_err(encode_err("open output"))?;
        let global_header = output
            .format()
            .flags()
            .contains(ffmpeg::format::Flags::GLOBAL_HEADER);

        let rate = ffmpeg::Rational::new((info.fps * 1000.0).round().max(1.0) as i32, 1000);
        let mut context = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(encode_err("create encoder context"))?;
        context.set_width(info.width);
        context.set_height(info.height);
        context.set_format(Pixel::YUV420P);
        context.set_time_base(rate.invert());
        context.set_frame_rate(Some(rate));
        if global_header {
            context.set_flags(ffmpeg::codec::Flags::GLOBAL_HEADER);
        }
        let encoder = context
            .open_as(codec)
            .map_err(encode_err("open encoder"))?;
        {
            let mut stream = output.add_stream(codec).map_err(encode_err("add stream"))?;
            stream.set_parameters(&encoder);
        }
        output.write_header().map_err(encode_err("write header"))?;
        let stream_time_base = output
            .stream(0)
            .map(|s| s.time_base())
            .ok_or_else(|| Error::Encoding("output stream vanished".into()))?;

        let scaler = scaling::Context::get(
            Pixel::RGB24,
            info.width,
            info.height,
            Pixel::YUV420P,
            info.width,
            info.height,
            scaling::Flags::BILINEAR,
        )
        .map_err(encode_err("create scaler"))?;

        Ok(Self {
            tag: tag.to_string(),
            output,
            encoder,
            scaler,
            stream_time_base,
            encoder_time_base: rate.invert(),
            info: *info,
            next_pts: 0,
            header_written: true,
            file,
        })
    }

    fn drain(&mut self) -> Result<()> {
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(self.encoder_time_base, self.stream_time_base);
            packet
                .write_interleaved(&mut self.output)
                .map_err(encode_err("write packet"))?;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegEncoder {
    fn codec(&self) -> &str {
        &self.tag
    }

    fn is_open(&self) -> bool {
        self.header_written && self.file.path().exists()
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
        let mut rgb = ffmpeg::frame::Video::new(Pixel::RGB24, frame.width(), frame.height());
        let row_bytes = frame.width() as usize * 3;
        let stride = rgb.stride(0);
        let data = rgb.data_mut(0);
        for (row, src) in frame.as_raw().chunks_exact(row_bytes).enumerate() {
            data[row * stride..row * stride + row_bytes].copy_from_slice(src);
        }

        let mut yuv = ffmpeg::frame::Video::empty();
        self.scaler
            .run(&rgb, &mut yuv)
            .map_err(encode_err("convert frame to YUV"))?;
        yuv.set_pts(Some(self.next_pts));
        self.next_pts += 1;
        self.encoder
            .send_frame(&yuv)
            .map_err(encode_err("send frame"))?;
        self.drain()
    }

    fn finish(mut self: Box<Self>) -> Result<Vec<u8>> {
        self.encoder.send_eof().map_err(encode_err("flush encoder"))?;
        self.drain()?;
        self.output
            .write_trailer()
            .map_err(encode_err("write trailer"))?;
        let bytes = std::fs::read(self.file.path())?;
        log::debug!("ffmpeg '{}' output: {} frames, {} bytes", self.tag, self.next_pts, bytes.len());
        Ok(bytes)
    }
}
