//! ffmpeg-backed decode handle
//!
//! Spawns `ffmpeg -i <url> -f image2pipe -vcodec mjpeg -` and splits the
//! resulting byte stream into individual JPEG frames. Works for RTSP and
//! HTTP/MJPEG sources alike; RTSP gets `-rtsp_transport tcp` for
//! reliability. The child is killed when the handle is dropped so a
//! reconnect never leaks a decoder process.

use super::{Decoder, DecoderFactory, Frame};
use crate::error::{Error, Result};
use crate::models::FrameSize;
use bytes::Bytes;
use chrono::Utc;
use std::io::{Cursor, Read};
use std::process::{Child, ChildStdout, Command, Stdio};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];
/// JPEG end-of-image marker
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Refuse to buffer more than this without finding a complete frame;
/// anything beyond it means the stream is not MJPEG or is corrupt.
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 32 * 1024;

/// Read frame dimensions from a JPEG header without decoding the image.
pub fn jpeg_dimensions(jpeg: &[u8]) -> Result<FrameSize> {
    let (width, height) = image::ImageReader::new(Cursor::new(jpeg))
        .with_guessed_format()
        .map_err(|e| Error::Capture(format!("jpeg header read failed: {}", e)))?
        .into_dimensions()
        .map_err(|e| Error::Capture(format!("jpeg dimensions unavailable: {}", e)))?;
    Ok(FrameSize::new(width, height))
}

/// Factory spawning one ffmpeg child per decode handle
#[derive(Debug, Clone, Default)]
pub struct FfmpegDecoderFactory;

impl DecoderFactory for FfmpegDecoderFactory {
    type Handle = FfmpegDecoder;

    fn open(&self, url: &str) -> Result<Self::Handle> {
        FfmpegDecoder::spawn(url)
    }
}

/// One ffmpeg child process decoding the stream into an MJPEG pipe
pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
}

impl FfmpegDecoder {
    fn spawn(url: &str) -> Result<Self> {
        let mut cmd = Command::new("ffmpeg");
        if url.starts_with("rtsp://") || url.starts_with("rtsps://") {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.args([
            "-i",
            url,
            "-f",
            "image2pipe",
            "-vcodec",
            "mjpeg",
            "-loglevel",
            "error",
            "-",
        ]);

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Capture(format!("ffmpeg spawn failed: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Capture("ffmpeg stdout unavailable".into()))?;

        tracing::debug!(url = %url, pid = child.id(), "ffmpeg decoder spawned");

        Ok(Self {
            child,
            stdout,
            buf: Vec::with_capacity(READ_CHUNK),
        })
    }

    /// Pull one complete SOI..EOI frame out of the buffer, if present.
    /// Bytes before the SOI (partial frame from a mid-stream attach) are
    /// discarded.
    fn take_frame(&mut self) -> Option<Vec<u8>> {
        let soi = find(&self.buf, &SOI)?;
        let eoi = find(&self.buf[soi..], &EOI)? + soi;
        let jpeg = self.buf[soi..eoi + 2].to_vec();
        self.buf.drain(..eoi + 2);
        Some(jpeg)
    }
}

impl Decoder for FfmpegDecoder {
    fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some(jpeg) = self.take_frame() {
                let size = jpeg_dimensions(&jpeg)?;
                return Ok(Frame {
                    jpeg: Bytes::from(jpeg),
                    size,
                    captured_at: Utc::now(),
                });
            }

            if self.buf.len() > MAX_FRAME_BYTES {
                return Err(Error::Capture(format!(
                    "no frame boundary within {} bytes",
                    MAX_FRAME_BYTES
                )));
            }

            let mut chunk = [0u8; READ_CHUNK];
            let n = self.stdout.read(&mut chunk)?;
            if n == 0 {
                return Err(Error::Capture("decoder stream ended".into()));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        // Make sure a reconnect never leaves a decoder child behind
        let _ = self.child.kill();
        let _ = self.child.wait();
        tracing::debug!(pid = self.child.id(), "ffmpeg decoder released");
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use image::RgbImage;

    fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::new(width, height);
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 80)
            .encode_image(&img)
            .unwrap();
        out
    }

    #[test]
    fn test_jpeg_dimensions() {
        let jpeg = sample_jpeg(320, 240);
        assert_eq!(jpeg_dimensions(&jpeg).unwrap(), FrameSize::new(320, 240));
    }

    #[test]
    fn test_jpeg_dimensions_rejects_garbage() {
        assert!(jpeg_dimensions(&[0x00, 0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_find_marker() {
        let data = [0x00, 0xFF, 0xD8, 0x10, 0xFF, 0xD9];
        assert_eq!(find(&data, &SOI), Some(1));
        assert_eq!(find(&data, &EOI), Some(4));
        assert_eq!(find(&data[..3], &EOI), None);
    }
}
