//! ffmpeg-backed recording writer
//!
//! Frames arrive already JPEG-encoded, so the recorder muxes them into an
//! AVI container with `-c copy` (no re-encode): the file grows by appended
//! frames at the session's fixed size until the writer is finished.

use crate::error::{Error, Result};
use crate::models::FrameSize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

/// Writer for one recording session
pub trait RecordingWriter: Send {
    /// Append one JPEG frame
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<()>;

    /// Flush and release the file. Must be called before the writer is
    /// dropped for the container index to be finalized.
    fn finish(&mut self) -> Result<()>;
}

/// Opens recording writers
pub trait RecordingBackend: Send + Sync {
    type Writer: RecordingWriter;

    fn open(&self, path: &Path, size: FrameSize) -> Result<Self::Writer>;
}

/// Nominal playback rate stamped on recordings; matches the reference
/// writer settings, not the actual ingest rate.
const RECORDING_FRAMERATE: u32 = 20;

/// ffmpeg mux backend
#[derive(Debug, Clone, Default)]
pub struct FfmpegRecordingBackend;

impl RecordingBackend for FfmpegRecordingBackend {
    type Writer = FfmpegRecordingWriter;

    fn open(&self, path: &Path, size: FrameSize) -> Result<Self::Writer> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::Recording(format!("non-utf8 recording path: {:?}", path)))?;

        let framerate = RECORDING_FRAMERATE.to_string();
        let mut child = Command::new("ffmpeg")
            .args([
                "-f",
                "image2pipe",
                "-vcodec",
                "mjpeg",
                "-framerate",
                framerate.as_str(),
                "-i",
                "-",
                "-c",
                "copy",
                "-loglevel",
                "error",
                "-y",
                path_str,
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Recording(format!("ffmpeg mux spawn failed: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Recording("ffmpeg mux stdin unavailable".into()))?;

        tracing::debug!(
            path = %path.display(),
            size = %size,
            pid = child.id(),
            "Recording writer opened"
        );

        Ok(FfmpegRecordingWriter {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
        })
    }
}

/// One ffmpeg mux child writing a single file
pub struct FfmpegRecordingWriter {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
}

impl RecordingWriter for FfmpegRecordingWriter {
    fn write_frame(&mut self, jpeg: &[u8]) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Recording("writer already finished".into()))?;
        stdin
            .write_all(jpeg)
            .map_err(|e| Error::Recording(format!("frame write failed: {}", e)))
    }

    fn finish(&mut self) -> Result<()> {
        // Closing stdin signals end-of-stream; ffmpeg then finalizes the
        // container index and exits.
        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.flush();
            drop(stdin);
        }
        let status = self
            .child
            .wait()
            .map_err(|e| Error::Recording(format!("ffmpeg mux wait failed: {}", e)))?;
        if !status.success() {
            return Err(Error::Recording(format!(
                "ffmpeg mux exited with {} for {}",
                status,
                self.path.display()
            )));
        }
        Ok(())
    }
}

impl Drop for FfmpegRecordingWriter {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            // Not finished cleanly; close the pipe and reap the child so no
            // zombie accumulates. The file may be missing its index.
            tracing::warn!(path = %self.path.display(), "Recording writer dropped unfinished");
            self.stdin.take();
            let _ = self.child.wait();
        }
    }
}
