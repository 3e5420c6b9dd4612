//! FrameFanout - Frame Distribution and Recording Lifecycle
//!
//! ## Responsibilities
//!
//! - Forward every ingested frame to the live-stream hub
//! - Own the recording session lifecycle (open / append / rotate / close)
//! - Feed telemetry counters
//!
//! Driven synchronously by the ingestion thread: `on_frame` is the single
//! entry point, and the recording session is touched by no other task. The
//! externally visible surface is the shared `recording_enabled` toggle.

mod recorder;

pub use recorder::{
    FfmpegRecordingBackend, FfmpegRecordingWriter, RecordingBackend, RecordingWriter,
};

use crate::capture_source::Frame;
use crate::frame_hub::FrameHub;
use crate::models::FrameSize;
use crate::telemetry::TelemetryService;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One open recording. The frame size is fixed at creation: a file never
/// mixes resolutions, the fan-out rotates to a new session instead.
struct RecordingSession<W> {
    writer: W,
    frame_size: FrameSize,
    started_at: DateTime<Utc>,
    path: PathBuf,
    frames_written: u64,
}

/// FrameFanout instance
pub struct FrameFanout<B: RecordingBackend> {
    camera_id: String,
    backend: B,
    recordings_dir: PathBuf,
    recording_enabled: Arc<AtomicBool>,
    session: Option<RecordingSession<B::Writer>>,
    hub: Arc<FrameHub>,
    telemetry: Arc<TelemetryService>,
}

impl<B: RecordingBackend> FrameFanout<B> {
    /// Create new FrameFanout
    pub fn new(
        camera_id: String,
        backend: B,
        recordings_dir: PathBuf,
        recording_enabled: Arc<AtomicBool>,
        hub: Arc<FrameHub>,
        telemetry: Arc<TelemetryService>,
    ) -> Self {
        Self {
            camera_id,
            backend,
            recordings_dir,
            recording_enabled,
            session: None,
            hub,
            telemetry,
        }
    }

    /// Handle one ingested frame.
    ///
    /// Ordering matters: a size change always closes the current session
    /// first, so a frame can never be appended to a file opened for a
    /// different size.
    pub fn on_frame(&mut self, frame: Arc<Frame>, size_changed: bool) {
        if size_changed && self.session.is_some() {
            self.close_session("frame size changed");
        }

        let enabled = self.recording_enabled.load(Ordering::Relaxed);
        match (enabled, self.session.is_some()) {
            (true, false) => self.open_session(frame.size),
            (false, true) => self.close_session("recording disabled"),
            _ => {}
        }

        let mut write_failed = false;
        if let Some(session) = self.session.as_mut() {
            debug_assert_eq!(session.frame_size, frame.size);
            match session.writer.write_frame(&frame.jpeg) {
                Ok(()) => session.frames_written += 1,
                Err(e) => {
                    tracing::error!(
                        camera_id = %self.camera_id,
                        path = %session.path.display(),
                        error = %e,
                        "Recording write failed, disabling recording"
                    );
                    write_failed = true;
                }
            }
        }
        if write_failed {
            self.close_session("write failure");
            self.recording_enabled.store(false, Ordering::Relaxed);
            self.telemetry.set_recording_failed(true);
        }

        self.telemetry.observe_frame(frame.jpeg.len(), frame.size);
        self.hub.publish(frame);
    }

    /// Close any open session (flush + release). Called on shutdown.
    pub fn close(&mut self) {
        if self.session.is_some() {
            self.close_session("shutdown");
        }
    }

    /// Whether a recording session is currently open
    pub fn session_open(&self) -> bool {
        self.session.is_some()
    }

    fn open_session(&mut self, size: FrameSize) {
        // Second-granular names: two sessions started within the same
        // second collide, and the later open overwrites the file. Callers
        // needing uniqueness must provide their own recordings_dir layout.
        let path = self
            .recordings_dir
            .join(format!("{}_{}.avi", self.camera_id, Utc::now().timestamp()));

        match self.backend.open(&path, size) {
            Ok(writer) => {
                tracing::info!(
                    camera_id = %self.camera_id,
                    path = %path.display(),
                    size = %size,
                    "Recording session started"
                );
                self.telemetry.set_recording_failed(false);
                self.session = Some(RecordingSession {
                    writer,
                    frame_size: size,
                    started_at: Utc::now(),
                    path,
                    frames_written: 0,
                });
            }
            Err(e) => {
                // Best-effort: one failed open disables recording instead
                // of retrying on every frame.
                tracing::error!(
                    camera_id = %self.camera_id,
                    path = %path.display(),
                    error = %e,
                    "Recording open failed, disabling recording"
                );
                self.recording_enabled.store(false, Ordering::Relaxed);
                self.telemetry.set_recording_failed(true);
            }
        }
    }

    fn close_session(&mut self, reason: &str) {
        if let Some(mut session) = self.session.take() {
            let duration_ms = (Utc::now() - session.started_at).num_milliseconds();
            if let Err(e) = session.writer.finish() {
                tracing::error!(
                    camera_id = %self.camera_id,
                    path = %session.path.display(),
                    error = %e,
                    "Recording finalize failed"
                );
            }
            tracing::info!(
                camera_id = %self.camera_id,
                path = %session.path.display(),
                frames = session.frames_written,
                duration_ms = duration_ms,
                reason = reason,
                "Recording session closed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use bytes::Bytes;
    use std::path::Path;
    use std::sync::Mutex;

    /// In-memory recording backend capturing session history
    #[derive(Clone, Default)]
    struct FakeBackend {
        sessions: Arc<Mutex<Vec<FakeSession>>>,
        fail_open: Arc<AtomicBool>,
        fail_write: Arc<AtomicBool>,
    }

    #[derive(Clone)]
    struct FakeSession {
        size: FrameSize,
        frames: usize,
        finished: bool,
    }

    struct FakeWriter {
        sessions: Arc<Mutex<Vec<FakeSession>>>,
        index: usize,
        fail_write: Arc<AtomicBool>,
    }

    impl RecordingBackend for FakeBackend {
        type Writer = FakeWriter;

        fn open(&self, _path: &Path, size: FrameSize) -> Result<Self::Writer> {
            if self.fail_open.load(Ordering::Relaxed) {
                return Err(Error::Recording("disk full".into()));
            }
            let mut sessions = self.sessions.lock().unwrap();
            sessions.push(FakeSession {
                size,
                frames: 0,
                finished: false,
            });
            Ok(FakeWriter {
                sessions: self.sessions.clone(),
                index: sessions.len() - 1,
                fail_write: self.fail_write.clone(),
            })
        }
    }

    impl RecordingWriter for FakeWriter {
        fn write_frame(&mut self, _jpeg: &[u8]) -> Result<()> {
            if self.fail_write.load(Ordering::Relaxed) {
                return Err(Error::Recording("io error".into()));
            }
            self.sessions.lock().unwrap()[self.index].frames += 1;
            Ok(())
        }

        fn finish(&mut self) -> Result<()> {
            self.sessions.lock().unwrap()[self.index].finished = true;
            Ok(())
        }
    }

    fn frame(size: FrameSize) -> Arc<Frame> {
        Arc::new(Frame {
            jpeg: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
            size,
            captured_at: Utc::now(),
        })
    }

    fn fanout(backend: FakeBackend, enabled: bool) -> (FrameFanout<FakeBackend>, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(enabled));
        let fanout = FrameFanout::new(
            "cam1".into(),
            backend,
            PathBuf::from("/tmp/recordings"),
            flag.clone(),
            Arc::new(FrameHub::new()),
            Arc::new(TelemetryService::new("test://cam".into())),
        );
        (fanout, flag)
    }

    #[test]
    fn test_size_change_rotates_sessions() {
        let backend = FakeBackend::default();
        let sessions = backend.sessions.clone();
        let (mut fanout, _flag) = fanout(backend, true);

        let a = FrameSize::new(640, 480);
        let b = FrameSize::new(1280, 720);
        let sequence = [
            (a, false),
            (a, false),
            (b, true),
            (b, false),
            (a, true),
        ];
        for (size, changed) in sequence {
            fanout.on_frame(frame(size), changed);
        }
        fanout.close();

        let sessions = sessions.lock().unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].size, a);
        assert_eq!(sessions[1].size, b);
        assert_eq!(sessions[2].size, a);
        assert_eq!(
            sessions.iter().map(|s| s.frames).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
        assert!(sessions.iter().all(|s| s.finished));
    }

    #[test]
    fn test_disable_closes_session() {
        let backend = FakeBackend::default();
        let sessions = backend.sessions.clone();
        let (mut fanout, flag) = fanout(backend, true);

        let size = FrameSize::new(640, 480);
        fanout.on_frame(frame(size), false);
        assert!(fanout.session_open());

        flag.store(false, Ordering::Relaxed);
        fanout.on_frame(frame(size), false);
        assert!(!fanout.session_open());

        let sessions = sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].finished);
        // the frame after disable was not appended anywhere
        assert_eq!(sessions[0].frames, 1);
    }

    #[test]
    fn test_open_failure_disables_recording() {
        let backend = FakeBackend::default();
        backend.fail_open.store(true, Ordering::Relaxed);
        let (mut fanout, flag) = fanout(backend, true);

        fanout.on_frame(frame(FrameSize::new(640, 480)), false);

        assert!(!fanout.session_open());
        assert!(!flag.load(Ordering::Relaxed));
        assert!(fanout.telemetry.recording_failed());
    }

    #[test]
    fn test_write_failure_closes_and_disables() {
        let backend = FakeBackend::default();
        let sessions = backend.sessions.clone();
        let fail_write = backend.fail_write.clone();
        let (mut fanout, flag) = fanout(backend, true);

        let size = FrameSize::new(640, 480);
        fanout.on_frame(frame(size), false);
        fail_write.store(true, Ordering::Relaxed);
        fanout.on_frame(frame(size), false);

        assert!(!fanout.session_open());
        assert!(!flag.load(Ordering::Relaxed));
        assert!(sessions.lock().unwrap()[0].finished);
    }

    #[test]
    fn test_frames_always_reach_the_hub() {
        let backend = FakeBackend::default();
        let (mut fanout, _flag) = fanout(backend, false);
        let hub = fanout.hub.clone();

        assert!(hub.latest().is_none());
        fanout.on_frame(frame(FrameSize::new(640, 480)), false);
        assert!(hub.latest().is_some());
        assert!(!fanout.session_open());
    }
}
