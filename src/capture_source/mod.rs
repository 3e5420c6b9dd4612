//! CaptureSource - Resilient Stream Ingestion
//!
//! ## Responsibilities
//!
//! - Own a single decode handle bound to the stream URL
//! - Pull API: next decoded frame or "no frame available"
//! - Detect read failures and frame-size changes mid-stream
//! - Transparent reconnect with fixed backoff (never gives up)
//!
//! The decode handle itself is abstracted behind [`Decoder`] /
//! [`DecoderFactory`]; production uses the ffmpeg-based implementation in
//! [`decoder`].

mod decoder;

pub use decoder::{jpeg_dimensions, FfmpegDecoder, FfmpegDecoderFactory};

use crate::error::{Error, Result};
use crate::models::FrameSize;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One decoded frame. Frames travel through the pipeline JPEG-encoded,
/// which is the form every consumer (live stream, recorder mux, scorer)
/// ultimately needs.
#[derive(Debug, Clone)]
pub struct Frame {
    /// JPEG bytes
    pub jpeg: Bytes,
    /// Decoded dimensions
    pub size: FrameSize,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

/// A pulled frame plus whether its size differs from the previous frame
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub frame: Frame,
    pub size_changed: bool,
}

/// Connection state of a stream session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Live,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Live => "live",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

/// One logical camera feed. Lives for the whole process; only the decode
/// handle underneath it is re-created across reconnects.
#[derive(Debug, Clone)]
pub struct StreamSession {
    source_url: String,
    current_frame_size: Option<FrameSize>,
    connection_state: ConnectionState,
}

impl StreamSession {
    fn new(source_url: String) -> Self {
        Self {
            source_url,
            current_frame_size: None,
            connection_state: ConnectionState::Connecting,
        }
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn current_frame_size(&self) -> Option<FrameSize> {
        self.current_frame_size
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }
}

/// Blocking decode handle over one stream connection
pub trait Decoder: Send {
    /// Read the next frame. Any error means the handle is dead and must be
    /// released and re-opened by the caller.
    fn read_frame(&mut self) -> Result<Frame>;
}

/// Opens decode handles against a stream URL
pub trait DecoderFactory: Send + Sync {
    type Handle: Decoder;

    fn open(&self, url: &str) -> Result<Self::Handle>;
}

/// How often the reconnect backoff sleep polls the shutdown flag
const BACKOFF_POLL: Duration = Duration::from_millis(10);

/// CaptureSource instance. Owned and driven by a single ingestion thread;
/// all methods are blocking.
pub struct CaptureSource<F: DecoderFactory> {
    factory: F,
    session: StreamSession,
    handle: Option<F::Handle>,
    backoff: Duration,
}

impl<F: DecoderFactory> CaptureSource<F> {
    /// Open the initial decode handle.
    ///
    /// This is the only place a capture failure is fatal: a URL that cannot
    /// be opened at startup is a configuration error for the operator.
    pub fn connect(factory: F, url: &str, backoff: Duration) -> Result<Self> {
        let mut session = StreamSession::new(url.to_string());

        let handle = factory
            .open(url)
            .map_err(|e| Error::Capture(format!("initial open of {} failed: {}", url, e)))?;
        session.connection_state = ConnectionState::Live;

        tracing::info!(url = %url, "Capture source connected");

        Ok(Self {
            factory,
            session,
            handle: Some(handle),
            backoff,
        })
    }

    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Pull the next frame.
    ///
    /// Blocks through read failures and reconnect backoff; a failure is
    /// never surfaced upward, only retried. Returns `None` once `shutdown`
    /// is observed (checked before every open, read, and backoff slice).
    pub fn next_frame(&mut self, shutdown: &AtomicBool) -> Option<CapturedFrame> {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return None;
            }

            if self.handle.is_none() {
                match self.factory.open(&self.session.source_url) {
                    Ok(handle) => {
                        self.handle = Some(handle);
                        self.session.connection_state = ConnectionState::Live;
                        tracing::info!(
                            url = %self.session.source_url,
                            "Capture source reconnected"
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            url = %self.session.source_url,
                            error = %e,
                            backoff_ms = self.backoff.as_millis() as u64,
                            "Stream open failed, backing off"
                        );
                        if !self.sleep_backoff(shutdown) {
                            return None;
                        }
                        continue;
                    }
                }
            }

            let Some(handle) = self.handle.as_mut() else {
                continue;
            };
            match handle.read_frame() {
                Ok(frame) => {
                    let size_changed = match self.session.current_frame_size {
                        Some(prev) if prev != frame.size => {
                            tracing::info!(
                                url = %self.session.source_url,
                                prev = %prev,
                                next = %frame.size,
                                "Frame size changed mid-stream"
                            );
                            true
                        }
                        _ => false,
                    };
                    self.session.current_frame_size = Some(frame.size);
                    return Some(CapturedFrame {
                        frame,
                        size_changed,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        url = %self.session.source_url,
                        error = %e,
                        "Stream read failed, releasing handle"
                    );
                    self.handle = None;
                    self.session.connection_state = ConnectionState::Reconnecting;
                    if !self.sleep_backoff(shutdown) {
                        return None;
                    }
                }
            }
        }
    }

    /// Fixed backoff sleep, sliced so shutdown stays responsive.
    /// Returns false if shutdown was requested mid-sleep.
    fn sleep_backoff(&self, shutdown: &AtomicBool) -> bool {
        let mut remaining = self.backoff;
        while !remaining.is_zero() {
            if shutdown.load(Ordering::Relaxed) {
                return false;
            }
            let slice = remaining.min(BACKOFF_POLL);
            std::thread::sleep(slice);
            remaining -= slice;
        }
        !shutdown.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Instant;

    /// Script step for the fake decoder: either the next read fails, or it
    /// yields a frame of the given size.
    enum Step {
        Fail,
        Frame(FrameSize),
    }

    struct ScriptedFactory {
        script: Arc<Mutex<VecDeque<Step>>>,
        opens: Arc<Mutex<usize>>,
    }

    struct ScriptedDecoder {
        script: Arc<Mutex<VecDeque<Step>>>,
    }

    impl ScriptedFactory {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                script: Arc::new(Mutex::new(steps.into())),
                opens: Arc::new(Mutex::new(0)),
            }
        }
    }

    impl DecoderFactory for ScriptedFactory {
        type Handle = ScriptedDecoder;

        fn open(&self, _url: &str) -> Result<Self::Handle> {
            *self.opens.lock().unwrap() += 1;
            Ok(ScriptedDecoder {
                script: self.script.clone(),
            })
        }
    }

    impl Decoder for ScriptedDecoder {
        fn read_frame(&mut self) -> Result<Frame> {
            match self.script.lock().unwrap().pop_front() {
                Some(Step::Frame(size)) => Ok(Frame {
                    jpeg: Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9]),
                    size,
                    captured_at: Utc::now(),
                }),
                Some(Step::Fail) | None => Err(Error::Capture("scripted read failure".into())),
            }
        }
    }

    const BACKOFF: Duration = Duration::from_millis(40);

    #[test]
    fn test_recovers_after_n_read_failures() {
        let n = 3;
        let mut steps: Vec<Step> = (0..n).map(|_| Step::Fail).collect();
        steps.push(Step::Frame(FrameSize::new(640, 480)));
        let factory = ScriptedFactory::new(steps);
        let opens = factory.opens.clone();

        let mut source = CaptureSource::connect(factory, "test://cam", BACKOFF).unwrap();
        let shutdown = AtomicBool::new(false);

        let start = Instant::now();
        let captured = source.next_frame(&shutdown).expect("frame after recovery");
        let elapsed = start.elapsed();

        assert_eq!(captured.frame.size, FrameSize::new(640, 480));
        assert!(!captured.size_changed);
        assert_eq!(source.session().connection_state(), ConnectionState::Live);
        // initial open + one reopen per failure
        assert_eq!(*opens.lock().unwrap(), 1 + n);
        // elapsed should be roughly n backoff intervals
        assert!(elapsed >= BACKOFF * n as u32);
        assert!(elapsed < BACKOFF * (2 * n as u32 + 2));
    }

    #[test]
    fn test_size_change_is_flagged_once() {
        let factory = ScriptedFactory::new(vec![
            Step::Frame(FrameSize::new(640, 480)),
            Step::Frame(FrameSize::new(640, 480)),
            Step::Frame(FrameSize::new(1280, 720)),
            Step::Frame(FrameSize::new(1280, 720)),
        ]);
        let mut source = CaptureSource::connect(factory, "test://cam", BACKOFF).unwrap();
        let shutdown = AtomicBool::new(false);

        let flags: Vec<bool> = (0..4)
            .map(|_| source.next_frame(&shutdown).unwrap().size_changed)
            .collect();
        assert_eq!(flags, vec![false, false, true, false]);
        assert_eq!(
            source.session().current_frame_size(),
            Some(FrameSize::new(1280, 720))
        );
    }

    #[test]
    fn test_shutdown_interrupts_backoff() {
        let factory = ScriptedFactory::new(vec![]);
        let mut source =
            CaptureSource::connect(factory, "test://cam", Duration::from_secs(30)).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = shutdown.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Relaxed);
        });

        let start = Instant::now();
        // script is empty so every read fails into a 30 s backoff;
        // shutdown must cut it short
        assert!(source.next_frame(&shutdown).is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
        stopper.join().unwrap();
    }

    #[test]
    fn test_initial_open_failure_is_fatal() {
        struct FailingFactory;
        impl DecoderFactory for FailingFactory {
            type Handle = ScriptedDecoder;
            fn open(&self, _url: &str) -> Result<Self::Handle> {
                Err(Error::Capture("no route to camera".into()))
            }
        }

        let result = CaptureSource::connect(FailingFactory, "test://cam", BACKOFF);
        assert!(matches!(result, Err(Error::Capture(_))));
    }
}
