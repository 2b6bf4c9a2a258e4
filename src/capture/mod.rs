//! Single-frame acquisition from live video sources.
//!
//! A capture opens the stream, reads until the first decoded frame (bounded
//! by `max_attempts` to absorb RTSP start-up latency), releases the stream and
//! encodes the frame as JPEG. Decoding blocks, so [`FrameAcquirer`] runs every
//! capture on the blocking pool and limits how many run at once.
//!
//! Backends:
//! - `stub://` synthetic streams (always available, used by tests)
//! - `rtsp://` / `rtsps://` through GStreamer (feature: rtsp-gstreamer)

#[cfg(feature = "rtsp-gstreamer")]
mod gstreamer;
pub mod jpeg;
pub mod stub;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::config::CaptureSettings;
use crate::resolve::redact_uri;

pub use stub::StubBackend;

/// Decoded RGB8 frame, row-major with no padding.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("unable to open stream: {0}")]
    Open(String),
    #[error("no frame decoded after {attempts} attempts")]
    NoFrame { attempts: u32 },
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("capture worker failed: {0}")]
    Worker(String),
}

/// An open stream. `release` is called exactly once by the owning guard.
pub trait VideoStream: Send {
    /// Read the next frame. `Ok(None)` means the stream produced nothing yet.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self);
}

pub trait CaptureBackend: Send + Sync {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoStream>>;
}

struct StreamGuard {
    stream: Box<dyn VideoStream>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.stream.release();
    }
}

/// Open `uri`, take the first decoded frame within `max_attempts` reads and
/// return it JPEG-encoded. Blocks the calling thread.
pub fn grab_frame(
    backend: &dyn CaptureBackend,
    uri: &str,
    max_attempts: u32,
    jpeg_quality: u8,
) -> Result<Vec<u8>, CaptureError> {
    let stream = backend
        .open(uri)
        .map_err(|e| CaptureError::Open(format!("{:#}", e)))?;
    let mut guard = StreamGuard { stream };

    let mut accepted = None;
    for attempt in 1..=max_attempts {
        match guard.stream.read_frame() {
            Ok(Some(frame)) => {
                accepted = Some(frame);
                break;
            }
            Ok(None) => log::debug!(
                "no frame from {} on attempt {}/{}",
                redact_uri(uri),
                attempt,
                max_attempts
            ),
            Err(err) => log::debug!(
                "frame read from {} failed on attempt {}/{}: {:#}",
                redact_uri(uri),
                attempt,
                max_attempts,
                err
            ),
        }
    }
    drop(guard);

    let frame = accepted.ok_or(CaptureError::NoFrame {
        attempts: max_attempts,
    })?;
    jpeg::encode(&frame, jpeg_quality)
}

/// Routes URIs to the backend that understands their scheme.
pub struct DefaultCaptureBackend {
    stub: StubBackend,
    #[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
    read_timeout: Duration,
}

impl DefaultCaptureBackend {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            stub: StubBackend,
            read_timeout: settings.read_timeout,
        }
    }
}

impl CaptureBackend for DefaultCaptureBackend {
    fn open(&self, uri: &str) -> Result<Box<dyn VideoStream>> {
        if uri.starts_with("stub://") {
            return self.stub.open(uri);
        }
        if !uri.starts_with("rtsp://") && !uri.starts_with("rtsps://") {
            anyhow::bail!("unsupported stream scheme in {}", redact_uri(uri));
        }
        #[cfg(feature = "rtsp-gstreamer")]
        {
            gstreamer::open(uri, self.read_timeout)
        }
        #[cfg(not(feature = "rtsp-gstreamer"))]
        {
            anyhow::bail!("RTSP capture requires the rtsp-gstreamer feature")
        }
    }
}

/// Runs captures off the request-handling thread with a fixed number of slots.
#[derive(Clone)]
pub struct FrameAcquirer {
    backend: Arc<dyn CaptureBackend>,
    slots: Arc<Semaphore>,
    max_attempts: u32,
    jpeg_quality: u8,
}

impl FrameAcquirer {
    pub fn new(backend: Arc<dyn CaptureBackend>, settings: &CaptureSettings) -> Self {
        Self {
            backend,
            slots: Arc::new(Semaphore::new(settings.workers.max(1))),
            max_attempts: settings.max_attempts.max(1),
            jpeg_quality: settings.jpeg_quality,
        }
    }

    /// Capture one JPEG frame from `uri`.
    ///
    /// The slot permit moves into the worker, so a capture abandoned by its
    /// caller keeps its slot until the worker has released the stream.
    pub async fn acquire(&self, uri: String) -> Result<Vec<u8>, CaptureError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| CaptureError::Worker("capture pool closed".to_string()))?;
        let backend = self.backend.clone();
        let max_attempts = self.max_attempts;
        let jpeg_quality = self.jpeg_quality;
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            grab_frame(backend.as_ref(), &uri, max_attempts, jpeg_quality)
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    enum Read {
        Frame,
        Empty,
        Fail,
        BadGeometry,
    }

    struct ScriptedStream {
        reads: VecDeque<Read>,
        reads_done: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl VideoStream for ScriptedStream {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            self.reads_done.fetch_add(1, Ordering::SeqCst);
            match self.reads.pop_front() {
                Some(Read::Frame) => Ok(Some(Frame {
                    pixels: vec![128; 8 * 8 * 3],
                    width: 8,
                    height: 8,
                })),
                Some(Read::BadGeometry) => Ok(Some(Frame {
                    pixels: vec![0; 10],
                    width: 8,
                    height: 8,
                })),
                Some(Read::Fail) => Err(anyhow::anyhow!("decoder hiccup")),
                Some(Read::Empty) | None => Ok(None),
            }
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedBackend {
        refuse: bool,
        script: Mutex<Option<Vec<Read>>>,
        reads_done: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Read>) -> Self {
            Self {
                refuse: false,
                script: Mutex::new(Some(script)),
                reads_done: Arc::new(AtomicUsize::new(0)),
                releases: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn refusing() -> Self {
            Self {
                refuse: true,
                ..Self::new(Vec::new())
            }
        }
    }

    impl CaptureBackend for ScriptedBackend {
        fn open(&self, _uri: &str) -> Result<Box<dyn VideoStream>> {
            if self.refuse {
                anyhow::bail!("connection refused");
            }
            let script = self.script.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(ScriptedStream {
                reads: script.into(),
                reads_done: self.reads_done.clone(),
                releases: self.releases.clone(),
            }))
        }
    }

    #[test]
    fn first_decoded_frame_after_warmup_is_encoded() {
        let backend = ScriptedBackend::new(vec![Read::Empty, Read::Fail, Read::Frame, Read::Frame]);
        let jpeg = grab_frame(&backend, "rtsp://cam/stream", 5, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(backend.reads_done.load(Ordering::SeqCst), 3);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exhausted_attempts_report_no_frame_and_release_once() {
        let backend = ScriptedBackend::new(Vec::new());
        let err = grab_frame(&backend, "rtsp://cam/stream", 5, 80).unwrap_err();
        assert!(matches!(err, CaptureError::NoFrame { attempts: 5 }));
        assert_eq!(backend.reads_done.load(Ordering::SeqCst), 5);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn open_failure_is_distinct() {
        let backend = ScriptedBackend::refusing();
        let err = grab_frame(&backend, "rtsp://cam/stream", 5, 80).unwrap_err();
        assert!(matches!(err, CaptureError::Open(_)));
        assert_eq!(backend.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn encode_failure_still_releases_once() {
        let backend = ScriptedBackend::new(vec![Read::BadGeometry]);
        let err = grab_frame(&backend, "rtsp://cam/stream", 5, 80).unwrap_err();
        assert!(matches!(err, CaptureError::Encode(_)));
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn default_backend_rejects_unknown_schemes() {
        let backend = DefaultCaptureBackend::new(&CaptureSettings::default());
        assert!(backend.open("http://cam/snapshot.jpg").is_err());
        assert!(backend.open("stub://lobby").is_ok());
    }

    #[tokio::test]
    async fn acquirer_runs_capture_on_worker() {
        let backend = Arc::new(ScriptedBackend::new(vec![Read::Frame]));
        let acquirer = FrameAcquirer::new(backend.clone(), &CaptureSettings::default());
        let jpeg = acquirer.acquire("rtsp://cam/stream".to_string()).await.unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquirer_surfaces_no_frame() {
        let backend = Arc::new(ScriptedBackend::new(Vec::new()));
        let settings = CaptureSettings {
            max_attempts: 3,
            ..CaptureSettings::default()
        };
        let acquirer = FrameAcquirer::new(backend.clone(), &settings);
        let err = acquirer
            .acquire("rtsp://cam/stream".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoFrame { attempts: 3 }));
        assert_eq!(backend.reads_done.load(Ordering::SeqCst), 3);
        assert_eq!(backend.releases.load(Ordering::SeqCst), 1);
    }
}
