use crate::sampler::FrameSampler;
use crate::session::{self, SessionConfig, SessionError};
use facegate_core::{Aggregate, Detection, Detector};
use facegate_hw::{save_preview, CameraOpener};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("a capture session is already running")]
    Busy,
    #[error("camera capture is disabled")]
    CameraDisabled,
    #[error("face detector is not loaded")]
    DetectorUnavailable,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Session policy and preview handling for the engine thread.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub session: SessionConfig,
    pub warmup_frames: usize,
    /// Enrollment previews are rendered and written here when set.
    pub preview_dir: Option<PathBuf>,
}

/// Result of an enrollment capture.
#[derive(Debug)]
pub struct EnrollResult {
    pub aggregate: Aggregate,
    pub preview_path: Option<PathBuf>,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        user_id: String,
        reply: oneshot::Sender<Result<EnrollResult, EngineError>>,
    },
    Probe {
        reply: oneshot::Sender<Result<Detection, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    busy: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    detector_loaded: bool,
    camera_enabled: bool,
}

impl EngineHandle {
    /// Run an enrollment session: K accepted frames averaged into one descriptor.
    pub async fn enroll(&self, user_id: &str) -> Result<EnrollResult, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.submit(EngineRequest::Enroll {
            user_id: user_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Run a probe session: the first frame that passes the per-frame gate.
    pub async fn probe(&self) -> Result<Detection, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.submit(EngineRequest::Probe { reply })?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Abort the running session at its next frame. Returns false when idle.
    pub fn cancel(&self) -> bool {
        if !self.busy.load(Ordering::SeqCst) {
            return false;
        }
        self.cancel.store(true, Ordering::SeqCst);
        tracing::info!("capture session cancellation requested");
        true
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn detector_loaded(&self) -> bool {
        self.detector_loaded
    }

    pub fn camera_enabled(&self) -> bool {
        self.camera_enabled
    }

    /// Claim the engine and hand it the request. Never queues behind a
    /// running session.
    fn submit(&self, req: EngineRequest) -> Result<(), EngineError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EngineError::Busy);
        }
        self.cancel.store(false, Ordering::SeqCst);
        self.tx.try_send(req).map_err(|e| {
            self.busy.store(false, Ordering::SeqCst);
            match e {
                mpsc::error::TrySendError::Full(_) => EngineError::Busy,
                mpsc::error::TrySendError::Closed(_) => EngineError::ChannelClosed,
            }
        })
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the detector and the camera opener. The camera is opened
/// per session and released when the session ends. Either capability may be
/// absent; sessions then fail fast and the store-only routes keep working.
pub fn spawn_engine(
    detector: Option<Box<dyn Detector + Send>>,
    camera: Option<Box<dyn CameraOpener>>,
    settings: EngineSettings,
) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(1);
    let busy = Arc::new(AtomicBool::new(false));
    let cancel = Arc::new(AtomicBool::new(false));

    let handle = EngineHandle {
        tx,
        busy: busy.clone(),
        cancel: cancel.clone(),
        detector_loaded: detector.is_some(),
        camera_enabled: camera.is_some(),
    };

    let mut worker = Worker {
        detector,
        camera,
        settings,
        cancel,
    };

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let claim = Claim(&busy);
                match req {
                    EngineRequest::Enroll { user_id, reply } => {
                        let result = worker.enroll(&user_id, &|| reply.is_closed());
                        if let Err(e) = &result {
                            tracing::warn!(user_id = %user_id, error = %e, "enrollment session failed");
                        }
                        // Idle before the caller sees the result.
                        drop(claim);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Probe { reply } => {
                        let result = worker.probe(&|| reply.is_closed());
                        drop(claim);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(handle)
}

/// Marks the engine busy for one request; released on drop, including unwinding.
struct Claim<'a>(&'a AtomicBool);

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Worker {
    detector: Option<Box<dyn Detector + Send>>,
    camera: Option<Box<dyn CameraOpener>>,
    settings: EngineSettings,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    fn sampler(&mut self) -> Result<FrameSampler<'_>, EngineError> {
        let camera = self.camera.as_deref().ok_or(EngineError::CameraDisabled)?;
        let detector = self.detector.as_deref_mut().ok_or(EngineError::DetectorUnavailable)?;
        Ok(FrameSampler::new(camera, detector)
            .with_warmup(self.settings.warmup_frames)
            .with_overlay(self.settings.preview_dir.is_some()))
    }

    fn enroll(&mut self, user_id: &str, reply_dropped: &dyn Fn() -> bool) -> Result<EnrollResult, EngineError> {
        tracing::info!(user_id, "enrollment session starting");
        let cancel = self.cancel.clone();
        let config = self.settings.session.clone();
        let preview_dir = self.settings.preview_dir.clone();

        let mut sampler = self.sampler()?;
        let is_cancelled = || cancel.load(Ordering::SeqCst) || reply_dropped();
        let capture = session::run_enrollment(&mut sampler, &config, &is_cancelled)?;

        let preview_path = match (preview_dir, capture.preview) {
            (Some(dir), Some(frame)) => {
                let path = dir.join(format!("{}.png", uuid::Uuid::new_v4()));
                match save_preview(&frame, &path) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to write enrollment preview");
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(EnrollResult {
            aggregate: capture.aggregate,
            preview_path,
        })
    }

    fn probe(&mut self, reply_dropped: &dyn Fn() -> bool) -> Result<Detection, EngineError> {
        let cancel = self.cancel.clone();
        let config = self.settings.session.clone();
        let mut sampler = self.sampler()?;
        let is_cancelled = || cancel.load(Ordering::SeqCst) || reply_dropped();
        Ok(session::run_probe(&mut sampler, &config, &is_cancelled)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::testing::*;
    use facegate_core::GateConfig;
    use std::time::Duration;

    fn settings(required: usize, timeout: Duration) -> EngineSettings {
        EngineSettings {
            session: SessionConfig {
                gate: GateConfig {
                    required_samples: required,
                    ..GateConfig::default()
                },
                abort_on_face_lost: false,
                timeout,
            },
            warmup_frames: 2,
            preview_dir: None,
        }
    }

    async fn wait_idle(engine: &EngineHandle) {
        for _ in 0..200 {
            if !engine.is_busy() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("engine never went idle");
    }

    #[tokio::test]
    async fn test_enroll_and_probe() {
        let (camera, probe) = FakeCamera::new();
        let detector = ScriptedDetector::new([], Step::Face { value: 0.2, quality: 0.9 });
        let engine = spawn_engine(
            Some(Box::new(detector)),
            Some(Box::new(camera)),
            settings(5, Duration::from_secs(2)),
        )
        .unwrap();

        let result = engine.enroll("alice").await.unwrap();
        assert_eq!(result.aggregate.sample_count, 5);
        assert!(result.preview_path.is_none());

        let detection = engine.probe().await.unwrap();
        assert_eq!(detection.descriptor.as_slice()[0], 0.2);
        assert_eq!(probe.opened.load(Ordering::SeqCst), 2);
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_busy_then_cancel() {
        let (camera, probe) = FakeCamera::new();
        let detector = ScriptedDetector::new([], Step::NoFace);
        let engine = spawn_engine(
            Some(Box::new(detector)),
            Some(Box::new(camera)),
            settings(10, Duration::from_secs(10)),
        )
        .unwrap();

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enroll("alice").await })
        };
        while !probe.held.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(matches!(engine.enroll("bob").await, Err(EngineError::Busy)));
        assert!(matches!(engine.probe().await, Err(EngineError::Busy)));

        assert!(engine.cancel());
        let result = running.await.unwrap();
        assert!(matches!(
            result,
            Err(EngineError::Session(SessionError::Cancelled { collected: 0 }))
        ));
        assert!(!probe.held.load(Ordering::SeqCst));
        assert!(!engine.is_busy());
        assert!(!engine.cancel());
    }

    #[tokio::test]
    async fn test_back_to_back_sessions_are_accepted() {
        let (camera, probe) = FakeCamera::new();
        let detector = ScriptedDetector::new([], Step::Face { value: 0.2, quality: 0.9 });
        let engine = spawn_engine(
            Some(Box::new(detector)),
            Some(Box::new(camera)),
            settings(1, Duration::from_secs(2)),
        )
        .unwrap();

        for _ in 0..100 {
            engine.probe().await.unwrap();
            assert!(!engine.is_busy());
        }
        engine.enroll("alice").await.unwrap();
        engine.probe().await.unwrap();
        assert_eq!(probe.opened.load(Ordering::SeqCst), 102);
    }

    #[tokio::test]
    async fn test_dropped_caller_aborts_session() {
        let (camera, probe) = FakeCamera::new();
        let detector = ScriptedDetector::new([], Step::NoFace);
        let engine = spawn_engine(
            Some(Box::new(detector)),
            Some(Box::new(camera)),
            settings(10, Duration::from_secs(10)),
        )
        .unwrap();

        let running = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.enroll("alice").await })
        };
        while !probe.held.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        running.abort();

        wait_idle(&engine).await;
        assert!(!probe.held.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_capabilities() {
        let (camera, _) = FakeCamera::new();
        let engine = spawn_engine(None, Some(Box::new(camera)), settings(1, Duration::from_secs(1))).unwrap();
        assert!(!engine.detector_loaded());
        assert!(matches!(engine.enroll("alice").await, Err(EngineError::DetectorUnavailable)));

        let detector = ScriptedDetector::new([], Step::NoFace);
        let engine = spawn_engine(Some(Box::new(detector)), None, settings(1, Duration::from_secs(1))).unwrap();
        assert!(matches!(engine.probe().await, Err(EngineError::CameraDisabled)));
    }

    #[tokio::test]
    async fn test_preview_written() {
        let dir = tempfile::tempdir().unwrap();
        let (camera, _) = FakeCamera::new();
        let detector = ScriptedDetector::new([], Step::Face { value: 0.2, quality: 0.9 });
        let mut settings = settings(2, Duration::from_secs(2));
        settings.preview_dir = Some(dir.path().to_path_buf());
        let engine = spawn_engine(Some(Box::new(detector)), Some(Box::new(camera)), settings).unwrap();

        let result = engine.enroll("alice").await.unwrap();
        let path = result.preview_path.expect("preview saved");
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
    }
}
