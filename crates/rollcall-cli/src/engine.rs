//! Runs an attendance session on a dedicated OS thread.
//!
//! ONNX inference and V4L2 dequeue both block, so the session loop lives
//! off the async runtime. The caller gets a handle that can request a stop
//! and await the final summary.

use rollcall_core::{
    AttendanceLog, AttendanceSession, FaceRecognizer, FrameSource, Gallery, GrayFrame,
    LandmarkModel, SessionConfig, SessionError, SessionEvent, SessionSummary, UltraFaceDetector,
};
use rollcall_hw::{Camera, CameraError, FrameStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Models and gallery for one session, loaded before the camera opens.
pub struct SessionInputs {
    pub detector: UltraFaceDetector,
    pub landmarks: LandmarkModel,
    pub recognizer: FaceRecognizer,
    pub gallery: Gallery,
    pub log: AttendanceLog,
    pub config: SessionConfig,
    pub warmup_frames: usize,
}

/// Handle to a running session.
pub struct EngineHandle {
    stop: Arc<AtomicBool>,
    done: oneshot::Receiver<Result<SessionSummary, EngineError>>,
}

impl EngineHandle {
    /// Ask the session to finish after the current frame.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Wait for the session thread to finish.
    pub async fn finished(&mut self) -> Result<SessionSummary, EngineError> {
        (&mut self.done).await.map_err(|_| EngineError::ChannelClosed)?
    }
}

struct CameraSource<'a> {
    stream: FrameStream<'a>,
}

impl FrameSource for CameraSource<'_> {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<GrayFrame>, CameraError> {
        let frame = self.stream.next_frame()?;
        Ok(Some(GrayFrame {
            data: frame.data,
            width: frame.width,
            height: frame.height,
        }))
    }
}

/// Spawn the session on its own thread. `on_event` runs on that thread for
/// every session event.
pub fn spawn_session<F>(
    camera: Camera,
    inputs: SessionInputs,
    on_event: F,
) -> Result<EngineHandle, EngineError>
where
    F: FnMut(&SessionEvent) + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel();

    let thread_stop = Arc::clone(&stop);
    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            let result = run_session(&camera, inputs, &thread_stop, on_event);
            if let Err(e) = &result {
                tracing::error!(error = %e, "session aborted");
            }
            let _ = done_tx.send(result);
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { stop, done: done_rx })
}

fn run_session<F>(
    camera: &Camera,
    inputs: SessionInputs,
    stop: &AtomicBool,
    on_event: F,
) -> Result<SessionSummary, EngineError>
where
    F: FnMut(&SessionEvent),
{
    let mut stream = camera.stream()?;
    stream.discard(inputs.warmup_frames)?;

    let mut session = AttendanceSession::new(
        inputs.config,
        inputs.detector,
        inputs.landmarks,
        inputs.recognizer,
        inputs.log,
        inputs.gallery,
    );
    let mut source = CameraSource { stream };
    Ok(session.run(&mut source, stop, on_event)?)
}
