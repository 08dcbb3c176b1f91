use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use pilot_policy::{Action, ActionPolicy, GameState, PolicyConfig};
use pilot_vision::detector::ModelLoadError;
use pilot_vision::Detector;

use crate::cancel::CancelToken;
use crate::status::LoopStatus;
use crate::{FrameSource, GestureSink, LoopConfig};

pub type SharedSource = Arc<Mutex<dyn FrameSource>>;
pub type SharedSink = Arc<Mutex<dyn GestureSink>>;

/// Builds a detector for one run from a model source string. Injected so the
/// controller never touches the filesystem or engine backend itself.
pub type DetectorFactory =
    Box<dyn Fn(&str) -> Result<Box<dyn Detector>, ModelLoadError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Drives the capture → detect → decide → dispatch pipeline on one dedicated
/// worker at a bounded frame rate. Constructed once by the owning process and
/// handed to whoever needs to control or query it; there is no global
/// instance.
pub struct FrameLoop {
    cfg: LoopConfig,
    policy_cfg: PolicyConfig,
    source: SharedSource,
    sink: SharedSink,
    factory: DetectorFactory,

    state: Mutex<LoopState>,
    status: Arc<Mutex<LoopStatus>>,
    cancel: Mutex<Option<CancelToken>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameLoop {
    pub fn new(
        cfg: LoopConfig,
        policy_cfg: PolicyConfig,
        source: SharedSource,
        sink: SharedSink,
        factory: DetectorFactory,
    ) -> Self {
        Self {
            cfg,
            policy_cfg,
            source,
            sink,
            factory,
            state: Mutex::new(LoopState::Stopped),
            status: Arc::new(Mutex::new(LoopStatus::default())),
            cancel: Mutex::new(None),
            worker: Mutex::new(None),
        }
    }

    /// Loads the model and starts the worker. A second start while running is
    /// a logged no-op. A load failure leaves the loop `Stopped` and surfaces
    /// the error; everything after a successful start is self-healing.
    pub fn start(&self, model_source: &str) -> Result<(), ModelLoadError> {
        {
            let mut st = self.state.lock().unwrap();
            if *st != LoopState::Stopped {
                warn!("frame loop already {:?}; start ignored", *st);
                return Ok(());
            }
            *st = LoopState::Starting;
        }

        let detector = match (self.factory)(model_source) {
            Ok(d) => d,
            Err(e) => {
                *self.state.lock().unwrap() = LoopState::Stopped;
                return Err(e);
            }
        };

        let cancel = CancelToken::new();
        *self.cancel.lock().unwrap() = Some(cancel.clone());
        {
            let mut s = self.status.lock().unwrap();
            *s = LoopStatus::default();
            s.running = true;
            s.started_at = Some(OffsetDateTime::now_utc());
        }

        let cfg = self.cfg.clone();
        let policy = ActionPolicy::new(&self.policy_cfg);
        let source = self.source.clone();
        let sink = self.sink.clone();
        let status = self.status.clone();
        let handle = match std::thread::Builder::new()
            .name("frame-loop".into())
            .spawn(move || run_loop(cfg, source, sink, detector, policy, status, cancel))
        {
            Ok(handle) => handle,
            Err(e) => {
                *self.status.lock().unwrap() = LoopStatus::default();
                *self.cancel.lock().unwrap() = None;
                *self.state.lock().unwrap() = LoopState::Stopped;
                return Err(ModelLoadError::Rejected {
                    path: model_source.to_string(),
                    source: anyhow::Error::from(e).context("spawn frame-loop worker"),
                });
            }
        };

        *self.worker.lock().unwrap() = Some(handle);
        *self.state.lock().unwrap() = LoopState::Running;
        info!("frame loop running (model: {model_source})");
        Ok(())
    }

    /// Signals cancellation and waits for the worker to observe it at its
    /// next iteration boundary. An in-flight inference is allowed to finish.
    pub fn stop(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if *st != LoopState::Running {
                return;
            }
            *st = LoopState::Stopping;
        }

        if let Some(cancel) = self.cancel.lock().unwrap().take() {
            cancel.cancel();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("frame loop worker panicked");
            }
        }

        {
            let mut s = self.status.lock().unwrap();
            *s = LoopStatus::default();
        }
        *self.state.lock().unwrap() = LoopState::Stopped;
        info!("frame loop stopped");
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock().unwrap() == LoopState::Running
    }

    pub fn frame_count(&self) -> u64 {
        self.status.lock().unwrap().frame_count
    }

    pub fn current_fps(&self) -> f32 {
        self.status.lock().unwrap().fps
    }

    pub fn status(&self) -> LoopStatus {
        self.status.lock().unwrap().clone()
    }
}

impl Drop for FrameLoop {
    // Owner teardown must always release the engine's native resources.
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    cfg: LoopConfig,
    source: SharedSource,
    sink: SharedSink,
    mut detector: Box<dyn Detector>,
    mut policy: ActionPolicy,
    status: Arc<Mutex<LoopStatus>>,
    cancel: CancelToken,
) {
    let budget = Duration::from_secs_f32(1.0 / cfg.target_fps.max(1.0));
    let backoff = Duration::from_millis(cfg.error_backoff_ms);

    loop {
        if cancel.is_cancelled() {
            break;
        }
        let iter_start = Instant::now();

        match run_iteration(&cfg, &source, &sink, detector.as_mut(), &mut policy, &status) {
            Ok(()) => {
                let elapsed = iter_start.elapsed();
                if elapsed < budget && cancel.wait_timeout(budget - elapsed) {
                    break;
                }
            }
            Err(e) => {
                warn!("frame loop iteration failed: {e:#}; backing off {:?}", backoff);
                if cancel.wait_timeout(backoff) {
                    break;
                }
            }
        }
    }

    detector.close();
    debug!("frame loop worker exited");
}

fn run_iteration(
    cfg: &LoopConfig,
    source: &SharedSource,
    sink: &SharedSink,
    detector: &mut dyn Detector,
    policy: &mut ActionPolicy,
    status: &Arc<Mutex<LoopStatus>>,
) -> anyhow::Result<()> {
    let frame = { source.lock().unwrap().try_frame()? };
    let Some(frame) = frame else {
        // Source not ready; an empty iteration still honors the frame budget.
        return Ok(());
    };

    let detections = detector.detect(&frame);
    let action = policy.decide(&detections);
    if action != Action::Wait {
        sink.lock().unwrap().dispatch(&action)?;
    }
    let state = GameState::classify(&detections);

    {
        source.lock().unwrap().recycle(frame);
    }

    let mut s = status.lock().unwrap();
    s.frame_count += 1;
    let now = Instant::now();
    if let Some(prev) = s.last_frame_at {
        let dt = now.duration_since(prev).as_secs_f32();
        if dt > 0.0 {
            s.fps = 1.0 / dt;
        }
    }
    s.last_frame_at = Some(now);

    if cfg.status_log_every > 0 && s.frame_count % cfg.status_log_every == 0 {
        info!(
            "frame {} | fps {:.1} | detections {} | state {}",
            s.frame_count,
            s.fps,
            detections.len(),
            state.as_str()
        );
    }
    Ok(())
}
