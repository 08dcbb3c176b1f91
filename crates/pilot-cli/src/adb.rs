use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use image::RgbImage;
use rand::Rng;
use tracing::{debug, warn};

use pilot_policy::Action;
use pilot_runtime::{FrameSource, GestureSink};

#[derive(Debug, Clone, serde::Deserialize)]
pub struct AdbConfig {
    pub adb_bin: String,
    pub serial: Option<String>,
    /// Random tap offset in pixels; simulates human imprecision.
    pub tap_jitter_px: i32,
    pub swipe_duration_ms: u32,
    pub long_press_ms: u32,
}

fn base_cmd(cfg: &AdbConfig) -> std::process::Command {
    let mut cmd = std::process::Command::new(&cfg.adb_bin);
    if let Some(serial) = &cfg.serial {
        cmd.args(["-s", serial]);
    }
    cmd
}

/// Checks that an adb device is reachable. Doctor-only; the capture path
/// reports its own failures at runtime.
pub async fn probe_device(cfg: &AdbConfig) -> Result<()> {
    let mut cmd = tokio::process::Command::new(&cfg.adb_bin);
    cmd.arg("devices");

    debug!("adb: probing devices");
    let out = cmd.output().await.context("run adb devices")?;
    anyhow::ensure!(out.status.success(), "adb devices exited with {}", out.status);

    let stdout = String::from_utf8_lossy(&out.stdout);
    let attached: Vec<&str> = stdout
        .lines()
        .skip(1)
        .filter(|l| l.trim().ends_with("device"))
        .collect();
    match &cfg.serial {
        Some(serial) => anyhow::ensure!(
            attached.iter().any(|l| l.starts_with(serial.as_str())),
            "device {} not attached",
            serial
        ),
        None => anyhow::ensure!(!attached.is_empty(), "no adb device attached"),
    }
    Ok(())
}

/// Screen frames via `adb exec-out screencap -p`, pulled by a capture thread
/// into a depth-1 channel. `try_frame` never blocks; when the loop is slower
/// than capture, frames are dropped at the channel rather than queued.
pub struct AdbFrameSource {
    rx: Receiver<RgbImage>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl AdbFrameSource {
    pub fn start(cfg: AdbConfig) -> Result<Self> {
        let (tx, rx) = sync_channel::<RgbImage>(1);
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = stop.clone();
        let worker = std::thread::Builder::new()
            .name("adb-capture".into())
            .spawn(move || capture_loop(cfg, tx, stop2))
            .context("spawn adb capture thread")?;
        Ok(Self { rx, stop, worker: Some(worker) })
    }
}

fn capture_loop(cfg: AdbConfig, tx: SyncSender<RgbImage>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match capture_once(&cfg) {
            Ok(frame) => match tx.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => debug!("adb: frame dropped (loop busy)"),
                Err(TrySendError::Disconnected(_)) => break,
            },
            Err(e) => {
                warn!("adb: screencap failed: {e:#}");
                std::thread::sleep(Duration::from_millis(500));
            }
        }
    }
}

fn capture_once(cfg: &AdbConfig) -> Result<RgbImage> {
    let out = base_cmd(cfg)
        .args(["exec-out", "screencap", "-p"])
        .stderr(Stdio::null())
        .output()
        .context("run adb screencap")?;
    anyhow::ensure!(out.status.success(), "adb screencap exited with {}", out.status);

    let img = image::load_from_memory(&out.stdout).context("decode screencap png")?;
    Ok(img.to_rgb8())
}

impl FrameSource for AdbFrameSource {
    fn try_frame(&mut self) -> Result<Option<RgbImage>> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => anyhow::bail!("adb capture worker died"),
        }
    }
}

impl Drop for AdbFrameSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Gestures via `adb shell input`. Best-effort: the loop's back-off handles a
/// detached device.
pub struct AdbGestureSink {
    cfg: AdbConfig,
}

impl AdbGestureSink {
    pub fn new(cfg: AdbConfig) -> Self {
        Self { cfg }
    }

    fn jittered(&self, x: f32, y: f32) -> (i32, i32) {
        let j = self.cfg.tap_jitter_px;
        if j <= 0 {
            return (x.round() as i32, y.round() as i32);
        }
        let mut rng = rand::thread_rng();
        (
            x.round() as i32 + rng.gen_range(-j..=j),
            y.round() as i32 + rng.gen_range(-j..=j),
        )
    }

    fn input(&self, args: &[String]) -> Result<()> {
        let out = base_cmd(&self.cfg)
            .args(["shell", "input"])
            .args(args)
            .stderr(Stdio::null())
            .output()
            .context("run adb input")?;
        anyhow::ensure!(out.status.success(), "adb input exited with {}", out.status);
        Ok(())
    }
}

impl GestureSink for AdbGestureSink {
    fn dispatch(&mut self, action: &Action) -> Result<()> {
        match *action {
            Action::Tap { x, y } => {
                let (x, y) = self.jittered(x, y);
                debug!("adb: tap ({x},{y})");
                self.input(&["tap".into(), x.to_string(), y.to_string()])
            }
            Action::Swipe { x1, y1, x2, y2 } => self.input(&[
                "swipe".into(),
                (x1.round() as i32).to_string(),
                (y1.round() as i32).to_string(),
                (x2.round() as i32).to_string(),
                (y2.round() as i32).to_string(),
                self.cfg.swipe_duration_ms.to_string(),
            ]),
            Action::LongPress { x, y } => {
                // input has no long-press verb; a zero-distance swipe with a
                // duration is the established equivalent.
                let (x, y) = self.jittered(x, y);
                self.input(&[
                    "swipe".into(),
                    x.to_string(),
                    y.to_string(),
                    x.to_string(),
                    y.to_string(),
                    self.cfg.long_press_ms.to_string(),
                ])
            }
            Action::Wait => Ok(()),
        }
    }
}
