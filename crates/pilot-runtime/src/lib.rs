pub mod cancel;
pub mod controller;
pub mod status;

use image::RgbImage;
use serde::Deserialize;

use pilot_policy::Action;

/// Screen-frame provider. Shared with other subsystems (manual single-shot
/// capture); the loop only requires that each call is individually atomic.
pub trait FrameSource: Send {
    /// Non-blocking; `Ok(None)` when no frame is ready yet (source warming
    /// up, or backpressure).
    fn try_frame(&mut self) -> anyhow::Result<Option<RgbImage>>;

    /// Hands a consumed frame back for buffer reuse. Default: drop it.
    fn recycle(&mut self, _frame: RgbImage) {}
}

/// Simulated-input dispatcher. Fire-and-forget; no delivery confirmation.
pub trait GestureSink: Send {
    fn dispatch(&mut self, action: &Action) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoopConfig {
    /// Soft FPS cap; iterations shorter than the budget sleep the remainder.
    pub target_fps: f32,
    /// Sleep after a failed iteration before trying again.
    pub error_backoff_ms: u64,
    /// Emit a status log line every N processed frames (0 = never).
    pub status_log_every: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            error_backoff_ms: 1000,
            status_log_every: 30,
        }
    }
}
