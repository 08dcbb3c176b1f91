use std::time::Instant;
use time::OffsetDateTime;

/// Snapshot of the running loop, shared behind `Arc<Mutex<...>>` so UI-side
/// callers can poll it without touching the worker.
#[derive(Debug, Clone)]
pub struct LoopStatus {
    pub running: bool,
    pub frame_count: u64,
    /// Instantaneous rate over the last two processed frames.
    pub fps: f32,
    pub last_frame_at: Option<Instant>,
    pub started_at: Option<OffsetDateTime>,
}

impl Default for LoopStatus {
    fn default() -> Self {
        Self {
            running: false,
            frame_count: 0,
            fps: 0.0,
            last_frame_at: None,
            started_at: None,
        }
    }
}
