use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use pilot_vision::Detection;

/// One discrete gesture per frame. Produced by the policy, consumed by the
/// gesture sink, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Action {
    Tap { x: f32, y: f32 },
    Swipe { x1: f32, y1: f32, x2: f32, y2: f32 },
    LongPress { x: f32, y: f32 },
    Wait,
}

/// Coarse screen classification from the per-frame detection list. Logged for
/// operators; never feeds back into `decide`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Menu,
    Battle,
    Reward,
    Loading,
    Unknown,
}

const STATE_INDICATORS: &[(GameState, &[&str])] = &[
    (GameState::Menu, &["start_button", "menu_bg"]),
    (GameState::Battle, &["enemy", "hp_bar", "skill_button"]),
    (GameState::Reward, &["reward_icon", "claim_button"]),
    (GameState::Loading, &["loading_icon"]),
];

impl GameState {
    pub fn classify(dets: &[Detection]) -> GameState {
        for (state, indicators) in STATE_INDICATORS {
            for indicator in *indicators {
                if dets.iter().any(|d| d.label == *indicator) {
                    return *state;
                }
            }
        }
        GameState::Unknown
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GameState::Menu => "menu",
            GameState::Battle => "battle",
            GameState::Reward => "reward",
            GameState::Loading => "loading",
            GameState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PolicyConfig {
    /// Labels scanned in order; the first present wins.
    pub priority: Vec<String>,
    pub cooldown_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            priority: ["enemy", "skill_button", "start_button", "claim_button"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cooldown_ms: 500,
        }
    }
}

/// Maps one detection list to exactly one action. The cooldown gates action
/// frequency independent of frame rate: inside the window the policy returns
/// `Wait` without inspecting detections at all.
pub struct ActionPolicy {
    priority: Vec<String>,
    cooldown: Duration,
    last_action: Option<Instant>,
}

impl ActionPolicy {
    pub fn new(cfg: &PolicyConfig) -> Self {
        Self {
            priority: cfg.priority.clone(),
            cooldown: Duration::from_millis(cfg.cooldown_ms),
            last_action: None,
        }
    }

    pub fn decide(&mut self, dets: &[Detection]) -> Action {
        let now = Instant::now();
        if let Some(t) = self.last_action {
            if now.duration_since(t) < self.cooldown {
                return Action::Wait;
            }
        }

        for label in &self.priority {
            // Multiple hits for one label: take the first in the post-NMS
            // list. Flagged for product review; see DESIGN.md.
            if let Some(d) = dets.iter().find(|d| &d.label == label) {
                let (x, y) = d.bbox.center();
                self.last_action = Some(now);
                debug!("policy: tap {} at ({x:.0},{y:.0})", d.label);
                return Action::Tap { x, y };
            }
        }

        Action::Wait
    }
}

pub fn check_policy(cfg: &PolicyConfig) -> anyhow::Result<()> {
    anyhow::ensure!(!cfg.priority.is_empty(), "policy.priority is empty");
    anyhow::ensure!(
        cfg.cooldown_ms <= 10_000,
        "policy.cooldown_ms suspiciously large (> 10s)"
    );
    Ok(())
}
