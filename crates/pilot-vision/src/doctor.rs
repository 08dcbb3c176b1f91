use anyhow::Result;
use std::path::Path;

use crate::detector::resolve_model_bytes;
use crate::VisionConfig;

pub fn check_vision(cfg: &VisionConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.conf_threshold > 0.0 && cfg.conf_threshold < 1.0,
        "vision.conf_threshold out of range (0,1)"
    );
    anyhow::ensure!(
        cfg.nms_iou_threshold > 0.0 && cfg.nms_iou_threshold < 1.0,
        "vision.nms_iou_threshold out of range (0,1)"
    );
    anyhow::ensure!(cfg.max_detections >= 1, "vision.max_detections must be >= 1");
    anyhow::ensure!(
        matches!(cfg.output_layout.as_str(), "flat-anchor" | "ssd"),
        "vision.output_layout must be \"flat-anchor\" or \"ssd\", got {:?}",
        cfg.output_layout
    );
    anyhow::ensure!(!cfg.class_names.is_empty(), "vision.class_names is empty");

    // Resolve but discard; catches missing/placeholder model files up front.
    resolve_model_bytes(&cfg.model_source, Path::new(&cfg.assets_dir))?;
    Ok(())
}
