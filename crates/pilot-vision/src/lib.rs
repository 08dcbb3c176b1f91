pub mod bbox;
pub mod decode;
pub mod detector;
pub mod doctor;
pub mod engine;
pub mod nms;
#[cfg(feature = "vision-tflite")]
pub mod tflite;

use serde::{Deserialize, Serialize};

use bbox::BBox;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub conf: f32,
    // image-pixel coordinates
    pub bbox: BBox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    /// Leading path separator = absolute filesystem path (runtime-deployed
    /// model); anything else is resolved against `assets_dir` (bundled model).
    pub model_source: String,
    pub assets_dir: String,
    pub output_layout: String, // "flat-anchor" | "ssd"
    pub class_names: Vec<String>,

    pub conf_threshold: f32,
    pub nms_iou_threshold: f32,
    pub max_detections: usize,
}

/// One loaded model. Exactly one owner; `detect` must never be called
/// concurrently against the same instance.
pub trait Detector: Send {
    /// Runs the full pipeline (preprocess, inference, decode, NMS). A failed
    /// frame logs and returns an empty list; it never propagates into the
    /// caller's loop.
    fn detect(&mut self, image: &image::RgbImage) -> Vec<Detection>;

    /// Releases the inference engine. Idempotent.
    fn close(&mut self);
}
