use std::path::{Path, PathBuf};

use anyhow::Result;
use image::{imageops::FilterType, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::decode::{decode_flat_anchor, decode_ssd};
use crate::engine::{OutputPool, TensorEngine};
use crate::nms;
use crate::{Detection, Detector, VisionConfig};

/// Anything smaller is a placeholder or a truncated download, not a model.
pub const MIN_MODEL_BYTES: u64 = 16 * 1024;

/// Failures surfaced synchronously to `start()`. Everything after a
/// successful load is contained per-frame instead.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file missing: {path}; deploy the .tflite file there or fix [vision].model_source")]
    Missing { path: String },

    #[error("model file too small ({size} bytes < {min}): {path}; looks like a placeholder, re-export the model")]
    TooSmall { path: String, size: u64, min: u64 },

    #[error("failed to read model {path}: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("inference engine rejected model {path}: {source}")]
    Rejected { path: String, source: anyhow::Error },

    #[error("unsupported [vision].output_layout {layout:?} (expected \"flat-anchor\" or \"ssd\")")]
    UnsupportedLayout { layout: String },

    #[error("vision backend not built; rebuild with --features vision-tflite")]
    BackendUnavailable,
}

/// Resolves a model source string to bytes. A leading path separator means an
/// absolute filesystem path (runtime-deployed model); anything else is looked
/// up under `assets_dir` (bundled model).
pub fn resolve_model_bytes(source: &str, assets_dir: &Path) -> Result<(PathBuf, Vec<u8>), ModelLoadError> {
    let path = if source.starts_with(std::path::MAIN_SEPARATOR) || source.starts_with('/') {
        PathBuf::from(source)
    } else {
        assets_dir.join(source)
    };
    let display = path.display().to_string();

    let meta = std::fs::metadata(&path).map_err(|_| ModelLoadError::Missing { path: display.clone() })?;
    if meta.len() < MIN_MODEL_BYTES {
        return Err(ModelLoadError::TooSmall {
            path: display,
            size: meta.len(),
            min: MIN_MODEL_BYTES,
        });
    }

    let bytes = std::fs::read(&path).map_err(|source| ModelLoadError::Io { path: display, source })?;
    Ok((path, bytes))
}

pub fn load_detector(cfg: &VisionConfig) -> Result<Box<dyn Detector>, ModelLoadError> {
    if !matches!(cfg.output_layout.as_str(), "flat-anchor" | "ssd") {
        return Err(ModelLoadError::UnsupportedLayout { layout: cfg.output_layout.clone() });
    }

    let (path, bytes) = resolve_model_bytes(&cfg.model_source, Path::new(&cfg.assets_dir))?;
    info!("vision: loading model {} ({} bytes)", path.display(), bytes.len());

    let engine = open_engine(&path, bytes)?;
    detector_from_engine(engine, cfg).map_err(|source| ModelLoadError::Rejected {
        path: path.display().to_string(),
        source,
    })
}

/// Builds the layout-matching detector around an already-open engine. Public
/// so callers can inject a non-TFLite engine.
pub fn detector_from_engine(
    engine: Box<dyn TensorEngine>,
    cfg: &VisionConfig,
) -> Result<Box<dyn Detector>, anyhow::Error> {
    match cfg.output_layout.as_str() {
        "flat-anchor" => Ok(Box::new(FlatAnchorDetector::from_engine(engine, cfg)?)),
        "ssd" => Ok(Box::new(SsdDetector::from_engine(engine, cfg)?)),
        other => Err(ModelLoadError::UnsupportedLayout { layout: other.to_string() }.into()),
    }
}

#[cfg(feature = "vision-tflite")]
fn open_engine(path: &Path, bytes: Vec<u8>) -> Result<Box<dyn TensorEngine>, ModelLoadError> {
    match crate::tflite::TfLiteEngine::new(bytes) {
        Ok(engine) => Ok(Box::new(engine)),
        Err(source) => Err(ModelLoadError::Rejected {
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(not(feature = "vision-tflite"))]
fn open_engine(_path: &Path, _bytes: Vec<u8>) -> Result<Box<dyn TensorEngine>, ModelLoadError> {
    Err(ModelLoadError::BackendUnavailable)
}

fn input_size(engine: &dyn TensorEngine) -> Result<(u32, u32)> {
    // NHWC [1, h, w, c]
    match engine.input_dims() {
        [1, h, w, 3] => Ok((*w as u32, *h as u32)),
        other => anyhow::bail!(
            "unexpected input dims {:?} (expected [1, h, w, 3]); run `tappilot vision inspect`",
            other
        ),
    }
}

/// Bilinear resize to the model resolution, then RGB bytes scaled to
/// [0,1] f32, NHWC. Reuses `scratch` across frames.
fn preprocess_into(image: &RgbImage, w: u32, h: u32, scratch: &mut Vec<f32>) {
    let resized = image::imageops::resize(image, w, h, FilterType::Triangle);
    scratch.clear();
    scratch.extend(resized.as_raw().iter().map(|&b| b as f32 / 255.0));
}

pub struct FlatAnchorDetector {
    engine: Option<Box<dyn TensorEngine>>,
    pool: OutputPool,
    scratch: Vec<f32>,
    labels: Vec<String>,
    conf_threshold: f32,
    iou_threshold: f32,
    max_outputs: usize,
    input_w: u32,
    input_h: u32,
}

impl FlatAnchorDetector {
    pub fn from_engine(engine: Box<dyn TensorEngine>, cfg: &VisionConfig) -> Result<Self> {
        let (input_w, input_h) = input_size(engine.as_ref())?;
        Ok(Self {
            engine: Some(engine),
            pool: OutputPool::default(),
            scratch: Vec::new(),
            labels: cfg.class_names.clone(),
            conf_threshold: cfg.conf_threshold,
            iou_threshold: cfg.nms_iou_threshold,
            max_outputs: cfg.max_detections,
            input_w,
            input_h,
        })
    }

    fn run_frame(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let engine = self.engine.as_mut().ok_or_else(|| anyhow::anyhow!("detector is closed"))?;

        preprocess_into(image, self.input_w, self.input_h, &mut self.scratch);

        let dims = engine.output_dims(0)?;
        let (n, stride) = match dims.as_slice() {
            [1, n, s] => (*n, *s),
            [n, s] => (*n, *s),
            other => anyhow::bail!(
                "unexpected flat-anchor output dims {:?}; run `tappilot vision inspect` and check [vision].output_layout",
                other
            ),
        };
        anyhow::ensure!(stride >= 6, "flat-anchor stride {} too small (need cx,cy,w,h,obj,cls..)", stride);

        self.pool.ensure(0, n * stride);
        let mut slices = self.pool.slices();
        engine.run(&self.scratch, &mut slices[..1])?;

        let dets = decode_flat_anchor(
            self.pool.get(0),
            n,
            stride,
            self.input_w,
            self.input_h,
            image.width(),
            image.height(),
            self.conf_threshold,
            &self.labels,
        );
        Ok(nms::suppress(dets, self.iou_threshold, self.max_outputs))
    }
}

impl Detector for FlatAnchorDetector {
    fn detect(&mut self, image: &RgbImage) -> Vec<Detection> {
        match self.run_frame(image) {
            Ok(dets) => dets,
            Err(e) => {
                warn!("vision: frame dropped: {e:#}");
                Vec::new()
            }
        }
    }

    fn close(&mut self) {
        if self.engine.take().is_some() {
            debug!("vision: flat-anchor detector closed");
        }
    }
}

impl Drop for FlatAnchorDetector {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct SsdDetector {
    engine: Option<Box<dyn TensorEngine>>,
    pool: OutputPool,
    scratch: Vec<f32>,
    labels: Vec<String>,
    conf_threshold: f32,
    iou_threshold: f32,
    max_outputs: usize,
    input_w: u32,
    input_h: u32,
}

impl SsdDetector {
    pub fn from_engine(engine: Box<dyn TensorEngine>, cfg: &VisionConfig) -> Result<Self> {
        let (input_w, input_h) = input_size(engine.as_ref())?;
        anyhow::ensure!(
            engine.output_count() >= 4,
            "ssd layout needs 4 output tensors (locations, classes, scores, count), model has {}; run `tappilot vision inspect`",
            engine.output_count()
        );
        Ok(Self {
            engine: Some(engine),
            pool: OutputPool::default(),
            scratch: Vec::new(),
            labels: cfg.class_names.clone(),
            conf_threshold: cfg.conf_threshold,
            iou_threshold: cfg.nms_iou_threshold,
            max_outputs: cfg.max_detections,
            input_w,
            input_h,
        })
    }

    fn run_frame(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        let engine = self.engine.as_mut().ok_or_else(|| anyhow::anyhow!("detector is closed"))?;

        preprocess_into(image, self.input_w, self.input_h, &mut self.scratch);

        for index in 0..4 {
            let dims = engine.output_dims(index)?;
            let len: usize = dims.iter().product::<usize>().max(1);
            self.pool.ensure(index, len);
        }
        let mut slices = self.pool.slices();
        engine.run(&self.scratch, &mut slices[..4])?;

        let num_detections = self.pool.get(3).first().copied().unwrap_or(0.0);
        let dets = decode_ssd(
            self.pool.get(0),
            self.pool.get(1),
            self.pool.get(2),
            num_detections,
            image.width(),
            image.height(),
            self.conf_threshold,
            &self.labels,
        );
        Ok(nms::suppress(dets, self.iou_threshold, self.max_outputs))
    }
}

impl Detector for SsdDetector {
    fn detect(&mut self, image: &RgbImage) -> Vec<Detection> {
        match self.run_frame(image) {
            Ok(dets) => dets,
            Err(e) => {
                warn!("vision: frame dropped: {e:#}");
                Vec::new()
            }
        }
    }

    fn close(&mut self) {
        if self.engine.take().is_some() {
            debug!("vision: ssd detector closed");
        }
    }
}

impl Drop for SsdDetector {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedEngine {
        input_dims: Vec<usize>,
        output_dims: Vec<Vec<usize>>,
        outputs: Vec<Vec<f32>>,
        fail_invoke: bool,
    }

    impl TensorEngine for ScriptedEngine {
        fn input_dims(&self) -> &[usize] {
            &self.input_dims
        }

        fn output_count(&self) -> usize {
            self.output_dims.len()
        }

        fn output_dims(&self, index: usize) -> Result<Vec<usize>> {
            Ok(self.output_dims[index].clone())
        }

        fn run(&mut self, _input: &[f32], outputs: &mut [&mut [f32]]) -> Result<()> {
            anyhow::ensure!(!self.fail_invoke, "scripted invoke failure");
            for (dst, src) in outputs.iter_mut().zip(self.outputs.iter()) {
                dst.copy_from_slice(src);
            }
            Ok(())
        }
    }

    fn cfg(layout: &str) -> VisionConfig {
        VisionConfig {
            model_source: "game_model_320.tflite".into(),
            assets_dir: "assets".into(),
            output_layout: layout.into(),
            class_names: vec!["enemy".into(), "skill_button".into()],
            conf_threshold: 0.25,
            nms_iou_threshold: 0.45,
            max_detections: 100,
        }
    }

    #[test]
    fn flat_detector_end_to_end() {
        // Two anchors on a 320 model mapped to a 640x480 frame. Anchor A
        // lands on pixel rect (100,100,150,150); anchor B fails the
        // objectness gate.
        let a = [62.5, 250.0 / 3.0, 25.0, 100.0 / 3.0, 0.9, 0.95, 0.1];
        let b = [10.0, 10.0, 5.0, 5.0, 0.2, 0.99, 0.99];
        let mut raw = Vec::new();
        raw.extend_from_slice(&a);
        raw.extend_from_slice(&b);

        let engine = ScriptedEngine {
            input_dims: vec![1, 320, 320, 3],
            output_dims: vec![vec![1, 2, 7]],
            outputs: vec![raw],
            fail_invoke: false,
        };
        let mut det = FlatAnchorDetector::from_engine(Box::new(engine), &cfg("flat-anchor")).unwrap();

        let frame = RgbImage::new(640, 480);
        let dets = det.detect(&frame);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "enemy");
        let bb = dets[0].bbox;
        assert!((bb.left - 100.0).abs() < 1e-2);
        assert!((bb.top - 100.0).abs() < 1e-2);
        assert!((bb.right - 150.0).abs() < 1e-2);
        assert!((bb.bottom - 150.0).abs() < 1e-2);
    }

    #[test]
    fn ssd_detector_end_to_end() {
        let engine = ScriptedEngine {
            input_dims: vec![1, 300, 300, 3],
            output_dims: vec![vec![1, 2, 4], vec![1, 2], vec![1, 2], vec![1]],
            outputs: vec![
                vec![0.25, 0.25, 0.5, 0.5, 0.0, 0.0, 1.0, 1.0],
                vec![1.0, 0.0],
                vec![0.9, 0.0],
                vec![2.0],
            ],
            fail_invoke: false,
        };
        let mut det = SsdDetector::from_engine(Box::new(engine), &cfg("ssd")).unwrap();

        let frame = RgbImage::new(400, 200);
        let dets = det.detect(&frame);
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "enemy");
        assert_eq!(dets[0].bbox, crate::bbox::BBox::new(100.0, 50.0, 200.0, 100.0));
    }

    #[test]
    fn engine_failure_becomes_empty_list() {
        let engine = ScriptedEngine {
            input_dims: vec![1, 320, 320, 3],
            output_dims: vec![vec![1, 1, 6]],
            outputs: vec![vec![0.0; 6]],
            fail_invoke: true,
        };
        let mut det = FlatAnchorDetector::from_engine(Box::new(engine), &cfg("flat-anchor")).unwrap();
        assert!(det.detect(&RgbImage::new(64, 64)).is_empty());
    }

    #[test]
    fn close_is_idempotent_and_detect_after_close_is_empty() {
        let engine = ScriptedEngine {
            input_dims: vec![1, 320, 320, 3],
            output_dims: vec![vec![1, 1, 6]],
            outputs: vec![vec![0.0; 6]],
            fail_invoke: false,
        };
        let mut det = FlatAnchorDetector::from_engine(Box::new(engine), &cfg("flat-anchor")).unwrap();
        det.close();
        det.close();
        assert!(det.detect(&RgbImage::new(64, 64)).is_empty());
    }

    #[test]
    fn bad_input_dims_are_rejected_at_construction() {
        let engine = ScriptedEngine {
            input_dims: vec![320, 320],
            output_dims: vec![],
            outputs: vec![],
            fail_invoke: false,
        };
        assert!(FlatAnchorDetector::from_engine(Box::new(engine), &cfg("flat-anchor")).is_err());
    }

    #[test]
    fn resolver_distinguishes_absolute_and_bundled_sources() {
        let dir = std::env::temp_dir().join("pilot-vision-resolver-test");
        std::fs::create_dir_all(&dir).unwrap();
        let missing = resolve_model_bytes("nope.tflite", &dir);
        assert!(matches!(missing, Err(ModelLoadError::Missing { .. })));

        let small = dir.join("small.tflite");
        std::fs::write(&small, b"tiny").unwrap();
        let small_err = resolve_model_bytes(small.to_str().unwrap(), &dir);
        assert!(matches!(small_err, Err(ModelLoadError::TooSmall { .. })));
    }
}
