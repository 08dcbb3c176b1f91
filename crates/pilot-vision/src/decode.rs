use crate::bbox::BBox;
use crate::Detection;

fn label_for(labels: &[String], idx: usize) -> String {
    labels
        .get(idx)
        .cloned()
        .unwrap_or_else(|| format!("unknown_{idx}"))
}

/// Decodes a flat-anchor (YOLO-style export) output tensor shaped
/// `[1, num_anchors, stride]` with `stride = 5 + num_classes` and rows laid
/// out as `[cx, cy, w, h, objectness, cls0..]`. Box coordinates are in model
/// input-resolution units and are mapped to source-image pixels with
/// independent X/Y scale factors. Output order follows the tensor's row
/// order; callers must not rely on it (NMS sorts).
pub fn decode_flat_anchor(
    raw: &[f32],
    num_anchors: usize,
    stride: usize,
    model_w: u32,
    model_h: u32,
    src_w: u32,
    src_h: u32,
    conf_threshold: f32,
    labels: &[String],
) -> Vec<Detection> {
    let num_classes = stride.saturating_sub(5);
    let sx = src_w as f32 / model_w as f32;
    let sy = src_h as f32 / model_h as f32;

    let mut out = Vec::new();

    for i in 0..num_anchors {
        let base = i * stride;
        if base + stride > raw.len() {
            break;
        }

        // Cheap gate before scanning the class slice.
        let obj = raw[base + 4];
        if obj < conf_threshold {
            continue;
        }

        let mut best_c = 0usize;
        let mut best_p = 0.0f32;
        for c in 0..num_classes {
            let p = raw[base + 5 + c];
            if p > best_p {
                best_p = p;
                best_c = c;
            }
        }

        let conf = obj * best_p;
        if conf < conf_threshold {
            continue;
        }

        let cx = raw[base] * sx;
        let cy = raw[base + 1] * sy;
        let w = raw[base + 2] * sx;
        let h = raw[base + 3] * sy;

        out.push(Detection {
            label: label_for(labels, best_c),
            conf,
            bbox: BBox::from_center(cx, cy, w, h),
        });
    }

    out
}

/// Decodes the four-tensor SSD detection-postprocess layout:
/// `locations [1][N][4]` as normalized `(ymin, xmin, ymax, xmax)`,
/// `classes [1][N]` (1-based ids, 0 reserved for background),
/// `scores [1][N]`, and a scalar detection count. Coordinates scale by the
/// *source* image dimensions; the model already normalized them.
pub fn decode_ssd(
    locations: &[f32],
    classes: &[f32],
    scores: &[f32],
    num_detections: f32,
    src_w: u32,
    src_h: u32,
    conf_threshold: f32,
    labels: &[String],
) -> Vec<Detection> {
    let capacity = scores
        .len()
        .min(classes.len())
        .min(locations.len() / 4);
    let count = (num_detections.max(0.0) as usize).min(capacity);

    let w = src_w as f32;
    let h = src_h as f32;

    let mut out = Vec::new();

    for i in 0..count {
        let score = scores[i];
        if score < conf_threshold {
            continue;
        }

        // Background slots carry class id 0 by convention.
        let class_idx = (classes[i] as i64 - 1).max(0) as usize;
        let label = if labels.is_empty() {
            format!("unknown_{class_idx}")
        } else {
            labels[class_idx.min(labels.len() - 1)].clone()
        };

        let base = i * 4;
        let ymin = locations[base];
        let xmin = locations[base + 1];
        let ymax = locations[base + 2];
        let xmax = locations[base + 3];

        out.push(Detection {
            label,
            conf: score,
            bbox: BBox::new(xmin * w, ymin * h, xmax * w, ymax * h),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn anchor(cx: f32, cy: f32, w: f32, h: f32, obj: f32, cls: &[f32]) -> Vec<f32> {
        let mut row = vec![cx, cy, w, h, obj];
        row.extend_from_slice(cls);
        row
    }

    #[test]
    fn flat_low_objectness_short_circuits() {
        // Class probabilities are high but objectness alone fails the gate.
        let raw = anchor(160.0, 160.0, 32.0, 32.0, 0.1, &[0.99, 0.99]);
        let dets = decode_flat_anchor(&raw, 1, 7, 320, 320, 640, 480, 0.25, &labels(&["a", "b"]));
        assert!(dets.is_empty());
    }

    #[test]
    fn flat_combined_confidence_below_threshold_is_dropped() {
        // obj 0.5 * best class 0.4 = 0.2 < 0.25
        let raw = anchor(160.0, 160.0, 32.0, 32.0, 0.5, &[0.4, 0.1]);
        let dets = decode_flat_anchor(&raw, 1, 7, 320, 320, 640, 480, 0.25, &labels(&["a", "b"]));
        assert!(dets.is_empty());
    }

    #[test]
    fn flat_coordinate_mapping_scales_per_axis() {
        // 320x320 model, anchor centered at (160,160), 32x32, onto 640x480.
        let raw = anchor(160.0, 160.0, 32.0, 32.0, 0.9, &[0.95]);
        let dets = decode_flat_anchor(&raw, 1, 6, 320, 320, 640, 480, 0.25, &labels(&["enemy"]));
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert!((b.left - 288.0).abs() < 1e-3);
        assert!((b.top - 216.0).abs() < 1e-3);
        assert!((b.right - 352.0).abs() < 1e-3);
        assert!((b.bottom - 264.0).abs() < 1e-3);
        assert!((dets[0].conf - 0.855).abs() < 1e-4);
        assert_eq!(dets[0].label, "enemy");
    }

    #[test]
    fn flat_out_of_range_class_gets_placeholder_label() {
        // Two class slots in the tensor but only one known label.
        let raw = anchor(100.0, 100.0, 10.0, 10.0, 0.9, &[0.1, 0.9]);
        let dets = decode_flat_anchor(&raw, 1, 7, 320, 320, 320, 320, 0.25, &labels(&["only"]));
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, "unknown_1");
    }

    #[test]
    fn ssd_background_zero_case_yields_nothing() {
        let locations = [0.0, 0.0, 0.0, 0.0];
        let classes = [0.0];
        let scores = [0.0];
        let dets = decode_ssd(&locations, &classes, &scores, 1.0, 640, 480, 0.25, &labels(&["a"]));
        assert!(dets.is_empty());
    }

    #[test]
    fn ssd_scales_by_source_dimensions() {
        // (ymin,xmin,ymax,xmax) = (0.25, 0.125, 0.75, 0.5) on 640x480
        let locations = [0.25, 0.125, 0.75, 0.5];
        let classes = [2.0];
        let scores = [0.8];
        let dets = decode_ssd(&locations, &classes, &scores, 1.0, 640, 480, 0.25, &labels(&["a", "b"]));
        assert_eq!(dets.len(), 1);
        let b = dets[0].bbox;
        assert_eq!((b.left, b.top, b.right, b.bottom), (80.0, 120.0, 320.0, 360.0));
        // class id 2 is 1-based -> second label
        assert_eq!(dets[0].label, "b");
    }

    #[test]
    fn ssd_respects_num_detections_over_capacity() {
        let locations = [0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 1.0, 1.0];
        let classes = [1.0, 1.0];
        let scores = [0.9, 0.9];
        // num_detections says only the first slot is valid
        let dets = decode_ssd(&locations, &classes, &scores, 1.0, 100, 100, 0.25, &labels(&["a"]));
        assert_eq!(dets.len(), 1);
    }

    #[test]
    fn ssd_class_id_clamps_into_label_table() {
        let locations = [0.0, 0.0, 0.5, 0.5];
        let classes = [9.0];
        let scores = [0.9];
        let dets = decode_ssd(&locations, &classes, &scores, 1.0, 100, 100, 0.25, &labels(&["a", "b"]));
        assert_eq!(dets[0].label, "b");
    }
}
