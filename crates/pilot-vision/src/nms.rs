use crate::Detection;

/// Greedy per-class non-maximum suppression. Sorts by confidence descending,
/// then accepts each detection unless it overlaps an already-accepted
/// detection of the same label with IoU strictly above `iou_threshold`.
/// Overlap across different labels never suppresses. Stops after
/// `max_outputs` acceptances.
pub fn suppress(mut dets: Vec<Detection>, iou_threshold: f32, max_outputs: usize) -> Vec<Detection> {
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<Detection> = Vec::new();

    'outer: for d in dets {
        for k in &kept {
            if k.label == d.label && d.bbox.iou(&k.bbox) > iou_threshold {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_outputs {
            break;
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn det(label: &str, conf: f32, bbox: BBox) -> Detection {
        Detection { label: label.to_string(), conf, bbox }
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(suppress(Vec::new(), 0.45, 10).is_empty());
    }

    #[test]
    fn overlapping_same_class_keeps_highest_confidence() {
        let a = det("enemy", 0.9, BBox::new(0.0, 0.0, 100.0, 100.0));
        let b = det("enemy", 0.6, BBox::new(5.0, 5.0, 105.0, 105.0));
        let kept = suppress(vec![b, a], 0.45, 10);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].conf, 0.9);
    }

    #[test]
    fn cross_class_overlap_is_ignored() {
        let bbox = BBox::new(0.0, 0.0, 100.0, 100.0);
        let kept = suppress(
            vec![det("enemy", 0.9, bbox), det("skill_button", 0.8, bbox)],
            0.45,
            10,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn iou_exactly_at_threshold_does_not_suppress() {
        // Half-overlapping equal boxes: IoU = 50/150 = 1/3.
        let a = det("enemy", 0.9, BBox::new(0.0, 0.0, 10.0, 10.0));
        let b = det("enemy", 0.8, BBox::new(5.0, 0.0, 15.0, 10.0));
        let iou = a.bbox.iou(&b.bbox);

        let kept = suppress(vec![a.clone(), b.clone()], iou, 10);
        assert_eq!(kept.len(), 2);

        let kept = suppress(vec![a, b], iou - 1e-4, 10);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn idempotent_on_own_output() {
        let dets = vec![
            det("enemy", 0.9, BBox::new(0.0, 0.0, 100.0, 100.0)),
            det("enemy", 0.8, BBox::new(90.0, 90.0, 200.0, 200.0)),
            det("claim_button", 0.7, BBox::new(0.0, 0.0, 100.0, 100.0)),
        ];
        let once = suppress(dets, 0.45, 10);
        let twice = suppress(once.clone(), 0.45, 10);
        assert_eq!(once.len(), twice.len());
        for (a, b) in once.iter().zip(twice.iter()) {
            assert_eq!(a.label, b.label);
            assert_eq!(a.conf, b.conf);
        }
    }

    #[test]
    fn caps_at_max_outputs() {
        let dets = (0..20)
            .map(|i| {
                det(
                    "enemy",
                    1.0 - i as f32 * 0.01,
                    BBox::new(i as f32 * 50.0, 0.0, i as f32 * 50.0 + 40.0, 40.0),
                )
            })
            .collect();
        assert_eq!(suppress(dets, 0.45, 5).len(), 5);
    }
}
