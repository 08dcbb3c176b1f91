use pilot_vision::decode::decode_flat_anchor;
use pilot_vision::nms::suppress;

fn labels() -> Vec<String> {
    vec!["enemy".into(), "skill_button".into()]
}

#[test]
fn two_anchor_decode_then_nms_keeps_only_the_confident_anchor() {
    // Anchor A: objectness 0.9, class 0 prob 0.95, maps to pixel rect
    // (100,100,150,150) on a 640x480 frame from a 320x320 model.
    // Anchor B: objectness 0.2, below the 0.25 threshold.
    let mut raw = Vec::new();
    raw.extend_from_slice(&[62.5, 250.0 / 3.0, 25.0, 100.0 / 3.0, 0.9, 0.95, 0.1]);
    raw.extend_from_slice(&[100.0, 100.0, 20.0, 20.0, 0.2, 0.99, 0.99]);

    let decoded = decode_flat_anchor(&raw, 2, 7, 320, 320, 640, 480, 0.25, &labels());
    let dets = suppress(decoded, 0.45, 100);

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].label, "enemy");
    assert!((dets[0].conf - 0.855).abs() < 1e-4);

    let b = dets[0].bbox;
    assert!((b.left - 100.0).abs() < 1e-2);
    assert!((b.top - 100.0).abs() < 1e-2);
    assert!((b.right - 150.0).abs() < 1e-2);
    assert!((b.bottom - 150.0).abs() < 1e-2);
}

#[test]
fn duplicate_anchors_collapse_to_one_per_class() {
    // Two near-identical high-confidence anchors of the same class plus one
    // overlapping anchor of a different class: NMS keeps one per class.
    let mut raw = Vec::new();
    raw.extend_from_slice(&[160.0, 160.0, 64.0, 64.0, 0.9, 0.9, 0.0]);
    raw.extend_from_slice(&[162.0, 161.0, 64.0, 64.0, 0.8, 0.9, 0.0]);
    raw.extend_from_slice(&[160.0, 160.0, 64.0, 64.0, 0.9, 0.0, 0.9]);

    let decoded = decode_flat_anchor(&raw, 3, 7, 320, 320, 320, 320, 0.25, &labels());
    assert_eq!(decoded.len(), 3);

    let dets = suppress(decoded, 0.45, 100);
    assert_eq!(dets.len(), 2);
    let mut kept: Vec<&str> = dets.iter().map(|d| d.label.as_str()).collect();
    kept.sort();
    assert_eq!(kept, vec!["enemy", "skill_button"]);
}
