use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in image-pixel coordinates. Degenerate boxes
/// (right < left or bottom < top) have zero width/height and zero area.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            left: cx - w / 2.0,
            top: cy - h / 2.0,
            right: cx + w / 2.0,
            bottom: cy + h / 2.0,
        }
    }

    pub fn width(&self) -> f32 {
        (self.right - self.left).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.bottom - self.top).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Intersection over union in [0,1]. Returns 0 for disjoint boxes and
    /// when the union area is zero.
    pub fn iou(&self, other: &BBox) -> f32 {
        let ix_a = self.left.max(other.left);
        let iy_a = self.top.max(other.top);
        let ix_b = self.right.min(other.right);
        let iy_b = self.bottom.min(other.bottom);

        let iw = (ix_b - ix_a).max(0.0);
        let ih = (iy_b - iy_a).max(0.0);
        let inter = iw * ih;

        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}
