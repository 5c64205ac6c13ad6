use std::sync::atomic::{AtomicU64, Ordering};

use crate::geometry::{AtlasLayout, Bounds, Extent, Eye, Rect};

/// Per-eye size from a submission: the bounds rectangle, or an atlas split
/// when bounds are absent or span the whole texture.
pub fn infer_per_eye_display(texture: Extent, bounds: Option<Bounds>, atlas_ratio: f32) -> Extent {
    match bounds.filter(|b| !b.is_full()) {
        Some(b) => b.to_rect(texture).extent(),
        None => AtlasLayout::detect(texture, atlas_ratio).per_eye(texture),
    }
}

/// Region of the submitted texture that holds `eye`.
pub fn eye_region(eye: Eye, texture: Extent, bounds: Option<Bounds>, atlas_ratio: f32) -> Rect {
    match bounds.filter(|b| !b.is_full()) {
        Some(b) => b.to_rect(texture),
        None => AtlasLayout::detect(texture, atlas_ratio).eye_rect(eye, texture),
    }
}

/// Even-align and, with a cap, shrink uniformly so the larger axis fits.
pub fn cap_per_eye(size: Extent, cap: Option<u32>) -> Extent {
    let size = size.even();
    let Some(cap) = cap else {
        return size;
    };
    let largest = size.width.max(size.height);
    if largest <= cap {
        return size;
    }
    let scale = cap as f64 / largest as f64;
    Extent::new(
        (size.width as f64 * scale).floor() as u32,
        (size.height as f64 * scale).floor() as u32,
    )
    .even()
}

/// Latest known display size of each eye.
#[derive(Default)]
pub struct DisplaySizes {
    eyes: [AtomicU64; 2],
}

impl DisplaySizes {
    pub fn get(&self, eye: Eye) -> Option<Extent> {
        Extent::unpack(self.eyes[eye.index()].load(Ordering::Acquire))
    }

    pub fn set(&self, eye: Eye, size: Extent) {
        self.eyes[eye.index()].store(size.pack(), Ordering::Release);
    }

    /// Left eye if known, otherwise right.
    pub fn any(&self) -> Option<Extent> {
        self.get(Eye::Left).or_else(|| self.get(Eye::Right))
    }

    pub fn clear(&self) {
        for e in &self.eyes {
            e.store(0, Ordering::Release);
        }
    }

    /// Refresh from one submission. The runtime's recommendation wins over
    /// inference from the texture.
    pub fn update(
        &self,
        eye: Eye,
        recommended: Option<Extent>,
        texture: Extent,
        bounds: Option<Bounds>,
        cap: Option<u32>,
        atlas_ratio: f32,
    ) -> Extent {
        let raw = recommended
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| infer_per_eye_display(texture, bounds, atlas_ratio));
        let size = cap_per_eye(raw, cap);
        if self.get(eye) != Some(size) {
            tracing::info!(eye = ?eye, display = %size, "per-eye display size");
            self.set(eye, size);
        }
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RIGHT_HALF: Bounds = Bounds {
        u_min: 0.5,
        v_min: 0.0,
        u_max: 1.0,
        v_max: 1.0,
    };

    #[test]
    fn right_half_of_side_by_side_submission() {
        let tex = Extent::new(4096, 2048);
        assert_eq!(
            infer_per_eye_display(tex, Some(RIGHT_HALF), 1.7),
            Extent::new(2048, 2048)
        );
        assert_eq!(eye_region(Eye::Right, tex, Some(RIGHT_HALF), 1.7).x, 2048);
    }

    #[test]
    fn full_bounds_fall_back_to_atlas_split() {
        let tex = Extent::new(4096, 2048);
        assert_eq!(infer_per_eye_display(tex, None, 1.7), Extent::new(2048, 2048));
        assert_eq!(
            infer_per_eye_display(tex, Some(Bounds::FULL), 1.7),
            Extent::new(2048, 2048)
        );
        let r = eye_region(Eye::Right, tex, None, 1.7);
        assert_eq!((r.x, r.width), (2048, 2048));
        let single = Extent::new(1512, 1680);
        assert_eq!(infer_per_eye_display(single, None, 1.7), single);
    }

    #[test]
    fn cap_scales_uniformly() {
        assert_eq!(cap_per_eye(Extent::new(3000, 2000), Some(1500)), Extent::new(1500, 1000));
        assert_eq!(cap_per_eye(Extent::new(1513, 1681), None), Extent::new(1512, 1680));
        assert_eq!(cap_per_eye(Extent::new(1000, 1000), Some(2048)), Extent::new(1000, 1000));
        let c = cap_per_eye(Extent::new(2017, 2241), Some(1024));
        assert!(c.width <= 1024 && c.height <= 1024);
        assert_eq!(c.width % 2, 0);
    }

    #[test]
    fn recommended_size_wins() {
        let d = DisplaySizes::default();
        let s = d.update(
            Eye::Left,
            Some(Extent::new(2016, 2240)),
            Extent::new(4096, 2048),
            None,
            None,
            1.7,
        );
        assert_eq!(s, Extent::new(2016, 2240));
        assert_eq!(d.get(Eye::Left), Some(s));
        assert_eq!(d.get(Eye::Right), None);
        assert_eq!(d.any(), Some(s));
        d.clear();
        assert_eq!(d.any(), None);
    }
}
