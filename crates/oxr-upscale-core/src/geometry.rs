use ovr_sys::{VRTextureBounds_t, Eye_Left, Eye_Right, EVREye};

/// Largest per-eye dimension the orchestrator will allocate.
pub const MAX_EYE_DIM: u32 = 8192;

/// Width/height ratio above which a texture is treated as a two-eye atlas.
pub const DEFAULT_ATLAS_RATIO: f32 = 1.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_raw(eye: EVREye) -> Option<Eye> {
        match eye {
            Eye_Left => Some(Eye::Left),
            Eye_Right => Some(Eye::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Round both axes down to even, never below 2.
    pub fn even(self) -> Self {
        Self {
            width: (self.width & !1).max(2),
            height: (self.height & !1).max(2),
        }
    }

    pub fn min(self, other: Extent) -> Self {
        Self {
            width: self.width.min(other.width),
            height: self.height.min(other.height),
        }
    }

    pub fn fits_in(self, other: Extent) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    pub(crate) fn pack(self) -> u64 {
        ((self.width as u64) << 32) | self.height as u64
    }

    pub(crate) fn unpack(v: u64) -> Option<Self> {
        let e = Self::new((v >> 32) as u32, v as u32);
        (!e.is_empty()).then_some(e)
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn full(extent: Extent) -> Self {
        Self {
            x: 0,
            y: 0,
            width: extent.width,
            height: extent.height,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    pub fn covers(&self, extent: Extent) -> bool {
        *self == Rect::full(extent)
    }

    /// The same rectangle in normalized coordinates of `of`.
    pub fn uv_window(&self, of: Extent) -> UvWindow {
        if of.is_empty() {
            return UvWindow::FULL;
        }
        let (w, h) = (of.width as f32, of.height as f32);
        UvWindow {
            u0: self.x as f32 / w,
            v0: self.y as f32 / h,
            u1: (self.x + self.width) as f32 / w,
            v1: (self.y + self.height) as f32 / h,
        }
    }
}

/// Normalized source window of a blit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvWindow {
    pub u0: f32,
    pub v0: f32,
    pub u1: f32,
    pub v1: f32,
}

impl UvWindow {
    pub const FULL: UvWindow = UvWindow {
        u0: 0.0,
        v0: 0.0,
        u1: 1.0,
        v1: 1.0,
    };
}

/// Layout-compatible with `D3D11_VIEWPORT`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub top_left_x: f32,
    pub top_left_y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn scaled(&self, sx: f32, sy: f32) -> Viewport {
        Viewport {
            top_left_x: self.top_left_x * sx,
            top_left_y: self.top_left_y * sy,
            width: self.width * sx,
            height: self.height * sy,
            ..*self
        }
    }
}

/// Normalized sub-rectangle of a submitted texture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl Bounds {
    pub const FULL: Bounds = Bounds {
        u_min: 0.0,
        v_min: 0.0,
        u_max: 1.0,
        v_max: 1.0,
    };

    const EPS: f32 = 0.001;

    /// Spans the whole texture (flipped axes included).
    pub fn is_full(&self) -> bool {
        let (u0, u1) = ordered(self.u_min, self.u_max);
        let (v0, v1) = ordered(self.v_min, self.v_max);
        u0 <= Self::EPS && v0 <= Self::EPS && u1 >= 1.0 - Self::EPS && v1 >= 1.0 - Self::EPS
    }

    pub fn to_rect(&self, texture: Extent) -> Rect {
        let (u0, u1) = ordered(self.u_min.clamp(0.0, 1.0), self.u_max.clamp(0.0, 1.0));
        let (v0, v1) = ordered(self.v_min.clamp(0.0, 1.0), self.v_max.clamp(0.0, 1.0));
        let (w, h) = (texture.width as f32, texture.height as f32);
        let x = (u0 * w).round() as u32;
        let y = (v0 * h).round() as u32;
        let x1 = ((u1 * w).round() as u32).min(texture.width);
        let y1 = ((v1 * h).round() as u32).min(texture.height);
        Rect {
            x,
            y,
            width: x1.saturating_sub(x),
            height: y1.saturating_sub(y),
        }
    }
}

impl From<&VRTextureBounds_t> for Bounds {
    fn from(b: &VRTextureBounds_t) -> Self {
        Bounds {
            u_min: b.uMin,
            v_min: b.vMin,
            u_max: b.uMax,
            v_max: b.vMax,
        }
    }
}

fn ordered(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// How two eyes share one texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtlasLayout {
    Single,
    SideBySide,
    TopBottom,
}

impl AtlasLayout {
    pub fn detect(extent: Extent, ratio: f32) -> AtlasLayout {
        if extent.is_empty() {
            return AtlasLayout::Single;
        }
        let (w, h) = (extent.width as f32, extent.height as f32);
        if w / h >= ratio {
            AtlasLayout::SideBySide
        } else if h / w >= ratio {
            AtlasLayout::TopBottom
        } else {
            AtlasLayout::Single
        }
    }

    pub fn per_eye(self, atlas: Extent) -> Extent {
        match self {
            AtlasLayout::Single => atlas,
            AtlasLayout::SideBySide => Extent::new(atlas.width / 2, atlas.height),
            AtlasLayout::TopBottom => Extent::new(atlas.width, atlas.height / 2),
        }
    }

    /// Atlas extent holding two eyes of `per_eye`.
    pub fn atlas(self, per_eye: Extent) -> Extent {
        match self {
            AtlasLayout::Single => per_eye,
            AtlasLayout::SideBySide => Extent::new(per_eye.width * 2, per_eye.height),
            AtlasLayout::TopBottom => Extent::new(per_eye.width, per_eye.height * 2),
        }
    }

    pub fn eyes(self) -> &'static [Eye] {
        match self {
            AtlasLayout::Single => &[Eye::Left],
            _ => &Eye::BOTH,
        }
    }

    pub fn eye_rect(self, eye: Eye, atlas: Extent) -> Rect {
        let half = self.per_eye(atlas);
        let i = eye.index() as u32;
        match self {
            AtlasLayout::Single => Rect::full(atlas),
            AtlasLayout::SideBySide => Rect {
                x: half.width * i,
                y: 0,
                width: half.width,
                height: half.height,
            },
            AtlasLayout::TopBottom => Rect {
                x: 0,
                y: half.height * i,
                width: half.width,
                height: half.height,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn right_half_bounds_map_to_right_half_rect() {
        let b = Bounds {
            u_min: 0.5,
            v_min: 0.0,
            u_max: 1.0,
            v_max: 1.0,
        };
        let r = b.to_rect(Extent::new(4096, 2048));
        assert_eq!(
            r,
            Rect {
                x: 2048,
                y: 0,
                width: 2048,
                height: 2048
            }
        );
        assert!(!b.is_full());
    }

    #[test]
    fn flipped_full_bounds_count_as_full() {
        let b = Bounds {
            u_min: 0.0,
            v_min: 1.0,
            u_max: 1.0,
            v_max: 0.0,
        };
        assert!(b.is_full());
        assert_eq!(b.to_rect(Extent::new(100, 50)), Rect::full(Extent::new(100, 50)));
    }

    #[test]
    fn atlas_detection_uses_ratio() {
        assert_eq!(AtlasLayout::detect(Extent::new(4096, 2048), 1.7), AtlasLayout::SideBySide);
        assert_eq!(AtlasLayout::detect(Extent::new(2048, 4096), 1.7), AtlasLayout::TopBottom);
        assert_eq!(AtlasLayout::detect(Extent::new(1512, 1680), 1.7), AtlasLayout::Single);
        assert_eq!(AtlasLayout::detect(Extent::new(0, 0), 1.7), AtlasLayout::Single);
    }

    #[test]
    fn eye_rects_split_atlas() {
        let atlas = Extent::new(2000, 1000);
        let right = AtlasLayout::SideBySide.eye_rect(Eye::Right, atlas);
        assert_eq!(right.x, 1000);
        assert_eq!(right.extent(), Extent::new(1000, 1000));
        let bottom = AtlasLayout::TopBottom.eye_rect(Eye::Right, Extent::new(1000, 2000));
        assert_eq!((bottom.x, bottom.y), (0, 1000));
        assert_eq!(AtlasLayout::SideBySide.atlas(Extent::new(10, 20)), Extent::new(20, 20));
    }

    #[test]
    fn even_never_drops_below_two() {
        assert_eq!(Extent::new(1013, 1).even(), Extent::new(1012, 2));
    }

    #[test]
    fn viewport_scaling_moves_origin() {
        let vp = Viewport {
            top_left_x: 1512.0,
            width: 1512.0,
            height: 1680.0,
            max_depth: 1.0,
            ..Default::default()
        };
        let s = vp.scaled(0.5, 0.5);
        assert_eq!(s.top_left_x, 756.0);
        assert_eq!(s.width, 756.0);
        assert_eq!(s.height, 840.0);
        assert_eq!(s.max_depth, 1.0);
    }
}
