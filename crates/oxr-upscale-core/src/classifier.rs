//! Fingerprinting of host-created images.
//!
//! The host never says which of its buffers hold depth or motion vectors, so
//! candidates are picked from format, bind usage and size alone.

use std::ops::{BitAnd, BitOr, Not};

use crate::geometry::Extent;

/// DXGI format value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Format(pub u32);

impl Format {
    pub const UNKNOWN: Format = Format(0);
    pub const R32G32B32A32_FLOAT: Format = Format(2);
    pub const R16G16B16A16_TYPELESS: Format = Format(9);
    pub const R16G16B16A16_FLOAT: Format = Format(10);
    pub const R32G8X24_TYPELESS: Format = Format(19);
    pub const D32_FLOAT_S8X24_UINT: Format = Format(20);
    pub const R32_FLOAT_X8X24_TYPELESS: Format = Format(21);
    pub const X32_TYPELESS_G8X24_UINT: Format = Format(22);
    pub const R10G10B10A2_TYPELESS: Format = Format(23);
    pub const R10G10B10A2_UNORM: Format = Format(24);
    pub const R11G11B10_FLOAT: Format = Format(26);
    pub const R8G8B8A8_TYPELESS: Format = Format(27);
    pub const R8G8B8A8_UNORM: Format = Format(28);
    pub const R8G8B8A8_UNORM_SRGB: Format = Format(29);
    pub const R16G16_TYPELESS: Format = Format(33);
    pub const R16G16_FLOAT: Format = Format(34);
    pub const R32_TYPELESS: Format = Format(39);
    pub const D32_FLOAT: Format = Format(40);
    pub const R32_FLOAT: Format = Format(41);
    pub const R24G8_TYPELESS: Format = Format(44);
    pub const D24_UNORM_S8_UINT: Format = Format(45);
    pub const R24_UNORM_X8_TYPELESS: Format = Format(46);
    pub const X24_TYPELESS_G8_UINT: Format = Format(47);
    pub const R16_TYPELESS: Format = Format(53);
    pub const R16_FLOAT: Format = Format(54);
    pub const D16_UNORM: Format = Format(55);
    pub const B8G8R8A8_UNORM: Format = Format(87);
    pub const B8G8R8A8_TYPELESS: Format = Format(90);
    pub const B8G8R8A8_UNORM_SRGB: Format = Format(91);

    /// Depth formats and the typeless families that back depth buffers.
    pub fn is_depth(self) -> bool {
        matches!(
            self,
            Format::D32_FLOAT
                | Format::D32_FLOAT_S8X24_UINT
                | Format::D24_UNORM_S8_UINT
                | Format::D16_UNORM
                | Format::R32_TYPELESS
                | Format::R24G8_TYPELESS
                | Format::R16_TYPELESS
                | Format::R32G8X24_TYPELESS
                | Format::R24_UNORM_X8_TYPELESS
                | Format::X24_TYPELESS_G8_UINT
                | Format::R32_FLOAT_X8X24_TYPELESS
                | Format::X32_TYPELESS_G8X24_UINT
        )
    }

    pub fn is_two_channel_half(self) -> bool {
        self == Format::R16G16_FLOAT
    }

    /// Most common typed equivalent, for views and render targets.
    pub fn typed(self) -> Format {
        match self {
            Format::R8G8B8A8_TYPELESS => Format::R8G8B8A8_UNORM,
            Format::B8G8R8A8_TYPELESS => Format::B8G8R8A8_UNORM,
            Format::R10G10B10A2_TYPELESS => Format::R10G10B10A2_UNORM,
            Format::R16G16B16A16_TYPELESS => Format::R16G16B16A16_FLOAT,
            Format::R16G16_TYPELESS => Format::R16G16_FLOAT,
            Format::R32_TYPELESS => Format::R32_FLOAT,
            Format::R16_TYPELESS => Format::R16_FLOAT,
            other => other,
        }
    }
}

/// `D3D11_BIND_FLAG` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindFlags(pub u32);

impl BindFlags {
    pub const NONE: BindFlags = BindFlags(0);
    pub const SHADER_RESOURCE: BindFlags = BindFlags(0x8);
    pub const RENDER_TARGET: BindFlags = BindFlags(0x20);
    pub const DEPTH_STENCIL: BindFlags = BindFlags(0x40);
    pub const UNORDERED_ACCESS: BindFlags = BindFlags(0x80);

    pub fn contains(self, other: BindFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for BindFlags {
    type Output = BindFlags;
    fn bitor(self, rhs: BindFlags) -> BindFlags {
        BindFlags(self.0 | rhs.0)
    }
}

impl BitAnd for BindFlags {
    type Output = BindFlags;
    fn bitand(self, rhs: BindFlags) -> BindFlags {
        BindFlags(self.0 & rhs.0)
    }
}

impl Not for BindFlags {
    type Output = BindFlags;
    fn not(self) -> BindFlags {
        BindFlags(!self.0)
    }
}

pub const MISC_SHARED: u32 = 0x2;

/// Declared shape of a 2D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub format: Format,
    pub sample_count: u32,
    pub bind: BindFlags,
    pub misc: u32,
}

impl ImageDesc {
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Single-sampled color target the orchestrator renders into.
    pub fn render_target(size: Extent, format: Format) -> ImageDesc {
        ImageDesc {
            width: size.width,
            height: size.height,
            mip_levels: 1,
            array_size: 1,
            format,
            sample_count: 1,
            bind: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
            misc: 0,
        }
    }

    /// Small stand-in for this image at `size`, used for scene redirection.
    pub fn redirect_target(&self, size: Extent) -> ImageDesc {
        ImageDesc {
            width: size.width,
            height: size.height,
            mip_levels: 1,
            array_size: 1,
            sample_count: 1,
            bind: (self.bind | BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE)
                & !BindFlags::DEPTH_STENCIL,
            misc: self.misc & !MISC_SHARED,
            ..*self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierThresholds {
    pub motion_min_ratio: f32,
    pub motion_max_ratio: f32,
    pub depth_min_dim: u32,
    pub depth_min_ratio: f32,
    pub depth_max_ratio: f32,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            motion_min_ratio: 0.25,
            motion_max_ratio: 1.01,
            depth_min_dim: 512,
            depth_min_ratio: 0.35,
            depth_max_ratio: 0.95,
        }
    }
}

/// Sizes known at the time an image is created.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SizeHints {
    pub display: Option<Extent>,
    pub scene: Option<Extent>,
}

impl SizeHints {
    fn target(&self) -> Option<Extent> {
        self.display.or(self.scene)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    None,
    MotionVectorCandidate,
    DepthCandidate,
}

fn ratio_in(value: u32, of: u32, lo: f32, hi: f32) -> bool {
    if of == 0 {
        return false;
    }
    let r = value as f32 / of as f32;
    r >= lo && r <= hi
}

fn within_band(size: Extent, of: Extent, lo: f32, hi: f32) -> bool {
    ratio_in(size.width, of.width, lo, hi) && ratio_in(size.height, of.height, lo, hi)
}

fn is_motion_vectors(desc: &ImageDesc, hints: &SizeHints, t: &ClassifierThresholds) -> bool {
    if !desc.format.is_two_channel_half()
        || !desc
            .bind
            .contains(BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE)
        || desc.mip_levels != 1
        || desc.array_size != 1
        || desc.sample_count != 1
    {
        return false;
    }
    let size = desc.extent();
    match (hints.display, hints.scene) {
        (Some(display), scene) => {
            within_band(size, display, t.motion_min_ratio, t.motion_max_ratio)
                || scene.is_some_and(|s| {
                    within_band(size, s, t.motion_min_ratio, t.motion_max_ratio)
                })
        }
        (None, Some(scene)) => {
            size == scene || size == Extent::new(scene.width / 2, scene.height)
        }
        (None, None) => true,
    }
}

fn is_depth(desc: &ImageDesc, hints: &SizeHints, t: &ClassifierThresholds) -> bool {
    if !desc.bind.contains(BindFlags::DEPTH_STENCIL)
        || !desc.format.is_depth()
        || desc.sample_count != 1
        || desc.width < t.depth_min_dim
        || desc.height < t.depth_min_dim
    {
        return false;
    }
    match hints.target() {
        Some(target) => within_band(desc.extent(), target, t.depth_min_ratio, t.depth_max_ratio),
        None => true,
    }
}

/// Decide what a freshly created image looks like. Pure.
pub fn classify(desc: &ImageDesc, hints: &SizeHints, t: &ClassifierThresholds) -> Classification {
    if is_motion_vectors(desc, hints, t) {
        Classification::MotionVectorCandidate
    } else if is_depth(desc, hints, t) {
        Classification::DepthCandidate
    } else {
        Classification::None
    }
}

const IDEAL_DEPTH_RATIO: f32 = 0.66;
const DEPTH_SCORE_MARGIN: f32 = 0.05;

fn depth_score(desc: &ImageDesc, target: Option<Extent>) -> f32 {
    match target {
        Some(t) if t.width > 0 => (desc.width as f32 / t.width as f32 - IDEAL_DEPTH_RATIO).abs(),
        _ => 0.0,
    }
}

/// Motion-vector and depth images picked up from the host.
///
/// Holding an image keeps a reference to it; replacing one releases the old.
pub struct CandidateRegistry<H> {
    motion_vectors: Option<(H, ImageDesc)>,
    depth: Option<(H, ImageDesc, f32)>,
}

impl<H> Default for CandidateRegistry<H> {
    fn default() -> Self {
        Self {
            motion_vectors: None,
            depth: None,
        }
    }
}

impl<H> CandidateRegistry<H> {
    /// Record a classified image. Returns `true` if it became the current candidate.
    ///
    /// The most recent motion-vector match replaces any earlier one; depth
    /// candidates only replace a worse-scoring predecessor.
    pub fn register(
        &mut self,
        class: Classification,
        image: H,
        desc: ImageDesc,
        target: Option<Extent>,
    ) -> bool {
        match class {
            Classification::None => false,
            Classification::MotionVectorCandidate => {
                self.motion_vectors = Some((image, desc));
                true
            }
            Classification::DepthCandidate => {
                let score = depth_score(&desc, target);
                let better = match &self.depth {
                    None => true,
                    Some((_, current, current_score)) => {
                        score + DEPTH_SCORE_MARGIN < *current_score
                            || ((score - current_score).abs() <= DEPTH_SCORE_MARGIN
                                && desc.width > current.width)
                    }
                };
                if better {
                    self.depth = Some((image, desc, score));
                }
                better
            }
        }
    }

    pub fn motion_vectors(&self) -> Option<&H> {
        self.motion_vectors.as_ref().map(|(h, _)| h)
    }

    pub fn depth(&self) -> Option<&H> {
        self.depth.as_ref().map(|(h, _, _)| h)
    }

    pub fn clear(&mut self) {
        self.motion_vectors = None;
        self.depth = None;
    }
}
