//! In-memory device and backend for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::{EvaluateParams, GpuDevice, ImageKey, UpscaleBackend};
use crate::classifier::{BindFlags, Format, ImageDesc};
use crate::error::GpuError;
use crate::geometry::{Extent, Eye, Rect, UvWindow};
use crate::quality::QualityTier;

#[derive(Debug)]
pub struct FakeImageInner {
    pub id: usize,
    pub desc: ImageDesc,
}

pub type FakeImage = Arc<FakeImageInner>;

#[derive(Debug, Clone)]
pub struct FakeView {
    pub image: FakeImage,
    pub slice: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Create {
        id: usize,
        desc: ImageDesc,
        zeroed: bool,
    },
    Blit {
        src: usize,
        window: UvWindow,
        dst: usize,
        rect: Rect,
    },
    Copy {
        dst: usize,
        slice: u32,
        x: u32,
        y: u32,
        src: usize,
        rect: Rect,
    },
}

/// Clones share state, so a test can keep a handle after moving one into a session.
#[derive(Default, Clone)]
pub struct FakeGpu {
    next: Arc<AtomicUsize>,
    pub ops: Arc<Mutex<Vec<Op>>>,
    pub fail_create: Arc<AtomicBool>,
}

pub fn color_desc(w: u32, h: u32) -> ImageDesc {
    ImageDesc {
        width: w,
        height: h,
        mip_levels: 1,
        array_size: 1,
        format: Format::R8G8B8A8_UNORM,
        sample_count: 1,
        bind: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
        misc: 0,
    }
}

impl FakeGpu {
    pub fn new() -> Self {
        Self {
            next: Arc::new(AtomicUsize::new(1)),
            ..Default::default()
        }
    }

    /// An image the "host" created; not recorded as an engine op.
    pub fn host_image(&self, desc: ImageDesc) -> FakeImage {
        Arc::new(FakeImageInner {
            id: self.next.fetch_add(1, Ordering::Relaxed).max(1),
            desc,
        })
    }

    pub fn host_view(&self, image: &FakeImage) -> FakeView {
        FakeView {
            image: image.clone(),
            slice: 0,
        }
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn creates(&self) -> usize {
        self.ops()
            .iter()
            .filter(|o| matches!(o, Op::Create { .. }))
            .count()
    }

    pub fn blits(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|o| matches!(o, Op::Blit { .. }))
            .collect()
    }

    pub fn copies(&self) -> Vec<Op> {
        self.ops()
            .into_iter()
            .filter(|o| matches!(o, Op::Copy { .. }))
            .collect()
    }
}

impl GpuDevice for FakeGpu {
    type Image = FakeImage;
    type TargetView = FakeView;

    fn image_key(&self, image: &FakeImage) -> ImageKey {
        image.id
    }

    fn describe(&self, image: &FakeImage) -> ImageDesc {
        image.desc
    }

    fn view_image(&self, view: &FakeView) -> Option<FakeImage> {
        Some(view.image.clone())
    }

    fn create_image(&self, desc: &ImageDesc, zeroed: bool) -> Result<FakeImage, GpuError> {
        if self.fail_create.load(Ordering::Relaxed) {
            return Err(GpuError::Create("fake failure".into()));
        }
        let image = self.host_image(*desc);
        self.ops.lock().unwrap().push(Op::Create {
            id: image.id,
            desc: *desc,
            zeroed,
        });
        Ok(image)
    }

    fn create_target_view(&self, image: &FakeImage, slice: u32) -> Result<FakeView, GpuError> {
        Ok(FakeView {
            image: image.clone(),
            slice,
        })
    }

    fn blit(
        &self,
        src: &FakeImage,
        _src_slice: u32,
        window: UvWindow,
        dst: &FakeView,
        dst_rect: Rect,
    ) -> Result<(), GpuError> {
        self.ops.lock().unwrap().push(Op::Blit {
            src: src.id,
            window,
            dst: dst.image.id,
            rect: dst_rect,
        });
        Ok(())
    }

    fn copy_region(
        &self,
        dst: &FakeImage,
        dst_slice: u32,
        x: u32,
        y: u32,
        src: &FakeImage,
        src_rect: Rect,
    ) -> Result<(), GpuError> {
        self.ops.lock().unwrap().push(Op::Copy {
            dst: dst.id,
            slice: dst_slice,
            x,
            y,
            src: src.id,
            rect: src_rect,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub eye: Eye,
    pub color: usize,
    pub depth: usize,
    pub motion_vectors: usize,
    pub output: usize,
    pub render: Extent,
    pub output_size: Extent,
    pub reset_history: bool,
}

#[derive(Default)]
pub struct FakeBackend {
    pub ready: bool,
    pub fail: bool,
    pub refuse_init: bool,
    pub optimal: Option<Extent>,
    pub quality: Option<QualityTier>,
    pub sharpness: Option<f32>,
    pub calls: Vec<Call>,
    pub inits: usize,
    pub shutdowns: usize,
    pub released: Vec<Eye>,
}

impl UpscaleBackend<FakeGpu> for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn init(&mut self, _gpu: &FakeGpu) -> bool {
        self.inits += 1;
        self.ready = !self.refuse_init;
        self.ready
    }

    fn shutdown(&mut self) {
        self.shutdowns += 1;
        self.ready = false;
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn set_quality(&mut self, tier: QualityTier) {
        self.quality = Some(tier);
    }

    fn set_sharpness(&mut self, value: f32) {
        self.sharpness = Some(value);
    }

    fn optimal_render_size(&self, _output: Extent, _tier: QualityTier) -> Option<Extent> {
        self.optimal
    }

    fn process_eye(&mut self, _gpu: &FakeGpu, p: &EvaluateParams<'_, FakeGpu>) -> FakeImage {
        self.calls.push(Call {
            eye: p.eye,
            color: p.color.id,
            depth: p.depth.id,
            motion_vectors: p.motion_vectors.id,
            output: p.output.id,
            render: p.render,
            output_size: p.output_size,
            reset_history: p.reset_history,
        });
        if self.fail {
            p.color.clone()
        } else {
            p.output.clone()
        }
    }

    fn release_eye(&mut self, eye: Eye) {
        self.released.push(eye);
    }
}
