use crate::classifier::ImageDesc;
use crate::error::GpuError;
use crate::geometry::{Extent, Eye, Rect, UvWindow};
use crate::quality::QualityTier;

/// Identity of an image, stable for as long as it is referenced.
pub type ImageKey = usize;

/// Image operations the engine needs from the host device.
///
/// `Image` and `TargetView` are owning, reference-counted handles: cloning
/// adds a reference and dropping releases it.
pub trait GpuDevice {
    type Image: Clone;
    type TargetView: Clone;

    fn image_key(&self, image: &Self::Image) -> ImageKey;
    fn describe(&self, image: &Self::Image) -> ImageDesc;
    fn view_image(&self, view: &Self::TargetView) -> Option<Self::Image>;

    fn create_image(&self, desc: &ImageDesc, zeroed: bool) -> Result<Self::Image, GpuError>;
    fn create_target_view(&self, image: &Self::Image, slice: u32) -> Result<Self::TargetView, GpuError>;

    /// Linear-filtered copy of `window` of `src` into `dst_rect` of the view's image.
    fn blit(
        &self,
        src: &Self::Image,
        src_slice: u32,
        window: UvWindow,
        dst: &Self::TargetView,
        dst_rect: Rect,
    ) -> Result<(), GpuError>;

    /// Exact copy of `src_rect` of `src` to (`x`, `y`) in `dst_slice` of `dst`.
    fn copy_region(
        &self,
        dst: &Self::Image,
        dst_slice: u32,
        x: u32,
        y: u32,
        src: &Self::Image,
        src_rect: Rect,
    ) -> Result<(), GpuError>;
}

/// Inputs of one per-eye evaluation.
pub struct EvaluateParams<'a, G: GpuDevice> {
    pub eye: Eye,
    pub color: &'a G::Image,
    pub depth: &'a G::Image,
    pub motion_vectors: &'a G::Image,
    pub output: &'a G::Image,
    pub render: Extent,
    pub output_size: Extent,
    pub reset_history: bool,
}

/// Vendor upscaler.
pub trait UpscaleBackend<G: GpuDevice> {
    fn name(&self) -> &str;
    fn init(&mut self, gpu: &G) -> bool;
    fn shutdown(&mut self);
    fn is_ready(&self) -> bool;
    fn set_quality(&mut self, tier: QualityTier);
    fn set_sharpness(&mut self, value: f32);

    /// Backend-preferred render size for `output`, when it has one.
    fn optimal_render_size(&self, _output: Extent, _tier: QualityTier) -> Option<Extent> {
        None
    }

    /// Returns `params.output` on success and `params.color` on failure.
    fn process_eye(&mut self, gpu: &G, params: &EvaluateParams<'_, G>) -> G::Image;

    /// Drop any per-eye feature state; the next evaluate recreates it.
    fn release_eye(&mut self, _eye: Eye) {}
}
