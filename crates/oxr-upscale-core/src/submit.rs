use crate::backend::GpuDevice;
use crate::classifier::{BindFlags, ImageDesc};
use crate::error::GpuError;
use crate::geometry::{Bounds, Extent, Eye, Rect, UvWindow};

/// One compositor submission, already unpacked from its payload.
pub struct SubmitRequest<'a, G: GpuDevice> {
    pub eye: Eye,
    pub color: &'a G::Image,
    /// Array slice of `color` (0 for the plain submission entry point).
    pub slice: u32,
    pub bounds: Option<Bounds>,
    pub depth: Option<&'a G::Image>,
    /// Per-eye size recommended by the VR runtime.
    pub recommended: Option<Extent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Disabled,
    /// Device, backend or hooks not there yet.
    NotReady,
    /// The redirected scene was composited from this submission.
    Composited,
    /// A composite already wrote upscaled content this frame.
    AlreadyComposited,
    /// Evaluate failed or the output gate was closed.
    PassedThrough,
    Copied,
    Stretched,
    Incompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyBack {
    Exact,
    Stretch,
    Skip,
}

/// How the upscaled `result` can be written into `region` of `dest`.
pub fn copy_back_strategy(result: &ImageDesc, dest: &ImageDesc, region: Rect) -> CopyBack {
    if result.sample_count != 1 || dest.sample_count != 1 || region.extent().is_empty() {
        return CopyBack::Skip;
    }
    if result.extent() == region.extent() && result.format.typed() == dest.format.typed() {
        CopyBack::Exact
    } else if dest.bind.contains(BindFlags::RENDER_TARGET) {
        CopyBack::Stretch
    } else {
        CopyBack::Skip
    }
}

/// Write `result` over the eye's region of the submitted image.
pub fn write_back<G: GpuDevice>(
    gpu: &G,
    result: &G::Image,
    dest: &G::Image,
    slice: u32,
    region: Rect,
) -> Result<CopyBack, GpuError> {
    let result_desc = gpu.describe(result);
    let dest_desc = gpu.describe(dest);
    let strategy = copy_back_strategy(&result_desc, &dest_desc, region);
    match strategy {
        CopyBack::Exact => gpu.copy_region(
            dest,
            slice,
            region.x,
            region.y,
            result,
            Rect::full(result_desc.extent()),
        )?,
        CopyBack::Stretch => {
            let view = gpu.create_target_view(dest, slice)?;
            gpu.blit(result, 0, UvWindow::FULL, &view, region)?;
        }
        CopyBack::Skip => {}
    }
    Ok(strategy)
}
