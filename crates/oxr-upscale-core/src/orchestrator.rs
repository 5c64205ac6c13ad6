use tracing::{debug, error, info, warn};

use crate::backend::{EvaluateParams, GpuDevice, UpscaleBackend};
use crate::classifier::{BindFlags, Format, ImageDesc};
use crate::error::GpuError;
use crate::geometry::{Extent, Eye, Rect, MAX_EYE_DIM};
use crate::quality::{render_size_for_output, QualityTier};

const REALLOCATE_EVERY: u32 = 10;
const DISABLE_AFTER: u32 = 100;

/// One eye's work item.
pub struct EyeRequest<'a, G: GpuDevice> {
    pub eye: Eye,
    pub color: &'a G::Image,
    pub slice: u32,
    /// Where the eye sits inside `color`.
    pub region: Rect,
    /// Display size of the eye; `region`'s size when unknown.
    pub output_size: Option<Extent>,
    pub depth: Option<&'a G::Image>,
    pub motion_vectors: Option<&'a G::Image>,
}

struct EyeContext<G: GpuDevice> {
    output: Option<G::Image>,
    output_size: Extent,
    output_format: Format,
    scratch: Option<(G::Image, G::TargetView)>,
    scratch_format: Format,
    render: Extent,
    reset_history: bool,
}

impl<G: GpuDevice> EyeContext<G> {
    fn new() -> Self {
        Self {
            output: None,
            output_size: Extent::default(),
            output_format: Format::UNKNOWN,
            scratch: None,
            scratch_format: Format::UNKNOWN,
            render: Extent::default(),
            reset_history: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Detailed,
    Quiet,
    Reallocate,
    Disable,
}

/// Escalation for consecutive evaluate failures.
#[derive(Debug, Default)]
pub struct FailurePolicy {
    consecutive: u32,
    disabled: bool,
}

impl FailurePolicy {
    pub fn record_failure(&mut self) -> FailureAction {
        self.consecutive += 1;
        if self.consecutive >= DISABLE_AFTER {
            self.disabled = true;
            FailureAction::Disable
        } else if self.consecutive == 1 {
            FailureAction::Detailed
        } else if self.consecutive % REALLOCATE_EVERY == 0 {
            FailureAction::Reallocate
        } else {
            FailureAction::Quiet
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FrameToken {
    frame: u64,
    abandoned: bool,
}

/// Per-eye upscale pipeline in front of an [`UpscaleBackend`].
pub struct UpscaleOrchestrator<G: GpuDevice, B: UpscaleBackend<G>> {
    backend: B,
    eyes: [EyeContext<G>; 2],
    motion_placeholder: Option<(Extent, G::Image)>,
    depth_placeholder: Option<(Extent, G::Image)>,
    failures: FailurePolicy,
    quality: QualityTier,
    sharpness: f32,
    token: FrameToken,
    initialized: bool,
}

impl<G: GpuDevice, B: UpscaleBackend<G>> UpscaleOrchestrator<G, B> {
    pub fn new(backend: B, quality: QualityTier, sharpness: f32) -> Self {
        Self {
            backend,
            eyes: [EyeContext::new(), EyeContext::new()],
            motion_placeholder: None,
            depth_placeholder: None,
            failures: FailurePolicy::default(),
            quality,
            sharpness,
            token: FrameToken::default(),
            initialized: false,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn init(&mut self, gpu: &G) -> bool {
        if self.failures.is_disabled() {
            return false;
        }
        if self.initialized && self.backend.is_ready() {
            return true;
        }
        if !self.backend.init(gpu) {
            warn!(backend = self.backend.name(), "upscale backend init failed");
            return false;
        }
        self.backend.set_quality(self.quality);
        self.backend.set_sharpness(self.sharpness);
        self.initialized = true;
        info!(
            backend = self.backend.name(),
            quality = self.quality.name(),
            sharpness = self.sharpness,
            "upscale backend initialized"
        );
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_disabled(&self) -> bool {
        self.failures.is_disabled()
    }

    pub fn is_ready(&self) -> bool {
        self.initialized && !self.failures.is_disabled() && self.backend.is_ready()
    }

    pub fn quality(&self) -> QualityTier {
        self.quality
    }

    pub fn compute_render_size_for_output(&self, output: Extent) -> Extent {
        let optimal = self.backend.optimal_render_size(output, self.quality);
        render_size_for_output(output, self.quality, optimal)
    }

    /// Start a new in-flight token; clears a previous abandonment.
    pub fn begin_frame(&mut self, frame: u64) {
        self.token = FrameToken {
            frame,
            abandoned: false,
        };
    }

    pub fn frame_abandoned(&self) -> bool {
        self.token.abandoned
    }

    pub fn set_quality(&mut self, tier: QualityTier) {
        if tier == self.quality {
            return;
        }
        info!(from = self.quality.name(), to = tier.name(), "quality changed");
        self.quality = tier;
        self.backend.set_quality(tier);
        self.reset_history();
    }

    pub fn set_sharpness(&mut self, value: f32) {
        self.sharpness = value;
        self.backend.set_sharpness(value);
    }

    pub fn reset_history(&mut self) {
        for eye in &mut self.eyes {
            eye.reset_history = true;
        }
    }

    /// Drop every size-dependent image.
    pub fn release_resources(&mut self) {
        self.eyes = [EyeContext::new(), EyeContext::new()];
        self.motion_placeholder = None;
        self.depth_placeholder = None;
    }

    pub fn shutdown(&mut self) {
        self.release_resources();
        if self.initialized {
            self.backend.shutdown();
            info!(backend = self.backend.name(), "upscale backend shut down");
        }
        self.initialized = false;
        self.failures = FailurePolicy::default();
        self.token = FrameToken::default();
    }

    /// Upscale one eye. Returns the eye's output image, or `req.color` on any failure.
    pub fn process_eye(&mut self, gpu: &G, req: EyeRequest<'_, G>) -> G::Image {
        if !self.is_ready() || self.token.abandoned {
            return req.color.clone();
        }
        let i = req.eye.index();
        match self.evaluate(gpu, &req) {
            Ok(Some(image)) => {
                self.failures.record_success();
                self.eyes[i].reset_history = false;
                image
            }
            Ok(None) => {
                self.on_failure(req.eye, "backend returned its input");
                req.color.clone()
            }
            Err(e) => {
                self.on_failure(req.eye, &e.to_string());
                req.color.clone()
            }
        }
    }

    fn evaluate(&mut self, gpu: &G, req: &EyeRequest<'_, G>) -> Result<Option<G::Image>, GpuError> {
        let input = gpu.describe(req.color);
        let requested = req
            .output_size
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| req.region.extent());
        let output = Extent::new(
            requested.width.min(MAX_EYE_DIM),
            requested.height.min(MAX_EYE_DIM),
        )
        .even();
        let render = self.compute_render_size_for_output(output);
        let format = input.format.typed();

        let eye = &mut self.eyes[req.eye.index()];
        let output_image = match &eye.output {
            Some(image) if eye.output_size == output && eye.output_format == format => image.clone(),
            _ => {
                eye.output = None;
                let image = gpu.create_image(&ImageDesc::render_target(output, format), false)?;
                info!(
                    eye = ?req.eye,
                    output = %output,
                    render = %render,
                    "eye output created"
                );
                eye.output = Some(image.clone());
                eye.output_size = output;
                eye.output_format = format;
                eye.reset_history = true;
                image
            }
        };
        if eye.render != render {
            eye.reset_history = true;
        }

        let direct = req.slice == 0
            && input.array_size <= 1
            && input.sample_count <= 1
            && req.region.covers(input.extent())
            && input.extent() == render;
        let color = if direct {
            req.color.clone()
        } else {
            let (scratch, view) = match &eye.scratch {
                Some(pair) if eye.render == render && eye.scratch_format == format => pair.clone(),
                _ => {
                    eye.scratch = None;
                    let image = gpu.create_image(&ImageDesc::render_target(render, format), false)?;
                    let view = gpu.create_target_view(&image, 0)?;
                    eye.scratch = Some((image.clone(), view.clone()));
                    eye.scratch_format = format;
                    (image, view)
                }
            };
            gpu.blit(
                req.color,
                req.slice,
                req.region.uv_window(input.extent()),
                &view,
                Rect::full(render),
            )?;
            scratch
        };
        eye.render = render;
        let reset_history = eye.reset_history;

        let motion_vectors = match req.motion_vectors {
            Some(mv) => mv.clone(),
            None => placeholder(gpu, &mut self.motion_placeholder, render, Format::R16G16_FLOAT)?,
        };
        let depth = match req.depth.filter(|d| {
            let desc = gpu.describe(d);
            desc.extent() == render && desc.sample_count == 1
        }) {
            Some(d) => d.clone(),
            None => placeholder(gpu, &mut self.depth_placeholder, render, Format::R32_FLOAT)?,
        };

        let params = EvaluateParams {
            eye: req.eye,
            color: &color,
            depth: &depth,
            motion_vectors: &motion_vectors,
            output: &output_image,
            render,
            output_size: output,
            reset_history,
        };
        let result = self.backend.process_eye(gpu, &params);
        let ok = gpu.image_key(&result) == gpu.image_key(&output_image);
        Ok(ok.then_some(result))
    }

    fn on_failure(&mut self, eye: Eye, reason: &str) {
        self.token.abandoned = true;
        let count = self.failures.consecutive() + 1;
        match self.failures.record_failure() {
            FailureAction::Detailed => {
                warn!(eye = ?eye, frame = self.token.frame, "upscale evaluate failed: {}", reason)
            }
            FailureAction::Quiet => debug!(eye = ?eye, count, "upscale evaluate failed"),
            FailureAction::Reallocate => {
                warn!(eye = ?eye, count, "repeated evaluate failures, reallocating eye resources");
                self.eyes[eye.index()] = EyeContext::new();
                self.backend.release_eye(eye);
            }
            FailureAction::Disable => {
                error!(count, "upscaling disabled after repeated evaluate failures");
                self.release_resources();
            }
        }
    }
}

/// Zero-filled stand-in, cached per size.
fn placeholder<G: GpuDevice>(
    gpu: &G,
    slot: &mut Option<(Extent, G::Image)>,
    size: Extent,
    format: Format,
) -> Result<G::Image, GpuError> {
    if let Some((cached, image)) = slot {
        if *cached == size {
            return Ok(image.clone());
        }
    }
    *slot = None;
    let desc = ImageDesc {
        bind: BindFlags::SHADER_RESOURCE,
        ..ImageDesc::render_target(size, format)
    };
    let image = gpu.create_image(&desc, true)?;
    debug!(size = %size, format = format.0, "zero placeholder created");
    *slot = Some((size, image.clone()));
    Ok(image)
}
