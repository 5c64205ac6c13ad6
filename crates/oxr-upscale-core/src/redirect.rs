//! Scene redirection and viewport clamping.
//!
//! Once per frame the scene color target is either swapped for a smaller
//! stand-in (and composited back when the host returns to the big target) or
//! left alone while its eye viewports are shrunk in place.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};

use crate::backend::{GpuDevice, ImageKey, UpscaleBackend};
use crate::classifier::{BindFlags, Format, ImageDesc};
use crate::error::GpuError;
use crate::geometry::{AtlasLayout, Extent, UvWindow, Viewport, DEFAULT_ATLAS_RATIO};
use crate::lock;
use crate::orchestrator::{EyeRequest, UpscaleOrchestrator};
use crate::settings::{EarlyUpscaleMode, Settings};

const CLAMP_LOG_BUDGET: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneThresholds {
    pub min_dim: u32,
    pub atlas_ratio: f32,
    /// Relative tolerance for "same size" checks.
    pub size_tolerance: f32,
    /// Absolute tolerance floor in pixels.
    pub min_tolerance_px: f32,
}

impl Default for SceneThresholds {
    fn default() -> Self {
        Self {
            min_dim: 1024,
            atlas_ratio: DEFAULT_ATLAS_RATIO,
            size_tolerance: 0.05,
            min_tolerance_px: 2.0,
        }
    }
}

impl SceneThresholds {
    pub fn approx(&self, a: f32, b: f32) -> bool {
        (a - b).abs() <= self.min_tolerance_px.max(b * self.size_tolerance)
    }

    pub fn approx_extent(&self, a: Extent, b: Extent) -> bool {
        self.approx(a.width as f32, b.width as f32) && self.approx(a.height as f32, b.height as f32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Immediate,
    Deferred,
}

/// Most recently bound target that looks like the VR eye scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneDescriptor {
    pub image: ImageKey,
    pub size: Extent,
    pub format: Format,
    pub samples: u32,
}

/// Whether a bound color target looks like the eye scene.
///
/// `display` is the per-eye display size and `predicted` its render size.
pub fn looks_like_scene(
    desc: &ImageDesc,
    display: Option<Extent>,
    predicted: Option<Extent>,
    t: &SceneThresholds,
) -> bool {
    if desc.sample_count != 1
        || !desc.bind.contains(BindFlags::RENDER_TARGET)
        || desc.width < t.min_dim
        || desc.height < t.min_dim
    {
        return false;
    }
    let size = desc.extent();
    let matches = |per_eye: Extent| {
        [AtlasLayout::Single, AtlasLayout::SideBySide, AtlasLayout::TopBottom]
            .iter()
            .any(|l| t.approx_extent(size, l.atlas(per_eye)))
    };
    if display.is_some_and(matches) || predicted.is_some_and(matches) {
        return true;
    }
    AtlasLayout::detect(size, t.atlas_ratio) != AtlasLayout::Single
}

/// Marks the threads currently inside engine work.
///
/// A thread that already holds a scope cannot enter again, so device calls the
/// engine issues itself are seen as busy. Other threads are unaffected; they
/// serialize on the session locks instead.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    owners: Mutex<Vec<ThreadId>>,
}

pub struct GuardScope<'a> {
    guard: &'a ReentrancyGuard,
    owner: ThreadId,
}

impl Drop for GuardScope<'_> {
    fn drop(&mut self) {
        lock(&self.guard.owners).retain(|id| *id != self.owner);
    }
}

impl ReentrancyGuard {
    pub const fn new() -> Self {
        Self {
            owners: Mutex::new(Vec::new()),
        }
    }

    /// `None` while the calling thread already holds a scope.
    pub fn enter(&self) -> Option<GuardScope<'_>> {
        let owner = thread::current().id();
        let mut owners = lock(&self.owners);
        if owners.contains(&owner) {
            return None;
        }
        owners.push(owner);
        Some(GuardScope { guard: self, owner })
    }

    /// True if the calling thread holds a scope.
    pub fn is_active(&self) -> bool {
        let owner = thread::current().id();
        lock(&self.owners).contains(&owner)
    }
}

/// Small stand-in for one big render target.
pub struct RedirectEntry<G: GpuDevice> {
    pub big: G::Image,
    pub small: G::Image,
    pub view: G::TargetView,
    pub size: Extent,
    pub format: Format,
}

impl<G: GpuDevice> Clone for RedirectEntry<G> {
    fn clone(&self) -> Self {
        Self {
            big: self.big.clone(),
            small: self.small.clone(),
            view: self.view.clone(),
            size: self.size,
            format: self.format,
        }
    }
}

/// Redirect targets keyed by the big image. Shared by every context.
pub struct RedirectCache<G: GpuDevice> {
    entries: Mutex<HashMap<ImageKey, RedirectEntry<G>>>,
}

impl<G: GpuDevice> Default for RedirectCache<G> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<G: GpuDevice> RedirectCache<G> {
    /// Cached entry for `big`, recreated only when size or format changed.
    pub fn get_or_create(
        &self,
        gpu: &G,
        big: &G::Image,
        desc: &ImageDesc,
        size: Extent,
    ) -> Result<RedirectEntry<G>, GpuError> {
        let key = gpu.image_key(big);
        let mut entries = lock(&self.entries);
        if let Some(entry) = entries.get(&key) {
            if entry.size == size && entry.format == desc.format {
                return Ok(entry.clone());
            }
        }
        entries.remove(&key);
        let small = gpu.create_image(&desc.redirect_target(size), false)?;
        let view = gpu.create_target_view(&small, 0)?;
        info!(
            big = format_args!("{}x{}", desc.width, desc.height),
            small = %size,
            format = desc.format.0,
            "redirect target created"
        );
        let entry = RedirectEntry {
            big: big.clone(),
            small,
            view,
            size,
            format: desc.format,
        };
        entries.insert(key, entry.clone());
        Ok(entry)
    }

    pub fn lookup(&self, key: ImageKey) -> Option<RedirectEntry<G>> {
        lock(&self.entries).get(&key).cloned()
    }

    /// Release every entry; returns how many there were.
    pub fn purge(&self) -> usize {
        let mut entries = lock(&self.entries);
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ActiveRedirect<G: GpuDevice> {
    big_key: ImageKey,
    big_view: G::TargetView,
    big_size: Extent,
    entry: RedirectEntry<G>,
    layout: AtlasLayout,
    scale: (f32, f32),
    /// The stand-in is the most recent bind.
    bound: bool,
}

struct FrameState<G: GpuDevice> {
    frame: u64,
    scene: Option<SceneDescriptor>,
    redirect: Option<ActiveRedirect<G>>,
    composited: bool,
    report: Option<CompositeReport>,
    clamp_logs: u32,
}

impl<G: GpuDevice> FrameState<G> {
    fn new(frame: u64) -> Self {
        Self {
            frame,
            scene: None,
            redirect: None,
            composited: false,
            report: None,
            clamp_logs: 0,
        }
    }
}

pub enum BindDecision<G: GpuDevice> {
    Forward,
    /// Bind `target` in place of the first view and set `viewports`.
    Substitute {
        target: G::TargetView,
        viewports: Vec<Viewport>,
    },
}

impl<G: GpuDevice> BindDecision<G> {
    pub fn is_forward(&self) -> bool {
        matches!(self, BindDecision::Forward)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositeReport {
    pub eyes: u32,
    pub upscaled: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectStatus {
    NotRedirected,
    AlreadyComposited,
    Composited(CompositeReport),
}

/// Auxiliary inputs picked up by the classifier.
pub struct AuxImages<'a, G: GpuDevice> {
    pub depth: Option<&'a G::Image>,
    pub motion_vectors: Option<&'a G::Image>,
}

impl<G: GpuDevice> Clone for AuxImages<'_, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<G: GpuDevice> Copy for AuxImages<'_, G> {}

impl<G: GpuDevice> Default for AuxImages<'_, G> {
    fn default() -> Self {
        Self {
            depth: None,
            motion_vectors: None,
        }
    }
}

pub struct SceneRedirectEngine<G: GpuDevice> {
    cache: RedirectCache<G>,
    frame: Mutex<FrameState<G>>,
    guard: ReentrancyGuard,
    last_scene: AtomicU64,
}

impl<G: GpuDevice> Default for SceneRedirectEngine<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: GpuDevice> SceneRedirectEngine<G> {
    pub fn new() -> Self {
        Self {
            cache: RedirectCache::default(),
            frame: Mutex::new(FrameState::new(0)),
            guard: ReentrancyGuard::new(),
            last_scene: AtomicU64::new(0),
        }
    }

    pub fn guard(&self) -> &ReentrancyGuard {
        &self.guard
    }

    pub fn cache(&self) -> &RedirectCache<G> {
        &self.cache
    }

    /// Forget everything that belonged to the previous frame.
    pub fn begin_frame(&self, frame: u64) {
        *lock(&self.frame) = FrameState::new(frame);
    }

    /// Drop cached targets and the frame state. Used on resize and device loss.
    pub fn purge(&self) {
        let n = self.cache.purge();
        let frame = lock(&self.frame).frame;
        *lock(&self.frame) = FrameState::new(frame);
        self.last_scene.store(0, Ordering::Release);
        if n > 0 {
            info!(entries = n, "redirect cache purged");
        }
    }

    pub fn active_scene(&self) -> Option<SceneDescriptor> {
        lock(&self.frame).scene
    }

    /// Size of the last scene target seen in any frame.
    pub fn last_scene_size(&self) -> Option<Extent> {
        Extent::unpack(self.last_scene.load(Ordering::Acquire))
    }

    pub fn redirected_this_frame(&self) -> bool {
        lock(&self.frame).redirect.is_some()
    }

    pub fn composited_this_frame(&self) -> bool {
        lock(&self.frame).composited
    }

    /// Outcome of this frame's composite, if one ran.
    pub fn composite_report(&self) -> Option<CompositeReport> {
        lock(&self.frame).report
    }

    /// Render-target bind on any context.
    #[allow(clippy::too_many_arguments)]
    pub fn on_bind_targets<B: UpscaleBackend<G>>(
        &self,
        gpu: &G,
        orch: &mut UpscaleOrchestrator<G, B>,
        aux: AuxImages<'_, G>,
        kind: ContextKind,
        first: Option<&G::TargetView>,
        viewports: &[Viewport],
        settings: &Settings,
        display: Option<Extent>,
    ) -> BindDecision<G> {
        let mut frame = lock(&self.frame);
        if let Some(active) = frame.redirect.as_mut() {
            active.bound = false;
        }
        let Some(first) = first else {
            return BindDecision::Forward;
        };
        let Some(image) = gpu.view_image(first) else {
            return BindDecision::Forward;
        };
        let key = gpu.image_key(&image);

        if frame.redirect.as_ref().is_some_and(|a| a.big_key == key) {
            if !frame.composited && kind == ContextKind::Immediate {
                let report = Self::composite(gpu, orch, aux, &mut frame);
                debug!(frame = frame.frame, eyes = report.eyes, "composite on rebind");
            }
            return BindDecision::Forward;
        }

        let desc = gpu.describe(&image);
        let t = &settings.scene;
        let predicted = display.map(|d| orch.compute_render_size_for_output(d));
        if looks_like_scene(&desc, display, predicted, t) {
            frame.scene = Some(SceneDescriptor {
                image: key,
                size: desc.extent(),
                format: desc.format,
                samples: desc.sample_count,
            });
            self.last_scene.store(desc.extent().pack(), Ordering::Release);
        }

        if !settings.early_mode_active(EarlyUpscaleMode::TargetRedirect)
            || frame.redirect.is_some()
            || frame.composited
        {
            return BindDecision::Forward;
        }
        let Some(scene) = frame.scene.filter(|s| s.image == key) else {
            return BindDecision::Forward;
        };

        let layout = AtlasLayout::detect(scene.size, t.atlas_ratio);
        let per_eye = display.unwrap_or_else(|| layout.per_eye(scene.size));
        let render = orch.compute_render_size_for_output(per_eye);
        let small = layout.atlas(render).min(scene.size);
        if small == scene.size || small.is_empty() {
            return BindDecision::Forward;
        }
        let entry = match self.cache.get_or_create(gpu, &image, &desc, small) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("redirect target unavailable: {}", e);
                return BindDecision::Forward;
            }
        };

        let scale = (
            small.width as f32 / scene.size.width as f32,
            small.height as f32 / scene.size.height as f32,
        );
        let scaled = viewports.iter().map(|v| v.scaled(scale.0, scale.1)).collect();
        debug!(
            frame = frame.frame,
            scene = %scene.size,
            small = %small,
            layout = ?layout,
            "scene redirected"
        );
        let target = entry.view.clone();
        frame.redirect = Some(ActiveRedirect {
            big_key: key,
            big_view: first.clone(),
            big_size: scene.size,
            entry,
            layout,
            scale,
            bound: true,
        });
        BindDecision::Substitute {
            target,
            viewports: scaled,
        }
    }

    /// Viewport set on any context. `None` means forward unchanged.
    pub fn on_set_viewports<B: UpscaleBackend<G>>(
        &self,
        orch: &UpscaleOrchestrator<G, B>,
        viewports: &[Viewport],
        settings: &Settings,
        display: Option<Extent>,
    ) -> Option<Vec<Viewport>> {
        if viewports.is_empty() {
            return None;
        }
        let mut frame = lock(&self.frame);

        if settings.early_mode_active(EarlyUpscaleMode::TargetRedirect) {
            let active = frame.redirect.as_ref().filter(|a| a.bound)?;
            let (sx, sy) = active.scale;
            return Some(viewports.iter().map(|v| v.scaled(sx, sy)).collect());
        }
        if !settings.early_mode_active(EarlyUpscaleMode::ViewportClamp) {
            return None;
        }

        let scene = frame.scene?;
        let t = &settings.scene;
        let target = display
            .unwrap_or_else(|| AtlasLayout::detect(scene.size, t.atlas_ratio).per_eye(scene.size));
        let render = orch.compute_render_size_for_output(target);
        if render == target {
            return None;
        }

        let mut clamped = 0u32;
        let out: Vec<Viewport> = viewports
            .iter()
            .map(|v| {
                if t.approx(v.width, target.width as f32) && t.approx(v.height, target.height as f32) {
                    clamped += 1;
                    Viewport {
                        width: render.width as f32,
                        height: render.height as f32,
                        ..*v
                    }
                } else {
                    *v
                }
            })
            .collect();
        if clamped == 0 {
            return None;
        }
        if frame.clamp_logs < CLAMP_LOG_BUDGET {
            frame.clamp_logs += 1;
            debug!(
                frame = frame.frame,
                clamped,
                target = %target,
                render = %render,
                "viewports clamped"
            );
        }
        Some(out)
    }

    /// Composite from the submission path if this frame redirected into `key`.
    ///
    /// Once any composite ran this frame the submitted content is already
    /// upscaled and is reported as such.
    pub fn composite_for_submit<B: UpscaleBackend<G>>(
        &self,
        gpu: &G,
        orch: &mut UpscaleOrchestrator<G, B>,
        aux: AuxImages<'_, G>,
        key: ImageKey,
    ) -> RedirectStatus {
        let mut frame = lock(&self.frame);
        if frame.composited {
            return RedirectStatus::AlreadyComposited;
        }
        if !frame.redirect.as_ref().is_some_and(|a| a.big_key == key) {
            return RedirectStatus::NotRedirected;
        }
        RedirectStatus::Composited(Self::composite(gpu, orch, aux, &mut frame))
    }

    /// Upscale each eye of the stand-in and write it into the big target.
    /// Falls back to a plain stretch of the eye when evaluate fails.
    fn composite<B: UpscaleBackend<G>>(
        gpu: &G,
        orch: &mut UpscaleOrchestrator<G, B>,
        aux: AuxImages<'_, G>,
        frame: &mut FrameState<G>,
    ) -> CompositeReport {
        frame.composited = true;
        let mut report = CompositeReport::default();
        let Some(active) = frame.redirect.as_ref() else {
            return report;
        };
        let small = &active.entry.small;
        let small_key = gpu.image_key(small);
        let small_size = active.entry.size;

        for &eye in active.layout.eyes() {
            let src = active.layout.eye_rect(eye, small_size);
            let dst = active.layout.eye_rect(eye, active.big_size);
            let result = orch.process_eye(
                gpu,
                EyeRequest {
                    eye,
                    color: small,
                    slice: 0,
                    region: src,
                    output_size: Some(dst.extent()),
                    depth: aux.depth,
                    motion_vectors: aux.motion_vectors,
                },
            );
            report.eyes += 1;
            let written = if gpu.image_key(&result) != small_key {
                report.upscaled += 1;
                gpu.blit(&result, 0, UvWindow::FULL, &active.big_view, dst)
            } else {
                gpu.blit(small, 0, src.uv_window(small_size), &active.big_view, dst)
            };
            if let Err(e) = written {
                warn!(eye = ?eye, "composite write failed: {}", e);
            }
        }
        frame.report = Some(report);
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::QualityTier;
    use crate::testing::{color_desc, FakeBackend, FakeGpu, FakeImage, FakeView, Op};

    fn orch(gpu: &FakeGpu) -> UpscaleOrchestrator<FakeGpu, FakeBackend> {
        let mut o = UpscaleOrchestrator::new(FakeBackend::default(), QualityTier::Quality, 0.0);
        assert!(o.init(gpu));
        o
    }

    fn redirect_settings() -> Settings {
        Settings {
            early_upscale: true,
            early_mode: EarlyUpscaleMode::TargetRedirect,
            ..Default::default()
        }
    }

    fn clamp_settings() -> Settings {
        Settings {
            early_upscale: true,
            early_mode: EarlyUpscaleMode::ViewportClamp,
            ..Default::default()
        }
    }

    fn vp(x: f32, w: f32, h: f32) -> Viewport {
        Viewport {
            top_left_x: x,
            top_left_y: 0.0,
            width: w,
            height: h,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    struct Scene {
        image: FakeImage,
        view: FakeView,
    }

    fn scene(gpu: &FakeGpu, w: u32, h: u32) -> Scene {
        let image = gpu.host_image(color_desc(w, h));
        let view = gpu.host_view(&image);
        Scene { image, view }
    }

    fn bind(
        engine: &SceneRedirectEngine<FakeGpu>,
        gpu: &FakeGpu,
        o: &mut UpscaleOrchestrator<FakeGpu, FakeBackend>,
        view: Option<&FakeView>,
        viewports: &[Viewport],
        settings: &Settings,
        display: Option<Extent>,
    ) -> BindDecision<FakeGpu> {
        engine.on_bind_targets(
            gpu,
            o,
            AuxImages::default(),
            ContextKind::Immediate,
            view,
            viewports,
            settings,
            display,
        )
    }

    #[test]
    fn scene_predicate() {
        let t = SceneThresholds::default();
        let display = Some(Extent::new(1512, 1680));
        assert!(looks_like_scene(&color_desc(3024, 1680), display, None, &t));
        assert!(looks_like_scene(&color_desc(1512, 1680), display, None, &t));
        assert!(looks_like_scene(&color_desc(4096, 2048), None, None, &t));
        assert!(!looks_like_scene(&color_desc(1600, 1600), None, None, &t));
        assert!(!looks_like_scene(&color_desc(1000, 2048), None, None, &t));
        let mut msaa = color_desc(3024, 1680);
        msaa.sample_count = 4;
        assert!(!looks_like_scene(&msaa, display, None, &t));
        let mut srv_only = color_desc(3024, 1680);
        srv_only.bind = BindFlags::SHADER_RESOURCE;
        assert!(!looks_like_scene(&srv_only, display, None, &t));
    }

    #[test]
    fn cache_reuses_until_size_or_format_changes() {
        let gpu = FakeGpu::new();
        let cache = RedirectCache::<FakeGpu>::default();
        let big = gpu.host_image(color_desc(3000, 3000));
        let desc = big.desc;

        let a = cache.get_or_create(&gpu, &big, &desc, Extent::new(2000, 2000)).unwrap();
        let b = cache.get_or_create(&gpu, &big, &desc, Extent::new(2000, 2000)).unwrap();
        assert_eq!(a.small.id, b.small.id);
        assert_eq!(gpu.creates(), 1);

        let c = cache.get_or_create(&gpu, &big, &desc, Extent::new(2000, 1800)).unwrap();
        assert_ne!(c.small.id, a.small.id);
        assert_eq!(gpu.creates(), 2);

        let mut hdr = desc;
        hdr.format = Format::R16G16B16A16_FLOAT;
        cache.get_or_create(&gpu, &big, &hdr, Extent::new(2000, 1800)).unwrap();
        assert_eq!(gpu.creates(), 3);
        assert_eq!(cache.len(), 1);

        let other = gpu.host_image(color_desc(3000, 3000));
        cache.get_or_create(&gpu, &other, &desc, Extent::new(2000, 1800)).unwrap();
        assert_eq!(gpu.creates(), 4);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn redirects_scene_once_per_frame() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);
        let vps = [vp(0.0, 1512.0, 1680.0), vp(1512.0, 1512.0, 1680.0)];

        engine.begin_frame(1);
        let d = bind(&engine, &gpu, &mut o, Some(&s.view), &vps, &settings, display);
        let BindDecision::Substitute { target, viewports } = d else {
            panic!("expected substitution");
        };
        assert_eq!(target.image.desc.extent(), Extent::new(2024, 1126));
        assert!((viewports[1].top_left_x - 1012.0).abs() < 0.01);
        assert!((viewports[1].width - 1012.0).abs() < 0.01);
        assert!((viewports[1].height - 1126.0).abs() < 0.01);
        assert!(engine.redirected_this_frame());

        let other = scene(&gpu, 3024, 1680);
        let d = bind(&engine, &gpu, &mut o, Some(&other.view), &vps, &settings, display);
        assert!(d.is_forward());
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn rebinding_big_target_composites_once() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);
        let post = scene(&gpu, 800, 600);

        engine.begin_frame(1);
        bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display);
        bind(&engine, &gpu, &mut o, Some(&post.view), &[], &settings, display);
        gpu.clear_ops();
        for _ in 0..5 {
            let d = bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display);
            assert!(d.is_forward());
        }
        assert!(engine.composited_this_frame());
        assert_eq!(o.backend().calls.len(), 2);
        let writes: Vec<_> = gpu
            .blits()
            .into_iter()
            .filter_map(|op| match op {
                Op::Blit { dst, rect, .. } if dst == s.image.id => Some(rect.x),
                _ => None,
            })
            .collect();
        assert_eq!(writes, vec![0, 1512]);
    }

    #[test]
    fn failed_evaluate_still_stretches_small_into_big() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        o.backend_mut().fail = true;
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);

        engine.begin_frame(1);
        let BindDecision::Substitute { target, .. } =
            bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display)
        else {
            panic!("expected substitution");
        };
        gpu.clear_ops();
        let status = engine.composite_for_submit(&gpu, &mut o, AuxImages::default(), s.image.id);
        assert_eq!(
            status,
            RedirectStatus::Composited(CompositeReport {
                eyes: 2,
                upscaled: 0
            })
        );
        let srcs: Vec<_> = gpu
            .blits()
            .into_iter()
            .filter_map(|op| match op {
                Op::Blit { src, dst, .. } if dst == s.image.id => Some(src),
                _ => None,
            })
            .collect();
        assert_eq!(srcs, vec![target.image.id, target.image.id]);
        assert_eq!(
            engine.composite_for_submit(&gpu, &mut o, AuxImages::default(), s.image.id),
            RedirectStatus::AlreadyComposited
        );
    }

    #[test]
    fn new_frame_allows_new_redirect_and_reuses_cache() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);

        for frame in 1..=3 {
            engine.begin_frame(frame);
            assert!(engine.active_scene().is_none());
            let d = bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display);
            assert!(!d.is_forward());
        }
        assert_eq!(engine.cache().len(), 1);
    }

    #[test]
    fn purge_after_resize_clears_cache_and_scene() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let s = scene(&gpu, 3000, 3000);

        engine.begin_frame(1);
        let d = bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, Some(Extent::new(3000, 3000)));
        assert!(!d.is_forward());
        assert_eq!(engine.cache().len(), 1);
        assert!(engine.active_scene().is_some());

        engine.purge();
        assert!(engine.cache().is_empty());
        assert!(engine.active_scene().is_none());
        assert!(engine.last_scene_size().is_none());

        let small_rt = scene(&gpu, 640, 480);
        bind(&engine, &gpu, &mut o, Some(&small_rt.view), &[], &settings, None);
        assert!(engine.active_scene().is_none());
    }

    #[test]
    fn viewport_clamp_only_touches_matching_viewports() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = clamp_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);

        engine.begin_frame(1);
        assert!(bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display).is_forward());

        let input = [
            vp(0.0, 1512.0, 1680.0),
            vp(1512.0, 1540.0, 1650.0),
            vp(0.0, 3024.0, 1680.0),
            vp(5.0, 512.0, 512.0),
        ];
        let out = engine.on_set_viewports(&o, &input, &settings, display).unwrap();
        assert_eq!((out[0].width, out[0].height), (1012.0, 1126.0));
        assert_eq!(out[1].top_left_x, 1512.0);
        assert_eq!((out[1].width, out[1].height), (1012.0, 1126.0));
        assert_eq!(out[2], input[2]);
        assert_eq!(out[3], input[3]);

        let untouched = [vp(0.0, 640.0, 480.0)];
        assert!(engine.on_set_viewports(&o, &untouched, &settings, display).is_none());
    }

    #[test]
    fn viewport_clamp_needs_active_scene() {
        let gpu = FakeGpu::new();
        let o = orch(&gpu);
        let engine = SceneRedirectEngine::<FakeGpu>::new();
        engine.begin_frame(1);
        let input = [vp(0.0, 1512.0, 1680.0)];
        let display = Some(Extent::new(1512, 1680));
        assert!(engine.on_set_viewports(&o, &input, &clamp_settings(), display).is_none());
    }

    #[test]
    fn redirect_mode_scales_viewports_while_stand_in_bound() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);
        let post = scene(&gpu, 800, 600);

        engine.begin_frame(1);
        bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display);
        let out = engine
            .on_set_viewports(&o, &[vp(1512.0, 1512.0, 1680.0)], &settings, display)
            .unwrap();
        assert!((out[0].top_left_x - 1012.0).abs() < 0.01);

        bind(&engine, &gpu, &mut o, Some(&post.view), &[], &settings, display);
        assert!(engine
            .on_set_viewports(&o, &[vp(0.0, 800.0, 600.0)], &settings, display)
            .is_none());
    }

    #[test]
    fn deferred_rebind_does_not_composite() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let settings = redirect_settings();
        let display = Some(Extent::new(1512, 1680));
        let s = scene(&gpu, 3024, 1680);

        engine.begin_frame(1);
        bind(&engine, &gpu, &mut o, Some(&s.view), &[], &settings, display);
        let d = engine.on_bind_targets(
            &gpu,
            &mut o,
            AuxImages::default(),
            ContextKind::Deferred,
            Some(&s.view),
            &[],
            &settings,
            display,
        );
        assert!(d.is_forward());
        assert!(!engine.composited_this_frame());
    }

    #[test]
    fn reentrancy_guard_blocks_only_the_owning_thread() {
        let guard = ReentrancyGuard::new();
        {
            let _scope = guard.enter().unwrap();
            assert!(guard.is_active());
            assert!(guard.enter().is_none());

            std::thread::scope(|s| {
                s.spawn(|| {
                    assert!(!guard.is_active());
                    let other = guard.enter();
                    assert!(other.is_some());
                    assert!(guard.is_active());
                });
            });
            assert!(guard.is_active());
        }
        assert!(!guard.is_active());
        assert!(guard.enter().is_some());
    }

    #[test]
    fn disabled_mode_forwards() {
        let gpu = FakeGpu::new();
        let mut o = orch(&gpu);
        let engine = SceneRedirectEngine::new();
        let s = scene(&gpu, 3024, 1680);
        engine.begin_frame(1);
        let d = bind(&engine, &gpu, &mut o, Some(&s.view), &[], &Settings::default(), None);
        assert!(d.is_forward());
        assert!(engine.active_scene().is_some());
        assert!(engine.cache().is_empty());
    }
}
