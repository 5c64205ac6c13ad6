//! The one object every hook talks to.
//!
//! A `Session` owns the device binding, per-eye display sizes, classified
//! candidates, the redirect engine and the orchestrator. Its lifecycle is
//! explicit: [`Session::attach_device`] when a swap chain is first seen,
//! [`Session::teardown`] on resize, [`Session::on_device_lost`] when the device goes away, [`Session::shutdown`] on unload.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, info, warn};

use crate::backend::{GpuDevice, UpscaleBackend};
use crate::classifier::{classify, CandidateRegistry, Classification, ImageDesc, SizeHints};
use crate::display::{eye_region, DisplaySizes};
use crate::geometry::{Eye, Viewport};
use crate::orchestrator::{EyeRequest, UpscaleOrchestrator};
use crate::quality::sampler_bias_override;
use crate::readiness::{output_gate, Readiness, ReadinessEvent};
use crate::redirect::{
    AuxImages, BindDecision, CompositeReport, ContextKind, RedirectStatus, SceneRedirectEngine,
};
use crate::settings::{EarlyUpscaleMode, Settings};
use crate::submit::{write_back, CopyBack, SubmitOutcome, SubmitRequest};
use crate::{lock, LogOnce};

const PROBE_EVERY: u64 = 300;

/// Settings UI driven once per presented frame.
pub trait Overlay {
    /// Returns new settings when the user changed something.
    fn on_frame(&mut self, dt: f32, settings: &Settings) -> Option<Settings>;
    fn shutdown(&mut self);
}

struct RenderState<G: GpuDevice, B: UpscaleBackend<G>> {
    gpu: Option<G>,
    orchestrator: UpscaleOrchestrator<G, B>,
}

pub struct Session<G: GpuDevice, B: UpscaleBackend<G>> {
    settings: Mutex<Settings>,
    readiness: Readiness,
    display: DisplaySizes,
    candidates: Mutex<CandidateRegistry<G::Image>>,
    redirect: SceneRedirectEngine<G>,
    render: Mutex<RenderState<G, B>>,
    installed: AtomicBool,
    frame: AtomicU64,
    submits: AtomicU64,
    copy_skip: LogOnce,
}

impl<G: GpuDevice, B: UpscaleBackend<G>> Session<G, B> {
    pub fn new(settings: Settings, backend: B) -> Self {
        let orchestrator =
            UpscaleOrchestrator::new(backend, settings.quality, settings.effective_sharpness());
        Self {
            settings: Mutex::new(settings),
            readiness: Readiness::new(),
            display: DisplaySizes::default(),
            candidates: Mutex::new(CandidateRegistry::default()),
            redirect: SceneRedirectEngine::new(),
            render: Mutex::new(RenderState {
                gpu: None,
                orchestrator,
            }),
            installed: AtomicBool::new(false),
            frame: AtomicU64::new(0),
            submits: AtomicU64::new(0),
            copy_skip: LogOnce::new(),
        }
    }

    pub fn settings(&self) -> Settings {
        *lock(&self.settings)
    }

    /// Replace the settings and push what changed into the upscaler.
    pub fn apply_settings(&self, new: Settings) {
        let old = std::mem::replace(&mut *lock(&self.settings), new);
        if old == new {
            return;
        }
        let mut render = lock(&self.render);
        let orch = &mut render.orchestrator;
        orch.set_quality(new.quality);
        if old.effective_sharpness() != new.effective_sharpness() {
            orch.set_sharpness(new.effective_sharpness());
        }
        if old.early_upscale != new.early_upscale || old.early_mode != new.early_mode {
            orch.reset_history();
        }
        info!(
            enabled = new.enabled,
            quality = new.quality.name(),
            sharpness = new.effective_sharpness(),
            early = new.early_upscale,
            mode = ?new.early_mode,
            "settings applied"
        );
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn display(&self) -> &DisplaySizes {
        &self.display
    }

    pub fn redirect(&self) -> &SceneRedirectEngine<G> {
        &self.redirect
    }

    pub fn with_orchestrator<R>(&self, f: impl FnOnce(&mut UpscaleOrchestrator<G, B>) -> R) -> R {
        f(&mut lock(&self.render).orchestrator)
    }

    /// Render-thread hooks stay inert until this is set.
    pub fn mark_installed(&self) {
        self.installed.store(true, Ordering::Release);
    }

    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// True while the engine itself is issuing device calls.
    pub fn is_busy(&self) -> bool {
        self.redirect.guard().is_active()
    }

    pub fn compositor_hooked(&self) {
        self.readiness.transition(ReadinessEvent::CompositorHooked);
    }

    pub fn has_device(&self) -> bool {
        lock(&self.render).gpu.is_some()
    }

    /// Bind the host device. Returns `false` if one is already bound.
    pub fn attach_device(&self, gpu: G) -> bool {
        {
            let mut render = lock(&self.render);
            if render.gpu.is_some() {
                return false;
            }
            render.gpu = Some(gpu);
        }
        self.readiness.transition(ReadinessEvent::SwapChainObserved);
        info!("device bound");
        true
    }

    /// Initialize the upscale feature if a device is bound and it is not up yet.
    pub fn ensure_feature(&self) -> bool {
        let Some(_scope) = self.redirect.guard().enter() else {
            return false;
        };
        let mut render = lock(&self.render);
        let RenderState { gpu, orchestrator } = &mut *render;
        let Some(gpu) = gpu.as_ref() else {
            return false;
        };
        if orchestrator.is_ready() {
            return true;
        }
        if orchestrator.is_disabled() {
            return false;
        }
        let ok = orchestrator.init(gpu);
        if ok {
            self.readiness.transition(ReadinessEvent::FeatureReady);
        }
        ok
    }

    /// Frame boundary. Returns the new frame number.
    pub fn on_present(&self, overlay: Option<&mut dyn Overlay>, dt: f32) -> u64 {
        let frame = self.frame.fetch_add(1, Ordering::AcqRel) + 1;
        self.redirect.begin_frame(frame);
        lock(&self.render).orchestrator.begin_frame(frame);

        if self.settings().enabled && self.has_device() {
            self.ensure_feature();
        }
        if let Some(overlay) = overlay {
            let current = self.settings();
            if let Some(new) = overlay.on_frame(dt, &current) {
                self.apply_settings(new);
            }
        }
        frame
    }

    /// Drop everything size-dependent before a swap chain resize. The compositor
    /// hook stays valid, and so do the host's depth and motion-vector images.
    pub fn teardown(&self) {
        self.redirect.purge();
        {
            let mut render = lock(&self.render);
            render.orchestrator.shutdown();
            render.gpu = None;
        }
        self.readiness.transition(ReadinessEvent::Teardown);
        self.copy_skip.reset();
        info!("session torn down");
    }

    /// Like [`Session::teardown`], but the host images belong to the lost device.
    pub fn on_device_lost(&self) {
        self.teardown();
        lock(&self.candidates).clear();
    }

    pub fn shutdown(&self) {
        self.on_device_lost();
        self.display.clear();
        self.readiness.transition(ReadinessEvent::Shutdown);
        self.installed.store(false, Ordering::Release);
    }

    /// Classify a freshly created host image and remember candidates.
    pub fn on_image_created(&self, image: G::Image, desc: &ImageDesc) -> Classification {
        if self.is_busy() {
            return Classification::None;
        }
        let settings = self.settings();
        let hints = SizeHints {
            display: self.display.any(),
            scene: self.redirect.last_scene_size(),
        };
        let class = classify(desc, &hints, &settings.classifier);
        if class != Classification::None {
            let target = hints.display.or(hints.scene);
            if lock(&self.candidates).register(class, image, *desc, target) {
                debug!(
                    class = ?class,
                    size = format_args!("{}x{}", desc.width, desc.height),
                    format = desc.format.0,
                    "candidate registered"
                );
            }
        }
        class
    }

    /// Replacement LOD bias for a sampler being created, if any.
    pub fn sampler_bias(&self, requested_bias: f32, max_anisotropy: u32) -> Option<f32> {
        let s = self.settings();
        if !s.enabled {
            return None;
        }
        sampler_bias_override(s.mip_bias, requested_bias, max_anisotropy, s.quality)
    }

    fn aux_images(&self) -> (Option<G::Image>, Option<G::Image>) {
        let c = lock(&self.candidates);
        (c.depth().cloned(), c.motion_vectors().cloned())
    }

    pub fn on_bind_targets(
        &self,
        kind: ContextKind,
        first: Option<&G::TargetView>,
        viewports: &[Viewport],
    ) -> BindDecision<G> {
        let settings = self.settings();
        if !self.is_installed() || !settings.enabled {
            return BindDecision::Forward;
        }
        let Some(_scope) = self.redirect.guard().enter() else {
            return BindDecision::Forward;
        };
        let (depth, motion_vectors) = self.aux_images();
        let mut render = lock(&self.render);
        let RenderState { gpu, orchestrator } = &mut *render;
        let Some(gpu) = gpu.as_ref() else {
            return BindDecision::Forward;
        };
        let aux = AuxImages {
            depth: depth.as_ref(),
            motion_vectors: motion_vectors.as_ref(),
        };
        let composited = self.redirect.composited_this_frame();
        let decision = self.redirect.on_bind_targets(
            gpu,
            orchestrator,
            aux,
            kind,
            first,
            viewports,
            &settings,
            self.display.any(),
        );
        if !composited {
            if let Some(report) = self.redirect.composite_report() {
                self.record_composite(report);
            }
        }
        decision
    }

    pub fn on_set_viewports(&self, viewports: &[Viewport]) -> Option<Vec<Viewport>> {
        let settings = self.settings();
        if !self.is_installed() || !settings.enabled || !settings.early_upscale {
            return None;
        }
        let _scope = self.redirect.guard().enter()?;
        let render = lock(&self.render);
        render.gpu.as_ref()?;
        self.redirect
            .on_set_viewports(&render.orchestrator, viewports, &settings, self.display.any())
    }

    fn record_composite(&self, report: CompositeReport) {
        let ok = report.upscaled > 0;
        self.readiness.record_evaluate(ok);
        if ok {
            self.readiness.transition(ReadinessEvent::EyeUpscaled);
        }
    }

    /// Per-eye compositor submission. The caller forwards the original call afterwards.
    pub fn on_submit(&self, req: SubmitRequest<'_, G>) -> SubmitOutcome {
        let settings = self.settings();
        if !settings.enabled {
            return SubmitOutcome::Disabled;
        }
        let Some(_scope) = self.redirect.guard().enter() else {
            return SubmitOutcome::NotReady;
        };
        let (candidate_depth, motion_vectors) = self.aux_images();
        let mut render = lock(&self.render);
        let RenderState { gpu, orchestrator } = &mut *render;
        let Some(gpu) = gpu.as_ref() else {
            return SubmitOutcome::NotReady;
        };

        let desc = gpu.describe(req.color);
        let texture = desc.extent();
        let atlas_ratio = settings.scene.atlas_ratio;
        let per_eye = self.display.update(
            req.eye,
            req.recommended,
            texture,
            req.bounds,
            settings.per_eye_cap,
            atlas_ratio,
        );

        let n = self.submits.fetch_add(1, Ordering::Relaxed) + 1;
        if settings.diagnostics && n % PROBE_EVERY == 0 {
            info!(
                submit = n,
                eye = ?req.eye,
                texture = %texture,
                display = %per_eye,
                predicted = %orchestrator.compute_render_size_for_output(per_eye),
                state = ?self.readiness.state(),
                "submit probe"
            );
        }

        if !orchestrator.is_ready() {
            if orchestrator.is_disabled() || !orchestrator.init(gpu) {
                return SubmitOutcome::NotReady;
            }
            self.readiness.transition(ReadinessEvent::FeatureReady);
        }
        if req.eye == Eye::Left {
            orchestrator.begin_frame(self.frame.load(Ordering::Acquire));
        }

        let key = gpu.image_key(req.color);
        let aux = AuxImages {
            depth: req.depth.or(candidate_depth.as_ref()),
            motion_vectors: motion_vectors.as_ref(),
        };

        if settings.early_mode_active(EarlyUpscaleMode::TargetRedirect) {
            match self.redirect.composite_for_submit(gpu, orchestrator, aux, key) {
                RedirectStatus::AlreadyComposited => return SubmitOutcome::AlreadyComposited,
                RedirectStatus::Composited(report) => {
                    self.record_composite(report);
                    return SubmitOutcome::Composited;
                }
                RedirectStatus::NotRedirected => {}
            }
        }

        let region = eye_region(req.eye, texture, req.bounds, atlas_ratio);
        let result = orchestrator.process_eye(
            gpu,
            EyeRequest {
                eye: req.eye,
                color: req.color,
                slice: req.slice,
                region,
                output_size: Some(per_eye),
                depth: aux.depth,
                motion_vectors: aux.motion_vectors,
            },
        );
        let result_key = gpu.image_key(&result);
        let ok = result_key != key;
        self.readiness.record_evaluate(ok);
        if ok {
            self.readiness.transition(ReadinessEvent::EyeUpscaled);
        }

        let samples = gpu.describe(&result).sample_count;
        if !output_gate(
            self.readiness.state(),
            self.readiness.last_evaluate_ok(),
            result_key,
            key,
            samples,
        ) {
            return SubmitOutcome::PassedThrough;
        }

        match write_back(gpu, &result, req.color, req.slice, region) {
            Ok(CopyBack::Exact) => SubmitOutcome::Copied,
            Ok(CopyBack::Stretch) => SubmitOutcome::Stretched,
            Ok(CopyBack::Skip) => {
                if self.copy_skip.fire() {
                    warn!(
                        eye = ?req.eye,
                        format = desc.format.0,
                        samples = desc.sample_count,
                        region = format_args!("{}x{}", region.width, region.height),
                        "submitted texture cannot receive upscaled output, leaving it unchanged"
                    );
                }
                SubmitOutcome::Incompatible
            }
            Err(e) => {
                warn!(eye = ?req.eye, "copy back failed: {}", e);
                SubmitOutcome::PassedThrough
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{BindFlags, Format};
    use crate::geometry::{Bounds, Extent};
    use crate::quality::{MipBiasPolicy, QualityTier};
    use crate::readiness::ReadinessState;
    use crate::testing::{color_desc, FakeBackend, FakeGpu, FakeImage, Op};

    type TestSession = Session<FakeGpu, FakeBackend>;

    const LEFT_HALF: Bounds = Bounds {
        u_min: 0.0,
        v_min: 0.0,
        u_max: 0.5,
        v_max: 1.0,
    };
    const RIGHT_HALF: Bounds = Bounds {
        u_min: 0.5,
        v_min: 0.0,
        u_max: 1.0,
        v_max: 1.0,
    };

    fn session(settings: Settings) -> (TestSession, FakeGpu) {
        let s = Session::new(settings, FakeBackend::default());
        let gpu = FakeGpu::new();
        s.mark_installed();
        s.compositor_hooked();
        assert!(s.attach_device(gpu.clone()));
        (s, gpu)
    }

    fn submit<'a>(eye: Eye, color: &'a FakeImage, bounds: Bounds) -> SubmitRequest<'a, FakeGpu> {
        SubmitRequest {
            eye,
            color,
            slice: 0,
            bounds: Some(bounds),
            depth: None,
            recommended: None,
        }
    }

    fn redirect_settings() -> Settings {
        Settings {
            early_upscale: true,
            early_mode: EarlyUpscaleMode::TargetRedirect,
            ..Default::default()
        }
    }

    #[test]
    fn submit_without_device_is_not_ready() {
        let s: TestSession = Session::new(Settings::default(), FakeBackend::default());
        let gpu = FakeGpu::new();
        let color = gpu.host_image(color_desc(4096, 2048));
        assert_eq!(s.on_submit(submit(Eye::Left, &color, LEFT_HALF)), SubmitOutcome::NotReady);
        assert_eq!(s.readiness().state(), ReadinessState::Cold);
    }

    #[test]
    fn disabled_session_does_nothing() {
        let (s, gpu) = session(Settings {
            enabled: false,
            ..Default::default()
        });
        let color = gpu.host_image(color_desc(4096, 2048));
        assert_eq!(s.on_submit(submit(Eye::Left, &color, LEFT_HALF)), SubmitOutcome::Disabled);
        assert!(gpu.ops().is_empty());
    }

    #[test]
    fn side_by_side_submission_writes_each_eye_into_its_half() {
        let (s, gpu) = session(Settings::default());
        let color = gpu.host_image(color_desc(4096, 2048));

        assert_eq!(s.on_submit(submit(Eye::Left, &color, LEFT_HALF)), SubmitOutcome::Copied);
        assert_eq!(s.on_submit(submit(Eye::Right, &color, RIGHT_HALF)), SubmitOutcome::Copied);

        assert_eq!(s.display().get(Eye::Right), Some(Extent::new(2048, 2048)));
        assert_eq!(s.readiness().state(), ReadinessState::Ready);
        let targets: Vec<_> = gpu
            .copies()
            .into_iter()
            .filter_map(|op| match op {
                Op::Copy { dst, x, y, .. } if dst == color.id => Some((x, y)),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec![(0, 0), (2048, 0)]);
        s.with_orchestrator(|o| {
            let calls = &o.backend().calls;
            assert_eq!(calls.len(), 2);
            assert_eq!(calls[1].render, Extent::new(1372, 1372));
            assert_eq!(calls[1].output_size, Extent::new(2048, 2048));
        });
    }

    #[test]
    fn runtime_recommendation_wins_and_cap_applies() {
        let (s, gpu) = session(Settings {
            per_eye_cap: Some(1024),
            ..Default::default()
        });
        let color = gpu.host_image(color_desc(4096, 2048));
        let mut req = submit(Eye::Left, &color, LEFT_HALF);
        req.recommended = Some(Extent::new(2016, 2240));
        s.on_submit(req);
        let size = s.display().get(Eye::Left).unwrap();
        assert!(size.width <= 1024 && size.height <= 1024);
        assert!(size.height > size.width);
    }

    #[test]
    fn failed_evaluate_passes_the_original_through() {
        let (s, gpu) = session(Settings::default());
        s.ensure_feature();
        s.with_orchestrator(|o| o.backend_mut().fail = true);
        let color = gpu.host_image(color_desc(4096, 2048));

        assert_eq!(
            s.on_submit(submit(Eye::Left, &color, LEFT_HALF)),
            SubmitOutcome::PassedThrough
        );
        assert!(!s.readiness().last_evaluate_ok());
        assert_ne!(s.readiness().state(), ReadinessState::Ready);
        assert!(gpu.copies().is_empty());
    }

    #[test]
    fn srv_only_submission_with_mismatched_size_is_left_alone() {
        let (s, gpu) = session(Settings {
            per_eye_cap: Some(1024),
            ..Default::default()
        });
        let mut desc = color_desc(4096, 2048);
        desc.bind = BindFlags::SHADER_RESOURCE;
        let color = gpu.host_image(desc);
        assert_eq!(
            s.on_submit(submit(Eye::Left, &color, LEFT_HALF)),
            SubmitOutcome::Incompatible
        );
        assert!(gpu.copies().is_empty());
    }

    #[test]
    fn images_created_by_the_engine_are_not_classified() {
        let (s, gpu) = session(Settings::default());
        let mut desc = color_desc(2048, 2048);
        desc.format = Format::R16G16_FLOAT;
        {
            let _scope = s.redirect().guard().enter().unwrap();
            let mv = gpu.host_image(desc);
            assert_eq!(s.on_image_created(mv, &desc), Classification::None);
        }
        let mv = gpu.host_image(desc);
        assert_eq!(
            s.on_image_created(mv.clone(), &desc),
            Classification::MotionVectorCandidate
        );

        let color = gpu.host_image(color_desc(4096, 2048));
        s.on_submit(submit(Eye::Left, &color, LEFT_HALF));
        s.with_orchestrator(|o| assert_eq!(o.backend().calls[0].motion_vectors, mv.id));
    }

    #[test]
    fn depth_candidate_uses_known_display_size() {
        let (s, gpu) = session(Settings::default());
        let color = gpu.host_image(color_desc(4096, 2048));
        s.on_submit(submit(Eye::Left, &color, LEFT_HALF));

        let depth = |w, h| {
            let mut d = color_desc(w, h);
            d.format = Format::D32_FLOAT;
            d.bind = BindFlags::DEPTH_STENCIL;
            d
        };
        let tiny = depth(600, 600);
        assert_eq!(s.on_image_created(gpu.host_image(tiny), &tiny), Classification::None);
        let good = depth(1372, 1372);
        assert_eq!(
            s.on_image_created(gpu.host_image(good), &good),
            Classification::DepthCandidate
        );
    }

    #[test]
    fn redirected_scene_composites_once_from_submission() {
        let (s, gpu) = session(redirect_settings());
        s.on_present(None, 0.0);
        assert_eq!(s.readiness().state(), ReadinessState::HaveUpscaleFeature);

        let scene = gpu.host_image(color_desc(4096, 2048));
        let view = gpu.host_view(&scene);
        let decision = s.on_bind_targets(ContextKind::Immediate, Some(&view), &[]);
        match decision {
            BindDecision::Substitute { target, .. } => {
                assert_eq!(target.image.desc.extent(), Extent::new(2744, 1372))
            }
            BindDecision::Forward => panic!("scene was not redirected"),
        }

        assert_eq!(
            s.on_submit(submit(Eye::Left, &scene, LEFT_HALF)),
            SubmitOutcome::Composited
        );
        assert_eq!(
            s.on_submit(submit(Eye::Right, &scene, RIGHT_HALF)),
            SubmitOutcome::AlreadyComposited
        );
        assert_eq!(s.readiness().state(), ReadinessState::Ready);
        assert!(gpu.copies().is_empty());
    }

    #[test]
    fn rebinding_the_scene_composites_and_marks_ready() {
        let (s, gpu) = session(redirect_settings());
        s.on_present(None, 0.0);
        let scene = gpu.host_image(color_desc(4096, 2048));
        let view = gpu.host_view(&scene);
        assert!(!s.on_bind_targets(ContextKind::Immediate, Some(&view), &[]).is_forward());
        assert!(s.on_bind_targets(ContextKind::Immediate, Some(&view), &[]).is_forward());

        assert!(s.redirect().composited_this_frame());
        assert_eq!(s.readiness().state(), ReadinessState::Ready);
    }

    #[test]
    fn hooks_are_inert_until_installed() {
        let s: TestSession = Session::new(redirect_settings(), FakeBackend::default());
        let gpu = FakeGpu::new();
        s.attach_device(gpu.clone());
        let scene = gpu.host_image(color_desc(4096, 2048));
        let view = gpu.host_view(&scene);
        assert!(s.on_bind_targets(ContextKind::Immediate, Some(&view), &[]).is_forward());
        assert!(s.on_set_viewports(&[]).is_none());
    }

    #[test]
    fn teardown_drops_device_state_but_keeps_compositor() {
        let (s, gpu) = session(redirect_settings());
        s.on_present(None, 0.0);
        let scene = gpu.host_image(color_desc(4096, 2048));
        let view = gpu.host_view(&scene);
        s.on_bind_targets(ContextKind::Immediate, Some(&view), &[]);
        s.on_submit(submit(Eye::Left, &scene, LEFT_HALF));
        assert_eq!(s.redirect().cache().len(), 1);

        s.teardown();
        assert!(!s.has_device());
        assert!(s.redirect().cache().is_empty());
        assert!(s.redirect().active_scene().is_none());
        assert_eq!(s.readiness().state(), ReadinessState::HaveSwapChain);
        assert!(!s.with_orchestrator(|o| o.is_initialized()));

        assert!(s.attach_device(gpu.clone()));
        s.on_present(None, 0.0);
        assert_eq!(s.readiness().state(), ReadinessState::HaveUpscaleFeature);
    }

    fn motion_vector_desc() -> ImageDesc {
        let mut desc = color_desc(2048, 2048);
        desc.format = Format::R16G16_FLOAT;
        desc
    }

    #[test]
    fn resize_keeps_host_motion_vectors() {
        let (s, gpu) = session(Settings::default());
        let desc = motion_vector_desc();
        let mv = gpu.host_image(desc);
        assert_eq!(
            s.on_image_created(mv.clone(), &desc),
            Classification::MotionVectorCandidate
        );

        s.teardown();
        assert!(s.attach_device(gpu.clone()));
        let color = gpu.host_image(color_desc(4096, 2048));
        s.on_submit(submit(Eye::Left, &color, LEFT_HALF));
        s.with_orchestrator(|o| assert_eq!(o.backend().calls[0].motion_vectors, mv.id));
    }

    #[test]
    fn device_loss_forgets_host_motion_vectors() {
        let (s, gpu) = session(Settings::default());
        let desc = motion_vector_desc();
        let mv = gpu.host_image(desc);
        s.on_image_created(mv.clone(), &desc);

        s.on_device_lost();
        assert!(!s.has_device());
        assert!(s.attach_device(gpu.clone()));
        let color = gpu.host_image(color_desc(4096, 2048));
        s.on_submit(submit(Eye::Left, &color, LEFT_HALF));
        s.with_orchestrator(|o| assert_ne!(o.backend().calls[0].motion_vectors, mv.id));
    }

    #[test]
    fn other_threads_classify_while_the_render_thread_is_busy() {
        let (s, gpu) = session(Settings::default());
        let desc = motion_vector_desc();
        let _scope = s.redirect().guard().enter().unwrap();
        assert!(s.is_busy());

        let class = std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    assert!(!s.is_busy());
                    s.on_image_created(gpu.host_image(desc), &desc)
                })
                .join()
                .unwrap()
        });
        assert_eq!(class, Classification::MotionVectorCandidate);
        assert_eq!(
            s.on_image_created(gpu.host_image(desc), &desc),
            Classification::None
        );
    }

    #[test]
    fn shutdown_returns_to_cold() {
        let (s, gpu) = session(Settings::default());
        let color = gpu.host_image(color_desc(4096, 2048));
        s.on_submit(submit(Eye::Left, &color, LEFT_HALF));
        s.shutdown();
        assert_eq!(s.readiness().state(), ReadinessState::Cold);
        assert!(s.display().any().is_none());
        assert!(!s.is_installed());
    }

    #[test]
    fn sampler_bias_follows_settings() {
        let (s, _gpu) = session(Settings {
            mip_bias: MipBiasPolicy::Manual(-1.5),
            ..Default::default()
        });
        assert_eq!(s.sampler_bias(0.0, 1), Some(-1.5));
        assert_eq!(s.sampler_bias(0.5, 1), None);
        assert_eq!(s.sampler_bias(0.0, 16), None);

        s.apply_settings(Settings {
            enabled: false,
            ..s.settings()
        });
        assert_eq!(s.sampler_bias(0.0, 1), None);
    }

    struct CycleOverlay {
        frames: u32,
    }

    impl Overlay for CycleOverlay {
        fn on_frame(&mut self, _dt: f32, settings: &Settings) -> Option<Settings> {
            self.frames += 1;
            (self.frames == 1).then(|| Settings {
                quality: settings.quality.cycle(),
                sharpening: false,
                ..*settings
            })
        }

        fn shutdown(&mut self) {}
    }

    #[test]
    fn overlay_changes_reach_the_backend() {
        let (s, _gpu) = session(Settings::default());
        let mut overlay = CycleOverlay { frames: 0 };
        assert_eq!(s.on_present(Some(&mut overlay), 0.011), 1);
        assert_eq!(s.on_present(Some(&mut overlay), 0.011), 2);

        let expected = QualityTier::Quality.cycle();
        assert_eq!(s.settings().quality, expected);
        s.with_orchestrator(|o| {
            assert_eq!(o.quality(), expected);
            assert_eq!(o.backend().quality, Some(expected));
            assert_eq!(o.backend().sharpness, Some(0.0));
        });
    }
}
