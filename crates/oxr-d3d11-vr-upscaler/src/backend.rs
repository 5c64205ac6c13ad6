use core::ffi::c_void;
use std::path::{Path, PathBuf};

use oxr_upscale_core::{
    EvaluateParams, Extent, Eye, GpuDevice, QualityTier, Rect, UpscaleBackend,
};
use tracing::{debug, info, warn};
use windows::core::{Interface, PCSTR, PCWSTR};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};

use crate::config::BackendChoice;
use crate::gpu::{D3d11Gpu, RenderTarget, Texture};

/// Looked for next to this DLL when the backend is `auto`.
pub const DEFAULT_BACKEND_LIBRARY: &str = "oxr_upscale_backend.dll";

// ---- Linear ----

/// Bilinear resample into the output image. Always available.
#[derive(Default)]
pub struct LinearBackend {
    ready: bool,
    targets: [Option<(usize, RenderTarget)>; 2],
}

impl LinearBackend {
    fn target_for(&mut self, gpu: &D3d11Gpu, eye: Eye, output: &Texture) -> Option<RenderTarget> {
        let key = gpu.image_key(output);
        let slot = &mut self.targets[eye.index()];
        if let Some((k, view)) = slot {
            if *k == key {
                return Some(view.clone());
            }
        }
        match gpu.create_target_view(output, 0) {
            Ok(view) => {
                *slot = Some((key, view.clone()));
                Some(view)
            }
            Err(e) => {
                warn!("linear backend: {}", e);
                None
            }
        }
    }
}

impl UpscaleBackend<D3d11Gpu> for LinearBackend {
    fn name(&self) -> &str {
        "linear"
    }

    fn init(&mut self, _gpu: &D3d11Gpu) -> bool {
        self.ready = true;
        true
    }

    fn shutdown(&mut self) {
        self.ready = false;
        self.targets = [None, None];
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn set_quality(&mut self, _tier: QualityTier) {}

    fn set_sharpness(&mut self, _value: f32) {}

    fn process_eye(&mut self, gpu: &D3d11Gpu, params: &EvaluateParams<'_, D3d11Gpu>) -> Texture {
        let Some(view) = self.target_for(gpu, params.eye, params.output) else {
            return params.color.clone();
        };
        let window = Rect::full(params.render).uv_window(gpu.describe(params.color).extent());
        match gpu.blit(params.color, 0, window, &view, Rect::full(params.output_size)) {
            Ok(()) => params.output.clone(),
            Err(e) => {
                debug!("linear backend blit failed: {}", e);
                params.color.clone()
            }
        }
    }

    fn release_eye(&mut self, eye: Eye) {
        self.targets[eye.index()] = None;
    }
}

// ---- External library ----

/// Per-eye evaluate inputs passed to the vendor library.
#[repr(C)]
struct EvaluateDesc {
    eye: u32,
    color: *mut c_void,
    depth: *mut c_void,
    motion_vectors: *mut c_void,
    output: *mut c_void,
    render_width: u32,
    render_height: u32,
    output_width: u32,
    output_height: u32,
    reset_history: u32,
    sharpness: f32,
}

struct FnTable {
    Create: unsafe extern "C" fn(*mut c_void, *mut c_void) -> *mut c_void,
    Destroy: unsafe extern "C" fn(*mut c_void),
    SetQuality: unsafe extern "C" fn(*mut c_void, u32),
    GetRenderSize: unsafe extern "C" fn(*mut c_void, u32, u32, u32, *mut u32, *mut u32) -> i32,
    Evaluate: unsafe extern "C" fn(*mut c_void, *const EvaluateDesc) -> i32,
    ReleaseEye: unsafe extern "C" fn(*mut c_void, u32),
}

unsafe fn resolve(module: HMODULE, name: &[u8]) -> Option<*const c_void> {
    GetProcAddress(module, PCSTR(name.as_ptr())).map(|f| f as *const c_void)
}

impl FnTable {
    unsafe fn load(path: &Path) -> Result<FnTable, String> {
        let wname: Vec<u16> = path
            .to_string_lossy()
            .encode_utf16()
            .chain(std::iter::once(0))
            .collect();
        let hmod = LoadLibraryW(PCWSTR(wname.as_ptr()))
            .map_err(|e| format!("LoadLibraryW({}) failed: {}", path.display(), e))?;

        let get = |name: &[u8]| {
            resolve(hmod, name).ok_or_else(|| {
                format!(
                    "{} is missing {}",
                    path.display(),
                    String::from_utf8_lossy(&name[..name.len() - 1])
                )
            })
        };

        Ok(FnTable {
            Create: std::mem::transmute(get(b"UpscaleBackendCreate\0")?),
            Destroy: std::mem::transmute(get(b"UpscaleBackendDestroy\0")?),
            SetQuality: std::mem::transmute(get(b"UpscaleBackendSetQuality\0")?),
            GetRenderSize: std::mem::transmute(get(b"UpscaleBackendGetRenderSize\0")?),
            Evaluate: std::mem::transmute(get(b"UpscaleBackendEvaluate\0")?),
            ReleaseEye: std::mem::transmute(get(b"UpscaleBackendReleaseEye\0")?),
        })
    }
}

/// Vendor upscaler loaded from a DLL exporting the `UpscaleBackend*` entry points.
pub struct ExternalBackend {
    name: String,
    fns: FnTable,
    ctx: *mut c_void,
    quality: QualityTier,
    sharpness: f32,
}

// `ctx` is only touched under the session's render lock.
unsafe impl Send for ExternalBackend {}

impl ExternalBackend {
    pub fn load(path: &Path) -> Result<Self, String> {
        let fns = unsafe { FnTable::load(path) }?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "external".into());
        Ok(Self {
            name,
            fns,
            ctx: std::ptr::null_mut(),
            quality: QualityTier::default(),
            sharpness: 0.0,
        })
    }
}

impl UpscaleBackend<D3d11Gpu> for ExternalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, gpu: &D3d11Gpu) -> bool {
        if !self.ctx.is_null() {
            return true;
        }
        let ctx = unsafe { (self.fns.Create)(gpu.device().as_raw(), gpu.immediate().as_raw()) };
        if ctx.is_null() {
            warn!(backend = %self.name, "backend context creation failed");
            return false;
        }
        self.ctx = ctx;
        unsafe { (self.fns.SetQuality)(ctx, self.quality as u32) };
        info!(backend = %self.name, "backend context created");
        true
    }

    fn shutdown(&mut self) {
        if !self.ctx.is_null() {
            unsafe { (self.fns.Destroy)(self.ctx) };
            self.ctx = std::ptr::null_mut();
            debug!(backend = %self.name, "backend context destroyed");
        }
    }

    fn is_ready(&self) -> bool {
        !self.ctx.is_null()
    }

    fn set_quality(&mut self, tier: QualityTier) {
        self.quality = tier;
        if !self.ctx.is_null() {
            unsafe { (self.fns.SetQuality)(self.ctx, tier as u32) };
        }
    }

    fn set_sharpness(&mut self, value: f32) {
        self.sharpness = value;
    }

    fn optimal_render_size(&self, output: Extent, tier: QualityTier) -> Option<Extent> {
        if self.ctx.is_null() {
            return None;
        }
        let (mut w, mut h) = (0u32, 0u32);
        let ok = unsafe {
            (self.fns.GetRenderSize)(
                self.ctx,
                output.width,
                output.height,
                tier as u32,
                &mut w,
                &mut h,
            )
        };
        (ok != 0 && w > 0 && h > 0).then(|| Extent::new(w, h))
    }

    fn process_eye(&mut self, _gpu: &D3d11Gpu, params: &EvaluateParams<'_, D3d11Gpu>) -> Texture {
        if self.ctx.is_null() {
            return params.color.clone();
        }
        let desc = EvaluateDesc {
            eye: params.eye.index() as u32,
            color: params.color.0.as_raw(),
            depth: params.depth.0.as_raw(),
            motion_vectors: params.motion_vectors.0.as_raw(),
            output: params.output.0.as_raw(),
            render_width: params.render.width,
            render_height: params.render.height,
            output_width: params.output_size.width,
            output_height: params.output_size.height,
            reset_history: params.reset_history as u32,
            sharpness: self.sharpness,
        };
        if unsafe { (self.fns.Evaluate)(self.ctx, &desc) } != 0 {
            params.output.clone()
        } else {
            params.color.clone()
        }
    }

    fn release_eye(&mut self, eye: Eye) {
        if !self.ctx.is_null() {
            unsafe { (self.fns.ReleaseEye)(self.ctx, eye.index() as u32) };
        }
    }
}

// ---- Selection ----

pub enum Backend {
    Linear(LinearBackend),
    External(ExternalBackend),
}

impl Backend {
    /// Resolve the configured backend. Library paths are relative to `dir`;
    /// anything that fails to load falls back to linear.
    pub fn select(choice: &BackendChoice, dir: &Path) -> Backend {
        let path = match choice {
            BackendChoice::Linear => return Backend::Linear(LinearBackend::default()),
            BackendChoice::Auto => {
                let candidate = dir.join(DEFAULT_BACKEND_LIBRARY);
                if !candidate.exists() {
                    info!("no backend library found, using linear");
                    return Backend::Linear(LinearBackend::default());
                }
                candidate
            }
            BackendChoice::Library(p) => {
                let p = PathBuf::from(p);
                if p.is_absolute() {
                    p
                } else {
                    dir.join(p)
                }
            }
        };
        match ExternalBackend::load(&path) {
            Ok(b) => {
                info!(backend = %b.name, "backend library loaded");
                Backend::External(b)
            }
            Err(e) => {
                warn!("{}; using linear", e);
                Backend::Linear(LinearBackend::default())
            }
        }
    }

    fn inner(&self) -> &dyn UpscaleBackend<D3d11Gpu> {
        match self {
            Backend::Linear(b) => b,
            Backend::External(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn UpscaleBackend<D3d11Gpu> {
        match self {
            Backend::Linear(b) => b,
            Backend::External(b) => b,
        }
    }
}

impl UpscaleBackend<D3d11Gpu> for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn init(&mut self, gpu: &D3d11Gpu) -> bool {
        self.inner_mut().init(gpu)
    }

    fn shutdown(&mut self) {
        self.inner_mut().shutdown()
    }

    fn is_ready(&self) -> bool {
        self.inner().is_ready()
    }

    fn set_quality(&mut self, tier: QualityTier) {
        self.inner_mut().set_quality(tier)
    }

    fn set_sharpness(&mut self, value: f32) {
        self.inner_mut().set_sharpness(value)
    }

    fn optimal_render_size(&self, output: Extent, tier: QualityTier) -> Option<Extent> {
        self.inner().optimal_render_size(output, tier)
    }

    fn process_eye(&mut self, gpu: &D3d11Gpu, params: &EvaluateParams<'_, D3d11Gpu>) -> Texture {
        self.inner_mut().process_eye(gpu, params)
    }

    fn release_eye(&mut self, eye: Eye) {
        self.inner_mut().release_eye(eye)
    }
}
