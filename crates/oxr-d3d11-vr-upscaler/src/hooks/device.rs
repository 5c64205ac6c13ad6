use std::ffi::c_void;

use oxr_upscale_core::{Classification, LogOnce, OriginalFn};
use tracing::{debug, info};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device, ID3D11DeviceContext, D3D11_SAMPLER_DESC, D3D11_SUBRESOURCE_DATA,
    D3D11_TEXTURE2D_DESC,
};

use super::{context, patch, session};
use crate::gpu::{image_desc, Texture};

/// `ID3D11Device::CreateTexture2D`
pub const SLOT_CREATE_TEXTURE_2D: usize = 5;
/// `ID3D11Device::CreateSamplerState`
pub const SLOT_CREATE_SAMPLER_STATE: usize = 23;
/// `ID3D11Device::CreateDeferredContext`
pub const SLOT_CREATE_DEFERRED_CONTEXT: usize = 27;

type CreateTexture2DFn = unsafe extern "system" fn(
    *mut c_void,
    *const D3D11_TEXTURE2D_DESC,
    *const D3D11_SUBRESOURCE_DATA,
    *mut *mut c_void,
) -> HRESULT;
type CreateSamplerStateFn =
    unsafe extern "system" fn(*mut c_void, *const D3D11_SAMPLER_DESC, *mut *mut c_void) -> HRESULT;
type CreateDeferredContextFn = unsafe extern "system" fn(*mut c_void, u32, *mut *mut c_void) -> HRESULT;

static CREATE_TEXTURE_2D: OriginalFn<CreateTexture2DFn> = OriginalFn::new();
static CREATE_SAMPLER_STATE: OriginalFn<CreateSamplerStateFn> = OriginalFn::new();
static CREATE_DEFERRED_CONTEXT: OriginalFn<CreateDeferredContextFn> = OriginalFn::new();

static BIAS_APPLIED: LogOnce = LogOnce::new();

/// Hook resource creation on `device` and render-target binding on its immediate context.
pub fn install(device: &ID3D11Device) -> bool {
    let raw = device.as_raw();
    let ok = unsafe {
        patch(raw, SLOT_CREATE_TEXTURE_2D, create_texture_2d as *const c_void, &CREATE_TEXTURE_2D, "CreateTexture2D")
            & patch(raw, SLOT_CREATE_SAMPLER_STATE, create_sampler_state as *const c_void, &CREATE_SAMPLER_STATE, "CreateSamplerState")
            & patch(
                raw,
                SLOT_CREATE_DEFERRED_CONTEXT,
                create_deferred_context as *const c_void,
                &CREATE_DEFERRED_CONTEXT,
                "CreateDeferredContext",
            )
    };
    let context_ok = match unsafe { device.GetImmediateContext() } {
        Ok(immediate) => context::install(&immediate, false),
        Err(e) => {
            debug!("GetImmediateContext failed: {}", e);
            false
        }
    };
    if ok && context_ok {
        info!("device hooks installed");
    }
    ok && context_ok
}

unsafe extern "system" fn create_texture_2d(
    this: *mut c_void,
    desc: *const D3D11_TEXTURE2D_DESC,
    init: *const D3D11_SUBRESOURCE_DATA,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(forward) = CREATE_TEXTURE_2D.get() else {
        return E_FAIL;
    };
    let hr = forward(this, desc, init, out);
    if hr.is_err() || desc.is_null() || out.is_null() {
        return hr;
    }
    let Some(session) = session() else {
        return hr;
    };
    if !session.is_installed() || session.is_busy() {
        return hr;
    }
    if let Some(texture) = Texture::from_raw_borrowed(*out) {
        let class = session.on_image_created(texture, &image_desc(&*desc));
        if class != Classification::None {
            debug!(class = ?class, "texture classified at creation");
        }
    }
    hr
}

unsafe extern "system" fn create_sampler_state(
    this: *mut c_void,
    desc: *const D3D11_SAMPLER_DESC,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(forward) = CREATE_SAMPLER_STATE.get() else {
        return E_FAIL;
    };
    let session = match session() {
        Some(s) if s.is_installed() && !s.is_busy() && !desc.is_null() => s,
        _ => return forward(this, desc, out),
    };
    let requested = *desc;
    match session.sampler_bias(requested.MipLODBias, requested.MaxAnisotropy) {
        Some(bias) => {
            if BIAS_APPLIED.fire() {
                debug!(requested = requested.MipLODBias, bias, "sampler LOD bias overridden");
            }
            let biased = D3D11_SAMPLER_DESC {
                MipLODBias: bias,
                ..requested
            };
            forward(this, &biased, out)
        }
        None => forward(this, desc, out),
    }
}

unsafe extern "system" fn create_deferred_context(this: *mut c_void, flags: u32, out: *mut *mut c_void) -> HRESULT {
    let Some(forward) = CREATE_DEFERRED_CONTEXT.get() else {
        return E_FAIL;
    };
    let hr = forward(this, flags, out);
    if hr.is_ok() && !out.is_null() {
        if let Some(ctx) = ID3D11DeviceContext::from_raw_borrowed(&*out) {
            context::install(ctx, true);
        }
    }
    hr
}
