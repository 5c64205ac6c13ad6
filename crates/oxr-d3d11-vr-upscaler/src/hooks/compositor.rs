use std::ffi::c_void;
use std::sync::Mutex;

use ovr_sys::{
    depth_handle, EVRCompositorError, EVREye, EVRSubmitFlags, Texture_t, TextureType_DirectX,
    VRCompositorError_RequestFailed, VRTextureBounds_t, COMPOSITOR_SLOT_SUBMIT,
    COMPOSITOR_SLOT_SUBMIT_WITH_ARRAY_INDEX, PFN_Submit, PFN_SubmitWithArrayIndex,
};
use oxr_upscale_core::{
    Bounds, DeferredInstall, Extent, Eye, LogOnce, OriginalFn, SubmitOutcome, SubmitRequest,
};
use tracing::{debug, info};

use super::{patch, session, D3d11Session};
use crate::gpu::Texture;
use crate::openvr;

static SUBMIT: OriginalFn<PFN_Submit> = OriginalFn::new();
static SUBMIT_WITH_ARRAY_INDEX: OriginalFn<PFN_SubmitWithArrayIndex> = OriginalFn::new();

static HOOKED: DeferredInstall = DeferredInstall::new();
static LAST_OUTCOME: Mutex<Option<SubmitOutcome>> = Mutex::new(None);
static NOT_DIRECTX: LogOnce = LogOnce::new();

/// Hook both submission entry points of the compositor.
///
/// # Safety
/// `compositor` must be a live `IVRCompositor` of the version the slots describe.
pub unsafe fn install(compositor: *mut c_void) -> bool {
    let ok = patch(compositor, COMPOSITOR_SLOT_SUBMIT, submit as *const c_void, &SUBMIT, "Submit")
        & patch(
            compositor,
            COMPOSITOR_SLOT_SUBMIT_WITH_ARRAY_INDEX,
            submit_with_array_index as *const c_void,
            &SUBMIT_WITH_ARRAY_INDEX,
            "SubmitWithArrayIndex",
        );
    if ok {
        info!("compositor hooks installed");
    }
    ok
}

/// Hook the compositor if the runtime has one by now. Safe to call from the
/// installer thread and from every Present; only one caller does the work.
pub fn ensure_installed(session: &D3d11Session) -> bool {
    let hooked = HOOKED.try_complete(|| match openvr::compositor() {
        Some(c) => unsafe { install(c) },
        None => false,
    });
    if hooked {
        session.compositor_hooked();
    }
    HOOKED.is_done()
}

fn bounds(raw: *const VRTextureBounds_t) -> Option<Bounds> {
    if raw.is_null() {
        return None;
    }
    let b = unsafe { *raw };
    Some(Bounds {
        u_min: b.uMin,
        v_min: b.vMin,
        u_max: b.uMax,
        v_max: b.vMax,
    })
}

unsafe fn intercept(
    eye: EVREye,
    texture: *const Texture_t,
    slice: u32,
    raw_bounds: *const VRTextureBounds_t,
    flags: EVRSubmitFlags,
) {
    let Some(session) = session() else {
        return;
    };
    let Some(eye) = Eye::from_raw(eye) else {
        return;
    };
    if texture.is_null() {
        return;
    }
    if (*texture).eType != TextureType_DirectX {
        if NOT_DIRECTX.fire() {
            info!(texture_type = (*texture).eType, "submitted texture is not D3D11, passing through");
        }
        return;
    }
    let Some(color) = Texture::from_raw_borrowed((*texture).handle) else {
        return;
    };
    let depth = Texture::from_raw_borrowed(depth_handle(texture, flags));
    let recommended = openvr::recommended_render_target_size().map(|(w, h)| Extent::new(w, h));

    let outcome = session.on_submit(SubmitRequest {
        eye,
        color: &color,
        slice,
        bounds: bounds(raw_bounds),
        depth: depth.as_ref(),
        recommended,
    });

    if let Ok(mut last) = LAST_OUTCOME.lock() {
        if *last != Some(outcome) {
            debug!(eye = ?eye, outcome = ?outcome, "submit outcome changed");
            *last = Some(outcome);
        }
    }
}

unsafe extern "C" fn submit(
    this: *mut c_void,
    eye: EVREye,
    texture: *const Texture_t,
    bounds: *const VRTextureBounds_t,
    flags: EVRSubmitFlags,
) -> EVRCompositorError {
    intercept(eye, texture, 0, bounds, flags);
    match SUBMIT.get() {
        Some(forward) => forward(this, eye, texture, bounds, flags),
        None => VRCompositorError_RequestFailed,
    }
}

unsafe extern "C" fn submit_with_array_index(
    this: *mut c_void,
    eye: EVREye,
    texture: *const Texture_t,
    array_index: u32,
    bounds: *const VRTextureBounds_t,
    flags: EVRSubmitFlags,
) -> EVRCompositorError {
    intercept(eye, texture, array_index, bounds, flags);
    match SUBMIT_WITH_ARRAY_INDEX.get() {
        Some(forward) => forward(this, eye, texture, array_index, bounds, flags),
        None => VRCompositorError_RequestFailed,
    }
}
