use core::ffi::{c_char, c_void};

use crate::types::*;

// ---- Interface versions ----

pub const IVRCompositor_Version: &[u8] = b"IVRCompositor_028\0";
pub const IVRSystem_Version: &[u8] = b"IVRSystem_022\0";

// ---- Call-table slots (must match the interface versions above) ----

/// `IVRCompositor::Submit`
pub const COMPOSITOR_SLOT_SUBMIT: usize = 6;
/// `IVRCompositor::SubmitWithArrayIndex`
pub const COMPOSITOR_SLOT_SUBMIT_WITH_ARRAY_INDEX: usize = 7;
/// `IVRSystem::GetRecommendedRenderTargetSize`
pub const SYSTEM_SLOT_GET_RECOMMENDED_RENDER_TARGET_SIZE: usize = 0;

// ---- Entry points ----

pub type PFN_Submit = unsafe extern "C" fn(
    this: *mut c_void,
    eye: EVREye,
    texture: *const Texture_t,
    bounds: *const VRTextureBounds_t,
    flags: EVRSubmitFlags,
) -> EVRCompositorError;

pub type PFN_SubmitWithArrayIndex = unsafe extern "C" fn(
    this: *mut c_void,
    eye: EVREye,
    texture: *const Texture_t,
    array_index: u32,
    bounds: *const VRTextureBounds_t,
    flags: EVRSubmitFlags,
) -> EVRCompositorError;

pub type PFN_GetRecommendedRenderTargetSize =
    unsafe extern "C" fn(this: *mut c_void, width: *mut u32, height: *mut u32);

// ---- openvr_api.dll exports ----

pub type PFN_VR_GetGenericInterface =
    unsafe extern "C" fn(version: *const c_char, error: *mut EVRInitError) -> *mut c_void;

pub type PFN_VRCompositor = unsafe extern "C" fn() -> *mut c_void;

pub const OPENVR_MODULE: &str = "openvr_api.dll";
pub const VR_GET_GENERIC_INTERFACE: &[u8] = b"VR_GetGenericInterface\0";
pub const VR_COMPOSITOR: &[u8] = b"VRCompositor\0";

/// Call `GetRecommendedRenderTargetSize` through an `IVRSystem` pointer.
///
/// # Safety
/// `system` must be a live `IVRSystem` of the version in [`IVRSystem_Version`].
pub unsafe fn recommended_render_target_size(system: *mut c_void) -> Option<(u32, u32)> {
    if system.is_null() {
        return None;
    }
    let table = *(system as *const *const *const c_void);
    if table.is_null() {
        return None;
    }
    let entry = *table.add(SYSTEM_SLOT_GET_RECOMMENDED_RENDER_TARGET_SIZE);
    if entry.is_null() {
        return None;
    }
    let f: PFN_GetRecommendedRenderTargetSize = core::mem::transmute(entry);
    let (mut w, mut h) = (0u32, 0u32);
    f(system, &mut w, &mut h);
    (w > 0 && h > 0).then_some((w, h))
}
