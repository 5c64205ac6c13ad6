//! Lookups against the host's already-loaded `openvr_api.dll`.

use std::ffi::c_void;
use std::sync::atomic::{AtomicUsize, Ordering};

use ovr_sys::{
    IVRCompositor_Version, IVRSystem_Version, PFN_VRCompositor, PFN_VR_GetGenericInterface,
    VRInitError_None, OPENVR_MODULE, VR_COMPOSITOR, VR_GET_GENERIC_INTERFACE,
};
use windows::core::{PCSTR, PCWSTR};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

static SYSTEM: AtomicUsize = AtomicUsize::new(0);

fn module() -> Option<HMODULE> {
    let wname: Vec<u16> = OPENVR_MODULE.encode_utf16().chain(std::iter::once(0)).collect();
    unsafe { GetModuleHandleW(PCWSTR(wname.as_ptr())) }.ok()
}

unsafe fn export(module: HMODULE, name: &[u8]) -> Option<*const c_void> {
    GetProcAddress(module, PCSTR(name.as_ptr())).map(|f| f as *const c_void)
}

/// `VR_GetGenericInterface(version)`; `version` must be NUL-terminated.
pub fn generic_interface(version: &[u8]) -> Option<*mut c_void> {
    let module = module()?;
    unsafe {
        let f: PFN_VR_GetGenericInterface = std::mem::transmute(export(module, VR_GET_GENERIC_INTERFACE)?);
        let mut error = VRInitError_None;
        let iface = f(version.as_ptr() as *const _, &mut error);
        (error == VRInitError_None && !iface.is_null()).then_some(iface)
    }
}

/// The compositor interface, via the `VRCompositor` export when the runtime has one.
pub fn compositor() -> Option<*mut c_void> {
    let module = module()?;
    let direct = unsafe {
        export(module, VR_COMPOSITOR).and_then(|p| {
            let f: PFN_VRCompositor = std::mem::transmute(p);
            let iface = f();
            (!iface.is_null()).then_some(iface)
        })
    };
    direct.or_else(|| generic_interface(IVRCompositor_Version))
}

/// Per-eye size recommended by the runtime.
pub fn recommended_render_target_size() -> Option<(u32, u32)> {
    let mut system = SYSTEM.load(Ordering::Acquire) as *mut c_void;
    if system.is_null() {
        system = generic_interface(IVRSystem_Version)?;
        SYSTEM.store(system as usize, Ordering::Release);
    }
    unsafe { ovr_sys::recommended_render_target_size(system) }
}

/// Forget the cached system interface.
pub fn reset() {
    SYSTEM.store(0, Ordering::Release);
}
