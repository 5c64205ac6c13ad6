//! Substitutes patched into host call tables.
//!
//! Every substitute forwards to the displaced entry recorded in its
//! [`OriginalFn`]; engine work happens before or after that call, never instead of it.

pub mod compositor;
pub mod context;
pub mod device;
pub mod swapchain;

use std::ffi::c_void;
use std::sync::OnceLock;

use oxr_upscale_core::{CallTableInterceptor, OriginalFn, Session};
use tracing::warn;

use crate::backend::Backend;
use crate::gpu::D3d11Gpu;
use crate::protect::VirtualProtectMemory;

pub type D3d11Session = Session<D3d11Gpu, Backend>;

pub static SESSION: OnceLock<D3d11Session> = OnceLock::new();

static INTERCEPTOR: OnceLock<CallTableInterceptor<VirtualProtectMemory>> = OnceLock::new();

pub fn session() -> Option<&'static D3d11Session> {
    SESSION.get()
}

fn interceptor() -> &'static CallTableInterceptor<VirtualProtectMemory> {
    INTERCEPTOR.get_or_init(|| CallTableInterceptor::new(VirtualProtectMemory))
}

/// Patch `slot` of `object`'s call table and record the displaced entry.
///
/// # Safety
/// `object` must be a live COM object whose table has more than `slot` entries,
/// and `substitute` must have the signature `F` describes.
pub(crate) unsafe fn patch<F: Copy>(
    object: *mut c_void,
    slot: usize,
    substitute: *const c_void,
    original: &OriginalFn<F>,
    what: &str,
) -> bool {
    match interceptor().install(object, slot, substitute) {
        Ok(binding) => {
            original.set(&binding);
            true
        }
        Err(e) => {
            warn!("{} hook failed: {}", what, e);
            false
        }
    }
}
