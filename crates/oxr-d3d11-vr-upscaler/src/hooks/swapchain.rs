use std::ffi::c_void;
use std::sync::Mutex;
use std::time::Instant;

use oxr_upscale_core::{DeferredInstall, LogOnce, OriginalFn, Overlay};
use tracing::{debug, info, warn};
use windows::core::{Interface, HRESULT};
use windows::Win32::Foundation::E_FAIL;
use windows::Win32::Graphics::Direct3D11::ID3D11Device;
use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;
use windows::Win32::Graphics::Dxgi::{
    IDXGISwapChain, DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, DXGI_SWAP_CHAIN_DESC,
};

use super::{compositor, device, patch, session, D3d11Session};
use crate::gpu::D3d11Gpu;
use crate::overlay::HotkeyOverlay;

/// `IDXGISwapChain::Present`
pub const SLOT_PRESENT: usize = 8;
/// `IDXGISwapChain::ResizeBuffers`
pub const SLOT_RESIZE_BUFFERS: usize = 13;
/// `IDXGIFactory::CreateSwapChain`
pub const SLOT_FACTORY_CREATE_SWAP_CHAIN: usize = 10;

type PresentFn = unsafe extern "system" fn(*mut c_void, u32, u32) -> HRESULT;
type ResizeBuffersFn = unsafe extern "system" fn(*mut c_void, u32, u32, u32, DXGI_FORMAT, u32) -> HRESULT;
type CreateSwapChainFn =
    unsafe extern "system" fn(*mut c_void, *mut c_void, *const DXGI_SWAP_CHAIN_DESC, *mut *mut c_void) -> HRESULT;

static PRESENT: OriginalFn<PresentFn> = OriginalFn::new();
static RESIZE_BUFFERS: OriginalFn<ResizeBuffersFn> = OriginalFn::new();
static CREATE_SWAP_CHAIN: OriginalFn<CreateSwapChainFn> = OriginalFn::new();
static RESIZE_HOOK: DeferredInstall = DeferredInstall::new();

static OVERLAY: Mutex<HotkeyOverlay> = Mutex::new(HotkeyOverlay::new());
static LAST_PRESENT: Mutex<Option<Instant>> = Mutex::new(None);
static NO_D3D11_DEVICE: LogOnce = LogOnce::new();

/// Hook `Present` and `ResizeBuffers` on the class of `swap_chain`.
///
/// Returns whether `Present` is hooked. A failed `ResizeBuffers` patch stays
/// pending and is retried from the next `Present`.
///
/// # Safety
/// `swap_chain` must be a live `IDXGISwapChain`.
pub unsafe fn install(swap_chain: *mut c_void) -> bool {
    let present_ok = patch(swap_chain, SLOT_PRESENT, present as *const c_void, &PRESENT, "Present");
    install_resize(swap_chain);
    present_ok
}

unsafe fn install_resize(swap_chain: *mut c_void) {
    RESIZE_HOOK.try_complete(|| {
        patch(
            swap_chain,
            SLOT_RESIZE_BUFFERS,
            resize_buffers as *const c_void,
            &RESIZE_BUFFERS,
            "ResizeBuffers",
        )
    });
}

/// Hook `CreateSwapChain` so swap chains created later are covered too.
///
/// # Safety
/// `factory` must be a live `IDXGIFactory`.
pub unsafe fn install_factory(factory: *mut c_void) -> bool {
    patch(
        factory,
        SLOT_FACTORY_CREATE_SWAP_CHAIN,
        create_swap_chain as *const c_void,
        &CREATE_SWAP_CHAIN,
        "CreateSwapChain",
    )
}

fn frame_delta() -> f32 {
    let now = Instant::now();
    let Ok(mut last) = LAST_PRESENT.lock() else {
        return 0.0;
    };
    let dt = last.map(|t| now.duration_since(t).as_secs_f32()).unwrap_or(0.0);
    *last = Some(now);
    dt
}

unsafe fn bind_device(session: &D3d11Session, swap_chain: *mut c_void) {
    let Some(swap_chain) = IDXGISwapChain::from_raw_borrowed(&swap_chain) else {
        return;
    };
    let device = match swap_chain.GetDevice::<ID3D11Device>() {
        Ok(d) => d,
        Err(e) => {
            if NO_D3D11_DEVICE.fire() {
                debug!("swap chain is not backed by a D3D11 device: {}", e);
            }
            return;
        }
    };
    device::install(&device);
    match D3d11Gpu::new(device) {
        Ok(gpu) => {
            session.attach_device(gpu);
        }
        Err(e) => warn!("device binding failed: {}", e),
    }
}

unsafe extern "system" fn present(this: *mut c_void, sync_interval: u32, flags: u32) -> HRESULT {
    if let Some(session) = session() {
        if session.is_installed() {
            if !RESIZE_HOOK.is_done() {
                install_resize(this);
            }
            compositor::ensure_installed(session);
            if !session.has_device() {
                bind_device(session, this);
            }
            let dt = frame_delta();
            match OVERLAY.lock() {
                Ok(mut overlay) => {
                    session.on_present(Some(&mut *overlay), dt);
                }
                Err(_) => {
                    session.on_present(None, dt);
                }
            }
        }
    }
    let Some(forward) = PRESENT.get() else {
        return E_FAIL;
    };
    let hr = forward(this, sync_interval, flags);
    if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
        if let Some(session) = session() {
            warn!("device lost: {}", hr.message());
            session.on_device_lost();
        }
    }
    hr
}

unsafe extern "system" fn resize_buffers(
    this: *mut c_void,
    buffer_count: u32,
    width: u32,
    height: u32,
    format: DXGI_FORMAT,
    flags: u32,
) -> HRESULT {
    let Some(forward) = RESIZE_BUFFERS.get() else {
        return E_FAIL;
    };
    let Some(session) = session() else {
        return forward(this, buffer_count, width, height, format, flags);
    };
    if session.has_device() {
        info!(size = format_args!("{}x{}", width, height), "swap chain resizing");
        session.teardown();
    }
    if let Ok(mut overlay) = OVERLAY.lock() {
        overlay.shutdown();
    }

    let hr = forward(this, buffer_count, width, height, format, flags);
    if hr.is_ok() && session.is_installed() {
        bind_device(session, this);
        if session.settings().enabled {
            session.ensure_feature();
        }
    }
    hr
}

unsafe extern "system" fn create_swap_chain(
    this: *mut c_void,
    device: *mut c_void,
    desc: *const DXGI_SWAP_CHAIN_DESC,
    out: *mut *mut c_void,
) -> HRESULT {
    let Some(forward) = CREATE_SWAP_CHAIN.get() else {
        return E_FAIL;
    };
    let hr = forward(this, device, desc, out);
    if hr.is_ok() && !out.is_null() && !(*out).is_null() && install(*out) {
        debug!("swap chain created and hooked");
    }
    hr
}
