//! Background installation of the host hooks.
//!
//! Call-table addresses are taken from a throwaway device and swap chain on a
//! hidden window; every object of the same class shares those tables.

use std::thread;
use std::time::Duration;

use tracing::{error, info, warn};
use windows::core::{w, Interface};
use windows::Win32::Foundation::{HMODULE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE, D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDeviceAndSwapChain, ID3D11Device, D3D11_CREATE_DEVICE_FLAG, D3D11_SDK_VERSION,
};
use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_MODE_DESC, DXGI_SAMPLE_DESC,
};
use windows::Win32::Graphics::Dxgi::{
    IDXGIFactory, IDXGISwapChain, DXGI_SWAP_CHAIN_DESC, DXGI_SWAP_EFFECT_DISCARD,
    DXGI_USAGE_RENDER_TARGET_OUTPUT,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, RegisterClassW, HMENU, WINDOW_EX_STYLE,
    WNDCLASSW, WS_OVERLAPPED,
};

use crate::hooks::{compositor, device, session, swapchain};
use oxr_upscale_core::{retry_delay, LogOnce};

const ATTEMPTS: u32 = 8;
const RETRY_BASE: Duration = Duration::from_millis(200);
const RETRY_MAX: Duration = Duration::from_secs(2);

static SWAP_CHAIN_FAILED: LogOnce = LogOnce::new();

pub fn spawn() {
    let spawned = thread::Builder::new()
        .name("oxr-vr-upscaler-install".into())
        .spawn(run);
    if let Err(e) = spawned {
        error!("installer thread failed to start: {}", e);
    }
}

fn run() {
    let Some(session) = session() else {
        return;
    };
    let mut swap_chain_done = false;

    for attempt in 1..=ATTEMPTS {
        compositor::ensure_installed(session);
        if !swap_chain_done {
            match unsafe { hook_swap_chain() } {
                Ok(()) => {
                    swap_chain_done = true;
                    session.mark_installed();
                    info!(attempt, "swap chain hooks installed");
                }
                Err(e) => {
                    if SWAP_CHAIN_FAILED.fire() {
                        warn!(attempt, "swap chain hook failed: {}", e);
                    }
                }
            }
        }
        if swap_chain_done && compositor::ensure_installed(session) {
            break;
        }
        if attempt < ATTEMPTS {
            thread::sleep(retry_delay(RETRY_BASE, attempt, RETRY_MAX));
        }
    }

    if !swap_chain_done {
        error!("giving up on swap chain hooks after {} attempts", ATTEMPTS);
    } else if !compositor::ensure_installed(session) {
        info!("compositor not available yet, retrying on every Present");
    }
}

unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    DefWindowProcW(hwnd, msg, wparam, lparam)
}

unsafe fn create_window() -> Result<HWND, String> {
    let hinstance = GetModuleHandleW(None).map_err(|e| format!("GetModuleHandleW failed: {}", e))?;
    let class_name = w!("OxrVrUpscalerInstall");
    let wc = WNDCLASSW {
        lpfnWndProc: Some(wnd_proc),
        hInstance: hinstance.into(),
        lpszClassName: class_name,
        ..Default::default()
    };
    // Already registered on a retry.
    RegisterClassW(&wc);

    CreateWindowExW(
        WINDOW_EX_STYLE::default(),
        class_name,
        w!("oxr-vr-upscaler"),
        WS_OVERLAPPED,
        0,
        0,
        16,
        16,
        HWND::default(),
        HMENU::default(),
        hinstance,
        None,
    )
    .map_err(|e| format!("CreateWindowExW failed: {}", e))
}

unsafe fn create_swap_chain(hwnd: HWND, driver: D3D_DRIVER_TYPE) -> Result<(IDXGISwapChain, ID3D11Device), String> {
    let desc = DXGI_SWAP_CHAIN_DESC {
        BufferDesc: DXGI_MODE_DESC {
            Width: 16,
            Height: 16,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ..Default::default()
        },
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
        BufferCount: 1,
        OutputWindow: hwnd,
        Windowed: true.into(),
        SwapEffect: DXGI_SWAP_EFFECT_DISCARD,
        Flags: 0,
    };
    let mut swap_chain: Option<IDXGISwapChain> = None;
    let mut device: Option<ID3D11Device> = None;
    D3D11CreateDeviceAndSwapChain(
        None,
        driver,
        HMODULE::default(),
        D3D11_CREATE_DEVICE_FLAG(0),
        None,
        D3D11_SDK_VERSION,
        Some(&desc),
        Some(&mut swap_chain),
        Some(&mut device),
        None,
        None,
    )
    .map_err(|e| format!("D3D11CreateDeviceAndSwapChain failed: {}", e))?;
    match (swap_chain, device) {
        (Some(s), Some(d)) => Ok((s, d)),
        _ => Err("D3D11CreateDeviceAndSwapChain returned null".into()),
    }
}

unsafe fn hook_swap_chain() -> Result<(), String> {
    let hwnd = create_window()?;
    let created = create_swap_chain(hwnd, D3D_DRIVER_TYPE_HARDWARE)
        .or_else(|_| create_swap_chain(hwnd, D3D_DRIVER_TYPE_WARP));
    let result = created.and_then(|(swap_chain, device)| {
        if !swapchain::install(swap_chain.as_raw()) {
            return Err("Present patch failed".to_string());
        }
        // The host device shares these tables, so its images are seen from creation on.
        device::install(&device);
        match swap_chain.GetParent::<IDXGIFactory>() {
            Ok(factory) => {
                swapchain::install_factory(factory.as_raw());
            }
            Err(e) => warn!("swap chain factory unavailable: {}", e),
        }
        Ok(())
    });
    let _ = DestroyWindow(hwnd);
    result
}
