#![allow(non_snake_case)]
#![cfg_attr(not(windows), allow(dead_code))]

mod config;

#[cfg(windows)]
mod backend;
#[cfg(windows)]
mod gpu;
#[cfg(windows)]
mod hooks;
#[cfg(windows)]
mod install;
#[cfg(windows)]
mod logging;
#[cfg(windows)]
mod openvr;
#[cfg(windows)]
mod overlay;
#[cfg(windows)]
mod protect;

#[cfg(windows)]
use windows::Win32::Foundation::HINSTANCE;
#[cfg(windows)]
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

#[cfg(windows)]
fn attach() {
    use oxr_upscale_core::Session;
    use tracing::{info, warn};

    let dir = logging::dll_directory().unwrap_or_else(|| std::path::PathBuf::from("."));
    let config = config::load(&dir);
    logging::init(config.log_filter.as_deref(), config.settings.diagnostics);
    for w in &config.warnings {
        warn!("config: {}", w);
    }

    let settings = config.settings;
    let backend = backend::Backend::select(&config.backend, &dir);
    info!(
        enabled = settings.enabled,
        quality = settings.quality.name(),
        early_upscale = settings.early_upscale,
        mode = ?settings.early_mode,
        "OXR VR upscaler loaded"
    );
    if hooks::SESSION.set(Session::new(settings, backend)).is_err() {
        return;
    }
    install::spawn();
}

#[cfg(windows)]
#[no_mangle]
unsafe extern "system" fn DllMain(_hinst: HINSTANCE, call_reason: u32, reserved: *mut ()) -> bool {
    match call_reason {
        DLL_PROCESS_ATTACH => {
            attach();
            true
        }
        DLL_PROCESS_DETACH => {
            // A non-null `reserved` means the process is exiting and the device may already be gone.
            if reserved.is_null() {
                if let Some(session) = hooks::session() {
                    session.shutdown();
                }
                openvr::reset();
            }
            tracing::info!("OXR VR upscaler unloading");
            true
        }
        _ => true,
    }
}
