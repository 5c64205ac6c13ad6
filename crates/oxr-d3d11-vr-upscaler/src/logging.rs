use std::path::PathBuf;
use std::sync::{Once, OnceLock};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILE: &str = "oxr_vr_upscaler.log";

static INIT: Once = Once::new();

/// Kept alive for the process lifetime so buffered lines are flushed.
static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn default_directive(diagnostics: bool) -> &'static str {
    if diagnostics || cfg!(feature = "debug") {
        "debug"
    } else {
        "info"
    }
}

/// Initialize file-based logging next to the DLL.
///
/// `RUST_LOG` overrides `directive`, which overrides the diagnostics default.
pub fn init(directive: Option<&str>, diagnostics: bool) {
    INIT.call_once(|| {
        let log_dir = dll_directory().unwrap_or_else(|| PathBuf::from("."));
        let file_appender = tracing_appender::rolling::never(&log_dir, LOG_FILE);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(directive.unwrap_or(default_directive(diagnostics))))
            .unwrap_or_else(|_| EnvFilter::new(default_directive(diagnostics)));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .with_target(false)
                    .with_thread_ids(true),
            )
            .try_init();

        let _ = GUARD.set(guard);
    });
}

/// Returns the directory containing this DLL (not the host executable).
pub fn dll_directory() -> Option<PathBuf> {
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{
        GetModuleFileNameW, GetModuleHandleExW, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
        GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    };

    let mut module = HMODULE::default();
    let anchor = dll_directory as *const () as *const u16;
    unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCWSTR(anchor),
            &mut module,
        )
        .ok()?;
    }

    let mut buf = vec![0u16; 512];
    let len = unsafe { GetModuleFileNameW(module, &mut buf) } as usize;
    if len == 0 {
        return None;
    }
    let path = String::from_utf16_lossy(&buf[..len]);
    let path = PathBuf::from(path);
    path.parent().map(|p| p.to_path_buf())
}
