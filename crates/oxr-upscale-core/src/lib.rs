//! Portable part of the VR upscale injector.
//!
//! Everything here is independent of the graphics API: the platform crate
//! supplies a [`MemoryProtection`] for call-table patching, a [`GpuDevice`]
//! for image work and an [`UpscaleBackend`], then routes every hooked host
//! call through one [`Session`].

pub mod backend;
pub mod classifier;
pub mod deferred;
pub mod display;
pub mod error;
pub mod geometry;
pub mod interceptor;
pub mod orchestrator;
pub mod quality;
pub mod readiness;
pub mod redirect;
pub mod session;
pub mod settings;
pub mod submit;

#[cfg(test)]
mod testing;

pub use backend::{EvaluateParams, GpuDevice, ImageKey, UpscaleBackend};
pub use classifier::{BindFlags, Classification, ClassifierThresholds, Format, ImageDesc};
pub use deferred::{retry_delay, DeferredInstall};
pub use display::DisplaySizes;
pub use error::{GpuError, HookError};
pub use geometry::{AtlasLayout, Bounds, Extent, Eye, Rect, UvWindow, Viewport};
pub use interceptor::{CallTableInterceptor, HookBinding, MemoryProtection, OriginalFn};
pub use orchestrator::UpscaleOrchestrator;
pub use quality::{MipBiasPolicy, QualityTier};
pub use readiness::{Readiness, ReadinessEvent, ReadinessState};
pub use redirect::{BindDecision, ContextKind, SceneRedirectEngine, SceneThresholds};
pub use session::{Overlay, Session};
pub use settings::{EarlyUpscaleMode, Settings};
pub use submit::{SubmitOutcome, SubmitRequest};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One-shot latch for diagnostics that should appear in the log only once.
#[derive(Debug, Default)]
pub struct LogOnce(AtomicBool);

impl LogOnce {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Returns `true` the first time it is called.
    pub fn fire(&self) -> bool {
        !self.0.swap(true, Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}
