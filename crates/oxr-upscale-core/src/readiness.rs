use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// How far the engine got in discovering what it needs to submit upscaled output.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadinessState {
    Cold = 0,
    HaveCompositor = 1,
    HaveSwapChain = 2,
    HaveUpscaleFeature = 3,
    Ready = 4,
}

impl ReadinessState {
    fn from_u8(v: u8) -> ReadinessState {
        match v {
            0 => ReadinessState::Cold,
            1 => ReadinessState::HaveCompositor,
            2 => ReadinessState::HaveSwapChain,
            3 => ReadinessState::HaveUpscaleFeature,
            _ => ReadinessState::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessEvent {
    CompositorHooked,
    SwapChainObserved,
    FeatureReady,
    EyeUpscaled,
    /// Resize or device loss.
    Teardown,
    Shutdown,
}

/// Single transition function. Only `Teardown` and `Shutdown` move backwards.
pub fn next(state: ReadinessState, event: ReadinessEvent) -> ReadinessState {
    use ReadinessState::*;
    match event {
        ReadinessEvent::CompositorHooked => state.max(HaveCompositor),
        ReadinessEvent::SwapChainObserved => state.max(HaveSwapChain),
        ReadinessEvent::FeatureReady => state.max(HaveUpscaleFeature),
        ReadinessEvent::EyeUpscaled if state >= HaveUpscaleFeature => Ready,
        ReadinessEvent::EyeUpscaled => state,
        ReadinessEvent::Teardown => state.min(HaveSwapChain),
        ReadinessEvent::Shutdown => Cold,
    }
}

pub struct Readiness {
    state: AtomicU8,
    last_evaluate_ok: AtomicBool,
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

impl Readiness {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ReadinessState::Cold as u8),
            last_evaluate_ok: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ReadinessState {
        ReadinessState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Apply `event`, returning the (previous, new) states.
    pub fn transition(&self, event: ReadinessEvent) -> (ReadinessState, ReadinessState) {
        let prev = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(next(ReadinessState::from_u8(v), event) as u8)
            })
            .map_or_else(ReadinessState::from_u8, ReadinessState::from_u8);
        if matches!(event, ReadinessEvent::Teardown | ReadinessEvent::Shutdown) {
            self.last_evaluate_ok.store(false, Ordering::Release);
        }
        let new = next(prev, event);
        if prev != new {
            tracing::info!(from = ?prev, to = ?new, "readiness changed");
        }
        (prev, new)
    }

    pub fn record_evaluate(&self, ok: bool) {
        self.last_evaluate_ok.store(ok, Ordering::Release);
    }

    pub fn last_evaluate_ok(&self) -> bool {
        self.last_evaluate_ok.load(Ordering::Acquire)
    }
}

/// Whether an upscaled image may replace the submitted content.
pub fn output_gate(
    state: ReadinessState,
    last_evaluate_ok: bool,
    output: usize,
    input: usize,
    output_samples: u32,
) -> bool {
    state == ReadinessState::Ready && last_evaluate_ok && output != input && output_samples == 1
}

#[cfg(test)]
mod tests {
    use super::ReadinessEvent::*;
    use super::ReadinessState::*;
    use super::*;

    #[test]
    fn advances_in_order() {
        let r = Readiness::new();
        assert_eq!(r.state(), Cold);
        r.transition(CompositorHooked);
        r.transition(SwapChainObserved);
        assert_eq!(r.state(), HaveSwapChain);
        r.transition(EyeUpscaled);
        assert_eq!(r.state(), HaveSwapChain);
        r.transition(FeatureReady);
        r.transition(EyeUpscaled);
        assert_eq!(r.state(), Ready);
    }

    #[test]
    fn never_regresses_on_forward_events() {
        let r = Readiness::new();
        r.transition(FeatureReady);
        r.transition(EyeUpscaled);
        for e in [CompositorHooked, SwapChainObserved, FeatureReady, EyeUpscaled] {
            r.transition(e);
            assert_eq!(r.state(), Ready);
        }
    }

    #[test]
    fn teardown_stops_at_swap_chain() {
        let r = Readiness::new();
        r.transition(CompositorHooked);
        r.transition(SwapChainObserved);
        r.transition(FeatureReady);
        r.record_evaluate(true);
        r.transition(EyeUpscaled);
        let (prev, new) = r.transition(Teardown);
        assert_eq!((prev, new), (Ready, HaveSwapChain));
        assert!(!r.last_evaluate_ok());
        assert_eq!(next(HaveCompositor, Teardown), HaveCompositor);
        r.transition(Shutdown);
        assert_eq!(r.state(), Cold);
    }

    #[test]
    fn gate_requires_every_condition() {
        assert!(output_gate(Ready, true, 1, 2, 1));
        assert!(!output_gate(HaveUpscaleFeature, true, 1, 2, 1));
        assert!(!output_gate(Ready, false, 1, 2, 1));
        assert!(!output_gate(Ready, true, 2, 2, 1));
        assert!(!output_gate(Ready, true, 1, 2, 4));
    }
}
