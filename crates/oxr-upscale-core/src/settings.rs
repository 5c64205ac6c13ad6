use crate::classifier::ClassifierThresholds;
use crate::quality::{MipBiasPolicy, QualityTier};
use crate::redirect::SceneThresholds;

pub const PER_EYE_CAP_MIN: u32 = 512;
pub const PER_EYE_CAP_MAX: u32 = 8192;

/// How the scene is shrunk before the upscale pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EarlyUpscaleMode {
    /// Shrink matching viewports in place.
    #[default]
    ViewportClamp,
    /// Swap the scene render target for a smaller one and composite back.
    TargetRedirect,
}

impl EarlyUpscaleMode {
    pub fn parse(s: &str) -> Option<EarlyUpscaleMode> {
        match s.trim().to_ascii_lowercase().as_str() {
            "viewport" | "clamp" | "viewport_clamp" => Some(EarlyUpscaleMode::ViewportClamp),
            "rt_redirect" | "redirect" | "target" => Some(EarlyUpscaleMode::TargetRedirect),
            _ => None,
        }
    }
}

/// Everything the engine reads from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub enabled: bool,
    pub quality: QualityTier,
    pub sharpness: f32,
    pub sharpening: bool,
    pub mip_bias: MipBiasPolicy,
    pub early_upscale: bool,
    pub early_mode: EarlyUpscaleMode,
    pub per_eye_cap: Option<u32>,
    pub diagnostics: bool,
    pub toggle_key: u32,
    pub cycle_quality_key: u32,
    pub classifier: ClassifierThresholds,
    pub scene: SceneThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            quality: QualityTier::Quality,
            sharpness: 0.2,
            sharpening: true,
            mip_bias: MipBiasPolicy::Optimal,
            early_upscale: false,
            early_mode: EarlyUpscaleMode::ViewportClamp,
            per_eye_cap: None,
            diagnostics: false,
            toggle_key: 0x24,        // VK_HOME
            cycle_quality_key: 0x21, // VK_PRIOR
            classifier: ClassifierThresholds::default(),
            scene: SceneThresholds::default(),
        }
    }
}

impl Settings {
    /// Sharpness passed to the backend; zero while sharpening is off.
    pub fn effective_sharpness(&self) -> f32 {
        if self.sharpening {
            self.sharpness.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn early_mode_active(&self, mode: EarlyUpscaleMode) -> bool {
        self.enabled && self.early_upscale && self.early_mode == mode
    }
}

pub fn clamp_per_eye_cap(v: u32) -> u32 {
    v.clamp(PER_EYE_CAP_MIN, PER_EYE_CAP_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_mode_parsing() {
        assert_eq!(EarlyUpscaleMode::parse("Viewport"), Some(EarlyUpscaleMode::ViewportClamp));
        assert_eq!(EarlyUpscaleMode::parse(" rt_redirect "), Some(EarlyUpscaleMode::TargetRedirect));
        assert_eq!(EarlyUpscaleMode::parse("x"), None);
    }

    #[test]
    fn sharpness_is_zero_when_disabled() {
        let mut s = Settings {
            sharpness: 1.5,
            ..Default::default()
        };
        assert_eq!(s.effective_sharpness(), 1.0);
        s.sharpening = false;
        assert_eq!(s.effective_sharpness(), 0.0);
    }

    #[test]
    fn cap_is_clamped() {
        assert_eq!(clamp_per_eye_cap(100), 512);
        assert_eq!(clamp_per_eye_cap(10_000), 8192);
        assert_eq!(clamp_per_eye_cap(2048), 2048);
    }
}
