use crate::geometry::Extent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityTier {
    Performance = 0,
    Balanced = 1,
    #[default]
    Quality = 2,
    UltraPerformance = 3,
    UltraQuality = 4,
    Dlaa = 5,
}

impl QualityTier {
    pub const ALL: [QualityTier; 6] = [
        QualityTier::UltraPerformance,
        QualityTier::Performance,
        QualityTier::Balanced,
        QualityTier::Quality,
        QualityTier::UltraQuality,
        QualityTier::Dlaa,
    ];

    pub fn from_index(i: u32) -> Option<QualityTier> {
        match i {
            0 => Some(QualityTier::Performance),
            1 => Some(QualityTier::Balanced),
            2 => Some(QualityTier::Quality),
            3 => Some(QualityTier::UltraPerformance),
            4 => Some(QualityTier::UltraQuality),
            5 => Some(QualityTier::Dlaa),
            _ => None,
        }
    }

    /// Accepts the tier name in any case, with or without separators, or its index.
    pub fn parse(s: &str) -> Option<QualityTier> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match key.as_str() {
            "performance" | "perf" => Some(QualityTier::Performance),
            "balanced" => Some(QualityTier::Balanced),
            "quality" => Some(QualityTier::Quality),
            "ultraperformance" => Some(QualityTier::UltraPerformance),
            "ultraquality" => Some(QualityTier::UltraQuality),
            "dlaa" | "native" | "nativeaa" => Some(QualityTier::Dlaa),
            other => other.parse().ok().and_then(QualityTier::from_index),
        }
    }

    /// Per-axis render scale.
    pub fn scale(self) -> f32 {
        match self {
            QualityTier::Performance => 0.50,
            QualityTier::Balanced => 0.58,
            QualityTier::Quality => 0.67,
            QualityTier::UltraPerformance => 0.33,
            QualityTier::UltraQuality => 0.77,
            QualityTier::Dlaa => 1.0,
        }
    }

    /// Texture LOD bias matching the render scale.
    pub fn mip_bias(self) -> f32 {
        match self {
            QualityTier::Performance => -1.0,
            QualityTier::Balanced => -0.75,
            QualityTier::Quality => -0.5,
            QualityTier::UltraPerformance => -1.585,
            QualityTier::UltraQuality => -0.25,
            QualityTier::Dlaa => 0.0,
        }
    }

    /// Next tier from fastest to highest quality, wrapping around.
    pub fn cycle(self) -> QualityTier {
        let pos = Self::ALL.iter().position(|t| *t == self).unwrap_or(0);
        Self::ALL[(pos + 1) % Self::ALL.len()]
    }

    pub fn name(self) -> &'static str {
        match self {
            QualityTier::Performance => "Performance",
            QualityTier::Balanced => "Balanced",
            QualityTier::Quality => "Quality",
            QualityTier::UltraPerformance => "UltraPerformance",
            QualityTier::UltraQuality => "UltraQuality",
            QualityTier::Dlaa => "DLAA",
        }
    }
}

/// Render size for a per-eye output size.
///
/// A backend-provided size wins over the static table. The result is even,
/// at least 2 and never larger than `output`.
pub fn render_size_for_output(output: Extent, tier: QualityTier, optimal: Option<Extent>) -> Extent {
    if output.width < 2 || output.height < 2 {
        return output;
    }
    let size = match optimal.filter(|e| !e.is_empty()) {
        Some(e) => e,
        None => {
            let s = tier.scale();
            Extent::new(
                (output.width as f32 * s).round() as u32,
                (output.height as f32 * s).round() as u32,
            )
        }
    };
    size.even().min(output).even()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MipBiasPolicy {
    #[default]
    Off,
    Optimal,
    Manual(f32),
}

const NEUTRAL_BIAS: f32 = 1e-4;
const LOW_ANISOTROPY: u32 = 2;

/// Bias to substitute into a sampler description, or `None` to pass it through.
pub fn sampler_bias_override(
    policy: MipBiasPolicy,
    requested_bias: f32,
    max_anisotropy: u32,
    tier: QualityTier,
) -> Option<f32> {
    if requested_bias.abs() >= NEUTRAL_BIAS || max_anisotropy > LOW_ANISOTROPY {
        return None;
    }
    match policy {
        MipBiasPolicy::Off => None,
        MipBiasPolicy::Optimal => Some(tier.mip_bias()),
        MipBiasPolicy::Manual(bias) => Some(bias),
    }
}
