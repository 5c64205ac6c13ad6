//! `oxr_vr_upscaler.ini` loader.
//!
//! Keys are matched case-insensitively and may carry the legacy `m` prefix
//! (`mQuality` and `quality` are the same key). Unknown keys are ignored,
//! malformed values keep the default and are reported once at load time.

use std::path::Path;

use ini::Ini;
use oxr_upscale_core::settings::{clamp_per_eye_cap, PER_EYE_CAP_MAX};
use oxr_upscale_core::{EarlyUpscaleMode, MipBiasPolicy, QualityTier, Settings};

pub const CONFIG_FILE: &str = "oxr_vr_upscaler.ini";

const DEFAULT_PER_EYE_CAP: u32 = 4096;

/// Which upscale implementation to load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendChoice {
    /// Vendor library if present next to the DLL, otherwise linear.
    #[default]
    Auto,
    Linear,
    /// Vendor library at an explicit path.
    Library(String),
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub settings: Settings,
    pub backend: BackendChoice,
    /// `EnvFilter` directive; `RUST_LOG` still wins.
    pub log_filter: Option<String>,
    /// Problems found while parsing, logged once logging is up.
    pub warnings: Vec<String>,
}

/// Load from `dir`. A missing file yields defaults.
pub fn load(dir: &Path) -> Config {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Config::default();
    }
    match Ini::load_from_file(&path) {
        Ok(ini) => from_ini(&ini),
        Err(e) => Config {
            warnings: vec![format!("{}: {}", path.display(), e)],
            ..Config::default()
        },
    }
}

fn normalize_key(key: &str) -> String {
    let key = key.trim();
    let mut chars = key.chars();
    let stripped = match (chars.next(), chars.next()) {
        (Some('m'), Some(c)) if c.is_ascii_uppercase() => &key[1..],
        _ => key,
    };
    stripped.to_ascii_lowercase()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_u32(value: &str) -> Option<u32> {
    let v = value.trim();
    match v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => v.parse().ok(),
    }
}

fn parse_f32(value: &str) -> Option<f32> {
    value.trim().parse::<f32>().ok().filter(|v| v.is_finite())
}

struct Reader<'a> {
    warnings: &'a mut Vec<String>,
}

impl Reader<'_> {
    fn value<T>(&mut self, key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
        if parsed.is_none() {
            self.warnings
                .push(format!("ignoring {} = {:?}: unrecognised value", key, raw));
        }
        parsed
    }
}

pub fn from_ini(ini: &Ini) -> Config {
    let mut config = Config::default();
    let mut warnings = Vec::new();
    let mut r = Reader {
        warnings: &mut warnings,
    };
    let s = &mut config.settings;

    let mut optimal_bias: Option<bool> = None;
    let mut manual_bias: Option<f32> = None;
    let mut cap_enabled = false;
    let mut cap = DEFAULT_PER_EYE_CAP;

    for (section, props) in ini.iter() {
        let section = section.map(|n| n.trim().to_ascii_lowercase());
        for (key, raw) in props.iter() {
            let k = normalize_key(key);
            match (section.as_deref(), k.as_str()) {
                (Some("settings"), "enableupscaler" | "enabled") => {
                    if let Some(v) = r.value(key, raw, parse_bool(raw)) {
                        s.enabled = v;
                    }
                }
                (Some("settings"), "quality" | "qualitylevel") => {
                    if let Some(v) = r.value(key, raw, QualityTier::parse(raw)) {
                        s.quality = v;
                    }
                }
                (Some("settings"), "sharpening" | "enablesharpening") => {
                    if let Some(v) = r.value(key, raw, parse_bool(raw)) {
                        s.sharpening = v;
                    }
                }
                (Some("settings"), "sharpness") => {
                    if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                        s.sharpness = v.clamp(0.0, 1.0);
                    }
                }
                (Some("settings"), "useoptimalmiplodbias") => {
                    optimal_bias = r.value(key, raw, parse_bool(raw));
                }
                (Some("settings"), "miplodbias") => {
                    manual_bias = r.value(key, raw, parse_f32(raw)).map(|v| v.clamp(-3.0, 3.0));
                }
                (Some("settings"), "earlyupscale" | "earlydlssenabled") => {
                    if let Some(v) = r.value(key, raw, parse_bool(raw)) {
                        s.early_upscale = v;
                    }
                }
                (Some("settings"), "earlyupscalemode" | "earlydlssmode") => {
                    let mode = EarlyUpscaleMode::parse(raw).or(match raw.trim() {
                        "0" => Some(EarlyUpscaleMode::ViewportClamp),
                        "1" => Some(EarlyUpscaleMode::TargetRedirect),
                        _ => None,
                    });
                    if let Some(v) = r.value(key, raw, mode) {
                        s.early_mode = v;
                    }
                }
                (Some("settings"), "diagnostics" | "debugearlydlss") => {
                    if let Some(v) = r.value(key, raw, parse_bool(raw)) {
                        s.diagnostics = v;
                    }
                }
                (Some("settings"), "enablepereyecap") => {
                    cap_enabled = r.value(key, raw, parse_bool(raw)).unwrap_or(false);
                }
                (Some("settings"), "pereyemaxdim" | "pereyemaxdimension") => {
                    if let Some(v) = r.value(key, raw, parse_u32(raw)) {
                        cap = clamp_per_eye_cap(v);
                    }
                }
                (Some("settings"), "backend") => {
                    config.backend = match raw.trim().to_ascii_lowercase().as_str() {
                        "" | "auto" => BackendChoice::Auto,
                        "linear" | "bilinear" | "none" => BackendChoice::Linear,
                        _ => BackendChoice::Library(raw.trim().to_string()),
                    };
                }
                (Some("settings"), "loglevel") => {
                    config.log_filter = Some(raw.trim().to_string()).filter(|v| !v.is_empty());
                }
                (Some("hotkeys"), "toggleupscaler") => {
                    if let Some(v) = r.value(key, raw, parse_u32(raw)) {
                        s.toggle_key = v;
                    }
                }
                (Some("hotkeys"), "cyclequality") => {
                    if let Some(v) = r.value(key, raw, parse_u32(raw)) {
                        s.cycle_quality_key = v;
                    }
                }
                (Some("heuristics"), name) => read_heuristic(s, &mut r, key, name, raw),
                _ => {}
            }
        }
    }

    s.mip_bias = match (optimal_bias, manual_bias) {
        (Some(true), _) => MipBiasPolicy::Optimal,
        (_, Some(bias)) if bias.abs() > f32::EPSILON => MipBiasPolicy::Manual(bias),
        (Some(false), _) => MipBiasPolicy::Off,
        _ => s.mip_bias,
    };
    s.per_eye_cap = cap_enabled.then_some(cap.min(PER_EYE_CAP_MAX));

    config.warnings = warnings;
    config
}

fn read_heuristic(s: &mut Settings, r: &mut Reader<'_>, key: &str, name: &str, raw: &str) {
    let c = &mut s.classifier;
    let t = &mut s.scene;
    let ratio = |v: f32| v.clamp(0.01, 4.0);
    match name {
        "motionminratio" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                c.motion_min_ratio = ratio(v);
            }
        }
        "motionmaxratio" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                c.motion_max_ratio = ratio(v);
            }
        }
        "depthmindim" => {
            if let Some(v) = r.value(key, raw, parse_u32(raw)) {
                c.depth_min_dim = v.min(8192);
            }
        }
        "depthminratio" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                c.depth_min_ratio = ratio(v);
            }
        }
        "depthmaxratio" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                c.depth_max_ratio = ratio(v);
            }
        }
        "scenemindim" => {
            if let Some(v) = r.value(key, raw, parse_u32(raw)) {
                t.min_dim = v.min(8192);
            }
        }
        "atlasratio" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                t.atlas_ratio = v.clamp(1.0, 4.0);
            }
        }
        "sizetolerance" => {
            if let Some(v) = r.value(key, raw, parse_f32(raw)) {
                t.size_tolerance = v.clamp(0.0, 0.5);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        from_ini(&Ini::load_from_str(text).unwrap())
    }

    #[test]
    fn empty_file_gives_defaults() {
        let c = parse("");
        assert_eq!(c.settings, Settings::default());
        assert_eq!(c.backend, BackendChoice::Auto);
        assert!(c.warnings.is_empty());
    }

    #[test]
    fn legacy_prefixed_keys_are_accepted() {
        let c = parse(
            "[Settings]\n\
             mEnableUpscaler = false\n\
             mQuality = 0\n\
             mSharpness = 0.7\n\
             mEarlyDlssEnabled = yes\n\
             mEarlyDlssMode = rt_redirect\n",
        );
        let s = c.settings;
        assert!(!s.enabled);
        assert_eq!(s.quality, QualityTier::Performance);
        assert!((s.sharpness - 0.7).abs() < 1e-6);
        assert!(s.early_upscale);
        assert_eq!(s.early_mode, EarlyUpscaleMode::TargetRedirect);
    }

    #[test]
    fn mip_lod_bias_key_is_not_mistaken_for_prefix() {
        let c = parse("[Settings]\nUseOptimalMipLodBias = off\nMipLodBias = -0.8\n");
        assert_eq!(c.settings.mip_bias, MipBiasPolicy::Manual(-0.8));

        let c = parse("[Settings]\nUseOptimalMipLodBias = off\n");
        assert_eq!(c.settings.mip_bias, MipBiasPolicy::Off);
    }

    #[test]
    fn per_eye_cap_is_clamped_and_only_applies_when_enabled() {
        let c = parse("[Settings]\nmPerEyeMaxDim = 100\n");
        assert_eq!(c.settings.per_eye_cap, None);

        let c = parse("[Settings]\nmEnablePerEyeCap = 1\nmPerEyeMaxDim = 100\n");
        assert_eq!(c.settings.per_eye_cap, Some(512));

        let c = parse("[Settings]\nmEnablePerEyeCap = 1\n");
        assert_eq!(c.settings.per_eye_cap, Some(4096));
    }

    #[test]
    fn hotkeys_accept_hex() {
        let c = parse("[Hotkeys]\nmToggleUpscaler = 0x2D\nmCycleQuality = 34\n");
        assert_eq!(c.settings.toggle_key, 0x2D);
        assert_eq!(c.settings.cycle_quality_key, 34);
    }

    #[test]
    fn bad_values_keep_defaults_and_warn() {
        let c = parse("[Settings]\nmQuality = ultra-mega\nmSharpness = sharp\n");
        assert_eq!(c.settings.quality, Settings::default().quality);
        assert_eq!(c.warnings.len(), 2);
    }

    #[test]
    fn backend_selection() {
        assert_eq!(parse("[Settings]\nBackend = linear\n").backend, BackendChoice::Linear);
        assert_eq!(
            parse("[Settings]\nBackend = vendor_upscaler.dll\n").backend,
            BackendChoice::Library("vendor_upscaler.dll".into())
        );
    }

    #[test]
    fn heuristics_override_thresholds() {
        let c = parse("[Heuristics]\nAtlasRatio = 1.9\nDepthMinDim = 256\n");
        assert!((c.settings.scene.atlas_ratio - 1.9).abs() < 1e-6);
        assert_eq!(c.settings.classifier.depth_min_dim, 256);
    }
}
