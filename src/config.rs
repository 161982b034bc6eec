use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionConfig {
    /// Fixed step for all opacity/zoom ramps, in milliseconds.
    #[serde(default = "TransitionConfig::default_tick_ms")]
    pub tick_ms: u32,
    #[serde(default = "TransitionConfig::default_crossfade_ms")]
    pub crossfade_ms: u32,
    /// Per-tick increment of the camera lerp alpha.
    #[serde(default = "TransitionConfig::default_lerp_alpha_step")]
    pub lerp_alpha_step: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoomConfig {
    #[serde(default = "ZoomConfig::default_min_level")]
    pub min_level: f32,
    #[serde(default = "ZoomConfig::default_max_level")]
    pub max_level: f32,
    /// Field of view at zoom level 0; fov = base_fov_deg - zoom level.
    #[serde(default = "ZoomConfig::default_base_fov_deg")]
    pub base_fov_deg: f32,
    #[serde(default = "ZoomConfig::default_orbit_fov_deg")]
    pub orbit_fov_deg: f32,
    #[serde(default = "ZoomConfig::default_ramp_factor")]
    pub ramp_factor: f32,
    #[serde(default = "ZoomConfig::default_snap_epsilon")]
    pub snap_epsilon: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrbitConfig {
    #[serde(default = "OrbitConfig::default_rotate_speed")]
    pub rotate_speed: f32,
    /// Negative so drag direction feels reversed while inside a panorama.
    #[serde(default = "OrbitConfig::default_fpv_rotate_speed")]
    pub fpv_rotate_speed: f32,
    #[serde(default = "OrbitConfig::default_mobile_rotate_multiplier")]
    pub mobile_rotate_multiplier: f32,
    #[serde(default = "OrbitConfig::default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "OrbitConfig::default_max_distance")]
    pub max_distance: f32,
    /// Locked camera-to-target distance in first-person view.
    #[serde(default = "OrbitConfig::default_fpv_distance")]
    pub fpv_distance: f32,
    /// How far behind the orbit target the camera rests when entering orbit.
    #[serde(default = "OrbitConfig::default_back_offset")]
    pub back_offset: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "PreloadConfig::default_desktop_count")]
    pub desktop_count: usize,
    #[serde(default = "PreloadConfig::default_mobile_count")]
    pub mobile_count: usize,
    #[serde(default = "PreloadConfig::default_load_timeout_ms")]
    pub load_timeout_ms: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "CursorConfig::default_visible_opacity")]
    pub visible_opacity: f32,
    #[serde(default = "CursorConfig::default_idle_ms")]
    pub idle_ms: u32,
    #[serde(default = "CursorConfig::default_fade_ms")]
    pub fade_ms: u32,
    #[serde(default = "CursorConfig::default_inner_radius")]
    pub inner_radius: f32,
    #[serde(default = "CursorConfig::default_outer_radius")]
    pub outer_radius: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkerConfig {
    #[serde(default = "MarkerConfig::default_base_opacity")]
    pub base_opacity: f32,
    #[serde(default = "MarkerConfig::default_hover_opacity")]
    pub hover_opacity: f32,
    /// Added to base and hover opacity while in orbit view.
    #[serde(default = "MarkerConfig::default_orbit_opacity_boost")]
    pub orbit_opacity_boost: f32,
    /// Vertical lift of the marker disc above the detected floor.
    #[serde(default = "MarkerConfig::default_lift")]
    pub lift: f32,
    #[serde(default = "MarkerConfig::default_radius")]
    pub radius: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextureSourceConfig {
    #[serde(default = "TextureSourceConfig::default_static_base")]
    pub static_base: String,
    #[serde(default = "TextureSourceConfig::default_anisotropy")]
    pub anisotropy: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PickingConfig {
    /// Widest angle between click ray and node direction still accepted.
    #[serde(default = "PickingConfig::default_angular_cap_deg")]
    pub angular_cap_deg: f32,
    #[serde(default = "PickingConfig::default_drag_threshold_px")]
    pub drag_threshold_px: f32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ViewerConfig {
    #[serde(default)]
    pub transition: TransitionConfig,
    #[serde(default)]
    pub zoom: ZoomConfig,
    #[serde(default)]
    pub orbit: OrbitConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub cursor: CursorConfig,
    #[serde(default)]
    pub markers: MarkerConfig,
    #[serde(default)]
    pub textures: TextureSourceConfig,
    #[serde(default)]
    pub picking: PickingConfig,
    /// Set by hosts running on touch devices; widens rotate speed and
    /// shrinks the preload set.
    #[serde(default)]
    pub mobile: bool,
}

impl TransitionConfig {
    const fn default_tick_ms() -> u32 {
        20
    }

    const fn default_crossfade_ms() -> u32 {
        900
    }

    const fn default_lerp_alpha_step() -> f32 {
        0.05
    }
}

impl Default for TransitionConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
            crossfade_ms: Self::default_crossfade_ms(),
            lerp_alpha_step: Self::default_lerp_alpha_step(),
        }
    }
}

impl ZoomConfig {
    const fn default_min_level() -> f32 {
        0.0
    }

    const fn default_max_level() -> f32 {
        70.0
    }

    const fn default_base_fov_deg() -> f32 {
        110.0
    }

    const fn default_orbit_fov_deg() -> f32 {
        80.0
    }

    const fn default_ramp_factor() -> f32 {
        0.05
    }

    const fn default_snap_epsilon() -> f32 {
        1.0
    }

    pub fn fov_for_level(&self, level: f32) -> f32 {
        self.base_fov_deg - level
    }

    pub fn level_for_fov(&self, fov_deg: f32) -> f32 {
        self.base_fov_deg - fov_deg
    }
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min_level: Self::default_min_level(),
            max_level: Self::default_max_level(),
            base_fov_deg: Self::default_base_fov_deg(),
            orbit_fov_deg: Self::default_orbit_fov_deg(),
            ramp_factor: Self::default_ramp_factor(),
            snap_epsilon: Self::default_snap_epsilon(),
        }
    }
}

impl OrbitConfig {
    const fn default_rotate_speed() -> f32 {
        0.4
    }

    const fn default_fpv_rotate_speed() -> f32 {
        -0.25
    }

    const fn default_mobile_rotate_multiplier() -> f32 {
        1.7
    }

    const fn default_min_distance() -> f32 {
        1.0
    }

    const fn default_max_distance() -> f32 {
        150.0
    }

    const fn default_fpv_distance() -> f32 {
        0.1
    }

    const fn default_back_offset() -> f32 {
        10.0
    }
}

impl Default for OrbitConfig {
    fn default() -> Self {
        Self {
            rotate_speed: Self::default_rotate_speed(),
            fpv_rotate_speed: Self::default_fpv_rotate_speed(),
            mobile_rotate_multiplier: Self::default_mobile_rotate_multiplier(),
            min_distance: Self::default_min_distance(),
            max_distance: Self::default_max_distance(),
            fpv_distance: Self::default_fpv_distance(),
            back_offset: Self::default_back_offset(),
        }
    }
}

impl PreloadConfig {
    const fn default_desktop_count() -> usize {
        14
    }

    const fn default_mobile_count() -> usize {
        8
    }

    const fn default_load_timeout_ms() -> u32 {
        10_000
    }

    pub fn count_for_device(&self, mobile: bool) -> usize {
        if mobile {
            self.mobile_count
        } else {
            self.desktop_count
        }
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            desktop_count: Self::default_desktop_count(),
            mobile_count: Self::default_mobile_count(),
            load_timeout_ms: Self::default_load_timeout_ms(),
        }
    }
}

impl CursorConfig {
    const fn default_visible_opacity() -> f32 {
        0.3
    }

    const fn default_idle_ms() -> u32 {
        2_000
    }

    const fn default_fade_ms() -> u32 {
        200
    }

    const fn default_inner_radius() -> f32 {
        0.15
    }

    const fn default_outer_radius() -> f32 {
        0.19
    }
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            visible_opacity: Self::default_visible_opacity(),
            idle_ms: Self::default_idle_ms(),
            fade_ms: Self::default_fade_ms(),
            inner_radius: Self::default_inner_radius(),
            outer_radius: Self::default_outer_radius(),
        }
    }
}

impl MarkerConfig {
    const fn default_base_opacity() -> f32 {
        0.1
    }

    const fn default_hover_opacity() -> f32 {
        0.3
    }

    const fn default_orbit_opacity_boost() -> f32 {
        0.2
    }

    const fn default_lift() -> f32 {
        0.2
    }

    const fn default_radius() -> f32 {
        0.3
    }
}

impl Default for MarkerConfig {
    fn default() -> Self {
        Self {
            base_opacity: Self::default_base_opacity(),
            hover_opacity: Self::default_hover_opacity(),
            orbit_opacity_boost: Self::default_orbit_opacity_boost(),
            lift: Self::default_lift(),
            radius: Self::default_radius(),
        }
    }
}

impl TextureSourceConfig {
    fn default_static_base() -> String {
        "https://static.mused.org".to_string()
    }

    const fn default_anisotropy() -> u8 {
        16
    }
}

impl Default for TextureSourceConfig {
    fn default() -> Self {
        Self { static_base: Self::default_static_base(), anisotropy: Self::default_anisotropy() }
    }
}

impl PickingConfig {
    const fn default_angular_cap_deg() -> f32 {
        22.5
    }

    const fn default_drag_threshold_px() -> f32 {
        5.0
    }
}

impl Default for PickingConfig {
    fn default() -> Self {
        Self {
            angular_cap_deg: Self::default_angular_cap_deg(),
            drag_threshold_px: Self::default_drag_threshold_px(),
        }
    }
}

impl ViewerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                eprintln!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_viewer_tuning() {
        let cfg = ViewerConfig::default();
        assert_eq!(cfg.transition.tick_ms, 20);
        assert_eq!(cfg.transition.crossfade_ms, 900);
        assert!((cfg.transition.lerp_alpha_step - 0.05).abs() < 1e-6);
        assert!((cfg.zoom.max_level - 70.0).abs() < 1e-6);
        assert!((cfg.zoom.fov_for_level(20.0) - 90.0).abs() < 1e-6);
        assert_eq!(cfg.preload.count_for_device(false), 14);
        assert_eq!(cfg.preload.count_for_device(true), 8);
        assert!(!cfg.mobile);
    }

    #[test]
    fn partial_config_fills_missing_sections() {
        let cfg: ViewerConfig =
            serde_json::from_str(r#"{ "zoom": { "max_level": 50.0 }, "mobile": true }"#).unwrap();
        assert!((cfg.zoom.max_level - 50.0).abs() < 1e-6);
        assert!((cfg.zoom.base_fov_deg - 110.0).abs() < 1e-6);
        assert_eq!(cfg.transition.crossfade_ms, 900);
        assert!(cfg.mobile);
    }
}
