//! Frame generation configuration.
//!
//! Reads the `fg_*` config variables and validates them into a plain struct.

use crate::cvar::{CvarFlags, CvarRegistry};

pub const CVAR_MIN_DIMENSION: &str = "fg_min_dimension";
pub const CVAR_PYRAMID_LAYERS: &str = "fg_pyramid_layers";
pub const CVAR_TIP_TOP_DISTANCE: &str = "fg_tip_top_distance";
pub const CVAR_DEPTH_TOLERANCE: &str = "fg_depth_tolerance";
pub const CVAR_RELEASE_DELAY: &str = "fg_release_delay";
pub const CVAR_UI_COMPOSITE: &str = "fg_ui_composite";

/// Deepest supported pull/push pyramid.
pub const MAX_PYRAMID_LAYERS: u32 = 3;

/// Validated frame generation settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameGenConfig {
    /// Smallest output width or height that generation supports.
    pub min_width_or_height: u32,
    /// Pull/push depth, 0..=MAX_PYRAMID_LAYERS. 0 disables hole filling.
    pub pyramid_layers: u32,
    /// Sub-pixel offset magnitude of the tip/top reprojection pair.
    pub tip_top_distance: f32,
    /// Depth disagreement treated as occlusion.
    pub depth_tolerance: f32,
    /// Frames a destroyed GPU object is kept alive.
    pub release_frame_delay: u32,
    /// Composite the tagged UI buffer over generated frames.
    pub ui_composite: bool,
}

impl Default for FrameGenConfig {
    fn default() -> Self {
        Self {
            min_width_or_height: 128,
            pyramid_layers: MAX_PYRAMID_LAYERS,
            tip_top_distance: 0.5,
            depth_tolerance: 0.01,
            release_frame_delay: 3,
            ui_composite: true,
        }
    }
}

impl FrameGenConfig {
    /// Register every `fg_*` variable with its default value.
    pub fn register(cvars: &mut CvarRegistry) {
        let d = Self::default();
        cvars.get(CVAR_MIN_DIMENSION, &d.min_width_or_height.to_string(), CvarFlags::NOSET);
        cvars.get(CVAR_PYRAMID_LAYERS, &d.pyramid_layers.to_string(), CvarFlags::ARCHIVE);
        cvars.get(CVAR_TIP_TOP_DISTANCE, &d.tip_top_distance.to_string(), CvarFlags::ARCHIVE);
        cvars.get(CVAR_DEPTH_TOLERANCE, &d.depth_tolerance.to_string(), CvarFlags::ARCHIVE);
        cvars.get(CVAR_RELEASE_DELAY, &d.release_frame_delay.to_string(), CvarFlags::empty());
        cvars.get(CVAR_UI_COMPOSITE, "1", CvarFlags::ARCHIVE);
    }

    /// Build a config from variable values, clamping anything out of range.
    pub fn from_cvars(cvars: &CvarRegistry) -> Self {
        let d = Self::default();

        let layers = cvars.value_or(CVAR_PYRAMID_LAYERS, d.pyramid_layers as f32);
        let layers = (layers.max(0.0) as u32).min(MAX_PYRAMID_LAYERS);

        let min_dim = cvars.value_or(CVAR_MIN_DIMENSION, d.min_width_or_height as f32);
        let min_dim = if min_dim >= 1.0 { min_dim as u32 } else { d.min_width_or_height };

        let tip_top = cvars.value_or(CVAR_TIP_TOP_DISTANCE, d.tip_top_distance);
        let tolerance = cvars.value_or(CVAR_DEPTH_TOLERANCE, d.depth_tolerance);
        let delay = cvars.value_or(CVAR_RELEASE_DELAY, d.release_frame_delay as f32);

        Self {
            min_width_or_height: min_dim,
            pyramid_layers: layers,
            tip_top_distance: tip_top.clamp(0.0, 1.0),
            depth_tolerance: tolerance.max(0.0),
            release_frame_delay: delay.max(0.0) as u32,
            ui_composite: cvars.value_or(CVAR_UI_COMPOSITE, 1.0) != 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip_through_cvars() {
        let mut cvars = CvarRegistry::new();
        FrameGenConfig::register(&mut cvars);
        assert_eq!(FrameGenConfig::from_cvars(&cvars), FrameGenConfig::default());
    }

    #[test]
    fn test_missing_cvars_use_defaults() {
        let cvars = CvarRegistry::new();
        assert_eq!(FrameGenConfig::from_cvars(&cvars), FrameGenConfig::default());
    }

    #[test]
    fn test_layers_are_clamped() {
        let mut cvars = CvarRegistry::new();
        FrameGenConfig::register(&mut cvars);
        cvars.set(CVAR_PYRAMID_LAYERS, "9");
        assert_eq!(FrameGenConfig::from_cvars(&cvars).pyramid_layers, MAX_PYRAMID_LAYERS);
        cvars.set(CVAR_PYRAMID_LAYERS, "-2");
        assert_eq!(FrameGenConfig::from_cvars(&cvars).pyramid_layers, 0);
    }

    #[test]
    fn test_min_dimension_is_write_protected() {
        let mut cvars = CvarRegistry::new();
        FrameGenConfig::register(&mut cvars);
        cvars.set(CVAR_MIN_DIMENSION, "16");
        assert_eq!(FrameGenConfig::from_cvars(&cvars).min_width_or_height, 128);
        cvars.force_set(CVAR_MIN_DIMENSION, "256");
        assert_eq!(FrameGenConfig::from_cvars(&cvars).min_width_or_height, 256);
    }

    #[test]
    fn test_ui_composite_toggle() {
        let mut cvars = CvarRegistry::new();
        FrameGenConfig::register(&mut cvars);
        cvars.set(CVAR_UI_COMPOSITE, "0");
        assert!(!FrameGenConfig::from_cvars(&cvars).ui_composite);
    }
}
