//! Renderer configuration

use crate::error::{RenderError, RenderResult};
use crate::voxel::VoxelConfig;

/// What happens when a scene has more lights of one kind than a light block holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightOverflow {
    /// Upload the first `MAX_LIGHTS` and warn once per distinct overflow
    #[default]
    Clamp,
    /// Fail the frame with `RenderError::LightCapExceeded`
    Reject,
}

/// Debug-only features
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugConfig {
    /// Allow blocking GPU readbacks such as `Renderer::debug_voxel_occupancy`
    pub readback: bool,
    /// Edge of the voxel overlay quad as a fraction of the surface
    pub quad_fraction: f32,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            readback: false,
            quad_fraction: 0.25,
        }
    }
}

/// Configuration for the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    /// Physical pixels per logical pixel
    pub pixel_ratio: f32,
    pub clear_color: [f32; 4],
    pub light_overflow: LightOverflow,
    /// Model and material records available to one submission
    pub max_draws_per_frame: u32,
    /// Let `render_frame` voxelize according to `voxel.policy`
    pub voxelization: bool,
    pub voxel: VoxelConfig,
    /// Draw the world-position pass and the voxel overlay
    pub debug_pass: bool,
    pub debug: DebugConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pixel_ratio: 1.0,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            light_overflow: LightOverflow::Clamp,
            max_draws_per_frame: 256,
            voxelization: true,
            voxel: VoxelConfig::default(),
            debug_pass: false,
            debug: DebugConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Physical size for a logical size
    pub fn physical_size(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = |v: u32| (v as f32 * self.pixel_ratio).round() as u32;
        (scale(width), scale(height))
    }

    /// Reject values that would turn into degenerate matrices or sizes.
    pub fn validate(&self) -> RenderResult<()> {
        positive_finite("pixel_ratio", self.pixel_ratio)?;
        positive_finite("voxel.scene_scale", self.voxel.scene_scale)
    }
}

fn positive_finite(field: &'static str, value: f32) -> RenderResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RenderError::InvalidConfig {
            field,
            reason: format!("must be positive and finite, got {}", value),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1.0, (800, 600))]
    #[case(2.0, (1600, 1200))]
    #[case(1.5, (1200, 900))]
    fn physical_size_scales_by_pixel_ratio(#[case] ratio: f32, #[case] expected: (u32, u32)) {
        let config = RendererConfig {
            pixel_ratio: ratio,
            ..Default::default()
        };
        assert_eq!(config.physical_size(800, 600), expected);
    }

    #[rstest]
    #[case(0.0)]
    #[case(-1.0)]
    #[case(f32::NAN)]
    #[case(f32::INFINITY)]
    fn degenerate_scene_scale_is_rejected(#[case] scene_scale: f32) {
        let config = RendererConfig {
            voxel: VoxelConfig {
                scene_scale,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RenderError::InvalidConfig { field: "voxel.scene_scale", .. })
        ));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(RendererConfig::default().validate().is_ok());
    }
}
