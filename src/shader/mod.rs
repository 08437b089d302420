//! Shader programs used by the renderer.
//!
//! Every render program is composed from the shared uniform block declarations
//! (`shaders/blocks.wgsl`), optional material map bindings and the program's own entry points.
//! The sources are embedded at compile time.

mod library;
mod reflect;

pub use library::ProgramLibrary;
pub use reflect::{parse_program, reflect_uniform_blocks, BlockSlotCache, ReflectedUniform};

/// Uniform block structs and bindings shared by every render program.
const BLOCKS_MODULE: &str = include_str!("../../shaders/blocks.wgsl");

/// Material texture bindings and sampling helpers.
const MATERIAL_MAPS_MODULE: &str = include_str!("../../shaders/material_maps.wgsl");

const STANDARD_SOURCE: &str = include_str!("../../shaders/standard.wgsl");
const VOXELIZE_SOURCE: &str = include_str!("../../shaders/voxelize.wgsl");
const WORLD_POSITION_SOURCE: &str = include_str!("../../shaders/world_position.wgsl");
const VOXEL_DEBUG_SOURCE: &str = include_str!("../../shaders/voxel_debug.wgsl");
const LIGHT_MARKER_SOURCE: &str = include_str!("../../shaders/light_marker.wgsl");
const VOXEL_MIP_SOURCE: &str = include_str!("../../shaders/voxel_mip.wgsl");

/// The programs the renderer loads at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    /// Lit forward shading of scene objects
    Standard,
    /// Slab rasterization into the voxel scratch target
    Voxelize,
    /// World-space position output for the debug overlay
    WorldPosition,
    /// Voxel volume lookup drawn as an overlay quad
    VoxelDebug,
    /// Unlit cubes at debug-flagged lights
    LightMarker,
    /// Compute downsample of the voxel volume mips
    VoxelMip,
}

impl ProgramKind {
    /// Programs that rasterize and bind the uniform blocks
    pub const RENDER: [ProgramKind; 5] = [
        ProgramKind::Standard,
        ProgramKind::Voxelize,
        ProgramKind::WorldPosition,
        ProgramKind::VoxelDebug,
        ProgramKind::LightMarker,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ProgramKind::Standard => "standard",
            ProgramKind::Voxelize => "voxelize",
            ProgramKind::WorldPosition => "world_position",
            ProgramKind::VoxelDebug => "voxel_debug",
            ProgramKind::LightMarker => "light_marker",
            ProgramKind::VoxelMip => "voxel_mip",
        }
    }

    /// Whether the program samples the material maps in group 1
    pub fn uses_material_maps(&self) -> bool {
        matches!(self, ProgramKind::Standard | ProgramKind::Voxelize)
    }

    /// Complete WGSL module for this program.
    pub fn source(&self) -> String {
        let body = match self {
            ProgramKind::Standard => STANDARD_SOURCE,
            ProgramKind::Voxelize => VOXELIZE_SOURCE,
            ProgramKind::WorldPosition => WORLD_POSITION_SOURCE,
            ProgramKind::VoxelDebug => VOXEL_DEBUG_SOURCE,
            ProgramKind::LightMarker => LIGHT_MARKER_SOURCE,
            ProgramKind::VoxelMip => return VOXEL_MIP_SOURCE.to_string(),
        };

        let mut source = String::with_capacity(BLOCKS_MODULE.len() + body.len() + 512);
        source.push_str(BLOCKS_MODULE);
        source.push('\n');
        if self.uses_material_maps() {
            source.push_str(MATERIAL_MAPS_MODULE);
            source.push('\n');
        }
        source.push_str(body);
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_programs_include_block_declarations() {
        for kind in ProgramKind::RENDER {
            let source = kind.source();
            assert!(source.contains("var<uniform> scene: SceneBlock"), "{:?}", kind);
            assert_eq!(source.contains("material_sampler"), kind.uses_material_maps());
        }
    }

    #[test]
    fn mip_program_is_standalone() {
        let source = ProgramKind::VoxelMip.source();
        assert!(!source.contains("SceneBlock"));
        assert!(source.contains("cs_main"));
    }
}
