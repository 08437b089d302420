//! Compiled programs and the bind group layouts they share.

use std::collections::HashMap;

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::frame_resource::{DEPTH_FORMAT, WORLD_POSITION_FORMAT};
use crate::uniform::{BlockName, UniformBlockSet};
use crate::voxel::VOXEL_FORMAT;

use super::reflect::{parse_program, BlockSlotCache};
use super::ProgramKind;

/// Every program the renderer draws or dispatches with.
#[derive(Debug)]
pub struct ProgramLibrary {
    render_pipelines: HashMap<ProgramKind, RenderPipelineHandle>,
    voxel_mip_pipeline: ComputePipelineHandle,
    material_layout: BindGroupLayoutHandle,
    frame_sampling_layout: BindGroupLayoutHandle,
    voxel_volume_layout: BindGroupLayoutHandle,
    voxel_mip_layout: BindGroupLayoutHandle,
    slots: BlockSlotCache,
}

fn sampled_texture(binding: u32, view_dimension: TextureViewDimension) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::FRAGMENT,
        ty: BindingType::Texture {
            sample_type: TextureSampleType::Float { filterable: true },
            view_dimension,
        },
    }
}

fn filtering_sampler(binding: u32) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStageFlags::FRAGMENT,
        ty: BindingType::Sampler { filtering: true },
    }
}

fn depth_test() -> Option<DepthStencilState> {
    Some(DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled: true,
        depth_compare: CompareFunction::LessEqual,
    })
}

impl ProgramLibrary {
    /// Compile every program against the block layout of `blocks`.
    ///
    /// Each render program is reflected first; a block declared at a binding other than the
    /// block's binding point fails the whole load.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        blocks: &UniformBlockSet,
        surface_format: TextureFormat,
    ) -> RenderResult<Self> {
        let material_layout = backend.create_bind_group_layout(&[
            sampled_texture(0, TextureViewDimension::D2),
            sampled_texture(1, TextureViewDimension::D2),
            sampled_texture(2, TextureViewDimension::D2),
            sampled_texture(3, TextureViewDimension::D2),
            filtering_sampler(4),
        ])?;
        let frame_sampling_layout = backend.create_bind_group_layout(&[
            sampled_texture(0, TextureViewDimension::D2),
            filtering_sampler(1),
        ])?;
        let voxel_volume_layout = backend.create_bind_group_layout(&[
            sampled_texture(0, TextureViewDimension::D3),
            filtering_sampler(1),
        ])?;
        let voxel_mip_layout = backend.create_bind_group_layout(&[
            BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::Texture {
                    sample_type: TextureSampleType::Float { filterable: false },
                    view_dimension: TextureViewDimension::D3,
                },
            },
            BindGroupLayoutEntry {
                binding: 1,
                visibility: ShaderStageFlags::COMPUTE,
                ty: BindingType::StorageTexture {
                    format: VOXEL_FORMAT,
                    view_dimension: TextureViewDimension::D3,
                },
            },
        ])?;

        let mut slots = BlockSlotCache::new();
        let mut render_pipelines = HashMap::new();
        for kind in ProgramKind::RENDER {
            let source = kind.source();
            let module = parse_program(kind.label(), &source)?;
            slots.resolve(kind, &module, blocks)?;

            let desc = Self::render_descriptor(
                kind,
                source,
                blocks.layout(),
                material_layout,
                frame_sampling_layout,
                voxel_volume_layout,
                surface_format,
            );
            let pipeline = backend.create_render_pipeline(&desc)?;
            log::debug!(
                "Loaded program '{}' with blocks {:?}",
                kind.label(),
                slots.blocks_of(kind)
            );
            render_pipelines.insert(kind, pipeline);
        }

        let mip_source = ProgramKind::VoxelMip.source();
        parse_program(ProgramKind::VoxelMip.label(), &mip_source)?;
        let voxel_mip_pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some(ProgramKind::VoxelMip.label().to_string()),
            shader: mip_source,
            entry_point: "cs_main".to_string(),
            bind_group_layouts: vec![voxel_mip_layout],
        })?;

        for (kind, block) in [
            (ProgramKind::Voxelize, BlockName::Voxel),
            (ProgramKind::VoxelDebug, BlockName::Debug),
            (ProgramKind::Standard, BlockName::Material),
        ] {
            if slots.slot(kind, block).is_none() {
                return Err(RenderError::ShaderParse {
                    program: kind.label().to_string(),
                    message: format!("missing uniform '{}'", block.shader_name()),
                });
            }
        }

        log::info!("Program library ready ({} render programs)", render_pipelines.len());
        Ok(Self {
            render_pipelines,
            voxel_mip_pipeline,
            material_layout,
            frame_sampling_layout,
            voxel_volume_layout,
            voxel_mip_layout,
            slots,
        })
    }

    fn render_descriptor(
        kind: ProgramKind,
        shader: String,
        block_layout: BindGroupLayoutHandle,
        material_layout: BindGroupLayoutHandle,
        frame_sampling_layout: BindGroupLayoutHandle,
        voxel_volume_layout: BindGroupLayoutHandle,
        surface_format: TextureFormat,
    ) -> RenderPipelineDescriptor {
        let mut desc = RenderPipelineDescriptor {
            label: Some(kind.label().to_string()),
            shader,
            has_fragment: true,
            vertex_layouts: vec![Vertex::layout()],
            bind_group_layouts: vec![block_layout],
            primitive_topology: PrimitiveTopology::TriangleList,
            front_face: FrontFace::Ccw,
            cull_mode: CullMode::Back,
            depth_stencil: depth_test(),
            color_targets: vec![ColorTargetState {
                format: surface_format,
                blend: None,
            }],
        };

        match kind {
            ProgramKind::Standard => {
                desc.bind_group_layouts.push(material_layout);
            }
            ProgramKind::Voxelize => {
                desc.bind_group_layouts.push(material_layout);
                desc.cull_mode = CullMode::None;
                desc.color_targets[0].format = VOXEL_FORMAT;
            }
            ProgramKind::WorldPosition => {
                desc.color_targets[0].format = WORLD_POSITION_FORMAT;
            }
            ProgramKind::VoxelDebug => {
                desc.vertex_layouts.clear();
                desc.bind_group_layouts.push(frame_sampling_layout);
                desc.bind_group_layouts.push(voxel_volume_layout);
                desc.primitive_topology = PrimitiveTopology::TriangleStrip;
                desc.cull_mode = CullMode::None;
                desc.depth_stencil = None;
                desc.color_targets[0].blend = Some(BlendState::alpha_blending());
            }
            ProgramKind::LightMarker | ProgramKind::VoxelMip => {}
        }
        desc
    }

    /// Pipeline of a render program.
    pub fn pipeline(&self, kind: ProgramKind) -> Option<RenderPipelineHandle> {
        self.render_pipelines.get(&kind).copied()
    }

    /// Pipeline of a render program, failing for programs that were never loaded.
    pub fn require(&self, kind: ProgramKind) -> RenderResult<RenderPipelineHandle> {
        self.pipeline(kind).ok_or_else(|| RenderError::ShaderParse {
            program: kind.label().to_string(),
            message: "program is not a loaded render program".into(),
        })
    }

    pub fn voxel_mip_pipeline(&self) -> ComputePipelineHandle {
        self.voxel_mip_pipeline
    }

    /// Layout of group 1 for programs sampling material maps
    pub fn material_layout(&self) -> BindGroupLayoutHandle {
        self.material_layout
    }

    /// Layout for sampling a frame resource's color attachment
    pub fn frame_sampling_layout(&self) -> BindGroupLayoutHandle {
        self.frame_sampling_layout
    }

    pub fn voxel_volume_layout(&self) -> BindGroupLayoutHandle {
        self.voxel_volume_layout
    }

    pub fn voxel_mip_layout(&self) -> BindGroupLayoutHandle {
        self.voxel_mip_layout
    }

    pub fn slots(&self) -> &BlockSlotCache {
        &self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_every_program() {
        let mut backend = HeadlessBackend::new(32, 32);
        let blocks = UniformBlockSet::new(&mut backend, 4).unwrap();
        let format = backend.swapchain_format();
        let library = ProgramLibrary::new(&mut backend, &blocks, format).unwrap();

        for kind in ProgramKind::RENDER {
            let pipeline = library.pipeline(kind).unwrap();
            assert_eq!(backend.render_pipeline_label(pipeline), Some(kind.label()));
        }
        assert!(library.pipeline(ProgramKind::VoxelMip).is_none());
    }

    #[test]
    fn debug_program_draws_without_depth() {
        let desc = ProgramLibrary::render_descriptor(
            ProgramKind::VoxelDebug,
            String::new(),
            BindGroupLayoutHandle(1),
            BindGroupLayoutHandle(2),
            BindGroupLayoutHandle(3),
            BindGroupLayoutHandle(4),
            TextureFormat::Bgra8UnormSrgb,
        );
        assert!(desc.depth_stencil.is_none());
        assert!(desc.vertex_layouts.is_empty());
        assert_eq!(
            desc.bind_group_layouts,
            vec![BindGroupLayoutHandle(1), BindGroupLayoutHandle(3), BindGroupLayoutHandle(4)]
        );
    }
}
