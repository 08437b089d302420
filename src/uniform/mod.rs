//! Uniform blocks shared by every program.
//!
//! All blocks live in one bind group (group 0). Each block's binding number is its binding
//! point, issued once at creation by [`BindingAllocator`] and never reused.

mod block;
pub mod layout;

pub use block::{UniformBlock, UNIFORM_OFFSET_ALIGNMENT};
pub use layout::*;

use std::mem::size_of;

use crate::backend::{
    BindGroupHandle, BindGroupLayoutEntry, BindGroupLayoutHandle, BindingType, GraphicsBackend,
    ShaderStageFlags,
};
use crate::error::RenderResult;
use crate::voxel::VOXEL_RESOLUTION;

/// Bind group index of the uniform blocks in every render program
pub const BLOCK_GROUP: u32 = 0;

/// The uniform blocks known to the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockName {
    Scene,
    Model,
    Material,
    PointLights,
    DirectionalLights,
    Voxel,
    Debug,
}

impl BlockName {
    /// Creation order, which is also binding order
    pub const ALL: [BlockName; 7] = [
        BlockName::Scene,
        BlockName::Model,
        BlockName::Material,
        BlockName::PointLights,
        BlockName::DirectionalLights,
        BlockName::Voxel,
        BlockName::Debug,
    ];

    /// Variable name the WGSL sources declare the block under
    pub fn shader_name(&self) -> &'static str {
        match self {
            BlockName::Scene => "scene",
            BlockName::Model => "model",
            BlockName::Material => "material",
            BlockName::PointLights => "point_lights",
            BlockName::DirectionalLights => "directional_lights",
            BlockName::Voxel => "voxel",
            BlockName::Debug => "debug",
        }
    }

    pub fn from_shader_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|block| block.shader_name() == name)
    }

    /// Bytes of one record
    pub fn chunk_size(&self) -> u64 {
        match self {
            BlockName::Scene => size_of::<SceneChunk>() as u64,
            BlockName::Model => size_of::<ModelChunk>() as u64,
            BlockName::Material => size_of::<MaterialChunk>() as u64,
            BlockName::PointLights | BlockName::DirectionalLights => light_offset(MAX_LIGHTS),
            BlockName::Voxel => size_of::<VoxelChunk>() as u64,
            BlockName::Debug => size_of::<DebugChunk>() as u64,
        }
    }

    /// Whether the block holds one record per draw, selected by dynamic offset
    pub fn is_ring(&self) -> bool {
        matches!(self, BlockName::Model | BlockName::Material | BlockName::Voxel)
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Issues binding points in increasing order.
#[derive(Debug, Default)]
pub struct BindingAllocator {
    next: u32,
}

impl BindingAllocator {
    pub fn issue(&mut self) -> u32 {
        let binding = self.next;
        self.next += 1;
        binding
    }
}

/// The full set of uniform blocks and the bind group exposing them.
#[derive(Debug)]
pub struct UniformBlockSet {
    blocks: Vec<UniformBlock>,
    layout: BindGroupLayoutHandle,
    bind_group: BindGroupHandle,
}

impl UniformBlockSet {
    /// Create every block. `max_draws` sizes the per-draw rings (model and material records).
    pub fn new<B: GraphicsBackend>(backend: &mut B, max_draws: u32) -> RenderResult<Self> {
        let mut allocator = BindingAllocator::default();
        let mut blocks = Vec::with_capacity(BlockName::ALL.len());
        for name in BlockName::ALL {
            let slots = match name {
                BlockName::Model | BlockName::Material => max_draws,
                BlockName::Voxel => VOXEL_RESOLUTION,
                _ => 1,
            };
            blocks.push(UniformBlock::new(
                backend,
                name,
                allocator.issue(),
                name.chunk_size(),
                slots,
            )?);
        }

        let layout_entries: Vec<BindGroupLayoutEntry> = blocks
            .iter()
            .map(|block| BindGroupLayoutEntry {
                binding: block.binding(),
                visibility: ShaderStageFlags::VERTEX_FRAGMENT,
                ty: BindingType::UniformBuffer {
                    dynamic_offset: block.is_ring(),
                },
            })
            .collect();
        let layout = backend.create_bind_group_layout(&layout_entries)?;

        let entries: Vec<_> = blocks.iter().map(UniformBlock::bind_group_entry).collect();
        let bind_group = backend.create_bind_group(layout, &entries)?;

        Ok(Self {
            blocks,
            layout,
            bind_group,
        })
    }

    pub fn block(&self, name: BlockName) -> &UniformBlock {
        &self.blocks[name.index()]
    }

    pub fn block_mut(&mut self, name: BlockName) -> &mut UniformBlock {
        &mut self.blocks[name.index()]
    }

    pub fn layout(&self) -> BindGroupLayoutHandle {
        self.layout
    }

    /// Binding point of `name`
    pub fn binding_of(&self, name: BlockName) -> u32 {
        self.block(name).binding()
    }

    /// Dynamic offsets of the ring blocks' current records, in binding order
    pub fn dynamic_offsets(&self) -> Vec<u32> {
        self.blocks
            .iter()
            .filter(|block| block.is_ring())
            .map(UniformBlock::dynamic_offset)
            .collect()
    }

    /// Bind every block with its current record.
    pub fn bind<B: GraphicsBackend>(&self, backend: &mut B) {
        backend.set_bind_group(BLOCK_GROUP, self.bind_group, &self.dynamic_offsets());
    }

    /// Rewind every ring after a submission.
    pub fn reset_rings(&mut self) {
        for block in &mut self.blocks {
            block.reset();
        }
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        for block in self.blocks {
            block.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    #[test]
    fn bindings_follow_creation_order() {
        let mut backend = HeadlessBackend::new(16, 16);
        let set = UniformBlockSet::new(&mut backend, 8).unwrap();
        for (expected, name) in BlockName::ALL.into_iter().enumerate() {
            assert_eq!(set.binding_of(name), expected as u32);
            assert_eq!(set.block(name).name(), name);
        }
    }

    #[test]
    fn dynamic_offsets_cover_ring_blocks_only() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut set = UniformBlockSet::new(&mut backend, 8).unwrap();
        set.block_mut(BlockName::Material).advance().unwrap();
        set.block_mut(BlockName::Material).advance().unwrap();

        // model, material, voxel
        assert_eq!(set.dynamic_offsets(), vec![0, 256, 0]);
    }

    #[test]
    fn shader_names_round_trip() {
        for name in BlockName::ALL {
            assert_eq!(BlockName::from_shader_name(name.shader_name()), Some(name));
        }
        assert_eq!(BlockName::from_shader_name("lights"), None);
    }

    #[test]
    fn light_blocks_hold_max_lights() {
        assert_eq!(BlockName::PointLights.chunk_size(), 768);
        assert_eq!(BlockName::Material.chunk_size(), 80);
    }
}
