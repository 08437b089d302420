//! Slab-by-slab rasterization of the scene into the voxel volume.

use crate::backend::*;
use crate::error::RenderResult;
use crate::frame_resource::FrameResource;
use crate::resources::MaterialBindings;
use crate::scene::Scene;
use crate::shader::{ProgramKind, ProgramLibrary};
use crate::uniform::{BlockName, UniformBlockSet, VoxelChunk};

use super::{
    VoxelGrid, VoxelState, VoxelVolume, VOXEL_CLEAR_COLOR, VOXEL_FORMAT, VOXEL_MIP_LEVELS,
    VOXEL_RESOLUTION,
};

/// Edge length of the compute workgroups in `voxel_mip.wgsl`
const MIP_WORKGROUP_SIZE: u32 = 4;

/// Occupied texels of each layer of the volume's finest level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelOccupancy {
    pub layers: Vec<u32>,
}

impl VoxelOccupancy {
    pub fn total(&self) -> u64 {
        self.layers.iter().map(|&count| u64::from(count)).sum()
    }

    /// Indices of layers holding at least one occupied texel
    pub fn occupied_layers(&self) -> Vec<u32> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(layer, _)| layer as u32)
            .collect()
    }
}

/// Ring records written once per voxelization and reselected for every layer.
struct DrawSlots {
    model: u32,
    materials: Vec<u32>,
}

/// Owns the voxel volume and rebuilds it from a scene.
#[derive(Debug)]
pub struct Voxelizer {
    grid: VoxelGrid,
    scratch: FrameResource,
    volume: VoxelVolume,
    state: VoxelState,
}

impl Voxelizer {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        library: &ProgramLibrary,
        scene_scale: f32,
    ) -> RenderResult<Self> {
        let scratch = FrameResource::new(
            backend,
            "Voxel Layer",
            VOXEL_RESOLUTION,
            VOXEL_RESOLUTION,
            VOXEL_FORMAT,
        )?;
        let volume = VoxelVolume::new(backend, library)?;
        Ok(Self {
            grid: VoxelGrid::new(scene_scale),
            scratch,
            volume,
            state: VoxelState::Stale,
        })
    }

    pub fn grid(&self) -> &VoxelGrid {
        &self.grid
    }

    pub fn volume(&self) -> &VoxelVolume {
        &self.volume
    }

    pub fn state(&self) -> VoxelState {
        self.state
    }

    pub fn mark_stale(&mut self) {
        self.state = VoxelState::Stale;
    }

    /// Rasterize `scene` into the back volume, build its mips, submit and publish it.
    ///
    /// Rings are rewound before and after. On failure the front volume is left as it was and
    /// the state returns to [`VoxelState::Stale`].
    pub fn voxelize<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        blocks: &mut UniformBlockSet,
        library: &ProgramLibrary,
        materials: &mut MaterialBindings,
        scene: &Scene,
    ) -> RenderResult<()> {
        self.state = VoxelState::Voxelizing;
        blocks.reset_rings();

        if let Err(err) = self.record(backend, blocks, library, materials, scene) {
            self.scratch.release(backend);
            self.state = VoxelState::Stale;
            log::warn!("Voxelization aborted: {}", err);
            return Err(err);
        }

        backend.submit();
        blocks.reset_rings();
        self.volume.swap();
        self.state = VoxelState::Fresh;
        log::debug!(
            "Voxelized {} objects into {}^3 volume (scale {})",
            scene.objects.len(),
            VOXEL_RESOLUTION,
            self.grid.scale()
        );
        Ok(())
    }

    fn record<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        blocks: &mut UniformBlockSet,
        library: &ProgramLibrary,
        materials: &mut MaterialBindings,
        scene: &Scene,
    ) -> RenderResult<()> {
        let pipeline = library.require(ProgramKind::Voxelize)?;
        let slots = Self::write_draw_records(backend, blocks, scene)?;
        let bounds: Vec<_> = scene.objects.iter().map(|o| o.world_bounds()).collect();
        let back = self.volume.back_texture();

        for layer in 0..VOXEL_RESOLUTION {
            let camera = self.grid.layer_camera(layer);
            let chunk = VoxelChunk {
                view_proj: camera.view_proj,
                params: [
                    layer as f32,
                    VOXEL_RESOLUTION as f32,
                    self.grid.scale(),
                    0.0,
                ],
            };
            let voxel = blocks.block_mut(BlockName::Voxel);
            voxel.advance()?;
            voxel.update(backend, &[chunk], 0)?;

            self.scratch.bind_for_drawing(backend, VOXEL_CLEAR_COLOR);
            backend.set_render_pipeline(pipeline);

            for ((object, object_bounds), object_slots) in
                scene.objects.iter().zip(&bounds).zip(&slots)
            {
                if !self.grid.layer_intersects(layer, object_bounds) {
                    continue;
                }
                object.mesh.bind(backend);
                blocks
                    .block_mut(BlockName::Model)
                    .select_slot(object_slots.model);
                for (part, &material_slot) in object.parts.iter().zip(&object_slots.materials) {
                    blocks
                        .block_mut(BlockName::Material)
                        .select_slot(material_slot);
                    blocks.bind(backend);
                    materials.bind(backend, &part.material)?;
                    backend.draw_indexed(part.indices.clone(), 0, 0..1);
                }
            }

            self.scratch.finish_drawing(backend);
            backend.copy_texture_to_texture(
                TextureCopyLocation::new(self.scratch.color_texture()),
                TextureCopyLocation {
                    texture: back,
                    mip_level: 0,
                    origin: [0, 0, layer],
                },
                [VOXEL_RESOLUTION, VOXEL_RESOLUTION, 1],
            );
        }

        self.generate_mips(backend, library);
        Ok(())
    }

    /// Write every object's model record and every part's material record once.
    fn write_draw_records<B: GraphicsBackend>(
        backend: &mut B,
        blocks: &mut UniformBlockSet,
        scene: &Scene,
    ) -> RenderResult<Vec<DrawSlots>> {
        let mut slots = Vec::with_capacity(scene.objects.len());
        for object in &scene.objects {
            let model_block = blocks.block_mut(BlockName::Model);
            let model = model_block.advance()?;
            model_block.update(backend, &[object.transform.chunk()], 0)?;

            let mut part_slots = Vec::with_capacity(object.parts.len());
            for part in &object.parts {
                let material_block = blocks.block_mut(BlockName::Material);
                part_slots.push(material_block.advance()?);
                material_block.update(backend, &[part.material.chunk(&scene.ui)], 0)?;
            }
            slots.push(DrawSlots {
                model,
                materials: part_slots,
            });
        }
        Ok(slots)
    }

    /// Box-filter mip 0 of the back volume down to the last level.
    fn generate_mips<B: GraphicsBackend>(&self, backend: &mut B, library: &ProgramLibrary) {
        backend.begin_compute_pass(Some("Voxel Mips"));
        backend.set_compute_pipeline(library.voxel_mip_pipeline());
        for (level, bind_group) in (1..VOXEL_MIP_LEVELS).zip(self.volume.back_mip_bind_groups()) {
            let groups = (VOXEL_RESOLUTION >> level).div_ceil(MIP_WORKGROUP_SIZE);
            backend.set_bind_group(0, *bind_group, &[]);
            backend.dispatch_compute(groups, groups, groups);
        }
        backend.end_compute_pass();
    }

    /// Count texels with non-zero alpha in each layer of the front volume. Blocks on the GPU.
    pub fn occupancy<B: GraphicsBackend>(&self, backend: &mut B) -> RenderResult<VoxelOccupancy> {
        let texture = self.volume.front_texture();
        let mut layers = Vec::with_capacity(VOXEL_RESOLUTION as usize);
        for layer in 0..VOXEL_RESOLUTION {
            let texels = backend.read_texture(texture, 0, layer)?;
            let occupied = texels.chunks_exact(4).filter(|texel| texel[3] > 0).count();
            layers.push(occupied as u32);
        }
        Ok(VoxelOccupancy { layers })
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        self.scratch.destroy(backend);
        self.volume.destroy(backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::Command;
    use crate::resources::{GpuMesh, Material, Mesh};
    use crate::scene::{SceneObject, Transform};
    use glam::Vec3;

    struct Fixture {
        backend: HeadlessBackend,
        blocks: UniformBlockSet,
        library: ProgramLibrary,
        materials: MaterialBindings,
        voxelizer: Voxelizer,
    }

    fn fixture(max_draws: u32) -> Fixture {
        let mut backend = HeadlessBackend::new(64, 64);
        let blocks = UniformBlockSet::new(&mut backend, max_draws).unwrap();
        let format = backend.swapchain_format();
        let library = ProgramLibrary::new(&mut backend, &blocks, format).unwrap();
        let materials = MaterialBindings::new(&mut backend, library.material_layout()).unwrap();
        let voxelizer = Voxelizer::new(&mut backend, &library, 1.0).unwrap();
        Fixture {
            backend,
            blocks,
            library,
            materials,
            voxelizer,
        }
    }

    fn cube_scene(backend: &mut HeadlessBackend, positions: &[Vec3]) -> Scene {
        let mesh = GpuMesh::upload(backend, &Mesh::cube(0.5)).unwrap();
        let mut scene = Scene::new();
        for (i, position) in positions.iter().enumerate() {
            scene.add_object(
                SceneObject::new(&format!("cube {}", i), mesh.clone(), Material::new("white"))
                    .with_transform(Transform::from_position(*position)),
            );
        }
        scene
    }

    impl Fixture {
        fn voxelize(&mut self, scene: &Scene) -> RenderResult<()> {
            self.voxelizer.voxelize(
                &mut self.backend,
                &mut self.blocks,
                &self.library,
                &mut self.materials,
                scene,
            )
        }
    }

    #[test]
    fn centered_cube_fills_its_layers_only() {
        let mut f = fixture(8);
        let scene = cube_scene(&mut f.backend, &[Vec3::ZERO]);
        f.voxelize(&scene).unwrap();

        assert_eq!(f.voxelizer.state(), VoxelState::Fresh);
        let front = f.voxelizer.volume().front_texture();
        for layer in 0..VOXEL_RESOLUTION {
            let state = f.backend.subresource(front, 0, layer);
            assert_eq!(state.clear_color, Some(VOXEL_CLEAR_COLOR));
            let expected = u32::from((24..=39).contains(&layer));
            assert_eq!(state.draw_count, expected, "layer {}", layer);
        }
    }

    #[test]
    fn records_are_written_once_and_reused_per_layer() {
        let mut f = fixture(8);
        let scene = cube_scene(&mut f.backend, &[Vec3::ZERO, Vec3::new(0.0, 0.0, 0.5)]);
        f.voxelize(&scene).unwrap();

        let model_buffer = f.blocks.block(BlockName::Model).buffer();
        let model_writes = f
            .backend
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::WriteBuffer { buffer, .. } if *buffer == model_buffer))
            .count();
        assert_eq!(model_writes, 2);
    }

    #[test]
    fn mips_are_dispatched_after_layers() {
        let mut f = fixture(4);
        let scene = cube_scene(&mut f.backend, &[Vec3::ZERO]);
        f.voxelize(&scene).unwrap();

        let dispatches: Vec<_> = f
            .backend
            .commands()
            .iter()
            .filter_map(|c| match c {
                Command::Dispatch { x, .. } => Some(*x),
                _ => None,
            })
            .collect();
        assert_eq!(dispatches, vec![8, 4, 2, 1, 1, 1]);

        let copies = f
            .backend
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::CopyTextureToTexture { .. }))
            .count();
        assert_eq!(copies, VOXEL_RESOLUTION as usize);
        assert_eq!(f.backend.commands().last(), Some(&Command::Submit));
    }

    #[test]
    fn exhausted_rings_leave_front_untouched() {
        let mut f = fixture(1);
        let scene = cube_scene(&mut f.backend, &[Vec3::ZERO, Vec3::X * 0.5]);
        let front = f.voxelizer.volume().front_texture();

        assert!(f.voxelize(&scene).is_err());
        assert_eq!(f.voxelizer.state(), VoxelState::Stale);
        assert_eq!(f.voxelizer.volume().front_texture(), front);
        assert_eq!(f.backend.subresource(front, 0, 32).draw_count, 0);
    }

    #[test]
    fn empty_volume_has_no_occupancy() {
        let mut f = fixture(4);
        f.voxelize(&Scene::new()).unwrap();
        let occupancy = f.voxelizer.occupancy(&mut f.backend).unwrap();
        assert_eq!(occupancy.layers.len(), VOXEL_RESOLUTION as usize);
        assert_eq!(occupancy.total(), 0);
        assert!(occupancy.occupied_layers().is_empty());
    }

    #[test]
    fn occupancy_reports_the_layers_a_cube_covers() {
        let mut f = fixture(4);
        let scene = cube_scene(&mut f.backend, &[Vec3::ZERO]);
        f.voxelize(&scene).unwrap();

        let occupancy = f.voxelizer.occupancy(&mut f.backend).unwrap();
        assert_eq!(occupancy.occupied_layers(), (24..=39).collect::<Vec<u32>>());
        let texels_per_layer = u64::from(VOXEL_RESOLUTION * VOXEL_RESOLUTION);
        assert_eq!(occupancy.total(), 16 * texels_per_layer);
    }
}
