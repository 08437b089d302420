//! Frame orchestration
//!
//! The [`Renderer`] owns the backend, the uniform blocks, the compiled programs, the voxel
//! volume and every offscreen target. It borrows a [`Scene`] and a [`CameraView`] for the
//! duration of one call and never keeps them.

mod config;

pub use config::*;

use std::collections::HashSet;

use glam::{Mat4, Vec3};

use crate::backend::*;
use crate::error::{RenderError, RenderResult};
use crate::frame_resource::{validate_attachments, FrameResource, DEPTH_FORMAT, WORLD_POSITION_FORMAT};
use crate::resources::{GpuMesh, Material, MaterialBindings, Mesh};
use crate::scene::{CameraView, Scene};
use crate::shader::{ProgramKind, ProgramLibrary};
use crate::uniform::{
    light_offset, BlockName, DebugChunk, ModelChunk, SceneChunk, UniformBlockSet, MAX_LIGHTS,
};
use crate::voxel::{VoxelOccupancy, VoxelState, Voxelizer, VOXEL_RESOLUTION};

/// How far from the origin directional light markers are drawn
const DIRECTIONAL_MARKER_DISTANCE: f32 = 5.0;

/// Attachments sized to the surface
#[derive(Debug)]
struct SurfaceTargets {
    depth_texture: TextureHandle,
    depth_view: TextureViewHandle,
    world_position: Option<FrameResource>,
}

impl SurfaceTargets {
    fn new<B: GraphicsBackend>(
        backend: &mut B,
        width: u32,
        height: u32,
        debug_pass: bool,
    ) -> RenderResult<Self> {
        let depth_texture = backend.create_texture(&TextureDescriptor {
            label: Some("Depth Buffer".into()),
            width,
            height,
            format: DEPTH_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT,
            ..Default::default()
        })?;
        let depth_view = backend.create_texture_view(depth_texture, &TextureViewDescriptor::default())?;
        let world_position = if debug_pass {
            Some(FrameResource::new(
                backend,
                "World Position",
                width,
                height,
                WORLD_POSITION_FORMAT,
            )?)
        } else {
            None
        };
        Ok(Self {
            depth_texture,
            depth_view,
            world_position,
        })
    }

    fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_texture_view(self.depth_view);
        backend.destroy_texture(self.depth_texture);
        if let Some(world_position) = self.world_position {
            world_position.destroy(backend);
        }
    }
}

/// Forward renderer with slice-based voxelization and a voxel debug overlay.
pub struct Renderer<B: GraphicsBackend> {
    backend: B,
    config: RendererConfig,
    blocks: UniformBlockSet,
    library: ProgramLibrary,
    materials: MaterialBindings,
    voxelizer: Voxelizer,
    targets: SurfaceTargets,
    marker_mesh: GpuMesh,
    debug_sampler: SamplerHandle,
    /// Logical size
    size: (u32, u32),
    physical_size: (u32, u32),
    frame_index: u64,
    /// `(light kind, count)` overflows already reported
    overflow_warnings: HashSet<(&'static str, usize)>,
}

impl<B: GraphicsBackend> Renderer<B> {
    /// Create every GPU resource the renderer needs. The backend's current surface size is
    /// taken as the physical size.
    pub fn initialize(mut backend: B, config: RendererConfig) -> RenderResult<Self> {
        log::info!("Initializing renderer on {} backend", backend.name());
        config.validate()?;

        let blocks = UniformBlockSet::new(&mut backend, config.max_draws_per_frame)?;
        let surface_format = backend.swapchain_format();
        let library = ProgramLibrary::new(&mut backend, &blocks, surface_format)?;
        let materials = MaterialBindings::new(&mut backend, library.material_layout())?;
        let voxelizer = Voxelizer::new(&mut backend, &library, config.voxel.scene_scale)?;
        let marker_mesh = GpuMesh::upload(&mut backend, &Mesh::cube(1.0))?;
        let debug_sampler = backend.create_sampler(&SamplerDescriptor {
            label: Some("Frame Resource Sampler".into()),
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            mipmap_filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        })?;

        let physical_size = backend.surface_size();
        validate_attachments(
            "Surface",
            physical_size.0,
            physical_size.1,
            surface_format,
            backend.max_texture_dimension_2d(),
        )?;
        let targets =
            SurfaceTargets::new(&mut backend, physical_size.0, physical_size.1, config.debug_pass)?;
        let size = (
            (physical_size.0 as f32 / config.pixel_ratio).round() as u32,
            (physical_size.1 as f32 / config.pixel_ratio).round() as u32,
        );

        log::info!(
            "Renderer ready: {}x{} ({}x{} physical), voxelization {}, debug pass {}",
            size.0,
            size.1,
            physical_size.0,
            physical_size.1,
            config.voxelization,
            config.debug_pass
        );

        Ok(Self {
            backend,
            config,
            blocks,
            library,
            materials,
            voxelizer,
            targets,
            marker_mesh,
            debug_sampler,
            size,
            physical_size,
            frame_index: 0,
            overflow_warnings: HashSet::new(),
        })
    }

    /// Resize to a logical size. The surface and every surface-sized target are recreated at
    /// the logical size times the pixel ratio.
    pub fn set_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let (physical_width, physical_height) = self.config.physical_size(width, height);
        validate_attachments(
            "Surface",
            physical_width,
            physical_height,
            self.backend.swapchain_format(),
            self.backend.max_texture_dimension_2d(),
        )?;

        self.backend.resize(physical_width, physical_height);
        let targets = SurfaceTargets::new(
            &mut self.backend,
            physical_width,
            physical_height,
            self.config.debug_pass,
        )?;
        let old = std::mem::replace(&mut self.targets, targets);
        old.destroy(&mut self.backend);

        self.size = (width, height);
        self.physical_size = (physical_width, physical_height);
        log::info!(
            "Resized to {}x{} ({}x{} physical)",
            width,
            height,
            physical_width,
            physical_height
        );
        Ok(())
    }

    /// Render and present one frame. On error nothing is presented.
    pub fn render_frame(&mut self, scene: &Scene, camera: &impl CameraView) -> RenderResult<()> {
        let frame = self.backend.begin_frame()?;
        let frame_index = self.frame_index;
        self.frame_index += 1;

        match self.record_frame(frame, frame_index, scene, camera) {
            Ok(()) => {
                self.backend.end_frame()?;
                Ok(())
            }
            Err(err) => {
                if let Some(world_position) = self.targets.world_position.as_mut() {
                    world_position.release(&mut self.backend);
                }
                self.backend.discard_frame();
                log::error!("Frame {} discarded: {}", frame_index, err);
                Err(err)
            }
        }
    }

    /// Voxelize `scene` now, whatever the policy.
    pub fn revoxelize(&mut self, scene: &Scene) -> RenderResult<()> {
        self.voxelizer.voxelize(
            &mut self.backend,
            &mut self.blocks,
            &self.library,
            &mut self.materials,
            scene,
        )
    }

    /// Flag the voxel volume as out of date with the scene.
    pub fn mark_voxels_stale(&mut self) {
        self.voxelizer.mark_stale();
    }

    pub fn voxel_state(&self) -> VoxelState {
        self.voxelizer.state()
    }

    /// Read back per-layer occupancy of the voxel volume. Blocks until the GPU is idle.
    pub fn debug_voxel_occupancy(&mut self) -> RenderResult<VoxelOccupancy> {
        if !self.config.debug.readback {
            return Err(RenderError::DebugReadbackDisabled);
        }
        self.voxelizer.occupancy(&mut self.backend)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn blocks(&self) -> &UniformBlockSet {
        &self.blocks
    }

    pub fn voxelizer(&self) -> &Voxelizer {
        &self.voxelizer
    }

    /// Logical size
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn physical_size(&self) -> (u32, u32) {
        self.physical_size
    }

    /// Frames rendered or attempted so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Release every GPU resource and hand the backend back.
    pub fn destroy(mut self) -> B {
        self.targets.destroy(&mut self.backend);
        self.voxelizer.destroy(&mut self.backend);
        self.blocks.destroy(&mut self.backend);
        self.backend
    }

    fn record_frame(
        &mut self,
        frame: FrameContext,
        frame_index: u64,
        scene: &Scene,
        camera: &impl CameraView,
    ) -> RenderResult<()> {
        self.blocks.reset_rings();

        let view = camera.view_matrix();
        let point_count = self.light_count("point", scene.point_lights.len())?;
        let directional_count = self.light_count("directional", scene.directional_lights.len())?;

        let scene_chunk = SceneChunk {
            view,
            projection: camera.projection_matrix(),
            light_counts: [point_count as u32, directional_count as u32, 0, 0],
        };
        self.blocks
            .block_mut(BlockName::Scene)
            .update(&mut self.backend, &[scene_chunk], 0)?;

        for (i, light) in scene.point_lights.iter().take(point_count).enumerate() {
            self.blocks.block_mut(BlockName::PointLights).update(
                &mut self.backend,
                &[light.chunk(&view)],
                light_offset(i),
            )?;
        }
        for (i, light) in scene.directional_lights.iter().take(directional_count).enumerate() {
            self.blocks.block_mut(BlockName::DirectionalLights).update(
                &mut self.backend,
                &[light.chunk(&view)],
                light_offset(i),
            )?;
        }

        if self.config.voxelization {
            self.voxelize_if_needed(frame_index, scene)?;
        }

        let model_slots = self.main_pass(frame, scene, point_count, directional_count)?;
        if self.config.debug_pass {
            self.debug_pass(frame, scene, &model_slots)?;
        }
        Ok(())
    }

    /// Number of lights of one kind to upload, after applying the overflow policy.
    fn light_count(&mut self, kind: &'static str, count: usize) -> RenderResult<usize> {
        if count <= MAX_LIGHTS {
            return Ok(count);
        }
        match self.config.light_overflow {
            LightOverflow::Reject => Err(RenderError::LightCapExceeded {
                kind,
                count,
                max: MAX_LIGHTS,
            }),
            LightOverflow::Clamp => {
                if self.overflow_warnings.insert((kind, count)) {
                    log::warn!(
                        "Scene has {} {} lights, only the first {} are used",
                        count,
                        kind,
                        MAX_LIGHTS
                    );
                }
                Ok(MAX_LIGHTS)
            }
        }
    }

    fn voxelize_if_needed(&mut self, frame_index: u64, scene: &Scene) -> RenderResult<()> {
        let policy = self.config.voxel.policy;
        if policy.marks_stale(frame_index) {
            self.voxelizer.mark_stale();
        }
        if self.voxelizer.state() == VoxelState::Stale && policy.voxelizes_when_stale() {
            self.revoxelize(scene)?;
        }
        Ok(())
    }

    /// Lit pass into the surface. Returns the model record of every object.
    fn main_pass(
        &mut self,
        frame: FrameContext,
        scene: &Scene,
        point_count: usize,
        directional_count: usize,
    ) -> RenderResult<Vec<u32>> {
        let pipeline = self.library.require(ProgramKind::Standard)?;
        let backend = &mut self.backend;

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Main Pass".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                load_op: LoadOp::Clear(self.config.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.targets.depth_view,
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        let (width, height) = self.physical_size;
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(pipeline);

        let mut model_slots = Vec::with_capacity(scene.objects.len());
        for object in &scene.objects {
            let model = self.blocks.block_mut(BlockName::Model);
            model_slots.push(model.advance()?);
            model.update(backend, &[object.transform.chunk()], 0)?;
            object.mesh.bind(backend);

            for part in &object.parts {
                let material = self.blocks.block_mut(BlockName::Material);
                material.advance()?;
                material.update(backend, &[part.material.chunk(&scene.ui)], 0)?;
                self.blocks.bind(backend);
                self.materials.bind(backend, &part.material)?;
                backend.draw_indexed(part.indices.clone(), 0, 0..1);
            }
        }

        let markers: Vec<(Mat4, Vec3)> = scene
            .point_lights
            .iter()
            .take(point_count)
            .filter(|light| light.debug)
            .map(|light| (light.marker_matrix(), light.color))
            .chain(
                scene
                    .directional_lights
                    .iter()
                    .take(directional_count)
                    .filter(|light| light.debug)
                    .map(|light| {
                        (light.marker_matrix(DIRECTIONAL_MARKER_DISTANCE), light.color)
                    }),
            )
            .collect();

        if !markers.is_empty() {
            backend.set_render_pipeline(self.library.require(ProgramKind::LightMarker)?);
            self.marker_mesh.bind(backend);
            for (matrix, color) in markers {
                let model = self.blocks.block_mut(BlockName::Model);
                model.advance()?;
                model.update(
                    backend,
                    &[ModelChunk {
                        model: matrix,
                        normal: matrix.inverse().transpose(),
                    }],
                    0,
                )?;
                let material = self.blocks.block_mut(BlockName::Material);
                material.advance()?;
                material.update(
                    backend,
                    &[Material::colored("light marker", color).chunk(&scene.ui)],
                    0,
                )?;
                self.blocks.bind(backend);
                backend.draw_indexed(0..self.marker_mesh.index_count(), 0, 0..1);
            }
        }

        backend.end_render_pass();
        Ok(model_slots)
    }

    /// World positions into the offscreen target, then the voxel overlay onto the surface.
    fn debug_pass(&mut self, frame: FrameContext, scene: &Scene, model_slots: &[u32]) -> RenderResult<()> {
        let world_pipeline = self.library.require(ProgramKind::WorldPosition)?;
        let overlay_pipeline = self.library.require(ProgramKind::VoxelDebug)?;
        let Some(target) = self.targets.world_position.as_mut() else {
            return Ok(());
        };
        let backend = &mut self.backend;

        target.bind_for_drawing(backend, [0.0; 4]);
        backend.set_render_pipeline(world_pipeline);
        for (object, &slot) in scene.objects.iter().zip(model_slots) {
            self.blocks.block_mut(BlockName::Model).select_slot(slot);
            self.blocks.bind(backend);
            object.mesh.bind(backend);
            for part in &object.parts {
                backend.draw_indexed(part.indices.clone(), 0, 0..1);
            }
        }

        let positions = target.bind_for_sampling(
            backend,
            self.library.frame_sampling_layout(),
            self.debug_sampler,
        )?;

        let fraction = self.config.debug.quad_fraction.clamp(0.0, 1.0);
        let chunk = DebugChunk {
            params: [
                scene.ui.voxel_debug_mip,
                self.voxelizer.grid().scale(),
                VOXEL_RESOLUTION as f32,
                0.0,
            ],
            rect: [1.0 - fraction, 1.0 - fraction, fraction, fraction],
        };
        self.blocks
            .block_mut(BlockName::Debug)
            .update(backend, &[chunk], 0)?;

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("Voxel Debug".into()),
            color_attachments: vec![ColorAttachment {
                view: frame.swapchain_view,
                load_op: LoadOp::Load,
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        let (width, height) = self.physical_size;
        backend.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
        backend.set_render_pipeline(overlay_pipeline);
        self.blocks.bind(backend);
        backend.set_bind_group(1, positions, &[]);
        backend.set_bind_group(2, self.voxelizer.volume().front_bind_group(), &[]);
        backend.draw(0..4, 0..1);
        backend.end_render_pass();

        target.release(backend);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::Command;
    use crate::scene::{Camera, PointLight};

    fn renderer(config: RendererConfig) -> Renderer<HeadlessBackend> {
        Renderer::initialize(HeadlessBackend::new(320, 240), config).unwrap()
    }

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO)
    }

    #[test]
    fn clamped_overflow_warns_once_per_count() {
        let mut renderer = renderer(RendererConfig::default());
        assert_eq!(renderer.light_count("point", 20).unwrap(), MAX_LIGHTS);
        assert_eq!(renderer.light_count("point", 20).unwrap(), MAX_LIGHTS);
        assert_eq!(renderer.light_count("point", 21).unwrap(), MAX_LIGHTS);
        assert_eq!(renderer.overflow_warnings.len(), 2);
    }

    #[test]
    fn debug_markers_draw_after_objects() {
        let mut renderer = renderer(RendererConfig {
            voxelization: false,
            ..Default::default()
        });
        let mut scene = Scene::new();
        scene.add_point_light(PointLight::new(Vec3::Y, Vec3::X, 1.0).with_debug(true));
        scene.add_point_light(PointLight::new(Vec3::X, Vec3::Y, 1.0));
        renderer.render_frame(&scene, &camera()).unwrap();

        let marker_draws = renderer
            .backend()
            .commands()
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { indices } if indices.end == 36))
            .count();
        assert_eq!(marker_draws, 1);

        let material = renderer.blocks().block(BlockName::Material).record(0);
        let diffuse: Vec<f32> = material[16..28]
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes(bytes.try_into().unwrap()))
            .collect();
        assert_eq!(diffuse, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn debug_pass_samples_world_positions() {
        let mut renderer = renderer(RendererConfig {
            debug_pass: true,
            ..Default::default()
        });
        renderer.render_frame(&Scene::new(), &camera()).unwrap();

        let commands = renderer.backend().commands();
        let labels: Vec<_> = commands
            .iter()
            .filter_map(|c| match c {
                Command::BeginRenderPass { label, .. } => label.as_deref(),
                _ => None,
            })
            .filter(|label| *label != "Voxel Layer")
            .collect();
        assert_eq!(labels, vec!["Main Pass", "World Position", "Voxel Debug"]);
        assert!(commands.contains(&Command::Draw { vertices: 0..4 }));
        assert_eq!(commands.last(), Some(&Command::Present));
    }
}
