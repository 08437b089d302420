//! End-to-end tests of the render pipeline on the headless backend.

mod common;

use glam::Vec3;
use rstest::rstest;

use common::*;
use voxel_pipeline::backend::headless::Command;
use voxel_pipeline::backend::{GraphicsBackend, HeadlessBackend, SamplerDescriptor, TextureFormat};
use voxel_pipeline::frame_resource::FrameResourceState;
use voxel_pipeline::scene::{CameraView, DirectionalLight, PointLight, UiParams};
use voxel_pipeline::uniform::{light_offset, BlockName, UniformBlockSet, MATERIAL_DATA_CHUNK_SIZE};
use voxel_pipeline::voxel::{VOXEL_CLEAR_COLOR, VOXEL_RESOLUTION};
use voxel_pipeline::{
    DebugConfig, FrameResource, LightOverflow, RenderError, Renderer, RendererConfig, Scene,
    VoxelConfig, VoxelPolicy, VoxelState,
};

fn no_voxels() -> RendererConfig {
    RendererConfig {
        voxelization: false,
        ..Default::default()
    }
}

fn scene_light_counts(renderer: &Renderer<HeadlessBackend>) -> [u32; 2] {
    let bytes = block_bytes(renderer, BlockName::Scene);
    let count = |at: usize| u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
    [count(128), count(132)]
}

// ============================================================================
// Uniform records
// ============================================================================

#[rstest]
#[case(0)]
#[case(1)]
#[case(5)]
#[case(15)]
#[case(16)]
fn test_point_light_records_are_packed_at_fixed_offsets(#[case] count: usize) {
    let mut renderer = renderer(no_voxels());
    let mut scene = Scene::new();
    for i in 0..count {
        let position = Vec3::new(i as f32, 1.0, -(i as f32));
        let light = PointLight::new(position, Vec3::new(1.0, 0.5, 0.25), 1.0 + i as f32)
            .with_debug(i % 2 == 0);
        scene.add_point_light(light);
    }
    let camera = camera();
    renderer.render_frame(&scene, &camera).unwrap();

    let bytes = block_bytes(&renderer, BlockName::PointLights);
    let view = camera.view_matrix();
    for (i, light) in scene.point_lights.iter().enumerate() {
        let offset = light_offset(i) as usize;
        assert_eq!(offset, i * 48);
        let expected = light.chunk(&view);
        assert_eq!(&bytes[offset..offset + 48], bytemuck::bytes_of(&expected));

        let record = words(&bytes[offset..offset + 48]);
        let view_position = view.transform_point3(light.position);
        assert!((Vec3::new(record[0], record[1], record[2]) - view_position).length() < 1e-5);
        assert_eq!(record[3], 0.0);
        assert_eq!(&record[4..8], &[1.0, 0.5, 0.25, 1.0 + i as f32]);
        assert_eq!(record[8], if i % 2 == 0 { 1.0 } else { 0.0 });
    }
    assert_eq!(scene_light_counts(&renderer), [count as u32, 0]);
}

#[test]
fn test_directional_lights_are_rotated_not_translated() {
    let mut renderer = renderer(no_voxels());
    let mut scene = Scene::new();
    scene.add_directional_light(DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE, 0.5));
    let camera = camera();
    renderer.render_frame(&scene, &camera).unwrap();

    let record = words(&block_bytes(&renderer, BlockName::DirectionalLights)[..48]);
    let expected = camera.view_matrix().transform_vector3(Vec3::NEG_Y);
    assert!((Vec3::new(record[0], record[1], record[2]) - expected).length() < 1e-5);
    assert_eq!(scene_light_counts(&renderer), [0, 1]);
}

#[test]
fn test_material_record_is_twenty_padded_words() {
    let mut renderer = renderer(no_voxels());
    let mut scene = Scene::new();
    let object = cube(&mut renderer, "cube", Vec3::ZERO, 1.0);
    scene.add_object(object);
    scene.ui = UiParams {
        bump_intensity: 0.5,
        display_bump: false,
        display_specular: true,
        voxel_debug_mip: 0.0,
    };
    renderer.render_frame(&scene, &camera()).unwrap();

    let material = renderer.blocks().block(BlockName::Material).record(0);
    assert_eq!(material.len(), MATERIAL_DATA_CHUNK_SIZE * 4);
    assert_eq!(material.len(), 80);

    let record = words(material);
    let data = &scene.objects[0].parts[0].material.data;
    assert_eq!(&record[0..3], &data.ambient.to_array());
    assert_eq!(&record[4..7], &data.diffuse.to_array());
    assert_eq!(&record[8..11], &data.specular.to_array());
    assert_eq!([record[3], record[7], record[11]], [0.0; 3]);
    assert_eq!(record[12], data.specular_exponent);
    assert_eq!(record[13], 0.5);
    // no maps, bump hidden, specular shown
    assert_eq!(&record[14..20], &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
}

#[test]
fn test_update_past_capacity_writes_nothing() {
    let mut backend = HeadlessBackend::new(16, 16);
    let mut blocks = UniformBlockSet::new(&mut backend, 4).unwrap();
    backend.clear_commands();

    let block = blocks.block_mut(BlockName::Scene);
    let capacity = block.chunk_size();
    let err = block
        .update(&mut backend, &[1.0f32; 4], capacity - 8)
        .unwrap_err();

    assert!(matches!(err, RenderError::UniformOverflow { block: BlockName::Scene, .. }));
    assert!(backend.commands().is_empty());
    let contents = backend.buffer_contents(block.buffer()).unwrap();
    assert!(contents.iter().all(|b| *b == 0));
}

#[test]
fn test_unchanged_input_uploads_identical_uniforms() {
    let mut renderer = renderer(RendererConfig::default());
    let mut scene = Scene::new();
    let a = cube(&mut renderer, "a", Vec3::new(-0.5, 0.0, 0.0), 0.4);
    let b = cube(&mut renderer, "b", Vec3::new(0.5, 0.0, 0.0), 0.4);
    scene.add_object(a);
    scene.add_object(b);
    scene.add_point_light(PointLight::new(Vec3::Y, Vec3::ONE, 1.0).with_debug(true));
    scene.add_directional_light(DirectionalLight::new(-Vec3::Y, Vec3::ONE, 0.5));
    let camera = camera();

    // Voxelize up front so both frames record only their own uploads.
    renderer.revoxelize(&scene).unwrap();

    let mut frames = Vec::new();
    for _ in 0..2 {
        renderer.backend_mut().clear_commands();
        renderer.render_frame(&scene, &camera).unwrap();
        frames.push(uniform_writes(&renderer));
    }

    assert_eq!(frames[0], frames[1]);
    let written: Vec<_> = frames[1].iter().map(|(name, _, _)| *name).collect();
    for name in [
        BlockName::Scene,
        BlockName::PointLights,
        BlockName::DirectionalLights,
        BlockName::Model,
        BlockName::Material,
    ] {
        assert!(written.contains(&name), "{:?} was not uploaded", name);
    }
    assert!(!written.contains(&BlockName::Voxel));
    assert_eq!(renderer.backend().frames_presented(), 2);
}

// ============================================================================
// Lights
// ============================================================================

#[rstest]
#[case(LightOverflow::Clamp, true)]
#[case(LightOverflow::Reject, false)]
fn test_light_cap_policy(#[case] policy: LightOverflow, #[case] presents: bool) {
    let mut renderer = renderer(RendererConfig {
        light_overflow: policy,
        ..no_voxels()
    });
    let mut scene = Scene::new();
    for i in 0..20 {
        scene.add_point_light(PointLight::new(Vec3::X * i as f32, Vec3::ONE, 1.0));
    }

    let result = renderer.render_frame(&scene, &camera());
    assert_eq!(result.is_ok(), presents);
    if presents {
        assert_eq!(scene_light_counts(&renderer), [16, 0]);
    } else {
        assert!(matches!(
            result,
            Err(RenderError::LightCapExceeded { count: 20, max: 16, .. })
        ));
        assert_eq!(renderer.backend().frames_presented(), 0);
        assert_eq!(renderer.backend().commands().last(), Some(&Command::DiscardFrame));
    }
}

// ============================================================================
// Surface and frame resources
// ============================================================================

#[rstest]
#[case(1.0)]
#[case(2.0)]
#[case(1.5)]
fn test_viewport_follows_size_and_pixel_ratio(#[case] ratio: f32) {
    let mut renderer = renderer(RendererConfig {
        pixel_ratio: ratio,
        ..no_voxels()
    });
    renderer.set_size(400, 300).unwrap();
    renderer.render_frame(&Scene::new(), &camera()).unwrap();

    let expected = ((400.0 * ratio) as u32, (300.0 * ratio) as u32);
    assert_eq!(renderer.backend().surface_size(), expected);
    assert_eq!(renderer.size(), (400, 300));

    let viewport = commands_after_pass(&renderer, "Main Pass")
        .iter()
        .find_map(|c| match c {
            Command::SetViewport { width, height, .. } => Some((*width, *height)),
            _ => None,
        })
        .unwrap();
    assert_eq!(viewport, (expected.0 as f32, expected.1 as f32));
}

#[rstest]
#[case(0, 100)]
#[case(100, 0)]
#[case(4096, 100)]
fn test_incomplete_surface_is_rejected(#[case] width: u32, #[case] height: u32) {
    let backend = HeadlessBackend::with_max_texture_dimension(320, 240, 2048);
    let mut renderer = Renderer::initialize(backend, no_voxels()).unwrap();

    let err = renderer.set_size(width, height).unwrap_err();
    assert!(matches!(err, RenderError::IncompleteFramebuffer { .. }));
    assert_eq!(renderer.backend().surface_size(), (320, 240));
    renderer.render_frame(&Scene::new(), &camera()).unwrap();
}

#[test]
fn test_sampling_right_after_drawing_yields_cleared_image() {
    let mut backend = HeadlessBackend::new(64, 64);
    let mut target =
        FrameResource::new(&mut backend, "Scratch", 32, 32, TextureFormat::Rgba8Unorm).unwrap();
    let layout = backend.create_bind_group_layout(&[]).unwrap();
    let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();

    target.bind_for_drawing(&mut backend, [1.0, 0.0, 0.0, 1.0]);
    let bind_group = target.bind_for_sampling(&mut backend, layout, sampler).unwrap();

    assert_eq!(target.state(), FrameResourceState::Sampling);
    assert_eq!(backend.commands().last(), Some(&Command::EndRenderPass));
    let image = backend.subresource(target.color_texture(), 0, 0);
    assert_eq!(image.clear_color, Some([1.0, 0.0, 0.0, 1.0]));
    assert_eq!(&image.data[..4], &[255, 0, 0, 255]);
    assert_eq!(target.bind_for_sampling(&mut backend, layout, sampler).unwrap(), bind_group);
}

#[test]
fn test_too_many_draws_discard_the_frame() {
    let mut renderer = renderer(RendererConfig {
        max_draws_per_frame: 2,
        ..no_voxels()
    });
    let mut scene = Scene::new();
    for i in 0..3 {
        let object = cube(&mut renderer, &format!("cube {}", i), Vec3::X * i as f32, 0.2);
        scene.add_object(object);
    }

    let err = renderer.render_frame(&scene, &camera()).unwrap_err();
    assert!(matches!(
        err,
        RenderError::SlotsExhausted { block: BlockName::Model, slots: 2 }
    ));
    assert_eq!(renderer.backend().frames_presented(), 0);

    scene.objects.pop();
    renderer.render_frame(&scene, &camera()).unwrap();
    assert_eq!(renderer.backend().frames_presented(), 1);
}

#[test]
fn test_resizing_releases_surface_targets() {
    let mut renderer = renderer(RendererConfig {
        debug_pass: true,
        ..no_voxels()
    });
    let scene = Scene::new();
    renderer.render_frame(&scene, &camera()).unwrap();
    let textures = renderer.backend().texture_count();
    let views = renderer.backend().view_count();
    let bind_groups = renderer.backend().bind_group_count();

    for i in 0..20 {
        renderer.set_size(SURFACE_WIDTH + i, SURFACE_HEIGHT).unwrap();
        renderer.render_frame(&scene, &camera()).unwrap();
    }

    assert_eq!(renderer.backend().texture_count(), textures);
    assert_eq!(renderer.backend().view_count(), views);
    assert_eq!(renderer.backend().bind_group_count(), bind_groups);
}

#[rstest]
#[case(0.0)]
#[case(-2.0)]
#[case(f32::NAN)]
fn test_degenerate_scene_scale_fails_initialization(#[case] scene_scale: f32) {
    let config = RendererConfig {
        voxel: VoxelConfig {
            scene_scale,
            ..Default::default()
        },
        ..Default::default()
    };
    let result = Renderer::initialize(HeadlessBackend::new(SURFACE_WIDTH, SURFACE_HEIGHT), config);
    assert!(matches!(result, Err(RenderError::InvalidConfig { .. })));
}

// ============================================================================
// Voxelization
// ============================================================================

#[test]
fn test_centered_cube_voxelizes_into_covering_layers() {
    let mut renderer = renderer(RendererConfig {
        voxel: VoxelConfig {
            scene_scale: 1.0,
            policy: VoxelPolicy::Auto,
        },
        ..Default::default()
    });
    let mut scene = Scene::new();
    let object = cube(&mut renderer, "cube", Vec3::ZERO, 0.5);
    scene.add_object(object);

    assert_eq!(renderer.voxel_state(), VoxelState::Stale);
    renderer.render_frame(&scene, &camera()).unwrap();
    assert_eq!(renderer.voxel_state(), VoxelState::Fresh);

    let volume = renderer.voxelizer().volume().front_texture();
    for layer in 0..VOXEL_RESOLUTION {
        let state = renderer.backend().subresource(volume, 0, layer);
        assert_eq!(state.clear_color, Some(VOXEL_CLEAR_COLOR), "layer {}", layer);
        if (24..=39).contains(&layer) {
            assert!(state.draw_count > 0, "layer {} should hold the cube", layer);
        } else {
            assert_eq!(state.draw_count, 0, "layer {} should stay clear", layer);
        }
    }
    for level in 1..7 {
        assert!(renderer.backend().subresource(volume, level, 0).draw_count > 0);
    }
}

#[rstest]
#[case(VoxelPolicy::Auto, vec![true, false, false, false])]
#[case(VoxelPolicy::Manual, vec![false, false, false, false])]
#[case(VoxelPolicy::Cadence(2), vec![true, false, true, false])]
fn test_voxel_policy_decides_when_frames_voxelize(
    #[case] policy: VoxelPolicy,
    #[case] expected: Vec<bool>,
) {
    let mut renderer = renderer(RendererConfig {
        voxel: VoxelConfig {
            policy,
            ..Default::default()
        },
        ..Default::default()
    });
    let scene = Scene::new();

    let mut voxelized = Vec::new();
    for _ in 0..expected.len() {
        renderer.backend_mut().clear_commands();
        renderer.render_frame(&scene, &camera()).unwrap();
        voxelized.push(
            count_commands(&renderer, |c| {
                matches!(c, Command::BeginComputePass { label: Some(l) } if l == "Voxel Mips")
            }) == 1,
        );
    }
    assert_eq!(voxelized, expected);
}

#[test]
fn test_manual_revoxelize_and_stale_marking() {
    let mut renderer = renderer(RendererConfig {
        voxel: VoxelConfig {
            policy: VoxelPolicy::Manual,
            ..Default::default()
        },
        ..Default::default()
    });
    let scene = Scene::new();

    renderer.render_frame(&scene, &camera()).unwrap();
    assert_eq!(renderer.voxel_state(), VoxelState::Stale);

    let before = renderer.voxelizer().volume().front_texture();
    renderer.revoxelize(&scene).unwrap();
    assert_eq!(renderer.voxel_state(), VoxelState::Fresh);
    assert_ne!(renderer.voxelizer().volume().front_texture(), before);

    renderer.mark_voxels_stale();
    assert_eq!(renderer.voxel_state(), VoxelState::Stale);
}

#[test]
fn test_failed_voxelization_keeps_front_volume() {
    let mut renderer = renderer(RendererConfig {
        max_draws_per_frame: 1,
        ..Default::default()
    });
    let mut scene = Scene::new();
    let a = cube(&mut renderer, "a", Vec3::ZERO, 0.5);
    let b = cube(&mut renderer, "b", Vec3::X * 0.5, 0.5);
    scene.add_object(a);
    scene.add_object(b);

    let front = renderer.voxelizer().volume().front_texture();
    assert!(renderer.render_frame(&scene, &camera()).is_err());
    assert_eq!(renderer.voxel_state(), VoxelState::Stale);
    assert_eq!(renderer.voxelizer().volume().front_texture(), front);
    assert_eq!(renderer.backend().frames_presented(), 0);
}

// ============================================================================
// Debug features
// ============================================================================

#[rstest]
#[case(false)]
#[case(true)]
fn test_occupancy_readback_is_opt_in(#[case] readback: bool) {
    let mut renderer = renderer(RendererConfig {
        debug: DebugConfig {
            readback,
            ..Default::default()
        },
        ..Default::default()
    });
    renderer.render_frame(&Scene::new(), &camera()).unwrap();

    let result = renderer.debug_voxel_occupancy();
    if readback {
        let occupancy = result.unwrap();
        assert_eq!(occupancy.layers.len(), VOXEL_RESOLUTION as usize);
        assert_eq!(occupancy.total(), 0);
    } else {
        assert!(matches!(result, Err(RenderError::DebugReadbackDisabled)));
    }
}

#[test]
fn test_occupancy_matches_voxelized_cube() {
    let mut renderer = renderer(RendererConfig {
        debug: DebugConfig {
            readback: true,
            ..Default::default()
        },
        ..Default::default()
    });
    let mut scene = Scene::new();
    let object = cube(&mut renderer, "cube", Vec3::ZERO, 0.5);
    scene.add_object(object);
    renderer.render_frame(&scene, &camera()).unwrap();

    let occupancy = renderer.debug_voxel_occupancy().unwrap();
    assert_eq!(occupancy.occupied_layers(), (24..=39).collect::<Vec<u32>>());
    assert!(occupancy.total() > 0);
}

#[test]
fn test_debug_overlay_uses_quad_fraction_and_mip() {
    let mut renderer = renderer(RendererConfig {
        debug_pass: true,
        debug: DebugConfig {
            quad_fraction: 0.5,
            ..Default::default()
        },
        ..Default::default()
    });
    let mut scene = Scene::new();
    let object = cube(&mut renderer, "cube", Vec3::ZERO, 0.5);
    scene.add_object(object);
    scene.ui.voxel_debug_mip = 2.0;
    renderer.render_frame(&scene, &camera()).unwrap();

    let debug = words(&block_bytes(&renderer, BlockName::Debug));
    assert_eq!(debug, vec![2.0, 1.0, 64.0, 0.0, 0.5, 0.5, 0.5, 0.5]);

    let overlay = commands_after_pass(&renderer, "Voxel Debug");
    assert!(overlay.contains(&Command::Draw { vertices: 0..4 }));
    let world_positions = commands_after_pass(&renderer, "World Position");
    assert!(world_positions
        .iter()
        .any(|c| matches!(c, Command::DrawIndexed { .. })));
}
