//! Offscreen color + depth target that is either drawn into or sampled from.

use crate::backend::*;
use crate::error::{RenderError, RenderResult};

/// Depth format of every depth attachment the renderer creates
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Color format of the world-position target
pub const WORLD_POSITION_FORMAT: TextureFormat = TextureFormat::Rgba16Float;

/// Role of a frame resource. A resource is never drawn into and sampled at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameResourceState {
    Idle,
    Drawing,
    Sampling,
}

/// Check that a color + depth attachment set of this shape can be created and rendered to.
pub fn validate_attachments(
    label: &str,
    width: u32,
    height: u32,
    color_format: TextureFormat,
    max_dimension: u32,
) -> RenderResult<()> {
    let reason = if width == 0 || height == 0 {
        Some(format!("attachment size {}x{} is empty", width, height))
    } else if width > max_dimension || height > max_dimension {
        Some(format!(
            "attachment size {}x{} exceeds the device limit of {}",
            width, height, max_dimension
        ))
    } else if color_format.is_depth() {
        Some(format!("{:?} cannot be used as a color attachment", color_format))
    } else if !color_format.is_color_renderable() {
        Some(format!("{:?} is not color renderable", color_format))
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RenderError::IncompleteFramebuffer {
            label: label.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// A color attachment with a matching depth attachment.
#[derive(Debug)]
pub struct FrameResource {
    label: String,
    width: u32,
    height: u32,
    color_format: TextureFormat,
    color_texture: TextureHandle,
    color_view: TextureViewHandle,
    depth_texture: TextureHandle,
    depth_view: TextureViewHandle,
    state: FrameResourceState,
    sampling: Option<(BindGroupLayoutHandle, SamplerHandle, BindGroupHandle)>,
}

impl FrameResource {
    /// Create the attachments, failing with `IncompleteFramebuffer` if the set is not complete.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        label: &str,
        width: u32,
        height: u32,
        color_format: TextureFormat,
    ) -> RenderResult<Self> {
        validate_attachments(
            label,
            width,
            height,
            color_format,
            backend.max_texture_dimension_2d(),
        )?;

        let color_texture = backend.create_texture(&TextureDescriptor {
            label: Some(format!("{} Color", label)),
            width,
            height,
            format: color_format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC,
            ..Default::default()
        })?;
        let color_view =
            backend.create_texture_view(color_texture, &TextureViewDescriptor::default())?;

        let depth_texture = backend.create_texture(&TextureDescriptor {
            label: Some(format!("{} Depth", label)),
            width,
            height,
            format: DEPTH_FORMAT,
            usage: TextureUsage::RENDER_ATTACHMENT,
            ..Default::default()
        })?;
        let depth_view =
            backend.create_texture_view(depth_texture, &TextureViewDescriptor::default())?;

        log::debug!(
            "Created frame resource '{}' ({}x{}, {:?})",
            label,
            width,
            height,
            color_format
        );

        Ok(Self {
            label: label.to_string(),
            width,
            height,
            color_format,
            color_texture,
            color_view,
            depth_texture,
            depth_view,
            state: FrameResourceState::Idle,
            sampling: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn color_format(&self) -> TextureFormat {
        self.color_format
    }

    pub fn color_texture(&self) -> TextureHandle {
        self.color_texture
    }

    pub fn color_view(&self) -> TextureViewHandle {
        self.color_view
    }

    pub fn depth_view(&self) -> TextureViewHandle {
        self.depth_view
    }

    pub fn state(&self) -> FrameResourceState {
        self.state
    }

    /// Begin a render pass on the attachments, clearing color to `clear` and depth to 1.0.
    pub fn bind_for_drawing<B: GraphicsBackend>(&mut self, backend: &mut B, clear: [f32; 4]) {
        debug_assert_ne!(
            self.state,
            FrameResourceState::Drawing,
            "'{}' is already bound for drawing",
            self.label
        );
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.label.clone()),
            color_attachments: vec![ColorAttachment {
                view: self.color_view,
                load_op: LoadOp::Clear(clear),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.depth_view,
                depth_load_op: LoadOp::Clear([1.0; 4]),
                depth_store_op: StoreOp::Store,
                depth_clear_value: 1.0,
            }),
        });
        backend.set_viewport(0.0, 0.0, self.width as f32, self.height as f32, 0.0, 1.0);
        self.state = FrameResourceState::Drawing;
    }

    /// End the render pass opened by [`Self::bind_for_drawing`].
    pub fn finish_drawing<B: GraphicsBackend>(&mut self, backend: &mut B) {
        if self.state == FrameResourceState::Drawing {
            backend.end_render_pass();
            self.state = FrameResourceState::Idle;
        }
    }

    /// Switch to the sampling role and return a bind group exposing the color attachment.
    ///
    /// A pending draw pass is ended first, so the image is whatever the pass produced (at
    /// least the clear color).
    pub fn bind_for_sampling<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        layout: BindGroupLayoutHandle,
        sampler: SamplerHandle,
    ) -> RenderResult<BindGroupHandle> {
        self.finish_drawing(backend);

        let bind_group = match self.sampling {
            Some((cached_layout, cached_sampler, bind_group))
                if cached_layout == layout && cached_sampler == sampler =>
            {
                bind_group
            }
            _ => {
                let bind_group = backend.create_bind_group(
                    layout,
                    &[
                        (0, BindGroupEntry::Texture(self.color_view)),
                        (1, BindGroupEntry::Sampler(sampler)),
                    ],
                )?;
                self.sampling = Some((layout, sampler, bind_group));
                bind_group
            }
        };

        self.state = FrameResourceState::Sampling;
        Ok(bind_group)
    }

    /// Leave the current role.
    pub fn release<B: GraphicsBackend>(&mut self, backend: &mut B) {
        self.finish_drawing(backend);
        self.state = FrameResourceState::Idle;
    }

    pub fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        if let Some((_, _, bind_group)) = self.sampling {
            backend.destroy_bind_group(bind_group);
        }
        backend.destroy_texture_view(self.color_view);
        backend.destroy_texture_view(self.depth_view);
        backend.destroy_texture(self.color_texture);
        backend.destroy_texture(self.depth_texture);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::Command;
    use rstest::rstest;

    const CLEAR: [f32; 4] = [0.25, 0.5, 0.75, 1.0];

    fn sampling_handles(backend: &mut HeadlessBackend) -> (BindGroupLayoutHandle, SamplerHandle) {
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let sampler = backend.create_sampler(&SamplerDescriptor::default()).unwrap();
        (layout, sampler)
    }

    #[rstest]
    #[case(0, 64, TextureFormat::Rgba8Unorm)]
    #[case(64, 0, TextureFormat::Rgba8Unorm)]
    #[case(9000, 64, TextureFormat::Rgba8Unorm)]
    #[case(64, 64, TextureFormat::Depth32Float)]
    #[case(64, 64, TextureFormat::Rgba32Float)]
    fn incomplete_attachments_are_rejected(
        #[case] width: u32,
        #[case] height: u32,
        #[case] format: TextureFormat,
    ) {
        let mut backend = HeadlessBackend::new(16, 16);
        let result = FrameResource::new(&mut backend, "target", width, height, format);
        assert!(matches!(
            result,
            Err(RenderError::IncompleteFramebuffer { ref label, .. }) if label == "target"
        ));
    }

    #[test]
    fn sampling_right_after_drawing_sees_the_clear() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut target =
            FrameResource::new(&mut backend, "target", 8, 8, TextureFormat::Rgba8Unorm).unwrap();
        let (layout, sampler) = sampling_handles(&mut backend);

        target.bind_for_drawing(&mut backend, CLEAR);
        assert_eq!(target.state(), FrameResourceState::Drawing);
        target.bind_for_sampling(&mut backend, layout, sampler).unwrap();

        assert_eq!(target.state(), FrameResourceState::Sampling);
        assert_eq!(backend.commands().last(), Some(&Command::EndRenderPass));
        let color = backend.subresource(target.color_texture(), 0, 0);
        assert_eq!(color.clear_color, Some(CLEAR));
        assert_eq!(color.draw_count, 0);
        assert_eq!(color.data.len(), 8 * 8 * 4);
    }

    #[test]
    fn sampling_bind_group_is_cached() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut target =
            FrameResource::new(&mut backend, "target", 8, 8, TextureFormat::Rgba16Float).unwrap();
        let (layout, sampler) = sampling_handles(&mut backend);

        let first = target.bind_for_sampling(&mut backend, layout, sampler).unwrap();
        target.release(&mut backend);
        target.bind_for_drawing(&mut backend, CLEAR);
        let second = target.bind_for_sampling(&mut backend, layout, sampler).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn drawing_sets_full_viewport() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut target =
            FrameResource::new(&mut backend, "target", 32, 16, TextureFormat::Rgba8Unorm).unwrap();
        backend.clear_commands();

        target.bind_for_drawing(&mut backend, CLEAR);
        target.finish_drawing(&mut backend);
        assert!(backend.commands().contains(&Command::SetViewport {
            x: 0.0,
            y: 0.0,
            width: 32.0,
            height: 16.0
        }));
        assert_eq!(target.state(), FrameResourceState::Idle);
    }
}
