//! Headless backend for tests and tooling.
//!
//! This backend does not rasterize. It keeps buffer contents byte-exact, records every
//! command in order, and tracks per-subresource texture state (last clear color, number of
//! draws or compute writes that targeted it, raw bytes for uploads and clears). That is enough
//! to check upload layouts, pass ordering and which voxel layers received geometry.
//!
//! A draw or compute write covers the whole target with opaque white, so readbacks of 8-bit
//! targets tell written subresources apart from cleared ones.

use std::collections::HashMap;
use std::ops::Range;

use crate::backend::traits::*;
use crate::backend::types::*;

/// Default 2D size limit, matching the WebGPU baseline.
pub const HEADLESS_MAX_TEXTURE_DIMENSION_2D: u32 = 8192;

/// One recorded command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    WriteBuffer { buffer: BufferHandle, offset: u64, data: Vec<u8> },
    BeginRenderPass { label: Option<String>, color_views: Vec<TextureViewHandle> },
    EndRenderPass,
    BeginComputePass { label: Option<String> },
    EndComputePass,
    SetRenderPipeline(RenderPipelineHandle),
    SetComputePipeline(ComputePipelineHandle),
    SetBindGroup { index: u32, bind_group: BindGroupHandle, offsets: Vec<u32> },
    SetVertexBuffer { slot: u32, buffer: BufferHandle },
    SetIndexBuffer { buffer: BufferHandle },
    SetViewport { x: f32, y: f32, width: f32, height: f32 },
    Draw { vertices: Range<u32> },
    DrawIndexed { indices: Range<u32> },
    Dispatch { x: u32, y: u32, z: u32 },
    CopyTextureToTexture { source: TextureCopyLocation, destination: TextureCopyLocation },
    Submit,
    Present,
    DiscardFrame,
}

/// State of one (mip level, layer) of a texture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubresourceState {
    /// Color of the last clear, `None` if never cleared
    pub clear_color: Option<[f32; 4]>,
    /// Draws (or compute writes) since the last clear
    pub draw_count: u32,
    /// Texel bytes for uploads, clears and writes of 8-bit formats, empty otherwise
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct HeadlessTexture {
    desc: TextureDescriptor,
    subresources: HashMap<(u32, u32), SubresourceState>,
}

impl HeadlessTexture {
    fn mip_size(&self, mip_level: u32) -> (u32, u32, u32) {
        let layers = match self.desc.dimension {
            TextureDimension::D2 => 1,
            TextureDimension::D3 => (self.desc.depth >> mip_level).max(1),
        };
        (
            (self.desc.width >> mip_level).max(1),
            (self.desc.height >> mip_level).max(1),
            layers,
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct HeadlessView {
    texture: TextureHandle,
    desc: TextureViewDescriptor,
}

#[derive(Debug, Default)]
struct PassState {
    color_targets: Vec<HeadlessView>,
    compute_groups: HashMap<u32, BindGroupHandle>,
}

/// GPU-less implementation of [`GraphicsBackend`].
#[derive(Debug)]
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    max_texture_dimension_2d: u32,
    surface_texture: TextureHandle,
    surface_view: TextureViewHandle,

    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, HeadlessTexture>,
    views: HashMap<u64, HeadlessView>,
    bind_groups: HashMap<u64, Vec<(u32, BindGroupEntry)>>,
    render_pipeline_labels: HashMap<u64, Option<String>>,
    next_id: u64,

    commands: Vec<Command>,
    render_pass: Option<PassState>,
    compute_pass: Option<PassState>,
    frames_presented: u64,
}

impl HeadlessBackend {
    /// Create a headless backend with a `width` x `height` surface.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_max_texture_dimension(width, height, HEADLESS_MAX_TEXTURE_DIMENSION_2D)
    }

    /// Create a headless backend that reports a custom 2D texture size limit.
    pub fn with_max_texture_dimension(width: u32, height: u32, max_texture_dimension_2d: u32) -> Self {
        let mut backend = Self {
            width: width.max(1),
            height: height.max(1),
            max_texture_dimension_2d,
            surface_texture: TextureHandle(0),
            surface_view: TextureViewHandle(0),
            buffers: HashMap::new(),
            textures: HashMap::new(),
            views: HashMap::new(),
            bind_groups: HashMap::new(),
            render_pipeline_labels: HashMap::new(),
            next_id: 1,
            commands: Vec::new(),
            render_pass: None,
            compute_pass: None,
            frames_presented: 0,
        };
        backend.surface_texture = backend.insert_texture(backend.surface_descriptor());
        backend.surface_view = backend.insert_view(backend.surface_texture, TextureViewDescriptor::default());
        backend
    }

    fn surface_descriptor(&self) -> TextureDescriptor {
        TextureDescriptor {
            label: Some("Headless Surface".into()),
            width: self.width,
            height: self.height,
            format: TextureFormat::Bgra8UnormSrgb,
            usage: TextureUsage::RENDER_ATTACHMENT,
            ..Default::default()
        }
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_texture(&mut self, desc: TextureDescriptor) -> TextureHandle {
        let id = self.next_handle();
        self.textures.insert(
            id,
            HeadlessTexture {
                desc,
                subresources: HashMap::new(),
            },
        );
        TextureHandle(id)
    }

    fn insert_view(&mut self, texture: TextureHandle, desc: TextureViewDescriptor) -> TextureViewHandle {
        let id = self.next_handle();
        self.views.insert(id, HeadlessView { texture, desc });
        TextureViewHandle(id)
    }

    fn subresource_mut(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> Option<&mut SubresourceState> {
        self.textures
            .get_mut(&texture.0)
            .map(|t| t.subresources.entry((mip_level, layer)).or_default())
    }

    fn clear_view(&mut self, view: HeadlessView, color: [f32; 4]) {
        let Some(texture) = self.textures.get_mut(&view.texture.0) else {
            return;
        };
        let (width, height, layers) = texture.mip_size(view.desc.base_mip_level);
        let texel = texel_bytes(texture.desc.format, color);
        for layer in 0..layers {
            let state = texture
                .subresources
                .entry((view.desc.base_mip_level, layer))
                .or_default();
            state.clear_color = Some(color);
            state.draw_count = 0;
            state.data = match texel {
                Some(texel) => texel.repeat((width * height) as usize),
                None => Vec::new(),
            };
        }
    }

    fn mark_written(&mut self, view: HeadlessView) {
        let Some(texture) = self.textures.get_mut(&view.texture.0) else {
            return;
        };
        let (width, height, layers) = texture.mip_size(view.desc.base_mip_level);
        let texel = texel_bytes(texture.desc.format, WRITTEN_COLOR);
        for layer in 0..layers {
            let state = texture
                .subresources
                .entry((view.desc.base_mip_level, layer))
                .or_default();
            state.draw_count += 1;
            if let Some(texel) = texel {
                state.data = texel.repeat((width * height) as usize);
            }
        }
    }

    // Inspection

    /// All commands recorded since creation or the last [`Self::clear_commands`].
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    /// State of one subresource; untouched subresources report the default state.
    pub fn subresource(&self, texture: TextureHandle, mip_level: u32, layer: u32) -> SubresourceState {
        self.textures
            .get(&texture.0)
            .and_then(|t| t.subresources.get(&(mip_level, layer)))
            .cloned()
            .unwrap_or_default()
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0).map(|t| &t.desc)
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    pub fn bind_group_count(&self) -> usize {
        self.bind_groups.len()
    }

    /// The texture standing in for the swapchain image.
    pub fn surface_texture(&self) -> TextureHandle {
        self.surface_texture
    }

    pub fn render_pipeline_label(&self, pipeline: RenderPipelineHandle) -> Option<&str> {
        self.render_pipeline_labels.get(&pipeline.0).and_then(|l| l.as_deref())
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

/// Color a draw or compute write leaves behind
const WRITTEN_COLOR: [f32; 4] = [1.0; 4];

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Bytes of one texel of `color`, `None` for formats whose data is not tracked.
fn texel_bytes(format: TextureFormat, color: [f32; 4]) -> Option<[u8; 4]> {
    match format {
        TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => Some(color.map(unorm8)),
        TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
            Some([color[2], color[1], color[0], color[3]].map(unorm8))
        }
        _ => None,
    }
}

impl GraphicsBackend for HeadlessBackend {
    fn name(&self) -> &'static str {
        "headless"
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let max = self.max_texture_dimension_2d;
        self.width = width.min(max);
        self.height = height.min(max);
        let desc = self.surface_descriptor();
        if let Some(surface) = self.textures.get_mut(&self.surface_texture.0) {
            surface.desc = desc;
            surface.subresources.clear();
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn max_texture_dimension_2d(&self) -> u32 {
        self.max_texture_dimension_2d
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        Ok(FrameContext {
            swapchain_view: self.surface_view,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.submit();
        self.commands.push(Command::Present);
        self.frames_presented += 1;
        Ok(())
    }

    fn discard_frame(&mut self) {
        self.render_pass = None;
        self.compute_pass = None;
        self.commands.push(Command::DiscardFrame);
    }

    fn submit(&mut self) {
        self.commands.push(Command::Submit);
    }

    fn swapchain_format(&self) -> TextureFormat {
        TextureFormat::Bgra8UnormSrgb
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, desc.size);
        let id = self.next_handle();
        self.buffers.insert(id, vec![0; desc.size as usize]);
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        log::trace!("HeadlessBackend: creating buffer {:?} (size: {})", desc.label, data.len());
        let id = self.next_handle();
        self.buffers.insert(id, data.to_vec());
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) {
        let Some(contents) = self.buffers.get_mut(&buffer.0) else {
            log::error!("HeadlessBackend: write to unknown buffer {:?}", buffer);
            return;
        };
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            log::error!(
                "HeadlessBackend: write of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            );
            return;
        }
        contents[start..end].copy_from_slice(data);
        self.commands.push(Command::WriteBuffer {
            buffer,
            offset,
            data: data.to_vec(),
        });
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "HeadlessBackend: creating texture {:?} ({}x{}x{})",
            desc.label,
            desc.width,
            desc.height,
            desc.depth
        );
        if desc.width == 0 || desc.height == 0 || desc.depth == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has a zero dimension",
                desc.label
            )));
        }
        if desc.width > self.max_texture_dimension_2d || desc.height > self.max_texture_dimension_2d {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} exceeds the {} texel limit",
                desc.label, self.max_texture_dimension_2d
            )));
        }
        Ok(self.insert_texture(desc.clone()))
    }

    fn create_texture_view(
        &mut self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        if !self.textures.contains_key(&texture.0) {
            return Err(BackendError::InvalidHandle { kind: "texture", id: texture.0 });
        }
        Ok(self.insert_view(texture, *desc))
    }

    fn write_texture(&mut self, texture: TextureHandle, mip_level: u32, data: &[u8], _width: u32, _height: u32) {
        if let Some(state) = self.subresource_mut(texture, mip_level, 0) {
            state.data = data.to_vec();
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("HeadlessBackend: creating sampler {:?}", desc.label);
        Ok(SamplerHandle(self.next_handle()))
    }

    fn create_bind_group_layout(&mut self, _entries: &[BindGroupLayoutEntry]) -> BackendResult<BindGroupLayoutHandle> {
        Ok(BindGroupLayoutHandle(self.next_handle()))
    }

    fn create_bind_group(
        &mut self,
        _layout: BindGroupLayoutHandle,
        entries: &[(u32, BindGroupEntry)],
    ) -> BackendResult<BindGroupHandle> {
        let id = self.next_handle();
        self.bind_groups.insert(id, entries.to_vec());
        Ok(BindGroupHandle(id))
    }

    fn create_render_pipeline(&mut self, desc: &RenderPipelineDescriptor) -> BackendResult<RenderPipelineHandle> {
        let id = self.next_handle();
        self.render_pipeline_labels.insert(id, desc.label.clone());
        Ok(RenderPipelineHandle(id))
    }

    fn create_compute_pipeline(&mut self, _desc: &ComputePipelineDescriptor) -> BackendResult<ComputePipelineHandle> {
        Ok(ComputePipelineHandle(self.next_handle()))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        let mut color_targets = Vec::new();
        for attachment in &desc.color_attachments {
            let Some(view) = self.views.get(&attachment.view.0).copied() else {
                continue;
            };
            if let LoadOp::Clear(color) = attachment.load_op {
                self.clear_view(view, color);
            }
            color_targets.push(view);
        }
        self.commands.push(Command::BeginRenderPass {
            label: desc.label.clone(),
            color_views: desc.color_attachments.iter().map(|a| a.view).collect(),
        });
        self.render_pass = Some(PassState {
            color_targets,
            ..Default::default()
        });
    }

    fn end_render_pass(&mut self) {
        if self.render_pass.take().is_some() {
            self.commands.push(Command::EndRenderPass);
        }
    }

    fn begin_compute_pass(&mut self, label: Option<&str>) {
        self.commands.push(Command::BeginComputePass {
            label: label.map(str::to_string),
        });
        self.compute_pass = Some(PassState::default());
    }

    fn end_compute_pass(&mut self) {
        if self.compute_pass.take().is_some() {
            self.commands.push(Command::EndComputePass);
        }
    }

    fn set_render_pipeline(&mut self, pipeline: RenderPipelineHandle) {
        self.commands.push(Command::SetRenderPipeline(pipeline));
    }

    fn set_compute_pipeline(&mut self, pipeline: ComputePipelineHandle) {
        self.commands.push(Command::SetComputePipeline(pipeline));
    }

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupHandle, dynamic_offsets: &[u32]) {
        if let Some(pass) = self.compute_pass.as_mut() {
            pass.compute_groups.insert(index, bind_group);
        }
        self.commands.push(Command::SetBindGroup {
            index,
            bind_group,
            offsets: dynamic_offsets.to_vec(),
        });
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, _offset: u64) {
        self.commands.push(Command::SetVertexBuffer { slot, buffer });
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, _offset: u64, _format: IndexFormat) {
        self.commands.push(Command::SetIndexBuffer { buffer });
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32, _min_depth: f32, _max_depth: f32) {
        self.commands.push(Command::SetViewport { x, y, width, height });
    }

    fn draw(&mut self, vertices: Range<u32>, _instances: Range<u32>) {
        let targets = self.render_pass.as_ref().map(|p| p.color_targets.clone()).unwrap_or_default();
        for view in targets {
            self.mark_written(view);
        }
        self.commands.push(Command::Draw { vertices });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, _instances: Range<u32>) {
        let targets = self.render_pass.as_ref().map(|p| p.color_targets.clone()).unwrap_or_default();
        for view in targets {
            self.mark_written(view);
        }
        self.commands.push(Command::DrawIndexed { indices });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        let groups: Vec<BindGroupHandle> = self
            .compute_pass
            .as_ref()
            .map(|p| p.compute_groups.values().copied().collect())
            .unwrap_or_default();
        let storage_views: Vec<HeadlessView> = groups
            .iter()
            .filter_map(|g| self.bind_groups.get(&g.0))
            .flatten()
            .filter_map(|(_, entry)| match entry {
                BindGroupEntry::StorageTexture(view) => self.views.get(&view.0).copied(),
                _ => None,
            })
            .collect();
        for view in storage_views {
            self.mark_written(view);
        }
        self.commands.push(Command::Dispatch { x, y, z });
    }

    fn copy_texture_to_texture(
        &mut self,
        source: TextureCopyLocation,
        destination: TextureCopyLocation,
        extent: [u32; 3],
    ) {
        for z in 0..extent[2] {
            let state = self.subresource(source.texture, source.mip_level, source.origin[2] + z);
            if let Some(target) = self.subresource_mut(
                destination.texture,
                destination.mip_level,
                destination.origin[2] + z,
            ) {
                *target = state;
            }
        }
        self.commands.push(Command::CopyTextureToTexture { source, destination });
    }

    fn read_texture(&mut self, texture: TextureHandle, mip_level: u32, layer: u32) -> BackendResult<Vec<u8>> {
        let Some(tex) = self.textures.get(&texture.0) else {
            return Err(BackendError::InvalidHandle { kind: "texture", id: texture.0 });
        };
        let (width, height, _) = tex.mip_size(mip_level);
        let size = (width * height * tex.desc.format.bytes_per_pixel()) as usize;
        let data = tex
            .subresources
            .get(&(mip_level, layer))
            .map(|s| s.data.clone())
            .filter(|d| d.len() == size)
            .unwrap_or_else(|| vec![0; size]);
        Ok(data)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_texture_view(&mut self, view: TextureViewHandle) {
        self.views.remove(&view.0);
    }

    fn destroy_bind_group(&mut self, bind_group: BindGroupHandle) {
        self.bind_groups.remove(&bind_group.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_texture(backend: &mut HeadlessBackend) -> (TextureHandle, TextureViewHandle) {
        let texture = backend
            .create_texture(&TextureDescriptor {
                width: 4,
                height: 4,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC,
                ..Default::default()
            })
            .unwrap();
        let view = backend
            .create_texture_view(texture, &TextureViewDescriptor::default())
            .unwrap();
        (texture, view)
    }

    #[test]
    fn write_buffer_updates_contents() {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 16,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();
        backend.write_buffer(buffer, 4, &[1, 2, 3, 4]);
        assert_eq!(backend.buffer_contents(buffer).unwrap()[4..8], [1, 2, 3, 4]);
    }

    #[test]
    fn out_of_range_write_is_dropped() {
        let mut backend = HeadlessBackend::new(64, 64);
        let buffer = backend
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 4,
                usage: BufferUsage::UNIFORM,
            })
            .unwrap();
        backend.write_buffer(buffer, 2, &[9, 9, 9, 9]);
        assert_eq!(backend.buffer_contents(buffer).unwrap(), &[0, 0, 0, 0]);
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn clear_then_draw_tracks_subresource() {
        let mut backend = HeadlessBackend::new(64, 64);
        let (texture, view) = color_texture(&mut backend);
        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachments: vec![ColorAttachment {
                view,
                load_op: LoadOp::Clear([1.0, 0.0, 0.0, 1.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        });
        backend.draw(0..3, 0..1);
        backend.end_render_pass();

        let state = backend.subresource(texture, 0, 0);
        assert_eq!(state.clear_color, Some([1.0, 0.0, 0.0, 1.0]));
        assert_eq!(state.draw_count, 1);
        assert_eq!(state.data, [255u8; 4].repeat(16));
    }

    #[test]
    fn destroyed_views_and_bind_groups_are_released() {
        let mut backend = HeadlessBackend::new(64, 64);
        let views = backend.view_count();
        let (texture, view) = color_texture(&mut backend);
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let bind_group = backend
            .create_bind_group(layout, &[(0, BindGroupEntry::Texture(view))])
            .unwrap();
        assert_eq!(backend.view_count(), views + 1);
        assert_eq!(backend.bind_group_count(), 1);

        backend.destroy_bind_group(bind_group);
        backend.destroy_texture_view(view);
        backend.destroy_texture(texture);
        assert_eq!(backend.view_count(), views);
        assert_eq!(backend.bind_group_count(), 0);
    }

    #[test]
    fn zero_sized_texture_is_rejected() {
        let mut backend = HeadlessBackend::new(64, 64);
        let result = backend.create_texture(&TextureDescriptor {
            width: 0,
            ..Default::default()
        });
        assert!(matches!(result, Err(BackendError::TextureCreationFailed(_))));
    }
}
