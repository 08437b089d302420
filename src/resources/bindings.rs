//! Bind groups exposing material maps to the shaders.

use std::collections::HashMap;

use crate::backend::*;
use crate::error::RenderResult;

use super::{Material, Texture};

/// Bind group index of the material maps
pub const MATERIAL_GROUP: u32 = 1;

/// Creates and caches one bind group per distinct set of material maps.
///
/// Missing maps are filled with a 1x1 white texture.
#[derive(Debug)]
pub struct MaterialBindings {
    layout: BindGroupLayoutHandle,
    fallback: Texture,
    cache: HashMap<([TextureViewHandle; 4], SamplerHandle), BindGroupHandle>,
}

impl MaterialBindings {
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        layout: BindGroupLayoutHandle,
    ) -> RenderResult<Self> {
        Ok(Self {
            layout,
            fallback: Texture::white(backend)?,
            cache: HashMap::new(),
        })
    }

    /// Bind group for `material`'s maps, created on first use.
    pub fn bind_group<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        material: &Material,
    ) -> RenderResult<BindGroupHandle> {
        let maps = material.maps();
        let views = maps.map(|map| map.unwrap_or(self.fallback).view);
        let sampler = maps
            .iter()
            .flatten()
            .next()
            .unwrap_or(&self.fallback)
            .sampler;

        let key = (views, sampler);
        if let Some(bind_group) = self.cache.get(&key) {
            return Ok(*bind_group);
        }

        let mut entries: Vec<(u32, BindGroupEntry)> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| (binding as u32, BindGroupEntry::Texture(*view)))
            .collect();
        entries.push((4, BindGroupEntry::Sampler(sampler)));

        let bind_group = backend.create_bind_group(self.layout, &entries)?;
        log::debug!("Created material bind group for '{}'", material.name);
        self.cache.insert(key, bind_group);
        Ok(bind_group)
    }

    /// Bind `material`'s maps at [`MATERIAL_GROUP`].
    pub fn bind<B: GraphicsBackend>(
        &mut self,
        backend: &mut B,
        material: &Material,
    ) -> RenderResult<()> {
        let bind_group = self.bind_group(backend, material)?;
        backend.set_bind_group(MATERIAL_GROUP, bind_group, &[]);
        Ok(())
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TextureData;

    #[test]
    fn materials_sharing_maps_share_a_bind_group() {
        let mut backend = HeadlessBackend::new(4, 4);
        let layout = backend.create_bind_group_layout(&[]).unwrap();
        let mut bindings = MaterialBindings::new(&mut backend, layout).unwrap();
        let checker = Texture::upload(
            &mut backend,
            &TextureData::checkerboard(8, [0; 4], [255; 4]),
        )
        .unwrap();

        let plain_a = bindings.bind_group(&mut backend, &Material::new("a")).unwrap();
        let plain_b = bindings.bind_group(&mut backend, &Material::new("b")).unwrap();
        let mapped = bindings
            .bind_group(&mut backend, &Material::new("c").with_diffuse_map(checker))
            .unwrap();

        assert_eq!(plain_a, plain_b);
        assert_ne!(plain_a, mapped);
        assert_eq!(bindings.cached(), 2);
    }
}
