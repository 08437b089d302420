//! WGSL parsing and uniform block reflection.

use std::collections::BTreeMap;

use naga::valid::{Capabilities, ValidationFlags, Validator};
use naga::AddressSpace;

use crate::error::{RenderError, RenderResult};
use crate::uniform::{BlockName, UniformBlockSet, BLOCK_GROUP};

use super::ProgramKind;

/// A `var<uniform>` declared by a shader module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedUniform {
    pub name: String,
    pub group: u32,
    pub binding: u32,
}

/// Parse and validate a WGSL module.
pub fn parse_program(program: &str, source: &str) -> RenderResult<naga::Module> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| RenderError::ShaderParse {
        program: program.to_string(),
        message: e.emit_to_string(source),
    })?;

    let mut validator = Validator::new(ValidationFlags::all(), Capabilities::all());
    validator
        .validate(&module)
        .map_err(|e| RenderError::ShaderParse {
            program: program.to_string(),
            message: format!("Validation error: {e}"),
        })?;

    Ok(module)
}

/// Every uniform variable of `module` with its resource binding, in declaration order.
pub fn reflect_uniform_blocks(module: &naga::Module) -> Vec<ReflectedUniform> {
    module
        .global_variables
        .iter()
        .filter(|(_, var)| var.space == AddressSpace::Uniform)
        .filter_map(|(_, var)| {
            let binding = var.binding.as_ref()?;
            Some(ReflectedUniform {
                name: var.name.clone().unwrap_or_default(),
                group: binding.group,
                binding: binding.binding,
            })
        })
        .collect()
}

/// Binding slot of each block in each program, resolved once at program load.
#[derive(Debug, Default)]
pub struct BlockSlotCache {
    slots: BTreeMap<(ProgramKind, BlockName), u32>,
}

impl BlockSlotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the blocks `module` declares for `kind`, checking each against the binding
    /// point the block was created with.
    pub fn resolve(
        &mut self,
        kind: ProgramKind,
        module: &naga::Module,
        blocks: &UniformBlockSet,
    ) -> RenderResult<()> {
        for uniform in reflect_uniform_blocks(module) {
            let Some(block) = BlockName::from_shader_name(&uniform.name) else {
                log::warn!(
                    "Program '{}' declares unknown uniform '{}', ignoring",
                    kind.label(),
                    uniform.name
                );
                continue;
            };

            let expected = blocks.binding_of(block);
            if uniform.group != BLOCK_GROUP || uniform.binding != expected {
                return Err(RenderError::BlockBindingMismatch {
                    program: kind.label().to_string(),
                    block,
                    group: uniform.group,
                    binding: uniform.binding,
                    expected,
                });
            }
            self.slots.insert((kind, block), uniform.binding);
        }
        Ok(())
    }

    /// Slot of `block` in `kind`, `None` when the program does not declare it
    pub fn slot(&self, kind: ProgramKind, block: BlockName) -> Option<u32> {
        self.slots.get(&(kind, block)).copied()
    }

    /// Blocks declared by `kind`, in binding order
    pub fn blocks_of(&self, kind: ProgramKind) -> Vec<BlockName> {
        let mut blocks: Vec<(u32, BlockName)> = self
            .slots
            .iter()
            .filter(|((program, _), _)| *program == kind)
            .map(|((_, block), slot)| (*slot, *block))
            .collect();
        blocks.sort();
        blocks.into_iter().map(|(_, block)| block).collect()
    }
}
