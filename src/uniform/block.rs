//! A GPU uniform block with a CPU shadow copy.

use bytemuck::Pod;

use crate::backend::{BindGroupEntry, BufferDescriptor, BufferHandle, BufferUsage, GraphicsBackend};
use crate::error::{RenderError, RenderResult};

use super::BlockName;

/// Dynamic offsets into a uniform buffer must be multiples of this.
pub const UNIFORM_OFFSET_ALIGNMENT: u64 = 256;

/// Buffer writes must be multiples of this.
const WRITE_ALIGNMENT: u64 = 4;

/// A uniform buffer holding one record, or a ring of records selected by dynamic offset.
///
/// Ring blocks hand out a fresh record per draw so every draw reads the data written for
/// it, even though all queue writes of a submission land before any of its commands run.
#[derive(Debug)]
pub struct UniformBlock {
    name: BlockName,
    binding: u32,
    buffer: BufferHandle,
    chunk_size: u64,
    stride: u64,
    slots: u32,
    cursor: Option<u32>,
    /// Records opened since the last reset
    opened: u32,
    shadow: Vec<u8>,
}

impl UniformBlock {
    /// Allocate a block at binding point `binding`. Ring blocks get `slots` records of
    /// `chunk_size` bytes; other blocks always hold one record.
    pub fn new<B: GraphicsBackend>(
        backend: &mut B,
        name: BlockName,
        binding: u32,
        chunk_size: u64,
        slots: u32,
    ) -> RenderResult<Self> {
        let slots = if name.is_ring() { slots.max(1) } else { 1 };
        let stride = if name.is_ring() {
            chunk_size.div_ceil(UNIFORM_OFFSET_ALIGNMENT) * UNIFORM_OFFSET_ALIGNMENT
        } else {
            chunk_size
        };
        let size = stride * slots as u64;
        let buffer = backend.create_buffer(&BufferDescriptor {
            label: Some(format!("{:?} Uniform Block", name)),
            size,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        log::debug!(
            "Created {:?} block at binding {} ({} x {} bytes)",
            name,
            binding,
            slots,
            stride
        );

        Ok(Self {
            name,
            binding,
            buffer,
            chunk_size,
            stride,
            slots,
            cursor: None,
            opened: 0,
            shadow: vec![0; size as usize],
        })
    }

    pub fn name(&self) -> BlockName {
        self.name
    }

    /// Binding point, fixed for the lifetime of the block
    pub fn binding(&self) -> u32 {
        self.binding
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    /// Declared length of one record in bytes
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn is_ring(&self) -> bool {
        self.name.is_ring()
    }

    /// Record that `update` writes to and `bind` exposes
    pub fn current_slot(&self) -> u32 {
        self.cursor.unwrap_or(0)
    }

    /// Dynamic offset of the current record
    pub fn dynamic_offset(&self) -> u32 {
        (self.current_slot() as u64 * self.stride) as u32
    }

    /// Open the next record. Fails once every record of this submission is in use.
    pub fn advance(&mut self) -> RenderResult<u32> {
        let next = self.opened;
        if next >= self.slots {
            return Err(RenderError::SlotsExhausted {
                block: self.name,
                slots: self.slots,
            });
        }
        self.opened += 1;
        self.cursor = Some(next);
        Ok(next)
    }

    /// Point back at a record written earlier in this submission.
    pub fn select_slot(&mut self, slot: u32) {
        debug_assert!(
            slot < self.opened,
            "{:?} record {} has not been written yet",
            self.name,
            slot
        );
        self.cursor = Some(slot.min(self.slots - 1));
    }

    /// Rewind the ring. Only valid once the previous records have been submitted.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.opened = 0;
    }

    /// Copy `values` into the current record at `byte_offset` and queue the upload.
    ///
    /// Nothing is written when the range falls outside the record.
    pub fn update<B: GraphicsBackend, T: Pod>(
        &mut self,
        backend: &mut B,
        values: &[T],
        byte_offset: u64,
    ) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let len = bytes.len() as u64;
        let overflow = RenderError::UniformOverflow {
            block: self.name,
            offset: byte_offset,
            len,
            capacity: self.chunk_size,
        };
        match byte_offset.checked_add(len) {
            Some(end) if end <= self.chunk_size => {}
            _ => return Err(overflow),
        }
        if byte_offset % WRITE_ALIGNMENT != 0 || len % WRITE_ALIGNMENT != 0 {
            return Err(overflow);
        }

        let start = self.current_slot() as u64 * self.stride + byte_offset;
        let range = start as usize..(start + len) as usize;
        self.shadow[range].copy_from_slice(bytes);
        backend.write_buffer(self.buffer, start, bytes);
        Ok(())
    }

    /// CPU copy of record `slot`
    pub fn record(&self, slot: u32) -> &[u8] {
        let start = (slot.min(self.slots - 1) as u64 * self.stride) as usize;
        &self.shadow[start..start + self.chunk_size as usize]
    }

    pub(crate) fn bind_group_entry(&self) -> (u32, BindGroupEntry) {
        (
            self.binding,
            BindGroupEntry::Buffer {
                buffer: self.buffer,
                offset: 0,
                size: Some(self.chunk_size),
            },
        )
    }

    pub(crate) fn destroy<B: GraphicsBackend>(self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;

    fn block(backend: &mut HeadlessBackend, slots: u32) -> UniformBlock {
        UniformBlock::new(backend, BlockName::Material, 2, 80, slots).unwrap()
    }

    #[test]
    fn update_writes_shadow_and_buffer() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut block = block(&mut backend, 1);
        block.update(&mut backend, &[1.0f32, 2.0], 8).unwrap();

        let expected: Vec<u8> = bytemuck::cast_slice(&[1.0f32, 2.0]).to_vec();
        assert_eq!(&block.record(0)[8..16], expected.as_slice());
        assert_eq!(&backend.buffer_contents(block.buffer()).unwrap()[8..16], expected.as_slice());
    }

    #[test]
    fn overflowing_update_is_rejected_and_writes_nothing() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut block = block(&mut backend, 1);
        let result = block.update(&mut backend, &[7.0f32; 3], 72);

        assert!(matches!(
            result,
            Err(RenderError::UniformOverflow { offset: 72, len: 12, capacity: 80, .. })
        ));
        assert!(block.record(0).iter().all(|b| *b == 0));
        assert!(backend.commands().is_empty());
    }

    #[test]
    fn ring_records_are_aligned_and_exhaust() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut block = block(&mut backend, 2);
        assert_eq!(block.advance().unwrap(), 0);
        assert_eq!(block.dynamic_offset(), 0);
        assert_eq!(block.advance().unwrap(), 1);
        assert_eq!(block.dynamic_offset(), 256);
        assert!(matches!(block.advance(), Err(RenderError::SlotsExhausted { slots: 2, .. })));

        block.reset();
        assert_eq!(block.advance().unwrap(), 0);
    }

    #[test]
    fn writes_go_to_current_record() {
        let mut backend = HeadlessBackend::new(16, 16);
        let mut block = block(&mut backend, 3);
        block.advance().unwrap();
        block.update(&mut backend, &[1u32], 0).unwrap();
        block.advance().unwrap();
        block.update(&mut backend, &[2u32], 0).unwrap();

        assert_eq!(&block.record(0)[..4], &1u32.to_ne_bytes());
        assert_eq!(&block.record(1)[..4], &2u32.to_ne_bytes());

        block.select_slot(0);
        assert_eq!(block.dynamic_offset(), 0);
        block.select_slot(1);
        assert_eq!(block.dynamic_offset(), 256);
        assert_eq!(block.advance().unwrap(), 2);
    }
}
