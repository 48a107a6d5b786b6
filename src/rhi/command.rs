//! Recorded Commands
//!
//! The backend-neutral command stream a [`CommandList`](super::command_list::CommandList)
//! records into its allocator. Handles are resolved to native objects at
//! record time, so a stream stays valid after the handles are deleted.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::Backend;
use crate::types::{
    BufferRange, Color, Format, Rect, ResourceStates, SubresourceType, TextureSubresourceRange,
    Viewport,
};

/// One mip/slice of a texture used as an attachment or copy destination.
#[derive(Debug)]
pub struct TextureTarget<B: Backend> {
    pub texture: Arc<B::Texture>,
    pub format: Format,
    pub mip: u32,
    pub slice: u32,
}

/// A view stored in a descriptor heap slot.
#[derive(Debug)]
pub enum Descriptor<B: Backend> {
    Texture {
        texture: Arc<B::Texture>,
        kind: SubresourceType,
        format: Format,
        range: TextureSubresourceRange,
    },
    Buffer {
        buffer: Arc<B::Buffer>,
        kind: SubresourceType,
        range: BufferRange,
        stride: u32,
    },
}

impl<B: Backend> Descriptor<B> {
    #[must_use]
    pub fn kind(&self) -> SubresourceType {
        match self {
            Self::Texture { kind, .. } | Self::Buffer { kind, .. } => *kind,
        }
    }
}

/// How a directly bound buffer is viewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBinding {
    Constant,
    Structured,
    Unordered,
}

/// A resolved transition barrier.
#[derive(Debug)]
pub enum Barrier<B: Backend> {
    Texture {
        texture: Arc<B::Texture>,
        before: ResourceStates,
        after: ResourceStates,
        subresource: Option<u32>,
    },
    Buffer {
        buffer: Arc<B::Buffer>,
        before: ResourceStates,
        after: ResourceStates,
    },
    Memory,
}

#[derive(Debug)]
pub enum Command<B: Backend> {
    BeginMarker(String),
    EndMarker,
    Barriers(SmallVec<[Barrier<B>; 4]>),

    ClearColor {
        target: TextureTarget<B>,
        color: Color,
    },
    ClearDepthStencil {
        target: TextureTarget<B>,
        depth: Option<f32>,
        stencil: Option<u32>,
    },

    CopyBuffer {
        src: Arc<B::Buffer>,
        src_offset: u64,
        dst: Arc<B::Buffer>,
        dst_offset: u64,
        size: u64,
    },
    /// `bytes_per_row` is a multiple of [`TEXTURE_ROW_PITCH_ALIGNMENT`].
    CopyBufferToTexture {
        src: Arc<B::Buffer>,
        src_offset: u64,
        bytes_per_row: u32,
        rows_per_image: u32,
        dst: TextureTarget<B>,
        width: u32,
        height: u32,
        depth: u32,
    },

    SetRenderTargets {
        colors: SmallVec<[TextureTarget<B>; 8]>,
        depth: Option<TextureTarget<B>>,
    },
    SetGraphicsPipeline(Arc<B::GraphicsPipeline>),
    SetComputePipeline(Arc<B::ComputePipeline>),
    SetViewports(SmallVec<[Viewport; 8]>),
    SetScissors(SmallVec<[Rect; 8]>),

    PushConstants {
        root: u32,
        data: SmallVec<[u8; 128]>,
    },
    BindBuffer {
        root: u32,
        binding: BufferBinding,
        buffer: Arc<B::Buffer>,
        offset: u64,
        size: u64,
    },
    BindVertexBuffer {
        slot: u32,
        buffer: Arc<B::Buffer>,
        offset: u64,
        size: u64,
        stride: u32,
    },
    BindIndexBuffer {
        buffer: Arc<B::Buffer>,
        offset: u64,
        size: u64,
        format: Format,
    },
    /// Descriptors copied into the GPU-visible heap at `heap_offset`.
    /// `None` marks a slot whose resource no longer existed at record time.
    BindDescriptorTable {
        root: u32,
        heap_offset: u32,
        descriptors: Vec<Option<Descriptor<B>>>,
    },
    BindBindlessTable {
        root: u32,
        heap_offset: u32,
    },

    Draw {
        vertex_count: u32,
        instance_count: u32,
        start_vertex: u32,
        start_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    DispatchIndirect {
        args: Arc<B::Buffer>,
        offset: u64,
    },

    WriteTimestamp {
        heap: Arc<B::QueryHeap>,
        index: u32,
    },
}

/// Row pitch alignment of buffer-to-texture copies.
pub const TEXTURE_ROW_PITCH_ALIGNMENT: u32 = 256;

impl<B: Backend> Command<B> {
    /// Commands that belong to a render pass: pipeline/binding state and draws.
    #[must_use]
    pub fn is_graphics(&self) -> bool {
        matches!(
            self,
            Self::SetGraphicsPipeline(_)
                | Self::SetViewports(_)
                | Self::SetScissors(_)
                | Self::PushConstants { .. }
                | Self::BindBuffer { .. }
                | Self::BindVertexBuffer { .. }
                | Self::BindIndexBuffer { .. }
                | Self::BindDescriptorTable { .. }
                | Self::BindBindlessTable { .. }
                | Self::Draw { .. }
                | Self::DrawIndexed { .. }
        )
    }

    /// Commands that belong to a compute pass.
    #[must_use]
    pub fn is_compute(&self) -> bool {
        matches!(
            self,
            Self::SetComputePipeline(_)
                | Self::PushConstants { .. }
                | Self::BindBuffer { .. }
                | Self::BindDescriptorTable { .. }
                | Self::BindBindlessTable { .. }
                | Self::Dispatch { .. }
                | Self::DispatchIndirect { .. }
        )
    }
}

// ============================================================================
// Clone
// ============================================================================
//
// Native types are not `Clone`; only their `Arc`s are.

impl<B: Backend> Clone for TextureTarget<B> {
    fn clone(&self) -> Self {
        Self {
            texture: Arc::clone(&self.texture),
            format: self.format,
            mip: self.mip,
            slice: self.slice,
        }
    }
}

impl<B: Backend> Clone for Descriptor<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Texture { texture, kind, format, range } => Self::Texture {
                texture: Arc::clone(texture),
                kind: *kind,
                format: *format,
                range: *range,
            },
            Self::Buffer { buffer, kind, range, stride } => Self::Buffer {
                buffer: Arc::clone(buffer),
                kind: *kind,
                range: *range,
                stride: *stride,
            },
        }
    }
}

impl<B: Backend> Clone for Barrier<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Texture { texture, before, after, subresource } => Self::Texture {
                texture: Arc::clone(texture),
                before: *before,
                after: *after,
                subresource: *subresource,
            },
            Self::Buffer { buffer, before, after } => Self::Buffer {
                buffer: Arc::clone(buffer),
                before: *before,
                after: *after,
            },
            Self::Memory => Self::Memory,
        }
    }
}

impl<B: Backend> Clone for Command<B> {
    fn clone(&self) -> Self {
        match self {
            Self::BeginMarker(name) => Self::BeginMarker(name.clone()),
            Self::EndMarker => Self::EndMarker,
            Self::Barriers(barriers) => Self::Barriers(barriers.clone()),
            Self::ClearColor { target, color } => Self::ClearColor {
                target: target.clone(),
                color: *color,
            },
            Self::ClearDepthStencil { target, depth, stencil } => Self::ClearDepthStencil {
                target: target.clone(),
                depth: *depth,
                stencil: *stencil,
            },
            Self::CopyBuffer { src, src_offset, dst, dst_offset, size } => Self::CopyBuffer {
                src: Arc::clone(src),
                src_offset: *src_offset,
                dst: Arc::clone(dst),
                dst_offset: *dst_offset,
                size: *size,
            },
            Self::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                rows_per_image,
                dst,
                width,
                height,
                depth,
            } => Self::CopyBufferToTexture {
                src: Arc::clone(src),
                src_offset: *src_offset,
                bytes_per_row: *bytes_per_row,
                rows_per_image: *rows_per_image,
                dst: dst.clone(),
                width: *width,
                height: *height,
                depth: *depth,
            },
            Self::SetRenderTargets { colors, depth } => Self::SetRenderTargets {
                colors: colors.clone(),
                depth: depth.clone(),
            },
            Self::SetGraphicsPipeline(pso) => Self::SetGraphicsPipeline(Arc::clone(pso)),
            Self::SetComputePipeline(pso) => Self::SetComputePipeline(Arc::clone(pso)),
            Self::SetViewports(viewports) => Self::SetViewports(viewports.clone()),
            Self::SetScissors(scissors) => Self::SetScissors(scissors.clone()),
            Self::PushConstants { root, data } => Self::PushConstants {
                root: *root,
                data: data.clone(),
            },
            Self::BindBuffer { root, binding, buffer, offset, size } => Self::BindBuffer {
                root: *root,
                binding: *binding,
                buffer: Arc::clone(buffer),
                offset: *offset,
                size: *size,
            },
            Self::BindVertexBuffer { slot, buffer, offset, size, stride } => Self::BindVertexBuffer {
                slot: *slot,
                buffer: Arc::clone(buffer),
                offset: *offset,
                size: *size,
                stride: *stride,
            },
            Self::BindIndexBuffer { buffer, offset, size, format } => Self::BindIndexBuffer {
                buffer: Arc::clone(buffer),
                offset: *offset,
                size: *size,
                format: *format,
            },
            Self::BindDescriptorTable { root, heap_offset, descriptors } => Self::BindDescriptorTable {
                root: *root,
                heap_offset: *heap_offset,
                descriptors: descriptors.clone(),
            },
            Self::BindBindlessTable { root, heap_offset } => Self::BindBindlessTable {
                root: *root,
                heap_offset: *heap_offset,
            },
            Self::Draw { vertex_count, instance_count, start_vertex, start_instance } => Self::Draw {
                vertex_count: *vertex_count,
                instance_count: *instance_count,
                start_vertex: *start_vertex,
                start_instance: *start_instance,
            },
            Self::DrawIndexed {
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            } => Self::DrawIndexed {
                index_count: *index_count,
                instance_count: *instance_count,
                start_index: *start_index,
                base_vertex: *base_vertex,
                start_instance: *start_instance,
            },
            Self::Dispatch { x, y, z } => Self::Dispatch { x: *x, y: *y, z: *z },
            Self::DispatchIndirect { args, offset } => Self::DispatchIndirect {
                args: Arc::clone(args),
                offset: *offset,
            },
            Self::WriteTimestamp { heap, index } => Self::WriteTimestamp {
                heap: Arc::clone(heap),
                index: *index,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;
    use crate::types::{BufferDesc, TextureDesc};

    #[test]
    fn test_clone_shares_native_objects() {
        let backend = NullBackend::default();
        let texture = Arc::new(backend.create_texture(&TextureDesc::default()).unwrap());
        let buffer = Arc::new(
            backend
                .create_buffer(&BufferDesc {
                    size: 64,
                    ..Default::default()
                })
                .unwrap(),
        );

        let descriptor: Descriptor<NullBackend> = Descriptor::Texture {
            texture: Arc::clone(&texture),
            kind: SubresourceType::Srv,
            format: Format::Rgba8Unorm,
            range: TextureSubresourceRange::ALL,
        };
        let copy = descriptor.clone();
        assert_eq!(copy.kind(), SubresourceType::Srv);
        assert_eq!(Arc::strong_count(&texture), 3);

        let command: Command<NullBackend> = Command::BindDescriptorTable {
            root: 1,
            heap_offset: 8,
            descriptors: vec![Some(copy), None],
        };
        let stream = vec![
            command,
            Command::CopyBuffer {
                src: Arc::clone(&buffer),
                src_offset: 0,
                dst: Arc::clone(&buffer),
                dst_offset: 32,
                size: 32,
            },
        ];
        let cloned = stream.clone();
        assert_eq!(Arc::strong_count(&texture), 4);
        assert_eq!(Arc::strong_count(&buffer), 5);
        assert!(matches!(
            &cloned[0],
            Command::BindDescriptorTable { root: 1, heap_offset: 8, descriptors } if descriptors.len() == 2
        ));

        drop(cloned);
        drop(stream);
        drop(descriptor);
        assert_eq!(Arc::strong_count(&texture), 1);
        assert_eq!(Arc::strong_count(&buffer), 1);
    }
}
