//! Command List
//!
//! The recording surface. A list is created by
//! [`GraphicsDevice::create_command_list`](crate::GraphicsDevice::create_command_list)
//! and cycles through `open → record → close → execute` any number of times.
//!
//! # Recording
//!
//! Every recording session checks out three things sized to the queue's
//! completed fence at [`open`](CommandList::open):
//!
//! - a command allocator from the queue's pool,
//! - a dynamic descriptor sub-allocator,
//! - the list's own upload pages whose fences have retired.
//!
//! All of them go back, tagged with the submission fence, when the device
//! executes the list. Handles are resolved to native objects while
//! recording; a handle that no longer resolves is skipped with a warning.
//!
//! Recording outside `open()`/`close()` is a contract violation: it panics in
//! debug builds and drops the command with an error log otherwise.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytemuck::Pod;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::backend::Backend;
use crate::errors::{Result, RhiError};
use crate::rhi::command::{
    Barrier, BufferBinding, Command, Descriptor, TEXTURE_ROW_PITCH_ALIGNMENT, TextureTarget,
};
use crate::rhi::command_allocator::CommandAllocator;
use crate::rhi::device::DeviceShared;
use crate::rhi::dynamic_suballocator::DynamicSuballocator;
use crate::rhi::timer_query::TimerQueryRecord;
use crate::rhi::upload_buffer::{UploadAllocation, UploadBuffer, align_up};
use crate::types::{
    BufferHandle, Color, CommandListDesc, ComputePipelineHandle, Format, GpuBarrier,
    GraphicsPipelineHandle, QueueType, Rect, TextureDimension, TextureHandle,
    TimerQueryHandle, Viewport,
};

/// Alignment of constant buffer and structured buffer bind offsets.
const CONSTANT_ALIGNMENT: u64 = 256;
/// Alignment of dynamic vertex and index data.
const VERTEX_ALIGNMENT: u64 = 16;
/// Placement alignment of texture staging data.
const TEXTURE_PLACEMENT_ALIGNMENT: u64 = 512;

// ============================================================================
// Tracked Resources
// ============================================================================

/// Native objects referenced by one submission, held until its fence retires.
pub(crate) struct TrackedResources<B: Backend> {
    buffers: Vec<Arc<B::Buffer>>,
    textures: Vec<Arc<B::Texture>>,
    graphics_pipelines: Vec<Arc<B::GraphicsPipeline>>,
    compute_pipelines: Vec<Arc<B::ComputePipeline>>,
    seen: FxHashSet<usize>,
    pub timer_queries: SmallVec<[TimerQueryHandle; 4]>,
}

impl<B: Backend> Default for TrackedResources<B> {
    fn default() -> Self {
        Self {
            buffers: Vec::new(),
            textures: Vec::new(),
            graphics_pipelines: Vec::new(),
            compute_pipelines: Vec::new(),
            seen: FxHashSet::default(),
            timer_queries: SmallVec::new(),
        }
    }
}

fn track<T>(seen: &mut FxHashSet<usize>, list: &mut Vec<Arc<T>>, object: &Arc<T>) {
    if seen.insert(Arc::as_ptr(object).cast::<()>() as usize) {
        list.push(Arc::clone(object));
    }
}

impl<B: Backend> TrackedResources<B> {
    pub fn buffer(&mut self, buffer: &Arc<B::Buffer>) {
        track(&mut self.seen, &mut self.buffers, buffer);
    }

    pub fn texture(&mut self, texture: &Arc<B::Texture>) {
        track(&mut self.seen, &mut self.textures, texture);
    }

    pub fn descriptor(&mut self, descriptor: &Descriptor<B>) {
        match descriptor {
            Descriptor::Texture { texture, .. } => self.texture(texture),
            Descriptor::Buffer { buffer, .. } => self.buffer(buffer),
        }
    }

    /// Distinct native objects held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffers.len()
            + self.textures.len()
            + self.graphics_pipelines.len()
            + self.compute_pipelines.len()
    }
}

// ============================================================================
// Command List
// ============================================================================

pub struct CommandList<B: Backend> {
    desc: CommandListDesc,
    shared: Arc<DeviceShared<B>>,
    allocator: Option<CommandAllocator<B>>,
    dynamic: Option<Box<DynamicSuballocator<Descriptor<B>>>>,
    upload: UploadBuffer<B>,
    tracked: TrackedResources<B>,
    open: bool,
    marker_depth: u32,
}

impl<B: Backend> CommandList<B> {
    pub(crate) fn new(shared: Arc<DeviceShared<B>>, desc: CommandListDesc) -> Self {
        let upload = UploadBuffer::new(shared.backend.clone(), shared.settings.upload_page_size);
        Self {
            desc,
            shared,
            allocator: None,
            dynamic: None,
            upload,
            tracked: TrackedResources::default(),
            open: false,
            marker_depth: 0,
        }
    }

    #[inline]
    #[must_use]
    pub fn desc(&self) -> &CommandListDesc {
        &self.desc
    }

    #[inline]
    #[must_use]
    pub fn queue_type(&self) -> QueueType {
        self.desc.queue_type
    }

    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Commands recorded in the current session.
    #[must_use]
    pub fn command_count(&self) -> usize {
        self.allocator.as_ref().map_or(0, |a| a.commands().len())
    }

    /// Upload pages this list has created over its lifetime.
    #[must_use]
    pub fn upload_page_count(&self) -> usize {
        self.upload.page_count()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Begins a recording session.
    pub fn open(&mut self) {
        debug_assert!(
            self.allocator.is_none(),
            "{}: open() while a previous recording is still checked out",
            self.desc.debug_name
        );
        if self.allocator.is_some() {
            log::error!(
                "{}: open() while a previous recording is still checked out",
                self.desc.debug_name
            );
            return;
        }

        let index = self.desc.queue_type.index();
        let completed = self.shared.queues[index].last_completed_fence();
        self.allocator = Some(self.shared.allocator_pools[index].request(completed));
        self.dynamic = Some(self.shared.dynamic_pools[index].request(completed));
        self.upload.reset(completed);
        self.tracked = TrackedResources::default();
        self.marker_depth = 0;
        self.open = true;
    }

    /// Ends the recording session. The list is then ready for execution.
    pub fn close(&mut self) {
        if !self.ensure_open("close") {
            return;
        }
        if self.marker_depth > 0 {
            log::warn!(
                "{}: closed with {} unbalanced marker(s)",
                self.desc.debug_name,
                self.marker_depth
            );
            for _ in 0..self.marker_depth {
                self.record(Command::EndMarker);
            }
            self.marker_depth = 0;
        }
        self.open = false;
    }

    /// The closed recording awaiting submission.
    pub(crate) fn submission(&self) -> Option<&[Command<B>]> {
        if self.open {
            return None;
        }
        self.allocator.as_ref().map(CommandAllocator::commands)
    }

    /// Hands the session's memory back to its pools, reusable after `fence`.
    pub(crate) fn executed(&mut self, fence: u64) -> TrackedResources<B> {
        let index = self.desc.queue_type.index();
        if let Some(allocator) = self.allocator.take() {
            self.shared.allocator_pools[index].discard(fence, allocator);
        }
        if let Some(dynamic) = self.dynamic.take() {
            self.shared.dynamic_pools[index].discard(fence, dynamic);
        }
        self.upload.retire(fence);
        std::mem::take(&mut self.tracked)
    }

    fn ensure_open(&self, operation: &'static str) -> bool {
        debug_assert!(
            self.open,
            "{}: {operation} outside open()/close()",
            self.desc.debug_name
        );
        if !self.open {
            log::error!(
                "{}: {operation} outside open()/close(), ignored",
                self.desc.debug_name
            );
        }
        self.open
    }

    fn record(&mut self, command: Command<B>) {
        if !self.ensure_open("record") {
            return;
        }
        if let Some(allocator) = self.allocator.as_mut() {
            allocator.push(command);
        }
    }

    // ------------------------------------------------------------------------
    // Handle resolution
    // ------------------------------------------------------------------------

    fn resolve_texture(&mut self, handle: TextureHandle, mip: u32, slice: u32) -> Option<TextureTarget<B>> {
        let target = {
            let textures = self.shared.textures.read();
            let record = textures.get(handle)?;
            TextureTarget {
                texture: Arc::clone(&record.native),
                format: record.format(),
                mip,
                slice,
            }
        };
        self.tracked.texture(&target.texture);
        Some(target)
    }

    fn resolve_buffer(&mut self, handle: BufferHandle) -> Option<(Arc<B::Buffer>, u64, u32, Format)> {
        let resolved = {
            let buffers = self.shared.buffers.read();
            let record = buffers.get(handle)?;
            (
                Arc::clone(&record.native),
                record.desc.size,
                record.desc.stride,
                record.desc.format,
            )
        };
        self.tracked.buffer(&resolved.0);
        Some(resolved)
    }

    fn stale(&self, kind: &str, operation: &str) {
        log::warn!(
            "{}: {operation} skipped, stale {kind} handle",
            self.desc.debug_name
        );
    }

    // ------------------------------------------------------------------------
    // Markers
    // ------------------------------------------------------------------------

    pub fn begin_marker(&mut self, name: &str) {
        if !self.ensure_open("begin_marker") {
            return;
        }
        self.marker_depth += 1;
        self.record(Command::BeginMarker(name.to_owned()));
    }

    pub fn end_marker(&mut self) {
        if !self.ensure_open("end_marker") {
            return;
        }
        if self.marker_depth == 0 {
            log::warn!("{}: end_marker without begin_marker", self.desc.debug_name);
            return;
        }
        self.marker_depth -= 1;
        self.record(Command::EndMarker);
    }

    /// Opens a marker closed when the guard drops.
    pub fn scoped_marker(&mut self, name: &str) -> ScopedMarker<'_, B> {
        self.begin_marker(name);
        ScopedMarker { list: self }
    }

    // ------------------------------------------------------------------------
    // Barriers
    // ------------------------------------------------------------------------

    pub fn transition_barrier(&mut self, barrier: GpuBarrier) {
        self.transition_barriers(&[barrier]);
    }

    pub fn transition_barriers(&mut self, barriers: &[GpuBarrier]) {
        let mut resolved: SmallVec<[Barrier<B>; 4]> = SmallVec::with_capacity(barriers.len());
        for barrier in barriers {
            match *barrier {
                GpuBarrier::Texture {
                    texture,
                    before,
                    after,
                    subresource,
                } => match self.resolve_texture(texture, 0, 0) {
                    Some(target) => resolved.push(Barrier::Texture {
                        texture: target.texture,
                        before,
                        after,
                        subresource,
                    }),
                    None => self.stale("texture", "transition_barriers"),
                },
                GpuBarrier::Buffer {
                    buffer,
                    before,
                    after,
                } => match self.resolve_buffer(buffer) {
                    Some((buffer, ..)) => resolved.push(Barrier::Buffer {
                        buffer,
                        before,
                        after,
                    }),
                    None => self.stale("buffer", "transition_barriers"),
                },
                GpuBarrier::Memory => resolved.push(Barrier::Memory),
            }
        }
        if !resolved.is_empty() {
            self.record(Command::Barriers(resolved));
        }
    }

    // ------------------------------------------------------------------------
    // Clears & copies
    // ------------------------------------------------------------------------

    pub fn clear_texture_float(&mut self, texture: TextureHandle, color: Color) {
        match self.resolve_texture(texture, 0, 0) {
            Some(target) => self.record(Command::ClearColor { target, color }),
            None => self.stale("texture", "clear_texture_float"),
        }
    }

    pub fn clear_depth_stencil_texture(
        &mut self,
        texture: TextureHandle,
        clear_depth: bool,
        depth: f32,
        clear_stencil: bool,
        stencil: u32,
    ) {
        if !clear_depth && !clear_stencil {
            return;
        }
        match self.resolve_texture(texture, 0, 0) {
            Some(target) => self.record(Command::ClearDepthStencil {
                target,
                depth: clear_depth.then_some(depth),
                stencil: clear_stencil.then_some(stencil),
            }),
            None => self.stale("texture", "clear_depth_stencil_texture"),
        }
    }

    pub fn copy_buffer(
        &mut self,
        dst: BufferHandle,
        dst_offset: u64,
        src: BufferHandle,
        src_offset: u64,
        size: u64,
    ) {
        let (Some((dst, ..)), Some((src, ..))) = (self.resolve_buffer(dst), self.resolve_buffer(src))
        else {
            self.stale("buffer", "copy_buffer");
            return;
        };
        self.record(Command::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
    }

    /// Stages `data` and copies it into `buffer` at `dest_offset`.
    pub fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8], dest_offset: u64) -> Result<()> {
        let Some((dst, size, ..)) = self.resolve_buffer(buffer) else {
            return Err(RhiError::InvalidHandle("buffer"));
        };
        let end = dest_offset.checked_add(data.len() as u64);
        if end.is_none_or(|end| end > size) {
            return Err(RhiError::InvalidDescriptor {
                kind: "buffer write",
                reason: format!(
                    "{} bytes at offset {dest_offset} exceed buffer size {size}",
                    data.len()
                ),
            });
        }
        let staging = self.upload.upload(data, 4)?;
        self.record(Command::CopyBuffer {
            src: staging.buffer,
            src_offset: staging.offset,
            dst,
            dst_offset: dest_offset,
            size: staging.size,
        });
        Ok(())
    }

    pub fn write_buffer_typed<T: Pod>(&mut self, buffer: BufferHandle, data: &[T], dest_offset: u64) -> Result<()> {
        self.write_buffer(buffer, bytemuck::cast_slice(data), dest_offset)
    }

    /// Uploads one (mip, slice) subresource. `row_pitch` is the stride of
    /// `data` in bytes; `0` means tightly packed.
    pub fn write_texture(
        &mut self,
        texture: TextureHandle,
        mip: u32,
        slice: u32,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<()> {
        let (target, (width, height, depth)) = {
            let textures = self.shared.textures.read();
            let record = textures.get(texture).ok_or(RhiError::InvalidHandle("texture"))?;
            let desc = &record.desc;
            let slices = if desc.dimension == TextureDimension::Texture3D {
                1
            } else {
                desc.array_size.max(1)
            };
            if mip >= desc.mip_levels.max(1) || slice >= slices {
                return Err(RhiError::InvalidSubresource {
                    kind: "texture",
                    index: desc.subresource_index(mip, slice),
                });
            }
            let target = TextureTarget {
                texture: Arc::clone(&record.native),
                format: desc.format,
                mip,
                slice,
            };
            (target, desc.mip_extent(mip))
        };

        let bytes_per_pixel = target.format.bytes_per_pixel();
        if bytes_per_pixel == 0 {
            return Err(RhiError::UnsupportedFormat {
                format: target.format,
                usage: "texture upload",
            });
        }

        let row_bytes = width * bytes_per_pixel;
        let row_pitch = if row_pitch == 0 { row_bytes } else { row_pitch };
        let rows = height * depth;
        let required = u64::from(row_pitch) * u64::from(rows - 1) + u64::from(row_bytes);
        if row_pitch < row_bytes || (data.len() as u64) < required {
            return Err(RhiError::InvalidDescriptor {
                kind: "texture upload",
                reason: format!(
                    "{} bytes with row pitch {row_pitch} cannot cover {width}x{height}x{depth}",
                    data.len()
                ),
            });
        }

        let aligned_pitch = align_up(u64::from(row_bytes), u64::from(TEXTURE_ROW_PITCH_ALIGNMENT)) as usize;
        let mut staging = vec![0u8; aligned_pitch * rows as usize];
        for (row, dst) in staging.chunks_exact_mut(aligned_pitch).enumerate() {
            let src = row * row_pitch as usize;
            dst[..row_bytes as usize].copy_from_slice(&data[src..src + row_bytes as usize]);
        }

        let allocation = self.upload.upload(&staging, TEXTURE_PLACEMENT_ALIGNMENT)?;
        self.tracked.texture(&target.texture);
        self.record(Command::CopyBufferToTexture {
            src: allocation.buffer,
            src_offset: allocation.offset,
            bytes_per_row: aligned_pitch as u32,
            rows_per_image: height,
            dst: target,
            width,
            height,
            depth,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pipeline state
    // ------------------------------------------------------------------------

    pub fn set_render_targets(&mut self, colors: &[TextureHandle], depth: Option<TextureHandle>) {
        let mut targets = SmallVec::new();
        for &color in colors {
            match self.resolve_texture(color, 0, 0) {
                Some(target) => targets.push(target),
                None => self.stale("texture", "set_render_targets"),
            }
        }
        let depth = depth.and_then(|handle| {
            let target = self.resolve_texture(handle, 0, 0);
            if target.is_none() {
                self.stale("texture", "set_render_targets");
            }
            target
        });
        self.record(Command::SetRenderTargets {
            colors: targets,
            depth,
        });
    }

    pub fn set_graphics_pso(&mut self, pso: GraphicsPipelineHandle) {
        let native = self
            .shared
            .graphics_pipelines
            .read()
            .get(pso)
            .map(|record| Arc::clone(&record.native));
        match native {
            Some(native) => {
                track(
                    &mut self.tracked.seen,
                    &mut self.tracked.graphics_pipelines,
                    &native,
                );
                self.record(Command::SetGraphicsPipeline(native));
            }
            None => self.stale("graphics pipeline", "set_graphics_pso"),
        }
    }

    pub fn set_compute_state(&mut self, pso: ComputePipelineHandle) {
        let native = self
            .shared
            .compute_pipelines
            .read()
            .get(pso)
            .map(|record| Arc::clone(&record.native));
        match native {
            Some(native) => {
                track(
                    &mut self.tracked.seen,
                    &mut self.tracked.compute_pipelines,
                    &native,
                );
                self.record(Command::SetComputePipeline(native));
            }
            None => self.stale("compute pipeline", "set_compute_state"),
        }
    }

    pub fn set_viewports(&mut self, viewports: &[Viewport]) {
        self.record(Command::SetViewports(SmallVec::from_slice(viewports)));
    }

    pub fn set_scissors(&mut self, scissors: &[Rect]) {
        self.record(Command::SetScissors(SmallVec::from_slice(scissors)));
    }

    // ------------------------------------------------------------------------
    // Resource binding
    // ------------------------------------------------------------------------

    pub fn bind_push_constant(&mut self, root: u32, data: &[u8]) {
        self.record(Command::PushConstants {
            root,
            data: SmallVec::from_slice(data),
        });
    }

    pub fn bind_push_constant_typed<T: Pod>(&mut self, root: u32, value: &T) {
        self.bind_push_constant(root, bytemuck::bytes_of(value));
    }

    fn bind_buffer(&mut self, root: u32, binding: BufferBinding, handle: BufferHandle, operation: &str) {
        match self.resolve_buffer(handle) {
            Some((buffer, size, ..)) => self.record(Command::BindBuffer {
                root,
                binding,
                buffer,
                offset: 0,
                size,
            }),
            None => self.stale("buffer", operation),
        }
    }

    fn bind_staged(&mut self, root: u32, binding: BufferBinding, staging: UploadAllocation<B>) {
        self.record(Command::BindBuffer {
            root,
            binding,
            buffer: staging.buffer,
            offset: staging.offset,
            size: staging.size,
        });
    }

    pub fn bind_constant_buffer(&mut self, root: u32, buffer: BufferHandle) {
        self.bind_buffer(root, BufferBinding::Constant, buffer, "bind_constant_buffer");
    }

    /// Stages `data` in the upload buffer and binds it as constants.
    pub fn bind_dynamic_constant_buffer(&mut self, root: u32, data: &[u8]) -> Result<()> {
        let staging = self.upload.upload(data, CONSTANT_ALIGNMENT)?;
        self.bind_staged(root, BufferBinding::Constant, staging);
        Ok(())
    }

    pub fn bind_dynamic_constant_buffer_typed<T: Pod>(&mut self, root: u32, value: &T) -> Result<()> {
        self.bind_dynamic_constant_buffer(root, bytemuck::bytes_of(value))
    }

    pub fn bind_structured_buffer(&mut self, root: u32, buffer: BufferHandle) {
        self.bind_buffer(root, BufferBinding::Structured, buffer, "bind_structured_buffer");
    }

    pub fn bind_dynamic_structured_buffer<T: Pod>(&mut self, root: u32, data: &[T]) -> Result<()> {
        let staging = self.upload.upload(bytemuck::cast_slice(data), CONSTANT_ALIGNMENT)?;
        self.bind_staged(root, BufferBinding::Structured, staging);
        Ok(())
    }

    pub fn bind_unordered_access_buffer(&mut self, root: u32, buffer: BufferHandle) {
        self.bind_buffer(root, BufferBinding::Unordered, buffer, "bind_unordered_access_buffer");
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle) {
        match self.resolve_buffer(buffer) {
            Some((buffer, size, stride, _)) => self.record(Command::BindVertexBuffer {
                slot,
                buffer,
                offset: 0,
                size,
                stride,
            }),
            None => self.stale("buffer", "bind_vertex_buffer"),
        }
    }

    pub fn bind_dynamic_vertex_buffer<T: Pod>(&mut self, slot: u32, vertices: &[T]) -> Result<()> {
        let staging = self.upload.upload(bytemuck::cast_slice(vertices), VERTEX_ALIGNMENT)?;
        self.record(Command::BindVertexBuffer {
            slot,
            buffer: staging.buffer,
            offset: staging.offset,
            size: staging.size,
            stride: size_of::<T>() as u32,
        });
        Ok(())
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle) {
        match self.resolve_buffer(buffer) {
            Some((buffer, size, _, format)) => self.record(Command::BindIndexBuffer {
                buffer,
                offset: 0,
                size,
                format,
            }),
            None => self.stale("buffer", "bind_index_buffer"),
        }
    }

    /// Stages raw index data; `format` must be `R16Uint` or `R32Uint`.
    pub fn bind_dynamic_index_buffer(&mut self, indices: &[u8], format: Format) -> Result<()> {
        if !matches!(format, Format::R16Uint | Format::R32Uint) {
            return Err(RhiError::UnsupportedFormat {
                format,
                usage: "index buffer",
            });
        }
        let staging = self.upload.upload(indices, VERTEX_ALIGNMENT)?;
        self.record(Command::BindIndexBuffer {
            buffer: staging.buffer,
            offset: staging.offset,
            size: staging.size,
            format,
        });
        Ok(())
    }

    /// Binds the bindless table at `root`.
    pub fn bind_resource_table(&mut self, root: u32) {
        self.record(Command::BindBindlessTable {
            root,
            heap_offset: self.shared.bindless.heap_offset(),
        });
    }

    /// Copies the shader-resource views of `textures` into a transient table
    /// and binds it at `root`.
    pub fn bind_dynamic_descriptor_table(&mut self, root: u32, textures: &[TextureHandle]) -> Result<()> {
        let descriptors: Vec<Option<Descriptor<B>>> = {
            let pool = self.shared.textures.read();
            textures
                .iter()
                .map(|&handle| {
                    let view = pool.get(handle)?.views.srv?;
                    self.shared.resource_heap.get(&view.allocation, 0)
                })
                .collect()
        };
        self.bind_descriptor_table(root, descriptors)
    }

    /// Unordered-access views of `buffers` followed by those of `textures`.
    pub fn bind_dynamic_uav_descriptor_table(
        &mut self,
        root: u32,
        buffers: &[BufferHandle],
        textures: &[TextureHandle],
    ) -> Result<()> {
        let mut descriptors: Vec<Option<Descriptor<B>>> = Vec::with_capacity(buffers.len() + textures.len());
        {
            let pool = self.shared.buffers.read();
            descriptors.extend(buffers.iter().map(|&handle| {
                let view = pool.get(handle)?.views.uav?;
                self.shared.resource_heap.get(&view.allocation, 0)
            }));
        }
        {
            let pool = self.shared.textures.read();
            descriptors.extend(textures.iter().map(|&handle| {
                let view = pool.get(handle)?.views.uav?;
                self.shared.resource_heap.get(&view.allocation, 0)
            }));
        }
        self.bind_descriptor_table(root, descriptors)
    }

    fn bind_descriptor_table(&mut self, root: u32, descriptors: Vec<Option<Descriptor<B>>>) -> Result<()> {
        if !self.ensure_open("bind_dynamic_descriptor_table") {
            return Ok(());
        }
        let Some(dynamic) = self.dynamic.as_mut() else {
            return Ok(());
        };
        let table = dynamic.allocate(descriptors.len() as u32)?;

        for (i, descriptor) in descriptors.iter().enumerate() {
            let slot = table.heap_offset + i as u32;
            match descriptor {
                Some(descriptor) => {
                    self.tracked.descriptor(descriptor);
                    self.shared.gpu_heap.write(slot, descriptor.clone());
                }
                None => {
                    log::warn!(
                        "{}: descriptor table slot {i} has no view",
                        self.desc.debug_name
                    );
                    self.shared.gpu_heap.clear(slot);
                }
            }
        }

        self.record(Command::BindDescriptorTable {
            root,
            heap_offset: table.heap_offset,
            descriptors,
        });
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Draw & dispatch
    // ------------------------------------------------------------------------

    pub fn draw(&mut self, vertex_count: u32, instance_count: u32, start_vertex: u32, start_instance: u32) {
        self.record(Command::Draw {
            vertex_count,
            instance_count,
            start_vertex,
            start_instance,
        });
    }

    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    ) {
        self.record(Command::DrawIndexed {
            index_count,
            instance_count,
            start_index,
            base_vertex,
            start_instance,
        });
    }

    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) {
        self.record(Command::Dispatch { x, y, z });
    }

    pub fn dispatch_indirect(&mut self, args: BufferHandle, offset: u64) {
        match self.resolve_buffer(args) {
            Some((args, ..)) => self.record(Command::DispatchIndirect { args, offset }),
            None => self.stale("buffer", "dispatch_indirect"),
        }
    }

    // ------------------------------------------------------------------------
    // Timer queries
    // ------------------------------------------------------------------------

    pub fn begin_timer_query(&mut self, query: TimerQueryHandle) {
        let index = self
            .shared
            .timer_queries
            .records
            .read()
            .get(query)
            .map(TimerQueryRecord::begin_index);
        match index {
            Some(index) => self.record(Command::WriteTimestamp {
                heap: Arc::clone(&self.shared.query_heap),
                index,
            }),
            None => self.stale("timer query", "begin_timer_query"),
        }
    }

    /// The query resolves once this list's submission completes.
    pub fn end_timer_query(&mut self, query: TimerQueryHandle) {
        let index = self
            .shared
            .timer_queries
            .records
            .read()
            .get(query)
            .map(TimerQueryRecord::end_index);
        match index {
            Some(index) => {
                self.record(Command::WriteTimestamp {
                    heap: Arc::clone(&self.shared.query_heap),
                    index,
                });
                self.tracked.timer_queries.push(query);
            }
            None => self.stale("timer query", "end_timer_query"),
        }
    }
}

impl<B: Backend> Drop for CommandList<B> {
    fn drop(&mut self) {
        // Unsubmitted work never reached the GPU; return it behind the
        // queue's latest fence.
        let index = self.desc.queue_type.index();
        let fence = self.shared.queues[index].last_signalled_fence();
        if let Some(allocator) = self.allocator.take() {
            self.shared.allocator_pools[index].discard(fence, allocator);
        }
        if let Some(dynamic) = self.dynamic.take() {
            self.shared.dynamic_pools[index].discard(fence, dynamic);
        }
    }
}

// ============================================================================
// Scoped Marker
// ============================================================================

/// Debug marker region closed on drop. Dereferences to the list so
/// commands can be recorded inside the region.
pub struct ScopedMarker<'a, B: Backend> {
    list: &'a mut CommandList<B>,
}

impl<B: Backend> Deref for ScopedMarker<'_, B> {
    type Target = CommandList<B>;

    fn deref(&self) -> &Self::Target {
        self.list
    }
}

impl<B: Backend> DerefMut for ScopedMarker<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.list
    }
}

impl<B: Backend> Drop for ScopedMarker<'_, B> {
    fn drop(&mut self) {
        // A close() inside the region already balanced it.
        if self.list.open {
            self.list.end_marker();
        }
    }
}
