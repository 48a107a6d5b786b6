//! Graphics Device
//!
//! Root object of the HAL. Owns the three command queues, every pool and
//! heap, the frame timeline and the deferred-deletion machinery, and hands
//! out generation-stamped handles for resources.
//!
//! # Frame timeline
//!
//! `frame_count` starts at 1. [`present`](GraphicsDevice::present) signals
//! the frame fence with the current count on the graphics queue, advances
//! the count, blocks only when the CPU is more than `frames_in_flight` frames
//! ahead, and then runs garbage collection:
//!
//! ```text
//!   frame:      1      2      3      4      5
//!   present:    ├─sig1─┼─sig2─┼─sig3─┼─wait(2)…
//!   deletes stamped at frame F run once the completed frame exceeds F
//! ```
//!
//! # Thread safety
//!
//! The device is `Send + Sync` and cheap to clone. Resource creation,
//! deletion and recording on distinct command lists may happen from any
//! thread; `present` and `wait_for_idle` are expected from one thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

use crate::backend::{AdapterInfo, Backend};
use crate::core::pool::Pool;
use crate::errors::{Result, RhiError};
use crate::rhi::bindless::BindlessDescriptorTable;
use crate::rhi::command::Descriptor;
use crate::rhi::command_allocator::CommandAllocatorPool;
use crate::rhi::command_list::{CommandList, TrackedResources};
use crate::rhi::deletion::{DeferredDeleteQueue, InflightQueue};
use crate::rhi::descriptor_heap::{CpuDescriptorHeap, GpuDescriptorHeap};
use crate::rhi::dynamic_suballocator::DynamicSubAllocatorPool;
use crate::rhi::fence::Fence;
use crate::rhi::queue::CommandQueue;
use crate::rhi::resources::{
    BufferRecord, ComputePipelineRecord, DescriptorView, GraphicsPipelineRecord, ShaderRecord,
    TextureRecord, ViewSet,
};
use crate::rhi::timer_query::{TimerQueryPool, ticks_to_duration};
use crate::settings::DeviceSettings;
use crate::types::{
    BindingFlags, Buffer, BufferDesc, BufferHandle, BufferMiscFlags, BufferRange, CommandListDesc,
    ComputePipeline, ComputePipelineHandle, ComputePsoDesc, DescriptorIndex, DeviceCapabilities,
    ExecutionReceipt, Format, GraphicsPipeline, GraphicsPipelineHandle, GraphicsPsoDesc,
    QueueType, ResourceStates, Shader, ShaderDesc, ShaderHandle, SubresourceRange,
    SubresourceType, Texture, TextureDesc, TextureHandle, TextureSubresourceRange,
    TimerQueryHandle, Usage,
};

// ============================================================================
// Shared State
// ============================================================================

/// State shared by the device handle and every command list it created.
pub(crate) struct DeviceShared<B: Backend> {
    pub backend: B,
    pub settings: DeviceSettings,
    pub adapter: AdapterInfo,
    pub capabilities: DeviceCapabilities,

    pub queues: [CommandQueue<B>; QueueType::COUNT],
    pub allocator_pools: [CommandAllocatorPool<B>; QueueType::COUNT],
    pub dynamic_pools: [DynamicSubAllocatorPool<Descriptor<B>>; QueueType::COUNT],

    pub resource_heap: CpuDescriptorHeap<Descriptor<B>>,
    pub rtv_heap: CpuDescriptorHeap<Descriptor<B>>,
    pub dsv_heap: CpuDescriptorHeap<Descriptor<B>>,
    pub gpu_heap: Arc<GpuDescriptorHeap<Descriptor<B>>>,
    pub bindless: BindlessDescriptorTable,

    pub textures: RwLock<Pool<TextureRecord<B>, Texture>>,
    pub buffers: RwLock<Pool<BufferRecord<B>, Buffer>>,
    pub shaders: RwLock<Pool<ShaderRecord<B>, Shader>>,
    pub graphics_pipelines: RwLock<Pool<GraphicsPipelineRecord<B>, GraphicsPipeline>>,
    pub compute_pipelines: RwLock<Pool<ComputePipelineRecord<B>, ComputePipeline>>,

    pub query_heap: Arc<B::QueryHeap>,
    pub timer_queries: TimerQueryPool,

    pub frame_fence: Arc<Fence>,
    pub frame_count: AtomicU64,
    pub delete_queue: DeferredDeleteQueue<DeviceShared<B>>,
    pub inflight: [InflightQueue<TrackedResources<B>>; QueueType::COUNT],
}

impl<B: Backend> DeviceShared<B> {
    #[inline]
    pub fn queue(&self, queue_type: QueueType) -> &CommandQueue<B> {
        &self.queues[queue_type.index()]
    }

    fn cpu_heap(&self, kind: SubresourceType) -> &CpuDescriptorHeap<Descriptor<B>> {
        match kind {
            SubresourceType::Srv | SubresourceType::Uav => &self.resource_heap,
            SubresourceType::Rtv => &self.rtv_heap,
            SubresourceType::Dsv => &self.dsv_heap,
        }
    }

    /// Writes `descriptor` into a fresh CPU slot and, for shader-visible
    /// kinds of bindless resources, into the bindless table.
    fn create_view(&self, descriptor: Descriptor<B>, range: SubresourceRange, bindless: bool) -> DescriptorView {
        let kind = descriptor.kind();
        let heap = self.cpu_heap(kind);
        let allocation = heap.allocate(1);

        let shader_visible = matches!(kind, SubresourceType::Srv | SubresourceType::Uav);
        let index = if bindless && shader_visible {
            let index = self.bindless.allocate();
            if index.is_valid() {
                self.gpu_heap
                    .write(self.bindless.heap_index(index), descriptor.clone());
            }
            index
        } else {
            DescriptorIndex::INVALID
        };

        heap.write(&allocation, 0, descriptor);
        DescriptorView {
            allocation,
            bindless: index,
            kind,
            range,
        }
    }

    fn free_view(&self, view: DescriptorView) {
        self.cpu_heap(view.kind).free(view.allocation);
        if view.bindless.is_valid() {
            self.gpu_heap.clear(self.bindless.heap_index(view.bindless));
            self.bindless.free(view.bindless);
        }
    }

    fn texture_descriptor(
        record: &TextureRecord<B>,
        kind: SubresourceType,
        range: TextureSubresourceRange,
    ) -> Descriptor<B> {
        Descriptor::Texture {
            texture: Arc::clone(&record.native),
            kind,
            format: record.format(),
            range,
        }
    }

    fn buffer_descriptor(record: &BufferRecord<B>, kind: SubresourceType, range: BufferRange) -> Descriptor<B> {
        Descriptor::Buffer {
            buffer: Arc::clone(&record.native),
            kind,
            range,
            stride: record.desc.stride,
        }
    }

    /// Runs destructors of frames before `completed_frame`, then drops the
    /// keep-alive sets of retired submissions.
    fn collect_garbage(&self, completed_frame: u64) -> (usize, usize) {
        let deleted = self.delete_queue.collect(completed_frame, self);
        let released = self.collect_inflight();
        (deleted, released)
    }

    /// Drops the keep-alive sets of every retired submission.
    fn collect_inflight(&self) -> usize {
        QueueType::ALL
            .iter()
            .map(|&queue_type| {
                let completed = self.queue(queue_type).last_completed_fence();
                self.inflight[queue_type.index()].collect(completed)
            })
            .sum()
    }
}

impl<B: Backend> Drop for DeviceShared<B> {
    fn drop(&mut self) {
        for queue in &self.queues {
            queue.wait_for_idle();
        }
        let flushed = self.delete_queue.flush(self);
        log::debug!("Device shutdown: {flushed} deferred deletions flushed");
    }
}

// ============================================================================
// Graphics Device
// ============================================================================

/// The HAL device. Cloning shares the same device.
pub struct GraphicsDevice<B: Backend> {
    shared: Arc<DeviceShared<B>>,
}

impl<B: Backend> Clone for GraphicsDevice<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: Backend> std::fmt::Debug for GraphicsDevice<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("adapter", &self.shared.adapter)
            .field("frame_count", &self.frame_count())
            .finish_non_exhaustive()
    }
}

impl<B: Backend> GraphicsDevice<B> {
    /// Creates the queues, heaps and pools on top of `backend`.
    pub fn new(backend: B, settings: DeviceSettings) -> Result<Self> {
        if settings.frames_in_flight == 0 {
            return Err(RhiError::InvalidDescriptor {
                kind: "DeviceSettings",
                reason: "frames_in_flight must be at least 1".to_owned(),
            });
        }

        let adapter = backend.adapter_info();
        let capabilities = backend.capabilities();

        let queues = [
            CommandQueue::new(&backend, QueueType::Graphics)?,
            CommandQueue::new(&backend, QueueType::Compute)?,
            CommandQueue::new(&backend, QueueType::Copy)?,
        ];
        let allocator_pools = [
            CommandAllocatorPool::new("Graphics Allocator Pool"),
            CommandAllocatorPool::new("Compute Allocator Pool"),
            CommandAllocatorPool::new("Copy Allocator Pool"),
        ];

        let gpu_heap = Arc::new(GpuDescriptorHeap::new(
            settings.bindless_capacity,
            settings.dynamic_descriptor_capacity,
        ));
        let bindless = BindlessDescriptorTable::new(&gpu_heap, settings.bindless_capacity)?;
        let dynamic_pools = std::array::from_fn(|_| {
            DynamicSubAllocatorPool::new(Arc::clone(&gpu_heap), settings.dynamic_chunk_size)
        });

        let page = settings.cpu_descriptor_page_size;
        let query_heap = Arc::new(backend.create_query_heap(settings.timestamp_query_capacity)?);
        let pool_capacity = settings.initial_pool_capacity;

        log::info!(
            "Graphics device created on {} ({}, {}), {} frames in flight",
            adapter.name,
            adapter.backend,
            adapter.device_type,
            settings.frames_in_flight
        );

        let shared = DeviceShared {
            resource_heap: CpuDescriptorHeap::new("Resource Heap", page),
            rtv_heap: CpuDescriptorHeap::new("RTV Heap", page),
            dsv_heap: CpuDescriptorHeap::new("DSV Heap", page),
            gpu_heap,
            bindless,
            queues,
            allocator_pools,
            dynamic_pools,
            textures: RwLock::new(Pool::new(pool_capacity)),
            buffers: RwLock::new(Pool::new(pool_capacity)),
            shaders: RwLock::new(Pool::new(0)),
            graphics_pipelines: RwLock::new(Pool::new(0)),
            compute_pipelines: RwLock::new(Pool::new(0)),
            query_heap,
            timer_queries: TimerQueryPool::new(settings.timestamp_query_capacity),
            frame_fence: Arc::new(Fence::new()),
            frame_count: AtomicU64::new(1),
            delete_queue: DeferredDeleteQueue::default(),
            inflight: Default::default(),
            backend,
            settings,
            adapter,
            capabilities,
        };

        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    #[inline]
    #[must_use]
    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> &DeviceSettings {
        &self.shared.settings
    }

    #[inline]
    #[must_use]
    pub fn adapter_info(&self) -> &AdapterInfo {
        &self.shared.adapter
    }

    #[inline]
    #[must_use]
    pub fn capabilities(&self) -> DeviceCapabilities {
        self.shared.capabilities
    }

    #[inline]
    #[must_use]
    pub fn check_capability(&self, capability: DeviceCapabilities) -> bool {
        self.shared.capabilities.contains(capability)
    }

    /// The frame currently being recorded. Starts at 1.
    #[must_use]
    pub fn frame_count(&self) -> u64 {
        self.shared.frame_count.load(Ordering::Acquire)
    }

    /// Highest frame the GPU has fully retired.
    #[must_use]
    pub fn completed_frame(&self) -> u64 {
        self.shared.frame_fence.completed_value()
    }

    /// Destructors waiting on a frame to retire.
    #[must_use]
    pub fn pending_deletions(&self) -> usize {
        self.shared.delete_queue.len()
    }

    /// Submissions whose keep-alive sets are still held.
    #[must_use]
    pub fn inflight_submissions(&self) -> usize {
        self.shared.inflight.iter().map(InflightQueue::len).sum()
    }

    /// Command allocators created so far for `queue_type`.
    #[must_use]
    pub fn command_allocator_count(&self, queue_type: QueueType) -> usize {
        self.shared.allocator_pools[queue_type.index()].size()
    }

    /// Bindless indices currently in use.
    #[must_use]
    pub fn bindless_allocated(&self) -> u32 {
        self.shared.bindless.allocated()
    }

    /// Last fence value signalled on `queue_type`.
    #[must_use]
    pub fn last_signalled_fence(&self, queue_type: QueueType) -> u64 {
        self.shared.queue(queue_type).last_signalled_fence()
    }

    // ------------------------------------------------------------------------
    // Command lists & submission
    // ------------------------------------------------------------------------

    #[must_use]
    pub fn create_command_list(&self, desc: &CommandListDesc) -> CommandList<B> {
        CommandList::new(Arc::clone(&self.shared), desc.clone())
    }

    /// Submits closed lists to `queue_type` as one batch.
    ///
    /// With `wait_for_completion` the call returns after the GPU retired the
    /// batch; otherwise the lists' resources stay referenced until garbage
    /// collection observes the fence.
    pub fn execute_command_lists(
        &self,
        lists: &mut [&mut CommandList<B>],
        wait_for_completion: bool,
        queue_type: QueueType,
    ) -> Result<ExecutionReceipt> {
        let queue = self.shared.queue(queue_type);

        let mut submitted = Vec::with_capacity(lists.len());
        let fence_value = {
            let mut streams = Vec::with_capacity(lists.len());
            for list in lists.iter() {
                debug_assert_eq!(
                    list.queue_type(),
                    queue_type,
                    "{}: submitted to a queue it was not created for",
                    list.desc().debug_name
                );
                match list.submission() {
                    Some(commands) => {
                        streams.push(commands);
                        submitted.push(true);
                    }
                    None => {
                        log::error!(
                            "{}: executed without a closed recording, skipped",
                            list.desc().debug_name
                        );
                        submitted.push(false);
                    }
                }
            }
            queue.execute(&streams)?
        };

        let receipt = ExecutionReceipt {
            fence_value,
            queue: queue_type,
        };

        let mut retired = Vec::new();
        for (list, _) in lists.iter_mut().zip(submitted).filter(|(_, submitted)| *submitted) {
            let tracked = list.executed(fence_value);
            self.stamp_timer_queries(&tracked, receipt);
            if wait_for_completion {
                retired.push(tracked);
            } else {
                self.shared.inflight[queue_type.index()].push(fence_value, tracked);
            }
        }

        if wait_for_completion {
            queue.wait_for_fence(fence_value);
            drop(retired);
        }
        Ok(receipt)
    }

    /// Submits one closed list to the queue it was created for.
    pub fn execute(&self, list: &mut CommandList<B>) -> Result<ExecutionReceipt> {
        let queue_type = list.queue_type();
        self.execute_command_lists(&mut [list], false, queue_type)
    }

    /// Makes later work on `waiting_queue` wait for `receipt` on the GPU.
    pub fn queue_wait_for_command_list(&self, waiting_queue: QueueType, receipt: ExecutionReceipt) {
        if waiting_queue == receipt.queue {
            return;
        }
        let signalling = self.shared.queue(receipt.queue);
        self.shared
            .queue(waiting_queue)
            .gpu_wait(signalling.fence(), receipt.fence_value);
    }

    #[must_use]
    pub fn is_complete(&self, receipt: ExecutionReceipt) -> bool {
        self.shared
            .queue(receipt.queue)
            .is_fence_complete(receipt.fence_value)
    }

    /// Blocks until `receipt` has retired.
    pub fn wait_for(&self, receipt: ExecutionReceipt) {
        self.shared
            .queue(receipt.queue)
            .wait_for_fence(receipt.fence_value);
    }

    // ------------------------------------------------------------------------
    // Frame & garbage collection
    // ------------------------------------------------------------------------

    /// Ends the current frame.
    pub fn present(&self) {
        let shared = &self.shared;
        let graphics = shared.queue(QueueType::Graphics);

        let frame = shared.frame_count.fetch_add(1, Ordering::AcqRel);
        graphics.signal(&shared.frame_fence, frame);
        let frame_count = frame + 1;

        let frames_in_flight = u64::from(shared.settings.frames_in_flight);
        graphics.last_completed_fence();
        if frame_count > frames_in_flight {
            let oldest = frame_count - frames_in_flight;
            if shared.frame_fence.completed_value() < oldest {
                graphics.wait_on(&shared.frame_fence, oldest);
            }
        }

        let completed = shared.frame_fence.completed_value();
        let (deleted, released) = shared.collect_garbage(completed);
        if deleted > 0 || released > 0 {
            log::debug!(
                "Frame {frame}: {deleted} deferred deletions, {released} submissions retired (completed frame {completed})"
            );
        }
    }

    /// Blocks until every queue is idle, then destroys everything pending.
    ///
    /// The frame counter is left as is; deletions of the current frame run
    /// because no GPU work can still reference them.
    pub fn wait_for_idle(&self) {
        let shared = &self.shared;
        for queue in &shared.queues {
            queue.wait_for_idle();
        }

        let frame = shared.frame_count.load(Ordering::Acquire);
        let graphics = shared.queue(QueueType::Graphics);
        graphics.signal(&shared.frame_fence, frame);
        graphics.wait_on(&shared.frame_fence, frame);

        let (deleted, released) = shared.collect_garbage(frame + 1);
        log::debug!("Wait for idle: {deleted} deferred deletions, {released} submissions retired");
    }

    /// Releases keep-alive sets of retired submissions and runs destructors
    /// of retired frames.
    pub fn run_garbage_collection(&self) {
        let shared = &self.shared;
        shared.queue(QueueType::Graphics).last_completed_fence();
        shared.collect_garbage(shared.frame_fence.completed_value());
    }

    fn defer_delete(&self, destructor: impl FnOnce(&DeviceShared<B>) + Send + 'static) {
        let frame = self.frame_count();
        self.shared.delete_queue.push(frame, destructor);
    }

    // ------------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------------

    pub fn create_texture(&self, desc: &TextureDesc) -> Result<TextureHandle> {
        validate_texture(desc)?;
        let shared = &self.shared;
        let native = Arc::new(shared.backend.create_texture(desc)?);

        let mut record = TextureRecord {
            desc: desc.clone(),
            native,
            views: ViewSet::default(),
        };

        let range = TextureSubresourceRange::ALL;
        let all = SubresourceRange::Texture(range);
        let flags = desc.binding_flags;
        if flags.contains(BindingFlags::SHADER_RESOURCE) {
            let descriptor = DeviceShared::texture_descriptor(&record, SubresourceType::Srv, range);
            record.views.srv = Some(shared.create_view(descriptor, all, desc.is_bindless));
        }
        if flags.contains(BindingFlags::UNORDERED_ACCESS) {
            let descriptor = DeviceShared::texture_descriptor(&record, SubresourceType::Uav, range);
            record.views.uav = Some(shared.create_view(descriptor, all, desc.is_bindless));
        }
        if flags.contains(BindingFlags::RENDER_TARGET) {
            let descriptor = DeviceShared::texture_descriptor(&record, SubresourceType::Rtv, range);
            record.views.rtv = Some(shared.create_view(descriptor, all, false));
        }
        if flags.contains(BindingFlags::DEPTH_STENCIL) {
            let descriptor = DeviceShared::texture_descriptor(&record, SubresourceType::Dsv, range);
            record.views.dsv = Some(shared.create_view(descriptor, all, false));
        }

        Ok(shared.textures.write().insert(record))
    }

    /// Adds a view over `range` and returns its subresource index.
    pub fn create_texture_subresource(
        &self,
        texture: TextureHandle,
        kind: SubresourceType,
        range: TextureSubresourceRange,
    ) -> Result<u32> {
        let shared = &self.shared;
        let mut textures = shared.textures.write();
        let record = textures
            .get_mut(texture)
            .ok_or(RhiError::InvalidHandle("texture"))?;

        let desc = &record.desc;
        let slices = desc.array_size.max(1);
        if range.first_mip >= desc.mip_levels.max(1) || range.first_slice >= slices {
            return Err(RhiError::InvalidSubresource {
                kind: "texture",
                index: desc.subresource_index(range.first_mip, range.first_slice),
            });
        }

        let descriptor = DeviceShared::texture_descriptor(record, kind, range);
        let view = shared.create_view(descriptor, SubresourceRange::Texture(range), record.desc.is_bindless);
        record.views.subresources.push(view);
        Ok(record.views.subresources.len() as u32 - 1)
    }

    #[must_use]
    pub fn get_texture_desc(&self, texture: TextureHandle) -> Option<TextureDesc> {
        self.shared
            .textures
            .read()
            .get(texture)
            .map(|record| record.desc.clone())
    }

    /// Bindless index of the texture's shader-resource view.
    #[must_use]
    pub fn get_descriptor_index(&self, texture: TextureHandle) -> DescriptorIndex {
        self.get_texture_view_index(texture, SubresourceType::Srv, None)
    }

    /// Bindless index of a main (`None`) or subresource view.
    #[must_use]
    pub fn get_texture_view_index(
        &self,
        texture: TextureHandle,
        kind: SubresourceType,
        subresource: Option<u32>,
    ) -> DescriptorIndex {
        self.shared
            .textures
            .read()
            .get(texture)
            .and_then(|record| record.views.find(kind, subresource).map(|view| view.bindless))
            .unwrap_or(DescriptorIndex::INVALID)
    }

    #[must_use]
    pub fn native_texture(&self, texture: TextureHandle) -> Option<Arc<B::Texture>> {
        self.shared
            .textures
            .read()
            .get(texture)
            .map(|record| Arc::clone(&record.native))
    }

    /// Destroys the texture once the current frame has retired. The handle
    /// resolves until then.
    pub fn delete_texture(&self, texture: TextureHandle) {
        self.defer_delete(move |shared| {
            let record = shared.textures.write().release(texture);
            match record {
                Some(mut record) => {
                    for view in record.views.drain() {
                        shared.free_view(view);
                    }
                }
                None => log::warn!("delete_texture: stale handle {texture:?}"),
            }
        });
    }

    // ------------------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------------------

    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<BufferHandle> {
        if desc.size == 0 {
            return Err(RhiError::InvalidDescriptor {
                kind: "BufferDesc",
                reason: format!("'{}' has zero size", desc.debug_name),
            });
        }
        let shared = &self.shared;
        let native = Arc::new(shared.backend.create_buffer(desc)?);
        let mut record = BufferRecord {
            desc: desc.clone(),
            native,
            views: ViewSet::default(),
        };

        if desc.usage == Usage::Default {
            let range = BufferRange {
                offset: 0,
                size: desc.size,
            };
            let bindless = desc.create_bindless || desc.misc_flags.contains(BufferMiscFlags::BINDLESS);
            let shader_resource = desc.binding.contains(BindingFlags::SHADER_RESOURCE)
                || desc.misc_flags.intersects(
                    BufferMiscFlags::RAW | BufferMiscFlags::STRUCTURED | BufferMiscFlags::TYPED,
                )
                || bindless;
            if shader_resource {
                let descriptor = DeviceShared::buffer_descriptor(&record, SubresourceType::Srv, range);
                record.views.srv = Some(shared.create_view(descriptor, SubresourceRange::Buffer(range), bindless));
            }
            if desc.allow_unordered_access || desc.binding.contains(BindingFlags::UNORDERED_ACCESS) {
                let descriptor = DeviceShared::buffer_descriptor(&record, SubresourceType::Uav, range);
                record.views.uav = Some(shared.create_view(descriptor, SubresourceRange::Buffer(range), bindless));
            }
        }

        Ok(shared.buffers.write().insert(record))
    }

    /// A device-local index buffer of `index_count` elements.
    pub fn create_index_buffer(&self, format: Format, index_count: u32, debug_name: &str) -> Result<BufferHandle> {
        if !matches!(format, Format::R16Uint | Format::R32Uint) {
            return Err(RhiError::UnsupportedFormat {
                format,
                usage: "index buffer",
            });
        }
        let stride = format.bytes_per_pixel();
        self.create_buffer(&BufferDesc {
            binding: BindingFlags::INDEX_BUFFER,
            initial_state: ResourceStates::INDEX_BUFFER,
            stride,
            size: u64::from(stride) * u64::from(index_count),
            format,
            debug_name: debug_name.to_owned(),
            ..Default::default()
        })
    }

    /// A device-local vertex buffer of `vertex_count` elements of `stride` bytes.
    pub fn create_vertex_buffer(&self, stride: u32, vertex_count: u32, debug_name: &str) -> Result<BufferHandle> {
        self.create_buffer(&BufferDesc {
            binding: BindingFlags::VERTEX_BUFFER,
            initial_state: ResourceStates::VERTEX_BUFFER,
            stride,
            size: u64::from(stride) * u64::from(vertex_count),
            debug_name: debug_name.to_owned(),
            ..Default::default()
        })
    }

    /// Adds a view over `range` and returns its subresource index.
    pub fn create_buffer_subresource(
        &self,
        buffer: BufferHandle,
        kind: SubresourceType,
        range: BufferRange,
    ) -> Result<u32> {
        if !matches!(kind, SubresourceType::Srv | SubresourceType::Uav) {
            return Err(RhiError::InvalidDescriptor {
                kind: "buffer subresource",
                reason: format!("{kind:?} views are not defined for buffers"),
            });
        }

        let shared = &self.shared;
        let mut buffers = shared.buffers.write();
        let record = buffers
            .get_mut(buffer)
            .ok_or(RhiError::InvalidHandle("buffer"))?;

        let end = range.offset.checked_add(range.size);
        if range.size == 0 || end.is_none_or(|end| end > record.desc.size) {
            return Err(RhiError::InvalidSubresource {
                kind: "buffer",
                index: record.views.subresources.len() as u32,
            });
        }

        let bindless = record.desc.create_bindless || record.desc.misc_flags.contains(BufferMiscFlags::BINDLESS);
        let descriptor = DeviceShared::buffer_descriptor(record, kind, range);
        let view = shared.create_view(descriptor, SubresourceRange::Buffer(range), bindless);
        record.views.subresources.push(view);
        Ok(record.views.subresources.len() as u32 - 1)
    }

    #[must_use]
    pub fn get_buffer_desc(&self, buffer: BufferHandle) -> Option<BufferDesc> {
        self.shared
            .buffers
            .read()
            .get(buffer)
            .map(|record| record.desc.clone())
    }

    /// Bindless index of the buffer's shader-resource view.
    #[must_use]
    pub fn get_buffer_descriptor_index(&self, buffer: BufferHandle) -> DescriptorIndex {
        self.get_buffer_view_index(buffer, SubresourceType::Srv, None)
    }

    #[must_use]
    pub fn get_buffer_view_index(
        &self,
        buffer: BufferHandle,
        kind: SubresourceType,
        subresource: Option<u32>,
    ) -> DescriptorIndex {
        self.shared
            .buffers
            .read()
            .get(buffer)
            .and_then(|record| record.views.find(kind, subresource).map(|view| view.bindless))
            .unwrap_or(DescriptorIndex::INVALID)
    }

    #[must_use]
    pub fn native_buffer(&self, buffer: BufferHandle) -> Option<Arc<B::Buffer>> {
        self.shared
            .buffers
            .read()
            .get(buffer)
            .map(|record| Arc::clone(&record.native))
    }

    /// Host write into an [`Usage::Upload`] buffer.
    pub fn write_buffer_mapped(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> Result<()> {
        let native = self.mapped_buffer(buffer, Usage::Upload, offset, data.len())?;
        self.shared.backend.write_buffer(&native, offset, data)
    }

    /// Host read from a [`Usage::ReadBack`] buffer. The caller is responsible
    /// for waiting on the submission that wrote it.
    pub fn read_buffer_mapped(&self, buffer: BufferHandle, offset: u64, out: &mut [u8]) -> Result<()> {
        let native = self.mapped_buffer(buffer, Usage::ReadBack, offset, out.len())?;
        self.shared.backend.read_buffer(&native, offset, out)
    }

    fn mapped_buffer(&self, buffer: BufferHandle, usage: Usage, offset: u64, len: usize) -> Result<Arc<B::Buffer>> {
        let buffers = self.shared.buffers.read();
        let record = buffers.get(buffer).ok_or(RhiError::InvalidHandle("buffer"))?;
        if record.desc.usage != usage {
            return Err(RhiError::BufferMapFailed(format!(
                "'{}' is {:?}, mapping requires {usage:?}",
                record.desc.debug_name, record.desc.usage
            )));
        }
        let end = offset.checked_add(len as u64);
        if end.is_none_or(|end| end > record.desc.size) {
            return Err(RhiError::BufferMapFailed(format!(
                "{len} bytes at offset {offset} exceed '{}' ({} bytes)",
                record.desc.debug_name, record.desc.size
            )));
        }
        Ok(Arc::clone(&record.native))
    }

    pub fn delete_buffer(&self, buffer: BufferHandle) {
        self.defer_delete(move |shared| {
            let record = shared.buffers.write().release(buffer);
            match record {
                Some(mut record) => {
                    for view in record.views.drain() {
                        shared.free_view(view);
                    }
                }
                None => log::warn!("delete_buffer: stale handle {buffer:?}"),
            }
        });
    }

    // ------------------------------------------------------------------------
    // Shaders & pipelines
    // ------------------------------------------------------------------------

    pub fn create_shader(&self, desc: &ShaderDesc, source: &[u8]) -> Result<ShaderHandle> {
        let native = Arc::new(self.shared.backend.create_shader(desc, source)?);
        Ok(self.shared.shaders.write().insert(ShaderRecord {
            desc: desc.clone(),
            native,
        }))
    }

    #[must_use]
    pub fn get_shader_desc(&self, shader: ShaderHandle) -> Option<ShaderDesc> {
        self.shared
            .shaders
            .read()
            .get(shader)
            .map(|record| record.desc.clone())
    }

    pub fn delete_shader(&self, shader: ShaderHandle) {
        self.defer_delete(move |shared| {
            shared.shaders.write().release(shader);
        });
    }

    pub fn create_graphics_pso(&self, desc: &GraphicsPsoDesc) -> Result<GraphicsPipelineHandle> {
        let (vertex, pixel) = {
            let shaders = self.shared.shaders.read();
            let vertex = shaders
                .get(desc.vertex_shader)
                .map(|record| Arc::clone(&record.native))
                .ok_or(RhiError::InvalidHandle("vertex shader"))?;
            let pixel = match desc.pixel_shader {
                Some(handle) => Some(
                    shaders
                        .get(handle)
                        .map(|record| Arc::clone(&record.native))
                        .ok_or(RhiError::InvalidHandle("pixel shader"))?,
                ),
                None => None,
            };
            (vertex, pixel)
        };

        let native = self
            .shared
            .backend
            .create_graphics_pipeline(desc, &vertex, pixel.as_deref())?;
        Ok(self
            .shared
            .graphics_pipelines
            .write()
            .insert(GraphicsPipelineRecord {
                desc: desc.clone(),
                native: Arc::new(native),
            }))
    }

    pub fn create_compute_pso(&self, desc: &ComputePsoDesc) -> Result<ComputePipelineHandle> {
        let shader = self
            .shared
            .shaders
            .read()
            .get(desc.compute_shader)
            .map(|record| Arc::clone(&record.native))
            .ok_or(RhiError::InvalidHandle("compute shader"))?;
        let native = self.shared.backend.create_compute_pipeline(desc, &shader)?;
        Ok(self
            .shared
            .compute_pipelines
            .write()
            .insert(ComputePipelineRecord {
                desc: desc.clone(),
                native: Arc::new(native),
            }))
    }

    #[must_use]
    pub fn get_graphics_pso_desc(&self, pso: GraphicsPipelineHandle) -> Option<GraphicsPsoDesc> {
        self.shared
            .graphics_pipelines
            .read()
            .get(pso)
            .map(|record| record.desc.clone())
    }

    #[must_use]
    pub fn get_compute_pso_desc(&self, pso: ComputePipelineHandle) -> Option<ComputePsoDesc> {
        self.shared
            .compute_pipelines
            .read()
            .get(pso)
            .map(|record| record.desc.clone())
    }

    pub fn delete_graphics_pso(&self, pso: GraphicsPipelineHandle) {
        self.defer_delete(move |shared| {
            shared.graphics_pipelines.write().release(pso);
        });
    }

    pub fn delete_compute_pso(&self, pso: ComputePipelineHandle) {
        self.defer_delete(move |shared| {
            shared.compute_pipelines.write().release(pso);
        });
    }

    // ------------------------------------------------------------------------
    // Timer queries
    // ------------------------------------------------------------------------

    pub fn create_timer_query(&self) -> Result<TimerQueryHandle> {
        self.shared.timer_queries.create()
    }

    fn stamp_timer_queries(&self, tracked: &TrackedResources<B>, receipt: ExecutionReceipt) {
        if tracked.timer_queries.is_empty() {
            return;
        }
        let mut records = self.shared.timer_queries.records.write();
        for &query in &tracked.timer_queries {
            if let Some(record) = records.get_mut(query) {
                record.pending = Some(receipt);
                record.elapsed = None;
            }
        }
    }

    /// Resolves the query if its submission has completed. Returns whether a
    /// result is available.
    pub fn poll_timer_query(&self, query: TimerQueryHandle) -> bool {
        let (pending, begin, end) = {
            let records = self.shared.timer_queries.records.read();
            let Some(record) = records.get(query) else {
                return false;
            };
            if record.elapsed.is_some() {
                return true;
            }
            let Some(pending) = record.pending else {
                return false;
            };
            (pending, record.begin_index(), record.end_index())
        };

        if !self.is_complete(pending) {
            return false;
        }

        let backend = &self.shared.backend;
        let heap = &self.shared.query_heap;
        let (Some(begin), Some(end)) = (backend.read_timestamp(heap, begin), backend.read_timestamp(heap, end))
        else {
            return false;
        };

        let elapsed = ticks_to_duration(begin, end, backend.timestamp_period());
        if let Some(record) = self.shared.timer_queries.records.write().get_mut(query) {
            record.elapsed = Some(elapsed);
            record.pending = None;
        }
        true
    }

    /// GPU time between the begin and end timestamps, once resolved.
    pub fn get_timer_query_time(&self, query: TimerQueryHandle) -> Option<Duration> {
        if !self.poll_timer_query(query) {
            return None;
        }
        self.shared
            .timer_queries
            .records
            .read()
            .get(query)
            .and_then(|record| record.elapsed)
    }

    pub fn reset_timer_query(&self, query: TimerQueryHandle) {
        if let Some(record) = self.shared.timer_queries.records.write().get_mut(query) {
            record.pending = None;
            record.elapsed = None;
        }
    }

    pub fn delete_timer_query(&self, query: TimerQueryHandle) {
        self.defer_delete(move |shared| shared.timer_queries.release(query));
    }
}

fn validate_texture(desc: &TextureDesc) -> Result<()> {
    let invalid = |reason: String| RhiError::InvalidDescriptor {
        kind: "TextureDesc",
        reason,
    };
    if desc.width == 0 || desc.height == 0 || desc.array_size == 0 {
        return Err(invalid(format!(
            "'{}' has a zero extent ({}x{}x{})",
            desc.debug_name, desc.width, desc.height, desc.array_size
        )));
    }
    if desc.mip_levels == 0 || desc.sample_count == 0 {
        return Err(invalid(format!(
            "'{}' needs at least one mip and one sample",
            desc.debug_name
        )));
    }
    if desc.mip_levels > desc.max_mip_levels() {
        return Err(invalid(format!(
            "'{}' requests {} mips, a {}x{} texture has at most {}",
            desc.debug_name,
            desc.mip_levels,
            desc.width,
            desc.height,
            desc.max_mip_levels()
        )));
    }
    if desc.format == Format::Unknown {
        return Err(invalid(format!("'{}' has no format", desc.debug_name)));
    }
    let depth = desc.format.is_depth();
    if desc.binding_flags.contains(BindingFlags::DEPTH_STENCIL) && !depth {
        return Err(RhiError::UnsupportedFormat {
            format: desc.format,
            usage: "depth-stencil target",
        });
    }
    if desc.binding_flags.contains(BindingFlags::RENDER_TARGET) && depth {
        return Err(RhiError::UnsupportedFormat {
            format: desc.format,
            usage: "render target",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn device() -> GraphicsDevice<NullBackend> {
        GraphicsDevice::new(NullBackend::default(), DeviceSettings::default()).unwrap()
    }

    #[test]
    fn test_frame_count_starts_at_one() {
        let device = device();
        assert_eq!(device.frame_count(), 1);
        device.present();
        assert_eq!(device.frame_count(), 2);
    }

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let settings = DeviceSettings {
            frames_in_flight: 0,
            ..Default::default()
        };
        assert!(GraphicsDevice::new(NullBackend::default(), settings).is_err());
    }

    #[test]
    fn test_texture_desc_validation() {
        let device = device();
        let zero = TextureDesc {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            device.create_texture(&zero),
            Err(RhiError::InvalidDescriptor { .. })
        ));

        let color_depth = TextureDesc {
            binding_flags: BindingFlags::DEPTH_STENCIL,
            format: Format::Rgba8Unorm,
            ..Default::default()
        };
        assert!(matches!(
            device.create_texture(&color_depth),
            Err(RhiError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_mip_chain_longer_than_extent_rejected() {
        let device = device();
        let desc = TextureDesc {
            width: 64,
            height: 64,
            mip_levels: 40,
            ..Default::default()
        };
        assert_eq!(desc.max_mip_levels(), 7);
        assert!(matches!(
            device.create_texture(&desc),
            Err(RhiError::InvalidDescriptor { .. })
        ));

        let full_chain = device.create_texture(&TextureDesc {
            mip_levels: 7,
            ..desc
        });
        assert!(full_chain.is_ok());
    }

    #[test]
    fn test_mip_extent_clamps_past_the_chain() {
        let desc = TextureDesc {
            width: 64,
            height: 16,
            ..Default::default()
        };
        assert_eq!(desc.mip_extent(2), (16, 4, 1));
        assert_eq!(desc.mip_extent(6), (1, 1, 1));
        assert_eq!(desc.mip_extent(40), (1, 1, 1));
    }

    #[test]
    fn test_views_follow_binding_flags() {
        let device = device();
        let texture = device
            .create_texture(&TextureDesc {
                binding_flags: BindingFlags::SHADER_RESOURCE | BindingFlags::RENDER_TARGET,
                width: 4,
                height: 4,
                ..Default::default()
            })
            .unwrap();

        assert!(device.get_descriptor_index(texture).is_valid());
        assert!(!device
            .get_texture_view_index(texture, SubresourceType::Rtv, None)
            .is_valid());
        assert!(!device
            .get_texture_view_index(texture, SubresourceType::Uav, None)
            .is_valid());
        assert_eq!(device.shared.rtv_heap.page_count(), 1);
        assert_eq!(device.shared.dsv_heap.page_count(), 0);
    }

    #[test]
    fn test_non_bindless_texture_has_invalid_index() {
        let device = device();
        let texture = device
            .create_texture(&TextureDesc {
                is_bindless: false,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(device.get_descriptor_index(texture), DescriptorIndex::INVALID);
        assert_eq!(device.bindless_allocated(), 0);
    }

    #[test]
    fn test_mapped_access_checks_usage() {
        let device = device();
        let buffer = device
            .create_buffer(&BufferDesc {
                size: 16,
                ..Default::default()
            })
            .unwrap();
        assert!(matches!(
            device.write_buffer_mapped(buffer, 0, &[1, 2, 3, 4]),
            Err(RhiError::BufferMapFailed(_))
        ));
    }

    #[test]
    fn test_upload_buffer_write_and_bounds() {
        let device = device();
        let buffer = device
            .create_buffer(&BufferDesc {
                usage: Usage::Upload,
                size: 8,
                ..Default::default()
            })
            .unwrap();
        device.write_buffer_mapped(buffer, 4, &[9, 9, 9, 9]).unwrap();
        assert!(device.write_buffer_mapped(buffer, 6, &[0; 4]).is_err());
    }
}
