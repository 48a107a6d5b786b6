//! wgpu Backend
//!
//! Drives real hardware through wgpu. wgpu exposes a single in-order queue,
//! so the three logical queues share it: fences are signalled from
//! `on_submitted_work_done` callbacks and cross-queue waits are already
//! satisfied by submission order.
//!
//! A recorded stream is encoded into one command encoder per submission.
//! Consecutive draw-state commands share one render pass, consecutive
//! dispatch-state commands share one compute pass. Barriers are tracked by
//! wgpu and only counted here.
//!
//! Bind commands create bind groups against the layout of the currently
//! bound pipeline (pipelines use automatic layouts). Bindless tables and
//! push constants have no portable wgpu equivalent and are skipped.

use std::borrow::Cow;
use std::num::NonZeroU64;
use std::sync::Arc;

use crate::backend::{AdapterInfo, Backend, NativeQueue};
use crate::errors::{Result, RhiError};
use crate::rhi::command::{BufferBinding, Command, Descriptor, TextureTarget};
use crate::rhi::fence::Fence;
use crate::rhi::upload_buffer::align_up;
use crate::settings::WgpuSettings;
use crate::types::{
    APPEND_ALIGNED, BindingFlags, BufferDesc, Color, ComparisonFunc,
    ComputePsoDesc, CullMode, DeviceCapabilities, Format, GraphicsPsoDesc, PrimitiveTopology,
    QueueType, ShaderDesc, ShaderStage, TextureDesc, TextureDimension, TextureSubresourceRange,
    Usage,
};

// ============================================================================
// Native objects
// ============================================================================

#[derive(Debug)]
pub struct WgpuBuffer {
    pub buffer: wgpu::Buffer,
    pub usage: Usage,
}

#[derive(Debug)]
pub struct WgpuTexture {
    pub texture: wgpu::Texture,
    pub desc: TextureDesc,
}

impl WgpuTexture {
    /// View over `range` using the texture's own dimension.
    fn view(&self, range: TextureSubresourceRange) -> wgpu::TextureView {
        let count = |n: u32| (n != u32::MAX).then_some(n);
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(self.desc.debug_name.as_str()),
            dimension: Some(view_dimension(self.desc.dimension)),
            base_mip_level: range.first_mip,
            mip_level_count: count(range.mip_count),
            base_array_layer: range.first_slice,
            array_layer_count: count(range.slice_count),
            ..Default::default()
        })
    }

    /// Single-subresource 2D view used for attachments.
    fn attachment_view(&self, mip: u32, slice: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(self.desc.debug_name.as_str()),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: slice,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

#[derive(Debug)]
pub struct WgpuShader {
    pub module: wgpu::ShaderModule,
    pub stage: ShaderStage,
    pub entry_point: String,
}

#[derive(Debug)]
pub struct WgpuGraphicsPipeline {
    pub pipeline: wgpu::RenderPipeline,
}

#[derive(Debug)]
pub struct WgpuComputePipeline {
    pub pipeline: wgpu::ComputePipeline,
}

/// Timestamp query set plus its resolve and readback buffers.
#[derive(Debug)]
pub struct WgpuQueryHeap {
    set: Option<wgpu::QuerySet>,
    resolve: Option<wgpu::Buffer>,
    readback: Option<wgpu::Buffer>,
    capacity: u32,
}

// ============================================================================
// Backend
// ============================================================================

#[derive(Debug)]
struct WgpuInner {
    device: wgpu::Device,
    queue: wgpu::Queue,
    info: AdapterInfo,
}

/// wgpu device and queue. Cloning shares them.
#[derive(Debug, Clone)]
pub struct WgpuBackend {
    inner: Arc<WgpuInner>,
}

impl WgpuBackend {
    /// Requests an adapter and device.
    pub async fn new(settings: &WgpuSettings) -> Result<Self> {
        let instance = wgpu::Instance::default();

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: settings.power_preference,
                compatible_surface: None,
                force_fallback_adapter: settings.force_fallback_adapter,
            })
            .await
            .map_err(|e| RhiError::AdapterRequestFailed(e.to_string()))?;

        let optional = wgpu::Features::TIMESTAMP_QUERY
            | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS;
        let required_features = settings.required_features | (adapter.features() & optional);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: settings.label.as_deref(),
                required_features,
                required_limits: settings.required_limits.clone(),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await?;

        let adapter_info = adapter.get_info();
        let info = AdapterInfo {
            name: adapter_info.name,
            backend: format!("{:?}", adapter_info.backend),
            device_type: format!("{:?}", adapter_info.device_type),
        };
        log::info!("wgpu device created: {} ({})", info.name, info.backend);

        Ok(Self::from_device(device, queue, info))
    }

    /// Blocking variant of [`new`](Self::new).
    pub fn new_blocking(settings: &WgpuSettings) -> Result<Self> {
        pollster::block_on(Self::new(settings))
    }

    /// Wraps an existing device, for hosts that created their own.
    #[must_use]
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue, info: AdapterInfo) -> Self {
        Self {
            inner: Arc::new(WgpuInner {
                device,
                queue,
                info,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.inner.device
    }

    #[inline]
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.inner.queue
    }

    fn timestamps_in_encoders(&self) -> bool {
        self.inner
            .device
            .features()
            .contains(wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS)
    }

    fn poll(&self, block: bool) {
        let poll_type = if block {
            wgpu::PollType::wait_indefinitely()
        } else {
            wgpu::PollType::Poll
        };
        let _ = self.inner.device.poll(poll_type);
    }

    /// Maps `range` of `buffer` for reading, copies it out, and unmaps.
    fn read_mapped(&self, buffer: &wgpu::Buffer, start: u64, out: &mut [u8]) -> Result<()> {
        let map_start = start & !(wgpu::MAP_ALIGNMENT - 1);
        let map_end = align_up(start + out.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT).min(buffer.size());
        if start + out.len() as u64 > map_end {
            return Err(RhiError::BufferMapFailed(format!(
                "read of {} bytes at {start} exceeds buffer size {}",
                out.len(),
                buffer.size()
            )));
        }

        let slice = buffer.slice(map_start..map_end);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.poll(true);

        match receiver.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RhiError::BufferMapFailed(e.to_string())),
            Err(e) => return Err(RhiError::BufferMapFailed(e.to_string())),
        }

        {
            let mapped = slice.get_mapped_range();
            let offset = (start - map_start) as usize;
            out.copy_from_slice(&mapped[offset..offset + out.len()]);
        }
        buffer.unmap();
        Ok(())
    }
}

// ============================================================================
// Conversions
// ============================================================================

fn wgpu_format(format: Format, usage: &'static str) -> Result<wgpu::TextureFormat> {
    format
        .to_wgpu_texture()
        .ok_or(RhiError::UnsupportedFormat { format, usage })
}

fn view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
    match dimension {
        TextureDimension::Texture1D | TextureDimension::Texture1DArray => wgpu::TextureViewDimension::D1,
        TextureDimension::Texture2D | TextureDimension::Texture2DMS => wgpu::TextureViewDimension::D2,
        TextureDimension::Texture2DArray | TextureDimension::Texture2DMSArray => {
            wgpu::TextureViewDimension::D2Array
        }
        TextureDimension::TextureCube => wgpu::TextureViewDimension::Cube,
        TextureDimension::TextureCubeArray => wgpu::TextureViewDimension::CubeArray,
        TextureDimension::Texture3D => wgpu::TextureViewDimension::D3,
    }
}

fn compare_function(func: ComparisonFunc) -> wgpu::CompareFunction {
    match func {
        ComparisonFunc::Never => wgpu::CompareFunction::Never,
        ComparisonFunc::Less => wgpu::CompareFunction::Less,
        ComparisonFunc::Equal => wgpu::CompareFunction::Equal,
        ComparisonFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        ComparisonFunc::Greater => wgpu::CompareFunction::Greater,
        ComparisonFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        ComparisonFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        ComparisonFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

fn buffer_usages(desc: &BufferDesc) -> wgpu::BufferUsages {
    match desc.usage {
        Usage::ReadBack => wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        Usage::Upload => {
            // Staging pages are also bound directly for dynamic data.
            wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::INDEX
        }
        Usage::Default => {
            let mut usages = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
            let binding = desc.binding;
            if binding.contains(BindingFlags::VERTEX_BUFFER) {
                usages |= wgpu::BufferUsages::VERTEX;
            }
            if binding.contains(BindingFlags::INDEX_BUFFER) {
                usages |= wgpu::BufferUsages::INDEX;
            }
            if binding.contains(BindingFlags::CONSTANT_BUFFER) {
                usages |= wgpu::BufferUsages::UNIFORM;
            }
            let storage = binding.intersects(BindingFlags::SHADER_RESOURCE | BindingFlags::UNORDERED_ACCESS)
                || desc.allow_unordered_access
                || desc.create_bindless
                || !desc.misc_flags.is_empty();
            if storage {
                usages |= wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::INDIRECT;
            }
            usages
        }
    }
}

fn texture_usages(flags: BindingFlags) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    if flags.contains(BindingFlags::SHADER_RESOURCE) {
        usages |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if flags.contains(BindingFlags::UNORDERED_ACCESS) {
        usages |= wgpu::TextureUsages::STORAGE_BINDING;
    }
    if flags.intersects(BindingFlags::RENDER_TARGET | BindingFlags::DEPTH_STENCIL) {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    usages
}

fn wgpu_color(color: Color) -> wgpu::Color {
    wgpu::Color {
        r: f64::from(color.r),
        g: f64::from(color.g),
        b: f64::from(color.b),
        a: f64::from(color.a),
    }
}

fn vertex_layouts(desc: &GraphicsPsoDesc) -> Result<Vec<(u64, wgpu::VertexStepMode, Vec<wgpu::VertexAttribute>)>> {
    let mut slots: Vec<(u64, wgpu::VertexStepMode, Vec<wgpu::VertexAttribute>)> = Vec::new();
    for (location, attribute) in desc.input_layout.iter().enumerate() {
        let slot = attribute.input_slot as usize;
        if slots.len() <= slot {
            slots.resize_with(slot + 1, || (0, wgpu::VertexStepMode::Vertex, Vec::new()));
        }
        let format = attribute.format.to_wgpu_vertex().ok_or(RhiError::UnsupportedFormat {
            format: attribute.format,
            usage: "vertex attribute",
        })?;

        let (stride, step_mode, attributes) = &mut slots[slot];
        let offset = if attribute.aligned_byte_offset == APPEND_ALIGNED {
            *stride
        } else {
            u64::from(attribute.aligned_byte_offset)
        };
        *stride = (*stride).max(offset + format.size());
        if attribute.is_instanced {
            *step_mode = wgpu::VertexStepMode::Instance;
        }
        attributes.push(wgpu::VertexAttribute {
            format,
            offset,
            shader_location: location as u32,
        });
    }
    Ok(slots)
}

impl Backend for WgpuBackend {
    type Buffer = WgpuBuffer;
    type Texture = WgpuTexture;
    type Shader = WgpuShader;
    type GraphicsPipeline = WgpuGraphicsPipeline;
    type ComputePipeline = WgpuComputePipeline;
    type QueryHeap = WgpuQueryHeap;
    type Queue = WgpuQueue;

    fn adapter_info(&self) -> AdapterInfo {
        self.inner.info.clone()
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::INDIRECT_DRAW;
        if self.timestamps_in_encoders() {
            caps |= DeviceCapabilities::TIMESTAMP_QUERY;
        }
        caps
    }

    fn create_queue(&self, queue_type: QueueType) -> Result<WgpuQueue> {
        Ok(WgpuQueue {
            backend: self.clone(),
            queue_type,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<WgpuBuffer> {
        let buffer = self.inner.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.debug_name.as_str()),
            size: align_up(desc.size, wgpu::COPY_BUFFER_ALIGNMENT),
            usage: buffer_usages(desc),
            mapped_at_creation: false,
        });
        Ok(WgpuBuffer {
            buffer,
            usage: desc.usage,
        })
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<WgpuTexture> {
        let format = wgpu_format(desc.format, "texture")?;
        let dimension = match desc.dimension {
            TextureDimension::Texture1D | TextureDimension::Texture1DArray => wgpu::TextureDimension::D1,
            TextureDimension::Texture3D => wgpu::TextureDimension::D3,
            _ => wgpu::TextureDimension::D2,
        };
        let texture = self.inner.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.debug_name.as_str()),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.array_size.max(1),
            },
            mip_level_count: desc.mip_levels.max(1),
            sample_count: desc.sample_count.max(1),
            dimension,
            format,
            usage: texture_usages(desc.binding_flags),
            view_formats: &[],
        });
        Ok(WgpuTexture {
            texture,
            desc: desc.clone(),
        })
    }

    fn create_shader(&self, desc: &ShaderDesc, source: &[u8]) -> Result<WgpuShader> {
        let source = std::str::from_utf8(source).map_err(|e| RhiError::ShaderSource {
            name: desc.debug_name.clone(),
            reason: e.to_string(),
        })?;
        let module = self
            .inner
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.debug_name.as_str()),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            });
        Ok(WgpuShader {
            module,
            stage: desc.stage,
            entry_point: desc.entry_point.clone(),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPsoDesc,
        vertex: &WgpuShader,
        pixel: Option<&WgpuShader>,
    ) -> Result<WgpuGraphicsPipeline> {
        let slots = vertex_layouts(desc)?;
        let buffers: Vec<wgpu::VertexBufferLayout<'_>> = slots
            .iter()
            .map(|(stride, step_mode, attributes)| wgpu::VertexBufferLayout {
                array_stride: *stride,
                step_mode: *step_mode,
                attributes,
            })
            .collect();

        let targets = desc
            .rtv_formats
            .iter()
            .map(|&format| {
                Ok(Some(wgpu::ColorTargetState {
                    format: wgpu_format(format, "render target")?,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        let depth_stencil = match desc.dsv_format {
            Some(format) => {
                let state = desc.depth_stencil;
                Some(wgpu::DepthStencilState {
                    format: wgpu_format(format, "depth-stencil target")?,
                    depth_write_enabled: Some(state.depth_test && state.depth_write),
                    depth_compare: Some(if state.depth_test {
                        compare_function(state.depth_func)
                    } else {
                        wgpu::CompareFunction::Always
                    }),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                })
            }
            None => None,
        };

        let cull_mode = match desc.cull_mode {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        };

        let pipeline = self
            .inner
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(desc.debug_name.as_str()),
                layout: None,
                vertex: wgpu::VertexState {
                    module: &vertex.module,
                    entry_point: Some(vertex.entry_point.as_str()),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: pixel.map(|pixel| wgpu::FragmentState {
                    module: &pixel.module,
                    entry_point: Some(pixel.entry_point.as_str()),
                    targets: &targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: primitive_topology(desc.topology),
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil,
                multisample: wgpu::MultisampleState {
                    count: desc.sample_count.max(1),
                    ..Default::default()
                },
                multiview_mask: None,
                cache: None,
            });
        Ok(WgpuGraphicsPipeline { pipeline })
    }

    fn create_compute_pipeline(&self, desc: &ComputePsoDesc, shader: &WgpuShader) -> Result<WgpuComputePipeline> {
        let pipeline = self
            .inner
            .device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(desc.debug_name.as_str()),
                layout: None,
                module: &shader.module,
                entry_point: Some(shader.entry_point.as_str()),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });
        Ok(WgpuComputePipeline { pipeline })
    }

    fn create_query_heap(&self, capacity: u32) -> Result<WgpuQueryHeap> {
        if !self.timestamps_in_encoders() || capacity == 0 {
            return Ok(WgpuQueryHeap {
                set: None,
                resolve: None,
                readback: None,
                capacity,
            });
        }

        let device = &self.inner.device;
        let size = u64::from(capacity) * 8;
        Ok(WgpuQueryHeap {
            set: Some(device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("Timestamp Query Heap"),
                ty: wgpu::QueryType::Timestamp,
                count: capacity,
            })),
            resolve: Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamp Resolve"),
                size,
                usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })),
            readback: Some(device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Timestamp Readback"),
                size,
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })),
            capacity,
        })
    }

    fn write_buffer(&self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(RhiError::BufferMapFailed(format!(
                "write offset {offset} is not {}-byte aligned",
                wgpu::COPY_BUFFER_ALIGNMENT
            )));
        }
        let padded = align_up(data.len() as u64, wgpu::COPY_BUFFER_ALIGNMENT) as usize;
        if offset + padded as u64 > buffer.buffer.size() {
            return Err(RhiError::BufferMapFailed(format!(
                "write of {} bytes at {offset} exceeds buffer size {}",
                data.len(),
                buffer.buffer.size()
            )));
        }
        if padded == data.len() {
            self.inner.queue.write_buffer(&buffer.buffer, offset, data);
        } else {
            let mut bytes = data.to_vec();
            bytes.resize(padded, 0);
            self.inner.queue.write_buffer(&buffer.buffer, offset, &bytes);
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &WgpuBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        if buffer.usage != Usage::ReadBack {
            return Err(RhiError::BufferMapFailed(
                "only read-back buffers can be mapped for reading".to_owned(),
            ));
        }
        self.read_mapped(&buffer.buffer, offset, out)
    }

    fn read_timestamp(&self, heap: &WgpuQueryHeap, index: u32) -> Option<u64> {
        let readback = heap.readback.as_ref()?;
        if index >= heap.capacity {
            return None;
        }
        let mut bytes = [0u8; 8];
        self.read_mapped(readback, u64::from(index) * 8, &mut bytes).ok()?;
        let value = u64::from_le_bytes(bytes);
        (value != 0).then_some(value)
    }

    fn timestamp_period(&self) -> f32 {
        self.inner.queue.get_timestamp_period()
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug)]
pub struct WgpuQueue {
    backend: WgpuBackend,
    queue_type: QueueType,
}

impl NativeQueue<WgpuBackend> for WgpuQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn submit(&self, streams: &[&[Command<WgpuBackend>]]) -> Result<()> {
        let device = &self.backend.inner.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(match self.queue_type {
                QueueType::Graphics => "Graphics Submission",
                QueueType::Compute => "Compute Submission",
                QueueType::Copy => "Copy Submission",
            }),
        });

        let mut state = EncoderState::new(self.backend.timestamps_in_encoders());
        for stream in streams {
            state.encode(device, &mut encoder, stream);
        }
        state.resolve_timestamps(&mut encoder);

        self.backend.inner.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn signal(&self, fence: &Arc<Fence>, value: u64) {
        let fence = Arc::clone(fence);
        self.backend
            .inner
            .queue
            .on_submitted_work_done(move || fence.signal(value));
    }

    fn wait(&self, _fence: &Arc<Fence>, value: u64) {
        // One in-order hardware queue: earlier submissions already precede.
        log::debug!("{:?} queue: cross-queue wait for {value} satisfied by submission order", self.queue_type);
    }

    fn poll(&self, block: bool) {
        self.backend.poll(block);
    }
}

// ============================================================================
// Encoding
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Render,
    Compute,
}

/// Encoder-wide state carried between passes of one submission.
struct EncoderState {
    colors: Vec<TextureTarget<WgpuBackend>>,
    depth: Option<TextureTarget<WgpuBackend>>,
    graphics_pipeline: Option<Arc<WgpuGraphicsPipeline>>,
    compute_pipeline: Option<Arc<WgpuComputePipeline>>,
    timestamps: bool,
    written_heaps: Vec<Arc<WgpuQueryHeap>>,
    last_pass: PassKind,
}

impl EncoderState {
    fn new(timestamps: bool) -> Self {
        Self {
            colors: Vec::new(),
            depth: None,
            graphics_pipeline: None,
            compute_pipeline: None,
            timestamps,
            written_heaps: Vec::new(),
            last_pass: PassKind::Render,
        }
    }

    fn pass_kind(&self, command: &Command<WgpuBackend>) -> Option<PassKind> {
        match command {
            Command::SetComputePipeline(_) | Command::Dispatch { .. } | Command::DispatchIndirect { .. } => {
                Some(PassKind::Compute)
            }
            Command::SetGraphicsPipeline(_)
            | Command::SetViewports(_)
            | Command::SetScissors(_)
            | Command::BindVertexBuffer { .. }
            | Command::BindIndexBuffer { .. }
            | Command::Draw { .. }
            | Command::DrawIndexed { .. } => Some(PassKind::Render),
            Command::PushConstants { .. }
            | Command::BindBuffer { .. }
            | Command::BindDescriptorTable { .. }
            | Command::BindBindlessTable { .. } => Some(self.last_pass),
            _ => None,
        }
    }

    fn encode(&mut self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, commands: &[Command<WgpuBackend>]) {
        let mut i = 0;
        while i < commands.len() {
            if let Some(kind) = self.pass_kind(&commands[i]) {
                let belongs = |c: &Command<WgpuBackend>| match kind {
                    PassKind::Render => c.is_graphics(),
                    PassKind::Compute => c.is_compute(),
                };
                let end = commands[i..]
                    .iter()
                    .position(|c| !belongs(c))
                    .map_or(commands.len(), |n| i + n);
                match kind {
                    PassKind::Render => self.encode_render_pass(device, encoder, &commands[i..end]),
                    PassKind::Compute => self.encode_compute_pass(device, encoder, &commands[i..end]),
                }
                self.last_pass = kind;
                i = end;
                continue;
            }

            self.encode_command(encoder, &commands[i]);
            i += 1;
        }
    }

    fn encode_command(&mut self, encoder: &mut wgpu::CommandEncoder, command: &Command<WgpuBackend>) {
        match command {
            Command::BeginMarker(name) => encoder.push_debug_group(name),
            Command::EndMarker => encoder.pop_debug_group(),
            Command::Barriers(_) => {}
            Command::ClearColor { target, color } => {
                let view = target.texture.attachment_view(target.mip, target.slice);
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Color"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu_color(*color)),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                    })],
                    ..Default::default()
                });
            }
            Command::ClearDepthStencil {
                target,
                depth,
                stencil,
            } => {
                let view = target.texture.attachment_view(target.mip, target.slice);
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Depth Stencil"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(depth_attachment(&view, target.format, *depth, *stencil)),
                    ..Default::default()
                });
            }
            Command::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let padded = align_up(*size, wgpu::COPY_BUFFER_ALIGNMENT);
                if src_offset + padded > src.buffer.size() || dst_offset + padded > dst.buffer.size() {
                    log::error!("wgpu: buffer copy of {size} bytes out of range, skipped");
                    return;
                }
                encoder.copy_buffer_to_buffer(&src.buffer, *src_offset, &dst.buffer, *dst_offset, padded);
            }
            Command::CopyBufferToTexture {
                src,
                src_offset,
                bytes_per_row,
                rows_per_image,
                dst,
                width,
                height,
                depth,
            } => {
                let is_3d = dst.texture.desc.dimension == TextureDimension::Texture3D;
                encoder.copy_buffer_to_texture(
                    wgpu::TexelCopyBufferInfo {
                        buffer: &src.buffer,
                        layout: wgpu::TexelCopyBufferLayout {
                            offset: *src_offset,
                            bytes_per_row: Some(*bytes_per_row),
                            rows_per_image: Some(*rows_per_image),
                        },
                    },
                    wgpu::TexelCopyTextureInfo {
                        texture: &dst.texture.texture,
                        mip_level: dst.mip,
                        origin: wgpu::Origin3d {
                            x: 0,
                            y: 0,
                            z: if is_3d { 0 } else { dst.slice },
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    wgpu::Extent3d {
                        width: *width,
                        height: *height,
                        depth_or_array_layers: *depth,
                    },
                );
            }
            Command::SetRenderTargets { colors, depth } => {
                self.colors = colors.to_vec();
                self.depth.clone_from(depth);
            }
            Command::WriteTimestamp { heap, index } => {
                let Some(set) = heap.set.as_ref().filter(|_| self.timestamps) else {
                    log::debug!("wgpu: timestamp write skipped, timestamp queries unavailable");
                    return;
                };
                encoder.write_timestamp(set, *index);
                if !self.written_heaps.iter().any(|h| Arc::ptr_eq(h, heap)) {
                    self.written_heaps.push(Arc::clone(heap));
                }
            }
            other => log::debug!("wgpu: command outside a pass ignored: {other:?}"),
        }
    }

    fn encode_render_pass(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        commands: &[Command<WgpuBackend>],
    ) {
        if self.colors.is_empty() && self.depth.is_none() {
            log::error!("wgpu: {} draw-state commands without render targets, skipped", commands.len());
            return;
        }

        let color_views: Vec<wgpu::TextureView> = self
            .colors
            .iter()
            .map(|t| t.texture.attachment_view(t.mip, t.slice))
            .collect();
        let depth_view = self
            .depth
            .as_ref()
            .map(|t| (t.texture.attachment_view(t.mip, t.slice), t.format));

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = color_views
            .iter()
            .map(|view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth_view
                .as_ref()
                .map(|(view, format)| depth_attachment(view, *format, None, None)),
            ..Default::default()
        });

        for command in commands {
            match command {
                Command::SetGraphicsPipeline(pipeline) => {
                    pass.set_pipeline(&pipeline.pipeline);
                    self.graphics_pipeline = Some(Arc::clone(pipeline));
                }
                Command::SetViewports(viewports) => {
                    if let Some(v) = viewports.first() {
                        pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
                    }
                }
                Command::SetScissors(rects) => {
                    if let Some(r) = rects.first() {
                        pass.set_scissor_rect(
                            r.min_x,
                            r.min_y,
                            r.max_x.saturating_sub(r.min_x),
                            r.max_y.saturating_sub(r.min_y),
                        );
                    }
                }
                Command::BindVertexBuffer {
                    slot,
                    buffer,
                    offset,
                    size,
                    ..
                } => pass.set_vertex_buffer(*slot, buffer.buffer.slice(*offset..offset + size)),
                Command::BindIndexBuffer {
                    buffer,
                    offset,
                    size,
                    format,
                } => match format.to_wgpu_index() {
                    Some(index_format) => {
                        pass.set_index_buffer(buffer.buffer.slice(*offset..offset + size), index_format);
                    }
                    None => log::error!("wgpu: index format {format:?} unsupported"),
                },
                Command::BindBuffer { .. } | Command::BindDescriptorTable { .. } => {
                    let Some(pipeline) = self.graphics_pipeline.as_ref() else {
                        log::error!("wgpu: binding recorded before a graphics pipeline, skipped");
                        continue;
                    };
                    if let Some((root, group)) = bind_group(device, command, |root| {
                        pipeline.pipeline.get_bind_group_layout(root)
                    }) {
                        pass.set_bind_group(root, &group, &[]);
                    }
                }
                Command::Draw {
                    vertex_count,
                    instance_count,
                    start_vertex,
                    start_instance,
                } => pass.draw(
                    *start_vertex..start_vertex + vertex_count,
                    *start_instance..start_instance + instance_count,
                ),
                Command::DrawIndexed {
                    index_count,
                    instance_count,
                    start_index,
                    base_vertex,
                    start_instance,
                } => pass.draw_indexed(
                    *start_index..start_index + index_count,
                    *base_vertex,
                    *start_instance..start_instance + instance_count,
                ),
                other => log::debug!("wgpu: {other:?} has no render pass translation"),
            }
        }
    }

    fn encode_compute_pass(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        commands: &[Command<WgpuBackend>],
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Pass"),
            timestamp_writes: None,
        });

        for command in commands {
            match command {
                Command::SetComputePipeline(pipeline) => {
                    pass.set_pipeline(&pipeline.pipeline);
                    self.compute_pipeline = Some(Arc::clone(pipeline));
                }
                Command::BindBuffer { .. } | Command::BindDescriptorTable { .. } => {
                    let Some(pipeline) = self.compute_pipeline.as_ref() else {
                        log::error!("wgpu: binding recorded before a compute pipeline, skipped");
                        continue;
                    };
                    if let Some((root, group)) = bind_group(device, command, |root| {
                        pipeline.pipeline.get_bind_group_layout(root)
                    }) {
                        pass.set_bind_group(root, &group, &[]);
                    }
                }
                Command::Dispatch { x, y, z } => pass.dispatch_workgroups(*x, *y, *z),
                Command::DispatchIndirect { args, offset } => {
                    pass.dispatch_workgroups_indirect(&args.buffer, *offset);
                }
                other => log::debug!("wgpu: {other:?} has no compute pass translation"),
            }
        }
    }

    fn resolve_timestamps(&self, encoder: &mut wgpu::CommandEncoder) {
        for heap in &self.written_heaps {
            let (Some(set), Some(resolve), Some(readback)) = (&heap.set, &heap.resolve, &heap.readback) else {
                continue;
            };
            encoder.resolve_query_set(set, 0..heap.capacity, resolve, 0);
            encoder.copy_buffer_to_buffer(resolve, 0, readback, 0, u64::from(heap.capacity) * 8);
        }
    }
}

fn depth_attachment(
    view: &wgpu::TextureView,
    format: Format,
    depth: Option<f32>,
    stencil: Option<u32>,
) -> wgpu::RenderPassDepthStencilAttachment<'_> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: depth.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: format.has_stencil().then(|| wgpu::Operations {
            load: stencil.map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
            store: wgpu::StoreOp::Store,
        }),
    }
}

/// Builds the bind group a binding command describes, returning its group index.
fn bind_group(
    device: &wgpu::Device,
    command: &Command<WgpuBackend>,
    layout: impl FnOnce(u32) -> wgpu::BindGroupLayout,
) -> Option<(u32, wgpu::BindGroup)> {
    match command {
        Command::BindBuffer {
            root,
            binding,
            buffer,
            offset,
            size,
        } => {
            let layout = layout(*root);
            let label = match binding {
                BufferBinding::Constant => "Constant Buffer",
                BufferBinding::Structured => "Structured Buffer",
                BufferBinding::Unordered => "Unordered Access Buffer",
            };
            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer.buffer,
                        offset: *offset,
                        size: NonZeroU64::new(*size),
                    }),
                }],
            });
            Some((*root, group))
        }
        Command::BindDescriptorTable {
            root, descriptors, ..
        } => {
            let layout = layout(*root);
            let views: Vec<Option<wgpu::TextureView>> = descriptors
                .iter()
                .map(|d| match d {
                    Some(Descriptor::Texture { texture, range, .. }) => Some(texture.view(*range)),
                    _ => None,
                })
                .collect();

            let mut entries = Vec::with_capacity(descriptors.len());
            for (i, descriptor) in descriptors.iter().enumerate() {
                let resource = match (descriptor, &views[i]) {
                    (Some(Descriptor::Texture { .. }), Some(view)) => wgpu::BindingResource::TextureView(view),
                    (Some(Descriptor::Buffer { buffer, range, .. }), _) => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: &buffer.buffer,
                            offset: range.offset,
                            size: NonZeroU64::new(range.size),
                        })
                    }
                    _ => {
                        log::error!("wgpu: descriptor table slot {i} is empty, table skipped");
                        return None;
                    }
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: i as u32,
                    resource,
                });
            }

            let group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Descriptor Table"),
                layout: &layout,
                entries: &entries,
            });
            Some((*root, group))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferMiscFlags, VertexAttributeDesc};

    #[test]
    fn test_vertex_layout_append_aligned() {
        let desc = GraphicsPsoDesc {
            vertex_shader: crate::types::ShaderHandle::INVALID,
            pixel_shader: None,
            input_layout: vec![
                VertexAttributeDesc {
                    semantic_name: "POSITION".into(),
                    semantic_index: 0,
                    format: Format::Rgb32Float,
                    input_slot: 0,
                    aligned_byte_offset: APPEND_ALIGNED,
                    is_instanced: false,
                },
                VertexAttributeDesc {
                    semantic_name: "TEXCOORD".into(),
                    semantic_index: 0,
                    format: Format::Rg32Float,
                    input_slot: 0,
                    aligned_byte_offset: APPEND_ALIGNED,
                    is_instanced: false,
                },
                VertexAttributeDesc {
                    semantic_name: "INSTANCE".into(),
                    semantic_index: 0,
                    format: Format::Rgba32Float,
                    input_slot: 1,
                    aligned_byte_offset: 0,
                    is_instanced: true,
                },
            ],
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::Back,
            depth_stencil: crate::types::DepthStencilState::default(),
            rtv_formats: smallvec::smallvec![Format::Rgba8Unorm],
            dsv_format: None,
            sample_count: 1,
            debug_name: "layout".into(),
        };

        let slots = vertex_layouts(&desc).unwrap();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].0, 20);
        assert_eq!(slots[0].2[1].offset, 12);
        assert_eq!(slots[0].2[1].shader_location, 1);
        assert_eq!(slots[1].1, wgpu::VertexStepMode::Instance);
        assert_eq!(slots[1].2[0].shader_location, 2);
    }

    #[test]
    fn test_buffer_usage_mapping() {
        let readback = BufferDesc {
            usage: Usage::ReadBack,
            size: 4,
            ..Default::default()
        };
        assert_eq!(
            buffer_usages(&readback),
            wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST
        );

        let structured = BufferDesc {
            misc_flags: BufferMiscFlags::STRUCTURED,
            size: 64,
            ..Default::default()
        };
        assert!(buffer_usages(&structured).contains(wgpu::BufferUsages::STORAGE));
    }

    #[test]
    fn test_texture_usage_mapping() {
        let usages = texture_usages(BindingFlags::SHADER_RESOURCE | BindingFlags::RENDER_TARGET);
        assert!(usages.contains(wgpu::TextureUsages::TEXTURE_BINDING));
        assert!(usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(!usages.contains(wgpu::TextureUsages::STORAGE_BINDING));
    }
}
