//! Null Backend
//!
//! A software GPU. Buffers and textures are byte stores in host memory and
//! command streams are executed on the CPU, so copies, clears and timestamps
//! have observable results. Each queue holds an ordered timeline of
//! `Execute`, `Signal` and `Wait` operations:
//!
//! - [`TimelineMode::Immediate`] drains every queue as soon as work arrives,
//!   emulating a GPU that is always idle.
//! - [`TimelineMode::Deferred`] only drains on a blocking poll or
//!   [`NullBackend::retire_all`], emulating a GPU that lags the CPU.
//!
//! A `Wait` stalls only its own queue until the awaited fence is reached.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use half::f16;
use parking_lot::Mutex;

use crate::backend::{AdapterInfo, Backend, NativeQueue};
use crate::errors::{Result, RhiError};
use crate::rhi::command::{Command, TextureTarget};
use crate::rhi::fence::Fence;
use crate::types::{
    BufferDesc, Color, ComputePsoDesc, DeviceCapabilities, Format, GraphicsPsoDesc, QueueType,
    ShaderDesc, TextureDesc,
};

// ============================================================================
// Configuration & Statistics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimelineMode {
    #[default]
    Immediate,
    Deferred,
}

/// Counters of executed work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullStats {
    pub submissions: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub barriers: u64,
    pub markers: u64,
    pub clears: u64,
    pub copies: u64,
    pub timestamps: u64,
}

// ============================================================================
// Native objects
// ============================================================================

#[derive(Debug)]
pub struct NullBuffer {
    pub desc: BufferDesc,
    data: Mutex<Vec<u8>>,
}

impl NullBuffer {
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

#[derive(Debug)]
pub struct NullTexture {
    pub desc: TextureDesc,
    /// One byte store per (mip, slice).
    subresources: Mutex<Vec<Vec<u8>>>,
}

impl NullTexture {
    /// Contents of subresource `index` (see [`TextureDesc::subresource_index`]).
    #[must_use]
    pub fn subresource(&self, index: u32) -> Option<Vec<u8>> {
        self.subresources.lock().get(index as usize).cloned()
    }
}

#[derive(Debug)]
pub struct NullShader {
    pub desc: ShaderDesc,
    pub source_len: usize,
}

#[derive(Debug)]
pub struct NullGraphicsPipeline {
    pub name: String,
}

#[derive(Debug)]
pub struct NullComputePipeline {
    pub name: String,
}

#[derive(Debug)]
pub struct NullQueryHeap {
    timestamps: Mutex<Vec<Option<u64>>>,
}

// ============================================================================
// Timeline
// ============================================================================

#[derive(Debug)]
enum TimelineOp {
    Execute(Vec<Command<NullBackend>>),
    Signal(Arc<Fence>, u64),
    Wait(Arc<Fence>, u64),
}

#[derive(Debug, Default)]
struct Timeline {
    queues: [VecDeque<TimelineOp>; QueueType::COUNT],
}

#[derive(Debug)]
struct NullInner {
    mode: TimelineMode,
    timeline: Mutex<Timeline>,
    stats: Mutex<NullStats>,
    epoch: Instant,
}

/// Software backend. Cloning shares the same timeline.
#[derive(Debug, Clone)]
pub struct NullBackend {
    inner: Arc<NullInner>,
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(TimelineMode::Immediate)
    }
}

impl NullBackend {
    #[must_use]
    pub fn new(mode: TimelineMode) -> Self {
        Self {
            inner: Arc::new(NullInner {
                mode,
                timeline: Mutex::new(Timeline::default()),
                stats: Mutex::new(NullStats::default()),
                epoch: Instant::now(),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn mode(&self) -> TimelineMode {
        self.inner.mode
    }

    #[must_use]
    pub fn stats(&self) -> NullStats {
        *self.inner.stats.lock()
    }

    /// Operations queued and not yet retired, across all queues.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.inner.timeline.lock().queues.iter().map(VecDeque::len).sum()
    }

    /// Drains every queue as far as cross-queue waits allow.
    pub fn retire_all(&self) {
        self.pump();
    }

    fn pump(&self) {
        let mut timeline = self.inner.timeline.lock();
        loop {
            let mut progressed = false;
            for queue in &mut timeline.queues {
                while let Some(op) = queue.front() {
                    if let TimelineOp::Wait(fence, value) = op
                        && !fence.is_complete(*value)
                    {
                        break;
                    }
                    let Some(op) = queue.pop_front() else {
                        break;
                    };
                    progressed = true;
                    match op {
                        TimelineOp::Execute(commands) => self.run(&commands),
                        TimelineOp::Signal(fence, value) => fence.signal(value),
                        TimelineOp::Wait(..) => {}
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    fn enqueue(&self, queue_type: QueueType, op: TimelineOp) {
        self.inner.timeline.lock().queues[queue_type.index()].push_back(op);
        if self.inner.mode == TimelineMode::Immediate {
            self.pump();
        }
    }

    fn timestamp(&self) -> u64 {
        self.inner.epoch.elapsed().as_nanos() as u64
    }

    // ------------------------------------------------------------------------
    // Command execution
    // ------------------------------------------------------------------------

    fn run(&self, commands: &[Command<Self>]) {
        let mut stats = NullStats::default();
        for command in commands {
            match command {
                Command::BeginMarker(_) | Command::EndMarker => stats.markers += 1,
                Command::Barriers(barriers) => stats.barriers += barriers.len() as u64,
                Command::ClearColor { target, color } => {
                    clear_color(target, *color);
                    stats.clears += 1;
                }
                Command::ClearDepthStencil {
                    target,
                    depth,
                    stencil,
                } => {
                    clear_depth_stencil(target, *depth, *stencil);
                    stats.clears += 1;
                }
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    copy_buffer(src, *src_offset, dst, *dst_offset, *size);
                    stats.copies += 1;
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
                    copy_buffer_to_texture(
                        src,
                        *src_offset,
                        *bytes_per_row,
                        *rows_per_image,
                        dst,
                        (*width, *height, *depth),
                    );
                    stats.copies += 1;
                }
                Command::Draw { .. } | Command::DrawIndexed { .. } => stats.draws += 1,
                Command::Dispatch { .. } | Command::DispatchIndirect { .. } => stats.dispatches += 1,
                Command::WriteTimestamp { heap, index } => {
                    if let Some(slot) = heap.timestamps.lock().get_mut(*index as usize) {
                        *slot = Some(self.timestamp());
                    }
                    stats.timestamps += 1;
                }
                Command::SetRenderTargets { .. }
                | Command::SetGraphicsPipeline(_)
                | Command::SetComputePipeline(_)
                | Command::SetViewports(_)
                | Command::SetScissors(_)
                | Command::PushConstants { .. }
                | Command::BindBuffer { .. }
                | Command::BindVertexBuffer { .. }
                | Command::BindIndexBuffer { .. }
                | Command::BindDescriptorTable { .. }
                | Command::BindBindlessTable { .. } => {}
            }
        }

        let mut total = self.inner.stats.lock();
        total.draws += stats.draws;
        total.dispatches += stats.dispatches;
        total.barriers += stats.barriers;
        total.markers += stats.markers;
        total.clears += stats.clears;
        total.copies += stats.copies;
        total.timestamps += stats.timestamps;
    }
}

fn subresource_size(desc: &TextureDesc, mip: u32) -> usize {
    let (width, height, depth) = desc.mip_extent(mip);
    (width * height * depth * desc.format.bytes_per_pixel()) as usize
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Encodes one texel of `color` in `format`.
fn encode_color(format: Format, color: Color) -> Vec<u8> {
    let Color { r, g, b, a } = color;
    match format {
        Format::R8Unorm => vec![unorm8(r)],
        Format::Rg8Unorm => vec![unorm8(r), unorm8(g)],
        Format::Rgba8Unorm | Format::Rgba8UnormSrgb => vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)],
        Format::Bgra8Unorm => vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)],
        Format::R16Uint => (r as u16).to_le_bytes().to_vec(),
        Format::R16Float => f16::from_f32(r).to_le_bytes().to_vec(),
        Format::Rg16Float => [r, g].iter().flat_map(|c| f16::from_f32(*c).to_le_bytes()).collect(),
        Format::Rgba16Float => [r, g, b, a]
            .iter()
            .flat_map(|c| f16::from_f32(*c).to_le_bytes())
            .collect(),
        Format::R32Uint => (r as u32).to_le_bytes().to_vec(),
        Format::R32Float => r.to_le_bytes().to_vec(),
        Format::Rg32Float => [r, g].iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::Rgb32Float => [r, g, b].iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::Rgba32Float => [r, g, b, a].iter().flat_map(|c| c.to_le_bytes()).collect(),
        Format::Unknown
        | Format::D16Unorm
        | Format::D32Float
        | Format::D24UnormS8Uint
        | Format::D32FloatS8Uint => Vec::new(),
    }
}

fn clear_color(target: &TextureTarget<NullBackend>, color: Color) {
    let texel = encode_color(target.format, color);
    if texel.is_empty() {
        log::debug!("Null backend: color clear of {:?} ignored", target.format);
        return;
    }
    let index = target.texture.desc.subresource_index(target.mip, target.slice) as usize;
    if let Some(bytes) = target.texture.subresources.lock().get_mut(index) {
        for chunk in bytes.chunks_exact_mut(texel.len()) {
            chunk.copy_from_slice(&texel);
        }
    }
}

fn clear_depth_stencil(target: &TextureTarget<NullBackend>, depth: Option<f32>, stencil: Option<u32>) {
    let index = target.texture.desc.subresource_index(target.mip, target.slice) as usize;
    let mut subresources = target.texture.subresources.lock();
    let Some(bytes) = subresources.get_mut(index) else {
        return;
    };

    match target.format {
        Format::D16Unorm => {
            if let Some(depth) = depth {
                let value = ((depth.clamp(0.0, 1.0) * 65535.0).round() as u16).to_le_bytes();
                bytes.chunks_exact_mut(2).for_each(|t| t.copy_from_slice(&value));
            }
        }
        Format::D32Float => {
            if let Some(depth) = depth {
                let value = depth.to_le_bytes();
                bytes.chunks_exact_mut(4).for_each(|t| t.copy_from_slice(&value));
            }
        }
        Format::D24UnormS8Uint => {
            for texel in bytes.chunks_exact_mut(4) {
                let mut packed = u32::from_le_bytes([texel[0], texel[1], texel[2], texel[3]]);
                if let Some(depth) = depth {
                    let d = (depth.clamp(0.0, 1.0) * 16_777_215.0).round() as u32;
                    packed = (packed & 0xFF00_0000) | d;
                }
                if let Some(stencil) = stencil {
                    packed = (packed & 0x00FF_FFFF) | ((stencil & 0xFF) << 24);
                }
                texel.copy_from_slice(&packed.to_le_bytes());
            }
        }
        Format::D32FloatS8Uint => {
            for texel in bytes.chunks_exact_mut(8) {
                if let Some(depth) = depth {
                    texel[..4].copy_from_slice(&depth.to_le_bytes());
                }
                if let Some(stencil) = stencil {
                    texel[4..].copy_from_slice(&(stencil & 0xFF).to_le_bytes());
                }
            }
        }
        other => log::debug!("Null backend: depth clear of {other:?} ignored"),
    }
}

fn copy_buffer(src: &NullBuffer, src_offset: u64, dst: &NullBuffer, dst_offset: u64, size: u64) {
    let (src_offset, dst_offset, size) = (src_offset as usize, dst_offset as usize, size as usize);
    if std::ptr::eq(src, dst) {
        let mut data = dst.data.lock();
        let fits = |offset: usize| offset.checked_add(size).is_some_and(|end| end <= data.len());
        if fits(src_offset) && fits(dst_offset) {
            data.copy_within(src_offset..src_offset + size, dst_offset);
        } else {
            log::error!("Null backend: buffer copy of {size} bytes out of range");
        }
        return;
    }

    let source = src.data.lock();
    let mut dest = dst.data.lock();
    let range = |offset: usize| offset..offset.saturating_add(size);
    match (source.get(range(src_offset)), dest.get_mut(range(dst_offset))) {
        (Some(from), Some(to)) => to.copy_from_slice(from),
        _ => log::error!("Null backend: buffer copy of {size} bytes out of range"),
    }
}

fn copy_buffer_to_texture(
    src: &NullBuffer,
    src_offset: u64,
    bytes_per_row: u32,
    rows_per_image: u32,
    dst: &TextureTarget<NullBackend>,
    (width, height, depth): (u32, u32, u32),
) {
    let texture = &dst.texture;
    let row_bytes = (width * texture.desc.format.bytes_per_pixel()) as usize;
    let index = texture.desc.subresource_index(dst.mip, dst.slice) as usize;

    let source = src.data.lock();
    let mut subresources = texture.subresources.lock();
    let Some(dest) = subresources.get_mut(index) else {
        return;
    };

    for z in 0..depth {
        for y in 0..height {
            let row = (z * rows_per_image + y) as usize;
            let src_start = src_offset as usize + row * bytes_per_row as usize;
            let dst_start = (z * height + y) as usize * row_bytes;
            if let (Some(from), Some(to)) = (
                source.get(src_start..src_start + row_bytes),
                dest.get_mut(dst_start..dst_start + row_bytes),
            ) {
                to.copy_from_slice(from);
            }
        }
    }
}

// ============================================================================
// Queue
// ============================================================================

#[derive(Debug)]
pub struct NullQueue {
    backend: NullBackend,
    queue_type: QueueType,
}

impl NativeQueue<NullBackend> for NullQueue {
    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn submit(&self, streams: &[&[Command<NullBackend>]]) -> Result<()> {
        let commands: Vec<_> = streams.iter().flat_map(|s| s.iter().cloned()).collect();
        self.backend.inner.stats.lock().submissions += 1;
        self.backend.enqueue(self.queue_type, TimelineOp::Execute(commands));
        Ok(())
    }

    fn signal(&self, fence: &Arc<Fence>, value: u64) {
        self.backend
            .enqueue(self.queue_type, TimelineOp::Signal(Arc::clone(fence), value));
    }

    fn wait(&self, fence: &Arc<Fence>, value: u64) {
        self.backend
            .enqueue(self.queue_type, TimelineOp::Wait(Arc::clone(fence), value));
    }

    fn poll(&self, block: bool) {
        if block || self.backend.inner.mode == TimelineMode::Immediate {
            self.backend.pump();
        }
    }
}

// ============================================================================
// Backend
// ============================================================================

impl Backend for NullBackend {
    type Buffer = NullBuffer;
    type Texture = NullTexture;
    type Shader = NullShader;
    type GraphicsPipeline = NullGraphicsPipeline;
    type ComputePipeline = NullComputePipeline;
    type QueryHeap = NullQueryHeap;
    type Queue = NullQueue;

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: "Null Device".to_owned(),
            backend: "Null".to_owned(),
            device_type: format!("{:?}", self.inner.mode),
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::TIMESTAMP_QUERY
            | DeviceCapabilities::PUSH_CONSTANTS
            | DeviceCapabilities::BINDLESS
            | DeviceCapabilities::INDIRECT_DRAW
    }

    fn create_queue(&self, queue_type: QueueType) -> Result<NullQueue> {
        Ok(NullQueue {
            backend: self.clone(),
            queue_type,
        })
    }

    fn create_buffer(&self, desc: &BufferDesc) -> Result<NullBuffer> {
        let size = usize::try_from(desc.size).map_err(|_| RhiError::ResourceCreationFailed {
            kind: "buffer",
            name: desc.debug_name.clone(),
            reason: format!("{} bytes exceed host memory", desc.size),
        })?;
        Ok(NullBuffer {
            desc: desc.clone(),
            data: Mutex::new(vec![0; size]),
        })
    }

    fn create_texture(&self, desc: &TextureDesc) -> Result<NullTexture> {
        if desc.format.bytes_per_pixel() == 0 {
            return Err(RhiError::UnsupportedFormat {
                format: desc.format,
                usage: "texture",
            });
        }
        let mips = desc.mip_levels.max(1);
        let subresources = (0..desc.subresource_count())
            .map(|i| vec![0; subresource_size(desc, i % mips)])
            .collect();
        Ok(NullTexture {
            desc: desc.clone(),
            subresources: Mutex::new(subresources),
        })
    }

    fn create_shader(&self, desc: &ShaderDesc, source: &[u8]) -> Result<NullShader> {
        if source.is_empty() {
            return Err(RhiError::ShaderSource {
                name: desc.debug_name.clone(),
                reason: "empty source".to_owned(),
            });
        }
        Ok(NullShader {
            desc: desc.clone(),
            source_len: source.len(),
        })
    }

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPsoDesc,
        _vertex: &NullShader,
        _pixel: Option<&NullShader>,
    ) -> Result<NullGraphicsPipeline> {
        Ok(NullGraphicsPipeline {
            name: desc.debug_name.clone(),
        })
    }

    fn create_compute_pipeline(&self, desc: &ComputePsoDesc, _shader: &NullShader) -> Result<NullComputePipeline> {
        Ok(NullComputePipeline {
            name: desc.debug_name.clone(),
        })
    }

    fn create_query_heap(&self, capacity: u32) -> Result<NullQueryHeap> {
        Ok(NullQueryHeap {
            timestamps: Mutex::new(vec![None; capacity as usize]),
        })
    }

    fn write_buffer(&self, buffer: &NullBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut bytes = buffer.data.lock();
        let start = offset as usize;
        let dest = bytes
            .get_mut(start..start.saturating_add(data.len()))
            .ok_or_else(|| RhiError::BufferMapFailed(format!("write of {} bytes at {offset} out of range", data.len())))?;
        dest.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: &NullBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
        let bytes = buffer.data.lock();
        let start = offset as usize;
        let source = bytes
            .get(start..start.saturating_add(out.len()))
            .ok_or_else(|| RhiError::BufferMapFailed(format!("read of {} bytes at {offset} out of range", out.len())))?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn read_timestamp(&self, heap: &NullQueryHeap, index: u32) -> Option<u64> {
        heap.timestamps.lock().get(index as usize).copied().flatten()
    }

    fn timestamp_period(&self) -> f32 {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use smallvec::smallvec;

    use super::*;
    use crate::rhi::command::Barrier;

    fn buffer(backend: &NullBackend, size: u64) -> Arc<NullBuffer> {
        Arc::new(
            backend
                .create_buffer(&BufferDesc {
                    size,
                    ..Default::default()
                })
                .unwrap(),
        )
    }

    #[test]
    fn test_immediate_mode_executes_on_submit() {
        let backend = NullBackend::default();
        let queue = backend.create_queue(QueueType::Graphics).unwrap();
        let src = buffer(&backend, 4);
        let dst = buffer(&backend, 4);
        backend.write_buffer(&src, 0, &[1, 2, 3, 4]).unwrap();

        let commands = [Command::CopyBuffer {
            src: Arc::clone(&src),
            src_offset: 0,
            dst: Arc::clone(&dst),
            dst_offset: 0,
            size: 4,
        }];
        queue.submit(&[&commands]).unwrap();
        assert_eq!(dst.contents(), vec![1, 2, 3, 4]);
        assert_eq!(backend.stats().copies, 1);
    }

    #[test]
    fn test_deferred_mode_waits_for_retire() {
        let backend = NullBackend::new(TimelineMode::Deferred);
        let queue = backend.create_queue(QueueType::Graphics).unwrap();
        let fence = Arc::new(Fence::new());
        queue.signal(&fence, 1);
        queue.poll(false);
        assert_eq!(fence.completed_value(), 0);

        backend.retire_all();
        assert_eq!(fence.completed_value(), 1);
        assert_eq!(backend.pending_operations(), 0);
    }

    #[test]
    fn test_wait_stalls_only_its_queue() {
        let backend = NullBackend::new(TimelineMode::Deferred);
        let graphics = backend.create_queue(QueueType::Graphics).unwrap();
        let compute = backend.create_queue(QueueType::Compute).unwrap();
        let external = Arc::new(Fence::new());
        let graphics_done = Arc::new(Fence::new());
        let compute_done = Arc::new(Fence::new());

        graphics.wait(&external, 1);
        graphics.signal(&graphics_done, 1);
        compute.signal(&compute_done, 1);
        backend.retire_all();

        assert_eq!(compute_done.completed_value(), 1);
        assert_eq!(graphics_done.completed_value(), 0);

        external.signal(1);
        backend.retire_all();
        assert_eq!(graphics_done.completed_value(), 1);
    }

    #[test]
    fn test_color_clear_encodes_format() {
        let backend = NullBackend::default();
        let texture = Arc::new(
            backend
                .create_texture(&TextureDesc {
                    format: Format::Rgba16Float,
                    width: 2,
                    height: 1,
                    ..Default::default()
                })
                .unwrap(),
        );
        let queue = backend.create_queue(QueueType::Graphics).unwrap();
        let commands = [Command::ClearColor {
            target: TextureTarget {
                texture: Arc::clone(&texture),
                format: Format::Rgba16Float,
                mip: 0,
                slice: 0,
            },
            color: Color::new(1.0, 0.5, 0.0, 1.0),
        }];
        queue.submit(&[&commands]).unwrap();

        let bytes = texture.subresource(0).unwrap();
        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[0..2], &f16::from_f32(1.0).to_le_bytes());
        assert_eq!(&bytes[2..4], &f16::from_f32(0.5).to_le_bytes());
        assert_eq!(&bytes[8..10], &f16::from_f32(1.0).to_le_bytes());
    }

    #[test]
    fn test_depth_stencil_clear_preserves_other_aspect() {
        let backend = NullBackend::default();
        let texture = Arc::new(
            backend
                .create_texture(&TextureDesc {
                    format: Format::D24UnormS8Uint,
                    ..Default::default()
                })
                .unwrap(),
        );
        let target = TextureTarget {
            texture: Arc::clone(&texture),
            format: Format::D24UnormS8Uint,
            mip: 0,
            slice: 0,
        };
        let queue = backend.create_queue(QueueType::Graphics).unwrap();
        let commands = [
            Command::ClearDepthStencil {
                target: target.clone(),
                depth: Some(1.0),
                stencil: Some(7),
            },
            Command::ClearDepthStencil {
                target,
                depth: Some(0.0),
                stencil: None,
            },
            Command::Barriers(smallvec![Barrier::Memory]),
        ];
        queue.submit(&[&commands]).unwrap();

        let bytes = texture.subresource(0).unwrap();
        assert_eq!(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]), 7 << 24);
        assert_eq!(backend.stats().barriers, 1);
    }

    #[test]
    fn test_mip_chain_subresource_sizes() {
        let backend = NullBackend::default();
        let texture = backend
            .create_texture(&TextureDesc {
                width: 8,
                height: 8,
                mip_levels: 4,
                array_size: 2,
                dimension: crate::types::TextureDimension::Texture2DArray,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(texture.subresource(0).unwrap().len(), 8 * 8 * 4);
        assert_eq!(texture.subresource(3).unwrap().len(), 4);
        assert_eq!(texture.subresource(4).unwrap().len(), 8 * 8 * 4);
        assert!(texture.subresource(8).is_none());
    }
}
