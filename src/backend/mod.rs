//! Native Backend Seam
//!
//! Everything above this module is written against [`Backend`] and
//! [`NativeQueue`]. A backend owns the native objects (buffers, textures,
//! shader modules, pipelines, timestamp heaps) and turns recorded
//! [`Command`] streams into real GPU work.
//!
//! - [`null::NullBackend`]: software timeline, used headless and in tests
//! - [`wgpu_device::WgpuBackend`]: hardware through wgpu

pub mod null;
pub mod wgpu_device;

use std::fmt;
use std::sync::Arc;

use crate::errors::Result;
use crate::rhi::command::Command;
use crate::rhi::fence::Fence;
use crate::types::{
    BufferDesc, ComputePsoDesc, DeviceCapabilities, GraphicsPsoDesc, QueueType, ShaderDesc,
    TextureDesc,
};

/// Adapter identification reported at device creation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AdapterInfo {
    pub name: String,
    pub backend: String,
    pub device_type: String,
}

/// A native graphics API.
///
/// Native objects are shared through `Arc` by the device so recorded command
/// streams can keep them alive until the GPU has retired them.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    type Buffer: Send + Sync + fmt::Debug + 'static;
    type Texture: Send + Sync + fmt::Debug + 'static;
    type Shader: Send + Sync + fmt::Debug + 'static;
    type GraphicsPipeline: Send + Sync + fmt::Debug + 'static;
    type ComputePipeline: Send + Sync + fmt::Debug + 'static;
    type QueryHeap: Send + Sync + fmt::Debug + 'static;
    type Queue: NativeQueue<Self>;

    fn adapter_info(&self) -> AdapterInfo;

    fn capabilities(&self) -> DeviceCapabilities;

    fn create_queue(&self, queue_type: QueueType) -> Result<Self::Queue>;

    fn create_buffer(&self, desc: &BufferDesc) -> Result<Self::Buffer>;

    fn create_texture(&self, desc: &TextureDesc) -> Result<Self::Texture>;

    fn create_shader(&self, desc: &ShaderDesc, source: &[u8]) -> Result<Self::Shader>;

    fn create_graphics_pipeline(
        &self,
        desc: &GraphicsPsoDesc,
        vertex: &Self::Shader,
        pixel: Option<&Self::Shader>,
    ) -> Result<Self::GraphicsPipeline>;

    fn create_compute_pipeline(
        &self,
        desc: &ComputePsoDesc,
        compute: &Self::Shader,
    ) -> Result<Self::ComputePipeline>;

    /// Creates `capacity` timestamp slots.
    fn create_query_heap(&self, capacity: u32) -> Result<Self::QueryHeap>;

    /// Host write into an upload buffer. Becomes visible to work submitted afterwards.
    fn write_buffer(&self, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> Result<()>;

    /// Host read from a readback buffer. Only meaningful once the writing
    /// submission has completed.
    fn read_buffer(&self, buffer: &Self::Buffer, offset: u64, out: &mut [u8]) -> Result<()>;

    /// Raw timestamp of a completed query slot, in backend ticks.
    fn read_timestamp(&self, heap: &Self::QueryHeap, index: u32) -> Option<u64>;

    /// Nanoseconds per timestamp tick.
    fn timestamp_period(&self) -> f32;
}

/// One native submission timeline.
pub trait NativeQueue<B: Backend>: Send + Sync + fmt::Debug + 'static {
    fn queue_type(&self) -> QueueType;

    /// Submits command streams. Streams execute in order.
    fn submit(&self, streams: &[&[Command<B>]]) -> Result<()>;

    /// Signals `fence` to `value` once all previously submitted work retires.
    fn signal(&self, fence: &Arc<Fence>, value: u64);

    /// Makes later submissions on this queue wait until `fence` reaches `value`.
    fn wait(&self, fence: &Arc<Fence>, value: u64);

    /// Drives completion callbacks. With `block`, waits until the queue drains.
    fn poll(&self, block: bool);
}
