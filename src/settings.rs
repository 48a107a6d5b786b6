//! Device Settings
//!
//! Construction-time configuration for [`GraphicsDevice`](crate::GraphicsDevice)
//! and [`WgpuBackend`](crate::WgpuBackend).
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use myth_rhi::{DeviceSettings, GraphicsDevice, NullBackend};
//!
//! // Two frames in flight, 4 MiB staging pages
//! let settings = DeviceSettings {
//!     frames_in_flight: 2,
//!     upload_page_size: 4 * 1024 * 1024,
//!     ..Default::default()
//! };
//!
//! let device = GraphicsDevice::new(NullBackend::default(), settings)?;
//! ```

// ---------------------------------------------------------------------------
// DeviceSettings
// ---------------------------------------------------------------------------

/// Sizing of every pool and heap owned by the device.
///
/// All capacities are fixed at construction. Descriptor heaps never grow;
/// upload pages and command allocators are created lazily and then recycled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// Number of frames the CPU may run ahead of the GPU.
    ///
    /// Also the grace period of deferred deletion: a resource deleted during
    /// frame `N` is destroyed once frame `N` has fully retired.
    pub frames_in_flight: u32,

    /// Size in bytes of one upload page. Single staging allocations larger
    /// than this fail.
    pub upload_page_size: u64,

    /// Descriptors per page of each CPU-visible descriptor heap.
    pub cpu_descriptor_page_size: u32,

    /// Size of the reserved bindless range of the GPU-visible heap.
    pub bindless_capacity: u32,

    /// Size of the GPU-visible range shared by all dynamic descriptor tables.
    pub dynamic_descriptor_capacity: u32,

    /// Descriptors reserved at a time by one dynamic sub-allocator.
    pub dynamic_chunk_size: u32,

    /// Number of timestamp slots. Each timer query consumes two.
    pub timestamp_query_capacity: u32,

    /// Initial slot count of the texture and buffer pools.
    pub initial_pool_capacity: usize,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            upload_page_size: 10 * 1024 * 1024,
            cpu_descriptor_page_size: 1024,
            bindless_capacity: 65_536,
            dynamic_descriptor_capacity: 16_384,
            dynamic_chunk_size: 256,
            timestamp_query_capacity: 1024,
            initial_pool_capacity: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// WgpuSettings
// ---------------------------------------------------------------------------

/// Adapter and device configuration for [`WgpuBackend`](crate::WgpuBackend).
#[derive(Debug, Clone)]
pub struct WgpuSettings {
    /// Adapter selection preference.
    pub power_preference: wgpu::PowerPreference,
    /// Features the device must expose. Optional features such as timestamp
    /// queries are enabled on top of these when the adapter has them.
    pub required_features: wgpu::Features,
    /// Limits the device must satisfy.
    pub required_limits: wgpu::Limits,
    /// Use the software fallback adapter.
    pub force_fallback_adapter: bool,
    /// Debug label of the device.
    pub label: Option<String>,
}

impl Default for WgpuSettings {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            force_fallback_adapter: false,
            label: Some("Myth RHI Device".to_string()),
        }
    }
}
