#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! # Myth RHI
//!
//! The GPU command and resource lifecycle layer of the Myth engine.
//!
//! Render passes talk to this crate through a small contract: open, record,
//! close and execute a [`CommandList`]; create and delete textures, buffers,
//! shaders and pipeline states through [`GraphicsDevice`]; embed bindless
//! [`DescriptorIndex`] values into shader-visible data; and ask whether an
//! [`ExecutionReceipt`] has completed.
//!
//! Everything here is generic over a [`Backend`]. [`WgpuBackend`] drives real
//! hardware, [`NullBackend`] is a software timeline for headless runs and tests.
//!
//! ```rust,ignore
//! use myth_rhi::{GraphicsDevice, NullBackend, DeviceSettings, QueueType, TextureDesc};
//!
//! let device = GraphicsDevice::new(NullBackend::default(), DeviceSettings::default())?;
//! let texture = device.create_texture(&TextureDesc::default())?;
//!
//! let mut list = device.create_command_list(&Default::default());
//! list.open();
//! list.clear_texture_float(texture, myth_rhi::Color::BLACK);
//! list.close();
//! device.execute(&mut list)?;
//!
//! device.delete_texture(texture);
//! device.present();
//! ```

pub mod backend;
pub mod core;
pub mod errors;
pub mod rhi;
pub mod settings;
pub mod types;

pub use crate::backend::null::{NullBackend, NullStats, TimelineMode};
pub use crate::backend::wgpu_device::WgpuBackend;
pub use crate::backend::{AdapterInfo, Backend, NativeQueue};
pub use crate::core::pool::{Handle, Pool};
pub use crate::errors::{Result, RhiError};
pub use crate::rhi::command_list::{CommandList, ScopedMarker};
pub use crate::rhi::device::GraphicsDevice;
pub use crate::settings::{DeviceSettings, WgpuSettings};
pub use crate::types::*;
