//! Render Hardware Interface
//!
//! Backend-neutral GPU HAL: queues and fences, command recording, descriptor
//! management, staging memory and deferred resource lifetime.

pub mod bindless;
pub mod command;
pub mod command_allocator;
pub mod command_list;
pub mod deletion;
pub mod descriptor_heap;
pub mod device;
pub mod dynamic_suballocator;
pub mod fence;
pub mod queue;
pub(crate) mod resources;
pub mod timer_query;
pub mod upload_buffer;
