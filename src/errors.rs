//! Error Types
//!
//! This module defines the error type shared by every part of the RHI.
//!
//! # Overview
//!
//! [`RhiError`] covers the failures that are propagated to the caller:
//! - Adapter and device initialization
//! - Native resource creation (out of memory, invalid descriptors)
//! - Staging and descriptor memory exhaustion
//! - Stale or unknown handles
//!
//! Bindless index exhaustion is intentionally *not* an error: it is reported
//! through [`DescriptorIndex::INVALID`](crate::types::DescriptorIndex::INVALID).
//!
//! # Usage
//!
//! All fallible public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, RhiError>`.

use thiserror::Error;

use crate::types::Format;

/// The error type for the RHI.
#[derive(Error, Debug)]
pub enum RhiError {
    // ========================================================================
    // Initialization Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    // ========================================================================
    // Resource Creation Errors
    // ========================================================================
    /// A descriptor describes something that cannot be created.
    #[error("Invalid descriptor for {kind}: {reason}")]
    InvalidDescriptor { kind: &'static str, reason: String },

    /// The format has no native equivalent for the requested usage.
    #[error("Unsupported format {format:?} for {usage}")]
    UnsupportedFormat { format: Format, usage: &'static str },

    /// The native layer refused to create a resource.
    #[error("Failed to create {kind} '{name}': {reason}")]
    ResourceCreationFailed {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Shader source could not be turned into a module.
    #[error("Invalid shader source for '{name}': {reason}")]
    ShaderSource { name: String, reason: String },

    // ========================================================================
    // Allocation Errors
    // ========================================================================
    /// A staging allocation larger than one upload page.
    #[error("Upload allocation of {requested} bytes exceeds the page size of {page_size} bytes")]
    UploadAllocationTooLarge { requested: u64, page_size: u64 },

    /// A fixed-capacity descriptor heap has no contiguous range left.
    #[error("Descriptor heap '{heap}' exhausted: requested {requested} descriptors")]
    DescriptorHeapExhausted { heap: &'static str, requested: u32 },

    /// All timestamp query pairs are in use.
    #[error("Timer query heap exhausted (capacity {capacity})")]
    QueryHeapExhausted { capacity: u32 },

    // ========================================================================
    // Handle & Access Errors
    // ========================================================================
    /// The handle was never issued or its slot has since been released.
    #[error("Invalid or stale {0} handle")]
    InvalidHandle(&'static str),

    /// The subresource index does not name a view of the resource.
    #[error("Subresource {index} does not exist on {kind}")]
    InvalidSubresource { kind: &'static str, index: u32 },

    /// A host access to a buffer failed or targeted a non-mappable buffer.
    #[error("Buffer mapping failed: {0}")]
    BufferMapFailed(String),
}

/// Alias for `Result<T, RhiError>`.
pub type Result<T> = std::result::Result<T, RhiError>;
