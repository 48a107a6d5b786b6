//! Graphics Device Tests
//!
//! Tests for:
//! - Deferred deletion: handles resolve until the deleting frame retires,
//!   bindless indices are recycled afterwards
//! - Frame pacing: the CPU never runs more than `frames_in_flight` ahead
//! - Submission receipts: completion, blocking waits, cross-queue ordering
//! - Resource views: binding flags, subresource views, bindless exhaustion
//! - Timer queries and mapped buffer access
//!
//! Everything runs on the null backend. `TimelineMode::Deferred` keeps GPU
//! work queued until a blocking wait, so completion order is observable.

use bytemuck::cast_slice;

use myth_rhi::backend::null::NullBuffer;
use myth_rhi::{
    BindingFlags, BufferDesc, BufferRange, CommandListDesc, DescriptorIndex, DeviceSettings,
    Format, GraphicsDevice, NullBackend, QueueType, RhiError, SubresourceType, TextureDesc,
    TextureSubresourceRange, TimelineMode, Usage,
};

fn device(mode: TimelineMode) -> GraphicsDevice<NullBackend> {
    device_with(mode, DeviceSettings::default())
}

fn device_with(mode: TimelineMode, settings: DeviceSettings) -> GraphicsDevice<NullBackend> {
    let _ = env_logger::builder().is_test(true).try_init();
    GraphicsDevice::new(NullBackend::new(mode), settings).unwrap()
}

fn list_desc(queue_type: QueueType, name: &str) -> CommandListDesc {
    CommandListDesc {
        queue_type,
        debug_name: name.to_string(),
    }
}

fn readback_buffer(device: &GraphicsDevice<NullBackend>, size: u64) -> myth_rhi::BufferHandle {
    device
        .create_buffer(&BufferDesc {
            usage: Usage::ReadBack,
            size,
            debug_name: "Readback".to_string(),
            ..Default::default()
        })
        .unwrap()
}

fn default_buffer(device: &GraphicsDevice<NullBackend>, size: u64) -> myth_rhi::BufferHandle {
    device
        .create_buffer(&BufferDesc {
            size,
            debug_name: "Storage".to_string(),
            ..Default::default()
        })
        .unwrap()
}

// ============================================================================
// Deferred Deletion
// ============================================================================

#[test]
fn deleted_texture_resolves_until_its_frame_retires() {
    let device = device(TimelineMode::Immediate);
    let texture = device.create_texture(&TextureDesc::default()).unwrap();

    device.delete_texture(texture);
    assert_eq!(device.pending_deletions(), 1);
    assert!(device.get_texture_desc(texture).is_some());

    // Frame 1 has been signalled but not yet exceeded.
    device.present();
    assert_eq!(device.pending_deletions(), 1);
    assert!(device.get_texture_desc(texture).is_some());

    device.present();
    assert_eq!(device.pending_deletions(), 0);
    assert!(device.get_texture_desc(texture).is_none());
}

#[test]
fn bindless_index_reused_after_deletion_retires() {
    let device = device(TimelineMode::Immediate);
    let first = device.create_texture(&TextureDesc::default()).unwrap();
    let index = device.get_descriptor_index(first);
    assert!(index.is_valid());

    device.delete_texture(first);

    // While the deletion is pending the index is still taken.
    let blocker = device.create_texture(&TextureDesc::default()).unwrap();
    assert_ne!(device.get_descriptor_index(blocker), index);

    device.present();
    device.present();
    assert_eq!(device.bindless_allocated(), 1);

    let reused = device.create_texture(&TextureDesc::default()).unwrap();
    assert_eq!(device.get_descriptor_index(reused), index);
    assert_ne!(reused, first);
}

#[test]
fn deferred_timeline_holds_deletion_until_frames_in_flight_elapse() {
    let device = device(TimelineMode::Deferred);
    let frames_in_flight = device.settings().frames_in_flight;
    let buffer = default_buffer(&device, 256);
    device.delete_buffer(buffer);

    // The GPU lags: no frame has completed, nothing may be destroyed.
    for _ in 1..frames_in_flight {
        device.present();
        assert_eq!(device.completed_frame(), 0);
        assert_eq!(device.pending_deletions(), 1);
    }

    // This present has to wait for the oldest frame, which retires the deletion.
    device.present();
    assert!(device.completed_frame() >= 1);
    assert_eq!(device.pending_deletions(), 0);
    assert!(device.get_buffer_desc(buffer).is_none());
}

#[test]
fn deleting_a_stale_handle_is_harmless() {
    let device = device(TimelineMode::Immediate);
    let texture = device.create_texture(&TextureDesc::default()).unwrap();
    device.delete_texture(texture);
    device.delete_texture(texture);

    device.present();
    device.present();
    assert_eq!(device.pending_deletions(), 0);
    assert_eq!(device.bindless_allocated(), 0);
}

#[test]
fn wait_for_idle_flushes_without_advancing_the_frame() {
    let device = device(TimelineMode::Deferred);
    let texture = device.create_texture(&TextureDesc::default()).unwrap();
    let buffer = default_buffer(&device, 64);
    device.delete_texture(texture);
    device.delete_buffer(buffer);

    let frame = device.frame_count();
    device.wait_for_idle();

    assert_eq!(device.frame_count(), frame);
    assert_eq!(device.pending_deletions(), 0);
    assert!(device.get_texture_desc(texture).is_none());
    assert!(device.get_buffer_desc(buffer).is_none());
}

#[test]
fn wait_for_idle_retires_deletions_like_presented_frames() {
    let presented = device(TimelineMode::Deferred);
    let idled = device(TimelineMode::Deferred);

    let mut indices = Vec::new();
    for device in [&presented, &idled] {
        let texture = device.create_texture(&TextureDesc::default()).unwrap();
        indices.push(device.get_descriptor_index(texture));
        device.delete_texture(texture);
    }

    for _ in 0..=presented.settings().frames_in_flight {
        presented.present();
    }
    idled.wait_for_idle();

    assert_eq!(idled.frame_count(), 1);
    assert!(presented.frame_count() > idled.frame_count());
    for (device, index) in [&presented, &idled].into_iter().zip(indices) {
        assert_eq!(device.pending_deletions(), 0);
        assert_eq!(device.bindless_allocated(), 0);
        let reused = device.create_texture(&TextureDesc::default()).unwrap();
        assert_eq!(device.get_descriptor_index(reused), index);
    }

    // Later frames pace normally after an idle flush.
    idled.present();
    assert_eq!(idled.frame_count(), 2);
}

#[test]
fn dropping_the_device_drains_the_gpu() {
    let backend = NullBackend::new(TimelineMode::Deferred);
    let device = GraphicsDevice::new(backend.clone(), DeviceSettings::default()).unwrap();

    let mut list = device.create_command_list(&list_desc(QueueType::Graphics, "Shutdown"));
    list.open();
    list.dispatch(1, 1, 1);
    list.close();
    device.execute(&mut list).unwrap();

    let texture = device.create_texture(&TextureDesc::default()).unwrap();
    device.delete_texture(texture);
    assert!(backend.pending_operations() > 0);

    drop(list);
    drop(device);
    assert_eq!(backend.pending_operations(), 0);
    assert_eq!(backend.stats().dispatches, 1);
}

// ============================================================================
// Frame Pacing
// ============================================================================

#[test]
fn present_bounds_cpu_lead_to_frames_in_flight() {
    let settings = DeviceSettings {
        frames_in_flight: 2,
        ..Default::default()
    };
    let device = device_with(TimelineMode::Deferred, settings);

    for _ in 0..8 {
        device.present();
        assert!(device.frame_count() - device.completed_frame() <= 2);
    }
    assert_eq!(device.frame_count(), 9);
}

#[test]
fn immediate_timeline_completes_every_frame() {
    let device = device(TimelineMode::Immediate);
    for frame in 1..=4 {
        device.present();
        assert_eq!(device.completed_frame(), frame);
    }
}

// ============================================================================
// Submission Receipts
// ============================================================================

#[test]
fn receipt_completes_after_wait() -> anyhow::Result<()> {
    let device = device(TimelineMode::Deferred);
    let mut list = device.create_command_list(&list_desc(QueueType::Compute, "Async Compute"));
    list.open();
    list.dispatch(8, 8, 1);
    list.close();

    let receipt = device.execute(&mut list)?;
    assert_eq!(receipt.queue, QueueType::Compute);
    assert_eq!(receipt.fence_value, 1);
    assert!(!device.is_complete(receipt));
    assert_eq!(device.inflight_submissions(), 1);

    device.wait_for(receipt);
    assert!(device.is_complete(receipt));

    device.run_garbage_collection();
    assert_eq!(device.inflight_submissions(), 0);
    Ok(())
}

#[test]
fn blocking_execute_returns_a_completed_receipt() {
    let device = device(TimelineMode::Deferred);
    let mut list = device.create_command_list(&list_desc(QueueType::Graphics, "Blocking"));
    list.open();
    list.draw(3, 1, 0, 0);
    list.close();

    let receipt = device
        .execute_command_lists(&mut [&mut list], true, QueueType::Graphics)
        .unwrap();
    assert!(device.is_complete(receipt));
    assert_eq!(device.inflight_submissions(), 0);
}

#[test]
fn batched_lists_share_one_fence_value() {
    let device = device(TimelineMode::Immediate);
    let mut a = device.create_command_list(&list_desc(QueueType::Graphics, "A"));
    let mut b = device.create_command_list(&list_desc(QueueType::Graphics, "B"));
    for list in [&mut a, &mut b] {
        list.open();
        list.draw(3, 1, 0, 0);
        list.close();
    }

    let receipt = device
        .execute_command_lists(&mut [&mut a, &mut b], false, QueueType::Graphics)
        .unwrap();
    assert_eq!(receipt.fence_value, 1);
    assert_eq!(device.last_signalled_fence(QueueType::Graphics), 1);
    assert_eq!(device.backend().stats().submissions, 1);
    assert_eq!(device.backend().stats().draws, 2);
}

#[test]
fn cross_queue_wait_orders_copy_before_graphics() {
    let device = device(TimelineMode::Deferred);
    let payload: [u32; 4] = [1, 2, 3, 4];
    let storage = default_buffer(&device, 16);
    let readback = readback_buffer(&device, 16);

    let mut upload = device.create_command_list(&list_desc(QueueType::Copy, "Upload"));
    upload.open();
    upload.write_buffer_typed(storage, &payload, 0).unwrap();
    upload.close();
    let uploaded = device.execute(&mut upload).unwrap();

    device.queue_wait_for_command_list(QueueType::Graphics, uploaded);

    let mut consume = device.create_command_list(&list_desc(QueueType::Graphics, "Consume"));
    consume.open();
    consume.copy_buffer(readback, 0, storage, 0, 16);
    consume.close();
    let consumed = device.execute(&mut consume).unwrap();

    assert!(!device.is_complete(uploaded));
    assert!(!device.is_complete(consumed));

    // The graphics timeline drains first and must stall on the copy fence.
    device.backend().retire_all();
    assert!(device.is_complete(uploaded));
    assert!(device.is_complete(consumed));

    let mut out = [0u8; 16];
    device.read_buffer_mapped(readback, 0, &mut out).unwrap();
    assert_eq!(&out[..], cast_slice::<u32, u8>(&payload));
}

#[test]
fn same_queue_wait_is_a_no_op() {
    let device = device(TimelineMode::Deferred);
    let mut list = device.create_command_list(&list_desc(QueueType::Graphics, "Self"));
    list.open();
    list.close();
    let receipt = device.execute(&mut list).unwrap();

    let before = device.backend().pending_operations();
    device.queue_wait_for_command_list(QueueType::Graphics, receipt);
    assert_eq!(device.backend().pending_operations(), before);
}

// ============================================================================
// Resource Views
// ============================================================================

#[test]
fn render_target_texture_has_no_bindless_index_without_srv() {
    let device = device(TimelineMode::Immediate);
    let target = device
        .create_texture(&TextureDesc {
            binding_flags: BindingFlags::RENDER_TARGET,
            width: 64,
            height: 64,
            debug_name: "Target".to_string(),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(device.get_descriptor_index(target), DescriptorIndex::INVALID);
    assert_eq!(device.bindless_allocated(), 0);
}

#[test]
fn texture_subresource_views_get_their_own_index() {
    let device = device(TimelineMode::Immediate);
    let texture = device
        .create_texture(&TextureDesc {
            width: 256,
            height: 256,
            mip_levels: 4,
            debug_name: "Mipped".to_string(),
            ..Default::default()
        })
        .unwrap();

    let mip1 = device
        .create_texture_subresource(texture, SubresourceType::Srv, TextureSubresourceRange::single(1, 0))
        .unwrap();
    let mip2 = device
        .create_texture_subresource(texture, SubresourceType::Srv, TextureSubresourceRange::single(2, 0))
        .unwrap();
    assert_eq!((mip1, mip2), (0, 1));

    let main = device.get_descriptor_index(texture);
    let first = device.get_texture_view_index(texture, SubresourceType::Srv, Some(mip1));
    let second = device.get_texture_view_index(texture, SubresourceType::Srv, Some(mip2));
    assert!(first.is_valid() && second.is_valid());
    assert_ne!(first, main);
    assert_ne!(first, second);
    assert_eq!(device.bindless_allocated(), 3);

    // Subresource views die with the texture.
    device.delete_texture(texture);
    device.wait_for_idle();
    assert_eq!(device.bindless_allocated(), 0);
}

#[test]
fn out_of_range_subresources_are_rejected() {
    let device = device(TimelineMode::Immediate);
    let texture = device.create_texture(&TextureDesc::default()).unwrap();
    let result = device.create_texture_subresource(
        texture,
        SubresourceType::Srv,
        TextureSubresourceRange::single(3, 0),
    );
    assert!(matches!(result, Err(RhiError::InvalidSubresource { .. })));

    let buffer = default_buffer(&device, 128);
    let past_end = device.create_buffer_subresource(
        buffer,
        SubresourceType::Srv,
        BufferRange { offset: 64, size: 128 },
    );
    assert!(matches!(past_end, Err(RhiError::InvalidSubresource { .. })));

    let wrong_kind = device.create_buffer_subresource(
        buffer,
        SubresourceType::Rtv,
        BufferRange { offset: 0, size: 64 },
    );
    assert!(matches!(wrong_kind, Err(RhiError::InvalidDescriptor { .. })));
}

#[test]
fn bindless_buffer_gets_srv_and_uav_indices() {
    let device = device(TimelineMode::Immediate);
    let buffer = device
        .create_buffer(&BufferDesc {
            size: 1024,
            stride: 16,
            allow_unordered_access: true,
            create_bindless: true,
            debug_name: "Particles".to_string(),
            ..Default::default()
        })
        .unwrap();

    let srv = device.get_buffer_descriptor_index(buffer);
    let uav = device.get_buffer_view_index(buffer, SubresourceType::Uav, None);
    assert!(srv.is_valid() && uav.is_valid());
    assert_ne!(srv, uav);

    let half = device
        .create_buffer_subresource(buffer, SubresourceType::Srv, BufferRange { offset: 512, size: 512 })
        .unwrap();
    assert!(device.get_buffer_view_index(buffer, SubresourceType::Srv, Some(half)).is_valid());
}

#[test]
fn bindless_exhaustion_yields_invalid_index_not_error() {
    let settings = DeviceSettings {
        bindless_capacity: 2,
        ..Default::default()
    };
    let device = device_with(TimelineMode::Immediate, settings);

    let a = device.create_texture(&TextureDesc::default()).unwrap();
    let b = device.create_texture(&TextureDesc::default()).unwrap();
    let c = device.create_texture(&TextureDesc::default()).unwrap();

    assert!(device.get_descriptor_index(a).is_valid());
    assert!(device.get_descriptor_index(b).is_valid());
    assert_eq!(device.get_descriptor_index(c), DescriptorIndex::INVALID);
    assert!(device.get_texture_desc(c).is_some());
}

#[test]
fn typed_buffer_helpers_fill_in_strides() {
    let device = device(TimelineMode::Immediate);
    let indices = device.create_index_buffer(Format::R16Uint, 36, "Cube Indices").unwrap();
    let desc = device.get_buffer_desc(indices).unwrap();
    assert_eq!((desc.stride, desc.size), (2, 72));
    assert!(desc.binding.contains(BindingFlags::INDEX_BUFFER));

    let vertices = device.create_vertex_buffer(32, 24, "Cube Vertices").unwrap();
    assert_eq!(device.get_buffer_desc(vertices).unwrap().size, 768);

    assert!(matches!(
        device.create_index_buffer(Format::R8Unorm, 4, "Bad"),
        Err(RhiError::UnsupportedFormat { .. })
    ));
}

// ============================================================================
// Mapped Access
// ============================================================================

#[test]
fn upload_buffer_write_is_host_visible() {
    let device = device(TimelineMode::Immediate);
    let upload = device
        .create_buffer(&BufferDesc {
            usage: Usage::Upload,
            size: 8,
            debug_name: "Constants".to_string(),
            ..Default::default()
        })
        .unwrap();

    device.write_buffer_mapped(upload, 4, &[9, 8, 7, 6]).unwrap();
    let native: std::sync::Arc<NullBuffer> = device.native_buffer(upload).unwrap();
    assert_eq!(native.contents(), vec![0, 0, 0, 0, 9, 8, 7, 6]);

    let mut out = [0u8; 4];
    assert!(matches!(
        device.read_buffer_mapped(upload, 0, &mut out),
        Err(RhiError::BufferMapFailed(_))
    ));
}

#[test]
fn mapped_access_rejects_offsets_that_overflow() {
    let device = device(TimelineMode::Immediate);
    let upload = device
        .create_buffer(&BufferDesc {
            usage: Usage::Upload,
            size: 16,
            ..Default::default()
        })
        .unwrap();
    let readback = readback_buffer(&device, 16);

    assert!(matches!(
        device.write_buffer_mapped(upload, u64::MAX - 1, &[1, 2, 3, 4]),
        Err(RhiError::BufferMapFailed(_))
    ));
    let mut out = [0u8; 4];
    assert!(matches!(
        device.read_buffer_mapped(readback, u64::MAX, &mut out),
        Err(RhiError::BufferMapFailed(_))
    ));
}

#[test]
fn buffer_subresource_range_that_overflows_is_rejected() {
    let device = device(TimelineMode::Immediate);
    let buffer = default_buffer(&device, 256);
    let range = BufferRange {
        offset: u64::MAX - 8,
        size: 64,
    };
    assert!(matches!(
        device.create_buffer_subresource(buffer, SubresourceType::Srv, range),
        Err(RhiError::InvalidSubresource { kind: "buffer", .. })
    ));
}

// ============================================================================
// Timer Queries
// ============================================================================

#[test]
fn timer_query_resolves_after_submission() {
    let device = device(TimelineMode::Deferred);
    let query = device.create_timer_query().unwrap();

    let mut list = device.create_command_list(&list_desc(QueueType::Graphics, "Timed"));
    list.open();
    list.begin_timer_query(query);
    list.dispatch(64, 1, 1);
    list.end_timer_query(query);
    list.close();
    let receipt = device.execute(&mut list).unwrap();

    assert!(!device.poll_timer_query(query));
    assert!(device.get_timer_query_time(query).is_none());

    device.wait_for(receipt);
    assert!(device.poll_timer_query(query));
    assert!(device.get_timer_query_time(query).is_some());
    assert_eq!(device.backend().stats().timestamps, 2);

    device.reset_timer_query(query);
    assert!(device.get_timer_query_time(query).is_none());
}

#[test]
fn unsubmitted_timer_query_never_resolves() {
    let device = device(TimelineMode::Immediate);
    let query = device.create_timer_query().unwrap();
    device.present();
    assert!(!device.poll_timer_query(query));

    device.delete_timer_query(query);
    device.wait_for_idle();
    assert!(device.get_timer_query_time(query).is_none());
}

#[test]
fn timer_query_capacity_is_half_the_heap() {
    let settings = DeviceSettings {
        timestamp_query_capacity: 4,
        ..Default::default()
    };
    let device = device_with(TimelineMode::Immediate, settings);
    let first = device.create_timer_query().unwrap();
    device.create_timer_query().unwrap();
    assert!(matches!(
        device.create_timer_query(),
        Err(RhiError::QueryHeapExhausted { capacity: 4 })
    ));

    device.delete_timer_query(first);
    device.wait_for_idle();
    assert!(device.create_timer_query().is_ok());
}
