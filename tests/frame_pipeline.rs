//! 帧流水线的端到端测试（空后端）

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dist_render_hal::core::config::{Config, FailurePolicy, PipelineCacheConfig};
use dist_render_hal::core::{DistRenderError, GraphicsError};
use dist_render_hal::gfx::backend::DrawArgs;
use dist_render_hal::gfx::null::{NullBackend, NullPresenter};
use dist_render_hal::renderer::command::{GraphicsItem, ItemKind, ItemStatus};
use dist_render_hal::renderer::deferred::DeferredReleaseQueue;
use dist_render_hal::renderer::descriptor::{DescriptorHeapDescriptor, PersistentDescriptorHeap};
use dist_render_hal::renderer::device::Device;
use dist_render_hal::renderer::pipeline::{CullMode, GraphicsPipelineDesc, PsoCache, RenderState, RenderTargetLayout};
use dist_render_hal::renderer::resource::{Format, ResourceDescriptor, ResourceShape, ResourceUsage};
use dist_render_hal::renderer::shader::{ShaderBytecode, ShaderLibrary, ShaderStage};
use dist_render_hal::renderer::sync::FenceValue;
use dist_render_hal::renderer::view::ViewRequest;

fn device(slots: u32) -> (Arc<NullBackend>, Arc<ShaderLibrary>, Device<NullBackend, NullPresenter>) {
    let backend = Arc::new(NullBackend::new());
    let presenter = NullPresenter::new(&backend, slots, 320, 240).unwrap();
    let library = Arc::new(ShaderLibrary::new());
    let mut config = Config::default();
    config.device.backbuffer_count = slots;
    let device = Device::new(backend.clone(), presenter, library.clone(), &config).unwrap();
    (backend, library, device)
}

#[test]
fn test_persistent_heap_round_trip_capacity_four() {
    let backend = NullBackend::new();
    let heap = PersistentDescriptorHeap::new(
        &backend,
        &DescriptorHeapDescriptor::srv_cbv_uav(4),
        FailurePolicy::Propagate,
    )
    .unwrap();

    let handles: Vec<_> = (0..4).map(|_| heap.allocate().unwrap()).collect();
    assert_eq!(handles.iter().map(|h| h.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);

    match heap.allocate() {
        Err(DistRenderError::Graphics(GraphicsError::OutOfDescriptorSpace { capacity, .. })) => {
            assert_eq!(capacity, 4)
        }
        other => panic!("expected heap exhaustion, got {:?}", other),
    }

    heap.release(handles[1]).unwrap();
    assert!(heap.release(handles[1]).is_err());
    assert_eq!(heap.allocate().unwrap().index, 1);
    assert!(heap.allocate().is_err());

    // 最近释放的索引最先复用
    heap.release(handles[0]).unwrap();
    heap.release(handles[2]).unwrap();
    assert_eq!(heap.allocate().unwrap().index, 2);
    assert_eq!(heap.allocate().unwrap().index, 0);
    assert_eq!(heap.stats().used, 4);
}

#[test]
fn test_pso_cache_dedups_and_separates_cull_mode() {
    let backend = NullBackend::new();
    let queue = DeferredReleaseQueue::new(2);
    let config = PipelineCacheConfig {
        max_age_frames: 100,
        visit_count: 4,
    };
    let mut cache: PsoCache<GraphicsPipelineDesc, NullBackend> =
        PsoCache::new(&config, queue.releaser(), FailurePolicy::Propagate);

    let desc_a = GraphicsPipelineDesc {
        vertex: ShaderBytecode::new(11, vec![1u8; 4]),
        pixel: Some(ShaderBytecode::new(12, vec![2u8; 4])),
        hull: None,
        domain: None,
        geometry: None,
        render_state: RenderState::default(),
        targets: RenderTargetLayout::new(&[Format::Rgba8Unorm], None, 1).unwrap(),
    };
    let mut desc_b = desc_a.clone();
    desc_b.render_state.cull = if desc_a.render_state.cull == CullMode::None {
        CullMode::Back
    } else {
        CullMode::None
    };

    let first = cache.find_or_create(&backend, &desc_a, 0).unwrap();
    let second = cache.find_or_create(&backend, &desc_a, 1).unwrap();
    let other = cache.find_or_create(&backend, &desc_b, 1).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(cache.len(), 2);
    assert_eq!(backend.stats().pipelines_created, 2);
}

#[test]
fn test_deferred_release_runs_once_when_slot_revisited() {
    let (_backend, _, mut device) = device(2);
    let released = Arc::new(AtomicUsize::new(0));

    let slot = device.begin_frame().unwrap();
    assert_eq!(slot, 0);
    let counter = released.clone();
    device.execute_after_current_gpu_frame_done(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    device.end_and_present_frame(0).unwrap();

    // 槽位 1 不会执行槽位 0 的回调
    assert_eq!(device.begin_frame().unwrap(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 0);
    device.end_and_present_frame(0).unwrap();

    assert_eq!(device.begin_frame().unwrap(), 0);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(device.pending_releases(), 0);
    device.end_and_present_frame(0).unwrap();

    for _ in 0..4 {
        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn test_fence_values_are_monotonic() {
    let (backend, _, mut device) = device(3);
    let mut previous = FenceValue::ZERO;
    let mut slot_values = vec![FenceValue::ZERO; 3];

    for _ in 0..9 {
        let slot = device.begin_frame().unwrap();
        device.end_and_present_frame(1).unwrap();

        let signaled = device.fence().last_signaled();
        assert!(signaled > previous);
        previous = signaled;

        let recorded = device.fence().slot_value(slot);
        assert!(recorded > slot_values[slot]);
        slot_values[slot] = recorded;

        assert!(backend.stats().completed <= signaled.value());
    }
}

#[test]
fn test_reentrant_callback_runs_on_next_drain() {
    let queue = DeferredReleaseQueue::new(2);
    let order = Arc::new(AtomicUsize::new(0));

    let releaser = queue.releaser();
    let inner = order.clone();
    queue.execute_after_current_gpu_frame_done(move || {
        inner.fetch_add(1, Ordering::SeqCst);
        let nested = inner.clone();
        releaser.release(move || {
            nested.fetch_add(10, Ordering::SeqCst);
        });
    });

    assert_eq!(queue.drain(0), 1);
    assert_eq!(order.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending(0), 1);

    assert_eq!(queue.drain(0), 1);
    assert_eq!(order.load(Ordering::SeqCst), 11);
    assert_eq!(queue.pending_total(), 0);
}

#[test]
fn test_dropped_texture_survives_until_gpu_is_done() {
    let (backend, library, mut device) = device(2);
    let vs = library.register("sample.vs", ShaderStage::Vertex);
    library.cook(vs, vec![0u8; 4]).unwrap();

    let texture = device
        .create_resource(&ResourceDescriptor::new(ResourceShape::texture_2d(
            64,
            64,
            Format::Rgba8Unorm,
            1,
            ResourceUsage::SAMPLED,
        )))
        .unwrap();
    let destroyed_before = backend.stats().resources_destroyed;

    device.begin_frame().unwrap();
    device.bind_backbuffer().unwrap();
    let context = device.context();
    context.begin_items(ItemKind::Graphics).unwrap();
    let item = GraphicsItem::new(vs, DrawArgs::new(3)).bind(0, &texture, ViewRequest::srv());
    assert_eq!(context.execute_graphics_item(&item).unwrap(), ItemStatus::Executed);
    context.end_items().unwrap();
    drop(texture);
    device.end_and_present_frame(0).unwrap();

    assert_eq!(backend.stats().resources_destroyed, destroyed_before);

    device.begin_frame().unwrap();
    device.end_and_present_frame(0).unwrap();
    device.begin_frame().unwrap();
    assert_eq!(backend.stats().resources_destroyed, destroyed_before + 1);
    device.end_and_present_frame(0).unwrap();
}
