//! 设备
//!
//! 设备拥有命令队列相关的全部共享状态：持久描述符堆、帧栅栏、
//! 延迟释放队列、后台缓冲以及命令列表上下文。一帧的生命周期：
//!
//! 1. `begin_frame`：取得交换链的当前索引作为帧槽，等待该帧槽上次记录的
//!    Fence 值，执行该帧槽积累的延迟释放，读取上一轮的 GPU 计时结果，
//!    然后开始录制
//! 2. 调用者通过 [`Device::context`] 录制 Item
//! 3. `end_and_present_frame`：后台缓冲转换到 Present，提交命令列表，
//!    signal 新的 Fence 值并记录到帧槽，Present，然后推进一步 PSO 淘汰
//!
//! 稳态下唯一的阻塞点是第 1 步中的 Fence 等待。

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::config::{Config, FailurePolicy};
use crate::core::error::{raise, DistRenderError, GraphicsError, Result};
use crate::core::thread::MainThread;
use crate::gfx::backend::{DefaultBindings, GpuBackend, PresentError, Presenter, ScissorRect, Viewport};
use crate::renderer::command::{CommandListContext, ContextState, ContextStats};
use crate::renderer::deferred::DeferredReleaseQueue;
use crate::renderer::descriptor::{DescriptorHeapStats, PersistentHeaps};
use crate::renderer::pipeline::PsoCacheStats;
use crate::renderer::resource::{GpuResource, ResourceDescriptor, ResourceShape, ResourceState};
use crate::renderer::shader::ShaderSource;
use crate::renderer::sync::{FenceValue, FrameFence, FrameSlotIndex};
use crate::renderer::timer::TimerResult;

/// 设备统计信息
#[derive(Debug, Clone)]
pub struct DeviceStats {
    pub frame_number: u64,
    pub last_signaled: FenceValue,
    pub completed: FenceValue,
    pub pending_releases: usize,
    pub graphics_pipelines: PsoCacheStats,
    pub compute_pipelines: PsoCacheStats,
    pub context: ContextStats,
    pub heaps: Vec<DescriptorHeapStats>,
}

fn default_bindings(shape: &ResourceShape) -> DefaultBindings {
    let width = shape.width as u32;
    DefaultBindings {
        viewport: Viewport::full(width, shape.height),
        scissor: ScissorRect::full(width, shape.height),
        blend_factor: [1.0; 4],
        stencil_ref: 0,
    }
}

/// 渲染设备
pub struct Device<B: GpuBackend, P: Presenter<B>> {
    context: CommandListContext<B>,
    backbuffers: Vec<GpuResource<B>>,
    presenter: P,
    heaps: Arc<PersistentHeaps<B>>,
    fence: FrameFence,
    deferred: DeferredReleaseQueue,
    backend: Arc<B>,
    policy: FailurePolicy,
    main_thread: MainThread,
    frame_number: u64,
    slot: FrameSlotIndex,
    in_frame: bool,
    timer_results: Vec<TimerResult>,
    shut_down: bool,
}

impl<B: GpuBackend, P: Presenter<B>> Device<B, P> {
    /// 创建设备
    ///
    /// 帧槽数量取自交换链的后台缓冲数量。
    pub fn new(backend: Arc<B>, presenter: P, shaders: Arc<dyn ShaderSource>, config: &Config) -> Result<Self> {
        config.validate()?;
        let policy = config.device.failure_policy;
        let slot_count = presenter.backbuffer_count() as usize;
        if slot_count == 0 {
            return Err(DistRenderError::Initialization(
                "swap chain has no backbuffers".to_string(),
            ));
        }
        if slot_count != config.device.backbuffer_count as usize {
            warn!(
                configured = config.device.backbuffer_count,
                actual = slot_count,
                "Swap chain backbuffer count differs from configuration"
            );
        }

        let heaps = Arc::new(PersistentHeaps::new(&*backend, &config.descriptors, policy)?);
        let deferred = DeferredReleaseQueue::new(slot_count);
        let fence = FrameFence::new(slot_count, config.device.fence_timeout(), policy);
        let shape = presenter.backbuffer_shape();

        let context = CommandListContext::new(
            backend.clone(),
            heaps.clone(),
            shaders,
            deferred.releaser(),
            config,
            slot_count,
            default_bindings(&shape),
        )?;

        let mut device = Self {
            context,
            backbuffers: Vec::new(),
            presenter,
            heaps,
            fence,
            deferred,
            backend,
            policy,
            main_thread: MainThread::current(),
            frame_number: 0,
            slot: 0,
            in_frame: false,
            timer_results: Vec::new(),
            shut_down: false,
        };
        device.wrap_backbuffers()?;

        info!(
            backend = device.backend.backend_name(),
            slots = slot_count,
            width = shape.width,
            height = shape.height,
            "Device initialized"
        );
        Ok(device)
    }

    fn wrap_backbuffers(&mut self) -> Result<()> {
        let shape = self.presenter.backbuffer_shape();
        self.backbuffers = (0..self.presenter.backbuffer_count())
            .map(|index| {
                let native = self.presenter.backbuffer(index)?;
                let desc = ResourceDescriptor::new(shape).with_name(format!("Backbuffer {}", index));
                Ok(GpuResource::from_native(
                    native,
                    &desc,
                    ResourceState::Present,
                    self.heaps.clone(),
                    self.deferred.releaser(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    // ---- 帧 ----

    /// 开始一帧，返回本帧使用的帧槽
    pub fn begin_frame(&mut self) -> Result<FrameSlotIndex> {
        let _span = crate::span_trace!("begin_frame").entered();
        self.main_thread.check("begin_frame")?;
        if self.in_frame {
            return Err(GraphicsError::InvalidState("begin_frame called twice without end_and_present_frame".to_string()).into());
        }

        let slot = self.presenter.current_backbuffer_index() as usize;
        if slot >= self.fence.slot_count() {
            return Err(GraphicsError::SwapchainError(format!(
                "backbuffer index {} is out of range ({} slots)",
                slot,
                self.fence.slot_count()
            ))
            .into());
        }

        self.fence.wait_for_slot(&*self.backend, slot)?;
        self.deferred.set_current_slot(slot);
        let released = self.deferred.drain(slot);
        if released > 0 {
            debug!(slot, released, "Deferred releases executed");
        }
        self.timer_results = self.context.collect_timers(slot)?;

        let completed = self.fence.completed(&*self.backend);
        self.context.begin_frame(slot, self.frame_number, completed)?;
        self.slot = slot;
        self.in_frame = true;
        Ok(slot)
    }

    /// 结束、提交并呈现当前帧
    pub fn end_and_present_frame(&mut self, sync_interval: u32) -> Result<()> {
        self.main_thread.check("end_and_present_frame")?;
        if !self.in_frame {
            return Err(GraphicsError::InvalidState("end_and_present_frame called outside a frame".to_string()).into());
        }
        // 仍有打开的 Item 批次时拒绝，帧保持打开以便调用者补上 end_items
        if self.context.state() != ContextState::Recording {
            return Err(GraphicsError::InvalidState(format!(
                "end_and_present_frame is not allowed in state {:?}",
                self.context.state()
            ))
            .into());
        }

        let slot = self.slot;
        self.context
            .transition_resource(&self.backbuffers[slot], ResourceState::Present)?;
        let guard = self.fence.last_signaled().next();
        self.context.end_frame(guard)?;
        self.in_frame = false;

        let value = self.fence.signal(&*self.backend)?;
        self.fence.record_slot(slot, value)?;

        match self.presenter.present(sync_interval) {
            Ok(()) => {}
            Err(PresentError::DeviceRemoved(reason)) => {
                return Err(raise(self.policy, GraphicsError::DeviceLost(reason)));
            }
            Err(PresentError::Other(reason)) => {
                crate::engine_warn!(reason = %reason, frame = self.frame_number, "Present failed, continuing");
            }
        }

        self.frame_number += 1;
        let evicted = self.context.clear_unused_pipelines_tick(self.frame_number);
        if evicted > 0 {
            debug!(evicted, "Unused pipelines evicted");
        }
        Ok(())
    }

    /// 等待 GPU 完成全部已提交的工作
    ///
    /// `drain` 为 true 时执行所有帧槽的延迟释放。帧内不允许 drain：
    /// 当前帧槽的队列仍被尚未提交的命令列表引用。
    pub fn wait_for_gpu(&mut self, drain: bool) -> Result<()> {
        self.main_thread.check("wait_for_gpu")?;
        if drain && self.in_frame {
            return Err(GraphicsError::InvalidState("wait_for_gpu(drain) called inside a frame".to_string()).into());
        }
        let value = self.fence.flush(&*self.backend)?;
        debug!(fence = value.value(), "GPU idle");
        if drain {
            self.deferred.drain_all();
        }
        Ok(())
    }

    /// 调整交换链大小
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.main_thread.check("resize")?;
        if self.in_frame {
            return Err(GraphicsError::InvalidState("resize called inside a frame".to_string()).into());
        }

        self.wait_for_gpu(true)?;
        // 交换链要求所有后台缓冲引用都已释放
        self.backbuffers.clear();
        self.deferred.drain_all();

        self.presenter.resize(width, height)?;
        self.wrap_backbuffers()?;
        self.context
            .set_frame_defaults(default_bindings(&self.presenter.backbuffer_shape()));
        info!(width, height, "Swap chain resized");
        Ok(())
    }

    // ---- 资源 ----

    /// 创建 GPU 资源
    pub fn create_resource(&self, desc: &ResourceDescriptor) -> Result<GpuResource<B>> {
        self.main_thread.check("create_resource")?;
        let initial = desc.initial_state();
        let native = self.backend.create_resource(desc, initial).map_err(|err| match err {
            DistRenderError::Graphics(err) => raise(self.policy, err),
            other => other,
        })?;
        Ok(GpuResource::from_native(
            native,
            desc,
            initial,
            self.heaps.clone(),
            self.deferred.releaser(),
        ))
    }

    /// 当前帧的后台缓冲
    pub fn current_backbuffer(&self) -> &GpuResource<B> {
        &self.backbuffers[self.slot]
    }

    /// 把当前后台缓冲绑定为唯一的渲染目标
    pub fn bind_backbuffer(&mut self) -> Result<()> {
        let backbuffer = &self.backbuffers[self.slot];
        self.context.set_render_targets(&[backbuffer], None)
    }

    /// 清除当前后台缓冲
    pub fn clear_backbuffer(&mut self, color: [f32; 4]) -> Result<()> {
        let backbuffer = &self.backbuffers[self.slot];
        self.context.clear_render_target(backbuffer, color)
    }

    /// 当前帧的 GPU 工作完成后执行回调
    pub fn execute_after_current_gpu_frame_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.deferred.execute_after_current_gpu_frame_done(callback);
    }

    // ---- 查询 ----

    /// 命令列表上下文
    pub fn context(&mut self) -> &mut CommandListContext<B> {
        &mut self.context
    }

    /// 全屏状态；查询失败时按窗口模式处理
    pub fn is_fullscreen(&self) -> bool {
        match self.presenter.is_fullscreen() {
            Ok(fullscreen) => fullscreen,
            Err(err) => {
                warn!(error = %err, "Fullscreen query failed, assuming windowed");
                false
            }
        }
    }

    /// 上一轮该帧槽的 GPU 计时结果
    pub fn timer_results(&self) -> &[TimerResult] {
        &self.timer_results
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn current_slot(&self) -> FrameSlotIndex {
        self.slot
    }

    pub fn slot_count(&self) -> usize {
        self.fence.slot_count()
    }

    pub fn is_in_frame(&self) -> bool {
        self.in_frame
    }

    pub fn fence(&self) -> &FrameFence {
        &self.fence
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn heaps(&self) -> &Arc<PersistentHeaps<B>> {
        &self.heaps
    }

    pub fn pending_releases(&self) -> usize {
        self.deferred.pending_total()
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            frame_number: self.frame_number,
            last_signaled: self.fence.last_signaled(),
            completed: self.fence.completed(&*self.backend),
            pending_releases: self.deferred.pending_total(),
            graphics_pipelines: self.context.graphics_pipeline_stats(),
            compute_pipelines: self.context.compute_pipeline_stats(),
            context: self.context.stats(),
            heaps: self.heaps.all_stats(),
        }
    }

    /// 关闭设备：等待 GPU 空闲，清空 PSO 缓存并执行全部延迟释放
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.in_frame = false;

        self.fence.flush(&*self.backend)?;
        let pipelines = self.context.clear_pipelines();
        self.backbuffers.clear();
        let released = self.deferred.drain_all();
        info!(pipelines, released, frames = self.frame_number, "Device shut down");
        Ok(())
    }
}

impl<B: GpuBackend, P: Presenter<B>> Drop for Device<B, P> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "Device shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::null::{NullBackend, NullCommand, NullPresenter};
    use crate::renderer::command::{GraphicsItem, ItemKind, ItemStatus};
    use crate::renderer::resource::{Format, ResourceUsage};
    use crate::renderer::shader::{ShaderHandle, ShaderLibrary, ShaderStage};
    use crate::gfx::backend::DrawArgs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn device(slots: u32) -> (Arc<NullBackend>, Arc<ShaderLibrary>, Device<NullBackend, NullPresenter>) {
        let backend = Arc::new(NullBackend::new());
        let presenter = NullPresenter::new(&backend, slots, 128, 72).unwrap();
        let library = Arc::new(ShaderLibrary::new());
        let mut config = Config::default();
        config.device.backbuffer_count = slots;
        let device = Device::new(backend.clone(), presenter, library.clone(), &config).unwrap();
        (backend, library, device)
    }

    fn cooked(library: &ShaderLibrary, name: &str, stage: ShaderStage) -> ShaderHandle {
        let handle = library.register(name, stage);
        library.cook(handle, vec![0x44, 0x58, 0x42, 0x43]).unwrap();
        handle
    }

    #[test]
    fn test_frame_loop_signals_and_presents() {
        let (backend, _, mut device) = device(2);
        for frame in 0..4u64 {
            let slot = device.begin_frame().unwrap();
            assert_eq!(slot, (frame % 2) as usize);
            device.clear_backbuffer([0.1, 0.2, 0.3, 1.0]).unwrap();
            device.end_and_present_frame(1).unwrap();
            assert_eq!(device.fence().slot_value(slot), FenceValue::new(frame + 1));
        }
        assert_eq!(device.frame_number(), 4);
        assert_eq!(device.presenter().presents(), 4);
        assert_eq!(backend.stats().submissions, 4);
        assert_eq!(device.current_backbuffer().state(), ResourceState::Present);
    }

    #[test]
    fn test_deferred_release_runs_when_slot_reused() {
        let (_, _, mut device) = device(2);
        let count = Arc::new(AtomicUsize::new(0));

        device.begin_frame().unwrap();
        let c = count.clone();
        device.execute_after_current_gpu_frame_done(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        device.end_and_present_frame(0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // 帧槽 1
        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);

        // 回到帧槽 0
        device.begin_frame().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(device.pending_releases(), 0);
        device.end_and_present_frame(0).unwrap();

        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        device.begin_frame().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_present_failures() {
        let (_, _, mut device) = device(2);
        device.begin_frame().unwrap();
        device
            .presenter_mut()
            .fail_next_present(PresentError::Other("occluded".to_string()));
        device.end_and_present_frame(1).unwrap();
        assert_eq!(device.presenter().presents(), 0);

        device.begin_frame().unwrap();
        device
            .presenter_mut()
            .fail_next_present(PresentError::DeviceRemoved("hung".to_string()));
        let err = device.end_and_present_frame(1).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::DeviceLost(_))));
    }

    #[test]
    fn test_fullscreen_query_falls_back_to_windowed() {
        let (_, _, mut device) = device(2);
        device.presenter_mut().set_fullscreen(Some(true));
        assert!(device.is_fullscreen());
        device.presenter_mut().set_fullscreen(None);
        assert!(!device.is_fullscreen());
    }

    #[test]
    fn test_frame_misuse_rejected() {
        let (_, _, mut device) = device(2);
        assert!(device.end_and_present_frame(0).is_err());
        device.begin_frame().unwrap();
        assert!(device.begin_frame().is_err());
        assert!(device.resize(64, 64).is_err());
    }

    #[test]
    fn test_end_frame_with_open_items_keeps_frame_open() {
        let (_, _, mut device) = device(2);
        device.begin_frame().unwrap();
        device.context().begin_items(ItemKind::Compute).unwrap();

        let err = device.end_and_present_frame(0).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::InvalidState(_))));
        assert!(device.is_in_frame());
        assert_eq!(device.presenter().presents(), 0);

        device.context().end_items().unwrap();
        device.end_and_present_frame(0).unwrap();
        assert_eq!(device.begin_frame().unwrap(), 1);
        device.end_and_present_frame(0).unwrap();
        assert_eq!(device.presenter().presents(), 2);
    }

    #[test]
    fn test_wait_for_gpu_drain_rejected_inside_frame() {
        let (backend, _, mut device) = device(2);
        let desc = ResourceDescriptor::new(ResourceShape::texture_2d(
            16,
            16,
            Format::Rgba8Unorm,
            1,
            ResourceUsage::SAMPLED,
        ));

        device.begin_frame().unwrap();
        let texture = device.create_resource(&desc).unwrap();
        device
            .context()
            .transition_resource(&texture, ResourceState::PixelShaderResource)
            .unwrap();
        drop(texture);

        let err = device.wait_for_gpu(true).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::InvalidState(_))));
        assert_eq!(backend.stats().resources_destroyed, 0);

        device.end_and_present_frame(0).unwrap();
        device.wait_for_gpu(true).unwrap();
        assert_eq!(backend.stats().resources_destroyed, 1);
        assert_eq!(device.pending_releases(), 0);
    }

    #[test]
    fn test_untimed_slot_does_not_repeat_old_results() {
        let (_, _, mut device) = device(2);
        device.begin_frame().unwrap();
        let id = device.context().begin_timer("frame").unwrap().unwrap();
        device.context().end_timer(id).unwrap();
        device.end_and_present_frame(0).unwrap();

        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();

        assert_eq!(device.begin_frame().unwrap(), 0);
        assert_eq!(device.timer_results().len(), 1);
        device.end_and_present_frame(0).unwrap();

        assert_eq!(device.begin_frame().unwrap(), 1);
        assert!(device.timer_results().is_empty());
    }

    #[test]
    fn test_resize_recreates_backbuffers() {
        let (backend, _, mut device) = device(3);
        device.begin_frame().unwrap();
        device.bind_backbuffer().unwrap();
        device.end_and_present_frame(0).unwrap();

        device.resize(256, 144).unwrap();
        assert_eq!(device.current_backbuffer().shape().width, 256);
        // 旧的后台缓冲已释放
        assert_eq!(backend.stats().resources_destroyed, 3);

        device.begin_frame().unwrap();
        device.bind_backbuffer().unwrap();
        device.end_and_present_frame(0).unwrap();
    }

    #[test]
    fn test_dropped_resource_released_after_fence() {
        let (backend, _, mut device) = device(2);
        let desc = ResourceDescriptor::new(ResourceShape::texture_2d(
            16,
            16,
            Format::Rgba8Unorm,
            1,
            ResourceUsage::SAMPLED,
        ));

        device.begin_frame().unwrap();
        let texture = device.create_resource(&desc).unwrap();
        texture.view(&**device.backend(), crate::renderer::view::ViewRequest::srv()).unwrap();
        drop(texture);
        assert_eq!(backend.stats().resources_destroyed, 0);
        device.end_and_present_frame(0).unwrap();

        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        assert_eq!(backend.stats().resources_destroyed, 0);

        device.begin_frame().unwrap();
        assert_eq!(backend.stats().resources_destroyed, 1);
        assert_eq!(device.heaps().cbv_srv_uav.stats().used, 0);
    }

    #[test]
    fn test_graphics_items_through_device() {
        let (backend, library, mut device) = device(2);
        let vs = cooked(&library, "fullscreen.vs", ShaderStage::Vertex);
        let ps = cooked(&library, "tonemap.ps", ShaderStage::Pixel);

        for _ in 0..3 {
            device.begin_frame().unwrap();
            device.bind_backbuffer().unwrap();
            let context = device.context();
            context.begin_items(ItemKind::Graphics).unwrap();
            let item = GraphicsItem::<NullBackend>::new(vs, DrawArgs::new(3)).with_pixel_shader(ps);
            assert_eq!(context.execute_graphics_item(&item).unwrap(), ItemStatus::Executed);
            context.end_items().unwrap();
            device.end_and_present_frame(1).unwrap();
        }

        assert_eq!(backend.stats().pipelines_created, 1);
        let stats = device.stats();
        assert_eq!(stats.graphics_pipelines.hits, 2);
        assert_eq!(stats.context.draws, 3);
        let present_barriers = backend
            .executed_commands()
            .iter()
            .filter(|c| matches!(c, NullCommand::Barrier { after: ResourceState::Present, .. }))
            .count();
        assert_eq!(present_barriers, 3);
    }

    #[test]
    fn test_unused_pipelines_evicted_after_age() {
        let backend = Arc::new(NullBackend::new());
        let presenter = NullPresenter::new(&backend, 2, 64, 64).unwrap();
        let library = Arc::new(ShaderLibrary::new());
        let mut config = Config::default();
        config.device.backbuffer_count = 2;
        config.pipeline_cache.max_age_frames = 2;
        config.pipeline_cache.visit_count = 8;
        let mut device = Device::new(backend.clone(), presenter, library.clone(), &config).unwrap();
        let vs = cooked(&library, "once.vs", ShaderStage::Vertex);

        device.begin_frame().unwrap();
        let context = device.context();
        context.begin_items(ItemKind::Graphics).unwrap();
        context
            .execute_graphics_item(&GraphicsItem::<NullBackend>::new(vs, DrawArgs::new(3)))
            .unwrap();
        context.end_items().unwrap();
        device.end_and_present_frame(0).unwrap();

        for _ in 0..6 {
            device.begin_frame().unwrap();
            device.end_and_present_frame(0).unwrap();
        }
        assert_eq!(device.stats().graphics_pipelines.entries, 0);
        assert_eq!(backend.stats().pipelines_destroyed, 1);
    }

    #[test]
    fn test_eviction_ages_by_device_frame_number() {
        let backend = Arc::new(NullBackend::new());
        let presenter = NullPresenter::new(&backend, 2, 64, 64).unwrap();
        let library = Arc::new(ShaderLibrary::new());
        let mut config = Config::default();
        config.device.backbuffer_count = 2;
        config.pipeline_cache.max_age_frames = 2;
        let mut device = Device::new(backend.clone(), presenter, library.clone(), &config).unwrap();
        let vs = cooked(&library, "aging.vs", ShaderStage::Vertex);

        device.begin_frame().unwrap();
        let context = device.context();
        context.begin_items(ItemKind::Graphics).unwrap();
        context
            .execute_graphics_item(&GraphicsItem::<NullBackend>::new(vs, DrawArgs::new(3)))
            .unwrap();
        context.end_items().unwrap();
        device.end_and_present_frame(0).unwrap();

        // 第 0 帧使用；第 2 帧结束时帧号为 3，年龄超过 2
        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        assert_eq!(device.stats().graphics_pipelines.entries, 1);
        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        assert_eq!(device.stats().graphics_pipelines.entries, 0);
    }

    #[test]
    fn test_timer_results_arrive_after_slot_reuse() {
        let (_, _, mut device) = device(2);
        device.begin_frame().unwrap();
        let id = device.context().begin_timer("frame").unwrap().unwrap();
        device.clear_backbuffer([0.0; 4]).unwrap();
        device.context().end_timer(id).unwrap();
        device.end_and_present_frame(0).unwrap();
        assert!(device.timer_results().is_empty());

        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        device.begin_frame().unwrap();
        assert_eq!(device.timer_results().len(), 1);
        assert_eq!(device.timer_results()[0].name, "frame");
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let (backend, _, mut device) = device(2);
        device.begin_frame().unwrap();
        device.end_and_present_frame(0).unwrap();
        device.shutdown().unwrap();
        assert_eq!(device.pending_releases(), 0);
        assert_eq!(device.stats().graphics_pipelines.entries, 0);
        drop(device);
        // 交换链随设备一起销毁
        assert_eq!(backend.stats().resources_destroyed, 2);
    }
}
