//! 命令列表上下文
//!
//! 封装一个原生命令列表和每个帧槽一个的命令分配器，驱动录制状态机：
//!
//! ```text
//! Idle ──begin_frame──▶ Recording ──begin_items──▶ ItemsOpen
//!                          ▲   │                      │
//!                          │   └──────end_items◀──────┘
//!                          │   │
//!                          │   └──end_frame──▶ Submitted
//!                          └──────begin_frame─────────┘
//! ```
//!
//! - `begin_frame` 不等待 GPU（等待在 `Device::begin_frame` 中完成）
//! - `end_items` 在上次 flush 以来的 Item 数超过阈值时自动 flush
//! - 着色器仍在编译时 `execute_*_item` 返回 `ItemStatus::ShadersCompiling`
//!   并跳过这次绘制，这不是错误
//! - 所有录制调用都检查是否在主渲染线程上

use std::sync::Arc;

use tracing::{debug, trace};

use crate::core::config::{Config, FailurePolicy};
use crate::core::error::{raise, GraphicsError, Result};
use crate::core::thread::MainThread;
use crate::gfx::backend::{
    BindPoint, DefaultBindings, DrawArgs, DrawCall, GpuBackend, IndexBufferView, IndexFormat,
    ResourceBarrier, ScissorRect, VertexBufferView, Viewport, ROOT_PARAM_DRAW_CONTEXT_TABLE,
    ROOT_PARAM_ITEM_TABLE,
};
use crate::renderer::deferred::DeferredReleaser;
use crate::renderer::descriptor::{DescriptorHeapStats, PersistentHeaps, TransientDescriptorHeap, ViewKind};
use crate::renderer::pipeline::{
    ComputePipelineDesc, GraphicsPipelineDesc, PsoCache, PsoCacheStats, RenderState, RenderTargetLayout,
};
use crate::renderer::resource::{GpuResource, ResourceState, StateTransition};
use crate::renderer::shader::{ShaderBytecode, ShaderHandle, ShaderSource, ShaderStage, ShaderStatus};
use crate::renderer::sync::{FenceValue, FrameSlotIndex};
use crate::renderer::timer::{GpuTimers, TimerId, TimerResult};
use crate::renderer::view::ViewRequest;

/// 上下文状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// 没有打开的命令列表
    Idle,
    /// 已重置并绑定默认状态
    Recording,
    /// 在 begin_items / end_items 之间
    ItemsOpen,
    /// 已关闭并提交
    Submitted,
}

/// Item 批次类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Graphics,
    Compute,
}

/// Item 执行结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStatus {
    /// 已录制
    Executed,
    /// 着色器仍在编译，本次跳过
    ShadersCompiling,
}

/// 描述符表中的一个视图绑定
pub struct ViewBinding<'a, B: GpuBackend> {
    pub resource: &'a GpuResource<B>,
    pub request: ViewRequest,
}

impl<'a, B: GpuBackend> ViewBinding<'a, B> {
    pub fn new(resource: &'a GpuResource<B>, request: ViewRequest) -> Self {
        Self { resource, request }
    }
}

/// 顶点缓冲绑定
pub struct VertexBufferBinding<'a, B: GpuBackend> {
    pub resource: &'a GpuResource<B>,
    pub offset: u64,
    pub stride: u32,
}

/// 索引缓冲绑定
pub struct IndexBufferBinding<'a, B: GpuBackend> {
    pub resource: &'a GpuResource<B>,
    pub offset: u64,
    pub format: IndexFormat,
}

fn bind_slot<'a, B: GpuBackend>(
    bindings: &mut Vec<Option<ViewBinding<'a, B>>>,
    slot: usize,
    binding: ViewBinding<'a, B>,
) {
    if bindings.len() <= slot {
        bindings.resize_with(slot + 1, || None);
    }
    bindings[slot] = Some(binding);
}

/// 图形 Item
pub struct GraphicsItem<'a, B: GpuBackend> {
    pub vertex_shader: ShaderHandle,
    pub pixel_shader: Option<ShaderHandle>,
    pub hull_shader: Option<ShaderHandle>,
    pub domain_shader: Option<ShaderHandle>,
    pub geometry_shader: Option<ShaderHandle>,
    /// `None` 使用上下文当前的固定功能状态
    pub render_state: Option<RenderState>,
    /// 每个 Item 描述符表的槽位
    pub bindings: Vec<Option<ViewBinding<'a, B>>>,
    pub vertex_buffer: Option<VertexBufferBinding<'a, B>>,
    pub index_buffer: Option<IndexBufferBinding<'a, B>>,
    pub args: DrawArgs,
}

impl<'a, B: GpuBackend> GraphicsItem<'a, B> {
    pub fn new(vertex_shader: ShaderHandle, args: DrawArgs) -> Self {
        Self {
            vertex_shader,
            pixel_shader: None,
            hull_shader: None,
            domain_shader: None,
            geometry_shader: None,
            render_state: None,
            bindings: Vec::new(),
            vertex_buffer: None,
            index_buffer: None,
            args,
        }
    }

    pub fn with_pixel_shader(mut self, shader: ShaderHandle) -> Self {
        self.pixel_shader = Some(shader);
        self
    }

    pub fn with_geometry_shader(mut self, shader: ShaderHandle) -> Self {
        self.geometry_shader = Some(shader);
        self
    }

    pub fn with_tessellation(mut self, hull: ShaderHandle, domain: ShaderHandle) -> Self {
        self.hull_shader = Some(hull);
        self.domain_shader = Some(domain);
        self
    }

    pub fn with_render_state(mut self, state: RenderState) -> Self {
        self.render_state = Some(state);
        self
    }

    /// 绑定一个视图到描述符表槽位
    pub fn bind(mut self, slot: usize, resource: &'a GpuResource<B>, request: ViewRequest) -> Self {
        bind_slot(&mut self.bindings, slot, ViewBinding::new(resource, request));
        self
    }

    pub fn with_vertex_buffer(mut self, resource: &'a GpuResource<B>, stride: u32) -> Self {
        self.vertex_buffer = Some(VertexBufferBinding {
            resource,
            offset: 0,
            stride,
        });
        self
    }

    pub fn with_index_buffer(mut self, resource: &'a GpuResource<B>, format: IndexFormat) -> Self {
        self.index_buffer = Some(IndexBufferBinding {
            resource,
            offset: 0,
            format,
        });
        self
    }
}

/// 计算 Item
pub struct ComputeItem<'a, B: GpuBackend> {
    pub compute_shader: ShaderHandle,
    pub bindings: Vec<Option<ViewBinding<'a, B>>>,
    pub groups: [u32; 3],
}

impl<'a, B: GpuBackend> ComputeItem<'a, B> {
    pub fn new(compute_shader: ShaderHandle, groups: [u32; 3]) -> Self {
        Self {
            compute_shader,
            bindings: Vec::new(),
            groups,
        }
    }

    /// 绑定一个视图到描述符表槽位
    pub fn bind(mut self, slot: usize, resource: &'a GpuResource<B>, request: ViewRequest) -> Self {
        bind_slot(&mut self.bindings, slot, ViewBinding::new(resource, request));
        self
    }
}

/// 上下文统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    pub items_executed: u64,
    pub items_skipped: u64,
    pub draws: u64,
    pub dispatches: u64,
    pub barriers: u64,
    pub flushes: u64,
    pub submissions: u64,
}

enum StagePoll {
    Ready(Option<ShaderBytecode>),
    Compiling,
}

/// 命令列表上下文
pub struct CommandListContext<B: GpuBackend> {
    backend: Arc<B>,
    main_thread: MainThread,
    policy: FailurePolicy,
    state: ContextState,
    slot: FrameSlotIndex,
    frame_number: u64,

    allocators: Vec<B::CommandAllocator>,
    list: B::CommandList,
    transient: Vec<TransientDescriptorHeap<B>>,
    heaps: Arc<PersistentHeaps<B>>,

    graphics_pipelines: PsoCache<GraphicsPipelineDesc, B>,
    compute_pipelines: PsoCache<ComputePipelineDesc, B>,
    shaders: Arc<dyn ShaderSource>,
    timers: GpuTimers<B>,

    render_state: RenderState,
    targets: RenderTargetLayout,
    /// flush 后按索引重新绑定；RTV/DSV 的释放延迟到帧槽复用，索引在本帧内有效
    bound_targets: Option<(Vec<u32>, Option<u32>)>,
    frame_defaults: DefaultBindings,
    viewport: Viewport,
    scissor: ScissorRect,

    item_kind: Option<ItemKind>,
    items_since_flush: u32,
    flush_threshold: u32,
    item_table_size: u32,
    draw_context_table_size: u32,
    draw_context_table: Option<u32>,

    stats: ContextStats,
}

impl<B: GpuBackend> CommandListContext<B> {
    /// 创建新的命令列表上下文
    pub fn new(
        backend: Arc<B>,
        heaps: Arc<PersistentHeaps<B>>,
        shaders: Arc<dyn ShaderSource>,
        releaser: DeferredReleaser,
        config: &Config,
        slot_count: usize,
        defaults: DefaultBindings,
    ) -> Result<Self> {
        let policy = config.device.failure_policy;
        let allocators = (0..slot_count)
            .map(|_| backend.create_command_allocator())
            .collect::<Result<Vec<_>>>()?;
        let list = backend.create_command_list(&allocators[0])?;
        let transient = (0..slot_count)
            .map(|_| TransientDescriptorHeap::new(&*backend, config.descriptors.transient_per_frame, policy))
            .collect::<Result<Vec<_>>>()?;
        let timers = GpuTimers::new(&*backend, slot_count, config.timers.max_timers_per_frame)?;

        debug!(
            backend = backend.backend_name(),
            slots = slot_count,
            transient_capacity = config.descriptors.transient_per_frame,
            "Command list context created"
        );

        Ok(Self {
            graphics_pipelines: PsoCache::new(&config.pipeline_cache, releaser.clone(), policy),
            compute_pipelines: PsoCache::new(&config.pipeline_cache, releaser, policy),
            backend,
            main_thread: MainThread::current(),
            policy,
            state: ContextState::Idle,
            slot: 0,
            frame_number: 0,
            allocators,
            list,
            transient,
            heaps,
            shaders,
            timers,
            render_state: RenderState::default(),
            targets: RenderTargetLayout::default(),
            bound_targets: None,
            frame_defaults: defaults,
            viewport: defaults.viewport,
            scissor: defaults.scissor,
            item_kind: None,
            items_since_flush: 0,
            flush_threshold: config.commands.flush_threshold,
            item_table_size: config.descriptors.item_table_size,
            draw_context_table_size: config.descriptors.draw_context_table_size,
            draw_context_table: None,
            stats: ContextStats::default(),
        })
    }

    fn invalid_state(&self, operation: &str) -> GraphicsError {
        GraphicsError::InvalidState(format!("{} is not allowed in state {:?}", operation, self.state))
    }

    fn expect_recording(&self, operation: &'static str) -> Result<()> {
        self.main_thread.check(operation)?;
        match self.state {
            ContextState::Recording | ContextState::ItemsOpen => Ok(()),
            _ => Err(self.invalid_state(operation).into()),
        }
    }

    fn expect_items(&self, kind: ItemKind, operation: &'static str) -> Result<()> {
        self.main_thread.check(operation)?;
        if self.state != ContextState::ItemsOpen {
            return Err(self.invalid_state(operation).into());
        }
        if self.item_kind != Some(kind) {
            return Err(GraphicsError::InvalidState(format!(
                "{} inside a {:?} item batch",
                operation, self.item_kind
            ))
            .into());
        }
        Ok(())
    }

    // ---- 帧 ----

    /// 开始录制一帧
    ///
    /// 调用者保证 `completed` 已到达该帧槽上次记录的 Fence 值。
    pub fn begin_frame(&mut self, slot: FrameSlotIndex, frame_number: u64, completed: FenceValue) -> Result<()> {
        self.main_thread.check("begin_frame")?;
        if !matches!(self.state, ContextState::Idle | ContextState::Submitted) {
            return Err(self.invalid_state("begin_frame").into());
        }

        self.transient[slot].reset(completed)?;
        self.transient[slot].open();
        self.backend.reset_command_allocator(&mut self.allocators[slot])?;
        self.backend.reset_command_list(&mut self.list, &self.allocators[slot])?;

        self.slot = slot;
        self.frame_number = frame_number;
        self.state = ContextState::Recording;
        self.items_since_flush = 0;
        self.render_state = RenderState::default();
        self.targets = RenderTargetLayout::default();
        self.bound_targets = None;
        self.viewport = self.frame_defaults.viewport;
        self.scissor = self.frame_defaults.scissor;
        self.draw_context_table = None;

        self.bind_defaults();
        self.bind_null_draw_context_table()?;
        trace!(slot, frame = frame_number, "Command list recording started");
        Ok(())
    }

    /// 重新绑定默认状态（每次重置命令列表之后）
    fn bind_defaults(&mut self) {
        let heap = self.transient[self.slot].native();
        let defaults = DefaultBindings {
            viewport: self.viewport,
            scissor: self.scissor,
            ..self.frame_defaults
        };
        self.backend.bind_defaults(&mut self.list, heap, &defaults);

        if let Some(base) = self.draw_context_table {
            for bind_point in [BindPoint::Graphics, BindPoint::Compute] {
                self.backend.set_descriptor_table(
                    &mut self.list,
                    bind_point,
                    ROOT_PARAM_DRAW_CONTEXT_TABLE,
                    heap,
                    base,
                );
            }
        }
        if let Some((rtvs, dsv)) = &self.bound_targets {
            self.backend.set_render_targets(
                &mut self.list,
                self.heaps.rtv.native(),
                rtvs,
                self.heaps.dsv.native(),
                *dsv,
            );
        }
    }

    fn bind_null_draw_context_table(&mut self) -> Result<()> {
        let size = self.draw_context_table_size;
        let base = self.transient[self.slot].allocate(size)?;
        let heap = self.transient[self.slot].native();
        for offset in 0..size {
            self.backend.write_null_view(heap, base + offset);
        }
        self.bind_draw_context_table(base);
        Ok(())
    }

    fn bind_draw_context_table(&mut self, base: u32) {
        let heap = self.transient[self.slot].native();
        for bind_point in [BindPoint::Graphics, BindPoint::Compute] {
            self.backend
                .set_descriptor_table(&mut self.list, bind_point, ROOT_PARAM_DRAW_CONTEXT_TABLE, heap, base);
        }
        self.draw_context_table = Some(base);
    }

    /// 关闭并提交本帧
    ///
    /// `guard` 是提交后将要 signal 的 Fence 值，用来守护本帧槽的瞬态堆。
    pub fn end_frame(&mut self, guard: FenceValue) -> Result<()> {
        self.main_thread.check("end_frame")?;
        if self.state != ContextState::Recording {
            return Err(self.invalid_state("end_frame").into());
        }

        self.timers.resolve(&*self.backend, &mut self.list, self.slot);
        self.backend.close_command_list(&mut self.list)?;
        self.backend.execute_command_list(&self.list)?;
        self.transient[self.slot].close(guard);
        self.state = ContextState::Submitted;
        self.stats.submissions += 1;
        trace!(slot = self.slot, fence = guard.value(), "Command list submitted");
        Ok(())
    }

    /// 关闭、提交并在同一帧内重新打开
    pub fn flush(&mut self) -> Result<()> {
        self.main_thread.check("flush")?;
        if self.state != ContextState::Recording {
            return Err(self.invalid_state("flush").into());
        }

        self.backend.close_command_list(&mut self.list)?;
        self.backend.execute_command_list(&self.list)?;
        self.backend.reset_command_list(&mut self.list, &self.allocators[self.slot])?;
        self.bind_defaults();

        self.items_since_flush = 0;
        self.stats.flushes += 1;
        self.stats.submissions += 1;
        trace!(slot = self.slot, "Command list flushed");
        Ok(())
    }

    // ---- Item 批次 ----

    /// 打开一个 Item 批次（不可重入）
    pub fn begin_items(&mut self, kind: ItemKind) -> Result<()> {
        self.main_thread.check("begin_items")?;
        if self.state != ContextState::Recording {
            return Err(self.invalid_state("begin_items").into());
        }
        self.state = ContextState::ItemsOpen;
        self.item_kind = Some(kind);
        Ok(())
    }

    /// 关闭 Item 批次，必要时自动 flush
    pub fn end_items(&mut self) -> Result<()> {
        self.main_thread.check("end_items")?;
        if self.state != ContextState::ItemsOpen {
            return Err(self.invalid_state("end_items").into());
        }
        self.state = ContextState::Recording;
        self.item_kind = None;
        if self.items_since_flush > self.flush_threshold {
            debug!(
                items = self.items_since_flush,
                threshold = self.flush_threshold,
                "Automatic mid-frame flush"
            );
            self.flush()?;
        }
        Ok(())
    }

    fn poll_stage(&self, handle: Option<ShaderHandle>, stage: ShaderStage) -> Result<StagePoll> {
        let Some(handle) = handle else {
            return Ok(StagePoll::Ready(None));
        };
        match self.shaders.shader_status(handle) {
            ShaderStatus::Cooked(bytecode) => Ok(StagePoll::Ready(Some(bytecode))),
            ShaderStatus::Uncooked => Ok(StagePoll::Compiling),
            ShaderStatus::Empty => Err(GraphicsError::ShaderNotReady(format!(
                "{} shader {:?} is empty",
                stage.name(),
                handle
            ))
            .into()),
        }
    }

    fn skip_item(&mut self) -> ItemStatus {
        self.stats.items_skipped += 1;
        ItemStatus::ShadersCompiling
    }

    /// 执行一个图形 Item
    pub fn execute_graphics_item(&mut self, item: &GraphicsItem<'_, B>) -> Result<ItemStatus> {
        self.expect_items(ItemKind::Graphics, "execute_graphics_item")?;

        let mut stages = Vec::with_capacity(5);
        for (handle, stage) in [
            (Some(item.vertex_shader), ShaderStage::Vertex),
            (item.pixel_shader, ShaderStage::Pixel),
            (item.hull_shader, ShaderStage::Hull),
            (item.domain_shader, ShaderStage::Domain),
            (item.geometry_shader, ShaderStage::Geometry),
        ] {
            match self.poll_stage(handle, stage)? {
                StagePoll::Ready(bytecode) => stages.push(bytecode),
                StagePoll::Compiling => return Ok(self.skip_item()),
            }
        }
        let mut stages = stages.into_iter();
        let Some(vertex) = stages.next().flatten() else {
            return Err(GraphicsError::ShaderNotReady("graphics item has no vertex shader".to_string()).into());
        };
        let desc = GraphicsPipelineDesc {
            vertex,
            pixel: stages.next().flatten(),
            hull: stages.next().flatten(),
            domain: stages.next().flatten(),
            geometry: stages.next().flatten(),
            render_state: item.render_state.unwrap_or(self.render_state),
            targets: self.targets,
        };
        let pipeline = self
            .graphics_pipelines
            .find_or_create(&*self.backend, &desc, self.frame_number)?;

        let table = self.build_item_table(&item.bindings, BindPoint::Graphics)?;

        if let Some(vb) = &item.vertex_buffer {
            self.transition_resource(vb.resource, ResourceState::VertexAndConstantBuffer)?;
        }
        if let Some(ib) = &item.index_buffer {
            self.transition_resource(ib.resource, ResourceState::IndexBuffer)?;
        }

        self.backend
            .set_pipeline(&mut self.list, pipeline.native(), BindPoint::Graphics);
        if let Some(base) = table {
            self.backend.set_descriptor_table(
                &mut self.list,
                BindPoint::Graphics,
                ROOT_PARAM_ITEM_TABLE,
                self.transient[self.slot].native(),
                base,
            );
        }

        let call = DrawCall {
            topology: desc.render_state.topology,
            vertex_buffer: item.vertex_buffer.as_ref().map(|vb| VertexBufferView {
                resource: vb.resource.native(),
                offset: vb.offset,
                size: vb.resource.shape().width.saturating_sub(vb.offset),
                stride: vb.stride,
            }),
            index_buffer: item.index_buffer.as_ref().map(|ib| IndexBufferView {
                resource: ib.resource.native(),
                offset: ib.offset,
                size: ib.resource.shape().width.saturating_sub(ib.offset),
                format: ib.format,
            }),
            args: item.args,
        };
        self.backend.draw(&mut self.list, &call);

        self.items_since_flush += 1;
        self.stats.items_executed += 1;
        self.stats.draws += 1;
        Ok(ItemStatus::Executed)
    }

    /// 执行一个计算 Item
    pub fn execute_compute_item(&mut self, item: &ComputeItem<'_, B>) -> Result<ItemStatus> {
        self.expect_items(ItemKind::Compute, "execute_compute_item")?;

        let compute = match self.poll_stage(Some(item.compute_shader), ShaderStage::Compute)? {
            StagePoll::Ready(Some(bytecode)) => bytecode,
            StagePoll::Ready(None) => {
                return Err(GraphicsError::ShaderNotReady("compute item has no shader".to_string()).into())
            }
            StagePoll::Compiling => return Ok(self.skip_item()),
        };
        let desc = ComputePipelineDesc { compute };
        let pipeline = self
            .compute_pipelines
            .find_or_create(&*self.backend, &desc, self.frame_number)?;

        let table = self.build_item_table(&item.bindings, BindPoint::Compute)?;

        self.backend
            .set_pipeline(&mut self.list, pipeline.native(), BindPoint::Compute);
        if let Some(base) = table {
            self.backend.set_descriptor_table(
                &mut self.list,
                BindPoint::Compute,
                ROOT_PARAM_ITEM_TABLE,
                self.transient[self.slot].native(),
                base,
            );
        }
        self.backend.dispatch(&mut self.list, item.groups);

        self.items_since_flush += 1;
        self.stats.items_executed += 1;
        self.stats.dispatches += 1;
        Ok(ItemStatus::Executed)
    }

    /// 为 Item 分配瞬态描述符区间并填充
    fn build_item_table(
        &mut self,
        bindings: &[Option<ViewBinding<'_, B>>],
        bind_point: BindPoint,
    ) -> Result<Option<u32>> {
        if bindings.is_empty() {
            return Ok(None);
        }
        let size = self.item_table_size;
        if bindings.len() > size as usize {
            return Err(GraphicsError::InvalidState(format!(
                "{} bindings exceed the per-item table size of {}",
                bindings.len(),
                size
            ))
            .into());
        }
        let base = self.transient[self.slot].allocate(size)?;
        self.fill_table(base, size, bindings, bind_point)?;
        Ok(Some(base))
    }

    /// 转换每个绑定资源的状态，并把它的持久描述符复制进瞬态区间
    fn fill_table(
        &mut self,
        base: u32,
        size: u32,
        bindings: &[Option<ViewBinding<'_, B>>],
        bind_point: BindPoint,
    ) -> Result<()> {
        for offset in 0..size {
            let Some(binding) = bindings.get(offset as usize).and_then(Option::as_ref) else {
                self.backend
                    .write_null_view(self.transient[self.slot].native(), base + offset);
                continue;
            };

            let kind = binding.request.kind;
            if !kind.is_table_bindable() {
                return Err(raise(
                    self.policy,
                    GraphicsError::InvalidViewRequest(format!(
                        "{} views cannot be bound in a descriptor table",
                        kind.name()
                    )),
                ));
            }
            self.transition_resource(binding.resource, shader_state(kind, bind_point))?;
            let view = binding.resource.view(&self.backend, binding.request)?;
            self.backend.copy_descriptors(
                self.transient[self.slot].native(),
                base + offset,
                self.heaps.cbv_srv_uav.native(),
                view.handle.index,
                1,
            );
        }
        Ok(())
    }

    /// 设置每个绘制上下文的描述符表（根参数 1）
    pub fn set_draw_context_resources(&mut self, bindings: &[Option<ViewBinding<'_, B>>]) -> Result<()> {
        self.expect_recording("set_draw_context_resources")?;
        let size = self.draw_context_table_size;
        if bindings.len() > size as usize {
            return Err(GraphicsError::InvalidState(format!(
                "{} bindings exceed the draw-context table size of {}",
                bindings.len(),
                size
            ))
            .into());
        }
        let base = self.transient[self.slot].allocate(size)?;
        self.fill_table(base, size, bindings, BindPoint::Graphics)?;
        self.bind_draw_context_table(base);
        Ok(())
    }

    // ---- 资源状态 ----

    fn record_barriers(&mut self, resource: &GpuResource<B>, transitions: &[StateTransition]) {
        if transitions.is_empty() {
            return;
        }
        let barriers: Vec<ResourceBarrier<'_, B>> = transitions
            .iter()
            .map(|t| ResourceBarrier {
                resource: resource.native(),
                subresource: t.subresource,
                before: t.before,
                after: t.after,
            })
            .collect();
        self.backend.resource_barriers(&mut self.list, &barriers);
        self.stats.barriers += barriers.len() as u64;
    }

    /// 整体转换资源状态
    pub fn transition_resource(&mut self, resource: &GpuResource<B>, target: ResourceState) -> Result<()> {
        self.expect_recording("transition_resource")?;
        let transitions = resource.plan_transition(target);
        self.record_barriers(resource, &transitions);
        Ok(())
    }

    /// 转换单个子资源的状态
    pub fn transition_subresource(
        &mut self,
        resource: &GpuResource<B>,
        target: ResourceState,
        index: u32,
    ) -> Result<()> {
        self.expect_recording("transition_subresource")?;
        if let Some(transition) = resource.plan_subresource_transition(target, index)? {
            self.record_barriers(resource, &[transition]);
        }
        Ok(())
    }

    /// 采用外部已经完成的状态转换，不录制屏障
    pub fn adopt_resource_state(&mut self, resource: &GpuResource<B>, state: ResourceState) -> Result<()> {
        self.main_thread.check("adopt_resource_state")?;
        resource.adopt_state(state);
        Ok(())
    }

    // ---- 渲染目标 ----

    /// 绑定渲染目标；其格式进入后续 PSO 键
    pub fn set_render_targets(
        &mut self,
        colors: &[&GpuResource<B>],
        depth: Option<&GpuResource<B>>,
    ) -> Result<()> {
        self.main_thread.check("set_render_targets")?;
        if self.state != ContextState::Recording {
            return Err(self.invalid_state("set_render_targets").into());
        }

        let first = colors.first().copied().or(depth);
        let samples = first.map_or(1, |r| r.shape().sample_count);
        if colors.iter().chain(depth.iter()).any(|r| r.shape().sample_count != samples) {
            return Err(raise(
                self.policy,
                GraphicsError::InvalidViewRequest("render targets have mismatched sample counts".to_string()),
            ));
        }

        let mut rtvs = Vec::with_capacity(colors.len());
        let mut formats = Vec::with_capacity(colors.len());
        for color in colors {
            self.transition_resource(color, ResourceState::RenderTarget)?;
            rtvs.push(color.view(&self.backend, ViewRequest::rtv())?.handle.index);
            formats.push(color.shape().format);
        }
        let dsv = match depth {
            Some(depth) => {
                self.transition_resource(depth, ResourceState::DepthWrite)?;
                Some(depth.view(&self.backend, ViewRequest::dsv())?.handle.index)
            }
            None => None,
        };
        self.targets = RenderTargetLayout::new(&formats, depth.map(|d| d.shape().format), samples as u8)?;

        self.backend.set_render_targets(
            &mut self.list,
            self.heaps.rtv.native(),
            &rtvs,
            self.heaps.dsv.native(),
            dsv,
        );
        self.bound_targets = Some((rtvs, dsv));

        if let Some(target) = first {
            let shape = target.shape();
            self.set_viewport(
                Viewport::full(shape.width as u32, shape.height),
                ScissorRect::full(shape.width as u32, shape.height),
            )?;
        }
        Ok(())
    }

    /// 清除颜色目标
    pub fn clear_render_target(&mut self, resource: &GpuResource<B>, color: [f32; 4]) -> Result<()> {
        self.expect_recording("clear_render_target")?;
        self.transition_resource(resource, ResourceState::RenderTarget)?;
        let view = resource.view(&self.backend, ViewRequest::rtv())?;
        self.backend
            .clear_render_target(&mut self.list, self.heaps.rtv.native(), view.handle.index, color);
        Ok(())
    }

    /// 清除深度模板
    pub fn clear_depth_stencil(&mut self, resource: &GpuResource<B>, depth: f32, stencil: u8) -> Result<()> {
        self.expect_recording("clear_depth_stencil")?;
        self.transition_resource(resource, ResourceState::DepthWrite)?;
        let view = resource.view(&self.backend, ViewRequest::dsv())?;
        self.backend.clear_depth_stencil(
            &mut self.list,
            self.heaps.dsv.native(),
            view.handle.index,
            depth,
            stencil,
        );
        Ok(())
    }

    /// 设置视口和裁剪矩形
    pub fn set_viewport(&mut self, viewport: Viewport, scissor: ScissorRect) -> Result<()> {
        self.expect_recording("set_viewport")?;
        self.viewport = viewport;
        self.scissor = scissor;
        self.backend.set_viewport(&mut self.list, &viewport, &scissor);
        Ok(())
    }

    /// 设置后续 Item 使用的固定功能状态
    pub fn set_render_state(&mut self, state: RenderState) -> Result<()> {
        self.main_thread.check("set_render_state")?;
        self.render_state = state;
        Ok(())
    }

    pub fn render_state(&self) -> RenderState {
        self.render_state
    }

    pub fn render_targets(&self) -> RenderTargetLayout {
        self.targets
    }

    /// 每帧开始时使用的默认视口（交换链大小改变时更新）
    pub fn set_frame_defaults(&mut self, defaults: DefaultBindings) {
        self.frame_defaults = defaults;
    }

    // ---- GPU 计时器 ----

    /// 开始一个 GPU 计时作用域
    pub fn begin_timer(&mut self, name: &str) -> Result<Option<TimerId>> {
        self.expect_recording("begin_timer")?;
        Ok(self.timers.begin(&*self.backend, &mut self.list, self.slot, name))
    }

    /// 结束一个 GPU 计时作用域
    pub fn end_timer(&mut self, id: TimerId) -> Result<()> {
        self.expect_recording("end_timer")?;
        self.timers.end(&*self.backend, &mut self.list, self.slot, id);
        Ok(())
    }

    /// 读取帧槽上一轮的计时结果；调用者保证该帧槽的 Fence 已到达
    pub(crate) fn collect_timers(&mut self, slot: FrameSlotIndex) -> Result<Vec<TimerResult>> {
        Ok(self.timers.collect(&*self.backend, slot)?.to_vec())
    }

    /// 最近一次读取的计时结果
    pub fn timer_results(&self) -> &[TimerResult] {
        self.timers.last_results()
    }

    // ---- PSO 缓存 ----

    /// 两个 PSO 缓存各执行一步增量淘汰，`frame` 为设备当前的帧号
    pub fn clear_unused_pipelines_tick(&mut self, frame: u64) -> usize {
        self.graphics_pipelines.clear_unused_tick(frame) + self.compute_pipelines.clear_unused_tick(frame)
    }

    /// 清空 PSO 缓存
    pub fn clear_pipelines(&mut self) -> usize {
        self.graphics_pipelines.clear() + self.compute_pipelines.clear()
    }

    pub fn graphics_pipeline_stats(&self) -> PsoCacheStats {
        self.graphics_pipelines.stats()
    }

    pub fn compute_pipeline_stats(&self) -> PsoCacheStats {
        self.compute_pipelines.stats()
    }

    // ---- 查询 ----

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn slot(&self) -> FrameSlotIndex {
        self.slot
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn items_since_flush(&self) -> u32 {
        self.items_since_flush
    }

    /// 帧槽瞬态堆的统计信息
    pub fn transient_stats(&self, slot: FrameSlotIndex) -> DescriptorHeapStats {
        self.transient[slot].stats()
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

/// 描述符表中的视图需要的资源状态
fn shader_state(kind: ViewKind, bind_point: BindPoint) -> ResourceState {
    match (kind, bind_point) {
        (ViewKind::UnorderedAccess, _) => ResourceState::UnorderedAccess,
        (ViewKind::ConstantBuffer, _) => ResourceState::VertexAndConstantBuffer,
        (_, BindPoint::Compute) => ResourceState::NonPixelShaderResource,
        (_, BindPoint::Graphics) => ResourceState::AllShaderResource,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::null::{NullBackend, NullCommand, NullDescriptor};
    use crate::renderer::deferred::DeferredReleaseQueue;
    use crate::renderer::pipeline::CullMode;
    use crate::renderer::resource::{Format, ResourceDescriptor, ResourceShape, ResourceUsage};
    use crate::renderer::shader::ShaderLibrary;

    struct Fixture {
        backend: Arc<NullBackend>,
        heaps: Arc<PersistentHeaps<NullBackend>>,
        library: Arc<ShaderLibrary>,
        queue: DeferredReleaseQueue,
        context: CommandListContext<NullBackend>,
        vs: ShaderHandle,
        ps: ShaderHandle,
        cs: ShaderHandle,
    }

    fn fixture(config: Config) -> Fixture {
        let backend = Arc::new(NullBackend::new());
        let heaps = Arc::new(
            PersistentHeaps::new(&*backend, &config.descriptors, FailurePolicy::Propagate).unwrap(),
        );
        let library = Arc::new(ShaderLibrary::new());
        let vs = library.register("test.vs", ShaderStage::Vertex);
        let ps = library.register("test.ps", ShaderStage::Pixel);
        let cs = library.register("test.cs", ShaderStage::Compute);
        library.cook(vs, vec![1u8]).unwrap();
        library.cook(ps, vec![2u8]).unwrap();
        library.cook(cs, vec![3u8]).unwrap();

        let queue = DeferredReleaseQueue::new(2);
        let defaults = DefaultBindings {
            viewport: Viewport::full(64, 64),
            scissor: ScissorRect::full(64, 64),
            blend_factor: [1.0; 4],
            stencil_ref: 0,
        };
        let context = CommandListContext::new(
            backend.clone(),
            heaps.clone(),
            library.clone(),
            queue.releaser(),
            &config,
            2,
            defaults,
        )
        .unwrap();
        Fixture {
            backend,
            heaps,
            library,
            queue,
            context,
            vs,
            ps,
            cs,
        }
    }

    fn texture(f: &Fixture, name: &str) -> GpuResource<NullBackend> {
        let desc = ResourceDescriptor::new(ResourceShape::texture_2d(
            32,
            32,
            Format::Rgba8Unorm,
            1,
            ResourceUsage::all_color(),
        ))
        .with_name(name);
        let native = f.backend.create_resource(&desc, ResourceState::Common).unwrap();
        GpuResource::from_native(native, &desc, ResourceState::Common, f.heaps.clone(), f.queue.releaser())
    }

    #[test]
    fn test_state_machine_transitions() {
        let mut f = fixture(Config::default());
        let ctx = &mut f.context;
        assert_eq!(ctx.state(), ContextState::Idle);
        assert!(ctx.begin_items(ItemKind::Graphics).is_err());
        assert!(ctx.end_frame(FenceValue::new(1)).is_err());

        ctx.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        assert_eq!(ctx.state(), ContextState::Recording);
        assert!(ctx.begin_frame(0, 1, FenceValue::ZERO).is_err());

        ctx.begin_items(ItemKind::Graphics).unwrap();
        assert!(ctx.begin_items(ItemKind::Graphics).is_err());
        assert!(ctx.end_frame(FenceValue::new(1)).is_err());
        assert!(ctx.flush().is_err());
        ctx.end_items().unwrap();
        assert!(ctx.end_items().is_err());

        ctx.end_frame(FenceValue::new(1)).unwrap();
        assert_eq!(ctx.state(), ContextState::Submitted);
        assert_eq!(f.backend.stats().submissions, 1);
    }

    #[test]
    fn test_graphics_item_draws_and_caches_pipeline() {
        let mut f = fixture(Config::default());
        let tex = texture(&f, "albedo");
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.begin_items(ItemKind::Graphics).unwrap();
        for _ in 0..3 {
            let item = GraphicsItem::new(f.vs, DrawArgs::new(3))
                .with_pixel_shader(f.ps)
                .bind(0, &tex, ViewRequest::srv());
            assert_eq!(f.context.execute_graphics_item(&item).unwrap(), ItemStatus::Executed);
        }
        f.context.end_items().unwrap();
        f.context.end_frame(FenceValue::new(1)).unwrap();

        assert_eq!(f.backend.stats().pipelines_created, 1);
        assert_eq!(f.context.graphics_pipeline_stats().hits, 2);
        // 只在第一次使用时转换一次
        assert_eq!(tex.state(), ResourceState::AllShaderResource);
        assert_eq!(f.context.stats().barriers, 1);

        let commands = f.backend.executed_commands();
        let draws = commands
            .iter()
            .filter(|c| matches!(c, NullCommand::Draw { count: 3, indexed: false, .. }))
            .count();
        assert_eq!(draws, 3);
        let item_tables = commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    NullCommand::SetDescriptorTable {
                        root_parameter: ROOT_PARAM_ITEM_TABLE,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(item_tables, 3);

        // 默认的绘制上下文表 + 3 个 Item 表
        let config = Config::default();
        assert_eq!(
            f.context.transient_stats(0).used,
            config.descriptors.draw_context_table_size + 3 * config.descriptors.item_table_size
        );
    }

    #[test]
    fn test_descriptors_copied_into_item_table() {
        let mut f = fixture(Config::default());
        let tex = texture(&f, "copied");
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.begin_items(ItemKind::Compute).unwrap();
        let item = ComputeItem::new(f.cs, [4, 4, 1]).bind(1, &tex, ViewRequest::uav());
        f.context.execute_compute_item(&item).unwrap();
        f.context.end_items().unwrap();

        let table_size = Config::default().descriptors.draw_context_table_size;
        let heap = f.context.transient[0].native();
        assert_eq!(heap.descriptor(table_size), Some(NullDescriptor::Null));
        match heap.descriptor(table_size + 1) {
            Some(NullDescriptor::View { view, .. }) => assert_eq!(view.kind, ViewKind::UnorderedAccess),
            other => panic!("unexpected descriptor {:?}", other),
        }
        assert_eq!(tex.state(), ResourceState::UnorderedAccess);
        assert_eq!(tex.view_count(), 1);
    }

    #[test]
    fn test_compiling_shader_skips_item() {
        let mut f = fixture(Config::default());
        f.library.mark_compiling(f.ps).unwrap();
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.begin_items(ItemKind::Graphics).unwrap();
        let item = GraphicsItem::new(f.vs, DrawArgs::new(3)).with_pixel_shader(f.ps);
        assert_eq!(
            f.context.execute_graphics_item(&item).unwrap(),
            ItemStatus::ShadersCompiling
        );
        assert_eq!(f.context.stats().items_skipped, 1);
        assert_eq!(f.backend.stats().pipelines_created, 0);

        f.library.clear(f.vs).unwrap();
        let err = f.context.execute_graphics_item(&item).err().unwrap();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::ShaderNotReady(_))));
    }

    #[test]
    fn test_wrong_batch_kind_rejected() {
        let mut f = fixture(Config::default());
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.begin_items(ItemKind::Graphics).unwrap();
        let item = ComputeItem::<NullBackend>::new(f.cs, [1, 1, 1]);
        assert!(f.context.execute_compute_item(&item).is_err());
    }

    #[test]
    fn test_end_items_flushes_past_threshold() {
        let mut config = Config::default();
        config.commands.flush_threshold = 4;
        let mut f = fixture(config);
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();

        f.context.begin_items(ItemKind::Compute).unwrap();
        for _ in 0..4 {
            let item = ComputeItem::<NullBackend>::new(f.cs, [1, 1, 1]);
            f.context.execute_compute_item(&item).unwrap();
        }
        f.context.end_items().unwrap();
        assert_eq!(f.context.stats().flushes, 0);

        f.context.begin_items(ItemKind::Compute).unwrap();
        let item = ComputeItem::<NullBackend>::new(f.cs, [1, 1, 1]);
        f.context.execute_compute_item(&item).unwrap();
        f.context.end_items().unwrap();
        assert_eq!(f.context.stats().flushes, 1);
        assert_eq!(f.context.items_since_flush(), 0);
        assert_eq!(f.backend.stats().submissions, 1);

        // flush 之后重新绑定了默认状态和绘制上下文表
        f.context.end_frame(FenceValue::new(1)).unwrap();
        let commands = f.backend.executed_commands();
        let defaults = commands
            .iter()
            .filter(|c| matches!(c, NullCommand::BindDefaults { .. }))
            .count();
        assert_eq!(defaults, 2);
    }

    #[test]
    fn test_render_targets_feed_pipeline_key() {
        let mut f = fixture(Config::default());
        let color = texture(&f, "color");
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.set_render_targets(&[&color], None).unwrap();
        f.context.clear_render_target(&color, [0.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(color.state(), ResourceState::RenderTarget);
        assert_eq!(f.context.render_targets().colors(), &[Format::Rgba8Unorm]);

        f.context.begin_items(ItemKind::Graphics).unwrap();
        let item = GraphicsItem::<NullBackend>::new(f.vs, DrawArgs::new(3)).with_pixel_shader(f.ps);
        f.context.execute_graphics_item(&item).unwrap();
        f.context.end_items().unwrap();

        f.context.set_render_targets(&[], None).unwrap();
        f.context.begin_items(ItemKind::Graphics).unwrap();
        f.context.execute_graphics_item(&item).unwrap();
        f.context.end_items().unwrap();
        assert_eq!(f.backend.stats().pipelines_created, 2);
    }

    #[test]
    fn test_render_state_feeds_pipeline_key() {
        let mut f = fixture(Config::default());
        let item = GraphicsItem::<NullBackend>::new(f.vs, DrawArgs::new(3));
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.begin_items(ItemKind::Graphics).unwrap();
        f.context.execute_graphics_item(&item).unwrap();
        f.context.end_items().unwrap();

        let mut state = f.context.render_state();
        state.cull = if state.cull == CullMode::None {
            CullMode::Back
        } else {
            CullMode::None
        };
        f.context.set_render_state(state).unwrap();
        assert_eq!(f.context.render_state(), state);

        f.context.begin_items(ItemKind::Graphics).unwrap();
        f.context.execute_graphics_item(&item).unwrap();
        f.context.end_items().unwrap();
        assert_eq!(f.backend.stats().pipelines_created, 2);
    }

    #[test]
    fn test_bound_target_index_survives_drop_until_slot_reuse() {
        let mut f = fixture(Config::default());
        let color = texture(&f, "transient color");
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context.set_render_targets(&[&color], None).unwrap();
        let bound = color.view(&*f.backend, ViewRequest::rtv()).unwrap().handle;

        drop(color);
        assert!(f.heaps.rtv.is_live(bound));
        let other = texture(&f, "other color");
        let fresh = other.view(&*f.backend, ViewRequest::rtv()).unwrap().handle;
        assert_ne!(fresh.index, bound.index);

        // flush 之后按原索引重新绑定
        f.context.flush().unwrap();
        f.context.end_frame(FenceValue::new(1)).unwrap();
        let rebinds = f
            .backend
            .executed_commands()
            .iter()
            .filter(|c| matches!(c, NullCommand::SetRenderTargets { rtvs, .. } if rtvs[..] == [bound.index]))
            .count();
        assert_eq!(rebinds, 2);

        f.queue.drain(0);
        assert!(!f.heaps.rtv.is_live(bound));
        assert!(f.heaps.rtv.is_live(fresh));
    }

    #[test]
    fn test_subresource_transitions_recorded() {
        let mut f = fixture(Config::default());
        let desc = ResourceDescriptor::new(ResourceShape::texture_2d(
            32,
            32,
            Format::Rgba8Unorm,
            4,
            ResourceUsage::all_color(),
        ));
        let native = f.backend.create_resource(&desc, ResourceState::Common).unwrap();
        let tex = GpuResource::from_native(native, &desc, ResourceState::Common, f.heaps.clone(), f.queue.releaser());

        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context
            .transition_subresource(&tex, ResourceState::UnorderedAccess, 2)
            .unwrap();
        f.context
            .transition_resource(&tex, ResourceState::PixelShaderResource)
            .unwrap();
        assert_eq!(f.context.stats().barriers, 3);
        f.context.adopt_resource_state(&tex, ResourceState::Common).unwrap();
        assert_eq!(f.context.stats().barriers, 3);
        assert_eq!(tex.state(), ResourceState::Common);
    }

    #[test]
    fn test_draw_context_table_is_rebound() {
        let mut f = fixture(Config::default());
        let env = texture(&f, "environment");
        f.context.begin_frame(0, 1, FenceValue::ZERO).unwrap();
        f.context
            .set_draw_context_resources(&[Some(ViewBinding::new(&env, ViewRequest::srv()))])
            .unwrap();
        let size = Config::default().descriptors.draw_context_table_size;
        assert_eq!(f.context.draw_context_table, Some(size));
        assert!(f
            .context
            .set_draw_context_resources(&(0..size + 1).map(|_| None).collect::<Vec<_>>())
            .is_err());
    }

    #[test]
    fn test_recording_from_other_thread_rejected() {
        let f = fixture(Config::default());
        let main = f.context.main_thread;
        let rejected = std::thread::spawn(move || main.check("execute_graphics_item").is_err())
            .join()
            .unwrap();
        assert!(rejected);
    }
}
