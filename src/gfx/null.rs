//! 空后端
//!
//! 不访问任何 GPU：命令被记录在内存里，提交时"执行"（写入时间戳、
//! 记入执行日志），Fence 只在被等待时推进，模拟 GPU 落后于 CPU 的情况。
//! 用于单元测试、集成测试和无头演示程序。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::trace;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{
    BindPoint, DefaultBindings, DrawCall, GpuBackend, PresentError, Presenter, ResourceBarrier,
    ScissorRect, Viewport,
};
use crate::renderer::descriptor::{DescriptorHeapDescriptor, DescriptorHeapKind};
use crate::renderer::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::renderer::resource::{
    Format, ResourceDescriptor, ResourceShape, ResourceState, ResourceUsage,
};
use crate::renderer::view::ViewDescriptor;

/// 每条执行的命令推进的时间戳 tick 数
const TICKS_PER_COMMAND: u64 = 10;

/// 时间戳频率：1 tick = 1 微秒
const TIMESTAMP_FREQUENCY: u64 = 1_000_000;

/// 执行日志最多保留的命令条数，超出后丢弃最旧的
pub const EXECUTED_LOG_CAPACITY: usize = 4096;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Counters {
    resources_created: AtomicU64,
    resources_destroyed: AtomicU64,
    pipelines_created: AtomicU64,
    pipelines_destroyed: AtomicU64,
}

/// 空后端统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullStats {
    pub resources_created: u64,
    pub resources_destroyed: u64,
    pub pipelines_created: u64,
    pub pipelines_destroyed: u64,
    pub submissions: u64,
    pub signaled: u64,
    pub completed: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    signaled: u64,
    completed: u64,
    submissions: u64,
    clock: u64,
    executed: VecDeque<NullCommand>,
}

/// 空资源
#[derive(Debug, Clone)]
pub struct NullResource {
    inner: Arc<ResourceInner>,
}

#[derive(Debug)]
struct ResourceInner {
    id: u64,
    shape: ResourceShape,
    counters: Arc<Counters>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        self.counters.resources_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

impl NullResource {
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn shape(&self) -> &ResourceShape {
        &self.inner.shape
    }
}

/// 空管线
#[derive(Debug)]
pub struct NullPipeline {
    id: u64,
    counters: Arc<Counters>,
}

impl NullPipeline {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for NullPipeline {
    fn drop(&mut self) {
        self.counters.pipelines_destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

/// 堆中的一个描述符
#[derive(Debug, Clone, PartialEq)]
pub enum NullDescriptor {
    View { resource: u64, view: ViewDescriptor },
    Null,
}

/// 空描述符堆
#[derive(Debug)]
pub struct NullDescriptorHeap {
    id: u64,
    kind: DescriptorHeapKind,
    shader_visible: bool,
    slots: Mutex<Vec<Option<NullDescriptor>>>,
}

impl NullDescriptorHeap {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    /// 读取某个槽位的内容
    pub fn descriptor(&self, index: u32) -> Option<NullDescriptor> {
        lock(&self.slots).get(index as usize).cloned().flatten()
    }

    fn write(&self, index: u32, descriptor: NullDescriptor) {
        if let Some(slot) = lock(&self.slots).get_mut(index as usize) {
            *slot = Some(descriptor);
        }
    }
}

/// 时间戳存储
#[derive(Debug, Default)]
pub struct QueryStorage {
    raw: Mutex<Vec<u64>>,
    resolved: Mutex<Vec<u64>>,
}

/// 空查询堆
#[derive(Debug, Clone)]
pub struct NullQueryHeap {
    storage: Arc<QueryStorage>,
}

/// 空命令分配器
#[derive(Debug, Default)]
pub struct NullCommandAllocator {
    resets: u64,
}

impl NullCommandAllocator {
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

/// 空命令列表
#[derive(Debug, Default)]
pub struct NullCommandList {
    commands: Vec<NullCommand>,
    open: bool,
    /// 在关闭状态下录制的命令数
    invalid_records: u32,
}

impl NullCommandList {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn commands(&self) -> &[NullCommand] {
        &self.commands
    }

    fn record(&mut self, command: NullCommand) {
        if !self.open {
            self.invalid_records += 1;
        }
        self.commands.push(command);
    }
}

/// 记录下来的命令
#[derive(Debug, Clone)]
pub enum NullCommand {
    BindDefaults {
        heap: u64,
        viewport: Viewport,
    },
    SetViewport {
        viewport: Viewport,
        scissor: ScissorRect,
    },
    SetPipeline {
        pipeline: u64,
        bind_point: BindPoint,
    },
    SetDescriptorTable {
        bind_point: BindPoint,
        root_parameter: u32,
        heap: u64,
        base_index: u32,
    },
    Barrier {
        resource: u64,
        subresource: Option<u32>,
        before: ResourceState,
        after: ResourceState,
    },
    SetRenderTargets {
        rtvs: Vec<u32>,
        dsv: Option<u32>,
    },
    ClearRenderTarget {
        index: u32,
        color: [f32; 4],
    },
    ClearDepthStencil {
        index: u32,
        depth: f32,
        stencil: u8,
    },
    Draw {
        indexed: bool,
        count: u32,
        instances: u32,
    },
    Dispatch {
        groups: [u32; 3],
    },
    Timestamp {
        storage: Arc<QueryStorage>,
        index: u32,
    },
    ResolveTimestamps {
        storage: Arc<QueryStorage>,
        count: u32,
    },
}

/// 空后端
#[derive(Debug, Default)]
pub struct NullBackend {
    queue: Mutex<QueueState>,
    counters: Arc<Counters>,
    next_id: AtomicU64,
    fail_next_pipeline: AtomicBool,
    fail_next_view_write: AtomicBool,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 下一次管线创建失败
    pub fn fail_next_pipeline(&self) {
        self.fail_next_pipeline.store(true, Ordering::SeqCst);
    }

    /// 下一次视图写入失败
    pub fn fail_next_view_write(&self) {
        self.fail_next_view_write.store(true, Ordering::SeqCst);
    }

    /// 让 GPU 追上所有已 signal 的值
    pub fn retire_all(&self) {
        let mut queue = lock(&self.queue);
        queue.completed = queue.signaled;
    }

    /// 已执行的命令（最近的 [`EXECUTED_LOG_CAPACITY`] 条）
    pub fn executed_commands(&self) -> Vec<NullCommand> {
        lock(&self.queue).executed.iter().cloned().collect()
    }

    /// 取出并清空执行日志
    pub fn take_executed_commands(&self) -> Vec<NullCommand> {
        std::mem::take(&mut lock(&self.queue).executed).into()
    }

    pub fn stats(&self) -> NullStats {
        let queue = lock(&self.queue);
        NullStats {
            resources_created: self.counters.resources_created.load(Ordering::SeqCst),
            resources_destroyed: self.counters.resources_destroyed.load(Ordering::SeqCst),
            pipelines_created: self.counters.pipelines_created.load(Ordering::SeqCst),
            pipelines_destroyed: self.counters.pipelines_destroyed.load(Ordering::SeqCst),
            submissions: queue.submissions,
            signaled: queue.signaled,
            completed: queue.completed,
        }
    }

    fn create_pipeline(&self) -> Result<NullPipeline> {
        if self.fail_next_pipeline.swap(false, Ordering::SeqCst) {
            return Err(GraphicsError::PipelineCreationFailed(
                "null backend was asked to fail".to_string(),
            )
            .into());
        }
        self.counters.pipelines_created.fetch_add(1, Ordering::SeqCst);
        Ok(NullPipeline {
            id: self.allocate_id(),
            counters: self.counters.clone(),
        })
    }
}

impl GpuBackend for NullBackend {
    type Resource = NullResource;
    type Pipeline = NullPipeline;
    type DescriptorHeap = NullDescriptorHeap;
    type CommandAllocator = NullCommandAllocator;
    type CommandList = NullCommandList;
    type QueryHeap = NullQueryHeap;

    fn backend_name(&self) -> &str {
        "Null"
    }

    fn create_resource(&self, desc: &ResourceDescriptor, _initial_state: ResourceState) -> Result<NullResource> {
        if desc.shape.width == 0 {
            return Err(GraphicsError::ResourceCreation("zero-sized resource".to_string()).into());
        }
        self.counters.resources_created.fetch_add(1, Ordering::SeqCst);
        Ok(NullResource {
            inner: Arc::new(ResourceInner {
                id: self.allocate_id(),
                shape: desc.shape,
                counters: self.counters.clone(),
            }),
        })
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<NullDescriptorHeap> {
        Ok(NullDescriptorHeap {
            id: self.allocate_id(),
            kind: desc.kind,
            shader_visible: desc.shader_visible,
            slots: Mutex::new(vec![None; desc.num_descriptors as usize]),
        })
    }

    fn write_view(
        &self,
        heap: &NullDescriptorHeap,
        index: u32,
        resource: &NullResource,
        view: &ViewDescriptor,
    ) -> Result<()> {
        if self.fail_next_view_write.swap(false, Ordering::SeqCst) {
            return Err(GraphicsError::InvalidViewRequest("injected view write failure".to_string()).into());
        }
        if view.kind.heap_kind() != heap.kind {
            return Err(GraphicsError::InvalidViewRequest(format!(
                "{} view written into {} heap",
                view.kind.name(),
                heap.kind.name()
            ))
            .into());
        }
        heap.write(
            index,
            NullDescriptor::View {
                resource: resource.id(),
                view: *view,
            },
        );
        Ok(())
    }

    fn write_null_view(&self, heap: &NullDescriptorHeap, index: u32) {
        heap.write(index, NullDescriptor::Null);
    }

    fn copy_descriptors(
        &self,
        dst: &NullDescriptorHeap,
        dst_index: u32,
        src: &NullDescriptorHeap,
        src_index: u32,
        count: u32,
    ) {
        for offset in 0..count {
            let descriptor = src.descriptor(src_index + offset).unwrap_or(NullDescriptor::Null);
            dst.write(dst_index + offset, descriptor);
        }
    }

    fn create_graphics_pipeline(&self, _desc: &GraphicsPipelineDesc) -> Result<NullPipeline> {
        self.create_pipeline()
    }

    fn create_compute_pipeline(&self, _desc: &ComputePipelineDesc) -> Result<NullPipeline> {
        self.create_pipeline()
    }

    fn create_command_allocator(&self) -> Result<NullCommandAllocator> {
        Ok(NullCommandAllocator::default())
    }

    fn create_command_list(&self, _allocator: &NullCommandAllocator) -> Result<NullCommandList> {
        Ok(NullCommandList::default())
    }

    fn reset_command_allocator(&self, allocator: &mut NullCommandAllocator) -> Result<()> {
        allocator.resets += 1;
        Ok(())
    }

    fn reset_command_list(&self, list: &mut NullCommandList, _allocator: &NullCommandAllocator) -> Result<()> {
        if list.open {
            return Err(GraphicsError::CommandExecution(
                "command list reset while still open".to_string(),
            )
            .into());
        }
        list.commands.clear();
        list.invalid_records = 0;
        list.open = true;
        Ok(())
    }

    fn close_command_list(&self, list: &mut NullCommandList) -> Result<()> {
        if !list.open {
            return Err(GraphicsError::CommandExecution("command list closed twice".to_string()).into());
        }
        list.open = false;
        if list.invalid_records > 0 {
            return Err(GraphicsError::CommandExecution(format!(
                "{} commands recorded into a closed list",
                list.invalid_records
            ))
            .into());
        }
        Ok(())
    }

    fn execute_command_list(&self, list: &NullCommandList) -> Result<()> {
        if list.open {
            return Err(GraphicsError::CommandExecution(
                "command list executed while still open".to_string(),
            )
            .into());
        }
        let mut queue = lock(&self.queue);
        for command in &list.commands {
            queue.clock += TICKS_PER_COMMAND;
            match command {
                NullCommand::Timestamp { storage, index } => {
                    let mut raw = lock(&storage.raw);
                    if let Some(slot) = raw.get_mut(*index as usize) {
                        *slot = queue.clock;
                    }
                }
                NullCommand::ResolveTimestamps { storage, count } => {
                    let raw = lock(&storage.raw);
                    let mut resolved = lock(&storage.resolved);
                    let count = (*count as usize).min(raw.len());
                    resolved[..count].copy_from_slice(&raw[..count]);
                }
                _ => {}
            }
        }
        for command in &list.commands {
            if queue.executed.len() == EXECUTED_LOG_CAPACITY {
                queue.executed.pop_front();
            }
            queue.executed.push_back(command.clone());
        }
        queue.submissions += 1;
        trace!(commands = list.commands.len(), "Null command list executed");
        Ok(())
    }

    fn bind_defaults(&self, list: &mut NullCommandList, heap: &NullDescriptorHeap, defaults: &DefaultBindings) {
        list.record(NullCommand::BindDefaults {
            heap: heap.id,
            viewport: defaults.viewport,
        });
    }

    fn set_viewport(&self, list: &mut NullCommandList, viewport: &Viewport, scissor: &ScissorRect) {
        list.record(NullCommand::SetViewport {
            viewport: *viewport,
            scissor: *scissor,
        });
    }

    fn set_pipeline(&self, list: &mut NullCommandList, pipeline: &NullPipeline, bind_point: BindPoint) {
        list.record(NullCommand::SetPipeline {
            pipeline: pipeline.id,
            bind_point,
        });
    }

    fn set_descriptor_table(
        &self,
        list: &mut NullCommandList,
        bind_point: BindPoint,
        root_parameter: u32,
        heap: &NullDescriptorHeap,
        base_index: u32,
    ) {
        list.record(NullCommand::SetDescriptorTable {
            bind_point,
            root_parameter,
            heap: heap.id,
            base_index,
        });
    }

    fn resource_barriers(&self, list: &mut NullCommandList, barriers: &[ResourceBarrier<'_, Self>]) {
        for barrier in barriers {
            list.record(NullCommand::Barrier {
                resource: barrier.resource.id(),
                subresource: barrier.subresource,
                before: barrier.before,
                after: barrier.after,
            });
        }
    }

    fn set_render_targets(
        &self,
        list: &mut NullCommandList,
        _rtv_heap: &NullDescriptorHeap,
        rtvs: &[u32],
        _dsv_heap: &NullDescriptorHeap,
        dsv: Option<u32>,
    ) {
        list.record(NullCommand::SetRenderTargets {
            rtvs: rtvs.to_vec(),
            dsv,
        });
    }

    fn clear_render_target(&self, list: &mut NullCommandList, _heap: &NullDescriptorHeap, index: u32, color: [f32; 4]) {
        list.record(NullCommand::ClearRenderTarget { index, color });
    }

    fn clear_depth_stencil(
        &self,
        list: &mut NullCommandList,
        _heap: &NullDescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    ) {
        list.record(NullCommand::ClearDepthStencil { index, depth, stencil });
    }

    fn draw(&self, list: &mut NullCommandList, call: &DrawCall<'_, Self>) {
        list.record(NullCommand::Draw {
            indexed: call.index_buffer.is_some(),
            count: call.args.count,
            instances: call.args.instance_count,
        });
    }

    fn dispatch(&self, list: &mut NullCommandList, groups: [u32; 3]) {
        list.record(NullCommand::Dispatch { groups });
    }

    fn signal(&self, value: u64) -> Result<()> {
        let mut queue = lock(&self.queue);
        queue.signaled = queue.signaled.max(value);
        Ok(())
    }

    fn completed_fence_value(&self) -> u64 {
        lock(&self.queue).completed
    }

    fn wait_for_fence(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        let mut queue = lock(&self.queue);
        if value <= queue.signaled {
            queue.completed = queue.completed.max(value);
            return Ok(true);
        }
        match timeout {
            Some(_) => Ok(false),
            None => Err(GraphicsError::DeviceLost(format!(
                "waiting forever on fence value {} that was never signaled",
                value
            ))
            .into()),
        }
    }

    fn create_timestamp_heap(&self, count: u32) -> Result<NullQueryHeap> {
        Ok(NullQueryHeap {
            storage: Arc::new(QueryStorage {
                raw: Mutex::new(vec![0; count as usize]),
                resolved: Mutex::new(vec![0; count as usize]),
            }),
        })
    }

    fn write_timestamp(&self, list: &mut NullCommandList, heap: &NullQueryHeap, index: u32) {
        list.record(NullCommand::Timestamp {
            storage: heap.storage.clone(),
            index,
        });
    }

    fn resolve_timestamps(&self, list: &mut NullCommandList, heap: &NullQueryHeap, count: u32) {
        list.record(NullCommand::ResolveTimestamps {
            storage: heap.storage.clone(),
            count,
        });
    }

    fn read_timestamps(&self, heap: &NullQueryHeap, count: u32) -> Result<Vec<u64>> {
        let resolved = lock(&heap.storage.resolved);
        let count = (count as usize).min(resolved.len());
        Ok(resolved[..count].to_vec())
    }

    fn timestamp_frequency(&self) -> Result<u64> {
        Ok(TIMESTAMP_FREQUENCY)
    }
}

/// 空交换链
pub struct NullPresenter {
    backend: Arc<NullBackend>,
    backbuffers: Vec<NullResource>,
    shape: ResourceShape,
    index: u32,
    presents: u64,
    fail_next_present: Option<PresentError>,
    fullscreen: Option<bool>,
}

impl NullPresenter {
    pub fn new(backend: &Arc<NullBackend>, count: u32, width: u32, height: u32) -> Result<Self> {
        let shape = ResourceShape::texture_2d(width, height, Format::Bgra8Unorm, 1, ResourceUsage::RENDER_TARGET);
        let mut presenter = Self {
            backend: backend.clone(),
            backbuffers: Vec::new(),
            shape,
            index: 0,
            presents: 0,
            fail_next_present: None,
            fullscreen: Some(false),
        };
        presenter.create_backbuffers(count)?;
        Ok(presenter)
    }

    fn create_backbuffers(&mut self, count: u32) -> Result<()> {
        let desc = ResourceDescriptor::new(self.shape).with_name("Null Backbuffer");
        self.backbuffers = (0..count)
            .map(|_| self.backend.create_resource(&desc, ResourceState::Present))
            .collect::<Result<Vec<_>>>()?;
        self.index = 0;
        Ok(())
    }

    /// 下一次 Present 失败
    pub fn fail_next_present(&mut self, error: PresentError) {
        self.fail_next_present = Some(error);
    }

    /// 设置全屏查询结果；`None` 表示查询失败
    pub fn set_fullscreen(&mut self, fullscreen: Option<bool>) {
        self.fullscreen = fullscreen;
    }

    /// 成功 Present 的次数
    pub fn presents(&self) -> u64 {
        self.presents
    }
}

impl Presenter<NullBackend> for NullPresenter {
    fn backbuffer_count(&self) -> u32 {
        self.backbuffers.len() as u32
    }

    fn current_backbuffer_index(&self) -> u32 {
        self.index
    }

    fn backbuffer(&self, index: u32) -> Result<NullResource> {
        self.backbuffers.get(index as usize).cloned().ok_or_else(|| {
            GraphicsError::SwapchainError(format!("backbuffer {} does not exist", index)).into()
        })
    }

    fn backbuffer_shape(&self) -> ResourceShape {
        self.shape
    }

    fn present(&mut self, _sync_interval: u32) -> std::result::Result<(), PresentError> {
        if let Some(error) = self.fail_next_present.take() {
            return Err(error);
        }
        self.presents += 1;
        self.index = (self.index + 1) % self.backbuffer_count().max(1);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let count = self.backbuffer_count();
        self.shape.width = width as u64;
        self.shape.height = height;
        self.create_backbuffers(count)
    }

    fn is_fullscreen(&self) -> Result<bool> {
        self.fullscreen.ok_or_else(|| {
            GraphicsError::SwapchainError("fullscreen state changed externally".to_string()).into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fence_only_advances_when_waited() {
        let backend = NullBackend::new();
        backend.signal(3).unwrap();
        assert_eq!(backend.completed_fence_value(), 0);
        assert!(backend.wait_for_fence(2, None).unwrap());
        assert_eq!(backend.completed_fence_value(), 2);
        assert!(!backend.wait_for_fence(4, Some(Duration::from_millis(1))).unwrap());
        assert!(backend.wait_for_fence(4, None).is_err());
        backend.retire_all();
        assert_eq!(backend.completed_fence_value(), 3);
    }

    #[test]
    fn test_command_list_validation() {
        let backend = NullBackend::new();
        let allocator = backend.create_command_allocator().unwrap();
        let mut list = backend.create_command_list(&allocator).unwrap();

        // 关闭状态下录制
        backend.dispatch(&mut list, [1, 1, 1]);
        backend.reset_command_list(&mut list, &allocator).unwrap();
        assert!(list.commands().is_empty());

        backend.dispatch(&mut list, [2, 1, 1]);
        assert!(backend.execute_command_list(&list).is_err());
        backend.close_command_list(&mut list).unwrap();
        backend.execute_command_list(&list).unwrap();
        assert_eq!(backend.stats().submissions, 1);

        backend.dispatch(&mut list, [3, 1, 1]);
        backend.reset_command_list(&mut list, &allocator).unwrap();
        backend.close_command_list(&mut list).unwrap();
        assert!(backend.close_command_list(&mut list).is_err());
    }

    #[test]
    fn test_executed_log_is_bounded() {
        let backend = NullBackend::new();
        let allocator = backend.create_command_allocator().unwrap();
        let mut list = backend.create_command_list(&allocator).unwrap();
        for round in 0..3u32 {
            backend.reset_command_list(&mut list, &allocator).unwrap();
            for x in 0..EXECUTED_LOG_CAPACITY as u32 {
                backend.dispatch(&mut list, [round, x, 1]);
            }
            backend.close_command_list(&mut list).unwrap();
            backend.execute_command_list(&list).unwrap();
        }

        let log = backend.executed_commands();
        assert_eq!(log.len(), EXECUTED_LOG_CAPACITY);
        assert!(matches!(log[0], NullCommand::Dispatch { groups: [2, 0, 1] }));
        assert_eq!(backend.take_executed_commands().len(), EXECUTED_LOG_CAPACITY);
        assert!(backend.executed_commands().is_empty());
    }

    #[test]
    fn test_timestamps_written_on_execute() {
        let backend = NullBackend::new();
        let heap = backend.create_timestamp_heap(4).unwrap();
        let allocator = backend.create_command_allocator().unwrap();
        let mut list = backend.create_command_list(&allocator).unwrap();
        backend.reset_command_list(&mut list, &allocator).unwrap();
        backend.write_timestamp(&mut list, &heap, 0);
        backend.dispatch(&mut list, [1, 1, 1]);
        backend.write_timestamp(&mut list, &heap, 1);
        backend.resolve_timestamps(&mut list, &heap, 2);
        backend.close_command_list(&mut list).unwrap();
        backend.execute_command_list(&list).unwrap();

        let values = backend.read_timestamps(&heap, 2).unwrap();
        assert_eq!(values[1] - values[0], 2 * TICKS_PER_COMMAND);
    }

    #[test]
    fn test_presenter_cycles_backbuffers() {
        let backend = Arc::new(NullBackend::new());
        let mut presenter = NullPresenter::new(&backend, 3, 64, 32).unwrap();
        assert_eq!(presenter.backbuffer_count(), 3);
        for expected in [0, 1, 2, 0] {
            assert_eq!(presenter.current_backbuffer_index(), expected);
            presenter.present(1).unwrap();
        }

        presenter.fail_next_present(PresentError::Other("occluded".to_string()));
        assert!(presenter.present(1).is_err());
        assert_eq!(presenter.current_backbuffer_index(), 1);

        presenter.set_fullscreen(None);
        assert!(presenter.is_fullscreen().is_err());

        presenter.resize(128, 128).unwrap();
        assert_eq!(presenter.backbuffer_shape().height, 128);
        assert_eq!(presenter.current_backbuffer_index(), 0);
        assert_eq!(backend.stats().resources_destroyed, 3);
    }
}
