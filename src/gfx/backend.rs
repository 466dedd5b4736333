//! 图形后端的统一抽象接口
//!
//! 渲染核心（描述符堆、PSO 缓存、延迟释放、命令列表状态机）只通过
//! 本模块的 trait 与原生图形 API 交互。原生对象以关联类型出现，
//! 由具体后端决定其表示：
//!
//! - `dx12`：Direct3D 12（Windows）
//! - `null`：内存中记录命令、模拟 GPU 进度的后端，用于测试和无头运行
//!
//! # 设计理念
//!
//! - **原生类型关联化**：上层代码不接触 COM 接口
//! - **录制与提交分离**：录制函数不返回错误，错误在关闭 / 提交时暴露
//! - **Fence 由后端持有**：上层只关心数值

use std::time::Duration;

use crate::core::error::Result;
use crate::renderer::descriptor::DescriptorHeapDescriptor;
use crate::renderer::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc, PrimitiveTopology};
use crate::renderer::resource::{ResourceDescriptor, ResourceShape, ResourceState};
use crate::renderer::view::ViewDescriptor;

/// 每个 Item 的描述符表所在的根参数
pub const ROOT_PARAM_ITEM_TABLE: u32 = 0;

/// 每个绘制上下文的描述符表所在的根参数
pub const ROOT_PARAM_DRAW_CONTEXT_TABLE: u32 = 1;

/// 管线绑定点
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// 视口
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// 覆盖整个目标的视口
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 裁剪矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl ScissorRect {
    /// 覆盖整个目标的裁剪矩形
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            left: 0,
            top: 0,
            right: width as i32,
            bottom: height as i32,
        }
    }
}

/// 每次重置命令列表后绑定的默认状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DefaultBindings {
    pub viewport: Viewport,
    pub scissor: ScissorRect,
    pub blend_factor: [f32; 4],
    pub stencil_ref: u32,
}

/// 资源屏障
pub struct ResourceBarrier<'a, B: GpuBackend> {
    pub resource: &'a B::Resource,
    /// `None` 表示全部子资源
    pub subresource: Option<u32>,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 索引格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    U16,
    U32,
}

/// 顶点缓冲视图
pub struct VertexBufferView<'a, B: GpuBackend> {
    pub resource: &'a B::Resource,
    pub offset: u64,
    pub size: u64,
    pub stride: u32,
}

/// 索引缓冲视图
pub struct IndexBufferView<'a, B: GpuBackend> {
    pub resource: &'a B::Resource,
    pub offset: u64,
    pub size: u64,
    pub format: IndexFormat,
}

/// 绘制参数
///
/// 有索引缓冲时 `count` / `first` 指索引，否则指顶点。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawArgs {
    pub count: u32,
    pub instance_count: u32,
    pub first: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}

impl DrawArgs {
    /// 单实例绘制
    pub fn new(count: u32) -> Self {
        Self {
            count,
            instance_count: 1,
            first: 0,
            base_vertex: 0,
            first_instance: 0,
        }
    }

    /// 设置实例数量
    pub fn instanced(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count;
        self
    }
}

/// 一次绘制调用
pub struct DrawCall<'a, B: GpuBackend> {
    pub topology: PrimitiveTopology,
    pub vertex_buffer: Option<VertexBufferView<'a, B>>,
    pub index_buffer: Option<IndexBufferView<'a, B>>,
    pub args: DrawArgs,
}

/// 图形后端接口
pub trait GpuBackend: Send + Sync + Sized + 'static {
    type Resource: Send + 'static;
    type Pipeline: Send + 'static;
    type DescriptorHeap: Send + Sync + 'static;
    type CommandAllocator;
    type CommandList;
    type QueryHeap;

    /// 后端名称，用于日志输出
    fn backend_name(&self) -> &str;

    // ---- 资源与描述符 ----

    fn create_resource(&self, desc: &ResourceDescriptor, initial_state: ResourceState) -> Result<Self::Resource>;

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<Self::DescriptorHeap>;

    /// 在堆的 `index` 处写入视图
    fn write_view(
        &self,
        heap: &Self::DescriptorHeap,
        index: u32,
        resource: &Self::Resource,
        view: &ViewDescriptor,
    ) -> Result<()>;

    /// 写入空视图（未绑定的表槽位）
    fn write_null_view(&self, heap: &Self::DescriptorHeap, index: u32);

    /// 复制 `count` 个描述符
    fn copy_descriptors(
        &self,
        dst: &Self::DescriptorHeap,
        dst_index: u32,
        src: &Self::DescriptorHeap,
        src_index: u32,
        count: u32,
    );

    // ---- 管线 ----

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Self::Pipeline>;

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Self::Pipeline>;

    // ---- 命令 ----

    fn create_command_allocator(&self) -> Result<Self::CommandAllocator>;

    /// 创建命令列表（处于关闭状态）
    fn create_command_list(&self, allocator: &Self::CommandAllocator) -> Result<Self::CommandList>;

    /// 重置分配器；调用者保证其 GPU 工作已完成
    fn reset_command_allocator(&self, allocator: &mut Self::CommandAllocator) -> Result<()>;

    /// 重置并打开命令列表
    fn reset_command_list(&self, list: &mut Self::CommandList, allocator: &Self::CommandAllocator) -> Result<()>;

    fn close_command_list(&self, list: &mut Self::CommandList) -> Result<()>;

    fn execute_command_list(&self, list: &Self::CommandList) -> Result<()>;

    // ---- 录制 ----

    /// 绑定着色器可见描述符堆、默认根签名、视口 / 裁剪、混合因子和模板参考值
    fn bind_defaults(&self, list: &mut Self::CommandList, heap: &Self::DescriptorHeap, defaults: &DefaultBindings);

    fn set_viewport(&self, list: &mut Self::CommandList, viewport: &Viewport, scissor: &ScissorRect);

    fn set_pipeline(&self, list: &mut Self::CommandList, pipeline: &Self::Pipeline, bind_point: BindPoint);

    fn set_descriptor_table(
        &self,
        list: &mut Self::CommandList,
        bind_point: BindPoint,
        root_parameter: u32,
        heap: &Self::DescriptorHeap,
        base_index: u32,
    );

    fn resource_barriers(&self, list: &mut Self::CommandList, barriers: &[ResourceBarrier<'_, Self>]);

    fn set_render_targets(
        &self,
        list: &mut Self::CommandList,
        rtv_heap: &Self::DescriptorHeap,
        rtvs: &[u32],
        dsv_heap: &Self::DescriptorHeap,
        dsv: Option<u32>,
    );

    fn clear_render_target(&self, list: &mut Self::CommandList, heap: &Self::DescriptorHeap, index: u32, color: [f32; 4]);

    fn clear_depth_stencil(
        &self,
        list: &mut Self::CommandList,
        heap: &Self::DescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    );

    fn draw(&self, list: &mut Self::CommandList, call: &DrawCall<'_, Self>);

    fn dispatch(&self, list: &mut Self::CommandList, groups: [u32; 3]);

    // ---- Fence ----

    /// 在队列上 signal 一个值
    fn signal(&self, value: u64) -> Result<()>;

    /// GPU 已完成的值
    fn completed_fence_value(&self) -> u64;

    /// 阻塞等待；超时返回 `Ok(false)`
    fn wait_for_fence(&self, value: u64, timeout: Option<Duration>) -> Result<bool>;

    // ---- 时间戳查询 ----

    fn create_timestamp_heap(&self, count: u32) -> Result<Self::QueryHeap>;

    fn write_timestamp(&self, list: &mut Self::CommandList, heap: &Self::QueryHeap, index: u32);

    /// 把前 `count` 个查询解析到回读缓冲区
    fn resolve_timestamps(&self, list: &mut Self::CommandList, heap: &Self::QueryHeap, count: u32);

    /// 读取已解析的时间戳；调用者保证解析它们的帧已完成
    fn read_timestamps(&self, heap: &Self::QueryHeap, count: u32) -> Result<Vec<u64>>;

    /// 时间戳频率（每秒 tick 数）
    fn timestamp_frequency(&self) -> Result<u64>;
}

/// Present 失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresentError {
    /// 设备被移除
    DeviceRemoved(String),
    /// 其他环境相关的失败（遮挡、全屏状态被外部改变等）
    Other(String),
}

/// 交换链协作接口
pub trait Presenter<B: GpuBackend> {
    fn backbuffer_count(&self) -> u32;

    /// 下一帧将要渲染到的后台缓冲索引
    fn current_backbuffer_index(&self) -> u32;

    /// 后台缓冲的原生资源
    fn backbuffer(&self, index: u32) -> Result<B::Resource>;

    /// 后台缓冲的形状
    fn backbuffer_shape(&self) -> ResourceShape;

    fn present(&mut self, sync_interval: u32) -> std::result::Result<(), PresentError>;

    /// 调用者保证已释放所有后台缓冲引用
    fn resize(&mut self, width: u32, height: u32) -> Result<()>;

    fn is_fullscreen(&self) -> Result<bool>;
}
