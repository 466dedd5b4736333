//! 资源管理模块
//!
//! GPU 资源（缓冲区、纹理）的形状描述、资源状态追踪和视图管理。
//!
//! # 资源状态转换
//!
//! 每个资源携带一个权威的"名义状态"，外加一个稀疏的子资源覆盖表，
//! 用于子资源状态出现分歧的情况。所有状态转换都在主渲染线程上进行，
//! 不加锁（`RefCell`）。
//!
//! # 生命周期
//!
//! 资源被 drop 时，原生对象交给延迟释放队列，直到 GPU 用完才真正销毁。

use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::renderer::deferred::{Deferred, DeferredReleaser};
use crate::renderer::descriptor::{DescriptorHeapKind, PersistentHeaps};
use crate::renderer::view::{describe_view, DescriptorView, ViewRequest};

/// 像素格式
///
/// 数值编码稳定，直接参与 PSO 键的序列化。
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Format {
    #[default]
    Unknown = 0,
    /// RGBA 8位无符号归一化
    Rgba8Unorm,
    /// RGBA 8位sRGB
    Rgba8Srgb,
    /// BGRA 8位无符号归一化
    Bgra8Unorm,
    /// BGRA 8位sRGB
    Bgra8Srgb,
    Rgb10A2Unorm,
    Rg11B10Float,
    R8Unorm,
    Rg8Unorm,
    R16Unorm,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R16Uint,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    /// 原始缓冲区视图使用
    R32Typeless,
    /// D24S8 的着色器读取格式
    R24UnormX8Typeless,
    /// 深度 16位
    Depth16Unorm,
    /// 深度 24位 + 模板 8位
    Depth24PlusStencil8,
    /// 深度 32位浮点
    Depth32Float,
}

impl Format {
    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(
            self,
            Format::Depth16Unorm | Format::Depth24PlusStencil8 | Format::Depth32Float
        )
    }

    /// 是否带模板分量
    pub fn has_stencil(&self) -> bool {
        matches!(self, Format::Depth24PlusStencil8)
    }

    /// 着色器读取时使用的格式（深度格式需要转换）
    pub fn shader_read_format(&self) -> Format {
        match self {
            Format::Depth16Unorm => Format::R16Unorm,
            Format::Depth24PlusStencil8 => Format::R24UnormX8Typeless,
            Format::Depth32Float => Format::R32Float,
            other => *other,
        }
    }

    /// 每像素字节数
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown => 0,
            Format::R8Unorm => 1,
            Format::Rg8Unorm
            | Format::R16Unorm
            | Format::R16Float
            | Format::R16Uint
            | Format::Depth16Unorm => 2,
            Format::Rgba8Unorm
            | Format::Rgba8Srgb
            | Format::Bgra8Unorm
            | Format::Bgra8Srgb
            | Format::Rgb10A2Unorm
            | Format::Rg11B10Float
            | Format::Rg16Float
            | Format::R32Float
            | Format::R32Uint
            | Format::R32Typeless
            | Format::R24UnormX8Typeless
            | Format::Depth24PlusStencil8
            | Format::Depth32Float => 4,
            Format::Rgba16Float | Format::Rg32Float => 8,
            Format::Rgba32Float => 16,
        }
    }
}

/// 资源维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    Buffer,
    Texture1D,
    Texture2D,
    Texture3D,
}

/// 资源用途
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceUsage {
    pub shader_resource: bool,
    pub render_target: bool,
    pub depth_stencil: bool,
    pub unordered_access: bool,
    pub constant_buffer: bool,
    pub vertex_buffer: bool,
    pub index_buffer: bool,
}

impl ResourceUsage {
    /// 仅供着色器采样
    pub const SAMPLED: ResourceUsage = ResourceUsage {
        shader_resource: true,
        render_target: false,
        depth_stencil: false,
        unordered_access: false,
        constant_buffer: false,
        vertex_buffer: false,
        index_buffer: false,
    };

    /// 渲染目标（可采样）
    pub const RENDER_TARGET: ResourceUsage = ResourceUsage {
        render_target: true,
        ..Self::SAMPLED
    };

    /// 深度模板（可采样）
    pub const DEPTH_STENCIL: ResourceUsage = ResourceUsage {
        depth_stencil: true,
        ..Self::SAMPLED
    };

    /// 无序访问（可采样）
    pub const STORAGE: ResourceUsage = ResourceUsage {
        unordered_access: true,
        ..Self::SAMPLED
    };

    /// 常量缓冲区
    pub const CONSTANT: ResourceUsage = ResourceUsage {
        shader_resource: false,
        constant_buffer: true,
        ..Self::SAMPLED
    };

    /// 顶点缓冲区
    pub const VERTEX: ResourceUsage = ResourceUsage {
        shader_resource: false,
        vertex_buffer: true,
        ..Self::SAMPLED
    };

    /// 索引缓冲区
    pub const INDEX: ResourceUsage = ResourceUsage {
        shader_resource: false,
        index_buffer: true,
        ..Self::SAMPLED
    };

    /// 颜色纹理的全部用途
    pub fn all_color() -> Self {
        Self {
            shader_resource: true,
            render_target: true,
            unordered_access: true,
            ..Self::default()
        }
    }

    /// 全部用途
    pub fn all() -> Self {
        Self {
            shader_resource: true,
            render_target: true,
            depth_stencil: true,
            unordered_access: true,
            constant_buffer: true,
            vertex_buffer: true,
            index_buffer: true,
        }
    }
}

/// 内存类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryType {
    /// GPU本地内存（最快，仅GPU可访问）
    #[default]
    DeviceLocal,
    /// 上传堆（CPU -> GPU）
    Upload,
    /// 读回堆（GPU -> CPU）
    Readback,
}

/// 资源形状
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceShape {
    pub dimension: ResourceDimension,
    /// 宽度（缓冲区为字节数）
    pub width: u64,
    pub height: u32,
    /// 深度（3D纹理）或数组层数（立方体为面数）
    pub depth_or_array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: Format,
    pub cube: bool,
    pub usage: ResourceUsage,
    /// 结构化缓冲区步长，0 表示原始缓冲区
    pub structure_stride: u32,
}

impl ResourceShape {
    /// 原始缓冲区
    pub fn buffer(size: u64, usage: ResourceUsage) -> Self {
        Self {
            dimension: ResourceDimension::Buffer,
            width: size,
            height: 1,
            depth_or_array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format: Format::Unknown,
            cube: false,
            usage,
            structure_stride: 0,
        }
    }

    /// 结构化缓冲区
    pub fn structured_buffer(element_count: u32, stride: u32, usage: ResourceUsage) -> Self {
        Self {
            structure_stride: stride,
            ..Self::buffer(element_count as u64 * stride as u64, usage)
        }
    }

    /// 1D 纹理（数组）
    pub fn texture_1d(width: u32, array_size: u32, format: Format, mip_levels: u32, usage: ResourceUsage) -> Self {
        Self {
            dimension: ResourceDimension::Texture1D,
            width: width as u64,
            height: 1,
            depth_or_array_size: array_size,
            mip_levels,
            sample_count: 1,
            format,
            cube: false,
            usage,
            structure_stride: 0,
        }
    }

    /// 2D 纹理
    pub fn texture_2d(width: u32, height: u32, format: Format, mip_levels: u32, usage: ResourceUsage) -> Self {
        Self::texture_2d_array(width, height, 1, format, mip_levels, usage)
    }

    /// 2D 纹理数组
    pub fn texture_2d_array(
        width: u32,
        height: u32,
        array_size: u32,
        format: Format,
        mip_levels: u32,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            dimension: ResourceDimension::Texture2D,
            width: width as u64,
            height,
            depth_or_array_size: array_size,
            mip_levels,
            sample_count: 1,
            format,
            cube: false,
            usage,
            structure_stride: 0,
        }
    }

    /// 立方体贴图（数组）
    pub fn texture_cube(size: u32, format: Format, mip_levels: u32, cube_count: u32, usage: ResourceUsage) -> Self {
        Self {
            cube: true,
            ..Self::texture_2d_array(size, size, cube_count * 6, format, mip_levels, usage)
        }
    }

    /// 3D 纹理
    pub fn texture_3d(
        width: u32,
        height: u32,
        depth: u32,
        format: Format,
        mip_levels: u32,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            dimension: ResourceDimension::Texture3D,
            width: width as u64,
            height,
            depth_or_array_size: depth,
            mip_levels,
            sample_count: 1,
            format,
            cube: false,
            usage,
            structure_stride: 0,
        }
    }

    /// 设置多重采样数
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// 数组层数（3D 纹理为 1）
    pub fn array_size(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D | ResourceDimension::Buffer => 1,
            _ => self.depth_or_array_size,
        }
    }

    /// 深度（非 3D 纹理为 1）
    pub fn depth(&self) -> u32 {
        match self.dimension {
            ResourceDimension::Texture3D => self.depth_or_array_size,
            _ => 1,
        }
    }

    /// 子资源数量
    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_size()
    }

    /// 子资源索引（mip 优先）
    pub fn subresource_index(&self, mip: u32, layer: u32) -> u32 {
        mip + layer * self.mip_levels
    }
}

/// 资源描述信息
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDescriptor {
    pub shape: ResourceShape,
    pub memory: MemoryType,
    /// 调试名称
    pub name: Option<String>,
    /// 渲染目标 / 深度的优化清除值
    pub clear_value: Option<[f32; 4]>,
}

impl ResourceDescriptor {
    /// 创建新的资源描述符
    pub fn new(shape: ResourceShape) -> Self {
        Self {
            shape,
            memory: MemoryType::DeviceLocal,
            name: None,
            clear_value: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置内存类型
    pub fn with_memory(mut self, memory: MemoryType) -> Self {
        self.memory = memory;
        self
    }

    /// 设置优化清除值
    pub fn with_clear_value(mut self, value: [f32; 4]) -> Self {
        self.clear_value = Some(value);
        self
    }

    /// 计算对齐后的大小（DirectX 12 常量缓冲区要求256字节对齐）
    pub fn aligned_size(&self) -> u64 {
        if self.shape.dimension == ResourceDimension::Buffer && self.shape.usage.constant_buffer {
            crate::renderer::view::align_constant_buffer_size(self.shape.width)
        } else {
            self.shape.width
        }
    }

    /// 创建时的初始状态
    pub fn initial_state(&self) -> ResourceState {
        match self.memory {
            MemoryType::Upload => ResourceState::GenericRead,
            MemoryType::Readback => ResourceState::CopyDest,
            MemoryType::DeviceLocal => ResourceState::Common,
        }
    }
}

/// 资源状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    VertexAndConstantBuffer,
    IndexBuffer,
    RenderTarget,
    UnorderedAccess,
    DepthWrite,
    DepthRead,
    NonPixelShaderResource,
    PixelShaderResource,
    AllShaderResource,
    CopyDest,
    CopySource,
    GenericRead,
    Present,
}

/// 一次需要录制的状态转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    /// `None` 表示全部子资源
    pub subresource: Option<u32>,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// 资源状态追踪器
#[derive(Debug, Clone)]
pub struct ResourceStateTracker {
    nominal: ResourceState,
    overrides: BTreeMap<u32, ResourceState>,
    subresource_count: u32,
}

impl ResourceStateTracker {
    /// 创建新的追踪器
    pub fn new(initial: ResourceState, subresource_count: u32) -> Self {
        Self {
            nominal: initial,
            overrides: BTreeMap::new(),
            subresource_count: subresource_count.max(1),
        }
    }

    /// 名义状态
    pub fn state(&self) -> ResourceState {
        self.nominal
    }

    /// 某个子资源的实际状态
    pub fn subresource_state(&self, index: u32) -> ResourceState {
        self.overrides.get(&index).copied().unwrap_or(self.nominal)
    }

    /// 所有子资源状态是否一致
    pub fn is_uniform(&self) -> bool {
        self.overrides.is_empty()
    }

    /// 整体转换
    ///
    /// 先把分歧的子资源转换回名义状态，再录制一次整体转换。
    /// 名义状态已经是目标且没有分歧时为空操作。
    pub fn transition_resource(&mut self, target: ResourceState) -> Vec<StateTransition> {
        let mut transitions: Vec<StateTransition> = std::mem::take(&mut self.overrides)
            .into_iter()
            .map(|(index, state)| StateTransition {
                subresource: Some(index),
                before: state,
                after: self.nominal,
            })
            .collect();

        if self.nominal != target {
            transitions.push(StateTransition {
                subresource: None,
                before: self.nominal,
                after: target,
            });
            self.nominal = target;
        }
        transitions
    }

    /// 单个子资源转换
    ///
    /// 回到名义状态时从覆盖表中移除。
    pub fn transition_subresource(
        &mut self,
        target: ResourceState,
        index: u32,
    ) -> Result<Option<StateTransition>> {
        if index >= self.subresource_count {
            return Err(GraphicsError::InvalidState(format!(
                "subresource {} is out of range (resource has {})",
                index, self.subresource_count
            ))
            .into());
        }

        if self.subresource_count == 1 {
            return Ok(self.transition_resource(target).pop());
        }

        let current = self.subresource_state(index);
        if current == target {
            return Ok(None);
        }
        if target == self.nominal {
            self.overrides.remove(&index);
        } else {
            self.overrides.insert(index, target);
        }
        Ok(Some(StateTransition {
            subresource: Some(index),
            before: current,
            after: target,
        }))
    }

    /// 采用外部已经完成的状态，不录制屏障
    pub fn adopt(&mut self, state: ResourceState) {
        self.nominal = state;
        self.overrides.clear();
    }
}

/// GPU 资源
///
/// 拥有原生分配、零个或多个持久视图，以及资源状态追踪器。
pub struct GpuResource<B: GpuBackend> {
    name: String,
    shape: ResourceShape,
    memory: MemoryType,
    native: Deferred<B::Resource>,
    state: RefCell<ResourceStateTracker>,
    views: RefCell<BTreeMap<ViewRequest, DescriptorView>>,
    heaps: Arc<PersistentHeaps<B>>,
    releaser: DeferredReleaser,
}

impl<B: GpuBackend> GpuResource<B> {
    /// 包装一个原生资源
    pub(crate) fn from_native(
        native: B::Resource,
        desc: &ResourceDescriptor,
        initial_state: ResourceState,
        heaps: Arc<PersistentHeaps<B>>,
        releaser: DeferredReleaser,
    ) -> Self {
        let name = desc.name.clone().unwrap_or_else(|| "unnamed".to_string());
        trace!(resource = %name, state = ?initial_state, "Resource wrapped");
        Self {
            name,
            shape: desc.shape,
            memory: desc.memory,
            native: Deferred::new(native, releaser.clone()),
            state: RefCell::new(ResourceStateTracker::new(
                initial_state,
                desc.shape.subresource_count(),
            )),
            views: RefCell::new(BTreeMap::new()),
            heaps,
            releaser,
        }
    }

    /// 调试名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 资源形状
    pub fn shape(&self) -> &ResourceShape {
        &self.shape
    }

    /// 内存类型
    pub fn memory(&self) -> MemoryType {
        self.memory
    }

    /// 原生资源
    pub fn native(&self) -> &B::Resource {
        &self.native
    }

    /// 名义状态
    pub fn state(&self) -> ResourceState {
        self.state.borrow().state()
    }

    /// 某个子资源的状态
    pub fn subresource_state(&self, index: u32) -> ResourceState {
        self.state.borrow().subresource_state(index)
    }

    /// 状态追踪器（只读）
    pub fn tracker(&self) -> Ref<'_, ResourceStateTracker> {
        self.state.borrow()
    }

    pub(crate) fn plan_transition(&self, target: ResourceState) -> Vec<StateTransition> {
        self.state.borrow_mut().transition_resource(target)
    }

    pub(crate) fn plan_subresource_transition(
        &self,
        target: ResourceState,
        index: u32,
    ) -> Result<Option<StateTransition>> {
        self.state.borrow_mut().transition_subresource(target, index)
    }

    pub(crate) fn adopt_state(&self, state: ResourceState) {
        self.state.borrow_mut().adopt(state);
    }

    /// 获取（必要时创建）一个持久视图
    ///
    /// 视图按请求缓存，首次请求时分配持久描述符并写入。
    pub fn view(&self, backend: &B, request: ViewRequest) -> Result<DescriptorView> {
        if let Some(view) = self.views.borrow().get(&request) {
            return Ok(*view);
        }

        let desc = describe_view(&self.shape, &request).map_err(|err| {
            crate::core::error::raise(self.heaps.cbv_srv_uav.policy(), err)
        })?;
        let heap = self.heaps.for_kind(request.kind.heap_kind())?;
        let handle = heap.allocate()?;
        if let Err(err) = backend.write_view(heap.native(), handle.index, &self.native, &desc) {
            if let Err(release_err) = heap.release(handle) {
                warn!(resource = %self.name, error = %release_err, "View release after failed write failed");
            }
            return Err(err);
        }

        let view = DescriptorView {
            kind: request.kind,
            handle,
            desc,
        };
        self.views.borrow_mut().insert(request, view);
        trace!(resource = %self.name, kind = request.kind.name(), index = handle.index, "View created");
        Ok(view)
    }

    /// 已创建的视图数量
    pub fn view_count(&self) -> usize {
        self.views.borrow().len()
    }

    /// 释放全部视图
    ///
    /// 着色器可见堆中的描述符可能仍被 GPU 读取，走延迟释放。
    /// RTV/DSV 在 flush 之后会按索引重新绑定，同样延迟到帧槽复用时释放。
    /// 其余仅 CPU 可见的描述符在录制时已被复制，立即释放。
    fn release_views(&self) {
        let views = std::mem::take(&mut *self.views.borrow_mut());
        for view in views.into_values() {
            let handle = view.handle;
            let deferred = match self.heaps.for_kind(handle.kind) {
                Ok(heap) => {
                    heap.is_shader_visible()
                        || matches!(handle.kind, DescriptorHeapKind::RenderTarget | DescriptorHeapKind::DepthStencil)
                }
                Err(_) => continue,
            };
            if deferred {
                let heaps = self.heaps.clone();
                self.releaser.release(move || {
                    if let Err(err) = heaps.release(handle) {
                        warn!(error = %err, "Deferred view release failed");
                    }
                });
            } else if let Err(err) = self.heaps.release(handle) {
                warn!(resource = %self.name, error = %err, "View release failed");
            }
        }
    }
}

impl<B: GpuBackend> Drop for GpuResource<B> {
    fn drop(&mut self) {
        self.release_views();
        trace!(resource = %self.name, "Resource queued for deferred release");
    }
}

impl<B: GpuBackend> std::fmt::Debug for GpuResource<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuResource")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("state", &self.state.borrow().state())
            .finish()
    }
}
