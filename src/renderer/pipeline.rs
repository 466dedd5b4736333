//! 管线状态对象（PSO）缓存
//!
//! 管线描述被序列化为定长字节键（`#[repr(C)]` + `bytemuck::Pod`），
//! 按字节字典序存放在有序表中。同一个键最多只有一个存活条目；
//! 着色器热重载会改变内容 ID，从而产生新键，而不会原地修改旧条目。
//!
//! # 淘汰
//!
//! `clear_unused_tick` 是协作式的增量扫描：每次从持久化的游标开始
//! 最多访问 `visit_count` 个条目（到末尾后回绕），淘汰超过 `max_age`
//! 帧未使用且没有外部引用的条目。被淘汰的原生对象经由延迟释放队列销毁。

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::Bound;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use tracing::{debug, trace};

use crate::core::config::{FailurePolicy, PipelineCacheConfig};
use crate::core::error::{raise, DistRenderError, GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::renderer::deferred::{Deferred, DeferredReleaser};
use crate::renderer::resource::Format;
use crate::renderer::shader::ShaderBytecode;

/// 最大渲染目标数量
pub const MAX_RENDER_TARGETS: usize = 8;

/// 混合模式
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Opaque = 0,
    Alpha,
    Additive,
    Premultiplied,
    Multiply,
}

/// 填充模式
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid = 0,
    Wireframe,
}

/// 剔除模式
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None = 0,
    Front,
    #[default]
    Back,
}

/// 比较函数
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunc {
    Never = 0,
    Less,
    Equal,
    #[default]
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// 图元拓扑
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    PointList = 0,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// 根签名类型
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootSignatureKind {
    Graphics = 0,
    Compute,
}

/// 固定功能状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub blend: BlendMode,
    pub fill: FillMode,
    pub cull: CullMode,
    pub depth_func: CompareFunc,
    pub depth_test: bool,
    pub depth_write: bool,
    pub topology: PrimitiveTopology,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Opaque,
            fill: FillMode::Solid,
            cull: CullMode::Back,
            depth_func: CompareFunc::LessEqual,
            depth_test: true,
            depth_write: true,
            topology: PrimitiveTopology::TriangleList,
        }
    }
}

/// 渲染目标布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderTargetLayout {
    color_formats: [Format; MAX_RENDER_TARGETS],
    color_count: u8,
    pub depth_format: Format,
    pub sample_count: u8,
}

impl RenderTargetLayout {
    /// 创建新的渲染目标布局
    pub fn new(colors: &[Format], depth: Option<Format>, sample_count: u8) -> Result<Self> {
        if colors.len() > MAX_RENDER_TARGETS {
            return Err(GraphicsError::InvalidState(format!(
                "{} render targets bound, at most {} supported",
                colors.len(),
                MAX_RENDER_TARGETS
            ))
            .into());
        }
        let mut color_formats = [Format::Unknown; MAX_RENDER_TARGETS];
        color_formats[..colors.len()].copy_from_slice(colors);
        Ok(Self {
            color_formats,
            color_count: colors.len() as u8,
            depth_format: depth.unwrap_or(Format::Unknown),
            sample_count: sample_count.max(1),
        })
    }

    /// 已绑定的颜色格式
    pub fn colors(&self) -> &[Format] {
        &self.color_formats[..self.color_count as usize]
    }

    /// 深度格式
    pub fn depth(&self) -> Option<Format> {
        (self.depth_format != Format::Unknown).then_some(self.depth_format)
    }
}

impl Default for RenderTargetLayout {
    fn default() -> Self {
        Self {
            color_formats: [Format::Unknown; MAX_RENDER_TARGETS],
            color_count: 0,
            depth_format: Format::Unknown,
            sample_count: 1,
        }
    }
}

/// 图形管线描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsPipelineDesc {
    pub vertex: ShaderBytecode,
    pub pixel: Option<ShaderBytecode>,
    pub hull: Option<ShaderBytecode>,
    pub domain: Option<ShaderBytecode>,
    pub geometry: Option<ShaderBytecode>,
    pub render_state: RenderState,
    pub targets: RenderTargetLayout,
}

/// 计算管线描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputePipelineDesc {
    pub compute: ShaderBytecode,
}

/// 图形 PSO 键
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct GraphicsPsoKey {
    /// VS / PS / HS / DS / GS 的内容 ID，0 表示不存在
    pub shader_ids: [u64; 5],
    pub blend: u8,
    pub fill: u8,
    pub cull: u8,
    pub depth_func: u8,
    /// bit0 = 深度测试，bit1 = 深度写入
    pub depth_flags: u8,
    pub topology: u8,
    pub color_count: u8,
    pub sample_count: u8,
    pub color_formats: [u8; MAX_RENDER_TARGETS],
    pub depth_format: u8,
    pub root_signature: u8,
    pub _pad: [u8; 6],
}

/// 计算 PSO 键
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct ComputePsoKey {
    pub shader_id: u64,
    pub root_signature: u8,
    pub _pad: [u8; 7],
}

/// 可缓存的管线描述
pub trait PipelineDesc {
    /// 定长键类型
    type Key: Pod;

    /// 日志中使用的名称
    const LABEL: &'static str;

    /// 序列化键
    fn key(&self) -> Self::Key;

    /// 创建原生管线对象
    fn create<B: GpuBackend>(&self, backend: &B) -> Result<B::Pipeline>;
}

fn content_id(shader: &Option<ShaderBytecode>) -> u64 {
    shader.as_ref().map_or(0, |s| s.content_id)
}

impl PipelineDesc for GraphicsPipelineDesc {
    type Key = GraphicsPsoKey;

    const LABEL: &'static str = "graphics";

    fn key(&self) -> GraphicsPsoKey {
        let state = &self.render_state;
        let mut color_formats = [0u8; MAX_RENDER_TARGETS];
        for (slot, format) in color_formats.iter_mut().zip(self.targets.colors()) {
            *slot = *format as u8;
        }
        GraphicsPsoKey {
            shader_ids: [
                self.vertex.content_id,
                content_id(&self.pixel),
                content_id(&self.hull),
                content_id(&self.domain),
                content_id(&self.geometry),
            ],
            blend: state.blend as u8,
            fill: state.fill as u8,
            cull: state.cull as u8,
            depth_func: state.depth_func as u8,
            depth_flags: state.depth_test as u8 | (state.depth_write as u8) << 1,
            topology: state.topology as u8,
            color_count: self.targets.color_count,
            sample_count: self.targets.sample_count,
            color_formats,
            depth_format: self.targets.depth_format as u8,
            root_signature: RootSignatureKind::Graphics as u8,
            _pad: [0; 6],
        }
    }

    fn create<B: GpuBackend>(&self, backend: &B) -> Result<B::Pipeline> {
        backend.create_graphics_pipeline(self)
    }
}

impl PipelineDesc for ComputePipelineDesc {
    type Key = ComputePsoKey;

    const LABEL: &'static str = "compute";

    fn key(&self) -> ComputePsoKey {
        ComputePsoKey {
            shader_id: self.compute.content_id,
            root_signature: RootSignatureKind::Compute as u8,
            _pad: [0; 7],
        }
    }

    fn create<B: GpuBackend>(&self, backend: &B) -> Result<B::Pipeline> {
        backend.create_compute_pipeline(self)
    }
}

/// 按字节字典序比较的键
#[derive(Clone, Copy)]
struct SortKey<K: Pod>(K);

impl<K: Pod> PartialEq for SortKey<K> {
    fn eq(&self, other: &Self) -> bool {
        bytemuck::bytes_of(&self.0) == bytemuck::bytes_of(&other.0)
    }
}

impl<K: Pod> Eq for SortKey<K> {}

impl<K: Pod> PartialOrd for SortKey<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K: Pod> Ord for SortKey<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        bytemuck::bytes_of(&self.0).cmp(bytemuck::bytes_of(&other.0))
    }
}

/// 已创建的管线状态
///
/// 最后一个引用被 drop 时，原生对象经由延迟释放队列销毁。
pub struct PipelineState<B: GpuBackend> {
    native: Deferred<B::Pipeline>,
    label: &'static str,
    created_frame: u64,
}

impl<B: GpuBackend> PipelineState<B> {
    /// 原生管线对象
    pub fn native(&self) -> &B::Pipeline {
        &self.native
    }

    /// 管线类别（graphics / compute）
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// 创建时的帧号
    pub fn created_frame(&self) -> u64 {
        self.created_frame
    }
}

/// 共享的管线句柄
pub type PipelineHandle<B> = Arc<PipelineState<B>>;

/// 句柄是否只被一个所有者持有
pub fn is_unique<B: GpuBackend>(handle: &PipelineHandle<B>) -> bool {
    Arc::strong_count(handle) == 1
}

struct CacheEntry<B: GpuBackend> {
    handle: PipelineHandle<B>,
    last_used_frame: u64,
}

/// 缓存统计信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PsoCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// PSO 缓存
pub struct PsoCache<D: PipelineDesc, B: GpuBackend> {
    entries: BTreeMap<SortKey<D::Key>, CacheEntry<B>>,
    cursor: Option<SortKey<D::Key>>,
    max_age: u64,
    visit_count: usize,
    releaser: DeferredReleaser,
    policy: FailurePolicy,
    hits: u64,
    misses: u64,
    evictions: u64,
    _desc: PhantomData<fn(&D)>,
}

impl<D: PipelineDesc, B: GpuBackend> PsoCache<D, B> {
    /// 创建新的 PSO 缓存
    pub fn new(config: &PipelineCacheConfig, releaser: DeferredReleaser, policy: FailurePolicy) -> Self {
        Self {
            entries: BTreeMap::new(),
            cursor: None,
            max_age: config.max_age_frames,
            visit_count: config.visit_count.max(1),
            releaser,
            policy,
            hits: 0,
            misses: 0,
            evictions: 0,
            _desc: PhantomData,
        }
    }

    /// 查找或创建
    ///
    /// 命中时刷新 `last_used_frame`；未命中时创建原生对象并插入。
    pub fn find_or_create(&mut self, backend: &B, desc: &D, frame: u64) -> Result<PipelineHandle<B>> {
        let key = SortKey(desc.key());
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used_frame = frame;
            self.hits += 1;
            return Ok(entry.handle.clone());
        }

        let native = desc.create(backend).map_err(|err| self.creation_error(err))?;
        let handle = Arc::new(PipelineState {
            native: Deferred::new(native, self.releaser.clone()),
            label: D::LABEL,
            created_frame: frame,
        });
        self.entries.insert(
            key,
            CacheEntry {
                handle: handle.clone(),
                last_used_frame: frame,
            },
        );
        self.misses += 1;
        debug!(kind = D::LABEL, frame, entries = self.entries.len(), "Pipeline state created");
        Ok(handle)
    }

    fn creation_error(&self, err: DistRenderError) -> DistRenderError {
        let graphics = match err {
            DistRenderError::Graphics(GraphicsError::PipelineCreationFailed(msg)) => {
                GraphicsError::PipelineCreationFailed(msg)
            }
            DistRenderError::Graphics(GraphicsError::DeviceLost(msg)) => GraphicsError::DeviceLost(msg),
            other => GraphicsError::PipelineCreationFailed(other.to_string()),
        };
        raise(self.policy, graphics)
    }

    /// 增量淘汰一步，返回淘汰的条目数
    pub fn clear_unused_tick(&mut self, current_frame: u64) -> usize {
        if self.entries.is_empty() {
            self.cursor = None;
            return 0;
        }

        let visit = self.visit_count.min(self.entries.len());
        let keys: Vec<SortKey<D::Key>> = match self.cursor {
            Some(cursor) => self
                .entries
                .range((Bound::Excluded(cursor), Bound::Unbounded))
                .chain(self.entries.range((Bound::Unbounded, Bound::Included(cursor))))
                .map(|(key, _)| *key)
                .take(visit)
                .collect(),
            None => self.entries.keys().copied().take(visit).collect(),
        };

        let mut evicted = 0;
        for key in &keys {
            let expired = self.entries.get(key).is_some_and(|entry| {
                current_frame.saturating_sub(entry.last_used_frame) > self.max_age
                    && is_unique(&entry.handle)
            });
            if expired {
                // drop 最后一个引用，原生对象进入延迟释放队列
                self.entries.remove(key);
                evicted += 1;
            }
        }
        self.cursor = keys.last().copied();
        self.evictions += evicted as u64;

        if evicted > 0 {
            trace!(kind = D::LABEL, evicted, remaining = self.entries.len(), "Pipeline states evicted");
        }
        evicted
    }

    /// 清空缓存（关闭时）
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        self.cursor = None;
        count
    }

    /// 是否已缓存
    pub fn contains(&self, desc: &D) -> bool {
        self.entries.contains_key(&SortKey(desc.key()))
    }

    /// 条目数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 统计信息
    pub fn stats(&self) -> PsoCacheStats {
        PsoCacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }
}
