//! 描述符管理模块
//!
//! 提供持久描述符堆和瞬态描述符堆两种分配策略。
//!
//! # 持久描述符堆（PersistentDescriptorHeap）
//!
//! 固定容量的槽位分配器：空闲链表（LIFO）+ 高水位指针。
//! 用于长期存在的资源视图。句柄可单独释放，槽位永远不会被搬移，
//! 因此外部可以在槽位生命周期内缓存原始索引。内部由一个 `Mutex` 保护，
//! 允许后台任务或延迟释放回调在非主线程上调用。
//!
//! # 瞬态描述符堆（TransientDescriptorHeap）
//!
//! 每个帧槽一个，线性分配连续区间，没有单独释放操作。
//! 帧槽的 GPU 工作确认完成后整体重置。
//!
//! # 描述符堆类型
//!
//! - **CBV/SRV/UAV**：着色器资源描述符
//! - **RTV**：渲染目标视图
//! - **DSV**：深度模板视图
//! - **Sampler**：采样器

use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::core::config::{DescriptorConfig, FailurePolicy};
use crate::core::error::{raise, GraphicsError, Result};
use crate::gfx::backend::GpuBackend;
use crate::renderer::sync::FenceValue;

/// 视图类型
///
/// 统一的资源视图标签，取代按视图种类划分的类层次。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ViewKind {
    /// 着色资源视图 (SRV)
    ShaderResource,
    /// 渲染目标视图 (RTV)
    RenderTarget,
    /// 深度模板视图 (DSV)
    DepthStencil,
    /// 无序访问视图 (UAV)
    UnorderedAccess,
    /// 常量缓冲视图 (CBV)
    ConstantBuffer,
    /// 采样器
    Sampler,
}

impl ViewKind {
    /// 视图所在的描述符堆类型
    pub fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            ViewKind::ShaderResource | ViewKind::UnorderedAccess | ViewKind::ConstantBuffer => {
                DescriptorHeapKind::CbvSrvUav
            }
            ViewKind::RenderTarget => DescriptorHeapKind::RenderTarget,
            ViewKind::DepthStencil => DescriptorHeapKind::DepthStencil,
            ViewKind::Sampler => DescriptorHeapKind::Sampler,
        }
    }

    /// 视图是否可以绑定到描述符表
    pub fn is_table_bindable(&self) -> bool {
        self.heap_kind() == DescriptorHeapKind::CbvSrvUav
    }

    /// 获取视图类型名称
    pub fn name(&self) -> &'static str {
        match self {
            ViewKind::RenderTarget => "RTV",
            ViewKind::DepthStencil => "DSV",
            ViewKind::ConstantBuffer => "CBV",
            ViewKind::ShaderResource => "SRV",
            ViewKind::UnorderedAccess => "UAV",
            ViewKind::Sampler => "Sampler",
        }
    }
}

/// 描述符堆类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorHeapKind {
    /// CBV/SRV/UAV 共用堆
    CbvSrvUav,
    /// 采样器堆
    Sampler,
    /// 渲染目标视图堆
    RenderTarget,
    /// 深度模板视图堆
    DepthStencil,
}

impl DescriptorHeapKind {
    /// 获取堆类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorHeapKind::CbvSrvUav => "CBV/SRV/UAV",
            DescriptorHeapKind::Sampler => "Sampler",
            DescriptorHeapKind::RenderTarget => "RTV",
            DescriptorHeapKind::DepthStencil => "DSV",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeapDescriptor {
    /// 堆类型
    pub kind: DescriptorHeapKind,
    /// 描述符数量
    pub num_descriptors: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDescriptor {
    /// 创建新的描述符堆描述符（默认仅 CPU 可见）
    pub fn new(kind: DescriptorHeapKind, num_descriptors: u32) -> Self {
        Self {
            kind,
            num_descriptors,
            shader_visible: false,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置着色器可见性
    pub fn with_shader_visible(mut self, visible: bool) -> Self {
        self.shader_visible = visible;
        self
    }

    /// 创建 RTV 堆描述符
    pub fn rtv(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapKind::RenderTarget, num_descriptors).with_name("RTV Heap")
    }

    /// 创建 DSV 堆描述符
    pub fn dsv(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapKind::DepthStencil, num_descriptors).with_name("DSV Heap")
    }

    /// 创建仅 CPU 可见的 CBV/SRV/UAV 堆描述符（持久视图的存放处）
    pub fn srv_cbv_uav(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapKind::CbvSrvUav, num_descriptors)
            .with_name("SRV/CBV/UAV Heap")
    }

    /// 创建着色器可见的 CBV/SRV/UAV 堆描述符（瞬态描述符表）
    pub fn shader_visible_srv_cbv_uav(num_descriptors: u32) -> Self {
        Self::new(DescriptorHeapKind::CbvSrvUav, num_descriptors)
            .with_shader_visible(true)
            .with_name("Transient SRV/CBV/UAV Heap")
    }
}

/// 描述符句柄：（堆类型，索引）
///
/// 本身不拥有任何 GPU 内存，只是堆中某个槽位的名字。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorHandle {
    /// 所属堆类型
    pub kind: DescriptorHeapKind,
    /// 槽位索引
    pub index: u32,
}

impl DescriptorHandle {
    /// 创建新的描述符句柄
    pub fn new(kind: DescriptorHeapKind, index: u32) -> Self {
        Self { kind, index }
    }
}

/// 描述符堆统计信息
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorHeapStats {
    /// 堆类型
    pub kind: DescriptorHeapKind,
    /// 总容量
    pub capacity: u32,
    /// 已使用数量
    pub used: u32,
    /// 可用数量
    pub available: u32,
    /// 使用率 (0.0 - 1.0)
    pub usage_ratio: f32,
}

impl DescriptorHeapStats {
    /// 创建新的统计信息
    pub fn new(kind: DescriptorHeapKind, capacity: u32, used: u32) -> Self {
        let available = capacity.saturating_sub(used);
        let usage_ratio = if capacity > 0 {
            used as f32 / capacity as f32
        } else {
            0.0
        };

        Self {
            kind,
            capacity,
            used,
            available,
            usage_ratio,
        }
    }
}

/// 槽位分配器（空闲链表 + 高水位）
///
/// 不变式：`allocated_count <= capacity`；每个已发出的索引要么存活，
/// 要么在空闲链表中，二者互斥。
#[derive(Debug)]
pub struct SlotAllocator {
    capacity: u32,
    allocated_count: u32,
    free_list: Vec<u32>,
    live: Vec<bool>,
}

impl SlotAllocator {
    /// 创建新的槽位分配器
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            allocated_count: 0,
            free_list: Vec::new(),
            live: vec![false; capacity as usize],
        }
    }

    /// 分配一个槽位，空间耗尽时返回 `None`
    pub fn allocate(&mut self) -> Option<u32> {
        let index = match self.free_list.pop() {
            Some(index) => index,
            None if self.allocated_count < self.capacity => {
                let index = self.allocated_count;
                self.allocated_count += 1;
                index
            }
            None => return None,
        };
        self.live[index as usize] = true;
        Some(index)
    }

    /// 释放一个槽位；索引未存活时返回 `false`
    pub fn release(&mut self, index: u32) -> bool {
        if index >= self.allocated_count || !self.live[index as usize] {
            return false;
        }
        self.live[index as usize] = false;
        self.free_list.push(index);
        true
    }

    /// 高水位
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    /// 当前存活的槽位数
    pub fn live_count(&self) -> u32 {
        self.allocated_count - self.free_list.len() as u32
    }

    /// 空闲链表长度
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// 获取最大容量
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 索引是否存活
    pub fn is_live(&self, index: u32) -> bool {
        index < self.allocated_count && self.live[index as usize]
    }

    /// 检查不变式：存活集合与空闲链表互斥，且并集大小等于高水位
    pub fn check_invariants(&self) -> bool {
        if self.allocated_count > self.capacity {
            return false;
        }
        let mut seen = vec![false; self.allocated_count as usize];
        for &index in &self.free_list {
            if index >= self.allocated_count || self.live[index as usize] || seen[index as usize] {
                return false;
            }
            seen[index as usize] = true;
        }
        let live = self.live[..self.allocated_count as usize]
            .iter()
            .filter(|live| **live)
            .count();
        live + self.free_list.len() == self.allocated_count as usize
            && self.live[self.allocated_count as usize..].iter().all(|live| !live)
    }
}

/// 线性分配器
///
/// 帧内单调递增，只有 `reset` 能把它归零。
#[derive(Debug)]
pub struct BumpAllocator {
    capacity: u32,
    allocated_count: u32,
}

impl BumpAllocator {
    /// 创建新的线性分配器
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            allocated_count: 0,
        }
    }

    /// 分配 `count` 个连续槽位，返回起始索引
    pub fn allocate(&mut self, count: u32) -> Option<u32> {
        let end = self.allocated_count.checked_add(count)?;
        if end > self.capacity {
            return None;
        }
        let base = self.allocated_count;
        self.allocated_count = end;
        Some(base)
    }

    /// 归零
    pub fn reset(&mut self) {
        self.allocated_count = 0;
    }

    /// 已分配数量
    pub fn allocated_count(&self) -> u32 {
        self.allocated_count
    }

    /// 获取最大容量
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 持久描述符堆
pub struct PersistentDescriptorHeap<B: GpuBackend> {
    kind: DescriptorHeapKind,
    shader_visible: bool,
    native: B::DescriptorHeap,
    slots: Mutex<SlotAllocator>,
    policy: FailurePolicy,
}

impl<B: GpuBackend> PersistentDescriptorHeap<B> {
    /// 创建新的持久描述符堆
    pub fn new(backend: &B, desc: &DescriptorHeapDescriptor, policy: FailurePolicy) -> Result<Self> {
        let native = backend.create_descriptor_heap(desc)?;
        debug!(
            heap = desc.kind.name(),
            capacity = desc.num_descriptors,
            "Persistent descriptor heap created"
        );
        Ok(Self {
            kind: desc.kind,
            shader_visible: desc.shader_visible,
            native,
            slots: Mutex::new(SlotAllocator::new(desc.num_descriptors)),
            policy,
        })
    }

    /// 分配一个描述符
    ///
    /// 优先复用最近释放的索引（LIFO），否则推进高水位。
    pub fn allocate(&self) -> Result<DescriptorHandle> {
        let mut slots = lock(&self.slots);
        match slots.allocate() {
            Some(index) => {
                trace!(heap = self.kind.name(), index, "Descriptor allocated");
                Ok(DescriptorHandle::new(self.kind, index))
            }
            None => {
                let capacity = slots.capacity();
                drop(slots);
                Err(raise(
                    self.policy,
                    GraphicsError::OutOfDescriptorSpace {
                        heap: self.kind.name(),
                        capacity,
                        requested: 1,
                    },
                ))
            }
        }
    }

    /// 释放一个描述符
    ///
    /// 重复释放、跨堆释放或越界索引都会被拒绝。
    pub fn release(&self, handle: DescriptorHandle) -> Result<()> {
        if handle.kind != self.kind {
            return Err(GraphicsError::InvalidState(format!(
                "{} handle released into {} heap",
                handle.kind.name(),
                self.kind.name()
            ))
            .into());
        }
        if !lock(&self.slots).release(handle.index) {
            return Err(GraphicsError::InvalidState(format!(
                "descriptor {} in {} heap is not live",
                handle.index,
                self.kind.name()
            ))
            .into());
        }
        trace!(heap = self.kind.name(), index = handle.index, "Descriptor released");
        Ok(())
    }

    /// 句柄是否存活
    pub fn is_live(&self, handle: DescriptorHandle) -> bool {
        handle.kind == self.kind && lock(&self.slots).is_live(handle.index)
    }

    /// 堆类型
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// 是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        self.shader_visible
    }

    /// 原生堆对象
    pub fn native(&self) -> &B::DescriptorHeap {
        &self.native
    }

    /// 失败策略
    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// 获取统计信息（已使用 = 当前存活数）
    pub fn stats(&self) -> DescriptorHeapStats {
        let slots = lock(&self.slots);
        DescriptorHeapStats::new(self.kind, slots.capacity(), slots.live_count())
    }

    /// 高水位
    pub fn allocated_count(&self) -> u32 {
        lock(&self.slots).allocated_count()
    }
}

/// 设备持有的全部持久描述符堆
pub struct PersistentHeaps<B: GpuBackend> {
    pub cbv_srv_uav: PersistentDescriptorHeap<B>,
    pub rtv: PersistentDescriptorHeap<B>,
    pub dsv: PersistentDescriptorHeap<B>,
}

impl<B: GpuBackend> PersistentHeaps<B> {
    /// 按配置创建全部持久堆
    pub fn new(backend: &B, config: &DescriptorConfig, policy: FailurePolicy) -> Result<Self> {
        Ok(Self {
            cbv_srv_uav: PersistentDescriptorHeap::new(
                backend,
                &DescriptorHeapDescriptor::srv_cbv_uav(config.persistent_cbv_srv_uav),
                policy,
            )?,
            rtv: PersistentDescriptorHeap::new(
                backend,
                &DescriptorHeapDescriptor::rtv(config.persistent_rtv),
                policy,
            )?,
            dsv: PersistentDescriptorHeap::new(
                backend,
                &DescriptorHeapDescriptor::dsv(config.persistent_dsv),
                policy,
            )?,
        })
    }

    /// 按堆类型取堆
    pub fn for_kind(&self, kind: DescriptorHeapKind) -> Result<&PersistentDescriptorHeap<B>> {
        match kind {
            DescriptorHeapKind::CbvSrvUav => Ok(&self.cbv_srv_uav),
            DescriptorHeapKind::RenderTarget => Ok(&self.rtv),
            DescriptorHeapKind::DepthStencil => Ok(&self.dsv),
            DescriptorHeapKind::Sampler => Err(GraphicsError::InvalidViewRequest(
                "no persistent sampler heap is configured".to_string(),
            )
            .into()),
        }
    }

    /// 释放句柄到对应的堆
    pub fn release(&self, handle: DescriptorHandle) -> Result<()> {
        self.for_kind(handle.kind)?.release(handle)
    }

    /// 获取所有统计信息
    pub fn all_stats(&self) -> Vec<DescriptorHeapStats> {
        vec![self.cbv_srv_uav.stats(), self.rtv.stats(), self.dsv.stats()]
    }
}

/// 瞬态描述符堆（每个帧槽一个）
pub struct TransientDescriptorHeap<B: GpuBackend> {
    native: B::DescriptorHeap,
    allocator: BumpAllocator,
    /// 复用前必须到达的 Fence 值
    guard: FenceValue,
    /// 帧是否仍在录制中
    open: bool,
    policy: FailurePolicy,
}

impl<B: GpuBackend> TransientDescriptorHeap<B> {
    /// 创建新的瞬态描述符堆
    pub fn new(backend: &B, capacity: u32, policy: FailurePolicy) -> Result<Self> {
        let native = backend
            .create_descriptor_heap(&DescriptorHeapDescriptor::shader_visible_srv_cbv_uav(capacity))?;
        Ok(Self {
            native,
            allocator: BumpAllocator::new(capacity),
            guard: FenceValue::ZERO,
            open: false,
            policy,
        })
    }

    /// 分配 `count` 个连续描述符，返回起始索引
    pub fn allocate(&mut self, count: u32) -> Result<u32> {
        if !self.open {
            return Err(GraphicsError::InvalidState(
                "transient descriptors allocated outside of an open frame".to_string(),
            )
            .into());
        }
        self.allocator.allocate(count).ok_or_else(|| {
            raise(
                self.policy,
                GraphicsError::OutOfDescriptorSpace {
                    heap: "transient CBV/SRV/UAV",
                    capacity: self.allocator.capacity(),
                    requested: count,
                },
            )
        })
    }

    /// 整体重置
    ///
    /// 仅当帧已关闭且 `completed` 已到达守护 Fence 值时合法。
    pub fn reset(&mut self, completed: FenceValue) -> Result<()> {
        if self.open {
            return Err(GraphicsError::InvalidState(
                "transient descriptor heap reset while its frame is still open".to_string(),
            )
            .into());
        }
        if completed < self.guard {
            return Err(GraphicsError::InvalidState(format!(
                "transient descriptor heap reset before fence {} was reached (completed {})",
                self.guard.value(),
                completed.value()
            ))
            .into());
        }
        self.allocator.reset();
        Ok(())
    }

    /// 标记帧开始录制
    pub fn open(&mut self) {
        self.open = true;
    }

    /// 标记帧已提交，记录守护 Fence 值
    pub fn close(&mut self, guard: FenceValue) {
        self.open = false;
        self.guard = guard;
    }

    /// 帧是否仍在录制中
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// 守护 Fence 值
    pub fn guard(&self) -> FenceValue {
        self.guard
    }

    /// 已分配数量
    pub fn allocated_count(&self) -> u32 {
        self.allocator.allocated_count()
    }

    /// 原生堆对象
    pub fn native(&self) -> &B::DescriptorHeap {
        &self.native
    }

    /// 获取统计信息
    pub fn stats(&self) -> DescriptorHeapStats {
        DescriptorHeapStats::new(
            DescriptorHeapKind::CbvSrvUav,
            self.allocator.capacity(),
            self.allocator.allocated_count(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::null::NullBackend;

    fn persistent(capacity: u32) -> PersistentDescriptorHeap<NullBackend> {
        let backend = NullBackend::new();
        PersistentDescriptorHeap::new(
            &backend,
            &DescriptorHeapDescriptor::srv_cbv_uav(capacity),
            FailurePolicy::Propagate,
        )
        .unwrap()
    }

    #[test]
    fn test_view_kind() {
        assert_eq!(ViewKind::ShaderResource.heap_kind(), DescriptorHeapKind::CbvSrvUav);
        assert_eq!(ViewKind::RenderTarget.heap_kind(), DescriptorHeapKind::RenderTarget);
        assert!(ViewKind::UnorderedAccess.is_table_bindable());
        assert!(!ViewKind::DepthStencil.is_table_bindable());
        assert_eq!(ViewKind::RenderTarget.name(), "RTV");
    }

    #[test]
    fn test_descriptor_heap_descriptor() {
        let desc = DescriptorHeapDescriptor::rtv(100);
        assert_eq!(desc.kind, DescriptorHeapKind::RenderTarget);
        assert_eq!(desc.num_descriptors, 100);
        assert!(!desc.shader_visible);
        assert_eq!(desc.name, Some("RTV Heap".to_string()));

        let desc = DescriptorHeapDescriptor::shader_visible_srv_cbv_uav(128);
        assert!(desc.shader_visible);
    }

    #[test]
    fn test_persistent_round_trip() {
        let heap = persistent(4);
        let handles: Vec<_> = (0..4).map(|_| heap.allocate().unwrap()).collect();
        let indices: Vec<_> = handles.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);

        heap.release(handles[1]).unwrap();
        assert_eq!(heap.allocate().unwrap().index, 1);

        let err = heap.allocate().unwrap_err();
        assert!(matches!(
            err.as_graphics(),
            Some(GraphicsError::OutOfDescriptorSpace { capacity: 4, .. })
        ));
    }

    #[test]
    fn test_free_list_is_lifo() {
        let heap = persistent(8);
        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        heap.release(a).unwrap();
        heap.release(b).unwrap();
        assert_eq!(heap.allocate().unwrap(), b);
        assert_eq!(heap.allocate().unwrap(), a);
        assert_eq!(heap.allocated_count(), 2);
    }

    #[test]
    fn test_double_release_rejected() {
        let heap = persistent(2);
        let handle = heap.allocate().unwrap();
        heap.release(handle).unwrap();
        assert!(heap.release(handle).is_err());
        assert!(heap
            .release(DescriptorHandle::new(DescriptorHeapKind::RenderTarget, 0))
            .is_err());
        assert!(heap
            .release(DescriptorHandle::new(DescriptorHeapKind::CbvSrvUav, 7))
            .is_err());
    }

    #[test]
    fn test_slot_allocator_invariants_hold() {
        let mut slots = SlotAllocator::new(16);
        let mut live = Vec::new();
        // 固定的伪随机序列
        let mut seed = 0x2545_f491_u32;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 3 != 0 {
                if let Some(index) = slots.allocate() {
                    assert!(!live.contains(&index));
                    live.push(index);
                }
            } else if !live.is_empty() {
                let index = live.swap_remove(seed as usize % live.len());
                assert!(slots.release(index));
            }
            assert!(slots.check_invariants());
            assert_eq!(slots.live_count() as usize, live.len());
        }
    }

    #[test]
    fn test_persistent_heap_is_shareable() {
        let heap = std::sync::Arc::new(persistent(64));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let heap = heap.clone();
                std::thread::spawn(move || {
                    for _ in 0..8 {
                        let handle = heap.allocate().unwrap();
                        heap.release(handle).unwrap();
                    }
                    heap.allocate().unwrap()
                })
            })
            .collect();
        let mut indices: Vec<_> = workers.into_iter().map(|w| w.join().unwrap().index).collect();
        indices.sort();
        indices.dedup();
        assert_eq!(indices.len(), 4);
        assert_eq!(heap.stats().used, 4);
    }

    #[test]
    fn test_transient_heap_lifecycle() {
        let backend = NullBackend::new();
        let mut heap =
            TransientDescriptorHeap::new(&backend, 10, FailurePolicy::Propagate).unwrap();

        // 帧外分配是使用错误
        assert!(heap.allocate(1).is_err());

        heap.open();
        assert_eq!(heap.allocate(4).unwrap(), 0);
        assert_eq!(heap.allocate(4).unwrap(), 4);
        assert!(heap.allocate(4).is_err());
        assert_eq!(heap.allocated_count(), 8);

        // 帧仍在录制中，不能重置
        assert!(heap.reset(FenceValue::new(100)).is_err());

        heap.close(FenceValue::new(3));
        assert!(heap.reset(FenceValue::new(2)).is_err());
        assert_eq!(heap.allocated_count(), 8);
        heap.reset(FenceValue::new(3)).unwrap();
        assert_eq!(heap.allocated_count(), 0);
    }

    #[test]
    fn test_bump_allocator_monotonic() {
        let mut bump = BumpAllocator::new(32);
        let mut last = 0;
        for count in [1, 3, 0, 7, 5] {
            bump.allocate(count).unwrap();
            assert!(bump.allocated_count() >= last);
            last = bump.allocated_count();
        }
        assert!(bump.allocate(u32::MAX).is_none());
        assert_eq!(bump.allocated_count(), last);
    }

    #[test]
    fn test_descriptor_heap_stats() {
        let stats = DescriptorHeapStats::new(DescriptorHeapKind::RenderTarget, 100, 50);
        assert_eq!(stats.capacity, 100);
        assert_eq!(stats.used, 50);
        assert_eq!(stats.available, 50);
        assert_eq!(stats.usage_ratio, 0.5);
    }
}
