//! 着色器协作接口
//!
//! 着色器的编译和磁盘缓存不在本层处理。渲染核心只轮询一个三态状态：
//! 已编译（字节码 + 内容 ID）、仍在编译、空。主线程从不等待编译。
//!
//! 内容 ID 唯一标识一份字节码，热重载会产生新的内容 ID，
//! 从而产生新的 PSO 键，而不是原地修改已有条目。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::core::error::{GraphicsError, Result};

/// 着色器阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Hull,
    Domain,
    Geometry,
    Compute,
}

impl ShaderStage {
    /// 获取阶段名称
    pub fn name(&self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Hull => "hull",
            ShaderStage::Domain => "domain",
            ShaderStage::Geometry => "geometry",
            ShaderStage::Compute => "compute",
        }
    }
}

/// 着色器句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderHandle(pub u32);

/// 已编译的着色器字节码
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    /// 内容 ID，0 保留给"无着色器"
    pub content_id: u64,
    pub bytecode: Arc<[u8]>,
}

impl ShaderBytecode {
    pub fn new(content_id: u64, bytecode: impl Into<Arc<[u8]>>) -> Self {
        Self {
            content_id,
            bytecode: bytecode.into(),
        }
    }
}

/// 着色器状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderStatus {
    /// 已编译
    Cooked(ShaderBytecode),
    /// 仍在编译
    Uncooked,
    /// 没有着色器
    Empty,
}

/// 着色器来源
///
/// 由外部的编译 / 缓存系统实现，可能在后台线程更新。
pub trait ShaderSource: Send + Sync {
    /// 查询着色器状态（不阻塞）
    fn shader_status(&self, handle: ShaderHandle) -> ShaderStatus;
}

#[derive(Debug)]
struct ShaderEntry {
    name: String,
    stage: ShaderStage,
    status: ShaderStatus,
}

/// 内存中的着色器库
///
/// 注册后处于"编译中"状态，直到 `cook` 提供字节码。
/// 每次 `cook` 都分配新的内容 ID。
#[derive(Debug)]
pub struct ShaderLibrary {
    entries: Mutex<Vec<ShaderEntry>>,
    next_content_id: AtomicU64,
}

impl ShaderLibrary {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_content_id: AtomicU64::new(1),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<ShaderEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 注册一个着色器，初始状态为编译中
    pub fn register(&self, name: impl Into<String>, stage: ShaderStage) -> ShaderHandle {
        let mut entries = self.entries();
        let handle = ShaderHandle(entries.len() as u32);
        entries.push(ShaderEntry {
            name: name.into(),
            stage,
            status: ShaderStatus::Uncooked,
        });
        handle
    }

    /// 提供编译结果，返回新的内容 ID
    pub fn cook(&self, handle: ShaderHandle, bytecode: impl Into<Arc<[u8]>>) -> Result<u64> {
        let content_id = self.next_content_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries();
        let entry = entries
            .get_mut(handle.0 as usize)
            .ok_or_else(|| GraphicsError::ShaderNotReady(format!("unknown shader {:?}", handle)))?;
        entry.status = ShaderStatus::Cooked(ShaderBytecode::new(content_id, bytecode));
        debug!(shader = %entry.name, stage = entry.stage.name(), content_id, "Shader cooked");
        Ok(content_id)
    }

    /// 标记为重新编译中（热重载开始）
    pub fn mark_compiling(&self, handle: ShaderHandle) -> Result<()> {
        self.set_status(handle, ShaderStatus::Uncooked)
    }

    /// 清空着色器
    pub fn clear(&self, handle: ShaderHandle) -> Result<()> {
        self.set_status(handle, ShaderStatus::Empty)
    }

    fn set_status(&self, handle: ShaderHandle, status: ShaderStatus) -> Result<()> {
        let mut entries = self.entries();
        let entry = entries
            .get_mut(handle.0 as usize)
            .ok_or_else(|| GraphicsError::ShaderNotReady(format!("unknown shader {:?}", handle)))?;
        entry.status = status;
        Ok(())
    }

    /// 着色器阶段
    pub fn stage(&self, handle: ShaderHandle) -> Option<ShaderStage> {
        self.entries().get(handle.0 as usize).map(|entry| entry.stage)
    }

    /// 已注册的着色器数量
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderSource for ShaderLibrary {
    fn shader_status(&self, handle: ShaderHandle) -> ShaderStatus {
        self.entries()
            .get(handle.0 as usize)
            .map(|entry| entry.status.clone())
            .unwrap_or(ShaderStatus::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_then_cook() {
        let library = ShaderLibrary::new();
        let vs = library.register("mesh.vs", ShaderStage::Vertex);
        assert_eq!(library.shader_status(vs), ShaderStatus::Uncooked);
        assert_eq!(library.stage(vs), Some(ShaderStage::Vertex));

        let id = library.cook(vs, vec![1u8, 2, 3]).unwrap();
        assert_ne!(id, 0);
        match library.shader_status(vs) {
            ShaderStatus::Cooked(bytecode) => {
                assert_eq!(bytecode.content_id, id);
                assert_eq!(&*bytecode.bytecode, &[1, 2, 3]);
            }
            other => panic!("unexpected status {:?}", other),
        }
    }

    #[test]
    fn test_hot_reload_changes_content_id() {
        let library = ShaderLibrary::new();
        let ps = library.register("lit.ps", ShaderStage::Pixel);
        let first = library.cook(ps, vec![0u8]).unwrap();
        library.mark_compiling(ps).unwrap();
        assert_eq!(library.shader_status(ps), ShaderStatus::Uncooked);
        let second = library.cook(ps, vec![0u8]).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_unknown_and_cleared_shaders_are_empty() {
        let library = ShaderLibrary::new();
        assert_eq!(library.shader_status(ShaderHandle(9)), ShaderStatus::Empty);
        let cs = library.register("cull.cs", ShaderStage::Compute);
        library.clear(cs).unwrap();
        assert_eq!(library.shader_status(cs), ShaderStatus::Empty);
        assert!(library.cook(ShaderHandle(9), vec![0u8]).is_err());
    }
}
