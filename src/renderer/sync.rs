//! GPU 同步机制模块
//!
//! 帧栅栏（FrameFence）：一个由 GPU 队列 signal 的单调递增计数器，
//! 用于判断某个帧槽之前提交的 GPU 工作是否已经完成。
//!
//! # 使用场景
//!
//! 1. **帧槽复用**：复用帧槽 N 之前，等待它上次记录的 Fence 值
//! 2. **延迟释放**：帧槽 N 的延迟释放回调只在该 Fence 值到达后执行
//! 3. **关闭 / 调整交换链**：signal 一个新值并等待它，保证没有在途的 GPU 引用

use std::time::Duration;

use tracing::{debug, trace};

use crate::core::config::FailurePolicy;
use crate::core::error::{raise, GraphicsError, Result};
use crate::gfx::backend::GpuBackend;

/// 帧槽索引，取值范围 `[0, BackbufferCount)`
pub type FrameSlotIndex = usize;

/// Fence 值
///
/// 用于 CPU-GPU 同步的单调递增值。
/// 当 GPU 已完成值 ≥ v 时，称 v "已到达"。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 初始值，总是视为已到达
    pub const ZERO: FenceValue = FenceValue(0);

    /// 创建新的 Fence 值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个 Fence 值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

/// 帧栅栏
///
/// CPU 侧维护最近一次 signal 的值，以及每个帧槽复用前必须到达的值；
/// GPU 侧完成值通过后端查询。
#[derive(Debug)]
pub struct FrameFence {
    /// 最近一次 signal 的值（CPU 侧）
    last_signaled: FenceValue,
    /// 每个帧槽记录的 Fence 值
    slot_values: Vec<FenceValue>,
    /// 等待超时，`None` 表示无限等待
    timeout: Option<Duration>,
    policy: FailurePolicy,
}

impl FrameFence {
    /// 创建新的帧栅栏
    pub fn new(slot_count: usize, timeout: Option<Duration>, policy: FailurePolicy) -> Self {
        Self {
            last_signaled: FenceValue::ZERO,
            slot_values: vec![FenceValue::ZERO; slot_count],
            timeout,
            policy,
        }
    }

    /// 帧槽数量
    pub fn slot_count(&self) -> usize {
        self.slot_values.len()
    }

    /// 最近一次 signal 的值
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// 帧槽复用前必须到达的值
    pub fn slot_value(&self, slot: FrameSlotIndex) -> FenceValue {
        self.slot_values[slot]
    }

    /// 在队列上 signal 下一个值并返回它
    pub fn signal<B: GpuBackend>(&mut self, backend: &B) -> Result<FenceValue> {
        let value = self.last_signaled.next();
        backend.signal(value.value())?;
        self.last_signaled = value;
        trace!(fence = value.value(), "Fence signaled");
        Ok(value)
    }

    /// 记录帧槽的 Fence 值
    ///
    /// 同一帧槽记录的值必须单调不减。
    pub fn record_slot(&mut self, slot: FrameSlotIndex, value: FenceValue) -> Result<()> {
        let previous = self.slot_values[slot];
        if value < previous {
            return Err(GraphicsError::InvalidState(format!(
                "fence value {} recorded for slot {} is below previous value {}",
                value.value(),
                slot,
                previous.value()
            ))
            .into());
        }
        self.slot_values[slot] = value;
        Ok(())
    }

    /// 检查某个 Fence 值是否已到达
    pub fn is_reached<B: GpuBackend>(&self, backend: &B, value: FenceValue) -> bool {
        backend.completed_fence_value() >= value.value()
    }

    /// GPU 已完成的值
    pub fn completed<B: GpuBackend>(&self, backend: &B) -> FenceValue {
        FenceValue::new(backend.completed_fence_value())
    }

    /// 阻塞直到 Fence 值到达
    ///
    /// 这是稳态运行中唯一真正阻塞的点。超时视为设备丢失。
    pub fn wait<B: GpuBackend>(&self, backend: &B, value: FenceValue) -> Result<()> {
        if self.is_reached(backend, value) {
            return Ok(());
        }

        debug!(fence = value.value(), "Waiting for GPU fence");
        let reached = backend.wait_for_fence(value.value(), self.timeout)?;
        if !reached {
            return Err(raise(
                self.policy,
                GraphicsError::DeviceLost(format!(
                    "timed out waiting for fence value {} (completed {})",
                    value.value(),
                    backend.completed_fence_value()
                )),
            ));
        }

        if !self.is_reached(backend, value) {
            return Err(raise(
                self.policy,
                GraphicsError::DeviceLost(format!(
                    "fence wait returned before value {} was reached",
                    value.value()
                )),
            ));
        }
        Ok(())
    }

    /// 等待帧槽上次记录的值
    pub fn wait_for_slot<B: GpuBackend>(&self, backend: &B, slot: FrameSlotIndex) -> Result<()> {
        self.wait(backend, self.slot_values[slot])
    }

    /// signal 一个新值并等待它（GPU 完全空闲）
    pub fn flush<B: GpuBackend>(&mut self, backend: &B) -> Result<FenceValue> {
        let value = self.signal(backend)?;
        self.wait(backend, value)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::null::NullBackend;

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::ZERO < fence);
    }

    #[test]
    fn test_signal_is_monotonic() {
        let backend = NullBackend::new();
        let mut fence = FrameFence::new(3, None, FailurePolicy::Propagate);

        let v1 = fence.signal(&backend).unwrap();
        let v2 = fence.signal(&backend).unwrap();
        assert!(v2 > v1);
        assert_eq!(fence.last_signaled(), v2);

        // GPU 尚未执行
        assert!(!fence.is_reached(&backend, v1));
        fence.wait(&backend, v1).unwrap();
        assert!(fence.is_reached(&backend, v1));
    }

    #[test]
    fn test_slot_values_never_decrease() {
        let mut fence = FrameFence::new(2, None, FailurePolicy::Propagate);
        fence.record_slot(0, FenceValue::new(4)).unwrap();
        fence.record_slot(0, FenceValue::new(4)).unwrap();
        assert!(fence.record_slot(0, FenceValue::new(3)).is_err());
        assert_eq!(fence.slot_value(0), FenceValue::new(4));
        assert_eq!(fence.slot_value(1), FenceValue::ZERO);
    }

    #[test]
    fn test_wait_for_unsignaled_value_times_out() {
        let backend = NullBackend::new();
        let fence = FrameFence::new(
            2,
            Some(Duration::from_millis(1)),
            FailurePolicy::Propagate,
        );

        let err = fence.wait(&backend, FenceValue::new(10)).unwrap_err();
        assert!(matches!(err.as_graphics(), Some(GraphicsError::DeviceLost(_))));
    }

    #[test]
    fn test_flush_waits_for_everything() {
        let backend = NullBackend::new();
        let mut fence = FrameFence::new(2, None, FailurePolicy::Propagate);
        fence.signal(&backend).unwrap();
        let value = fence.flush(&backend).unwrap();
        assert_eq!(fence.completed(&backend), value);
    }
}
