//! GPU 计时器
//!
//! 每个帧槽拥有一段时间戳查询。命名的作用域在录制时写入起止时间戳，
//! 帧结束时解析到回读缓冲区，等到该帧槽的 Fence 到达后再读取，
//! 所以读到的总是 N 帧之前的结果，不会阻塞。

use tracing::{trace, warn};

use crate::core::error::Result;
use crate::gfx::backend::GpuBackend;
use crate::renderer::sync::FrameSlotIndex;

/// 计时器作用域句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

/// 一个作用域的耗时
#[derive(Debug, Clone, PartialEq)]
pub struct TimerResult {
    pub name: String,
    pub milliseconds: f64,
}

#[derive(Debug)]
struct TimerScope {
    name: String,
    ended: bool,
}

struct SlotTimers<B: GpuBackend> {
    heap: B::QueryHeap,
    scopes: Vec<TimerScope>,
    resolved: bool,
}

/// 按帧槽划分的 GPU 计时器
pub struct GpuTimers<B: GpuBackend> {
    slots: Vec<SlotTimers<B>>,
    max_timers: u32,
    frequency: u64,
    results: Vec<TimerResult>,
    overflow_warned: bool,
}

impl<B: GpuBackend> GpuTimers<B> {
    /// 为每个帧槽创建查询堆（每个作用域两个时间戳）
    pub fn new(backend: &B, slot_count: usize, max_timers: u32) -> Result<Self> {
        let slots = (0..slot_count)
            .map(|_| {
                Ok(SlotTimers {
                    heap: backend.create_timestamp_heap(max_timers * 2)?,
                    scopes: Vec::new(),
                    resolved: false,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            slots,
            max_timers,
            frequency: backend.timestamp_frequency()?,
            results: Vec::new(),
            overflow_warned: false,
        })
    }

    /// 开始一个作用域；超出每帧上限时返回 `None`
    pub fn begin(
        &mut self,
        backend: &B,
        list: &mut B::CommandList,
        slot: FrameSlotIndex,
        name: &str,
    ) -> Option<TimerId> {
        let timers = &mut self.slots[slot];
        if timers.scopes.len() as u32 >= self.max_timers {
            if !self.overflow_warned {
                warn!(max = self.max_timers, scope = name, "GPU timer budget exhausted for this frame");
                self.overflow_warned = true;
            }
            return None;
        }
        let index = timers.scopes.len() as u32;
        backend.write_timestamp(list, &timers.heap, index * 2);
        timers.scopes.push(TimerScope {
            name: name.to_string(),
            ended: false,
        });
        Some(TimerId(index))
    }

    /// 结束一个作用域
    pub fn end(&mut self, backend: &B, list: &mut B::CommandList, slot: FrameSlotIndex, id: TimerId) {
        let timers = &mut self.slots[slot];
        if let Some(scope) = timers.scopes.get_mut(id.0 as usize) {
            if !scope.ended {
                backend.write_timestamp(list, &timers.heap, id.0 * 2 + 1);
                scope.ended = true;
            }
        }
    }

    /// 帧结束时解析本帧的时间戳
    ///
    /// 尚未结束的作用域在这里被结束。
    pub fn resolve(&mut self, backend: &B, list: &mut B::CommandList, slot: FrameSlotIndex) {
        let timers = &mut self.slots[slot];
        if timers.scopes.is_empty() {
            return;
        }
        for (index, scope) in timers.scopes.iter_mut().enumerate() {
            if !scope.ended {
                warn!(scope = %scope.name, "GPU timer scope was not ended before end of frame");
                backend.write_timestamp(list, &timers.heap, index as u32 * 2 + 1);
                scope.ended = true;
            }
        }
        backend.resolve_timestamps(list, &timers.heap, timers.scopes.len() as u32 * 2);
        timers.resolved = true;
    }

    /// 读取帧槽上一轮的结果；调用者保证该帧槽的 Fence 已到达
    pub fn collect(&mut self, backend: &B, slot: FrameSlotIndex) -> Result<&[TimerResult]> {
        let timers = &mut self.slots[slot];
        let scopes = std::mem::take(&mut timers.scopes);
        let resolved = std::mem::replace(&mut timers.resolved, false);
        self.overflow_warned = false;

        if !resolved || scopes.is_empty() {
            self.results.clear();
            return Ok(&self.results);
        }

        let values = backend.read_timestamps(&timers.heap, scopes.len() as u32 * 2)?;
        let frequency = self.frequency.max(1) as f64;
        self.results = scopes
            .into_iter()
            .enumerate()
            .map(|(index, scope)| {
                let begin = values.get(index * 2).copied().unwrap_or(0);
                let end = values.get(index * 2 + 1).copied().unwrap_or(begin);
                TimerResult {
                    name: scope.name,
                    milliseconds: end.saturating_sub(begin) as f64 * 1000.0 / frequency,
                }
            })
            .collect();
        trace!(slot, timers = self.results.len(), "GPU timers collected");
        Ok(&self.results)
    }

    /// 最近一次读取的结果
    pub fn last_results(&self) -> &[TimerResult] {
        &self.results
    }

    /// 帧槽中当前打开的作用域数量
    pub fn scope_count(&self, slot: FrameSlotIndex) -> usize {
        self.slots[slot].scopes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::null::NullBackend;

    fn record<F>(backend: &NullBackend, f: F)
    where
        F: FnOnce(&mut <NullBackend as GpuBackend>::CommandList),
    {
        let allocator = backend.create_command_allocator().unwrap();
        let mut list = backend.create_command_list(&allocator).unwrap();
        backend.reset_command_list(&mut list, &allocator).unwrap();
        f(&mut list);
        backend.close_command_list(&mut list).unwrap();
        backend.execute_command_list(&list).unwrap();
    }

    #[test]
    fn test_scopes_measure_gpu_time() {
        let backend = NullBackend::new();
        let mut timers = GpuTimers::new(&backend, 2, 4).unwrap();

        record(&backend, |list| {
            let id = timers.begin(&backend, list, 0, "shadows").unwrap();
            backend.dispatch(list, [1, 1, 1]);
            backend.dispatch(list, [1, 1, 1]);
            timers.end(&backend, list, 0, id);
            timers.resolve(&backend, list, 0);
        });

        let results = timers.collect(&backend, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "shadows");
        // 三条命令，每条 10 微秒
        assert!((results[0].milliseconds - 0.03).abs() < 1e-9);
        assert_eq!(timers.scope_count(0), 0);
    }

    #[test]
    fn test_budget_and_unended_scopes() {
        let backend = NullBackend::new();
        let mut timers = GpuTimers::new(&backend, 1, 2).unwrap();

        record(&backend, |list| {
            assert!(timers.begin(&backend, list, 0, "a").is_some());
            assert!(timers.begin(&backend, list, 0, "b").is_some());
            assert!(timers.begin(&backend, list, 0, "c").is_none());
            timers.resolve(&backend, list, 0);
        });

        let names: Vec<_> = timers
            .collect(&backend, 0)
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_untimed_slot_reports_no_results() {
        let backend = NullBackend::new();
        let mut timers = GpuTimers::new(&backend, 2, 2).unwrap();
        assert!(timers.collect(&backend, 0).unwrap().is_empty());

        record(&backend, |list| {
            let id = timers.begin(&backend, list, 0, "lighting").unwrap();
            timers.end(&backend, list, 0, id);
            timers.resolve(&backend, list, 0);
        });
        assert_eq!(timers.collect(&backend, 0).unwrap().len(), 1);

        // 帧槽 1 没有计时，不能带出帧槽 0 的旧结果
        record(&backend, |list| timers.resolve(&backend, list, 1));
        assert!(timers.collect(&backend, 1).unwrap().is_empty());
        assert!(timers.last_results().is_empty());
    }
}
