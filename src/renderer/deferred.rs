//! 延迟释放队列
//!
//! 被 GPU 引用的资源不能同步销毁。所有权被转移到当前帧槽的回调列表中，
//! 等到该帧槽再次被复用（它记录的 Fence 值已到达）时才真正执行。
//!
//! - 每个回调恰好执行一次
//! - 执行前先把列表与空列表交换，回调执行期间新加入的回调
//!   落到新列表里，下次服务该帧槽时才执行
//! - 插入由互斥锁保护，任何线程都可以调用

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{trace, warn};

use crate::renderer::sync::FrameSlotIndex;

/// 延迟释放回调
pub type ReleaseCallback = Box<dyn FnOnce() + Send + 'static>;

/// 关闭时为防止回调无限重新入队而设置的最大轮数
const MAX_SHUTDOWN_ROUNDS: usize = 16;

struct QueueShared {
    slots: Mutex<Vec<Vec<ReleaseCallback>>>,
    current_slot: AtomicUsize,
}

impl QueueShared {
    fn lock(&self) -> MutexGuard<'_, Vec<Vec<ReleaseCallback>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, callback: ReleaseCallback) {
        let slot = self.current_slot.load(Ordering::Acquire);
        self.lock()[slot].push(callback);
    }
}

/// 按帧槽划分的延迟释放队列
pub struct DeferredReleaseQueue {
    shared: Arc<QueueShared>,
}

impl DeferredReleaseQueue {
    /// 创建新的延迟释放队列
    pub fn new(slot_count: usize) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                slots: Mutex::new((0..slot_count).map(|_| Vec::new()).collect()),
                current_slot: AtomicUsize::new(0),
            }),
        }
    }

    /// 切换当前帧槽
    pub fn set_current_slot(&self, slot: FrameSlotIndex) {
        self.shared.current_slot.store(slot, Ordering::Release);
    }

    /// 当前帧槽
    pub fn current_slot(&self) -> FrameSlotIndex {
        self.shared.current_slot.load(Ordering::Acquire)
    }

    /// 帧槽数量
    pub fn slot_count(&self) -> usize {
        self.shared.lock().len()
    }

    /// 在当前帧的 GPU 工作完成后执行回调
    pub fn execute_after_current_gpu_frame_done<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.push(Box::new(callback));
    }

    /// 执行某个帧槽的全部回调，返回执行的数量
    ///
    /// 调用者必须保证该帧槽记录的 Fence 值已经到达。
    pub fn drain(&self, slot: FrameSlotIndex) -> usize {
        let callbacks = std::mem::take(&mut self.shared.lock()[slot]);
        let count = callbacks.len();
        // 执行时不持有锁，回调可以安全地重新入队
        for callback in callbacks {
            callback();
        }
        if count > 0 {
            trace!(slot, count, "Deferred releases executed");
        }
        count
    }

    /// 执行所有帧槽的回调，直到队列为空
    ///
    /// 仅在 GPU 完全空闲时调用（关闭、调整交换链）。
    pub fn drain_all(&self) -> usize {
        let slot_count = self.slot_count();
        let mut total = 0;
        for _ in 0..MAX_SHUTDOWN_ROUNDS {
            let executed: usize = (0..slot_count).map(|slot| self.drain(slot)).sum();
            total += executed;
            if executed == 0 {
                return total;
            }
        }
        warn!(
            pending = self.pending_total(),
            "Deferred release callbacks keep re-queueing themselves"
        );
        total
    }

    /// 某个帧槽待执行的回调数量
    pub fn pending(&self, slot: FrameSlotIndex) -> usize {
        self.shared.lock()[slot].len()
    }

    /// 全部待执行的回调数量
    pub fn pending_total(&self) -> usize {
        self.shared.lock().iter().map(Vec::len).sum()
    }

    /// 获取一个可克隆的非拥有句柄
    pub fn releaser(&self) -> DeferredReleaser {
        DeferredReleaser {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

impl Drop for DeferredReleaseQueue {
    fn drop(&mut self) {
        let executed = self.drain_all();
        if executed > 0 {
            trace!(executed, "Deferred release queue flushed on drop");
        }
    }
}

/// 指向延迟释放队列的非拥有句柄
///
/// 资源、视图和 PSO 通过它把自己的销毁推迟到 GPU 用完之后。
/// 若队列已不存在（设备已关闭并等待过 GPU），回调立即执行。
#[derive(Clone)]
pub struct DeferredReleaser {
    shared: Weak<QueueShared>,
}

impl DeferredReleaser {
    /// 一个不关联任何队列的句柄，回调总是立即执行
    pub fn detached() -> Self {
        Self { shared: Weak::new() }
    }

    /// 队列是否仍然存活
    pub fn is_alive(&self) -> bool {
        self.shared.strong_count() > 0
    }

    /// 推迟执行回调；返回 `false` 表示已立即执行
    pub fn release<F>(&self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        match self.shared.upgrade() {
            Some(shared) => {
                shared.push(Box::new(callback));
                true
            }
            None => {
                callback();
                false
            }
        }
    }

    /// 推迟销毁一个值
    pub fn release_value<T: Send + 'static>(&self, value: T) -> bool {
        self.release(move || drop(value))
    }
}

/// 延迟销毁的拥有者
///
/// 持有一个原生对象；被 drop 时把对象移交给延迟释放队列，而不是同步销毁。
pub struct Deferred<T: Send + 'static> {
    value: Option<T>,
    releaser: DeferredReleaser,
}

impl<T: Send + 'static> Deferred<T> {
    /// 包装一个值
    pub fn new(value: T, releaser: DeferredReleaser) -> Self {
        Self {
            value: Some(value),
            releaser,
        }
    }

    /// 取回内部值，不经过延迟队列
    ///
    /// 仅当调用者能证明 GPU 没有引用它时使用。
    pub fn into_inner(mut self) -> T {
        match self.value.take() {
            Some(value) => value,
            None => unreachable!("deferred value taken twice"),
        }
    }
}

impl<T: Send + 'static> Deref for Deferred<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.value {
            Some(value) => value,
            None => unreachable!("deferred value accessed after release"),
        }
    }
}

impl<T: Send + 'static> DerefMut for Deferred<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.value {
            Some(value) => value,
            None => unreachable!("deferred value accessed after release"),
        }
    }
}

impl<T: Send + 'static> Drop for Deferred<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            self.releaser.release_value(value);
        }
    }
}

impl<T: Send + std::fmt::Debug + 'static> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Deferred").field(&self.value).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct Tracked(Arc<AtomicU32>);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_callback_runs_once_on_its_slot() {
        let queue = DeferredReleaseQueue::new(3);
        let counter = Arc::new(AtomicU32::new(0));

        let c = counter.clone();
        queue.execute_after_current_gpu_frame_done(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(queue.pending(0), 1);

        assert_eq!(queue.drain(1), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        assert_eq!(queue.drain(0), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.drain(0), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_release_waits_for_next_drain() {
        let queue = Arc::new(DeferredReleaseQueue::new(2));
        let counter = Arc::new(AtomicU32::new(0));

        let releaser = queue.releaser();
        let c = counter.clone();
        queue.execute_after_current_gpu_frame_done(move || {
            let c2 = c.clone();
            releaser.release(move || {
                c2.fetch_add(10, Ordering::SeqCst);
            });
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.drain(0), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending(0), 1);

        assert_eq!(queue.drain(0), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_deferred_value_released_through_queue() {
        let queue = DeferredReleaseQueue::new(2);
        let drops = Arc::new(AtomicU32::new(0));

        queue.set_current_slot(1);
        let value = Deferred::new(Tracked(drops.clone()), queue.releaser());
        drop(value);

        assert_eq!(drops.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pending(1), 1);
        queue.drain(1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_releaser_without_queue_runs_immediately() {
        let drops = Arc::new(AtomicU32::new(0));
        let releaser = {
            let queue = DeferredReleaseQueue::new(2);
            queue.releaser()
        };
        assert!(!releaser.is_alive());
        let value = Deferred::new(Tracked(drops.clone()), releaser);
        drop(value);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        let detached = Deferred::new(Tracked(drops.clone()), DeferredReleaser::detached());
        drop(detached);
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_queue_drop_flushes_pending() {
        let drops = Arc::new(AtomicU32::new(0));
        {
            let queue = DeferredReleaseQueue::new(3);
            for slot in 0..3 {
                queue.set_current_slot(slot);
                queue.releaser().release_value(Tracked(drops.clone()));
            }
            assert_eq!(queue.pending_total(), 3);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_insertion_from_other_threads() {
        let queue = DeferredReleaseQueue::new(2);
        let counter = Arc::new(AtomicU32::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let releaser = queue.releaser();
                let c = counter.clone();
                std::thread::spawn(move || {
                    releaser.release(move || {
                        c.fetch_add(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for worker in workers {
            assert!(worker.join().unwrap());
        }
        assert_eq!(queue.drain(0), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
