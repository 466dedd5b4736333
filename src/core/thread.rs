//! 主渲染线程检查
//!
//! 命令录制、PSO 创建、每个 Item 的描述符分配和资源状态转换都只能在
//! 设备创建时所在的线程上进行。这里用 `ThreadId` 做防御性检查，
//! 而不是仅仅写在文档里。

use std::thread::{self, ThreadId};

use super::error::{GraphicsError, Result};

/// 记录"主渲染线程"的身份
#[derive(Debug, Clone, Copy)]
pub struct MainThread {
    id: ThreadId,
}

impl MainThread {
    /// 以当前线程作为主渲染线程
    pub fn current() -> Self {
        Self {
            id: thread::current().id(),
        }
    }

    /// 当前线程是否为主渲染线程
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// 检查当前线程，否则返回 `NotMainThread`
    pub fn check(&self, operation: &'static str) -> Result<()> {
        if self.is_current() {
            Ok(())
        } else {
            Err(GraphicsError::NotMainThread(operation).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_thread_passes() {
        let main = MainThread::current();
        assert!(main.check("record").is_ok());
    }

    #[test]
    fn test_other_thread_rejected() {
        let main = MainThread::current();
        let result = std::thread::spawn(move || main.check("record").is_err())
            .join()
            .unwrap();
        assert!(result);
    }
}
