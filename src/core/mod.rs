//! 核心功能模块
//!
//! 与具体图形 API 无关的基础设施：日志、配置、错误处理和主线程检查。
//!
//! - `log`：基于 tracing 的日志系统
//! - `config`：配置管理，支持从 TOML 文件加载
//! - `error`：统一错误类型与失败策略
//! - `thread`：主渲染线程检查

pub mod log;
pub mod config;
pub mod error;
pub mod thread;

pub use error::{Result, DistRenderError, GraphicsError};
pub use config::{Config, FailurePolicy};
pub use thread::MainThread;
