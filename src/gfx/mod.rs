//! 图形后端模块
//!
//! 本模块封装了不同图形 API 的底层实现：
//! - DirectX 12：Windows 平台的高性能图形 API
//! - null：不访问 GPU 的空后端，用于测试与无头运行
//!
//! 所有后端都实现了统一的 `GpuBackend` trait，交换链实现 `Presenter`。

pub mod backend;
pub mod null;
#[cfg(target_os = "windows")]
pub mod dx12;

pub use backend::{GpuBackend, PresentError, Presenter};
pub use null::{NullBackend, NullPresenter};
#[cfg(target_os = "windows")]
pub use dx12::{Dx12Backend, Dx12Presenter};
