//! DirectX 12 图形 API 实现模块
//!
//! - `backend`：设备、命令队列、Fence、根签名，实现 `GpuBackend`
//! - `swapchain`：交换链，实现 `Presenter`
//! - `descriptor`：原生描述符堆与句柄运算
//! - `conv`：渲染核心类型到 D3D12 / DXGI 枚举的转换

pub mod backend;
pub mod conv;
pub mod descriptor;
pub mod swapchain;

// 重新导出常用类型
pub use backend::{Dx12Backend, Dx12Resource};
pub use descriptor::Dx12DescriptorHeap;
pub use swapchain::Dx12Presenter;
