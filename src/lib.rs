//! DistRender HAL - 帧流水线化的 GPU 资源与描述符生命周期核心
//!
//! 渲染核心在 CPU 与 GPU 之间维护 N 帧（2~4）的流水线：
//! 每个帧槽位由一个 Fence 值守护，资源、描述符和管线只有在
//! 引用它们的最后一帧完成后才会被销毁或复用。
//!
//! # 模块结构
//!
//! - `core`: 核心功能模块（日志、配置、错误处理、主线程检查）
//! - `renderer`: 与图形 API 无关的渲染核心（描述符堆、PSO 缓存、延迟释放、
//!   命令列表状态机、GPU 计时器、设备）
//! - `gfx`: 图形后端抽象层以及 DirectX 12 / 空后端实现
//!
//! # 使用示例
//!
//! ```no_run
//! use std::sync::Arc;
//! use dist_render_hal::core::Config;
//! use dist_render_hal::gfx::null::{NullBackend, NullPresenter};
//! use dist_render_hal::renderer::device::Device;
//! use dist_render_hal::renderer::shader::ShaderLibrary;
//!
//! # fn main() -> dist_render_hal::core::Result<()> {
//! let config = Config::default();
//! let backend = Arc::new(NullBackend::new());
//! let presenter = NullPresenter::new(&backend, 3, 1280, 720)?;
//! let shaders = Arc::new(ShaderLibrary::new());
//! let mut device = Device::new(backend, presenter, shaders, &config)?;
//!
//! device.begin_frame()?;
//! device.bind_backbuffer()?;
//! device.clear_backbuffer([0.1, 0.1, 0.1, 1.0])?;
//! device.end_and_present_frame(1)?;
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod gfx;
pub mod renderer;
