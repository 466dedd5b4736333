//! 渲染核心模块
//!
//! 与具体图形 API 无关的部分，全部通过 `gfx::backend::GpuBackend` 访问原生对象。
//!
//! # 架构设计
//!
//! - `sync`：帧 Fence，每个帧槽位记录其最后一次 signal 的值
//! - `deferred`：按 Fence 值排队的延迟释放回调
//! - `descriptor`：持久描述符堆（空闲链表）与瞬态描述符堆（每帧线性分配）
//! - `view`：视图描述的纯函数与常量缓冲对齐
//! - `resource`：GPU 资源、资源状态跟踪与状态转换
//! - `pipeline`：渲染状态、PSO 键与带 LRU 淘汰的 PSO 缓存
//! - `shader`：着色器三态轮询接口与内存着色器库
//! - `timer`：基于时间戳查询的 GPU 计时器
//! - `command`：命令列表上下文状态机与绘制 / 计算 Item
//! - `device`：把以上部分组合成帧循环

pub mod command;
pub mod deferred;
pub mod descriptor;
pub mod device;
pub mod pipeline;
pub mod resource;
pub mod shader;
pub mod sync;
pub mod timer;
pub mod view;

pub use command::{CommandListContext, ComputeItem, ContextState, GraphicsItem, ItemStatus};
pub use device::Device;
pub use resource::GpuResource;
