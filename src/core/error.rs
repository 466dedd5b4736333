//! 错误处理模块
//!
//! 定义了硬件抽象层中使用的统一错误类型。
//!
//! # 错误分类
//!
//! - **致命错误**（容量耗尽、PSO 创建失败、非法视图请求、设备丢失）：
//!   表示尺寸配置或使用方式的 bug，经由 [`FailurePolicy`] 决定是返回给调用者还是直接终止。
//! - **可恢复状态**（着色器仍在编译）：不走错误路径，而是作为
//!   `ItemStatus::ShadersCompiling` 返回，调用者跳过本次绘制即可。
//! - **环境相关失败**（Present 失败、全屏状态被外部修改）：记录警告并回退到安全状态。

use std::fmt;

use super::config::FailurePolicy;

/// 引擎统一的 Result 类型
pub type Result<T> = std::result::Result<T, DistRenderError>;

/// DistRender 硬件抽象层的错误类型
#[derive(Debug)]
pub enum DistRenderError {
    /// 配置错误
    Config(ConfigError),

    /// 图形 API 错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 日志系统错误
    Log(String),

    /// 初始化错误
    Initialization(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形 API 相关的错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// 描述符堆空间耗尽
    OutOfDescriptorSpace {
        heap: &'static str,
        capacity: u32,
        requested: u32,
    },

    /// 管线状态对象创建失败
    PipelineCreationFailed(String),

    /// 非法的资源视图请求
    InvalidViewRequest(String),

    /// 着色器尚未就绪
    ShaderNotReady(String),

    /// 设备丢失 / 被移除
    DeviceLost(String),

    /// 状态机使用错误（例如在录制外提交 Item）
    InvalidState(String),

    /// 在非主渲染线程调用了仅限主线程的操作
    NotMainThread(&'static str),

    /// 交换链错误
    SwapchainError(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 渲染命令执行失败
    CommandExecution(String),
}

impl GraphicsError {
    /// 是否属于"致命"类别（受 [`FailurePolicy`] 控制）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraphicsError::OutOfDescriptorSpace { .. }
                | GraphicsError::PipelineCreationFailed(_)
                | GraphicsError::InvalidViewRequest(_)
                | GraphicsError::DeviceLost(_)
        )
    }
}

impl fmt::Display for DistRenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistRenderError::Config(e) => write!(f, "Configuration error: {}", e),
            DistRenderError::Graphics(e) => write!(f, "Graphics error: {}", e),
            DistRenderError::Io(e) => write!(f, "IO error: {}", e),
            DistRenderError::Log(msg) => write!(f, "Log error: {}", msg),
            DistRenderError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::OutOfDescriptorSpace { heap, capacity, requested } => write!(
                f,
                "Out of descriptor space in {} heap (capacity {}, requested {})",
                heap, capacity, requested
            ),
            GraphicsError::PipelineCreationFailed(msg) => {
                write!(f, "Pipeline state creation failed: {}", msg)
            }
            GraphicsError::InvalidViewRequest(msg) => write!(f, "Invalid view request: {}", msg),
            GraphicsError::ShaderNotReady(msg) => write!(f, "Shader not ready: {}", msg),
            GraphicsError::DeviceLost(msg) => write!(f, "Device lost: {}", msg),
            GraphicsError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            GraphicsError::NotMainThread(op) => {
                write!(f, "'{}' must be called from the main render thread", op)
            }
            GraphicsError::SwapchainError(msg) => write!(f, "Swapchain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => write!(f, "Resource creation failed: {}", msg),
            GraphicsError::CommandExecution(msg) => write!(f, "Command execution failed: {}", msg),
        }
    }
}

impl std::error::Error for DistRenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DistRenderError::Io(e) => Some(e),
            DistRenderError::Graphics(e) => Some(e),
            DistRenderError::Config(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

impl From<std::io::Error> for DistRenderError {
    fn from(err: std::io::Error) -> Self {
        DistRenderError::Io(err)
    }
}

impl From<ConfigError> for DistRenderError {
    fn from(err: ConfigError) -> Self {
        DistRenderError::Config(err)
    }
}

impl From<GraphicsError> for DistRenderError {
    fn from(err: GraphicsError) -> Self {
        DistRenderError::Graphics(err)
    }
}

impl DistRenderError {
    /// 取出内部的图形错误（如果是的话）
    pub fn as_graphics(&self) -> Option<&GraphicsError> {
        match self {
            DistRenderError::Graphics(e) => Some(e),
            _ => None,
        }
    }
}

/// 按失败策略处理一个图形错误
///
/// 所有"本不应发生"的致命错误都汇聚到这里：
/// - `Propagate`：记录错误并返回给调用者，由上层决定丢弃本帧还是关闭
/// - `Abort`：记录错误后直接 panic
///
/// 非致命错误总是原样返回。
pub fn raise(policy: FailurePolicy, err: GraphicsError) -> DistRenderError {
    if err.is_fatal() {
        crate::engine_error!(error = %err, ?policy, "Fatal graphics error");
        if policy == FailurePolicy::Abort {
            panic!("fatal graphics error: {}", err);
        }
    }
    DistRenderError::Graphics(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let oom = GraphicsError::OutOfDescriptorSpace {
            heap: "CBV/SRV/UAV",
            capacity: 4,
            requested: 1,
        };
        assert!(oom.is_fatal());
        assert!(!GraphicsError::ShaderNotReady("vs".into()).is_fatal());
        assert!(!GraphicsError::InvalidState("x".into()).is_fatal());
    }

    #[test]
    fn test_raise_propagate_returns_error() {
        let err = raise(
            FailurePolicy::Propagate,
            GraphicsError::PipelineCreationFailed("bad blob".into()),
        );
        assert_eq!(
            err.as_graphics(),
            Some(&GraphicsError::PipelineCreationFailed("bad blob".into()))
        );
    }

    #[test]
    #[should_panic(expected = "fatal graphics error")]
    fn test_raise_abort_panics() {
        let _ = raise(
            FailurePolicy::Abort,
            GraphicsError::DeviceLost("removed".into()),
        );
    }

    #[test]
    fn test_display() {
        let err: DistRenderError = GraphicsError::NotMainThread("begin_items").into();
        assert_eq!(
            err.to_string(),
            "Graphics error: 'begin_items' must be called from the main render thread"
        );
    }
}
