//! 配置管理模块
//!
//! 提供硬件抽象层配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (hal.toml)
//!
//! ```toml
//! [device]
//! backbuffer_count = 3
//! failure_policy = "propagate"   # 或 "abort"
//! fence_timeout_ms = 5000        # 省略则无限等待
//!
//! [descriptors]
//! persistent_cbv_srv_uav = 4096
//! persistent_rtv = 256
//! persistent_dsv = 64
//! transient_per_frame = 65536
//! item_table_size = 16
//! draw_context_table_size = 8
//!
//! [pipeline_cache]
//! max_age_frames = 300
//! visit_count = 8
//!
//! [commands]
//! flush_threshold = 128
//!
//! [timers]
//! max_timers_per_frame = 64
//!
//! [logging]
//! level = "info"      # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{ConfigError, Result};

/// 硬件抽象层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// 设备配置
    #[serde(default)]
    pub device: DeviceConfig,

    /// 描述符堆配置
    #[serde(default)]
    pub descriptors: DescriptorConfig,

    /// PSO 缓存配置
    #[serde(default)]
    pub pipeline_cache: PipelineCacheConfig,

    /// 命令列表配置
    #[serde(default)]
    pub commands: CommandConfig,

    /// GPU 计时器配置
    #[serde(default)]
    pub timers: TimerConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 设备配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 帧槽数量（双缓冲 / 三缓冲）
    #[serde(default = "default_backbuffer_count")]
    pub backbuffer_count: u32,

    /// 致命错误的处理策略
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,

    /// Fence 等待超时（毫秒），`None` 表示无限等待
    #[serde(default)]
    pub fence_timeout_ms: Option<u64>,
}

/// 致命错误处理策略
///
/// 堆耗尽、PSO 创建失败、设备丢失这类错误可以终止进程，
/// 也可以返回给调用者由其丢弃本帧。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// 记录后返回错误
    Propagate,
    /// 记录后 panic
    Abort,
}

/// 描述符堆配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// 持久 CBV/SRV/UAV 堆容量
    #[serde(default = "default_persistent_cbv_srv_uav")]
    pub persistent_cbv_srv_uav: u32,

    /// 持久 RTV 堆容量
    #[serde(default = "default_persistent_rtv")]
    pub persistent_rtv: u32,

    /// 持久 DSV 堆容量
    #[serde(default = "default_persistent_dsv")]
    pub persistent_dsv: u32,

    /// 每个帧槽的临时（着色器可见）堆容量
    #[serde(default = "default_transient_per_frame")]
    pub transient_per_frame: u32,

    /// 每个 Item 的描述符表大小（根参数 0）
    #[serde(default = "default_item_table_size")]
    pub item_table_size: u32,

    /// 每个绘制上下文的描述符表大小（根参数 1）
    #[serde(default = "default_draw_context_table_size")]
    pub draw_context_table_size: u32,
}

/// PSO 缓存配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCacheConfig {
    /// 超过多少帧未使用即淘汰
    #[serde(default = "default_max_age_frames")]
    pub max_age_frames: u64,

    /// 每次清理 tick 最多访问的条目数
    #[serde(default = "default_visit_count")]
    pub visit_count: usize,
}

/// 命令列表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// 自上次 Flush 以来超过多少个 Item 后，EndItems 自动 Flush
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: u32,
}

/// GPU 计时器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerConfig {
    /// 每帧最多的计时区间数量
    #[serde(default = "default_max_timers")]
    pub max_timers_per_frame: u32,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_backbuffer_count() -> u32 { 3 }
fn default_failure_policy() -> FailurePolicy { FailurePolicy::Propagate }
fn default_persistent_cbv_srv_uav() -> u32 { 4096 }
fn default_persistent_rtv() -> u32 { 256 }
fn default_persistent_dsv() -> u32 { 64 }
fn default_transient_per_frame() -> u32 { 65536 }
fn default_item_table_size() -> u32 { 16 }
fn default_draw_context_table_size() -> u32 { 8 }
fn default_max_age_frames() -> u64 { 300 }
fn default_visit_count() -> usize { 8 }
fn default_flush_threshold() -> u32 { 128 }
fn default_max_timers() -> u32 { 64 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "dist_render_hal.log".to_string() }

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backbuffer_count: default_backbuffer_count(),
            failure_policy: default_failure_policy(),
            fence_timeout_ms: None,
        }
    }
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            persistent_cbv_srv_uav: default_persistent_cbv_srv_uav(),
            persistent_rtv: default_persistent_rtv(),
            persistent_dsv: default_persistent_dsv(),
            transient_per_frame: default_transient_per_frame(),
            item_table_size: default_item_table_size(),
            draw_context_table_size: default_draw_context_table_size(),
        }
    }
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            max_age_frames: default_max_age_frames(),
            visit_count: default_visit_count(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_timers_per_frame: default_max_timers(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl DeviceConfig {
    /// Fence 等待超时
    pub fn fence_timeout(&self) -> Option<Duration> {
        self.fence_timeout_ms.map(Duration::from_millis)
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 示例
    ///
    /// ```no_run
    /// use dist_render_hal::core::Config;
    ///
    /// let config = Config::from_file("hal.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        Self::from_toml_str(&contents)
    }

    /// 从 TOML 字符串解析
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// 支持的参数：
    /// - `--backbuffers <value>`: 帧槽数量
    /// - `--abort-on-fatal`: 致命错误直接 panic
    /// - `--flush-threshold <value>`: 自动 Flush 阈值
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--abort-on-fatal") {
            self.device.failure_policy = FailurePolicy::Abort;
        }

        if let Some(value) = arg_value(&args, "--backbuffers") {
            self.device.backbuffer_count = value;
        }

        if let Some(value) = arg_value(&args, "--flush-threshold") {
            self.commands.flush_threshold = value;
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        if !(2..=4).contains(&self.device.backbuffer_count) {
            return Err(ConfigError::InvalidValue {
                field: "device.backbuffer_count".to_string(),
                reason: "Backbuffer count must be between 2 and 4".to_string(),
            }
            .into());
        }

        let d = &self.descriptors;
        if d.persistent_cbv_srv_uav == 0 || d.persistent_rtv == 0 || d.persistent_dsv == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.persistent_*".to_string(),
                reason: "Persistent heap capacities must be greater than 0".to_string(),
            }
            .into());
        }

        // 每帧至少要能容纳一个绘制上下文表和一个 Item 表
        if d.transient_per_frame < d.item_table_size + d.draw_context_table_size {
            return Err(ConfigError::InvalidValue {
                field: "descriptors.transient_per_frame".to_string(),
                reason: "Transient heap must fit at least one item table and one draw context table"
                    .to_string(),
            }
            .into());
        }

        if self.pipeline_cache.visit_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline_cache.visit_count".to_string(),
                reason: "Eviction sweep must visit at least one entry per tick".to_string(),
            }
            .into());
        }

        if self.commands.flush_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "commands.flush_threshold".to_string(),
                reason: "Flush threshold must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn arg_value<T: std::str::FromStr>(args: &[String], name: &str) -> Option<T> {
    let idx = args.iter().position(|a| a == name)?;
    args.get(idx + 1)?.parse().ok()
}
