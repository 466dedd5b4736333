//! DistRender HAL - 无头演示程序
//!
//! 在空后端上运行指定数量的帧，演示完整的帧流水线：
//! 帧槽等待、延迟释放、瞬态描述符表、PSO 缓存和 GPU 计时器。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（hal.toml，不存在时使用默认配置）
//! cargo run
//!
//! # 命令行覆盖
//! cargo run -- --frames 240 --backbuffers 2 --flush-threshold 64
//! ```
//!
//! # 命令行参数
//!
//! - `--frames <value>`: 运行的帧数（默认 120）
//! - `--backbuffers <value>`: 后台缓冲数量（2~4）
//! - `--flush-threshold <value>`: 自动 flush 的 Item 数量阈值
//! - `--abort-on-fatal`: 致命错误时终止进程

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use dist_render_hal::core::{log, Config};
use dist_render_hal::engine_info;
use dist_render_hal::gfx::backend::DrawArgs;
use dist_render_hal::gfx::null::{NullBackend, NullPresenter};
use dist_render_hal::renderer::command::{ComputeItem, GraphicsItem, ItemKind};
use dist_render_hal::renderer::device::Device;
use dist_render_hal::renderer::resource::{Format, ResourceDescriptor, ResourceShape, ResourceUsage};
use dist_render_hal::renderer::shader::{ShaderLibrary, ShaderStage};
use dist_render_hal::renderer::view::ViewRequest;

const DEFAULT_FRAMES: u64 = 120;
const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

/// 占位字节码；空后端不解析着色器内容
const FAKE_DXBC: [u8; 4] = *b"DXBC";

fn frame_count(args: &[String]) -> u64 {
    args.iter()
        .position(|a| a == "--frames")
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_FRAMES)
}

/// 应用程序入口点
///
/// # 初始化流程
///
/// 1. 加载配置文件（hal.toml）并应用命令行参数
/// 2. 初始化日志系统
/// 3. 创建空后端、交换链和设备
/// 4. 运行帧循环
/// 5. 输出统计信息并关闭设备
fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    // 1. 加载配置（在初始化日志之前）
    let mut config = Config::from_file_or_default("hal.toml");
    config.apply_args(&args);
    config.validate().context("Invalid configuration")?;

    // 2. 初始化日志系统
    let log_file = config
        .logging
        .file_output
        .then_some(config.logging.log_file.as_str());
    log::init_logger(config.logging.level, config.logging.file_output, log_file);
    info!(version = env!("CARGO_PKG_VERSION"), "DistRender HAL starting...");

    // 3. 创建设备
    let backend = Arc::new(NullBackend::new());
    let presenter = NullPresenter::new(&backend, config.device.backbuffer_count, WIDTH, HEIGHT)
        .context("Failed to create presenter")?;
    let shaders = Arc::new(ShaderLibrary::new());
    let mut device =
        Device::new(backend.clone(), presenter, shaders.clone(), &config).context("Failed to create device")?;

    let simulate = shaders.register("simulate.cs", ShaderStage::Compute);
    let fullscreen = shaders.register("fullscreen.vs", ShaderStage::Vertex);
    let composite = shaders.register("composite.ps", ShaderStage::Pixel);
    for handle in [simulate, fullscreen, composite] {
        shaders.cook(handle, FAKE_DXBC.to_vec())?;
    }

    let particles = device.create_resource(
        &ResourceDescriptor::new(ResourceShape::structured_buffer(4096, 16, ResourceUsage::STORAGE))
            .with_name("Particles"),
    )?;
    let lut = device.create_resource(
        &ResourceDescriptor::new(ResourceShape::texture_2d(256, 16, Format::Rgba8Unorm, 1, ResourceUsage::SAMPLED))
            .with_name("Color LUT"),
    )?;

    // 4. 帧循环
    let frames = frame_count(&args);
    engine_info!(frames, backbuffers = device.slot_count(), "Entering frame loop");
    for _ in 0..frames {
        let slot = device.begin_frame()?;

        // 每帧的常量缓冲在本帧 GPU 工作完成后才真正释放
        let constants = device.create_resource(
            &ResourceDescriptor::new(ResourceShape::buffer(256, ResourceUsage::CONSTANT)).with_name("Frame Constants"),
        )?;

        let context = device.context();
        let timer = context.begin_timer("simulate")?;
        context.begin_items(ItemKind::Compute)?;
        let item = ComputeItem::new(simulate, [64, 1, 1])
            .bind(0, &particles, ViewRequest::uav())
            .bind(1, &constants, ViewRequest::cbv());
        context.execute_compute_item(&item)?;
        context.end_items()?;
        if let Some(timer) = timer {
            context.end_timer(timer)?;
        }

        device.bind_backbuffer()?;
        device.clear_backbuffer([0.05, 0.05, 0.08, 1.0])?;

        let context = device.context();
        let timer = context.begin_timer("composite")?;
        context.begin_items(ItemKind::Graphics)?;
        let item = GraphicsItem::new(fullscreen, DrawArgs::new(3))
            .with_pixel_shader(composite)
            .bind(0, &particles, ViewRequest::srv())
            .bind(1, &lut, ViewRequest::srv());
        context.execute_graphics_item(&item)?;
        context.end_items()?;
        if let Some(timer) = timer {
            context.end_timer(timer)?;
        }

        drop(constants);
        device.end_and_present_frame(1)?;

        for result in device.timer_results() {
            debug!(slot, name = %result.name, ms = result.milliseconds, "GPU timer");
        }
    }

    // 5. 统计与关闭
    let stats = device.stats();
    info!(
        frames = stats.frame_number,
        completed = stats.completed.value(),
        pending_releases = stats.pending_releases,
        draws = stats.context.draws,
        dispatches = stats.context.dispatches,
        barriers = stats.context.barriers,
        pso_hits = stats.graphics_pipelines.hits + stats.compute_pipelines.hits,
        pso_misses = stats.graphics_pipelines.misses + stats.compute_pipelines.misses,
        "Frame loop finished"
    );
    for heap in &stats.heaps {
        info!(kind = heap.kind.name(), used = heap.used, capacity = heap.capacity, "Descriptor heap");
    }

    drop(particles);
    drop(lut);
    device.shutdown()?;
    info!(destroyed = backend.stats().resources_destroyed, "DistRender HAL shut down");
    Ok(())
}
