//! DirectX 12 交换链
//!
//! 窗口由调用者创建，这里只接收原生 HWND。

use tracing::{debug, info};
use windows::core::{Interface, BOOL};
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Direct3D12::ID3D12Resource;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{PresentError, Presenter};
use crate::gfx::dx12::backend::{Dx12Backend, Dx12Resource};
use crate::gfx::dx12::conv;
use crate::renderer::resource::{Format, ResourceShape, ResourceUsage};

/// 基于 HWND 的 flip 模式交换链
pub struct Dx12Presenter {
    swap_chain: IDXGISwapChain3,
    shape: ResourceShape,
    buffer_count: u32,
}

impl Dx12Presenter {
    /// 为窗口创建交换链
    pub fn new(backend: &Dx12Backend, hwnd: HWND, width: u32, height: u32, buffer_count: u32) -> Result<Self> {
        let shape = ResourceShape::texture_2d(width, height, Format::Rgba8Unorm, 1, ResourceUsage::RENDER_TARGET);
        let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: width,
            Height: height,
            Format: conv::format(shape.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                ..Default::default()
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: buffer_count,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            ..Default::default()
        };

        let swap_chain = unsafe {
            let swap_chain: IDXGISwapChain1 = backend
                .factory()
                .CreateSwapChainForHwnd(backend.queue(), hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::SwapchainError(format!("Failed to create swap chain: {:?}", e)))?;
            swap_chain
                .cast::<IDXGISwapChain3>()
                .map_err(|e| GraphicsError::SwapchainError(format!("IDXGISwapChain3 unavailable: {:?}", e)))?
        };

        info!(width, height, buffers = buffer_count, "Swap chain created");
        Ok(Self {
            swap_chain,
            shape,
            buffer_count,
        })
    }
}

impl Presenter<Dx12Backend> for Dx12Presenter {
    fn backbuffer_count(&self) -> u32 {
        self.buffer_count
    }

    fn current_backbuffer_index(&self) -> u32 {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() }
    }

    fn backbuffer(&self, index: u32) -> Result<Dx12Resource> {
        let surface: ID3D12Resource = unsafe {
            self.swap_chain
                .GetBuffer(index)
                .map_err(|e| GraphicsError::SwapchainError(format!("GetBuffer({}) failed: {:?}", index, e)))?
        };
        Ok(Dx12Resource::new(surface))
    }

    fn backbuffer_shape(&self) -> ResourceShape {
        self.shape
    }

    fn present(&mut self, sync_interval: u32) -> std::result::Result<(), PresentError> {
        let hr = unsafe { self.swap_chain.Present(sync_interval, DXGI_PRESENT(0)) };
        if hr.is_ok() {
            return Ok(());
        }
        if hr == DXGI_ERROR_DEVICE_REMOVED || hr == DXGI_ERROR_DEVICE_RESET {
            Err(PresentError::DeviceRemoved(format!("{:?}", hr)))
        } else {
            Err(PresentError::Other(format!("{:?}", hr)))
        }
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            self.swap_chain
                .ResizeBuffers(
                    self.buffer_count,
                    width,
                    height,
                    conv::format(self.shape.format),
                    DXGI_SWAP_CHAIN_FLAG(0),
                )
                .map_err(|e| GraphicsError::SwapchainError(format!("ResizeBuffers failed: {:?}", e)))?;
        }
        self.shape.width = u64::from(width);
        self.shape.height = height;
        debug!(width, height, "Swap chain resized");
        Ok(())
    }

    fn is_fullscreen(&self) -> Result<bool> {
        let mut fullscreen = BOOL(0);
        unsafe {
            self.swap_chain
                .GetFullscreenState(Some(&mut fullscreen as *mut BOOL), None)
                .map_err(|e| GraphicsError::SwapchainError(format!("GetFullscreenState failed: {:?}", e)))?;
        }
        Ok(fullscreen.as_bool())
    }
}
