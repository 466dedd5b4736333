//! DirectX 12 描述符堆
//!
//! 只负责原生堆和句柄运算；槽位的分配 / 回收由渲染核心的
//! 持久堆与瞬态堆完成。

use windows::core::PCWSTR;
use windows::Win32::Graphics::Direct3D12::*;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::dx12::conv;
use crate::renderer::descriptor::{DescriptorHeapDescriptor, DescriptorHeapKind};

/// DX12 描述符堆
///
/// 封装 ID3D12DescriptorHeap，提供按索引计算 CPU / GPU 句柄的接口。
pub struct Dx12DescriptorHeap {
    heap: ID3D12DescriptorHeap,
    kind: DescriptorHeapKind,
    heap_type: D3D12_DESCRIPTOR_HEAP_TYPE,
    increment_size: u32,
    cpu_start: usize,
    /// 仅着色器可见的堆有 GPU 基址
    gpu_start: Option<u64>,
    num_descriptors: u32,
}

// DX12 堆是线程安全的
unsafe impl Send for Dx12DescriptorHeap {}
unsafe impl Sync for Dx12DescriptorHeap {}

impl Dx12DescriptorHeap {
    /// 创建新的 DX12 描述符堆
    pub fn new(device: &ID3D12Device, desc: &DescriptorHeapDescriptor) -> Result<Self> {
        let heap_type = conv::descriptor_heap_type(desc.kind);
        let flags = if desc.shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            D3D12_DESCRIPTOR_HEAP_FLAG_NONE
        };
        let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
            Type: heap_type,
            NumDescriptors: desc.num_descriptors,
            Flags: flags,
            NodeMask: 0,
        };

        unsafe {
            let heap: ID3D12DescriptorHeap = device.CreateDescriptorHeap(&heap_desc).map_err(|e| {
                GraphicsError::ResourceCreation(format!(
                    "Failed to create {} descriptor heap: {:?}",
                    desc.kind.name(),
                    e
                ))
            })?;

            if let Some(name) = &desc.name {
                let wide_name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
                let _ = heap.SetName(PCWSTR(wide_name.as_ptr()));
            }

            let increment_size = device.GetDescriptorHandleIncrementSize(heap_type);
            let cpu_start = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_start = desc
                .shader_visible
                .then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(Self {
                heap,
                kind: desc.kind,
                heap_type,
                increment_size,
                cpu_start,
                gpu_start,
                num_descriptors: desc.num_descriptors,
            })
        }
    }

    /// 底层 DX12 描述符堆
    pub fn heap(&self) -> &ID3D12DescriptorHeap {
        &self.heap
    }

    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    pub fn heap_type(&self) -> D3D12_DESCRIPTOR_HEAP_TYPE {
        self.heap_type
    }

    pub fn num_descriptors(&self) -> u32 {
        self.num_descriptors
    }

    pub fn is_shader_visible(&self) -> bool {
        self.gpu_start.is_some()
    }

    /// 指定索引的 CPU 句柄
    pub fn cpu_handle(&self, index: u32) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.cpu_start + index as usize * self.increment_size as usize,
        }
    }

    /// 指定索引的 GPU 句柄（仅着色器可见的堆）
    pub fn gpu_handle(&self, index: u32) -> Option<D3D12_GPU_DESCRIPTOR_HANDLE> {
        self.gpu_start.map(|start| D3D12_GPU_DESCRIPTOR_HANDLE {
            ptr: start + index as u64 * self.increment_size as u64,
        })
    }
}
