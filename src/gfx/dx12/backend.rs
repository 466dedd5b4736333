//! DirectX 12 图形后端实现
//!
//! # 初始化流程
//!
//! 1. 启用调试层（Debug 模式）
//! 2. 创建 DXGI 工厂
//! 3. 创建 D3D12 设备
//! 4. 创建命令队列
//! 5. 创建同步对象（Fence + 事件）
//! 6. 创建图形 / 计算根签名
//!
//! 两个根签名布局相同：参数 0 是每个 Item 的描述符表（register space 0），
//! 参数 1 是每个绘制上下文的描述符表（register space 1）。每个表由
//! SRV / CBV / UAV 三个重叠的区间组成，槽位类型由写入的描述符决定。
//! 管线不使用输入布局，顶点数据由着色器按 `SV_VertexID` 读取。

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use windows::core::{Interface, PCWSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, RECT, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

use crate::core::config::DescriptorConfig;
use crate::core::error::{DistRenderError, GraphicsError, Result};
use crate::gfx::backend::{
    BindPoint, DefaultBindings, DrawCall, GpuBackend, IndexFormat, ResourceBarrier, ScissorRect, Viewport,
};
use crate::gfx::dx12::conv;
use crate::gfx::dx12::descriptor::Dx12DescriptorHeap;
use crate::renderer::descriptor::{DescriptorHeapDescriptor, DescriptorHeapKind, ViewKind};
use crate::renderer::pipeline::{ComputePipelineDesc, GraphicsPipelineDesc};
use crate::renderer::resource::{MemoryType, ResourceDescriptor, ResourceShape, ResourceState};
use crate::renderer::shader::ShaderBytecode;
use crate::renderer::view::{ViewDescriptor, ViewDimension};

/// 把 windows 错误转换为图形错误；设备移除单独归类
fn check<T>(result: windows::core::Result<T>, what: &str) -> Result<T> {
    result.map_err(|e| {
        let code = e.code();
        if code == DXGI_ERROR_DEVICE_REMOVED || code == DXGI_ERROR_DEVICE_RESET {
            GraphicsError::DeviceLost(format!("{}: {:?}", what, e)).into()
        } else {
            GraphicsError::CommandExecution(format!("{}: {:?}", what, e)).into()
        }
    })
}

fn set_name(object: &ID3D12Object, name: &str) {
    let wide_name: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();
    unsafe {
        let _ = object.SetName(PCWSTR(wide_name.as_ptr()));
    }
}

/// DX12 资源
pub struct Dx12Resource {
    resource: ID3D12Resource,
    gpu_address: u64,
}

impl Dx12Resource {
    pub(crate) fn new(resource: ID3D12Resource) -> Self {
        let gpu_address = unsafe { resource.GetGPUVirtualAddress() };
        Self { resource, gpu_address }
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }
}

/// DX12 管线状态对象
pub struct Dx12Pipeline {
    pso: ID3D12PipelineState,
}

/// DX12 命令分配器
pub struct Dx12CommandAllocator {
    allocator: ID3D12CommandAllocator,
}

/// DX12 命令列表
pub struct Dx12CommandList {
    list: ID3D12GraphicsCommandList,
    open: bool,
}

/// 时间戳查询堆 + 回读缓冲
pub struct Dx12QueryHeap {
    heap: ID3D12QueryHeap,
    readback: ID3D12Resource,
    count: u32,
}

// DirectX 12 的对象是线程安全的
unsafe impl Send for Dx12Resource {}
unsafe impl Sync for Dx12Resource {}
unsafe impl Send for Dx12Pipeline {}
unsafe impl Send for Dx12CommandAllocator {}
unsafe impl Send for Dx12CommandList {}
unsafe impl Send for Dx12QueryHeap {}

/// DirectX 12 图形后端
pub struct Dx12Backend {
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    /// 同一个事件不能被两个等待者同时使用
    wait_lock: Mutex<()>,
    graphics_root: ID3D12RootSignature,
    compute_root: ID3D12RootSignature,
}

unsafe impl Send for Dx12Backend {}
unsafe impl Sync for Dx12Backend {}

fn table_ranges(size: u32, space: u32) -> [D3D12_DESCRIPTOR_RANGE; 3] {
    let range = |kind| D3D12_DESCRIPTOR_RANGE {
        RangeType: kind,
        NumDescriptors: size,
        BaseShaderRegister: 0,
        RegisterSpace: space,
        OffsetInDescriptorsFromTableStart: 0,
    };
    [
        range(D3D12_DESCRIPTOR_RANGE_TYPE_SRV),
        range(D3D12_DESCRIPTOR_RANGE_TYPE_CBV),
        range(D3D12_DESCRIPTOR_RANGE_TYPE_UAV),
    ]
}

fn create_root_signature(
    device: &ID3D12Device,
    descriptors: &DescriptorConfig,
    flags: D3D12_ROOT_SIGNATURE_FLAGS,
) -> Result<ID3D12RootSignature> {
    let item_ranges = table_ranges(descriptors.item_table_size, 0);
    let context_ranges = table_ranges(descriptors.draw_context_table_size, 1);
    let table = |ranges: &[D3D12_DESCRIPTOR_RANGE; 3]| D3D12_ROOT_PARAMETER {
        ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
        Anonymous: D3D12_ROOT_PARAMETER_0 {
            DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                NumDescriptorRanges: ranges.len() as u32,
                pDescriptorRanges: ranges.as_ptr(),
            },
        },
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
    };
    let root_parameters = [table(&item_ranges), table(&context_ranges)];

    let sampler = D3D12_STATIC_SAMPLER_DESC {
        Filter: D3D12_FILTER_MIN_MAG_MIP_LINEAR,
        AddressU: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressV: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        AddressW: D3D12_TEXTURE_ADDRESS_MODE_WRAP,
        MaxAnisotropy: 1,
        ComparisonFunc: D3D12_COMPARISON_FUNC_NEVER,
        MaxLOD: D3D12_FLOAT32_MAX,
        ShaderRegister: 0,
        RegisterSpace: 0,
        ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
        ..Default::default()
    };

    let root_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: root_parameters.len() as u32,
        pParameters: root_parameters.as_ptr(),
        NumStaticSamplers: 1,
        pStaticSamplers: &sampler,
        Flags: flags,
    };

    unsafe {
        let mut signature = None;
        D3D12SerializeRootSignature(&root_desc, D3D_ROOT_SIGNATURE_VERSION_1, &mut signature, None)
            .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to serialize root signature: {:?}", e)))?;
        let signature = signature.ok_or_else(|| {
            GraphicsError::ResourceCreation("Root signature serialization returned no blob".to_string())
        })?;

        device
            .CreateRootSignature(
                0,
                std::slice::from_raw_parts(signature.GetBufferPointer() as _, signature.GetBufferSize()),
            )
            .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to create root signature: {:?}", e)).into())
    }
}

fn shader_bytecode(bytecode: Option<&ShaderBytecode>) -> D3D12_SHADER_BYTECODE {
    match bytecode {
        Some(shader) => D3D12_SHADER_BYTECODE {
            pShaderBytecode: shader.bytecode.as_ptr() as *const c_void,
            BytecodeLength: shader.bytecode.len(),
        },
        None => D3D12_SHADER_BYTECODE::default(),
    }
}

impl Dx12Backend {
    /// 创建新的 DirectX 12 后端
    ///
    /// 描述符表大小决定根签名布局，必须与渲染核心使用的配置一致。
    pub fn new(descriptors: &DescriptorConfig) -> Result<Self> {
        unsafe {
            // 1. 启用调试层（仅 Debug 模式）
            #[cfg(debug_assertions)]
            {
                let mut debug: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug) {
                    Ok(()) => {
                        if let Some(debug) = debug {
                            debug.EnableDebugLayer();
                            debug!("DX12 Debug Layer enabled");
                        }
                    }
                    Err(_) => warn!("Failed to enable DX12 Debug Layer"),
                }
            }

            // 2. 创建 DXGI 工厂
            let flags = if cfg!(debug_assertions) {
                DXGI_CREATE_FACTORY_DEBUG
            } else {
                DXGI_CREATE_FACTORY_FLAGS(0)
            };
            let factory: IDXGIFactory4 = CreateDXGIFactory2(flags)
                .map_err(|e| DistRenderError::Initialization(format!("Failed to create DXGI factory: {:?}", e)))?;

            // 3. 创建 D3D12 设备
            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device)
                .map_err(|e| DistRenderError::Initialization(format!("Failed to create D3D12 device: {:?}", e)))?;
            let device = device
                .ok_or_else(|| DistRenderError::Initialization("D3D12CreateDevice returned no device".to_string()))?;

            // 4. 创建命令队列
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| DistRenderError::Initialization(format!("Failed to create command queue: {:?}", e)))?;

            // 5. 创建同步对象
            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| DistRenderError::Initialization(format!("Failed to create fence: {:?}", e)))?;
            let fence_event = CreateEventA(None, false, false, None)
                .map_err(|e| DistRenderError::Initialization(format!("Failed to create fence event: {:?}", e)))?;

            // 6. 根签名
            let graphics_root = create_root_signature(
                &device,
                descriptors,
                D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
            )?;
            let compute_root = create_root_signature(&device, descriptors, D3D12_ROOT_SIGNATURE_FLAG_NONE)?;

            info!("DX12 Backend initialization complete");
            Ok(Self {
                factory,
                device,
                queue,
                fence,
                fence_event,
                wait_lock: Mutex::new(()),
                graphics_root,
                compute_root,
            })
        }
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    pub fn factory(&self) -> &IDXGIFactory4 {
        &self.factory
    }

    fn write_srv(&self, heap: &Dx12DescriptorHeap, index: u32, resource: &Dx12Resource, view: &ViewDescriptor) {
        let mips = view.mips;
        let layers = view.layers;
        let mut desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: conv::format(view.format),
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            ..Default::default()
        };
        match view.dimension {
            ViewDimension::Buffer => {
                let buffer = view.buffer.unwrap_or_default();
                desc.ViewDimension = D3D12_SRV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = D3D12_BUFFER_SRV {
                    FirstElement: buffer.first_element,
                    NumElements: buffer.element_count,
                    StructureByteStride: buffer.stride,
                    Flags: if buffer.stride == 0 {
                        D3D12_BUFFER_SRV_FLAG_RAW
                    } else {
                        D3D12_BUFFER_SRV_FLAG_NONE
                    },
                };
            }
            ViewDimension::Texture1D => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE1D;
                desc.Anonymous.Texture1D = D3D12_TEX1D_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::Texture1DArray => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE1DARRAY;
                desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::Texture2D => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2D;
                desc.Anonymous.Texture2D = D3D12_TEX2D_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::Texture2DArray => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DARRAY;
                desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::Texture2DMs => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DMS;
            }
            ViewDimension::Texture2DMsArray => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE2DMSARRAY;
                desc.Anonymous.Texture2DMSArray = D3D12_TEX2DMS_ARRAY_SRV {
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture3D => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURE3D;
                desc.Anonymous.Texture3D = D3D12_TEX3D_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::TextureCube => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBE;
                desc.Anonymous.TextureCube = D3D12_TEXCUBE_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    ResourceMinLODClamp: 0.0,
                };
            }
            ViewDimension::TextureCubeArray => {
                desc.ViewDimension = D3D12_SRV_DIMENSION_TEXTURECUBEARRAY;
                desc.Anonymous.TextureCubeArray = D3D12_TEXCUBE_ARRAY_SRV {
                    MostDetailedMip: mips.base,
                    MipLevels: mips.count,
                    First2DArrayFace: layers.base,
                    NumCubes: layers.count / 6,
                    ResourceMinLODClamp: 0.0,
                };
            }
        }
        unsafe {
            self.device
                .CreateShaderResourceView(&resource.resource, Some(&desc), heap.cpu_handle(index));
        }
    }

    fn write_rtv(&self, heap: &Dx12DescriptorHeap, index: u32, resource: &Dx12Resource, view: &ViewDescriptor) {
        let mip = view.mips.base;
        let layers = view.layers;
        let mut desc = D3D12_RENDER_TARGET_VIEW_DESC {
            Format: conv::format(view.format),
            ..Default::default()
        };
        match view.dimension {
            ViewDimension::Buffer => {
                let buffer = view.buffer.unwrap_or_default();
                desc.ViewDimension = D3D12_RTV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = D3D12_BUFFER_RTV {
                    FirstElement: buffer.first_element,
                    NumElements: buffer.element_count,
                };
            }
            ViewDimension::Texture1D => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE1D;
                desc.Anonymous.Texture1D = D3D12_TEX1D_RTV { MipSlice: mip };
            }
            ViewDimension::Texture1DArray => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE1DARRAY;
                desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_RTV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture2D => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2D;
                desc.Anonymous.Texture2D = D3D12_TEX2D_RTV {
                    MipSlice: mip,
                    PlaneSlice: 0,
                };
            }
            ViewDimension::Texture2DArray | ViewDimension::TextureCube | ViewDimension::TextureCubeArray => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DARRAY;
                desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_RTV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                    PlaneSlice: 0,
                };
            }
            ViewDimension::Texture2DMs => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DMS;
            }
            ViewDimension::Texture2DMsArray => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE2DMSARRAY;
                desc.Anonymous.Texture2DMSArray = D3D12_TEX2DMS_ARRAY_RTV {
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture3D => {
                desc.ViewDimension = D3D12_RTV_DIMENSION_TEXTURE3D;
                desc.Anonymous.Texture3D = D3D12_TEX3D_RTV {
                    MipSlice: mip,
                    FirstWSlice: layers.base,
                    WSize: layers.count,
                };
            }
        }
        unsafe {
            self.device
                .CreateRenderTargetView(&resource.resource, Some(&desc), heap.cpu_handle(index));
        }
    }

    fn write_dsv(&self, heap: &Dx12DescriptorHeap, index: u32, resource: &Dx12Resource, view: &ViewDescriptor) {
        let mip = view.mips.base;
        let layers = view.layers;
        let mut desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
            Format: conv::format(view.format),
            Flags: D3D12_DSV_FLAG_NONE,
            ..Default::default()
        };
        match view.dimension {
            ViewDimension::Texture1D => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE1D;
                desc.Anonymous.Texture1D = D3D12_TEX1D_DSV { MipSlice: mip };
            }
            ViewDimension::Texture1DArray => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE1DARRAY;
                desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_DSV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture2DMs => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DMS;
            }
            ViewDimension::Texture2DMsArray => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DMSARRAY;
                desc.Anonymous.Texture2DMSArray = D3D12_TEX2DMS_ARRAY_DSV {
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture2DArray | ViewDimension::TextureCube | ViewDimension::TextureCubeArray => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2DARRAY;
                desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_DSV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            _ => {
                desc.ViewDimension = D3D12_DSV_DIMENSION_TEXTURE2D;
                desc.Anonymous.Texture2D = D3D12_TEX2D_DSV { MipSlice: mip };
            }
        }
        unsafe {
            self.device
                .CreateDepthStencilView(&resource.resource, Some(&desc), heap.cpu_handle(index));
        }
    }

    fn write_uav(&self, heap: &Dx12DescriptorHeap, index: u32, resource: &Dx12Resource, view: &ViewDescriptor) {
        let mip = view.mips.base;
        let layers = view.layers;
        let mut desc = D3D12_UNORDERED_ACCESS_VIEW_DESC {
            Format: conv::format(view.format),
            ..Default::default()
        };
        match view.dimension {
            ViewDimension::Buffer => {
                let buffer = view.buffer.unwrap_or_default();
                desc.ViewDimension = D3D12_UAV_DIMENSION_BUFFER;
                desc.Anonymous.Buffer = D3D12_BUFFER_UAV {
                    FirstElement: buffer.first_element,
                    NumElements: buffer.element_count,
                    StructureByteStride: buffer.stride,
                    CounterOffsetInBytes: 0,
                    Flags: if buffer.stride == 0 {
                        D3D12_BUFFER_UAV_FLAG_RAW
                    } else {
                        D3D12_BUFFER_UAV_FLAG_NONE
                    },
                };
            }
            ViewDimension::Texture1D => {
                desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE1D;
                desc.Anonymous.Texture1D = D3D12_TEX1D_UAV { MipSlice: mip };
            }
            ViewDimension::Texture1DArray => {
                desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE1DARRAY;
                desc.Anonymous.Texture1DArray = D3D12_TEX1D_ARRAY_UAV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                };
            }
            ViewDimension::Texture3D => {
                desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE3D;
                desc.Anonymous.Texture3D = D3D12_TEX3D_UAV {
                    MipSlice: mip,
                    FirstWSlice: layers.base,
                    WSize: layers.count,
                };
            }
            ViewDimension::Texture2D => {
                desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2D;
                desc.Anonymous.Texture2D = D3D12_TEX2D_UAV {
                    MipSlice: mip,
                    PlaneSlice: 0,
                };
            }
            _ => {
                desc.ViewDimension = D3D12_UAV_DIMENSION_TEXTURE2DARRAY;
                desc.Anonymous.Texture2DArray = D3D12_TEX2D_ARRAY_UAV {
                    MipSlice: mip,
                    FirstArraySlice: layers.base,
                    ArraySize: layers.count,
                    PlaneSlice: 0,
                };
            }
        }
        unsafe {
            self.device.CreateUnorderedAccessView(
                &resource.resource,
                None::<&ID3D12Resource>,
                Some(&desc),
                heap.cpu_handle(index),
            );
        }
    }

    fn write_cbv(&self, heap: &Dx12DescriptorHeap, index: u32, resource: &Dx12Resource, view: &ViewDescriptor) {
        let buffer = view.buffer.unwrap_or_default();
        let desc = D3D12_CONSTANT_BUFFER_VIEW_DESC {
            BufferLocation: resource.gpu_address + buffer.first_element,
            SizeInBytes: buffer.size_bytes as u32,
        };
        unsafe {
            self.device.CreateConstantBufferView(Some(&desc), heap.cpu_handle(index));
        }
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.fence_event);
        }
    }
}

impl GpuBackend for Dx12Backend {
    type Resource = Dx12Resource;
    type Pipeline = Dx12Pipeline;
    type DescriptorHeap = Dx12DescriptorHeap;
    type CommandAllocator = Dx12CommandAllocator;
    type CommandList = Dx12CommandList;
    type QueryHeap = Dx12QueryHeap;

    fn backend_name(&self) -> &str {
        "DirectX 12"
    }

    fn create_resource(&self, desc: &ResourceDescriptor, initial_state: ResourceState) -> Result<Dx12Resource> {
        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: conv::heap_type(desc.memory),
            ..Default::default()
        };
        let resource_desc = conv::resource_desc(&desc.shape);
        let usage = desc.shape.usage;
        let clear_value = desc
            .clear_value
            .filter(|_| usage.render_target || usage.depth_stencil)
            .map(|value| {
                let format = conv::format(desc.shape.format);
                if usage.depth_stencil {
                    D3D12_CLEAR_VALUE {
                        Format: format,
                        Anonymous: D3D12_CLEAR_VALUE_0 {
                            DepthStencil: D3D12_DEPTH_STENCIL_VALUE {
                                Depth: value[0],
                                Stencil: value[1] as u8,
                            },
                        },
                    }
                } else {
                    D3D12_CLEAR_VALUE {
                        Format: format,
                        Anonymous: D3D12_CLEAR_VALUE_0 { Color: value },
                    }
                }
            });

        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    conv::resource_state(initial_state),
                    clear_value.as_ref().map(|v| v as *const D3D12_CLEAR_VALUE),
                    &mut resource,
                )
                .map_err(|e| GraphicsError::ResourceCreation(format!("Failed to create resource: {:?}", e)))?;
        }
        let resource = resource
            .ok_or_else(|| GraphicsError::ResourceCreation("CreateCommittedResource returned nothing".to_string()))?;
        if let Some(name) = &desc.name {
            set_name(&resource, name);
        }
        Ok(Dx12Resource::new(resource))
    }

    fn create_descriptor_heap(&self, desc: &DescriptorHeapDescriptor) -> Result<Dx12DescriptorHeap> {
        Dx12DescriptorHeap::new(&self.device, desc)
    }

    fn write_view(
        &self,
        heap: &Dx12DescriptorHeap,
        index: u32,
        resource: &Dx12Resource,
        view: &ViewDescriptor,
    ) -> Result<()> {
        if heap.kind() != view.kind.heap_kind() {
            return Err(GraphicsError::InvalidViewRequest(format!(
                "{} view written into a {} heap",
                view.kind.name(),
                heap.kind().name()
            ))
            .into());
        }
        match view.kind {
            ViewKind::ShaderResource => self.write_srv(heap, index, resource, view),
            ViewKind::RenderTarget => self.write_rtv(heap, index, resource, view),
            ViewKind::DepthStencil => self.write_dsv(heap, index, resource, view),
            ViewKind::UnorderedAccess => self.write_uav(heap, index, resource, view),
            ViewKind::ConstantBuffer => self.write_cbv(heap, index, resource, view),
            ViewKind::Sampler => {
                return Err(GraphicsError::InvalidViewRequest("samplers are not resource views".to_string()).into())
            }
        }
        Ok(())
    }

    fn write_null_view(&self, heap: &Dx12DescriptorHeap, index: u32) {
        if heap.kind() != DescriptorHeapKind::CbvSrvUav {
            return;
        }
        let mut desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            ..Default::default()
        };
        desc.Anonymous.Texture2D = D3D12_TEX2D_SRV {
            MostDetailedMip: 0,
            MipLevels: 1,
            PlaneSlice: 0,
            ResourceMinLODClamp: 0.0,
        };
        unsafe {
            self.device
                .CreateShaderResourceView(None::<&ID3D12Resource>, Some(&desc), heap.cpu_handle(index));
        }
    }

    fn copy_descriptors(
        &self,
        dst: &Dx12DescriptorHeap,
        dst_index: u32,
        src: &Dx12DescriptorHeap,
        src_index: u32,
        count: u32,
    ) {
        unsafe {
            self.device.CopyDescriptorsSimple(
                count,
                dst.cpu_handle(dst_index),
                src.cpu_handle(src_index),
                src.heap_type(),
            );
        }
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc) -> Result<Dx12Pipeline> {
        let state = &desc.render_state;
        let mut pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC::default();
        // 借用根签名，不增加引用计数
        pso_desc.pRootSignature = unsafe { std::mem::transmute_copy(&self.graphics_root) };
        pso_desc.VS = shader_bytecode(Some(&desc.vertex));
        pso_desc.PS = shader_bytecode(desc.pixel.as_ref());
        pso_desc.HS = shader_bytecode(desc.hull.as_ref());
        pso_desc.DS = shader_bytecode(desc.domain.as_ref());
        pso_desc.GS = shader_bytecode(desc.geometry.as_ref());
        pso_desc.BlendState = conv::blend(state.blend);
        pso_desc.RasterizerState = conv::rasterizer(state);
        pso_desc.DepthStencilState = conv::depth_stencil(state);
        pso_desc.SampleMask = u32::MAX;
        pso_desc.PrimitiveTopologyType = if desc.hull.is_some() {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_PATCH
        } else {
            conv::topology_type(state.topology)
        };

        let colors = desc.targets.colors();
        pso_desc.NumRenderTargets = colors.len() as u32;
        for (slot, format) in colors.iter().enumerate() {
            pso_desc.RTVFormats[slot] = conv::format(*format);
        }
        pso_desc.DSVFormat = conv::format(desc.targets.depth_format);
        pso_desc.SampleDesc = DXGI_SAMPLE_DESC {
            Count: desc.targets.sample_count.max(1) as u32,
            Quality: 0,
        };

        let pso: ID3D12PipelineState = unsafe {
            self.device
                .CreateGraphicsPipelineState(&pso_desc)
                .map_err(|e| GraphicsError::PipelineCreationFailed(format!("graphics: {:?}", e)))?
        };
        Ok(Dx12Pipeline { pso })
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc) -> Result<Dx12Pipeline> {
        let pso_desc = D3D12_COMPUTE_PIPELINE_STATE_DESC {
            pRootSignature: unsafe { std::mem::transmute_copy(&self.compute_root) },
            CS: shader_bytecode(Some(&desc.compute)),
            NodeMask: 0,
            CachedPSO: D3D12_CACHED_PIPELINE_STATE::default(),
            Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
        };
        let pso: ID3D12PipelineState = unsafe {
            self.device
                .CreateComputePipelineState(&pso_desc)
                .map_err(|e| GraphicsError::PipelineCreationFailed(format!("compute: {:?}", e)))?
        };
        Ok(Dx12Pipeline { pso })
    }

    fn create_command_allocator(&self) -> Result<Dx12CommandAllocator> {
        let allocator = unsafe {
            check(
                self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT),
                "CreateCommandAllocator",
            )?
        };
        Ok(Dx12CommandAllocator { allocator })
    }

    fn create_command_list(&self, allocator: &Dx12CommandAllocator) -> Result<Dx12CommandList> {
        unsafe {
            let list: ID3D12GraphicsCommandList = check(
                self.device.CreateCommandList(
                    0,
                    D3D12_COMMAND_LIST_TYPE_DIRECT,
                    &allocator.allocator,
                    None::<&ID3D12PipelineState>,
                ),
                "CreateCommandList",
            )?;
            check(list.Close(), "Close")?;
            Ok(Dx12CommandList { list, open: false })
        }
    }

    fn reset_command_allocator(&self, allocator: &mut Dx12CommandAllocator) -> Result<()> {
        unsafe { check(allocator.allocator.Reset(), "ID3D12CommandAllocator::Reset") }
    }

    fn reset_command_list(&self, list: &mut Dx12CommandList, allocator: &Dx12CommandAllocator) -> Result<()> {
        unsafe {
            check(
                list.list.Reset(&allocator.allocator, None::<&ID3D12PipelineState>),
                "ID3D12GraphicsCommandList::Reset",
            )?;
        }
        list.open = true;
        Ok(())
    }

    fn close_command_list(&self, list: &mut Dx12CommandList) -> Result<()> {
        unsafe { check(list.list.Close(), "ID3D12GraphicsCommandList::Close")? };
        list.open = false;
        Ok(())
    }

    fn execute_command_list(&self, list: &Dx12CommandList) -> Result<()> {
        if list.open {
            return Err(GraphicsError::CommandExecution("command list executed while still open".to_string()).into());
        }
        let command_lists = [Some(check(list.list.cast::<ID3D12CommandList>(), "cast")?)];
        unsafe {
            self.queue.ExecuteCommandLists(&command_lists);
        }
        Ok(())
    }

    fn bind_defaults(&self, list: &mut Dx12CommandList, heap: &Dx12DescriptorHeap, defaults: &DefaultBindings) {
        unsafe {
            list.list.SetDescriptorHeaps(&[Some(heap.heap().clone())]);
            list.list.SetGraphicsRootSignature(&self.graphics_root);
            list.list.SetComputeRootSignature(&self.compute_root);
            list.list.OMSetBlendFactor(Some(&defaults.blend_factor));
            list.list.OMSetStencilRef(defaults.stencil_ref);
        }
        self.set_viewport(list, &defaults.viewport, &defaults.scissor);
    }

    fn set_viewport(&self, list: &mut Dx12CommandList, viewport: &Viewport, scissor: &ScissorRect) {
        let native_viewport = D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        let rect = RECT {
            left: scissor.left,
            top: scissor.top,
            right: scissor.right,
            bottom: scissor.bottom,
        };
        unsafe {
            list.list.RSSetViewports(&[native_viewport]);
            list.list.RSSetScissorRects(&[rect]);
        }
    }

    fn set_pipeline(&self, list: &mut Dx12CommandList, pipeline: &Dx12Pipeline, _bind_point: BindPoint) {
        unsafe {
            list.list.SetPipelineState(&pipeline.pso);
        }
    }

    fn set_descriptor_table(
        &self,
        list: &mut Dx12CommandList,
        bind_point: BindPoint,
        root_parameter: u32,
        heap: &Dx12DescriptorHeap,
        base_index: u32,
    ) {
        let Some(handle) = heap.gpu_handle(base_index) else {
            error!(heap = heap.kind().name(), "Descriptor table bound from a heap that is not shader visible");
            return;
        };
        unsafe {
            match bind_point {
                BindPoint::Graphics => list.list.SetGraphicsRootDescriptorTable(root_parameter, handle),
                BindPoint::Compute => list.list.SetComputeRootDescriptorTable(root_parameter, handle),
            }
        }
    }

    fn resource_barriers(&self, list: &mut Dx12CommandList, barriers: &[ResourceBarrier<'_, Self>]) {
        let native: Vec<D3D12_RESOURCE_BARRIER> = barriers
            .iter()
            .filter_map(|barrier| {
                let before = conv::resource_state(barrier.before);
                let after = conv::resource_state(barrier.after);
                if before == after {
                    return None;
                }
                Some(D3D12_RESOURCE_BARRIER {
                    Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
                    Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
                    Anonymous: D3D12_RESOURCE_BARRIER_0 {
                        Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                            // 借用资源，不增加引用计数
                            pResource: unsafe { std::mem::transmute_copy(&barrier.resource.resource) },
                            Subresource: barrier.subresource.unwrap_or(D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES),
                            StateBefore: before,
                            StateAfter: after,
                        }),
                    },
                })
            })
            .collect();
        if native.is_empty() {
            return;
        }
        unsafe {
            list.list.ResourceBarrier(&native);
        }
    }

    fn set_render_targets(
        &self,
        list: &mut Dx12CommandList,
        rtv_heap: &Dx12DescriptorHeap,
        rtvs: &[u32],
        dsv_heap: &Dx12DescriptorHeap,
        dsv: Option<u32>,
    ) {
        let handles: Vec<D3D12_CPU_DESCRIPTOR_HANDLE> = rtvs.iter().map(|&i| rtv_heap.cpu_handle(i)).collect();
        let dsv_handle = dsv.map(|i| dsv_heap.cpu_handle(i));
        unsafe {
            list.list.OMSetRenderTargets(
                handles.len() as u32,
                (!handles.is_empty()).then(|| handles.as_ptr()),
                false,
                dsv_handle.as_ref().map(|h| h as *const D3D12_CPU_DESCRIPTOR_HANDLE),
            );
        }
    }

    fn clear_render_target(&self, list: &mut Dx12CommandList, heap: &Dx12DescriptorHeap, index: u32, color: [f32; 4]) {
        unsafe {
            list.list.ClearRenderTargetView(heap.cpu_handle(index), &color, None);
        }
    }

    fn clear_depth_stencil(
        &self,
        list: &mut Dx12CommandList,
        heap: &Dx12DescriptorHeap,
        index: u32,
        depth: f32,
        stencil: u8,
    ) {
        unsafe {
            list.list.ClearDepthStencilView(
                heap.cpu_handle(index),
                D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                depth,
                stencil,
                None,
            );
        }
    }

    fn draw(&self, list: &mut Dx12CommandList, call: &DrawCall<'_, Self>) {
        let args = call.args;
        unsafe {
            list.list.IASetPrimitiveTopology(conv::topology(call.topology));
            if let Some(vb) = &call.vertex_buffer {
                let view = D3D12_VERTEX_BUFFER_VIEW {
                    BufferLocation: vb.resource.gpu_address + vb.offset,
                    SizeInBytes: vb.size as u32,
                    StrideInBytes: vb.stride,
                };
                list.list.IASetVertexBuffers(0, Some(&[view]));
            }
            match &call.index_buffer {
                Some(ib) => {
                    let view = D3D12_INDEX_BUFFER_VIEW {
                        BufferLocation: ib.resource.gpu_address + ib.offset,
                        SizeInBytes: ib.size as u32,
                        Format: match ib.format {
                            IndexFormat::U16 => DXGI_FORMAT_R16_UINT,
                            IndexFormat::U32 => DXGI_FORMAT_R32_UINT,
                        },
                    };
                    list.list.IASetIndexBuffer(Some(&view));
                    list.list.DrawIndexedInstanced(
                        args.count,
                        args.instance_count,
                        args.first,
                        args.base_vertex,
                        args.first_instance,
                    );
                }
                None => {
                    list.list
                        .DrawInstanced(args.count, args.instance_count, args.first, args.first_instance);
                }
            }
        }
    }

    fn dispatch(&self, list: &mut Dx12CommandList, groups: [u32; 3]) {
        unsafe {
            list.list.Dispatch(groups[0], groups[1], groups[2]);
        }
    }

    fn signal(&self, value: u64) -> Result<()> {
        unsafe { check(self.queue.Signal(&self.fence, value), "ID3D12CommandQueue::Signal") }
    }

    fn completed_fence_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    fn wait_for_fence(&self, value: u64, timeout: Option<Duration>) -> Result<bool> {
        if self.completed_fence_value() >= value {
            return Ok(true);
        }
        let _guard = self
            .wait_lock
            .lock()
            .map_err(|_| GraphicsError::CommandExecution("fence wait lock poisoned".to_string()))?;
        let millis = timeout.map_or(INFINITE, |t| t.as_millis().min(u128::from(INFINITE - 1)) as u32);
        unsafe {
            check(
                self.fence.SetEventOnCompletion(value, self.fence_event),
                "ID3D12Fence::SetEventOnCompletion",
            )?;
            let result = WaitForSingleObject(self.fence_event, millis);
            Ok(result == WAIT_OBJECT_0)
        }
    }

    fn create_timestamp_heap(&self, count: u32) -> Result<Dx12QueryHeap> {
        let count = count.max(1);
        let desc = D3D12_QUERY_HEAP_DESC {
            Type: D3D12_QUERY_HEAP_TYPE_TIMESTAMP,
            Count: count,
            NodeMask: 0,
        };
        let mut heap: Option<ID3D12QueryHeap> = None;
        unsafe {
            check(self.device.CreateQueryHeap(&desc, &mut heap), "CreateQueryHeap")?;
        }
        let heap = heap.ok_or_else(|| GraphicsError::ResourceCreation("CreateQueryHeap returned nothing".to_string()))?;

        let readback_desc = ResourceDescriptor::new(ResourceShape::buffer(count as u64 * 8, Default::default()))
            .with_memory(MemoryType::Readback)
        .with_name("Timestamp Readback");
        let readback = self.create_resource(&readback_desc, ResourceState::CopyDest)?;
        Ok(Dx12QueryHeap {
            heap,
            readback: readback.resource,
            count,
        })
    }

    fn write_timestamp(&self, list: &mut Dx12CommandList, heap: &Dx12QueryHeap, index: u32) {
        unsafe {
            list.list.EndQuery(&heap.heap, D3D12_QUERY_TYPE_TIMESTAMP, index);
        }
    }

    fn resolve_timestamps(&self, list: &mut Dx12CommandList, heap: &Dx12QueryHeap, count: u32) {
        unsafe {
            list.list.ResolveQueryData(
                &heap.heap,
                D3D12_QUERY_TYPE_TIMESTAMP,
                0,
                count.min(heap.count),
                &heap.readback,
                0,
            );
        }
    }

    fn read_timestamps(&self, heap: &Dx12QueryHeap, count: u32) -> Result<Vec<u64>> {
        let count = count.min(heap.count) as usize;
        unsafe {
            let mut data = std::ptr::null_mut();
            check(heap.readback.Map(0, None, Some(&mut data)), "Map timestamp readback")?;
            let values = std::slice::from_raw_parts(data as *const u64, count).to_vec();
            heap.readback.Unmap(0, None);
            Ok(values)
        }
    }

    fn timestamp_frequency(&self) -> Result<u64> {
        unsafe { check(self.queue.GetTimestampFrequency(), "GetTimestampFrequency") }
    }
}
