//! 与 API 无关的类型到 D3D12 / DXGI 枚举的转换

use windows::Win32::Foundation::{FALSE, TRUE};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

use crate::renderer::descriptor::DescriptorHeapKind;
use crate::renderer::pipeline::{BlendMode, CompareFunc, CullMode, FillMode, PrimitiveTopology, RenderState};
use crate::renderer::resource::{Format, MemoryType, ResourceDimension, ResourceShape, ResourceState};

pub fn format(format: Format) -> DXGI_FORMAT {
    match format {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::Rgba8Srgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::Bgra8Srgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        Format::Rg11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::Rg8Unorm => DXGI_FORMAT_R8G8_UNORM,
        Format::R16Unorm => DXGI_FORMAT_R16_UNORM,
        Format::R16Float => DXGI_FORMAT_R16_FLOAT,
        Format::Rg16Float => DXGI_FORMAT_R16G16_FLOAT,
        Format::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R16Uint => DXGI_FORMAT_R16_UINT,
        Format::R32Float => DXGI_FORMAT_R32_FLOAT,
        Format::Rg32Float => DXGI_FORMAT_R32G32_FLOAT,
        Format::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::R32Uint => DXGI_FORMAT_R32_UINT,
        Format::R32Typeless => DXGI_FORMAT_R32_TYPELESS,
        Format::R24UnormX8Typeless => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        Format::Depth16Unorm => DXGI_FORMAT_D16_UNORM,
        Format::Depth24PlusStencil8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
        Format::Depth32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

/// 同时需要 SRV 和 DSV 的深度纹理以无类型格式创建
pub fn resource_format(shape: &ResourceShape) -> DXGI_FORMAT {
    if shape.format.is_depth() && shape.usage.shader_resource {
        match shape.format {
            Format::Depth16Unorm => DXGI_FORMAT_R16_TYPELESS,
            Format::Depth24PlusStencil8 => DXGI_FORMAT_R24G8_TYPELESS,
            Format::Depth32Float => DXGI_FORMAT_R32_TYPELESS,
            other => format(other),
        }
    } else if shape.dimension == ResourceDimension::Buffer {
        DXGI_FORMAT_UNKNOWN
    } else {
        format(shape.format)
    }
}

pub fn resource_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::Common | ResourceState::Present => D3D12_RESOURCE_STATE_COMMON,
        ResourceState::VertexAndConstantBuffer => D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        ResourceState::IndexBuffer => D3D12_RESOURCE_STATE_INDEX_BUFFER,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::UnorderedAccess => D3D12_RESOURCE_STATE_UNORDERED_ACCESS,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::NonPixelShaderResource => D3D12_RESOURCE_STATE_NON_PIXEL_SHADER_RESOURCE,
        ResourceState::PixelShaderResource => D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
        ResourceState::AllShaderResource => D3D12_RESOURCE_STATE_ALL_SHADER_RESOURCE,
        ResourceState::CopyDest => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
    }
}

pub fn heap_type(memory: MemoryType) -> D3D12_HEAP_TYPE {
    match memory {
        MemoryType::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        MemoryType::Upload => D3D12_HEAP_TYPE_UPLOAD,
        MemoryType::Readback => D3D12_HEAP_TYPE_READBACK,
    }
}

pub fn descriptor_heap_type(kind: DescriptorHeapKind) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match kind {
        DescriptorHeapKind::CbvSrvUav => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
        DescriptorHeapKind::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        DescriptorHeapKind::RenderTarget => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorHeapKind::DepthStencil => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
    }
}

pub fn resource_desc(shape: &ResourceShape) -> D3D12_RESOURCE_DESC {
    let dimension = match shape.dimension {
        ResourceDimension::Buffer => D3D12_RESOURCE_DIMENSION_BUFFER,
        ResourceDimension::Texture1D => D3D12_RESOURCE_DIMENSION_TEXTURE1D,
        ResourceDimension::Texture2D => D3D12_RESOURCE_DIMENSION_TEXTURE2D,
        ResourceDimension::Texture3D => D3D12_RESOURCE_DIMENSION_TEXTURE3D,
    };

    let mut flags = D3D12_RESOURCE_FLAG_NONE;
    if shape.usage.render_target {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
    }
    if shape.usage.depth_stencil {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
        if !shape.usage.shader_resource {
            flags |= D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE;
        }
    }
    if shape.usage.unordered_access {
        flags |= D3D12_RESOURCE_FLAG_ALLOW_UNORDERED_ACCESS;
    }

    let buffer = shape.dimension == ResourceDimension::Buffer;
    D3D12_RESOURCE_DESC {
        Dimension: dimension,
        Alignment: 0,
        Width: shape.width,
        Height: if buffer { 1 } else { shape.height },
        DepthOrArraySize: shape.depth_or_array_size.max(1) as u16,
        MipLevels: if buffer { 1 } else { shape.mip_levels as u16 },
        Format: resource_format(shape),
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: shape.sample_count.max(1),
            Quality: 0,
        },
        Layout: if buffer {
            D3D12_TEXTURE_LAYOUT_ROW_MAJOR
        } else {
            D3D12_TEXTURE_LAYOUT_UNKNOWN
        },
        Flags: flags,
    }
}

pub fn topology(topology: PrimitiveTopology) -> D3D_PRIMITIVE_TOPOLOGY {
    match topology {
        PrimitiveTopology::PointList => D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        PrimitiveTopology::LineList => D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        PrimitiveTopology::LineStrip => D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        PrimitiveTopology::TriangleList => D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        PrimitiveTopology::TriangleStrip => D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

pub fn topology_type(topology: PrimitiveTopology) -> D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    match topology {
        PrimitiveTopology::PointList => D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        PrimitiveTopology::LineList | PrimitiveTopology::LineStrip => D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip => {
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE
        }
    }
}

pub fn compare_func(func: CompareFunc) -> D3D12_COMPARISON_FUNC {
    match func {
        CompareFunc::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareFunc::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareFunc::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareFunc::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareFunc::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareFunc::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareFunc::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareFunc::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub fn rasterizer(state: &RenderState) -> D3D12_RASTERIZER_DESC {
    D3D12_RASTERIZER_DESC {
        FillMode: match state.fill {
            FillMode::Solid => D3D12_FILL_MODE_SOLID,
            FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
        },
        CullMode: match state.cull {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Front => D3D12_CULL_MODE_FRONT,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        },
        DepthClipEnable: TRUE,
        ..Default::default()
    }
}

pub fn depth_stencil(state: &RenderState) -> D3D12_DEPTH_STENCIL_DESC {
    D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: state.depth_test.into(),
        DepthWriteMask: if state.depth_write {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        DepthFunc: compare_func(state.depth_func),
        StencilEnable: FALSE,
        StencilReadMask: 0xFF,
        StencilWriteMask: 0xFF,
        FrontFace: D3D12_DEPTH_STENCILOP_DESC::default(),
        BackFace: D3D12_DEPTH_STENCILOP_DESC::default(),
    }
}

fn target_blend(mode: BlendMode) -> D3D12_RENDER_TARGET_BLEND_DESC {
    let (enable, src, dst) = match mode {
        BlendMode::Opaque => (false, D3D12_BLEND_ONE, D3D12_BLEND_ZERO),
        BlendMode::Alpha => (true, D3D12_BLEND_SRC_ALPHA, D3D12_BLEND_INV_SRC_ALPHA),
        BlendMode::Additive => (true, D3D12_BLEND_ONE, D3D12_BLEND_ONE),
        BlendMode::Premultiplied => (true, D3D12_BLEND_ONE, D3D12_BLEND_INV_SRC_ALPHA),
        BlendMode::Multiply => (true, D3D12_BLEND_DEST_COLOR, D3D12_BLEND_ZERO),
    };
    D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: enable.into(),
        LogicOpEnable: FALSE,
        SrcBlend: src,
        DestBlend: dst,
        BlendOp: D3D12_BLEND_OP_ADD,
        SrcBlendAlpha: D3D12_BLEND_ONE,
        DestBlendAlpha: D3D12_BLEND_ZERO,
        BlendOpAlpha: D3D12_BLEND_OP_ADD,
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
    }
}

pub fn blend(mode: BlendMode) -> D3D12_BLEND_DESC {
    D3D12_BLEND_DESC {
        AlphaToCoverageEnable: FALSE,
        IndependentBlendEnable: FALSE,
        RenderTarget: [target_blend(mode); 8],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::ResourceUsage;

    #[test]
    fn test_sampled_depth_uses_typeless_format() {
        let usage = ResourceUsage {
            shader_resource: true,
            depth_stencil: true,
            ..Default::default()
        };
        let shape = ResourceShape::texture_2d(64, 64, Format::Depth32Float, 1, usage);
        assert_eq!(resource_format(&shape), DXGI_FORMAT_R32_TYPELESS);

        let shape = ResourceShape::texture_2d(64, 64, Format::Depth32Float, 1, ResourceUsage::DEPTH_STENCIL);
        assert_eq!(resource_format(&shape), DXGI_FORMAT_D32_FLOAT);
        let desc = resource_desc(&shape);
        assert!((desc.Flags & D3D12_RESOURCE_FLAG_DENY_SHADER_RESOURCE).0 != 0);
    }

    #[test]
    fn test_present_maps_to_common() {
        assert_eq!(resource_state(ResourceState::Present), D3D12_RESOURCE_STATE_COMMON);
        assert_eq!(
            resource_state(ResourceState::AllShaderResource),
            D3D12_RESOURCE_STATE_ALL_SHADER_RESOURCE
        );
    }
}
