//! 资源视图描述
//!
//! 所有视图类型（SRV/RTV/DSV/UAV/CBV）共用一个纯函数 [`describe_view`]：
//! 输入资源形状和视图请求，输出视图维度、格式和子资源范围。
//! 按资源维度（1D/2D/3D/数组/立方体/MSAA）的分支只在这里出现一次。

use crate::core::error::GraphicsError;
use crate::renderer::descriptor::{DescriptorHandle, ViewKind};
use crate::renderer::resource::{Format, ResourceDimension, ResourceShape};

/// 常量缓冲视图的最大字节数（4096 个 float4）
pub const MAX_CONSTANT_BUFFER_SIZE: u64 = 4096 * 16;

/// 常量缓冲视图的对齐要求
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// 连续的子资源区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Span {
    pub base: u32,
    pub count: u32,
}

impl Span {
    pub fn new(base: u32, count: u32) -> Self {
        Self { base, count }
    }

    /// 区间末尾（不含）
    pub fn end(&self) -> u32 {
        self.base.saturating_add(self.count)
    }
}

/// 视图请求
///
/// 未指定的 mip / 数组区间取视图类型的默认值：
/// SRV 覆盖全部 mip，RTV/DSV/UAV 只取 mip 0；数组层默认全部。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewRequest {
    pub kind: ViewKind,
    pub mips: Option<Span>,
    pub layers: Option<Span>,
}

impl ViewRequest {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            mips: None,
            layers: None,
        }
    }

    pub fn srv() -> Self {
        Self::new(ViewKind::ShaderResource)
    }

    pub fn rtv() -> Self {
        Self::new(ViewKind::RenderTarget)
    }

    pub fn dsv() -> Self {
        Self::new(ViewKind::DepthStencil)
    }

    pub fn uav() -> Self {
        Self::new(ViewKind::UnorderedAccess)
    }

    pub fn cbv() -> Self {
        Self::new(ViewKind::ConstantBuffer)
    }

    /// 限定 mip 区间
    pub fn with_mips(mut self, base: u32, count: u32) -> Self {
        self.mips = Some(Span::new(base, count));
        self
    }

    /// 限定数组层（3D 纹理的 RTV/UAV 为深度切片）
    pub fn with_layers(mut self, base: u32, count: u32) -> Self {
        self.layers = Some(Span::new(base, count));
        self
    }
}

/// 视图维度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewDimension {
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    Texture2DMs,
    Texture2DMsArray,
    Texture3D,
    TextureCube,
    TextureCubeArray,
}

/// 缓冲区视图区间
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BufferViewRange {
    /// 首元素
    pub first_element: u64,
    /// 元素数量
    pub element_count: u32,
    /// 结构化缓冲区步长，0 表示原始（R32 无类型）缓冲区
    pub stride: u32,
    /// 视图字节数（CBV 已按 256 对齐）
    pub size_bytes: u64,
}

/// 视图描述（与具体图形 API 无关）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDescriptor {
    pub kind: ViewKind,
    pub dimension: ViewDimension,
    pub format: Format,
    pub mips: Span,
    /// 数组层；立方体为立方体数量 × 6；3D 纹理的 RTV/UAV 为深度切片
    pub layers: Span,
    pub buffer: Option<BufferViewRange>,
}

/// 已创建的视图：一个描述符句柄 + 它的描述
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorView {
    pub kind: ViewKind,
    pub handle: DescriptorHandle,
    pub desc: ViewDescriptor,
}

fn invalid(msg: impl Into<String>) -> GraphicsError {
    GraphicsError::InvalidViewRequest(msg.into())
}

/// 对齐到 256 字节（DirectX 12 常量缓冲区要求）
pub fn align_constant_buffer_size(size: u64) -> u64 {
    (size + CONSTANT_BUFFER_ALIGNMENT - 1) & !(CONSTANT_BUFFER_ALIGNMENT - 1)
}

/// 根据资源形状和请求生成视图描述
pub fn describe_view(
    shape: &ResourceShape,
    request: &ViewRequest,
) -> std::result::Result<ViewDescriptor, GraphicsError> {
    let kind = request.kind;
    check_usage(shape, kind)?;

    if shape.dimension == ResourceDimension::Buffer {
        return describe_buffer_view(shape, request);
    }

    let mips = resolve_mips(shape, request)?;
    let format = resolve_format(shape.format, kind)?;

    let multisampled = shape.sample_count > 1;
    if multisampled && kind == ViewKind::UnorderedAccess {
        return Err(invalid("unordered access views cannot target multisampled textures"));
    }

    let (dimension, layers) = match shape.dimension {
        ResourceDimension::Texture1D => {
            let layers = resolve_span(request.layers, shape.array_size(), "array layer")?;
            let dimension = if shape.array_size() > 1 {
                ViewDimension::Texture1DArray
            } else {
                ViewDimension::Texture1D
            };
            (dimension, layers)
        }
        ResourceDimension::Texture2D => {
            let layers = resolve_span(request.layers, shape.array_size(), "array layer")?;
            let full = layers == Span::new(0, shape.array_size());
            let dimension = if shape.cube && kind == ViewKind::ShaderResource && full {
                if shape.array_size() == 6 {
                    ViewDimension::TextureCube
                } else {
                    ViewDimension::TextureCubeArray
                }
            } else if multisampled {
                if shape.array_size() > 1 {
                    ViewDimension::Texture2DMsArray
                } else {
                    ViewDimension::Texture2DMs
                }
            } else if shape.array_size() > 1 {
                ViewDimension::Texture2DArray
            } else {
                ViewDimension::Texture2D
            };
            (dimension, layers)
        }
        ResourceDimension::Texture3D => match kind {
            ViewKind::ShaderResource => {
                if request.layers.is_some() {
                    return Err(invalid("3D shader resource views always cover every slice"));
                }
                (ViewDimension::Texture3D, Span::new(0, 1))
            }
            ViewKind::RenderTarget | ViewKind::UnorderedAccess => {
                let mip_depth = (shape.depth() >> mips.base).max(1);
                let slices = resolve_span(request.layers, mip_depth, "depth slice")?;
                (ViewDimension::Texture3D, slices)
            }
            _ => return Err(invalid(format!("{} views cannot target 3D textures", kind.name()))),
        },
        ResourceDimension::Buffer => unreachable!("buffers handled above"),
    };

    Ok(ViewDescriptor {
        kind,
        dimension,
        format,
        mips,
        layers,
        buffer: None,
    })
}

fn check_usage(shape: &ResourceShape, kind: ViewKind) -> std::result::Result<(), GraphicsError> {
    let usage = shape.usage;
    let allowed = match kind {
        ViewKind::ShaderResource => usage.shader_resource,
        ViewKind::RenderTarget => usage.render_target,
        ViewKind::DepthStencil => usage.depth_stencil,
        ViewKind::UnorderedAccess => usage.unordered_access,
        ViewKind::ConstantBuffer => usage.constant_buffer,
        ViewKind::Sampler => {
            return Err(invalid("samplers are not resource views"));
        }
    };
    if !allowed {
        return Err(invalid(format!(
            "resource was not created with {} usage",
            kind.name()
        )));
    }
    Ok(())
}

fn describe_buffer_view(
    shape: &ResourceShape,
    request: &ViewRequest,
) -> std::result::Result<ViewDescriptor, GraphicsError> {
    if request.mips.is_some() || request.layers.is_some() {
        return Err(invalid("buffer views have no mip or array range"));
    }
    let size = shape.width;
    let buffer = match request.kind {
        ViewKind::ConstantBuffer => {
            let size_bytes = align_constant_buffer_size(size);
            if size_bytes > MAX_CONSTANT_BUFFER_SIZE {
                return Err(invalid(format!(
                    "constant buffer of {} bytes exceeds the {} byte limit",
                    size_bytes, MAX_CONSTANT_BUFFER_SIZE
                )));
            }
            BufferViewRange {
                first_element: 0,
                element_count: 1,
                stride: 0,
                size_bytes,
            }
        }
        ViewKind::ShaderResource | ViewKind::UnorderedAccess => {
            let element_size = if shape.structure_stride > 0 {
                shape.structure_stride as u64
            } else {
                4
            };
            if size % element_size != 0 {
                return Err(invalid(format!(
                    "buffer size {} is not a multiple of element size {}",
                    size, element_size
                )));
            }
            let element_count = u32::try_from(size / element_size)
                .map_err(|_| invalid("buffer has too many elements for one view"))?;
            BufferViewRange {
                first_element: 0,
                element_count,
                stride: shape.structure_stride,
                size_bytes: size,
            }
        }
        kind => {
            return Err(invalid(format!("{} views cannot target buffers", kind.name())));
        }
    };

    let format = if shape.structure_stride > 0 || request.kind == ViewKind::ConstantBuffer {
        Format::Unknown
    } else {
        Format::R32Typeless
    };

    Ok(ViewDescriptor {
        kind: request.kind,
        dimension: ViewDimension::Buffer,
        format,
        mips: Span::new(0, 1),
        layers: Span::new(0, 1),
        buffer: Some(buffer),
    })
}

fn resolve_mips(
    shape: &ResourceShape,
    request: &ViewRequest,
) -> std::result::Result<Span, GraphicsError> {
    let single_mip = !matches!(request.kind, ViewKind::ShaderResource);
    let default = if single_mip {
        Span::new(0, 1)
    } else {
        Span::new(0, shape.mip_levels)
    };
    let mips = request.mips.unwrap_or(default);
    if single_mip && mips.count != 1 {
        return Err(invalid(format!(
            "{} views address exactly one mip, {} requested",
            request.kind.name(),
            mips.count
        )));
    }
    if shape.sample_count > 1 && mips != Span::new(0, 1) {
        return Err(invalid("multisampled textures have a single mip"));
    }
    resolve_span(Some(mips), shape.mip_levels, "mip")
}

fn resolve_span(
    requested: Option<Span>,
    available: u32,
    what: &str,
) -> std::result::Result<Span, GraphicsError> {
    let span = requested.unwrap_or(Span::new(0, available));
    if span.count == 0 || span.end() > available {
        return Err(invalid(format!(
            "{} range {}..{} is outside 0..{}",
            what,
            span.base,
            span.end(),
            available
        )));
    }
    Ok(span)
}

fn resolve_format(format: Format, kind: ViewKind) -> std::result::Result<Format, GraphicsError> {
    match kind {
        ViewKind::DepthStencil if !format.is_depth() => Err(invalid(format!(
            "depth-stencil view needs a depth format, resource is {:?}",
            format
        ))),
        ViewKind::RenderTarget | ViewKind::UnorderedAccess if format.is_depth() => Err(invalid(
            format!("{} views cannot use depth format {:?}", kind.name(), format),
        )),
        ViewKind::ShaderResource => Ok(format.shader_read_format()),
        _ => Ok(format),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::resource::ResourceUsage;

    #[test]
    fn test_srv_covers_all_mips() {
        let shape = ResourceShape::texture_2d(256, 256, Format::Rgba8Unorm, 9, ResourceUsage::SAMPLED);
        let desc = describe_view(&shape, &ViewRequest::srv()).unwrap();
        assert_eq!(desc.dimension, ViewDimension::Texture2D);
        assert_eq!(desc.mips, Span::new(0, 9));
        assert_eq!(desc.layers, Span::new(0, 1));
    }

    #[test]
    fn test_cube_dimensions() {
        let cube = ResourceShape::texture_cube(64, Format::Rgba16Float, 1, 1, ResourceUsage::RENDER_TARGET);
        let srv = describe_view(&cube, &ViewRequest::srv()).unwrap();
        assert_eq!(srv.dimension, ViewDimension::TextureCube);
        assert_eq!(srv.layers, Span::new(0, 6));

        // 单个面的 RTV 是 2D 数组
        let face = describe_view(&cube, &ViewRequest::rtv().with_layers(3, 1)).unwrap();
        assert_eq!(face.dimension, ViewDimension::Texture2DArray);
        assert_eq!(face.layers, Span::new(3, 1));

        let cubes = ResourceShape::texture_cube(64, Format::Rgba16Float, 1, 2, ResourceUsage::SAMPLED);
        let srv = describe_view(&cubes, &ViewRequest::srv()).unwrap();
        assert_eq!(srv.dimension, ViewDimension::TextureCubeArray);
    }

    #[test]
    fn test_multisampled_targets() {
        let shape = ResourceShape::texture_2d(128, 128, Format::Rgba8Unorm, 1, ResourceUsage::RENDER_TARGET)
            .with_samples(4);
        let rtv = describe_view(&shape, &ViewRequest::rtv()).unwrap();
        assert_eq!(rtv.dimension, ViewDimension::Texture2DMs);
        let err = describe_view(&shape, &ViewRequest::uav()).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidViewRequest(_)));
    }

    #[test]
    fn test_depth_formats() {
        let depth = ResourceShape::texture_2d(64, 64, Format::Depth32Float, 1, ResourceUsage::DEPTH_STENCIL);
        let dsv = describe_view(&depth, &ViewRequest::dsv()).unwrap();
        assert_eq!(dsv.format, Format::Depth32Float);
        let srv = describe_view(&depth, &ViewRequest::srv()).unwrap();
        assert_eq!(srv.format, Format::R32Float);

        let color = ResourceShape::texture_2d(64, 64, Format::Rgba8Unorm, 1, ResourceUsage::all());
        assert!(describe_view(&color, &ViewRequest::dsv()).is_err());
    }

    #[test]
    fn test_texture_3d_slices() {
        let volume = ResourceShape::texture_3d(32, 32, 16, Format::R16Float, 3, ResourceUsage::STORAGE);
        let uav = describe_view(&volume, &ViewRequest::uav().with_mips(1, 1)).unwrap();
        assert_eq!(uav.dimension, ViewDimension::Texture3D);
        assert_eq!(uav.layers, Span::new(0, 8));
        assert!(describe_view(&volume, &ViewRequest::uav().with_layers(4, 16)).is_err());
        assert!(describe_view(&volume, &ViewRequest::dsv()).is_err());
    }

    #[test]
    fn test_invalid_ranges() {
        let shape = ResourceShape::texture_2d(64, 64, Format::Rgba8Unorm, 4, ResourceUsage::all_color());
        assert!(describe_view(&shape, &ViewRequest::srv().with_mips(2, 3)).is_err());
        assert!(describe_view(&shape, &ViewRequest::srv().with_mips(0, 0)).is_err());
        assert!(describe_view(&shape, &ViewRequest::rtv().with_mips(0, 2)).is_err());
        assert!(describe_view(&shape, &ViewRequest::new(ViewKind::Sampler)).is_err());
        assert!(describe_view(&shape, &ViewRequest::cbv()).is_err());
    }

    #[test]
    fn test_buffer_views() {
        let constants = ResourceShape::buffer(100, ResourceUsage::CONSTANT);
        let cbv = describe_view(&constants, &ViewRequest::cbv()).unwrap();
        assert_eq!(cbv.buffer.unwrap().size_bytes, 256);

        let structured = ResourceShape::structured_buffer(64, 16, ResourceUsage::STORAGE);
        let uav = describe_view(&structured, &ViewRequest::uav()).unwrap();
        assert_eq!(uav.buffer.unwrap().element_count, 64);
        assert_eq!(uav.format, Format::Unknown);

        let raw = ResourceShape::buffer(1024, ResourceUsage::SAMPLED);
        let srv = describe_view(&raw, &ViewRequest::srv()).unwrap();
        assert_eq!(srv.format, Format::R32Typeless);
        assert_eq!(srv.buffer.unwrap().element_count, 256);

        let huge = ResourceShape::buffer(MAX_CONSTANT_BUFFER_SIZE + 1, ResourceUsage::CONSTANT);
        assert!(describe_view(&huge, &ViewRequest::cbv()).is_err());
        assert!(describe_view(&raw, &ViewRequest::rtv()).is_err());
    }

    #[test]
    fn test_constant_buffer_alignment() {
        assert_eq!(align_constant_buffer_size(100), 256);
        assert_eq!(align_constant_buffer_size(256), 256);
        assert_eq!(align_constant_buffer_size(300), 512);
    }
}
