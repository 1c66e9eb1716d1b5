//! The lit, textured mesh pipeline every slot draws with.
//!
//! Bind groups: 0 per-frame camera and lights, 1 per-draw node transform (dynamic
//! offset into one buffer per target), 2 per-material uniforms plus base texture.

use super::device::{Gpu, TextureBinding};
use crate::scene::{GeometryData, Lighting, MaterialData, Side, TextureFilter, TextureWrap};
use glam::{Mat3, Mat4, Vec2, Vec3};
use image::{Rgba, RgbaImage};
use std::borrow::Cow;
use std::num::NonZeroU64;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MeshVertex {
    position: [f32; 3],
    normal: [f32; 3],
    uv: [f32; 2],
}

impl MeshVertex {
    const LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<MeshVertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[
            wgpu::VertexAttribute {
                shader_location: 0,
                offset: 0,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                shader_location: 1,
                offset: 12,
                format: wgpu::VertexFormat::Float32x3,
            },
            wgpu::VertexAttribute {
                shader_location: 2,
                offset: 24,
                format: wgpu::VertexFormat::Float32x2,
            },
        ],
    };

    /// Interleaves `geometry`. Missing normals point up, missing uvs are zero.
    pub fn from_geometry(geometry: &GeometryData) -> Vec<Self> {
        geometry
            .positions
            .iter()
            .enumerate()
            .map(|(i, position)| Self {
                position: position.to_array(),
                normal: geometry.normals.get(i).copied().unwrap_or(Vec3::Y).to_array(),
                uv: geometry.uvs.get(i).copied().unwrap_or(Vec2::ZERO).to_array(),
            })
            .collect()
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    view_proj: [[f32; 4]; 4],
    sky: [f32; 4],
    ground: [f32; 4],
    sun_direction: [f32; 4],
    sun: [f32; 4],
}

impl FrameUniforms {
    /// Light colours are given in sRGB and shaded in linear space.
    pub fn new(view_projection: Mat4, lighting: &Lighting) -> Self {
        let sky = srgb_to_linear(lighting.sky_color);
        let ground = srgb_to_linear(lighting.ground_color);
        let sun = srgb_to_linear(lighting.sun_color);
        Self {
            view_proj: view_projection.to_cols_array_2d(),
            sky: sky.extend(lighting.hemisphere_intensity).to_array(),
            ground: ground.extend(1.0).to_array(),
            sun_direction: lighting.sun_direction.normalize_or_zero().extend(0.0).to_array(),
            sun: sun.extend(lighting.sun_intensity).to_array(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct NodeUniforms {
    world: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
}

impl NodeUniforms {
    pub fn new(world: Mat4) -> Self {
        let normal = Mat3::from_mat4(world).inverse().transpose();
        Self {
            world: world.to_cols_array_2d(),
            normal: Mat4::from_mat3(normal).to_cols_array_2d(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialUniforms {
    base_color: [f32; 4],
    uv_scale: [f32; 2],
    alpha_test: f32,
    _pad: f32,
}

impl MaterialUniforms {
    pub fn new(material: &MaterialData) -> Self {
        Self {
            base_color: material.base_color.to_array(),
            uv_scale: material.uv_scale.to_array(),
            alpha_test: material.alpha_test,
            _pad: 0.0,
        }
    }
}

pub fn srgb_to_linear(color: Vec3) -> Vec3 {
    let channel = |c: f32| {
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    };
    Vec3::new(channel(color.x), channel(color.y), channel(color.z))
}

/// Clear colour for an sRGB target, so the stored bytes equal `rgb`.
pub fn clear_color(rgb: [u8; 3]) -> wgpu::Color {
    let linear = srgb_to_linear(Vec3::new(
        rgb[0] as f32 / 255.0,
        rgb[1] as f32 / 255.0,
        rgb[2] as f32 / 255.0,
    ));
    wgpu::Color {
        r: linear.x as f64,
        g: linear.y as f64,
        b: linear.z as f64,
        a: 1.0,
    }
}

pub fn address_mode(wrap: TextureWrap) -> wgpu::AddressMode {
    match wrap {
        TextureWrap::Repeat => wgpu::AddressMode::Repeat,
        TextureWrap::MirroredRepeat => wgpu::AddressMode::MirrorRepeat,
        TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
    }
}

pub fn filter_mode(filter: TextureFilter) -> wgpu::FilterMode {
    match filter {
        TextureFilter::Linear => wgpu::FilterMode::Linear,
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
    }
}

pub struct MeshPipeline {
    pub frame_layout: wgpu::BindGroupLayout,
    pub node_layout: wgpu::BindGroupLayout,
    pub material_layout: wgpu::BindGroupLayout,
    /// Byte distance between node uniforms in a target's node buffer.
    pub node_stride: u64,
    /// Bound in place of a texture by untextured materials.
    pub white: TextureBinding,
    front_only: wgpu::RenderPipeline,
    double_sided: wgpu::RenderPipeline,
}

impl MeshPipeline {
    pub fn new(gpu: &Gpu) -> Self {
        let device = &gpu.device;
        let uniform = |binding, visibility, dynamic, size: usize| wgpu::BindGroupLayoutEntry {
            binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: NonZeroU64::new(size as u64),
            },
            count: None,
        };

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("frame layout"),
            entries: &[uniform(
                0,
                wgpu::ShaderStages::VERTEX_FRAGMENT,
                false,
                std::mem::size_of::<FrameUniforms>(),
            )],
        });
        let node_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("node layout"),
            entries: &[uniform(
                0,
                wgpu::ShaderStages::VERTEX,
                true,
                std::mem::size_of::<NodeUniforms>(),
            )],
        });
        let material_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("material layout"),
            entries: &[
                uniform(
                    0,
                    wgpu::ShaderStages::VERTEX_FRAGMENT,
                    false,
                    std::mem::size_of::<MaterialUniforms>(),
                ),
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("mesh shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!("mesh.wgsl"))),
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("mesh pipeline layout"),
            bind_group_layouts: &[&frame_layout, &node_layout, &material_layout],
            push_constant_ranges: &[],
        });
        let pipeline = |label, cull_mode| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[MeshVertex::LAYOUT],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode,
                    ..Default::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };
        let front_only = pipeline("mesh pipeline (front)", Some(wgpu::Face::Back));
        let double_sided = pipeline("mesh pipeline (double)", None);

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let node_stride =
            wgpu::util::align_to(std::mem::size_of::<NodeUniforms>() as u32, alignment) as u64;
        let white = TextureBinding::new(
            gpu,
            "white texture",
            &RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255])),
            TextureWrap::Repeat,
            TextureFilter::Nearest,
        );

        Self {
            frame_layout,
            node_layout,
            material_layout,
            node_stride,
            white,
            front_only,
            double_sided,
        }
    }

    pub fn for_side(&self, side: Side) -> &wgpu::RenderPipeline {
        match side {
            Side::Front => &self.front_only,
            Side::Double => &self.double_sided,
        }
    }
}
