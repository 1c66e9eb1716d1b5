//! Off-screen colour/depth targets and their CPU readback.

use super::device::{Gpu, GpuMesh};
use super::pipeline::{FrameUniforms, MeshPipeline, NodeUniforms, COLOR_FORMAT, DEPTH_FORMAT};
use super::RenderError;
use glam::Mat4;
use image::RgbaImage;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TARGET_ID: AtomicU64 = AtomicU64::new(1);

/// One mesh instance to draw.
#[derive(Debug, Clone, Copy)]
pub struct DrawItem {
    pub world: Mat4,
    pub mesh: GpuMesh,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub draw_calls: usize,
    pub triangles: usize,
}

pub struct RenderTarget {
    id: u64,
    width: u32,
    height: u32,
    clear_color: [u8; 3],
    gpu: Option<TargetTextures>,
}

pub(super) struct TargetTextures {
    pub color: wgpu::Texture,
    pub color_view: wgpu::TextureView,
    pub depth_view: wgpu::TextureView,
    depth: wgpu::Texture,
    pub frame: wgpu::Buffer,
    pub frame_group: wgpu::BindGroup,
    pub nodes: wgpu::Buffer,
    pub node_group: wgpu::BindGroup,
    node_capacity: usize,
}

impl RenderTarget {
    pub(super) fn new(gpu: &Gpu, pipeline: &MeshPipeline, width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let device = &gpu.device;
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("target colour"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("target depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let frame = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniforms"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let frame_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("frame"),
            layout: &pipeline.frame_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: frame.as_entire_binding(),
            }],
        });
        let (nodes, node_group) = node_buffer(gpu, pipeline, 8);

        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            width,
            height,
            clear_color: [0, 0, 0],
            gpu: Some(TargetTextures {
                color_view: color.create_view(&wgpu::TextureViewDescriptor::default()),
                depth_view: depth.create_view(&wgpu::TextureViewDescriptor::default()),
                color,
                depth,
                frame,
                frame_group,
                nodes,
                node_group,
                node_capacity: 8,
            }),
        }
    }

    pub(super) fn detached(width: u32, height: u32) -> Self {
        Self {
            id: NEXT_TARGET_ID.fetch_add(1, Ordering::Relaxed),
            width: width.max(1),
            height: height.max(1),
            clear_color: [0, 0, 0],
            gpu: None,
        }
    }

    /// Changes whenever the underlying colour texture is recreated.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The colour texture, for sampling it elsewhere (e.g. in egui).
    pub fn color_view(&self) -> Option<&wgpu::TextureView> {
        self.gpu.as_ref().map(|textures| &textures.color_view)
    }

    pub(super) fn clear_color(&self) -> [u8; 3] {
        self.clear_color
    }

    pub(super) fn set_clear_color(&mut self, rgb: [u8; 3]) {
        self.clear_color = rgb;
    }

    pub(super) fn gpu(&self) -> Option<&TargetTextures> {
        self.gpu.as_ref()
    }

    pub(super) fn gpu_mut(&mut self) -> Option<&mut TargetTextures> {
        self.gpu.as_mut()
    }
}

impl TargetTextures {
    /// Grows the node buffer to hold at least `count` draws.
    pub fn reserve_nodes(&mut self, gpu: &Gpu, pipeline: &MeshPipeline, count: usize) {
        if count <= self.node_capacity {
            return;
        }
        let capacity = count.next_power_of_two();
        self.nodes.destroy();
        let (nodes, node_group) = node_buffer(gpu, pipeline, capacity);
        self.nodes = nodes;
        self.node_group = node_group;
        self.node_capacity = capacity;
    }
}

impl Drop for TargetTextures {
    fn drop(&mut self) {
        self.color.destroy();
        self.depth.destroy();
        self.frame.destroy();
        self.nodes.destroy();
    }
}

fn node_buffer(
    gpu: &Gpu,
    pipeline: &MeshPipeline,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("node uniforms"),
        size: pipeline.node_stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("nodes"),
        layout: &pipeline.node_layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: NonZeroU64::new(std::mem::size_of::<NodeUniforms>() as u64),
            }),
        }],
    });
    (buffer, group)
}

/// Copies an RGBA8 texture into a mapped buffer and strips the row padding.
pub(super) fn read_texture(
    gpu: &Gpu,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<RgbaImage, RenderError> {
    let unpadded = width * 4;
    let bytes_per_row = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT)
        * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback"),
        size: bytes_per_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    let _ = gpu.device.poll(wgpu::Maintain::Wait);
    receiver
        .recv()
        .map_err(|_| RenderError::ReadbackInterrupted)??;

    let mut pixels = Vec::with_capacity(unpadded as usize * height as usize);
    {
        let data = slice.get_mapped_range();
        for row in data.chunks(bytes_per_row as usize).take(height as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
    }
    buffer.unmap();
    buffer.destroy();
    RgbaImage::from_raw(width, height, pixels).ok_or(RenderError::ReadbackInterrupted)
}
