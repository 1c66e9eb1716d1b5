//! GPU resource tables.
//!
//! Geometry, materials and textures become wgpu buffers, textures and bind groups
//! on upload and stay there until released explicitly; releasing destroys the GPU
//! objects. Handles are generational, so a released handle never aliases a later
//! allocation.
//!
//! A [`RenderDevice::detached`] device has no adapter behind it. It keeps the same
//! tables and counters, counts draws without issuing them, and reads targets back as
//! their clear colour.

use super::pipeline::{
    address_mode, clear_color, filter_mode, FrameUniforms, MaterialUniforms, MeshPipeline,
    MeshVertex, NodeUniforms,
};
use super::target::{read_texture, DrawItem, DrawStats, RenderTarget};
use super::RenderError;
use crate::scene::{
    GeometryData, MaterialData, Mesh, Scene, SceneNode, Side, TextureData, TextureFilter,
    TextureWrap,
};
use glam::{Mat4, Vec2, Vec4};
use image::{Rgba, RgbaImage};
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;
use wgpu::util::DeviceExt;

new_key_type! { pub struct GeometryHandle; }
new_key_type! { pub struct MaterialHandle; }
new_key_type! { pub struct TextureHandle; }

/// A wgpu device and its queue, shared by the window presenter and every
/// [`RenderDevice`] drawing on it.
pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl Gpu {
    /// Device without a surface, for off-screen rendering.
    pub fn headless() -> Result<Arc<Self>, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(RenderError::AdapterUnavailable)?;
        Self::from_adapter(&adapter)
    }

    pub fn from_adapter(adapter: &wgpu::Adapter) -> Result<Arc<Self>, RenderError> {
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("gallery device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))?;
        device.on_uncaptured_error(Box::new(|err: wgpu::Error| log::error!("wgpu: {}", err)));
        let info = adapter.get_info();
        log::info!("Graphics device: {} ({:?})", info.name, info.backend);
        Ok(Arc::new(Self { device, queue }))
    }
}

/// Device handles owned by one uploaded mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuMesh {
    pub geometry: GeometryHandle,
    pub material: MaterialHandle,
}

pub struct GpuGeometry {
    pub vertex_count: u32,
    pub index_count: u32,
    buffers: Option<GeometryBuffers>,
}

struct GeometryBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
}

/// A sampled texture with the sampler its wrap and filter modes call for.
pub struct TextureBinding {
    texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub sampler: wgpu::Sampler,
}

impl TextureBinding {
    pub fn new(
        gpu: &Gpu,
        label: &str,
        image: &RgbaImage,
        wrap: TextureWrap,
        filter: TextureFilter,
    ) -> Self {
        let size = wgpu::Extent3d {
            width: image.width(),
            height: image.height(),
            depth_or_array_layers: 1,
        };
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            image.as_raw(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * image.width()),
                rows_per_image: Some(image.height()),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some(label),
            address_mode_u: address_mode(wrap),
            address_mode_v: address_mode(wrap),
            mag_filter: filter_mode(filter),
            min_filter: filter_mode(filter),
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        Self {
            texture,
            view,
            sampler,
        }
    }

    fn destroy(self) {
        self.texture.destroy();
    }
}

pub struct GpuTexture {
    pub width: u32,
    pub height: u32,
    binding: Option<TextureBinding>,
}

pub struct GpuMaterial {
    pub base_color: Vec4,
    pub texture: Option<TextureHandle>,
    pub side: Side,
    pub alpha_test: f32,
    pub uv_scale: Vec2,
    binding: Option<MaterialBinding>,
}

struct MaterialBinding {
    uniforms: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub live_geometries: usize,
    pub live_materials: usize,
    pub live_textures: usize,
    pub allocations: u64,
    pub releases: u64,
}

impl DeviceStats {
    pub fn live_total(&self) -> usize {
        self.live_geometries + self.live_materials + self.live_textures
    }
}

struct Backend {
    gpu: Arc<Gpu>,
    pipeline: MeshPipeline,
}

pub struct RenderDevice {
    backend: Option<Backend>,
    geometries: SlotMap<GeometryHandle, GpuGeometry>,
    materials: SlotMap<MaterialHandle, GpuMaterial>,
    textures: SlotMap<TextureHandle, GpuTexture>,
    allocations: u64,
    releases: u64,
}

impl RenderDevice {
    pub fn new(gpu: Arc<Gpu>) -> Self {
        let pipeline = MeshPipeline::new(&gpu);
        Self::with_backend(Some(Backend { gpu, pipeline }))
    }

    pub fn detached() -> Self {
        Self::with_backend(None)
    }

    fn with_backend(backend: Option<Backend>) -> Self {
        Self {
            backend,
            geometries: SlotMap::with_key(),
            materials: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            allocations: 0,
            releases: 0,
        }
    }

    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            live_geometries: self.geometries.len(),
            live_materials: self.materials.len(),
            live_textures: self.textures.len(),
            allocations: self.allocations,
            releases: self.releases,
        }
    }

    pub fn create_geometry(&mut self, data: &GeometryData) -> GeometryHandle {
        let buffers = self.backend.as_ref().map(|backend| {
            let device = &backend.gpu.device;
            let vertices = MeshVertex::from_geometry(data);
            GeometryBuffers {
                vertices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("mesh vertices"),
                    contents: bytemuck::cast_slice(&vertices),
                    usage: wgpu::BufferUsages::VERTEX,
                }),
                indices: device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("mesh indices"),
                    contents: bytemuck::cast_slice(&data.indices),
                    usage: wgpu::BufferUsages::INDEX,
                }),
            }
        });
        self.allocations += 1;
        self.geometries.insert(GpuGeometry {
            vertex_count: data.positions.len() as u32,
            index_count: data.indices.len() as u32,
            buffers,
        })
    }

    pub fn create_texture(&mut self, data: &TextureData) -> TextureHandle {
        let binding = self.backend.as_ref().map(|backend| {
            let max_side = backend.gpu.device.limits().max_texture_dimension_2d;
            let image = fit_texture(&data.image, max_side);
            TextureBinding::new(&backend.gpu, "model texture", &image, data.wrap, data.filter)
        });
        self.allocations += 1;
        self.textures.insert(GpuTexture {
            width: data.image.width(),
            height: data.image.height(),
            binding,
        })
    }

    /// Creates the material and, if it has one, its texture.
    pub fn create_material(&mut self, data: &MaterialData) -> MaterialHandle {
        let texture = data
            .texture
            .as_ref()
            .map(|texture| self.create_texture(texture));

        let binding = self.backend.as_ref().map(|backend| {
            let device = &backend.gpu.device;
            let sampled = texture
                .and_then(|handle| self.textures.get(handle))
                .and_then(|texture| texture.binding.as_ref())
                .unwrap_or(&backend.pipeline.white);
            let uniforms = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("material uniforms"),
                contents: bytemuck::bytes_of(&MaterialUniforms::new(data)),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("material"),
                layout: &backend.pipeline.material_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: uniforms.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&sampled.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: wgpu::BindingResource::Sampler(&sampled.sampler),
                    },
                ],
            });
            MaterialBinding {
                uniforms,
                bind_group,
            }
        });

        self.allocations += 1;
        self.materials.insert(GpuMaterial {
            base_color: data.base_color,
            texture,
            side: data.side,
            alpha_test: data.alpha_test,
            uv_scale: data.uv_scale,
            binding,
        })
    }

    pub fn release_geometry(&mut self, handle: GeometryHandle) -> bool {
        let Some(geometry) = self.geometries.remove(handle) else {
            return false;
        };
        if let Some(buffers) = geometry.buffers {
            buffers.vertices.destroy();
            buffers.indices.destroy();
        }
        self.releases += 1;
        true
    }

    pub fn release_texture(&mut self, handle: TextureHandle) -> bool {
        let Some(texture) = self.textures.remove(handle) else {
            return false;
        };
        if let Some(binding) = texture.binding {
            binding.destroy();
        }
        self.releases += 1;
        true
    }

    /// Releases the material and the texture it owns.
    pub fn release_material(&mut self, handle: MaterialHandle) -> bool {
        let Some(material) = self.materials.remove(handle) else {
            return false;
        };
        if let Some(binding) = material.binding {
            binding.uniforms.destroy();
        }
        self.releases += 1;
        if let Some(texture) = material.texture {
            self.release_texture(texture);
        }
        true
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&GpuGeometry> {
        self.geometries.get(handle)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&GpuMaterial> {
        self.materials.get(handle)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        self.textures.get(handle)
    }

    /// Uploads a mesh unless it already holds handles.
    pub fn upload_mesh(&mut self, mesh: &mut Mesh) {
        if mesh.gpu.is_some() {
            return;
        }
        let geometry = self.create_geometry(&mesh.geometry);
        let material = self.create_material(&mesh.material);
        mesh.gpu = Some(GpuMesh { geometry, material });
    }

    /// Releases the mesh's handles. Returns how many resources were freed.
    pub fn release_mesh(&mut self, mesh: &mut Mesh) -> usize {
        let Some(gpu) = mesh.gpu.take() else {
            return 0;
        };
        let before = self.releases;
        self.release_geometry(gpu.geometry);
        self.release_material(gpu.material);
        (self.releases - before) as usize
    }

    pub fn upload_node(&mut self, node: &mut SceneNode) {
        node.for_each_mesh_mut(&mut |mesh| self.upload_mesh(mesh));
    }

    /// Recursively releases every mesh under `node`.
    pub fn release_node(&mut self, node: &mut SceneNode) -> usize {
        let mut released = 0;
        node.for_each_mesh_mut(&mut |mesh| released += self.release_mesh(mesh));
        released
    }

    /// Off-screen colour and depth target.
    pub fn create_target(&self, width: u32, height: u32) -> RenderTarget {
        match &self.backend {
            Some(backend) => RenderTarget::new(&backend.gpu, &backend.pipeline, width, height),
            None => RenderTarget::detached(width, height),
        }
    }

    /// Recreates the target's textures if its size changed.
    pub fn resize_target(&self, target: &mut RenderTarget, width: u32, height: u32) {
        if target.size() != (width.max(1), height.max(1)) {
            *target = self.create_target(width, height);
        }
    }

    /// Clears `target` to the scene's clear colour and draws `items` into it.
    /// Items whose resources were released are skipped.
    pub fn draw(
        &self,
        target: &mut RenderTarget,
        view_projection: Mat4,
        scene: &Scene,
        items: &[DrawItem],
    ) -> DrawStats {
        let resolved: Vec<(Mat4, &GpuGeometry, &GpuMaterial)> = items
            .iter()
            .filter_map(|item| {
                let geometry = self.geometries.get(item.mesh.geometry);
                let material = self.materials.get(item.mesh.material);
                if geometry.is_none() || material.is_none() {
                    log::debug!("Skipping draw item with released resources");
                }
                Some((item.world, geometry?, material?))
            })
            .filter(|(_, geometry, _)| geometry.index_count > 0)
            .collect();

        target.set_clear_color(scene.clear_color);
        let stats = DrawStats {
            draw_calls: resolved.len(),
            triangles: resolved
                .iter()
                .map(|(_, geometry, _)| geometry.index_count as usize / 3)
                .sum(),
        };
        let (Some(backend), Some(textures)) = (&self.backend, target.gpu_mut()) else {
            return stats;
        };

        let gpu = &backend.gpu;
        let stride = backend.pipeline.node_stride;
        textures.reserve_nodes(gpu, &backend.pipeline, resolved.len());
        gpu.queue.write_buffer(
            &textures.frame,
            0,
            bytemuck::bytes_of(&FrameUniforms::new(view_projection, &scene.lighting)),
        );
        if !resolved.is_empty() {
            let mut nodes = vec![0u8; resolved.len() * stride as usize];
            for (slot, (world, _, _)) in nodes.chunks_mut(stride as usize).zip(&resolved) {
                let uniforms = NodeUniforms::new(*world);
                let bytes = bytemuck::bytes_of(&uniforms);
                slot[..bytes.len()].copy_from_slice(bytes);
            }
            gpu.queue.write_buffer(&textures.nodes, 0, &nodes);
        }

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("mesh encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("mesh pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &textures.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color(scene.clear_color)),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &textures.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_bind_group(0, &textures.frame_group, &[]);
            for (i, (_, geometry, material)) in resolved.iter().enumerate() {
                let (Some(buffers), Some(binding)) = (&geometry.buffers, &material.binding) else {
                    continue;
                };
                pass.set_pipeline(backend.pipeline.for_side(material.side));
                pass.set_bind_group(1, &textures.node_group, &[(i as u64 * stride) as u32]);
                pass.set_bind_group(2, &binding.bind_group, &[]);
                pass.set_vertex_buffer(0, buffers.vertices.slice(..));
                pass.set_index_buffer(buffers.indices.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..geometry.index_count, 0, 0..1);
            }
        }
        gpu.queue.submit(Some(encoder.finish()));
        stats
    }

    /// Copies the target's colour back to the CPU.
    pub fn read_back(&self, target: &RenderTarget) -> Result<RgbaImage, RenderError> {
        let (width, height) = target.size();
        match (&self.backend, target.gpu()) {
            (Some(backend), Some(textures)) => {
                read_texture(&backend.gpu, &textures.color, width, height)
            }
            _ => {
                let [r, g, b] = target.clear_color();
                Ok(RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255])))
            }
        }
    }
}

/// Downscales images larger than the device allows.
fn fit_texture(image: &RgbaImage, max_side: u32) -> std::borrow::Cow<'_, RgbaImage> {
    let (width, height) = image.dimensions();
    if width <= max_side && height <= max_side {
        return std::borrow::Cow::Borrowed(image);
    }
    let scale = max_side as f32 / width.max(height) as f32;
    let fitted = (
        ((width as f32 * scale) as u32).clamp(1, max_side),
        ((height as f32 * scale) as u32).clamp(1, max_side),
    );
    log::debug!(
        "Downscaling {}x{} texture to {}x{}",
        width,
        height,
        fitted.0,
        fitted.1
    );
    std::borrow::Cow::Owned(image::imageops::resize(
        image,
        fitted.0,
        fitted.1,
        image::imageops::FilterType::Triangle,
    ))
}

#[cfg(test)]
mod tests {
    use super::{fit_texture, RenderDevice};
    use crate::scene::fixtures::{quad_geometry, quad_model, textured_material};
    use crate::scene::Mesh;
    use image::RgbaImage;

    #[test]
    fn upload_and_release_balance() {
        let mut device = RenderDevice::detached();
        let mut model = quad_model("chair");
        device.upload_node(&mut model.root);
        let stats = device.stats();
        assert_eq!(stats.live_geometries, 2);
        assert_eq!(stats.live_materials, 2);
        assert_eq!(stats.live_textures, 1);
        assert!(model.is_uploaded());

        // One textured mesh (3 resources) and one plain mesh (2 resources).
        assert_eq!(device.release_node(&mut model.root), 5);
        let stats = device.stats();
        assert_eq!(stats.live_total(), 0);
        assert_eq!(stats.allocations, stats.releases);
        assert!(!model.is_uploaded());
    }

    #[test]
    fn releasing_twice_is_a_no_op() {
        let mut device = RenderDevice::detached();
        let geometry = device.create_geometry(&quad_geometry());
        let material = device.create_material(&textured_material());
        assert!(device.release_geometry(geometry));
        assert!(!device.release_geometry(geometry));
        assert!(device.release_material(material));
        assert!(!device.release_material(material));
        assert_eq!(device.stats().releases, 3);
    }

    #[test]
    fn upload_is_idempotent_per_mesh() {
        let mut device = RenderDevice::detached();
        let mut mesh = Mesh::new(quad_geometry(), textured_material());
        device.upload_mesh(&mut mesh);
        device.upload_mesh(&mut mesh);
        assert_eq!(device.stats().allocations, 3);
        assert_eq!(device.release_mesh(&mut mesh), 3);
        assert_eq!(device.release_mesh(&mut mesh), 0);
    }

    #[test]
    fn stale_handles_do_not_alias_new_resources() {
        let mut device = RenderDevice::detached();
        let first = device.create_geometry(&quad_geometry());
        device.release_geometry(first);
        let second = device.create_geometry(&quad_geometry());
        assert_ne!(first, second);
        assert!(device.geometry(first).is_none());
        assert_eq!(device.geometry(second).map(|g| g.index_count), Some(6));
    }

    #[test]
    fn oversized_textures_are_fitted_to_the_device_limit() {
        let image = RgbaImage::new(400, 100);
        let fitted = fit_texture(&image, 256);
        assert_eq!(fitted.dimensions(), (256, 64));
        let small = RgbaImage::new(8, 8);
        assert!(matches!(fit_texture(&small, 256), std::borrow::Cow::Borrowed(_)));
    }
}
