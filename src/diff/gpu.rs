//! GPU Diff Kernel
//!
//! wgpu compute backend for the per-tile comparison. One invocation per
//! tile; the shader writes per-tile changed-pixel counts and brightness
//! into storage buffers and tallies per-bounding-area changed tiles with
//! atomics.
//!
//! Buffer lifecycle: everything is pre-allocated for the session geometry
//! and reused every tick. The two frame textures ping-pong as
//! previous/current with a pair of prebuilt bind groups selected by
//! parity; `readback` flips the parity, which is the GPU-side frame
//! rotation. Host reads go through one `MAP_READ` staging buffer behind
//! an explicit `device.poll(Wait)` barrier, so every shader write is
//! complete before any host read.

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::frame::{Frame, PixelFormat};
use crate::grid::TileGrid;

use super::{DiffKernel, TileSignals};

/// 1-D workgroup size; one thread per tile
const WG_SIZE: u32 = 64;

/// Uniform parameters (must match DiffParams in tile_diff.wgsl)
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DiffParams {
    width: u32,
    height: u32,
    tile_size: u32,
    tiles_x: u32,
    tiles_y: u32,
    pixel_delta: u32,
    area_width: u32,
    area_height: u32,
    areas_x: u32,
    _pad: [u32; 3],
}

/// Frame textures for one pixel layout, rebuilt on format drift
struct FrameTextures {
    width: u32,
    height: u32,
    format: PixelFormat,
    pair: [wgpu::Texture; 2],
    /// `bind_groups[p]` binds `pair[p]` as previous and `pair[1 - p]`
    /// as current
    bind_groups: [wgpu::BindGroup; 2],
}

/// wgpu compute backend for the tile comparison
pub struct GpuDiffKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
    pixel_delta: u8,
    grid: TileGrid,

    params_buf: wgpu::Buffer,
    changed_buf: wgpu::Buffer,
    brightness_buf: wgpu::Buffer,
    area_buf: wgpu::Buffer,
    staging_buf: wgpu::Buffer,

    textures: Option<FrameTextures>,
    /// Index of the texture currently holding the previous frame
    parity: usize,
    seeded: bool,
    dispatched: bool,
}

impl GpuDiffKernel {
    /// Acquire an adapter and build the compute pipeline for a grid
    ///
    /// Fails with [`EngineError::GpuUnavailable`] when no suitable
    /// adapter exists; callers fall back to the CPU kernel.
    pub fn new(pixel_delta: u8, grid: &TileGrid) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| EngineError::GpuUnavailable("no suitable adapter".into()))?;

        debug!(
            adapter = %adapter.get_info().name,
            backend = ?adapter.get_info().backend,
            "creating tile-diff compute device"
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("tile-diff device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
            },
            None,
        ))
        .map_err(|e| EngineError::GpuUnavailable(e.to_string()))?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tile_diff.wgsl"),
            source: wgpu::ShaderSource::Wgsl(include_str!("tile_diff.wgsl").into()),
        });

        // Mirrors @group(0) in tile_diff.wgsl
        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile-diff BGL"),
            entries: &[
                // 0 - prev_tex, 1 - curr_tex
                texture_entry(0),
                texture_entry(1),
                // 2 - params (uniform)
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // 3 - changed, 4 - brightness, 5 - area tally
                storage_entry(3),
                storage_entry(4),
                storage_entry(5),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tile-diff pipeline layout"),
            bind_group_layouts: &[&bgl],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("tile_diff"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "tile_diff",
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });

        let (params_buf, changed_buf, brightness_buf, area_buf, staging_buf) =
            create_grid_buffers(&device, grid);

        let kernel = Self {
            device,
            queue,
            pipeline,
            bgl,
            pixel_delta,
            grid: grid.clone(),
            params_buf,
            changed_buf,
            brightness_buf,
            area_buf,
            staging_buf,
            textures: None,
            parity: 0,
            seeded: false,
            dispatched: false,
        };
        kernel.write_params();
        Ok(kernel)
    }

    fn write_params(&self) {
        let params = DiffParams {
            width: self.grid.width,
            height: self.grid.height,
            tile_size: self.grid.tile_size,
            tiles_x: self.grid.tiles_x,
            tiles_y: self.grid.tiles_y,
            pixel_delta: self.pixel_delta as u32,
            area_width: self.grid.area_width,
            area_height: self.grid.area_height,
            areas_x: self.grid.areas_x,
            _pad: [0; 3],
        };
        self.queue
            .write_buffer(&self.params_buf, 0, bytemuck::bytes_of(&params));
    }

    fn changed_bytes(&self) -> u64 {
        (self.grid.tile_count() * std::mem::size_of::<u32>()) as u64
    }

    fn brightness_bytes(&self) -> u64 {
        (self.grid.tile_count() * std::mem::size_of::<f32>()) as u64
    }

    fn area_bytes(&self) -> u64 {
        (self.grid.area_count() * std::mem::size_of::<u32>()) as u64
    }

    /// Recreate the frame textures and their two parity bind groups when
    /// the incoming frame's layout does not match the current ones
    fn ensure_textures(&mut self, frame: &Frame) {
        let matches = self.textures.as_ref().is_some_and(|t| {
            t.width == frame.width && t.height == frame.height && t.format == frame.format
        });
        if matches {
            return;
        }

        debug!(
            width = frame.width,
            height = frame.height,
            format = ?frame.format,
            "creating frame textures"
        );

        let texture_format = match frame.format {
            PixelFormat::Bgra8 => wgpu::TextureFormat::Bgra8Unorm,
            PixelFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        };
        let descriptor = wgpu::TextureDescriptor {
            label: Some("tile-diff frame"),
            size: wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: texture_format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        };
        let pair = [
            self.device.create_texture(&descriptor),
            self.device.create_texture(&descriptor),
        ];
        let views = [
            pair[0].create_view(&wgpu::TextureViewDescriptor::default()),
            pair[1].create_view(&wgpu::TextureViewDescriptor::default()),
        ];

        let bind_group = |prev: usize| {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("tile-diff BG"),
                layout: &self.bgl,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&views[prev]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&views[1 - prev]),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: self.params_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: self.changed_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: self.brightness_buf.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 5,
                        resource: self.area_buf.as_entire_binding(),
                    },
                ],
            })
        };
        let bind_groups = [bind_group(0), bind_group(1)];

        self.textures = Some(FrameTextures {
            width: frame.width,
            height: frame.height,
            format: frame.format,
            pair,
            bind_groups,
        });
        self.parity = 0;
        self.seeded = false;
    }

    fn upload(&self, texture: &wgpu::Texture, frame: &Frame) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.stride),
                rows_per_image: Some(frame.height),
            },
            wgpu::Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }
}

impl DiffKernel for GpuDiffKernel {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn resize(&mut self, grid: &TileGrid) -> Result<()> {
        self.grid = grid.clone();
        let (params, changed, brightness, area, staging) =
            create_grid_buffers(&self.device, grid);
        self.params_buf = params;
        self.changed_buf = changed;
        self.brightness_buf = brightness;
        self.area_buf = area;
        self.staging_buf = staging;
        // Old bind groups point at the dropped buffers
        self.textures = None;
        self.parity = 0;
        self.seeded = false;
        self.dispatched = false;
        self.write_params();
        Ok(())
    }

    fn seed(&mut self, frame: &Frame) -> Result<()> {
        self.ensure_textures(frame);
        let textures = self.textures.as_ref().expect("textures just ensured");
        self.upload(&textures.pair[self.parity], frame);
        self.seeded = true;
        self.dispatched = false;
        Ok(())
    }

    fn is_seeded(&self) -> bool {
        self.seeded
    }

    fn dispatch(&mut self, frame: &Frame) -> Result<()> {
        let textures = self.textures.as_ref().expect("dispatch on unseeded kernel");
        debug_assert!(self.seeded, "dispatch on unseeded kernel");
        debug_assert!(
            textures.width == frame.width
                && textures.height == frame.height
                && textures.format == frame.format,
            "layout drift reaches dispatch"
        );

        // Current frame goes into the non-previous slot
        self.upload(&textures.pair[1 - self.parity], frame);

        let tiles = self.grid.tile_count() as u32;
        let workgroups = tiles.div_ceil(WG_SIZE);
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("tile-diff"),
            });

        // The tally is accumulated with atomics, so it must start at zero;
        // the per-tile buffers are fully overwritten by the pass.
        encoder.clear_buffer(&self.area_buf, 0, Some(self.area_bytes()));

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("tile_diff"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &textures.bind_groups[self.parity], &[]);
            pass.dispatch_workgroups(workgroups, 1, 1);
        }

        let changed_bytes = self.changed_bytes();
        let brightness_bytes = self.brightness_bytes();
        encoder.copy_buffer_to_buffer(&self.changed_buf, 0, &self.staging_buf, 0, changed_bytes);
        encoder.copy_buffer_to_buffer(
            &self.brightness_buf,
            0,
            &self.staging_buf,
            changed_bytes,
            brightness_bytes,
        );
        encoder.copy_buffer_to_buffer(
            &self.area_buf,
            0,
            &self.staging_buf,
            changed_bytes + brightness_bytes,
            self.area_bytes(),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        self.dispatched = true;
        Ok(())
    }

    fn readback(&mut self, signals: &mut TileSignals) -> Result<()> {
        debug_assert!(self.dispatched, "readback without dispatch");
        debug_assert_eq!(signals.changed_pixels.len(), self.grid.tile_count());
        debug_assert_eq!(signals.area_changed_tiles.len(), self.grid.area_count());

        let slice = self.staging_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        // Hard synchronization point: every shader write and copy has
        // completed once the map resolves.
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| EngineError::ReadbackFailed("map callback never fired".into()))?
            .map_err(|e| EngineError::DeviceLost(e.to_string()))?;

        {
            let mapped = slice.get_mapped_range();
            let changed = self.changed_bytes() as usize;
            let brightness = self.brightness_bytes() as usize;
            signals
                .changed_pixels
                .copy_from_slice(bytemuck::cast_slice(&mapped[..changed]));
            signals
                .brightness
                .copy_from_slice(bytemuck::cast_slice(&mapped[changed..changed + brightness]));
            signals.area_changed_tiles.copy_from_slice(bytemuck::cast_slice(
                &mapped[changed + brightness..],
            ));
        }
        self.staging_buf.unmap();

        // Frame rotation: the texture just compared as current becomes
        // the previous frame for the next tick
        self.parity = 1 - self.parity;
        self.dispatched = false;
        Ok(())
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            multisampled: false,
            view_dimension: wgpu::TextureViewDimension::D2,
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
        },
        count: None,
    }
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_grid_buffers(
    device: &wgpu::Device,
    grid: &TileGrid,
) -> (
    wgpu::Buffer,
    wgpu::Buffer,
    wgpu::Buffer,
    wgpu::Buffer,
    wgpu::Buffer,
) {
    let changed_bytes = (grid.tile_count() * std::mem::size_of::<u32>()) as u64;
    let brightness_bytes = (grid.tile_count() * std::mem::size_of::<f32>()) as u64;
    let area_bytes = (grid.area_count() * std::mem::size_of::<u32>()) as u64;

    let params = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-diff params"),
        size: std::mem::size_of::<DiffParams>() as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let changed = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-diff changed"),
        size: changed_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let brightness = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-diff brightness"),
        size: brightness_bytes,
        usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        mapped_at_creation: false,
    });
    let area = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-diff area tally"),
        size: area_bytes,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("tile-diff readback"),
        size: changed_bytes + brightness_bytes + area_bytes,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    (params, changed, brightness, area, staging)
}
