//! Froxel Buffer Upload
//!
//! The froxelizer never talks to a GPU device directly. It allocates and updates
//! its buffers through a [`GpuBufferService`]; [`WgpuBufferService`] is the wgpu
//! implementation.
//!
//! All three buffers are bound as uniform buffers and are write-only from the CPU
//! side.

use super::froxel_buffers::FroxelEntry;
use super::froxel_config::FroxelizerConfig;
use super::uniforms::FroxelUniforms;

/// Buffer allocation and update service.
pub trait GpuBufferService {
    type Buffer;

    /// Create a uniform buffer of `size` bytes that can be updated with
    /// [`update_buffer`](Self::update_buffer).
    fn create_uniform_buffer(&mut self, label: &str, size: u64) -> Self::Buffer;

    /// Write `data` into `buffer` starting at byte `offset`.
    fn update_buffer(&mut self, buffer: &Self::Buffer, offset: u64, data: &[u8]);
}

/// wgpu-backed buffer service.
pub struct WgpuBufferService<'a> {
    pub device: &'a wgpu::Device,
    pub queue: &'a wgpu::Queue,
}

impl<'a> WgpuBufferService<'a> {
    pub fn new(device: &'a wgpu::Device, queue: &'a wgpu::Queue) -> Self {
        Self { device, queue }
    }
}

impl GpuBufferService for WgpuBufferService<'_> {
    type Buffer = wgpu::Buffer;

    fn create_uniform_buffer(&mut self, label: &str, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    fn update_buffer(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        self.queue.write_buffer(buffer, offset, data);
    }
}

/// Round a byte count up to the copy alignment every backend accepts.
#[inline]
pub fn align_copy_size(size: usize) -> usize {
    size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize)
}

/// GPU buffers owned by one froxelizer.
#[derive(Debug)]
pub struct FroxelGpuBuffers<B> {
    /// One [`FroxelEntry`] per froxel
    pub froxel_buffer: B,
    /// Light index bytes
    pub record_buffer: B,
    /// [`FroxelUniforms`]
    pub uniform_buffer: B,
    froxel_buffer_size: u64,
    record_buffer_size: u64,
}

impl<B> FroxelGpuBuffers<B> {
    /// Allocate the buffers at the configured ceilings.
    pub fn new<S>(service: &mut S, config: &FroxelizerConfig) -> Self
    where
        S: GpuBufferService<Buffer = B>,
    {
        let froxel_buffer_size =
            config.froxel_buffer_entry_count as u64 * std::mem::size_of::<FroxelEntry>() as u64;
        let record_buffer_size = align_copy_size(config.record_buffer_entry_count as usize) as u64;
        Self {
            froxel_buffer: service.create_uniform_buffer("Froxel Buffer", froxel_buffer_size),
            record_buffer: service.create_uniform_buffer("Froxel Record Buffer", record_buffer_size),
            uniform_buffer: service.create_uniform_buffer(
                "Froxel Uniforms",
                std::mem::size_of::<FroxelUniforms>() as u64,
            ),
            froxel_buffer_size,
            record_buffer_size,
        }
    }

    #[inline]
    pub fn froxel_buffer_size(&self) -> u64 {
        self.froxel_buffer_size
    }

    #[inline]
    pub fn record_buffer_size(&self) -> u64 {
        self.record_buffer_size
    }
}
