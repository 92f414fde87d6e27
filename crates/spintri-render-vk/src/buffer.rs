// SPDX-License-Identifier: CEPL-1.0
//! Host-visible buffers: vertex data uploaded once, uniforms written through
//! a mapping that lives as long as the buffer.

use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;

use crate::context::VkContext;
use crate::error::{GpuError, Result};
use crate::memory::allocate_for;

/// The device calls a [`GpuBuffer`] makes over its lifetime.
pub trait BufferDevice {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;
    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer>;
    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements;
    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> Result<vk::DeviceMemory>;
    unsafe fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()>;
    /// Maps `size` bytes from offset zero.
    unsafe fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut c_void>;
    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory);
    unsafe fn destroy_buffer(&self, buffer: vk::Buffer);
    unsafe fn free_memory(&self, memory: vk::DeviceMemory);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Uniform,
}

impl BufferUsage {
    pub fn flags(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }
}

/// Rejects writes larger than what the caller asked for at creation, even
/// when the driver rounded the allocation up.
pub fn check_write(len: usize, capacity: vk::DeviceSize) -> Result<()> {
    if len as u64 > capacity {
        return Err(GpuError::BufferOverflow { len, capacity });
    }
    Ok(())
}

pub struct GpuBuffer<D: BufferDevice = VkContext> {
    device: Arc<D>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocated: vk::DeviceSize,
    usage: BufferUsage,
    mapped: Option<NonNull<c_void>>,
}

impl<D: BufferDevice> GpuBuffer<D> {
    pub fn new(
        device: &Arc<D>,
        size: vk::DeviceSize,
        usage: BufferUsage,
        props: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage: usage.flags(),
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        unsafe {
            let buffer = device.create_buffer(&bci)?;
            let req = device.buffer_memory_requirements(buffer);
            let memory = match allocate_for(&**device, &req, props) {
                Ok(m) => m,
                Err(e) => {
                    device.destroy_buffer(buffer);
                    return Err(e);
                }
            };
            if let Err(e) = device.bind_buffer_memory(buffer, memory) {
                device.free_memory(memory);
                device.destroy_buffer(buffer);
                return Err(e);
            }
            Ok(Self {
                device: device.clone(),
                buffer,
                memory,
                size,
                allocated: req.size,
                usage,
                mapped: None,
            })
        }
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size requested at creation.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the backing allocation, at least [`size`](Self::size).
    pub fn allocated(&self) -> vk::DeviceSize {
        self.allocated
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }

    /// Map, copy, unmap.
    pub fn upload(&mut self, bytes: &[u8]) -> Result<()> {
        check_write(bytes.len(), self.size)?;
        if let Some(ptr) = self.mapped {
            unsafe { copy_to(ptr, bytes) };
            return Ok(());
        }
        unsafe {
            let ptr = self.map_whole()?;
            copy_to(ptr, bytes);
            self.device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Maps the whole allocation until the buffer is dropped. Idempotent.
    pub fn map_persistent(&mut self) -> Result<()> {
        if self.mapped.is_some() {
            return Ok(());
        }
        self.mapped = Some(unsafe { self.map_whole() }?);
        Ok(())
    }

    pub fn write_mapped(&mut self, bytes: &[u8]) -> Result<()> {
        let ptr = self.mapped.ok_or(GpuError::NotMapped)?;
        check_write(bytes.len(), self.size)?;
        unsafe { copy_to(ptr, bytes) };
        Ok(())
    }

    pub fn write_pod<T: Pod>(&mut self, value: &T) -> Result<()> {
        self.write_mapped(bytemuck::bytes_of(value))
    }

    // A null pointer from a successful map is undone and reported.
    unsafe fn map_whole(&self) -> Result<NonNull<c_void>> {
        let ptr = unsafe { self.device.map_memory(self.memory, self.allocated) }?;
        match NonNull::new(ptr) {
            Some(ptr) => Ok(ptr),
            None => {
                unsafe { self.device.unmap_memory(self.memory) };
                Err(GpuError::NullMapping)
            }
        }
    }
}

unsafe fn copy_to(dst: NonNull<c_void>, bytes: &[u8]) {
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst.as_ptr().cast::<u8>(), bytes.len()) };
}

impl<D: BufferDevice> Drop for GpuBuffer<D> {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer);
            self.device.free_memory(self.memory);
        }
    }
}
