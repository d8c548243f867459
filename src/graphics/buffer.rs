use std::borrow::Cow;

use ash::vk;
use gpu_allocator::{
    vulkan::{Allocation, AllocationCreateDesc, AllocationScheme},
    MemoryLocation,
};

use crate::{
    error::{DeviceResultExt, SampleError},
    graphics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: usize,
    pub usage: vk::BufferUsageFlags,
    pub memory_location: MemoryLocation,
}

/// A device buffer with its own allocation. Not `Clone`; release it with
/// [`graphics::Context::destroy_buffer`].
#[derive(Debug)]
pub struct Buffer {
    pub name: Cow<'static, str>,
    pub handle: vk::Buffer,
    pub desc: BufferDesc,
    allocation: Allocation,
}

impl Buffer {
    #[inline]
    pub fn size(&self) -> u64 {
        self.desc.size as u64
    }

    pub fn mapped_slice(&self) -> Option<&[u8]> {
        self.allocation.mapped_slice().map(|slice| &slice[..self.desc.size])
    }

    pub fn mapped_slice_mut(&mut self) -> Option<&mut [u8]> {
        let size = self.desc.size;
        self.allocation.mapped_slice_mut().map(|slice| &mut slice[..size])
    }

    pub(super) fn create_impl(
        device: &graphics::Device,
        name: Cow<'static, str>,
        desc: &BufferDesc,
    ) -> Result<Buffer, SampleError> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(desc.size as u64)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.raw.create_buffer(&create_info, None) }.tagged("create_buffer")?;

        let requirements = unsafe { device.raw.get_buffer_memory_requirements(handle) };

        let allocation = match device.allocate(&AllocationCreateDesc {
            name: &name,
            requirements,
            location: desc.memory_location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(source) => {
                unsafe { device.raw.destroy_buffer(handle, None) };
                return Err(SampleError::DeviceAllocation { name, source });
            }
        };

        if let Err(result) = unsafe { device.raw.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) } {
            unsafe { device.raw.destroy_buffer(handle, None) };
            device.deallocate(allocation);
            return Err(SampleError::Device {
                tag: "bind_buffer_memory",
                result,
            });
        }

        device.set_debug_name(handle, &name);

        Ok(Buffer {
            name,
            handle,
            desc: *desc,
            allocation,
        })
    }

    pub(super) fn destroy_impl(device: &graphics::Device, buffer: Buffer) {
        unsafe {
            device.raw.destroy_buffer(buffer.handle, None);
        }
        device.deallocate(buffer.allocation);
    }
}

impl graphics::Context {
    pub fn create_buffer(&self, name: impl Into<Cow<'static, str>>, desc: &BufferDesc) -> Result<Buffer, SampleError> {
        Buffer::create_impl(&self.device, name.into(), desc)
    }

    pub fn create_buffer_init(
        &self,
        name: impl Into<Cow<'static, str>>,
        desc: &BufferDesc,
        init: &[u8],
    ) -> Result<Buffer, SampleError> {
        let mut desc = *desc;

        if desc.memory_location != MemoryLocation::CpuToGpu {
            desc.usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }

        let mut buffer = Buffer::create_impl(&self.device, name.into(), &desc)?;

        if let Err(err) = self.immediate_write_buffer(&mut buffer, init, 0) {
            Buffer::destroy_impl(&self.device, buffer);
            return Err(err);
        }

        Ok(buffer)
    }

    pub fn immediate_write_buffer(&self, buffer: &mut Buffer, data: &[u8], offset: usize) -> Result<(), SampleError> {
        if data.is_empty() {
            return Ok(());
        }

        let copy_size = usize::min(buffer.desc.size - offset, data.len());
        if let Some(mapped) = buffer.mapped_slice_mut() {
            mapped[offset..offset + copy_size].copy_from_slice(&data[..copy_size]);
            return Ok(());
        }

        let mut scratch_buffer = Buffer::create_impl(
            &self.device,
            "scratch_buffer".into(),
            &BufferDesc {
                size: copy_size,
                usage: vk::BufferUsageFlags::TRANSFER_SRC,
                memory_location: MemoryLocation::CpuToGpu,
            },
        )?;

        if let Some(mapped) = scratch_buffer.mapped_slice_mut() {
            mapped.copy_from_slice(&data[..copy_size]);
        }

        let dst_access = graphics::AccessKind::first_read_for_usage(buffer.desc.usage);
        let result = self.record_and_submit(|cmd| {
            cmd.copy_buffer(
                scratch_buffer.handle,
                buffer.handle,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: offset as u64,
                    size: copy_size as u64,
                }],
            );
            cmd.barrier(
                &[graphics::buffer_barrier(buffer, graphics::AccessKind::TransferWrite, dst_access)],
                &[],
                &[],
            );
        });

        Buffer::destroy_impl(&self.device, scratch_buffer);

        result
    }

    /// Copies the whole buffer back to the host. Waits for the copy to finish.
    pub fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>, SampleError> {
        if let Some(mapped) = buffer.mapped_slice() {
            return Ok(mapped.to_vec());
        }

        let readback_buffer = Buffer::create_impl(
            &self.device,
            format!("{}_readback", buffer.name).into(),
            &BufferDesc {
                size: buffer.desc.size,
                usage: vk::BufferUsageFlags::TRANSFER_DST,
                memory_location: MemoryLocation::GpuToCpu,
            },
        )?;

        let result = self.record_and_submit(|cmd| {
            cmd.barrier(
                &[graphics::buffer_barrier(buffer, graphics::AccessKind::TransferWrite, graphics::AccessKind::TransferRead)],
                &[],
                &[],
            );
            cmd.copy_buffer(
                buffer.handle,
                readback_buffer.handle,
                &[vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: buffer.size(),
                }],
            );
            cmd.barrier(
                &[graphics::buffer_barrier(
                    &readback_buffer,
                    graphics::AccessKind::TransferWrite,
                    graphics::AccessKind::HostRead,
                )],
                &[],
                &[],
            );
        });

        let bytes = result.map(|()| readback_buffer.mapped_slice().map(<[u8]>::to_vec).unwrap_or_default());

        Buffer::destroy_impl(&self.device, readback_buffer);

        bytes
    }

    pub fn destroy_buffer(&self, buffer: Buffer) {
        Buffer::destroy_impl(&self.device, buffer);
    }
}
