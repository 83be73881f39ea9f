use std::sync::Arc;

use ash::vk;
use vk_mem as vkm;
use vkm::Alloc;

use crate::{Buffer, BufferUsage, Context, GpuError, MemoryClass, vk_check};

pub(crate) struct RawAllocator {
    pub(crate) vkm: vkm::Allocator,
    pub(crate) device: ash::Device,
}

/// Creates GPU buffers through the allocation library. Bound to the context
/// it was built from; drop it (and every buffer it produced) before the
/// context goes away.
pub struct Allocator {
    raw: Arc<RawAllocator>,
}

impl Allocator {
    /// Binds the allocation library to the context's instance, physical
    /// device, and logical device, so the library issues every driver call
    /// through the same dispatch tables the context uses. Device-address
    /// capable allocations are enabled unconditionally.
    pub fn new(context: &Context) -> Result<Self, GpuError> {
        let mut create_info = vkm::AllocatorCreateInfo::new(
            context.instance(),
            context.device(),
            context.physical_device(),
        );
        create_info.vulkan_api_version = vk::API_VERSION_1_2;
        create_info.flags = vkm::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;

        let allocator = vk_check("create_allocator", unsafe {
            vkm::Allocator::new(create_info)
        })?;

        Ok(Self {
            raw: Arc::new(RawAllocator {
                vkm: allocator,
                device: context.device().clone(),
            }),
        })
    }

    /// Creates one buffer of `size` bytes backed by memory of the requested
    /// class. The memory type itself is the library's choice.
    pub fn allocate(
        &self,
        size: vk::DeviceSize,
        usage: BufferUsage,
        class: MemoryClass,
    ) -> Result<Buffer, GpuError> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.into());

        let create_info = vkm::AllocationCreateInfo {
            usage: class.into(),
            flags: class.into(),
            ..Default::default()
        };

        let (handle, allocation) = vk_check("create_buffer", unsafe {
            self.raw.vkm.create_buffer(&buffer_info, &create_info)
        })?;

        Ok(Buffer {
            handle,
            allocation,
            size,
            allocator: self.raw.clone(),
        })
    }

    /// Records a host-to-device upload: allocates a host staging buffer,
    /// fills it with `data`, and records a copy from it into `dst` on the
    /// given command buffer. Nothing is submitted here. The staging buffer is
    /// returned to the caller, who must keep it alive until the recorded copy
    /// has executed on the device.
    pub fn add_copy_staging_to_buffer(
        &self,
        command_buffer: vk::CommandBuffer,
        dst: &Buffer,
        data: &[u8],
    ) -> Result<Buffer, GpuError> {
        let mut staging = self.allocate(
            data.len() as vk::DeviceSize,
            BufferUsage::COPY_SRC,
            MemoryClass::HostOnly,
        )?;
        staging.write(data, 0)?;

        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);
        unsafe {
            self.raw.device.cmd_copy_buffer(
                command_buffer,
                staging.handle(),
                dst.handle(),
                &[region],
            );
        }

        Ok(staging)
    }
}
