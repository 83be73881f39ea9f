use std::fmt;
use std::ptr;
use std::sync::Arc;

use ash::vk;
use vk_mem as vkm;
use vkm::Alloc;

use crate::allocator::RawAllocator;
use crate::{Context, GpuError, vk_check};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const COPY_SRC = 1 << 0;
        const COPY_DST = 1 << 1;
        const INDEX = 1 << 2;
        const VERTEX = 1 << 3;
        const UNIFORM = 1 << 4;
        const STORAGE = 1 << 5;
        const DEVICE_ADDRESS = 1 << 6;
        const ACCEL_STORAGE = 1 << 7;
        const ACCEL_BUILD_INPUT = 1 << 8;
        const SHADER_BINDING_TABLE = 1 << 9;
    }
}

impl From<BufferUsage> for vk::BufferUsageFlags {
    fn from(usage: BufferUsage) -> Self {
        let mut vk_usage = vk::BufferUsageFlags::empty();
        if usage.contains(BufferUsage::COPY_SRC) {
            vk_usage |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if usage.contains(BufferUsage::COPY_DST) {
            vk_usage |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            vk_usage |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if usage.contains(BufferUsage::VERTEX) {
            vk_usage |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            vk_usage |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if usage.contains(BufferUsage::STORAGE) {
            vk_usage |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if usage.contains(BufferUsage::DEVICE_ADDRESS) {
            vk_usage |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
        if usage.contains(BufferUsage::ACCEL_STORAGE) {
            vk_usage |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
        }
        if usage.contains(BufferUsage::ACCEL_BUILD_INPUT) {
            vk_usage |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        }
        if usage.contains(BufferUsage::SHADER_BINDING_TABLE) {
            vk_usage |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
        }
        vk_usage
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

/// Which memory the allocation library should back a buffer with. The exact
/// memory type is the library's choice; this only states the access intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// GPU-local memory, not necessarily mappable.
    DeviceLocal,
    /// Whatever the library prefers, kept mappable from the host.
    HostVisible,
    /// Host-side memory, for staging and readback.
    HostOnly,
}

impl From<MemoryClass> for vkm::MemoryUsage {
    fn from(class: MemoryClass) -> Self {
        match class {
            MemoryClass::DeviceLocal => vkm::MemoryUsage::AutoPreferDevice,
            MemoryClass::HostVisible => vkm::MemoryUsage::Auto,
            MemoryClass::HostOnly => vkm::MemoryUsage::AutoPreferHost,
        }
    }
}

impl From<MemoryClass> for vkm::AllocationCreateFlags {
    fn from(class: MemoryClass) -> Self {
        match class {
            MemoryClass::DeviceLocal => vkm::AllocationCreateFlags::empty(),
            MemoryClass::HostVisible => vkm::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            MemoryClass::HostOnly => vkm::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
        }
    }
}

/// Exclusively owned buffer plus its allocation. Dropping the handle frees
/// both; there is no copy path, so at most one live handle ever references a
/// given allocation.
pub struct Buffer {
    pub(crate) handle: vk::Buffer,
    pub(crate) allocation: vkm::Allocation,
    pub(crate) size: vk::DeviceSize,
    pub(crate) allocator: Arc<RawAllocator>,
}

impl Buffer {
    pub fn handle(&self) -> vk::Buffer {
        self.handle
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// GPU-visible address of the buffer. The buffer must have been created
    /// with [`BufferUsage::DEVICE_ADDRESS`].
    pub fn device_address(&self, context: &Context) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::default().buffer(self.handle);
        unsafe { context.device().get_buffer_device_address(&info) }
    }

    /// Maps the allocation for host access. Mapping memory that is not host
    /// visible is rejected by the allocation library, not checked here.
    pub fn map(&mut self) -> Result<*mut u8, GpuError> {
        vk_check("map_memory", unsafe {
            self.allocator.vkm.map_memory(&mut self.allocation)
        })
    }

    pub fn unmap(&mut self) {
        unsafe { self.allocator.vkm.unmap_memory(&mut self.allocation) };
    }

    pub fn write(&mut self, data: &[u8], offset: usize) -> Result<(), GpuError> {
        let mapping = self.map()?;
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), mapping.add(offset), data.len());
        }
        self.unmap();
        Ok(())
    }

    pub fn read(&mut self, out: &mut [u8], offset: usize) -> Result<(), GpuError> {
        let mapping = self.map()?;
        unsafe {
            ptr::copy_nonoverlapping(mapping.add(offset), out.as_mut_ptr(), out.len());
        }
        self.unmap();
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.size)
            .finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator
                .vkm
                .destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_maps_to_driver_flags() {
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::COPY_SRC),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::COPY_DST | BufferUsage::STORAGE),
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::STORAGE_BUFFER
        );
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::DEVICE_ADDRESS),
            vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
        );
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::SHADER_BINDING_TABLE),
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
        );
        assert_eq!(
            vk::BufferUsageFlags::from(BufferUsage::empty()),
            vk::BufferUsageFlags::empty()
        );
    }

    #[test]
    fn memory_classes_map_to_library_usage() {
        assert!(matches!(
            vkm::MemoryUsage::from(MemoryClass::DeviceLocal),
            vkm::MemoryUsage::AutoPreferDevice
        ));
        assert!(matches!(
            vkm::MemoryUsage::from(MemoryClass::HostVisible),
            vkm::MemoryUsage::Auto
        ));
        assert!(matches!(
            vkm::MemoryUsage::from(MemoryClass::HostOnly),
            vkm::MemoryUsage::AutoPreferHost
        ));
    }

    #[test]
    fn host_classes_request_host_access() {
        assert!(vkm::AllocationCreateFlags::from(MemoryClass::DeviceLocal).is_empty());
        assert!(
            vkm::AllocationCreateFlags::from(MemoryClass::HostOnly)
                .contains(vkm::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE)
        );
        assert!(
            vkm::AllocationCreateFlags::from(MemoryClass::HostVisible)
                .contains(vkm::AllocationCreateFlags::HOST_ACCESS_RANDOM)
        );
    }
}
