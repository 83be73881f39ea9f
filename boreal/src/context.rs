use std::ffi::{self, CStr};
use std::fmt;

use ash::vk;

use crate::{GpuError, debug, vk_check};

/// Switches for [`Context::new`]. The identity strings end up in the
/// driver-visible application info of every created instance.
pub struct ContextCreateInfo<'a> {
    pub app_name: &'a str,
    pub engine_name: &'a str,
    pub enable_validation: bool,
    pub enable_callback: bool,
    /// Reserved; not yet consulted during device creation.
    pub enable_robust_buffer_access: bool,
}

impl Default for ContextCreateInfo<'_> {
    fn default() -> Self {
        Self {
            app_name: env!("CARGO_PKG_NAME"),
            engine_name: concat!(env!("CARGO_PKG_NAME"), "_engine"),
            enable_validation: false,
            enable_callback: false,
            enable_robust_buffer_access: false,
        }
    }
}

/// Owns the driver instance, the selected physical device, the logical
/// device, and the primary queue. Created once per process; everything else
/// in this crate borrows it.
pub struct Context {
    _entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue: vk::Queue,
    transfer_queue: vk::Queue,
    compute_queue: vk::Queue,
    queue_family_index: u32,
    transfer_queue_family_index: u32,
    compute_queue_family_index: u32,
}

fn required_instance_layers(info: &ContextCreateInfo<'_>) -> Vec<&'static CStr> {
    if info.enable_validation {
        vec![c"VK_LAYER_KHRONOS_validation"]
    } else {
        Vec::new()
    }
}

fn required_instance_extensions(info: &ContextCreateInfo<'_>) -> Vec<&'static CStr> {
    if info.enable_callback {
        vec![ash::ext::debug_utils::NAME]
    } else {
        Vec::new()
    }
}

pub(crate) fn required_device_extensions() -> [&'static CStr; 3] {
    [
        ash::khr::deferred_host_operations::NAME,
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
    ]
}

pub(crate) fn supports_extensions(
    available: &[vk::ExtensionProperties],
    required: &[&CStr],
) -> bool {
    required.iter().all(|required_name| {
        available.iter().any(|extension| {
            extension
                .extension_name_as_c_str()
                .is_ok_and(|name| name == *required_name)
        })
    })
}

pub(crate) fn score_queue_flags(flags: vk::QueueFlags) -> u32 {
    u32::from(flags.contains(vk::QueueFlags::COMPUTE))
        + u32::from(flags.contains(vk::QueueFlags::GRAPHICS))
        + u32::from(flags.contains(vk::QueueFlags::TRANSFER))
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct QueueFamilyRank {
    pub family_index: u32,
    pub score: u32,
    pub queue_count: u32,
    pub flags: vk::QueueFlags,
}

/// Ranks queue families ascending by how many of the compute, graphics, and
/// transfer bits they carry, so the most specialized families come first.
/// The stable sort keeps family-index order among equal scores. Used as a
/// diagnostic today; dedicated transfer/compute queue assignment will pick
/// from this ranking.
pub(crate) fn rank_queue_families(families: &[vk::QueueFamilyProperties]) -> Vec<QueueFamilyRank> {
    let mut ranking: Vec<QueueFamilyRank> = families
        .iter()
        .enumerate()
        .map(|(family_index, family)| QueueFamilyRank {
            family_index: family_index as u32,
            score: score_queue_flags(family.queue_flags),
            queue_count: family.queue_count,
            flags: family.queue_flags,
        })
        .collect();
    ranking.sort_by_key(|rank| rank.score);
    ranking
}

/// First family, in family-index order, that supports graphics, compute, and
/// transfer simultaneously.
pub(crate) fn find_combined_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|family| {
            family.queue_flags.contains(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
            )
        })
        .map(|index| index as u32)
}

fn package_version() -> u32 {
    let major: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    let patch: u32 = env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or(0);
    vk::make_api_version(0, major, minor, patch)
}

impl Context {
    /// Builds the whole execution context: instance, optional diagnostic
    /// messenger, physical device, logical device, and the combined
    /// graphics+compute+transfer queue. Any missing capability fails the
    /// entire construction; no partial context exists.
    pub fn new(info: &ContextCreateInfo<'_>) -> Result<Self, GpuError> {
        let entry = unsafe { ash::Entry::load() }.map_err(GpuError::Loader)?;

        let app_name = ffi::CString::new(info.app_name).expect("Convert app name to cstring");
        let engine_name =
            ffi::CString::new(info.engine_name).expect("Convert engine name to cstring");

        let layer_ptrs: Vec<*const ffi::c_char> = required_instance_layers(info)
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        let extension_ptrs: Vec<*const ffi::c_char> = required_instance_extensions(info)
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let version = package_version();
        let application_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(version)
            .engine_name(&engine_name)
            .engine_version(version)
            .api_version(vk::API_VERSION_1_2);

        // Chaining the messenger descriptor into instance creation captures
        // messages emitted while the instance itself is being created.
        let mut debug_info = debug::messenger_create_info();

        let mut instance_info = vk::InstanceCreateInfo::default()
            .application_info(&application_info)
            .enabled_layer_names(&layer_ptrs)
            .enabled_extension_names(&extension_ptrs);
        if info.enable_callback {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        let instance = vk_check("create_instance", unsafe {
            entry.create_instance(&instance_info, None)
        })?;

        log::info!("Created instance.");

        let debug_messenger = if info.enable_callback {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = vk_check("create_debug_utils_messenger", unsafe {
                loader.create_debug_utils_messenger(&debug_info, None)
            })?;
            Some((loader, messenger))
        } else {
            None
        };

        let required_extensions = required_device_extensions();
        let required_extension_ptrs: Vec<*const ffi::c_char> = required_extensions
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let physical_devices = vk_check("enumerate_physical_devices", unsafe {
            instance.enumerate_physical_devices()
        })?;

        let mut selected = None;
        for physical_device in physical_devices {
            let available = vk_check("enumerate_device_extension_properties", unsafe {
                instance.enumerate_device_extension_properties(physical_device)
            })?;
            if supports_extensions(&available, &required_extensions) {
                selected = Some(physical_device);
                break;
            }
        }
        let physical_device = selected.ok_or(GpuError::NoCompatibleDevice)?;

        let mut features11 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
        let base_features = {
            let mut features2 = vk::PhysicalDeviceFeatures2::default()
                .push_next(&mut features11)
                .push_next(&mut features12)
                .push_next(&mut accel_features)
                .push_next(&mut rt_features);
            unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
            features2.features
        };

        let (device_name, max_ray_recursion_depth) = {
            let mut properties11 = vk::PhysicalDeviceVulkan11Properties::default();
            let mut properties12 = vk::PhysicalDeviceVulkan12Properties::default();
            let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
            let mut properties2 = vk::PhysicalDeviceProperties2::default()
                .push_next(&mut properties11)
                .push_next(&mut properties12)
                .push_next(&mut rt_properties);
            unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };
            let name = properties2
                .properties
                .device_name_as_c_str()
                .unwrap_or(c"<unknown>")
                .to_string_lossy()
                .into_owned();
            (name, rt_properties.max_ray_recursion_depth)
        };

        log::info!("Found compatible physical device: {}", device_name);
        log::debug!("Max ray recursion depth: {}", max_ray_recursion_depth);

        if accel_features.acceleration_structure != vk::TRUE {
            return Err(GpuError::MissingDeviceFeature("accelerationStructure"));
        }
        if rt_features.ray_tracing_pipeline != vk::TRUE {
            return Err(GpuError::MissingDeviceFeature("rayTracingPipeline"));
        }

        let queue_family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

        // One request per family, asking for the family's full queue count
        // with every queue at equal priority.
        let queue_priorities: Vec<Vec<f32>> = queue_family_properties
            .iter()
            .map(|family| vec![1.0; family.queue_count as usize])
            .collect();
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_priorities
            .iter()
            .enumerate()
            .map(|(family_index, priorities)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family_index as u32)
                    .queue_priorities(priorities)
            })
            .collect();

        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .features(base_features)
            .push_next(&mut features11)
            .push_next(&mut features12)
            .push_next(&mut accel_features)
            .push_next(&mut rt_features);

        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&required_extension_ptrs)
            .push_next(&mut features2);

        let device = vk_check("create_device", unsafe {
            instance.create_device(physical_device, &device_info, None)
        })?;

        log::info!("Created logical device.");

        for rank in rank_queue_families(&queue_family_properties) {
            log::debug!(
                "Queue family {} scores {} ({:?}, {} queues)",
                rank.family_index,
                rank.score,
                rank.flags,
                rank.queue_count,
            );
        }

        let queue_family_index = find_combined_queue_family(&queue_family_properties)
            .ok_or(GpuError::NoCompatibleQueueFamily)?;
        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        log::info!("Found graphics, compute, and transfer queue.");
        log::info!("Finished creating Vulkan context.");

        Ok(Self {
            _entry: entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            queue,
            transfer_queue: vk::Queue::null(),
            compute_queue: vk::Queue::null(),
            queue_family_index,
            transfer_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            compute_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        })
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Not assigned yet; returns a null queue until dedicated transfer queue
    /// selection lands.
    pub fn transfer_queue(&self) -> vk::Queue {
        self.transfer_queue
    }

    /// Not assigned yet; returns a null queue until dedicated compute queue
    /// selection lands.
    pub fn compute_queue(&self) -> vk::Queue {
        self.compute_queue
    }

    pub fn transfer_queue_family_index(&self) -> u32 {
        self.transfer_queue_family_index
    }

    pub fn compute_queue_family_index(&self) -> u32 {
        self.compute_queue_family_index
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device.handle())
            .field("queue_family_index", &self.queue_family_index)
            .finish()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags, queue_count: u32) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties::default()
            .queue_flags(flags)
            .queue_count(queue_count)
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut properties = vk::ExtensionProperties::default();
        for (dst, src) in properties
            .extension_name
            .iter_mut()
            .zip(name.to_bytes_with_nul())
        {
            *dst = *src as ffi::c_char;
        }
        properties
    }

    #[test]
    fn extension_superset_is_accepted() {
        let available = [
            extension(ash::khr::swapchain::NAME),
            extension(ash::khr::deferred_host_operations::NAME),
            extension(ash::khr::acceleration_structure::NAME),
            extension(ash::khr::ray_tracing_pipeline::NAME),
        ];
        assert!(supports_extensions(
            &available,
            &required_device_extensions()
        ));
    }

    #[test]
    fn missing_extension_is_rejected() {
        let available = [
            extension(ash::khr::deferred_host_operations::NAME),
            extension(ash::khr::acceleration_structure::NAME),
        ];
        assert!(!supports_extensions(
            &available,
            &required_device_extensions()
        ));
    }

    #[test]
    fn empty_requirement_is_accepted() {
        assert!(supports_extensions(&[], &[]));
    }

    #[test]
    fn scores_count_capability_bits() {
        assert_eq!(score_queue_flags(vk::QueueFlags::empty()), 0);
        assert_eq!(score_queue_flags(vk::QueueFlags::TRANSFER), 1);
        assert_eq!(
            score_queue_flags(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            2
        );
        assert_eq!(
            score_queue_flags(
                vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER
            ),
            3
        );
        // Bits outside the three capabilities do not count.
        assert_eq!(score_queue_flags(vk::QueueFlags::SPARSE_BINDING), 0);
    }

    #[test]
    fn ranking_sorts_ascending_and_is_stable() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let families = [
            family(all, 1),
            family(vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 4),
            family(all, 8),
        ];
        let ranking = rank_queue_families(&families);
        let order: Vec<u32> = ranking.iter().map(|rank| rank.family_index).collect();
        assert_eq!(order, vec![1, 2, 0, 3]);
        assert_eq!(ranking[0].score, 1);
        assert_eq!(ranking[3].queue_count, 8);
    }

    #[test]
    fn selection_picks_first_combined_family_in_index_order() {
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let families = [family(vk::QueueFlags::TRANSFER, 2), family(all, 1), family(all, 16)];
        assert_eq!(find_combined_queue_family(&families), Some(1));
    }

    #[test]
    fn ranking_never_changes_the_selected_family() {
        // The transfer-only family ranks first, but selection scans in
        // family-index order and must ignore the ranking entirely.
        let all = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let families = [family(vk::QueueFlags::TRANSFER, 2), family(all, 1), family(all, 16)];
        let ranking = rank_queue_families(&families);
        assert_eq!(ranking[0].family_index, 0);
        assert_eq!(find_combined_queue_family(&families), Some(1));
    }

    #[test]
    fn no_combined_family_yields_none() {
        let families = [
            family(vk::QueueFlags::TRANSFER, 1),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, 2),
            family(vk::QueueFlags::GRAPHICS, 1),
        ];
        assert_eq!(find_combined_queue_family(&families), None);
    }

    #[test]
    fn validation_layer_tracks_the_switch() {
        let on = ContextCreateInfo {
            enable_validation: true,
            ..ContextCreateInfo::default()
        };
        assert_eq!(
            required_instance_layers(&on),
            vec![c"VK_LAYER_KHRONOS_validation"]
        );
        assert!(required_instance_layers(&ContextCreateInfo::default()).is_empty());
    }

    #[test]
    fn debug_utils_extension_tracks_the_switch() {
        let on = ContextCreateInfo {
            enable_callback: true,
            ..ContextCreateInfo::default()
        };
        assert_eq!(
            required_instance_extensions(&on),
            vec![ash::ext::debug_utils::NAME]
        );
        assert!(required_instance_extensions(&ContextCreateInfo::default()).is_empty());
    }
}
