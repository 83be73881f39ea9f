use std::fmt;
use std::panic::Location;

use ash::vk;

mod allocator;
mod buffer;
mod context;
mod debug;
mod submit;

pub use allocator::Allocator;
pub use ash;
pub use buffer::{Buffer, BufferUsage, MemoryClass};
pub use context::{Context, ContextCreateInfo};
pub use submit::{DEFAULT_FENCE_TIMEOUT, submit_and_wait};

pub enum GpuError {
    Loader(ash::LoadingError),
    Driver {
        call: &'static str,
        location: &'static Location<'static>,
        result: vk::Result,
    },
    NoCompatibleDevice,
    MissingDeviceFeature(&'static str),
    NoCompatibleQueueFamily,
    SubmissionTimeout { description: String },
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loader(err) => write!(f, "Failed to load the Vulkan driver: {}", err),
            Self::Driver {
                call,
                location,
                result,
            } => write!(f, "Vulkan call {} failed with {:?} at {}", call, result, location),
            Self::NoCompatibleDevice => {
                write!(f, "Could not find a physical device with all required extensions")
            }
            Self::MissingDeviceFeature(feature) => {
                write!(f, "Selected physical device does not report support for {}", feature)
            }
            Self::NoCompatibleQueueFamily => {
                write!(f, "Could not find a queue that supports graphics, compute, and transfer")
            }
            Self::SubmissionTimeout { description } => {
                write!(f, "Fence timed out waiting on command submission for {}", description)
            }
        }
    }
}

impl fmt::Debug for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl std::error::Error for GpuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Loader(err) => Some(err),
            _ => None,
        }
    }
}

/// Converts a raw driver result into [`GpuError::Driver`], capturing the call
/// name and the call site for the error message.
#[track_caller]
pub(crate) fn vk_check<T>(call: &'static str, result: Result<T, vk::Result>) -> Result<T, GpuError> {
    match result {
        Ok(value) => Ok(value),
        Err(result) => Err(GpuError::Driver {
            call,
            location: Location::caller(),
            result,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_check_passes_values_through() {
        let value = vk_check("noop", Ok::<u32, vk::Result>(17)).unwrap();
        assert_eq!(value, 17);
    }

    #[test]
    fn vk_check_captures_call_context() {
        let err = vk_check("create_fence", Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)).unwrap_err();
        match err {
            GpuError::Driver { call, result, .. } => {
                assert_eq!(call, "create_fence");
                assert_eq!(result, vk::Result::ERROR_DEVICE_LOST);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn driver_error_names_call_and_location() {
        let err = vk_check("queue_submit", Err::<(), _>(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("queue_submit"));
        assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
        assert!(message.contains("lib.rs"));
    }

    #[test]
    fn timeout_error_names_description() {
        let err = GpuError::SubmissionTimeout {
            description: "mesh upload".to_owned(),
        };
        assert!(err.to_string().contains("mesh upload"));
    }
}
