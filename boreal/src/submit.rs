use ash::vk;

use crate::{Context, GpuError, vk_check};

/// Default fence wait of 60 seconds, in nanoseconds.
pub const DEFAULT_FENCE_TIMEOUT: u64 = 60_000_000_000;

/// Ends the given command buffers, submits them as one batch to the context's
/// primary queue, and blocks until the fence signals or `timeout` nanoseconds
/// elapse. `description` only appears in the timeout error message.
pub fn submit_and_wait(
    context: &Context,
    command_buffers: &[vk::CommandBuffer],
    timeout: u64,
    description: &str,
) -> Result<(), GpuError> {
    let device = context.device();

    for &command_buffer in command_buffers {
        vk_check("end_command_buffer", unsafe {
            device.end_command_buffer(command_buffer)
        })?;
    }

    let fence = vk_check("create_fence", unsafe {
        device.create_fence(&vk::FenceCreateInfo::default(), None)
    })?;

    let submit_info = vk::SubmitInfo::default().command_buffers(command_buffers);
    let submitted = vk_check("queue_submit", unsafe {
        device.queue_submit(context.queue(), &[submit_info], fence)
    });

    let waited = submitted.and_then(|()| {
        match unsafe { device.wait_for_fences(&[fence], true, timeout) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GpuError::SubmissionTimeout {
                description: description.to_owned(),
            }),
            Err(result) => vk_check("wait_for_fences", Err(result)),
        }
    });

    unsafe { device.destroy_fence(fence, None) };

    waited
}
