use std::process::ExitCode;

use boreal::ash::vk;
use boreal::{
    Allocator, Buffer, BufferUsage, Context, ContextCreateInfo, DEFAULT_FENCE_TIMEOUT,
    MemoryClass, submit_and_wait,
};

fn main() -> ExitCode {
    env_logger::init();

    let info = ContextCreateInfo {
        enable_validation: true,
        enable_callback: true,
        ..ContextCreateInfo::default()
    };

    match run(&info) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("Caught error when creating context: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(info: &ContextCreateInfo<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let context = Context::new(info)?;
    let allocator = Allocator::new(&context)?;

    // Upload a recognizable payload to a device-local buffer and copy it back.
    let payload: Vec<f32> = (0..2048).map(|i| (i as f32) * 0.5 - 311.0).collect();
    let bytes: &[u8] = bytemuck::cast_slice(&payload);

    let device_buffer = allocator.allocate(
        bytes.len() as vk::DeviceSize,
        BufferUsage::COPY_DST | BufferUsage::COPY_SRC | BufferUsage::STORAGE,
        MemoryClass::DeviceLocal,
    )?;

    let pool_info =
        vk::CommandPoolCreateInfo::default().queue_family_index(context.queue_family_index());
    let pool = unsafe { context.device().create_command_pool(&pool_info, None) }?;

    let result = round_trip(&context, &allocator, pool, &device_buffer, bytes);

    unsafe { context.device().destroy_command_pool(pool, None) };

    result
}

fn round_trip(
    context: &Context,
    allocator: &Allocator,
    pool: vk::CommandPool,
    device_buffer: &Buffer,
    bytes: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let alloc_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(2);
    let command_buffers = unsafe { context.device().allocate_command_buffers(&alloc_info) }?;
    let begin_info = vk::CommandBufferBeginInfo::default()
        .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

    // Staged upload. The staging buffer has to stay alive until the copy has
    // executed, so hold it across the submission.
    unsafe { context.device().begin_command_buffer(command_buffers[0], &begin_info) }?;
    let staging = allocator.add_copy_staging_to_buffer(command_buffers[0], device_buffer, bytes)?;
    submit_and_wait(
        context,
        &command_buffers[..1],
        DEFAULT_FENCE_TIMEOUT,
        "payload upload",
    )?;
    drop(staging);

    // Read it back through a host-visible buffer.
    let mut readback = allocator.allocate(
        bytes.len() as vk::DeviceSize,
        BufferUsage::COPY_DST,
        MemoryClass::HostVisible,
    )?;
    unsafe { context.device().begin_command_buffer(command_buffers[1], &begin_info) }?;
    let region = vk::BufferCopy::default().size(bytes.len() as vk::DeviceSize);
    unsafe {
        context.device().cmd_copy_buffer(
            command_buffers[1],
            device_buffer.handle(),
            readback.handle(),
            &[region],
        );
    }
    submit_and_wait(
        context,
        &command_buffers[1..],
        DEFAULT_FENCE_TIMEOUT,
        "payload readback",
    )?;

    let mut returned = vec![0u8; bytes.len()];
    readback.read(&mut returned, 0)?;

    if returned != bytes {
        return Err("readback does not match the uploaded payload".into());
    }

    log::info!("Round trip of {} bytes succeeded.", bytes.len());
    Ok(())
}
