use ash::prelude::VkResult;
use ash::vk;

use crate::commands::draw_command::DrawCommand;

const CLEAR_COLOR: vk::ClearColorValue = vk::ClearColorValue {
    float32: [0.05, 0.05, 0.08, 1.0],
};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// 单帧在飞的同步对象，以及录制这一帧所用的 command buffer
pub(super) struct FrameSync {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,

    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

// 创建与销毁
impl FrameSync {
    pub(super) fn new(device: &ash::Device, graphics_family: u32) -> VkResult<Self> {
        let mut sync = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight: vk::Fence::null(),
        };

        // vkDestroy* 可以接受 null handle，失败时直接整体销毁
        if let Err(e) = sync.create_objects(device, graphics_family) {
            sync.destroy(device);
            return Err(e);
        }
        Ok(sync)
    }

    fn create_objects(&mut self, device: &ash::Device, graphics_family: u32) -> VkResult<()> {
        unsafe {
            let pool_ci = vk::CommandPoolCreateInfo::default()
                .queue_family_index(graphics_family)
                .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
            self.command_pool = device.create_command_pool(&pool_ci, None)?;

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            self.command_buffer = device.allocate_command_buffers(&alloc_info)?[0];

            self.image_available = device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            self.render_finished = device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?;
            // 第一帧不需要等待
            let fence_ci = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
            self.in_flight = device.create_fence(&fence_ci, None)?;
        }
        Ok(())
    }

    /// 调用之前需要确保 device 已经 idle
    pub(super) fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_fence(self.in_flight, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_available, None);
            // command buffer 随 pool 一起释放
            device.destroy_command_pool(self.command_pool, None);
        }
    }
}

// getters
impl FrameSync {
    #[inline]
    pub(super) fn image_available(&self) -> vk::Semaphore {
        self.image_available
    }

    #[inline]
    pub(super) fn render_finished(&self) -> vk::Semaphore {
        self.render_finished
    }
}

// update
impl FrameSync {
    /// 等待上一帧的 GPU 工作完成
    ///
    /// timeout: nano seconds
    pub(super) fn wait(&self, device: &ash::Device, timeout: u64) -> VkResult<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, timeout) }
    }

    /// 录制并提交一帧：将 swapchain image 清空，然后转换为 present layout
    ///
    /// 没有 pipeline 的情况下，draw commands 只会被记录到日志中
    pub(super) fn record_and_submit(
        &self,
        device: &ash::Device,
        queue: vk::Queue,
        image: vk::Image,
        commands: &[DrawCommand],
    ) -> VkResult<()> {
        let cmd = self.command_buffer;
        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;

            let begin_info =
                vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;

            let to_transfer = [vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)];
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_transfer,
            );

            device.cmd_clear_color_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &CLEAR_COLOR,
                &[COLOR_RANGE],
            );
            for (i, command) in commands.iter().enumerate() {
                log::trace!("draw #{}: {:?}", i, command);
            }

            let to_present = [vk::ImageMemoryBarrier::default()
                .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
                .dst_access_mask(vk::AccessFlags::empty())
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(COLOR_RANGE)];
            device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_present,
            );

            device.end_command_buffer(cmd)?;

            let wait_semaphores = [self.image_available];
            let wait_stages = [vk::PipelineStageFlags::TRANSFER];
            let command_buffers = [cmd];
            let signal_semaphores = [self.render_finished];
            let submit_info = vk::SubmitInfo::default()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&command_buffers)
                .signal_semaphores(&signal_semaphores);

            // 录制全部成功之后才 reset，否则 fence 永远不会被 signal，下一帧的 wait 会一直阻塞
            device.reset_fences(&[self.in_flight])?;
            device.queue_submit(queue, &[submit_info], self.in_flight)
        }
    }
}
