use ash::vk;
use segfault_crate_tools::log_sink::LogSink;

use crate::backend::{DeviceDesc, GfxBackend};
use crate::error::{GfxError, GfxResult};
use crate::foundation::physical_device::{QueueFamilyIndices, SelectedDevice};
use crate::release::{Release, ReleaseStack};

/// 逻辑设备，以及从中取得的 graphics / present queue
///
/// 两个 family 相同时，两个 queue 是同一个 handle。
/// device 的销毁由 [`ReleaseStack`] 负责。
#[derive(Clone, Debug)]
pub struct GfxDevice {
    pub(crate) handle: vk::Device,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) physical_device_name: String,

    pub(crate) graphics_family: u32,
    pub(crate) present_family: u32,
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) present_queue: vk::Queue,
}

// 创建与销毁
impl GfxDevice {
    /// 每个不同的 queue family 创建一个 queue
    ///
    /// device 创建成功后立即压入 `releases`，后续取 queue 失败时由调用方回滚
    pub(crate) fn create(
        backend: &mut dyn GfxBackend,
        selected: &SelectedDevice,
        extensions: &[String],
        releases: &mut ReleaseStack,
        log: &dyn LogSink,
    ) -> GfxResult<Self> {
        let (graphics_family, present_family) = match selected.indices {
            QueueFamilyIndices {
                graphics: Some(graphics),
                present: Some(present),
            } => (graphics, present),
            indices => {
                log.error(format_args!("queue family indices are incomplete: {:?}", indices));
                return Err(GfxError::NoSuitableDevice { candidates: 1 });
            }
        };

        let desc = DeviceDesc {
            physical_device: selected.info.handle,
            queue_families: selected.indices.unique_families(),
            graphics_family,
            extensions: extensions.to_vec(),
        };
        let handle = backend.create_device(&desc).map_err(GfxError::vk("vkCreateDevice"))?;
        releases.push(Release::Device(handle));
        log.info(format_args!(
            "logical device created with {} queue(s), device exts: {:?}",
            desc.queue_families.len(),
            desc.extensions
        ));

        let graphics_queue =
            backend.device_queue(handle, graphics_family).map_err(GfxError::vk("vkGetDeviceQueue"))?;
        let present_queue = if present_family == graphics_family {
            graphics_queue
        } else {
            backend.device_queue(handle, present_family).map_err(GfxError::vk("vkGetDeviceQueue"))?
        };

        Ok(Self {
            handle,
            physical_device: selected.info.handle,
            physical_device_name: selected.info.name.clone(),
            graphics_family,
            present_family,
            graphics_queue,
            present_queue,
        })
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn handle(&self) -> vk::Device {
        self.handle
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    #[inline]
    pub fn physical_device_name(&self) -> &str {
        &self.physical_device_name
    }

    #[inline]
    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        QueueFamilyIndices {
            graphics: Some(self.graphics_family),
            present: Some(self.present_family),
        }
    }

    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// swapchain 创建时需要 CONCURRENT 共享的 family 列表，同一 family 时为空
    pub fn swapchain_sharing_families(&self) -> Vec<u32> {
        if self.graphics_family == self.present_family {
            Vec::new()
        } else {
            vec![self.graphics_family, self.present_family]
        }
    }
}
