use std::fmt;

use ash::vk;
use itertools::Itertools;
use segfault_crate_tools::log_sink::LogSink;

use crate::backend::GfxBackend;
use crate::error::{GfxError, GfxResult};
use crate::swapchain::support::SwapchainSupport;

/// 一个 queue family 的属性
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyProps {
    pub index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
    /// 是否可以向当前 surface present
    pub present_supported: bool,
}

/// 表示一张物理显卡
#[derive(Clone, Debug)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyProps>,
    /// 当前 gpu 支持的 device extensions
    pub extensions: Vec<String>,
}

impl PhysicalDeviceInfo {
    /// graphics 使用第一个具有 GRAPHICS 能力的 family；
    /// present 优先与 graphics 使用同一个 family，否则使用第一个可以 present 的 family
    pub fn queue_family_indices(&self) -> QueueFamilyIndices {
        let graphics = self
            .queue_families
            .iter()
            .find(|family| family.queue_count > 0 && family.queue_flags.contains(vk::QueueFlags::GRAPHICS));

        let present = graphics
            .filter(|family| family.present_supported)
            .or_else(|| self.queue_families.iter().find(|family| family.queue_count > 0 && family.present_supported));

        QueueFamilyIndices {
            graphics: graphics.map(|family| family.index),
            present: present.map(|family| family.index),
        }
    }

    /// `required` 中当前 gpu 不支持的 extensions
    pub fn missing_extensions<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|ext| !self.extensions.iter().any(|supported| supported == *ext))
            .map(String::as_str)
            .collect_vec()
    }

    #[inline]
    /// 当前 gpu 是否是独立显卡
    pub fn is_descrete_gpu(&self) -> bool {
        self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }
}

/// graphics queue 和 present queue 所在的 family
///
/// 两者可能是同一个 family
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    /// graphics 和 present 是否为同一个 family
    #[inline]
    pub fn is_aliased(&self) -> bool {
        self.is_complete() && self.graphics == self.present
    }

    /// 去重之后的 family 列表，用于创建 device queue
    pub fn unique_families(&self) -> Vec<u32> {
        [self.graphics, self.present].into_iter().flatten().unique().collect_vec()
    }
}

/// 物理设备不满足要求的原因
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Unsuitable {
    IncompleteQueueFamilies(QueueFamilyIndices),
    MissingExtensions(Vec<String>),
    InadequateSwapchain { formats: usize, present_modes: usize },
}

impl fmt::Display for Unsuitable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unsuitable::IncompleteQueueFamilies(indices) => write!(
                f,
                "missing required queue families (graphics: {:?}, present: {:?})",
                indices.graphics, indices.present
            ),
            Unsuitable::MissingExtensions(exts) => write!(f, "missing device extensions: {}", exts.join(", ")),
            Unsuitable::InadequateSwapchain { formats, present_modes } => write!(
                f,
                "insufficient swapchain support ({} formats, {} present modes)",
                formats, present_modes
            ),
        }
    }
}

/// 选中的物理设备，以及选择过程中得到的查询结果
#[derive(Clone, Debug)]
pub struct SelectedDevice {
    pub info: PhysicalDeviceInfo,
    pub indices: QueueFamilyIndices,
    pub support: SwapchainSupport,
}

/// 检查物理设备是否满足要求
pub fn check_suitability(
    info: &PhysicalDeviceInfo,
    support: &SwapchainSupport,
    required_extensions: &[String],
) -> Result<QueueFamilyIndices, Unsuitable> {
    let indices = info.queue_family_indices();
    if !indices.is_complete() {
        return Err(Unsuitable::IncompleteQueueFamilies(indices));
    }

    let missing = info.missing_extensions(required_extensions);
    if !missing.is_empty() {
        return Err(Unsuitable::MissingExtensions(missing.into_iter().map(str::to_string).collect_vec()));
    }

    if !support.is_adequate() {
        return Err(Unsuitable::InadequateSwapchain {
            formats: support.formats.len(),
            present_modes: support.present_modes.len(),
        });
    }

    Ok(indices)
}

/// 按枚举顺序选择第一个满足要求的物理设备
pub(crate) fn select_physical_device(
    backend: &mut dyn GfxBackend,
    instance: vk::Instance,
    surface: vk::SurfaceKHR,
    required_extensions: &[String],
    log: &dyn LogSink,
) -> GfxResult<SelectedDevice> {
    let candidates =
        backend.enumerate_physical_devices(instance).map_err(GfxError::vk("vkEnumeratePhysicalDevices"))?;
    log.info(format_args!("found {} physical device(s)", candidates.len()));

    for pdevice in &candidates {
        let info = backend
            .physical_device_info(*pdevice, surface)
            .map_err(GfxError::vk("vkGetPhysicalDeviceProperties"))?;
        let support = backend
            .swapchain_support(*pdevice, surface)
            .map_err(GfxError::vk("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;

        match check_suitability(&info, &support, required_extensions) {
            Ok(indices) => {
                log.info(format_args!(
                    "selected physical device `{}` ({:?}), graphics family: {:?}, present family: {:?}",
                    info.name, info.device_type, indices.graphics, indices.present
                ));
                return Ok(SelectedDevice { info, indices, support });
            }
            Err(reason) => {
                log.warn(format_args!("skipping physical device `{}`: {}", info.name, reason));
            }
        }
    }

    Err(GfxError::NoSuitableDevice {
        candidates: candidates.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SWAPCHAIN_EXTENSION_NAME;

    fn family(index: u32, flags: vk::QueueFlags, present: bool) -> QueueFamilyProps {
        QueueFamilyProps {
            index,
            queue_flags: flags,
            queue_count: 1,
            present_supported: present,
        }
    }

    fn device(families: Vec<QueueFamilyProps>, extensions: &[&str]) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            handle: vk::PhysicalDevice::null(),
            name: "test-gpu".to_string(),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            queue_families: families,
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn adequate_support() -> SwapchainSupport {
        SwapchainSupport {
            capabilities: vk::SurfaceCapabilitiesKHR::default(),
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO],
        }
    }

    #[test]
    fn aliased_family_when_graphics_can_present() {
        let info = device(
            vec![
                family(0, vk::QueueFlags::TRANSFER, true),
                family(1, vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            ],
            &[],
        );
        let indices = info.queue_family_indices();
        assert_eq!(indices.graphics, Some(1));
        assert_eq!(indices.present, Some(1));
        assert!(indices.is_aliased());
        assert_eq!(indices.unique_families(), vec![1]);
    }

    #[test]
    fn separate_present_family() {
        let info = device(
            vec![family(0, vk::QueueFlags::GRAPHICS, false), family(1, vk::QueueFlags::TRANSFER, true)],
            &[],
        );
        let indices = info.queue_family_indices();
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(1));
        assert!(indices.is_complete());
        assert!(!indices.is_aliased());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn incomplete_without_present_support() {
        let info = device(vec![family(0, vk::QueueFlags::GRAPHICS, false)], &[SWAPCHAIN_EXTENSION_NAME]);
        let required = vec![SWAPCHAIN_EXTENSION_NAME.to_string()];
        let err = check_suitability(&info, &adequate_support(), &required).unwrap_err();
        assert!(matches!(err, Unsuitable::IncompleteQueueFamilies(_)));
        assert!(err.to_string().contains("queue families"));
    }

    #[test]
    fn missing_extension_is_reported() {
        let info = device(vec![family(0, vk::QueueFlags::GRAPHICS, true)], &[]);
        let required = vec![SWAPCHAIN_EXTENSION_NAME.to_string()];
        let err = check_suitability(&info, &adequate_support(), &required).unwrap_err();
        assert_eq!(err, Unsuitable::MissingExtensions(vec![SWAPCHAIN_EXTENSION_NAME.to_string()]));
    }

    #[test]
    fn inadequate_swapchain_is_rejected() {
        let info = device(vec![family(0, vk::QueueFlags::GRAPHICS, true)], &[SWAPCHAIN_EXTENSION_NAME]);
        let required = vec![SWAPCHAIN_EXTENSION_NAME.to_string()];
        let mut support = adequate_support();
        support.present_modes.clear();
        let err = check_suitability(&info, &support, &required).unwrap_err();
        assert_eq!(
            err,
            Unsuitable::InadequateSwapchain {
                formats: 1,
                present_modes: 0
            }
        );
    }

    #[test]
    fn suitable_device_passes() {
        let info = device(vec![family(0, vk::QueueFlags::GRAPHICS, true)], &[SWAPCHAIN_EXTENSION_NAME]);
        let required = vec![SWAPCHAIN_EXTENSION_NAME.to_string()];
        let indices = check_suitability(&info, &adequate_support(), &required).unwrap();
        assert_eq!(indices.graphics, Some(0));
        assert!(!info.is_descrete_gpu());
    }
}
