//! 基于 ash 的 vulkan backend

mod debug_messenger;
mod frame_sync;
mod instance;

use std::collections::HashMap;
use std::ffi::{CStr, CString};

use ash::prelude::VkResult;
use ash::vk;
use itertools::Itertools;

use crate::backend::vulkan::debug_messenger::DebugMsger;
use crate::backend::vulkan::frame_sync::FrameSync;
use crate::backend::{DeviceDesc, GfxBackend, ImageViewDesc, InstanceDesc, SwapchainDesc};
use crate::commands::draw_command::DrawCommand;
use crate::error::{GfxError, GfxResult};
use crate::foundation::physical_device::{PhysicalDeviceInfo, QueueFamilyProps};
use crate::swapchain::support::SwapchainSupport;
use crate::swapchain::surface::SurfaceSource;

/// instance 级别的函数指针
struct InstanceFns {
    handle: ash::Instance,
    surface: ash::khr::surface::Instance,
    debug_msger: Option<DebugMsger>,
}

/// device 级别的函数指针，以及每帧使用的同步对象
struct DeviceFns {
    handle: ash::Device,
    swapchain: ash::khr::swapchain::Device,
    frame_sync: FrameSync,
}

/// 真实的 vulkan 实现
///
/// 同一时间最多持有一个 instance 和一个 device
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: Option<InstanceFns>,
    device: Option<DeviceFns>,

    swapchain_images: HashMap<vk::SwapchainKHR, Vec<vk::Image>>,
}

// 创建与销毁
impl VulkanBackend {
    /// 在运行时动态加载 vulkan loader
    pub fn load() -> GfxResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| GfxError::LoaderUnavailable(e.to_string()))?;
        Ok(Self {
            entry,
            instance: None,
            device: None,
            swapchain_images: HashMap::new(),
        })
    }
}

// tools
impl VulkanBackend {
    fn instance_fns(&self, instance: vk::Instance) -> VkResult<&InstanceFns> {
        self.instance
            .as_ref()
            .filter(|fns| fns.handle.handle() == instance)
            .ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn current_instance(&self) -> VkResult<&InstanceFns> {
        self.instance.as_ref().ok_or(vk::Result::ERROR_INITIALIZATION_FAILED)
    }

    fn device_fns(&self, device: vk::Device) -> VkResult<&DeviceFns> {
        self.device
            .as_ref()
            .filter(|fns| fns.handle.handle() == device)
            .ok_or(vk::Result::ERROR_DEVICE_LOST)
    }

    fn swapchain_image(&self, swapchain: vk::SwapchainKHR, image_index: u32) -> VkResult<vk::Image> {
        self.swapchain_images
            .get(&swapchain)
            .and_then(|images| images.get(image_index as usize))
            .copied()
            .ok_or(vk::Result::ERROR_OUT_OF_DATE_KHR)
    }
}

fn c_str_to_string(raw: &[std::os::raw::c_char]) -> String {
    unsafe { CStr::from_ptr(raw.as_ptr()) }.to_string_lossy().into_owned()
}

impl GfxBackend for VulkanBackend {
    fn name(&self) -> &str {
        "vulkan"
    }

    fn instance_layers(&mut self) -> VkResult<Vec<String>> {
        instance::available_layers(&self.entry)
    }

    fn create_instance(&mut self, desc: &InstanceDesc<'_>) -> VkResult<vk::Instance> {
        if self.instance.is_some() {
            log::error!("vulkan backend already owns an instance");
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }

        let display_handle = desc.surface.display_handle().map_err(|e| {
            log::error!("display handle is unavailable: {}", e);
            vk::Result::ERROR_INITIALIZATION_FAILED
        })?;
        let window_exts = ash_window::enumerate_required_extensions(display_handle.as_raw())?;

        let handle = instance::create_instance(&self.entry, desc, window_exts)?;
        let debug_msger = if desc.enable_validation {
            match DebugMsger::new(&self.entry, &handle) {
                Ok(msger) => Some(msger),
                Err(e) => {
                    unsafe { handle.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface = ash::khr::surface::Instance::new(&self.entry, &handle);
        let vk_instance = handle.handle();
        self.instance = Some(InstanceFns {
            handle,
            surface,
            debug_msger,
        });
        Ok(vk_instance)
    }

    fn destroy_instance(&mut self, instance: vk::Instance) {
        let Some(fns) = self.instance.take_if(|fns| fns.handle.handle() == instance) else {
            log::warn!("destroy_instance called with an unknown instance");
            return;
        };

        if let Some(msger) = fns.debug_msger {
            msger.destroy();
        }
        log::info!("destroying instance");
        unsafe { fns.handle.destroy_instance(None) };
    }

    fn create_surface(&mut self, instance: vk::Instance, source: &dyn SurfaceSource) -> VkResult<vk::SurfaceKHR> {
        let fns = self.instance_fns(instance)?;
        let (display_handle, window_handle) = match (source.display_handle(), source.window_handle()) {
            (Ok(display), Ok(window)) => (display, window),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("native window handle is unavailable: {}", e);
                return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
            }
        };

        unsafe {
            ash_window::create_surface(&self.entry, &fns.handle, display_handle.as_raw(), window_handle.as_raw(), None)
        }
    }

    fn destroy_surface(&mut self, instance: vk::Instance, surface: vk::SurfaceKHR) {
        match self.instance_fns(instance) {
            Ok(fns) => unsafe { fns.surface.destroy_surface(surface, None) },
            Err(_) => log::warn!("destroy_surface called with an unknown instance"),
        }
    }

    fn enumerate_physical_devices(&mut self, instance: vk::Instance) -> VkResult<Vec<vk::PhysicalDevice>> {
        let fns = self.instance_fns(instance)?;
        unsafe { fns.handle.enumerate_physical_devices() }
    }

    fn physical_device_info(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<PhysicalDeviceInfo> {
        let fns = self.current_instance()?;
        unsafe {
            let props = fns.handle.get_physical_device_properties(physical_device);

            let mut queue_families = Vec::new();
            for (index, family) in
                fns.handle.get_physical_device_queue_family_properties(physical_device).iter().enumerate()
            {
                let present_supported =
                    fns.surface.get_physical_device_surface_support(physical_device, index as u32, surface)?;
                queue_families.push(QueueFamilyProps {
                    index: index as u32,
                    queue_flags: family.queue_flags,
                    queue_count: family.queue_count,
                    present_supported,
                });
            }

            let extensions = fns
                .handle
                .enumerate_device_extension_properties(physical_device)?
                .iter()
                .map(|ext| c_str_to_string(&ext.extension_name))
                .collect_vec();

            Ok(PhysicalDeviceInfo {
                handle: physical_device,
                name: c_str_to_string(&props.device_name),
                device_type: props.device_type,
                queue_families,
                extensions,
            })
        }
    }

    fn swapchain_support(
        &mut self,
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
    ) -> VkResult<SwapchainSupport> {
        let fns = self.current_instance()?;
        unsafe {
            Ok(SwapchainSupport {
                capabilities: fns.surface.get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: fns.surface.get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: fns.surface.get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    fn create_device(&mut self, desc: &DeviceDesc) -> VkResult<vk::Device> {
        if self.device.is_some() {
            log::error!("vulkan backend already owns a device");
            return Err(vk::Result::ERROR_INITIALIZATION_FAILED);
        }
        let fns = self.current_instance()?;

        let queue_priorities = [1.0_f32];
        let queue_create_infos = desc
            .queue_families
            .iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default().queue_family_index(*family).queue_priorities(&queue_priorities)
            })
            .collect_vec();

        let ext_names = desc
            .extensions
            .iter()
            .map(|ext| CString::new(ext.as_str()).map_err(|_| vk::Result::ERROR_EXTENSION_NOT_PRESENT))
            .collect::<VkResult<Vec<_>>>()?;
        let device_exts = ext_names.iter().map(|ext| ext.as_ptr()).collect_vec();

        let device_ci = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&device_exts);
        let device = unsafe { fns.handle.create_device(desc.physical_device, &device_ci, None)? };

        let frame_sync = match FrameSync::new(&device, desc.graphics_family) {
            Ok(sync) => sync,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };
        let swapchain = ash::khr::swapchain::Device::new(&fns.handle, &device);

        let vk_device = device.handle();
        self.device = Some(DeviceFns {
            handle: device,
            swapchain,
            frame_sync,
        });
        Ok(vk_device)
    }

    fn device_queue(&mut self, device: vk::Device, queue_family: u32) -> VkResult<vk::Queue> {
        let fns = self.device_fns(device)?;
        Ok(unsafe { fns.handle.get_device_queue(queue_family, 0) })
    }

    fn device_wait_idle(&mut self, device: vk::Device) -> VkResult<()> {
        let fns = self.device_fns(device)?;
        unsafe { fns.handle.device_wait_idle() }
    }

    fn destroy_device(&mut self, device: vk::Device) {
        let Some(fns) = self.device.take_if(|fns| fns.handle.handle() == device) else {
            log::warn!("destroy_device called with an unknown device");
            return;
        };

        unsafe {
            // 同步对象可能仍在使用中
            if let Err(e) = fns.handle.device_wait_idle() {
                log::warn!("vkDeviceWaitIdle failed before destroying device: {:?}", e);
            }
            fns.frame_sync.destroy(&fns.handle);
            log::info!("destroying device");
            fns.handle.destroy_device(None);
        }
    }

    fn create_swapchain(&mut self, device: vk::Device, desc: &SwapchainDesc) -> VkResult<vk::SwapchainKHR> {
        let fns = self.device_fns(device)?;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.surface_format.format)
            .image_color_space(desc.surface_format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于清屏，也用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(desc.sharing_mode())
            .queue_family_indices(&desc.queue_family_indices)
            .pre_transform(desc.pre_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true);

        unsafe { fns.swapchain.create_swapchain(&create_info, None) }
    }

    fn swapchain_images(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        let fns = self.device_fns(device)?;
        let images = unsafe { fns.swapchain.get_swapchain_images(swapchain)? };
        self.swapchain_images.insert(swapchain, images.clone());
        Ok(images)
    }

    fn destroy_swapchain(&mut self, device: vk::Device, swapchain: vk::SwapchainKHR) {
        self.swapchain_images.remove(&swapchain);
        match self.device_fns(device) {
            Ok(fns) => unsafe { fns.swapchain.destroy_swapchain(swapchain, None) },
            Err(_) => log::warn!("destroy_swapchain called with an unknown device"),
        }
    }

    fn create_image_view(&mut self, device: vk::Device, desc: &ImageViewDesc) -> VkResult<vk::ImageView> {
        let fns = self.device_fns(device)?;
        let create_info = vk::ImageViewCreateInfo::default()
            .image(desc.image)
            .view_type(desc.view_type)
            .format(desc.format)
            .components(desc.components)
            .subresource_range(desc.subresource_range);

        unsafe { fns.handle.create_image_view(&create_info, None) }
    }

    fn destroy_image_view(&mut self, device: vk::Device, view: vk::ImageView) {
        match self.device_fns(device) {
            Ok(fns) => unsafe { fns.handle.destroy_image_view(view, None) },
            Err(_) => log::warn!("destroy_image_view called with an unknown device"),
        }
    }

    fn acquire_next_image(
        &mut self,
        device: vk::Device,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
    ) -> VkResult<(u32, bool)> {
        let fns = self.device_fns(device)?;
        fns.frame_sync.wait(&fns.handle, timeout)?;
        unsafe {
            fns.swapchain.acquire_next_image(swapchain, timeout, fns.frame_sync.image_available(), vk::Fence::null())
        }
    }

    fn submit_draws(
        &mut self,
        device: vk::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        commands: &[DrawCommand],
    ) -> VkResult<()> {
        let image = self.swapchain_image(swapchain, image_index)?;
        let fns = self.device_fns(device)?;
        fns.frame_sync.record_and_submit(&fns.handle, queue, image, commands)
    }

    fn present(
        &mut self,
        device: vk::Device,
        queue: vk::Queue,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
    ) -> VkResult<bool> {
        let fns = self.device_fns(device)?;

        let wait_semaphores = [fns.frame_sync.render_finished()];
        let swapchains = [swapchain];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { fns.swapchain.queue_present(queue, &present_info) }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if self.device.is_some() || self.instance.is_some() {
            log::warn!("vulkan backend dropped while still owning an instance or a device");
        }
    }
}
