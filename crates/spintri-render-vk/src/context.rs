// SPDX-License-Identifier: CEPL-1.0
//! Instance, surface and device: everything the rest of the crate borrows
//! through an `Arc<VkContext>`.

use std::ffi::{c_char, c_void, CStr};
use std::sync::Arc;

#[cfg(debug_assertions)]
use ash::ext::debug_utils as ext_debug;
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{info, warn};

use crate::buffer::BufferDevice;
use crate::error::{GpuError, Result, VkResultExt};
use crate::swapchain::{SwapchainDevice, SURFACE_COLOR_SPACE, SURFACE_FORMAT};

const APP_NAME: &CStr = c"spintri";
#[cfg(debug_assertions)]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

#[cfg(debug_assertions)]
type DebugState = Option<(ext_debug::Instance, vk::DebugUtilsMessengerEXT)>;
#[cfg(not(debug_assertions))]
type DebugState = ();

pub struct VkContext {
    _entry: Entry,
    instance: Instance,
    debug: DebugState,

    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    phys: vk::PhysicalDevice,
    device: ash::Device,
    queue_family: u32,
    queue: vk::Queue,

    swapchain_loader: swapchain::Device,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() {
        return vk::FALSE;
    }
    let p_message = unsafe { (*data).p_message };
    if p_message.is_null() {
        return vk::FALSE;
    }
    let msg = unsafe { CStr::from_ptr(p_message) }.to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "vulkan", "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!(target: "vulkan", "{msg}");
    } else {
        tracing::debug!(target: "vulkan", "{msg}");
    }
    vk::FALSE
}

#[cfg(debug_assertions)]
unsafe fn create_debug_messenger(entry: &Entry, instance: &Instance, enabled: bool) -> Result<DebugState> {
    if !enabled {
        return Ok(None);
    }
    let loader = ext_debug::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    let messenger = unsafe { loader.create_debug_utils_messenger(&ci, None) }
        .op("vkCreateDebugUtilsMessengerEXT")?;
    Ok(Some((loader, messenger)))
}

#[cfg(not(debug_assertions))]
unsafe fn create_debug_messenger(_entry: &Entry, _instance: &Instance, _enabled: bool) -> Result<DebugState> {
    Ok(())
}

/// Returns the instance and whether validation output was wired up.
unsafe fn create_instance(entry: &Entry, display_raw: RawDisplayHandle) -> Result<(Instance, bool)> {
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: APP_NAME.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: APP_NAME.as_ptr(),
        engine_version: 0,
        // Vulkan 1.0 drivers refuse anything newer.
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    #[cfg_attr(not(debug_assertions), allow(unused_mut))]
    let mut ext_vec: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .op("enumerate_required_extensions")?
        .to_vec();
    #[cfg_attr(not(debug_assertions), allow(unused_mut))]
    let mut layer_vec: Vec<*const c_char> = Vec::new();

    #[cfg(debug_assertions)]
    let validation = {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .op("vkEnumerateInstanceLayerProperties")?;
        let exts = unsafe { entry.enumerate_instance_extension_properties(None) }
            .op("vkEnumerateInstanceExtensionProperties")?;
        let has_layer = layers
            .iter()
            .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
        let has_debug_utils = exts
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == ext_debug::NAME));
        if has_layer && has_debug_utils {
            layer_vec.push(VALIDATION_LAYER.as_ptr());
            ext_vec.push(ext_debug::NAME.as_ptr());
            true
        } else {
            warn!("validation layer unavailable; continuing without it");
            false
        }
    };
    #[cfg(not(debug_assertions))]
    let validation = {
        let _ = entry;
        false
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count: layer_vec.len() as u32,
        pp_enabled_layer_names: layer_vec.as_ptr(),
        ..Default::default()
    };

    let instance = unsafe { entry.create_instance(&create_info, None) }.op("vkCreateInstance")?;
    Ok((instance, validation))
}

/// First device, first queue family with graphics and present support.
unsafe fn pick_device_and_queue(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }.op("vkEnumeratePhysicalDevices")?;
    for phys in devices {
        let qprops = unsafe { instance.get_physical_device_queue_family_properties(phys) };
        for (i, q) in qprops.iter().enumerate() {
            let present = unsafe {
                surface_loader.get_physical_device_surface_support(phys, i as u32, surface)
            }
            .unwrap_or(false);
            if q.queue_flags.contains(vk::QueueFlags::GRAPHICS) && present {
                return Ok((phys, i as u32));
            }
        }
    }
    Err(GpuError::NoSuitableDevice)
}

unsafe fn create_device(instance: &Instance, phys: vk::PhysicalDevice, queue_family: u32) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let qinfo = vk::DeviceQueueCreateInfo {
        s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
        queue_family_index: queue_family,
        queue_count: 1,
        p_queue_priorities: priorities.as_ptr(),
        ..Default::default()
    };

    let features = vk::PhysicalDeviceFeatures::default();
    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: 1,
        p_queue_create_infos: &qinfo,
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    unsafe { instance.create_device(phys, &dinfo, None) }.op("vkCreateDevice")
}

impl VkContext {
    pub fn new(window: &dyn HasWindowHandle, display: &dyn HasDisplayHandle) -> Result<Arc<Self>> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            let entry = Entry::load()?;
            let (instance, validation) = create_instance(&entry, dh)?;
            let debug = match create_debug_messenger(&entry, &instance, validation) {
                Ok(d) => d,
                Err(e) => {
                    instance.destroy_instance(None);
                    return Err(e);
                }
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(result) => {
                    destroy_instance(&instance, &debug);
                    return Err(GpuError::vulkan("ash_window::create_surface", result));
                }
            };

            let picked = pick_device_and_queue(&instance, &surface_loader, surface)
                .and_then(|(phys, qf)| Ok((phys, qf, create_device(&instance, phys, qf)?)));
            let (phys, queue_family, device) = match picked {
                Ok(p) => p,
                Err(e) => {
                    surface_loader.destroy_surface(surface, None);
                    destroy_instance(&instance, &debug);
                    return Err(e);
                }
            };

            let queue = device.get_device_queue(queue_family, 0);
            let swapchain_loader = swapchain::Device::new(&instance, &device);
            let memory_properties = instance.get_physical_device_memory_properties(phys);

            let props = instance.get_physical_device_properties(phys);
            info!(
                "vk device: {} (queue family {}, {} memory types)",
                props.device_name_as_c_str().unwrap_or(c"?").to_string_lossy(),
                queue_family,
                memory_properties.memory_type_count
            );

            let ctx = VkContext {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                phys,
                device,
                queue_family,
                queue,
                swapchain_loader,
                memory_properties,
            };
            ctx.check_policy_format();
            Ok(Arc::new(ctx))
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    /// The format is fixed by policy; a surface that does not list it only gets a warning.
    fn check_policy_format(&self) {
        let formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
        };
        match formats {
            Ok(formats) => {
                let listed = formats
                    .iter()
                    .any(|f| f.format == SURFACE_FORMAT && f.color_space == SURFACE_COLOR_SPACE);
                if !listed {
                    warn!(
                        "surface does not advertise {:?}/{:?} ({} formats listed)",
                        SURFACE_FORMAT,
                        SURFACE_COLOR_SPACE,
                        formats.len()
                    );
                }
            }
            Err(e) => warn!("vkGetPhysicalDeviceSurfaceFormatsKHR: {e}"),
        }
    }
}

unsafe fn destroy_instance(instance: &Instance, debug: &DebugState) {
    #[cfg(debug_assertions)]
    if let Some((loader, messenger)) = debug {
        unsafe { loader.destroy_debug_utils_messenger(*messenger, None) };
    }
    #[cfg(not(debug_assertions))]
    let _ = debug;
    unsafe { instance.destroy_instance(None) };
}

impl SwapchainDevice for VkContext {
    unsafe fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
        }
        .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> Result<vk::SwapchainKHR> {
        unsafe { self.swapchain_loader.create_swapchain(info, None) }.op("vkCreateSwapchainKHR")
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }.op("vkGetSwapchainImagesKHR")
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        unsafe { self.device.create_image_view(info, None) }.op("vkCreateImageView")
    }

    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer> {
        unsafe { self.device.create_framebuffer(info, None) }.op("vkCreateFramebuffer")
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    unsafe fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.op("vkDeviceWaitIdle")
    }
}

impl BufferDevice for VkContext {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        unsafe { self.device.create_buffer(info, None) }.op("vkCreateBuffer")
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        unsafe { self.device.get_buffer_memory_requirements(buffer) }
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> Result<vk::DeviceMemory> {
        unsafe { self.device.allocate_memory(info, None) }.op("vkAllocateMemory")
    }

    unsafe fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        unsafe { self.device.bind_buffer_memory(buffer, memory, 0) }.op("vkBindBufferMemory")
    }

    unsafe fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut c_void> {
        unsafe {
            self.device
                .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
        }
        .op("vkMapMemory")
    }

    unsafe fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        unsafe { self.device.destroy_buffer(buffer, None) }
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.free_memory(memory, None) }
    }
}

// Everything created from the device holds an Arc to this context, so by the
// time this runs only the device, surface and instance are left.
impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_instance(&self.instance, &self.debug);
        }
    }
}
