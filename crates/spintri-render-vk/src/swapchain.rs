// SPDX-License-Identifier: CEPL-1.0
//! The presentation chain: swapchain images, one view and one framebuffer per
//! image, rebuilt wholesale whenever the surface goes stale.

use std::sync::Arc;

use ash::vk;
use spintri_render::RenderSize;
use tracing::{debug, info};

use crate::error::{GpuError, Result};

/// Fixed by policy; not negotiated against the surface's advertised list.
pub const SURFACE_FORMAT: vk::Format = vk::Format::B8G8R8A8_SRGB;
pub const SURFACE_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;
/// Vsync-locked, never tears, always supported.
pub const PRESENT_MODE: vk::PresentModeKHR = vk::PresentModeKHR::FIFO;
pub const DESIRED_IMAGE_COUNT: u32 = 4;
/// Largest chain observed in practice. Only checked in debug builds.
pub const MAX_SWAPCHAIN_IMAGES: usize = 8;

/// The device operations the swapchain manager needs.
///
/// # Safety
/// Create infos handed to these methods must point at live data for the
/// duration of the call, and every handle passed back in must have been
/// produced by the same implementation and not destroyed yet.
pub trait SwapchainDevice {
    unsafe fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR>;
    fn surface(&self) -> vk::SurfaceKHR;
    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> Result<vk::SwapchainKHR>;
    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView>;
    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer>;
    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    unsafe fn destroy_image_view(&self, view: vk::ImageView);
    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    unsafe fn wait_idle(&self) -> Result<()>;
}

/// Requested size clamped into the surface's `[min, max]` image extent.
pub fn swap_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    vk::Extent2D {
        width: want
            .width
            .max(caps.min_image_extent.width)
            .min(caps.max_image_extent.width),
        height: want
            .height
            .max(caps.min_image_extent.height)
            .min(caps.max_image_extent.height),
    }
}

/// `DESIRED_IMAGE_COUNT` kept inside the surface limits (`max == 0` is unbounded).
pub fn image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = DESIRED_IMAGE_COUNT.max(caps.min_image_count);
    if caps.max_image_count == 0 {
        count
    } else {
        count.min(caps.max_image_count)
    }
}

#[derive(Debug)]
pub struct Swapchain {
    handle: vk::SwapchainKHR,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Swapchain {
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or(GpuError::ImageIndex {
                index: image_index,
                len: self.framebuffers.len(),
            })
    }
}

// Framebuffers, then views, then the swapchain itself.
unsafe fn destroy_chain<D: SwapchainDevice + ?Sized>(device: &D, chain: Swapchain) {
    unsafe {
        for &fb in &chain.framebuffers {
            device.destroy_framebuffer(fb);
        }
        for &view in &chain.views {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(chain.handle);
    }
}

unsafe fn populate<D: SwapchainDevice + ?Sized>(
    device: &D,
    render_pass: vk::RenderPass,
    chain: &mut Swapchain,
) -> Result<()> {
    chain.images = unsafe { device.swapchain_images(chain.handle) }?;
    debug_assert!(
        chain.images.len() <= MAX_SWAPCHAIN_IMAGES,
        "swapchain returned {} images",
        chain.images.len()
    );

    chain.views.reserve(chain.images.len());
    for &image in &chain.images {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format: chain.format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        chain.views.push(unsafe { device.create_image_view(&iv_info) }?);
    }

    chain.framebuffers.reserve(chain.views.len());
    for view in &chain.views {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass,
            attachment_count: 1,
            p_attachments: view,
            width: chain.extent.width,
            height: chain.extent.height,
            layers: 1,
            ..Default::default()
        };
        chain.framebuffers.push(unsafe { device.create_framebuffer(&fb_info) }?);
    }
    Ok(())
}

/// Builds a complete chain or nothing: on failure every object created so
/// far is destroyed before the error is returned. `old` is only handed to
/// the driver for reuse; the caller still owns and destroys it.
unsafe fn build_chain<D: SwapchainDevice + ?Sized>(
    device: &D,
    render_pass: vk::RenderPass,
    size: RenderSize,
    old: vk::SwapchainKHR,
) -> Result<Swapchain> {
    let caps = unsafe { device.surface_capabilities() }?;
    let extent = swap_extent(&caps, size);
    let min_image_count = image_count(&caps);

    let swap_info = vk::SwapchainCreateInfoKHR {
        s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
        surface: device.surface(),
        min_image_count,
        image_format: SURFACE_FORMAT,
        image_color_space: SURFACE_COLOR_SPACE,
        image_extent: extent,
        image_array_layers: 1,
        image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        // Graphics and present share one queue family.
        image_sharing_mode: vk::SharingMode::EXCLUSIVE,
        pre_transform: caps.current_transform,
        composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
        present_mode: PRESENT_MODE,
        clipped: vk::TRUE,
        old_swapchain: old,
        ..Default::default()
    };

    let handle = unsafe { device.create_swapchain(&swap_info) }?;
    let mut chain = Swapchain {
        handle,
        format: SURFACE_FORMAT,
        color_space: SURFACE_COLOR_SPACE,
        extent,
        images: Vec::new(),
        views: Vec::new(),
        framebuffers: Vec::new(),
    };

    match unsafe { populate(device, render_pass, &mut chain) } {
        Ok(()) => {
            info!(
                "swapchain ready ({}x{}, {} images, min requested {}, {:?})",
                extent.width,
                extent.height,
                chain.len(),
                min_image_count,
                chain.format
            );
            Ok(chain)
        }
        Err(e) => {
            unsafe { destroy_chain(device, chain) };
            Err(e)
        }
    }
}

/// Owns the current presentation chain for one surface and one render pass.
pub struct SwapchainManager<D: SwapchainDevice> {
    device: Arc<D>,
    render_pass: vk::RenderPass,
    current: Option<Swapchain>,
    generation: u64,
}

impl<D: SwapchainDevice> SwapchainManager<D> {
    /// A manager with no chain yet; `recreate` builds the first one.
    pub fn new(device: Arc<D>, render_pass: vk::RenderPass) -> Self {
        Self {
            device,
            render_pass,
            current: None,
            generation: 0,
        }
    }

    pub fn create(device: Arc<D>, render_pass: vk::RenderPass, size: RenderSize) -> Result<Self> {
        let mut manager = Self::new(device, render_pass);
        manager.recreate(size)?;
        Ok(manager)
    }

    pub fn current(&self) -> Option<&Swapchain> {
        self.current.as_ref()
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.current.as_ref().map(Swapchain::extent)
    }

    /// Number of chains built so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Tears down the current chain (if any) and builds a new one for `size`.
    ///
    /// Failures while replacing an existing chain are reported as
    /// [`GpuError::Recreate`]; failures building the first one are returned as-is.
    pub fn recreate(&mut self, size: RenderSize) -> Result<&Swapchain> {
        let replacing = self.current.is_some();
        let result = unsafe { self.rebuild(size) };
        match result {
            Ok(chain) => {
                self.generation += 1;
                Ok(self.current.insert(chain))
            }
            Err(e) if replacing => Err(e.into_recreate()),
            Err(e) => Err(e),
        }
    }

    unsafe fn rebuild(&mut self, size: RenderSize) -> Result<Swapchain> {
        let device = &*self.device;
        let mut old = vk::SwapchainKHR::null();

        if let Some(chain) = self.current.take() {
            // Nothing may still reference the views we are about to destroy.
            if let Err(e) = unsafe { device.wait_idle() } {
                self.current = Some(chain);
                return Err(e);
            }
            let Swapchain {
                handle,
                views,
                framebuffers,
                ..
            } = chain;
            unsafe {
                for fb in framebuffers {
                    device.destroy_framebuffer(fb);
                }
                for view in views {
                    device.destroy_image_view(view);
                }
            }
            old = handle;
        }

        let built = unsafe { build_chain(device, self.render_pass, size, old) };

        // The retired chain goes last so the driver could recycle its images.
        if old != vk::SwapchainKHR::null() {
            debug!("destroying retired swapchain");
            unsafe { device.destroy_swapchain(old) };
        }
        built
    }

    pub fn destroy(&mut self) {
        if let Some(chain) = self.current.take() {
            unsafe {
                self.device.wait_idle().ok();
                destroy_chain(&*self.device, chain);
            }
        }
    }
}

impl<D: SwapchainDevice> Drop for SwapchainManager<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
