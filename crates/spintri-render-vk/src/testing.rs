// SPDX-License-Identifier: CEPL-1.0
//! GPU-free doubles for the buffer, swapchain and frame-loop tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::c_void;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk::{self, Handle};
use spintri_render::RenderSize;

use crate::buffer::BufferDevice;
use crate::error::{GpuError, Result};
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::swapchain::{SwapchainDevice, SwapchainManager};

pub fn caps(min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
    vk::SurfaceCapabilitiesKHR {
        min_image_count: 2,
        max_image_count: 0,
        current_extent: vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        },
        min_image_extent: vk::Extent2D {
            width: min.0,
            height: min.1,
        },
        max_image_extent: vk::Extent2D {
            width: max.0,
            height: max.1,
        },
        max_image_array_layers: 1,
        current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
        supported_usage_flags: vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ..Default::default()
    }
}

/// The parts of a swapchain create call the tests look at.
#[derive(Debug, Clone, Copy)]
pub struct CreateRecord {
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub old_swapchain: vk::SwapchainKHR,
    pub image_extent: vk::Extent2D,
}

#[derive(Default)]
struct DeviceState {
    caps: vk::SurfaceCapabilitiesKHR,
    image_count: usize,
    next_handle: u64,
    swapchains: HashSet<u64>,
    views: HashSet<u64>,
    framebuffers: HashSet<u64>,
    log: Vec<String>,
    last_create: Option<CreateRecord>,
    fail_framebuffer_at: Option<usize>,
    framebuffers_since_armed: usize,
}

impl DeviceState {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        0x1000 + self.next_handle
    }
}

/// Records every create/destroy and hands out unique fake handles.
pub struct MockDevice {
    state: Mutex<DeviceState>,
}

impl MockDevice {
    pub fn new(caps: vk::SurfaceCapabilitiesKHR, image_count: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DeviceState {
                caps,
                image_count,
                ..Default::default()
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap()
    }

    pub fn set_caps(&self, caps: vk::SurfaceCapabilitiesKHR) {
        self.state().caps = caps;
    }

    /// The `n`th framebuffer created from now on (zero-based) fails once.
    pub fn fail_framebuffer_at(&self, n: usize) {
        let mut s = self.state();
        s.fail_framebuffer_at = Some(n);
        s.framebuffers_since_armed = 0;
    }

    pub fn live_swapchains(&self) -> usize {
        self.state().swapchains.len()
    }

    pub fn live_views(&self) -> usize {
        self.state().views.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.state().framebuffers.len()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }

    pub fn last_create(&self) -> Option<CreateRecord> {
        self.state().last_create
    }
}

impl SwapchainDevice for MockDevice {
    unsafe fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state().caps)
    }

    fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(1)
    }

    unsafe fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR<'_>) -> Result<vk::SwapchainKHR> {
        let mut s = self.state();
        let raw = s.handle();
        s.swapchains.insert(raw);
        s.log.push(format!("create_swapchain {raw}"));
        s.last_create = Some(CreateRecord {
            min_image_count: info.min_image_count,
            present_mode: info.present_mode,
            old_swapchain: info.old_swapchain,
            image_extent: info.image_extent,
        });
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    unsafe fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let mut s = self.state();
        assert!(s.swapchains.contains(&swapchain.as_raw()));
        let count = s.image_count;
        Ok((0..count).map(|_| vk::Image::from_raw(s.handle())).collect())
    }

    unsafe fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> Result<vk::ImageView> {
        assert_ne!(info.image, vk::Image::null());
        let mut s = self.state();
        let raw = s.handle();
        s.views.insert(raw);
        Ok(vk::ImageView::from_raw(raw))
    }

    unsafe fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo<'_>) -> Result<vk::Framebuffer> {
        assert_eq!(info.attachment_count, 1);
        let view = unsafe { *info.p_attachments };
        let mut s = self.state();
        assert!(s.views.contains(&view.as_raw()), "framebuffer over a dead view");
        if let Some(n) = s.fail_framebuffer_at {
            if s.framebuffers_since_armed == n {
                s.fail_framebuffer_at = None;
                return Err(GpuError::vulkan(
                    "vkCreateFramebuffer",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ));
            }
            s.framebuffers_since_armed += 1;
        }
        let raw = s.handle();
        s.framebuffers.insert(raw);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    unsafe fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut s = self.state();
        assert!(s.framebuffers.remove(&framebuffer.as_raw()), "double destroy");
        s.log.push(format!("destroy_framebuffer {}", framebuffer.as_raw()));
    }

    unsafe fn destroy_image_view(&self, view: vk::ImageView) {
        let mut s = self.state();
        assert!(s.views.remove(&view.as_raw()), "double destroy");
        s.log.push(format!("destroy_view {}", view.as_raw()));
    }

    unsafe fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut s = self.state();
        assert!(s.swapchains.remove(&swapchain.as_raw()), "double destroy");
        s.log.push(format!("destroy_swapchain {}", swapchain.as_raw()));
    }

    unsafe fn wait_idle(&self) -> Result<()> {
        self.state().log.push("wait_idle".to_owned());
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    next_handle: u64,
    buffers: HashMap<u64, vk::DeviceSize>,
    allocations: HashMap<u64, Vec<u8>>,
    last_allocation: Option<u64>,
    allocation_sizes: Vec<vk::DeviceSize>,
    created_usage: Option<vk::BufferUsageFlags>,
    mappings: usize,
    fail_bind: bool,
    map_null: bool,
    log: Vec<String>,
}

/// One host-coherent memory type; buffer requirements are rounded up to
/// `alignment` and allocations are backed by host vectors.
pub struct MockMemory {
    props: vk::PhysicalDeviceMemoryProperties,
    alignment: vk::DeviceSize,
    state: Mutex<MemoryState>,
}

impl MockMemory {
    pub fn new(alignment: vk::DeviceSize) -> Arc<Self> {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            ..Default::default()
        };
        props.memory_types[0].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        Arc::new(Self {
            props,
            alignment,
            state: Mutex::new(MemoryState::default()),
        })
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    pub fn fail_bind(&self) {
        self.state().fail_bind = true;
    }

    /// Every later map succeeds without handing out a pointer.
    pub fn map_null(&self) {
        self.state().map_null = true;
    }

    pub fn allocation_sizes(&self) -> Vec<vk::DeviceSize> {
        self.state().allocation_sizes.clone()
    }

    pub fn created_usage(&self) -> Option<vk::BufferUsageFlags> {
        self.state().created_usage
    }

    pub fn live_buffers(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn live_allocations(&self) -> usize {
        self.state().allocations.len()
    }

    pub fn live_mappings(&self) -> usize {
        self.state().mappings
    }

    /// Bytes of the most recent allocation.
    pub fn contents(&self) -> Vec<u8> {
        let s = self.state();
        let raw = s.last_allocation.expect("nothing allocated");
        s.allocations[&raw].clone()
    }

    pub fn log(&self) -> Vec<String> {
        self.state().log.clone()
    }
}

impl BufferDevice for MockMemory {
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.props
    }

    unsafe fn create_buffer(&self, info: &vk::BufferCreateInfo<'_>) -> Result<vk::Buffer> {
        let mut s = self.state();
        s.next_handle += 1;
        let raw = 0x2000 + s.next_handle;
        s.buffers.insert(raw, info.size);
        s.created_usage = Some(info.usage);
        s.log.push("create_buffer".to_owned());
        Ok(vk::Buffer::from_raw(raw))
    }

    unsafe fn buffer_memory_requirements(&self, buffer: vk::Buffer) -> vk::MemoryRequirements {
        let size = self.state().buffers[&buffer.as_raw()];
        vk::MemoryRequirements {
            size: size.next_multiple_of(self.alignment),
            alignment: self.alignment,
            memory_type_bits: 0b1,
        }
    }

    unsafe fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> Result<vk::DeviceMemory> {
        assert_eq!(info.memory_type_index, 0);
        let mut s = self.state();
        s.next_handle += 1;
        let raw = 0x3000 + s.next_handle;
        s.allocations.insert(raw, vec![0; info.allocation_size as usize]);
        s.last_allocation = Some(raw);
        s.allocation_sizes.push(info.allocation_size);
        s.log.push(format!("allocate {}", info.allocation_size));
        Ok(vk::DeviceMemory::from_raw(raw))
    }

    unsafe fn bind_buffer_memory(&self, buffer: vk::Buffer, memory: vk::DeviceMemory) -> Result<()> {
        let mut s = self.state();
        assert!(s.buffers.contains_key(&buffer.as_raw()));
        assert!(s.allocations.contains_key(&memory.as_raw()));
        s.log.push("bind".to_owned());
        if s.fail_bind {
            return Err(GpuError::vulkan(
                "vkBindBufferMemory",
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            ));
        }
        Ok(())
    }

    unsafe fn map_memory(&self, memory: vk::DeviceMemory, size: vk::DeviceSize) -> Result<*mut c_void> {
        let mut s = self.state();
        s.mappings += 1;
        if s.map_null {
            return Ok(std::ptr::null_mut());
        }
        let backing = s.allocations.get_mut(&memory.as_raw()).expect("map of freed memory");
        assert_eq!(size, backing.len() as vk::DeviceSize);
        Ok(backing.as_mut_ptr().cast())
    }

    unsafe fn unmap_memory(&self, _memory: vk::DeviceMemory) {
        let mut s = self.state();
        assert!(s.mappings > 0, "unmap without a mapping");
        s.mappings -= 1;
    }

    unsafe fn destroy_buffer(&self, buffer: vk::Buffer) {
        let mut s = self.state();
        assert!(s.buffers.remove(&buffer.as_raw()).is_some(), "double destroy");
        s.log.push("destroy_buffer".to_owned());
    }

    unsafe fn free_memory(&self, memory: vk::DeviceMemory) {
        let mut s = self.state();
        assert!(s.allocations.remove(&memory.as_raw()).is_some(), "double free");
        s.log.push("free".to_owned());
    }
}

/// A frame backend over a real `SwapchainManager` and a fake queue that
/// completes work whenever the fence is waited on.
pub struct MockBackend {
    device: Arc<MockDevice>,
    swapchains: SwapchainManager<MockDevice>,
    calls: Vec<&'static str>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    fence_signaled: bool,
    in_flight: u32,
    max_in_flight: u32,
    semaphore_generation: u32,
    next_image: u32,
}

impl MockBackend {
    pub fn new(device: Arc<MockDevice>, size: RenderSize) -> Self {
        let swapchains = SwapchainManager::create(device.clone(), vk::RenderPass::from_raw(0xfeed), size)
            .expect("initial swapchain");
        Self {
            device,
            swapchains,
            calls: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            fence_signaled: true,
            in_flight: 0,
            max_in_flight: 0,
            semaphore_generation: 0,
            next_image: 0,
        }
    }

    pub fn device(&self) -> &MockDevice {
        &self.device
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchains.extent()
    }

    pub fn calls(&self) -> &[&'static str] {
        &self.calls
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.acquire_script.push_back(outcome);
    }

    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.present_script.push_back(outcome);
    }

    pub fn fence_signaled(&self) -> bool {
        self.fence_signaled
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight
    }

    pub fn max_in_flight(&self) -> u32 {
        self.max_in_flight
    }

    pub fn semaphore_generation(&self) -> u32 {
        self.semaphore_generation
    }
}

impl FrameBackend for MockBackend {
    fn wait_for_frame(&mut self) -> Result<()> {
        self.calls.push("wait");
        assert!(
            self.fence_signaled || self.in_flight > 0,
            "waiting on a fence nothing will signal"
        );
        self.in_flight = 0;
        self.fence_signaled = true;
        Ok(())
    }

    fn acquire_image(&mut self) -> Result<AcquireOutcome> {
        self.calls.push("acquire");
        let len = self.swapchains.current().ok_or(GpuError::NoSwapchain)?.len() as u32;
        if let Some(outcome) = self.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image % len;
        self.next_image += 1;
        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal: false,
        })
    }

    fn reset_frame_fence(&mut self) -> Result<()> {
        self.calls.push("reset_fence");
        self.fence_signaled = false;
        Ok(())
    }

    fn record(&mut self, image_index: u32) -> Result<()> {
        self.calls.push("record");
        self.swapchains
            .current()
            .ok_or(GpuError::NoSwapchain)?
            .framebuffer(image_index)?;
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.calls.push("submit");
        assert!(!self.fence_signaled, "submit with a signaled fence");
        self.in_flight += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight);
        assert!(self.in_flight <= 1, "{} frames in flight", self.in_flight);
        Ok(())
    }

    fn present(&mut self, _image_index: u32) -> Result<PresentOutcome> {
        self.calls.push("present");
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }

    fn recreate_swapchain(&mut self, size: RenderSize) -> Result<vk::Extent2D> {
        self.calls.push("recreate");
        self.swapchains.recreate(size).map(|chain| chain.extent())
    }

    fn renew_acquire_semaphore(&mut self) -> Result<()> {
        self.calls.push("renew_semaphore");
        self.semaphore_generation += 1;
        Ok(())
    }
}
