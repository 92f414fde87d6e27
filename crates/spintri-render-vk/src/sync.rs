// SPDX-License-Identifier: CEPL-1.0
//! Semaphores and the in-flight fence for the single frame slot.

use ash::vk;

use crate::error::{Result, VkResultExt};

pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let info = vk::SemaphoreCreateInfo {
        s_type: vk::StructureType::SEMAPHORE_CREATE_INFO,
        ..Default::default()
    };
    unsafe { device.create_semaphore(&info, None) }.op("vkCreateSemaphore")
}

pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };
    let info = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags,
        ..Default::default()
    };
    unsafe { device.create_fence(&info, None) }.op("vkCreateFence")
}

/// One frame slot's worth of synchronization.
///
/// `frame_complete` starts signaled so the very first wait returns at once.
pub struct FrameSyncSet {
    pub frame_complete: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

impl FrameSyncSet {
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        unsafe {
            let frame_complete = create_fence(device, true)?;
            let image_acquired = match create_semaphore(device) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_fence(frame_complete, None);
                    return Err(e);
                }
            };
            let render_finished = match create_semaphore(device) {
                Ok(s) => s,
                Err(e) => {
                    device.destroy_semaphore(image_acquired, None);
                    device.destroy_fence(frame_complete, None);
                    return Err(e);
                }
            };
            Ok(Self {
                frame_complete,
                image_acquired,
                render_finished,
            })
        }
    }

    /// An acquire that returned out-of-date may still leave a signal operation
    /// pending on the old semaphore, so it is replaced after every rebuild.
    /// The old one is only destroyed once its replacement exists.
    pub unsafe fn renew_image_acquired(&mut self, device: &ash::Device) -> Result<()> {
        let fresh = unsafe { create_semaphore(device) }?;
        let old = std::mem::replace(&mut self.image_acquired, fresh);
        unsafe { device.destroy_semaphore(old, None) };
        Ok(())
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_fence(self.frame_complete, None);
        }
        self.render_finished = vk::Semaphore::null();
        self.image_acquired = vk::Semaphore::null();
        self.frame_complete = vk::Fence::null();
    }
}
