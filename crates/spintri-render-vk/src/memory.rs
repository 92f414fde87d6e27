// SPDX-License-Identifier: CEPL-1.0
//! Device-memory type selection and allocation.

use ash::vk;
use tracing::debug;

use crate::buffer::BufferDevice;
use crate::error::{GpuError, Result};

/// First memory type, in device order, allowed by `type_bits` whose flags
/// contain `required`. No preference among several matches.
pub fn select_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (props.memory_type_count as usize).min(props.memory_types.len());
    props.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, ty)| type_bits & (1 << i) != 0 && ty.property_flags.contains(required))
        .map(|(i, _)| i as u32)
}

#[inline]
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    select_memory_type(props, type_bits, required).ok_or(GpuError::NoMemoryType {
        type_bits,
        required,
    })
}

/// Allocates memory for `requirements` (their size, not the caller's).
///
/// # Safety
/// `device` must be valid.
pub unsafe fn allocate_for<D: BufferDevice + ?Sized>(
    device: &D,
    requirements: &vk::MemoryRequirements,
    required: vk::MemoryPropertyFlags,
) -> Result<vk::DeviceMemory> {
    let memory_type_index =
        find_memory_type(device.memory_properties(), requirements.memory_type_bits, required)?;
    debug!(
        "allocating {} bytes from memory type {} ({:?})",
        requirements.size, memory_type_index, required
    );
    let mai = vk::MemoryAllocateInfo {
        s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
        allocation_size: requirements.size,
        memory_type_index,
        ..Default::default()
    };
    unsafe { device.allocate_memory(&mai) }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );

    fn table(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        props.memory_type_count = types.len() as u32;
        for (slot, &flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = flags;
        }
        props
    }

    #[test]
    fn first_match_in_mask_wins() {
        // Type 0 satisfies the flags but is outside the mask; type 1 is in the
        // mask but lacks coherency; type 3 is the first allowed match even
        // though type 4 would match as well.
        let props = table(&[
            HOST,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            HOST | vk::MemoryPropertyFlags::HOST_CACHED,
            HOST,
        ]);
        let mask = (1 << 1) | (1 << 3) | (1 << 4);
        assert_eq!(select_memory_type(&props, mask, HOST), Some(3));
        assert_eq!(select_memory_type(&props, (1 << 1) | (1 << 3), HOST), Some(3));
    }

    #[test]
    fn no_match_is_an_error() {
        let props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST]);
        assert_eq!(select_memory_type(&props, 0b01, HOST), None);
        let err = find_memory_type(&props, 0b01, HOST).unwrap_err();
        assert!(matches!(err, GpuError::NoMemoryType { type_bits: 0b01, .. }));
    }

    #[test]
    fn types_past_the_reported_count_are_ignored() {
        let mut props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        props.memory_types[1].property_flags = HOST;
        assert_eq!(select_memory_type(&props, u32::MAX, HOST), None);
    }

    #[test]
    fn empty_requirement_takes_first_allowed() {
        let props = table(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, HOST]);
        assert_eq!(
            select_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()),
            Some(1)
        );
    }
}
