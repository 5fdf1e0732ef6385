//! System-memory (MMIO) backing.
//!
//! Attach maps the region's full physical extent and read/write go
//! through the width-dispatched volatile primitives below, so every
//! access the interpreter asks for becomes exactly one bus transaction
//! of the named width.

use crate::err::{RegionError, RegionResult};
use crate::handlers::{RegionAccess, RegionHandler};
use crate::iface::{Namespace, NodeId, Platform};
use std::any::Any;
use std::ptr::NonNull;

/// Read `width` bytes at `ptr` as a single volatile load of exactly
/// that width. Widths outside {1, 2, 4, 8} are rejected before the
/// pointer is dereferenced.
///
/// # Safety
///
/// `ptr` must be valid for a read of `width` bytes and naturally
/// aligned for that width.
pub unsafe fn volatile_read(ptr: *const u8, width: u8) -> RegionResult<u64> {
    let value = match width {
        1 => u64::from(ptr.read_volatile()),
        2 => u64::from((ptr as *const u16).read_volatile()),
        4 => u64::from((ptr as *const u32).read_volatile()),
        8 => (ptr as *const u64).read_volatile(),
        _ => return Err(RegionError::InvalidWidth { width }),
    };
    Ok(value)
}

/// Write the low `width` bytes of `value` at `ptr` as a single
/// volatile store of exactly that width.
///
/// # Safety
///
/// `ptr` must be valid for a write of `width` bytes and naturally
/// aligned for that width.
pub unsafe fn volatile_write(ptr: *mut u8, width: u8, value: u64) -> RegionResult<()> {
    match width {
        1 => ptr.write_volatile(value as u8),
        2 => (ptr as *mut u16).write_volatile(value as u16),
        4 => (ptr as *mut u32).write_volatile(value as u32),
        8 => (ptr as *mut u64).write_volatile(value),
        _ => return Err(RegionError::InvalidWidth { width }),
    }
    Ok(())
}

/// Per-region state: the mapping of the region's physical extent.
/// `virt` stays valid from attach until the matching detach.
pub struct MemoryRegion {
    phys: u64,
    virt: NonNull<u8>,
    size: u64,
}

impl MemoryRegion {
    pub fn phys(&self) -> u64 {
        self.phys
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Translate an absolute address into the mapping. The absolute
    /// address is used directly rather than the region-relative
    /// offset, so the translation holds even when the region's
    /// declared offset differs from its physical base.
    fn translate(&self, address: u64) -> *mut u8 {
        unsafe { self.virt.as_ptr().add((address - self.phys) as usize) }
    }
}

/// The system-memory address-space handler.
pub struct MemoryHandler;

impl RegionHandler for MemoryHandler {
    fn attach(
        &self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
    ) -> RegionResult<Box<dyn Any>> {
        let op = namespace
            .op_region(region)
            .ok_or(RegionError::NotARegion { node: region })?;

        // TODO: map lazily per access instead of the full extent; a
        // firmware region covering a large BAR makes this wasteful.
        let virt = platform.map(op.base, op.length).map_err(|err| {
            log::error!("unable to map region {}: {err}", namespace.name(region));
            err
        })?;

        Ok(Box::new(MemoryRegion {
            phys: op.base,
            virt,
            size: op.length,
        }))
    }

    fn detach(&self, platform: &dyn Platform, context: Box<dyn Any>) -> RegionResult<()> {
        let region = context
            .downcast::<MemoryRegion>()
            .map_err(|_| RegionError::InvalidContext)?;

        platform.unmap(region.virt, region.size);
        Ok(())
    }

    fn read(
        &self,
        _platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
    ) -> RegionResult<u64> {
        let region = context
            .downcast_ref::<MemoryRegion>()
            .ok_or(RegionError::InvalidContext)?;

        unsafe { volatile_read(region.translate(access.address), access.width) }
    }

    fn write(
        &self,
        _platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
        value: u64,
    ) -> RegionResult<()> {
        let region = context
            .downcast_ref::<MemoryRegion>()
            .ok_or(RegionError::InvalidContext)?;

        unsafe { volatile_write(region.translate(access.address), access.width, value) }
    }
}
