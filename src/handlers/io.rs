//! Port-I/O backing.
//!
//! The platform hands out an opaque handle for the region's port range
//! at attach; reads and writes pass the region-relative offset through
//! to the platform, which also owns width validation for ports.

use crate::err::{RegionError, RegionResult};
use crate::handlers::{RegionAccess, RegionHandler};
use crate::iface::{IoHandle, Namespace, NodeId, Platform};
use std::any::Any;

/// Per-region state: the claimed port range.
pub struct IoRegion {
    base: u64,
    handle: IoHandle,
}

impl IoRegion {
    pub fn base(&self) -> u64 {
        self.base
    }
}

/// The system-IO address-space handler.
pub struct IoHandler;

impl RegionHandler for IoHandler {
    fn attach(
        &self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
    ) -> RegionResult<Box<dyn Any>> {
        let op = namespace
            .op_region(region)
            .ok_or(RegionError::NotARegion { node: region })?;

        let handle = platform.io_map(op.base, op.length).map_err(|err| {
            log::error!("unable to map IO region {}: {err}", namespace.name(region));
            err
        })?;

        Ok(Box::new(IoRegion {
            base: op.base,
            handle,
        }))
    }

    fn detach(&self, platform: &dyn Platform, context: Box<dyn Any>) -> RegionResult<()> {
        let region = context
            .downcast::<IoRegion>()
            .map_err(|_| RegionError::InvalidContext)?;

        platform.io_unmap(region.handle);
        Ok(())
    }

    fn read(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
    ) -> RegionResult<u64> {
        let region = context
            .downcast_ref::<IoRegion>()
            .ok_or(RegionError::InvalidContext)?;

        platform.io_read(region.handle, access.address - region.base, access.width)
    }

    fn write(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
        value: u64,
    ) -> RegionResult<()> {
        let region = context
            .downcast_ref::<IoRegion>()
            .ok_or(RegionError::InvalidContext)?;

        platform.io_write(region.handle, access.address - region.base, access.width, value)
    }
}
