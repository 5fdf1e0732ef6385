//! Region backings and the registry that dispatches to them.
//!
//! Each address space is served by a [`RegionHandler`]: attach builds
//! the per-region context, detach consumes it, read and write execute
//! one bounded hardware access against it. [`RegionManager`] is the
//! interpreter-facing registry that routes a region to the handler
//! registered for its address space.

use crate::err::{RegionError, RegionResult};
use crate::iface::{Namespace, NodeId, Platform, RegionSpace};
use std::any::Any;
use std::collections::BTreeMap;

pub mod io;
pub mod memory;
pub mod pci;

pub use io::IoHandler;
pub use memory::{volatile_read, volatile_write, MemoryHandler};
pub use pci::PciHandler;

/// One read or write, as presented by the interpreter.
///
/// `address` is absolute within the region's address space; `offset`
/// is relative to the region's declared base. Which of the two a
/// backing consumes is its own business.
#[derive(Debug, Clone, Copy)]
pub struct RegionAccess {
    pub address: u64,
    pub offset: u64,
    pub width: u8,
}

/// The four-verb contract between the interpreter and a backing.
///
/// Attach returns the per-region context as an opaque box; the caller
/// stores it and presents it back on every later call. Detach consumes
/// it, releasing whatever platform resources it owns. A context of the
/// wrong concrete type is rejected with
/// [`RegionError::InvalidContext`].
pub trait RegionHandler {
    fn attach(
        &self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
    ) -> RegionResult<Box<dyn Any>>;

    fn detach(&self, platform: &dyn Platform, context: Box<dyn Any>) -> RegionResult<()>;

    fn read(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
    ) -> RegionResult<u64>;

    fn write(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
        value: u64,
    ) -> RegionResult<()>;
}

struct AttachedRegion {
    handler_key: (NodeId, RegionSpace),
    context: Box<dyn Any>,
}

/// Registry of address-space handlers plus the attached region state.
///
/// Handlers are registered against a namespace node and inherited by
/// every region beneath it; a registration on an interior node shadows
/// the root one. Regions attach on first access and stay attached
/// until [`RegionManager::detach`] or [`RegionManager::detach_all`].
#[derive(Default)]
pub struct RegionManager {
    handlers: BTreeMap<(NodeId, RegionSpace), Box<dyn RegionHandler>>,
    attached: BTreeMap<NodeId, AttachedRegion>,
}

impl RegionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `space` regions at or below `node`.
    pub fn install_handler(
        &mut self,
        node: NodeId,
        space: RegionSpace,
        handler: Box<dyn RegionHandler>,
    ) {
        self.handlers.insert((node, space), handler);
    }

    /// Register the three built-in backings at the namespace root, so
    /// every region inherits them unless overridden.
    pub fn install_default_handlers(&mut self, namespace: &dyn Namespace) {
        let root = namespace.root();

        self.install_handler(root, RegionSpace::SystemMemory, Box::new(MemoryHandler));
        self.install_handler(root, RegionSpace::SystemIo, Box::new(IoHandler));
        self.install_handler(root, RegionSpace::PciConfig, Box::new(PciHandler));
    }

    /// Whether some registration serves `space` regions at `node`.
    pub fn serves(&self, namespace: &dyn Namespace, node: NodeId, space: RegionSpace) -> bool {
        self.handler_key(namespace, node, space).is_some()
    }

    pub fn is_attached(&self, region: NodeId) -> bool {
        self.attached.contains_key(&region)
    }

    /// Nearest registration for `space`, starting at `node` itself and
    /// walking parent links toward the root.
    fn handler_key(
        &self,
        namespace: &dyn Namespace,
        node: NodeId,
        space: RegionSpace,
    ) -> Option<(NodeId, RegionSpace)> {
        let mut current = Some(node);
        while let Some(node) = current {
            if self.handlers.contains_key(&(node, space)) {
                return Some((node, space));
            }
            current = namespace.parent(node);
        }
        None
    }

    /// Build the region's context via its handler. A no-op if the
    /// region is already attached.
    pub fn attach(
        &mut self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
    ) -> RegionResult<()> {
        if self.attached.contains_key(&region) {
            return Ok(());
        }

        let op = namespace
            .op_region(region)
            .ok_or(RegionError::NotARegion { node: region })?;
        let handler_key = self
            .handler_key(namespace, region, op.space)
            .ok_or(RegionError::NoHandler { space: op.space })?;

        let handler = &self.handlers[&handler_key];
        let context = handler.attach(platform, namespace, region)?;

        log::debug!(
            "attached {:?} region {} at 0x{:x} (size 0x{:x})",
            op.space,
            namespace.name(region),
            op.base,
            op.length
        );

        self.attached.insert(
            region,
            AttachedRegion {
                handler_key,
                context,
            },
        );
        Ok(())
    }

    /// Tear down the region's context, releasing everything it owns.
    pub fn detach(&mut self, platform: &dyn Platform, region: NodeId) -> RegionResult<()> {
        let entry = self
            .attached
            .remove(&region)
            .ok_or(RegionError::NotAttached { region })?;

        let handler = self
            .handlers
            .get(&entry.handler_key)
            .ok_or(RegionError::InvalidContext)?;
        handler.detach(platform, entry.context)
    }

    /// Detach every attached region. Keeps going past failures and
    /// reports the first one.
    pub fn detach_all(&mut self, platform: &dyn Platform) -> RegionResult<()> {
        let mut result = Ok(());

        while let Some(region) = self.attached.keys().next().copied() {
            let outcome = self.detach(platform, region);
            if result.is_ok() {
                result = outcome;
            }
        }
        result
    }

    /// Read `width` bytes at absolute `address` within `region`,
    /// attaching it first if this is its first access.
    pub fn read(
        &mut self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
        address: u64,
        width: u8,
    ) -> RegionResult<u64> {
        log::debug!("read of size {width} from {address:#x}");
        let access = self.bounded_access(namespace, region, address, width)?;

        self.attach(platform, namespace, region)?;
        let (handler, entry) = self.dispatch_parts(region)?;
        handler.read(platform, entry.context.as_ref(), access)
    }

    /// Write `width` bytes of `value` at absolute `address` within
    /// `region`, attaching it first if this is its first access.
    pub fn write(
        &mut self,
        platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
        address: u64,
        width: u8,
        value: u64,
    ) -> RegionResult<()> {
        log::debug!("write of {value:#x} to {address:#x} of size {width}");
        let access = self.bounded_access(namespace, region, address, width)?;

        self.attach(platform, namespace, region)?;
        let (handler, entry) = self.dispatch_parts(region)?;
        handler.write(platform, entry.context.as_ref(), access, value)
    }

    /// Translate an absolute address into a bounds-checked access.
    fn bounded_access(
        &self,
        namespace: &dyn Namespace,
        region: NodeId,
        address: u64,
        width: u8,
    ) -> RegionResult<RegionAccess> {
        let op = namespace
            .op_region(region)
            .ok_or(RegionError::NotARegion { node: region })?;

        let offset = address
            .checked_sub(op.base)
            .ok_or(RegionError::OutOfBounds { address })?;
        if offset + u64::from(width) > op.length {
            return Err(RegionError::OutOfBounds { address });
        }

        Ok(RegionAccess {
            address,
            offset,
            width,
        })
    }

    fn dispatch_parts(&self, region: NodeId) -> RegionResult<(&dyn RegionHandler, &AttachedRegion)> {
        let entry = self
            .attached
            .get(&region)
            .ok_or(RegionError::NotAttached { region })?;
        let handler = self
            .handlers
            .get(&entry.handler_key)
            .ok_or(RegionError::InvalidContext)?;
        Ok((handler.as_ref(), entry))
    }
}
