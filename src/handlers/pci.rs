//! PCI configuration-space backing.
//!
//! A PCI-config region does not name its own bus address; the firmware
//! expects the interpreter to infer it from where the region sits in
//! the namespace. Attach therefore walks parent links twice: once to
//! find the PCI root bridge governing the region (`_SEG`/`_BBN` live
//! there) and once to find the nearest ancestor device (`_ADR` lives
//! there). The two anchors are deliberately distinct; collapsing them
//! breaks multi-segment systems.
//!
//! The walk happens once. Namespace evaluation is expensive and PCI
//! topology is stable for a region's lifetime, so the resolved address
//! is captured in the context and never revisited.

use crate::err::{RegionError, RegionResult};
use crate::handlers::{RegionAccess, RegionHandler};
use crate::iface::{Namespace, NodeId, ObjectType, PciAddress, Platform};
use bitfield::bitfield;
use std::any::Any;

/// `_HID`/`_CID` values identifying a PCI or PCIe root bridge.
const PCI_ROOT_BRIDGE_IDS: [&str; 2] = ["PNP0A03", "PNP0A08"];

bitfield! {
    /// An `_ADR` return value as encoded for PCI: the function number
    /// in the low byte, the device number in bits 16-23. All other
    /// bits are ignored.
    struct AdrValue(u64);
    function, set_function: 7, 0;
    device, set_device: 23, 16;
}

fn is_pci_root_bridge(id: &str) -> bool {
    PCI_ROOT_BRIDGE_IDS.contains(&id)
}

fn is_pci_root(namespace: &dyn Namespace, node: NodeId) -> bool {
    if let Some(id) = namespace.eval_hid(node) {
        if is_pci_root_bridge(&id) {
            return true;
        }
    }

    if let Some(ids) = namespace.eval_cid(node) {
        return ids.iter().any(|id| is_pci_root_bridge(id));
    }
    false
}

/// Ascend from the region's parent looking for a root bridge. The
/// namespace root itself is never a candidate. When nothing matches,
/// fall back to the region node: `_SEG`/`_BBN` evaluation then simply
/// comes up empty and the address keeps segment and bus 0.
fn find_pci_root(namespace: &dyn Namespace, region: NodeId) -> NodeId {
    let root = namespace.root();
    let mut current = namespace.parent(region);

    while let Some(node) = current {
        if node == root {
            break;
        }
        if is_pci_root(namespace, node) {
            log::trace!(
                "found a PCI root node {} controlling region {}",
                namespace.name(node),
                namespace.name(region)
            );
            return node;
        }
        current = namespace.parent(node);
    }

    log::warn!(
        "unable to find PCI root controlling region {}",
        namespace.name(region)
    );
    region
}

/// The device object that the region belongs to: the region node
/// itself or its nearest ancestor of type Device.
fn find_controlling_device(namespace: &dyn Namespace, region: NodeId) -> Option<NodeId> {
    let mut current = Some(region);

    while let Some(node) = current {
        if namespace.object_type(node) == ObjectType::Device {
            return Some(node);
        }
        current = namespace.parent(node);
    }
    None
}

/// Per-region state: the bus address resolved at attach, immutable
/// afterwards.
pub struct PciRegion {
    address: PciAddress,
}

impl PciRegion {
    pub fn address(&self) -> PciAddress {
        self.address
    }
}

/// The PCI-config address-space handler.
pub struct PciHandler;

impl RegionHandler for PciHandler {
    fn attach(
        &self,
        _platform: &dyn Platform,
        namespace: &dyn Namespace,
        region: NodeId,
    ) -> RegionResult<Box<dyn Any>> {
        namespace
            .op_region(region)
            .ok_or(RegionError::NotARegion { node: region })?;

        let pci_root = find_pci_root(namespace, region);

        let device = find_controlling_device(namespace, region).ok_or_else(|| {
            log::error!(
                "unable to find device responsible for region {}",
                namespace.name(region)
            );
            RegionError::DeviceNotFound { region }
        })?;

        let mut address = PciAddress::default();

        if let Some(adr) = namespace.eval_integer(device, "_ADR") {
            let adr = AdrValue(adr);
            address.function = adr.function() as u8;
            address.device = adr.device() as u8;
        }
        if let Some(segment) = namespace.eval_integer(pci_root, "_SEG") {
            address.segment = segment as u16;
        }
        if let Some(bus) = namespace.eval_integer(pci_root, "_BBN") {
            address.bus = bus as u8;
        }

        log::trace!(
            "detected PCI device {}@{}",
            namespace.name(device),
            address
        );

        Ok(Box::new(PciRegion { address }))
    }

    fn detach(&self, _platform: &dyn Platform, context: Box<dyn Any>) -> RegionResult<()> {
        context
            .downcast::<PciRegion>()
            .map_err(|_| RegionError::InvalidContext)?;
        Ok(())
    }

    fn read(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
    ) -> RegionResult<u64> {
        let region = context
            .downcast_ref::<PciRegion>()
            .ok_or(RegionError::InvalidContext)?;

        platform.pci_read(region.address, access.offset, access.width)
    }

    fn write(
        &self,
        platform: &dyn Platform,
        context: &dyn Any,
        access: RegionAccess,
        value: u64,
    ) -> RegionResult<()> {
        let region = context
            .downcast_ref::<PciRegion>()
            .ok_or(RegionError::InvalidContext)?;

        platform.pci_write(region.address, access.offset, access.width, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostNamespace, HostPlatform, Object, PciOp};
    use crate::iface::{OpRegion, RegionSpace};

    fn config_region() -> OpRegion {
        OpRegion {
            space: RegionSpace::PciConfig,
            base: 0,
            length: 0x100,
        }
    }

    /// `\_SB.PCI0(_HID=PNP0A08, _SEG=1, _BBN=0x40).DEV0(_ADR=0x001F0003).REG`
    fn pci_fixture() -> (HostPlatform, HostNamespace, NodeId) {
        let platform = HostPlatform::new();

        let mut ns = HostNamespace::new();
        let sb = ns.add_scope(ns.root(), "_SB_");
        let pci0 = ns.add_device(sb, "PCI0");
        ns.set_value(pci0, "_HID", Object::String("PNP0A08".into()));
        ns.set_value(pci0, "_SEG", Object::Integer(1));
        ns.set_value(pci0, "_BBN", Object::Integer(0x40));

        let dev0 = ns.add_device(pci0, "DEV0");
        ns.set_value(dev0, "_ADR", Object::Integer(0x001F_0003));

        let region = ns.add_region(dev0, "REG_", config_region());
        (platform, ns, region)
    }

    fn attach(platform: &HostPlatform, ns: &HostNamespace, region: NodeId) -> PciAddress {
        let ctx = PciHandler.attach(platform, ns, region).unwrap();
        ctx.downcast_ref::<PciRegion>().unwrap().address()
    }

    #[test]
    fn test_adr_value_encoding() {
        let mut adr = AdrValue(0);
        adr.set_device(0x1F);
        adr.set_function(0x03);
        assert_eq!(adr.0, 0x001F_0003);
        assert_eq!(adr.device(), 0x1F);
        assert_eq!(adr.function(), 0x03);
    }

    #[test]
    fn test_full_resolution() {
        let (platform, ns, region) = pci_fixture();
        assert_eq!(
            attach(&platform, &ns, region),
            PciAddress {
                segment: 1,
                bus: 0x40,
                device: 0x1F,
                function: 0x03,
            }
        );
    }

    #[test]
    fn test_root_matched_through_cid() {
        let platform = HostPlatform::new();
        let mut ns = HostNamespace::new();
        let sb = ns.add_scope(ns.root(), "_SB_");
        let pci0 = ns.add_device(sb, "PCI0");
        ns.set_value(pci0, "_HID", Object::String("VEN0001".into()));
        ns.set_value(
            pci0,
            "_CID",
            Object::Package(vec![
                Object::String("VEN0002".into()),
                Object::String("PNP0A03".into()),
            ]),
        );
        ns.set_value(pci0, "_BBN", Object::Integer(0x20));
        let dev = ns.add_device(pci0, "DEV0");
        let region = ns.add_region(dev, "REG_", config_region());

        let address = attach(&platform, &ns, region);
        assert_eq!(address.bus, 0x20);
        assert_eq!(address.segment, 0);
    }

    #[test]
    fn test_nearest_device_wins_over_root() {
        // Region is nested under DEV0, which sits under PCI0; _ADR
        // must come from DEV0 even though PCI0 is also a device.
        let (platform, mut ns, _) = pci_fixture();
        let pci0 = ns.evaluate_node("\\_SB_.PCI0").unwrap();
        ns.set_value(pci0, "_ADR", Object::Integer(0x0005_0000));

        let dev0 = ns.evaluate_node("\\_SB_.PCI0.DEV0").unwrap();
        let nested = ns.add_scope(dev0, "NEST");
        let region = ns.add_region(nested, "REG2", config_region());

        let address = attach(&platform, &ns, region);
        assert_eq!(address.device, 0x1F);
        assert_eq!(address.function, 0x03);
    }

    #[test]
    fn test_no_device_ancestor_fails() {
        let platform = HostPlatform::new();
        let mut ns = HostNamespace::new();
        let sb = ns.add_scope(ns.root(), "_SB_");
        let region = ns.add_region(sb, "REG_", config_region());

        assert_eq!(
            PciHandler.attach(&platform, &ns, region).err().unwrap(),
            RegionError::DeviceNotFound { region }
        );
    }

    #[test]
    fn test_missing_root_falls_back_to_zeros() {
        let platform = HostPlatform::new();
        let mut ns = HostNamespace::new();
        let sb = ns.add_scope(ns.root(), "_SB_");
        let dev = ns.add_device(sb, "DEV0");
        ns.set_value(dev, "_ADR", Object::Integer(0x0002_0001));
        let region = ns.add_region(dev, "REG_", config_region());

        assert_eq!(
            attach(&platform, &ns, region),
            PciAddress {
                segment: 0,
                bus: 0,
                device: 0x02,
                function: 0x01,
            }
        );
    }

    #[test]
    fn test_missing_adr_defaults_to_zero() {
        let (platform, mut ns, _) = pci_fixture();
        let pci0 = ns.evaluate_node("\\_SB_.PCI0").unwrap();
        let bare = ns.add_device(pci0, "DEV1");
        let region = ns.add_region(bare, "REG2", config_region());

        let address = attach(&platform, &ns, region);
        assert_eq!(address.device, 0);
        assert_eq!(address.function, 0);
        assert_eq!(address.segment, 1);
        assert_eq!(address.bus, 0x40);
    }

    #[test]
    fn test_adr_reserved_bits_ignored() {
        let (platform, mut ns, _) = pci_fixture();
        let dev0 = ns.evaluate_node("\\_SB_.PCI0.DEV0").unwrap();
        ns.set_value(dev0, "_ADR", Object::Integer(0xFFFF_1234_5678));
        let region = ns.add_region(dev0, "REG2", config_region());

        let address = attach(&platform, &ns, region);
        assert_eq!(address.device, 0x34);
        assert_eq!(address.function, 0x78);
    }

    #[test]
    fn test_rw_uses_resolved_address() {
        let (platform, ns, region) = pci_fixture();
        let handler = PciHandler;
        let ctx = handler.attach(&platform, &ns, region).unwrap();
        let expected = PciAddress {
            segment: 1,
            bus: 0x40,
            device: 0x1F,
            function: 0x03,
        };

        handler
            .write(
                &platform,
                ctx.as_ref(),
                RegionAccess {
                    address: 0x40,
                    offset: 0x40,
                    width: 2,
                },
                0xCAFE,
            )
            .unwrap();
        let value = handler
            .read(
                &platform,
                ctx.as_ref(),
                RegionAccess {
                    address: 0x40,
                    offset: 0x40,
                    width: 2,
                },
            )
            .unwrap();

        assert_eq!(value, 0xCAFE);
        assert_eq!(
            platform.pci_ops().last().unwrap(),
            &PciOp {
                address: expected,
                offset: 0x40,
                width: 2,
                value: 0xCAFE,
                write: false,
            }
        );
    }

    #[test]
    fn test_resolution_happens_once() {
        let (platform, ns, region) = pci_fixture();
        let handler = PciHandler;

        let ctx = handler.attach(&platform, &ns, region).unwrap();
        let evals_after_attach = ns.eval_count();

        for _ in 0..3 {
            handler
                .read(
                    &platform,
                    ctx.as_ref(),
                    RegionAccess {
                        address: 0,
                        offset: 0,
                        width: 4,
                    },
                )
                .unwrap();
        }
        assert_eq!(ns.eval_count(), evals_after_attach);
    }
}
