use anyhow::Result;
use opregion::host::{HostNamespace, HostPlatform, Object};
use opregion::{Namespace, OpRegion, RegionManager, RegionResultExt, RegionSpace};

const MMIO_BASE: u64 = 0x1000_0000;
const MMIO_SIZE: u64 = 0x100;
const UART_BASE: u64 = 0x3F8;

fn run() -> Result<()> {
    env_logger::init();

    // Physical backing for the memory region
    let mut platform = HostPlatform::new();
    platform.add_memory(MMIO_BASE, MMIO_SIZE);

    // \_SB.PCI0(_HID=PNP0A08, _SEG=1, _BBN=0x40).DEV0(_ADR=0x001F0003)
    // with one region per address space under DEV0.
    let mut ns = HostNamespace::new();
    ns.set_value(ns.root(), "MAIN", Object::Integer(0x1234));

    let sb = ns.add_scope(ns.root(), "_SB_");
    let pci0 = ns.add_device(sb, "PCI0");
    ns.set_value(pci0, "_HID", Object::String("PNP0A08".into()));
    ns.set_value(pci0, "_SEG", Object::Integer(1));
    ns.set_value(pci0, "_BBN", Object::Integer(0x40));

    let dev0 = ns.add_device(pci0, "DEV0");
    ns.set_value(dev0, "_ADR", Object::Integer(0x001F_0003));

    let mreg = ns.add_region(
        dev0,
        "MREG",
        OpRegion {
            space: RegionSpace::SystemMemory,
            base: MMIO_BASE,
            length: MMIO_SIZE,
        },
    );
    let ireg = ns.add_region(
        dev0,
        "IREG",
        OpRegion {
            space: RegionSpace::SystemIo,
            base: UART_BASE,
            length: 8,
        },
    );
    let preg = ns.add_region(
        dev0,
        "PREG",
        OpRegion {
            space: RegionSpace::PciConfig,
            base: 0,
            length: 0x100,
        },
    );

    let mut manager = RegionManager::new();
    manager.install_default_handlers(&ns);

    if let Some(Object::Integer(value)) = ns.evaluate("\\MAIN") {
        println!("\\MAIN evaluates to {value:#x}");
    }

    manager
        .write(&platform, &ns, mreg, MMIO_BASE, 4, 0xDEAD_BEEF)
        .with_region_context("write", MMIO_BASE)?;
    let value = manager
        .read(&platform, &ns, mreg, MMIO_BASE, 4)
        .with_region_context("read", MMIO_BASE)?;
    println!("MMIO round-trip at {MMIO_BASE:#x}: {value:#010x}");

    manager
        .write(&platform, &ns, ireg, UART_BASE + 2, 1, 0x5A)
        .with_region_context("write", UART_BASE + 2)?;
    let port_op = *platform.port_ops().last().unwrap();
    println!(
        "port write reached the platform as offset {} width {} value {:#x}",
        port_op.offset, port_op.width, port_op.value
    );

    let vendor = manager
        .read(&platform, &ns, preg, 0, 4)
        .with_region_context("read", 0)?;
    let pci_op = *platform.pci_ops().last().unwrap();
    println!(
        "PCI config read of dword 0 via {}: {vendor:#010x}",
        pci_op.address
    );

    manager.detach_all(&platform)?;
    println!("all regions detached");

    Ok(())
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e:#}");
        }
    }
}
