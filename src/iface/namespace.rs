//! The seam between the region backings and the ACPI namespace.
//!
//! The interpreter owns the namespace tree; the backings only ever walk
//! parent links and evaluate a handful of well-known methods on the way
//! to resolving a region. Everything they need is behind [`Namespace`],
//! so the core never sees the interpreter's object model.

use core::fmt;

/// Handle to a node in the ACPI namespace tree, minted by the
/// namespace owner and opaque to the backings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// What kind of object a namespace node carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Scope,
    Device,
    Region,
}

/// The address space backing an operation region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionSpace {
    SystemMemory,
    SystemIo,
    PciConfig,
    EmbeddedControl,
    SmBus,
    SystemCmos,
    PciBarTarget,
    Ipmi,
    GeneralPurposeIo,
    GenericSerialBus,
    Pcc,
    Oem(u8),
}

impl From<u8> for RegionSpace {
    fn from(value: u8) -> Self {
        match value {
            0 => RegionSpace::SystemMemory,
            1 => RegionSpace::SystemIo,
            2 => RegionSpace::PciConfig,
            3 => RegionSpace::EmbeddedControl,
            4 => RegionSpace::SmBus,
            5 => RegionSpace::SystemCmos,
            6 => RegionSpace::PciBarTarget,
            7 => RegionSpace::Ipmi,
            8 => RegionSpace::GeneralPurposeIo,
            9 => RegionSpace::GenericSerialBus,
            10 => RegionSpace::Pcc,
            _ => RegionSpace::Oem(value),
        }
    }
}

/// Operation-region descriptor as declared by the firmware:
/// a window of `length` bytes at `base` within `space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpRegion {
    pub space: RegionSpace,
    pub base: u64,
    pub length: u64,
}

/// Namespace access consumed by the backings.
///
/// Method evaluation is best-effort by design: an absent `_HID`,
/// `_CID`, `_ADR`, `_SEG` or `_BBN` yields `None`, never an error.
pub trait Namespace {
    /// The namespace root.
    fn root(&self) -> NodeId;

    /// Parent of `node`, `None` for the root.
    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// The node's four-character name segment.
    fn name(&self, node: NodeId) -> String;

    fn object_type(&self, node: NodeId) -> ObjectType;

    /// The operation-region descriptor, if `node` is a region.
    fn op_region(&self, node: NodeId) -> Option<OpRegion>;

    /// Evaluate `_HID` on `node`.
    fn eval_hid(&self, node: NodeId) -> Option<String>;

    /// Evaluate `_CID` on `node` (a list of compatible ids).
    fn eval_cid(&self, node: NodeId) -> Option<Vec<String>>;

    /// Evaluate the named child of `node` to an integer.
    fn eval_integer(&self, node: NodeId, name: &str) -> Option<u64>;
}
