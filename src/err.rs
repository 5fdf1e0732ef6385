use crate::iface::{NodeId, RegionSpace};
use anyhow::Context;
use thiserror::Error;

/// Failures surfaced by the region backings and the platform layer.
///
/// Platform primitives return this type directly, so a failed port or
/// PCI access propagates to the interpreter unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    #[error("Out of memory: cannot allocate {requested} bytes")]
    OutOfMemory { requested: u64 },

    #[error("Unable to map range at 0x{base:x} (size: {size})")]
    MappingFailed { base: u64, size: u64 },

    #[error("No device ancestor controls region {region}")]
    DeviceNotFound { region: NodeId },

    #[error("No handler registered for {space:?} regions")]
    NoHandler { space: RegionSpace },

    #[error("Invalid access width: {width} bytes (must be 1, 2, 4, or 8)")]
    InvalidWidth { width: u8 },

    #[error("Region context has the wrong type for this handler")]
    InvalidContext,

    #[error("Region {region} is not attached")]
    NotAttached { region: NodeId },

    #[error("Node {node} is not an operation region")]
    NotARegion { node: NodeId },

    #[error("Access at 0x{address:x} is outside the region")]
    OutOfBounds { address: u64 },
}

/// Result type alias for region operations
pub type RegionResult<T> = Result<T, RegionError>;

/// Extension trait for adding access context when reporting upward
pub trait RegionResultExt<T> {
    /// Add context about a region operation at an absolute address
    fn with_region_context(self, operation: &str, address: u64) -> anyhow::Result<T>;
}

impl<T> RegionResultExt<T> for RegionResult<T> {
    fn with_region_context(self, operation: &str, address: u64) -> anyhow::Result<T> {
        self.map_err(|e| {
            anyhow::Error::from(e).context(format!(
                "Region operation '{operation}' failed at address 0x{address:x}"
            ))
        })
    }
}

impl<T> RegionResultExt<T> for anyhow::Result<T> {
    fn with_region_context(self, operation: &str, address: u64) -> anyhow::Result<T> {
        self.with_context(|| format!("Region operation '{operation}' failed at address 0x{address:x}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RegionError::MappingFailed {
            base: 0x10000,
            size: 0x100,
        };
        assert_eq!(err.to_string(), "Unable to map range at 0x10000 (size: 256)");

        let err = RegionError::InvalidWidth { width: 3 };
        assert!(err.to_string().contains("3 bytes"));

        let err = RegionError::OutOfMemory { requested: 64 };
        assert!(err.to_string().contains("64 bytes"));
    }

    #[test]
    fn test_region_context() {
        let result: RegionResult<u64> = Err(RegionError::InvalidWidth { width: 16 });
        let err = result.with_region_context("read", 0x3F8).unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("Region operation 'read' failed"));
        assert!(text.contains("0x3f8"));
        assert!(text.contains("16 bytes"));
    }
}
