//! Scatter-gather descriptor

use super::registry::RegionHandle;
use serde::{Deserialize, Serialize};

/// Exactly the bytes one operation sends or receives.
///
/// A plain value borrowing a registered region by handle. `addr` is the
/// absolute address of the first byte, inside the region's
/// `[base, base + len)` range. Validity is checked against the registry at
/// the moment of use, never at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sgl {
    pub addr: u64,
    pub length: u32,
    pub handle: RegionHandle,
}

impl Sgl {
    pub fn new(addr: u64, length: u32, handle: RegionHandle) -> Self {
        Self {
            addr,
            length,
            handle,
        }
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}
