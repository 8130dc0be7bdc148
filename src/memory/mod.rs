//! Memory registration and scatter-gather descriptors

pub mod buffer;
pub mod registry;
pub mod sgl;

pub use buffer::{AlignedBuffer, RegisterableBuffer, BUFFER_ALIGN};
pub use registry::{MemoryRegion, MemoryRegistry, RegionHandle, ResolvedSgl};
pub use sgl::Sgl;
