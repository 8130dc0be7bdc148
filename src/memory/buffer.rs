//! Buffer providers
//!
//! Anything that owns a stable, contiguous run of bytes can be registered.
//! The registry and SGLs are written against [`RegisterableBuffer`] only, so
//! plain allocations, aligned DMA buffers and numeric arrays all share the
//! same registration path.

use crate::common::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

/// Alignment of [`AlignedBuffer`] allocations (cache line).
pub const BUFFER_ALIGN: usize = 64;

/// A buffer whose bytes keep a stable address for as long as it is owned.
///
/// Implementors must return the same memory from every call; the registry
/// records the base address once, at registration time.
pub trait RegisterableBuffer: Send + 'static {
    fn as_bytes(&self) -> &[u8];

    fn as_bytes_mut(&mut self) -> &mut [u8];

    fn byte_len(&self) -> usize {
        self.as_bytes().len()
    }
}

impl RegisterableBuffer for Vec<u8> {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl RegisterableBuffer for Box<[u8]> {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl RegisterableBuffer for bytes::BytesMut {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

macro_rules! numeric_buffer {
    ($($t:ty),*) => {
        $(
            impl RegisterableBuffer for Vec<$t> {
                fn as_bytes(&self) -> &[u8] {
                    // SAFETY: plain numeric type without padding; every byte is initialized.
                    unsafe {
                        std::slice::from_raw_parts(
                            self.as_ptr() as *const u8,
                            std::mem::size_of_val(self.as_slice()),
                        )
                    }
                }

                fn as_bytes_mut(&mut self) -> &mut [u8] {
                    let len = std::mem::size_of_val(self.as_slice());
                    // SAFETY: every bit pattern is a valid value of the element type.
                    unsafe { std::slice::from_raw_parts_mut(self.as_mut_ptr() as *mut u8, len) }
                }
            }
        )*
    };
}

numeric_buffer!(f32, f64, u16, u32, u64, i8, i16, i32, i64);

/// Zero-initialized, cache-line aligned heap buffer.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: AlignedBuffer uniquely owns its allocation.
unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `len` zeroed bytes aligned to [`BUFFER_ALIGN`].
    pub fn new(len: usize) -> Result<Self> {
        if len == 0 {
            return Err(Error::Registration("buffer length cannot be 0".into()));
        }

        let layout = Self::layout(len)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::OutOfMemory,
                "failed to allocate aligned buffer",
            ))
        })?;

        Ok(Self { ptr, len })
    }

    /// Allocate and fill from `data`.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let mut buf = Self::new(data.len())?;
        buf.as_bytes_mut().copy_from_slice(data);
        Ok(buf)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn layout(len: usize) -> Result<Layout> {
        Layout::from_size_align(len, BUFFER_ALIGN)
            .map_err(|_| Error::Registration(format!("invalid buffer layout for {} bytes", len)))
    }
}

impl RegisterableBuffer for AlignedBuffer {
    fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is valid for len initialized bytes for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        if let Ok(layout) = Self::layout(self.len) {
            // SAFETY: allocated in `new` with the same layout.
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aligned_buffer() {
        let buf = AlignedBuffer::new(4096).unwrap();
        assert_eq!(buf.as_bytes().as_ptr() as usize % BUFFER_ALIGN, 0);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
        assert!(AlignedBuffer::new(0).is_err());
    }

    #[test]
    fn test_aligned_from_slice() {
        let buf = AlignedBuffer::from_slice(b"456").unwrap();
        assert_eq!(buf.as_bytes(), b"456");
        assert_eq!(buf.byte_len(), 3);
    }

    #[test]
    fn test_numeric_arrays_expose_bytes() {
        let mut floats: Vec<f32> = vec![1.0, 2.0, 3.0];
        assert_eq!(floats.byte_len(), 12);
        assert_eq!(&floats.as_bytes()[..4], &1.0f32.to_ne_bytes());

        floats.as_bytes_mut()[4..8].copy_from_slice(&9.5f32.to_ne_bytes());
        assert_eq!(floats[1], 9.5);

        let ints: Vec<i64> = vec![-1; 4];
        assert_eq!(ints.byte_len(), 32);
    }

    #[test]
    fn test_bytes_mut_provider() {
        let mut buf = bytes::BytesMut::zeroed(8);
        buf.as_bytes_mut()[0] = 7;
        assert_eq!(buf.as_bytes()[0], 7);
        assert_eq!(buf.byte_len(), 8);
    }
}
