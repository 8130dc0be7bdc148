//! Memory region registry
//!
//! Registration hands a buffer to the registry and returns a
//! [`MemoryRegion`] that owns it. The registry keeps a handle table with a
//! generation counter per slot, so a handle that outlived its deregistration
//! is detected instead of aliasing whatever region reuses the slot.
//!
//! Lifecycle:
//! ```text
//! register(buf) -> MemoryRegion (handle live)
//!   region.sgl() -> Sgl -> session op -> resolve(sgl) -> bytes
//! deregister(&mut region)           (handle dead, slot generation bumped)
//! region.into_inner() -> buf
//! ```

use super::buffer::RegisterableBuffer;
use super::sgl::Sgl;
use crate::common::{ClientConfig, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Opaque registration handle. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionHandle(NonZeroU64);

impl RegionHandle {
    fn new(index: usize, generation: u32) -> Self {
        let raw = ((generation as u64) << 32) | (index as u64 + 1);
        // index + 1 keeps the low half non-zero
        RegionHandle(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Rebuild a handle from its raw value. Zero is the invalid sentinel.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(RegionHandle)
    }

    pub fn as_raw(&self) -> u64 {
        self.0.get()
    }

    fn index(&self) -> usize {
        ((self.0.get() & 0xFFFF_FFFF) - 1) as usize
    }

    fn generation(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0.get())
    }
}

/// Type-erased access to a registered buffer's bytes
trait RegionStorage: Send + Sync {
    fn read_into(&self, offset: usize, out: &mut [u8]);
    fn write_from(&self, offset: usize, src: &[u8]);
}

struct RegionCell<B> {
    buf: Mutex<B>,
}

impl<B: RegisterableBuffer> RegionCell<B> {
    fn lock(&self) -> MutexGuard<'_, B> {
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<B: RegisterableBuffer> RegionStorage for RegionCell<B> {
    fn read_into(&self, offset: usize, out: &mut [u8]) {
        let buf = self.lock();
        out.copy_from_slice(&buf.as_bytes()[offset..offset + out.len()]);
    }

    fn write_from(&self, offset: usize, src: &[u8]) {
        let mut buf = self.lock();
        buf.as_bytes_mut()[offset..offset + src.len()].copy_from_slice(src);
    }
}

struct SlotEntry {
    storage: Arc<dyn RegionStorage>,
    base: u64,
    len: usize,
}

#[derive(Default)]
struct Slot {
    generation: u32,
    entry: Option<SlotEntry>,
}

struct RegistryTable {
    slots: Vec<Slot>,
    free: Vec<usize>,
    live: usize,
    registered_bytes: u64,
    max_regions: usize,
    max_registered_bytes: u64,
}

impl RegistryTable {
    fn entry(&self, handle: RegionHandle) -> Option<&SlotEntry> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.entry.as_ref())
    }

    /// Remove a live entry. With `force` unset, refuse while an accessor
    /// besides the owning region still references the storage.
    fn release(&mut self, handle: RegionHandle, force: bool) -> Result<()> {
        let slot = self
            .slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation() && slot.entry.is_some())
            .ok_or_else(|| Error::InvalidRegion(handle.to_string()))?;

        if let Some(entry) = slot.entry.as_ref() {
            // one reference in the table, one in the owning region
            if !force && Arc::strong_count(&entry.storage) > 2 {
                return Err(Error::RegionBusy(handle.to_string()));
            }
        }

        if let Some(entry) = slot.entry.take() {
            self.live -= 1;
            self.registered_bytes -= entry.len as u64;
        }
        slot.generation = slot.generation.wrapping_add(1).max(1);
        self.free.push(handle.index());
        Ok(())
    }
}

/// A buffer owned by the registry's bookkeeping until it is deregistered.
///
/// The buffer cannot be freed or resized while registered: it is only
/// reachable through [`read`](Self::read)/[`write`](Self::write) and is
/// handed back by [`into_inner`](Self::into_inner) after deregistration.
/// Dropping a still-registered region deregisters it with a warning.
pub struct MemoryRegion<B: RegisterableBuffer> {
    handle: Option<RegionHandle>,
    base: u64,
    len: usize,
    cell: Arc<RegionCell<B>>,
    table: Weak<Mutex<RegistryTable>>,
}

impl<B: RegisterableBuffer> MemoryRegion<B> {
    /// Live handle, or `None` once deregistered
    pub fn handle(&self) -> Option<RegionHandle> {
        self.handle
    }

    pub fn is_registered(&self) -> bool {
        self.handle.is_some()
    }

    /// Address of the first registered byte
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// SGL covering the whole region
    pub fn sgl(&self) -> Result<Sgl> {
        self.sgl_range(0, self.len)
    }

    /// SGL covering `len` bytes starting `offset` bytes into the region
    pub fn sgl_range(&self, offset: usize, len: usize) -> Result<Sgl> {
        let handle = self
            .handle
            .ok_or_else(|| Error::InvalidRegion("region is not registered".into()))?;

        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| {
                Error::InvalidSgl(format!(
                    "range {}+{} exceeds region length {}",
                    offset, len, self.len
                ))
            })?;
        let length = u32::try_from(end - offset)
            .map_err(|_| Error::InvalidSgl(format!("length {} exceeds u32", len)))?;

        Ok(Sgl::new(self.base + offset as u64, length, handle))
    }

    /// Run `f` over the registered bytes
    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let buf = self.cell.lock();
        f(&buf.as_bytes()[..self.len])
    }

    /// Run `f` over the registered bytes, mutably
    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut buf = self.cell.lock();
        f(&mut buf.as_bytes_mut()[..self.len])
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Deregister if still registered and give the buffer back.
    ///
    /// While an operation still holds the region's bytes this fails with
    /// [`Error::RegionBusy`] and hands the region back unchanged, still
    /// registered if it was before.
    pub fn into_inner(mut self) -> std::result::Result<B, (Error, Self)> {
        if let Some(handle) = self.handle {
            if let Some(table) = self.table.upgrade() {
                let released = lock_table(&table).release(handle, false);
                if let Err(e) = released {
                    return Err((e, self));
                }
            }
            self.handle = None;
        }

        let base = self.base;
        let len = self.len;
        let table = self.table.clone();
        let cell = Arc::clone(&self.cell);
        drop(self);

        match Arc::try_unwrap(cell) {
            Ok(cell) => Ok(cell.buf.into_inner().unwrap_or_else(|e| e.into_inner())),
            Err(cell) => Err((
                Error::RegionBusy(format!("{:#x}", base)),
                MemoryRegion {
                    handle: None,
                    base,
                    len,
                    cell,
                    table,
                },
            )),
        }
    }
}

impl<B: RegisterableBuffer> fmt::Debug for MemoryRegion<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("handle", &self.handle)
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .finish()
    }
}

impl<B: RegisterableBuffer> Drop for MemoryRegion<B> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::warn!("Region {} dropped while registered, deregistering", handle);
        if let Some(table) = self.table.upgrade() {
            let _ = lock_table(&table).release(handle, true);
        }
    }
}

/// Bytes an SGL resolved to, valid while this value is alive
pub struct ResolvedSgl {
    storage: Arc<dyn RegionStorage>,
    offset: usize,
    len: usize,
}

impl ResolvedSgl {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy out the described bytes
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len];
        self.storage.read_into(self.offset, &mut out);
        out
    }

    /// Fill the start of the described bytes from `src`
    pub fn fill(&self, src: &[u8]) -> Result<()> {
        if src.len() > self.len {
            return Err(Error::InvalidSgl(format!(
                "{} bytes do not fit in an SGL of {}",
                src.len(),
                self.len
            )));
        }
        self.storage.write_from(self.offset, src);
        Ok(())
    }
}

/// Table of live registrations shared by every session of a process
#[derive(Clone)]
pub struct MemoryRegistry {
    table: Arc<Mutex<RegistryTable>>,
}

fn lock_table(table: &Mutex<RegistryTable>) -> MutexGuard<'_, RegistryTable> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

impl MemoryRegistry {
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_limits(config.max_regions, config.max_registered_bytes)
    }

    pub fn with_limits(max_regions: usize, max_registered_bytes: u64) -> Self {
        Self {
            table: Arc::new(Mutex::new(RegistryTable {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
                registered_bytes: 0,
                max_regions,
                max_registered_bytes,
            })),
        }
    }

    /// Register the whole buffer
    pub fn register<B: RegisterableBuffer>(&self, buf: B) -> Result<MemoryRegion<B>> {
        let len = buf.byte_len();
        self.register_prefix(buf, len)
    }

    /// Register the first `len` bytes of the buffer
    pub fn register_prefix<B: RegisterableBuffer>(
        &self,
        buf: B,
        len: usize,
    ) -> Result<MemoryRegion<B>> {
        if len == 0 {
            return Err(Error::Registration("cannot register a zero-length range".into()));
        }
        if len > buf.byte_len() {
            return Err(Error::Registration(format!(
                "range of {} bytes exceeds buffer of {}",
                len,
                buf.byte_len()
            )));
        }

        let cell = Arc::new(RegionCell {
            buf: Mutex::new(buf),
        });
        let base = cell.lock().as_bytes().as_ptr() as u64;

        let mut table = lock_table(&self.table);
        if table.live >= table.max_regions {
            return Err(Error::Registration(format!(
                "region limit reached ({})",
                table.max_regions
            )));
        }
        if table.registered_bytes + len as u64 > table.max_registered_bytes {
            return Err(Error::Registration(format!(
                "registered byte limit reached ({} + {} > {})",
                table.registered_bytes, len, table.max_registered_bytes
            )));
        }

        let index = match table.free.pop() {
            Some(index) => index,
            None => {
                table.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                table.slots.len() - 1
            }
        };
        let slot = &mut table.slots[index];
        slot.entry = Some(SlotEntry {
            storage: cell.clone(),
            base,
            len,
        });
        let handle = RegionHandle::new(index, slot.generation);
        table.live += 1;
        table.registered_bytes += len as u64;
        drop(table);

        tracing::debug!("Registered region {} ({} bytes at {:#x})", handle, len, base);

        Ok(MemoryRegion {
            handle: Some(handle),
            base,
            len,
            cell,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Release a registration.
    ///
    /// Deregistering twice, or a region that belongs to another registry,
    /// fails with [`Error::InvalidRegion`]. Fails with [`Error::RegionBusy`]
    /// while an operation still holds the region's bytes.
    pub fn deregister<B: RegisterableBuffer>(&self, region: &mut MemoryRegion<B>) -> Result<()> {
        let handle = region
            .handle
            .ok_or_else(|| Error::InvalidRegion("region already deregistered".into()))?;
        if !Weak::ptr_eq(&region.table, &Arc::downgrade(&self.table)) {
            return Err(Error::InvalidRegion(format!(
                "{} belongs to another registry",
                handle
            )));
        }

        lock_table(&self.table).release(handle, false)?;
        region.handle = None;

        tracing::debug!("Deregistered region {}", handle);
        Ok(())
    }

    /// Resolve an SGL against the live table
    pub fn resolve(&self, sgl: &Sgl) -> Result<ResolvedSgl> {
        let table = lock_table(&self.table);
        let entry = table
            .entry(sgl.handle)
            .ok_or_else(|| Error::InvalidRegion(sgl.handle.to_string()))?;

        let offset = sgl
            .addr
            .checked_sub(entry.base)
            .map(|o| o as usize)
            .filter(|&o| o.checked_add(sgl.len()).is_some_and(|end| end <= entry.len))
            .ok_or_else(|| {
                Error::InvalidSgl(format!(
                    "{:#x}+{} outside region {} [{:#x}, +{})",
                    sgl.addr, sgl.length, sgl.handle, entry.base, entry.len
                ))
            })?;

        Ok(ResolvedSgl {
            storage: entry.storage.clone(),
            offset,
            len: sgl.len(),
        })
    }

    pub fn is_registered(&self, handle: RegionHandle) -> bool {
        lock_table(&self.table).entry(handle).is_some()
    }

    pub fn live_regions(&self) -> usize {
        lock_table(&self.table).live
    }

    pub fn registered_bytes(&self) -> u64 {
        lock_table(&self.table).registered_bytes
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(&ClientConfig::default())
    }
}

impl fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = lock_table(&self.table);
        f.debug_struct("MemoryRegistry")
            .field("live", &table.live)
            .field("registered_bytes", &table.registered_bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::AlignedBuffer;

    #[test]
    fn test_register_and_resolve() {
        let registry = MemoryRegistry::default();
        let region = registry.register(b"456".to_vec()).unwrap();

        let sgl = region.sgl().unwrap();
        assert_eq!(sgl.length, 3);
        assert_eq!(sgl.addr, region.base());
        assert_eq!(registry.resolve(&sgl).unwrap().to_vec(), b"456");
        assert_eq!(registry.live_regions(), 1);
        assert_eq!(registry.registered_bytes(), 3);
    }

    #[test]
    fn test_zero_length_is_refused() {
        let registry = MemoryRegistry::default();
        assert!(matches!(
            registry.register(Vec::<u8>::new()),
            Err(Error::Registration(_))
        ));
    }

    #[test]
    fn test_handles_are_unique_and_nonzero() {
        let registry = MemoryRegistry::default();
        let regions: Vec<_> = (0..16)
            .map(|_| registry.register(vec![0u8; 8]).unwrap())
            .collect();

        let mut raw: Vec<u64> = regions.iter().map(|r| r.handle().unwrap().as_raw()).collect();
        assert!(raw.iter().all(|&h| h != 0));
        raw.sort_unstable();
        raw.dedup();
        assert_eq!(raw.len(), 16);

        for mut region in regions {
            registry.deregister(&mut region).unwrap();
        }
        assert_eq!(registry.live_regions(), 0);
    }

    #[test]
    fn test_double_deregister_is_an_error() {
        let registry = MemoryRegistry::default();
        let mut region = registry.register(vec![1u8; 32]).unwrap();

        registry.deregister(&mut region).unwrap();
        assert!(matches!(
            registry.deregister(&mut region),
            Err(Error::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_stale_sgl_after_slot_reuse() {
        let registry = MemoryRegistry::default();
        let mut first = registry.register(vec![1u8; 32]).unwrap();
        let stale = first.sgl().unwrap();
        registry.deregister(&mut first).unwrap();

        // reuses the freed slot with a new generation
        let second = registry.register(vec![2u8; 32]).unwrap();
        assert_ne!(second.handle().unwrap(), stale.handle);
        assert!(matches!(
            registry.resolve(&stale),
            Err(Error::InvalidRegion(_))
        ));
        assert!(!registry.is_registered(stale.handle));
    }

    #[test]
    fn test_sgl_bounds() {
        let registry = MemoryRegistry::default();
        let region = registry.register(vec![0u8; 16]).unwrap();

        assert!(region.sgl_range(8, 8).is_ok());
        assert!(matches!(region.sgl_range(8, 9), Err(Error::InvalidSgl(_))));

        let forged = Sgl::new(region.base() + 12, 8, region.handle().unwrap());
        assert!(matches!(registry.resolve(&forged), Err(Error::InvalidSgl(_))));
        let before = Sgl::new(region.base().wrapping_sub(1), 1, region.handle().unwrap());
        assert!(matches!(registry.resolve(&before), Err(Error::InvalidSgl(_))));
    }

    #[test]
    fn test_resolved_fill_writes_through() {
        let registry = MemoryRegistry::default();
        let region = registry.register(AlignedBuffer::new(8).unwrap()).unwrap();

        let resolved = registry.resolve(&region.sgl_range(2, 4).unwrap()).unwrap();
        resolved.fill(b"abcd").unwrap();
        assert!(resolved.fill(b"abcde").is_err());
        drop(resolved);

        assert_eq!(region.to_vec(), b"\0\0abcd\0\0");
    }

    #[test]
    fn test_busy_region_cannot_be_deregistered() {
        let registry = MemoryRegistry::default();
        let mut region = registry.register(vec![0u8; 8]).unwrap();

        let in_flight = registry.resolve(&region.sgl().unwrap()).unwrap();
        assert!(matches!(
            registry.deregister(&mut region),
            Err(Error::RegionBusy(_))
        ));
        drop(in_flight);
        registry.deregister(&mut region).unwrap();
    }

    #[test]
    fn test_limits() {
        let registry = MemoryRegistry::with_limits(2, 64);
        let _a = registry.register(vec![0u8; 32]).unwrap();
        assert!(registry.register(vec![0u8; 33]).is_err());
        let _b = registry.register(vec![0u8; 32]).unwrap();
        assert!(registry.register(vec![0u8; 1]).is_err());
    }

    #[test]
    fn test_into_inner_returns_buffer() {
        let registry = MemoryRegistry::default();
        let region = registry.register(b"payload".to_vec()).unwrap();
        region.write(|bytes| bytes[0] = b'P');

        let buf = region.into_inner().unwrap();
        assert_eq!(buf, b"Payload");
        assert_eq!(registry.live_regions(), 0);
    }

    #[test]
    fn test_into_inner_while_in_use_keeps_registration() {
        let registry = MemoryRegistry::default();
        let region = registry.register(b"payload".to_vec()).unwrap();
        let handle = region.handle().unwrap();
        let in_flight = registry.resolve(&region.sgl().unwrap()).unwrap();

        let (err, region) = region.into_inner().unwrap_err();
        assert!(matches!(err, Error::RegionBusy(_)));
        assert!(registry.is_registered(handle));
        assert_eq!(region.handle(), Some(handle));
        assert_eq!(in_flight.to_vec(), b"payload");

        drop(in_flight);
        assert_eq!(region.into_inner().unwrap(), b"payload");
        assert!(!registry.is_registered(handle));
    }

    #[test]
    fn test_drop_deregisters() {
        let registry = MemoryRegistry::default();
        let region = registry.register(vec![0u8; 8]).unwrap();
        let handle = region.handle().unwrap();
        drop(region);
        assert!(!registry.is_registered(handle));
        assert_eq!(registry.registered_bytes(), 0);
    }

    #[test]
    fn test_prefix_registration() {
        let registry = MemoryRegistry::default();
        let region = registry.register_prefix(vec![7u8; 64], 16).unwrap();
        assert_eq!(region.len(), 16);
        assert_eq!(region.sgl().unwrap().length, 16);
        assert!(registry.register_prefix(vec![0u8; 4], 5).is_err());
    }
}
