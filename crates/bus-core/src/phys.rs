//! Physical backing-store pools and the privileged raw access path.
//!
//! A [`PhysicalMemory`] owns its byte buffer for the machine lifetime.
//! Regions never hold independent pointers into a pool: aliasing views are
//! [`MemView`] handles (offset + length + shared back-reference), so slicing
//! cannot outlive the owner and all lifetime questions stay in one place.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

/// Errors raised by pool construction and the raw physical access paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MemError {
    /// A pool or view was requested with a zero size.
    #[error("physical memory size must be non-zero")]
    InvalidSize,
    /// An offset/length pair falls outside the backing buffer.
    #[error("range {offset:#x}+{len} exceeds pool size {size}")]
    OutOfRange {
        /// Requested start offset.
        offset: usize,
        /// Requested length in bytes.
        len: usize,
        /// Size of the pool the request was checked against.
        size: usize,
    },
}

/// Capability token for raw writes that bypass bus permission checks.
///
/// Possession is the authorization. The only constructor is
/// [`DebugPrivilege::acquire_for_tooling`], so the privileged path has to be
/// reached deliberately by initializers and debuggers and is never on the
/// ordinary dispatch route.
#[derive(Debug, Clone, Copy)]
pub struct DebugPrivilege(());

impl DebugPrivilege {
    /// Obtains the token for trusted initializers and debug tooling.
    #[must_use]
    pub const fn acquire_for_tooling() -> Self {
        Self(())
    }
}

/// Owned, fixed-size, zero-initialized raw backing store.
///
/// Pools are allocated once at bring-up and never resized; growing a pool
/// means reallocating and remapping every dependent region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalMemory {
    label: String,
    bytes: Box<[u8]>,
}

impl PhysicalMemory {
    /// Allocates a zero-filled pool of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::InvalidSize`] when `size` is zero.
    pub fn new(size: usize, label: &str) -> Result<Self, MemError> {
        if size == 0 {
            return Err(MemError::InvalidSize);
        }
        Ok(Self {
            label: label.to_owned(),
            bytes: vec![0; size].into_boxed_slice(),
        })
    }

    /// Pool size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Human-readable pool label used in diagnostics.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whole-buffer immutable view for inspection tooling.
    #[must_use]
    pub const fn as_read_only_view(&self) -> &[u8] {
        &self.bytes
    }

    /// Bounds-checked raw read of `len` bytes starting at `offset`.
    ///
    /// No permission or fault machinery runs here; access control is the
    /// responsibility of the layers above.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when the range exceeds the pool.
    pub fn read_physical(&self, offset: usize, len: usize) -> Result<&[u8], MemError> {
        self.check_range(offset, len)?;
        Ok(&self.bytes[offset..offset + len])
    }

    /// Bounds-checked raw write bypassing all region permission logic.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when the range exceeds the pool.
    pub fn write_physical(
        &mut self,
        _privilege: DebugPrivilege,
        offset: usize,
        bytes: &[u8],
    ) -> Result<(), MemError> {
        self.check_range(offset, bytes.len())?;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Single-byte form of [`Self::write_physical`].
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when `offset` exceeds the pool.
    pub fn write_byte_physical(
        &mut self,
        privilege: DebugPrivilege,
        offset: usize,
        byte: u8,
    ) -> Result<(), MemError> {
        self.write_physical(privilege, offset, &[byte])
    }

    /// Write path for region-routed traffic. Permission checks already ran
    /// in dispatch, so no token is demanded here; the method is crate-only.
    pub(crate) fn write_internal(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MemError> {
        self.check_range(offset, bytes.len())?;
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), MemError> {
        let fits = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.bytes.len());
        if fits {
            Ok(())
        } else {
            Err(MemError::OutOfRange {
                offset,
                len,
                size: self.bytes.len(),
            })
        }
    }
}

/// Shared-ownership handle for a pool aliased by several regions.
///
/// All traffic happens on the single machine thread, so interior mutability
/// through `RefCell` is sufficient; region permission checks are the guard
/// against unintended access paths.
pub type SharedMemory = Rc<RefCell<PhysicalMemory>>;

/// Wraps a pool for sharing between aliasing regions.
#[must_use]
pub fn share(memory: PhysicalMemory) -> SharedMemory {
    Rc::new(RefCell::new(memory))
}

/// Non-owning, bounds-checked window into a shared pool.
#[derive(Debug, Clone)]
pub struct MemView {
    memory: SharedMemory,
    offset: usize,
    len: usize,
}

impl MemView {
    /// Creates a view covering `offset..offset + len` of `memory`.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::InvalidSize`] for a zero-length view and
    /// [`MemError::OutOfRange`] when the range exceeds the pool.
    pub fn new(memory: &SharedMemory, offset: usize, len: usize) -> Result<Self, MemError> {
        if len == 0 {
            return Err(MemError::InvalidSize);
        }
        let size = memory.borrow().size();
        let fits = offset.checked_add(len).is_some_and(|end| end <= size);
        if !fits {
            return Err(MemError::OutOfRange { offset, len, size });
        }
        Ok(Self {
            memory: Rc::clone(memory),
            offset,
            len,
        })
    }

    /// Creates a view covering the whole pool.
    #[must_use]
    pub fn whole(memory: &SharedMemory) -> Self {
        let len = memory.borrow().size();
        Self {
            memory: Rc::clone(memory),
            offset: 0,
            len,
        }
    }

    /// View length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Always false: zero-length views are rejected at construction.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads one byte at a view-relative offset.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when `rel` is outside the view.
    pub fn read_byte(&self, rel: usize) -> Result<u8, MemError> {
        self.check(rel, 1)?;
        let memory = self.memory.borrow();
        Ok(memory.as_read_only_view()[self.offset + rel])
    }

    /// Reads `buf.len()` bytes starting at a view-relative offset.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when the range exceeds the view.
    pub fn read(&self, rel: usize, buf: &mut [u8]) -> Result<(), MemError> {
        self.check(rel, buf.len())?;
        let memory = self.memory.borrow();
        let start = self.offset + rel;
        buf.copy_from_slice(&memory.as_read_only_view()[start..start + buf.len()]);
        Ok(())
    }

    /// Writes one byte at a view-relative offset.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when `rel` is outside the view.
    pub fn write_byte(&self, rel: usize, byte: u8) -> Result<(), MemError> {
        self.write(rel, &[byte])
    }

    /// Writes `bytes` starting at a view-relative offset.
    ///
    /// # Errors
    ///
    /// Returns [`MemError::OutOfRange`] when the range exceeds the view.
    pub fn write(&self, rel: usize, bytes: &[u8]) -> Result<(), MemError> {
        self.check(rel, bytes.len())?;
        self.memory
            .borrow_mut()
            .write_internal(self.offset + rel, bytes)
    }

    fn check(&self, rel: usize, len: usize) -> Result<(), MemError> {
        let fits = rel.checked_add(len).is_some_and(|end| end <= self.len);
        if fits {
            Ok(())
        } else {
            Err(MemError::OutOfRange {
                offset: rel,
                len,
                size: self.len,
            })
        }
    }
}
