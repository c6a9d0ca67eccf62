use super::entry::ShadowEntry;
use crate::{constants::SHACK_ENTRY_BYTES, error::AccelError};
use serde::Serialize;

/// Field offsets generated fast paths need to address the store directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StackLayout {
    /// Byte offset of the top-of-stack cursor inside [`ShackStore`]
    pub top_offset: usize,
    /// Byte offset of the end bound inside [`ShackStore`]
    pub end_offset: usize,
    /// Width of one entry in bytes
    pub entry_bytes: usize,
}

/// Fixed-capacity buffer of packed shadow entries.
///
/// `top` and `end` count entries from the base of `buf`. The buffer is
/// reserved once and never grows; a full store is flushed by its controller.
#[repr(C)]
pub struct ShackStore {
    top: usize,
    end: usize,
    buf: Box<[ShadowEntry]>,
}

impl ShackStore {
    pub fn with_capacity(entries: usize) -> Result<Self, AccelError> {
        if entries == 0 {
            return Err(AccelError::ZeroCapacity);
        }
        let mut buf = Vec::new();
        buf.try_reserve_exact(entries)
            .map_err(|_| AccelError::AllocationFailed {
                what: "shadow stack",
                entries,
            })?;
        buf.resize(entries, ShadowEntry::default());
        Ok(Self {
            top: 0,
            end: entries,
            buf: buf.into_boxed_slice(),
        })
    }

    pub fn layout() -> StackLayout {
        StackLayout {
            top_offset: core::mem::offset_of!(ShackStore, top),
            end_offset: core::mem::offset_of!(ShackStore, end),
            entry_bytes: SHACK_ENTRY_BYTES,
        }
    }

    #[inline(always)]
    pub fn top(&self) -> usize {
        self.top
    }

    #[inline(always)]
    pub fn end(&self) -> usize {
        self.end
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.top >= self.end
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    /// Store `entry` at the cursor and advance it. Returns `false` and leaves
    /// the store untouched when full.
    #[inline(always)]
    pub fn store_and_advance(&mut self, entry: ShadowEntry) -> bool {
        match self.buf.get_mut(self.top) {
            Some(cell) => {
                *cell = entry;
                self.top += 1;
                true
            }
            None => false,
        }
    }

    /// Retreat the cursor and return the entry it uncovered.
    #[inline(always)]
    pub fn retreat_and_load(&mut self) -> Option<ShadowEntry> {
        if self.top == 0 {
            return None;
        }
        self.top -= 1;
        Some(self.buf[self.top])
    }

    #[inline(always)]
    pub fn peek(&self) -> Option<ShadowEntry> {
        self.top.checked_sub(1).map(|i| self.buf[i])
    }

    /// Reset the cursor to the base.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.top = 0;
    }

    /// Live entries, bottom first.
    pub fn entries(&self) -> &[ShadowEntry] {
        &self.buf[..self.top]
    }
}
