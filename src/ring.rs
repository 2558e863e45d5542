// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Slot-indexed ring queue over a region of device-shared memory.
//
// The ring does not own its storage: the mapping is established (and later
// released) by the device handle, and both kernel and user side index the
// same slots. Each slot is a fixed-size header followed by `slot_size`
// payload bytes; the write and read cursors are independent integers that
// advance modulo `slot_count`. There is no overflow check: flow control is
// the ioctl contract (SEND blocks or errors in the kernel when no slot is
// free, RECV slots are only read after POLLIN).

use crate::uapi;

/// A fixed-capacity ring of message slots in externally owned memory.
pub struct Ring {
    base: *mut u8,
    slot_size: usize,
    slot_count: usize,
    stride: usize,
    wp: usize,
    rp: usize,
}

// The ring is confined to one thread at a time by its owner (the send state
// mutex or the delivery worker); the raw base pointer alone makes it !Send.
unsafe impl Send for Ring {}

impl Ring {
    /// Create a ring over `slot_count` slots of `slot_size` payload bytes
    /// each, starting at `base`. Slot contents are not initialised; the
    /// first writer of each slot does that.
    ///
    /// # Safety
    /// `base` must be valid for reads and writes of
    /// `(slot_size + SLOT_HEADER_SIZE) * slot_count` bytes for the lifetime
    /// of the ring, and must not be accessed through other Rust references
    /// while the ring is live.
    pub unsafe fn new(base: *mut u8, slot_size: u16, slot_count: u16) -> Self {
        debug_assert!(!base.is_null());
        debug_assert!(slot_count > 0);
        Self {
            base,
            slot_size: slot_size as usize,
            slot_count: slot_count as usize,
            stride: slot_size as usize + uapi::SLOT_HEADER_SIZE,
            wp: 0,
            rp: 0,
        }
    }

    /// Payload capacity of one slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.slot_size
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    /// Distance between consecutive slots (header + payload).
    pub fn stride(&self) -> usize {
        self.stride
    }

    fn slot_at(&mut self, idx: usize) -> Slot<'_> {
        Slot {
            ptr: unsafe { self.base.add(idx * self.stride) },
            slot_size: self.slot_size,
            _ring: std::marker::PhantomData,
        }
    }

    /// The slot at the write cursor.
    pub fn peek_write(&mut self) -> Slot<'_> {
        let idx = self.wp;
        self.slot_at(idx)
    }

    /// The slot at the read cursor.
    pub fn peek_read(&mut self) -> Slot<'_> {
        let idx = self.rp;
        self.slot_at(idx)
    }

    /// Step the write cursor by one, wrapping at `slot_count`.
    pub fn advance_write(&mut self) {
        self.wp = (self.wp + 1) % self.slot_count;
    }

    /// Step the read cursor by one, wrapping at `slot_count`.
    pub fn advance_read(&mut self) {
        self.rp = (self.rp + 1) % self.slot_count;
    }
}

// ---------------------------------------------------------------------------
// Slot accessor
// ---------------------------------------------------------------------------

/// A view of one ring slot: little-endian header fields plus the payload.
///
/// Header access is unaligned; with an odd `slot_size` the stride puts
/// later slots off natural alignment.
pub struct Slot<'a> {
    ptr: *mut u8,
    slot_size: usize,
    _ring: std::marker::PhantomData<&'a mut Ring>,
}

impl Slot<'_> {
    pub fn flags(&self) -> u32 {
        u32::from_le(unsafe { (self.ptr.add(uapi::SLOT_OFF_FLAGS) as *const u32).read_unaligned() })
    }

    pub fn set_flags(&mut self, v: u32) {
        unsafe { (self.ptr.add(uapi::SLOT_OFF_FLAGS) as *mut u32).write_unaligned(v.to_le()) }
    }

    pub fn seq(&self) -> u16 {
        u16::from_le(unsafe { (self.ptr.add(uapi::SLOT_OFF_SEQ) as *const u16).read_unaligned() })
    }

    pub fn set_seq(&mut self, v: u16) {
        unsafe { (self.ptr.add(uapi::SLOT_OFF_SEQ) as *mut u16).write_unaligned(v.to_le()) }
    }

    pub fn len(&self) -> u16 {
        u16::from_le(unsafe { (self.ptr.add(uapi::SLOT_OFF_LEN) as *const u16).read_unaligned() })
    }

    pub fn set_len(&mut self, v: u16) {
        unsafe { (self.ptr.add(uapi::SLOT_OFF_LEN) as *mut u16).write_unaligned(v.to_le()) }
    }

    pub fn rc(&self) -> i32 {
        i32::from_le(unsafe { (self.ptr.add(uapi::SLOT_OFF_RC) as *const i32).read_unaligned() })
    }

    pub fn set_rc(&mut self, v: i32) {
        unsafe { (self.ptr.add(uapi::SLOT_OFF_RC) as *mut i32).write_unaligned(v.to_le()) }
    }

    /// The full payload area (`slot_size` bytes).
    pub fn payload(&self) -> &[u8] {
        unsafe {
            std::slice::from_raw_parts(self.ptr.add(uapi::SLOT_HEADER_SIZE), self.slot_size)
        }
    }

    /// The full payload area, mutable.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.add(uapi::SLOT_HEADER_SIZE), self.slot_size)
        }
    }
}
