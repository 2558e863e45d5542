// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Handle for the ISC character device: open, the four ioctls, and mapping
// of the ring regions the kernel hands back from BIND.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::ptr;

use log::warn;

use crate::error::{IscError, Result};
use crate::uapi;

const ISC_DEV_PATH: &str = "/dev/isc";

fn errno_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

/// What the kernel filled into a BIND reply.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BindReply {
    /// 1 when the peer side is already bound.
    pub stat: u16,
    /// Length of the shared region in bytes.
    pub size: u32,
    /// mmap offset of the shared region.
    pub mem: u64,
}

pub(crate) struct IscDev {
    file: File,
}

impl IscDev {
    /// Open `/dev/isc` read-write.
    pub fn open() -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(ISC_DEV_PATH)
            .map_err(IscError::DeviceUnavailable)?;
        Ok(Self { file })
    }

    pub fn raw_fd(&self) -> libc::c_int {
        self.file.as_raw_fd()
    }

    /// Bind one queue direction of channel `uid` and return the kernel's
    /// region description.
    pub fn bind(&self, uid: u32, slot_size: u16, slot_count: u16, dir: u16) -> Result<BindReply> {
        let mut args = uapi::IscBind {
            uid,
            slot_size,
            slot_count,
            dir,
            ..Default::default()
        };
        unsafe { uapi::isc_ioctl_bind(self.raw_fd(), &mut args) }
            .map_err(|e| IscError::Transport(errno_io(e)))?;
        Ok(BindReply {
            stat: args.stat,
            size: args.size,
            mem: args.mem,
        })
    }

    /// Map the ring region described by a BIND reply, validating that it is
    /// large enough for `slot_count` slots.
    pub fn map_ring(&self, slot_size: u16, slot_count: u16, reply: &BindReply) -> Result<RingMap> {
        let stride = slot_size as usize + uapi::SLOT_HEADER_SIZE;
        let needed = stride * slot_count as usize;
        let len = reply.size as usize;
        if len < needed {
            return Err(IscError::Transport(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("bind region of {len} bytes too small for {needed}"),
            )));
        }

        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.raw_fd(),
                reply.mem as libc::off_t,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(IscError::Transport(io::Error::last_os_error()));
        }
        Ok(RingMap {
            base: mem as *mut u8,
            len,
        })
    }

    /// Submit the send-ring slot identified by `seq`. Blocks until the peer
    /// has written its reply into the same slot.
    pub fn send(&self, seq: u16) -> Result<()> {
        let mut args = uapi::IscSend { seq, num: 1 };
        unsafe { uapi::isc_ioctl_send(self.raw_fd(), &mut args) }
            .map_err(|e| IscError::Transport(errno_io(e)))?;
        Ok(())
    }

    /// Acknowledge the receive-ring slot identified by `seq`, crediting it
    /// back to the kernel.
    pub fn ack(&self, seq: u16) -> Result<()> {
        let mut args = uapi::IscRecv { seq, num: 1 };
        unsafe { uapi::isc_ioctl_recv(self.raw_fd(), &mut args) }
            .map_err(|e| IscError::Transport(errno_io(e)))?;
        Ok(())
    }

    /// Issue the CLOSE ioctl. Failure is logged, never fatal.
    pub fn close_quiet(&self) {
        let mut noarg: libc::c_int = 0;
        if let Err(e) = unsafe { uapi::isc_ioctl_close(self.raw_fd(), &mut noarg) } {
            warn!("isc: CLOSE ioctl failed: {}", errno_io(e));
        }
    }
}

// ---------------------------------------------------------------------------
// RingMap — owning mmap of one ring region
// ---------------------------------------------------------------------------

/// An mmap'd ring region. Unmapped on drop; teardown ordering (delivery
/// worker joined first) is the channel's responsibility.
pub(crate) struct RingMap {
    base: *mut u8,
    len: usize,
}

// The region is shared with the kernel by design; the Rust side hands the
// base pointer to exactly one Ring at a time.
unsafe impl Send for RingMap {}
unsafe impl Sync for RingMap {}

impl RingMap {
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// Anonymous mapping standing in for a device region in unit tests.
    #[cfg(test)]
    pub fn anon(len: usize) -> io::Result<RingMap> {
        let mem = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if mem == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        Ok(RingMap {
            base: mem as *mut u8,
            len,
        })
    }
}

impl Drop for RingMap {
    fn drop(&mut self) {
        if !self.base.is_null() {
            unsafe { libc::munmap(self.base as *mut libc::c_void, self.len) };
        }
    }
}
