// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Eventfd wrapper used to interrupt the delivery loop's poll.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

/// A counting wake-up descriptor. `notify` makes the fd readable; `drain`
/// consumes the counter so the next poll blocks again.
pub struct WakeFd {
    fd: OwnedFd,
}

impl WakeFd {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Add one token to the counter, waking any poller.
    pub fn notify(&self) -> io::Result<()> {
        let token: u64 = 1;
        let rn = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                &token as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if rn < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Consume the counter. Failure only means nobody notified; ignored.
    pub fn drain(&self) {
        let mut token: u64 = 0;
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut token as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}

impl AsRawFd for WakeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}
