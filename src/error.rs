// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Error type for the ISC channel runtime.
//
// Transport status and the peer's application result are separate planes:
// a non-zero peer `rc` from a successful round-trip is *not* an `IscError`,
// it is the `Ok` value of `IscChannel::send`.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IscError>;

#[derive(Debug, Error)]
pub enum IscError {
    /// Empty payload, missing capability set, or an operation the channel's
    /// direction does not allow.
    #[error("invalid argument")]
    InvalidArgument,

    /// The peer has not bound yet, or has unbound.
    #[error("channel is not ready")]
    NotReady,

    /// Payload does not fit a ring slot.
    #[error("payload of {len} bytes exceeds slot size {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A listener with the same identity is already registered.
    #[error("listener already registered")]
    Duplicate,

    /// No listener with this identity is registered.
    #[error("listener not found")]
    NotFound,

    /// Opening the ISC character device failed.
    #[error("ISC device unavailable: {0}")]
    DeviceUnavailable(#[source] io::Error),

    /// Wake-fd or delivery-thread creation failed.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(#[source] io::Error),

    /// An ioctl or mmap on the device failed, or the kernel's bind reply
    /// was inconsistent.
    #[error("transport failure: {0}")]
    Transport(#[source] io::Error),
}
