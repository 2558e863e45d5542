// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// User-space runtime for kernel/user ISC channels.
// A client opens a FOURCC-named channel on the `/dev/isc` character device
// and exchanges fixed-size, sequenced request/response messages with a
// kernel-resident peer through up to two shared-memory ring queues (one per
// direction), established via BIND ioctls and mmap. A per-channel delivery
// thread drains the receive ring and acknowledges each slot individually.

pub mod uapi;
pub use uapi::fourcc;

mod error;
pub use error::{IscError, Result};

pub mod ring;
pub use ring::Ring;

mod wake;
pub use wake::WakeFd;

mod device;

pub mod listener;
pub use listener::{ListenerArg, ListenerOps, ListenerRegistry};

mod channel;
pub use channel::{IscAttr, IscChannel};
