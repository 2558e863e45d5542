// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// The ISC channel: open/close lifecycle, the synchronous send path, the
// poll-driven delivery loop, and internal BOUND/UNBIND handling.
//
// Concurrency model: one delivery worker thread per channel. The send ring,
// its sequence counter and `send_ready` live together inside one mutex that
// is held across the whole request/reply round-trip, so sends serialize and
// an UNBIND cannot flip readiness mid-round. `recv_ready` is an atomic
// written by the worker (and by open when the kernel reports the peer
// already bound). The receive ring is touched only by the worker while it
// runs; it rides in a mutex so the closing thread can reclaim it after the
// join.

use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use log::{debug, warn};

use crate::device::{IscDev, RingMap};
use crate::error::{IscError, Result};
use crate::listener::{ListenerArg, ListenerOps, ListenerRegistry};
use crate::ring::Ring;
use crate::uapi;
use crate::wake::WakeFd;

const DIR_SEND: u32 = 1;
const DIR_RECV: u32 = 2;

/// Queue geometry for one direction: payload bytes per slot, slots per
/// ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IscAttr {
    pub slot_size: u16,
    pub slot_count: u16,
}

/// Receive-ring depth used when the caller did not ask for a receive
/// direction of its own.
const RECV_DEFAULT_COUNT: u16 = 8;

/// The receive ring always exists and must at least fit an internal control
/// message; a smaller request silently widens.
fn effective_recv_attr(requested: Option<IscAttr>) -> IscAttr {
    let min = uapi::INT_MSG_SIZE as u16;
    match requested {
        Some(a) => IscAttr {
            slot_size: a.slot_size.max(min),
            slot_count: a.slot_count,
        },
        None => IscAttr {
            slot_size: min,
            slot_count: RECV_DEFAULT_COUNT,
        },
    }
}

// ---------------------------------------------------------------------------
// Per-direction state
// ---------------------------------------------------------------------------

struct SendState {
    ring: Ring,
    map: RingMap,
    seq: u16,
    ready: bool,
}

struct RecvState {
    ring: Ring,
    map: RingMap,
}

// ---------------------------------------------------------------------------
// Shared — state reachable from both callers and the delivery worker
// ---------------------------------------------------------------------------

struct Shared {
    direction: u32,
    recv_ready: AtomicBool,
    send: Mutex<Option<SendState>>,
    listeners: ListenerRegistry,
}

impl Shared {
    fn new(direction: u32) -> Self {
        Self {
            direction,
            recv_ready: AtomicBool::new(false),
            send: Mutex::new(None),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Handle one received slot and produce the return code to report back
    /// on the ack.
    fn dispatch(&self, flags: u32, payload: &[u8]) -> i32 {
        if flags & uapi::FLAG_USER != 0 {
            self.listeners.broadcast_message(payload)
        } else {
            self.handle_internal(payload);
            0
        }
    }

    /// BOUND/UNBIND control messages toggle the readiness flags and notify
    /// listeners. Unknown ids are dropped.
    fn handle_internal(&self, payload: &[u8]) {
        if payload.len() < uapi::INT_MSG_SIZE {
            return;
        }
        let id = u16::from_le_bytes([payload[0], payload[1]]);
        match id {
            uapi::MSG_BOUND => {
                if self.direction & DIR_RECV != 0 {
                    self.recv_ready.store(true, Ordering::Release);
                }
                if self.direction & DIR_SEND != 0 {
                    if let Some(st) = self.send.lock().unwrap().as_mut() {
                        st.ready = true;
                    }
                }
                self.listeners.broadcast_bound();
            }
            uapi::MSG_UNBIND => {
                self.listeners.broadcast_unbind();
                if self.direction & DIR_SEND != 0 {
                    if let Some(st) = self.send.lock().unwrap().as_mut() {
                        st.ready = false;
                    }
                }
                if self.direction & DIR_RECV != 0 {
                    self.recv_ready.store(false, Ordering::Release);
                }
            }
            _ => {
                debug!("isc: dropping unknown control message id {id:#06x}");
            }
        }
    }

    /// Register a listener. If the channel is already observed bound, the
    /// new listener's `bound` callback fires once, synchronously, after the
    /// registry lock is released, so late subscribers see the bound state
    /// exactly once.
    fn add_listener(&self, ops: &'static ListenerOps, arg: ListenerArg) -> Result<()> {
        self.listeners.add(ops, arg.clone())?;
        if self.recv_ready.load(Ordering::Acquire) {
            if let Some(bound) = ops.bound {
                bound(&arg);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChanInner — the aggregate shared with the delivery worker
// ---------------------------------------------------------------------------

struct ChanInner {
    dev: IscDev,
    wake: WakeFd,
    uid: u32,
    running: AtomicBool,
    shared: Shared,
    recv: Mutex<Option<RecvState>>,
}

// ---------------------------------------------------------------------------
// Delivery loop
// ---------------------------------------------------------------------------

/// Wait on {device fd, wake fd}; consume one receive-ring slot per POLLIN,
/// dispatch it, write the aggregated return code into the slot, and credit
/// the slot back with a RECV ack. The read cursor advances only when the
/// ack succeeded; on failure the kernel still owns the slot and it is
/// retried on the next wake.
fn delivery_loop(inner: &ChanInner) {
    let mut fds = [
        libc::pollfd {
            fd: inner.dev.raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
        libc::pollfd {
            fd: inner.wake.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];

    while inner.running.load(Ordering::Acquire) {
        for fd in fds.iter_mut() {
            fd.revents = 0;
        }
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let e = std::io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                warn!("isc {:08x}: poll failed: {e}", inner.uid);
            }
            continue;
        }
        if fds[1].revents & libc::POLLIN != 0 {
            inner.wake.drain();
            continue;
        }
        if fds[0].revents & libc::POLLIN == 0 {
            continue;
        }

        let mut guard = inner.recv.lock().unwrap();
        let Some(st) = guard.as_mut() else {
            continue;
        };
        let seq = dispatch_slot(&inner.shared, &mut st.ring);
        match inner.dev.ack(seq) {
            Ok(()) => st.ring.advance_read(),
            Err(e) => warn!("isc {:08x}: ack of seq {seq} failed: {e}", inner.uid),
        }
    }
}

/// Dispatch the slot at the read cursor and stamp the aggregated return
/// code into it; the ack carries that code back to the kernel. Returns the
/// slot's seq for the ack.
fn dispatch_slot(shared: &Shared, ring: &mut Ring) -> u16 {
    let slot_size = ring.slot_size();
    let mut slot = ring.peek_read();
    let seq = slot.seq();
    let len = (slot.len() as usize).min(slot_size);
    let rc = shared.dispatch(slot.flags(), &slot.payload()[..len]);
    slot.set_rc(rc);
    seq
}

// ---------------------------------------------------------------------------
// IscChannel — public façade
// ---------------------------------------------------------------------------

/// A channel endpoint bound to a FOURCC uid on the ISC device.
///
/// Listener callbacks run on the delivery thread (event broadcasts) or on
/// the registering thread (the late `bound` call from `add_listener`); they
/// must not call back into `close` or mutate the listener registry.
pub struct IscChannel {
    inner: Arc<ChanInner>,
    worker: Option<thread::JoinHandle<()>>,
    closed: bool,
}

impl IscChannel {
    /// Open the channel `uid` with the given per-direction queue
    /// geometries. `send_attr` of `None` means the channel cannot send; the
    /// receive direction is always established internally so that
    /// BOUND/UNBIND notifications arrive even when `recv_attr` is `None`.
    pub fn open(uid: u32, send_attr: Option<IscAttr>, recv_attr: Option<IscAttr>) -> Result<Self> {
        let mut direction = 0;
        if send_attr.is_some() {
            direction |= DIR_SEND;
        }
        if recv_attr.is_some() {
            direction |= DIR_RECV;
        }

        let dev = IscDev::open()?;
        let wake = WakeFd::new().map_err(IscError::ResourceExhausted)?;
        let inner = Arc::new(ChanInner {
            dev,
            wake,
            uid,
            running: AtomicBool::new(true),
            shared: Shared::new(direction),
            recv: Mutex::new(None),
        });

        let worker = thread::Builder::new()
            .name(format!("isc-{uid:08x}"))
            .spawn({
                let inner = Arc::clone(&inner);
                move || delivery_loop(&inner)
            })
            .map_err(IscError::ResourceExhausted)?;

        let mut chan = Self {
            inner,
            worker: Some(worker),
            closed: false,
        };

        // The receive direction binds first so control messages can arrive
        // before (and about) the send direction.
        let recv = effective_recv_attr(recv_attr);
        if let Err(e) = chan.bind_recv(recv) {
            chan.teardown(false);
            return Err(e);
        }
        if let Some(attr) = send_attr {
            if let Err(e) = chan.bind_send(attr) {
                chan.teardown(false);
                return Err(e);
            }
        }
        debug!("isc {uid:08x}: channel open, direction {direction:#x}");
        Ok(chan)
    }

    fn bind_recv(&self, attr: IscAttr) -> Result<()> {
        let reply = self.inner.dev.bind(
            self.inner.uid,
            attr.slot_size,
            attr.slot_count,
            uapi::DIR_K_TO_U,
        )?;
        let map = self
            .inner
            .dev
            .map_ring(attr.slot_size, attr.slot_count, &reply)?;
        let ring = unsafe { Ring::new(map.base(), attr.slot_size, attr.slot_count) };
        if reply.stat == 1 {
            self.inner.shared.recv_ready.store(true, Ordering::Release);
        }
        *self.inner.recv.lock().unwrap() = Some(RecvState { ring, map });
        Ok(())
    }

    fn bind_send(&self, attr: IscAttr) -> Result<()> {
        let reply = self.inner.dev.bind(
            self.inner.uid,
            attr.slot_size,
            attr.slot_count,
            uapi::DIR_U_TO_K,
        )?;
        let map = self
            .inner
            .dev
            .map_ring(attr.slot_size, attr.slot_count, &reply)?;
        let ring = unsafe { Ring::new(map.base(), attr.slot_size, attr.slot_count) };
        *self.inner.shared.send.lock().unwrap() = Some(SendState {
            ring,
            map,
            seq: 0,
            ready: reply.stat == 1,
        });
        Ok(())
    }

    /// Send one request and wait for the peer's reply.
    ///
    /// Returns the peer's return code; when it is 0 the reply payload has
    /// overwritten `msg` in place. The whole round-trip runs under the send
    /// lock: concurrent sends serialize, there is no pipelining.
    pub fn send(&self, msg: &mut [u8]) -> Result<i32> {
        if self.inner.shared.direction & DIR_SEND == 0 {
            return Err(IscError::InvalidArgument);
        }

        let mut guard = self.inner.shared.send.lock().unwrap();
        let st = guard.as_mut().ok_or(IscError::InvalidArgument)?;
        if !st.ready {
            return Err(IscError::NotReady);
        }
        if msg.is_empty() {
            return Err(IscError::InvalidArgument);
        }
        if msg.len() > st.ring.slot_size() {
            return Err(IscError::PayloadTooLarge {
                len: msg.len(),
                max: st.ring.slot_size(),
            });
        }

        let seq = st.seq;
        {
            let mut slot = st.ring.peek_write();
            slot.set_flags(uapi::FLAG_USER);
            slot.set_seq(seq);
            slot.set_len(msg.len() as u16);
            slot.payload_mut()[..msg.len()].copy_from_slice(msg);
        }

        // On ioctl failure the kernel may still hold the slot; cursors stay
        // where they are.
        self.inner.dev.send(seq)?;

        // The reply landed in the same slot. The slot is non-owned memory
        // until the copy-out completes; advancing both cursors ends the
        // borrow and frees the slot for the next round.
        let peer_rc;
        {
            let slot = st.ring.peek_write();
            peer_rc = slot.rc();
            if peer_rc == 0 {
                let len = msg.len();
                msg.copy_from_slice(&slot.payload()[..len]);
            }
        }
        st.ring.advance_write();
        st.ring.advance_read();
        st.seq = st.seq.wrapping_add(1);
        Ok(peer_rc)
    }

    /// Register a listener for bound/unbind/message events.
    ///
    /// If the channel is already bound the new listener's `bound` callback
    /// is invoked once, synchronously, before this returns.
    pub fn add_listener(&self, ops: &'static ListenerOps, arg: ListenerArg) -> Result<()> {
        self.inner.shared.add_listener(ops, arg)
    }

    /// Remove a previously registered listener by identity.
    pub fn rm_listener(&self, ops: &'static ListenerOps, arg: &ListenerArg) -> Result<()> {
        self.inner.shared.listeners.remove(ops, arg)
    }

    /// Tear the channel down: stop and join the delivery worker, release
    /// both rings, and tell the kernel the endpoint is gone. Dropping the
    /// channel does the same.
    pub fn close(mut self) {
        self.teardown(true);
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.inner.running.store(false, Ordering::Release);
            if let Err(e) = self.inner.wake.notify() {
                warn!("isc {:08x}: wake write failed: {e}", self.inner.uid);
            }
            if worker.join().is_err() {
                warn!("isc {:08x}: delivery worker panicked", self.inner.uid);
            }
        }
    }

    fn teardown(&mut self, issue_close: bool) {
        if self.closed {
            return;
        }
        self.closed = true;

        self.stop_worker();
        // Rings unmap before the CLOSE ioctl; the kernel driver expects
        // this teardown order.
        *self.inner.shared.send.lock().unwrap() = None;
        *self.inner.recv.lock().unwrap() = None;
        if issue_close {
            self.inner.dev.close_quiet();
        }
    }
}

impl Drop for IscChannel {
    fn drop(&mut self) {
        self.teardown(true);
    }
}

// ---------------------------------------------------------------------------
// Unit tests for the dispatch state machine (no device needed)
// ---------------------------------------------------------------------------
