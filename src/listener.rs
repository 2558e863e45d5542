// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Listener registry: an ordered set of callback tables subscribed to a
// channel's bound/unbind/message events.
//
// A registration is the pair (callback table, argument). The table is a
// `&'static` struct of optional `fn` entries; the argument is an `Arc`'d
// opaque value handed back to every callback. Identity, for duplicate
// rejection and removal, is pointer identity of both halves.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::error::{IscError, Result};

/// Opaque per-listener argument, shared with the registry.
pub type ListenerArg = Arc<dyn Any + Send + Sync>;

/// Callback table for channel events. Each entry is optional, but a table
/// with no entries at all cannot be registered.
pub struct ListenerOps {
    /// The peer bound; traffic may flow.
    pub bound: Option<fn(&ListenerArg)>,
    /// The peer unbound.
    pub unbind: Option<fn(&ListenerArg)>,
    /// A user message arrived. The return code is OR-aggregated across
    /// listeners and reported back to the peer on the ack.
    pub got: Option<fn(&[u8], &ListenerArg) -> i32>,
}

impl ListenerOps {
    fn has_any(&self) -> bool {
        self.bound.is_some() || self.unbind.is_some() || self.got.is_some()
    }
}

struct Entry {
    ops: &'static ListenerOps,
    arg: ListenerArg,
}

impl Entry {
    fn matches(&self, ops: &'static ListenerOps, arg: &ListenerArg) -> bool {
        std::ptr::eq(self.ops, ops) && Arc::ptr_eq(&self.arg, arg)
    }
}

/// Insertion-ordered listener collection behind one lock.
///
/// Broadcasts run with the lock held for their whole duration; callbacks
/// must not add or remove listeners.
pub struct ListenerRegistry {
    entries: Mutex<Vec<Entry>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register `(ops, arg)`. Rejects tables with no capability set and
    /// registrations whose identity is already present.
    pub fn add(&self, ops: &'static ListenerOps, arg: ListenerArg) -> Result<()> {
        if !ops.has_any() {
            return Err(IscError::InvalidArgument);
        }
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.matches(ops, &arg)) {
            return Err(IscError::Duplicate);
        }
        entries.push(Entry { ops, arg });
        Ok(())
    }

    /// Remove the registration with this identity.
    pub fn remove(&self, ops: &'static ListenerOps, arg: &ListenerArg) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter().position(|e| e.matches(ops, arg)) {
            Some(idx) => {
                entries.remove(idx);
                Ok(())
            }
            None => Err(IscError::NotFound),
        }
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every `bound` callback, in insertion order.
    pub fn broadcast_bound(&self) {
        let entries = self.entries.lock().unwrap();
        for e in entries.iter() {
            if let Some(bound) = e.ops.bound {
                bound(&e.arg);
            }
        }
    }

    /// Invoke every `unbind` callback, in insertion order.
    pub fn broadcast_unbind(&self) {
        let entries = self.entries.lock().unwrap();
        for e in entries.iter() {
            if let Some(unbind) = e.ops.unbind {
                unbind(&e.arg);
            }
        }
    }

    /// Dispatch a user message to every listener providing `got`, in
    /// insertion order, and OR the return codes together. An empty registry
    /// yields -1: no handler was available for the message.
    pub fn broadcast_message(&self, payload: &[u8]) -> i32 {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return -1;
        }
        let mut rc = 0;
        for e in entries.iter() {
            if let Some(got) = e.ops.got {
                rc |= got(payload, &e.arg);
            }
        }
        rc
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
