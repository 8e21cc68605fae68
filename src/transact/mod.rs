// src/transact/mod.rs

//! Nested, revertible mutation windows over named holders
//!
//! A *holder* is a named piece of mutable state (the component registry, the
//! package registry). A *caller* opens a transaction on a holder with
//! [`Transact::begin`], which stores a snapshot of the holder and pushes a
//! frame onto that holder's stack. Side effects that must only happen once
//! the work is final (deleting superseded storage) are queued with
//! [`Transact::after_commit`]; effects that undo work (deleting freshly
//! allocated storage) are queued with [`Transact::after_decline`].
//!
//! # Ordering
//!
//! Frames on one holder always end in LIFO order. A caller may ask to end its
//! frame while frames pushed after it are still open; [`Transact::end`] then
//! blocks until every later frame has ended. While any end is waiting, new
//! `begin` calls are refused (they return `false`) and must be retried.
//!
//! ```text
//! begin(A) -> begin(B) -> end(A) ...waits... -> end(B) -> end(A) completes
//! ```
//!
//! When a frame commits while an enclosing frame on the same holder is still
//! open, its queued callbacks move to the enclosing frame: nothing irreversible
//! happens before the outermost commit, and an outer decline still undoes the
//! inner frame's allocations.

mod enabled;

pub use enabled::TransactEnabled;

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Snapshot of a holder's state, stored type-erased in a frame
pub type Snapshot = Box<dyn Any + Send>;

/// Deferred side effect queued on a frame
pub type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

/// One open transaction
struct Frame {
    caller: String,
    snapshot: Snapshot,
    on_commit: Vec<Callback>,
    on_decline: Vec<Callback>,
}

#[derive(Default)]
struct TransactState {
    stacks: HashMap<String, Vec<Frame>>,
    /// Number of `end` calls currently waiting or running callbacks
    ending: usize,
}

/// Coordinator for transactions across all holders
#[derive(Default)]
pub struct Transact {
    state: Mutex<TransactState>,
    frame_ended: Condvar,
}

impl Transact {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a transaction for `caller` on `holder`
    ///
    /// Returns `Ok(false)` without effect while another `end` is in progress.
    /// Fails if this caller already has an open transaction on this holder.
    pub fn begin(&self, caller: &str, holder: &str, snapshot: Snapshot) -> Result<bool> {
        let mut state = self.state.lock();
        if state.ending > 0 {
            debug!("begin({}, {}) refused: end in progress", caller, holder);
            return Ok(false);
        }

        let stack = state.stacks.entry(holder.to_string()).or_default();
        if stack.iter().any(|f| f.caller == caller) {
            return Err(Error::Transact(format!(
                "{} already has an open transaction on {}",
                caller, holder
            )));
        }

        stack.push(Frame {
            caller: caller.to_string(),
            snapshot,
            on_commit: Vec::new(),
            on_decline: Vec::new(),
        });
        debug!("Transaction begun: {} on {} (depth {})", caller, holder, stack.len());
        Ok(true)
    }

    /// Queue a callback for when the innermost transaction on `holder` commits
    ///
    /// With no open transaction the callback runs immediately.
    pub fn after_commit<F>(&self, holder: &str, callback: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            if let Some(frame) = state.stacks.get_mut(holder).and_then(|s| s.last_mut()) {
                frame.on_commit.push(Box::new(callback));
                return Ok(());
            }
        }
        callback()
    }

    /// Queue a callback for when the innermost transaction on `holder` declines
    ///
    /// With no open transaction the callback is dropped.
    pub fn after_decline<F>(&self, holder: &str, callback: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let mut state = self.state.lock();
        if let Some(frame) = state.stacks.get_mut(holder).and_then(|s| s.last_mut()) {
            frame.on_decline.push(Box::new(callback));
        }
    }

    /// True if `caller` has an open transaction on `holder`
    pub fn has_transact(&self, caller: &str, holder: &str) -> bool {
        self.state
            .lock()
            .stacks
            .get(holder)
            .is_some_and(|s| s.iter().any(|f| f.caller == caller))
    }

    /// Number of open transactions on `holder`
    pub fn depth(&self, holder: &str) -> usize {
        self.state.lock().stacks.get(holder).map_or(0, Vec::len)
    }

    /// End `caller`'s transaction on `holder`
    ///
    /// Blocks until every frame pushed after the caller's has ended, then pops
    /// it and runs the callbacks matching `decline`. Returns the snapshot taken
    /// at `begin` when declining, `None` when committing.
    pub fn end(&self, caller: &str, holder: &str, decline: bool) -> Result<Option<Snapshot>> {
        let mut state = self.state.lock();
        let open = state
            .stacks
            .get(holder)
            .is_some_and(|s| s.iter().any(|f| f.caller == caller));
        if !open {
            return Err(Error::Transact(format!(
                "{} has no open transaction on {}",
                caller, holder
            )));
        }

        state.ending += 1;
        while !state
            .stacks
            .get(holder)
            .and_then(|s| s.last())
            .is_some_and(|f| f.caller == caller)
        {
            debug!("{} waiting for inner transactions on {}", caller, holder);
            self.frame_ended.wait(&mut state);
        }

        let Some(frame) = state.stacks.get_mut(holder).and_then(Vec::pop) else {
            state.ending -= 1;
            return Err(Error::Transact(format!("Stack for {} vanished", holder)));
        };

        let to_run = match state.stacks.get_mut(holder).and_then(|s| s.last_mut()) {
            Some(parent) if !decline => {
                parent.on_commit.extend(frame.on_commit);
                parent.on_decline.extend(frame.on_decline);
                Vec::new()
            }
            _ if decline => frame.on_decline,
            _ => frame.on_commit,
        };
        if state.stacks.get(holder).is_some_and(Vec::is_empty) {
            state.stacks.remove(holder);
        }
        drop(state);

        debug!(
            "Transaction {}: {} on {} ({} callbacks)",
            if decline { "declined" } else { "committed" },
            caller,
            holder,
            to_run.len()
        );
        for callback in to_run {
            if let Err(e) = callback() {
                warn!("Transaction callback for {} on {} failed: {}", caller, holder, e);
            }
        }

        let mut state = self.state.lock();
        state.ending -= 1;
        drop(state);
        self.frame_ended.notify_all();

        Ok(decline.then_some(frame.snapshot))
    }

    /// Begin a transaction on a [`TransactEnabled`] holder, snapshotting it
    pub fn begin_on<H: TransactEnabled>(&self, caller: &str, holder: &H) -> Result<bool> {
        self.begin(caller, holder.holder_name(), Box::new(holder.snapshot()))
    }

    /// End a transaction on a [`TransactEnabled`] holder, restoring it on decline
    pub fn end_on<H: TransactEnabled>(
        &self,
        caller: &str,
        holder: &mut H,
        decline: bool,
    ) -> Result<()> {
        let snapshot = self.end(caller, holder.holder_name(), decline)?;
        if let Some(snapshot) = snapshot {
            let snapshot = snapshot.downcast::<H::Snapshot>().map_err(|_| {
                Error::Transact(format!(
                    "Snapshot on {} has an unexpected type",
                    holder.holder_name()
                ))
            })?;
            holder.restore(*snapshot);
        }
        Ok(())
    }
}
