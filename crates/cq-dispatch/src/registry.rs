// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion registry.
//!
//! Three slot tables, one per category, each mapping a raw handle value to
//! at most one pending record. Each table has its own lock; no operation
//! takes two locks at once and no lock is held while a callback runs, so a
//! callback may register or cancel anything, its own handle included.
//!
//! Lookups are level-triggered: they hand out the record without removing
//! it, and the same registration fires on every readiness event until it
//! is replaced, cancelled, or its callback returns `false`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::action::{Category, IntoAction};
use crate::completion::{Completion, PendingOp};
use crate::config::RegistryConfig;
use crate::context::AsyncContext;
use crate::error::DispatchError;
use crate::handle::{Handle, RawHandle};

/// Readiness classification reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
    PeerClosed,
    TimerFired,
}

impl Readiness {
    /// Slot table consulted for this kind of readiness.
    pub fn category(self) -> Category {
        match self {
            Readiness::Readable | Readiness::TimerFired => Category::Read,
            Readiness::Writable => Category::Write,
            Readiness::PeerClosed => Category::PeerClose,
        }
    }
}

/// Outcome of running a pending callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Nothing registered for the handle in that category.
    Idle,
    /// Callback ran and asked to stay armed.
    Kept,
    /// Callback ran and returned `false`; its registration is gone.
    Released,
}

/// Categories with a record for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    pub read: bool,
    pub write: bool,
    pub peer_close: bool,
}

impl Interest {
    pub fn is_empty(&self) -> bool {
        !(self.read || self.write || self.peer_close)
    }

    pub fn contains(&self, category: Category) -> bool {
        match category {
            Category::Read => self.read,
            Category::Write => self.write,
            Category::PeerClose => self.peer_close,
        }
    }
}

/// One category's handle → record table.
struct Slots {
    inner: Mutex<HashMap<RawHandle, Arc<PendingOp>>>,
}

impl Slots {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    fn insert(&self, raw: RawHandle, op: Arc<PendingOp>) -> Option<Arc<PendingOp>> {
        self.inner.lock().insert(raw, op)
    }

    fn get(&self, raw: RawHandle) -> Option<Arc<PendingOp>> {
        self.inner.lock().get(&raw).cloned()
    }

    fn remove(&self, raw: RawHandle) -> Option<Arc<PendingOp>> {
        self.inner.lock().remove(&raw)
    }

    /// Remove the record only if it is still `expected`.
    fn remove_if_same(&self, raw: RawHandle, expected: &Arc<PendingOp>) -> Option<Arc<PendingOp>> {
        let mut slots = self.inner.lock();
        match slots.get(&raw) {
            Some(current) if Arc::ptr_eq(current, expected) => slots.remove(&raw),
            _ => None,
        }
    }

    fn keys(&self) -> Vec<RawHandle> {
        self.inner.lock().keys().copied().collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Pending-operation registry shared between handle owners and the
/// readiness driver.
///
/// Owned by whoever builds the event loop and passed around by `Arc`;
/// several independent registries can live in one process.
pub struct Registry {
    read: Slots,
    write: Slots,
    peer_close: Slots,
    /// Current generation per raw handle, bumped by `claim`.
    ///
    /// Entries are never removed: forgetting one would let a stale owner
    /// match again. The table holds one `u32` per raw value ever claimed,
    /// so it is bounded by the size of the descriptor table.
    generations: Mutex<HashMap<RawHandle, u32>>,
    check_generations: bool,
    next_serial: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            read: Slots::with_capacity(config.initial_capacity),
            write: Slots::with_capacity(config.initial_capacity),
            peer_close: Slots::with_capacity(config.initial_capacity),
            generations: Mutex::new(HashMap::new()),
            check_generations: config.check_generations,
            next_serial: AtomicU64::new(1),
        }
    }

    fn slots(&self, category: Category) -> &Slots {
        match category {
            Category::Read => &self.read,
            Category::Write => &self.write,
            Category::PeerClose => &self.peer_close,
        }
    }

    /// Store `callback` as the pending operation for `handle` in the
    /// category of `action`, replacing whatever was there.
    ///
    /// The action is checked before anything is touched: an unknown kind
    /// leaves all three tables as they were. The replaced record, if any,
    /// is dropped without being invoked.
    ///
    /// With generation checks on, a handle older than the current
    /// generation of its raw value is refused with
    /// `DispatchError::StaleHandle`, so a previous occupant cannot clobber
    /// the records of the one that `claim` handed the value to. A newer
    /// generation becomes the current one.
    pub fn register<A, C>(
        &self,
        handle: impl Into<Handle>,
        action: A,
        callback: C,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), DispatchError>
    where
        A: IntoAction,
        C: Completion + 'static,
    {
        let handle = handle.into();
        let action = match action.into_action() {
            Ok(action) => action,
            Err(err) => {
                debug!(%handle, %err, "registration rejected");
                return Err(err);
            }
        };
        if self.check_generations {
            self.admit(handle)?;
        }

        let callback: Arc<dyn Completion> = Arc::new(callback);
        let op = Arc::new(PendingOp::new(
            action,
            callback,
            payload.into(),
            handle.generation,
            self.next_serial.fetch_add(1, Ordering::Relaxed),
        ));
        let category = action.category();
        let replaced = self.slots(category).insert(handle.raw, op);

        match replaced {
            Some(old) => debug!(
                %handle,
                %category,
                old = %old.action(),
                new = %action,
                "replaced pending operation"
            ),
            None => trace!(%handle, %category, %action, "registered pending operation"),
        }
        Ok(())
    }

    /// Refuse `handle` if it predates the current generation of its raw
    /// value; adopt its generation if it is ahead.
    fn admit(&self, handle: Handle) -> Result<(), DispatchError> {
        let mut generations = self.generations.lock();
        let current = generations.get(&handle.raw).copied().unwrap_or(0);
        // Serial-number comparison so the check survives wrap-around.
        let ahead = handle.generation.wrapping_sub(current) as i32;
        if ahead < 0 {
            drop(generations);
            debug!(%handle, current, "refused registration from a stale generation");
            return Err(DispatchError::StaleHandle { handle, current });
        }
        if ahead > 0 {
            generations.insert(handle.raw, handle.generation);
        }
        Ok(())
    }

    /// Drop every record of `handle` in all three categories.
    ///
    /// Matches on the raw value regardless of generation. Removed callbacks
    /// are not invoked. Cancelling a handle with nothing pending is a no-op.
    pub fn cancel(&self, handle: impl Into<Handle>) {
        let handle = handle.into();
        let removed = Category::ALL
            .into_iter()
            .filter_map(|category| self.slots(category).remove(handle.raw))
            .count();
        trace!(%handle, removed, "cancelled");
    }

    /// Record pending for `handle` in `category`, left in place.
    ///
    /// `None` if nothing is registered, or if generation checks are on and
    /// the record belongs to another generation of the same raw value.
    pub fn lookup(&self, category: Category, handle: impl Into<Handle>) -> Option<Arc<PendingOp>> {
        let handle = handle.into();
        let op = self.slots(category).get(handle.raw)?;
        if self.check_generations && op.generation() != handle.generation {
            debug!(
                %handle,
                %category,
                registered = op.generation(),
                "ignoring record from another generation"
            );
            return None;
        }
        Some(op)
    }

    pub fn lookup_read(&self, handle: impl Into<Handle>) -> Option<Arc<PendingOp>> {
        self.lookup(Category::Read, handle)
    }

    pub fn lookup_write(&self, handle: impl Into<Handle>) -> Option<Arc<PendingOp>> {
        self.lookup(Category::Write, handle)
    }

    pub fn lookup_peer_close(&self, handle: impl Into<Handle>) -> Option<Arc<PendingOp>> {
        self.lookup(Category::PeerClose, handle)
    }

    /// Run `op`, previously looked up for `handle`, and apply its verdict.
    ///
    /// `false` removes the record from its category, but only if it is
    /// still the one stored there: a callback that replaced or cancelled
    /// its own registration while running keeps that outcome.
    pub fn invoke(
        &self,
        handle: impl Into<Handle>,
        op: &Arc<PendingOp>,
        cx: &mut AsyncContext,
    ) -> Dispatch {
        let handle = handle.into();
        if op.complete(cx) {
            return Dispatch::Kept;
        }

        let category = op.category();
        if self.slots(category).remove_if_same(handle.raw, op).is_some() {
            debug!(%handle, %category, action = %op.action(), "released by callback");
        }
        Dispatch::Released
    }

    /// Look up the record for `cx.handle` in the category of `readiness`
    /// and invoke it.
    pub fn dispatch(&self, readiness: Readiness, cx: &mut AsyncContext) -> Dispatch {
        let handle = cx.handle;
        match self.lookup(readiness.category(), handle) {
            Some(op) => self.invoke(handle, &op, cx),
            None => Dispatch::Idle,
        }
    }

    /// Hand `raw` to a new occupant: bump its generation and drop anything
    /// the previous occupant left behind. Registrations under older
    /// generations are refused from here on.
    pub fn claim(&self, raw: RawHandle) -> Handle {
        let generation = {
            let mut generations = self.generations.lock();
            let current = generations.entry(raw).or_insert(0);
            *current = current.wrapping_add(1);
            *current
        };
        let handle = Handle::new(raw, generation);
        self.cancel(handle);
        trace!(%handle, "claimed");
        handle
    }

    /// Current generation of `raw`: the latest handed out by `claim`, or a
    /// newer one a registration brought along. 0 if never seen.
    pub fn generation(&self, raw: RawHandle) -> u32 {
        self.generations.lock().get(&raw).copied().unwrap_or(0)
    }

    /// Record in `category` for `raw` that a lookup under the current
    /// generation would return.
    fn live(&self, category: Category, raw: RawHandle, current: u32) -> Option<Arc<PendingOp>> {
        self.slots(category)
            .get(raw)
            .filter(|op| !self.check_generations || op.generation() == current)
    }

    /// Which categories hold a record for `raw` that matches its current
    /// generation, i.e. what the driver should be waiting for.
    pub fn interest(&self, raw: RawHandle) -> Interest {
        let current = self.generation(raw);
        Interest {
            read: self.live(Category::Read, raw, current).is_some(),
            write: self.live(Category::Write, raw, current).is_some(),
            peer_close: self.live(Category::PeerClose, raw, current).is_some(),
        }
    }

    /// Serial of the newest live record for `raw`, 0 if there is none.
    ///
    /// Changes whenever a record for `raw` is added or replaced, which
    /// lets a driver notice a cancel followed by a fresh registration of
    /// the same interest.
    pub fn revision(&self, raw: RawHandle) -> u64 {
        let current = self.generation(raw);
        Category::ALL
            .into_iter()
            .filter_map(|category| self.live(category, raw, current))
            .map(|op| op.serial())
            .max()
            .unwrap_or(0)
    }

    /// Raw handles with at least one live record, ascending.
    pub fn handles(&self) -> Vec<RawHandle> {
        let mut handles: Vec<RawHandle> = Category::ALL
            .into_iter()
            .flat_map(|category| self.slots(category).keys())
            .collect();
        handles.sort_unstable();
        handles.dedup();
        if self.check_generations {
            handles.retain(|&raw| !self.interest(raw).is_empty());
        }
        handles
    }

    pub fn len(&self, category: Category) -> usize {
        self.slots(category).len()
    }

    pub fn is_empty(&self) -> bool {
        Category::ALL.into_iter().all(|category| self.len(category) == 0)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("read", &self.read.len())
            .field("write", &self.write.len())
            .field("peer_close", &self.peer_close.len())
            .field("check_generations", &self.check_generations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn tag(byte: u8) -> impl Fn(&mut AsyncContext) -> bool + Send + Sync + 'static {
        move |cx: &mut AsyncContext| {
            cx.buffer.push(byte);
            true
        }
    }

    fn fire(op: &PendingOp) -> Vec<u8> {
        let mut cx = AsyncContext::new(0);
        op.complete(&mut cx);
        cx.buffer
    }

    #[test]
    fn register_then_lookup() {
        let reg = Registry::new();
        reg.register(5, ActionKind::Timer, tag(1), b"t").unwrap();

        let op = reg.lookup_read(5).unwrap();
        assert_eq!(op.action(), ActionKind::Timer);
        assert_eq!(op.payload(), b"t");
        assert_eq!(fire(&op), vec![1]);

        assert!(reg.lookup_write(5).is_none());
        assert!(reg.lookup_peer_close(5).is_none());
        assert!(reg.lookup_read(6).is_none());
    }

    #[test]
    fn lookup_does_not_consume() {
        let reg = Registry::new();
        reg.register(3, ActionKind::Read, tag(1), b"").unwrap();
        for _ in 0..3 {
            assert!(reg.lookup_read(3).is_some());
        }
        assert_eq!(reg.len(Category::Read), 1);
    }

    #[test]
    fn accept_and_read_share_a_slot() {
        let reg = Registry::new();
        reg.register(8, ActionKind::Accept, tag(1), b"").unwrap();
        reg.register(8, ActionKind::Read, tag(2), b"").unwrap();

        let op = reg.lookup_read(8).unwrap();
        assert_eq!(op.action(), ActionKind::Read);
        assert_eq!(fire(&op), vec![2]);
        assert_eq!(reg.len(Category::Read), 1);
    }

    #[test]
    fn connect_and_peer_close_are_independent() {
        let reg = Registry::new();
        reg.register(4, ActionKind::Connect, tag(1), b"").unwrap();
        reg.register(4, ActionKind::PeerClose, tag(2), b"").unwrap();

        assert_eq!(reg.lookup_write(4).unwrap().action(), ActionKind::Connect);
        assert_eq!(
            reg.lookup_peer_close(4).unwrap().action(),
            ActionKind::PeerClose
        );
        assert_eq!(
            reg.interest(4),
            Interest {
                read: false,
                write: true,
                peer_close: true
            }
        );
        assert!(reg.interest(4).contains(Category::Write));
        assert!(!reg.interest(4).contains(Category::Read));
    }

    #[test]
    fn raw_codes_register() {
        let reg = Registry::new();
        reg.register(2, 5, tag(1), b"x").unwrap();
        assert_eq!(reg.lookup_write(2).unwrap().action(), ActionKind::Write);

        let err = reg.register(2, 9, tag(2), b"").unwrap_err();
        assert_eq!(err, DispatchError::UnrecognizedAction("9".to_string()));
        assert_eq!(fire(&reg.lookup_write(2).unwrap()), vec![1]);
    }

    #[test]
    #[traced_test]
    fn rejected_registration_is_logged() {
        let reg = Registry::new();
        assert!(reg.register(5, "bogus", tag(1), b"").is_err());
        assert!(reg.is_empty());
        assert!(logs_contain("registration rejected"));
    }

    #[test]
    fn cancel_is_idempotent() {
        let reg = Registry::new();
        reg.register(1, ActionKind::Read, tag(1), b"").unwrap();
        reg.register(1, ActionKind::Write, tag(2), b"").unwrap();
        reg.register(1, ActionKind::PeerClose, tag(3), b"").unwrap();
        reg.register(2, ActionKind::Read, tag(4), b"").unwrap();

        reg.cancel(1);
        reg.cancel(1);
        reg.cancel(99);

        assert!(reg.interest(1).is_empty());
        assert_eq!(reg.handles(), vec![2]);
    }

    #[test]
    fn cancel_does_not_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let reg = Registry::new();
        reg.register(
            1,
            ActionKind::Read,
            move |_: &mut AsyncContext| {
                seen.fetch_add(1, Ordering::SeqCst);
                true
            },
            b"",
        )
        .unwrap();
        reg.cancel(1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dispatch_keeps_or_releases() {
        let reg = Registry::new();
        reg.register(7, ActionKind::Read, |_: &mut AsyncContext| true, b"").unwrap();
        reg.register(7, ActionKind::Write, |_: &mut AsyncContext| false, b"").unwrap();

        let mut cx = AsyncContext::new(7);
        assert_eq!(reg.dispatch(Readiness::Readable, &mut cx), Dispatch::Kept);
        assert_eq!(reg.dispatch(Readiness::Writable, &mut cx), Dispatch::Released);
        assert_eq!(reg.dispatch(Readiness::Writable, &mut cx), Dispatch::Idle);
        assert_eq!(reg.dispatch(Readiness::PeerClosed, &mut cx), Dispatch::Idle);

        // Releasing the write slot leaves the read slot armed.
        assert!(reg.lookup_read(7).is_some());
    }

    #[test]
    fn timer_fired_uses_read_slot() {
        let reg = Registry::new();
        reg.register(9, ActionKind::Timer, tag(6), b"").unwrap();
        let mut cx = AsyncContext::new(9);
        assert_eq!(reg.dispatch(Readiness::TimerFired, &mut cx), Dispatch::Kept);
        assert_eq!(cx.buffer, vec![6]);
    }

    #[test]
    fn claim_invalidates_previous_occupant() {
        let reg = Registry::new();
        let first = reg.claim(10);
        assert_eq!(first.generation, 1);
        reg.register(first, ActionKind::Read, tag(1), b"").unwrap();
        assert!(reg.lookup_read(first).is_some());

        let second = reg.claim(10);
        assert_eq!(second.generation, 2);
        assert_eq!(reg.generation(10), 2);
        assert!(reg.lookup_read(second).is_none());
        assert!(reg.lookup_read(first).is_none());
    }

    #[test]
    fn stale_generation_does_not_match() {
        let reg = Registry::new();
        let old = Handle::new(11, 1);
        reg.register(old, ActionKind::Read, tag(1), b"").unwrap();

        let new = old.next_generation();
        assert!(reg.lookup_read(new).is_none());
        assert!(reg.lookup_read(old).is_some());

        let mut cx = AsyncContext::new(new);
        assert_eq!(reg.dispatch(Readiness::Readable, &mut cx), Dispatch::Idle);
    }

    #[test]
    #[traced_test]
    fn stale_owner_cannot_overwrite_new_occupant() {
        let reg = Registry::new();
        let old = reg.claim(10);
        reg.register(old, ActionKind::Read, tag(1), b"").unwrap();

        let new = reg.claim(10);
        reg.register(new, ActionKind::Read, tag(2), b"new").unwrap();

        let err = reg.register(old, ActionKind::Read, tag(3), b"old").unwrap_err();
        assert_eq!(err, DispatchError::StaleHandle { handle: old, current: 2 });
        assert!(logs_contain("refused registration from a stale generation"));

        let op = reg.lookup_read(new).unwrap();
        assert_eq!(op.payload(), b"new");
        assert_eq!(fire(&op), vec![2]);
    }

    #[test]
    fn raw_value_after_claim_is_refused() {
        let reg = Registry::new();
        let claimed = reg.claim(12);
        assert!(matches!(
            reg.register(12, ActionKind::Read, tag(1), b""),
            Err(DispatchError::StaleHandle { current: 1, .. })
        ));
        assert!(reg.is_empty());
        assert!(reg.interest(12).is_empty());
        assert!(reg.handles().is_empty());

        reg.register(claimed, ActionKind::Read, tag(2), b"").unwrap();
        assert!(reg.interest(12).read);
        assert_eq!(reg.handles(), vec![12]);
    }

    #[test]
    fn newer_generation_becomes_current() {
        let reg = Registry::new();
        reg.register(Handle::new(13, 4), ActionKind::Write, tag(1), b"").unwrap();
        assert_eq!(reg.generation(13), 4);
        assert!(reg.interest(13).write);
        assert!(reg.register(Handle::new(13, 3), ActionKind::Read, tag(2), b"").is_err());
    }

    #[test]
    fn cancel_keeps_generation() {
        let reg = Registry::new();
        let handle = reg.claim(14);
        reg.register(handle, ActionKind::Read, tag(1), b"").unwrap();
        reg.cancel(handle);
        assert_eq!(reg.generation(14), 1);
        assert!(reg.register(14, ActionKind::Read, tag(2), b"").is_err());
    }

    #[test]
    fn revision_moves_on_every_registration() {
        let reg = Registry::new();
        assert_eq!(reg.revision(15), 0);

        reg.register(15, ActionKind::Read, tag(1), b"").unwrap();
        let first = reg.revision(15);
        assert!(first > 0);

        reg.cancel(15);
        assert_eq!(reg.revision(15), 0);

        // Same interest as before, but a different record.
        reg.register(15, ActionKind::Read, tag(1), b"").unwrap();
        assert!(reg.revision(15) > first);
        assert!(reg.interest(15).read);
    }

    #[test]
    fn generation_checks_can_be_disabled() {
        let reg = Registry::with_config(RegistryConfig {
            check_generations: false,
            ..RegistryConfig::default()
        });
        reg.register(Handle::new(11, 1), ActionKind::Read, tag(1), b"").unwrap();
        assert!(reg.lookup_read(Handle::new(11, 5)).is_some());
    }

    #[test]
    fn handles_are_sorted_and_unique() {
        let reg = Registry::new();
        reg.register(30, ActionKind::Write, tag(1), b"").unwrap();
        reg.register(10, ActionKind::Read, tag(2), b"").unwrap();
        reg.register(30, ActionKind::Read, tag(3), b"").unwrap();
        reg.register(20, ActionKind::PeerClose, tag(4), b"").unwrap();
        assert_eq!(reg.handles(), vec![10, 20, 30]);
        assert!(format!("{:?}", reg).contains("read: 2"));
    }
}
