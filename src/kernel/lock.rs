//! Hierarchical lock: per-node, reentrant, upgradeable reader/writer lock.
//!
//! Holds are tracked per thread, so the same thread may re-acquire a lock it
//! already holds (read under read, write under read or upgradeable). Locks are
//! always taken top-down (ancestor before descendant).
//!
//! ```text
//!              other readers   other upgradeable   other writer
//! read              ok               ok               wait
//! upgradeable       ok               wait             wait
//! write             wait             wait             wait
//! ```
//!
//! A thread that holds nothing on this lock waits while a writer is queued,
//! so a stream of readers cannot starve a reload.
//!
//! Upgrading read → write is only deadlock-free when no other thread tries the
//! same upgrade; reload transactions therefore take the upgradeable hold first.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct LockState {
    readers: HashMap<ThreadId, usize>,
    upgradeable: Option<(ThreadId, usize)>,
    writer: Option<(ThreadId, usize)>,
    waiting_writers: usize,
}

impl LockState {
    fn holds_any(&self, me: ThreadId) -> bool {
        self.readers.contains_key(&me)
            || self.upgradeable.map_or(false, |(t, _)| t == me)
            || self.writer.map_or(false, |(t, _)| t == me)
    }

    fn writer_is_other(&self, me: ThreadId) -> bool {
        self.writer.map_or(false, |(t, _)| t != me)
    }

    fn can_read(&self, me: ThreadId) -> bool {
        if self.writer_is_other(me) {
            return false;
        }
        self.holds_any(me) || self.waiting_writers == 0
    }

    fn can_upgradeable(&self, me: ThreadId) -> bool {
        if self.writer_is_other(me) || self.upgradeable.map_or(false, |(t, _)| t != me) {
            return false;
        }
        self.holds_any(me) || self.waiting_writers == 0
    }

    fn can_write(&self, me: ThreadId) -> bool {
        !self.writer_is_other(me)
            && !self.upgradeable.map_or(false, |(t, _)| t != me)
            && self.readers.keys().all(|t| *t == me)
    }
}

/// Which kind of hold a guard releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldKind {
    Read,
    Upgradeable,
    Write,
}

/// Per-node reentrant upgradeable reader/writer lock.
pub struct HierarchicalLock {
    label: String,
    state: Mutex<LockState>,
    changed: Condvar,
}

impl fmt::Debug for HierarchicalLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HierarchicalLock")
            .field("label", &self.label)
            .field("readers", &state.readers.values().sum::<usize>())
            .field("upgradeable", &state.upgradeable.is_some())
            .field("writer", &state.writer.is_some())
            .finish()
    }
}

impl HierarchicalLock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(LockState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Shared hold; blocks while another thread writes.
    pub fn read(&self) -> ReadGuard<'_> {
        self.acquire(HoldKind::Read, None);
        ReadGuard(Hold::new(self, HoldKind::Read))
    }

    /// Single upgradeable hold; compatible with plain readers.
    pub fn upgradeable_read(&self) -> UpgradeableGuard<'_> {
        self.acquire(HoldKind::Upgradeable, None);
        UpgradeableGuard(Hold::new(self, HoldKind::Upgradeable))
    }

    /// Exclusive hold; blocks until other threads' holds are released.
    pub fn write(&self) -> WriteGuard<'_> {
        self.acquire(HoldKind::Write, None);
        WriteGuard(Hold::new(self, HoldKind::Write))
    }

    pub fn try_read_for(&self, timeout: Duration) -> Option<ReadGuard<'_>> {
        self.acquire(HoldKind::Read, Some(timeout))
            .then(|| ReadGuard(Hold::new(self, HoldKind::Read)))
    }

    pub fn try_write_for(&self, timeout: Duration) -> Option<WriteGuard<'_>> {
        self.acquire(HoldKind::Write, Some(timeout))
            .then(|| WriteGuard(Hold::new(self, HoldKind::Write)))
    }

    /// Exclusive hold with no guard; paired with [`Self::release_write`] on
    /// the same thread. Reload transactions keep one across their phases.
    pub(crate) fn hold_write(&self) {
        self.acquire(HoldKind::Write, None);
    }

    pub(crate) fn release_write(&self) {
        self.release(HoldKind::Write, thread::current().id());
    }

    /// Whether the calling thread holds the lock exclusively.
    pub fn is_write_held_by_current(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().writer.map_or(false, |(t, _)| t == me)
    }

    /// Whether the calling thread holds the lock in any mode.
    pub fn is_held_by_current(&self) -> bool {
        let me = thread::current().id();
        self.state.lock().holds_any(me)
    }

    fn acquire(&self, kind: HoldKind, timeout: Option<Duration>) -> bool {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        let ready = |s: &LockState| match kind {
            HoldKind::Read => s.can_read(me),
            HoldKind::Upgradeable => s.can_upgradeable(me),
            HoldKind::Write => s.can_write(me),
        };

        let queued_writer = kind == HoldKind::Write && !ready(&*state);
        if queued_writer {
            state.waiting_writers += 1;
        }

        while !ready(&*state) {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() && !ready(&*state)
                    {
                        if queued_writer {
                            state.waiting_writers -= 1;
                            self.changed.notify_all();
                        }
                        return false;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }

        if queued_writer {
            state.waiting_writers -= 1;
        }

        match kind {
            HoldKind::Read => *state.readers.entry(me).or_insert(0) += 1,
            HoldKind::Upgradeable => {
                let count = state.upgradeable.map_or(0, |(_, c)| c);
                state.upgradeable = Some((me, count + 1));
            }
            HoldKind::Write => {
                let count = state.writer.map_or(0, |(_, c)| c);
                state.writer = Some((me, count + 1));
            }
        }
        true
    }

    fn release(&self, kind: HoldKind, owner: ThreadId) {
        let mut state = self.state.lock();
        match kind {
            HoldKind::Read => {
                if let Some(count) = state.readers.get_mut(&owner) {
                    *count -= 1;
                    if *count == 0 {
                        state.readers.remove(&owner);
                    }
                }
            }
            HoldKind::Upgradeable => {
                state.upgradeable = match state.upgradeable {
                    Some((t, c)) if c > 1 => Some((t, c - 1)),
                    _ => None,
                };
            }
            HoldKind::Write => {
                state.writer = match state.writer {
                    Some((t, c)) if c > 1 => Some((t, c - 1)),
                    _ => None,
                };
            }
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// Release-on-drop hold. Not `Send`: a hold belongs to the thread that took it.
struct Hold<'a> {
    lock: &'a HierarchicalLock,
    kind: HoldKind,
    owner: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Hold<'a> {
    fn new(lock: &'a HierarchicalLock, kind: HoldKind) -> Self {
        Self {
            lock,
            kind,
            owner: thread::current().id(),
            _not_send: PhantomData,
        }
    }
}

impl Drop for Hold<'_> {
    fn drop(&mut self) {
        self.lock.release(self.kind, self.owner);
    }
}

/// Shared hold on a [`HierarchicalLock`].
pub struct ReadGuard<'a>(Hold<'a>);

/// Upgradeable hold on a [`HierarchicalLock`].
pub struct UpgradeableGuard<'a>(Hold<'a>);

/// Exclusive hold on a [`HierarchicalLock`].
pub struct WriteGuard<'a>(Hold<'a>);

impl<'a> UpgradeableGuard<'a> {
    /// Take the write hold while keeping the upgradeable one.
    pub fn upgrade(&self) -> WriteGuard<'a> {
        self.0.lock.write()
    }
}

impl WriteGuard<'_> {
    /// Whether this guard was taken on `lock`.
    pub fn is_for(&self, lock: &HierarchicalLock) -> bool {
        std::ptr::eq(self.0.lock, lock)
    }
}

macro_rules! guard_debug {
    ($name:ident) => {
        impl fmt::Debug for $name<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("lock", &self.0.lock.label)
                    .finish()
            }
        }
    };
}

guard_debug!(ReadGuard);
guard_debug!(UpgradeableGuard);
guard_debug!(WriteGuard);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{mpsc, Arc, Barrier};

    #[test]
    fn test_reentrant_read_then_write_same_thread() {
        let lock = HierarchicalLock::new("node");
        let _r1 = lock.read();
        let _r2 = lock.read();
        let w = lock.try_write_for(Duration::from_millis(50));
        assert!(w.is_some());
        assert!(lock.is_write_held_by_current());
        drop(w);
        assert!(!lock.is_write_held_by_current());
        assert!(lock.is_held_by_current());
    }

    #[test]
    fn test_reentrant_write_then_read() {
        let lock = HierarchicalLock::new("node");
        let _w = lock.write();
        let _r = lock.read();
        let _w2 = lock.write();
        assert!(lock.is_write_held_by_current());
    }

    #[test]
    fn test_write_excluded_by_other_reader() {
        let lock = Arc::new(HierarchicalLock::new("node"));
        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let reader_lock = lock.clone();
        let reader = std::thread::spawn(move || {
            let _r = reader_lock.read();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });

        held_rx.recv().unwrap();
        assert!(lock.try_write_for(Duration::from_millis(50)).is_none());

        release_tx.send(()).unwrap();
        reader.join().unwrap();
        assert!(lock.try_write_for(Duration::from_millis(500)).is_some());
    }

    #[test]
    fn test_guardless_write_hold_outlives_guards() {
        let lock = Arc::new(HierarchicalLock::new("node"));
        lock.hold_write();
        drop(lock.write());

        let other = lock.clone();
        let blocked = std::thread::spawn(move || other.try_read_for(Duration::from_millis(50)).is_none())
            .join()
            .unwrap();
        assert!(blocked);

        lock.release_write();
        assert!(!lock.is_held_by_current());
        let other = lock.clone();
        assert!(std::thread::spawn(move || other.try_read_for(Duration::from_millis(200)).is_some())
            .join()
            .unwrap());
    }

    #[test]
    fn test_readers_share() {
        let lock = Arc::new(HierarchicalLock::new("node"));
        let barrier = Arc::new(Barrier::new(2));
        let _r = lock.read();

        let other = lock.clone();
        let b = barrier.clone();
        let handle = std::thread::spawn(move || {
            let got = other.try_read_for(Duration::from_millis(200)).is_some();
            b.wait();
            got
        });
        barrier.wait();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_single_upgradeable_holder() {
        let lock = Arc::new(HierarchicalLock::new("node"));
        let upgradeable = lock.upgradeable_read();

        let other = lock.clone();
        let acquired = Arc::new(AtomicBool::new(false));
        let flag = acquired.clone();
        let handle = std::thread::spawn(move || {
            let _u = other.upgradeable_read();
            flag.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        // Plain readers are still admitted alongside the upgradeable hold.
        let reader = lock.clone();
        let can_read = std::thread::spawn(move || reader.try_read_for(Duration::from_millis(200)).is_some())
            .join()
            .unwrap();
        assert!(can_read);

        let w = upgradeable.upgrade();
        drop(w);
        drop(upgradeable);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_queued_writer_blocks_new_readers() {
        let lock = Arc::new(HierarchicalLock::new("node"));
        let first = lock.read();

        let writer_lock = lock.clone();
        let writer = std::thread::spawn(move || {
            let _w = writer_lock.write();
        });
        std::thread::sleep(Duration::from_millis(50));

        let reader_lock = lock.clone();
        let late_reader = std::thread::spawn(move || {
            reader_lock.try_read_for(Duration::from_millis(50)).is_some()
        });
        assert!(!late_reader.join().unwrap());

        // The existing reader may still re-enter.
        assert!(lock.try_read_for(Duration::from_millis(50)).is_some());

        drop(first);
        writer.join().unwrap();
        assert!(lock.try_read_for(Duration::from_millis(200)).is_some());
    }

    #[test]
    fn test_guard_identity() {
        let a = HierarchicalLock::new("a");
        let b = HierarchicalLock::new("b");
        let w = a.write();
        assert!(w.is_for(&a));
        assert!(!w.is_for(&b));
    }
}
