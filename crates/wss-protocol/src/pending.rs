//! Pending-request table.
//!
//! Every request/response call registers a waiter under the key
//! `(target, command)` before its frame is sent. The IO task completes the
//! oldest waiter of a key when a matching reply arrives, so several
//! in-flight requests sharing a key resolve in send order.
//!
//! The table uses a blocking mutex: it is never held across an await, and
//! waiters must be removable from `Drop`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use wss_core::Result;

use crate::frame::Frame;

/// Correlation key: (target address byte, command opcode).
pub type PendingKey = (u8, u8);

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Result<Frame>>,
}

#[derive(Default)]
pub struct PendingTable {
    queues: Mutex<HashMap<PendingKey, VecDeque<Waiter>>>,
    next_id: AtomicU64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PendingKey, VecDeque<Waiter>>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a waiter for `key`, returning its id and receiving end.
    pub fn register(&self, key: PendingKey) -> (u64, oneshot::Receiver<Result<Frame>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().entry(key).or_default().push_back(Waiter { id, tx });
        (id, rx)
    }

    /// Register a waiter that is removed again when the guard is dropped.
    pub fn register_guarded(&self, key: PendingKey) -> (WaiterGuard<'_>, oneshot::Receiver<Result<Frame>>) {
        let (id, rx) = self.register(key);
        (
            WaiterGuard {
                table: self,
                key,
                id,
            },
            rx,
        )
    }

    /// Hand `result` to the oldest live waiter of `key`.
    ///
    /// Waiters whose receiver is already gone are discarded on the way.
    /// Returns the result back if nobody took it.
    pub fn complete(&self, key: PendingKey, result: Result<Frame>) -> Option<Result<Frame>> {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(&key) else {
            return Some(result);
        };

        let mut result = result;
        while let Some(waiter) = queue.pop_front() {
            match waiter.tx.send(result) {
                Ok(()) => {
                    if queue.is_empty() {
                        queues.remove(&key);
                    }
                    return None;
                }
                Err(back) => result = back,
            }
        }
        queues.remove(&key);
        Some(result)
    }

    /// Remove one waiter by id. Returns `true` if it was still queued.
    pub fn remove(&self, key: PendingKey, id: u64) -> bool {
        let mut queues = self.lock();
        let Some(queue) = queues.get_mut(&key) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|w| w.id != id);
        let removed = queue.len() != before;
        if queue.is_empty() {
            queues.remove(&key);
        }
        removed
    }

    /// Fail every waiter with an error built by `err`.
    pub fn fail_all(&self, err: impl Fn() -> wss_core::Error) {
        let drained: Vec<Waiter> = self.lock().drain().flat_map(|(_, q)| q).collect();
        for waiter in drained {
            let _ = waiter.tx.send(Err(err()));
        }
    }

    /// Number of queued waiters across all keys.
    pub fn len(&self) -> usize {
        self.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its waiter from the table on drop.
///
/// Dropping after the waiter was completed is a no-op, so the guard covers
/// timeout, cancellation and a dropped request future alike.
pub struct WaiterGuard<'a> {
    table: &'a PendingTable,
    key: PendingKey,
    id: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.key, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wss_core::Error;

    const KEY: PendingKey = (0x81, 0x44);

    fn reply(tag: u8) -> Frame {
        Frame::new(0x81, 0x00, &[0x44, 0x01, tag])
    }

    #[tokio::test]
    async fn completes_in_fifo_order() {
        let table = PendingTable::new();
        let (_, first) = table.register(KEY);
        let (_, second) = table.register(KEY);

        assert!(table.complete(KEY, Ok(reply(1))).is_none());
        assert!(table.complete(KEY, Ok(reply(2))).is_none());

        assert_eq!(first.await.unwrap().unwrap().data(), &[1]);
        assert_eq!(second.await.unwrap().unwrap().data(), &[2]);
        assert!(table.is_empty());
    }

    #[test]
    fn complete_without_waiter_returns_result() {
        let table = PendingTable::new();
        let back = table.complete(KEY, Ok(reply(1)));
        assert!(matches!(back, Some(Ok(_))));
    }

    #[test]
    fn keys_are_independent() {
        let table = PendingTable::new();
        let (_, _rx) = table.register((0x82, 0x44));
        assert!(table.complete(KEY, Ok(reply(1))).is_some());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn complete_skips_dropped_receivers() {
        let table = PendingTable::new();
        let (_, gone) = table.register(KEY);
        let (_, live) = table.register(KEY);
        drop(gone);

        assert!(table.complete(KEY, Ok(reply(7))).is_none());
        assert_eq!(live.await.unwrap().unwrap().data(), &[7]);
    }

    #[test]
    fn complete_with_only_dead_waiters_returns_result() {
        let table = PendingTable::new();
        let (_, gone) = table.register(KEY);
        drop(gone);

        let back = table.complete(KEY, Ok(reply(3)));
        assert_eq!(back.unwrap().unwrap().data(), &[3]);
        assert!(table.is_empty());
    }

    #[test]
    fn remove_by_id() {
        let table = PendingTable::new();
        let (a, _ra) = table.register(KEY);
        let (b, _rb) = table.register(KEY);
        assert!(table.remove(KEY, a));
        assert!(!table.remove(KEY, a));
        assert_eq!(table.len(), 1);
        assert!(table.remove(KEY, b));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn guard_removes_waiter_on_drop() {
        let table = PendingTable::new();
        {
            let (_guard, _rx) = table.register_guarded(KEY);
            assert_eq!(table.len(), 1);
        }
        assert!(table.is_empty());

        // A later reply is not delivered anywhere.
        assert!(table.complete(KEY, Ok(reply(1))).is_some());
    }

    #[tokio::test]
    async fn fail_all_errors_every_waiter() {
        let table = PendingTable::new();
        let (_, a) = table.register(KEY);
        let (_, b) = table.register((0x82, 0x4A));
        table.fail_all(|| Error::ConnectionLost);

        assert!(matches!(a.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(matches!(b.await.unwrap(), Err(Error::ConnectionLost)));
        assert!(table.is_empty());
    }
}
