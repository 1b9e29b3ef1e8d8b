//! Group-closable resource tracking
//!
//! A query racing several upstreams opens one socket per attempt. When
//! the query finishes (or its deadline fires) every pending read must be
//! unblocked promptly, without dedicating a watcher task to each socket.
//! [`ClosePool`] tracks the open handles so they can be closed as a
//! group exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// A resource that can be closed out-of-band.
pub trait CloseHandle: Send + Sync {
    fn close(&self);
}

/// A dynamic set of [`CloseHandle`]s to close as a group.
///
/// Intended to be closed at most once. After [`close`](ClosePool::close),
/// any handle passed to [`add`](ClosePool::add) is closed immediately and
/// [`remove`](ClosePool::remove) is a no-op. A given handle is closed by
/// the pool at most once.
#[derive(Default)]
pub struct ClosePool {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    handles: Vec<(usize, Arc<dyn CloseHandle>)>,
    closed: bool,
}

// Handle identity is the Arc's data pointer; clones of the same Arc
// compare equal.
fn key(handle: &Arc<dyn CloseHandle>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

impl ClosePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` with the pool. If the pool is already closed,
    /// the handle is closed right away instead.
    pub fn add(&self, handle: Arc<dyn CloseHandle>) {
        {
            let mut inner = self.inner.lock();
            if !inner.closed {
                let id = key(&handle);
                if !inner.handles.iter().any(|(k, _)| *k == id) {
                    inner.handles.push((id, handle));
                }
                return;
            }
        }
        handle.close();
    }

    /// Deregister `handle`. No-op after the pool has been closed.
    pub fn remove(&self, handle: &Arc<dyn CloseHandle>) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        let id = key(handle);
        inner.handles.retain(|(k, _)| *k != id);
    }

    /// Close every registered handle once and mark the pool closed.
    pub fn close(&self) {
        let handles = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            std::mem::take(&mut inner.handles)
        };
        for (_, handle) in handles {
            handle.close();
        }
    }
}

/// A close signal a pending socket read can select against.
///
/// The UDP receive path races `recv_from` against
/// [`wait_closed`](SocketCloser::wait_closed); closing the pool wakes
/// every registered waiter, which drops its socket on the way out.
#[derive(Default)]
pub(crate) struct SocketCloser {
    closed: AtomicBool,
    notify: Notify,
}

impl SocketCloser {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Resolves once [`close`](CloseHandle::close) has been called.
    pub(crate) async fn wait_closed(&self) {
        loop {
            let notified = self.notify.notified();
            if self.closed.load(Ordering::Acquire) {
                return;
            }
            notified.await;
        }
    }
}

impl CloseHandle for SocketCloser {
    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingHandle {
        closes: AtomicUsize,
    }

    impl CloseHandle for CountingHandle {
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn close_closes_registered_handles_once() {
        let pool = ClosePool::new();
        let a = Arc::new(CountingHandle::default());
        let b = Arc::new(CountingHandle::default());
        pool.add(a.clone());
        pool.add(b.clone());

        pool.close();
        pool.close();

        assert_eq!(a.closes.load(Ordering::SeqCst), 1);
        assert_eq!(b.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_after_close_closes_immediately() {
        let pool = ClosePool::new();
        pool.close();

        let handle = Arc::new(CountingHandle::default());
        pool.add(handle.clone());
        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_after_close_is_a_noop() {
        let pool = ClosePool::new();
        let handle: Arc<dyn CloseHandle> = Arc::new(CountingHandle::default());
        pool.close();
        pool.remove(&handle);
    }

    #[test]
    fn removed_handles_are_not_closed() {
        let pool = ClosePool::new();
        let handle = Arc::new(CountingHandle::default());
        let dyn_handle: Arc<dyn CloseHandle> = handle.clone();
        pool.add(dyn_handle.clone());
        pool.remove(&dyn_handle);
        pool.close();
        assert_eq!(handle.closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn double_add_closes_once() {
        let pool = ClosePool::new();
        let handle = Arc::new(CountingHandle::default());
        let dyn_handle: Arc<dyn CloseHandle> = handle.clone();
        pool.add(dyn_handle.clone());
        pool.add(dyn_handle);
        pool.close();
        assert_eq!(handle.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn socket_closer_wakes_waiters() {
        let closer = Arc::new(SocketCloser::new());
        let waiter = closer.clone();
        let task = tokio::spawn(async move { waiter.wait_closed().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        closer.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("waiter did not wake")
            .unwrap();
    }

    #[tokio::test]
    async fn socket_closer_is_immediate_when_already_closed() {
        let closer = SocketCloser::new();
        closer.close();
        tokio::time::timeout(Duration::from_millis(100), closer.wait_closed())
            .await
            .expect("wait_closed should resolve immediately");
    }
}
