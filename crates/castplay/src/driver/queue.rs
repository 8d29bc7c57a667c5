//! Single-consumer async FIFO.
//!
//! A [`Queue`] hands items to at most one waiting consumer. When nothing is
//! queued, [`Queue::pop`] parks a oneshot sender in the queue and the next
//! [`Queue::push`] fulfills it directly.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

struct Inner<T> {
    items: VecDeque<T>,
    waiter: Option<oneshot::Sender<T>>,
}

/// An unbounded FIFO with an async, single-consumer `pop`.
pub struct Queue<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Queue")
            .field("len", &inner.items.len())
            .field("waiting", &inner.waiter.is_some())
            .finish()
    }
}

impl<T> Queue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                items: VecDeque::new(),
                waiter: None,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an item, handing it straight to a waiting consumer if any.
    pub fn push(&self, item: T) {
        let mut inner = self.lock();
        let item = match inner.waiter.take() {
            Some(waiter) => match waiter.send(item) {
                Ok(()) => return,
                // The consumer gave up waiting; keep the item.
                Err(item) => item,
            },
            None => item,
        };
        inner.items.push_back(item);
    }

    /// Put an item back at the head of the queue.
    fn unshift(&self, item: T) {
        self.lock().items.push_front(item);
    }

    /// Take the next item, waiting for a push when the queue is empty.
    ///
    /// Returns `None` if another `pop` replaced this one as the pending
    /// consumer, or every other handle to the queue was dropped.
    pub async fn pop(&self) -> Option<T> {
        let receiver = {
            let mut inner = self.lock();
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            let (sender, receiver) = oneshot::channel();
            inner.waiter = Some(sender);
            receiver
        };
        receiver.await.ok()
    }

    /// Number of queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

impl<T: Send + 'static> Queue<T> {
    /// Spawn a consumer loop calling `f` for every item in order.
    ///
    /// Each call to `f` completes before the next item is taken.
    pub fn for_each<F, Fut>(&self, mut f: F) -> ForEachHandle
    where
        F: FnMut(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let queue = self.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        let task = tokio::spawn(async move {
            loop {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let Some(item) = queue.pop().await else {
                    break;
                };
                if flag.load(Ordering::Acquire) {
                    queue.unshift(item);
                    break;
                }
                f(item).await;
            }
        });

        ForEachHandle {
            stopped,
            task: task.abort_handle(),
        }
    }
}

/// Handle to a running [`Queue::for_each`] loop.
#[derive(Debug)]
pub struct ForEachHandle {
    stopped: Arc<AtomicBool>,
    task: AbortHandle,
}

impl ForEachHandle {
    /// Stop the loop. No further items are taken.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Whether [`ForEachHandle::stop`] was called.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}
