//! Fixed-latency replay buffer for live streams.
//!
//! Every event is fed `buffer_time` seconds after its stream timestamp,
//! measured from the moment the first event arrived. Network jitter smaller
//! than the buffer is invisible to the viewer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::DriverContext;
use super::queue::{ForEachHandle, Queue};

/// Default buffer latency in seconds.
pub const DEFAULT_BUFFER_TIME: f64 = 0.1;

/// An output event waiting in the buffer.
#[derive(Debug, Clone)]
struct Pending {
    time: f64,
    data: String,
}

/// State of the delayed variant.
#[derive(Debug)]
pub struct Delayed {
    ctx: DriverContext,
    buffer_ms: f64,
    base_ms: f64,
    queue: Queue<Pending>,
    anchor: Arc<Mutex<Option<f64>>>,
    stopped: Arc<AtomicBool>,
    handle: ForEachHandle,
}

impl Delayed {
    fn anchor(&self) -> f64 {
        let mut anchor = self.anchor.lock().unwrap_or_else(PoisonError::into_inner);
        *anchor.get_or_insert_with(|| self.ctx.now() - self.base_ms)
    }
}

/// A time-shift buffer.
#[derive(Debug)]
pub enum TimeShiftBuffer {
    /// Feeds immediately.
    PassThrough(DriverContext),
    /// Feeds after a fixed latency.
    Delayed(Delayed),
}

impl TimeShiftBuffer {
    /// Create a buffer. A non-positive `buffer_time` feeds everything
    /// immediately without a queue.
    #[must_use]
    pub fn new(buffer_time: f64, ctx: DriverContext) -> Self {
        Self::starting_at(buffer_time, 0.0, ctx)
    }

    /// Create a buffer for a stream whose first event is stamped around
    /// `base_time` seconds.
    #[must_use]
    pub fn starting_at(buffer_time: f64, base_time: f64, ctx: DriverContext) -> Self {
        if buffer_time.is_nan() || buffer_time <= 0.0 {
            return Self::PassThrough(ctx);
        }

        let queue = Queue::new();
        let anchor = Arc::new(Mutex::new(None));
        let stopped = Arc::new(AtomicBool::new(false));
        let buffer_ms = buffer_time * 1000.0;

        let handle = {
            let ctx = ctx.clone();
            let anchor = Arc::clone(&anchor);
            let stopped = Arc::clone(&stopped);
            queue.for_each(move |event: Pending| {
                let ctx = ctx.clone();
                let stopped = Arc::clone(&stopped);
                let anchor = anchor
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .unwrap_or(0.0);
                async move {
                    let target = anchor + event.time * 1000.0 + buffer_ms;
                    ctx.clock().sleep(target - ctx.now()).await;
                    if !stopped.load(Ordering::Acquire) {
                        ctx.feed(event.data.as_bytes());
                    }
                }
            })
        };

        Self::Delayed(Delayed {
            ctx,
            buffer_ms,
            base_ms: base_time * 1000.0,
            queue,
            anchor,
            stopped,
            handle,
        })
    }

    /// Buffer latency in seconds.
    #[must_use]
    pub fn buffer_time(&self) -> f64 {
        match self {
            Self::PassThrough(_) => 0.0,
            Self::Delayed(delayed) => delayed.buffer_ms / 1000.0,
        }
    }

    /// Push output stamped with its stream time in seconds.
    pub fn push_event(&self, time: f64, data: impl Into<String>) {
        match self {
            Self::PassThrough(ctx) => ctx.feed(data.into().as_bytes()),
            Self::Delayed(delayed) => {
                if delayed.stopped.load(Ordering::Acquire) {
                    return;
                }
                delayed.anchor();
                delayed.queue.push(Pending {
                    time,
                    data: data.into(),
                });
            }
        }
    }

    /// Push output stamped with the time elapsed since the first push.
    pub fn push_text(&self, data: impl Into<String>) {
        match self {
            Self::PassThrough(ctx) => ctx.feed(data.into().as_bytes()),
            Self::Delayed(delayed) => {
                let anchor = delayed.anchor();
                let time = (delayed.ctx.now() - anchor) / 1000.0;
                self.push_event(time, data);
            }
        }
    }

    /// Stop replaying. Nothing is fed afterwards.
    pub fn stop(&self) {
        if let Self::Delayed(delayed) = self {
            delayed.stopped.store(true, Ordering::Release);
            delayed.handle.stop();
        }
    }
}
