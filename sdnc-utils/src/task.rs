//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle which can be used to manipulate the task created by
/// [`Task::spawn`] and [`Task::spawn_blocking`].
///
/// Dropping this handle cancels the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle for a one-shot delayed callback created by [`call_after`].
///
/// Dropping the handle cancels the pending callback. This is the concrete
/// type backing the `call_after(delay, fn)` scheduler primitive.
#[derive(Debug)]
pub struct TimeoutTask {
    inner: TimeoutTaskInner,
}

#[derive(Debug, new)]
struct TimeoutTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

/// A handle for a periodic callback created by [`every`].
///
/// Dropping the handle cancels the recurring callback. This is the concrete
/// type backing the `every(interval, fn)` scheduler primitive.
#[derive(Debug)]
pub struct IntervalTask {
    inner: IntervalTaskInner,
}

#[derive(Debug, new)]
struct IntervalTaskInner {
    _task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Runs the provided closure on a thread where blocking is acceptable.
    ///
    /// Used by the liveness reconciler so a blocking reachability probe never
    /// stalls the controller's single logical event loop.
    pub fn spawn_blocking<F>(f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn_blocking(f),
            detached: false,
        }
    }

    /// Detaches the task so dropping this handle no longer cancels it.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a callback to run once after `delay` elapses.
    ///
    /// This is the `call_after(delay, fn)` primitive: the callback runs to
    /// completion on the task that owns it before anything else scheduled
    /// through this module observes the next event, preserving the
    /// single-writer property the controller core depends on.
    pub fn new<F, Fut>(delay: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + delay;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let timeout_fut = time::sleep(delay);
                tokio::pin!(timeout_fut);

                loop {
                    tokio::select! {
                        _ = &mut timeout_fut => {
                            (cb)().await;
                            break;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(None)) => {
                                    let next = Instant::now() + delay;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                Some(Message::Reset(Some(new_delay))) => {
                                    let next = Instant::now() + new_delay;
                                    timeout_fut.as_mut().reset(next);
                                    *next_child.lock().unwrap() = next;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimeoutTaskInner::new(task, control_tx, next),
        }
    }

    /// Reschedules the callback `delay` (or a new one) from now.
    pub fn reset(&mut self, delay: Option<Duration>) {
        if self.inner.control.send(Message::Reset(delay)).is_err() {
            error!("failed to reset delayed task");
        }
    }

    /// Time remaining before the callback fires.
    pub fn remaining(&self) -> Duration {
        let next = self.inner.next.lock().unwrap();
        next.saturating_duration_since(Instant::now())
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a callback to run every `interval`.
    ///
    /// This is the `every(interval, fn)` primitive. Ticks never overlap: the
    /// next tick is not armed until the previous callback invocation has
    /// returned, which is what lets the ARP-probe engine and the liveness
    /// reconciler assume they are never reentered.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + interval;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let mut interval_fut = if tick_on_start {
                    time::interval(interval)
                } else {
                    let start = Instant::now() + interval;
                    time::interval_at(start, interval)
                };

                loop {
                    tokio::select! {
                        _ = interval_fut.tick() => {
                            (cb)().await;
                            *next_child.lock().unwrap() = Instant::now() + interval;
                        }
                        message = control_rx.recv() => {
                            match message {
                                Some(Message::Reset(None)) => {
                                    interval_fut = time::interval(interval);
                                    *next_child.lock().unwrap() = Instant::now() + interval;
                                }
                                Some(Message::Reset(Some(new_interval))) => {
                                    interval_fut = time::interval(new_interval);
                                    *next_child.lock().unwrap() = Instant::now() + new_interval;
                                }
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: IntervalTaskInner::new(task, control_tx, next),
        }
    }

    /// Reschedules the interval `interval` (or a new one) from now.
    pub fn reset(&mut self, interval: Option<Duration>) {
        if self.inner.control.send(Message::Reset(interval)).is_err() {
            error!("failed to reset interval task");
        }
    }

    /// Time remaining before the next tick.
    pub fn remaining(&self) -> Duration {
        let next = self.inner.next.lock().unwrap();
        next.saturating_duration_since(Instant::now())
    }
}

/// One-shot equivalent of the reference controller's `core.callDelayed`.
pub fn call_after<F, Fut>(delay: Duration, cb: F) -> TimeoutTask
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    TimeoutTask::new(delay, cb)
}

/// Recurring equivalent of the reference controller's `Timer` primitive.
pub fn every<F, Fut>(interval: Duration, cb: F) -> IntervalTask
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    IntervalTask::new(interval, false, cb)
}
