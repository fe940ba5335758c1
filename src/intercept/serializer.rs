// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

//! Per-instance event serializer
//!
//! Lifecycle callbacks of one instance are appended to a FIFO queue and run
//! one at a time by a single worker task, so a callback that awaits (a slow
//! response hook, say) holds back everything delivered after it.
//!
//! Without a tokio runtime there is no worker: jobs wait in a local queue
//! and are drained, in order, by whoever awaits [`EventSerializer::settled`].

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use super::state::InstanceId;

/// A serialized unit of work
pub(crate) type Job = BoxFuture<'static, ()>;

tokio::task_local! {
    /// Instance whose queue the current task is draining
    static DRAINING: InstanceId;
}

pub(crate) struct EventSerializer {
    instance: InstanceId,
    queue: Mutex<Option<mpsc::UnboundedSender<Job>>>,
    /// Jobs waiting for a caller to drain them when no runtime is available
    pending: Mutex<VecDeque<Job>>,
    /// Set while `settled` drains `pending`
    draining_inline: AtomicBool,
}

impl EventSerializer {
    pub fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            queue: Mutex::new(None),
            pending: Mutex::new(VecDeque::new()),
            draining_inline: AtomicBool::new(false),
        }
    }

    /// Append a job; it runs after every job enqueued before it
    ///
    /// The worker is spawned lazily on the current tokio runtime. Without
    /// a runtime the job is parked until the next `settled`.
    pub fn enqueue(&self, job: Job) {
        let mut queue = self.queue.lock();
        let job = match queue.as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => return,
                // Worker died with its runtime
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        match Handle::try_current() {
            Ok(handle) => {
                let (tx, rx) = mpsc::unbounded_channel();
                handle.spawn(drain(self.instance, rx));
                // Parked jobs go first
                for parked in self.pending.lock().drain(..) {
                    let _ = tx.send(parked);
                }
                let _ = tx.send(job);
                *queue = Some(tx);
            }
            Err(_) => {
                *queue = None;
                self.pending.lock().push_back(job);
            }
        }
    }

    /// Resolves once every job enqueued before this call has run
    ///
    /// Returns immediately when called from one of this instance's own
    /// jobs, which would otherwise wait on itself.
    pub async fn settled(&self) {
        if self.is_draining() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        self.enqueue(
            async move {
                let _ = tx.send(());
            }
            .boxed(),
        );
        self.drain_pending().await;
        let _ = rx.await;
    }

    /// Run parked jobs on the caller's task
    async fn drain_pending(&self) {
        if self.draining_inline.swap(true, Ordering::AcqRel) {
            return;
        }
        let _reset = DrainReset(&self.draining_inline);

        loop {
            let next = self.pending.lock().pop_front();
            match next {
                Some(job) => run(self.instance, job).await,
                None => break,
            }
        }
    }

    fn is_draining(&self) -> bool {
        self.draining_inline.load(Ordering::Acquire)
            || DRAINING
                .try_with(|id| *id == self.instance)
                .unwrap_or(false)
    }
}

struct DrainReset<'a>(&'a AtomicBool);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn drain(instance: InstanceId, mut rx: mpsc::UnboundedReceiver<Job>) {
    DRAINING
        .scope(instance, async move {
            while let Some(job) = rx.recv().await {
                run(instance, job).await;
            }
        })
        .await;
    tracing::trace!(instance = %instance, "Event queue closed");
}

async fn run(instance: InstanceId, job: Job) {
    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
        tracing::warn!(instance = %instance, "Serialized event job panicked");
    }
}
