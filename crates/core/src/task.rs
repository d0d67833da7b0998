//! Background work and hand-off to the interactive loop.
//!
//! Blocking I/O runs on the tokio runtime via [`spawn_background`]. Anything
//! that touches UI-visible state is posted to a [`MainThread`] and executed by
//! whoever drives the matching [`MainLoop`], one continuation at a time and in
//! submission order.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Continuation = Box<dyn FnOnce() + Send + 'static>;

/// Submit work to the background executor.
pub fn spawn_background<F>(work: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(work)
}

/// Create a connected handle/loop pair.
pub fn main_thread() -> (MainThread, MainLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainThread { tx }, MainLoop { rx })
}

/// Cloneable handle for queueing work onto the interactive loop.
#[derive(Clone)]
pub struct MainThread {
    tx: mpsc::UnboundedSender<Continuation>,
}

impl MainThread {
    /// Queue `f`. Returns `false` if the loop has gone away.
    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(f)).is_ok()
    }

    /// Queue `f` and wait until the loop has run it. `None` if the loop was
    /// dropped before `f` ran.
    pub async fn call<F, R>(&self, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let queued = self.post(move || {
            let _ = done_tx.send(f());
        });
        if !queued {
            return None;
        }
        done_rx.await.ok()
    }
}

pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Continuation>,
}

impl MainLoop {
    /// Run everything queued right now without waiting. Returns how many
    /// continuations ran.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait for and run the next continuation. `false` once every
    /// [`MainThread`] handle is gone.
    pub async fn run_next(&mut self) -> bool {
        match self.rx.recv().await {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Drive the loop until every [`MainThread`] handle is dropped.
    pub async fn run(mut self) {
        while self.run_next().await {}
    }
}
