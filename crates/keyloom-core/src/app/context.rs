//! Context - callback を受け取る実行コンテキスト（イベントループ）
//!
//! 各コンテキストは 1 本のスレッドで動くメッセージキューです。
//! `ContextHandle::post` でクロージャを積み、`EventLoop::run` が到着順に実行します。
//! タスクは生成時のコンテキストを覚えておき、callback をそこへ post します。

use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, error, trace};
use ulid::Ulid;

use crate::domain::ContextId;
use crate::error::{Diagnostic, LoomError};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Quit,
}

thread_local! {
    static CURRENT: RefCell<Option<ContextHandle>> = const { RefCell::new(None) };
}

/// Cheap, clonable address of an event loop.
#[derive(Clone)]
pub struct ContextHandle {
    id: ContextId,
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Message>,
}

impl ContextHandle {
    /// The context whose event loop is running on this thread, if any.
    pub fn current() -> Option<Self> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|handle| handle.id == self.id)
        })
    }

    /// `false` once the loop has quit and dropped its queue.
    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue `job` behind everything already posted. Never runs it inline.
    ///
    /// On failure the job is dropped before this returns.
    pub fn post<F>(&self, job: F) -> Result<(), LoomError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| self.unreachable())
    }

    /// Ask the loop to stop after the jobs queued so far.
    pub fn quit(&self) -> Result<(), LoomError> {
        self.tx.send(Message::Quit).map_err(|_| self.unreachable())
    }

    fn unreachable(&self) -> LoomError {
        LoomError::ContextUnreachable {
            id: self.id,
            name: self.name.to_string(),
        }
    }
}

impl PartialEq for ContextHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ContextHandle {}

impl fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Single-threaded event loop draining one context's queue in arrival order.
pub struct EventLoop {
    handle: ContextHandle,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl EventLoop {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let name: String = name.into();
        let handle = ContextHandle {
            id: ContextId::from_ulid(Ulid::new()),
            name: Arc::from(name.as_str()),
            tx,
        };
        trace!(context = %handle.name, id = %handle.id, "event loop created");
        Self { handle, rx }
    }

    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Run the loop on the calling thread until [`ContextHandle::quit`].
    ///
    /// While running, this thread is the context: `ContextHandle::current()`
    /// returns it and tasks built here deliver their callbacks here. Jobs still
    /// queued behind the quit are dropped before this returns. Returns the
    /// number of jobs executed.
    ///
    /// # Panics
    /// Panics if called from inside an async runtime.
    pub fn run(mut self) -> usize {
        let previous = CURRENT.with(|current| current.replace(Some(self.handle.clone())));
        debug!(context = %self.handle.name, "event loop started");

        let mut executed = 0;
        while let Some(message) = self.rx.blocking_recv() {
            match message {
                Message::Run(job) => {
                    executed += 1;
                    if let Err(payload) = catch_unwind(AssertUnwindSafe(job)) {
                        let diag = Diagnostic::from_panic(payload);
                        error!(
                            context = %self.handle.name,
                            error = %diag,
                            "exception was caught in posted job"
                        );
                        if let Some(trace) = diag.backtrace() {
                            error!("stacktrace of the exception: {trace}");
                        }
                    }
                }
                Message::Quit => break,
            }
        }

        self.rx.close();
        let mut dropped = 0;
        while let Ok(message) = self.rx.try_recv() {
            dropped += 1;
            drop(message);
        }
        if dropped > 0 {
            debug!(context = %self.handle.name, dropped, "event loop dropped queued jobs on quit");
        }

        CURRENT.with(|current| current.replace(previous));
        debug!(context = %self.handle.name, executed, "event loop stopped");
        executed
    }

    /// Run a new loop on its own named thread.
    pub fn spawn(
        name: impl Into<String>,
    ) -> Result<(ContextHandle, JoinHandle<usize>), LoomError> {
        let name: String = name.into();
        let event_loop = EventLoop::new(name.clone());
        let handle = event_loop.handle();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || event_loop.run())
            .map_err(|source| LoomError::ThreadSpawn { name, source })?;
        Ok((handle, join))
    }
}
