//! Task - 一度だけ実行される遅延処理の単位
//!
//! # ライフサイクル
//! Created -> Dispatched -> RunnableExecuting -> RunnableDone -> CallbackExecuting -> Completed
//!
//! - runnable はワーカー（sequency の場合は origin context）で一度だけ実行される
//! - callback は origin context（タスクを生成したコンテキスト）で実行される
//! - 完了シグナルはタスクごとにちょうど一度だけ発火する
//! - runnable / callback の panic はここで捕まえてログに残し、status に畳み込む

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, error, trace, warn};

use super::context::ContextHandle;
use super::runner::TaskRunner;
use crate::domain::{
    DataObject, DataObjectPtr, IntoStatus, StatusCode, TaskId, TaskReport, TaskState,
};
use crate::error::Diagnostic;
use crate::ports::IdGenerator;

/// The deferred computation. Populates the payload and yields a status.
pub type RunnableFn = Box<dyn FnOnce(&DataObjectPtr) -> Result<StatusCode, Diagnostic> + Send>;

/// Invoked on the origin context with the final status and the payload.
pub type CallbackFn = Box<dyn FnOnce(StatusCode, &DataObjectPtr) + Send>;

pub type CompletionListener = Box<dyn FnOnce(&TaskReport) + Send>;

/// Builder for a fully specified task.
///
/// ```ignore
/// let task = Task::builder("decrypt")
///     .runnable(move |data| { data.push(result); 0 })
///     .callback(|status, data| { /* runs on the origin context */ })
///     .build(ids.as_ref());
/// ```
pub struct TaskBuilder {
    name: String,
    runnable: Option<RunnableFn>,
    callback: Option<CallbackFn>,
    data: Option<DataObjectPtr>,
    sequency: bool,
    origin: Option<ContextHandle>,
    hold: bool,
}

impl TaskBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runnable: None,
            callback: None,
            data: None,
            sequency: false,
            origin: None,
            hold: false,
        }
    }

    pub fn runnable<F, R>(mut self, runnable: F) -> Self
    where
        F: FnOnce(&DataObjectPtr) -> R + Send + 'static,
        R: IntoStatus,
    {
        self.runnable = Some(Box::new(move |data: &DataObjectPtr| {
            runnable(data).into_status()
        }));
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(StatusCode, &DataObjectPtr) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Share an existing payload. A fresh empty one is used otherwise.
    pub fn data(mut self, data: DataObjectPtr) -> Self {
        self.data = Some(data);
        self
    }

    /// Run the runnable on the origin context instead of a detached worker.
    pub fn sequency(mut self, sequency: bool) -> Self {
        self.sequency = sequency;
        self
    }

    /// Deliver the callback to `origin` rather than the context current at `build`.
    pub fn origin(mut self, origin: ContextHandle) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn hold_lifecycle(mut self, hold: bool) -> Self {
        self.hold = hold;
        self
    }

    pub fn build(self, ids: &dyn IdGenerator) -> Task {
        let origin = self.origin.or_else(ContextHandle::current);
        let shared = TaskShared::new(
            ids.generate_task_id(),
            self.name,
            self.sequency,
            origin,
            self.data.unwrap_or_else(DataObject::new_ptr),
            self.callback,
            self.hold,
        );
        trace!(
            task = %shared.full_id,
            origin = shared.origin.as_ref().map(ContextHandle::name),
            has_runnable = self.runnable.is_some(),
            "task created"
        );
        Task {
            shared,
            runnable: self.runnable,
        }
    }
}

/// A single-use unit of deferred work.
///
/// Starting consumes the task, so it cannot run twice. Observe it afterwards
/// through the returned [`TaskHandle`] or its [`Completion`].
pub struct Task {
    shared: Arc<TaskShared>,
    runnable: Option<RunnableFn>,
}

impl Task {
    pub fn builder(name: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(name)
    }

    /// A task with no behaviour. The caller drives it by hand, typically with
    /// `hold_lifecycle(true)`, `set_status` and `release`.
    pub fn named(ids: &dyn IdGenerator, name: impl Into<String>) -> Self {
        TaskBuilder::new(name).build(ids)
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// `"{id}/{name}"`, used in every log line about this task.
    pub fn full_id(&self) -> &str {
        &self.shared.full_id
    }

    pub fn is_sequency(&self) -> bool {
        self.shared.sequency
    }

    pub fn data(&self) -> &DataObjectPtr {
        &self.shared.data
    }

    pub fn origin(&self) -> Option<&ContextHandle> {
        self.shared.origin.as_ref()
    }

    /// While held, the callback is not delivered when the runnable returns;
    /// [`TaskHandle::release`] delivers it.
    pub fn hold_lifecycle(&self, hold: bool) {
        self.shared.lifecycle().hold = hold;
    }

    pub fn set_status(&self, status: impl Into<StatusCode>) {
        self.shared.set_status(status.into());
    }

    pub fn status(&self) -> StatusCode {
        self.shared.lifecycle().status
    }

    pub fn state(&self) -> TaskState {
        self.shared.lifecycle().state
    }

    pub fn completion(&self) -> Completion {
        self.shared.completion.clone()
    }

    pub fn on_complete<F>(&self, listener: F)
    where
        F: FnOnce(&TaskReport) + Send + 'static,
    {
        self.shared.completion.subscribe(listener);
    }

    pub fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Hand the task to `runner`. Returns immediately.
    pub fn start(self, runner: &TaskRunner) -> TaskHandle {
        runner.post_task(self)
    }

    pub(crate) fn into_pending(self) -> Pending {
        Pending {
            shared: self.shared,
            runnable: self.runnable,
            armed: true,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.full_id())
            .field("sequency", &self.is_sequency())
            .field("state", &self.state())
            .finish()
    }
}

/// Observer/driver for a started task.
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn full_id(&self) -> &str {
        &self.shared.full_id
    }

    pub fn data(&self) -> &DataObjectPtr {
        &self.shared.data
    }

    pub fn status(&self) -> StatusCode {
        self.shared.lifecycle().status
    }

    pub fn set_status(&self, status: impl Into<StatusCode>) {
        self.shared.set_status(status.into());
    }

    pub fn state(&self) -> TaskState {
        self.shared.lifecycle().state
    }

    pub fn is_completed(&self) -> bool {
        self.shared.completion.is_completed()
    }

    pub fn completion(&self) -> Completion {
        self.shared.completion.clone()
    }

    /// Deliver a held callback. Called from the origin context it runs inline,
    /// otherwise it is posted there. Before the runnable returns, the release
    /// is remembered. No-op once delivered.
    pub fn release(&self) {
        self.shared.release();
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.full_id())
            .field("state", &self.state())
            .finish()
    }
}

struct Lifecycle {
    state: TaskState,
    status: StatusCode,
    hold: bool,
    release_requested: bool,
    delivered: bool,
    callback_invoked: bool,
    runnable_fault: Option<Diagnostic>,
    callback_fault: Option<Diagnostic>,
    marshal_fault: Option<String>,
}

pub(crate) struct TaskShared {
    id: TaskId,
    name: String,
    full_id: String,
    sequency: bool,
    origin: Option<ContextHandle>,
    data: DataObjectPtr,
    callback: Mutex<Option<CallbackFn>>,
    lifecycle: Mutex<Lifecycle>,
    completion: Completion,
}

impl TaskShared {
    fn new(
        id: TaskId,
        name: String,
        sequency: bool,
        origin: Option<ContextHandle>,
        data: DataObjectPtr,
        callback: Option<CallbackFn>,
        hold: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            full_id: format!("{id}/{name}"),
            name,
            sequency,
            origin,
            data,
            callback: Mutex::new(callback),
            lifecycle: Mutex::new(Lifecycle {
                state: TaskState::Created,
                status: StatusCode::SUCCESS,
                hold,
                release_requested: false,
                delivered: false,
                callback_invoked: false,
                runnable_fault: None,
                callback_fault: None,
                marshal_fault: None,
            }),
            completion: Completion::new(),
        })
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn full_id(&self) -> &str {
        &self.full_id
    }

    pub(crate) fn completion(&self) -> &Completion {
        &self.completion
    }

    /// The context a sequency task must run its runnable on.
    pub(crate) fn sequency_origin(&self) -> Option<&ContextHandle> {
        if self.sequency { self.origin.as_ref() } else { None }
    }

    fn set_status(&self, status: StatusCode) {
        self.lifecycle().status = status;
    }

    pub(crate) fn mark_dispatched(&self) {
        self.lifecycle().state = TaskState::Dispatched;
    }

    fn run_runnable(&self, runnable: Option<RunnableFn>) {
        self.lifecycle().state = TaskState::RunnableExecuting;
        trace!(task = %self.full_id, "task is starting...");

        let outcome = match runnable {
            Some(runnable) => Some(
                match catch_unwind(AssertUnwindSafe(|| runnable(&self.data))) {
                    Ok(result) => result,
                    Err(payload) => Err(Diagnostic::from_panic(payload)),
                },
            ),
            None => {
                warn!(task = %self.full_id, "no runnable in task, do callback operation");
                None
            }
        };

        let mut lifecycle = self.lifecycle();
        match outcome {
            Some(Ok(status)) => lifecycle.status = status,
            Some(Err(diag)) => {
                error!(task = %self.full_id, error = %diag, "exception was caught at task");
                if let Some(trace) = diag.backtrace() {
                    error!("stacktrace of the exception: {trace}");
                }
                lifecycle.status = StatusCode::FAULT;
                lifecycle.runnable_fault = Some(diag);
            }
            None => {}
        }
        lifecycle.state = TaskState::RunnableDone;
        trace!(task = %self.full_id, status = %lifecycle.status, "task was end.");
    }

    fn finish_runnable(self: &Arc<Self>) {
        let deliver_now = {
            let lifecycle = self.lifecycle();
            !lifecycle.hold || lifecycle.release_requested
        };
        if deliver_now {
            self.deliver();
        } else {
            debug!(task = %self.full_id, "task holds its lifecycle, callback deferred");
        }
    }

    fn release(self: &Arc<Self>) {
        let deliver_now = {
            let mut lifecycle = self.lifecycle();
            lifecycle.release_requested = true;
            lifecycle.state == TaskState::RunnableDone && !lifecycle.delivered
        };
        if deliver_now {
            self.deliver();
        }
    }

    fn deliver(self: &Arc<Self>) {
        let status = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.delivered {
                return;
            }
            lifecycle.delivered = true;
            lifecycle.status
        };
        trace!(task = %self.full_id, %status, "task runnable finished");

        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(callback) = callback else {
            self.complete();
            return;
        };

        let delivery = Delivery {
            shared: Arc::clone(self),
            callback: Some(callback),
        };
        match &self.origin {
            Some(origin) if !origin.is_current() => {
                debug!(
                    task = %self.full_id,
                    context = origin.name(),
                    "callback context is a different context, posting"
                );
                if let Err(err) = origin.post(move || delivery.invoke()) {
                    error!(task = %self.full_id, error = %err, "task had failed to invoke callback");
                }
            }
            Some(_) => {
                debug!(task = %self.full_id, "callback context is the current context");
                delivery.invoke();
            }
            None => {
                debug!(task = %self.full_id, "task has no origin context, running callback here");
                delivery.invoke();
            }
        }
    }

    /// Finish a task whose runnable will never run.
    pub(crate) fn abandon(&self, reason: String) {
        error!(task = %self.full_id, reason = %reason, "task abandoned before its runnable ran");
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.status = StatusCode::FAULT;
            lifecycle.runnable_fault = Some(Diagnostic::new(reason));
            lifecycle.delivered = true;
        }
        self.complete();
    }

    fn complete(&self) {
        let report = {
            let mut lifecycle = self.lifecycle();
            if lifecycle.state == TaskState::Completed {
                warn!(task = %self.full_id, "task completed twice, ignoring");
                return;
            }
            lifecycle.state = TaskState::Completed;
            TaskReport {
                task_id: self.id,
                name: self.name.clone(),
                status: lifecycle.status,
                callback_invoked: lifecycle.callback_invoked,
                runnable_fault: lifecycle.runnable_fault.clone(),
                callback_fault: lifecycle.callback_fault.clone(),
                marshal_fault: lifecycle.marshal_fault.clone(),
            }
        };
        debug!(task = %self.full_id, "task life comes to an end");
        self.completion.fire(report);
    }
}

impl Drop for TaskShared {
    fn drop(&mut self) {
        trace!(task = %self.full_id, "task destroyed");
    }
}

/// A task owned by the substrate between `post` and runnable execution.
///
/// Dropping it unexecuted (shut-down runtime, quit origin loop, cancelled
/// schedule) still completes the task.
pub(crate) struct Pending {
    shared: Arc<TaskShared>,
    runnable: Option<RunnableFn>,
    armed: bool,
}

impl Pending {
    pub(crate) fn shared(&self) -> &Arc<TaskShared> {
        &self.shared
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the runnable on the current context, then hand off the callback.
    pub(crate) fn execute(mut self) {
        self.armed = false;
        let runnable = self.runnable.take();
        self.shared.run_runnable(runnable);
        self.shared.finish_runnable();
    }

    pub(crate) fn abandon(mut self, reason: String) {
        self.armed = false;
        self.runnable = None;
        self.shared.abandon(reason);
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if self.armed {
            self.shared
                .abandon("task was dropped before its runnable could run".to_string());
        }
    }
}

/// The callback in flight to the origin context.
///
/// Dropped undelivered (origin loop gone) it records a marshal fault and
/// completes the task without running the callback.
struct Delivery {
    shared: Arc<TaskShared>,
    callback: Option<CallbackFn>,
}

impl Delivery {
    fn invoke(mut self) {
        let Some(callback) = self.callback.take() else {
            return;
        };
        let status = {
            let mut lifecycle = self.shared.lifecycle();
            lifecycle.state = TaskState::CallbackExecuting;
            lifecycle.callback_invoked = true;
            lifecycle.status
        };

        let data = &self.shared.data;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| callback(status, data))) {
            let diag = Diagnostic::from_panic(payload);
            error!(task = %self.shared.full_id, error = %diag, "exception was caught at task callback");
            if let Some(trace) = diag.backtrace() {
                error!("stacktrace of the exception: {trace}");
            }
            self.shared.lifecycle().callback_fault = Some(diag);
        }
        self.shared.complete();
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if self.callback.take().is_some() {
            let reason = match &self.shared.origin {
                Some(origin) => format!("origin context {} dropped the callback", origin.name()),
                None => "callback dropped before delivery".to_string(),
            };
            error!(task = %self.shared.full_id, reason = %reason, "task had failed to invoke callback");
            self.shared.lifecycle().marshal_fault = Some(reason);
            self.shared.complete();
        }
    }
}

struct CompletionInner {
    report: Option<TaskReport>,
    firing: bool,
    listeners: Vec<CompletionListener>,
}

struct CompletionState {
    inner: Mutex<CompletionInner>,
    ready: Condvar,
    notify: Notify,
}

/// One-shot completion signal of a task.
#[derive(Clone)]
pub struct Completion {
    state: Arc<CompletionState>,
}

impl Completion {
    fn new() -> Self {
        Self {
            state: Arc::new(CompletionState {
                inner: Mutex::new(CompletionInner {
                    report: None,
                    firing: false,
                    listeners: Vec::new(),
                }),
                ready: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, CompletionInner> {
        self.state.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Listeners run before waiters are woken. A listener subscribed while
    /// the others run is picked up in the same pass.
    fn fire(&self, report: TaskReport) {
        {
            let mut inner = self.inner();
            if inner.report.is_some() || inner.firing {
                warn!(task = %report.full_id(), "completion signal raised twice, ignoring");
                return;
            }
            inner.firing = true;
        }

        loop {
            let listeners = {
                let mut inner = self.inner();
                if inner.listeners.is_empty() {
                    inner.firing = false;
                    inner.report = Some(report.clone());
                    break;
                }
                std::mem::take(&mut inner.listeners)
            };
            for listener in listeners {
                notify_listener(listener, &report);
            }
        }
        self.state.ready.notify_all();
        self.state.notify.notify_waiters();
    }

    pub fn is_completed(&self) -> bool {
        self.inner().report.is_some()
    }

    pub fn report(&self) -> Option<TaskReport> {
        self.inner().report.clone()
    }

    /// Call `listener` once with the report: now if already complete,
    /// otherwise when the signal fires.
    pub fn subscribe<F>(&self, listener: F)
    where
        F: FnOnce(&TaskReport) + Send + 'static,
    {
        let report = {
            let mut inner = self.inner();
            match &inner.report {
                Some(report) => report.clone(),
                None => {
                    inner.listeners.push(Box::new(listener));
                    return;
                }
            }
        };
        notify_listener(Box::new(listener), &report);
    }

    /// Block until completion. Never call this on the task's own origin
    /// context while its callback is still queued there.
    pub fn wait(&self) -> TaskReport {
        let inner = self
            .state
            .ready
            .wait_while(self.inner(), |inner| inner.report.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        match &inner.report {
            Some(report) => report.clone(),
            None => unreachable!("wait_while returned before completion"),
        }
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskReport> {
        let (inner, _) = self
            .state
            .ready
            .wait_timeout_while(self.inner(), timeout, |inner| inner.report.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        inner.report.clone()
    }

    pub async fn wait_async(&self) -> TaskReport {
        loop {
            let notified = self.state.notify.notified();
            if let Some(report) = self.report() {
                return report;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("completed", &self.is_completed())
            .finish()
    }
}

fn notify_listener(listener: CompletionListener, report: &TaskReport) {
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(report))) {
        let diag = Diagnostic::from_panic(payload);
        error!(task = %report.full_id(), error = %diag, "completion listener panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SequenceIdGenerator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn builder_assigns_distinct_ids_and_full_id() {
        let ids = SequenceIdGenerator::new();
        let a = Task::builder("encrypt").build(&ids);
        let b = Task::builder("encrypt").build(&ids);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.full_id(), format!("{}/encrypt", a.id()));
        assert_eq!(a.state(), TaskState::Created);
        assert!(!a.is_sequency());
    }

    #[test]
    fn task_built_off_any_loop_has_no_origin() {
        let ids = SequenceIdGenerator::new();
        let task = Task::named(&ids, "manual");
        assert!(task.origin().is_none());
    }

    #[test]
    fn status_can_be_set_before_start() {
        let ids = SequenceIdGenerator::new();
        let task = Task::named(&ids, "manual");
        assert_eq!(task.status(), StatusCode::SUCCESS);
        task.set_status(7);
        assert_eq!(task.status(), StatusCode::new(7));
    }

    #[test]
    fn pending_runs_runnable_then_callback_inline_without_origin() {
        let ids = SequenceIdGenerator::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (o1, o2) = (Arc::clone(&order), Arc::clone(&order));

        let task = Task::builder("inline")
            .runnable(move |data| {
                o1.lock().unwrap().push("runnable");
                data.push("Hello".to_string());
                0
            })
            .callback(move |status, data| {
                o2.lock().unwrap().push("callback");
                assert_eq!(status, StatusCode::SUCCESS);
                assert_eq!(data.get::<String>(0), "Hello");
            })
            .build(&ids);
        let completion = task.completion();
        task.into_pending().execute();

        let report = completion.report().unwrap();
        assert!(report.is_success());
        assert!(report.callback_invoked);
        assert_eq!(*order.lock().unwrap(), vec!["runnable", "callback"]);
    }

    #[test]
    fn dropped_pending_completes_with_fault() {
        let ids = SequenceIdGenerator::new();
        let called = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&called);
        let task = Task::builder("dropped")
            .runnable(|_| 0)
            .callback(move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .build(&ids);
        let handle = task.handle();

        drop(task.into_pending());

        let report = handle.completion().report().unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
        assert!(report.runnable_fault.is_some());
        assert!(!report.callback_invoked);
        assert_eq!(called.load(Ordering::SeqCst), 0);
        assert_eq!(handle.state(), TaskState::Completed);
    }

    #[test]
    fn listeners_fire_once_even_when_subscribed_late() {
        let ids = SequenceIdGenerator::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let task = Task::builder("late").runnable(|_| 3).build(&ids);

        let f = Arc::clone(&fired);
        task.on_complete(move |report| {
            assert_eq!(report.status, StatusCode::new(3));
            f.fetch_add(1, Ordering::SeqCst);
        });
        let completion = task.completion();
        task.into_pending().execute();

        let f = Arc::clone(&fired);
        completion.subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn second_fire_is_ignored() {
        let ids = SequenceIdGenerator::new();
        let task = Task::builder("twice").build(&ids);
        let completion = task.completion();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        completion.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let shared = Arc::clone(&task.shared);
        task.into_pending().execute();
        shared.complete();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let ids = SequenceIdGenerator::new();
        let task = Task::builder("listeners").build(&ids);
        let count = Arc::new(AtomicUsize::new(0));

        task.on_complete(|_| panic!("listener exploded"));
        let c = Arc::clone(&count);
        task.on_complete(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        task.into_pending().execute();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_timeout_returns_none_while_pending() {
        let ids = SequenceIdGenerator::new();
        let task = Task::builder("slow").build(&ids);
        assert!(
            task.completion()
                .wait_timeout(Duration::from_millis(20))
                .is_none()
        );
    }

    #[tokio::test]
    async fn wait_async_resolves_after_fire() {
        let ids = SequenceIdGenerator::new();
        let task = Task::builder("async").runnable(|_| 5).build(&ids);
        let completion = task.completion();
        let pending = task.into_pending();

        let waiter = tokio::spawn({
            let completion = completion.clone();
            async move { completion.wait_async().await }
        });
        tokio::task::yield_now().await;
        std::thread::spawn(move || pending.execute()).join().unwrap();

        let report = waiter.await.unwrap();
        assert_eq!(report.status, StatusCode::new(5));
    }
}
