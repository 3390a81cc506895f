//! TaskRunner - タスクの実行基盤
//!
//! # 設計
//! - runnable は tokio の blocking pool（`spawn_blocking`）で実行する
//!   （暗号処理はサブプロセスやキーリング I/O でブロックするため）
//! - sequency タスクは origin context のイベントループで runnable を実行する
//! - callback は task 側で origin context へ post される
//! - post は常に即座に戻り、完了は Completion で観測する
//! - context のジョブ（callback など）の中から post されたタスクは、
//!   そのジョブが戻ってから worker へ渡す
//!
//! shutdown 後に post されたタスクは、runnable を実行せずに FAULT で完了します。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, trace, warn};

use super::context::ContextHandle;
use super::task::{Pending, Task, TaskBuilder, TaskHandle};
use crate::config::RunnerConfig;
use crate::error::LoomError;
use crate::observability::{RunnerCounts, RunnerStats};
use crate::ports::IdGenerator;

/// Handle to a named execution substrate. Clones share the same runner.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

struct RunnerInner {
    dispatcher: Arc<Dispatcher>,
    ids: Arc<dyn IdGenerator>,
    runtime: Mutex<Option<Runtime>>,
    shutdown_timeout: Duration,
}

/// The part of a runner that scheduled jobs keep alive. It never owns the
/// runtime, so a pending schedule cannot keep the runtime from shutting down.
struct Dispatcher {
    name: String,
    handle: Handle,
    stats: RunnerStats,
    shut_down: AtomicBool,
}

pub(crate) fn build_runtime(config: &RunnerConfig) -> Result<Runtime, LoomError> {
    config.validate()?;
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .max_blocking_threads(config.max_blocking_threads)
        .thread_name(config.thread_name.clone())
        .enable_all()
        .build()
        .map_err(LoomError::Runtime)
}

/// Shut an owned runtime down. Inside async code blocking is not allowed,
/// so the runtime is released in the background instead of waited on.
pub(crate) fn stop_runtime(runtime: Runtime, timeout: Duration) {
    if Handle::try_current().is_ok() {
        debug!("stopping runtime from async code, not waiting for workers");
        runtime.shutdown_background();
    } else {
        runtime.shutdown_timeout(timeout);
    }
}

impl TaskRunner {
    /// A runner owning its own multi-thread runtime. The runtime stops on
    /// [`shutdown`](Self::shutdown) or when the last clone is dropped.
    pub fn new(
        name: impl Into<String>,
        config: &RunnerConfig,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, LoomError> {
        let runtime = build_runtime(config)?;
        let handle = runtime.handle().clone();
        Ok(Self::assemble(
            name.into(),
            handle,
            ids,
            Some(runtime),
            config.shutdown_timeout(),
        ))
    }

    /// A runner on a runtime owned elsewhere. `shutdown` only stops
    /// accepting tasks; the runtime's owner decides when it stops.
    pub fn from_handle(name: impl Into<String>, handle: Handle, ids: Arc<dyn IdGenerator>) -> Self {
        Self::assemble(name.into(), handle, ids, None, Duration::ZERO)
    }

    fn assemble(
        name: String,
        handle: Handle,
        ids: Arc<dyn IdGenerator>,
        runtime: Option<Runtime>,
        shutdown_timeout: Duration,
    ) -> Self {
        debug!(runner = %name, owns_runtime = runtime.is_some(), "task runner created");
        Self {
            inner: Arc::new(RunnerInner {
                dispatcher: Arc::new(Dispatcher {
                    name,
                    handle,
                    stats: RunnerStats::default(),
                    shut_down: AtomicBool::new(false),
                }),
                ids,
                runtime: Mutex::new(runtime),
                shutdown_timeout,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.dispatcher.name
    }

    pub fn id_generator(&self) -> &Arc<dyn IdGenerator> {
        &self.inner.ids
    }

    /// Submit `task`. Sequency tasks with an origin run their runnable on the
    /// origin event loop, everything else on a worker.
    ///
    /// Posted from inside a context job, the task starts only after that job
    /// returns, so the job must not block on the task's completion.
    pub fn post_task(&self, task: Task) -> TaskHandle {
        let pending = self.inner.dispatcher.accept(task);
        let handle = pending.handle();
        self.inner.dispatcher.dispatch(pending, false);
        handle
    }

    /// Submit `task` to a worker regardless of its sequency flag.
    pub fn post_concurrent_task(&self, task: Task) -> TaskHandle {
        let pending = self.inner.dispatcher.accept(task);
        let handle = pending.handle();
        self.inner.dispatcher.dispatch(pending, true);
        handle
    }

    /// Submit `task` after `delay`. A schedule cut short by shutdown completes
    /// the task with a fault.
    pub fn post_schedule_task(&self, task: Task, delay: Duration) -> TaskHandle {
        let dispatcher = Arc::clone(&self.inner.dispatcher);
        let pending = dispatcher.accept(task);
        let handle = pending.handle();
        if dispatcher.is_shut_down() {
            dispatcher.dispatch(pending, false);
            return handle;
        }

        trace!(runner = %dispatcher.name, task = %pending.shared().full_id(), ?delay, "task scheduled");
        let runtime = dispatcher.handle.clone();
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            dispatcher.dispatch(pending, false);
        });
        handle
    }

    /// Build with this runner's id generator and post.
    pub fn spawn(&self, builder: TaskBuilder) -> TaskHandle {
        self.post_task(builder.build(self.inner.ids.as_ref()))
    }

    pub fn counts(&self) -> RunnerCounts {
        self.inner.dispatcher.stats.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.dispatcher.is_shut_down()
    }

    /// Stop accepting tasks and, for an owned runtime, shut it down within the
    /// configured timeout. Tasks still queued complete with a fault.
    ///
    /// Called from async code the runtime is released without waiting.
    pub fn shutdown(&self) {
        self.inner.dispatcher.shut_down.store(true, Ordering::Release);
        let runtime = self
            .inner
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            info!(runner = %self.name(), "shutting down task runner");
            stop_runtime(runtime, self.inner.shutdown_timeout);
        }
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner")
            .field("name", &self.name())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Drop for RunnerInner {
    fn drop(&mut self) {
        let runtime = self
            .runtime
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            stop_runtime(runtime, self.shutdown_timeout);
        }
    }
}

impl Dispatcher {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn accept(self: &Arc<Self>, task: Task) -> Pending {
        let pending = task.into_pending();
        self.stats.record_submitted();
        let dispatcher = Arc::clone(self);
        pending
            .shared()
            .completion()
            .subscribe(move |report| dispatcher.stats.record_completed(report));
        pending
    }

    fn dispatch(&self, pending: Pending, concurrent: bool) {
        let full_id = pending.shared().full_id().to_string();
        if self.is_shut_down() {
            warn!(runner = %self.name, task = %full_id, "task posted after shutdown");
            pending.abandon(LoomError::RunnerShutdown(self.name.clone()).to_string());
            return;
        }
        pending.shared().mark_dispatched();

        let origin = if concurrent {
            None
        } else {
            pending.shared().sequency_origin().cloned()
        };
        match origin {
            Some(origin) => {
                trace!(runner = %self.name, task = %full_id, context = origin.name(), "sequency task posted to origin");
                if let Err(err) = origin.post(move || pending.execute()) {
                    warn!(runner = %self.name, task = %full_id, error = %err, "origin context rejected sequency task");
                }
            }
            None => match ContextHandle::current() {
                Some(context) => {
                    trace!(runner = %self.name, task = %full_id, context = context.name(), "worker hand-off queued behind the running job");
                    let handoff = Handoff {
                        pending: Some(pending),
                        handle: self.handle.clone(),
                    };
                    if let Err(err) = context.post(move || handoff.send()) {
                        debug!(runner = %self.name, task = %full_id, error = %err, "context closed, handing off now");
                    }
                }
                None => {
                    trace!(runner = %self.name, task = %full_id, "task posted to worker");
                    drop(self.handle.spawn_blocking(move || pending.execute()));
                }
            },
        }
    }
}

/// A worker-bound task posted from inside a context job. It reaches the
/// worker only after that job returns; if the context drops it, it goes
/// straight to the worker.
struct Handoff {
    pending: Option<Pending>,
    handle: Handle,
}

impl Handoff {
    fn send(mut self) {
        self.spawn();
    }

    fn spawn(&mut self) {
        if let Some(pending) = self.pending.take() {
            drop(self.handle.spawn_blocking(move || pending.execute()));
        }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        self.spawn();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::EventLoop;
    use crate::domain::{StatusCode, TaskReport, TaskState};
    use crate::ports::SequenceIdGenerator;
    use rstest::rstest;
    use std::sync::mpsc as std_mpsc;
    use std::thread::JoinHandle;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(5);

    fn runner(name: &str) -> TaskRunner {
        let config = RunnerConfig {
            thread_name: format!("{name}-worker"),
            shutdown_timeout_ms: 1_000,
            ..RunnerConfig::default()
        };
        TaskRunner::new(name, &config, Arc::new(SequenceIdGenerator::new())).unwrap()
    }

    /// Run `f` on the loop behind `ctx` and hand back its result.
    fn on_loop<R, F>(ctx: &ContextHandle, f: F) -> R
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel();
        ctx.post(move || tx.send(f()).unwrap()).unwrap();
        rx.recv_timeout(WAIT).unwrap()
    }

    fn stop(ctx: ContextHandle, join: JoinHandle<usize>) {
        ctx.quit().unwrap();
        join.join().unwrap();
    }

    fn thread_name() -> String {
        std::thread::current().name().unwrap_or_default().to_string()
    }

    #[test]
    fn hello_round_trip_delivers_on_origin_context() {
        let runner = runner("hello");
        let (ui, join) = EventLoop::spawn("ui").unwrap();
        let (tx, rx) = std_mpsc::channel();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("hello")
                    .runnable(|data| {
                        data.push("Hello".to_string());
                        data.push(thread_name());
                        0
                    })
                    .callback(move |status, data| {
                        tx.send((status, data.get::<String>(0), data.get::<String>(1), thread_name()))
                            .unwrap();
                    }),
            )
        });

        let (status, text, runnable_thread, callback_thread) = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(status, StatusCode::SUCCESS);
        assert_eq!(text, "Hello");
        assert!(runnable_thread.starts_with("hello-worker"));
        assert_eq!(callback_thread, "ui");

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert!(report.is_success());
        assert!(report.callback_invoked);
        assert_eq!(handle.state(), TaskState::Completed);
        stop(ui, join);
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    #[case(-3)]
    fn runnable_status_reaches_callback_and_report(#[case] code: i32) {
        let runner = runner("status");
        let (ui, join) = EventLoop::spawn("ui-status").unwrap();
        let (tx, rx) = std_mpsc::channel();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("status")
                    .runnable(move |_| code)
                    .callback(move |status, _| tx.send(status).unwrap()),
            )
        });

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), StatusCode::new(code));
        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::new(code));
        stop(ui, join);
    }

    #[test]
    fn panicking_runnable_reports_fault_and_runner_survives() {
        let runner = runner("panic");
        let (ui, join) = EventLoop::spawn("ui-panic").unwrap();
        let (tx, rx) = std_mpsc::channel();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("explodes")
                    .runnable(|_| -> i32 { panic!("engine exploded") })
                    .callback(move |status, _| tx.send(status).unwrap()),
            )
        });

        assert_eq!(rx.recv_timeout(WAIT).unwrap(), StatusCode::FAULT);
        let report = handle.completion().wait_timeout(WAIT).unwrap();
        let fault = report.runnable_fault.as_ref().unwrap();
        assert!(fault.message().contains("engine exploded"));
        assert!(report.callback_invoked);

        let next = runner.spawn(Task::builder("after").runnable(|_| 0));
        assert!(next.completion().wait_timeout(WAIT).unwrap().is_success());
        stop(ui, join);
    }

    #[test]
    fn runnable_error_result_becomes_fault_status() {
        let runner = runner("result");
        let handle = runner.spawn(
            Task::builder("fallible").runnable(|_| -> Result<i32, String> { Err("no key".into()) }),
        );

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
        assert_eq!(report.runnable_fault.unwrap().message(), "no key");
    }

    #[test]
    fn panicking_callback_is_contained() {
        let runner = runner("cb-panic");
        let (ui, join) = EventLoop::spawn("ui-cb-panic").unwrap();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("bad-callback")
                    .runnable(|_| 0)
                    .callback(|_, _| panic!("callback exploded")),
            )
        });

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::SUCCESS);
        assert!(report.callback_fault.is_some());
        assert!(!report.is_success());
        assert_eq!(on_loop(&ui, || "loop alive"), "loop alive");
        stop(ui, join);
    }

    #[test]
    fn held_callback_waits_for_release() {
        let runner = runner("hold");
        let (ui, join) = EventLoop::spawn("ui-hold").unwrap();
        let (tx, rx) = std_mpsc::channel();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("held")
                    .runnable(|_| 0)
                    .callback(move |_, _| tx.send(thread_name()).unwrap())
                    .hold_lifecycle(true),
            )
        });

        let deadline = Instant::now() + WAIT;
        while !handle.state().runnable_finished() {
            assert!(Instant::now() < deadline, "runnable never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert!(!handle.is_completed());

        handle.release();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "ui-hold");
        assert!(handle.completion().wait_timeout(WAIT).unwrap().callback_invoked);

        handle.release();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        stop(ui, join);
    }

    #[test]
    fn release_before_runnable_returns_is_remembered() {
        let runner = runner("early");
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();

        let handle = runner.spawn(
            Task::builder("gated")
                .runnable(move |_| {
                    gate_rx.recv_timeout(WAIT).unwrap();
                    0
                })
                .callback(|_, _| {})
                .hold_lifecycle(true),
        );

        handle.release();
        gate_tx.send(()).unwrap();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert!(report.callback_invoked);
    }

    #[test]
    fn task_driven_by_hand_completes_on_release() {
        let runner = runner("manual");
        let task = Task::named(runner.id_generator().as_ref(), "manual");
        task.hold_lifecycle(true);
        let handle = task.start(&runner);

        let deadline = Instant::now() + WAIT;
        while !handle.state().runnable_finished() {
            assert!(Instant::now() < deadline, "task never ran");
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.set_status(7);
        handle.release();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::new(7));
        assert!(!report.callback_invoked);
    }

    #[test]
    fn sequency_task_runs_runnable_on_origin() {
        let runner = runner("seq");
        let (ui, join) = EventLoop::spawn("ui-seq").unwrap();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("seq")
                    .runnable(|data| data.push(thread_name()))
                    .sequency(true),
            )
        });

        handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(handle.data().get::<String>(0), "ui-seq");
        stop(ui, join);
    }

    #[test]
    fn concurrent_post_ignores_sequency() {
        let runner = runner("conc");
        let (ui, join) = EventLoop::spawn("ui-conc").unwrap();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            let task = Task::builder("conc")
                .runnable(|data| data.push(thread_name()))
                .sequency(true)
                .build(r.id_generator().as_ref());
            r.post_concurrent_task(task)
        });

        handle.completion().wait_timeout(WAIT).unwrap();
        assert!(handle.data().get::<String>(0).starts_with("conc-worker"));
        stop(ui, join);
    }

    #[test]
    fn task_without_origin_calls_back_on_worker() {
        let runner = runner("noorigin");
        let (tx, rx) = std_mpsc::channel();
        let handle = runner.spawn(
            Task::builder("plain")
                .runnable(|_| 0)
                .callback(move |_, _| tx.send(thread_name()).unwrap()),
        );

        assert!(rx.recv_timeout(WAIT).unwrap().starts_with("noorigin-worker"));
        assert!(handle.completion().wait_timeout(WAIT).unwrap().is_success());
    }

    #[test]
    fn origin_gone_records_marshal_fault() {
        let runner = runner("gone");
        let (ui, join) = EventLoop::spawn("ui-gone").unwrap();
        let (gate_tx, gate_rx) = std_mpsc::channel::<()>();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("orphan")
                    .runnable(move |_| {
                        gate_rx.recv_timeout(WAIT).unwrap();
                        0
                    })
                    .callback(|_, _| panic!("must not run")),
            )
        });
        stop(ui, join);
        gate_tx.send(()).unwrap();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert!(!report.callback_invoked);
        assert!(report.marshal_fault.is_some());
        assert_eq!(report.status, StatusCode::SUCCESS);
    }

    #[test]
    fn sequency_task_with_dead_origin_is_abandoned() {
        let runner = runner("seq-dead");
        let (ui, join) = EventLoop::spawn("ui-seq-dead").unwrap();
        let ids = Arc::clone(runner.id_generator());
        let task = on_loop(&ui, move || {
            Task::builder("late-seq")
                .runnable(|_| -> i32 { panic!("must not run") })
                .sequency(true)
                .build(ids.as_ref())
        });
        stop(ui, join);

        let report = runner.post_task(task).completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
        assert!(report.runnable_fault.is_some());
    }

    #[test]
    fn task_posted_from_callback_starts_after_callback_returns() {
        let runner = runner("nested");
        let (ui, join) = EventLoop::spawn("ui-nested").unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = std_mpsc::channel();

        let (r, log) = (runner.clone(), Arc::clone(&events));
        let first = on_loop(&ui, move || {
            let next = r.clone();
            r.spawn(Task::builder("first").runnable(|_| 0).callback(
                move |_, _| {
                    let (runnable_log, callback_log) = (Arc::clone(&log), Arc::clone(&log));
                    let second = next.spawn(
                        Task::builder("second")
                            .runnable(move |_| runnable_log.lock().unwrap().push("second:runnable"))
                            .callback(move |_, _| callback_log.lock().unwrap().push("second:callback")),
                    );
                    std::thread::sleep(Duration::from_millis(100));
                    log.lock().unwrap().push("first:callback-returned");
                    tx.send(second).unwrap();
                },
            ))
        });

        first.completion().wait_timeout(WAIT).unwrap();
        let second = rx.recv_timeout(WAIT).unwrap();
        assert!(second.completion().wait_timeout(WAIT).unwrap().is_success());
        assert_eq!(
            *events.lock().unwrap(),
            vec!["first:callback-returned", "second:runnable", "second:callback"]
        );
        stop(ui, join);
    }

    #[test]
    fn task_posted_from_a_loop_job_still_runs_when_the_loop_quits() {
        let runner = runner("handoff");
        let event_loop = EventLoop::new("ui-handoff");
        let ui = event_loop.handle();

        let (r, (tx, rx)) = (runner.clone(), std_mpsc::channel());
        ui.post(move || {
            let handle = r.spawn(Task::builder("handed-off").runnable(|data| data.push(thread_name())));
            tx.send(handle).unwrap();
        })
        .unwrap();
        ui.quit().unwrap();
        assert_eq!(event_loop.run(), 1);

        let handle = rx.recv_timeout(WAIT).unwrap();
        assert!(handle.completion().wait_timeout(WAIT).unwrap().is_success());
        assert!(handle.data().get::<String>(0).starts_with("handoff-worker"));
    }

    #[test]
    fn callback_queued_behind_quit_records_marshal_fault() {
        let runner = runner("quit-cb");
        let (ui, join) = EventLoop::spawn("ui-quit-cb").unwrap();
        let (runnable_tx, runnable_rx) = std_mpsc::channel::<()>();
        let (loop_tx, loop_rx) = std_mpsc::channel::<()>();

        let r = runner.clone();
        let handle = on_loop(&ui, move || {
            r.spawn(
                Task::builder("behind-quit")
                    .runnable(move |_| {
                        runnable_rx.recv_timeout(WAIT).unwrap();
                        0
                    })
                    .callback(|_, _| panic!("must not run")),
            )
        });

        // ループを塞いでから quit を積む
        ui.post(move || loop_rx.recv_timeout(WAIT).unwrap()).unwrap();
        ui.quit().unwrap();
        runnable_tx.send(()).unwrap();

        let deadline = Instant::now() + WAIT;
        while !handle.state().runnable_finished() {
            assert!(Instant::now() < deadline, "runnable never finished");
            std::thread::sleep(Duration::from_millis(5));
        }
        std::thread::sleep(Duration::from_millis(20));
        loop_tx.send(()).unwrap();
        join.join().unwrap();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert!(!report.callback_invoked);
        assert!(report.marshal_fault.is_some());
        assert_eq!(report.status, StatusCode::SUCCESS);

        let counts = runner.counts();
        assert_eq!(counts.submitted, 1);
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.succeeded + counts.failed, 1);
        assert_eq!(counts.callbacks_invoked, 0);
    }

    #[test]
    fn sequency_task_queued_behind_quit_is_abandoned() {
        let runner = runner("quit-seq");
        let (ui, join) = EventLoop::spawn("ui-quit-seq").unwrap();
        let (loop_tx, loop_rx) = std_mpsc::channel::<()>();
        let ids = Arc::clone(runner.id_generator());
        let task = on_loop(&ui, move || {
            Task::builder("queued-seq")
                .runnable(|_| -> i32 { panic!("must not run") })
                .callback(|_, _| panic!("must not run"))
                .sequency(true)
                .build(ids.as_ref())
        });

        ui.post(move || loop_rx.recv_timeout(WAIT).unwrap()).unwrap();
        ui.quit().unwrap();
        let handle = runner.post_task(task);
        assert!(!handle.is_completed());

        loop_tx.send(()).unwrap();
        join.join().unwrap();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
        assert!(report.runnable_fault.is_some());
        assert!(!report.callback_invoked);
        assert_eq!(runner.counts().failed, 1);
    }

    #[test]
    fn scheduled_task_waits_for_delay() {
        let runner = runner("sched");
        let started = Instant::now();
        let handle = runner.post_schedule_task(
            Task::named(runner.id_generator().as_ref(), "later"),
            Duration::from_millis(60),
        );

        assert!(handle.completion().wait_timeout(WAIT).unwrap().is_success());
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn post_after_shutdown_completes_with_fault() {
        let runner = runner("closed");
        runner.shutdown();
        assert!(runner.is_shut_down());

        let handle = runner.spawn(
            Task::builder("too-late")
                .runnable(|_| -> i32 { panic!("must not run") })
                .callback(|_, _| panic!("must not run")),
        );
        let report: TaskReport = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
        assert!(!report.callback_invoked);
        assert!(report.runnable_fault.unwrap().message().contains("closed"));
    }

    #[test]
    fn shutdown_completes_cancelled_schedules() {
        let runner = runner("cancel");
        let handle = runner.post_schedule_task(
            Task::named(runner.id_generator().as_ref(), "never"),
            Duration::from_secs(60),
        );
        runner.shutdown();

        let report = handle.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(report.status, StatusCode::FAULT);
    }

    #[test]
    fn counts_track_outcomes() {
        let runner = runner("counts");
        let ok = runner.spawn(Task::builder("ok").runnable(|_| 0).callback(|_, _| {}));
        let bad = runner.spawn(Task::builder("bad").runnable(|_| 9));
        ok.completion().wait_timeout(WAIT).unwrap();
        bad.completion().wait_timeout(WAIT).unwrap();

        let counts = runner.counts();
        assert_eq!(counts.submitted, 2);
        assert_eq!(counts.in_flight, 0);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.callbacks_invoked, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shared_runtime_runner_waits_async() {
        let runner = TaskRunner::from_handle(
            "shared",
            Handle::current(),
            Arc::new(SequenceIdGenerator::new()),
        );
        let handle = runner.spawn(Task::builder("async").runnable(|_| 4));

        let report = tokio::time::timeout(WAIT, handle.completion().wait_async())
            .await
            .unwrap();
        assert_eq!(report.status, StatusCode::new(4));

        runner.shutdown();
        assert!(runner.is_shut_down());
    }

    #[tokio::test]
    async fn owned_runtime_stops_inside_async_code() {
        let explicit = runner("async-shutdown");
        let handle = explicit.spawn(Task::builder("quick").runnable(|_| 0));
        let report = tokio::time::timeout(WAIT, handle.completion().wait_async())
            .await
            .unwrap();
        assert!(report.is_success());
        explicit.shutdown();
        assert!(explicit.is_shut_down());

        // 最後の clone を drop すると Drop 側で runtime が止まる
        let implicit = runner("async-drop");
        drop(implicit.clone());
        drop(implicit);
    }
}
