use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};

use keyloom_core::app::{
    AppBuilder, ContextHandle, EventLoop, Operation, OperationReport, OperationRunner, RunnerKind,
};
use keyloom_core::domain::{Buffer, KeyId, TaskReport};
use keyloom_core::impls::InMemoryEngine;
use keyloom_core::observability::init_logging;
use keyloom_core::{LoomConfig, TaskHandle};

/// keyloom - run an encrypt -> decrypt round trip through the task runner
#[derive(Parser)]
#[command(name = "keyloom")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Plain text to encrypt
    #[arg(long, default_value = "Hello GpgFrontend!")]
    message: String,

    /// Recipient key id (long form)
    #[arg(long, default_value = "6A2764F8298DEB29")]
    recipient: String,

    /// Import the recipient without its secret key, so decryption fails
    #[arg(long)]
    public_only: bool,

    /// Print task reports as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Default, Serialize)]
struct Session {
    operations: Vec<OperationReport>,
    tasks: Vec<TaskReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    plaintext: Option<String>,
}

type SharedSession = Arc<Mutex<Session>>;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LoomConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LoomConfig::default(),
    };
    init_logging(&config.logging);

    let kinds = if config.runners.is_empty() {
        vec![RunnerKind::Default, RunnerKind::Gpg]
    } else {
        config.runners.clone()
    };
    let mut builder = AppBuilder::new().config(config.runner.clone());
    for kind in kinds {
        builder = builder.runner(kind)?;
    }
    let app = builder
        .expect_runners(&[RunnerKind::Gpg])
        .build()
        .context("wiring task runners")?;
    let gpg = app
        .runner(RunnerKind::Gpg)
        .context("gpg runner missing")?
        .clone();

    let engine = InMemoryEngine::new();
    engine.add_key(cli.recipient.as_str(), !cli.public_only);
    let ops = OperationRunner::new(gpg, Arc::new(engine));

    let event_loop = EventLoop::new("ui");
    let ui = event_loop.handle();
    let session = SharedSession::default();

    let recipient = KeyId::new(cli.recipient);
    let plain = Buffer::from(cli.message);
    let shared = Arc::clone(&session);
    ui.post(move || round_trip(ops, recipient, plain, shared))
        .context("posting to the ui context")?;

    let executed = event_loop.run();
    info!(executed, "ui context finished");
    app.shutdown();

    let session = std::mem::take(&mut *session.lock().unwrap_or_else(PoisonError::into_inner));
    let ok = !session.tasks.is_empty()
        && session.tasks.iter().all(TaskReport::is_success)
        && session.operations.iter().all(OperationReport::is_ok);

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        for report in &session.operations {
            println!("{report}");
        }
        if let Some(text) = &session.plaintext {
            println!("decrypted: {text}");
        }
        for task in session.tasks.iter().filter(|task| !task.is_success()) {
            println!("{}", task.summary());
        }
    }

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Runs on the ui context: encrypt, then decrypt from the encrypt callback.
fn round_trip(ops: OperationRunner, recipient: KeyId, plain: Buffer, session: SharedSession) {
    let next = ops.clone();
    let on_encrypt = Arc::clone(&session);
    let encrypt = ops.encrypt(vec![recipient], plain, move |status, data| {
        let report = OperationReport::analyse(Operation::Encrypt, status, data);
        let proceed = report.is_ok();
        on_encrypt
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .operations
            .push(report);
        if !proceed {
            stop_ui(ContextHandle::current().as_ref());
            return;
        }

        let cipher = data.get::<Buffer>(1);
        let on_decrypt = Arc::clone(&on_encrypt);
        let decrypt = next.decrypt(cipher, move |status, data| {
            let report = OperationReport::analyse(Operation::Decrypt, status, data);
            let mut session = on_decrypt.lock().unwrap_or_else(PoisonError::into_inner);
            if report.is_ok() {
                session.plaintext = Some(data.get::<Buffer>(1).to_string_lossy());
            }
            session.operations.push(report);
        });
        track(&decrypt, &on_encrypt, true);
    });
    track(&encrypt, &session, false);
}

/// Record the task report; stop the ui context after the last step or a failure.
fn track(handle: &TaskHandle, session: &SharedSession, last: bool) {
    let session = Arc::clone(session);
    let ui = ContextHandle::current();
    handle.completion().subscribe(move |report| {
        session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .push(report.clone());
        if last || !report.is_success() {
            stop_ui(ui.as_ref());
        }
    });
}

fn stop_ui(ui: Option<&ContextHandle>) {
    if let Some(ui) = ui
        && let Err(err) = ui.quit()
    {
        warn!(error = %err, "ui context already stopped");
    }
}
