mod capture;
mod quickjs;

use anyhow::{Context, anyhow};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::SandboxConfig;

use quickjs::JsEngine;

pub const SANDBOX_EXECUTOR: &str = "local-sandbox";
pub const SANDBOX_VERSION_LABEL: &str = "QuickJS (embedded)";

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxRun {
    pub output: String,
    pub error: Option<String>,
    pub runtime_ms: f64,
}

impl SandboxRun {
    pub fn exit_code(&self) -> i32 {
        if self.error.is_some() { 1 } else { 0 }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("local sandbox is not running")]
    Unavailable,
    #[error("sandbox run cancelled")]
    Cancelled,
}

struct SandboxJob {
    source: String,
    stdin: String,
    cancel: CancellationToken,
    reply: oneshot::Sender<SandboxRun>,
}

/// Handle to the in-process JavaScript sandbox.
///
/// All runs go through one worker thread, so only one run can have
/// console/prompt interception installed at any time.
#[derive(Clone)]
pub struct LocalSandbox {
    sender: mpsc::Sender<SandboxJob>,
}

impl LocalSandbox {
    pub fn spawn(config: SandboxConfig) -> anyhow::Result<Self> {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);

        std::thread::Builder::new()
            .name("local-sandbox".to_string())
            .spawn(move || {
                let engine = match JsEngine::new(&config) {
                    Ok(engine) => engine,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err.to_string()));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                worker_loop(engine, receiver);
            })
            .context("failed to spawn sandbox thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { sender }),
            Ok(Err(message)) => Err(anyhow!("failed to start JavaScript runtime: {message}")),
            Err(_) => Err(anyhow!("sandbox thread exited during startup")),
        }
    }

    pub async fn run(
        &self,
        source: &str,
        stdin: &str,
        cancel: &CancellationToken,
    ) -> Result<SandboxRun, SandboxError> {
        let (reply, response) = oneshot::channel();
        let job = SandboxJob {
            source: source.to_string(),
            stdin: stdin.to_string(),
            cancel: cancel.clone(),
            reply,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            sent = self.sender.send(job) => sent.map_err(|_| SandboxError::Unavailable)?,
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SandboxError::Cancelled),
            run = response => run.map_err(|_| SandboxError::Unavailable),
        }
    }
}

fn worker_loop(engine: JsEngine, mut receiver: mpsc::Receiver<SandboxJob>) {
    while let Some(job) = receiver.blocking_recv() {
        if job.cancel.is_cancelled() || job.reply.is_closed() {
            tracing::debug!("skipping abandoned sandbox run");
            continue;
        }
        let run = engine.execute(&job.source, &job.stdin, &job.cancel);
        let _ = job.reply.send(run);
    }
    tracing::info!("sandbox queue closed, worker exiting");
}
