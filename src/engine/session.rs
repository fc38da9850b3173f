use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::engine::{
    dispatcher::{CascadeDispatcher, Superseded},
    metrics::MetricsRegistry,
    models::{ExecutionReport, ExecutionRequest},
};

#[derive(Debug)]
struct ActiveRun {
    generation: u64,
    cancel: CancellationToken,
}

/// Keeps at most one live run per editor session. Starting a run cancels the
/// one before it, and only the newest run's report is ever handed back.
pub struct RunSupervisor {
    dispatcher: Arc<CascadeDispatcher>,
    sessions: DashMap<String, ActiveRun>,
    next_generation: AtomicU64,
    metrics: Arc<MetricsRegistry>,
}

impl RunSupervisor {
    pub fn new(dispatcher: Arc<CascadeDispatcher>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            dispatcher,
            sessions: DashMap::new(),
            next_generation: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn dispatcher(&self) -> &CascadeDispatcher {
        &self.dispatcher
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub async fn run(
        &self,
        session: Option<&str>,
        request: &ExecutionRequest,
    ) -> Result<ExecutionReport, Superseded> {
        let Some(session) = session else {
            return Ok(self.dispatcher.dispatch(request).await);
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        if let Some(previous) = self.sessions.insert(
            session.to_string(),
            ActiveRun {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            tracing::info!(
                session,
                generation,
                superseded = previous.generation,
                "cancelling previous run for session"
            );
            previous.cancel.cancel();
        }

        let slot = SlotGuard {
            sessions: &self.sessions,
            session,
            generation,
            cancel,
        };

        let result = self.dispatcher.dispatch_cancellable(request, &slot.cancel).await;
        let current = slot.is_current();
        drop(slot);

        match result {
            Ok(report) if current => Ok(report),
            _ => {
                self.metrics.superseded();
                tracing::info!(session, generation, "discarding superseded run");
                Err(Superseded)
            }
        }
    }
}

/// Releases the session slot however the run ends, including when the
/// caller's future is dropped mid-dispatch.
struct SlotGuard<'a> {
    sessions: &'a DashMap<String, ActiveRun>,
    session: &'a str,
    generation: u64,
    cancel: CancellationToken,
}

impl SlotGuard<'_> {
    fn is_current(&self) -> bool {
        self.sessions
            .get(self.session)
            .is_some_and(|active| active.generation == self.generation)
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.sessions
            .remove_if(self.session, |_, active| active.generation == self.generation);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::SandboxConfig,
        engine::{
            invoker::HttpInvoker, models::Language, registry::ProviderRegistry,
            sandbox::LocalSandbox,
        },
    };

    fn supervisor() -> Arc<RunSupervisor> {
        let metrics = Arc::new(MetricsRegistry::new());
        let sandbox = LocalSandbox::spawn(SandboxConfig {
            timeout_ms: 30_000,
            ..SandboxConfig::default()
        })
        .unwrap();
        let dispatcher = CascadeDispatcher::new(
            Arc::new(ProviderRegistry::default()),
            Arc::new(HttpInvoker::new().unwrap()),
            Some(sandbox),
            metrics.clone(),
        );
        Arc::new(RunSupervisor::new(Arc::new(dispatcher), metrics))
    }

    fn js(source: &str) -> ExecutionRequest {
        ExecutionRequest::new(Language::JavaScript, source, "")
    }

    #[tokio::test]
    async fn newer_run_supersedes_older_one() {
        let supervisor = supervisor();

        let first = tokio::spawn({
            let supervisor = supervisor.clone();
            async move { supervisor.run(Some("editor"), &js("while (true) {}")).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let second = supervisor
            .run(Some("editor"), &js("console.log('second');"))
            .await;
        let first = first.await.unwrap();

        assert_eq!(first, Err(Superseded));
        let second = second.unwrap();
        assert_eq!(second.as_ran().map(|r| r.stdout.as_str()), Some("second\n"));
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn separate_sessions_do_not_interfere() {
        let supervisor = supervisor();

        let (left_request, right_request) = (js("console.log('l');"), js("console.log('r');"));

        let (left, right) = tokio::join!(
            supervisor.run(Some("left"), &left_request),
            supervisor.run(Some("right"), &right_request),
        );

        assert_eq!(left.unwrap().as_ran().map(|r| r.stdout.as_str()), Some("l\n"));
        assert_eq!(right.unwrap().as_ran().map(|r| r.stdout.as_str()), Some("r\n"));
    }

    #[tokio::test]
    async fn sessionless_runs_are_never_superseded() {
        let supervisor = supervisor();

        let report = supervisor.run(None, &js("console.log(1 + 1);")).await.unwrap();

        assert_eq!(report.as_ran().map(|r| r.stdout.as_str()), Some("2\n"));
        assert_eq!(supervisor.active_sessions(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_releases_its_slot() {
        let supervisor = supervisor();

        let spin = js("while (true) {}");
        let pending = supervisor.run(Some("editor"), &spin);
        let timed_out = tokio::time::timeout(Duration::from_millis(100), pending).await;
        assert!(timed_out.is_err());
        assert_eq!(supervisor.active_sessions(), 0);

        let next = supervisor
            .run(Some("editor"), &js("console.log('free');"))
            .await
            .unwrap();
        assert_eq!(next.as_ran().map(|r| r.stdout.as_str()), Some("free\n"));
    }
}
