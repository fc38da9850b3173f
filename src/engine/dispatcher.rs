use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::{
    invoker::RemoteInvoker,
    metrics::MetricsRegistry,
    models::{AttemptRecord, ExecutionOutcome, ExecutionReport, ExecutionRequest, FailureCause},
    normalizer::{normalize_sandbox, normalize_success, sandbox_unavailable},
    registry::ProviderRegistry,
    sandbox::{LocalSandbox, SandboxError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("run superseded before it produced a report")]
pub struct Superseded;

/// Runs one request either on the local sandbox or down the ordered
/// provider cascade, and turns whatever happened into a single report.
pub struct CascadeDispatcher {
    registry: Arc<ProviderRegistry>,
    invoker: Arc<dyn RemoteInvoker>,
    sandbox: Option<LocalSandbox>,
    metrics: Arc<MetricsRegistry>,
}

impl CascadeDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        invoker: Arc<dyn RemoteInvoker>,
        sandbox: Option<LocalSandbox>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            invoker,
            sandbox,
            metrics,
        }
    }

    pub fn fast_path_enabled(&self) -> bool {
        self.sandbox.is_some()
    }

    pub async fn dispatch(&self, request: &ExecutionRequest) -> ExecutionReport {
        let cancel = CancellationToken::new();
        match self.dispatch_cancellable(request, &cancel).await {
            Ok(report) => report,
            // Unreachable in practice: nobody else holds this token.
            Err(Superseded) => ExecutionReport::exhausted(Vec::new()),
        }
    }

    /// Like [`dispatch`](Self::dispatch), but gives up as soon as `cancel`
    /// fires, aborting whatever attempt is in flight.
    pub async fn dispatch_cancellable(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, Superseded> {
        let run_id = Uuid::new_v4();
        let _in_flight = self.metrics.dispatch_started();
        self.dispatch_inner(run_id, request, cancel).await
    }

    async fn dispatch_inner(
        &self,
        run_id: Uuid,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionReport, Superseded> {
        if request.language.is_fast_path() {
            if let Some(sandbox) = &self.sandbox {
                self.metrics.fast_path();
                tracing::info!(%run_id, language = request.language.id(), "running on local sandbox");
                return match sandbox.run(&request.source_code, &request.stdin, cancel).await {
                    Ok(run) => Ok(normalize_sandbox(run)),
                    Err(SandboxError::Cancelled) => Err(Superseded),
                    Err(err @ SandboxError::Unavailable) => {
                        tracing::error!(%run_id, error = %err, "local sandbox unavailable");
                        Ok(sandbox_unavailable(&err))
                    }
                };
            }
        }

        let mut attempts = Vec::with_capacity(self.registry.len());

        for provider in self.registry.iter() {
            if cancel.is_cancelled() {
                return Err(Superseded);
            }

            tracing::info!(
                %run_id,
                provider = %provider.name,
                language = request.language.id(),
                "attempting provider"
            );
            self.metrics.provider_attempt();

            let wire = provider.adapter.build_request(request);
            let outcome = match self
                .invoker
                .invoke(&provider.endpoint, &wire, provider.timeout_budget, cancel)
                .await
            {
                Ok(body) => provider.adapter.parse_response(request, &body),
                Err(cause) => ExecutionOutcome::TransportFailure { cause },
            };

            if cancel.is_cancelled() {
                return Err(Superseded);
            }

            let cause = match outcome {
                ExecutionOutcome::Success(success) => {
                    tracing::info!(
                        %run_id,
                        provider = %provider.name,
                        exit_code = success.exit_code,
                        "provider produced a result"
                    );
                    return Ok(normalize_success(&provider.name, success, attempts));
                }
                ExecutionOutcome::TransportFailure { cause } => {
                    FailureCause::Transport { failure: cause }
                }
                ExecutionOutcome::MalformedResponse { raw_payload } => {
                    FailureCause::Malformed { raw_payload }
                }
            };

            self.metrics.provider_failure();
            tracing::warn!(
                %run_id,
                provider = %provider.name,
                error = %cause,
                "provider attempt failed; trying next provider"
            );
            attempts.push(AttemptRecord {
                provider: provider.name.clone(),
                cause,
            });
        }

        self.metrics.exhausted();
        tracing::error!(%run_id, attempts = attempts.len(), "all execution providers failed");
        Ok(ExecutionReport::exhausted(attempts))
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::{
        config::SandboxConfig,
        engine::{
            adapter::{SchemaAdapter, StructuredLimits, WireFormat, WireRequest},
            models::{Language, TransportFailure},
            registry::ProviderDescriptor,
            sandbox::{SANDBOX_EXECUTOR, SANDBOX_VERSION_LABEL},
        },
    };

    #[derive(Clone)]
    enum Reply {
        Body(&'static str),
        Fail(TransportFailure),
        Hang,
    }

    /// Deterministic stand-in for the remote providers, keyed by endpoint.
    #[derive(Default)]
    struct ScriptedInvoker {
        replies: HashMap<String, Reply>,
        calls: Mutex<Vec<(String, WireRequest)>>,
    }

    impl ScriptedInvoker {
        fn with(mut self, endpoint: &str, reply: Reply) -> Self {
            self.replies.insert(endpoint.to_string(), reply);
            self
        }

        fn called(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(endpoint, _)| endpoint.clone())
                .collect()
        }
    }

    #[async_trait]
    impl RemoteInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            endpoint: &str,
            request: &WireRequest,
            _budget: Duration,
            cancel: &CancellationToken,
        ) -> Result<String, TransportFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), request.clone()));
            match self.replies.get(endpoint).cloned() {
                Some(Reply::Body(body)) => Ok(body.to_string()),
                Some(Reply::Fail(failure)) => Err(failure),
                Some(Reply::Hang) => {
                    cancel.cancelled().await;
                    Err(TransportFailure::Cancelled)
                }
                None => Err(TransportFailure::Connect {
                    message: "connection refused".to_string(),
                }),
            }
        }
    }

    fn provider(name: &str, format: WireFormat) -> ProviderDescriptor {
        ProviderDescriptor {
            name: name.to_string(),
            endpoint: name.to_string(),
            adapter: SchemaAdapter::for_format(format, &StructuredLimits::default()),
            timeout_budget: Duration::from_secs(15),
        }
    }

    fn two_providers() -> ProviderRegistry {
        ProviderRegistry::new(vec![
            provider("p1", WireFormat::Structured),
            provider("p2", WireFormat::Flat),
        ])
    }

    fn dispatcher(
        registry: ProviderRegistry,
        invoker: Arc<ScriptedInvoker>,
        sandbox: Option<LocalSandbox>,
    ) -> CascadeDispatcher {
        CascadeDispatcher::new(
            Arc::new(registry),
            invoker,
            sandbox,
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn go_request() -> ExecutionRequest {
        ExecutionRequest::new(
            Language::Go,
            "package main\n\nimport \"fmt\"\n\nfunc main() { fmt.Println(\"hi\") }",
            "",
        )
    }

    const GO_SUCCESS: &str = r#"{"run":{"stdout":"hi\n","stderr":"","time":12,"code":0},"language":"go","version":"1.16.2"}"#;

    #[tokio::test]
    async fn first_provider_success_short_circuits() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Body(GO_SUCCESS))
                .with("p2", Reply::Body(r#"{"output":"other\n"}"#)),
        );
        let dispatcher = dispatcher(two_providers(), invoker.clone(), None);

        let report = dispatcher.dispatch(&go_request()).await;

        let ran = report.as_ran().expect("expected a run report");
        assert_eq!(ran.stdout, "hi\n");
        assert_eq!(ran.exit_code, 0);
        assert_eq!(ran.stats.language, "go");
        assert!(ran.attempts.is_empty());
        assert_eq!(ran.stats.version, "1.16.2");
        assert_eq!(ran.stats.runtime_ms, Some(12.0));
        assert_eq!(ran.executed_by, "p1");
        assert_eq!(invoker.called(), ["p1"]);
    }

    #[tokio::test]
    async fn timeout_falls_through_to_next_provider() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Fail(TransportFailure::Timeout { budget_ms: 15_000 }))
                .with("p2", Reply::Body(r#"{"output":"hi\n"}"#)),
        );
        let dispatcher = dispatcher(two_providers(), invoker.clone(), None);

        let report = dispatcher.dispatch(&go_request()).await;

        let ran = report.as_ran().expect("expected a run report");
        assert_eq!(ran.stdout, "hi\n");
        assert_eq!(ran.executed_by, "p2");
        assert_eq!(ran.stats.version, "latest");
        assert_eq!(
            ran.attempts,
            [AttemptRecord {
                provider: "p1".to_string(),
                cause: FailureCause::Transport {
                    failure: TransportFailure::Timeout { budget_ms: 15_000 }
                },
            }]
        );
        assert_eq!(invoker.called(), ["p1", "p2"]);

        let calls = invoker.calls.lock().unwrap();
        assert!(matches!(calls[1].1, WireRequest::Flat(ref flat) if flat.language == "go"));
    }

    #[tokio::test]
    async fn malformed_response_advances_in_registry_order() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Body(r#"{"message":"runtime unknown"}"#))
                .with("p2", Reply::Body(GO_SUCCESS))
                .with("p3", Reply::Body(GO_SUCCESS)),
        );
        let registry = ProviderRegistry::new(vec![
            provider("p1", WireFormat::Structured),
            provider("p2", WireFormat::Structured),
            provider("p3", WireFormat::Structured),
        ]);
        let dispatcher = dispatcher(registry, invoker.clone(), None);

        let report = dispatcher.dispatch(&go_request()).await;

        assert_eq!(report.as_ran().map(|r| r.executed_by.as_str()), Some("p2"));
        assert_eq!(invoker.called(), ["p1", "p2"]);
    }

    #[tokio::test]
    async fn exhausted_cascade_reports_last_cause_and_full_log() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Fail(TransportFailure::Status { code: 502 }))
                .with("p2", Reply::Body("<html>maintenance</html>"))
                .with("p3", Reply::Fail(TransportFailure::Timeout { budget_ms: 15_000 })),
        );
        let registry = ProviderRegistry::new(vec![
            provider("p1", WireFormat::Structured),
            provider("p2", WireFormat::Flat),
            provider("p3", WireFormat::Structured),
        ]);
        let dispatcher = dispatcher(registry, invoker.clone(), None);

        let report = dispatcher.dispatch(&go_request()).await;

        let ExecutionReport::AllProvidersFailed(failure) = report else {
            panic!("expected exhausted cascade");
        };
        assert_eq!(failure.attempts.len(), 3);
        let providers = failure
            .attempts
            .iter()
            .map(|a| a.provider.as_str())
            .collect::<Vec<_>>();
        assert_eq!(providers, ["p1", "p2", "p3"]);
        assert_eq!(
            failure.attempts[1].cause,
            FailureCause::Malformed {
                raw_payload: "<html>maintenance</html>".to_string()
            }
        );
        assert_eq!(
            failure.last_error,
            Some(FailureCause::Transport {
                failure: TransportFailure::Timeout { budget_ms: 15_000 }
            })
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_successful_dispatch() {
        let invoker = Arc::new(ScriptedInvoker::default().with(
            "p1",
            Reply::Body(r#"{"language":"go","version":"1.16.2","run":{"stdout":"","stderr":"exit status 2","time":3,"code":2}}"#),
        ));
        let dispatcher = dispatcher(two_providers(), invoker.clone(), None);

        let report = dispatcher.dispatch(&go_request()).await;

        let ran = report.as_ran().expect("expected a run report");
        assert_eq!(ran.stats.exit_code, 2);
        assert_eq!(ran.stderr, "exit status 2");
        assert_eq!(invoker.called(), ["p1"]);
    }

    #[tokio::test]
    async fn repeated_dispatch_is_structurally_equal() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Fail(TransportFailure::Status { code: 500 }))
                .with("p2", Reply::Body(r#"{"output":"hi\n","error":"warn"}"#)),
        );
        let dispatcher = dispatcher(two_providers(), invoker, None);

        let first = dispatcher.dispatch(&go_request()).await;
        let second = dispatcher.dispatch(&go_request()).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn fast_path_never_contacts_registry() {
        let invoker = Arc::new(ScriptedInvoker::default().with("p1", Reply::Body(GO_SUCCESS)));
        let sandbox = LocalSandbox::spawn(SandboxConfig::default()).unwrap();
        let dispatcher = dispatcher(two_providers(), invoker.clone(), Some(sandbox));

        let ok = dispatcher
            .dispatch(&ExecutionRequest::new(
                Language::JavaScript,
                "const n = prompt('n?'); console.log(n * 2);",
                "5\n",
            ))
            .await;
        let failed = dispatcher
            .dispatch(&ExecutionRequest::new(
                Language::JavaScript,
                "null.property;",
                "",
            ))
            .await;

        let ok = ok.as_ran().expect("expected a run report");
        assert!(ok.stdout.contains("[INPUT] n? 5\n"));
        assert!(ok.stdout.ends_with("10\n"));
        assert_eq!(ok.executed_by, SANDBOX_EXECUTOR);
        assert_eq!(ok.stats.language, "javascript");
        assert_eq!(ok.stats.version, SANDBOX_VERSION_LABEL);
        assert_eq!(ok.stats.compile_ms, None);

        let failed = failed.as_ran().expect("program errors are still runs");
        assert_eq!(failed.exit_code, 1);
        assert!(failed.stderr.starts_with("TypeError"), "{}", failed.stderr);

        assert!(invoker.called().is_empty());
    }

    #[tokio::test]
    async fn javascript_goes_remote_when_fast_path_is_off() {
        let invoker = Arc::new(ScriptedInvoker::default().with(
            "p1",
            Reply::Body(r#"{"language":"javascript","version":"18.15.0","run":{"stdout":"1\n","stderr":"","code":0}}"#),
        ));
        let dispatcher = dispatcher(two_providers(), invoker.clone(), None);

        let report = dispatcher
            .dispatch(&ExecutionRequest::new(Language::JavaScript, "console.log(1)", ""))
            .await;

        assert_eq!(report.as_ran().map(|r| r.stdout.as_str()), Some("1\n"));
        let calls = invoker.calls.lock().unwrap();
        assert!(matches!(
            calls[0].1,
            WireRequest::Structured(ref structured)
                if structured.language == "nodejs" && structured.files[0].name == "script.js"
        ));
    }

    #[tokio::test]
    async fn cancellation_abandons_in_flight_attempt() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .with("p1", Reply::Hang)
                .with("p2", Reply::Body(r#"{"output":"late\n"}"#)),
        );
        let dispatcher = dispatcher(two_providers(), invoker.clone(), None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = dispatcher.dispatch_cancellable(&go_request(), &cancel).await;

        assert_eq!(result, Err(Superseded));
        assert_eq!(invoker.called(), ["p1"]);
    }

    #[tokio::test]
    async fn empty_registry_fails_without_cause() {
        let invoker = Arc::new(ScriptedInvoker::default());
        let dispatcher = dispatcher(ProviderRegistry::default(), invoker, None);

        let report = dispatcher.dispatch(&go_request()).await;

        assert_eq!(report, ExecutionReport::exhausted(Vec::new()));
    }

    #[tokio::test]
    async fn abandoned_dispatch_leaves_no_in_flight_count() {
        let invoker = Arc::new(ScriptedInvoker::default().with("p1", Reply::Hang));
        let metrics = Arc::new(MetricsRegistry::new());
        let dispatcher = CascadeDispatcher::new(
            Arc::new(two_providers()),
            invoker,
            None,
            metrics.clone(),
        );
        let request = go_request();
        let cancel = CancellationToken::new();

        let pending = dispatcher.dispatch_cancellable(&request, &cancel);
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pending).await;

        assert!(timed_out.is_err());
        let rendered = metrics.render_prometheus();
        assert!(rendered.contains("dispatch_total 1"), "{rendered}");
        assert!(rendered.contains("dispatch_in_flight 0"), "{rendered}");
    }
}
