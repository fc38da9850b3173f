use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::{adapter::WireRequest, models::TransportFailure};

/// One bounded request/response exchange with a remote provider.
///
/// Implementations must abandon the in-flight exchange once `budget` elapses
/// or `cancel` fires, rather than waiting for a late reply.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(
        &self,
        endpoint: &str,
        request: &WireRequest,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, TransportFailure>;
}

#[derive(Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .user_agent(concat!("codecascade/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build provider http client")?;

        Ok(Self { client })
    }
}

#[async_trait]
impl RemoteInvoker for HttpInvoker {
    async fn invoke(
        &self,
        endpoint: &str,
        request: &WireRequest,
        budget: Duration,
        cancel: &CancellationToken,
    ) -> Result<String, TransportFailure> {
        let exchange = async {
            let response = self
                .client
                .post(endpoint)
                .json(request)
                .send()
                .await
                .map_err(|err| classify(&err, budget))?;

            let status = response.status();
            if !status.is_success() {
                return Err(TransportFailure::Status {
                    code: status.as_u16(),
                });
            }

            response.text().await.map_err(|err| TransportFailure::Body {
                message: err.to_string(),
            })
        };

        // Dropping `exchange` on either branch aborts the underlying request.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportFailure::Cancelled),
            result = tokio::time::timeout(budget, exchange) => match result {
                Ok(result) => result,
                Err(_) => Err(timeout(budget)),
            },
        }
    }
}

fn classify(err: &reqwest::Error, budget: Duration) -> TransportFailure {
    if err.is_timeout() {
        timeout(budget)
    } else if err.is_connect() {
        TransportFailure::Connect {
            message: err.to_string(),
        }
    } else {
        TransportFailure::Request {
            message: err.to_string(),
        }
    }
}

fn timeout(budget: Duration) -> TransportFailure {
    TransportFailure::Timeout {
        budget_ms: budget.as_millis() as u64,
    }
}
