pub mod adapter;
pub mod api;
pub mod dispatcher;
pub mod error;
pub mod invoker;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod registry;
pub mod sandbox;
pub mod session;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;

use crate::{
    config::AppConfig,
    engine::{
        api::routes, dispatcher::CascadeDispatcher, invoker::HttpInvoker,
        metrics::MetricsRegistry, registry::ProviderRegistry, sandbox::LocalSandbox,
        session::RunSupervisor,
    },
};

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let registry = Arc::new(ProviderRegistry::from_config(
        &config.providers,
        &config.structured_limits,
    ));
    let invoker = Arc::new(HttpInvoker::new().context("http client init failed")?);
    let sandbox = start_sandbox(&config);

    tracing::info!(
        providers = registry.len(),
        fast_path = sandbox.is_some(),
        "execution cascade configured"
    );

    let dispatcher = Arc::new(CascadeDispatcher::new(
        registry,
        invoker,
        sandbox,
        metrics.clone(),
    ));
    let supervisor = Arc::new(RunSupervisor::new(dispatcher, metrics.clone()));

    let app: Router = routes(&config, supervisor, metrics);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .context("failed to bind listener")?;
    let local = listener
        .local_addr()
        .unwrap_or(SocketAddr::from(([0, 0, 0, 0], 0)));
    tracing::info!(bind = %local, mode = %config.app_env, "code execution engine ready");
    axum::serve(listener, app)
        .await
        .context("engine server error")?;
    Ok(())
}

/// A sandbox that fails to boot only costs the fast path; JavaScript then
/// goes through the provider cascade like every other language.
fn start_sandbox(config: &AppConfig) -> Option<LocalSandbox> {
    if !config.sandbox.enabled {
        tracing::info!("local sandbox disabled by configuration");
        return None;
    }
    match LocalSandbox::spawn(config.sandbox.clone()) {
        Ok(sandbox) => Some(sandbox),
        Err(err) => {
            tracing::warn!(error = %err, "local sandbox failed to start; fast path disabled");
            None
        }
    }
}
