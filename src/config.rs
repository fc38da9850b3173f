use anyhow::{Context, Result, anyhow};
use std::{env, net::SocketAddr};

use crate::engine::adapter::{StructuredLimits, WireFormat};

const DEFAULT_PROVIDERS: &str = "emkc=structured:https://emkc.org/api/v2/piston/execute,\
juggler=structured:https://piston.juggler.dev/api/v2/execute,\
dalee=structured:https://piston-api.далее.рф/api/v2/execute,\
codex=flat:https://api.codex.jaagrav.in/execute";

const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 15_000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub app_env: String,
    pub log_level: String,
    pub log_format: LogFormat,
    pub providers: Vec<ProviderConfig>,
    pub structured_limits: StructuredLimits,
    pub sandbox: SandboxConfig,
    pub max_code_bytes: usize,
    pub max_stdin_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub name: String,
    pub format: WireFormat,
    pub endpoint: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub memory_limit_mb: u64,
    pub max_output_bytes: usize,
    pub queue_capacity: usize,
}

impl SandboxConfig {
    pub fn memory_limit_bytes(&self) -> usize {
        usize::try_from(self.memory_limit_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
            memory_limit_mb: 64,
            max_output_bytes: 64 * 1024,
            queue_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "compact" | "text" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!("unsupported log format: {s}")),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let log_format = env::var("LOG_FORMAT")
            .unwrap_or_else(|_| "compact".to_string())
            .parse::<LogFormat>()
            .map_err(|e| anyhow!(e))?;

        let providers = parse_providers(
            &env::var("PROVIDERS").unwrap_or_else(|_| DEFAULT_PROVIDERS.to_string()),
        )?;

        let defaults = StructuredLimits::default();
        let structured_limits = StructuredLimits {
            compile_timeout_ms: parse_env(
                "STRUCTURED_COMPILE_TIMEOUT_MS",
                defaults.compile_timeout_ms,
            ),
            run_timeout_ms: parse_env("STRUCTURED_RUN_TIMEOUT_MS", defaults.run_timeout_ms),
            compile_memory_limit: parse_env(
                "STRUCTURED_COMPILE_MEMORY_LIMIT",
                defaults.compile_memory_limit,
            ),
            run_memory_limit: parse_env("STRUCTURED_RUN_MEMORY_LIMIT", defaults.run_memory_limit),
        };

        let sandbox_defaults = SandboxConfig::default();
        let sandbox = SandboxConfig {
            enabled: parse_env("FAST_PATH_ENABLED", sandbox_defaults.enabled),
            timeout_ms: parse_env("SANDBOX_TIMEOUT_MS", sandbox_defaults.timeout_ms).max(10),
            memory_limit_mb: parse_env("SANDBOX_MEMORY_MB", sandbox_defaults.memory_limit_mb)
                .max(8),
            max_output_bytes: parse_env(
                "SANDBOX_MAX_OUTPUT_BYTES",
                sandbox_defaults.max_output_bytes,
            ),
            queue_capacity: parse_env("SANDBOX_QUEUE_CAPACITY", sandbox_defaults.queue_capacity),
        };

        Ok(Self {
            bind_addr,
            app_env: env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "info,hyper=warn,reqwest=warn".to_string()),
            log_format,
            providers,
            structured_limits,
            sandbox,
            max_code_bytes: parse_env("MAX_CODE_BYTES", 250_000usize),
            max_stdin_bytes: parse_env("MAX_STDIN_BYTES", 256_000usize),
        })
    }
}

/// Parses `name=format:url@timeout_ms` entries separated by commas. The
/// timeout suffix is optional.
fn parse_providers(raw: &str) -> Result<Vec<ProviderConfig>> {
    let mut out = Vec::new();
    for chunk in raw.split(',').filter(|c| !c.trim().is_empty()) {
        let (name, rhs) = chunk
            .split_once('=')
            .map(|(name, rhs)| (name.trim(), rhs.trim()))
            .filter(|(name, _)| !name.is_empty())
            .ok_or_else(|| anyhow!("invalid provider entry: {chunk}"))?;

        let (format, target) = rhs
            .split_once(':')
            .ok_or_else(|| anyhow!("provider {name} is missing a wire format"))?;
        let format = format
            .parse::<WireFormat>()
            .map_err(|e| anyhow!("provider {name}: {e}"))?;

        let (endpoint, timeout_ms) = match split_timeout(target) {
            Some((endpoint, timeout)) => (
                endpoint,
                timeout
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid timeout for provider {name}"))?,
            ),
            None => (target, DEFAULT_PROVIDER_TIMEOUT_MS),
        };
        let endpoint = endpoint.trim();
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(anyhow!("invalid endpoint URL for provider {name}"));
        }

        if out.iter().any(|p: &ProviderConfig| p.name == name) {
            return Err(anyhow!("duplicate provider name: {name}"));
        }

        out.push(ProviderConfig {
            name: name.to_string(),
            format,
            endpoint: endpoint.to_string(),
            timeout_ms: timeout_ms.max(100),
        });
    }

    if out.is_empty() {
        return Err(anyhow!("no execution providers configured"));
    }
    Ok(out)
}

/// Splits a trailing `@timeout` off an endpoint. Only an `@` after the last
/// `/` counts, so userinfo in the authority is left alone.
fn split_timeout(target: &str) -> Option<(&str, &str)> {
    let tail_start = target.rfind('/').map_or(0, |slash| slash + 1);
    let at = tail_start + target[tail_start..].rfind('@')?;
    Some((&target[..at], &target[at + 1..]))
}

fn parse_env<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<T>().ok())
        .unwrap_or(default)
}
