use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[serde(rename = "javascript")]
    JavaScript,
    Python,
    Java,
    Cpp,
    C,
    Go,
    Ruby,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::JavaScript,
        Language::Python,
        Language::Java,
        Language::Cpp,
        Language::C,
        Language::Go,
        Language::Ruby,
    ];

    /// The language the embedded sandbox can run without leaving the process.
    pub const FAST_PATH: Language = Language::JavaScript;

    pub fn id(self) -> &'static str {
        match self {
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Go => "go",
            Self::Ruby => "ruby",
        }
    }

    pub fn is_fast_path(self) -> bool {
        self == Self::FAST_PATH
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: Language,
    #[serde(alias = "code")]
    pub source_code: String,
    #[serde(default)]
    pub stdin: String,
}

impl ExecutionRequest {
    pub fn new(
        language: Language,
        source_code: impl Into<String>,
        stdin: impl Into<String>,
    ) -> Self {
        Self {
            language,
            source_code: source_code.into(),
            stdin: stdin.into(),
        }
    }
}

/// Provider-agnostic result of a single attempt. Lives only for the scope of
/// that attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Success(ProviderSuccess),
    MalformedResponse { raw_payload: String },
    TransportFailure { cause: TransportFailure },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSuccess {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub runtime_ms: Option<f64>,
    pub compile_stdout: Option<String>,
    pub compile_stderr: Option<String>,
    pub compile_ms: Option<f64>,
    pub language_label: String,
    pub version_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportFailure {
    #[error("request timed out after {budget_ms} ms")]
    Timeout { budget_ms: u64 },
    #[error("connection failed: {message}")]
    Connect { message: String },
    #[error("provider responded with HTTP status {code}")]
    Status { code: u16 },
    #[error("failed to read response body: {message}")]
    Body { message: String },
    #[error("request failed: {message}")]
    Request { message: String },
    #[error("attempt cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureCause {
    #[error("{failure}")]
    Transport { failure: TransportFailure },
    #[error("the execution service returned an invalid response format: {}", preview(.raw_payload))]
    Malformed { raw_payload: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub provider: String,
    pub cause: FailureCause,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub language: String,
    pub version: String,
    pub runtime_ms: Option<f64>,
    pub compile_ms: Option<f64>,
    pub exit_code: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub compile_output: Option<String>,
    pub executed_by: String,
    pub stats: ExecutionStats,
    /// Providers that failed before `executed_by` answered, in order.
    #[serde(default)]
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub last_error: Option<FailureCause>,
    pub attempts: Vec<AttemptRecord>,
}

impl DispatchFailure {
    pub fn summary(&self) -> String {
        match &self.last_error {
            Some(cause) => format!("Error: {cause}"),
            None => "Error: no execution providers configured".to_string(),
        }
    }
}

/// The single canonical result handed back for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionReport {
    Ran(RunReport),
    AllProvidersFailed(DispatchFailure),
}

impl ExecutionReport {
    pub fn exhausted(attempts: Vec<AttemptRecord>) -> Self {
        let last_error = attempts.last().map(|attempt| attempt.cause.clone());
        Self::AllProvidersFailed(DispatchFailure {
            last_error,
            attempts,
        })
    }

    pub fn as_ran(&self) -> Option<&RunReport> {
        match self {
            Self::Ran(report) => Some(report),
            Self::AllProvidersFailed(_) => None,
        }
    }
}

fn preview(raw: &str) -> String {
    const MAX_PREVIEW_CHARS: usize = 200;
    if raw.chars().count() <= MAX_PREVIEW_CHARS {
        return raw.to_string();
    }
    let cut: String = raw.chars().take(MAX_PREVIEW_CHARS).collect();
    format!("{cut}...")
}
