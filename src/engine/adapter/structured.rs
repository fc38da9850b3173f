use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{
    adapter::{LanguageSpec, WireRequest},
    models::{ExecutionOutcome, ExecutionRequest, ProviderSuccess},
};

/// Resource limits sent with every structured request. Memory limits of `-1`
/// leave the provider's defaults in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredLimits {
    pub compile_timeout_ms: u64,
    pub run_timeout_ms: u64,
    pub compile_memory_limit: i64,
    pub run_memory_limit: i64,
}

impl Default for StructuredLimits {
    fn default() -> Self {
        Self {
            compile_timeout_ms: 10_000,
            run_timeout_ms: 5_000,
            compile_memory_limit: -1,
            run_memory_limit: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRequest {
    pub language: String,
    pub version: String,
    pub files: Vec<SourceFile>,
    pub stdin: String,
    pub args: Vec<String>,
    pub compile_timeout: u64,
    pub run_timeout: u64,
    pub compile_memory_limit: i64,
    pub run_memory_limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFile {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct StructuredResponse {
    language: Option<String>,
    version: Option<String>,
    compile: Option<Stage>,
    run: Stage,
}

#[derive(Debug, Deserialize)]
struct Stage {
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    time: Option<f64>,
    #[serde(default)]
    code: Option<i32>,
}

/// Adapter for providers that split compile and run stages and take named
/// source files.
#[derive(Debug, Clone, Default)]
pub struct StructuredAdapter {
    limits: StructuredLimits,
}

impl StructuredAdapter {
    pub fn new(limits: StructuredLimits) -> Self {
        Self { limits }
    }

    pub fn build_request(&self, request: &ExecutionRequest) -> WireRequest {
        let lang = LanguageSpec::for_language(request.language);
        WireRequest::Structured(StructuredRequest {
            language: lang.structured_language.to_string(),
            version: lang.structured_version.to_string(),
            files: vec![SourceFile {
                name: lang.source_name.to_string(),
                content: request.source_code.clone(),
            }],
            stdin: request.stdin.clone(),
            args: Vec::new(),
            compile_timeout: self.limits.compile_timeout_ms,
            run_timeout: self.limits.run_timeout_ms,
            compile_memory_limit: self.limits.compile_memory_limit,
            run_memory_limit: self.limits.run_memory_limit,
        })
    }

    pub fn parse_response(&self, request: &ExecutionRequest, raw: &str) -> ExecutionOutcome {
        let malformed = || ExecutionOutcome::MalformedResponse {
            raw_payload: raw.to_string(),
        };

        let Ok(value) = serde_json::from_str::<Value>(raw) else {
            return malformed();
        };
        if !value.get("run").is_some_and(Value::is_object) {
            return malformed();
        }
        let Ok(parsed) = serde_json::from_value::<StructuredResponse>(value) else {
            return malformed();
        };

        let lang = LanguageSpec::for_language(request.language);
        let (compile_stdout, compile_stderr, compile_ms) = match parsed.compile {
            Some(stage) => (
                Some(stage.stdout.unwrap_or_default()),
                Some(stage.stderr.unwrap_or_default()),
                stage.time,
            ),
            None => (None, None, None),
        };

        ExecutionOutcome::Success(ProviderSuccess {
            stdout: parsed.run.stdout.unwrap_or_default(),
            stderr: parsed.run.stderr.unwrap_or_default(),
            // A null code means the process was killed by a signal.
            exit_code: parsed.run.code.unwrap_or(-1),
            runtime_ms: parsed.run.time,
            compile_stdout,
            compile_stderr,
            compile_ms,
            language_label: parsed
                .language
                .unwrap_or_else(|| lang.structured_language.to_string()),
            version_label: parsed
                .version
                .unwrap_or_else(|| lang.structured_version.to_string()),
        })
    }
}
