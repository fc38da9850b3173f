use serde::Serialize;
use serde_json::Value;

use crate::engine::{
    adapter::{LanguageSpec, WireRequest},
    models::{ExecutionOutcome, ExecutionRequest, ProviderSuccess},
};

const FLAT_VERSION_LABEL: &str = "latest";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatRequest {
    pub language: String,
    pub code: String,
    pub input: String,
}

/// Adapter for providers that take raw code and answer with a single output
/// field and no compile stage.
#[derive(Debug, Clone, Default)]
pub struct FlatAdapter;

impl FlatAdapter {
    pub fn build_request(&self, request: &ExecutionRequest) -> WireRequest {
        WireRequest::Flat(FlatRequest {
            language: LanguageSpec::for_language(request.language)
                .flat_language
                .to_string(),
            code: request.source_code.clone(),
            input: request.stdin.clone(),
        })
    }

    pub fn parse_response(&self, request: &ExecutionRequest, raw: &str) -> ExecutionOutcome {
        let malformed = || ExecutionOutcome::MalformedResponse {
            raw_payload: raw.to_string(),
        };

        let Ok(Value::Object(body)) = serde_json::from_str::<Value>(raw) else {
            return malformed();
        };
        let stdout = match body.get("output") {
            Some(Value::String(output)) => output.clone(),
            Some(Value::Null) => String::new(),
            _ => return malformed(),
        };
        let stderr = match body.get("error") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(error)) => error.clone(),
            Some(_) => return malformed(),
        };
        let exit_code = if stderr.is_empty() { 0 } else { 1 };

        ExecutionOutcome::Success(ProviderSuccess {
            stdout,
            stderr,
            exit_code,
            // timeStamp is a completion time, not a duration.
            runtime_ms: None,
            compile_stdout: None,
            compile_stderr: None,
            compile_ms: None,
            language_label: LanguageSpec::for_language(request.language)
                .structured_language
                .to_string(),
            version_label: FLAT_VERSION_LABEL.to_string(),
        })
    }
}
