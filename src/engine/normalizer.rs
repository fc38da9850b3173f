use crate::engine::{
    models::{AttemptRecord, ExecutionReport, ExecutionStats, Language, ProviderSuccess, RunReport},
    sandbox::{SANDBOX_EXECUTOR, SANDBOX_VERSION_LABEL, SandboxError, SandboxRun},
};

const COMPILE_ERROR_PREFIX: &str = "Compile Error:\n";

/// Builds the canonical report from a provider success. A nonzero exit code
/// stays a `Ran` report; the program failed, the dispatch did not.
/// `attempts` holds the failures of the providers tried before this one.
pub fn normalize_success(
    provider: &str,
    success: ProviderSuccess,
    attempts: Vec<AttemptRecord>,
) -> ExecutionReport {
    let compile_error = success
        .compile_stderr
        .as_deref()
        .filter(|stderr| !stderr.is_empty())
        .map(|stderr| format!("{COMPILE_ERROR_PREFIX}{stderr}"));

    let stderr = match (compile_error, success.stderr.is_empty()) {
        (Some(compile), true) => compile,
        (Some(compile), false) => format!("{compile}\n\n{}", success.stderr),
        (None, _) => success.stderr,
    };

    let compile_output = success.compile_stdout.filter(|stdout| !stdout.is_empty());

    ExecutionReport::Ran(RunReport {
        stdout: success.stdout,
        stderr,
        exit_code: success.exit_code,
        compile_output,
        executed_by: provider.to_string(),
        stats: ExecutionStats {
            language: success.language_label,
            version: success.version_label,
            runtime_ms: success.runtime_ms,
            compile_ms: success.compile_ms,
            exit_code: success.exit_code,
        },
        attempts,
    })
}

/// Builds the report for a local sandbox run. A thrown error is a program
/// failure with exit code 1.
pub fn normalize_sandbox(run: SandboxRun) -> ExecutionReport {
    let exit_code = run.exit_code();
    ExecutionReport::Ran(RunReport {
        stdout: run.output,
        stderr: run.error.unwrap_or_default(),
        exit_code,
        compile_output: None,
        executed_by: SANDBOX_EXECUTOR.to_string(),
        stats: ExecutionStats {
            language: Language::FAST_PATH.id().to_string(),
            version: SANDBOX_VERSION_LABEL.to_string(),
            runtime_ms: Some(run.runtime_ms),
            compile_ms: None,
            exit_code,
        },
        attempts: Vec::new(),
    })
}

/// The fast path is terminal even when the worker is gone, so an unavailable
/// sandbox still yields a failed run rather than a remote fallback.
pub fn sandbox_unavailable(err: &SandboxError) -> ExecutionReport {
    ExecutionReport::Ran(RunReport {
        stdout: String::new(),
        stderr: format!("{err}; the run was not started"),
        exit_code: 1,
        compile_output: None,
        executed_by: SANDBOX_EXECUTOR.to_string(),
        stats: ExecutionStats {
            language: Language::FAST_PATH.id().to_string(),
            version: SANDBOX_VERSION_LABEL.to_string(),
            runtime_ms: None,
            compile_ms: None,
            exit_code: 1,
        },
        attempts: Vec::new(),
    })
}
