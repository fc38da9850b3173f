use std::time::{Duration, Instant};

use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value};
use tokio_util::sync::CancellationToken;

use crate::{
    config::SandboxConfig,
    engine::sandbox::{
        SandboxRun,
        capture::{self, Capture, Interception},
    },
};

/// Runs the source as the body of a fresh function, so its top-level
/// declarations stay local to the call.
const ISOLATED_RUNNER: &str = "(function (source) { return new Function(source)(); })";

const MAX_STACK_BYTES: usize = 1024 * 1024;

/// Embedded JavaScript engine settings. Every run gets its own runtime and
/// context, so nothing a program does to its globals or heap survives it.
pub(super) struct JsEngine {
    memory_limit: usize,
    timeout: Duration,
    max_output_bytes: usize,
}

impl JsEngine {
    pub(super) fn new(config: &SandboxConfig) -> rquickjs::Result<Self> {
        let engine = Self {
            memory_limit: config.memory_limit_bytes(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_output_bytes: config.max_output_bytes,
        };
        // Fail at startup rather than on the first run.
        engine.fresh_context()?;
        Ok(engine)
    }

    pub(super) fn execute(&self, source: &str, stdin: &str, cancel: &CancellationToken) -> SandboxRun {
        match self.fresh_context() {
            Ok((runtime, context)) => self.execute_in(&runtime, &context, source, stdin, cancel),
            Err(err) => SandboxRun {
                output: String::new(),
                error: Some(format!("failed to prepare sandbox: {err}")),
                runtime_ms: 0.0,
            },
        }
    }

    fn fresh_context(&self) -> rquickjs::Result<(Runtime, Context)> {
        let runtime = Runtime::new()?;
        runtime.set_memory_limit(self.memory_limit);
        runtime.set_max_stack_size(MAX_STACK_BYTES);
        let context = Context::full(&runtime)?;
        context.with(|ctx| capture::install_host_bindings(&ctx))?;
        Ok((runtime, context))
    }

    fn execute_in(
        &self,
        runtime: &Runtime,
        context: &Context,
        source: &str,
        stdin: &str,
        cancel: &CancellationToken,
    ) -> SandboxRun {
        let deadline = Instant::now() + self.timeout;
        let interrupt = cancel.clone();
        runtime.set_interrupt_handler(Some(Box::new(move || {
            interrupt.is_cancelled() || Instant::now() >= deadline
        })));

        let capture = Capture::new(stdin, self.max_output_bytes);
        let (error, elapsed) = context.with(|ctx| run_isolated(&ctx, source, &capture));

        runtime.set_interrupt_handler(None);

        let error = error.map(|message| {
            if cancel.is_cancelled() {
                "execution cancelled".to_string()
            } else if Instant::now() >= deadline {
                format!(
                    "InternalError: execution exceeded the {} ms time limit",
                    self.timeout.as_millis()
                )
            } else {
                message
            }
        });

        SandboxRun {
            output: capture.into_output(),
            error,
            runtime_ms: elapsed.as_secs_f64() * 1_000.0,
        }
    }
}

fn run_isolated(ctx: &Ctx<'_>, source: &str, capture: &Capture) -> (Option<String>, Duration) {
    let runner: Function = match ctx.eval(ISOLATED_RUNNER) {
        Ok(runner) => runner,
        Err(err) => return (Some(format!("failed to prepare sandbox: {err}")), Duration::ZERO),
    };
    let _interception = match Interception::install(ctx, capture) {
        Ok(guard) => guard,
        Err(err) => return (Some(format!("failed to prepare sandbox: {err}")), Duration::ZERO),
    };

    let started = Instant::now();
    let result = runner.call::<_, Value>((source,)).catch(ctx);
    let elapsed = started.elapsed();

    (result.err().map(describe_failure), elapsed)
}

fn describe_failure(err: CaughtError<'_>) -> String {
    match err {
        CaughtError::Exception(exception) => {
            let name = exception
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".to_string());
            let message = exception.message().unwrap_or_default();
            match exception.stack().filter(|stack| !stack.trim().is_empty()) {
                Some(stack) => format!("{name}: {message}\n{}", stack.trim_end()),
                None => format!("{name}: {message}"),
            }
        }
        CaughtError::Value(value) => format!("Uncaught {}", describe_value(&value)),
        CaughtError::Error(err) => err.to_string(),
    }
}

fn describe_value(value: &Value<'_>) -> String {
    if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    if let Some(number) = value.as_number() {
        return number.to_string();
    }
    if let Some(flag) = value.as_bool() {
        return flag.to_string();
    }
    format!("{:?}", value.type_of())
}
