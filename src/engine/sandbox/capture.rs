use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use rquickjs::{Ctx, Function, Object, Value};

/// Console and prompt that belong to the host context. They are what every
/// run's interception restores on the way out.
const HOST_BINDINGS: &str = r#"
(function (emit) {
  const render = (args) =>
    args.map((arg) => (typeof arg === 'object' ? JSON.stringify(arg) : String(arg))).join(' ');
  globalThis.console = {
    log: (...args) => emit('log', render(args)),
    info: (...args) => emit('info', render(args)),
    warn: (...args) => emit('warn', render(args)),
    error: (...args) => emit('error', render(args)),
  };
  globalThis.prompt = () => null;
})
"#;

const CAPTURE_BINDINGS: &str = r#"
(function (write, read) {
  const render = (args) =>
    args.map((arg) => (typeof arg === 'object' ? JSON.stringify(arg, null, 2) : String(arg))).join(' ') + '\n';
  return {
    console: {
      log: (...args) => write(render(args)),
      info: (...args) => write('[INFO] ' + render(args)),
      warn: (...args) => write('[WARNING] ' + render(args)),
      error: (...args) => write('[ERROR] ' + render(args)),
    },
    prompt: (message) => {
      const line = read();
      if (line === undefined) return '';
      write('[INPUT] ' + String(message) + ' ' + line + '\n');
      return line;
    },
  };
})
"#;

pub(super) fn install_host_bindings(ctx: &Ctx<'_>) -> rquickjs::Result<()> {
    let emit = Function::new(ctx.clone(), |level: String, text: String| {
        match level.as_str() {
            "error" => tracing::error!(target: "sandbox", "{text}"),
            "warn" => tracing::warn!(target: "sandbox", "{text}"),
            _ => tracing::info!(target: "sandbox", "{text}"),
        }
    })?;
    let installer: Function = ctx.eval(HOST_BINDINGS)?;
    installer.call::<_, Value>((emit,))?;
    Ok(())
}

/// Per-run buffers: the captured transcript and the queued input lines.
pub(super) struct Capture {
    output: Rc<RefCell<String>>,
    input: Rc<RefCell<VecDeque<String>>>,
    has_input: bool,
    limit: usize,
}

impl Capture {
    pub(super) fn new(stdin: &str, limit: usize) -> Self {
        Self {
            output: Rc::default(),
            // Split on bare newlines, so a trailing newline leaves one final empty
            // answer and `\r` stays part of the line.
            input: Rc::new(RefCell::new(stdin.split('\n').map(str::to_string).collect())),
            has_input: !stdin.trim().is_empty(),
            limit,
        }
    }

    pub(super) fn into_output(self) -> String {
        self.output.take()
    }
}

/// Installed console/prompt interception. Dropping it puts the host
/// bindings back, whatever happened in between.
pub(super) struct Interception<'js> {
    globals: Object<'js>,
    console: Value<'js>,
    prompt: Value<'js>,
}

impl<'js> Interception<'js> {
    pub(super) fn install(ctx: &Ctx<'js>, capture: &Capture) -> rquickjs::Result<Self> {
        let globals = ctx.globals();
        let guard = Self {
            console: globals.get("console")?,
            prompt: globals.get("prompt")?,
            globals,
        };

        let output = capture.output.clone();
        let limit = capture.limit;
        let write = Function::new(ctx.clone(), move |chunk: String| {
            push_limited(&mut output.borrow_mut(), &chunk, limit);
        })?;
        let input = capture.input.clone();
        let read = Function::new(ctx.clone(), move || input.borrow_mut().pop_front())?;

        let factory: Function = ctx.eval(CAPTURE_BINDINGS)?;
        let bindings: Object = factory.call((write, read))?;
        guard
            .globals
            .set("console", bindings.get::<_, Value>("console")?)?;
        if capture.has_input {
            guard
                .globals
                .set("prompt", bindings.get::<_, Value>("prompt")?)?;
        }

        Ok(guard)
    }
}

impl Drop for Interception<'_> {
    fn drop(&mut self) {
        let restored = self
            .globals
            .set("console", self.console.clone())
            .and_then(|()| self.globals.set("prompt", self.prompt.clone()));
        if let Err(err) = restored {
            tracing::error!(error = %err, "failed to restore sandbox host bindings");
        }
    }
}

fn push_limited(buffer: &mut String, chunk: &str, limit: usize) {
    let remaining = limit.saturating_sub(buffer.len());
    if chunk.len() <= remaining {
        buffer.push_str(chunk);
        return;
    }
    let mut cut = remaining;
    while !chunk.is_char_boundary(cut) {
        cut -= 1;
    }
    buffer.push_str(&chunk[..cut]);
}
