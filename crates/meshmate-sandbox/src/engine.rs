//! Restricted Rhai engine construction.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use meshmate_core::security::rules::{
    FILESYSTEM_FUNCTIONS, NETWORK_FUNCTIONS, PROCESS_FUNCTIONS, STDIN_FUNCTIONS,
};
use rhai::{Dynamic, Engine, EvalAltResult};
use tokio_util::sync::CancellationToken;

use crate::resolver::HostModuleResolver;

/// Value carried by `ErrorTerminated` when a run is stopped.
pub const TERMINATED_DEADLINE: &str = "deadline";
pub const TERMINATED_CANCELLED: &str = "cancelled";

const MAX_CALL_LEVELS: usize = 64;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 1 << 20;
const MAX_COLLECTION_SIZE: usize = 100_000;
const MAX_MODULES: usize = 16;
/// Output beyond this many bytes is dropped.
const MAX_OUTPUT_BYTES: usize = 1 << 20;

/// Symbols removed from the language.
const DISABLED_SYMBOLS: &[&str] = &["eval"];

/// Captured `print` and `debug` output, shared with the engine callbacks.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<String>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: &str) {
        let mut text = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if text.len() >= MAX_OUTPUT_BYTES {
            return;
        }
        text.push_str(line);
        text.push('\n');
    }

    /// Everything captured so far, without the trailing newline.
    pub fn contents(&self) -> String {
        let text = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        text.trim_end_matches('\n').to_string()
    }
}

/// What an engine run is bounded by.
pub struct EngineLimits {
    pub max_operations: u64,
    pub deadline: Instant,
    pub cancel: CancellationToken,
}

fn unavailable(name: &str) -> Box<EvalAltResult> {
    format!("{name}() is not available in the sandbox").into()
}

/// Register `name` at arities 0 to 3 as a function that always fails, so a
/// script calling it stops with a clear error instead of "function not found".
fn register_stub(engine: &mut Engine, name: &'static str) {
    engine.register_fn(name, move || -> Result<(), Box<EvalAltResult>> {
        Err(unavailable(name))
    });
    engine.register_fn(name, move |_: Dynamic| -> Result<(), Box<EvalAltResult>> {
        Err(unavailable(name))
    });
    engine.register_fn(
        name,
        move |_: Dynamic, _: Dynamic| -> Result<(), Box<EvalAltResult>> { Err(unavailable(name)) },
    );
    engine.register_fn(
        name,
        move |_: Dynamic, _: Dynamic, _: Dynamic| -> Result<(), Box<EvalAltResult>> {
            Err(unavailable(name))
        },
    );
}

/// Build an engine with resource limits, capture hooks and the import
/// resolver installed.
pub fn build_engine(
    limits: EngineLimits,
    resolver: HostModuleResolver,
    output: &OutputBuffer,
) -> Engine {
    let mut engine = Engine::new();

    engine
        .set_max_operations(limits.max_operations.max(1))
        .set_max_call_levels(MAX_CALL_LEVELS)
        .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH)
        .set_max_string_size(MAX_STRING_SIZE)
        .set_max_array_size(MAX_COLLECTION_SIZE)
        .set_max_map_size(MAX_COLLECTION_SIZE)
        .set_max_modules(MAX_MODULES);

    for symbol in DISABLED_SYMBOLS {
        engine.disable_symbol(*symbol);
    }
    for &name in FILESYSTEM_FUNCTIONS
        .iter()
        .chain(NETWORK_FUNCTIONS)
        .chain(PROCESS_FUNCTIONS)
        .chain(STDIN_FUNCTIONS)
    {
        register_stub(&mut engine, name);
    }

    engine.set_module_resolver(resolver);

    let sink = output.clone();
    engine.on_print(move |text| sink.push_line(text));
    let sink = output.clone();
    engine.on_debug(move |text, _source, pos| match pos.line() {
        Some(line) => sink.push_line(&format!("[debug line {line}] {text}")),
        None => sink.push_line(&format!("[debug] {text}")),
    });

    let EngineLimits {
        deadline, cancel, ..
    } = limits;
    engine.on_progress(move |_operations| {
        if cancel.is_cancelled() {
            Some(Dynamic::from(TERMINATED_CANCELLED.to_string()))
        } else if Instant::now() >= deadline {
            Some(Dynamic::from(TERMINATED_DEADLINE.to_string()))
        } else {
            None
        }
    });

    engine
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::host::MemoryScene;
    use meshmate_core::ScriptPolicy;

    fn engine(output: &OutputBuffer, max_operations: u64, seconds: u64) -> Engine {
        build_engine(
            EngineLimits {
                max_operations,
                deadline: Instant::now() + Duration::from_secs(seconds),
                cancel: CancellationToken::new(),
            },
            HostModuleResolver::new(ScriptPolicy::default(), Arc::new(MemoryScene::new())),
            output,
        )
    }

    #[test]
    fn test_print_and_debug_are_captured() {
        let output = OutputBuffer::new();
        engine(&output, 10_000, 5)
            .run("print(\"hello\");\ndebug(42);")
            .unwrap();
        assert_eq!(output.contents(), "hello\n[debug line 2] 42");
    }

    #[test]
    fn test_eval_is_disabled() {
        let output = OutputBuffer::new();
        assert!(engine(&output, 10_000, 5).compile("eval(\"40 + 2\")").is_err());
    }

    #[test]
    fn test_stubs_raise() {
        let output = OutputBuffer::new();
        let err = engine(&output, 10_000, 5)
            .run("system(\"ls\");")
            .unwrap_err();
        assert!(err.to_string().contains("not available in the sandbox"));
    }

    #[test]
    fn test_operation_budget() {
        let output = OutputBuffer::new();
        let err = engine(&output, 1_000, 5)
            .run("let x = 0; loop { x += 1; }")
            .unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorTooManyOperations(_)));
    }

    #[test]
    fn test_deadline_terminates() {
        let output = OutputBuffer::new();
        let err = engine(&output, 1_000_000_000, 0)
            .run("loop { }")
            .unwrap_err();
        assert!(matches!(*err, EvalAltResult::ErrorTerminated(..)));
    }

    #[test]
    fn test_host_module_import() {
        let output = OutputBuffer::new();
        engine(&output, 100_000, 5)
            .run("import \"scene\" as scene;\nscene::add_cube(\"Box\", 2);\nprint(scene::count());")
            .unwrap();
        assert_eq!(output.contents(), "1");
    }
}
