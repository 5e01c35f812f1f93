//! The restricted sandbox language: lexer, parser, semantic validator,
//! value representation, and tree-walking interpreter, plus the runtime
//! that backs the fixed helper API.
//!
//! `lex -> parse -> validate -> execute` is the only path code reaches
//! execution by; nothing here interprets a raw model response without
//! first passing the allow-list.

pub mod ast;
pub mod builtins;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod validator;
pub mod value;

use std::collections::HashSet;

use crate::error::WorkerError;
use interpreter::ExecutionOutcome;
use runtime::SandboxRuntime;

/// Builtin function names reachable from sandboxed code.
pub const SAFE_BUILTINS: &[&str] = &[
    "len", "min", "max", "sum", "sorted", "range", "enumerate", "str", "int", "float", "bool",
    "list", "dict", "set", "tuple", "abs", "any", "all", "print",
];

/// Method names reachable from sandboxed code, regardless of receiver type
/// (the receiver's actual type still gates which of these apply).
pub const SAFE_METHOD_CALLS: &[&str] = &[
    "append", "extend", "insert", "pop", "clear", "copy", "count", "index", "sort", "reverse",
    "get", "keys", "values", "items", "update", "setdefault", "strip", "lstrip", "rstrip",
    "split", "splitlines", "join", "replace", "lower", "upper", "startswith", "endswith",
    "format",
];

/// Names of the fixed helper functions injected into every fragment's
/// namespace, backed by [`SandboxRuntime`].
pub const HELPER_NAMES: &[&str] = &[
    "list_files",
    "read_file",
    "grep",
    "slice_text",
    "append_highlight",
    "add_citation",
    "sub_rlm",
    "set_final",
];

/// Parses, validates, and executes one extracted code fragment against
/// `runtime`.
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] for any lexical, syntactic, or
/// semantic rejection, and propagates whatever error a helper call raises
/// (including [`WorkerError::LimitExceeded`] and
/// [`WorkerError::ModelInvocationFailed`] from `sub_rlm`).
pub async fn validate_and_execute(
    source: &str,
    runtime: &mut SandboxRuntime,
) -> Result<ExecutionOutcome, WorkerError> {
    let module = parser::parse(source)?;
    let helper_names: HashSet<&str> = HELPER_NAMES.iter().copied().collect();
    validator::validate(&module, &helper_names)?;
    interpreter::execute(&module, runtime).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_validate_and_execute_runs_helper_and_builtin() {
        let mut runtime = SandboxRuntime::new_for_test();
        let outcome = validate_and_execute("print(len([1, 2, 3]))\n", &mut runtime)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(outcome.stdout_preview.trim(), "3");
    }

    #[tokio::test]
    async fn test_validate_and_execute_rejects_import() {
        let mut runtime = SandboxRuntime::new_for_test();
        let result = validate_and_execute("import os\n", &mut runtime).await;
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[tokio::test]
    async fn test_validate_and_execute_records_final_value() {
        let mut runtime = SandboxRuntime::new_for_test();
        validate_and_execute("set_final('done')\n", &mut runtime)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(runtime.final_value(), Some(&value::Value::str("done")));
    }
}
