//! Semantic allow-list pass.
//!
//! The parser accepts a broader grammar than the sandbox actually permits
//! (general attribute access, arbitrary call targets). This pass walks the
//! parsed tree and rejects anything syntactically valid but semantically
//! disallowed: dunder names anywhere, bare (non-call) attribute access, and
//! call targets that are not a safe builtin, a helper, a function defined
//! earlier in the same fragment, or a safe method call on a plain value.

use std::collections::HashSet;

use super::ast::{Comprehension, Constant, Expr, FStringPart, SliceOrIndex, Stmt, Target};
use super::{SAFE_BUILTINS, SAFE_METHOD_CALLS};
use crate::error::WorkerError;

/// Validates `module` against the allow-list, given the set of helper
/// function names available in the sandbox namespace (`list_files`,
/// `read_file`, etc).
///
/// # Errors
///
/// Returns [`WorkerError::SandboxViolation`] on the first disallowed
/// construct found.
pub fn validate(module: &[Stmt], helper_names: &HashSet<&str>) -> Result<(), WorkerError> {
    let mut known_functions: HashSet<String> = collect_function_names(module);
    for name in helper_names {
        known_functions.insert((*name).to_string());
    }

    let validator = Validator { known_functions };
    for stmt in module {
        validator.validate_stmt(stmt)?;
    }
    Ok(())
}

/// Recursively collects every `def` name in `module`, including nested
/// function bodies, mirroring a full-tree walk over definitions.
fn collect_function_names(stmts: &[Stmt]) -> HashSet<String> {
    let mut names = HashSet::new();
    for stmt in stmts {
        collect_function_names_stmt(stmt, &mut names);
    }
    names
}

fn collect_function_names_stmt(stmt: &Stmt, names: &mut HashSet<String>) {
    match stmt {
        Stmt::FunctionDef { name, body, .. } => {
            names.insert(name.clone());
            for inner in body {
                collect_function_names_stmt(inner, names);
            }
        }
        Stmt::If { body, orelse, .. } => {
            for inner in body.iter().chain(orelse) {
                collect_function_names_stmt(inner, names);
            }
        }
        Stmt::For { body, .. } | Stmt::While { body, .. } => {
            for inner in body {
                collect_function_names_stmt(inner, names);
            }
        }
        _ => {}
    }
}

fn is_dunder(name: &str) -> bool {
    name.starts_with("__")
}

struct Validator {
    known_functions: HashSet<String>,
}

impl Validator {
    fn validate_stmt(&self, stmt: &Stmt) -> Result<(), WorkerError> {
        match stmt {
            Stmt::ExprStmt(expr) => self.validate_expr(expr, false),
            Stmt::Assign { target, value } => {
                self.validate_target(target)?;
                self.validate_expr(value, false)
            }
            Stmt::AugAssign { target, value, .. } => {
                self.validate_target(target)?;
                self.validate_expr(value, false)
            }
            Stmt::If { test, body, orelse } => {
                self.validate_expr(test, false)?;
                for inner in body.iter().chain(orelse) {
                    self.validate_stmt(inner)?;
                }
                Ok(())
            }
            Stmt::For { target, iter, body } => {
                self.validate_target(target)?;
                self.validate_expr(iter, false)?;
                for inner in body {
                    self.validate_stmt(inner)?;
                }
                Ok(())
            }
            Stmt::While { test, body } => {
                self.validate_expr(test, false)?;
                for inner in body {
                    self.validate_stmt(inner)?;
                }
                Ok(())
            }
            Stmt::Break | Stmt::Continue | Stmt::Pass => Ok(()),
            Stmt::FunctionDef { name, params, body } => {
                if is_dunder(name) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {name}"
                    )));
                }
                for param in params {
                    if is_dunder(param) {
                        return Err(WorkerError::sandbox(format!(
                            "dunder name not allowed: {param}"
                        )));
                    }
                }
                for inner in body {
                    self.validate_stmt(inner)?;
                }
                Ok(())
            }
            Stmt::Return(value) => match value {
                Some(expr) => self.validate_expr(expr, false),
                None => Ok(()),
            },
        }
    }

    fn validate_target(&self, target: &Target) -> Result<(), WorkerError> {
        match target {
            Target::Name(name) => {
                if is_dunder(name) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {name}"
                    )));
                }
                Ok(())
            }
            Target::Tuple(items) => {
                for item in items {
                    self.validate_target(item)?;
                }
                Ok(())
            }
            Target::Subscript { value, index } => {
                self.validate_expr(value, false)?;
                self.validate_expr(index, false)
            }
        }
    }

    /// `in_call_position` is `true` when `expr` is the direct callee of a
    /// [`Expr::Call`]; only there may an [`Expr::Attribute`] appear.
    fn validate_expr(&self, expr: &Expr, in_call_position: bool) -> Result<(), WorkerError> {
        match expr {
            Expr::Constant(_) => Ok(()),
            Expr::Name(name) => {
                if is_dunder(name) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {name}"
                    )));
                }
                Ok(())
            }
            Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
                for item in items {
                    self.validate_expr(item, false)?;
                }
                Ok(())
            }
            Expr::Dict(pairs) => {
                for (key, value) in pairs {
                    self.validate_expr(key, false)?;
                    self.validate_expr(value, false)?;
                }
                Ok(())
            }
            Expr::Subscript { value, slice } => {
                self.validate_expr(value, false)?;
                self.validate_slice(slice)
            }
            Expr::BinOp { left, right, .. } => {
                self.validate_expr(left, false)?;
                self.validate_expr(right, false)
            }
            Expr::UnaryOp { operand, .. } => self.validate_expr(operand, false),
            Expr::BoolOp { values, .. } => {
                for value in values {
                    self.validate_expr(value, false)?;
                }
                Ok(())
            }
            Expr::Compare {
                left, comparators, ..
            } => {
                self.validate_expr(left, false)?;
                for comparator in comparators {
                    self.validate_expr(comparator, false)?;
                }
                Ok(())
            }
            Expr::IfExp { test, body, orelse } => {
                self.validate_expr(test, false)?;
                self.validate_expr(body, false)?;
                self.validate_expr(orelse, false)
            }
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                self.validate_call_target(func)?;
                for arg in args {
                    self.validate_expr(arg, false)?;
                }
                for keyword in keywords {
                    if is_dunder(&keyword.name) {
                        return Err(WorkerError::sandbox(format!(
                            "dunder name not allowed: {}",
                            keyword.name
                        )));
                    }
                    self.validate_expr(&keyword.value, false)?;
                }
                Ok(())
            }
            Expr::Attribute { value, attr } => {
                if !in_call_position {
                    return Err(WorkerError::sandbox(format!(
                        "bare attribute access is not allowed: .{attr}"
                    )));
                }
                if is_dunder(attr) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {attr}"
                    )));
                }
                if !SAFE_METHOD_CALLS.contains(&attr.as_str()) {
                    return Err(WorkerError::sandbox(format!(
                        "method not allowed: {attr}"
                    )));
                }
                self.validate_method_receiver(value)
            }
            Expr::ListComp { element, generators } | Expr::SetComp { element, generators } => {
                self.validate_comprehensions(generators)?;
                self.validate_expr(element, false)
            }
            Expr::DictComp {
                key,
                value,
                generators,
            } => {
                self.validate_comprehensions(generators)?;
                self.validate_expr(key, false)?;
                self.validate_expr(value, false)
            }
            Expr::GeneratorExp { element, generators } => {
                self.validate_comprehensions(generators)?;
                self.validate_expr(element, false)
            }
            Expr::JoinedStr(parts) => {
                for part in parts {
                    if let FStringPart::Expr(inner) = part {
                        self.validate_expr(inner, false)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// A method-call receiver must be a plain name, a string literal, or a
    /// call to an allowed target — never a subscript or a chained method
    /// call, matching the ground-truth validator's receiver restriction.
    fn validate_method_receiver(&self, receiver: &Expr) -> Result<(), WorkerError> {
        match receiver {
            Expr::Name(name) => {
                if is_dunder(name) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {name}"
                    )));
                }
                Ok(())
            }
            Expr::Constant(Constant::Str(_)) => Ok(()),
            Expr::Call {
                func,
                args,
                keywords,
            } => {
                // The receiver's own call target must be a plain allowed
                // name, not another attribute chain — `"abc".strip().upper()`
                // is rejected here even though each method individually is
                // in `SAFE_METHOD_CALLS`.
                match func.as_ref() {
                    Expr::Name(name) => {
                        if is_dunder(name) {
                            return Err(WorkerError::sandbox(format!(
                                "dunder name not allowed: {name}"
                            )));
                        }
                        if !(SAFE_BUILTINS.contains(&name.as_str()) || self.known_functions.contains(name)) {
                            return Err(WorkerError::sandbox(format!("call not allowed: {name}")));
                        }
                    }
                    other => {
                        return Err(WorkerError::sandbox(format!(
                            "method call receiver not allowed: {other:?}"
                        )));
                    }
                }
                for arg in args {
                    self.validate_expr(arg, false)?;
                }
                for keyword in keywords {
                    if is_dunder(&keyword.name) {
                        return Err(WorkerError::sandbox(format!(
                            "dunder name not allowed: {}",
                            keyword.name
                        )));
                    }
                    self.validate_expr(&keyword.value, false)?;
                }
                Ok(())
            }
            other => Err(WorkerError::sandbox(format!(
                "method call receiver not allowed: {other:?}"
            ))),
        }
    }

    fn validate_slice(&self, slice: &SliceOrIndex) -> Result<(), WorkerError> {
        match slice {
            SliceOrIndex::Index(index) => self.validate_expr(index, false),
            SliceOrIndex::Slice { start, stop, step } => {
                for part in [start, stop, step].into_iter().flatten() {
                    self.validate_expr(part, false)?;
                }
                Ok(())
            }
        }
    }

    fn validate_comprehensions(&self, generators: &[Comprehension]) -> Result<(), WorkerError> {
        for generator in generators {
            self.validate_target(&generator.target)?;
            self.validate_expr(&generator.iter, false)?;
            for cond in &generator.ifs {
                self.validate_expr(cond, false)?;
            }
        }
        Ok(())
    }

    /// Validates the callee of a [`Expr::Call`]: either a plain `Name` in
    /// the safe-builtin/helper/known-function set, or an `Attribute`
    /// method call on an arbitrary (recursively validated) receiver whose
    /// method name is in [`SAFE_METHOD_CALLS`].
    fn validate_call_target(&self, func: &Expr) -> Result<(), WorkerError> {
        match func {
            Expr::Name(name) => {
                if is_dunder(name) {
                    return Err(WorkerError::sandbox(format!(
                        "dunder name not allowed: {name}"
                    )));
                }
                if SAFE_BUILTINS.contains(&name.as_str()) || self.known_functions.contains(name) {
                    Ok(())
                } else {
                    Err(WorkerError::sandbox(format!("call not allowed: {name}")))
                }
            }
            Expr::Attribute { .. } => self.validate_expr(func, true),
            other => Err(WorkerError::sandbox(format!(
                "call target not allowed: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::parse;
    use super::*;

    fn helpers() -> HashSet<&'static str> {
        [
            "list_files",
            "read_file",
            "grep",
            "slice_text",
            "append_highlight",
            "add_citation",
            "sub_rlm",
            "set_final",
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_validate_accepts_safe_builtin_call() {
        let module = parse("x = len([1, 2, 3])\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }

    #[test]
    fn test_validate_accepts_helper_call() {
        let module = parse("files = list_files()\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }

    #[test]
    fn test_validate_rejects_bare_attribute_access() {
        let module = parse("x = (1).__class__\n").unwrap_or_else(|e| panic!("parse: {e}"));
        let result = validate(&module, &helpers());
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_validate_rejects_unknown_call() {
        let module = parse("x = eval(\"1\")\n").unwrap_or_else(|e| panic!("parse: {e}"));
        let result = validate(&module, &helpers());
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_validate_accepts_safe_method_call() {
        let module = parse("x = \"abc\".upper()\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }

    #[test]
    fn test_validate_rejects_unsafe_method_call() {
        let module = parse("x = obj.__reduce__()\n").unwrap_or_else(|e| panic!("parse: {e}"));
        let result = validate(&module, &helpers());
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_validate_accepts_locally_defined_function() {
        let module =
            parse("def helper(x):\n    return x + 1\ny = helper(2)\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }

    #[test]
    fn test_validate_rejects_chained_method_call_receiver() {
        let module = parse("x = \"abc\".strip().upper()\n").unwrap_or_else(|e| panic!("parse: {e}"));
        let result = validate(&module, &helpers());
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_validate_rejects_subscript_method_call_receiver() {
        let module = parse("x = files[0].upper()\n").unwrap_or_else(|e| panic!("parse: {e}"));
        let result = validate(&module, &helpers());
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }

    #[test]
    fn test_validate_accepts_is_none_comparison() {
        let module = parse("if x is None:\n    pass\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }

    #[test]
    fn test_validate_accepts_is_not_none_comparison() {
        let module = parse("if x is not None:\n    pass\n").unwrap_or_else(|e| panic!("parse: {e}"));
        validate(&module, &helpers()).unwrap_or_else(|e| panic!("validate failed: {e}"));
    }
}
