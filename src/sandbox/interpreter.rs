//! Tree-walking evaluator for the restricted sandbox language.
//!
//! Runs a validated [`super::ast::Module`] against a namespace seeded with
//! safe builtins and the fixed helper API backed by [`super::runtime::SandboxRuntime`].
//! Recursive evaluation methods return boxed futures (`Pin<Box<dyn Future>>`)
//! since `sub_rlm` is the one helper that awaits a child process and may be
//! called from arbitrary expression depth.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use super::ast::{BinOp, BoolOp, CmpOp, Comprehension, Constant, Expr, FStringPart, SliceOrIndex, Stmt, Target, UnaryOp};
use super::runtime::SandboxRuntime;
use super::value::Value;
use super::{HELPER_NAMES, SAFE_BUILTINS};
use crate::error::WorkerError;

/// Cap applied to the captured stdout preview surfaced in trace rows.
pub const STDOUT_PREVIEW_CAP: usize = 220;

/// Outcome of running one code fragment.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Captured `print()` output, truncated to [`STDOUT_PREVIEW_CAP`] chars.
    pub stdout_preview: String,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, WorkerError>> + 'a>>;

/// Non-local control flow produced while executing a block.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

#[derive(Clone)]
struct UserFunction {
    params: Vec<String>,
    body: Rc<Vec<Stmt>>,
}

/// Executes `module` against `runtime`, returning the captured stdout.
///
/// # Errors
///
/// Returns any [`WorkerError`] raised by a helper call or by evaluating an
/// unsupported runtime operation (e.g. dividing incompatible types).
pub async fn execute(module: &[Stmt], runtime: &mut SandboxRuntime) -> Result<ExecutionOutcome, WorkerError> {
    let mut interp = Interpreter {
        runtime,
        scopes: vec![HashMap::new()],
        functions: HashMap::new(),
        stdout: String::new(),
    };
    interp.exec_block(module).await?;
    Ok(ExecutionOutcome {
        stdout_preview: truncate_preview(&interp.stdout),
    })
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= STDOUT_PREVIEW_CAP {
        text.to_string()
    } else {
        text.chars().take(STDOUT_PREVIEW_CAP).collect()
    }
}

struct Interpreter<'a> {
    runtime: &'a mut SandboxRuntime,
    scopes: Vec<HashMap<String, Value>>,
    functions: HashMap<String, UserFunction>,
    stdout: String,
}

impl<'a> Interpreter<'a> {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.scopes.last().and_then(|scope| scope.get(name).cloned())
    }

    fn set_var(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        }
    }

    fn exec_block<'b>(&'b mut self, stmts: &'b [Stmt]) -> BoxFuture<'b, Flow> {
        Box::pin(async move {
            for stmt in stmts {
                match self.exec_stmt(stmt).await? {
                    Flow::Normal => {}
                    other => return Ok(other),
                }
            }
            Ok(Flow::Normal)
        })
    }

    fn exec_stmt<'b>(&'b mut self, stmt: &'b Stmt) -> BoxFuture<'b, Flow> {
        Box::pin(async move {
            match stmt {
                Stmt::ExprStmt(expr) => {
                    self.eval_expr(expr).await?;
                    Ok(Flow::Normal)
                }
                Stmt::Assign { target, value } => {
                    let value = self.eval_expr(value).await?;
                    self.assign_target(target, value).await?;
                    Ok(Flow::Normal)
                }
                Stmt::AugAssign { target, op, value } => {
                    let current = self.eval_target_read(target).await?;
                    let rhs = self.eval_expr(value).await?;
                    let combined = apply_binop(*op, &current, &rhs)?;
                    self.assign_target(target, combined).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If { test, body, orelse } => {
                    if self.eval_expr(test).await?.is_truthy() {
                        self.exec_block(body).await
                    } else {
                        self.exec_block(orelse).await
                    }
                }
                Stmt::For { target, iter, body } => {
                    let iterable = self.eval_expr(iter).await?;
                    let items = iterate(&iterable)?;
                    for item in items {
                        self.assign_target(target, item).await?;
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => {}
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::While { test, body } => {
                    while self.eval_expr(test).await?.is_truthy() {
                        match self.exec_block(body).await? {
                            Flow::Break => break,
                            Flow::Continue | Flow::Normal => {}
                            Flow::Return(v) => return Ok(Flow::Return(v)),
                        }
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Break => Ok(Flow::Break),
                Stmt::Continue => Ok(Flow::Continue),
                Stmt::Pass => Ok(Flow::Normal),
                Stmt::FunctionDef { name, params, body } => {
                    self.functions.insert(
                        name.clone(),
                        UserFunction {
                            params: params.clone(),
                            body: Rc::new(body.clone()),
                        },
                    );
                    Ok(Flow::Normal)
                }
                Stmt::Return(value) => {
                    let value = match value {
                        Some(expr) => self.eval_expr(expr).await?,
                        None => Value::None,
                    };
                    Ok(Flow::Return(value))
                }
            }
        })
    }

    fn assign_target<'b>(&'b mut self, target: &'b Target, value: Value) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            match target {
                Target::Name(name) => {
                    self.set_var(name, value);
                    Ok(())
                }
                Target::Tuple(targets) => {
                    let items = match &value {
                        Value::Tuple(items) => (**items).clone(),
                        Value::List(items) => items.borrow().clone(),
                        other => {
                            return Err(WorkerError::sandbox(format!(
                                "cannot unpack {}",
                                other.type_name()
                            )));
                        }
                    };
                    if items.len() != targets.len() {
                        return Err(WorkerError::sandbox(format!(
                            "cannot unpack {} values into {} targets",
                            items.len(),
                            targets.len()
                        )));
                    }
                    for (target, item) in targets.iter().zip(items) {
                        Box::pin(self.assign_target(target, item)).await?;
                    }
                    Ok(())
                }
                Target::Subscript { value: container, index } => {
                    let container_value = self.eval_expr(container).await?;
                    let index_value = self.eval_expr(index).await?;
                    assign_subscript(&container_value, &index_value, value)
                }
            }
        })
    }

    fn eval_target_read<'b>(&'b mut self, target: &'b Target) -> BoxFuture<'b, Value> {
        Box::pin(async move {
            match target {
                Target::Name(name) => self
                    .get_var(name)
                    .ok_or_else(|| WorkerError::sandbox(format!("name '{name}' is not defined"))),
                Target::Subscript { value, index } => {
                    let container = self.eval_expr(value).await?;
                    let index = self.eval_expr(index).await?;
                    get_subscript(&container, &index)
                }
                Target::Tuple(_) => Err(WorkerError::sandbox(
                    "augmented assignment to a tuple target is not allowed".to_string(),
                )),
            }
        })
    }

    fn eval_expr<'b>(&'b mut self, expr: &'b Expr) -> BoxFuture<'b, Value> {
        Box::pin(async move {
            match expr {
                Expr::Constant(c) => Ok(constant_to_value(c)),
                Expr::Name(name) => self
                    .get_var(name)
                    .ok_or_else(|| WorkerError::sandbox(format!("name '{name}' is not defined"))),
                Expr::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::list(values))
                }
                Expr::Tuple(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    for item in items {
                        values.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::Tuple(Rc::new(values)))
                }
                Expr::Set(items) => {
                    let mut values: Vec<Value> = Vec::with_capacity(items.len());
                    for item in items {
                        let value = self.eval_expr(item).await?;
                        if !values.iter().any(|v: &Value| v.values_equal(&value)) {
                            values.push(value);
                        }
                    }
                    Ok(Value::set(values))
                }
                Expr::Dict(pairs) => {
                    let mut entries = Vec::with_capacity(pairs.len());
                    for (key, value) in pairs {
                        let key = self.eval_expr(key).await?;
                        let value = self.eval_expr(value).await?;
                        entries.push((key, value));
                    }
                    Ok(Value::dict(entries))
                }
                Expr::Subscript { value, slice } => {
                    let container = self.eval_expr(value).await?;
                    match slice.as_ref() {
                        SliceOrIndex::Index(index_expr) => {
                            let index = self.eval_expr(index_expr).await?;
                            get_subscript(&container, &index)
                        }
                        SliceOrIndex::Slice { start, stop, step } => {
                            let start = match start {
                                Some(e) => Some(self.eval_expr(e).await?.as_int()?),
                                None => None,
                            };
                            let stop = match stop {
                                Some(e) => Some(self.eval_expr(e).await?.as_int()?),
                                None => None,
                            };
                            let step = match step {
                                Some(e) => Some(self.eval_expr(e).await?.as_int()?),
                                None => None,
                            };
                            get_slice(&container, start, stop, step)
                        }
                    }
                }
                Expr::BinOp { left, op, right } => {
                    let left = self.eval_expr(left).await?;
                    let right = self.eval_expr(right).await?;
                    apply_binop(*op, &left, &right)
                }
                Expr::UnaryOp { op, operand } => {
                    let operand = self.eval_expr(operand).await?;
                    apply_unaryop(*op, &operand)
                }
                Expr::BoolOp { op, values } => {
                    let mut result = Value::Bool(matches!(op, BoolOp::And));
                    for (i, value_expr) in values.iter().enumerate() {
                        let value = self.eval_expr(value_expr).await?;
                        let truthy = value.is_truthy();
                        result = value;
                        let short_circuit = match op {
                            BoolOp::And => !truthy,
                            BoolOp::Or => truthy,
                        };
                        if short_circuit || i == values.len() - 1 {
                            break;
                        }
                    }
                    Ok(result)
                }
                Expr::Compare { left, ops, comparators } => {
                    let mut current = self.eval_expr(left).await?;
                    for (op, comparator_expr) in ops.iter().zip(comparators) {
                        let comparator = self.eval_expr(comparator_expr).await?;
                        if !apply_cmpop(*op, &current, &comparator)? {
                            return Ok(Value::Bool(false));
                        }
                        current = comparator;
                    }
                    Ok(Value::Bool(true))
                }
                Expr::IfExp { test, body, orelse } => {
                    if self.eval_expr(test).await?.is_truthy() {
                        self.eval_expr(body).await
                    } else {
                        self.eval_expr(orelse).await
                    }
                }
                Expr::Call { func, args, keywords } => self.eval_call(func, args, keywords).await,
                Expr::Attribute { value, attr } => {
                    // Only reachable when a bare attribute access escaped
                    // the validator; fail closed rather than guess intent.
                    let _ = self.eval_expr(value).await?;
                    Err(WorkerError::sandbox(format!("bare attribute access: .{attr}")))
                }
                Expr::ListComp { element, generators } => {
                    let mut out = Vec::new();
                    self.collect_comprehension_values(generators, 0, element, &mut out).await?;
                    Ok(Value::list(out))
                }
                Expr::SetComp { element, generators } => {
                    let mut out = Vec::new();
                    self.collect_comprehension_values(generators, 0, element, &mut out).await?;
                    let mut deduped: Vec<Value> = Vec::new();
                    for value in out {
                        if !deduped.iter().any(|v: &Value| v.values_equal(&value)) {
                            deduped.push(value);
                        }
                    }
                    Ok(Value::set(deduped))
                }
                Expr::DictComp { key, value, generators } => {
                    let mut out = Vec::new();
                    self.collect_comprehension_pairs(generators, 0, key, value, &mut out).await?;
                    Ok(Value::dict(out))
                }
                Expr::GeneratorExp { element, generators } => {
                    let mut out = Vec::new();
                    self.collect_comprehension_values(generators, 0, element, &mut out).await?;
                    Ok(Value::list(out))
                }
                Expr::JoinedStr(parts) => {
                    let mut rendered = String::new();
                    for part in parts {
                        match part {
                            FStringPart::Literal(text) => rendered.push_str(text),
                            FStringPart::Expr(inner) => {
                                let value = self.eval_expr(inner).await?;
                                rendered.push_str(&value.display());
                            }
                        }
                    }
                    Ok(Value::str(rendered))
                }
            }
        })
    }

    /// Runs nested `for`/`if` comprehension clauses depth-first, pushing one
    /// evaluated `element` per surviving combination of loop variables.
    fn collect_comprehension_values<'b>(
        &'b mut self,
        generators: &'b [Comprehension],
        depth: usize,
        element: &'b Expr,
        out: &'b mut Vec<Value>,
    ) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            let Some(generator) = generators.get(depth) else {
                let value = self.eval_expr(element).await?;
                out.push(value);
                return Ok(());
            };

            let iterable = self.eval_expr(&generator.iter).await?;
            let items = iterate(&iterable)?;
            for item in items {
                self.assign_target(&generator.target, item).await?;
                if self.comprehension_ifs_hold(&generator.ifs).await? {
                    self.collect_comprehension_values(generators, depth + 1, element, out).await?;
                }
            }
            Ok(())
        })
    }

    /// Dict-comprehension counterpart of [`Self::collect_comprehension_values`],
    /// evaluating a `key`/`value` pair per surviving combination.
    fn collect_comprehension_pairs<'b>(
        &'b mut self,
        generators: &'b [Comprehension],
        depth: usize,
        key: &'b Expr,
        value: &'b Expr,
        out: &'b mut Vec<(Value, Value)>,
    ) -> BoxFuture<'b, ()> {
        Box::pin(async move {
            let Some(generator) = generators.get(depth) else {
                let k = self.eval_expr(key).await?;
                let v = self.eval_expr(value).await?;
                out.push((k, v));
                return Ok(());
            };

            let iterable = self.eval_expr(&generator.iter).await?;
            let items = iterate(&iterable)?;
            for item in items {
                self.assign_target(&generator.target, item).await?;
                if self.comprehension_ifs_hold(&generator.ifs).await? {
                    self.collect_comprehension_pairs(generators, depth + 1, key, value, out).await?;
                }
            }
            Ok(())
        })
    }

    async fn comprehension_ifs_hold(&mut self, ifs: &[Expr]) -> Result<bool, WorkerError> {
        for cond in ifs {
            if !self.eval_expr(cond).await?.is_truthy() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn eval_call<'b>(
        &'b mut self,
        func: &'b Expr,
        args: &'b [Expr],
        keywords: &'b [super::ast::Keyword],
    ) -> BoxFuture<'b, Value> {
        Box::pin(async move {
            let mut positional = Vec::with_capacity(args.len());
            for arg in args {
                positional.push(self.eval_expr(arg).await?);
            }
            let mut named: HashMap<String, Value> = HashMap::new();
            for keyword in keywords {
                named.insert(keyword.name.clone(), self.eval_expr(&keyword.value).await?);
            }

            match func {
                Expr::Name(name) if HELPER_NAMES.contains(&name.as_str()) => {
                    self.runtime.call_helper(name, &positional, &named).await
                }
                Expr::Name(name) if self.functions.contains_key(name) => {
                    self.call_user_function(name, positional).await
                }
                Expr::Name(name) if name == "print" => {
                    let rendered: Vec<String> = positional.iter().map(Value::display).collect();
                    self.write_stdout(&rendered.join(" "));
                    Ok(Value::None)
                }
                Expr::Name(name) if SAFE_BUILTINS.contains(&name.as_str()) => {
                    super::builtins::call_builtin(name, &positional)
                }
                Expr::Name(name) => Err(WorkerError::sandbox(format!("call not allowed: {name}"))),
                Expr::Attribute { value, attr } => {
                    let receiver = self.eval_expr(value).await?;
                    super::builtins::call_method(&receiver, attr, &positional)
                }
                other => Err(WorkerError::sandbox(format!("unsupported call target: {other:?}"))),
            }
        })
    }

    async fn call_user_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value, WorkerError> {
        let function = self
            .functions
            .get(name)
            .cloned()
            .ok_or_else(|| WorkerError::sandbox(format!("function not defined: {name}")))?;

        if args.len() != function.params.len() {
            return Err(WorkerError::sandbox(format!(
                "{name}() expected {} arguments, got {}",
                function.params.len(),
                args.len()
            )));
        }

        let mut scope = HashMap::new();
        for (param, value) in function.params.iter().zip(args) {
            scope.insert(param.clone(), value);
        }

        self.scopes.push(scope);
        let outcome = self.exec_block(&function.body).await;
        self.scopes.pop();

        match outcome? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }
}

fn constant_to_value(constant: &Constant) -> Value {
    match constant {
        Constant::Int(n) => Value::Int(*n),
        Constant::Float(f) => Value::Float(*f),
        Constant::Str(s) => Value::str(s.clone()),
        Constant::Bool(b) => Value::Bool(*b),
        Constant::None => Value::None,
    }
}

fn iterate(value: &Value) -> Result<Vec<Value>, WorkerError> {
    match value {
        Value::List(items) => Ok(items.borrow().clone()),
        Value::Tuple(items) => Ok((**items).clone()),
        Value::Set(items) => Ok(items.borrow().clone()),
        Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().map(|(k, _)| k.clone()).collect()),
        other => Err(WorkerError::sandbox(format!(
            "{} is not iterable",
            other.type_name()
        ))),
    }
}

fn apply_binop(op: BinOp, left: &Value, right: &Value) -> Result<Value, WorkerError> {
    if op == BinOp::Add {
        if let (Value::Str(a), Value::Str(b)) = (left, right) {
            return Ok(Value::str(format!("{a}{b}")));
        }
        if let (Value::List(a), Value::List(b)) = (left, right) {
            let mut combined = a.borrow().clone();
            combined.extend(b.borrow().iter().cloned());
            return Ok(Value::list(combined));
        }
    }

    if !left.is_numeric() || !right.is_numeric() {
        return Err(WorkerError::sandbox(format!(
            "unsupported operand types for {op:?}: {} and {}",
            left.type_name(),
            right.type_name()
        )));
    }

    let use_float = left.is_float_like() || right.is_float_like() || op == BinOp::Div;

    if use_float {
        let a = left.as_f64()?;
        let b = right.as_f64()?;
        let result = match op {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => {
                if b == 0.0 {
                    return Err(WorkerError::sandbox("division by zero"));
                }
                a / b
            }
            BinOp::FloorDiv => {
                if b == 0.0 {
                    return Err(WorkerError::sandbox("division by zero"));
                }
                (a / b).floor()
            }
            BinOp::Mod => {
                if b == 0.0 {
                    return Err(WorkerError::sandbox("modulo by zero"));
                }
                a.rem_euclid(b)
            }
            BinOp::Pow => a.powf(b),
        };
        Ok(Value::Float(result))
    } else {
        let a = left.as_int()?;
        let b = right.as_int()?;
        let result = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::FloorDiv => {
                if b == 0 {
                    return Err(WorkerError::sandbox("division by zero"));
                }
                Some(a.div_euclid(b))
            }
            BinOp::Mod => {
                if b == 0 {
                    return Err(WorkerError::sandbox("modulo by zero"));
                }
                Some(a.rem_euclid(b))
            }
            BinOp::Pow => u32::try_from(b).ok().map(|exp| a.pow(exp)),
            BinOp::Div => unreachable!("Div always takes the float path"),
        };
        result
            .map(Value::Int)
            .ok_or_else(|| WorkerError::sandbox("integer overflow"))
    }
}

fn apply_unaryop(op: UnaryOp, operand: &Value) -> Result<Value, WorkerError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Neg => match operand {
            Value::Int(n) => Ok(Value::Int(-n)),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => Err(WorkerError::sandbox(format!(
                "bad operand type for unary -: {}",
                other.type_name()
            ))),
        },
        UnaryOp::Pos => match operand {
            Value::Int(_) | Value::Float(_) => Ok(operand.clone()),
            other => Err(WorkerError::sandbox(format!(
                "bad operand type for unary +: {}",
                other.type_name()
            ))),
        },
    }
}

fn apply_cmpop(op: CmpOp, left: &Value, right: &Value) -> Result<bool, WorkerError> {
    match op {
        CmpOp::Eq => Ok(left.values_equal(right)),
        CmpOp::NotEq => Ok(!left.values_equal(right)),
        CmpOp::Lt => Ok(left.compare(right)?.is_lt()),
        CmpOp::LtE => Ok(left.compare(right)?.is_le()),
        CmpOp::Gt => Ok(left.compare(right)?.is_gt()),
        CmpOp::GtE => Ok(left.compare(right)?.is_ge()),
        CmpOp::In => Ok(contains(right, left)?),
        CmpOp::NotIn => Ok(!contains(right, left)?),
        // This value model has no notion of object identity distinct from
        // equality, so `is`/`is not` fall back to value equality. That
        // matches the idioms root models actually emit (`x is None`,
        // `x is not None`, `x is True`).
        CmpOp::Is => Ok(left.values_equal(right)),
        CmpOp::IsNot => Ok(!left.values_equal(right)),
    }
}

fn contains(container: &Value, needle: &Value) -> Result<bool, WorkerError> {
    match container {
        Value::Str(s) => {
            let needle = needle.as_str()?;
            Ok(s.contains(needle.as_str()))
        }
        Value::List(items) => Ok(items.borrow().iter().any(|v| v.values_equal(needle))),
        Value::Tuple(items) => Ok(items.iter().any(|v| v.values_equal(needle))),
        Value::Set(items) => Ok(items.borrow().iter().any(|v| v.values_equal(needle))),
        Value::Dict(pairs) => Ok(pairs.borrow().iter().any(|(k, _)| k.values_equal(needle))),
        other => Err(WorkerError::sandbox(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn get_subscript(container: &Value, index: &Value) -> Result<Value, WorkerError> {
    match container {
        Value::List(items) => {
            let items = items.borrow();
            let idx = normalize_index(index.as_int()?, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Tuple(items) => {
            let idx = normalize_index(index.as_int()?, items.len())?;
            Ok(items[idx].clone())
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let idx = normalize_index(index.as_int()?, chars.len())?;
            Ok(Value::str(chars[idx].to_string()))
        }
        Value::Dict(pairs) => pairs
            .borrow()
            .iter()
            .find(|(k, _)| k.values_equal(index))
            .map(|(_, v)| v.clone())
            .ok_or_else(|| WorkerError::sandbox(format!("key not found: {}", index.repr()))),
        other => Err(WorkerError::sandbox(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn normalize_index(index: i64, len: usize) -> Result<usize, WorkerError> {
    let len_i = len as i64;
    let resolved = if index < 0 { index + len_i } else { index };
    if resolved < 0 || resolved >= len_i {
        Err(WorkerError::sandbox("index out of range"))
    } else {
        Ok(resolved as usize)
    }
}

fn get_slice(
    container: &Value,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Value, WorkerError> {
    let step = step.unwrap_or(1);
    if step != 1 {
        return Err(WorkerError::sandbox("slice step other than 1 is not supported"));
    }

    match container {
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (lo, hi) = slice_bounds(start, stop, chars.len());
            Ok(Value::str(chars[lo..hi].iter().collect::<String>()))
        }
        Value::List(items) => {
            let items = items.borrow();
            let (lo, hi) = slice_bounds(start, stop, items.len());
            Ok(Value::list(items[lo..hi].to_vec()))
        }
        Value::Tuple(items) => {
            let (lo, hi) = slice_bounds(start, stop, items.len());
            Ok(Value::Tuple(Rc::new(items[lo..hi].to_vec())))
        }
        other => Err(WorkerError::sandbox(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

/// Clamps Python-style (possibly negative, possibly out-of-range) slice
/// bounds to a valid `[lo, hi]` range within `len`.
fn slice_bounds(start: Option<i64>, stop: Option<i64>, len: usize) -> (usize, usize) {
    let len_i = len as i64;
    let clamp = |value: i64| -> i64 {
        let resolved = if value < 0 { value + len_i } else { value };
        resolved.clamp(0, len_i)
    };
    let lo = start.map_or(0, clamp);
    let hi = stop.map_or(len_i, clamp);
    if hi < lo {
        (lo as usize, lo as usize)
    } else {
        (lo as usize, hi as usize)
    }
}

fn assign_subscript(container: &Value, index: &Value, value: Value) -> Result<(), WorkerError> {
    match container {
        Value::List(items) => {
            let mut items = items.borrow_mut();
            let idx = normalize_index(index.as_int()?, items.len())?;
            items[idx] = value;
            Ok(())
        }
        Value::Dict(pairs) => {
            let mut pairs = pairs.borrow_mut();
            if let Some(entry) = pairs.iter_mut().find(|(k, _)| k.values_equal(index)) {
                entry.1 = value;
            } else {
                pairs.push((index.clone(), value));
            }
            Ok(())
        }
        other => Err(WorkerError::sandbox(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// `print` is special-cased in `eval_call` (rather than routed through
/// `call_builtin`) so it can reach this buffer.
impl<'a> Interpreter<'a> {
    fn write_stdout(&mut self, text: &str) {
        self.stdout.push_str(text);
        self.stdout.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::runtime::SandboxRuntime;
    use crate::sandbox::parser::parse;

    async fn run(source: &str) -> ExecutionOutcome {
        let module = parse(source).unwrap_or_else(|e| panic!("parse failed: {e}"));
        let mut runtime = SandboxRuntime::new_for_test();
        execute(&module, &mut runtime).await.unwrap_or_else(|e| panic!("execute failed: {e}"))
    }

    #[tokio::test]
    async fn test_execute_arithmetic_and_print() {
        let outcome = run("x = 1 + 2\nprint(x)\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "3");
    }

    #[tokio::test]
    async fn test_execute_for_loop_accumulates() {
        let outcome = run("total = 0\nfor i in [1, 2, 3]:\n    total += i\nprint(total)\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "6");
    }

    #[tokio::test]
    async fn test_execute_function_call() {
        let outcome = run("def double(x):\n    return x * 2\nprint(double(5))\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "10");
    }

    #[tokio::test]
    async fn test_execute_list_comprehension() {
        let outcome = run("y = [x * x for x in [1, 2, 3] if x > 1]\nprint(y)\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "[4, 9]");
    }

    #[tokio::test]
    async fn test_execute_fstring() {
        let outcome = run("n = 7\nprint(f\"n={n}\")\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "n=7");
    }

    #[tokio::test]
    async fn test_execute_is_none_and_is_not_none() {
        let outcome = run("x = None\nprint(x is None)\nprint(x is not None)\n").await;
        assert_eq!(outcome.stdout_preview.trim(), "True\nFalse");
    }

    #[tokio::test]
    async fn test_execute_division_by_zero_is_sandbox_error() {
        let module = parse("x = 1 / 0\n").unwrap_or_else(|e| panic!("parse failed: {e}"));
        let mut runtime = SandboxRuntime::new_for_test();
        let result = execute(&module, &mut runtime).await;
        assert!(matches!(result, Err(WorkerError::SandboxViolation { .. })));
    }
}
