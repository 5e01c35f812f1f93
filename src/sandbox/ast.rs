//! AST node types for the restricted sandbox language.
//!
//! One variant per allow-listed grammar production (§4.3). There is no
//! node kind for anything on the disallow list (`import`, `with`, `class`,
//! `lambda`, …): those constructs are rejected at parse time rather than
//! represented and then walked away.

/// A parsed program: a sequence of top-level statements.
pub type Module = Vec<Stmt>;

/// A statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// A bare expression evaluated for its side effects.
    ExprStmt(Expr),
    /// `target = value`.
    Assign { target: Target, value: Expr },
    /// `target OP= value`.
    AugAssign {
        target: Target,
        op: BinOp,
        value: Expr,
    },
    /// `if test: body else: orelse`.
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    /// `for target in iter: body`.
    For {
        target: Target,
        iter: Expr,
        body: Vec<Stmt>,
    },
    /// `while test: body`.
    While { test: Expr, body: Vec<Stmt> },
    /// `break`.
    Break,
    /// `continue`.
    Continue,
    /// `pass`.
    Pass,
    /// `def name(params): body` (nesting allowed).
    FunctionDef {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
    /// `return value?`.
    Return(Option<Expr>),
}

/// An assignment/for-loop target.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A plain name binding.
    Name(String),
    /// A tuple-unpacking target, e.g. `k, v`.
    Tuple(Vec<Target>),
    /// A subscript target, e.g. `d[key]`.
    Subscript { value: Box<Expr>, index: Box<Expr> },
}

/// A binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
    /// `**`
    Pow,
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `not`
    Not,
    /// unary `-`
    Neg,
    /// unary `+`
    Pos,
}

/// A boolean (short-circuiting) operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// `and`
    And,
    /// `or`
    Or,
}

/// A comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtE,
    /// `>`
    Gt,
    /// `>=`
    GtE,
    /// `in`
    In,
    /// `not in`
    NotIn,
    /// `is`
    Is,
    /// `is not`
    IsNot,
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Integer literal.
    Int(i64),
    /// Floating-point literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// `None`.
    None,
}

/// A single `for target in iter [if cond]*` clause of a comprehension.
#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    /// Loop target.
    pub target: Target,
    /// Iterable expression.
    pub iter: Expr,
    /// Filtering conditions, all of which must hold.
    pub ifs: Vec<Expr>,
}

/// A keyword argument in a call: `name=value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Keyword {
    /// Argument name.
    pub name: String,
    /// Argument value.
    pub value: Expr,
}

/// A subscript index: either a plain index or a `start:stop:step` slice.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceOrIndex {
    /// `value[index]`.
    Index(Box<Expr>),
    /// `value[start:stop:step]`, any component may be omitted.
    Slice {
        /// Slice start, if given.
        start: Option<Box<Expr>>,
        /// Slice stop, if given.
        stop: Option<Box<Expr>>,
        /// Slice step, if given.
        step: Option<Box<Expr>>,
    },
}

/// A piece of an f-string: literal text or an embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum FStringPart {
    /// Literal text, copied verbatim.
    Literal(String),
    /// `{expr}` embedded in the f-string.
    Expr(Box<Expr>),
}

/// An expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A literal constant.
    Constant(Constant),
    /// A name reference.
    Name(String),
    /// `[a, b, c]`.
    List(Vec<Expr>),
    /// `(a, b, c)`.
    Tuple(Vec<Expr>),
    /// `{a, b, c}`.
    Set(Vec<Expr>),
    /// `{k: v, ...}`.
    Dict(Vec<(Expr, Expr)>),
    /// `value[index]` or `value[start:stop:step]`.
    Subscript {
        /// The subscripted value.
        value: Box<Expr>,
        /// The index or slice.
        slice: Box<SliceOrIndex>,
    },
    /// A binary arithmetic expression.
    BinOp {
        /// Left operand.
        left: Box<Expr>,
        /// Operator.
        op: BinOp,
        /// Right operand.
        right: Box<Expr>,
    },
    /// A unary expression.
    UnaryOp {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// A short-circuiting `and`/`or` chain.
    BoolOp {
        /// Operator.
        op: BoolOp,
        /// Operand chain (evaluated left to right).
        values: Vec<Expr>,
    },
    /// A chained comparison, e.g. `a < b <= c`.
    Compare {
        /// Leftmost operand.
        left: Box<Expr>,
        /// Comparison operators, one per following operand.
        ops: Vec<CmpOp>,
        /// Operands following `left`, one per operator.
        comparators: Vec<Expr>,
    },
    /// `body if test else orelse`.
    IfExp {
        /// Condition.
        test: Box<Expr>,
        /// Value when `test` is truthy.
        body: Box<Expr>,
        /// Value when `test` is falsy.
        orelse: Box<Expr>,
    },
    /// A function or method call.
    Call {
        /// Callee: a [`Expr::Name`] or an [`Expr::Attribute`] (method call).
        func: Box<Expr>,
        /// Positional arguments.
        args: Vec<Expr>,
        /// Keyword arguments.
        keywords: Vec<Keyword>,
    },
    /// `value.attr`.
    ///
    /// Only valid directly under [`Expr::Call::func`]; any other position
    /// is rejected by the validator.
    Attribute { value: Box<Expr>, attr: String },
    /// `[element for ... ]`.
    ListComp {
        /// The yielded element expression.
        element: Box<Expr>,
        /// Loop/filter clauses.
        generators: Vec<Comprehension>,
    },
    /// `{element for ...}`.
    SetComp {
        /// The yielded element expression.
        element: Box<Expr>,
        /// Loop/filter clauses.
        generators: Vec<Comprehension>,
    },
    /// `{key: value for ...}`.
    DictComp {
        /// The yielded key expression.
        key: Box<Expr>,
        /// The yielded value expression.
        value: Box<Expr>,
        /// Loop/filter clauses.
        generators: Vec<Comprehension>,
    },
    /// `(element for ...)` — a generator expression, evaluated eagerly
    /// into a list by this interpreter (no lazy iterators).
    GeneratorExp {
        /// The yielded element expression.
        element: Box<Expr>,
        /// Loop/filter clauses.
        generators: Vec<Comprehension>,
    },
    /// An f-string: `f"...{expr}..."`.
    JoinedStr(Vec<FStringPart>),
}
