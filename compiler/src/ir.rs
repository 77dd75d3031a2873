// ir.rs — Statement and expression IR for pipeline loop nests.
//
// A tagged-variant tree describing buffer allocations (`realize`), the loop
// nests that fill and read them, and the synchronization constructs that
// storage folding emits. Rewrites are pure functions over this tree (see
// `visit.rs`); nothing here carries mutable state.
//
// Preconditions: none (data-only module).
// Postconditions: `Display` output re-parses (via `parser::parse`) to an
//   equal tree.
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::ops;

// ── Expressions ─────────────────────────────────────────────────────────────

/// Scalar type of a variable. Handles are opaque runtime pointers (buffer
/// storage, semaphores) and never take part in index arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Int,
    Handle,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Floor division (Euclidean for positive divisors).
    Div,
    /// Euclidean remainder: never negative for a non-zero divisor.
    Mod,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

/// Whether a call reads a pipeline buffer or invokes runtime code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallKind {
    /// Read of a buffer produced by a pipeline stage.
    Func,
    /// Call into runtime library code outside the compiler's control.
    Extern,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
    pub kind: CallKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    Str(String),
    Var(Var),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Select(Box<Expr>, Box<Expr>, Box<Expr>),
    /// Branch-prediction hint; semantically the identity.
    Likely(Box<Expr>),
    Call(Call),
}

impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Int(v)
    }

    pub fn var(name: impl Into<String>) -> Self {
        Expr::Var(Var {
            name: name.into(),
            ty: Type::Int,
        })
    }

    pub fn handle(name: impl Into<String>) -> Self {
        Expr::Var(Var {
            name: name.into(),
            ty: Type::Handle,
        })
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::Str(s.into())
    }

    pub fn bin(op: BinOp, a: Expr, b: Expr) -> Self {
        Expr::Bin(op, Box::new(a), Box::new(b))
    }

    pub fn cmp(op: CmpOp, a: Expr, b: Expr) -> Self {
        Expr::Cmp(op, Box::new(a), Box::new(b))
    }

    pub fn min(a: Expr, b: Expr) -> Self {
        Self::bin(BinOp::Min, a, b)
    }

    pub fn max(a: Expr, b: Expr) -> Self {
        Self::bin(BinOp::Max, a, b)
    }

    pub fn lt(a: Expr, b: Expr) -> Self {
        Self::cmp(CmpOp::Lt, a, b)
    }

    pub fn le(a: Expr, b: Expr) -> Self {
        Self::cmp(CmpOp::Le, a, b)
    }

    pub fn gt(a: Expr, b: Expr) -> Self {
        Self::cmp(CmpOp::Gt, a, b)
    }

    pub fn ge(a: Expr, b: Expr) -> Self {
        Self::cmp(CmpOp::Ge, a, b)
    }

    pub fn and(a: Expr, b: Expr) -> Self {
        Expr::And(Box::new(a), Box::new(b))
    }

    pub fn or(a: Expr, b: Expr) -> Self {
        Expr::Or(Box::new(a), Box::new(b))
    }

    pub fn not(a: Expr) -> Self {
        Expr::Not(Box::new(a))
    }

    pub fn select(cond: Expr, t: Expr, f: Expr) -> Self {
        Expr::Select(Box::new(cond), Box::new(t), Box::new(f))
    }

    pub fn likely(a: Expr) -> Self {
        Expr::Likely(Box::new(a))
    }

    /// A read of `buffer` at the given indices.
    pub fn read(buffer: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            name: buffer.into(),
            args,
            kind: CallKind::Func,
        })
    }

    pub fn call_extern(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call(Call {
            name: name.into(),
            args,
            kind: CallKind::Extern,
        })
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// True for integer and boolean literals.
    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Int(_) | Expr::Bool(_))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Int(1))
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::Int(v)
    }
}

impl ops::Add for Expr {
    type Output = Expr;
    fn add(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Add, self, rhs)
    }
}

impl ops::Sub for Expr {
    type Output = Expr;
    fn sub(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Sub, self, rhs)
    }
}

impl ops::Mul for Expr {
    type Output = Expr;
    fn mul(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Mul, self, rhs)
    }
}

impl ops::Div for Expr {
    type Output = Expr;
    fn div(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Div, self, rhs)
    }
}

impl ops::Rem for Expr {
    type Output = Expr;
    fn rem(self, rhs: Expr) -> Expr {
        Expr::bin(BinOp::Mod, self, rhs)
    }
}

// ── Statements ──────────────────────────────────────────────────────────────

/// Loop kind. Only serial and unrolled loops execute iterations in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForKind {
    Serial,
    Unrolled,
    Parallel,
    Vectorized,
}

impl ForKind {
    pub fn is_ordered(self) -> bool {
        matches!(self, ForKind::Serial | ForKind::Unrolled)
    }

    fn keyword(self) -> &'static str {
        match self {
            ForKind::Serial => "for",
            ForKind::Unrolled => "unrolled",
            ForKind::Parallel => "parallel",
            ForKind::Vectorized => "vectorized",
        }
    }
}

/// `let name = value in { body }`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LetStmt {
    pub name: String,
    pub value: Expr,
    pub body: Box<Stmt>,
}

/// Loop over `[min, min + extent - 1]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct For {
    pub name: String,
    pub min: Expr,
    pub extent: Expr,
    pub kind: ForKind,
    pub body: Box<Stmt>,
}

impl For {
    /// Inclusive upper end of the iteration range.
    pub fn max(&self) -> Expr {
        self.min.clone() + self.extent.clone() - Expr::int(1)
    }
}

/// Marks the production (`produce f`) or consumption (`consume f`) of a
/// buffer's values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProducerConsumer {
    pub name: String,
    pub is_producer: bool,
    pub body: Box<Stmt>,
}

/// Write of `value` into `name` at `args`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Provide {
    pub name: String,
    pub args: Vec<Expr>,
    pub value: Expr,
}

/// Half-open range `[min, min + extent)` of one allocated dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

impl Range {
    pub fn new(min: Expr, extent: Expr) -> Self {
        Self { min, extent }
    }
}

/// Allocation scope of a buffer: storage for `bounds` is live inside `body`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Realize {
    pub name: String,
    pub bounds: Vec<Range>,
    pub body: Box<Stmt>,
}

/// Blocks until `count` slots of `semaphore` are available, takes them and
/// runs `body`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Acquire {
    pub semaphore: Expr,
    pub count: Expr,
    pub body: Box<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    Let(LetStmt),
    For(For),
    ProducerConsumer(ProducerConsumer),
    Provide(Provide),
    Realize(Realize),
    Block(Vec<Stmt>),
    /// Halts the pipeline by evaluating `message` when `condition` is false.
    Assert { condition: Expr, message: Expr },
    Evaluate(Expr),
    Acquire(Acquire),
}

impl Stmt {
    /// Sequence two statements, flattening nested blocks.
    pub fn block(first: Stmt, rest: Stmt) -> Stmt {
        let mut stmts = Vec::new();
        for s in [first, rest] {
            match s {
                Stmt::Block(inner) => stmts.extend(inner),
                other => stmts.push(other),
            }
        }
        if stmts.len() == 1 {
            stmts.pop().unwrap_or(Stmt::Block(Vec::new()))
        } else {
            Stmt::Block(stmts)
        }
    }

    pub fn assert(condition: Expr, message: Expr) -> Stmt {
        Stmt::Assert { condition, message }
    }

    pub fn let_in(name: impl Into<String>, value: Expr, body: Stmt) -> Stmt {
        Stmt::Let(LetStmt {
            name: name.into(),
            value,
            body: Box::new(body),
        })
    }

    pub fn for_loop(
        name: impl Into<String>,
        min: Expr,
        extent: Expr,
        kind: ForKind,
        body: Stmt,
    ) -> Stmt {
        Stmt::For(For {
            name: name.into(),
            min,
            extent,
            kind,
            body: Box::new(body),
        })
    }

    pub fn produce(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::ProducerConsumer(ProducerConsumer {
            name: name.into(),
            is_producer: true,
            body: Box::new(body),
        })
    }

    pub fn consume(name: impl Into<String>, body: Stmt) -> Stmt {
        Stmt::ProducerConsumer(ProducerConsumer {
            name: name.into(),
            is_producer: false,
            body: Box::new(body),
        })
    }

    pub fn provide(name: impl Into<String>, args: Vec<Expr>, value: Expr) -> Stmt {
        Stmt::Provide(Provide {
            name: name.into(),
            args,
            value,
        })
    }

    pub fn realize(name: impl Into<String>, bounds: Vec<Range>, body: Stmt) -> Stmt {
        Stmt::Realize(Realize {
            name: name.into(),
            bounds,
            body: Box::new(body),
        })
    }

    pub fn acquire(semaphore: Expr, count: Expr, body: Stmt) -> Stmt {
        Stmt::Acquire(Acquire {
            semaphore,
            count,
            body: Box::new(body),
        })
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

// Binding strength used to decide where parentheses are needed.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_CMP: u8 = 3;
const PREC_ADD: u8 = 4;
const PREC_MUL: u8 = 5;
const PREC_UNARY: u8 = 6;
const PREC_ATOM: u8 = 7;

fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::Int(v) if *v < 0 => PREC_UNARY,
        Expr::Or(..) => PREC_OR,
        Expr::And(..) => PREC_AND,
        Expr::Cmp(..) => PREC_CMP,
        Expr::Bin(BinOp::Add | BinOp::Sub, ..) => PREC_ADD,
        Expr::Bin(BinOp::Mul | BinOp::Div | BinOp::Mod, ..) => PREC_MUL,
        Expr::Not(_) => PREC_UNARY,
        _ => PREC_ATOM,
    }
}

fn fmt_operand(f: &mut fmt::Formatter<'_>, e: &Expr, min_prec: u8) -> fmt::Result {
    if precedence(e) < min_prec {
        write!(f, "({e})")
    } else {
        write!(f, "{e}")
    }
}

fn fmt_infix(f: &mut fmt::Formatter<'_>, op: &str, prec: u8, a: &Expr, b: &Expr) -> fmt::Result {
    fmt_operand(f, a, prec)?;
    write!(f, " {op} ")?;
    // Left-associative: the right operand must bind strictly tighter.
    fmt_operand(f, b, prec + 1)
}

fn fmt_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{v}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Str(s) => write!(f, "{s:?}"),
            Expr::Var(v) => match v.ty {
                Type::Int => write!(f, "{}", v.name),
                Type::Handle => write!(f, "&{}", v.name),
            },
            Expr::Bin(op, a, b) => match op {
                BinOp::Add => fmt_infix(f, "+", PREC_ADD, a, b),
                BinOp::Sub => fmt_infix(f, "-", PREC_ADD, a, b),
                BinOp::Mul => fmt_infix(f, "*", PREC_MUL, a, b),
                BinOp::Div => fmt_infix(f, "/", PREC_MUL, a, b),
                BinOp::Mod => fmt_infix(f, "%", PREC_MUL, a, b),
                BinOp::Min => write!(f, "min({a}, {b})"),
                BinOp::Max => write!(f, "max({a}, {b})"),
            },
            Expr::Cmp(op, a, b) => {
                let sym = match op {
                    CmpOp::Lt => "<",
                    CmpOp::Le => "<=",
                    CmpOp::Gt => ">",
                    CmpOp::Ge => ">=",
                    CmpOp::Eq => "==",
                    CmpOp::Ne => "!=",
                };
                fmt_infix(f, sym, PREC_CMP, a, b)
            }
            Expr::And(a, b) => fmt_infix(f, "&&", PREC_AND, a, b),
            Expr::Or(a, b) => fmt_infix(f, "||", PREC_OR, a, b),
            Expr::Not(a) => {
                write!(f, "!")?;
                fmt_operand(f, a, PREC_ATOM)
            }
            Expr::Select(c, t, e) => write!(f, "select({c}, {t}, {e})"),
            Expr::Likely(a) => write!(f, "likely({a})"),
            Expr::Call(call) => {
                if call.kind == CallKind::Extern {
                    write!(f, "extern ")?;
                }
                write!(f, "{}(", call.name)?;
                fmt_args(f, &call.args)?;
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_stmt(f, self, 0)
    }
}

fn fmt_stmt(f: &mut fmt::Formatter<'_>, s: &Stmt, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match s {
        Stmt::Let(l) => {
            writeln!(f, "{pad}let {} = {} in {{", l.name, l.value)?;
            fmt_stmt(f, &l.body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::For(op) => {
            writeln!(
                f,
                "{pad}{} ({}, {}, {}) {{",
                op.kind.keyword(),
                op.name,
                op.min,
                op.extent
            )?;
            fmt_stmt(f, &op.body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::ProducerConsumer(pc) => {
            let kw = if pc.is_producer { "produce" } else { "consume" };
            writeln!(f, "{pad}{kw} {} {{", pc.name)?;
            fmt_stmt(f, &pc.body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::Provide(p) => {
            write!(f, "{pad}{}(", p.name)?;
            fmt_args(f, &p.args)?;
            writeln!(f, ") = {};", p.value)
        }
        Stmt::Realize(r) => {
            write!(f, "{pad}realize {}(", r.name)?;
            for (i, b) in r.bounds.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "[{}, {}]", b.min, b.extent)?;
            }
            writeln!(f, ") {{")?;
            fmt_stmt(f, &r.body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                fmt_stmt(f, s, depth)?;
            }
            Ok(())
        }
        Stmt::Assert { condition, message } => {
            writeln!(f, "{pad}assert({condition}, {message});")
        }
        Stmt::Evaluate(e) => writeln!(f, "{pad}eval {e};"),
        Stmt::Acquire(a) => {
            writeln!(f, "{pad}acquire ({}, {}) {{", a.semaphore, a.count)?;
            fmt_stmt(f, &a.body, depth + 1)?;
            writeln!(f, "{pad}}}")
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
