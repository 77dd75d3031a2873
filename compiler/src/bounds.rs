// bounds.rs — Interval bounds inference over loop nests.
//
// Answers "which region of buffer `f` does this statement write / read" as a
// per-dimension box of symbolic intervals. Loop variables and `let` names
// bound inside the statement are replaced by their ranges; names bound
// outside stay symbolic.
//
// Preconditions: none.
// Postconditions: every returned bound is simplified; `None` bounds mean
//   unbounded in that direction.
// Failure modes: none (unanalyzable indices yield unbounded intervals).
// Side effects: none.

use std::collections::HashMap;

use crate::ir::*;
use crate::simplify::{can_prove, const_lower_bound, const_upper_bound, simplify};
use crate::visit::{walk_expr, walk_stmt, Visitor};

// ── Scope ───────────────────────────────────────────────────────────────────

/// Stack-disciplined name → value bindings with shadowing.
#[derive(Debug, Clone)]
pub struct Scope<T> {
    table: HashMap<String, Vec<T>>,
}

impl<T> Default for Scope<T> {
    fn default() -> Self {
        Self {
            table: HashMap::new(),
        }
    }
}

impl<T> Scope<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: T) {
        self.table.entry(name.to_string()).or_default().push(value);
    }

    pub fn pop(&mut self, name: &str) {
        if let Some(stack) = self.table.get_mut(name) {
            stack.pop();
            if stack.is_empty() {
                self.table.remove(name);
            }
        }
    }

    /// Innermost binding of `name`.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.table.get(name).and_then(|stack| stack.last())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Run `f` with `name` bound to `value`; the binding is removed however
    /// `f` returns.
    pub fn with_binding<R>(&mut self, name: &str, value: T, f: impl FnOnce(&mut Self) -> R) -> R {
        self.push(name, value);
        let result = f(self);
        self.pop(name);
        result
    }
}

// ── Intervals ───────────────────────────────────────────────────────────────

/// Inclusive `[min, max]`; a missing bound is infinite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    pub min: Option<Expr>,
    pub max: Option<Expr>,
}

/// Per-dimension region of a buffer.
pub type Region = Vec<Interval>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upper,
    Lower,
}

impl Interval {
    pub fn new(min: Expr, max: Expr) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn point(e: Expr) -> Self {
        Self::new(e.clone(), e)
    }

    pub fn everything() -> Self {
        Self {
            min: None,
            max: None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.min.is_some() && self.max.is_some()
    }

    fn as_point(&self) -> Option<&Expr> {
        match (&self.min, &self.max) {
            (Some(a), Some(b)) if a == b => Some(a),
            _ => None,
        }
    }

    /// Smallest interval containing both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval {
            min: lift(&self.min, &other.min, Expr::min),
            max: lift(&self.max, &other.max, Expr::max),
        }
    }
}

fn lift(a: &Option<Expr>, b: &Option<Expr>, f: impl Fn(Expr, Expr) -> Expr) -> Option<Expr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(simplify(&f(a.clone(), b.clone()))),
        _ => None,
    }
}

/// Combine bounds where an infinite side is absorbed rather than
/// propagated (the max of a `min`, the min of a `max`).
fn lift_absorbing(
    a: &Option<Expr>,
    b: &Option<Expr>,
    f: impl Fn(Expr, Expr) -> Expr,
) -> Option<Expr> {
    match (a, b) {
        (Some(a), Some(b)) => Some(simplify(&f(a.clone(), b.clone()))),
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    }
}

fn scale(iv: &Interval, k: i64) -> Interval {
    let mul = |e: &Option<Expr>| e.as_ref().map(|e| simplify(&(e.clone() * Expr::int(k))));
    if k >= 0 {
        Interval {
            min: mul(&iv.min),
            max: mul(&iv.max),
        }
    } else {
        Interval {
            min: mul(&iv.max),
            max: mul(&iv.min),
        }
    }
}

fn divide(iv: &Interval, k: i64) -> Interval {
    let div = |e: &Option<Expr>| e.as_ref().map(|e| simplify(&(e.clone() / Expr::int(k))));
    if k > 0 {
        Interval {
            min: div(&iv.min),
            max: div(&iv.max),
        }
    } else {
        Interval {
            min: div(&iv.max),
            max: div(&iv.min),
        }
    }
}

/// Range of values `e` takes when each scoped name ranges over its interval.
pub fn bounds_of_expr(e: &Expr, scope: &Scope<Interval>) -> Interval {
    match e {
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) => Interval::point(e.clone()),
        Expr::Var(v) => match scope.get(&v.name) {
            Some(iv) => iv.clone(),
            None => Interval::point(e.clone()),
        },
        Expr::Bin(op, a, b) => {
            let (ia, ib) = (bounds_of_expr(a, scope), bounds_of_expr(b, scope));
            if let (Some(pa), Some(pb)) = (ia.as_point(), ib.as_point()) {
                return Interval::point(simplify(&Expr::bin(*op, pa.clone(), pb.clone())));
            }
            let konst = |iv: &Interval| iv.as_point().and_then(Expr::as_int);
            match op {
                BinOp::Add => Interval {
                    min: lift(&ia.min, &ib.min, |x, y| x + y),
                    max: lift(&ia.max, &ib.max, |x, y| x + y),
                },
                BinOp::Sub => Interval {
                    min: lift(&ia.min, &ib.max, |x, y| x - y),
                    max: lift(&ia.max, &ib.min, |x, y| x - y),
                },
                BinOp::Mul => match (konst(&ia), konst(&ib)) {
                    (_, Some(k)) => scale(&ia, k),
                    (Some(k), _) => scale(&ib, k),
                    _ => Interval::everything(),
                },
                BinOp::Div => match konst(&ib) {
                    Some(k) if k != 0 => divide(&ia, k),
                    _ => Interval::everything(),
                },
                BinOp::Mod => match konst(&ib) {
                    Some(k) if k != 0 => {
                        Interval::new(Expr::int(0), Expr::int(k.saturating_abs() - 1))
                    }
                    _ => Interval::everything(),
                },
                BinOp::Min => Interval {
                    min: lift(&ia.min, &ib.min, Expr::min),
                    max: lift_absorbing(&ia.max, &ib.max, Expr::min),
                },
                BinOp::Max => Interval {
                    min: lift_absorbing(&ia.min, &ib.min, Expr::max),
                    max: lift(&ia.max, &ib.max, Expr::max),
                },
            }
        }
        Expr::Select(_, t, f) => bounds_of_expr(t, scope).union(&bounds_of_expr(f, scope)),
        Expr::Likely(a) => bounds_of_expr(a, scope),
        Expr::Cmp(..) | Expr::And(..) | Expr::Or(..) | Expr::Not(_) | Expr::Call(_) => {
            if mentions_scope(e, scope) {
                Interval::everything()
            } else {
                Interval::point(e.clone())
            }
        }
    }
}

fn mentions_scope(e: &Expr, scope: &Scope<Interval>) -> bool {
    struct Finder<'a> {
        scope: &'a Scope<Interval>,
        found: bool,
    }
    impl Visitor for Finder<'_> {
        fn visit_expr(&mut self, e: &Expr) {
            match e {
                Expr::Var(v) if self.scope.contains(&v.name) => self.found = true,
                _ => walk_expr(self, e),
            }
        }
    }
    let mut f = Finder {
        scope,
        found: false,
    };
    f.visit_expr(e);
    f.found
}

/// Constant bound of `e` in the given direction, with scoped names ranging
/// over their intervals.
pub fn find_constant_bound(e: &Expr, dir: Direction, scope: &Scope<Interval>) -> Option<i64> {
    let e = simplify(e);
    let iv = bounds_of_expr(&e, scope);
    match dir {
        Direction::Upper => {
            let direct = const_upper_bound(&e);
            let scoped = iv.max.as_ref().and_then(const_upper_bound);
            match (direct, scoped) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        }
        Direction::Lower => {
            let direct = const_lower_bound(&e);
            let scoped = iv.min.as_ref().and_then(const_lower_bound);
            match (direct, scoped) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            }
        }
    }
}

// ── Boxes touched by a statement ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Provided,
    Required,
}

struct BoxCollector<'a> {
    buffer: &'a str,
    access: Access,
    scope: Scope<Interval>,
    region: Option<Region>,
}

impl BoxCollector<'_> {
    fn record(&mut self, args: &[Expr]) {
        let site: Region = args
            .iter()
            .map(|a| bounds_of_expr(a, &self.scope))
            .collect();
        self.region = Some(match self.region.take() {
            None => site,
            Some(acc) => box_union(&acc, &site),
        });
    }

    fn in_scope(&mut self, name: &str, iv: Interval, body: &Stmt) {
        self.scope.push(name, iv);
        self.visit_stmt(body);
        self.scope.pop(name);
    }
}

impl Visitor for BoxCollector<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        if let Expr::Call(call) = e {
            if self.access == Access::Required
                && call.kind == CallKind::Func
                && call.name == self.buffer
            {
                self.record(&call.args);
            }
        }
        walk_expr(self, e)
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::For(op) => {
                self.visit_expr(&op.min);
                self.visit_expr(&op.extent);
                let lo = bounds_of_expr(&op.min, &self.scope).min;
                let hi = bounds_of_expr(&simplify(&op.max()), &self.scope).max;
                self.in_scope(&op.name, Interval { min: lo, max: hi }, &op.body);
            }
            Stmt::Let(l) => {
                self.visit_expr(&l.value);
                let iv = bounds_of_expr(&l.value, &self.scope);
                self.in_scope(&l.name, iv, &l.body);
            }
            Stmt::Provide(p) => {
                if self.access == Access::Provided && p.name == self.buffer {
                    self.record(&p.args);
                }
                walk_stmt(self, s)
            }
            _ => walk_stmt(self, s),
        }
    }
}

fn collect_box(s: &Stmt, buffer: &str, access: Access) -> Region {
    let mut c = BoxCollector {
        buffer,
        access,
        scope: Scope::new(),
        region: None,
    };
    c.visit_stmt(s);
    c.region.unwrap_or_default()
}

/// Region of `buffer` written by `s`. Empty when `s` never writes it.
pub fn box_provided(s: &Stmt, buffer: &str) -> Region {
    collect_box(s, buffer, Access::Provided)
}

/// Region of `buffer` read by `s`. Empty when `s` never reads it.
pub fn box_required(s: &Stmt, buffer: &str) -> Region {
    collect_box(s, buffer, Access::Required)
}

/// Per-dimension union. An empty box is the identity.
pub fn box_union(a: &Region, b: &Region) -> Region {
    let n = a.len().max(b.len());
    (0..n)
        .map(|i| match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => x.union(y),
            (Some(x), None) | (None, Some(x)) => x.clone(),
            (None, None) => Interval::everything(),
        })
        .collect()
}

/// Can we prove `outer` covers `inner` in every dimension?
pub fn box_contains(outer: &Region, inner: &Region) -> bool {
    if inner.is_empty() {
        return true;
    }
    if outer.len() != inner.len() {
        return false;
    }
    outer.iter().zip(inner).all(|(o, i)| {
        let lo = match (&o.min, &i.min) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => can_prove(&Expr::le(a.clone(), b.clone())),
        };
        let hi = match (&o.max, &i.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => can_prove(&Expr::ge(a.clone(), b.clone())),
        };
        lo && hi
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
