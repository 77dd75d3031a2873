// simplify.rs — Canonicalizing simplifier and constant-bound prover.
//
// Integer arithmetic is normalized through a linear form (sum of atoms with
// constant coefficients plus a constant). `min`/`max` and comparisons are
// decided by bounding the difference of their operands: a `min` atom is
// bounded above by either branch, a `max` atom by both, a `% k` atom by
// `[0, k-1]`.
//
// Preconditions: none.
// Postconditions: `simplify` is idempotent; it never changes the value of an
//   expression under Euclidean division semantics.
// Failure modes: none; arithmetic overflow leaves the node unsimplified.
// Side effects: none.

use std::collections::BTreeMap;

use crate::ir::*;

/// Maximum nesting of min/max/select atoms explored when bounding.
const BOUND_DEPTH: u32 = 8;

// ── Linear form ─────────────────────────────────────────────────────────────

/// `Σ coeff·atom + constant`, atoms ordered by `Expr`'s `Ord`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Linear {
    pub terms: BTreeMap<Expr, i64>,
    pub constant: i64,
}

impl Linear {
    pub fn constant(c: i64) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant: c,
        }
    }

    fn atom(e: Expr) -> Self {
        let mut terms = BTreeMap::new();
        terms.insert(e, 1);
        Self { terms, constant: 0 }
    }

    /// Decompose an (already simplified) expression. `None` on overflow.
    pub fn from_expr(e: &Expr) -> Option<Self> {
        match e {
            Expr::Int(c) => Some(Self::constant(*c)),
            Expr::Bin(BinOp::Add, a, b) => Self::from_expr(a)?.add(&Self::from_expr(b)?),
            Expr::Bin(BinOp::Sub, a, b) => Self::from_expr(a)?.add(&Self::from_expr(b)?.scale(-1)?),
            Expr::Bin(BinOp::Mul, a, b) => match (a.as_ref(), b.as_ref()) {
                (_, Expr::Int(c)) => Self::from_expr(a)?.scale(*c),
                (Expr::Int(c), _) => Self::from_expr(b)?.scale(*c),
                _ => Some(Self::atom(e.clone())),
            },
            _ => Some(Self::atom(e.clone())),
        }
    }

    pub fn as_const(&self) -> Option<i64> {
        self.terms.is_empty().then_some(self.constant)
    }

    pub fn add(&self, other: &Linear) -> Option<Self> {
        let mut out = self.clone();
        out.constant = out.constant.checked_add(other.constant)?;
        for (atom, c) in &other.terms {
            let slot = out.terms.entry(atom.clone()).or_insert(0);
            *slot = slot.checked_add(*c)?;
            if *slot == 0 {
                out.terms.remove(atom);
            }
        }
        Some(out)
    }

    pub fn sub(&self, other: &Linear) -> Option<Self> {
        self.add(&other.scale(-1)?)
    }

    pub fn scale(&self, k: i64) -> Option<Self> {
        if k == 0 {
            return Some(Self::constant(0));
        }
        let mut terms = BTreeMap::new();
        for (atom, c) in &self.terms {
            terms.insert(atom.clone(), c.checked_mul(k)?);
        }
        Some(Self {
            terms,
            constant: self.constant.checked_mul(k)?,
        })
    }

    fn without(&self, atom: &Expr) -> Self {
        let mut out = self.clone();
        out.terms.remove(atom);
        out
    }

    /// Rebuild a canonical expression: positive terms first, then negative
    /// terms as subtractions, constant last.
    pub fn to_expr(&self) -> Expr {
        let mut acc: Option<Expr> = None;
        let mut constant_used = false;

        for (atom, &c) in self.terms.iter().filter(|(_, c)| **c > 0) {
            let term = if c == 1 {
                atom.clone()
            } else {
                atom.clone() * Expr::int(c)
            };
            acc = Some(match acc {
                None => term,
                Some(prev) => prev + term,
            });
        }

        let has_negative = self.terms.values().any(|&c| c < 0);
        if acc.is_none() && has_negative && self.constant != 0 {
            acc = Some(Expr::int(self.constant));
            constant_used = true;
        }

        for (atom, &c) in self.terms.iter().filter(|(_, c)| **c < 0) {
            acc = Some(match acc {
                None => atom.clone() * Expr::int(c),
                Some(prev) => match c.checked_neg() {
                    Some(1) => prev - atom.clone(),
                    Some(n) => prev - atom.clone() * Expr::int(n),
                    None => prev + atom.clone() * Expr::int(c),
                },
            });
        }

        match acc {
            None => Expr::int(self.constant),
            Some(e) if constant_used || self.constant == 0 => e,
            Some(e) => match self.constant {
                k if k > 0 => e + Expr::int(k),
                k => match k.checked_neg() {
                    Some(n) => e - Expr::int(n),
                    None => e + Expr::int(k),
                },
            },
        }
    }
}

// ── Constant bounds ─────────────────────────────────────────────────────────

fn linear_of(e: &Expr) -> Option<Linear> {
    Linear::from_expr(e)
}

fn replace_atom(l: &Linear, atom: &Expr, coeff: i64, with: &Expr) -> Option<Linear> {
    l.without(atom).add(&linear_of(with)?.scale(coeff)?)
}

/// Constant upper bound of a linear form, if one can be derived.
pub fn upper_const(l: &Linear) -> Option<i64> {
    upper_const_at(l, BOUND_DEPTH)
}

/// Constant lower bound of a linear form, if one can be derived.
pub fn lower_const(l: &Linear) -> Option<i64> {
    upper_const(&l.scale(-1)?)?.checked_neg()
}

fn upper_const_at(l: &Linear, depth: u32) -> Option<i64> {
    if l.terms.is_empty() {
        return Some(l.constant);
    }
    if depth == 0 {
        return None;
    }
    // Expand a boundable atom first; plain variables may cancel against a
    // branch of a min/max.
    let (atom, c) = l
        .terms
        .iter()
        .find(|(a, _)| is_boundable(a))
        .map(|(a, c)| (a.clone(), *c))?;
    match &atom {
        // min(x, y) ≤ x and ≤ y: either branch bounds it from above.
        Expr::Bin(BinOp::Min, x, y) if c > 0 => either(l, &atom, c, x, y, depth),
        Expr::Bin(BinOp::Max, x, y) if c < 0 => either(l, &atom, c, x, y, depth),
        // max(x, y) needs both branches bounded.
        Expr::Bin(BinOp::Max, x, y) | Expr::Bin(BinOp::Min, x, y) => {
            both(l, &atom, c, x, y, depth)
        }
        Expr::Select(_, t, f) => both(l, &atom, c, t, f, depth),
        Expr::Likely(x) => upper_const_at(&replace_atom(l, &atom, c, x)?, depth - 1),
        Expr::Bin(BinOp::Mod, _, k) => match k.as_ref() {
            Expr::Int(k) if *k > 0 => {
                let worst = if c > 0 { c.checked_mul(k - 1)? } else { 0 };
                let rest = l.without(&atom).add(&Linear::constant(worst))?;
                upper_const_at(&rest, depth - 1)
            }
            _ => None,
        },
        _ => None,
    }
}

fn is_boundable(e: &Expr) -> bool {
    match e {
        Expr::Bin(BinOp::Min | BinOp::Max, ..) | Expr::Select(..) | Expr::Likely(_) => true,
        Expr::Bin(BinOp::Mod, _, k) => matches!(k.as_ref(), Expr::Int(k) if *k > 0),
        _ => false,
    }
}

fn either(l: &Linear, atom: &Expr, c: i64, x: &Expr, y: &Expr, depth: u32) -> Option<i64> {
    let bx = replace_atom(l, atom, c, x).and_then(|r| upper_const_at(&r, depth - 1));
    let by = replace_atom(l, atom, c, y).and_then(|r| upper_const_at(&r, depth - 1));
    match (bx, by) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn both(l: &Linear, atom: &Expr, c: i64, x: &Expr, y: &Expr, depth: u32) -> Option<i64> {
    let bx = upper_const_at(&replace_atom(l, atom, c, x)?, depth - 1)?;
    let by = upper_const_at(&replace_atom(l, atom, c, y)?, depth - 1)?;
    Some(bx.max(by))
}

/// Constant upper bound of an arbitrary expression (no variable ranges).
pub fn const_upper_bound(e: &Expr) -> Option<i64> {
    upper_const(&linear_of(&simplify(e))?)
}

/// Constant lower bound of an arbitrary expression (no variable ranges).
pub fn const_lower_bound(e: &Expr) -> Option<i64> {
    lower_const(&linear_of(&simplify(e))?)
}

// ── Simplifier ──────────────────────────────────────────────────────────────

/// Simplify an expression to canonical form.
pub fn simplify(e: &Expr) -> Expr {
    match e {
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Var(_) => e.clone(),
        Expr::Bin(op, a, b) => simplify_bin(*op, simplify(a), simplify(b)),
        Expr::Cmp(op, a, b) => simplify_cmp(*op, simplify(a), simplify(b)),
        Expr::And(a, b) => match (simplify(a), simplify(b)) {
            (Expr::Bool(false), _) | (_, Expr::Bool(false)) => Expr::Bool(false),
            (Expr::Bool(true), x) | (x, Expr::Bool(true)) => x,
            (x, y) if x == y => x,
            (x, y) => Expr::and(x, y),
        },
        Expr::Or(a, b) => match (simplify(a), simplify(b)) {
            (Expr::Bool(true), _) | (_, Expr::Bool(true)) => Expr::Bool(true),
            (Expr::Bool(false), x) | (x, Expr::Bool(false)) => x,
            (x, y) if x == y => x,
            (x, y) => Expr::or(x, y),
        },
        Expr::Not(a) => match simplify(a) {
            Expr::Bool(b) => Expr::Bool(!b),
            Expr::Not(inner) => *inner,
            Expr::Cmp(op, x, y) => simplify_cmp(negate(op), *x, *y),
            other => Expr::not(other),
        },
        Expr::Select(c, t, f) => {
            let (t, f) = (simplify(t), simplify(f));
            match simplify(c) {
                Expr::Bool(true) => t,
                Expr::Bool(false) => f,
                _ if t == f => t,
                c => Expr::select(c, t, f),
            }
        }
        Expr::Likely(a) => match simplify(a) {
            c if c.is_const() => c,
            other => Expr::likely(other),
        },
        Expr::Call(call) => Expr::Call(Call {
            name: call.name.clone(),
            args: call.args.iter().map(simplify).collect(),
            kind: call.kind,
        }),
    }
}

/// True only if `e` simplifies to the literal `true`.
pub fn can_prove(e: &Expr) -> bool {
    simplify(e) == Expr::Bool(true)
}

fn negate(op: CmpOp) -> CmpOp {
    match op {
        CmpOp::Lt => CmpOp::Ge,
        CmpOp::Le => CmpOp::Gt,
        CmpOp::Gt => CmpOp::Le,
        CmpOp::Ge => CmpOp::Lt,
        CmpOp::Eq => CmpOp::Ne,
        CmpOp::Ne => CmpOp::Eq,
    }
}

fn simplify_bin(op: BinOp, a: Expr, b: Expr) -> Expr {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul => {
            let e = Expr::bin(op, a, b);
            match linear_of(&e) {
                Some(l) => l.to_expr(),
                None => e,
            }
        }
        BinOp::Div => simplify_div(a, b),
        BinOp::Mod => simplify_mod(a, b),
        BinOp::Min | BinOp::Max => simplify_min_max(op, a, b),
    }
}

fn simplify_div(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Int(x), Expr::Int(y)) => match x.checked_div_euclid(*y) {
            Some(q) => Expr::int(q),
            None => a / b,
        },
        (_, Expr::Int(1)) => a,
        (_, Expr::Int(k)) if *k > 0 => {
            let exact = linear_of(&a).filter(|l| {
                l.constant % k == 0 && l.terms.values().all(|c| c % k == 0)
            });
            match exact {
                Some(l) => {
                    let mut q = l;
                    q.constant /= k;
                    for c in q.terms.values_mut() {
                        *c /= k;
                    }
                    q.to_expr()
                }
                None => a / b,
            }
        }
        _ => a / b,
    }
}

fn simplify_mod(a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Int(x), Expr::Int(y)) => match x.checked_rem_euclid(*y) {
            Some(r) => Expr::int(r),
            None => a % b,
        },
        (_, Expr::Int(1)) => Expr::int(0),
        (_, Expr::Int(k)) if *k > 0 => {
            // Terms that are multiples of k vanish.
            match linear_of(&a).filter(|l| l.terms.values().all(|c| c % k == 0)) {
                Some(l) => Expr::int(l.constant.rem_euclid(*k)),
                None => a % b,
            }
        }
        _ => a % b,
    }
}

fn simplify_min_max(op: BinOp, a: Expr, b: Expr) -> Expr {
    let is_min = op == BinOp::Min;
    if let (Expr::Int(x), Expr::Int(y)) = (&a, &b) {
        return Expr::int(if is_min { *x.min(y) } else { *x.max(y) });
    }
    if a == b {
        return a;
    }
    // Constants go on the right.
    let (a, b) = if a.as_int().is_some() { (b, a) } else { (a, b) };

    if let Some(d) = linear_of(&a).zip(linear_of(&b)).and_then(|(la, lb)| la.sub(&lb)) {
        if upper_const(&d).is_some_and(|u| u <= 0) {
            return if is_min { a } else { b };
        }
        if lower_const(&d).is_some_and(|l| l >= 0) {
            return if is_min { b } else { a };
        }
    }

    // min(min(x, c1), c2) -> min(x, min(c1, c2))
    if let (Expr::Bin(inner, x, c1), Expr::Int(c2)) = (&a, &b) {
        if *inner == op {
            if let Expr::Int(c1) = c1.as_ref() {
                let c = if is_min { (*c1).min(*c2) } else { (*c1).max(*c2) };
                return Expr::bin(op, (**x).clone(), Expr::int(c));
            }
        }
    }
    Expr::bin(op, a, b)
}

fn simplify_cmp(op: CmpOp, a: Expr, b: Expr) -> Expr {
    if let (Expr::Str(x), Expr::Str(y)) = (&a, &b) {
        match op {
            CmpOp::Eq => return Expr::Bool(x == y),
            CmpOp::Ne => return Expr::Bool(x != y),
            _ => {}
        }
    }
    let diff = linear_of(&a).zip(linear_of(&b)).and_then(|(la, lb)| la.sub(&lb));
    if let Some(d) = diff {
        let ub = upper_const(&d);
        let lb = lower_const(&d);
        let above = |k: i64| ub.is_some_and(|u| u <= k);
        let below = |k: i64| lb.is_some_and(|l| l >= k);
        let decided = match op {
            CmpOp::Lt if above(-1) => Some(true),
            CmpOp::Lt if below(0) => Some(false),
            CmpOp::Le if above(0) => Some(true),
            CmpOp::Le if below(1) => Some(false),
            CmpOp::Gt if below(1) => Some(true),
            CmpOp::Gt if above(0) => Some(false),
            CmpOp::Ge if below(0) => Some(true),
            CmpOp::Ge if above(-1) => Some(false),
            CmpOp::Eq if above(0) && below(0) => Some(true),
            CmpOp::Eq if above(-1) || below(1) => Some(false),
            CmpOp::Ne if above(0) && below(0) => Some(false),
            CmpOp::Ne if above(-1) || below(1) => Some(true),
            _ => None,
        };
        if let Some(v) = decided {
            return Expr::Bool(v);
        }
    }
    Expr::cmp(op, a, b)
}

// ── Tests ───────────────────────────────────────────────────────────────────
