// visit.rs — Generic read-only walks and sharing-preserving rewrites over IR.
//
// `Visitor` walks every node. `Rewriter` returns `Option<T>` from each hook,
// where `None` means "unchanged": callers keep the original subtree instead
// of rebuilding it, so a no-op rewrite hands back the input tree untouched.
//
// Preconditions: none.
// Postconditions: `Rewriter` defaults rebuild a node only when a child changed.
// Failure modes: none.
// Side effects: none (beyond whatever state an implementor keeps).

use crate::ir::*;

// ── Visitor ─────────────────────────────────────────────────────────────────

pub trait Visitor {
    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e)
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        walk_stmt(self, s)
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, e: &Expr) {
    match e {
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Var(_) => {}
        Expr::Bin(_, a, b) | Expr::Cmp(_, a, b) | Expr::And(a, b) | Expr::Or(a, b) => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        Expr::Not(a) | Expr::Likely(a) => v.visit_expr(a),
        Expr::Select(c, t, f) => {
            v.visit_expr(c);
            v.visit_expr(t);
            v.visit_expr(f);
        }
        Expr::Call(call) => {
            for a in &call.args {
                v.visit_expr(a);
            }
        }
    }
}

pub fn walk_stmt<V: Visitor + ?Sized>(v: &mut V, s: &Stmt) {
    match s {
        Stmt::Let(l) => {
            v.visit_expr(&l.value);
            v.visit_stmt(&l.body);
        }
        Stmt::For(op) => {
            v.visit_expr(&op.min);
            v.visit_expr(&op.extent);
            v.visit_stmt(&op.body);
        }
        Stmt::ProducerConsumer(pc) => v.visit_stmt(&pc.body),
        Stmt::Provide(p) => {
            v.visit_expr(&p.value);
            for a in &p.args {
                v.visit_expr(a);
            }
        }
        Stmt::Realize(r) => {
            for b in &r.bounds {
                v.visit_expr(&b.min);
                v.visit_expr(&b.extent);
            }
            v.visit_stmt(&r.body);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                v.visit_stmt(s);
            }
        }
        Stmt::Assert { condition, message } => {
            v.visit_expr(condition);
            v.visit_expr(message);
        }
        Stmt::Evaluate(e) => v.visit_expr(e),
        Stmt::Acquire(a) => {
            v.visit_expr(&a.semaphore);
            v.visit_expr(&a.count);
            v.visit_stmt(&a.body);
        }
    }
}

// ── Rewriter ────────────────────────────────────────────────────────────────

pub trait Rewriter {
    fn rewrite_expr(&mut self, e: &Expr) -> Option<Expr> {
        rewrite_expr_children(self, e)
    }

    fn rewrite_stmt(&mut self, s: &Stmt) -> Option<Stmt> {
        rewrite_stmt_children(self, s)
    }

    /// Rewrite `e`, falling back to a copy of the original.
    fn expr(&mut self, e: &Expr) -> Expr {
        self.rewrite_expr(e).unwrap_or_else(|| e.clone())
    }

    /// Rewrite `s`, falling back to a copy of the original.
    fn stmt(&mut self, s: &Stmt) -> Stmt {
        self.rewrite_stmt(s).unwrap_or_else(|| s.clone())
    }
}

fn keep_expr(new: Option<Expr>, old: &Expr) -> Box<Expr> {
    Box::new(new.unwrap_or_else(|| old.clone()))
}

fn keep_stmt(new: Option<Stmt>, old: &Stmt) -> Box<Stmt> {
    Box::new(new.unwrap_or_else(|| old.clone()))
}

/// Rewrite a list of expressions; `None` when every element is unchanged.
pub fn rewrite_exprs<R: Rewriter + ?Sized>(r: &mut R, es: &[Expr]) -> Option<Vec<Expr>> {
    let new: Vec<Option<Expr>> = es.iter().map(|e| r.rewrite_expr(e)).collect();
    if new.iter().all(Option::is_none) {
        return None;
    }
    Some(
        new.into_iter()
            .zip(es)
            .map(|(n, old)| n.unwrap_or_else(|| old.clone()))
            .collect(),
    )
}

pub fn rewrite_expr_children<R: Rewriter + ?Sized>(r: &mut R, e: &Expr) -> Option<Expr> {
    match e {
        Expr::Int(_) | Expr::Bool(_) | Expr::Str(_) | Expr::Var(_) => None,
        Expr::Bin(op, a, b) => {
            let (na, nb) = (r.rewrite_expr(a), r.rewrite_expr(b));
            if na.is_none() && nb.is_none() {
                return None;
            }
            Some(Expr::Bin(*op, keep_expr(na, a), keep_expr(nb, b)))
        }
        Expr::Cmp(op, a, b) => {
            let (na, nb) = (r.rewrite_expr(a), r.rewrite_expr(b));
            if na.is_none() && nb.is_none() {
                return None;
            }
            Some(Expr::Cmp(*op, keep_expr(na, a), keep_expr(nb, b)))
        }
        Expr::And(a, b) => {
            let (na, nb) = (r.rewrite_expr(a), r.rewrite_expr(b));
            if na.is_none() && nb.is_none() {
                return None;
            }
            Some(Expr::And(keep_expr(na, a), keep_expr(nb, b)))
        }
        Expr::Or(a, b) => {
            let (na, nb) = (r.rewrite_expr(a), r.rewrite_expr(b));
            if na.is_none() && nb.is_none() {
                return None;
            }
            Some(Expr::Or(keep_expr(na, a), keep_expr(nb, b)))
        }
        Expr::Not(a) => r.rewrite_expr(a).map(|n| Expr::Not(Box::new(n))),
        Expr::Likely(a) => r.rewrite_expr(a).map(|n| Expr::Likely(Box::new(n))),
        Expr::Select(c, t, f) => {
            let (nc, nt, nf) = (r.rewrite_expr(c), r.rewrite_expr(t), r.rewrite_expr(f));
            if nc.is_none() && nt.is_none() && nf.is_none() {
                return None;
            }
            Some(Expr::Select(
                keep_expr(nc, c),
                keep_expr(nt, t),
                keep_expr(nf, f),
            ))
        }
        Expr::Call(call) => rewrite_exprs(r, &call.args).map(|args| {
            Expr::Call(Call {
                name: call.name.clone(),
                args,
                kind: call.kind,
            })
        }),
    }
}

pub fn rewrite_stmt_children<R: Rewriter + ?Sized>(r: &mut R, s: &Stmt) -> Option<Stmt> {
    match s {
        Stmt::Let(l) => {
            let (nv, nb) = (r.rewrite_expr(&l.value), r.rewrite_stmt(&l.body));
            if nv.is_none() && nb.is_none() {
                return None;
            }
            Some(Stmt::Let(LetStmt {
                name: l.name.clone(),
                value: nv.unwrap_or_else(|| l.value.clone()),
                body: keep_stmt(nb, &l.body),
            }))
        }
        Stmt::For(op) => {
            let nmin = r.rewrite_expr(&op.min);
            let next = r.rewrite_expr(&op.extent);
            let nbody = r.rewrite_stmt(&op.body);
            if nmin.is_none() && next.is_none() && nbody.is_none() {
                return None;
            }
            Some(Stmt::For(For {
                name: op.name.clone(),
                min: nmin.unwrap_or_else(|| op.min.clone()),
                extent: next.unwrap_or_else(|| op.extent.clone()),
                kind: op.kind,
                body: keep_stmt(nbody, &op.body),
            }))
        }
        Stmt::ProducerConsumer(pc) => r.rewrite_stmt(&pc.body).map(|body| {
            Stmt::ProducerConsumer(ProducerConsumer {
                name: pc.name.clone(),
                is_producer: pc.is_producer,
                body: Box::new(body),
            })
        }),
        Stmt::Provide(p) => {
            let nv = r.rewrite_expr(&p.value);
            let na = rewrite_exprs(r, &p.args);
            if nv.is_none() && na.is_none() {
                return None;
            }
            Some(Stmt::Provide(Provide {
                name: p.name.clone(),
                args: na.unwrap_or_else(|| p.args.clone()),
                value: nv.unwrap_or_else(|| p.value.clone()),
            }))
        }
        Stmt::Realize(real) => {
            let mut changed = false;
            let bounds: Vec<Range> = real
                .bounds
                .iter()
                .map(|b| {
                    let (nmin, next) = (r.rewrite_expr(&b.min), r.rewrite_expr(&b.extent));
                    changed |= nmin.is_some() || next.is_some();
                    Range {
                        min: nmin.unwrap_or_else(|| b.min.clone()),
                        extent: next.unwrap_or_else(|| b.extent.clone()),
                    }
                })
                .collect();
            let nbody = r.rewrite_stmt(&real.body);
            if !changed && nbody.is_none() {
                return None;
            }
            Some(Stmt::Realize(Realize {
                name: real.name.clone(),
                bounds,
                body: keep_stmt(nbody, &real.body),
            }))
        }
        Stmt::Block(stmts) => {
            let new: Vec<Option<Stmt>> = stmts.iter().map(|s| r.rewrite_stmt(s)).collect();
            if new.iter().all(Option::is_none) {
                return None;
            }
            Some(Stmt::Block(
                new.into_iter()
                    .zip(stmts)
                    .map(|(n, old)| n.unwrap_or_else(|| old.clone()))
                    .collect(),
            ))
        }
        Stmt::Assert { condition, message } => {
            let (nc, nm) = (r.rewrite_expr(condition), r.rewrite_expr(message));
            if nc.is_none() && nm.is_none() {
                return None;
            }
            Some(Stmt::Assert {
                condition: nc.unwrap_or_else(|| condition.clone()),
                message: nm.unwrap_or_else(|| message.clone()),
            })
        }
        Stmt::Evaluate(e) => r.rewrite_expr(e).map(Stmt::Evaluate),
        Stmt::Acquire(a) => {
            let ns = r.rewrite_expr(&a.semaphore);
            let nc = r.rewrite_expr(&a.count);
            let nb = r.rewrite_stmt(&a.body);
            if ns.is_none() && nc.is_none() && nb.is_none() {
                return None;
            }
            Some(Stmt::Acquire(Acquire {
                semaphore: ns.unwrap_or_else(|| a.semaphore.clone()),
                count: nc.unwrap_or_else(|| a.count.clone()),
                body: keep_stmt(nb, &a.body),
            }))
        }
    }
}

// ── Substitution ────────────────────────────────────────────────────────────

struct Substitute<'a> {
    name: &'a str,
    value: &'a Expr,
}

impl Rewriter for Substitute<'_> {
    fn rewrite_expr(&mut self, e: &Expr) -> Option<Expr> {
        match e {
            Expr::Var(v) if v.name == self.name => Some(self.value.clone()),
            _ => rewrite_expr_children(self, e),
        }
    }
}

/// Replace every occurrence of variable `name` in `e` with `value`.
pub fn substitute(name: &str, value: &Expr, e: &Expr) -> Expr {
    Substitute { name, value }.expr(e)
}

// ── Variable use ────────────────────────────────────────────────────────────

struct UsesVar<'a> {
    name: &'a str,
    found: bool,
}

impl Visitor for UsesVar<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        if self.found {
            return;
        }
        match e {
            Expr::Var(v) if v.name == self.name => self.found = true,
            _ => walk_expr(self, e),
        }
    }
}

/// Does `e` mention variable `name`?
pub fn expr_uses_var(e: &Expr, name: &str) -> bool {
    let mut v = UsesVar { name, found: false };
    v.visit_expr(e);
    v.found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitute_replaces_every_use() {
        let i = Expr::var("i");
        let e = Expr::max(i.clone() + Expr::int(2), i.clone() * Expr::int(3));
        let out = substitute("i", &(i.clone() + Expr::int(1)), &e);
        assert_eq!(out.to_string(), "max(i + 1 + 2, (i + 1) * 3)");
    }

    #[test]
    fn substitute_leaves_other_vars() {
        let e = Expr::var("j") + Expr::int(1);
        assert_eq!(substitute("i", &Expr::int(0), &e), e);
    }

    #[test]
    fn uses_var_looks_inside_calls() {
        let e = Expr::read("f", vec![Expr::var("x") + Expr::var("i")]);
        assert!(expr_uses_var(&e, "i"));
        assert!(!expr_uses_var(&e, "y"));
    }

    struct Noop;
    impl Rewriter for Noop {}

    #[test]
    fn noop_rewrite_reports_unchanged() {
        let s = Stmt::for_loop(
            "i",
            Expr::int(0),
            Expr::int(4),
            ForKind::Serial,
            Stmt::provide("f", vec![Expr::var("i")], Expr::int(1)),
        );
        assert!(Noop.rewrite_stmt(&s).is_none());
    }
}
