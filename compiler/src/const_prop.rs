// const_prop.rs — Substitute compile-time-constant `let` bindings.
//
// Runs before storage folding so bounds that are constant through a `let`
// (`let w = 3 in { .. f(i + w) .. }`) are visible to the planner as
// integers.
//
// Preconditions: none.
// Postconditions: no `Var` use of a constant-bound name remains inside its
//   binding's body; every `let` value is simplified.
// Failure modes: none.
// Side effects: none.

use crate::bounds::Scope;
use crate::ir::*;
use crate::simplify::simplify;
use crate::visit::{rewrite_expr_children, rewrite_stmt_children, Rewriter};

struct SubstituteInConstants {
    /// `None` marks a non-constant binding shadowing an outer constant.
    scope: Scope<Option<Expr>>,
}

impl Rewriter for SubstituteInConstants {
    fn rewrite_expr(&mut self, e: &Expr) -> Option<Expr> {
        match e {
            Expr::Var(v) => self.scope.get(&v.name).cloned().flatten(),
            _ => rewrite_expr_children(self, e),
        }
    }

    fn rewrite_stmt(&mut self, s: &Stmt) -> Option<Stmt> {
        let l = match s {
            Stmt::Let(l) => l,
            Stmt::For(op) => return self.rewrite_for(op),
            _ => return rewrite_stmt_children(self, s),
        };

        let value = simplify(&self.expr(&l.value));
        let binding = value.as_int().map(|_| value.clone());
        self.scope.push(&l.name, binding);
        let new_body = self.rewrite_stmt(&l.body);
        self.scope.pop(&l.name);

        if new_body.is_none() && value == l.value {
            return None;
        }
        Some(Stmt::Let(LetStmt {
            name: l.name.clone(),
            value,
            body: Box::new(new_body.unwrap_or_else(|| (*l.body).clone())),
        }))
    }
}

impl SubstituteInConstants {
    /// The loop variable shadows any outer constant of the same name.
    fn rewrite_for(&mut self, op: &For) -> Option<Stmt> {
        let min = self.rewrite_expr(&op.min);
        let extent = self.rewrite_expr(&op.extent);
        self.scope.push(&op.name, None);
        let body = self.rewrite_stmt(&op.body);
        self.scope.pop(&op.name);

        if min.is_none() && extent.is_none() && body.is_none() {
            return None;
        }
        Some(Stmt::For(For {
            name: op.name.clone(),
            min: min.unwrap_or_else(|| op.min.clone()),
            extent: extent.unwrap_or_else(|| op.extent.clone()),
            kind: op.kind,
            body: Box::new(body.unwrap_or_else(|| (*op.body).clone())),
        }))
    }
}

/// Replace uses of constant `let` bindings by their values.
pub fn substitute_in_constants(s: &Stmt) -> Stmt {
    SubstituteInConstants {
        scope: Scope::new(),
    }
    .stmt(s)
}
