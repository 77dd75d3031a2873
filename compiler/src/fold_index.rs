// fold_index.rs — Rewrite accesses of one buffer to circular addressing.
//
// Every read `f(.., idx, ..)` and write `f(.., idx, ..) = v` of the folded
// buffer has its index at the folded dimension replaced by `idx % factor`
// (or `0` when the factor is 1). Other dimensions and other buffers are left
// alone, and subtrees without an access come back unchanged.
//
// Preconditions: `factor` is positive.
// Postconditions: `sites` counts every rewritten access.
// Failure modes: an access with too few indices (InternalError::ShortAccess).
// Side effects: none.

use crate::ir::*;
use crate::storage_fold::InternalError;
use crate::visit::{rewrite_expr_children, rewrite_exprs, Rewriter};

struct FoldStorageOfFunction<'a> {
    buffer: &'a str,
    dim: usize,
    factor: &'a Expr,
    sites: usize,
    error: Option<InternalError>,
}

impl FoldStorageOfFunction<'_> {
    fn fold_args(&mut self, args: Vec<Expr>) -> Vec<Expr> {
        if args.len() <= self.dim {
            self.error.get_or_insert(InternalError::ShortAccess {
                buffer: self.buffer.to_string(),
                dim: self.dim,
                arity: args.len(),
            });
            return args;
        }
        self.sites += 1;
        let mut args = args;
        args[self.dim] = if self.factor.is_one() {
            Expr::int(0)
        } else {
            args[self.dim].clone() % self.factor.clone()
        };
        args
    }
}

impl Rewriter for FoldStorageOfFunction<'_> {
    fn rewrite_expr(&mut self, e: &Expr) -> Option<Expr> {
        match e {
            Expr::Call(call) if call.kind == CallKind::Func && call.name == self.buffer => {
                let args = rewrite_exprs(self, &call.args).unwrap_or_else(|| call.args.clone());
                Some(Expr::Call(Call {
                    name: call.name.clone(),
                    args: self.fold_args(args),
                    kind: call.kind,
                }))
            }
            _ => rewrite_expr_children(self, e),
        }
    }

    fn rewrite_stmt(&mut self, s: &Stmt) -> Option<Stmt> {
        match s {
            Stmt::Provide(p) if p.name == self.buffer => {
                let args = rewrite_exprs(self, &p.args).unwrap_or_else(|| p.args.clone());
                let value = self.expr(&p.value);
                Some(Stmt::Provide(Provide {
                    name: p.name.clone(),
                    args: self.fold_args(args),
                    value,
                }))
            }
            _ => crate::visit::rewrite_stmt_children(self, s),
        }
    }
}

/// Fold dimension `dim` of `buffer` by `factor` throughout `s`.
///
/// Returns the rewritten statement and the number of accesses rewritten.
pub fn fold_storage_of_function(
    s: &Stmt,
    buffer: &str,
    dim: usize,
    factor: &Expr,
) -> Result<(Stmt, usize), InternalError> {
    let mut folder = FoldStorageOfFunction {
        buffer,
        dim,
        factor,
        sites: 0,
        error: None,
    };
    let out = folder.stmt(s);
    match folder.error {
        Some(e) => Err(e),
        None => Ok((out, folder.sites)),
    }
}
