// storage_fold.rs — Storage folding over every allocation in a statement.
//
// Visits each `realize` (innermost first), asks the planner to fold the
// buffer across the loops inside it, then shrinks the folded dimensions of
// the allocation to `[0, factor)` and binds any semaphores the planner
// created around it.
//
// Preconditions: none (the driver substitutes constants first; the
//   `storage_folding` entry point does so itself).
// Postconditions: F1-F3 (see `verify_folds`) hold on success.
// Failure modes: explicit folds on buffers whose storage escapes (E0200
//   diagnostics, buffer left untouched); inconsistent folds (InternalError).
// Side effects: none.

use serde::Serialize;

use crate::diag::{codes, Diagnostic};
use crate::id::NameGen;
use crate::ir::*;
use crate::planner::{AttemptStorageFolding, Fold, MAX_AUTO_FOLD};
use crate::probe::{count_producers, is_buffer_special};
use crate::schedule::{Env, Function};
use crate::semaphore::MAKE_SEMAPHORE;
use crate::visit::{rewrite_stmt_children, Rewriter};

/// Compiler-bug class failures; always fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InternalError {
    #[error("fold of {buffer} dimension {dim} is outside its {dims}-dimensional allocation")]
    DimOutOfRange {
        buffer: String,
        dim: usize,
        dims: usize,
    },
    #[error("access to {buffer} has {arity} indices; cannot fold dimension {dim}")]
    ShortAccess {
        buffer: String,
        dim: usize,
        arity: usize,
    },
    #[error("fold of {buffer} dimension {dim} rewrote no accesses")]
    NothingRewritten { buffer: String, dim: usize },
}

/// Semaphore created for an asynchronous fold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemaphoreReport {
    pub name: String,
    pub init: String,
}

/// One applied fold, as shown by `--emit folds`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoldReport {
    pub buffer: String,
    /// Post-order index of the allocation among all `realize` nodes.
    pub allocation: usize,
    pub dim: usize,
    pub axis: String,
    #[serde(rename = "loop")]
    pub loop_var: String,
    pub factor: String,
    pub explicit: bool,
    pub semaphore: Option<SemaphoreReport>,
}

#[derive(Debug)]
pub struct StorageFoldResult {
    pub stmt: Stmt,
    pub folds: Vec<FoldReport>,
    pub diagnostics: Vec<Diagnostic>,
}

struct StorageFolding<'a> {
    env: &'a Env,
    names: NameGen,
    allocations: usize,
    folds: Vec<FoldReport>,
    diagnostics: Vec<Diagnostic>,
    error: Option<InternalError>,
}

impl StorageFolding<'_> {
    fn visit_realize(&mut self, op: &Realize) -> Option<Stmt> {
        let new_body = self.rewrite_stmt(&op.body);
        let allocation = self.allocations;
        self.allocations += 1;
        if self.error.is_some() {
            return None;
        }
        let body = new_body.clone().unwrap_or_else(|| (*op.body).clone());

        let func = self
            .env
            .get(&op.name)
            .cloned()
            .unwrap_or_else(|| Function::new(op.name.clone()));

        let keep = |body: Option<Stmt>| {
            body.map(|body| {
                Stmt::Realize(Realize {
                    name: op.name.clone(),
                    bounds: op.bounds.clone(),
                    body: Box::new(body),
                })
            })
        };

        if is_buffer_special(&Stmt::Realize(op.clone()), &op.name) {
            for dim in &func.schedule.storage_dims {
                if dim.fold_factor.is_some() {
                    self.diagnostics.push(
                        Diagnostic::error(
                            codes::E0200,
                            format!(
                                "dimension {} of {} cannot be folded because its storage is accessed directly",
                                dim.var, op.name
                            ),
                        )
                        .with_hint(format!(
                            "remove the fold_factor, or stop passing &{}.buffer to external code",
                            op.name
                        )),
                    );
                }
            }
            log::debug!("not folding {}: its buffer is used directly", op.name);
            return keep(new_body);
        }

        let explicit_only = count_producers(&body, &op.name) != 1;
        log::debug!("attempting to fold {} (explicit_only = {explicit_only})", op.name);
        let mut planner = AttemptStorageFolding::new(&func, explicit_only, &mut self.names);
        let folded_body = planner.rewrite_stmt(&body);
        if let Some(e) = planner.error.take() {
            self.error = Some(e);
            return None;
        }
        let folds = std::mem::take(&mut planner.folds);

        if folds.is_empty() {
            return match folded_body {
                Some(b) => keep(Some(b)),
                None => keep(new_body),
            };
        }

        let mut bounds = op.bounds.clone();
        for fold in &folds {
            if fold.dim >= bounds.len() {
                self.error = Some(InternalError::DimOutOfRange {
                    buffer: op.name.clone(),
                    dim: fold.dim,
                    dims: bounds.len(),
                });
                return None;
            }
            if fold.sites == 0 {
                self.error = Some(InternalError::NothingRewritten {
                    buffer: op.name.clone(),
                    dim: fold.dim,
                });
                return None;
            }
            bounds[fold.dim] = Range::new(Expr::int(0), fold.factor.clone());
        }

        let mut stmt = Stmt::realize(op.name.clone(), bounds, folded_body.unwrap_or(body));
        for fold in &folds {
            if let Some(sema) = &fold.semaphore {
                let make = Expr::call_extern(MAKE_SEMAPHORE, vec![sema.init.clone()]);
                stmt = Stmt::let_in(sema.name.clone(), make, stmt);
            }
        }

        self.folds
            .extend(folds.iter().map(|f| report(&func, allocation, f)));
        Some(stmt)
    }
}

impl Rewriter for StorageFolding<'_> {
    fn rewrite_stmt(&mut self, s: &Stmt) -> Option<Stmt> {
        if self.error.is_some() {
            return None;
        }
        match s {
            Stmt::Realize(op) => self.visit_realize(op),
            _ => rewrite_stmt_children(self, s),
        }
    }
}

fn report(func: &Function, allocation: usize, fold: &Fold) -> FoldReport {
    FoldReport {
        buffer: func.name.clone(),
        allocation,
        dim: fold.dim,
        axis: func
            .schedule
            .storage_dims
            .get(fold.dim)
            .map(|d| d.var.clone())
            .unwrap_or_else(|| format!("d{}", fold.dim)),
        loop_var: fold.loop_var.clone(),
        factor: fold.factor.to_string(),
        explicit: fold.explicit,
        semaphore: fold.semaphore.as_ref().map(|s| SemaphoreReport {
            name: s.name.clone(),
            init: s.init.to_string(),
        }),
    }
}

/// Fold every allocation in `s` whose constants are already substituted.
pub fn fold_realizations(s: &Stmt, env: &Env) -> Result<StorageFoldResult, InternalError> {
    let mut pass = StorageFolding {
        env,
        names: NameGen::new(),
        allocations: 0,
        folds: Vec::new(),
        diagnostics: Vec::new(),
        error: None,
    };
    let stmt = pass.stmt(s);
    if let Some(e) = pass.error {
        return Err(e);
    }
    Ok(StorageFoldResult {
        stmt,
        folds: pass.folds,
        diagnostics: pass.diagnostics,
    })
}

/// Substitute constants, then fold every allocation in `s`.
pub fn storage_folding(s: &Stmt, env: &Env) -> Result<StorageFoldResult, InternalError> {
    let s = crate::const_prop::substitute_in_constants(s);
    fold_realizations(&s, env)
}

// ── Verification ─────────────────────────────────────────────────────────────

/// Machine-checkable evidence for storage folding postconditions (F1-F3).
#[derive(Debug, Clone)]
pub struct FoldCert {
    /// F1: Every folded dimension's allocation bounds are `[0, factor)`.
    pub f1_bounds_reset: bool,
    /// F2: Every automatic factor is a power of two no larger than 1024.
    pub f2_auto_factors_pow2: bool,
    /// F3: No allocation axis is folded more than once.
    pub f3_one_fold_per_axis: bool,
}

impl crate::pass::StageCert for FoldCert {
    fn all_pass(&self) -> bool {
        self.f1_bounds_reset && self.f2_auto_factors_pow2 && self.f3_one_fold_per_axis
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("F1_bounds_reset", self.f1_bounds_reset),
            ("F2_auto_factors_pow2", self.f2_auto_factors_pow2),
            ("F3_one_fold_per_axis", self.f3_one_fold_per_axis),
        ]
    }
}

/// Allocations of `s` in post-order, matching `FoldReport::allocation`.
fn collect_allocations<'s>(s: &'s Stmt, out: &mut Vec<&'s Realize>) {
    match s {
        Stmt::Let(l) => collect_allocations(&l.body, out),
        Stmt::For(op) => collect_allocations(&op.body, out),
        Stmt::ProducerConsumer(pc) => collect_allocations(&pc.body, out),
        Stmt::Acquire(a) => collect_allocations(&a.body, out),
        Stmt::Realize(r) => {
            collect_allocations(&r.body, out);
            out.push(r);
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                collect_allocations(s, out);
            }
        }
        Stmt::Provide(_) | Stmt::Assert { .. } | Stmt::Evaluate(_) => {}
    }
}

/// Verify storage folding postconditions on the pass output.
pub fn verify_folds(result: &StorageFoldResult) -> FoldCert {
    let mut realizes = Vec::new();
    collect_allocations(&result.stmt, &mut realizes);

    let f1 = result.folds.iter().all(|f| {
        realizes.get(f.allocation).is_some_and(|r| {
            r.name == f.buffer
                && r.bounds.get(f.dim).is_some_and(|b| {
                    b.min == Expr::int(0) && b.extent.to_string() == f.factor
                })
        })
    });

    let f2 = result.folds.iter().filter(|f| !f.explicit).all(|f| {
        f.factor
            .parse::<i64>()
            .is_ok_and(|n| n > 0 && n <= MAX_AUTO_FOLD && n.count_ones() == 1)
    });

    let mut seen = std::collections::HashSet::new();
    let f3 = result.folds.iter().all(|f| seen.insert((f.allocation, f.dim)));

    FoldCert {
        f1_bounds_reset: f1,
        f2_auto_factors_pow2: f2,
        f3_one_fold_per_axis: f3,
    }
}
