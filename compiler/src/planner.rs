// planner.rs — Decide where and by how much one buffer's storage can fold.
//
// Walks the loop nest inside one allocation of a buffer, outermost loop
// first. At each serial or unrolled loop it looks at the region of the
// buffer one iteration touches and, axis by axis from the outermost storage
// dimension, asks whether that region slides monotonically with the loop
// variable. If it does and its extent has a small constant bound (or the
// schedule declares a factor), the axis is folded to a circular window.
//
// Preconditions: constants have been substituted into the statement.
// Postconditions: `folds` lists every axis rewritten, in discovery order.
// Failure modes: index rewriting may hit an access with too few indices
//   (recorded in `error`, checked by the caller).
// Side effects: draws semaphore names from the shared `NameGen`.

use std::ops::ControlFlow;

use crate::bounds::{
    box_contains, box_provided, box_required, box_union, find_constant_bound, Direction, Interval,
    Region, Scope,
};
use crate::fold_index::fold_storage_of_function;
use crate::id::NameGen;
use crate::ir::*;
use crate::monotonic::{is_monotonic, Monotonic};
use crate::schedule::{Function, StorageDim};
use crate::semaphore::{synthesize, FoldWindow, Semaphore};
use crate::simplify::{can_prove, simplify};
use crate::storage_fold::InternalError;
use crate::visit::{expr_uses_var, rewrite_stmt_children, substitute, Rewriter};

/// Largest automatically chosen fold factor.
pub const MAX_AUTO_FOLD: i64 = 1024;

/// Runtime error raised when a declared fold direction does not hold.
pub const ERROR_BAD_FOLD: &str = "pipeline_error_bad_fold";
/// Runtime error raised when a window outgrows a declared fold factor.
pub const ERROR_FACTOR_TOO_SMALL: &str = "pipeline_error_fold_factor_too_small";

/// One folded storage axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Fold {
    pub dim: usize,
    pub factor: Expr,
    /// Present when the producer is asynchronous.
    pub semaphore: Option<Semaphore>,
    /// The factor came from the schedule rather than a proof.
    pub explicit: bool,
    /// Loop whose iterations slide the window.
    pub loop_var: String,
    /// Accesses rewritten to circular addressing.
    pub sites: usize,
}

/// Smallest power of two `>= n` (and at least 1).
pub fn next_power_of_two(n: i64) -> i64 {
    (n.max(1) as u64).next_power_of_two() as i64
}

/// Folds one buffer's storage across the loops of a statement.
pub struct AttemptStorageFolding<'a> {
    func: &'a Function,
    explicit_only: bool,
    names: &'a mut NameGen,
    pub folds: Vec<Fold>,
    pub error: Option<InternalError>,
}

/// Loop-invariant facts for one axis under consideration.
struct Axis<'a> {
    dim: usize,
    storage: StorageDim,
    min: Expr,
    max: Expr,
    provided: &'a Interval,
    required: &'a Interval,
}

impl<'a> AttemptStorageFolding<'a> {
    pub fn new(func: &'a Function, explicit_only: bool, names: &'a mut NameGen) -> Self {
        Self {
            func,
            explicit_only,
            names,
            folds: Vec::new(),
            error: None,
        }
    }

    fn is_async(&self) -> bool {
        self.func.schedule.is_async
    }

    fn storage_dim(&self, dim: usize) -> StorageDim {
        self.func
            .schedule
            .storage_dims
            .get(dim)
            .cloned()
            .unwrap_or_else(|| StorageDim::new(format!("d{dim}")))
    }

    fn visit_for(&mut self, op: &For) -> Option<Stmt> {
        if !op.kind.is_ordered() {
            // Iterations may run concurrently.
            return None;
        }

        let func = self.func;
        let name = func.name.as_str();
        let provided = simplify_region(box_provided(&op.body, name));
        let required = simplify_region(box_required(&op.body, name));
        let window = box_union(&provided, &required);

        let unbounded = Interval::everything();
        let search = (0..window.len())
            .rev()
            .try_fold((*op.body).clone(), |body, dim| {
                let (Some(min), Some(max)) = (window[dim].min.clone(), window[dim].max.clone())
                else {
                    log::debug!("{name}: dimension {dim} unbounded in loop {}", op.name);
                    return ControlFlow::Continue(body);
                };
                let axis = Axis {
                    dim,
                    storage: self.storage_dim(dim),
                    min,
                    max,
                    provided: provided.get(dim).unwrap_or(&unbounded),
                    required: required.get(dim).unwrap_or(&unbounded),
                };
                self.attempt_axis(op, &axis, body)
            });

        let body = match search {
            ControlFlow::Break(body) => return rebuild(op, body),
            ControlFlow::Continue(body) => body,
        };

        // Without values flowing between iterations, inner loops may fold
        // independently.
        let body = if box_contains(&provided, &required) {
            self.stmt(&body)
        } else {
            body
        };
        rebuild(op, body)
    }

    /// Try to fold one axis at loop `op`. `Break` ends the search at this
    /// loop.
    fn attempt_axis(&mut self, op: &For, axis: &Axis<'_>, body: Stmt) -> ControlFlow<Stmt, Stmt> {
        let name = self.func.name.clone();
        let var = op.name.as_str();
        let loop_var = Expr::var(var);
        let next = |e: &Expr| substitute(var, &(loop_var.clone() + Expr::int(1)), e);

        let explicit_factor = if expr_uses_var(&axis.min, var) || expr_uses_var(&axis.max, var) {
            axis.storage.fold_factor.clone()
        } else {
            None
        };

        log::debug!(
            "considering folding {name}.{} over loop {var}: min = {}, max = {}",
            axis.storage.var,
            axis.min,
            axis.max
        );

        if self.is_async() && !(axis.provided.is_bounded() && axis.required.is_bounded()) {
            log::debug!("not folding async {name}: slot accounting needs bounded windows");
            return ControlFlow::Continue(body);
        }

        let monotonic = |e: &Option<Expr>, m: Monotonic| {
            e.as_ref().is_some_and(|e| is_monotonic(e, var) == m)
        };

        let (mut forward, mut backward) = (false, false);
        if !self.explicit_only {
            forward = is_monotonic(&axis.min, var) == Monotonic::Increasing;
            backward = is_monotonic(&axis.max, var) == Monotonic::Decreasing;
            if self.is_async() {
                // A producer can never take back slots it already acquired.
                forward &= monotonic(&axis.provided.max, Monotonic::Increasing);
                backward &= monotonic(&axis.provided.min, Monotonic::Decreasing);
            }
        }

        let mut body = body;
        if !forward && !backward {
            let Some(factor) = &explicit_factor else {
                log::debug!("not folding {name}: window not monotonic in {var}");
                return ControlFlow::Continue(body);
            };
            let condition = self.direction_check(axis, &next);
            forward = axis.storage.fold_forward;
            log::debug!("asserting declared direction of {name} fold by {factor}");
            let error = Expr::call_extern(
                ERROR_BAD_FOLD,
                vec![
                    Expr::string(name.clone()),
                    Expr::string(axis.storage.var.clone()),
                    Expr::string(var),
                    loop_var.clone(),
                ],
            );
            body = Stmt::block(Stmt::assert(condition, error), body);
        }

        let extent = simplify(&(axis.max.clone() - axis.min.clone() + Expr::int(1)));
        let factor = match &explicit_factor {
            Some(factor) => {
                let error = Expr::call_extern(
                    ERROR_FACTOR_TOO_SMALL,
                    vec![
                        Expr::string(name.clone()),
                        Expr::string(axis.storage.var.clone()),
                        factor.clone(),
                        Expr::string(var),
                        loop_var.clone(),
                        extent.clone(),
                    ],
                );
                body = Stmt::block(
                    Stmt::assert(Expr::le(extent.clone(), factor.clone()), error),
                    body,
                );
                factor.clone()
            }
            None => {
                let mut scope = Scope::new();
                let range = Interval::new(op.min.clone(), simplify(&op.max()));
                let bound = scope.with_binding(var, range, |scope| {
                    find_constant_bound(&extent, Direction::Upper, scope)
                });
                match bound {
                    Some(b) if b <= MAX_AUTO_FOLD => Expr::int(next_power_of_two(b)),
                    _ => {
                        log::debug!(
                            "not folding {name}: extent {extent} has no constant bound <= {MAX_AUTO_FOLD}"
                        );
                        return ControlFlow::Continue(body);
                    }
                }
            }
        };

        log::debug!("folding {name} dimension {} by {factor} at loop {var}", axis.dim);
        let (mut body, sites) = match fold_storage_of_function(&body, &name, axis.dim, &factor) {
            Ok(folded) => folded,
            Err(e) => {
                self.error.get_or_insert(e);
                return ControlFlow::Break(body);
            }
        };

        let mut semaphore = None;
        if self.is_async() {
            let window = FoldWindow {
                buffer: &name,
                loop_var: var,
                loop_min: &op.min,
                forward,
                provided: axis.provided,
                required: axis.required,
                extent: &extent,
                factor: &factor,
            };
            if let Some((sema, bracketed)) = synthesize(&window, body.clone(), self.names) {
                semaphore = Some(sema);
                body = bracketed;
            }
        }

        self.folds.push(Fold {
            dim: axis.dim,
            factor,
            semaphore,
            explicit: explicit_factor.is_some(),
            loop_var: var.to_string(),
            sites,
        });

        if can_prove(&Expr::lt(axis.max.clone(), next(&axis.min))) {
            // Iterations touch disjoint windows; other axes may fold too.
            ControlFlow::Continue(body)
        } else {
            ControlFlow::Break(body)
        }
    }

    /// Runtime check that the declared fold direction holds between
    /// consecutive iterations. Async windows are bounded by the time this
    /// runs, so the provided edge is always present.
    fn direction_check(&self, axis: &Axis<'_>, next: &impl Fn(&Expr) -> Expr) -> Expr {
        let provided_edge = if axis.storage.fold_forward {
            &axis.provided.max
        } else {
            &axis.provided.min
        };
        let moves = |e: &Expr| {
            if axis.storage.fold_forward {
                Expr::ge(next(e), e.clone())
            } else {
                Expr::le(next(e), e.clone())
            }
        };
        let edge = if axis.storage.fold_forward {
            &axis.min
        } else {
            &axis.max
        };
        match provided_edge {
            Some(p) if self.is_async() => Expr::and(moves(edge), moves(p)),
            _ => moves(edge),
        }
    }
}

impl Rewriter for AttemptStorageFolding<'_> {
    fn rewrite_stmt(&mut self, s: &Stmt) -> Option<Stmt> {
        if self.error.is_some() {
            return None;
        }
        match s {
            // Never look inside the buffer's own pipeline.
            Stmt::ProducerConsumer(pc) if pc.name == self.func.name => None,
            Stmt::For(op) => self.visit_for(op),
            _ => rewrite_stmt_children(self, s),
        }
    }
}

fn simplify_region(region: Region) -> Region {
    region
        .into_iter()
        .map(|iv| Interval {
            min: iv.min.as_ref().map(simplify),
            max: iv.max.as_ref().map(simplify),
        })
        .collect()
}

fn rebuild(op: &For, body: Stmt) -> Option<Stmt> {
    if body == *op.body {
        return None;
    }
    Some(Stmt::For(For {
        name: op.name.clone(),
        min: op.min.clone(),
        extent: op.extent.clone(),
        kind: op.kind,
        body: Box::new(body),
    }))
}
