// semaphore.rs — Producer/consumer slot accounting for asynchronous folds.
//
// An asynchronous producer may run ahead of its consumer, so a folded
// buffer is guarded by a counting semaphore over its `factor` slots. Each
// loop step acquires the slots it is about to write for the first time and
// releases the slots it has read for the last time.
//
// Preconditions: the loop body has already been index-rewritten.
// Postconditions: over a full run of the loop, acquired slots equal released
//   slots plus `init` minus the final count.
// Failure modes: none.
// Side effects: draws a fresh name from the `NameGen`.

use crate::bounds::Interval;
use crate::id::NameGen;
use crate::ir::*;
use crate::simplify::simplify;
use crate::visit::substitute;

/// Runtime call that allocates a semaphore handle with an initial count.
pub const MAKE_SEMAPHORE: &str = "pipeline_make_semaphore";
/// Runtime call that returns slots to a semaphore.
pub const SEMAPHORE_RELEASE: &str = "pipeline_semaphore_release";

#[derive(Debug, Clone, PartialEq)]
pub struct Semaphore {
    pub name: String,
    /// Handle-typed variable bound to the semaphore.
    pub var: Expr,
    pub init: Expr,
}

/// Everything the synthesizer needs to know about one fold.
#[derive(Debug)]
pub struct FoldWindow<'a> {
    pub buffer: &'a str,
    pub loop_var: &'a str,
    pub loop_min: &'a Expr,
    pub forward: bool,
    /// Provided and required intervals of the folded dimension; both bounded.
    pub provided: &'a Interval,
    pub required: &'a Interval,
    pub extent: &'a Expr,
    pub factor: &'a Expr,
}

/// Per-step slot amounts, before the first-iteration adjustment.
fn step_amounts(w: &FoldWindow<'_>) -> Option<(Expr, Expr)> {
    let v = Expr::var(w.loop_var);
    let prev = v.clone() - Expr::int(1);
    let next = v + Expr::int(1);
    let at = |e: &Expr, value: &Expr| substitute(w.loop_var, value, e);

    let (min_p, max_p) = (w.provided.min.as_ref()?, w.provided.max.as_ref()?);
    let (min_r, max_r) = (w.required.min.as_ref()?, w.required.max.as_ref()?);

    let (to_acquire, to_release) = if w.forward {
        (
            max_p.clone() - at(max_p, &prev),
            at(min_r, &next) - min_r.clone(),
        )
    } else {
        (
            at(min_p, &prev) - min_p.clone(),
            max_r.clone() - at(max_r, &next),
        )
    };
    Some((simplify(&to_acquire), simplify(&to_release)))
}

/// Wrap `body` in an acquire/release bracket and create its semaphore.
///
/// The first iteration touches the whole window rather than one step's
/// worth. When that difference is a constant it is taken off the initial
/// count; otherwise the first acquire asks for the full extent.
///
/// Returns `None` when the provided or required bounds are unbounded.
pub fn synthesize(
    w: &FoldWindow<'_>,
    body: Stmt,
    names: &mut NameGen,
) -> Option<(Semaphore, Stmt)> {
    let (mut to_acquire, to_release) = step_amounts(w)?;

    let name = names.fresh(&format!("{}.folding_semaphore", w.buffer));
    let var = Expr::handle(name.clone());

    let fudge = simplify(&substitute(
        w.loop_var,
        w.loop_min,
        &(w.extent.clone() - to_acquire.clone()),
    ));
    let init = if fudge.as_int().is_some() {
        simplify(&(w.factor.clone() - fudge))
    } else {
        to_acquire = Expr::select(
            Expr::gt(Expr::var(w.loop_var), w.loop_min.clone()),
            Expr::likely(to_acquire),
            w.extent.clone(),
        );
        w.factor.clone()
    };

    let release = Stmt::Evaluate(Expr::call_extern(
        SEMAPHORE_RELEASE,
        vec![var.clone(), to_release],
    ));
    let body = Stmt::acquire(var.clone(), to_acquire, Stmt::block(body, release));
    Some((Semaphore { name, var, init }, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: &str) -> Expr {
        Expr::var(n)
    }

    fn i(c: i64) -> Expr {
        Expr::int(c)
    }

    #[test]
    fn forward_window_of_three() {
        // Each step writes [i, i+2] and reads [i, i+2].
        let iv = Interval::new(v("i"), v("i") + i(2));
        let w = FoldWindow {
            buffer: "f",
            loop_var: "i",
            loop_min: &i(0),
            forward: true,
            provided: &iv,
            required: &iv,
            extent: &i(3),
            factor: &i(4),
        };
        let mut names = NameGen::new();
        let body = Stmt::provide("f", vec![v("i") % i(4)], i(0));
        let (sema, out) = synthesize(&w, body, &mut names).unwrap();

        assert_eq!(sema.name, "f.folding_semaphore.0");
        assert_eq!(sema.init, i(2));
        insta::assert_snapshot!(out.to_string(), @r"
        acquire (&f.folding_semaphore.0, 1) {
          f(i % 4) = 0;
          eval extern pipeline_semaphore_release(&f.folding_semaphore.0, 1);
        }
        ");
    }

    #[test]
    fn backward_window_mirrors_amounts() {
        // Each step writes [9 - 2i, 10 - 2i].
        let iv = Interval::new(i(9) - v("i") * i(2), i(10) - v("i") * i(2));
        let w = FoldWindow {
            buffer: "g",
            loop_var: "i",
            loop_min: &i(0),
            forward: false,
            provided: &iv,
            required: &iv,
            extent: &i(2),
            factor: &i(2),
        };
        let (to_acquire, to_release) = step_amounts(&w).unwrap();
        assert_eq!(to_acquire, i(2));
        assert_eq!(to_release, i(2));
    }

    #[test]
    fn symbolic_fudge_selects_full_extent_first() {
        // Window [i, i + n] with symbolic n: the first-step adjustment is
        // not a constant.
        let iv = Interval::new(v("i"), v("i") + v("n"));
        let extent = v("n") + i(1);
        let w = FoldWindow {
            buffer: "f",
            loop_var: "i",
            loop_min: &i(0),
            forward: true,
            provided: &iv,
            required: &iv,
            extent: &extent,
            factor: &v("k"),
        };
        let mut names = NameGen::new();
        let (sema, out) = synthesize(&w, Stmt::Evaluate(i(0)), &mut names).unwrap();
        assert_eq!(sema.init, v("k"));
        let Stmt::Acquire(a) = out else {
            panic!("expected acquire");
        };
        assert_eq!(
            a.count,
            Expr::select(Expr::gt(v("i"), i(0)), Expr::likely(i(1)), extent)
        );
    }

    #[test]
    fn unbounded_window_is_rejected() {
        let bounded = Interval::new(v("i"), v("i"));
        let open = Interval {
            min: Some(v("i")),
            max: None,
        };
        let w = FoldWindow {
            buffer: "f",
            loop_var: "i",
            loop_min: &i(0),
            forward: true,
            provided: &open,
            required: &bounded,
            extent: &i(1),
            factor: &i(1),
        };
        assert!(synthesize(&w, Stmt::Evaluate(i(0)), &mut NameGen::new()).is_none());
    }
}
