// Property-based tests for folding invariants.
//
// Two categories:
// 1. Generated sliding-window pipelines: automatic factors are powers of two
//    covering the window, folded programs compute the same outputs within
//    the shrunken allocation, and async slot accounting balances.
// 2. Simplifier: idempotent and value-preserving on generated expressions.
//
// Uses proptest with explicit configuration to prevent CI flakiness.

mod common;

use common::{execute, execute_with, parse};
use foldc::ir::{Expr, Stmt};
use foldc::pass::StageCert;
use foldc::schedule::{env_of, Env, Function};
use foldc::simplify::simplify;
use foldc::storage_fold::{storage_folding, verify_folds};
use proptest::prelude::*;

// ── Pipeline generator ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Window {
    width: i64,
    stride: i64,
    steps: i64,
    forward: bool,
}

impl Window {
    /// Lowest index the window touches at step `i`, as IR text.
    fn start(&self) -> String {
        if self.forward {
            format!("i * {}", self.stride)
        } else {
            format!("{} - i * {}", self.stride * (self.steps - 1), self.stride)
        }
    }

    fn source(&self) -> String {
        let start = self.start();
        let reads: Vec<String> = (0..self.width)
            .map(|k| format!("f({start} + {k}) * {}", k + 1))
            .collect();
        format!(
            "realize f([0, {size}]) {{
               for (i, 0, {steps}) {{
                 produce f {{ for (x, {start}, {width}) {{ f(x) = x * 3 + 1; }} }}
                 consume f {{ out(i) = {reads}; }}
               }}
             }}",
            size = self.stride * self.steps + self.width,
            steps = self.steps,
            width = self.width,
            reads = reads.join(" + "),
        )
    }
}

fn arb_window() -> impl Strategy<Value = Window> {
    (1i64..=6, 1i64..=3, 1i64..=12, any::<bool>()).prop_map(|(width, stride, steps, forward)| {
        Window {
            width,
            stride,
            steps,
            forward,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    #[test]
    fn sliding_windows_fold_soundly(w in arb_window()) {
        let input = parse(&w.source());
        let result = storage_folding(&input, &Env::new()).unwrap();
        prop_assert!(verify_folds(&result).all_pass());
        prop_assert_eq!(result.folds.len(), 1);

        let factor: i64 = result.folds[0].factor.parse().unwrap();
        prop_assert_eq!(factor.count_ones(), 1);
        prop_assert!(factor >= w.width && factor <= 1024);

        let before = execute(&input).unwrap();
        let after = execute(&result.stmt).unwrap();
        prop_assert_eq!(before.outputs, after.outputs);
        prop_assert!(after.peak_cells["f"] <= factor as usize);
    }

    #[test]
    fn async_windows_conserve_slots(w in arb_window()) {
        let env = env_of([Function::new("f").asynchronous()]);
        let input = parse(&w.source());
        let result = storage_folding(&input, &env).unwrap();
        prop_assert!(result.folds[0].semaphore.is_some());

        let before = execute(&input).unwrap();
        let after = execute(&result.stmt).unwrap();
        prop_assert_eq!(before.outputs, after.outputs);
        prop_assert_eq!(after.semaphores.len(), 1);
        let trace = &after.semaphores[0];
        prop_assert_eq!(trace.acquired, trace.released);
        prop_assert_eq!(trace.count, trace.init);
        prop_assert!(trace.low_water >= 0);
    }
}

// ── Expression generator ────────────────────────────────────────────────────

fn arb_expr() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        (-8i64..=8).prop_map(Expr::int),
        Just(Expr::var("x")),
        Just(Expr::var("y")),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a + b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a - b),
            (inner.clone(), -3i64..=3).prop_map(|(a, k)| a * Expr::int(k)),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| Expr::min(a, b)),
            (inner.clone(), inner).prop_map(|(a, b)| Expr::max(a, b)),
        ]
    })
}

fn value_of(e: &Expr, x: i64, y: i64) -> i64 {
    let s = Stmt::provide("out", vec![Expr::int(0)], e.clone());
    let run = execute_with(&s, &[("x", x), ("y", y)]).unwrap();
    run.outputs["out"][&vec![0]]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn simplify_is_idempotent(e in arb_expr()) {
        let once = simplify(&e);
        prop_assert_eq!(simplify(&once), once);
    }

    #[test]
    fn simplify_preserves_value(e in arb_expr(), x in -20i64..=20, y in -20i64..=20) {
        prop_assert_eq!(value_of(&simplify(&e), x, y), value_of(&e, x, y));
    }
}
