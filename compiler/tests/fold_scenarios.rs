// End-to-end storage folding scenarios.
//
// Each test folds a small pipeline, checks the shape of the result, and
// runs both the original and the folded program through the reference
// interpreter: outputs must match, every access must land inside the
// shrunken allocation, and semaphore accounting must balance.

mod common;

use common::{execute, parse};
use foldc::diag::codes;
use foldc::ir::Expr;
use foldc::pass::StageCert;
use foldc::schedule::{env_of, Env, Function, StorageDim};
use foldc::storage_fold::{storage_folding, verify_folds, StorageFoldResult};

fn fold(src: &str, env: &Env) -> (foldc::ir::Stmt, StorageFoldResult) {
    let input = parse(src);
    let result = storage_folding(&input, env).unwrap();
    let cert = verify_folds(&result);
    assert!(cert.all_pass(), "{:?}", cert.obligations());
    (input, result)
}

fn assert_equivalent(input: &foldc::ir::Stmt, folded: &foldc::ir::Stmt) -> common::Run {
    let before = execute(input).unwrap();
    let after = execute(folded).unwrap_or_else(|e| panic!("folded program failed: {e}\n{folded}"));
    assert_eq!(before.outputs, after.outputs);
    after
}

// ── Scenario A: sliding window folds to the next power of two ──────────────

const SLIDING: &str = "
    realize f([0, 10]) {
      for (i, 0, 8) {
        produce f { for (x, i, 3) { f(x) = x * 2 + 1; } }
        consume f { out(i) = f(i) + f(i + 1) + f(i + 2); }
      }
    }";

#[test]
fn sliding_window_folds_by_four() {
    let (input, result) = fold(SLIDING, &Env::new());
    assert_eq!(result.folds.len(), 1);
    let report = &result.folds[0];
    assert_eq!(report.factor, "4");
    assert_eq!(report.loop_var, "i");
    assert!(!report.explicit);

    let printed = result.stmt.to_string();
    assert!(printed.starts_with("realize f([0, 4])"), "{printed}");
    assert!(printed.contains("f(x % 4) = "), "{printed}");
    assert!(printed.contains("f((i + 2) % 4)"), "{printed}");

    let run = assert_equivalent(&input, &result.stmt);
    assert!(run.peak_cells["f"] <= 4);
}

// ── Scenario B: two productions block automatic folding ────────────────────

const TWO_PRODUCERS: &str = "
    realize f([0, 8]) {
      for (i, 0, 8) {
        produce f { f(i) = i; }
        consume f { out(i) = f(i); }
        produce f { f(i) = i * 3; }
        consume f { out2(i) = f(i); }
      }
    }";

#[test]
fn multiple_producers_are_not_folded_automatically() {
    let (input, result) = fold(TWO_PRODUCERS, &Env::new());
    assert!(result.folds.is_empty());
    assert_eq!(result.stmt, input);
}

#[test]
fn multiple_producers_fold_when_declared() {
    let env = env_of([Function::new("f").with_dim(StorageDim::new("x").fold(Expr::int(2)))]);
    let (input, result) = fold(TWO_PRODUCERS, &env);
    assert_eq!(result.folds.len(), 1);
    assert!(result.folds[0].explicit);
    assert_eq!(result.folds[0].axis, "x");
    assert_eq!(result.folds[0].factor, "2");

    let printed = result.stmt.to_string();
    assert!(printed.contains("pipeline_error_fold_factor_too_small"), "{printed}");
    assert!(printed.contains("pipeline_error_bad_fold"), "{printed}");
    assert_equivalent(&input, &result.stmt);
}

// ── Scenario C: asynchronous producer gets a balanced semaphore ────────────

const ASYNC_WINDOW: &str = "
    realize f([0, 12]) {
      for (i, 0, 10) {
        produce f { for (x, i, 3) { f(x) = x * x; } }
        consume f { out(i) = f(i) + f(i + 2); }
      }
    }";

#[test]
fn async_window_accounts_slots() {
    let env = env_of([Function::new("f").asynchronous()]);
    let (input, result) = fold(ASYNC_WINDOW, &env);
    let report = &result.folds[0];
    assert_eq!(report.factor, "4");
    let sema = report.semaphore.as_ref().unwrap();
    // 4 slots minus the 2 extra the first step writes.
    assert_eq!(sema.init, "2");

    insta::assert_snapshot!(result.stmt.to_string(), @r#"
    let f.folding_semaphore.0 = extern pipeline_make_semaphore(2) in {
      realize f([0, 4]) {
        for (i, 0, 10) {
          acquire (&f.folding_semaphore.0, 1) {
            produce f {
              for (x, i, 3) {
                f(x % 4) = x * x;
              }
            }
            consume f {
              out(i) = f(i % 4) + f((i + 2) % 4);
            }
            eval extern pipeline_semaphore_release(&f.folding_semaphore.0, 1);
          }
        }
      }
    }
    "#);

    let run = assert_equivalent(&input, &result.stmt);
    assert_eq!(run.semaphores.len(), 1);
    let trace = &run.semaphores[0];
    assert_eq!(trace.init, 2);
    assert_eq!(trace.acquired, 10);
    assert_eq!(trace.acquired, trace.released);
    assert_eq!(trace.count, trace.init);
    assert!(trace.low_water >= 0);
}

// ── Scenario D: storage handed to external code ────────────────────────────

#[test]
fn escaping_storage_with_declared_fold_is_rejected() {
    let src = "
        realize f([0, 10]) {
          for (i, 0, 8) {
            produce f { for (x, i, 3) { f(x) = x; } }
            consume f { out(i) = f(i + 2); }
          }
          eval extern debug_dump(&f.buffer);
        }";
    let env = env_of([Function::new("f").with_dim(StorageDim::new("x").fold(Expr::int(4)))]);
    let input = parse(src);
    let result = storage_folding(&input, &env).unwrap();
    assert!(result.folds.is_empty());
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics[0].code, Some(codes::E0200));
    assert!(result.diagnostics[0].hint.is_some());
    assert_eq!(result.stmt, input);
}

// ── Further shapes ─────────────────────────────────────────────────────────

#[test]
fn backward_window_folds() {
    let src = "
        realize f([0, 9]) {
          for (i, 0, 8) {
            produce f { for (x, 7 - i, 2) { f(x) = x + 100; } }
            consume f { out(i) = f(7 - i) * f(8 - i); }
          }
        }";
    let (input, result) = fold(src, &Env::new());
    assert_eq!(result.folds.len(), 1);
    assert_eq!(result.folds[0].factor, "2");
    let run = assert_equivalent(&input, &result.stmt);
    assert!(run.peak_cells["f"] <= 2);
}

#[test]
fn row_window_folds_outer_dimension_only() {
    let src = "
        realize f([0, 16], [0, 10]) {
          for (y, 0, 8) {
            produce f {
              for (r, y, 3) { for (x, 0, 16) { f(x, r) = x + r * 16; } }
            }
            consume f {
              for (x, 0, 16) { out(x, y) = f(x, y) + f(x, y + 2); }
            }
          }
        }";
    let (input, result) = fold(src, &Env::new());
    assert_eq!(result.folds.len(), 1);
    assert_eq!(result.folds[0].dim, 1);
    assert!(result.stmt.to_string().starts_with("realize f([0, 16], [0, 4])"));
    let run = assert_equivalent(&input, &result.stmt);
    assert!(run.peak_cells["f"] <= 64);
}

#[test]
fn constant_let_feeds_the_factor() {
    let src = "
        let w = 3 in {
          realize f([0, 10]) {
            for (i, 0, 8) {
              produce f { for (x, i, w) { f(x) = x; } }
              consume f { out(i) = f(i + w - 1); }
            }
          }
        }";
    let (input, result) = fold(src, &Env::new());
    assert_eq!(result.folds[0].factor, "4");
    assert_equivalent(&input, &result.stmt);
}

#[test]
fn undersized_declared_factor_fails_at_run_time() {
    let env = env_of([Function::new("f").with_dim(StorageDim::new("x").fold(Expr::int(2)))]);
    let (_, result) = fold(SLIDING, &env);
    assert!(result.folds[0].explicit);
    let err = execute(&result.stmt).unwrap_err();
    assert!(err.contains("pipeline_error_fold_factor_too_small"), "{err}");
}

#[test]
fn declared_direction_is_checked_at_run_time() {
    let src = "
        realize f([0, 3]) {
          for (i, 0, 6) {
            produce f { f(i % 3) = i; }
            consume f { out(i) = f(i % 3); }
          }
        }";
    let env = env_of([Function::new("f").with_dim(StorageDim::new("x").fold(Expr::int(4)))]);
    let (_, result) = fold(src, &env);
    let err = execute(&result.stmt).unwrap_err();
    assert!(err.contains("pipeline_error_bad_fold"), "{err}");
}

#[test]
fn parallel_loops_keep_full_storage() {
    let src = "
        realize f([0, 10]) {
          parallel (i, 0, 8) {
            produce f { for (x, i, 3) { f(x) = x; } }
            consume f { out(i) = f(i + 2); }
          }
        }";
    let (input, result) = fold(src, &Env::new());
    assert!(result.folds.is_empty());
    assert_eq!(result.stmt, input);
}
