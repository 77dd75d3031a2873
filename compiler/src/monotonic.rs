// monotonic.rs — Monotonicity of an expression in one variable.
//
// `Increasing` means non-decreasing as the variable grows, `Decreasing`
// non-increasing. An expression that does not mention the variable is
// `Constant`, which the fold planner deliberately does not treat as
// increasing: such an axis is unaffected by the loop.

use crate::ir::*;
use crate::visit::expr_uses_var;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Monotonic {
    Constant,
    Increasing,
    Decreasing,
    Unknown,
}

impl Monotonic {
    fn flip(self) -> Self {
        match self {
            Monotonic::Increasing => Monotonic::Decreasing,
            Monotonic::Decreasing => Monotonic::Increasing,
            other => other,
        }
    }

    /// Monotonicity of a sum of two terms.
    fn unify(self, other: Self) -> Self {
        use Monotonic::*;
        match (self, other) {
            (Unknown, _) | (_, Unknown) => Unknown,
            (Constant, x) | (x, Constant) => x,
            (a, b) if a == b => a,
            _ => Unknown,
        }
    }
}

/// Classify `e` with respect to variable `var`.
pub fn is_monotonic(e: &Expr, var: &str) -> Monotonic {
    if !expr_uses_var(e, var) {
        return Monotonic::Constant;
    }
    match e {
        Expr::Var(_) => Monotonic::Increasing,
        Expr::Bin(op, a, b) => {
            let (ma, mb) = (is_monotonic(a, var), is_monotonic(b, var));
            match op {
                BinOp::Add | BinOp::Min | BinOp::Max => ma.unify(mb),
                BinOp::Sub => ma.unify(mb.flip()),
                BinOp::Mul => match (a.as_int(), b.as_int()) {
                    (_, Some(k)) | (Some(k), _) => {
                        let m = if a.as_int().is_some() { mb } else { ma };
                        match k.signum() {
                            0 => Monotonic::Constant,
                            1 => m,
                            _ => m.flip(),
                        }
                    }
                    _ => Monotonic::Unknown,
                },
                BinOp::Div => match b.as_int() {
                    Some(k) if k > 0 => ma,
                    Some(k) if k < 0 => ma.flip(),
                    _ => Monotonic::Unknown,
                },
                BinOp::Mod => Monotonic::Unknown,
            }
        }
        Expr::Likely(a) => is_monotonic(a, var),
        Expr::Select(c, t, f) => {
            if expr_uses_var(c, var) {
                Monotonic::Unknown
            } else {
                is_monotonic(t, var).unify(is_monotonic(f, var))
            }
        }
        _ => Monotonic::Unknown,
    }
}
