// schedule.rs — Per-function storage schedule metadata.
//
// The folding pass consumes only two facts from a stage's schedule: its
// ordered storage dimensions (each optionally carrying a declared fold
// factor and direction) and whether the stage runs asynchronously with
// respect to its consumers. Both are loaded from a JSON side file.
//
// Preconditions: none.
// Postconditions: every `fold_factor` in a loaded `Env` is a parsed `Expr`.
// Failure modes: malformed JSON (E0100), unparseable factor strings (E0101).
// Side effects: none.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::diag::{codes, Diagnostic};
use crate::ir::Expr;

/// One storage axis of a function, in storage order (innermost first).
#[derive(Debug, Clone, PartialEq)]
pub struct StorageDim {
    pub var: String,
    /// Declared fold factor. `None` leaves the factor to the pass.
    pub fold_factor: Option<Expr>,
    /// Direction to assume when the pass cannot prove one.
    pub fold_forward: bool,
}

impl StorageDim {
    pub fn new(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            fold_factor: None,
            fold_forward: true,
        }
    }

    pub fn fold(mut self, factor: Expr) -> Self {
        self.fold_factor = Some(factor);
        self
    }

    pub fn backward(mut self) -> Self {
        self.fold_forward = false;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FuncSchedule {
    pub storage_dims: Vec<StorageDim>,
    /// The producer runs concurrently with its consumer.
    pub is_async: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub schedule: FuncSchedule,
}

impl Function {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: FuncSchedule::default(),
        }
    }

    pub fn with_dim(mut self, dim: StorageDim) -> Self {
        self.schedule.storage_dims.push(dim);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.schedule.is_async = true;
        self
    }
}

/// Functions by name. Buffers without an entry have no storage dims and are
/// synchronous.
pub type Env = BTreeMap<String, Function>;

/// Build an `Env` from a list of functions.
pub fn env_of(functions: impl IntoIterator<Item = Function>) -> Env {
    functions
        .into_iter()
        .map(|f| (f.name.clone(), f))
        .collect()
}

// ── JSON loading ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFunction {
    #[serde(default)]
    storage_dims: Vec<RawDim>,
    #[serde(default, rename = "async")]
    is_async: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDim {
    var: String,
    #[serde(default)]
    fold_factor: Option<RawFactor>,
    #[serde(default = "default_forward")]
    fold_forward: bool,
}

fn default_forward() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFactor {
    Int(i64),
    Expr(String),
}

/// Parse a schedule JSON document into an `Env`.
pub fn parse_schedule(json: &str) -> Result<Env, Vec<Diagnostic>> {
    let raw: BTreeMap<String, RawFunction> = serde_json::from_str(json).map_err(|e| {
        vec![Diagnostic::error(
            codes::E0100,
            format!(
                "invalid schedule JSON at line {}, column {}: {}",
                e.line(),
                e.column(),
                e
            ),
        )]
    })?;

    let mut env = Env::new();
    let mut diagnostics = Vec::new();
    for (name, func) in raw {
        let mut storage_dims = Vec::with_capacity(func.storage_dims.len());
        for dim in func.storage_dims {
            let fold_factor = match dim.fold_factor {
                None => None,
                Some(RawFactor::Int(v)) => Some(Expr::int(v)),
                Some(RawFactor::Expr(src)) => match crate::parser::parse_expr(&src) {
                    Ok(e) => Some(e),
                    Err(errs) => {
                        let detail = errs
                            .first()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "empty expression".to_string());
                        diagnostics.push(
                            Diagnostic::error(
                                codes::E0101,
                                format!(
                                    "fold_factor `{src}` of {name}.{} is not an expression: {detail}",
                                    dim.var
                                ),
                            )
                            .with_hint("use an integer or an IR expression such as \"w + 2\""),
                        );
                        None
                    }
                },
            };
            storage_dims.push(StorageDim {
                var: dim.var,
                fold_factor,
                fold_forward: dim.fold_forward,
            });
        }
        env.insert(
            name.clone(),
            Function {
                name,
                schedule: FuncSchedule {
                    storage_dims,
                    is_async: func.is_async,
                },
            },
        );
    }

    if diagnostics.is_empty() {
        Ok(env)
    } else {
        Err(diagnostics)
    }
}
