// Reference interpreter for the loop-nest IR.
//
// Executes a statement sequentially. Every access to a realized buffer is
// checked against its allocation bounds, reads of cells that were never
// written are errors, and semaphores are counted rather than blocked on.
// Buffers that are never realized act as inputs (when read) or outputs
// (when written).

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use foldc::ir::*;
use foldc::semaphore::{MAKE_SEMAPHORE, SEMAPHORE_RELEASE};

pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

pub fn parse(src: &str) -> Stmt {
    let result = foldc::parser::parse(src);
    assert!(result.errors.is_empty(), "parse errors: {:?}", result.errors);
    result.stmt.unwrap()
}

#[derive(Debug, Clone, PartialEq)]
pub struct SemaphoreTrace {
    pub init: i64,
    pub count: i64,
    pub acquired: i64,
    pub released: i64,
    /// Lowest count observed right after an acquire.
    pub low_water: i64,
}

#[derive(Debug, Default)]
pub struct Run {
    pub outputs: BTreeMap<String, BTreeMap<Vec<i64>, i64>>,
    pub semaphores: Vec<SemaphoreTrace>,
    /// Largest number of cells any single allocation held at once.
    pub peak_cells: BTreeMap<String, usize>,
}

struct Allocation {
    name: String,
    bounds: Vec<(i64, i64)>,
    cells: HashMap<Vec<i64>, i64>,
}

#[derive(Default)]
struct Interp {
    vars: HashMap<String, Vec<i64>>,
    allocations: Vec<Allocation>,
    run: Run,
}

/// Deterministic contents of an input buffer.
pub fn input_value(name: &str, args: &[i64]) -> i64 {
    args.iter()
        .fold(name.len() as i64, |h, a| h.wrapping_mul(31).wrapping_add(*a))
}

impl Interp {
    fn bind(&mut self, name: &str, value: i64) {
        self.vars.entry(name.to_string()).or_default().push(value);
    }

    fn unbind(&mut self, name: &str) {
        if let Some(stack) = self.vars.get_mut(name) {
            stack.pop();
        }
    }

    fn lookup(&self, name: &str) -> Result<i64, String> {
        if let Some(v) = self.vars.get(name).and_then(|s| s.last()) {
            return Ok(*v);
        }
        // Raw buffer handles carry no value of interest.
        if name.ends_with(".buffer") {
            return Ok(0);
        }
        Err(format!("unbound variable {name}"))
    }

    fn allocation(&mut self, name: &str) -> Option<&mut Allocation> {
        self.allocations.iter_mut().rev().find(|a| a.name == name)
    }

    fn checked_index(a: &Allocation, idx: &[i64]) -> Result<(), String> {
        if idx.len() != a.bounds.len() {
            return Err(format!(
                "{} accessed with {} indices, allocated with {}",
                a.name,
                idx.len(),
                a.bounds.len()
            ));
        }
        for (d, (&i, &(min, extent))) in idx.iter().zip(&a.bounds).enumerate() {
            if i < min || i >= min + extent {
                return Err(format!(
                    "{}: index {i} outside [{min}, {}) in dimension {d}",
                    a.name,
                    min + extent
                ));
            }
        }
        Ok(())
    }

    fn eval_all(&mut self, args: &[Expr]) -> Result<Vec<i64>, String> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    fn eval(&mut self, e: &Expr) -> Result<i64, String> {
        Ok(match e {
            Expr::Int(v) => *v,
            Expr::Bool(b) => *b as i64,
            Expr::Str(s) => return Err(format!("string {s:?} used as a value")),
            Expr::Var(v) => self.lookup(&v.name)?,
            Expr::Bin(op, a, b) => {
                let (a, b) = (self.eval(a)?, self.eval(b)?);
                match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div if b == 0 => return Err("division by zero".into()),
                    BinOp::Div => a.div_euclid(b),
                    BinOp::Mod if b == 0 => return Err("modulo by zero".into()),
                    BinOp::Mod => a.rem_euclid(b),
                    BinOp::Min => a.min(b),
                    BinOp::Max => a.max(b),
                }
            }
            Expr::Cmp(op, a, b) => {
                let (a, b) = (self.eval(a)?, self.eval(b)?);
                (match op {
                    CmpOp::Lt => a < b,
                    CmpOp::Le => a <= b,
                    CmpOp::Gt => a > b,
                    CmpOp::Ge => a >= b,
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                }) as i64
            }
            Expr::And(a, b) => (self.eval(a)? != 0 && self.eval(b)? != 0) as i64,
            Expr::Or(a, b) => (self.eval(a)? != 0 || self.eval(b)? != 0) as i64,
            Expr::Not(a) => (self.eval(a)? == 0) as i64,
            Expr::Select(c, t, f) => {
                if self.eval(c)? != 0 {
                    self.eval(t)?
                } else {
                    self.eval(f)?
                }
            }
            Expr::Likely(a) => self.eval(a)?,
            Expr::Call(call) => match call.kind {
                CallKind::Func => {
                    let idx = self.eval_all(&call.args)?;
                    match self.allocation(&call.name) {
                        Some(a) => {
                            Self::checked_index(a, &idx)?;
                            *a.cells.get(&idx).ok_or_else(|| {
                                format!("read of unwritten {}{:?}", call.name, idx)
                            })?
                        }
                        None => match self.run.outputs.get(&call.name).and_then(|o| o.get(&idx)) {
                            Some(v) => *v,
                            None => input_value(&call.name, &idx),
                        },
                    }
                }
                CallKind::Extern => self.call_extern(call)?,
            },
        })
    }

    fn call_extern(&mut self, call: &Call) -> Result<i64, String> {
        match call.name.as_str() {
            MAKE_SEMAPHORE => {
                let init = self.eval(&call.args[0])?;
                self.run.semaphores.push(SemaphoreTrace {
                    init,
                    count: init,
                    acquired: 0,
                    released: 0,
                    low_water: init,
                });
                Ok(self.run.semaphores.len() as i64 - 1)
            }
            SEMAPHORE_RELEASE => {
                let id = self.eval(&call.args[0])?;
                let n = self.eval(&call.args[1])?;
                let sema = self.semaphore(id)?;
                sema.count += n;
                sema.released += n;
                Ok(0)
            }
            _ => Ok(0),
        }
    }

    fn semaphore(&mut self, id: i64) -> Result<&mut SemaphoreTrace, String> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.run.semaphores.get_mut(i))
            .ok_or_else(|| format!("no semaphore {id}"))
    }

    fn exec(&mut self, s: &Stmt) -> Result<(), String> {
        match s {
            Stmt::Let(l) => {
                let v = self.eval(&l.value)?;
                self.bind(&l.name, v);
                let r = self.exec(&l.body);
                self.unbind(&l.name);
                r
            }
            Stmt::For(op) => {
                let min = self.eval(&op.min)?;
                let extent = self.eval(&op.extent)?;
                for v in min..min + extent {
                    self.bind(&op.name, v);
                    let r = self.exec(&op.body);
                    self.unbind(&op.name);
                    r?;
                }
                Ok(())
            }
            Stmt::ProducerConsumer(pc) => self.exec(&pc.body),
            Stmt::Provide(p) => {
                let value = self.eval(&p.value)?;
                let idx = self.eval_all(&p.args)?;
                match self.allocation(&p.name) {
                    Some(a) => {
                        Self::checked_index(a, &idx)?;
                        a.cells.insert(idx, value);
                        let cells = a.cells.len();
                        let peak = self.run.peak_cells.entry(p.name.clone()).or_default();
                        *peak = (*peak).max(cells);
                    }
                    None => {
                        self.run
                            .outputs
                            .entry(p.name.clone())
                            .or_default()
                            .insert(idx, value);
                    }
                }
                Ok(())
            }
            Stmt::Realize(r) => {
                let mut bounds = Vec::new();
                for range in &r.bounds {
                    bounds.push((self.eval(&range.min)?, self.eval(&range.extent)?));
                }
                self.allocations.push(Allocation {
                    name: r.name.clone(),
                    bounds,
                    cells: HashMap::new(),
                });
                let result = self.exec(&r.body);
                self.allocations.pop();
                result
            }
            Stmt::Block(stmts) => stmts.iter().try_for_each(|s| self.exec(s)),
            Stmt::Assert { condition, message } => {
                if self.eval(condition)? != 0 {
                    return Ok(());
                }
                match message {
                    Expr::Call(c) => Err(format!("assertion failed: {}", c.name)),
                    other => Err(format!("assertion failed: {other}")),
                }
            }
            Stmt::Evaluate(e) => self.eval(e).map(|_| ()),
            Stmt::Acquire(a) => {
                let id = self.eval(&a.semaphore)?;
                let n = self.eval(&a.count)?;
                let sema = self.semaphore(id)?;
                sema.count -= n;
                sema.acquired += n;
                sema.low_water = sema.low_water.min(sema.count);
                self.exec(&a.body)
            }
        }
    }
}

/// Run `s` to completion.
pub fn execute(s: &Stmt) -> Result<Run, String> {
    let mut interp = Interp::default();
    interp.exec(s)?;
    Ok(interp.run)
}

/// Run `s` with free variables bound.
pub fn execute_with(s: &Stmt, vars: &[(&str, i64)]) -> Result<Run, String> {
    let mut interp = Interp::default();
    for (name, value) in vars {
        interp.bind(name, *value);
    }
    interp.exec(s)?;
    Ok(interp.run)
}
