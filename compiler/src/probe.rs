// probe.rs — Read-only questions the folding pass asks of an allocation.

use crate::ir::*;
use crate::visit::{walk_expr, walk_stmt, Visitor};

struct CountProducers<'a> {
    name: &'a str,
    count: usize,
}

impl Visitor for CountProducers<'_> {
    fn visit_stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::ProducerConsumer(pc) if pc.is_producer && pc.name == self.name => {
                self.count += 1;
            }
            _ => walk_stmt(self, s),
        }
    }
}

/// Number of `produce name { .. }` blocks in `s`, not counting any nested
/// inside another production of the same buffer.
pub fn count_producers(s: &Stmt, name: &str) -> usize {
    let mut v = CountProducers { name, count: 0 };
    v.visit_stmt(s);
    v.count
}

struct UsesHandle<'a> {
    handle: &'a str,
    found: bool,
}

impl Visitor for UsesHandle<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Var(v) if v.ty == Type::Handle && v.name == self.handle => self.found = true,
            _ => walk_expr(self, e),
        }
    }
}

/// Does `s` reference the raw storage handle `<name>.buffer`? Such a buffer
/// is shared with code that indexes it directly and must keep its full
/// footprint.
pub fn is_buffer_special(s: &Stmt, name: &str) -> bool {
    let handle = format!("{name}.buffer");
    let mut v = UsesHandle {
        handle: &handle,
        found: false,
    };
    v.visit_stmt(s);
    v.found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_f() -> Stmt {
        Stmt::provide("f", vec![Expr::var("x")], Expr::int(1))
    }

    #[test]
    fn counts_sibling_productions() {
        let s = Stmt::block(
            Stmt::produce("f", write_f()),
            Stmt::block(Stmt::produce("g", write_f()), Stmt::produce("f", write_f())),
        );
        assert_eq!(count_producers(&s, "f"), 2);
        assert_eq!(count_producers(&s, "g"), 1);
        assert_eq!(count_producers(&s, "h"), 0);
    }

    #[test]
    fn nested_production_counts_once() {
        let s = Stmt::produce("f", Stmt::produce("f", write_f()));
        assert_eq!(count_producers(&s, "f"), 1);
    }

    #[test]
    fn handle_reference_marks_buffer_special() {
        let s = Stmt::block(
            Stmt::produce("f", write_f()),
            Stmt::Evaluate(Expr::call_extern("debug_dump", vec![Expr::handle("f.buffer")])),
        );
        assert!(is_buffer_special(&s, "f"));
        assert!(!is_buffer_special(&s, "g"));
    }

    #[test]
    fn int_variable_with_buffer_name_is_not_special() {
        let s = Stmt::provide("g", vec![Expr::var("f.buffer")], Expr::int(0));
        assert!(!is_buffer_special(&s, "f"));
    }
}
