// id.rs — Deterministic fresh-name generation for compiler-introduced names.
//
// Storage folding introduces new handle variables (one per asynchronous
// fold). Names are drawn from an explicit generator value created per pass
// invocation, so compiling the same input twice yields identical output.

use std::collections::HashMap;

/// Allocator for fresh names. Produces monotonically increasing suffixes per
/// prefix in allocation order.
#[derive(Debug, Default)]
pub struct NameGen {
    next: HashMap<String, u32>,
}

impl NameGen {
    pub fn new() -> Self {
        Self::default()
    }

    /// `"<prefix>.<n>"` with `n` counting from 0 for each distinct prefix.
    pub fn fresh(&mut self, prefix: &str) -> String {
        let slot = self.next.entry(prefix.to_string()).or_insert(0);
        let name = format!("{prefix}.{slot}");
        *slot += 1;
        name
    }
}
