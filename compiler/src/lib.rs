// foldc — storage folding for data-parallel pipeline IR
//
// Library root. The front-end (`lexer`, `parser`, `schedule`) feeds the
// passes run by `pipeline`.

pub mod bounds;
pub mod const_prop;
pub mod diag;
pub mod fold_index;
pub mod id;
pub mod ir;
pub mod lexer;
pub mod monotonic;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod schedule;
pub mod semaphore;
pub mod simplify;
pub mod storage_fold;
pub mod visit;
