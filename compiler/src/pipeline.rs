// pipeline.rs — Compilation state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId.
//
// Preconditions: the parsed IR and schedule Env must be set before calling
//   run_pipeline.
// Postconditions: all artifacts for required passes are populated, or
//   has_error is set.
// Failure modes: any pass emitting error-level diagnostics; internal errors
//   from storage folding.
// Side effects: calls on_pass_complete callback after each pass for
//   immediate display.

use std::time::Instant;

use crate::diag::{codes, has_errors, Diagnostic};
use crate::ir::Stmt;
use crate::pass::{descriptor, required_passes, PassId, StageCert};
use crate::schedule::Env;
use crate::storage_fold::{InternalError, StorageFoldResult};

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw `.ir` source text.
/// `schedule_hash`: SHA-256 of the raw schedule JSON (empty input when no
/// schedule was given).
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub schedule_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the schedule hash (64 characters).
    pub fn schedule_hash_hex(&self) -> String {
        bytes_to_hex(&self.schedule_hash)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"schedule_hash\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.schedule_hash_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the IR source and schedule text.
pub fn compute_provenance(source: &str, schedule: Option<&str>) -> Provenance {
    Provenance {
        source_hash: sha256(source),
        schedule_hash: sha256(schedule.unwrap_or("")),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Artifact storage ───────────────────────────────────────────────────────

/// Holds all compilation artifacts and accumulated diagnostics.
pub struct CompilationState {
    pub input: Stmt,
    pub env: Env,
    pub consts: Option<Stmt>,
    pub folded: Option<StorageFoldResult>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(input: Stmt, env: Env) -> Self {
        Self {
            input,
            env,
            consts: None,
            folded: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed.
///
/// For `Diagnostics`, the specific diagnostics are available in
/// `CompilationState.diagnostics`.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("pass `{failing_pass}` reported errors")]
    Diagnostics { failing_pass: PassId },
    #[error("internal error in pass `{failing_pass}`: {source}")]
    Internal {
        failing_pass: PassId,
        #[source]
        source: InternalError,
    },
}

impl PipelineError {
    /// The pass that produced the error.
    pub fn failing_pass(&self) -> PassId {
        match self {
            PipelineError::Diagnostics { failing_pass }
            | PipelineError::Internal { failing_pass, .. } => *failing_pass,
        }
    }
}

/// Per-pass post-processing: callback, accumulate, verbose, error check.
fn finish_pass(
    state: &mut CompilationState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "foldc: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError::Diagnostics {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → on_pass_complete(callback) → verbose → error check.
///
/// Preconditions: `state.input` and `state.env` are set.
/// Postconditions: artifacts for all passes in `required_passes(terminal)` are populated,
///   or `state.has_error` is true.
/// Failure modes: any pass producing error-level diagnostics; fold cert failure;
///   internal errors.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    for pass_id in required_passes(terminal) {
        match pass_id {
            PassId::SubstituteConstants => {
                let t = Instant::now();
                let consts = crate::const_prop::substitute_in_constants(&state.input);
                let elapsed = t.elapsed();
                state.consts = Some(consts);
                finish_pass(
                    state,
                    pass_id,
                    Vec::new(),
                    elapsed,
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::StorageFolding => {
                let Some(consts) = state.consts.as_ref() else {
                    unreachable!("storage folding runs after constant substitution");
                };
                let t = Instant::now();
                let result =
                    crate::storage_fold::fold_realizations(consts, &state.env).map_err(|source| {
                        state.has_error = true;
                        PipelineError::Internal {
                            failing_pass: pass_id,
                            source,
                        }
                    })?;
                let elapsed = t.elapsed();
                let mut diags = result.diagnostics.clone();
                // Verify folding postconditions (F1-F3)
                let cert = crate::storage_fold::verify_folds(&result);
                if !cert.all_pass() {
                    let failed: Vec<_> = cert
                        .obligations()
                        .iter()
                        .filter(|(_, ok)| !ok)
                        .map(|(name, _)| *name)
                        .collect();
                    diags.push(Diagnostic::error(
                        codes::E0600,
                        format!("storage folding verification failed: {}", failed.join(", ")),
                    ));
                }
                state.folded = Some(result);
                finish_pass(state, pass_id, diags, elapsed, verbose, &mut on_pass_complete)?;
            }
        }
    }
    Ok(())
}
