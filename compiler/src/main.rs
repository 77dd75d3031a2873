use clap::Parser;
use std::path::PathBuf;

use foldc::diag::Diagnostic;
use foldc::pass::PassId;
use foldc::pipeline::{compute_provenance, run_pipeline, CompilationState};

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Ir,
    Consts,
    Folds,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "foldc",
    version,
    about = "Folds the storage of intermediate pipeline buffers into circular windows"
)]
struct Cli {
    /// Input .ir source file
    source: PathBuf,

    /// Schedule JSON with per-function storage dims and async flags
    #[arg(long)]
    schedule: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Ir)]
    emit: EmitStage,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn read_or_exit(path: &PathBuf) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("foldc: error: {}: {}", path.display(), e);
            std::process::exit(2);
        }
    }
}

fn report(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("foldc: {}", diag);
    }
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("foldc: source = {}", cli.source.display());
        if let Some(path) = &cli.schedule {
            eprintln!("foldc: schedule = {}", path.display());
        }
        eprintln!("foldc: emit   = {:?}", cli.emit);
    }

    // ── Read and parse source ──
    let source = read_or_exit(&cli.source);
    let schedule_text = cli.schedule.as_ref().map(read_or_exit);

    let parse_result = foldc::parser::parse(&source);
    if !parse_result.errors.is_empty() {
        report(&parse_result.diagnostics());
        std::process::exit(1);
    }
    let stmt = match parse_result.stmt {
        Some(s) => s,
        None => {
            eprintln!("foldc: parse failed with no output");
            std::process::exit(1);
        }
    };

    // ── Load schedule ──
    let env = match schedule_text.as_deref() {
        None => foldc::schedule::Env::new(),
        Some(text) => match foldc::schedule::parse_schedule(text) {
            Ok(env) => env,
            Err(diags) => {
                report(&diags);
                std::process::exit(1);
            }
        },
    };

    if cli.verbose {
        eprintln!("foldc: {} scheduled functions", env.len());
    }

    let mut state = CompilationState::new(stmt, env);
    state.provenance = Some(compute_provenance(&source, schedule_text.as_deref()));

    let terminal = match cli.emit {
        EmitStage::BuildInfo => None,
        EmitStage::Consts => Some(PassId::SubstituteConstants),
        EmitStage::Ir | EmitStage::Folds => Some(PassId::StorageFolding),
    };

    if let Some(terminal) = terminal {
        let result = run_pipeline(&mut state, terminal, cli.verbose, |_, diags| report(diags));
        if let Err(e) = result {
            eprintln!("foldc: error: {}", e);
            std::process::exit(1);
        }
    }

    let text = match cli.emit {
        EmitStage::BuildInfo => state
            .provenance
            .as_ref()
            .map(|p| p.to_json())
            .unwrap_or_default(),
        EmitStage::Consts => state
            .consts
            .as_ref()
            .map(|s| format!("{}\n", s))
            .unwrap_or_default(),
        EmitStage::Ir => state
            .folded
            .as_ref()
            .map(|r| format!("{}\n", r.stmt))
            .unwrap_or_default(),
        EmitStage::Folds => {
            let folds = state.folded.as_ref().map(|r| r.folds.as_slice()).unwrap_or(&[]);
            match serde_json::to_string_pretty(folds) {
                Ok(json) => format!("{}\n", json),
                Err(e) => {
                    eprintln!("foldc: error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("foldc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            if cli.verbose {
                eprintln!("foldc: wrote {}", path.display());
            }
        }
        None => print!("{}", text),
    }
}
