use clap::Parser;
use std::path::PathBuf;

use mroc::config::{CompileOptions, EnforcementLevel};
use mroc::driver::{compile_file, validate_args};
use mroc::emit::{render, Emit};

#[derive(Parser, Debug)]
#[command(
    name = "mroc",
    version,
    about = "MRO compiler: type checks, binds and orders pipeline definitions"
)]
struct Cli {
    /// Input .mro source file
    source: PathBuf,

    /// How strictly non-portable constructs are reported
    #[arg(long, value_enum, default_value_t = EnforcementLevel::Disable)]
    enforcement: EnforcementLevel,

    /// What to print after a successful compile
    #[arg(long, value_enum, default_value_t = Emit::Check)]
    emit: Emit,

    /// JSON file of arguments for the top-level call
    #[arg(long)]
    args: Option<PathBuf>,

    /// Print compiler passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("mroc: source      = {}", cli.source.display());
        eprintln!("mroc: enforcement = {}", cli.enforcement);
        eprintln!("mroc: emit        = {:?}", cli.emit);
    }

    let opts = CompileOptions {
        enforcement: cli.enforcement,
        verbose: cli.verbose,
    };

    // ── Load and compile ──
    let program = match compile_file(&cli.source, cli.emit.terminal(), &opts) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(e.exit_code());
        }
    };
    for w in &program.warnings {
        eprintln!("{}", w);
    }

    if cli.verbose {
        eprintln!(
            "mroc: {} pipelines, {} stages, {} types",
            program.ast.pipelines.len(),
            program.ast.stages.len(),
            program.types.len()
        );
    }

    // ── Argument file ──
    if let Some(path) = &cli.args {
        let text = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("mroc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("mroc: error: {}: {}", path.display(), e);
                std::process::exit(1);
            }
        };
        let errs = validate_args(&program, &value);
        if !errs.is_empty() {
            eprintln!("{}", errs);
            std::process::exit(1);
        }
    }

    print!("{}", render(&program, cli.emit));
}
