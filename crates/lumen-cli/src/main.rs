//! Lumen command-line driver
//!
//! `lumen script.lum` runs a script; `--eval` runs an inline snippet and
//! prints its value; `--disassemble` dumps bytecode instead of executing;
//! `--ast-json` runs a Babel-style JSON AST produced by an external parser.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_runtime::diagnostic::emit_diagnostics;
use lumen_runtime::vm::InterpretOutcome;
use lumen_runtime::{disassemble, Runtime, Value};
use termcolor::{ColorChoice, StandardStream};

#[derive(Parser)]
#[command(name = "lumen", version, about = "The Lumen language runtime")]
struct Cli {
    /// Script file to run
    file: Option<PathBuf>,

    /// Evaluate a source snippet and print its value
    #[arg(short, long, conflicts_with = "file")]
    eval: Option<String>,

    /// Print bytecode instead of executing
    #[arg(long)]
    disassemble: bool,

    /// Run a JSON-serialized AST instead of source text
    #[arg(long, value_name = "FILE", conflicts_with_all = ["file", "eval"])]
    ast_json: Option<PathBuf>,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);

    if let Some(path) = &cli.ast_json {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut runtime = Runtime::new();
        return Ok(match runtime.eval_ast_json(&json) {
            Ok(interpretation) => exit_for(interpretation.result),
            Err(diagnostics) => {
                emit_diagnostics(&mut stderr, &diagnostics);
                ExitCode::from(65)
            }
        });
    }

    let (source, print_value) = match (&cli.file, &cli.eval) {
        (_, Some(snippet)) => (snippet.clone(), true),
        (Some(path), None) => (
            std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            false,
        ),
        (None, None) => {
            anyhow::bail!("nothing to run; pass a script file, --eval, or --ast-json");
        }
    };

    if cli.disassemble {
        return Ok(match Runtime::compile(&source) {
            Ok(main) => {
                print!("{}", disassemble(&main.name, &main.chunk));
                ExitCode::SUCCESS
            }
            Err(diagnostics) => {
                emit_diagnostics(&mut stderr, &diagnostics);
                ExitCode::from(65)
            }
        });
    }

    let mut runtime = Runtime::new();
    Ok(match runtime.eval_source(&source) {
        Ok(interpretation) => {
            if print_value
                && interpretation.result == InterpretOutcome::Ok
                && !matches!(interpretation.value, Value::Null)
            {
                println!("{}", interpretation.value.to_display_string());
            }
            exit_for(interpretation.result)
        }
        Err(diagnostics) => {
            emit_diagnostics(&mut stderr, &diagnostics);
            ExitCode::from(65)
        }
    })
}

fn exit_for(outcome: InterpretOutcome) -> ExitCode {
    match outcome {
        InterpretOutcome::Ok => ExitCode::SUCCESS,
        InterpretOutcome::RuntimeError => ExitCode::from(70),
    }
}
