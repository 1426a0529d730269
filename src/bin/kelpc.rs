//! kelpc - command line driver for kelp.
//!
//! ```text
//! kelpc canon graph.kir [--stats] [--iteration-limit N] [--no-gvn] [--verify]
//! kelpc compile graph.kir [--disasm] [--stats]
//! kelpc test tests/filetests/*.kir [--verbose]
//! ```
//!
//! Logging is controlled with `RUST_LOG` (e.g. `RUST_LOG=kelp=debug`).

use bumpalo::Bump;
use clap::{Parser, Subcommand};
use iced_x86::{Decoder, DecoderOptions, Formatter, IntelFormatter};
use kelp::core::{CanonicalizerConfig, CompilationSession, Compiler, CompilerConfig};
use kelp::kir::{parse_graphs, print_graph, TestRunner, TestSpec};
use kelp::x64::X64Backend;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "kelpc", about = "Canonicalize and compile KIR graphs")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Canonicalize every graph in a KIR file and print the result
    Canon {
        file: PathBuf,

        /// Print what the canonicalizer did before each graph
        #[arg(long)]
        stats: bool,

        /// Fixed cap on canonicalizer iterations
        #[arg(long)]
        iteration_limit: Option<usize>,

        /// Disable value numbering
        #[arg(long)]
        no_gvn: bool,

        /// Check the graph invariants after canonicalization
        #[arg(long)]
        verify: bool,
    },

    /// Compile every graph in a KIR file to x86-64
    Compile {
        file: PathBuf,

        /// Print a disassembly instead of hex bytes
        #[arg(long)]
        disasm: bool,

        /// Print the session statistics at the end
        #[arg(long)]
        stats: bool,
    },

    /// Run FileCheck-style KIR tests
    Test {
        files: Vec<PathBuf>,

        #[arg(long, short)]
        verbose: bool,
    },
}

type CliResult<T> = Result<T, String>;

fn read(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))
}

fn canon(
    file: &Path,
    stats: bool,
    iteration_limit: Option<usize>,
    no_gvn: bool,
    verify: bool,
) -> CliResult<()> {
    let mut config = CanonicalizerConfig::default().with_value_numbering(!no_gvn);
    if let Some(limit) = iteration_limit {
        config = config.with_fixed_iteration_limit(limit);
    }
    let compiler = Compiler::new(
        CompilerConfig::default()
            .with_canonicalizer(config)
            .with_verify(verify),
    );
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);

    let graphs = parse_graphs(&read(file)?).map_err(|e| e.to_string())?;
    for mut graph in graphs {
        let result = compiler
            .canonicalize(&session, &mut graph)
            .map_err(|e| format!("{}: {e}", graph.name()))?;
        if stats {
            println!("{result}");
        }
        println!("{}", print_graph(&graph));
    }
    Ok(())
}

fn disassemble(code: &[u8]) {
    let mut decoder = Decoder::with_ip(64, code, 0, DecoderOptions::NONE);
    let mut formatter = IntelFormatter::new();
    let mut text = String::new();
    while decoder.can_decode() {
        let instruction = decoder.decode();
        text.clear();
        formatter.format(&instruction, &mut text);
        println!("  {:04x}  {}", instruction.ip(), text);
    }
}

fn compile(file: &Path, disasm: bool, stats: bool) -> CliResult<()> {
    let compiler = Compiler::new(CompilerConfig::default());
    let arena = Bump::new();
    let session = CompilationSession::new(&arena);

    let graphs = parse_graphs(&read(file)?).map_err(|e| e.to_string())?;
    for graph in graphs {
        let name = graph.name().to_string();
        let compiled = compiler
            .compile(&session, &name, graph, &mut X64Backend::new())
            .map_err(|e| format!("{name}: {e}"))?;
        println!("{} ({} bytes):", compiled.name, compiled.code.len());
        if disasm {
            disassemble(&compiled.code);
        } else {
            let hex: Vec<String> = compiled.code.iter().map(|b| format!("{b:02x}")).collect();
            println!("  {}", hex.join(" "));
        }
    }
    if stats {
        println!("{}", session.stats());
    }
    Ok(())
}

fn test(files: &[PathBuf], verbose: bool) -> CliResult<()> {
    let runner = TestRunner::new(verbose);
    let mut failures = 0;
    for file in files {
        let result = TestSpec::parse(&read(file)?).and_then(|spec| runner.run_test(&spec));
        match result {
            Ok(()) => println!("PASS {}", file.display()),
            Err(e) => {
                failures += 1;
                println!("FAIL {}: {e}", file.display());
            }
        }
    }
    if failures > 0 {
        return Err(format!("{failures} of {} tests failed", files.len()));
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let result = match args.command {
        Command::Canon {
            file,
            stats,
            iteration_limit,
            no_gvn,
            verify,
        } => canon(&file, stats, iteration_limit, no_gvn, verify),
        Command::Compile { file, disasm, stats } => compile(&file, disasm, stats),
        Command::Test { files, verbose } => test(&files, verbose),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
