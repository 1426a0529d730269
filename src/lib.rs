//! kelp - a graph-IR canonicalizer and x86-64 code emitter.
//!
//! kelp takes a sea-of-nodes style graph whose values carry integer range
//! stamps, rewrites it to a canonical fixed point (constant folding, algebraic
//! identities, address folding, value numbering, dead code elimination), lowers
//! it to a low-level instruction list, assigns registers and emits x86-64
//! machine code through a label-patching assembler.
//!
//! # Primary Usage
//!
//! ```ignore
//! use kelp::core::{CompilationSession, Compiler, CompilerConfig};
//! use kelp::kir::parse_graph;
//! use kelp::x64::X64Backend;
//! use bumpalo::Bump;
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let graph = parse_graph("graph f(%a: i32) { return %a }")?;
//! let compiled = Compiler::new(CompilerConfig::default())
//!     .compile(&session, "f", graph, &mut X64Backend::new())?;
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - Stamps, nodes and the graph arena
//! - [`opt`] - The canonicalizer and its rewrite rules
//! - [`kir`] - Textual graphs and the FileCheck-style test runner
//! - [`asm`] - Code buffer, labels and the patching assembler
//! - [`lir`] - Low-level instructions and their operand contract
//! - [`x64`] - x86-64 encoder, calling convention and backend
//! - [`core`] - Errors, configuration, session and the compiler driver

pub mod asm;
pub mod core;
pub mod ir;
pub mod kir;
pub mod lir;
pub mod opt;
pub mod x64;

pub use core::{
    Backend, CompilationSession, CompileError, CompileResult, CompiledCode, Compiler, CompilerConfig,
    SessionStats,
};
pub use ir::{Graph, NodeId, NodeKind, Stamp, StampKind};
