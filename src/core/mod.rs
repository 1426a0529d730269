// This module holds the infrastructure shared by every stage of kelp: the crate-wide
// error type, the configuration records, machine register identities with the register
// file used by allocators, the compilation session that interns unit names and collects
// statistics in an arena, and the driver that runs a graph through canonicalization,
// lowering, allocation and emission with a pluggable Backend.

//! Core kelp infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - One `CompileError` enum for every stage, classified into invariant
//!   violations and resource exhaustion
//!
//! ## Configuration (`config`)
//! - Canonicalizer iteration limits and rule toggles
//! - Buffer sizing, byte order and verification for the driver
//!
//! ## Registers (`register_file`)
//! - Bank/index register identities and bitsets
//! - Free/used bookkeeping for register assignment
//!
//! ## Session Management (`session`)
//! - Arena-backed interning using `bumpalo`
//! - Per-session statistics with a printable report
//!
//! ## Driver (`compiler`)
//! - The `Backend` trait and the `Compiler` pipeline

pub mod compiler;
pub mod config;
pub mod error;
pub mod register_file;
pub mod session;

pub use compiler::{Backend, CompiledCode, Compiler};
pub use config::{CanonicalizerConfig, CompilerConfig};
pub use error::{CompileError, CompileResult};
pub use register_file::{AsmReg, RegBitSet, RegisterFile};
pub use session::{CompilationSession, SessionStats};
