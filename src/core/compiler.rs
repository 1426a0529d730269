// This module defines the compilation driver and the Backend trait it drives. The Compiler
// owns a CompilerConfig and compiles one graph at a time: it canonicalizes the graph to a
// fixed point, optionally verifies the edge invariants of the result, asks the backend to
// lower the graph into LIR and to assign locations to every virtual register, emits the LIR
// in program order into the backend's assembler and finally closes the code buffer. Every
// unit gets its own Graph, LIR and assembler, so independent units can be compiled on
// separate threads; the session only collects statistics. Any error aborts the unit and
// nothing from it is returned.

//! Compilation driver.
//!
//! ```text
//! graph ──canonicalize──▶ canonical graph ──Backend::lower──▶ LIR
//!     ──Backend::allocate──▶ concrete LIR ──Lir::emit──▶ assembler ──finish──▶ bytes
//! ```

use super::config::CompilerConfig;
use super::error::CompileResult;
use super::session::CompilationSession;
use crate::ir::Graph;
use crate::lir::{Lir, LirAssembler};
use crate::opt::{Canonicalizer, CanonicalizerStats};

/// Architecture-specific half of the pipeline.
///
/// `lower` turns a canonical graph into LIR over virtual registers; `allocate`
/// is the only place locations are chosen and must leave every operand
/// concrete. Either may append or insert instructions.
pub trait Backend {
    type Assembler: LirAssembler;

    fn name(&self) -> &'static str;

    fn new_assembler(&self, config: &CompilerConfig) -> CompileResult<Self::Assembler>;

    fn lower(&mut self, graph: &Graph, lir: &mut Lir<Self::Assembler>) -> CompileResult<()>;

    fn allocate(&mut self, lir: &mut Lir<Self::Assembler>) -> CompileResult<()>;
}

/// Machine code for one unit.
#[derive(Debug, Clone)]
pub struct CompiledCode {
    pub name: String,
    pub code: Vec<u8>,
    pub stats: CanonicalizerStats,
}

#[derive(Debug, Clone, Default)]
pub struct Compiler {
    config: CompilerConfig,
}

impl Compiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Canonicalize `graph` in place and record the run in the session.
    pub fn canonicalize(&self, session: &CompilationSession<'_>, graph: &mut Graph) -> CompileResult<CanonicalizerStats> {
        let mut canonicalizer = Canonicalizer::new(self.config.canonicalizer.clone());
        let stats = canonicalizer.canonicalize(graph)?;
        session.record_canonicalization(stats.iterations, stats.nodes_deleted, &stats.rewrites());
        if self.config.verify {
            graph.verify()?;
        }
        Ok(stats)
    }

    /// Compile one graph to machine code.
    pub fn compile<B: Backend>(
        &self,
        session: &CompilationSession<'_>,
        name: &str,
        mut graph: Graph,
        backend: &mut B,
    ) -> CompileResult<CompiledCode> {
        let name = session.intern_str(name);
        log::debug!("compiling {} for {}", name, backend.name());

        let stats = self.canonicalize(session, &mut graph)?;

        let mut lir = Lir::new();
        backend.lower(&graph, &mut lir)?;
        backend.allocate(&mut lir)?;

        let mut masm = backend.new_assembler(&self.config)?;
        let emitted = lir.emit(&mut masm)?;
        for instruction in lir.instruction_names() {
            session.record_instruction_emitted(instruction);
        }
        let code = masm.finish(self.config.trim)?;
        session.record_labels(masm.labels_bound(), masm.patches_applied());
        session.record_unit_compiled(name, code.len());

        log::debug!(
            "compiled {}: {} LIR instructions, {} bytes",
            name,
            emitted,
            code.len()
        );
        Ok(CompiledCode {
            name: name.to_string(),
            code,
            stats,
        })
    }
}
